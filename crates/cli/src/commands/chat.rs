//! `convogen chat`: Single-message or interactive chat.

use std::io::Write;

use convogen_chat::{GenerateRequest, ModelConfig};
use convogen_config::AppConfig;
use convogen_core::{ConversationTurn, LlmResult, LlmUsage, QueueEvent};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;

use super::setup::{self, Session};

pub struct ChatOptions {
    pub message: Option<String>,
    pub stream: bool,
    pub conversation: Option<String>,
    pub provider: Option<String>,
    pub model: Option<String>,
}

pub async fn run(options: ChatOptions) -> Result<(), Box<dyn std::error::Error>> {
    let config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;
    let model_config = ModelConfig::from_app_config(
        &config,
        options.provider.as_deref(),
        options.model.as_deref(),
    )?;

    if model_config.credentials.api_key().is_none() {
        eprintln!("  warning: no API key configured for '{}'", model_config.provider);
        eprintln!("  set CONVOGEN_API_KEY or add api_key to [providers.{}] in", model_config.provider);
        eprintln!("    {}", AppConfig::config_dir().join("config.toml").display());
    }

    let session = setup::session(&config).await;
    let conversation_id = options
        .conversation
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

    if let Some(message) = options.message {
        ask(&session, &config, &model_config, &conversation_id, message, options.stream).await?;
        return Ok(());
    }

    println!();
    println!("  convogen: interactive chat");
    println!();
    println!("  Provider:      {}", model_config.provider);
    println!("  Model:         {}", model_config.model);
    println!("  Conversation:  {conversation_id}");
    println!();
    println!("  Type your message and press Enter. Ctrl+C stops an answer,");
    println!("  'exit' quits.");
    println!();

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("  You > ");
        std::io::stdout().flush()?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        let line = line.trim().to_string();
        if line == "exit" || line == "quit" {
            break;
        }
        if line.is_empty() {
            continue;
        }

        if let Err(e) = ask(&session, &config, &model_config, &conversation_id, line, options.stream).await {
            eprintln!("  [Error] {e}");
        }
        println!();
    }

    println!();
    println!("  Goodbye!");
    Ok(())
}

/// Run one generation, print it, and remember the turn.
async fn ask(
    session: &Session,
    config: &AppConfig,
    model_config: &ModelConfig,
    conversation_id: &str,
    query: String,
    stream: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut request = GenerateRequest::new(&config.app_id, "cli", query.clone(), model_config.clone())
        .with_conversation(conversation_id);
    let cancel = CancellationToken::new();

    let result = if stream {
        stream_answer(session, request, cancel).await?
    } else {
        request = request.non_streaming();
        let result = tokio::select! {
            result = session.runner.run_non_stream(request, cancel.clone()) => result?,
            _ = tokio::signal::ctrl_c() => {
                cancel.cancel();
                return Err("cancelled".into());
            }
        };
        println!("{}", result.answer());
        result
    };

    print_usage(&result.usage);
    session
        .history
        .append(conversation_id, ConversationTurn::new(query, result.answer()))
        .await;
    Ok(())
}

/// Print deltas as they arrive; Ctrl+C cancels the generation.
async fn stream_answer(
    session: &Session,
    request: GenerateRequest,
    cancel: CancellationToken,
) -> Result<LlmResult, Box<dyn std::error::Error>> {
    let mut rx = session.runner.run(request, cancel.clone());
    let mut stdout = std::io::stdout();

    loop {
        let event = tokio::select! {
            event = rx.recv() => event,
            _ = tokio::signal::ctrl_c(), if !cancel.is_cancelled() => {
                cancel.cancel();
                continue;
            }
        };

        match event {
            Some(QueueEvent::LlmChunk { chunk }) => {
                write!(stdout, "{}", chunk.delta.message.text())?;
                stdout.flush()?;
            }
            Some(QueueEvent::TextChunk { text }) => {
                write!(stdout, "{text}")?;
                stdout.flush()?;
            }
            Some(QueueEvent::AnnotationReply { message_annotation_id }) => {
                tracing::debug!(annotation_id = %message_annotation_id, "Answer served from annotation");
            }
            Some(QueueEvent::MessageEnd { llm_result }) => {
                writeln!(stdout)?;
                return Ok(llm_result);
            }
            Some(QueueEvent::Stop) => {
                writeln!(stdout)?;
                eprintln!("  [stopped]");
            }
            Some(QueueEvent::Error { error }) => {
                writeln!(stdout)?;
                return Err(error.into());
            }
            Some(QueueEvent::Ping) => {}
            None => return Err("generation ended without a result".into()),
        }
    }
}

fn print_usage(usage: &LlmUsage) {
    if usage.is_zero() {
        return;
    }
    eprintln!(
        "  [{} prompt + {} completion = {} tokens, {} {}]",
        usage.prompt_tokens, usage.completion_tokens, usage.total_tokens, usage.total_price, usage.currency
    );
}
