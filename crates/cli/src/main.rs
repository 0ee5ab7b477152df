//! convogen CLI: the main entry point.
//!
//! Commands:
//! - `chat`:   single-shot or interactive chat against the configured model
//! - `models`: list registered model backends
//! - `config`: print the default configuration

use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(
    name = "convogen",
    about = "convogen: streaming conversation generation against OpenAI-compatible models",
    version,
    author
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Chat with the configured model
    Chat {
        /// Send a single message instead of entering interactive mode
        #[arg(short, long)]
        message: Option<String>,

        /// Wait for the full answer instead of streaming it
        #[arg(long)]
        no_stream: bool,

        /// Conversation ID to continue (history is kept for this session)
        #[arg(long)]
        conversation: Option<String>,

        /// Override the provider
        #[arg(long)]
        provider: Option<String>,

        /// Override the model
        #[arg(long)]
        model: Option<String>,
    },

    /// List registered model backends
    Models,

    /// Print the default configuration TOML
    Config {
        /// Print the config file path instead
        #[arg(long)]
        path: bool,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize tracing
    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Chat {
            message,
            no_stream,
            conversation,
            provider,
            model,
        } => {
            commands::chat::run(commands::chat::ChatOptions {
                message,
                stream: !no_stream,
                conversation,
                provider,
                model,
            })
            .await?
        }
        Commands::Models => commands::models::run().await?,
        Commands::Config { path } => {
            if path {
                commands::config_cmd::path().await?
            } else {
                commands::config_cmd::show_default().await?
            }
        }
    }

    Ok(())
}
