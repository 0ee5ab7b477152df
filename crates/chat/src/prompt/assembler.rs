//! Prompt assembler: rules + pre-prompt + memory + query → messages.
//!
//! # Chat models
//!
//! The system prompt is built from the rule's section order and sent as a
//! system message when both it and the query are non-empty. The memory
//! window follows as separate messages, and the query is always the last
//! user message, even when empty. No stop sequences.
//!
//! # Completion models
//!
//! The whole template (histories rendered as prefixed text, query prompt
//! appended) becomes one user message, and the rule's stops are returned.

use convogen_core::{CompletionMode, PromptMessage};
use serde_json::{Map, Value};
use tracing::debug;

use crate::memory::TokenBufferMemory;
use crate::prompt::rules::{PromptRules, PromptSection};
use crate::prompt::template::{CONTEXT_KEY, HISTORIES_KEY, PromptTemplate, QUERY_KEY};
use crate::request::{AppMode, ModelConfig};

/// The resolved template for one request.
#[derive(Debug, Clone)]
pub struct TemplateConfig {
    pub template: PromptTemplate,
    /// Keys the pre-prompt expects from request inputs
    pub custom_variable_keys: Vec<String>,
    /// Which of `#context#`, `#histories#`, `#query#` the template uses
    pub special_variable_keys: Vec<&'static str>,
    pub rules: &'static PromptRules,
}

/// All inputs for one assembly.
pub struct AssemblyInput<'a> {
    pub app_mode: AppMode,
    pub model_config: &'a ModelConfig,
    pub pre_prompt: &'a str,
    pub inputs: &'a Map<String, Value>,
    pub query: &'a str,
    /// Retrieved knowledge, when any
    pub context: Option<&'a str>,
    pub memory: Option<&'a TokenBufferMemory>,
    /// Upper bound for the memory window in tokens
    pub memory_token_limit: usize,
    /// Upper bound for the memory window in turns
    pub memory_message_limit: usize,
}

/// Messages and stop sequences ready for the model.
#[derive(Debug, Clone, PartialEq)]
pub struct AssembledPrompt {
    pub messages: Vec<PromptMessage>,
    pub stop: Vec<String>,
}

/// Stateless; one instance serves every request.
#[derive(Debug, Clone, Copy, Default)]
pub struct PromptAssembler;

impl PromptAssembler {
    pub fn new() -> Self {
        Self
    }

    /// Resolve rules and build the template for the sections that apply.
    pub fn template_config(
        &self,
        app_mode: AppMode,
        model_config: &ModelConfig,
        pre_prompt: &str,
        has_context: bool,
        query_in_prompt: bool,
        with_memory_prompt: bool,
    ) -> TemplateConfig {
        let rules = PromptRules::resolve(app_mode, &model_config.provider, &model_config.model);

        let mut prompt = String::new();
        let mut custom_variable_keys = Vec::new();
        let mut special_variable_keys = Vec::new();

        for section in rules.system_prompt_orders {
            match section {
                PromptSection::Context if has_context => {
                    prompt.push_str(rules.context_prompt);
                    special_variable_keys.push(CONTEXT_KEY);
                }
                PromptSection::PrePrompt if !pre_prompt.is_empty() => {
                    prompt.push_str(pre_prompt);
                    prompt.push('\n');
                    custom_variable_keys = PromptTemplate::new(pre_prompt).extract().to_vec();
                }
                PromptSection::Histories if with_memory_prompt => {
                    prompt.push_str(rules.histories_prompt);
                    special_variable_keys.push(HISTORIES_KEY);
                }
                _ => {}
            }
        }

        if query_in_prompt {
            prompt.push_str(rules.query_prompt);
            special_variable_keys.push(QUERY_KEY);
        }

        TemplateConfig {
            template: PromptTemplate::new(prompt),
            custom_variable_keys,
            special_variable_keys,
            rules,
        }
    }

    pub async fn assemble(&self, input: AssemblyInput<'_>) -> AssembledPrompt {
        let assembled = match input.model_config.mode() {
            CompletionMode::Chat => self.chat_prompt(&input).await,
            CompletionMode::Completion => self.completion_prompt(&input).await,
        };
        debug!(
            model = %input.model_config.model,
            messages = assembled.messages.len(),
            stops = assembled.stop.len(),
            "Assembled prompt"
        );
        assembled
    }

    async fn chat_prompt(&self, input: &AssemblyInput<'_>) -> AssembledPrompt {
        let config = self.template_config(
            input.app_mode,
            input.model_config,
            input.pre_prompt,
            input.context.is_some(),
            PromptRules::query_in_prompt(CompletionMode::Chat),
            false,
        );
        let prompt = config.template.format(&variables(&config, input, ""), false);

        let mut messages = Vec::new();
        if !prompt.is_empty() && !input.query.is_empty() {
            messages.push(PromptMessage::system(prompt));
        }

        if let Some(memory) = input.memory {
            let current = user_message_tokens(memory, &messages, input.query);
            let budget = memory_budget(input, current);
            messages.extend(
                memory
                    .history_prompt_messages(budget, input.memory_message_limit)
                    .await,
            );
        }

        messages.push(PromptMessage::user(input.query));

        AssembledPrompt {
            messages,
            stop: Vec::new(),
        }
    }

    async fn completion_prompt(&self, input: &AssemblyInput<'_>) -> AssembledPrompt {
        let config = self.template_config(
            input.app_mode,
            input.model_config,
            input.pre_prompt,
            input.context.is_some(),
            PromptRules::query_in_prompt(CompletionMode::Completion),
            input.memory.is_some(),
        );

        let mut prompt = config.template.format(&variables(&config, input, ""), false);

        if let Some(memory) = input.memory {
            if config.special_variable_keys.contains(&HISTORIES_KEY) {
                let current = memory
                    .estimator()
                    .count_message(&PromptMessage::user(prompt.as_str()));
                let budget = memory_budget(input, current);
                let histories = memory
                    .history_text(
                        config.rules.human_prefix,
                        config.rules.assistant_prefix,
                        budget,
                        input.memory_message_limit,
                    )
                    .await;
                prompt = config
                    .template
                    .format(&variables(&config, input, &histories), false);
            }
        }

        AssembledPrompt {
            messages: vec![PromptMessage::user(prompt)],
            stop: config.rules.stops(),
        }
    }
}

/// Template values: the pre-prompt's inputs plus the special keys in use.
fn variables(config: &TemplateConfig, input: &AssemblyInput<'_>, histories: &str) -> Map<String, Value> {
    let mut values = Map::new();
    for key in &config.custom_variable_keys {
        if let Some(value) = input.inputs.get(key) {
            values.insert(key.clone(), value.clone());
        }
    }
    for key in &config.special_variable_keys {
        let value = match *key {
            CONTEXT_KEY => input.context.unwrap_or_default(),
            QUERY_KEY => input.query,
            HISTORIES_KEY => histories,
            _ => continue,
        };
        values.insert((*key).to_string(), Value::String(value.to_string()));
    }
    values
}

fn user_message_tokens(memory: &TokenBufferMemory, messages: &[PromptMessage], query: &str) -> usize {
    memory.estimator().count_messages(messages)
        + memory.estimator().count_message(&PromptMessage::user(query))
}

/// `min(token limit, context − answer reservation − current prompt)`.
fn memory_budget(input: &AssemblyInput<'_>, current_prompt_tokens: usize) -> usize {
    match input.model_config.context_size {
        Some(context_size) => {
            let rest = context_size
                .saturating_sub(input.model_config.max_tokens.unwrap_or(0))
                .saturating_sub(current_prompt_tokens);
            rest.min(input.memory_token_limit)
        }
        None => input.memory_token_limit,
    }
}
