//! Inbound generation requests.

use convogen_config::{AppConfig, ConfigError};
use convogen_core::{CompletionMode, Credentials};
use convogen_providers::preset_endpoint;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// The kind of app the request belongs to. Selects the prompt rule set.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AppMode {
    /// Conversational app with history.
    #[default]
    Chat,
    /// One-shot text completion app.
    Completion,
}

/// The model a request runs against, with its resolved credentials.
#[derive(Debug, Clone)]
pub struct ModelConfig {
    /// Registry name of the backend (e.g., "openai_api_compatible", "groq")
    pub provider: String,

    /// Model name sent upstream
    pub model: String,

    pub credentials: Credentials,

    /// Completion parameters merged into the upstream body
    pub parameters: Map<String, Value>,

    /// Context window of the model, when known
    pub context_size: Option<usize>,

    /// Tokens reserved for the answer
    pub max_tokens: Option<usize>,
}

impl ModelConfig {
    pub fn new(provider: impl Into<String>, model: impl Into<String>, credentials: Credentials) -> Self {
        Self {
            provider: provider.into(),
            model: model.into(),
            credentials,
            parameters: Map::new(),
            context_size: None,
            max_tokens: None,
        }
    }

    /// The model named by config (or `provider` / `model` when given), with
    /// the configured temperature, answer reservation and context size.
    ///
    /// Built-in vendor presets always run in chat mode at their fixed
    /// endpoint, so their credentials are pinned here as well.
    pub fn from_app_config(
        config: &AppConfig,
        provider: Option<&str>,
        model: Option<&str>,
    ) -> Result<Self, ConfigError> {
        let provider = provider.unwrap_or(&config.default_provider);
        let model = model.unwrap_or(&config.default_model);
        let mut credentials = config.credentials_for(provider)?;
        if let Some(endpoint) = preset_endpoint(provider) {
            credentials = credentials.pinned(CompletionMode::Chat, endpoint);
        }
        Ok(Self::new(provider, model, credentials)
            .with_parameter("temperature", Value::from(config.default_temperature))
            .with_max_tokens(config.default_max_tokens as usize)
            .with_context_size(config.context_size as usize))
    }

    pub fn with_parameter(mut self, key: impl Into<String>, value: Value) -> Self {
        self.parameters.insert(key.into(), value);
        self
    }

    pub fn with_context_size(mut self, tokens: usize) -> Self {
        self.context_size = Some(tokens);
        self
    }

    /// Reserve answer tokens. Also sent upstream as `max_tokens`.
    pub fn with_max_tokens(mut self, tokens: usize) -> Self {
        self.max_tokens = Some(tokens);
        self.parameters.insert("max_tokens".into(), Value::from(tokens));
        self
    }

    pub fn mode(&self) -> CompletionMode {
        self.credentials.mode()
    }
}

/// One inbound call. Read-only once built.
#[derive(Debug, Clone)]
pub struct GenerateRequest {
    pub app_id: String,
    pub app_mode: AppMode,
    pub conversation_id: Option<String>,
    pub user_id: String,
    pub query: String,

    /// Values for the pre-prompt's `{{variable}}` placeholders
    pub inputs: Map<String, Value>,

    pub model_config: ModelConfig,

    /// Stream chunks to the queue (`true`) or return one result.
    pub stream: bool,
}

impl GenerateRequest {
    pub fn new(
        app_id: impl Into<String>,
        user_id: impl Into<String>,
        query: impl Into<String>,
        model_config: ModelConfig,
    ) -> Self {
        Self {
            app_id: app_id.into(),
            app_mode: AppMode::Chat,
            conversation_id: None,
            user_id: user_id.into(),
            query: query.into(),
            inputs: Map::new(),
            model_config,
            stream: true,
        }
    }

    pub fn with_conversation(mut self, conversation_id: impl Into<String>) -> Self {
        self.conversation_id = Some(conversation_id.into());
        self
    }

    pub fn with_app_mode(mut self, mode: AppMode) -> Self {
        self.app_mode = mode;
        self
    }

    pub fn with_input(mut self, key: impl Into<String>, value: Value) -> Self {
        self.inputs.insert(key.into(), value);
        self
    }

    pub fn non_streaming(mut self) -> Self {
        self.stream = false;
        self
    }
}
