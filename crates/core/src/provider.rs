//! The large-language-model abstraction.
//!
//! A model knows how to send prompt messages upstream and report the answer
//! either incrementally through a [`ResultSink`] or as one [`LlmResult`].
//! The runner calls it without knowing which vendor sits behind it.

use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::credentials::Credentials;
use crate::error::GenerationError;
use crate::event::ResultSink;
use crate::message::PromptMessage;
use crate::result::LlmResult;
use crate::token::TokenEstimator;

/// Everything one upstream call needs.
#[derive(Debug, Clone)]
pub struct InvokeRequest {
    /// Model name sent upstream (e.g., "gpt-4o-mini", "glm-4")
    pub model: String,

    pub credentials: Credentials,

    /// Completion parameters merged into the request body
    /// (temperature, max_tokens, top_p, ...)
    pub parameters: serde_json::Map<String, serde_json::Value>,

    pub prompt_messages: Arc<[PromptMessage]>,

    pub stop: Vec<String>,

    /// End-user identifier forwarded for abuse monitoring
    pub user: Option<String>,
}

impl InvokeRequest {
    pub fn new(
        model: impl Into<String>,
        credentials: Credentials,
        prompt_messages: Vec<PromptMessage>,
    ) -> Self {
        Self {
            model: model.into(),
            credentials,
            parameters: serde_json::Map::new(),
            prompt_messages: Arc::from(prompt_messages),
            stop: Vec::new(),
            user: None,
        }
    }

    pub fn with_parameter(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.parameters.insert(key.into(), value);
        self
    }

    pub fn with_stop(mut self, stop: Vec<String>) -> Self {
        self.stop = stop;
        self
    }

    pub fn with_user(mut self, user: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self
    }
}

/// Every model backend implements this trait.
#[async_trait]
pub trait LargeLanguageModel: Send + Sync {
    /// Registry name (e.g., "openai_api_compatible", "groq").
    fn name(&self) -> &str;

    /// Stream the answer into `sink`.
    ///
    /// Implementations end the sink with exactly one terminal event:
    /// `finish` on success, `fail` on any error. If `cancel` fires first they
    /// return without touching the sink again.
    async fn invoke(&self, request: InvokeRequest, sink: ResultSink, cancel: CancellationToken);

    /// Produce the whole answer at once.
    async fn invoke_non_stream(
        &self,
        request: InvokeRequest,
        cancel: CancellationToken,
    ) -> Result<LlmResult, GenerationError>;

    /// The tokenizer used for memory budgets, when the model has one.
    fn token_estimator(&self) -> Option<Arc<dyn TokenEstimator>> {
        None
    }
}
