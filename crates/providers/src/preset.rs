//! Vendor presets: OpenAI-compatible vendors with a fixed endpoint.
//!
//! A preset pins the endpoint and chat mode on every request, then
//! delegates to the wrapped model. Users only configure an API key.

use std::sync::Arc;

use async_trait::async_trait;
use convogen_core::token::TokenEstimator;
use convogen_core::{
    CompletionMode, GenerationError, InvokeRequest, LargeLanguageModel, LlmResult, ResultSink,
};
use tokio_util::sync::CancellationToken;
use tracing::trace;

pub const ZHIPUAI_ENDPOINT: &str = "https://open.bigmodel.cn/api/paas/v4";
pub const GROQ_ENDPOINT: &str = "https://api.groq.com/openai/v1";
pub const DEEPSEEK_ENDPOINT: &str = "https://api.deepseek.com/v1";

/// The fixed endpoint of a built-in preset.
pub fn preset_endpoint(name: &str) -> Option<&'static str> {
    match name {
        "zhipuai" => Some(ZHIPUAI_ENDPOINT),
        "groq" => Some(GROQ_ENDPOINT),
        "deepseek" => Some(DEEPSEEK_ENDPOINT),
        _ => None,
    }
}

/// A named wrapper that fixes the endpoint of an OpenAI-compatible vendor.
pub struct VendorPreset {
    name: String,
    endpoint_url: String,
    inner: Arc<dyn LargeLanguageModel>,
}

impl VendorPreset {
    pub fn new(
        name: impl Into<String>,
        endpoint_url: impl Into<String>,
        inner: Arc<dyn LargeLanguageModel>,
    ) -> Self {
        Self {
            name: name.into(),
            endpoint_url: endpoint_url.into(),
            inner,
        }
    }

    pub fn zhipuai(inner: Arc<dyn LargeLanguageModel>) -> Self {
        Self::new("zhipuai", ZHIPUAI_ENDPOINT, inner)
    }

    pub fn groq(inner: Arc<dyn LargeLanguageModel>) -> Self {
        Self::new("groq", GROQ_ENDPOINT, inner)
    }

    pub fn deepseek(inner: Arc<dyn LargeLanguageModel>) -> Self {
        Self::new("deepseek", DEEPSEEK_ENDPOINT, inner)
    }

    pub fn endpoint_url(&self) -> &str {
        &self.endpoint_url
    }

    fn pin(&self, mut request: InvokeRequest) -> InvokeRequest {
        trace!(preset = %self.name, endpoint = %self.endpoint_url, "Pinning preset endpoint");
        request.credentials = request
            .credentials
            .pinned(CompletionMode::Chat, &self.endpoint_url);
        request
    }
}

#[async_trait]
impl LargeLanguageModel for VendorPreset {
    fn name(&self) -> &str {
        &self.name
    }

    async fn invoke(&self, request: InvokeRequest, sink: ResultSink, cancel: CancellationToken) {
        self.inner.invoke(self.pin(request), sink, cancel).await;
    }

    async fn invoke_non_stream(
        &self,
        request: InvokeRequest,
        cancel: CancellationToken,
    ) -> Result<LlmResult, GenerationError> {
        self.inner.invoke_non_stream(self.pin(request), cancel).await
    }

    fn token_estimator(&self) -> Option<Arc<dyn TokenEstimator>> {
        self.inner.token_estimator()
    }
}
