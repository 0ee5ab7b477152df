//! OpenAI-compatible model implementation.
//!
//! Works with: OpenAI, Groq, DeepSeek, Zhipu AI, vLLM, Ollama, and any
//! endpoint exposing `/chat/completions` or `/completions` with SSE
//! streaming.
//!
//! Supports:
//! - Streaming chat and completion requests, split into frames by a
//!   per-credential delimiter
//! - Non-streaming requests
//! - Usage settlement through the [`UsageAccountant`]

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use convogen_core::{
    ChunkDelta, CompletionMode, Credentials, GenerationError, InvokeRequest, LargeLanguageModel,
    LlmResult, LlmResultChunk, PromptMessage, ResultSink,
};
use convogen_core::token::{CharTokenEstimator, TokenEstimator};
use convogen_telemetry::UsageAccountant;
use reqwest::header::{ACCEPT_CHARSET, AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue};
use serde_json::{Map, Value, json};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::frame::FrameReader;

/// Default upstream request timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(300);

/// Finish reason reported when the provider never sent one.
pub const UNKNOWN_FINISH_REASON: &str = "unknown";

/// Body keys owned by the client; parameters cannot override them.
const RESERVED_KEYS: [&str; 3] = ["model", "stream", "messages"];

/// Retry hint used when a 429 carries no `Retry-After`.
const DEFAULT_RETRY_AFTER_SECS: u64 = 5;

/// An OpenAI-compatible large language model.
///
/// Every request carries its own [`Credentials`], so one instance serves
/// any number of endpoints.
pub struct OpenAiCompatModel {
    name: String,
    client: reqwest::Client,
    accountant: UsageAccountant,
}

impl OpenAiCompatModel {
    /// Create a new OpenAI-compatible model.
    pub fn new(name: impl Into<String>, accountant: UsageAccountant, timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .expect("Failed to create HTTP client");

        Self {
            name: name.into(),
            client,
            accountant,
        }
    }

    /// The full URL for a request under these credentials.
    pub fn request_url(credentials: &Credentials) -> Result<String, GenerationError> {
        let endpoint = credentials.endpoint()?;
        Ok(format!("{endpoint}{}", credentials.mode().endpoint_path()))
    }

    /// Content type, charset, bearer auth, then any extra headers that do
    /// not collide with those.
    pub fn build_headers(credentials: &Credentials) -> Result<HeaderMap, GenerationError> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(ACCEPT_CHARSET, HeaderValue::from_static("utf-8"));

        if let Some(key) = credentials.api_key() {
            let value = HeaderValue::from_str(&format!("Bearer {key}"))
                .map_err(|e| GenerationError::Config(format!("invalid api key: {e}")))?;
            headers.insert(AUTHORIZATION, value);
        }

        for (name, value) in credentials.extra_headers() {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| GenerationError::Config(format!("invalid header {name}: {e}")))?;
            if headers.contains_key(&name) {
                debug!(header = %name, "Extra header ignored, already set");
                continue;
            }
            let value = HeaderValue::from_str(value)
                .map_err(|e| GenerationError::Config(format!("invalid header {name}: {e}")))?;
            headers.insert(name, value);
        }

        Ok(headers)
    }

    /// The JSON request body.
    pub fn build_body(request: &InvokeRequest, stream: bool) -> Value {
        let mut body = Map::new();
        body.insert("model".into(), json!(request.model));
        body.insert("stream".into(), json!(stream));

        for (key, value) in &request.parameters {
            if RESERVED_KEYS.contains(&key.as_str()) {
                warn!(parameter = %key, "Ignoring reserved model parameter");
                continue;
            }
            body.insert(key.clone(), value.clone());
        }

        match request.credentials.mode() {
            CompletionMode::Chat => {
                let messages: Vec<Value> = request
                    .prompt_messages
                    .iter()
                    .map(PromptMessage::to_request_value)
                    .collect();
                body.insert("messages".into(), Value::Array(messages));
            }
            CompletionMode::Completion => {
                let prompt = request
                    .prompt_messages
                    .iter()
                    .map(PromptMessage::text)
                    .collect::<Vec<_>>()
                    .join("\n");
                body.insert("prompt".into(), json!(prompt));
                body.insert("messages".into(), json!([]));
            }
        }

        // A single stop sequence is treated as absent.
        if request.stop.len() > 1 {
            body.insert("stop".into(), json!(request.stop));
        }

        if let Some(user) = request.user.as_deref().filter(|u| !u.is_empty()) {
            body.insert("user".into(), json!(user));
        }

        Value::Object(body)
    }

    async fn send(&self, request: &InvokeRequest, stream: bool) -> Result<reqwest::Response, GenerationError> {
        let url = Self::request_url(&request.credentials)?;
        let headers = Self::build_headers(&request.credentials)?;
        let body = Self::build_body(request, stream);

        debug!(provider = %self.name, model = %request.model, %url, stream, "Sending request");
        trace!(body = %body, "Request body");

        let response = self
            .client
            .post(&url)
            .headers(headers)
            .json(&body)
            .send()
            .await
            .map_err(|e| GenerationError::Transport(e.to_string()))?;

        check_status(response).await
    }

    /// One streaming session. Any error ends it and is returned unreported.
    async fn stream_session(&self, request: &InvokeRequest, sink: &ResultSink) -> Result<(), GenerationError> {
        let response = self.send(request, true).await?;

        let delimiter = request.credentials.stream_mode_delimiter().as_bytes().to_vec();
        let mut reader = FrameReader::new(Box::pin(response.bytes_stream()), delimiter);
        let mut state = StreamState::new(&request.model, request.prompt_messages.clone());

        loop {
            let frame = match reader.next_frame().await {
                Ok(Some(frame)) => frame,
                Ok(None) => break,
                Err(e) => return Err(GenerationError::Transport(e.to_string())),
            };
            if let Some(chunk) = state.on_frame(&frame)? {
                trace!(index = chunk.delta.index, "Chunk");
                sink.chunk(chunk);
            }
        }

        let usage = self.accountant.settle(&request.model, state.usage.as_ref())?;
        debug!(
            provider = %self.name,
            model = %request.model,
            chunks = state.index,
            total_tokens = usage.total_tokens,
            "Stream finished"
        );
        sink.finish(state.into_terminal_chunk(usage));
        Ok(())
    }

    async fn complete(&self, request: &InvokeRequest) -> Result<LlmResult, GenerationError> {
        let started = Instant::now();
        let response = self.send(request, false).await?;
        let text = response
            .text()
            .await
            .map_err(|e| GenerationError::Transport(e.to_string()))?;

        let json: Value = serde_json::from_str(&text)
            .map_err(|e| GenerationError::Decode(format!("{e}: {text}")))?;
        if let Some(error) = json.get("error").filter(|e| !e.is_null()) {
            return Err(GenerationError::Provider(provider_error_message(error)));
        }

        let choice = json
            .get("choices")
            .and_then(|c| c.get(0))
            .ok_or_else(|| GenerationError::Decode("response has no choices".into()))?;
        let content = match request.credentials.mode() {
            CompletionMode::Chat => choice.pointer("/message/content"),
            CompletionMode::Completion => choice.get("text"),
        }
        .and_then(Value::as_str)
        .unwrap_or_default();

        let mut usage = self.accountant.settle(&request.model, json.get("usage"))?;
        usage.latency = started.elapsed().as_secs_f64();

        Ok(LlmResult {
            id: json.get("id").and_then(Value::as_str).unwrap_or_default().to_string(),
            model: request.model.clone(),
            prompt_messages: request.prompt_messages.clone(),
            message: PromptMessage::assistant(content),
            usage,
            finish_reason: choice
                .get("finish_reason")
                .and_then(Value::as_str)
                .map(String::from),
        })
    }
}

#[async_trait]
impl LargeLanguageModel for OpenAiCompatModel {
    fn name(&self) -> &str {
        &self.name
    }

    async fn invoke(&self, request: InvokeRequest, sink: ResultSink, cancel: CancellationToken) {
        tokio::select! {
            // Dropping the session future aborts the in-flight request.
            _ = cancel.cancelled() => {
                debug!(provider = %self.name, model = %request.model, "Stream cancelled");
            }
            result = self.stream_session(&request, &sink) => {
                if let Err(e) = result {
                    warn!(provider = %self.name, model = %request.model, error = %e, "Stream failed");
                    sink.fail(e);
                }
            }
        }
    }

    async fn invoke_non_stream(
        &self,
        request: InvokeRequest,
        cancel: CancellationToken,
    ) -> Result<LlmResult, GenerationError> {
        tokio::select! {
            _ = cancel.cancelled() => Err(GenerationError::Cancelled),
            result = self.complete(&request) => result,
        }
    }

    fn token_estimator(&self) -> Option<Arc<dyn TokenEstimator>> {
        Some(Arc::new(CharTokenEstimator))
    }
}

/// Map non-2xx statuses to errors without reading frames.
async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, GenerationError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let code = status.as_u16();
    if code == 429 {
        let retry_after_secs = response
            .headers()
            .get(reqwest::header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(DEFAULT_RETRY_AFTER_SECS);
        return Err(GenerationError::RateLimited { retry_after_secs });
    }

    let body = response.text().await.unwrap_or_default();
    warn!(status = code, body = %body, "Provider returned error status");
    if code == 401 || code == 403 {
        return Err(GenerationError::AuthenticationFailed(body));
    }
    Err(GenerationError::Upstream {
        status_code: code,
        message: body,
    })
}

/// Best-effort human message out of an embedded `error` value.
fn provider_error_message(error: &Value) -> String {
    match error {
        Value::String(s) => s.clone(),
        Value::Object(obj) => obj
            .get("message")
            .and_then(Value::as_str)
            .map(String::from)
            .unwrap_or_else(|| error.to_string()),
        other => other.to_string(),
    }
}

/// Per-stream decoding state.
struct StreamState {
    model: String,
    prompt_messages: Arc<[PromptMessage]>,
    message_id: String,
    finish_reason: Option<String>,
    full_text: String,
    index: usize,
    usage: Option<Value>,
}

impl StreamState {
    fn new(model: &str, prompt_messages: Arc<[PromptMessage]>) -> Self {
        Self {
            model: model.to_string(),
            prompt_messages,
            message_id: String::new(),
            finish_reason: None,
            full_text: String::new(),
            index: 0,
            usage: None,
        }
    }

    /// Decode one raw frame. Returns a chunk when the frame carries content.
    fn on_frame(&mut self, raw: &str) -> Result<Option<LlmResultChunk>, GenerationError> {
        let frame = raw.trim();
        if frame.is_empty() || frame.starts_with(':') {
            return Ok(None);
        }

        let payload = frame
            .strip_prefix("data:")
            .map(str::trim_start)
            .unwrap_or(frame);
        if payload == "[DONE]" {
            return Ok(None);
        }

        let json: Value = serde_json::from_str(payload)
            .map_err(|e| GenerationError::Decode(format!("{e}: {payload}")))?;
        let Some(obj) = json.as_object() else {
            return Err(GenerationError::Decode(format!("frame is not an object: {payload}")));
        };

        // Some providers send `"error": null` on ordinary frames.
        if let Some(error) = obj.get("error").filter(|e| !e.is_null()) {
            return Err(GenerationError::Provider(provider_error_message(error)));
        }

        // Groq reports usage under `x_groq.usage`.
        let usage = obj
            .get("usage")
            .filter(|u| u.is_object())
            .or_else(|| obj.get("x_groq").and_then(|x| x.get("usage")).filter(|u| u.is_object()));
        if let Some(usage) = usage {
            self.usage = Some(usage.clone());
        }

        if let Some(id) = obj.get("id").and_then(Value::as_str) {
            self.message_id = id.to_string();
        }

        let Some(choice) = obj.get("choices").and_then(|c| c.get(0)) else {
            trace!("Frame without choices");
            return Ok(None);
        };
        if let Some(id) = choice.get("id").and_then(Value::as_str) {
            self.message_id = id.to_string();
        }
        if let Some(reason) = choice.get("finish_reason").and_then(Value::as_str) {
            self.finish_reason = Some(reason.to_string());
        }

        // Completion mode streams `text` on the choice instead of a delta.
        let content = match choice.get("delta") {
            Some(delta) => delta.get("content").and_then(Value::as_str),
            None => match choice.get("text").and_then(Value::as_str) {
                Some(text) => Some(text),
                None => {
                    debug!(frame = %payload, "Frame without delta, skipping");
                    return Ok(None);
                }
            },
        };
        let Some(content) = content.filter(|c| !c.is_empty()) else {
            return Ok(None);
        };

        self.full_text.push_str(content);
        let chunk = LlmResultChunk {
            id: self.message_id.clone(),
            model: self.model.clone(),
            prompt_messages: self.prompt_messages.clone(),
            delta: ChunkDelta {
                index: self.index,
                message: PromptMessage::assistant(content),
                finish_reason: None,
                usage: None,
            },
        };
        self.index += 1;
        Ok(Some(chunk))
    }

    fn into_terminal_chunk(self, usage: convogen_core::LlmUsage) -> LlmResultChunk {
        LlmResultChunk {
            id: self.message_id,
            model: self.model,
            prompt_messages: self.prompt_messages,
            delta: ChunkDelta {
                index: self.index,
                message: PromptMessage::assistant(self.full_text),
                finish_reason: Some(
                    self.finish_reason
                        .unwrap_or_else(|| UNKNOWN_FINISH_REASON.to_string()),
                ),
                usage: Some(usage),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use convogen_core::{EventQueue, QueueEvent};
    use convogen_telemetry::{FALLBACK_COMPLETION_TOKENS, FALLBACK_PROMPT_TOKENS, PricingTable};
    use httpmock::prelude::*;

    fn model() -> OpenAiCompatModel {
        let accountant = UsageAccountant::new(Arc::new(PricingTable::empty()));
        OpenAiCompatModel::new("openai_api_compatible", accountant, Duration::from_secs(5))
    }

    fn credentials(server: &MockServer) -> Credentials {
        Credentials::builder()
            .endpoint_url(server.url("/v1"))
            .api_key("sk-test")
            .build()
            .unwrap()
    }

    fn request(credentials: Credentials) -> InvokeRequest {
        InvokeRequest::new("gpt-4o-mini", credentials, vec![PromptMessage::user("hi")])
    }

    async fn run_stream(model: &OpenAiCompatModel, request: InvokeRequest) -> Vec<QueueEvent> {
        let (queue, rx) = EventQueue::shared();
        model
            .invoke(request, ResultSink::new(queue), CancellationToken::new())
            .await;
        rx.collect().await
    }

    fn content_of(event: &QueueEvent) -> Option<(usize, String)> {
        match event {
            QueueEvent::LlmChunk { chunk } => Some((chunk.delta.index, chunk.delta.message.text())),
            _ => None,
        }
    }

    // --- request building ---

    #[test]
    fn url_follows_mode() {
        let chat = Credentials::builder().endpoint_url("http://h/v1").build().unwrap();
        assert_eq!(OpenAiCompatModel::request_url(&chat).unwrap(), "http://h/v1/chat/completions");

        let completion = Credentials::builder()
            .endpoint_url("http://h/v1/")
            .mode(CompletionMode::Completion)
            .build()
            .unwrap();
        assert_eq!(OpenAiCompatModel::request_url(&completion).unwrap(), "http://h/v1/completions");
    }

    #[test]
    fn body_includes_stop_only_when_several() {
        let creds = Credentials::builder().endpoint_url("http://h").build().unwrap();
        let single = request(creds.clone()).with_stop(vec!["\nHuman:".into()]);
        assert!(OpenAiCompatModel::build_body(&single, true).get("stop").is_none());

        let several = request(creds).with_stop(vec!["a".into(), "b".into()]);
        assert_eq!(OpenAiCompatModel::build_body(&several, true)["stop"], json!(["a", "b"]));
    }

    #[test]
    fn body_merges_parameters_but_keeps_reserved_keys() {
        let creds = Credentials::builder().endpoint_url("http://h").build().unwrap();
        let req = request(creds)
            .with_parameter("temperature", json!(0.2))
            .with_parameter("model", json!("hijack"))
            .with_parameter("stream", json!(false))
            .with_user("user-1");
        let body = OpenAiCompatModel::build_body(&req, true);
        assert_eq!(body["model"], "gpt-4o-mini");
        assert_eq!(body["stream"], true);
        assert_eq!(body["temperature"], 0.2);
        assert_eq!(body["user"], "user-1");
        assert_eq!(body["messages"][0], json!({"role": "user", "content": "hi"}));
    }

    #[test]
    fn empty_user_is_omitted() {
        let creds = Credentials::builder().endpoint_url("http://h").build().unwrap();
        let body = OpenAiCompatModel::build_body(&request(creds).with_user(""), true);
        assert!(body.get("user").is_none());
    }

    #[test]
    fn completion_body_joins_prompt() {
        let creds = Credentials::builder()
            .endpoint_url("http://h")
            .mode(CompletionMode::Completion)
            .build()
            .unwrap();
        let req = InvokeRequest::new(
            "m",
            creds,
            vec![PromptMessage::system("rules"), PromptMessage::user("question")],
        );
        let body = OpenAiCompatModel::build_body(&req, false);
        assert_eq!(body["prompt"], "rules\nquestion");
        assert_eq!(body["messages"], json!([]));
    }

    #[test]
    fn extra_headers_never_override_defaults() {
        let creds = Credentials::builder()
            .api_key("sk-test")
            .header("Content-Type", "text/plain")
            .header("X-Org", "acme")
            .build()
            .unwrap();
        let headers = OpenAiCompatModel::build_headers(&creds).unwrap();
        assert_eq!(headers[CONTENT_TYPE], "application/json");
        assert_eq!(headers[ACCEPT_CHARSET], "utf-8");
        assert_eq!(headers[AUTHORIZATION], "Bearer sk-test");
        assert_eq!(headers["x-org"], "acme");
    }

    #[test]
    fn no_api_key_means_no_authorization() {
        let creds = Credentials::builder().build().unwrap();
        let headers = OpenAiCompatModel::build_headers(&creds).unwrap();
        assert!(headers.get(AUTHORIZATION).is_none());
    }

    // --- frame decoding ---

    #[test]
    fn frames_are_filtered_and_indexed() {
        let mut state = StreamState::new("m", Arc::from(Vec::new()));
        assert!(state.on_frame("   ").unwrap().is_none());
        assert!(state.on_frame(": keep-alive").unwrap().is_none());
        assert!(state.on_frame("data: [DONE]").unwrap().is_none());
        assert!(state
            .on_frame(r#"data: {"id":"x","choices":[{"delta":{"role":"assistant"}}]}"#)
            .unwrap()
            .is_none());

        let a = state.on_frame(r#"data: {"id":"x","choices":[{"delta":{"content":"A"}}]}"#).unwrap().unwrap();
        let b = state.on_frame(r#"{"choices":[{"delta":{"content":"B"},"finish_reason":"length"}]}"#).unwrap().unwrap();
        assert_eq!((a.delta.index, b.delta.index), (0, 1));
        assert_eq!(a.id, "x");

        let terminal = state.into_terminal_chunk(convogen_core::LlmUsage::empty());
        assert_eq!(terminal.delta.message.text(), "AB");
        assert_eq!(terminal.delta.finish_reason.as_deref(), Some("length"));
        assert!(terminal.is_terminal());
    }

    #[test]
    fn usage_found_under_vendor_key() {
        let mut state = StreamState::new("m", Arc::from(Vec::new()));
        state
            .on_frame(r#"data: {"choices":[{"delta":{}}],"x_groq":{"usage":{"prompt_tokens":3,"completion_tokens":4}}}"#)
            .unwrap();
        assert_eq!(state.usage.as_ref().unwrap()["completion_tokens"], 4);
    }

    #[test]
    fn null_error_field_is_not_a_failure() {
        let mut state = StreamState::new("m", Arc::from(Vec::new()));
        let chunk = state
            .on_frame(r#"data: {"id":"x","error":null,"choices":[{"delta":{"content":"Hi"}}]}"#)
            .unwrap()
            .unwrap();
        assert_eq!(chunk.delta.message.text(), "Hi");

        let err = state.on_frame(r#"data: {"error":"bad key"}"#).unwrap_err();
        assert_eq!(err, GenerationError::Provider("bad key".into()));
    }

    #[test]
    fn malformed_json_is_a_decode_error() {
        let mut state = StreamState::new("m", Arc::from(Vec::new()));
        let err = state.on_frame("data: {not json").unwrap_err();
        assert!(matches!(err, GenerationError::Decode(_)));
    }

    #[test]
    fn missing_finish_reason_uses_placeholder() {
        let state = StreamState::new("m", Arc::from(Vec::new()));
        let terminal = state.into_terminal_chunk(convogen_core::LlmUsage::empty());
        assert_eq!(terminal.delta.finish_reason.as_deref(), Some(UNKNOWN_FINISH_REASON));
    }

    // --- HTTP ---

    #[tokio::test]
    async fn streams_chunks_then_message_end_with_fallback_usage() {
        let server = MockServer::start_async().await;
        let body = concat!(
            "data: {\"id\":\"c1\",\"choices\":[{\"delta\":{\"content\":\"Hel\"}}]}\n\n",
            "data: {\"id\":\"c1\",\"choices\":[{\"delta\":{\"content\":\"lo\"}}]}\n\n",
            "data: {\"id\":\"c1\",\"choices\":[{\"delta\":{\"content\":\" world\"},\"finish_reason\":\"stop\"}]}\n\n",
            "data: [DONE]\n\n"
        );
        let mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/v1/chat/completions")
                    .header("authorization", "Bearer sk-test")
                    .header("content-type", "application/json")
                    .json_body_partial(r#"{"model":"gpt-4o-mini","stream":true}"#);
                then.status(200)
                    .header("content-type", "text/event-stream")
                    .body(body);
            })
            .await;

        let events = run_stream(&model(), request(credentials(&server))).await;
        mock.assert_async().await;

        let chunks: Vec<_> = events.iter().filter_map(content_of).collect();
        assert_eq!(
            chunks,
            vec![(0, "Hel".to_string()), (1, "lo".to_string()), (2, " world".to_string())]
        );
        assert_eq!(events.len(), 4);
        match events.last().unwrap() {
            QueueEvent::MessageEnd { llm_result } => {
                assert_eq!(llm_result.answer(), "Hello world");
                assert_eq!(llm_result.id, "c1");
                assert_eq!(llm_result.finish_reason.as_deref(), Some("stop"));
                assert_eq!(llm_result.usage.prompt_tokens, FALLBACK_PROMPT_TOKENS);
                assert_eq!(llm_result.usage.completion_tokens, FALLBACK_COMPLETION_TOKENS);
            }
            other => panic!("expected message_end, got {}", other.event_type()),
        }
    }

    #[tokio::test]
    async fn embedded_error_stops_the_stream() {
        let server = MockServer::start_async().await;
        let body = concat!(
            "data: {\"choices\":[{\"delta\":{\"content\":\"partial\"}}]}\n\n",
            "data: {\"error\":{\"message\":\"model overloaded\"}}\n\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\"never\"}}]}\n\n"
        );
        server
            .mock_async(|when, then| {
                when.method(POST).path("/v1/chat/completions");
                then.status(200).body(body);
            })
            .await;

        let events = run_stream(&model(), request(credentials(&server))).await;
        assert_eq!(events.len(), 2);
        assert_eq!(content_of(&events[0]), Some((0, "partial".to_string())));
        assert!(matches!(
            &events[1],
            QueueEvent::Error { error: GenerationError::Provider(msg) } if msg == "model overloaded"
        ));
    }

    #[tokio::test]
    async fn connection_lost_mid_stream_is_one_transport_error() {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();

            // Read the whole request before answering.
            let mut request = Vec::new();
            let mut buf = [0u8; 4096];
            loop {
                let n = socket.read(&mut buf).await.unwrap();
                if n == 0 {
                    return;
                }
                request.extend_from_slice(&buf[..n]);
                let text = String::from_utf8_lossy(&request).to_string();
                if let Some(head_end) = text.find("\r\n\r\n") {
                    let length = text[..head_end]
                        .lines()
                        .find_map(|l| {
                            let (name, value) = l.split_once(':')?;
                            name.eq_ignore_ascii_case("content-length")
                                .then(|| value.trim().parse::<usize>().ok())?
                        })
                        .unwrap_or(0);
                    if request.len() >= head_end + 4 + length {
                        break;
                    }
                }
            }

            let frame = "data: {\"choices\":[{\"delta\":{\"content\":\"Hel\"}}]}\n\n";
            let response = format!(
                "HTTP/1.1 200 OK\r\ncontent-type: text/event-stream\r\ntransfer-encoding: chunked\r\n\r\n{:x}\r\n{frame}\r\n",
                frame.len()
            );
            socket.write_all(response.as_bytes()).await.unwrap();
            socket.flush().await.unwrap();
            tokio::time::sleep(Duration::from_millis(50)).await;
            // Dropping the socket cuts the chunked body short.
        });

        let creds = Credentials::builder()
            .endpoint_url(format!("http://{addr}/v1"))
            .build()
            .unwrap();
        let events = run_stream(&model(), request(creds)).await;

        assert_eq!(events.len(), 2);
        assert_eq!(content_of(&events[0]), Some((0, "Hel".to_string())));
        assert!(matches!(
            &events[1],
            QueueEvent::Error { error: GenerationError::Transport(_) }
        ));
        assert!(!events.iter().any(|e| matches!(e, QueueEvent::MessageEnd { .. })));
    }

    #[tokio::test]
    async fn missing_endpoint_is_one_config_error_without_request() {
        let creds = Credentials::builder().api_key("sk").build().unwrap();
        let events = run_stream(&model(), request(creds)).await;
        assert_eq!(events.len(), 1);
        assert!(matches!(
            &events[0],
            QueueEvent::Error { error: GenerationError::Config(_) }
        ));
    }

    #[tokio::test]
    async fn custom_delimiter_and_groq_usage() {
        let server = MockServer::start_async().await;
        let body = concat!(
            "data: {\"choices\":[{\"delta\":{\"content\":\"a\\nb\"}}]}|",
            "data: {\"choices\":[{\"delta\":{},\"finish_reason\":\"stop\"}],",
            "\"x_groq\":{\"usage\":{\"prompt_tokens\":\"12\",\"completion_tokens\":7.0}}}|",
            "data: [DONE]"
        );
        server
            .mock_async(|when, then| {
                when.method(POST).path("/v1/chat/completions");
                then.status(200).body(body);
            })
            .await;

        let creds = Credentials::builder()
            .endpoint_url(server.url("/v1"))
            .stream_mode_delimiter("|")
            .build()
            .unwrap();
        let events = run_stream(&model(), request(creds)).await;
        assert_eq!(events.len(), 2);
        match &events[1] {
            QueueEvent::MessageEnd { llm_result } => {
                assert_eq!(llm_result.answer(), "a\nb");
                assert_eq!(llm_result.usage.prompt_tokens, 12);
                assert_eq!(llm_result.usage.completion_tokens, 7);
            }
            other => panic!("expected message_end, got {}", other.event_type()),
        }
    }

    #[tokio::test]
    async fn stop_and_user_reach_the_wire() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/v1/chat/completions")
                    .json_body_partial(r#"{"stop":["x","y"],"user":"u-42"}"#);
                then.status(200).body("data: [DONE]\n\n");
            })
            .await;

        let req = request(credentials(&server))
            .with_stop(vec!["x".into(), "y".into()])
            .with_user("u-42");
        let events = run_stream(&model(), req).await;
        mock.assert_async().await;
        assert!(matches!(events.last(), Some(QueueEvent::MessageEnd { .. })));
    }

    #[tokio::test]
    async fn status_codes_map_to_errors() {
        for (status, expected) in [(429, "rate_limited"), (401, "authentication_failed"), (500, "upstream_error")] {
            let server = MockServer::start_async().await;
            server
                .mock_async(|when, then| {
                    when.method(POST).path("/v1/chat/completions");
                    then.status(status).body("nope");
                })
                .await;

            let events = run_stream(&model(), request(credentials(&server))).await;
            assert_eq!(events.len(), 1);
            match &events[0] {
                QueueEvent::Error { error } => assert_eq!(error.code(), expected),
                other => panic!("expected error, got {}", other.event_type()),
            }
        }
    }

    #[tokio::test]
    async fn cancellation_aborts_the_request() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/v1/chat/completions");
                then.status(200)
                    .delay(Duration::from_secs(10))
                    .body("data: [DONE]\n\n");
            })
            .await;

        let (queue, _rx) = EventQueue::shared();
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.cancel();
        });

        let started = Instant::now();
        model()
            .invoke(request(credentials(&server)), ResultSink::new(queue.clone()), cancel)
            .await;
        assert!(started.elapsed() < Duration::from_secs(5));
        // The caller owns the terminal event after a cancel.
        assert!(!queue.is_closed());
    }

    #[tokio::test]
    async fn non_stream_returns_full_result() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/v1/chat/completions")
                    .json_body_partial(r#"{"stream":false}"#);
                then.status(200).json_body(json!({
                    "id": "r1",
                    "choices": [{"message": {"role": "assistant", "content": "Hi there"}, "finish_reason": "stop"}],
                    "usage": {"prompt_tokens": 5, "completion_tokens": 2}
                }));
            })
            .await;

        let result = model()
            .invoke_non_stream(request(credentials(&server)), CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(result.answer(), "Hi there");
        assert_eq!(result.usage.total_tokens, 7);
        assert_eq!(result.finish_reason.as_deref(), Some("stop"));
    }

    #[tokio::test]
    async fn non_stream_surfaces_embedded_error() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/v1/chat/completions");
                then.status(200).json_body(json!({"error": "quota exceeded"}));
            })
            .await;

        let err = model()
            .invoke_non_stream(request(credentials(&server)), CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err, GenerationError::Provider("quota exceeded".into()));
    }
}
