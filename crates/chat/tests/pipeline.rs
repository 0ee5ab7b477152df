//! End-to-end pipeline tests: runner → OpenAI-compatible client → mock upstream.

use std::sync::Arc;
use std::time::Duration;

use convogen_chat::{AnnotationMatcher, GenerateRequest, GenerationRunner, ModelConfig};
use convogen_core::{
    AnnotationRecord, CompletionMode, ConversationTurn, Credentials, GenerationError, QueueEvent,
};
use convogen_memory::{InMemoryAnnotationStore, InMemoryHistoryStore};
use convogen_providers::ModelRegistry;
use convogen_telemetry::{ModelPricing, PricingTable, UsageAccountant};
use httpmock::prelude::*;
use rust_decimal::Decimal;
use tokio_util::sync::CancellationToken;

const SSE_BODY: &str = concat!(
    ": keep-alive\n\n",
    "data: {\"id\":\"chatcmpl-1\",\"choices\":[{\"delta\":{\"role\":\"assistant\",\"content\":\"\"}}]}\n\n",
    "data: {\"id\":\"chatcmpl-1\",\"choices\":[{\"delta\":{\"content\":\"Hel\"}}]}\n\n",
    "data: {\"id\":\"chatcmpl-1\",\"choices\":[{\"delta\":{\"content\":\"lo\"}}]}\n\n",
    "data: {\"id\":\"chatcmpl-1\",\"choices\":[{\"delta\":{\"content\":\" world\"},\"finish_reason\":\"stop\"}],",
    "\"usage\":{\"prompt_tokens\":100,\"completion_tokens\":50,\"total_tokens\":150}}\n\n",
    "data: [DONE]\n\n"
);

fn pricing() -> Arc<PricingTable> {
    let table = PricingTable::empty();
    table.set(
        "gpt-4o-mini",
        ModelPricing {
            input: Decimal::new(1, 3),
            output: Decimal::new(2, 3),
            unit: Decimal::ONE,
            currency: "USD".into(),
        },
    );
    Arc::new(table)
}

fn registry() -> Arc<ModelRegistry> {
    Arc::new(ModelRegistry::with_builtin(
        UsageAccountant::new(pricing()),
        Duration::from_secs(5),
    ))
}

fn model_config(server: &MockServer) -> ModelConfig {
    let creds = Credentials::builder()
        .endpoint_url(server.url("/v1"))
        .api_key("sk-test")
        .mode(CompletionMode::Chat)
        .build()
        .unwrap();
    ModelConfig::new("openai_api_compatible", "gpt-4o-mini", creds)
        .with_context_size(4096)
        .with_max_tokens(256)
}

fn chunk_texts(events: &[QueueEvent]) -> Vec<(usize, String)> {
    events
        .iter()
        .filter_map(|e| match e {
            QueueEvent::LlmChunk { chunk } => Some((chunk.delta.index, chunk.delta.message.text())),
            _ => None,
        })
        .collect()
}

#[tokio::test]
async fn streamed_generation_with_history_and_pricing() {
    let server = MockServer::start_async().await;
    let mock = server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/v1/chat/completions")
                .header("authorization", "Bearer sk-test")
                .json_body_partial(
                    r#"{
                        "model": "gpt-4o-mini",
                        "stream": true,
                        "max_tokens": 256,
                        "messages": [
                            {"role": "system", "content": "You are terse.\n"},
                            {"role": "user", "content": "earlier question"},
                            {"role": "assistant", "content": "earlier answer"},
                            {"role": "user", "content": "say hello"}
                        ]
                    }"#,
                );
            then.status(200)
                .header("content-type", "text/event-stream")
                .body(SSE_BODY);
        })
        .await;

    let history = Arc::new(InMemoryHistoryStore::new());
    history
        .append("conv-1", ConversationTurn::new("earlier question", "earlier answer"))
        .await;

    let runner = Arc::new(GenerationRunner::new(registry(), history).with_pre_prompt("You are terse."));
    let request = GenerateRequest::new("app", "user-1", "say hello", model_config(&server))
        .with_conversation("conv-1");

    let events = runner.run(request, CancellationToken::new()).collect().await;
    mock.assert_async().await;

    assert_eq!(
        chunk_texts(&events),
        vec![(0, "Hel".into()), (1, "lo".into()), (2, " world".into())]
    );
    assert_eq!(events.iter().filter(|e| e.is_terminal()).count(), 1);

    match events.last().unwrap() {
        QueueEvent::MessageEnd { llm_result } => {
            assert_eq!(llm_result.answer(), "Hello world");
            assert_eq!(llm_result.usage.prompt_tokens, 100);
            assert_eq!(llm_result.usage.completion_tokens, 50);
            assert_eq!(llm_result.usage.total_tokens, 150);
            assert_eq!(llm_result.usage.total_price, Decimal::new(2, 1));
            assert_eq!(llm_result.usage.currency, "USD");
        }
        other => panic!("expected message_end, got {}", other.event_type()),
    }
}

#[tokio::test]
async fn annotation_match_never_calls_upstream() {
    let server = MockServer::start_async().await;
    let mock = server
        .mock_async(|when, then| {
            when.method(POST);
            then.status(200).body(SSE_BODY);
        })
        .await;

    let annotations = Arc::new(InMemoryAnnotationStore::new());
    annotations
        .insert(AnnotationRecord {
            id: "ann-7".into(),
            app_id: "app".into(),
            question: "What is the refund policy?".into(),
            content: "30 days".into(),
        })
        .await;

    let runner = Arc::new(
        GenerationRunner::new(registry(), Arc::new(InMemoryHistoryStore::new()))
            .with_annotations(AnnotationMatcher::new(annotations.clone(), 0.9))
            .with_char_delay(Duration::from_millis(1)),
    );
    let request = GenerateRequest::new(
        "app",
        "user-1",
        "what is the refund policy?",
        model_config(&server),
    );

    let events = runner.run(request, CancellationToken::new()).collect().await;
    mock.assert_hits_async(0).await;

    assert!(matches!(
        &events[0],
        QueueEvent::AnnotationReply { message_annotation_id } if message_annotation_id == "ann-7"
    ));
    let text: String = chunk_texts(&events).into_iter().map(|(_, t)| t).collect();
    assert_eq!(text, "30 days");
    match events.last().unwrap() {
        QueueEvent::MessageEnd { llm_result } => assert!(llm_result.usage.is_zero()),
        other => panic!("expected message_end, got {}", other.event_type()),
    }
    assert_eq!(annotations.hit_count("ann-7").await, 1);
}

#[tokio::test]
async fn upstream_failure_is_a_single_error_event() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(POST).path("/v1/chat/completions");
            then.status(401).body("invalid api key");
        })
        .await;

    let runner = Arc::new(GenerationRunner::new(
        registry(),
        Arc::new(InMemoryHistoryStore::new()),
    ));
    let request = GenerateRequest::new("app", "user-1", "hi", model_config(&server));

    let events = runner.run(request, CancellationToken::new()).collect().await;
    assert_eq!(events.len(), 1);
    assert!(matches!(
        &events[0],
        QueueEvent::Error { error: GenerationError::AuthenticationFailed(body) } if body == "invalid api key"
    ));
}

#[tokio::test]
async fn cancelling_a_slow_upstream_ends_with_stop_and_error() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(POST).path("/v1/chat/completions");
            then.status(200)
                .delay(Duration::from_secs(30))
                .body(SSE_BODY);
        })
        .await;

    let runner = Arc::new(GenerationRunner::new(
        registry(),
        Arc::new(InMemoryHistoryStore::new()),
    ));
    let cancel = CancellationToken::new();
    let rx = runner.run(
        GenerateRequest::new("app", "user-1", "hi", model_config(&server)),
        cancel.clone(),
    );

    tokio::time::sleep(Duration::from_millis(100)).await;
    cancel.cancel();

    let events = tokio::time::timeout(Duration::from_secs(5), rx.collect())
        .await
        .expect("generation should end promptly after cancel");
    assert!(matches!(
        events.as_slice(),
        [QueueEvent::Stop, QueueEvent::Error { error: GenerationError::Cancelled }]
    ));
}

#[tokio::test]
async fn non_stream_generation_returns_one_result() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/v1/chat/completions")
                .json_body_partial(r#"{"stream": false}"#);
            then.status(200).json_body(serde_json::json!({
                "id": "chatcmpl-9",
                "choices": [{"message": {"role": "assistant", "content": "Hi there"}, "finish_reason": "stop"}],
                "usage": {"prompt_tokens": "12", "completion_tokens": 3.0}
            }));
        })
        .await;

    let runner = GenerationRunner::new(registry(), Arc::new(InMemoryHistoryStore::new()));
    let request = GenerateRequest::new("app", "user-1", "hi", model_config(&server)).non_streaming();

    let result = runner
        .run_non_stream(request, CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(result.answer(), "Hi there");
    assert_eq!(result.usage.prompt_tokens, 12);
    assert_eq!(result.usage.completion_tokens, 3);
}
