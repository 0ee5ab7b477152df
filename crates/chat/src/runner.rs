//! The generation runner: orchestrates one request end to end.

use std::sync::Arc;
use std::time::Duration;

use convogen_config::{AppConfig, MemoryConfig};
use convogen_core::{
    AnnotationStore, ChunkDelta, EventQueue, EventReceiver, GenerationError, HistoryStore, InvokeRequest,
    LargeLanguageModel, LlmResult, LlmResultChunk, LlmUsage, PromptMessage, QueueEvent, ResultSink,
};
use convogen_providers::ModelRegistry;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::annotation::{AnnotationMatch, AnnotationMatcher};
use crate::memory::TokenBufferMemory;
use crate::prompt::{AssembledPrompt, AssemblyInput, PromptAssembler};
use crate::request::GenerateRequest;

/// Default pause between characters of a replayed annotation.
pub const DEFAULT_CHAR_DELAY: Duration = Duration::from_millis(10);

/// Drives generations: annotation short-circuit or prompt + model call.
pub struct GenerationRunner {
    /// Model backends by provider name
    registry: Arc<ModelRegistry>,

    /// Externally owned conversation history
    history: Arc<dyn HistoryStore>,

    /// Recorded-answer lookup; `None` disables the short-circuit
    annotations: Option<AnnotationMatcher>,

    assembler: PromptAssembler,

    /// App instructions, may contain `{{variable}}` placeholders
    pre_prompt: String,

    memory: MemoryConfig,

    /// Pacing of replayed annotation answers
    char_delay: Duration,
}

impl GenerationRunner {
    pub fn new(registry: Arc<ModelRegistry>, history: Arc<dyn HistoryStore>) -> Self {
        Self {
            registry,
            history,
            annotations: None,
            assembler: PromptAssembler::new(),
            pre_prompt: String::new(),
            memory: MemoryConfig::default(),
            char_delay: DEFAULT_CHAR_DELAY,
        }
    }

    /// Build a runner from application config.
    pub fn from_config(
        config: &AppConfig,
        registry: Arc<ModelRegistry>,
        history: Arc<dyn HistoryStore>,
        annotations: Arc<dyn AnnotationStore>,
    ) -> Self {
        let mut runner = Self::new(registry, history)
            .with_pre_prompt(config.prompt.pre_prompt.clone())
            .with_memory(config.memory.clone())
            .with_char_delay(Duration::from_millis(config.generation.annotation_char_delay_ms));
        if config.annotation.enabled {
            runner = runner.with_annotations(AnnotationMatcher::new(
                annotations,
                config.annotation.score_threshold,
            ));
        }
        runner
    }

    pub fn with_annotations(mut self, matcher: AnnotationMatcher) -> Self {
        self.annotations = Some(matcher);
        self
    }

    pub fn with_pre_prompt(mut self, pre_prompt: impl Into<String>) -> Self {
        self.pre_prompt = pre_prompt.into();
        self
    }

    pub fn with_memory(mut self, memory: MemoryConfig) -> Self {
        self.memory = memory;
        self
    }

    pub fn with_char_delay(mut self, delay: Duration) -> Self {
        self.char_delay = delay;
        self
    }

    /// Start a streamed generation on its own task.
    ///
    /// The returned receiver yields the events in order and ends after the
    /// single terminal event.
    pub fn run(self: &Arc<Self>, request: GenerateRequest, cancel: CancellationToken) -> EventReceiver {
        let (queue, rx) = EventQueue::shared();
        let runner = Arc::clone(self);
        tokio::spawn(async move {
            runner.generate(request, queue, cancel).await;
        });
        rx
    }

    /// Drive one generation into `queue`.
    ///
    /// A non-streaming request yields a single `MessageEnd` or `Error`
    /// instead of chunks.
    pub async fn generate(&self, request: GenerateRequest, queue: Arc<EventQueue>, cancel: CancellationToken) {
        info!(
            app_id = %request.app_id,
            provider = %request.model_config.provider,
            model = %request.model_config.model,
            "Starting generation"
        );

        let model = match self.registry.get(&request.model_config.provider) {
            Ok(model) => model,
            Err(e) => {
                queue.push_err(e);
                return;
            }
        };

        let prompt = self.prepare(&request, model.as_ref()).await;

        if cancel.is_cancelled() {
            stop_cancelled(&queue);
            return;
        }

        if let Some(found) = self.match_annotation(&request).await {
            queue.push(QueueEvent::AnnotationReply {
                message_annotation_id: found.record.id.clone(),
            });
            if request.stream {
                self.replay(&request, prompt, &found.record.content, &queue, &cancel)
                    .await;
            } else {
                queue.final_manual(QueueEvent::MessageEnd {
                    llm_result: annotation_result(&request, prompt, &found.record.content),
                });
            }
            return;
        }

        if !request.stream {
            let invoke = self.invoke_request(&request, prompt);
            match model.invoke_non_stream(invoke, cancel.clone()).await {
                Ok(llm_result) => queue.final_manual(QueueEvent::MessageEnd { llm_result }),
                Err(GenerationError::Cancelled) => stop_cancelled(&queue),
                Err(e) => {
                    warn!(provider = %model.name(), error = %e, "Generation failed");
                    queue.push_err(e);
                }
            }
            return;
        }

        let sink = ResultSink::new(Arc::clone(&queue));
        model
            .invoke(self.invoke_request(&request, prompt), sink, cancel.clone())
            .await;

        if queue.is_closed() {
            return;
        }
        if cancel.is_cancelled() {
            stop_cancelled(&queue);
        } else {
            warn!(provider = %model.name(), "Model returned without a terminal event");
            queue.push_err(GenerationError::Provider(
                "model ended the stream without a result".into(),
            ));
        }
    }

    /// Run a generation and return its single result.
    pub async fn run_non_stream(
        &self,
        request: GenerateRequest,
        cancel: CancellationToken,
    ) -> Result<LlmResult, GenerationError> {
        let model = self.registry.get(&request.model_config.provider)?;
        let prompt = self.prepare(&request, model.as_ref()).await;

        if let Some(found) = self.match_annotation(&request).await {
            return Ok(annotation_result(&request, prompt, &found.record.content));
        }

        model
            .invoke_non_stream(self.invoke_request(&request, prompt), cancel)
            .await
    }

    async fn match_annotation(&self, request: &GenerateRequest) -> Option<AnnotationMatch> {
        if request.query.is_empty() {
            return None;
        }
        self.annotations
            .as_ref()?
            .find(&request.app_id, &request.query, &request.user_id)
            .await
    }

    /// Assemble messages, including the memory window when one applies.
    async fn prepare(&self, request: &GenerateRequest, model: &dyn LargeLanguageModel) -> AssembledPrompt {
        let memory = self.memory_for(request, model);
        self.assembler
            .assemble(AssemblyInput {
                app_mode: request.app_mode,
                model_config: &request.model_config,
                pre_prompt: &self.pre_prompt,
                inputs: &request.inputs,
                query: &request.query,
                context: None,
                memory: memory.as_ref(),
                memory_token_limit: self.memory.max_token_limit,
                memory_message_limit: self.memory.message_limit,
            })
            .await
    }

    fn memory_for(&self, request: &GenerateRequest, model: &dyn LargeLanguageModel) -> Option<TokenBufferMemory> {
        if !self.memory.enabled {
            return None;
        }
        let conversation_id = request.conversation_id.as_deref()?;
        match model.token_estimator() {
            Some(estimator) => Some(TokenBufferMemory::new(
                Arc::clone(&self.history),
                conversation_id,
                estimator,
            )),
            None => {
                warn!(
                    provider = %model.name(),
                    "No token estimator for model; skipping conversation memory"
                );
                None
            }
        }
    }

    fn invoke_request(&self, request: &GenerateRequest, prompt: AssembledPrompt) -> InvokeRequest {
        let config = &request.model_config;
        let mut invoke = InvokeRequest::new(config.model.clone(), config.credentials.clone(), prompt.messages)
            .with_stop(prompt.stop);
        invoke.parameters = config.parameters.clone();
        if !request.user_id.is_empty() {
            invoke = invoke.with_user(request.user_id.clone());
        }
        invoke
    }

    /// Stream a recorded answer one character at a time, then end normally
    /// with zero usage.
    async fn replay(
        &self,
        request: &GenerateRequest,
        prompt: AssembledPrompt,
        content: &str,
        queue: &EventQueue,
        cancel: &CancellationToken,
    ) {
        let prompt_messages: Arc<[PromptMessage]> = Arc::from(prompt.messages);
        for (index, ch) in content.chars().enumerate() {
            queue.push(QueueEvent::LlmChunk {
                chunk: LlmResultChunk {
                    id: String::new(),
                    model: request.model_config.model.clone(),
                    prompt_messages: Arc::clone(&prompt_messages),
                    delta: ChunkDelta {
                        index,
                        message: PromptMessage::assistant(ch.to_string()),
                        finish_reason: None,
                        usage: None,
                    },
                },
            });

            tokio::select! {
                _ = cancel.cancelled() => {
                    stop_cancelled(queue);
                    return;
                }
                _ = tokio::time::sleep(self.char_delay) => {}
            }
        }

        debug!(chars = content.chars().count(), "Annotation replay finished");
        queue.final_manual(QueueEvent::MessageEnd {
            llm_result: LlmResult {
                id: String::new(),
                model: request.model_config.model.clone(),
                prompt_messages,
                message: PromptMessage::assistant(content),
                usage: LlmUsage::empty(),
                finish_reason: None,
            },
        });
    }
}

fn stop_cancelled(queue: &EventQueue) {
    debug!("Generation cancelled");
    queue.push(QueueEvent::Stop);
    queue.push_err(GenerationError::Cancelled);
}

fn annotation_result(request: &GenerateRequest, prompt: AssembledPrompt, content: &str) -> LlmResult {
    LlmResult {
        id: String::new(),
        model: request.model_config.model.clone(),
        prompt_messages: Arc::from(prompt.messages),
        message: PromptMessage::assistant(content),
        usage: LlmUsage::empty(),
        finish_reason: None,
    }
}
