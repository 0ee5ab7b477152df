//! Generation events and the queue that carries them to the consumer.
//!
//! The generation path is the single producer. Every subscriber gets its
//! own unbounded channel, so a push never waits on a slow consumer and
//! each consumer drains the events in push order.

use std::sync::{Arc, Mutex, MutexGuard};

use serde::Serialize;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::{debug, trace};

use crate::error::GenerationError;
use crate::result::{LlmResult, LlmResultChunk};

/// Events emitted by a generation, in the order the consumer sees them.
///
/// A generation ends with exactly one `MessageEnd` or `Error`.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum QueueEvent {
    /// Partial assistant content from the model (or the annotation replay).
    LlmChunk { chunk: LlmResultChunk },

    /// Free text not tied to a model chunk.
    TextChunk { text: String },

    /// Successful end of the generation.
    MessageEnd { llm_result: LlmResult },

    /// The answer comes from a recorded annotation, not the model.
    AnnotationReply { message_annotation_id: String },

    /// Failed end of the generation.
    Error { error: GenerationError },

    /// Keep-alive for idle consumers.
    Ping,

    /// The generation was stopped on request.
    Stop,
}

impl QueueEvent {
    /// Event name for this event type.
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::LlmChunk { .. } => "llm_chunk",
            Self::TextChunk { .. } => "text_chunk",
            Self::MessageEnd { .. } => "message_end",
            Self::AnnotationReply { .. } => "annotation_reply",
            Self::Error { .. } => "error",
            Self::Ping => "ping",
            Self::Stop => "stop",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::MessageEnd { .. } | Self::Error { .. })
    }
}

struct QueueState {
    subscribers: Vec<mpsc::UnboundedSender<QueueEvent>>,
    closed: bool,
}

/// Ordered, thread-safe event queue between one producer and its consumers.
pub struct EventQueue {
    state: Mutex<QueueState>,
}

impl EventQueue {
    /// Create a queue together with its first consumer.
    pub fn new() -> (Self, EventReceiver) {
        let (tx, rx) = mpsc::unbounded_channel();
        let queue = Self {
            state: Mutex::new(QueueState {
                subscribers: vec![tx],
                closed: false,
            }),
        };
        (queue, EventReceiver { rx })
    }

    /// Convenience for the common case of sharing the queue with a task.
    pub fn shared() -> (Arc<Self>, EventReceiver) {
        let (queue, rx) = Self::new();
        (Arc::new(queue), rx)
    }

    /// Attach another independent consumer.
    ///
    /// It receives every event pushed from now on. Subscribing to a closed
    /// queue yields a receiver that ends immediately.
    pub fn subscribe(&self) -> EventReceiver {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut state = self.state();
        if !state.closed {
            state.subscribers.push(tx);
        }
        EventReceiver { rx }
    }

    /// Append an event. Returns `false` if the queue is already closed.
    pub fn push(&self, event: QueueEvent) -> bool {
        let mut state = self.state();
        if state.closed {
            debug!(event = event.event_type(), "Dropping event pushed after close");
            return false;
        }
        trace!(event = event.event_type(), "Queue push");
        // Consumers that hung up are forgotten; the producer keeps going.
        state
            .subscribers
            .retain(|tx| tx.send(event.clone()).is_ok());
        true
    }

    /// Push an `Error` event and close the queue.
    pub fn push_err(&self, error: GenerationError) {
        debug!(code = error.code(), error = %error, "Queue error");
        self.final_manual(QueueEvent::Error { error });
    }

    /// Push a terminal event and close the queue.
    pub fn final_manual(&self, event: QueueEvent) {
        if self.push(event) {
            self.close();
        }
    }

    /// Push a keep-alive.
    pub fn ping(&self) -> bool {
        self.push(QueueEvent::Ping)
    }

    /// Push a text chunk.
    pub fn push_text(&self, text: impl Into<String>) -> bool {
        self.push(QueueEvent::TextChunk { text: text.into() })
    }

    /// Close the queue. Calling it again is a no-op.
    pub fn close(&self) {
        let mut state = self.state();
        if state.closed {
            return;
        }
        state.closed = true;
        // Dropping the senders lets receivers finish after draining.
        state.subscribers.clear();
    }

    pub fn is_closed(&self) -> bool {
        self.state().closed
    }

    fn state(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// The consumer end of an [`EventQueue`].
pub struct EventReceiver {
    rx: mpsc::UnboundedReceiver<QueueEvent>,
}

impl EventReceiver {
    /// Wait for the next event. `None` once the queue is closed and drained.
    pub async fn recv(&mut self) -> Option<QueueEvent> {
        self.rx.recv().await
    }

    /// Drain everything until the queue closes.
    pub async fn collect(mut self) -> Vec<QueueEvent> {
        let mut events = Vec::new();
        while let Some(event) = self.rx.recv().await {
            events.push(event);
        }
        events
    }

    /// Consume the receiver as a `Stream`.
    pub fn into_stream(self) -> UnboundedReceiverStream<QueueEvent> {
        UnboundedReceiverStream::new(self.rx)
    }
}

/// The narrow capability a model implementation writes its results through.
///
/// Holds the queue by reference-counted handle; model implementations
/// never see the queue's other operations.
#[derive(Clone)]
pub struct ResultSink {
    queue: Arc<EventQueue>,
}

impl ResultSink {
    pub fn new(queue: Arc<EventQueue>) -> Self {
        Self { queue }
    }

    /// Forward one content chunk.
    pub fn chunk(&self, chunk: LlmResultChunk) -> bool {
        self.queue.push(QueueEvent::LlmChunk { chunk })
    }

    /// Fold the terminal chunk into `MessageEnd` and close the queue.
    pub fn finish(&self, chunk: LlmResultChunk) {
        self.queue.final_manual(QueueEvent::MessageEnd {
            llm_result: LlmResult::from_terminal_chunk(chunk),
        });
    }

    /// Report the generation as failed and close the queue.
    pub fn fail(&self, error: GenerationError) {
        self.queue.push_err(error);
    }

    pub fn is_closed(&self) -> bool {
        self.queue.is_closed()
    }
}
