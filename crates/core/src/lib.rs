//! # Convogen Core
//!
//! Domain types, traits, and error definitions for the convogen generation
//! pipeline. Everything else in the workspace depends inward on this crate.
//!
//! Every external boundary (model backends, history and annotation stores,
//! tokenizers) is a trait here; implementations live in their own crates.

pub mod annotation;
pub mod credentials;
pub mod error;
pub mod event;
pub mod history;
pub mod message;
pub mod provider;
pub mod result;
pub mod token;

// Re-export key types at crate root for ergonomics
pub use annotation::{AnnotationHit, AnnotationRecord, AnnotationStore};
pub use credentials::{CompletionMode, Credentials, CredentialsBuilder, DEFAULT_STREAM_DELIMITER};
pub use error::{CredentialsError, Error, GenerationError, Result, StoreError};
pub use event::{EventQueue, EventReceiver, QueueEvent, ResultSink};
pub use history::{ConversationTurn, HistoryStore};
pub use message::{ContentPart, ImageUrl, PromptContent, PromptMessage, Role};
pub use provider::{InvokeRequest, LargeLanguageModel};
pub use result::{ChunkDelta, LlmResult, LlmResultChunk, LlmUsage};
pub use token::{CharTokenEstimator, TokenEstimator};
