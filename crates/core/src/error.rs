//! Error types for the convogen domain.
//!
//! Uses `thiserror` for ergonomic error definitions.
//! Each bounded context has its own error enum; the top-level [`Error`]
//! wraps them for callers that cross context boundaries.

use serde::Serialize;
use thiserror::Error;

/// The top-level error type for all convogen operations.
#[derive(Debug, Error)]
pub enum Error {
    // --- Generation pipeline ---
    #[error("Generation error: {0}")]
    Generation(#[from] GenerationError),

    // --- External stores (history, annotations) ---
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    // --- Credentials ---
    #[error("Credentials error: {0}")]
    Credentials(#[from] CredentialsError),

    // --- Configuration errors ---
    #[error("Configuration error: {message}")]
    Config { message: String },

    // --- Serialization ---
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type alias using our Error.
pub type Result<T> = std::result::Result<T, Error>;

/// Everything that can end a generation early.
///
/// Every variant is delivered to the consumer as exactly one
/// `QueueEvent::Error`, so the type is `Clone` and `Serialize`.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum GenerationError {
    #[error("Model configuration error: {0}")]
    Config(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Upstream returned status {status_code}: {message}")]
    Upstream { status_code: u16, message: String },

    #[error("Rate limited by provider, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Frame could not be decoded: {0}")]
    Decode(String),

    #[error("Provider reported an error: {0}")]
    Provider(String),

    #[error("Usage accounting failed: {0}")]
    Accounting(String),

    #[error("Prompt assembly failed: {0}")]
    Prompt(String),

    #[error("No model registered for provider '{0}'")]
    ModelNotRegistered(String),

    #[error("Generation cancelled")]
    Cancelled,
}

impl GenerationError {
    /// Stable machine-readable code, used by consumers rendering error frames.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Config(_) => "config_error",
            Self::Transport(_) => "transport_error",
            Self::Upstream { .. } => "upstream_error",
            Self::RateLimited { .. } => "rate_limited",
            Self::AuthenticationFailed(_) => "authentication_failed",
            Self::Decode(_) => "decode_error",
            Self::Provider(_) => "provider_error",
            Self::Accounting(_) => "accounting_error",
            Self::Prompt(_) => "prompt_error",
            Self::ModelNotRegistered(_) => "model_not_registered",
            Self::Cancelled => "cancelled",
        }
    }
}

/// Failures of the externally owned history and annotation stores.
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("Record not found: {0}")]
    NotFound(String),

    #[error("Stored record is corrupt: {0}")]
    Corrupt(String),
}

/// Rejections raised while constructing [`crate::Credentials`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CredentialsError {
    #[error("Stream delimiter must not be empty")]
    EmptyDelimiter,

    #[error("Unknown completion mode: {0}")]
    UnknownMode(String),

    #[error("Invalid header {name}: {reason}")]
    InvalidHeader { name: String, reason: String },
}
