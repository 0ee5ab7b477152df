//! Model output types: incremental chunks, the aggregated result, usage.

use std::sync::Arc;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::message::PromptMessage;

/// Token usage and cost of one generation.
///
/// Monetary fields are fixed-point decimals; they are never produced by
/// binary floating point arithmetic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LlmUsage {
    pub prompt_tokens: u64,
    pub prompt_unit_price: Decimal,
    pub prompt_price_unit: Decimal,
    pub prompt_price: Decimal,
    pub completion_tokens: u64,
    pub completion_unit_price: Decimal,
    pub completion_price_unit: Decimal,
    pub completion_price: Decimal,
    pub total_tokens: u64,
    pub total_price: Decimal,
    pub currency: String,
    /// Seconds. A fixed placeholder for streamed generations.
    pub latency: f64,
}

impl LlmUsage {
    /// Zeroed usage, used when no model was invoked (annotation replies).
    pub fn empty() -> Self {
        Self {
            prompt_tokens: 0,
            prompt_unit_price: Decimal::ZERO,
            prompt_price_unit: Decimal::ZERO,
            prompt_price: Decimal::ZERO,
            completion_tokens: 0,
            completion_unit_price: Decimal::ZERO,
            completion_price_unit: Decimal::ZERO,
            completion_price: Decimal::ZERO,
            total_tokens: 0,
            total_price: Decimal::ZERO,
            currency: "USD".into(),
            latency: 0.0,
        }
    }

    pub fn is_zero(&self) -> bool {
        self.total_tokens == 0 && self.total_price.is_zero()
    }
}

/// The incremental part of a chunk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkDelta {
    /// Starts at 0 and grows by exactly 1 per emitted chunk.
    pub index: usize,
    /// Partial assistant content (full content on the terminal chunk).
    pub message: PromptMessage,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<LlmUsage>,
}

/// One incremental unit of a streamed model response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LlmResultChunk {
    pub id: String,
    pub model: String,
    pub prompt_messages: Arc<[PromptMessage]>,
    pub delta: ChunkDelta,
}

impl LlmResultChunk {
    /// A chunk with a finish reason and usage ends the stream.
    pub fn is_terminal(&self) -> bool {
        self.delta.finish_reason.is_some() && self.delta.usage.is_some()
    }
}

/// The aggregated outcome of a generation. Produced exactly once.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LlmResult {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub id: String,
    pub model: String,
    pub prompt_messages: Arc<[PromptMessage]>,
    pub message: PromptMessage,
    pub usage: LlmUsage,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<String>,
}

impl LlmResult {
    /// Fold a terminal chunk into the final result.
    pub fn from_terminal_chunk(chunk: LlmResultChunk) -> Self {
        Self {
            id: chunk.id,
            model: chunk.model,
            prompt_messages: chunk.prompt_messages,
            message: chunk.delta.message,
            usage: chunk.delta.usage.unwrap_or_else(LlmUsage::empty),
            finish_reason: chunk.delta.finish_reason,
        }
    }

    /// The assistant's full answer text.
    pub fn answer(&self) -> String {
        self.message.text()
    }
}
