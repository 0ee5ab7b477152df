//! Token estimation.
//!
//! Memory windows and prompt budgets need a token count before the model
//! is called. Models that ship a real tokenizer provide their own
//! [`TokenEstimator`]; the rest use the character heuristic below.

use crate::message::PromptMessage;

/// Per-message overhead for role name and wire-format delimiters.
pub const MESSAGE_OVERHEAD_TOKENS: usize = 4;

/// Counts tokens for budget decisions.
pub trait TokenEstimator: Send + Sync {
    fn count_text(&self, text: &str) -> usize;

    fn count_message(&self, message: &PromptMessage) -> usize {
        MESSAGE_OVERHEAD_TOKENS + self.count_text(&message.text())
    }

    fn count_messages(&self, messages: &[PromptMessage]) -> usize {
        messages.iter().map(|m| self.count_message(m)).sum()
    }
}

/// Heuristic estimator: 1 token ≈ 4 characters, rounded up.
#[derive(Debug, Clone, Copy, Default)]
pub struct CharTokenEstimator;

impl TokenEstimator for CharTokenEstimator {
    fn count_text(&self, text: &str) -> usize {
        estimate_tokens(text)
    }
}

/// Estimate the token count for a string.
pub fn estimate_tokens(text: &str) -> usize {
    text.len().div_ceil(4)
}
