//! Token-bounded conversation memory.

use std::sync::Arc;

use convogen_core::{HistoryStore, PromptMessage, Role, TokenEstimator};
use tracing::{debug, warn};

/// A sliding window over a conversation's stored turns.
///
/// Turns are walked newest first and admitted whole while they fit the
/// token budget; the window is returned in chronological order.
pub struct TokenBufferMemory {
    store: Arc<dyn HistoryStore>,
    conversation_id: String,
    estimator: Arc<dyn TokenEstimator>,
}

impl TokenBufferMemory {
    pub fn new(
        store: Arc<dyn HistoryStore>,
        conversation_id: impl Into<String>,
        estimator: Arc<dyn TokenEstimator>,
    ) -> Self {
        Self {
            store,
            conversation_id: conversation_id.into(),
            estimator,
        }
    }

    pub fn conversation_id(&self) -> &str {
        &self.conversation_id
    }

    pub fn estimator(&self) -> &dyn TokenEstimator {
        self.estimator.as_ref()
    }

    /// Prior turns as `[user, assistant, ...]` messages within budget.
    ///
    /// A store failure degrades to an empty window.
    pub async fn history_prompt_messages(
        &self,
        max_token_limit: usize,
        message_limit: usize,
    ) -> Vec<PromptMessage> {
        if max_token_limit == 0 || message_limit == 0 {
            return Vec::new();
        }

        let turns = match self
            .store
            .recent_turns(&self.conversation_id, message_limit)
            .await
        {
            Ok(turns) => turns,
            Err(e) => {
                warn!(conversation = %self.conversation_id, "History lookup failed: {e}");
                return Vec::new();
            }
        };

        let mut window: Vec<[PromptMessage; 2]> = Vec::new();
        let mut used = 0usize;
        for turn in &turns {
            let pair = turn.to_messages();
            let cost = self.estimator.count_messages(&pair);
            if used + cost > max_token_limit {
                break;
            }
            used += cost;
            window.push(pair);
        }

        debug!(
            conversation = %self.conversation_id,
            turns = window.len(),
            available = turns.len(),
            tokens = used,
            budget = max_token_limit,
            "Built memory window"
        );

        window.into_iter().rev().flatten().collect()
    }

    /// The same window rendered as prefixed lines, for the histories prompt.
    pub async fn history_text(
        &self,
        human_prefix: &str,
        ai_prefix: &str,
        max_token_limit: usize,
        message_limit: usize,
    ) -> String {
        self.history_prompt_messages(max_token_limit, message_limit)
            .await
            .iter()
            .map(|m| {
                let prefix = match m.role {
                    Role::User => human_prefix,
                    Role::Assistant => ai_prefix,
                    Role::System => "System",
                };
                format!("{prefix}: {}", m.text())
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}
