//! History store boundary: the externally owned record of past turns.
//!
//! The pipeline only reads from it. Writing new turns after a generation
//! is the caller's job.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::StoreError;
use crate::message::PromptMessage;

/// One completed exchange in a conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationTurn {
    /// The message ID of this turn
    pub id: String,

    /// What the user asked
    pub query: String,

    /// What the assistant answered
    pub answer: String,

    pub created_at: DateTime<Utc>,
}

impl ConversationTurn {
    pub fn new(query: impl Into<String>, answer: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            query: query.into(),
            answer: answer.into(),
            created_at: Utc::now(),
        }
    }

    /// The turn as a `[user, assistant]` message pair.
    pub fn to_messages(&self) -> [PromptMessage; 2] {
        [
            PromptMessage::user(self.query.as_str()),
            PromptMessage::assistant(self.answer.as_str()),
        ]
    }
}

/// Read access to stored conversation turns.
#[async_trait]
pub trait HistoryStore: Send + Sync {
    /// Up to `limit` turns of a conversation, newest first.
    async fn recent_turns(
        &self,
        conversation_id: &str,
        limit: usize,
    ) -> Result<Vec<ConversationTurn>, StoreError>;
}
