//! In-memory stores: useful for testing and single-process sessions.

use async_trait::async_trait;
use convogen_core::error::StoreError;
use convogen_core::{AnnotationHit, AnnotationRecord, AnnotationStore, ConversationTurn, HistoryStore};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

/// Conversation turns kept in a map, oldest first per conversation.
#[derive(Clone, Default)]
pub struct InMemoryHistoryStore {
    conversations: Arc<RwLock<HashMap<String, Vec<ConversationTurn>>>>,
}

impl InMemoryHistoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a finished turn.
    pub async fn append(&self, conversation_id: &str, turn: ConversationTurn) {
        self.conversations
            .write()
            .await
            .entry(conversation_id.to_string())
            .or_default()
            .push(turn);
    }

    pub async fn turn_count(&self, conversation_id: &str) -> usize {
        self.conversations
            .read()
            .await
            .get(conversation_id)
            .map_or(0, Vec::len)
    }

    pub async fn clear(&self, conversation_id: &str) {
        self.conversations.write().await.remove(conversation_id);
    }
}

#[async_trait]
impl HistoryStore for InMemoryHistoryStore {
    async fn recent_turns(
        &self,
        conversation_id: &str,
        limit: usize,
    ) -> Result<Vec<ConversationTurn>, StoreError> {
        let conversations = self.conversations.read().await;
        Ok(conversations
            .get(conversation_id)
            .map(|turns| turns.iter().rev().take(limit).cloned().collect())
            .unwrap_or_default())
    }
}

/// Annotations and their hit history kept in vectors.
#[derive(Clone, Default)]
pub struct InMemoryAnnotationStore {
    records: Arc<RwLock<Vec<AnnotationRecord>>>,
    hits: Arc<RwLock<Vec<AnnotationHit>>>,
}

impl InMemoryAnnotationStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an annotation. An empty ID is replaced with a fresh one.
    pub async fn insert(&self, mut record: AnnotationRecord) -> String {
        if record.id.is_empty() {
            record.id = Uuid::new_v4().to_string();
        }
        let id = record.id.clone();
        self.records.write().await.push(record);
        id
    }

    /// Every recorded hit, in the order served.
    pub async fn hits(&self) -> Vec<AnnotationHit> {
        self.hits.read().await.clone()
    }

    pub async fn hit_count(&self, annotation_id: &str) -> usize {
        self.hits
            .read()
            .await
            .iter()
            .filter(|h| h.annotation_id == annotation_id)
            .count()
    }
}

#[async_trait]
impl AnnotationStore for InMemoryAnnotationStore {
    async fn candidates(&self, app_id: &str) -> Result<Vec<AnnotationRecord>, StoreError> {
        Ok(self
            .records
            .read()
            .await
            .iter()
            .filter(|r| r.app_id == app_id)
            .cloned()
            .collect())
    }

    async fn record_hit(&self, hit: AnnotationHit) -> Result<(), StoreError> {
        if !self.records.read().await.iter().any(|r| r.id == hit.annotation_id) {
            return Err(StoreError::NotFound(hit.annotation_id));
        }
        self.hits.write().await.push(hit);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[tokio::test]
    async fn recent_turns_are_newest_first_and_limited() {
        let store = InMemoryHistoryStore::new();
        for i in 0..5 {
            store
                .append("c1", ConversationTurn::new(format!("q{i}"), format!("a{i}")))
                .await;
        }

        let turns = store.recent_turns("c1", 3).await.unwrap();
        let queries: Vec<_> = turns.iter().map(|t| t.query.as_str()).collect();
        assert_eq!(queries, vec!["q4", "q3", "q2"]);
        assert_eq!(store.turn_count("c1").await, 5);
    }

    #[tokio::test]
    async fn unknown_conversation_is_empty() {
        let store = InMemoryHistoryStore::new();
        assert!(store.recent_turns("missing", 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn clear_removes_conversation() {
        let store = InMemoryHistoryStore::new();
        store.append("c1", ConversationTurn::new("q", "a")).await;
        store.clear("c1").await;
        assert_eq!(store.turn_count("c1").await, 0);
    }

    fn record(app: &str, question: &str) -> AnnotationRecord {
        AnnotationRecord {
            id: String::new(),
            app_id: app.into(),
            question: question.into(),
            content: "answer".into(),
        }
    }

    #[tokio::test]
    async fn candidates_are_scoped_by_app() {
        let store = InMemoryAnnotationStore::new();
        store.insert(record("app-a", "hours?")).await;
        store.insert(record("app-b", "prices?")).await;

        let found = store.candidates("app-a").await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].question, "hours?");
        assert!(!found[0].id.is_empty());
    }

    #[tokio::test]
    async fn hits_are_recorded_for_known_annotations() {
        let store = InMemoryAnnotationStore::new();
        let id = store.insert(record("app", "hours?")).await;

        let hit = AnnotationHit {
            annotation_id: id.clone(),
            app_id: "app".into(),
            query: "hours?".into(),
            user_id: "u1".into(),
            score: 1.0,
            created_at: Utc::now(),
        };
        store.record_hit(hit.clone()).await.unwrap();
        assert_eq!(store.hit_count(&id).await, 1);

        let unknown = AnnotationHit {
            annotation_id: "nope".into(),
            ..hit
        };
        assert!(matches!(
            store.record_hit(unknown).await,
            Err(StoreError::NotFound(_))
        ));
        assert_eq!(store.hits().await.len(), 1);
    }
}
