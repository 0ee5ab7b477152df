//! Annotation store boundary.
//!
//! Annotations are curated question/answer pairs scoped to an app. When a
//! query matches one, the recorded answer is replayed instead of calling
//! the model.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::StoreError;

/// A recorded answer. Read-only to the pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnnotationRecord {
    pub id: String,
    pub app_id: String,
    /// The question this answer is associated with
    pub question: String,
    pub content: String,
}

/// A served annotation, kept for hit statistics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnnotationHit {
    pub annotation_id: String,
    pub app_id: String,
    pub query: String,
    pub user_id: String,
    pub score: f32,
    pub created_at: DateTime<Utc>,
}

#[async_trait]
pub trait AnnotationStore: Send + Sync {
    /// All annotations recorded for an app.
    async fn candidates(&self, app_id: &str) -> Result<Vec<AnnotationRecord>, StoreError>;

    /// Remember that an annotation answered a query.
    async fn record_hit(&self, hit: AnnotationHit) -> Result<(), StoreError>;
}
