//! Annotation matching: short-circuit recorded answers.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;
use convogen_core::{AnnotationHit, AnnotationRecord, AnnotationStore};
use tracing::{debug, info, warn};

/// Default minimum similarity for a recorded answer to be served.
pub const DEFAULT_SCORE_THRESHOLD: f32 = 0.9;

/// A recorded answer selected for a query.
#[derive(Debug, Clone, PartialEq)]
pub struct AnnotationMatch {
    pub record: AnnotationRecord,
    pub score: f32,
}

/// Looks up recorded answers for an app's queries.
pub struct AnnotationMatcher {
    store: Arc<dyn AnnotationStore>,
    score_threshold: f32,
}

impl AnnotationMatcher {
    pub fn new(store: Arc<dyn AnnotationStore>, score_threshold: f32) -> Self {
        Self {
            store,
            score_threshold,
        }
    }

    pub fn score_threshold(&self) -> f32 {
        self.score_threshold
    }

    /// The best candidate at or above the threshold, if any.
    ///
    /// Store failures are logged and treated as no match. The hit is
    /// recorded best-effort.
    pub async fn find(&self, app_id: &str, query: &str, user_id: &str) -> Option<AnnotationMatch> {
        if query.trim().is_empty() {
            return None;
        }

        let candidates = match self.store.candidates(app_id).await {
            Ok(candidates) => candidates,
            Err(e) => {
                warn!(app_id, "Annotation lookup failed: {e}");
                return None;
            }
        };

        let best = candidates
            .into_iter()
            .map(|record| {
                let score = similarity(query, &record.question);
                AnnotationMatch { record, score }
            })
            .filter(|m| m.score >= self.score_threshold)
            .max_by(|a, b| a.score.total_cmp(&b.score));

        let Some(found) = best else {
            debug!(app_id, "No annotation matched");
            return None;
        };

        info!(
            app_id,
            annotation_id = %found.record.id,
            score = found.score,
            "Annotation matched"
        );

        let hit = AnnotationHit {
            annotation_id: found.record.id.clone(),
            app_id: app_id.to_string(),
            query: query.to_string(),
            user_id: user_id.to_string(),
            score: found.score,
            created_at: Utc::now(),
        };
        if let Err(e) = self.store.record_hit(hit).await {
            warn!(annotation_id = %found.record.id, "Failed to record annotation hit: {e}");
        }

        Some(found)
    }
}

/// Trim, lowercase, collapse whitespace runs.
pub fn normalize(text: &str) -> String {
    text.split_whitespace()
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Word-set Jaccard similarity of the normalized texts, 1.0 on exact match.
pub fn similarity(a: &str, b: &str) -> f32 {
    let (a, b) = (normalize(a), normalize(b));
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    if a == b {
        return 1.0;
    }
    let left: HashSet<&str> = a.split(' ').collect();
    let right: HashSet<&str> = b.split(' ').collect();
    let shared = left.intersection(&right).count();
    let total = left.union(&right).count();
    shared as f32 / total as f32
}
