use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Append-only retrieval record. Once written, never mutated; superseded
/// records are outranked rather than edited, until the eviction sweep
/// prunes them by age or low importance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryRecord {
    pub id: Uuid,
    pub embedding: Vec<f32>,
    pub text: String,
    pub asset_id: Option<String>,
    pub importance: f32,
    pub created_at: DateTime<Utc>,
}

impl MemoryRecord {
    pub fn new(
        text: impl Into<String>,
        embedding: Vec<f32>,
        asset_id: Option<String>,
        importance: f32,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            embedding,
            text: text.into(),
            asset_id,
            importance: importance.clamp(0.0, 1.0),
            created_at: Utc::now(),
        }
    }
}
