//! Retrieval memory — append-only store with weighted ranking
//!
//! Records are appended and never edited in place, so readers see either
//! the old or the new state of the index, never a partial record. Ranking
//! combines cosine similarity, recency, and importance with configurable
//! weights; the scoring core is pure and testable without IO.
//!
//! Eviction is the only path that removes records: a background sweep
//! prunes by age, then by low importance once the store is over capacity.

use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use tokio::sync::broadcast;
use uuid::Uuid;

use foreman_core::config::MemoryConfig;
use foreman_core::embeddings::EmbeddingBackend;
use foreman_core::models::MemoryRecord;
use foreman_core::storage::KvStore;

/// A retrieved record with the combined score that ranked it.
#[derive(Debug, Clone)]
pub struct ScoredRecord {
    pub record: Arc<MemoryRecord>,
    pub score: f32,
}

/// Report from an eviction sweep
#[derive(Debug, Clone, Default)]
pub struct EvictionReport {
    pub scanned: usize,
    pub pruned_by_age: usize,
    pub pruned_by_importance: usize,
}

pub struct MemoryStore {
    records: RwLock<Vec<Arc<MemoryRecord>>>,
    config: MemoryConfig,
}

impl MemoryStore {
    pub fn new(config: MemoryConfig) -> Self {
        Self {
            records: RwLock::new(Vec::new()),
            config,
        }
    }

    pub fn len(&self) -> usize {
        self.records.read().map(|r| r.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Append one record. Records without an embedding never reach the
    /// store; the write path drops them upstream.
    pub fn insert(&self, record: MemoryRecord) {
        if let Ok(mut records) = self.records.write() {
            records.push(Arc::new(record));
        }
    }

    /// Top-`k` records by combined score, optionally restricted to one
    /// asset. `k = 0` and an empty store both return an empty list.
    pub fn retrieve(
        &self,
        query_embedding: &[f32],
        k: usize,
        asset_filter: Option<&str>,
    ) -> Vec<ScoredRecord> {
        if k == 0 {
            return Vec::new();
        }
        let k = k.min(self.config.max_top_k as usize);

        let snapshot: Vec<Arc<MemoryRecord>> = match self.records.read() {
            Ok(records) => records
                .iter()
                .filter(|r| match asset_filter {
                    Some(asset) => r.asset_id.as_deref() == Some(asset),
                    None => true,
                })
                .cloned()
                .collect(),
            Err(_) => return Vec::new(),
        };

        rank_records(&snapshot, query_embedding, Utc::now(), &self.config, k)
    }

    /// Prune by age, then by low importance while over capacity.
    pub fn evict(&self) -> EvictionReport {
        let mut report = EvictionReport::default();
        let now = Utc::now();
        let max_age = chrono::Duration::days(self.config.max_age_days);

        let Ok(mut records) = self.records.write() else {
            return report;
        };
        report.scanned = records.len();

        let before = records.len();
        records.retain(|r| now - r.created_at <= max_age);
        report.pruned_by_age = before - records.len();

        if records.len() > self.config.max_records {
            // Lowest importance goes first; ties resolved oldest-first.
            let mut candidates: Vec<(f32, DateTime<Utc>, Uuid)> = records
                .iter()
                .filter(|r| r.importance < self.config.importance_floor)
                .map(|r| (r.importance, r.created_at, r.id))
                .collect();
            candidates.sort_by(|a, b| {
                a.0.partial_cmp(&b.0)
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then(a.1.cmp(&b.1))
            });

            let excess = records.len() - self.config.max_records;
            let doomed: std::collections::HashSet<Uuid> =
                candidates.iter().take(excess).map(|c| c.2).collect();

            let before = records.len();
            records.retain(|r| !doomed.contains(&r.id));
            report.pruned_by_importance = before - records.len();
        }

        report
    }
}

/// Pure ranking core: combined score = similarity·w1 + recency·w2 +
/// importance·w3, sorted non-increasing, ties broken most-recent-first.
pub fn rank_records(
    records: &[Arc<MemoryRecord>],
    query_embedding: &[f32],
    now: DateTime<Utc>,
    config: &MemoryConfig,
    k: usize,
) -> Vec<ScoredRecord> {
    let mut scored: Vec<ScoredRecord> = records
        .iter()
        .map(|record| ScoredRecord {
            score: combined_score(record, query_embedding, now, config),
            record: Arc::clone(record),
        })
        .collect();

    scored.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(b.record.created_at.cmp(&a.record.created_at))
    });

    scored.truncate(k);
    scored
}

pub fn combined_score(
    record: &MemoryRecord,
    query_embedding: &[f32],
    now: DateTime<Utc>,
    config: &MemoryConfig,
) -> f32 {
    let similarity = cosine_similarity(&record.embedding, query_embedding);

    let age_hours = (now - record.created_at).num_seconds().max(0) as f32 / 3600.0;
    let recency = 0.5_f32.powf(age_hours / config.recency_half_life_hours.max(f32::EPSILON));

    config.weight_similarity * similarity
        + config.weight_recency * recency
        + config.weight_importance * record.importance
}

/// Cosine similarity in [0, 1] for non-negative use; mismatched dimensions
/// or zero vectors score 0.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    (dot / (norm_a * norm_b)).clamp(-1.0, 1.0)
}

/// Fire-and-forget write path: embed, build the record, append, snapshot.
/// Failures are logged and never reach the caller — memory enrichment is
/// best-effort, not required for the command's correctness.
pub fn spawn_memory_write(
    store: Arc<MemoryStore>,
    embedder: Option<Arc<dyn EmbeddingBackend>>,
    storage: Arc<dyn KvStore>,
    text: String,
    asset_id: Option<String>,
    importance: f32,
) {
    tokio::spawn(async move {
        let Some(embedder) = embedder else {
            tracing::debug!("No embedding backend configured — record not indexed");
            return;
        };

        match embedder.embed(&text).await {
            Ok(Some(embedding)) => {
                let record = MemoryRecord::new(text, embedding, asset_id, importance);
                let key = format!("memory/{}", record.id);
                let snapshot = serde_json::to_value(&record).ok();
                store.insert(record);

                if let Some(snapshot) = snapshot {
                    if let Err(e) = storage.put(&key, snapshot).await {
                        tracing::warn!(error = %e, "Memory snapshot write failed");
                    }
                }
            }
            Ok(None) => {
                tracing::debug!("Embedding unavailable — record not indexed");
            }
            Err(e) => {
                tracing::warn!(error = %e, "Memory write failed");
            }
        }
    });
}

/// Background eviction sweep. Spawned from `main.rs` alongside the other
/// subsystem loops.
pub async fn run_eviction_loop(
    store: Arc<MemoryStore>,
    interval_minutes: u64,
    mut shutdown: broadcast::Receiver<()>,
) {
    let interval = tokio::time::Duration::from_secs(interval_minutes * 60);
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    tracing::info!(interval_min = interval_minutes, "Memory eviction loop started");

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let report = store.evict();
                if report.pruned_by_age > 0 || report.pruned_by_importance > 0 {
                    tracing::info!(
                        scanned = report.scanned,
                        by_age = report.pruned_by_age,
                        by_importance = report.pruned_by_importance,
                        "Eviction sweep pruned records"
                    );
                }
            }
            _ = shutdown.recv() => {
                tracing::info!("Memory eviction loop shutting down");
                break;
            }
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================
