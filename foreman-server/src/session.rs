//! Session registry — per-session serialization and lifecycle
//!
//! Each session's state lives behind its own `tokio::sync::Mutex`;
//! acquiring it is how a command claims exclusive ownership of the session
//! for its whole pipeline run. The mutex is queue-fair, so commands within
//! one session complete strictly in arrival order while distinct sessions
//! run fully in parallel.
//!
//! The reaper loop archives sessions idle past the configured timeout (and
//! explicitly closed ones) through the key-value storage interface, then
//! drops them from the registry.

use std::sync::Arc;

use chrono::Utc;
use dashmap::DashMap;
use tokio::sync::broadcast;
use uuid::Uuid;

use foreman_core::config::SessionConfig;
use foreman_core::models::{Session, SessionState};
use foreman_core::storage::KvStore;

pub struct SessionHandle {
    pub id: Uuid,
    pub inner: tokio::sync::Mutex<Session>,
}

#[derive(Default)]
pub struct SessionRegistry {
    sessions: DashMap<Uuid, Arc<SessionHandle>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Fetch an existing session or create one. `None` always creates,
    /// handing the caller a fresh id.
    pub fn get_or_create(&self, id: Option<Uuid>) -> Arc<SessionHandle> {
        let id = id.unwrap_or_else(Uuid::new_v4);
        self.sessions
            .entry(id)
            .or_insert_with(|| {
                tracing::info!(session = %id, "Session created");
                Arc::new(SessionHandle {
                    id,
                    inner: tokio::sync::Mutex::new(Session::new(id)),
                })
            })
            .clone()
    }

    pub fn get(&self, id: Uuid) -> Option<Arc<SessionHandle>> {
        self.sessions.get(&id).map(|h| h.clone())
    }

    /// Archive one session through the storage interface and drop it.
    /// Returns false if the session was unknown.
    pub async fn archive(&self, id: Uuid, storage: &dyn KvStore) -> bool {
        let Some((_, handle)) = self.sessions.remove(&id) else {
            return false;
        };

        let mut session = handle.inner.lock().await;
        if session.state != SessionState::Closed {
            session.state = SessionState::Closed;
        }

        match serde_json::to_value(&*session) {
            Ok(snapshot) => {
                let key = format!("session/{}", id);
                if let Err(e) = storage.put(&key, snapshot).await {
                    tracing::warn!(session = %id, error = %e, "Session archive write failed");
                }
            }
            Err(e) => tracing::warn!(session = %id, error = %e, "Session serialization failed"),
        }

        tracing::info!(session = %id, "Session archived");
        true
    }

    /// Sessions idle past `timeout`, plus any already closed. Busy
    /// sessions (lock held by an in-flight command) are never candidates.
    pub fn reap_candidates(&self, idle_timeout: chrono::Duration) -> Vec<Uuid> {
        let now = Utc::now();
        let mut candidates = Vec::new();

        for entry in self.sessions.iter() {
            if let Ok(session) = entry.value().inner.try_lock() {
                if session.state == SessionState::Closed || session.idle_for(now) > idle_timeout {
                    candidates.push(*entry.key());
                }
            }
        }

        candidates
    }
}

/// Background reaper. Spawned from `main.rs` alongside the other loops.
pub async fn run_reaper_loop(
    registry: Arc<SessionRegistry>,
    storage: Arc<dyn KvStore>,
    config: SessionConfig,
    mut shutdown: broadcast::Receiver<()>,
) {
    let interval = tokio::time::Duration::from_secs(config.reaper_interval_secs);
    let idle_timeout = chrono::Duration::minutes(config.idle_timeout_minutes as i64);

    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    tracing::info!(
        idle_timeout_min = config.idle_timeout_minutes,
        "Session reaper started"
    );

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let candidates = registry.reap_candidates(idle_timeout);
                for id in candidates {
                    registry.archive(id, storage.as_ref()).await;
                }
            }
            _ = shutdown.recv() => {
                tracing::info!("Session reaper shutting down");
                break;
            }
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use foreman_core::storage::MemoryKvStore;

    #[tokio::test]
    async fn test_get_or_create_returns_same_handle_for_same_id() {
        let registry = SessionRegistry::new();
        let a = registry.get_or_create(None);
        let b = registry.get_or_create(Some(a.id));

        assert_eq!(a.id, b.id);
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn test_archive_persists_snapshot_and_removes_session() {
        let registry = SessionRegistry::new();
        let storage = MemoryKvStore::new();
        let handle = registry.get_or_create(None);
        let id = handle.id;
        drop(handle);

        assert!(registry.archive(id, &storage).await);

        assert_eq!(registry.len(), 0);
        let archived = storage.get(&format!("session/{}", id)).await.unwrap();
        let archived = archived.expect("snapshot should exist");
        assert_eq!(archived["state"], "closed");
    }

    #[tokio::test]
    async fn test_reap_candidates_skips_fresh_sessions() {
        let registry = SessionRegistry::new();
        registry.get_or_create(None);

        let candidates = registry.reap_candidates(chrono::Duration::minutes(15));
        assert!(candidates.is_empty());
    }

    #[tokio::test]
    async fn test_reap_candidates_includes_idle_and_closed_sessions() {
        let registry = SessionRegistry::new();

        let idle = registry.get_or_create(None);
        {
            let mut session = idle.inner.lock().await;
            session.last_active_at = Utc::now() - chrono::Duration::minutes(30);
        }

        let closed = registry.get_or_create(None);
        {
            let mut session = closed.inner.lock().await;
            session.state = SessionState::Closed;
        }

        let fresh = registry.get_or_create(None);

        let candidates = registry.reap_candidates(chrono::Duration::minutes(15));

        assert!(candidates.contains(&idle.id));
        assert!(candidates.contains(&closed.id));
        assert!(!candidates.contains(&fresh.id));
    }

    #[tokio::test]
    async fn test_commands_serialize_per_session() {
        // Two workers contend for one session; the mutex must serialize
        // them so increments never interleave.
        let registry = Arc::new(SessionRegistry::new());
        let handle = registry.get_or_create(None);

        let mut tasks = tokio::task::JoinSet::new();
        for _ in 0..8 {
            let handle = Arc::clone(&handle);
            tasks.spawn(async move {
                let mut session = handle.inner.lock().await;
                let n = session.cursor;
                tokio::time::sleep(std::time::Duration::from_millis(2)).await;
                session.cursor = n + 1;
            });
        }
        while tasks.join_next().await.is_some() {}

        assert_eq!(handle.inner.lock().await.cursor, 8);
    }
}
