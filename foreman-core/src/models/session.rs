use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::command::Intent;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Idle,
    InProcedure,
    AwaitingConfirmation,
    Closed,
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SessionState::Idle => "idle",
            SessionState::InProcedure => "in_procedure",
            SessionState::AwaitingConfirmation => "awaiting_confirmation",
            SessionState::Closed => "closed",
        };
        f.write_str(s)
    }
}

/// Asset descriptor returned by the external asset directory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssetDescriptor {
    pub asset_id: String,
    pub name: String,
    pub status: String,
    pub location: String,
    pub procedure_ids: Vec<String>,
}

/// One entry in a session's audit history.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SessionEvent {
    Command {
        intent: Intent,
        transcript: String,
    },
    Transition {
        from: SessionState,
        to: SessionState,
        trigger: Intent,
    },
    ProcedureCompleted {
        procedure_id: String,
        summary: String,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimedEvent {
    pub at: DateTime<Utc>,
    #[serde(flatten)]
    pub event: SessionEvent,
}

/// Per-interaction-stream state container. Owned exclusively by the worker
/// processing its current command; serialized access is enforced by the
/// session registry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: Uuid,
    pub state: SessionState,
    pub procedure_id: Option<String>,
    pub cursor: usize,
    pub asset: Option<AssetDescriptor>,
    pub history: Vec<TimedEvent>,
    pub started_at: DateTime<Utc>,
    pub last_active_at: DateTime<Utc>,
}

impl Session {
    pub fn new(id: Uuid) -> Self {
        let now = Utc::now();
        Self {
            id,
            state: SessionState::Idle,
            procedure_id: None,
            cursor: 0,
            asset: None,
            history: Vec::new(),
            started_at: now,
            last_active_at: now,
        }
    }

    pub fn touch(&mut self) {
        self.last_active_at = Utc::now();
    }

    pub fn record(&mut self, event: SessionEvent) {
        self.history.push(TimedEvent {
            at: Utc::now(),
            event,
        });
    }

    pub fn idle_for(&self, now: DateTime<Utc>) -> chrono::Duration {
        now - self.last_active_at
    }
}
