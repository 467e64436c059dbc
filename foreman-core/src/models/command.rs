use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Closed set of things a spoken command can ask for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Intent {
    CreateTask,
    QueryStatus,
    StartProcedure,
    NavigateNext,
    NavigateRepeat,
    NavigateComplete,
    NavigateCancel,
    CloseSession,
    FreeForm,
}

impl Intent {
    pub fn as_str(&self) -> &'static str {
        match self {
            Intent::CreateTask => "create_task",
            Intent::QueryStatus => "query_status",
            Intent::StartProcedure => "start_procedure",
            Intent::NavigateNext => "navigate_next",
            Intent::NavigateRepeat => "navigate_repeat",
            Intent::NavigateComplete => "navigate_complete",
            Intent::NavigateCancel => "navigate_cancel",
            Intent::CloseSession => "close_session",
            Intent::FreeForm => "free_form",
        }
    }

    /// Navigation intents are handled by the procedure state machine,
    /// never by the provider orchestrator.
    pub fn is_navigation(&self) -> bool {
        matches!(
            self,
            Intent::StartProcedure
                | Intent::NavigateNext
                | Intent::NavigateRepeat
                | Intent::NavigateComplete
                | Intent::NavigateCancel
        )
    }

    /// Intents that require generative reasoning from an AI backend.
    pub fn needs_generation(&self) -> bool {
        matches!(self, Intent::QueryStatus | Intent::FreeForm)
    }
}

impl std::fmt::Display for Intent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A parsed voice command. Immutable once created.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Command {
    pub id: Uuid,
    pub session_id: Uuid,
    pub transcript: String,
    pub intent: Intent,
    pub entities: HashMap<String, String>,
    pub confidence: f32,
    pub created_at: DateTime<Utc>,
}

impl Command {
    pub fn entity(&self, key: &str) -> Option<&str> {
        self.entities.get(key).map(String::as_str)
    }
}
