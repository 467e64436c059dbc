use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Structured action payload handed to the external business layer.
/// The engine composes these; it never executes or persists them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BusinessAction {
    CreateWorkOrder {
        asset_id: String,
        priority: String,
        summary: String,
    },
    CompleteProcedure {
        session_id: Uuid,
        procedure_id: String,
        summary: String,
    },
}
