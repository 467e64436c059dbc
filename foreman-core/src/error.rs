use thiserror::Error;

use crate::models::session::SessionState;

#[derive(Error, Debug)]
pub enum ForemanError {
    #[error("Config error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("IPC error: {0}")]
    Ipc(String),

    #[error("Other error: {0}")]
    Other(String),
}

/// Per-command error taxonomy. Every variant is converted into a spoken
/// reply inside the pipeline; nothing here propagates as an unhandled
/// fault to the session.
#[derive(Error, Debug, Clone)]
pub enum PipelineError {
    /// Malformed input: the transcript was empty or non-text.
    #[error("transcript is empty or non-text")]
    Extraction,

    /// Below the recognition threshold. Triggers clarification, not failure.
    #[error("recognition confidence {confidence:.2} below threshold")]
    RecognitionLowConfidence { confidence: f32 },

    /// A single backend timed out. Recoverable: triggers fallback.
    #[error("provider '{provider}' timed out")]
    ProviderTimeout { provider: String },

    /// A single backend failed. Recoverable: triggers fallback.
    #[error("provider '{provider}' failed: {message}")]
    Provider { provider: String, message: String },

    /// All backends exhausted. Terminal for this command, not the session.
    #[error("all providers exhausted")]
    ServiceUnavailable,

    /// Invalid navigation transition. Corrected with a prompt, not fatal.
    #[error("cannot {action} while session is {state}")]
    ProcedureState { state: SessionState, action: String },

    /// Memory read/write failure. The command proceeds without context.
    #[error("memory store error: {0}")]
    MemoryStore(String),
}
