use serde::{Deserialize, Serialize};

use super::action::BusinessAction;

/// Pacing hint for the downstream speech synthesizer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PacingHint {
    Normal,
    /// Read slowly and clearly (safety-critical step text).
    Deliberate,
}

/// The single composed reply handed back to the speech channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Reply {
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub action: Option<BusinessAction>,
    pub pacing: PacingHint,
    /// Effective confidence of the chosen path, after gating.
    pub confidence: f32,
    /// True when the reply is a clarification question rather than an answer.
    pub clarification: bool,
}

impl Reply {
    pub fn spoken(text: impl Into<String>, confidence: f32) -> Self {
        Self {
            text: text.into(),
            action: None,
            pacing: PacingHint::Normal,
            confidence,
            clarification: false,
        }
    }

    pub fn with_action(mut self, action: BusinessAction) -> Self {
        self.action = Some(action);
        self
    }

    pub fn deliberate(mut self) -> Self {
        self.pacing = PacingHint::Deliberate;
        self
    }

    pub fn clarification(text: impl Into<String>, confidence: f32) -> Self {
        Self {
            text: text.into(),
            action: None,
            pacing: PacingHint::Normal,
            confidence,
            clarification: true,
        }
    }
}
