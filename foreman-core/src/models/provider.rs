use serde::{Deserialize, Serialize};

/// What went wrong with a single provider attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderErrorKind {
    Timeout,
    Transport,
    Api,
    Malformed,
}

/// Outcome of one backend call. Transient: used only to pick a winner,
/// never persisted beyond the request that produced it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderResult {
    pub provider_id: String,
    pub latency_ms: u64,
    pub success: bool,
    pub text: String,
    pub confidence: f32,
    pub error: Option<ProviderErrorKind>,
}

impl ProviderResult {
    pub fn success(provider_id: impl Into<String>, latency_ms: u64, text: String, confidence: f32) -> Self {
        Self {
            provider_id: provider_id.into(),
            latency_ms,
            success: true,
            text,
            confidence,
            error: None,
        }
    }

    pub fn failure(provider_id: impl Into<String>, latency_ms: u64, kind: ProviderErrorKind) -> Self {
        Self {
            provider_id: provider_id.into(),
            latency_ms,
            success: false,
            text: String::new(),
            confidence: 0.0,
            error: Some(kind),
        }
    }
}
