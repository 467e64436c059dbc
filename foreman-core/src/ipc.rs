use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum VoiceRequest {
    Ping,
    Health,
    /// A transcript from the upstream speech recognizer.
    Command {
        session_id: Option<uuid::Uuid>,
        transcript: String,
        /// Recognizer confidence, when the upstream engine reports one.
        confidence: Option<f32>,
    },
    Search {
        query: String,
        limit: Option<u32>,
        asset_id: Option<String>,
    },
    CloseSession {
        session_id: uuid::Uuid,
    },
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct VoiceResponse {
    pub status: String,
    pub data: Option<serde_json::Value>,
    pub error: Option<String>,
    pub version: String,
}

impl VoiceResponse {
    pub fn ok(data: serde_json::Value) -> Self {
        Self {
            status: "ok".to_string(),
            data: Some(data),
            error: None,
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }

    pub fn err(msg: impl Into<String>) -> Self {
        Self {
            status: "error".to_string(),
            data: None,
            error: Some(msg.into()),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }

    pub fn pong() -> Self {
        Self::ok(serde_json::json!({"pong": true}))
    }
}

/// Wire encoding: named MessagePack inside a 4-byte LE length-prefixed frame
/// (the framing itself lives in the server's codec).
pub fn encode_response(response: &VoiceResponse) -> Result<Vec<u8>, rmp_serde::encode::Error> {
    rmp_serde::to_vec_named(response)
}

pub fn decode_request(bytes: &[u8]) -> Result<VoiceRequest, rmp_serde::decode::Error> {
    rmp_serde::from_slice(bytes)
}
