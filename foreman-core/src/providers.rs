//! Provider adapters — uniform interface over external AI backends
//!
//! The orchestrator is agnostic to which backend is plugged in: every
//! adapter implements `ProviderAdapter` (prompt in, `{text, confidence}`
//! out) and is selected by configuration, never by runtime type
//! inspection. The concrete adapter speaks an OpenAI-compatible
//! chat-completions API, which every configured backend is expected to
//! front.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::config::ProviderEntry;

const SYSTEM_PROMPT: &str = "You are the voice assistant of a maintenance management system. \
    Answer in one or two short spoken sentences. Use any provided context. \
    Never invent asset identifiers.";

// ============================================================================
// ProviderAdapter trait
// ============================================================================

/// One completed provider call.
#[derive(Debug, Clone)]
pub struct ProviderReply {
    pub text: String,
    pub confidence: f32,
}

/// Abstraction over generative AI backends.
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    /// Run one completion. The caller owns timeout and cancellation;
    /// adapters only translate the wire protocol.
    async fn complete(&self, prompt: &str) -> Result<ProviderReply, ProviderError>;

    /// Adapter name for logging and `ProviderResult` attribution.
    fn name(&self) -> &str;
}

// ============================================================================
// Error types
// ============================================================================

#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error ({code}): {message}")]
    Api { code: u16, message: String },

    #[error("Backend returned no completion choices")]
    EmptyCompletion,

    #[error("Missing API key in environment variable {0}")]
    MissingApiKey(String),
}

// ============================================================================
// Chat API structs (private)
// ============================================================================

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Debug, Serialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
    /// Non-standard field some gateways attach; used when present.
    confidence: Option<f32>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatErrorResponse {
    error: Option<ChatErrorDetail>,
}

#[derive(Debug, Deserialize)]
struct ChatErrorDetail {
    code: Option<u16>,
    message: String,
}

// ============================================================================
// ChatProviderClient
// ============================================================================

/// Chat-completions client for one configured backend.
#[derive(Debug, Clone)]
pub struct ChatProviderClient {
    client: Client,
    name: String,
    model: String,
    base_url: String,
    api_key: Option<String>,
    default_confidence: f32,
}

impl ChatProviderClient {
    pub fn new(entry: &ProviderEntry) -> Result<Self, ProviderError> {
        let api_key = match &entry.api_key_env {
            Some(var) => {
                let key = std::env::var(var)
                    .map_err(|_| ProviderError::MissingApiKey(var.clone()))?;
                Some(key)
            }
            None => None,
        };

        // No request-level timeout here: the orchestrator races adapters
        // under its own per-provider budget. The connect timeout bounds
        // dead hosts.
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .build()?;

        Ok(Self {
            client,
            name: entry.name.clone(),
            model: entry.model.clone(),
            base_url: entry.base_url.clone(),
            api_key,
            default_confidence: entry.default_confidence,
        })
    }

    /// Create a client with a custom base URL (for testing / integration)
    pub fn with_base_url(entry: &ProviderEntry, base_url: String) -> Result<Self, ProviderError> {
        let mut client = Self::new(entry)?;
        client.base_url = base_url;
        Ok(client)
    }

    async fn complete_once(&self, prompt: &str) -> Result<ProviderReply, ProviderError> {
        let url = format!("{}/chat/completions", self.base_url);

        let request = ChatRequest {
            model: self.model.clone(),
            messages: vec![
                ChatMessage {
                    role: "system".to_string(),
                    content: SYSTEM_PROMPT.to_string(),
                },
                ChatMessage {
                    role: "user".to_string(),
                    content: prompt.to_string(),
                },
            ],
            temperature: 0.2,
            max_tokens: 256,
        };

        let mut req = self.client.post(&url).json(&request);
        if let Some(key) = &self.api_key {
            req = req.bearer_auth(key);
        }

        let response = req.send().await?;
        let status = response.status();

        if !status.is_success() {
            let error_body = response.text().await.unwrap_or_default();
            let error_detail = serde_json::from_str::<ChatErrorResponse>(&error_body)
                .ok()
                .and_then(|e| e.error);

            let (code, message) = error_detail
                .map(|e| (e.code.unwrap_or(status.as_u16()), e.message))
                .unwrap_or((status.as_u16(), error_body));

            tracing::error!(provider = %self.name, code = code, message = %message, "Provider API error");

            return Err(ProviderError::Api { code, message });
        }

        let chat: ChatResponse = response.json().await?;

        let text = chat
            .choices
            .first()
            .map(|c| c.message.content.trim().to_string())
            .filter(|t| !t.is_empty())
            .ok_or(ProviderError::EmptyCompletion)?;

        Ok(ProviderReply {
            text,
            confidence: chat.confidence.unwrap_or(self.default_confidence),
        })
    }
}

#[async_trait]
impl ProviderAdapter for ChatProviderClient {
    async fn complete(&self, prompt: &str) -> Result<ProviderReply, ProviderError> {
        self.complete_once(prompt).await
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Build the ranked adapter list from configuration. Entries whose API key
/// is missing are skipped with a warning rather than failing startup, so a
/// partially configured deployment still serves from the remaining
/// backends.
pub fn build_ranked_providers(entries: &[ProviderEntry]) -> Vec<Arc<dyn ProviderAdapter>> {
    let mut out: Vec<Arc<dyn ProviderAdapter>> = Vec::with_capacity(entries.len());
    for entry in entries {
        match ChatProviderClient::new(entry) {
            Ok(client) => out.push(Arc::new(client)),
            Err(e) => {
                tracing::warn!(provider = %entry.name, error = %e, "Skipping provider");
            }
        }
    }
    out
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_entry() -> ProviderEntry {
        ProviderEntry {
            name: "primary".to_string(),
            base_url: "http://unused.invalid".to_string(),
            model: "assistant-small".to_string(),
            api_key_env: None,
            default_confidence: 0.7,
        }
    }

    fn mock_chat_response(text: &str) -> serde_json::Value {
        serde_json::json!({
            "choices": [
                { "message": { "role": "assistant", "content": text } }
            ]
        })
    }

    #[tokio::test]
    async fn test_complete_posts_chat_request_and_returns_text() {
        let mock_server = MockServer::start().await;
        let client = ChatProviderClient::with_base_url(&test_entry(), mock_server.uri())
            .expect("Failed to create client");

        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(header("content-type", "application/json"))
            .and(body_partial_json(serde_json::json!({
                "model": "assistant-small"
            })))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(mock_chat_response("The pump is operational.")),
            )
            .mount(&mock_server)
            .await;

        let reply = client.complete("what is the pump status").await;

        assert!(reply.is_ok(), "Expected Ok, got Err: {:?}", reply.err());
        let reply = reply.unwrap();
        assert_eq!(reply.text, "The pump is operational.");
        assert!((reply.confidence - 0.7).abs() < f32::EPSILON);
    }

    #[tokio::test]
    async fn test_complete_uses_reported_confidence_when_present() {
        let mock_server = MockServer::start().await;
        let client = ChatProviderClient::with_base_url(&test_entry(), mock_server.uri())
            .expect("Failed to create client");

        let body = serde_json::json!({
            "choices": [
                { "message": { "role": "assistant", "content": "ok" } }
            ],
            "confidence": 0.91
        });

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(body))
            .mount(&mock_server)
            .await;

        let reply = client.complete("hello").await.unwrap();
        assert!((reply.confidence - 0.91).abs() < 1e-6);
    }

    #[tokio::test]
    async fn test_complete_returns_api_error_on_500() {
        let mock_server = MockServer::start().await;
        let client = ChatProviderClient::with_base_url(&test_entry(), mock_server.uri())
            .expect("Failed to create client");

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500).set_body_json(serde_json::json!({
                "error": { "code": 500, "message": "Internal server error" }
            })))
            .mount(&mock_server)
            .await;

        let result = client.complete("hello").await;

        match result {
            Err(ProviderError::Api { code, .. }) => assert_eq!(code, 500),
            other => panic!("Expected Api error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_complete_returns_empty_completion_on_no_choices() {
        let mock_server = MockServer::start().await;
        let client = ChatProviderClient::with_base_url(&test_entry(), mock_server.uri())
            .expect("Failed to create client");

        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({ "choices": [] })),
            )
            .mount(&mock_server)
            .await;

        let result = client.complete("hello").await;
        assert!(matches!(result, Err(ProviderError::EmptyCompletion)));
    }

    #[tokio::test]
    async fn test_new_fails_when_api_key_env_missing() {
        let mut entry = test_entry();
        entry.api_key_env = Some("FOREMAN_TEST_NO_SUCH_KEY".to_string());

        let result = ChatProviderClient::new(&entry);
        assert!(matches!(result, Err(ProviderError::MissingApiKey(_))));
    }

    #[tokio::test]
    async fn test_build_ranked_providers_skips_broken_entries() {
        let mut broken = test_entry();
        broken.name = "secondary".to_string();
        broken.api_key_env = Some("FOREMAN_TEST_NO_SUCH_KEY".to_string());

        let providers = build_ranked_providers(&[test_entry(), broken]);

        assert_eq!(providers.len(), 1);
        assert_eq!(providers[0].name(), "primary");
    }
}
