//! Embedding backends — external vectorization for the retrieval memory
//!
//! The memory store never computes embeddings itself: an external provider
//! does, behind the `EmbeddingBackend` trait. Two implementations:
//! - **HTTP** — OpenAI-compatible `/embeddings` endpoint with retry/backoff
//! - **Fallback wrapper** — degrades to `Ok(None)` on any error so the
//!   write path can proceed without a vector instead of failing the command

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tokio_retry::strategy::{jitter, ExponentialBackoff};
use tokio_retry::Retry;

use crate::config::EmbeddingSection;

// ============================================================================
// EmbeddingBackend trait
// ============================================================================

/// Abstraction over embedding providers.
#[async_trait]
pub trait EmbeddingBackend: Send + Sync {
    /// Embed a single text. Returns `None` if embedding is unavailable
    /// (used in fallback mode to signal graceful degradation).
    async fn embed(&self, text: &str) -> Result<Option<Vec<f32>>, EmbeddingError>;

    /// Returns the embedding dimension.
    fn dimensions(&self) -> usize;

    /// Backend name for logging.
    fn name(&self) -> &str;
}

// ============================================================================
// Error types
// ============================================================================

#[derive(Error, Debug)]
pub enum EmbeddingError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error ({code}): {message}")]
    Api { code: u16, message: String },

    #[error("Invalid response: expected {expected} dimensions, got {actual}")]
    InvalidDimensions { expected: usize, actual: usize },

    #[error("Missing embedding in response")]
    MissingEmbedding,

    #[error("Missing API key in environment variable {0}")]
    MissingApiKey(String),

    #[error("All {attempts} retry attempts failed")]
    RetryExhausted { attempts: usize },
}

// ============================================================================
// API structs (private)
// ============================================================================

#[derive(Debug, Serialize)]
struct EmbeddingRequest {
    model: String,
    input: String,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingItem>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingItem {
    embedding: Vec<f32>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingErrorResponse {
    error: Option<EmbeddingErrorDetail>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingErrorDetail {
    code: Option<u16>,
    message: String,
}

// ============================================================================
// HttpEmbeddingClient
// ============================================================================

/// HTTP embedding client — calls an OpenAI-compatible embeddings API.
#[derive(Debug, Clone)]
pub struct HttpEmbeddingClient {
    client: Client,
    model: String,
    dimensions: usize,
    max_retries: usize,
    retry_delay_ms: u64,
    api_key: String,
    base_url: String,
}

impl HttpEmbeddingClient {
    pub fn new(section: &EmbeddingSection) -> Result<Self, EmbeddingError> {
        let api_key = std::env::var(&section.api_key_env)
            .map_err(|_| EmbeddingError::MissingApiKey(section.api_key_env.clone()))?;

        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;

        Ok(Self {
            client,
            model: section.model.clone(),
            dimensions: section.dimensions as usize,
            max_retries: section.max_retries,
            retry_delay_ms: section.retry_delay_ms,
            api_key,
            base_url: section.base_url.clone(),
        })
    }

    /// Create a client with a custom base URL (for testing / integration)
    pub fn with_base_url(
        section: &EmbeddingSection,
        base_url: String,
    ) -> Result<Self, EmbeddingError> {
        let mut client = Self::new(section)?;
        client.base_url = base_url;
        Ok(client)
    }

    /// Generate an embedding for the given text (direct call, returns raw Vec)
    pub async fn embed_raw(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let retry_strategy = ExponentialBackoff::from_millis(self.retry_delay_ms)
            .max_delay(Duration::from_secs(10))
            .map(jitter)
            .take(self.max_retries);

        let result = Retry::spawn(retry_strategy, || self.embed_once(text)).await;

        match result {
            Ok(vec) => Ok(vec),
            Err(e) => {
                tracing::error!(
                    attempts = self.max_retries,
                    error = %e,
                    "All embedding retry attempts failed"
                );
                Err(EmbeddingError::RetryExhausted {
                    attempts: self.max_retries,
                })
            }
        }
    }

    async fn embed_once(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let url = format!("{}/embeddings", self.base_url);

        let request = EmbeddingRequest {
            model: self.model.clone(),
            input: text.to_string(),
        };

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await?;

        let status = response.status();

        if !status.is_success() {
            let error_body = response.text().await.unwrap_or_default();
            let error_detail = serde_json::from_str::<EmbeddingErrorResponse>(&error_body)
                .ok()
                .and_then(|e| e.error);

            let (code, message) = error_detail
                .map(|e| (e.code.unwrap_or(status.as_u16()), e.message))
                .unwrap_or((status.as_u16(), error_body));

            tracing::error!(code = code, message = %message, "Embedding API error");

            return Err(EmbeddingError::Api { code, message });
        }

        let parsed: EmbeddingResponse = response.json().await?;

        let values = parsed
            .data
            .into_iter()
            .next()
            .map(|item| item.embedding)
            .ok_or(EmbeddingError::MissingEmbedding)?;

        if values.len() != self.dimensions {
            return Err(EmbeddingError::InvalidDimensions {
                expected: self.dimensions,
                actual: values.len(),
            });
        }

        Ok(values)
    }
}

#[async_trait]
impl EmbeddingBackend for HttpEmbeddingClient {
    async fn embed(&self, text: &str) -> Result<Option<Vec<f32>>, EmbeddingError> {
        self.embed_raw(text).await.map(Some)
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn name(&self) -> &str {
        "http"
    }
}

// ============================================================================
// FallbackEmbeddingClient
// ============================================================================

/// Wraps `HttpEmbeddingClient`. On any error, logs a warning and returns
/// `Ok(None)` so the record is dropped from vector search instead of the
/// command failing.
pub struct FallbackEmbeddingClient {
    inner: HttpEmbeddingClient,
}

impl FallbackEmbeddingClient {
    pub fn new(section: &EmbeddingSection) -> Result<Self, EmbeddingError> {
        Ok(Self {
            inner: HttpEmbeddingClient::new(section)?,
        })
    }

    pub fn with_base_url(
        section: &EmbeddingSection,
        base_url: String,
    ) -> Result<Self, EmbeddingError> {
        Ok(Self {
            inner: HttpEmbeddingClient::with_base_url(section, base_url)?,
        })
    }
}

#[async_trait]
impl EmbeddingBackend for FallbackEmbeddingClient {
    async fn embed(&self, text: &str) -> Result<Option<Vec<f32>>, EmbeddingError> {
        match self.inner.embed_raw(text).await {
            Ok(v) => Ok(Some(v)),
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    "Embedding failed — memory enrichment skipped for this record"
                );
                Ok(None)
            }
        }
    }

    fn dimensions(&self) -> usize {
        self.inner.dimensions
    }

    fn name(&self) -> &str {
        "http-fallback"
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const TEST_DIMS: usize = 64;
    const KEY_VAR: &str = "FOREMAN_TEST_EMBED_KEY";

    fn test_section() -> EmbeddingSection {
        // Serialized via a process-wide env var; tests that need it set it
        // before constructing the client.
        std::env::set_var(KEY_VAR, "test-api-key");
        EmbeddingSection {
            base_url: "http://unused.invalid".to_string(),
            model: "embed-small".to_string(),
            dimensions: TEST_DIMS as u32,
            max_retries: 3,
            retry_delay_ms: 10,
            api_key_env: KEY_VAR.to_string(),
        }
    }

    fn mock_embedding_response() -> serde_json::Value {
        let values: Vec<f32> = (0..TEST_DIMS).map(|i| (i as f32) / TEST_DIMS as f32).collect();
        serde_json::json!({
            "data": [ { "embedding": values } ]
        })
    }

    #[tokio::test]
    async fn test_embed_calls_api_and_returns_vector() {
        let mock_server = MockServer::start().await;
        let client = HttpEmbeddingClient::with_base_url(&test_section(), mock_server.uri())
            .expect("Failed to create client");

        Mock::given(method("POST"))
            .and(path("/embeddings"))
            .and(header("content-type", "application/json"))
            .and(body_json(serde_json::json!({
                "model": "embed-small",
                "input": "pump bearing replaced"
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(mock_embedding_response()))
            .mount(&mock_server)
            .await;

        let result = client.embed_raw("pump bearing replaced").await;

        assert!(result.is_ok(), "Expected Ok, got Err: {:?}", result.err());
        assert_eq!(result.unwrap().len(), TEST_DIMS);
    }

    #[tokio::test]
    async fn test_embed_retries_then_exhausts_on_500() {
        let mock_server = MockServer::start().await;
        let client = HttpEmbeddingClient::with_base_url(&test_section(), mock_server.uri())
            .expect("Failed to create client");

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500).set_body_json(serde_json::json!({
                "error": { "code": 500, "message": "Internal server error" }
            })))
            .mount(&mock_server)
            .await;

        let result = client.embed_raw("hello").await;

        match result {
            Err(EmbeddingError::RetryExhausted { attempts }) => assert_eq!(attempts, 3),
            other => panic!("Expected RetryExhausted, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_embed_retries_on_429_then_succeeds() {
        let mock_server = MockServer::start().await;
        let client = HttpEmbeddingClient::with_base_url(&test_section(), mock_server.uri())
            .expect("Failed to create client");

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(429).set_body_json(serde_json::json!({
                "error": { "code": 429, "message": "Rate limit exceeded" }
            })))
            .up_to_n_times(1)
            .mount(&mock_server)
            .await;

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(mock_embedding_response()))
            .mount(&mock_server)
            .await;

        let result = client.embed_raw("hello").await;

        assert!(result.is_ok(), "Expected success after retry");
        assert_eq!(result.unwrap().len(), TEST_DIMS);
    }

    #[tokio::test]
    async fn test_embed_returns_error_on_wrong_dimensions() {
        let mock_server = MockServer::start().await;
        let client = HttpEmbeddingClient::with_base_url(&test_section(), mock_server.uri())
            .expect("Failed to create client");

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "data": [ { "embedding": [0.1, 0.2, 0.3] } ]
            })))
            .mount(&mock_server)
            .await;

        let result = client.embed_raw("hello").await;

        // The retry wrapper reports exhaustion; the underlying cause is the
        // dimension mismatch either way.
        assert!(result.is_err(), "Expected error on wrong dimensions");
    }

    #[tokio::test]
    async fn test_fallback_returns_none_on_api_error() {
        let mock_server = MockServer::start().await;
        let mut section = test_section();
        section.max_retries = 1;
        let fallback = FallbackEmbeddingClient::with_base_url(&section, mock_server.uri()).unwrap();

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500).set_body_json(serde_json::json!({
                "error": { "code": 500, "message": "boom" }
            })))
            .mount(&mock_server)
            .await;

        let result = fallback.embed("hello").await;
        assert!(result.is_ok(), "Fallback should not propagate errors");
        assert!(result.unwrap().is_none(), "Fallback should return None on error");
        assert_eq!(fallback.name(), "http-fallback");
    }

    #[tokio::test]
    async fn test_fallback_returns_some_on_success() {
        let mock_server = MockServer::start().await;
        let fallback =
            FallbackEmbeddingClient::with_base_url(&test_section(), mock_server.uri()).unwrap();

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(mock_embedding_response()))
            .mount(&mock_server)
            .await;

        let result = fallback.embed("hello").await.unwrap();
        assert!(result.is_some());
        assert_eq!(result.unwrap().len(), TEST_DIMS);
    }
}
