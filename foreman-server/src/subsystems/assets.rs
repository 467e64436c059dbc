//! Asset directory — external lookup of asset descriptors
//!
//! Given an asset identifier (spoken or QR-scanned upstream), the external
//! directory returns a descriptor with name, status, location, and the
//! procedure ids available for it. The pipeline calls this once per asset
//! per session and caches the descriptor on the session for its lifetime.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use thiserror::Error;

use foreman_core::models::AssetDescriptor;

#[derive(Error, Debug)]
pub enum AssetError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Directory error ({code}): {message}")]
    Api { code: u16, message: String },
}

#[async_trait]
pub trait AssetDirectory: Send + Sync {
    /// Resolve one asset id. Unknown ids are `Ok(None)`, not an error.
    async fn lookup(&self, asset_id: &str) -> Result<Option<AssetDescriptor>, AssetError>;
}

// ============================================================================
// HTTP directory
// ============================================================================

pub struct HttpAssetDirectory {
    client: Client,
    base_url: String,
}

impl HttpAssetDirectory {
    pub fn new(base_url: String) -> Result<Self, AssetError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(5))
            .build()?;
        Ok(Self { client, base_url })
    }
}

#[async_trait]
impl AssetDirectory for HttpAssetDirectory {
    async fn lookup(&self, asset_id: &str) -> Result<Option<AssetDescriptor>, AssetError> {
        let url = format!("{}/assets/{}", self.base_url, asset_id);
        let response = self.client.get(&url).send().await?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(AssetError::Api {
                code: status.as_u16(),
                message,
            });
        }

        let descriptor: AssetDescriptor = response.json().await?;
        Ok(Some(descriptor))
    }
}

// ============================================================================
// Static directory (tests, demos, air-gapped deployments)
// ============================================================================

#[derive(Default)]
pub struct StaticAssetDirectory {
    assets: HashMap<String, AssetDescriptor>,
}

impl StaticAssetDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_asset(mut self, descriptor: AssetDescriptor) -> Self {
        self.assets.insert(descriptor.asset_id.clone(), descriptor);
        self
    }
}

#[async_trait]
impl AssetDirectory for StaticAssetDirectory {
    async fn lookup(&self, asset_id: &str) -> Result<Option<AssetDescriptor>, AssetError> {
        Ok(self.assets.get(asset_id).cloned())
    }
}

// ============================================================================
// TESTS
// ============================================================================
