use config::{Config, ConfigError, File};
use serde::Deserialize;

#[derive(Debug, Deserialize, Clone)]
pub struct ForemanConfig {
    pub service: ServiceConfig,
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub extractor: ExtractorConfig,
    #[serde(default)]
    pub memory: MemoryConfig,
    pub embedding: EmbeddingSection,
    pub orchestrator: OrchestratorConfig,
    #[serde(default)]
    pub composer: ComposerConfig,
    #[serde(default)]
    pub assets: AssetsConfig,
    #[serde(default)]
    pub storage: StorageConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServiceConfig {
    pub socket_path: String,
    pub log_level: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct HttpConfig {
    pub enabled: bool,
    pub host: String,
    pub port: u16,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            host: "127.0.0.1".to_string(),
            port: 8790,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct SessionConfig {
    /// Sessions idle longer than this are archived and dropped.
    pub idle_timeout_minutes: u64,
    pub reaper_interval_secs: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            idle_timeout_minutes: 15,
            reaper_interval_secs: 60,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ExtractorConfig {
    /// Confidence assigned when no grammar rule matches.
    pub free_form_confidence: f32,
}

impl Default for ExtractorConfig {
    fn default() -> Self {
        Self {
            free_form_confidence: 0.25,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct MemoryConfig {
    pub weight_similarity: f32,
    pub weight_recency: f32,
    pub weight_importance: f32,
    /// Recency score halves every this many hours.
    pub recency_half_life_hours: f32,
    pub retrieve_top_k: u32,
    pub max_top_k: u32,
    /// Eviction starts once the store grows past this.
    pub max_records: usize,
    pub max_age_days: i64,
    pub importance_floor: f32,
    pub eviction_interval_minutes: u64,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            weight_similarity: 1.0 / 3.0,
            weight_recency: 1.0 / 3.0,
            weight_importance: 1.0 / 3.0,
            recency_half_life_hours: 24.0,
            retrieve_top_k: 5,
            max_top_k: 20,
            max_records: 10_000,
            max_age_days: 90,
            importance_floor: 0.1,
            eviction_interval_minutes: 15,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingSection {
    pub base_url: String,
    pub model: String,
    pub dimensions: u32,
    pub max_retries: usize,
    pub retry_delay_ms: u64,
    /// Environment variable holding the API key.
    pub api_key_env: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct OrchestratorConfig {
    /// How many top-ranked providers race concurrently.
    pub race_width: usize,
    pub provider_timeout_ms: u64,
    pub pipeline_deadline_ms: u64,
    pub confidence_floor: f32,
    /// Ranked list, highest priority first.
    pub providers: Vec<ProviderEntry>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ProviderEntry {
    pub name: String,
    pub base_url: String,
    pub model: String,
    #[serde(default)]
    pub api_key_env: Option<String>,
    /// Confidence assumed when the backend reports none.
    pub default_confidence: f32,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ComposerConfig {
    pub clarification_threshold: f32,
}

impl Default for ComposerConfig {
    fn default() -> Self {
        Self {
            clarification_threshold: 0.6,
        }
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct AssetsConfig {
    /// Asset directory endpoint. When unset, commands proceed without
    /// asset context.
    pub base_url: Option<String>,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct StorageConfig {
    /// Sled data directory for session archive and memory snapshots.
    /// When unset, an in-memory store is used.
    pub data_dir: Option<String>,
}

impl ForemanConfig {
    pub fn load(path: &str) -> Result<Self, ConfigError> {
        let s = Config::builder()
            .add_source(File::with_name(path))
            .build()?;
        s.try_deserialize()
    }
}
