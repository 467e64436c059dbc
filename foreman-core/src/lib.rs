pub mod config;
pub mod embeddings;
pub mod error;
pub mod ipc;
pub mod models;
pub mod providers;
pub mod storage;

pub use config::ForemanConfig;
pub use embeddings::{EmbeddingBackend, EmbeddingError, FallbackEmbeddingClient, HttpEmbeddingClient};
pub use error::{ForemanError, PipelineError};
pub use providers::{
    build_ranked_providers, ChatProviderClient, ProviderAdapter, ProviderError, ProviderReply,
};
pub use storage::{KvStore, MemoryKvStore, SledKvStore, StorageError};
