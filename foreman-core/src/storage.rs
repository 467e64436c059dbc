//! Key-value storage interface — session archive and memory snapshots
//!
//! The engine specifies only the access pattern (put/get/delete/list by
//! prefix); the storage engine behind it is a deployment concern. Two
//! implementations: an in-memory map for tests and single-process setups,
//! and a sled-backed store for durability.

use std::collections::BTreeMap;
use std::sync::RwLock;

use async_trait::async_trait;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Storage engine error: {0}")]
    Engine(#[from] sled::Error),

    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("Poisoned lock")]
    Poisoned,
}

/// External key-value/document store contract.
#[async_trait]
pub trait KvStore: Send + Sync {
    async fn put(&self, key: &str, value: serde_json::Value) -> Result<(), StorageError>;

    async fn get(&self, key: &str) -> Result<Option<serde_json::Value>, StorageError>;

    async fn delete(&self, key: &str) -> Result<(), StorageError>;

    /// All entries whose key starts with `prefix`, in key order.
    async fn list_by_prefix(
        &self,
        prefix: &str,
    ) -> Result<Vec<(String, serde_json::Value)>, StorageError>;
}

// ============================================================================
// In-memory store
// ============================================================================

#[derive(Default)]
pub struct MemoryKvStore {
    inner: RwLock<BTreeMap<String, serde_json::Value>>,
}

impl MemoryKvStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KvStore for MemoryKvStore {
    async fn put(&self, key: &str, value: serde_json::Value) -> Result<(), StorageError> {
        let mut map = self.inner.write().map_err(|_| StorageError::Poisoned)?;
        map.insert(key.to_string(), value);
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<serde_json::Value>, StorageError> {
        let map = self.inner.read().map_err(|_| StorageError::Poisoned)?;
        Ok(map.get(key).cloned())
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        let mut map = self.inner.write().map_err(|_| StorageError::Poisoned)?;
        map.remove(key);
        Ok(())
    }

    async fn list_by_prefix(
        &self,
        prefix: &str,
    ) -> Result<Vec<(String, serde_json::Value)>, StorageError> {
        let map = self.inner.read().map_err(|_| StorageError::Poisoned)?;
        Ok(map
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }
}

// ============================================================================
// Sled store
// ============================================================================

pub struct SledKvStore {
    db: sled::Db,
}

impl SledKvStore {
    pub fn open(path: &str) -> Result<Self, StorageError> {
        let db = sled::open(path)?;
        Ok(Self { db })
    }
}

#[async_trait]
impl KvStore for SledKvStore {
    async fn put(&self, key: &str, value: serde_json::Value) -> Result<(), StorageError> {
        let bytes = serde_json::to_vec(&value)?;
        self.db.insert(key.as_bytes(), bytes)?;
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<serde_json::Value>, StorageError> {
        match self.db.get(key.as_bytes())? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        self.db.remove(key.as_bytes())?;
        Ok(())
    }

    async fn list_by_prefix(
        &self,
        prefix: &str,
    ) -> Result<Vec<(String, serde_json::Value)>, StorageError> {
        let mut out = Vec::new();
        for item in self.db.scan_prefix(prefix.as_bytes()) {
            let (key, bytes) = item?;
            let key = String::from_utf8_lossy(&key).into_owned();
            out.push((key, serde_json::from_slice(&bytes)?));
        }
        Ok(out)
    }
}

// ============================================================================
// TESTS
// ============================================================================
