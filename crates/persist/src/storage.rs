//! Byte-level key-value persistence boundary.

use async_trait::async_trait;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::RwLock;

/// Errors raised by a storage backend.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid storage key {0:?}")]
    InvalidKey(String),
    #[error("storage backend error: {0}")]
    Backend(String),
    #[error("storage call exceeded {0:?}")]
    Timeout(Duration),
}

/// Async key-value store holding one opaque blob per key.
///
/// Reading a missing key yields `Ok(None)`; removing a missing key succeeds.
#[async_trait]
pub trait StorageAdapter: Send + Sync {
    async fn get_item(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError>;
    async fn set_item(&self, key: &str, value: &[u8]) -> Result<(), StorageError>;
    async fn remove_item(&self, key: &str) -> Result<(), StorageError>;
}

/// In-process storage. Contents are lost when the value is dropped.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    items: RwLock<HashMap<String, Vec<u8>>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a key with raw bytes, bypassing any manager.
    pub async fn insert_raw(&self, key: impl Into<String>, bytes: impl Into<Vec<u8>>) {
        self.items.write().await.insert(key.into(), bytes.into());
    }

    /// Raw bytes currently stored under `key`.
    pub async fn raw(&self, key: &str) -> Option<Vec<u8>> {
        self.items.read().await.get(key).cloned()
    }

    pub async fn len(&self) -> usize {
        self.items.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.items.read().await.is_empty()
    }
}

#[async_trait]
impl StorageAdapter for MemoryStorage {
    async fn get_item(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        Ok(self.raw(key).await)
    }

    async fn set_item(&self, key: &str, value: &[u8]) -> Result<(), StorageError> {
        self.items.write().await.insert(key.to_owned(), value.to_vec());
        Ok(())
    }

    async fn remove_item(&self, key: &str) -> Result<(), StorageError> {
        self.items.write().await.remove(key);
        Ok(())
    }
}
