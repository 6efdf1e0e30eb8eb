//! In-memory key/value store.
//!
//! Shares the exact contract of the SQLite store, including the byte
//! budget, which makes it the store of choice for exercising eviction and
//! capacity-failure paths in tests.

use async_trait::async_trait;
use dashmap::DashMap;

use super::{KeyValueStore, StorageError, StorageResult};

/// [`KeyValueStore`] backed by a concurrent map.
#[derive(Default)]
pub struct MemoryKeyValueStore {
    map: DashMap<String, String>,
    max_bytes: Option<usize>,
}

impl MemoryKeyValueStore {
    /// Create an unbounded store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Cap total stored bytes (keys plus values).
    #[must_use]
    pub fn with_max_bytes(mut self, max_bytes: usize) -> Self {
        self.max_bytes = Some(max_bytes);
        self
    }

    fn stored_bytes_excluding(&self, excluded_key: &str) -> usize {
        self.map
            .iter()
            .filter(|entry| entry.key() != excluded_key)
            .map(|entry| entry.key().len() + entry.value().len())
            .sum()
    }
}

#[async_trait]
impl KeyValueStore for MemoryKeyValueStore {
    async fn get(&self, key: &str) -> StorageResult<Option<String>> {
        Ok(self.map.get(key).map(|entry| entry.value().clone()))
    }

    async fn set(&self, key: &str, value: &str) -> StorageResult<()> {
        if let Some(budget) = self.max_bytes {
            let projected = self.stored_bytes_excluding(key) + key.len() + value.len();
            if projected > budget {
                return Err(StorageError::CapacityExceeded);
            }
        }
        self.map.insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn remove(&self, key: &str) -> StorageResult<()> {
        self.map.remove(key);
        Ok(())
    }

    async fn all_keys(&self) -> StorageResult<Vec<String>> {
        Ok(self.map.iter().map(|entry| entry.key().clone()).collect())
    }
}
