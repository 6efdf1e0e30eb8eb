//! Durable key/value persistence for the chat client.
//!
//! Conversations and settings live under a handful of fixed logical keys
//! (see [`keys`]), each holding one JSON record. The store is deliberately
//! dumb: bounded capacity, string values, no schema. Eviction policy lives
//! one level up in the conversation repository.

pub mod memory;
pub mod migrate;
pub mod sqlite;

pub use memory::MemoryKeyValueStore;
pub use sqlite::SqliteKeyValueStore;

use async_trait::async_trait;
use thiserror::Error;

/// Current persisted-schema version. Bumping it re-runs [`migrate::run`].
pub const APP_VERSION: &str = "2.0.0";

/// Fixed logical keys of the persisted state layout.
pub mod keys {
    /// JSON array of conversations.
    pub const CONVERSATIONS: &str = "ase_conversations";
    /// JSON settings object.
    pub const SETTINGS: &str = "ase_settings";
    /// Identifier of the last active conversation.
    pub const LAST_CHAT_ID: &str = "ase_last_chat_id";
    /// Stored client-identifying token.
    pub const USER_TOKEN: &str = "ase_user_token";
    /// Persisted-schema version marker.
    pub const APP_VERSION: &str = "ase_app_version";

    /// All keys of the current schema.
    pub const ALL: [&str; 5] = [CONVERSATIONS, SETTINGS, LAST_CHAT_ID, USER_TOKEN, APP_VERSION];
}

/// Errors produced by the persistence store.
#[derive(Debug, Error)]
pub enum StorageError {
    /// A write would exceed the configured byte budget.
    #[error("storage capacity exceeded")]
    CapacityExceeded,
    /// Underlying backend failure.
    #[error("storage backend error: {0}")]
    Backend(String),
    /// A stored record could not be serialized or parsed.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<tokio_rusqlite::Error> for StorageError {
    fn from(err: tokio_rusqlite::Error) -> Self {
        Self::Backend(err.to_string())
    }
}

/// Convenience result alias for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Durable string key/value storage.
///
/// Implementations must be safe to call concurrently; writes to a single
/// key are last-writer-wins.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Read the value stored under `key`, if any.
    async fn get(&self, key: &str) -> StorageResult<Option<String>>;

    /// Store `value` under `key`, replacing any previous value.
    ///
    /// # Errors
    /// Returns [`StorageError::CapacityExceeded`] when the write would push
    /// total stored bytes past the configured budget.
    async fn set(&self, key: &str, value: &str) -> StorageResult<()>;

    /// Remove `key`. Removing an absent key is not an error.
    async fn remove(&self, key: &str) -> StorageResult<()>;

    /// List all stored keys.
    async fn all_keys(&self) -> StorageResult<Vec<String>>;
}
