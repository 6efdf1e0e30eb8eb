//! SQLite-backed key/value store.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use rusqlite::OptionalExtension;
use tokio_rusqlite::Connection;

use super::{KeyValueStore, StorageError, StorageResult};

/// Table holding all records.
const TABLE: &str = "kv";

/// SQLite implementation of [`KeyValueStore`].
///
/// All access goes through one shared async connection, the same pattern
/// the conversation metadata store uses elsewhere in this codebase.
pub struct SqliteKeyValueStore {
    conn: Arc<Connection>,
    max_bytes: Option<usize>,
}

impl SqliteKeyValueStore {
    /// Open the store at `path`, creating the table if needed.
    ///
    /// # Errors
    /// Returns an error if the database cannot be opened or initialized.
    pub async fn open(path: impl AsRef<Path>) -> StorageResult<Self> {
        let conn = Connection::open(path.as_ref())
            .await
            .map_err(StorageError::from)?;
        Self::init(Arc::new(conn)).await
    }

    /// Open an in-memory store, mainly for tests and local runs.
    ///
    /// # Errors
    /// Returns an error if the database cannot be initialized.
    pub async fn open_in_memory() -> StorageResult<Self> {
        let conn = Connection::open_in_memory()
            .await
            .map_err(StorageError::from)?;
        Self::init(Arc::new(conn)).await
    }

    /// Cap total stored bytes (keys plus values). Writes that would exceed
    /// the budget fail with [`StorageError::CapacityExceeded`].
    #[must_use]
    pub const fn with_max_bytes(mut self, max_bytes: usize) -> Self {
        self.max_bytes = Some(max_bytes);
        self
    }

    async fn init(conn: Arc<Connection>) -> StorageResult<Self> {
        conn.call(move |conn| {
            conn.execute_batch(&format!(
                "CREATE TABLE IF NOT EXISTS {TABLE} (
                    key TEXT PRIMARY KEY,
                    value TEXT NOT NULL
                );"
            ))?;
            Ok(())
        })
        .await?;

        Ok(Self {
            conn,
            max_bytes: None,
        })
    }

    /// Total stored bytes, excluding any record under `excluded_key`.
    async fn stored_bytes_excluding(&self, excluded_key: &str) -> StorageResult<usize> {
        let excluded = excluded_key.to_string();
        let total: i64 = self
            .conn
            .call(move |conn| {
                let total = conn.query_row(
                    &format!(
                        "SELECT COALESCE(SUM(LENGTH(key) + LENGTH(value)), 0)
                         FROM {TABLE} WHERE key != ?1"
                    ),
                    rusqlite::params![excluded],
                    |row| row.get(0),
                )?;
                Ok(total)
            })
            .await?;
        Ok(usize::try_from(total).unwrap_or(0))
    }
}

#[async_trait]
impl KeyValueStore for SqliteKeyValueStore {
    async fn get(&self, key: &str) -> StorageResult<Option<String>> {
        let key = key.to_string();
        let value = self
            .conn
            .call(move |conn| {
                let value = conn
                    .query_row(
                        &format!("SELECT value FROM {TABLE} WHERE key = ?1"),
                        rusqlite::params![key],
                        |row| row.get(0),
                    )
                    .optional()?;
                Ok(value)
            })
            .await?;
        Ok(value)
    }

    async fn set(&self, key: &str, value: &str) -> StorageResult<()> {
        if let Some(budget) = self.max_bytes {
            let projected =
                self.stored_bytes_excluding(key).await? + key.len() + value.len();
            if projected > budget {
                return Err(StorageError::CapacityExceeded);
            }
        }

        let key = key.to_string();
        let value = value.to_string();
        self.conn
            .call(move |conn| {
                conn.execute(
                    &format!(
                        "INSERT INTO {TABLE} (key, value) VALUES (?1, ?2)
                         ON CONFLICT(key) DO UPDATE SET value = excluded.value"
                    ),
                    rusqlite::params![key, value],
                )?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    async fn remove(&self, key: &str) -> StorageResult<()> {
        let key = key.to_string();
        self.conn
            .call(move |conn| {
                conn.execute(
                    &format!("DELETE FROM {TABLE} WHERE key = ?1"),
                    rusqlite::params![key],
                )?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    async fn all_keys(&self) -> StorageResult<Vec<String>> {
        let keys = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(&format!("SELECT key FROM {TABLE}"))?;
                let keys = stmt
                    .query_map([], |row| row.get(0))?
                    .collect::<Result<Vec<String>, _>>()?;
                Ok(keys)
            })
            .await?;
        Ok(keys)
    }
}
