//! Shared, size-limited key-value store.
//!
//! The result cache, the history store and the session marker all write into
//! one store. It has no transactions and a hard byte quota, so callers must
//! expect [`StorageError::QuotaExceeded`] on any write and degrade instead
//! of locking.

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use anyhow::Context;
use chrono::Utc;
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use thiserror::Error;

use crate::config::paths::KV_TABLE;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StorageError {
    #[error("quota exceeded: write needs {needed} bytes, {available} available")]
    QuotaExceeded { needed: usize, available: usize },
    #[error("storage backend failure: {0}")]
    Backend(String),
}

impl StorageError {
    pub fn is_quota(&self) -> bool {
        matches!(self, StorageError::QuotaExceeded { .. })
    }
}

impl From<rusqlite::Error> for StorageError {
    fn from(err: rusqlite::Error) -> Self {
        StorageError::Backend(err.to_string())
    }
}

pub trait KvStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError>;
    fn set(&self, key: &str, value: &str) -> Result<(), StorageError>;
    fn remove(&self, key: &str) -> Result<(), StorageError>;
    fn keys(&self) -> Result<Vec<String>, StorageError>;
    /// Bytes currently used (keys plus values).
    fn usage_bytes(&self) -> Result<usize, StorageError>;

    fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
        Ok(self
            .keys()?
            .into_iter()
            .filter(|k| k.starts_with(prefix))
            .collect())
    }
}

fn entry_size(key: &str, value: &str) -> usize {
    key.len() + value.len()
}

fn check_quota(
    quota: Option<usize>,
    used_without_key: usize,
    key: &str,
    value: &str,
) -> Result<(), StorageError> {
    if let Some(limit) = quota {
        let needed = entry_size(key, value);
        let available = limit.saturating_sub(used_without_key);
        if needed > available {
            return Err(StorageError::QuotaExceeded { needed, available });
        }
    }
    Ok(())
}

// ----------------------------------------------------------------------------
// In-memory store
// ----------------------------------------------------------------------------

/// Process-local store. Used by tests and by hosts with no durable storage.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<BTreeMap<String, String>>,
    quota_bytes: Option<usize>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_quota(quota_bytes: usize) -> Self {
        Self {
            entries: Mutex::new(BTreeMap::new()),
            quota_bytes: Some(quota_bytes),
        }
    }

    pub fn quota_bytes(&self) -> Option<usize> {
        self.quota_bytes
    }
}

impl KvStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        Ok(self.entries.lock().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let mut guard = self.entries.lock();
        let used: usize = guard
            .iter()
            .filter(|(k, _)| k.as_str() != key)
            .map(|(k, v)| entry_size(k, v))
            .sum();
        check_quota(self.quota_bytes, used, key, value)?;
        guard.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        self.entries.lock().remove(key);
        Ok(())
    }

    fn keys(&self) -> Result<Vec<String>, StorageError> {
        Ok(self.entries.lock().keys().cloned().collect())
    }

    fn usage_bytes(&self) -> Result<usize, StorageError> {
        Ok(self
            .entries
            .lock()
            .iter()
            .map(|(k, v)| entry_size(k, v))
            .sum())
    }
}

// ----------------------------------------------------------------------------
// SQLite store
// ----------------------------------------------------------------------------

pub fn configure_sqlite(conn: &Connection) -> anyhow::Result<()> {
    conn.busy_timeout(Duration::from_millis(5_000))
        .context("sqlite busy_timeout 5s")?;
    conn.pragma_update(None, "journal_mode", "WAL")
        .context("sqlite journal_mode=WAL")?;
    conn.pragma_update(None, "synchronous", "NORMAL")
        .context("sqlite synchronous=NORMAL")?;
    Ok(())
}

/// Current store schema version. Increment when making schema changes.
const SCHEMA_VERSION: i64 = 1;

fn init_schema(conn: &Connection) -> anyhow::Result<()> {
    conn.execute_batch(&format!(
        r#"
        CREATE TABLE IF NOT EXISTS schema_version (
            component TEXT PRIMARY KEY,
            version INTEGER NOT NULL,
            applied_at INTEGER NOT NULL
        );
        CREATE TABLE IF NOT EXISTS {KV_TABLE} (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL,
            updated_at INTEGER NOT NULL
        );
        "#
    ))
    .context("create kv schema")?;

    let current: Option<i64> = conn
        .query_row(
            "SELECT version FROM schema_version WHERE component = ?1",
            params![KV_TABLE],
            |row| row.get(0),
        )
        .optional()
        .context("read schema version")?;
    if current.is_none() {
        conn.execute(
            "INSERT INTO schema_version (component, version, applied_at) VALUES (?1, ?2, ?3)",
            params![KV_TABLE, SCHEMA_VERSION, Utc::now().timestamp()],
        )
        .context("record schema version")?;
    }
    Ok(())
}

/// Durable store backed by a single SQLite table.
pub struct SqliteStore {
    conn: Mutex<Connection>,
    quota_bytes: Option<usize>,
}

impl SqliteStore {
    pub fn open(path: &Path, quota_bytes: Option<usize>) -> anyhow::Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("create data dir {:?}", parent))?;
        }
        let conn =
            Connection::open(path).with_context(|| format!("open sqlite store {:?}", path))?;
        configure_sqlite(&conn).context("configure sqlite store")?;
        init_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
            quota_bytes,
        })
    }

    pub fn open_in_memory(quota_bytes: Option<usize>) -> anyhow::Result<Self> {
        let conn = Connection::open_in_memory().context("open in-memory sqlite")?;
        init_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
            quota_bytes,
        })
    }
}

impl KvStore for SqliteStore {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        let conn = self.conn.lock();
        let value = conn
            .query_row(
                &format!("SELECT value FROM {KV_TABLE} WHERE key = ?1"),
                params![key],
                |row| row.get::<_, String>(0),
            )
            .optional()?;
        Ok(value)
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let used: i64 = tx.query_row(
            &format!(
                "SELECT COALESCE(SUM(length(CAST(key AS BLOB)) + length(CAST(value AS BLOB))), 0)
                 FROM {KV_TABLE} WHERE key != ?1"
            ),
            params![key],
            |row| row.get(0),
        )?;
        check_quota(self.quota_bytes, used.max(0) as usize, key, value)?;
        tx.execute(
            &format!(
                "INSERT INTO {KV_TABLE} (key, value, updated_at) VALUES (?1, ?2, ?3)
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at"
            ),
            params![key, value, Utc::now().timestamp_millis()],
        )?;
        tx.commit()?;
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        let conn = self.conn.lock();
        conn.execute(&format!("DELETE FROM {KV_TABLE} WHERE key = ?1"), params![key])?;
        Ok(())
    }

    fn keys(&self) -> Result<Vec<String>, StorageError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&format!("SELECT key FROM {KV_TABLE} ORDER BY key"))?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        let mut keys = Vec::new();
        for key in rows {
            keys.push(key?);
        }
        Ok(keys)
    }

    fn usage_bytes(&self) -> Result<usize, StorageError> {
        let conn = self.conn.lock();
        let used: i64 = conn.query_row(
            &format!(
                "SELECT COALESCE(SUM(length(CAST(key AS BLOB)) + length(CAST(value AS BLOB))), 0) FROM {KV_TABLE}"
            ),
            [],
            |row| row.get(0),
        )?;
        Ok(used.max(0) as usize)
    }
}
