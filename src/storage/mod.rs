//! Key-value persistence backends
//!
//! Every store in the crate persists through the [`KeyValueStore`] trait:
//! whole JSON documents under a handful of well-known keys. The SQLite
//! backend lets several processes share one file, which is how separate
//! chat windows observe each other's thinking lease.

use crate::error::{ChatroomError, Result};
use anyhow::Context;
use chrono::Utc;
use directories::ProjectDirs;
use rusqlite::{params, Connection, OptionalExtension};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use std::time::Duration;

pub mod types;
pub use types::{keys, StorageStats};

/// Minimal string key-value storage, the analogue of browser local storage
pub trait KeyValueStore: Send + Sync {
    /// Read the value stored under `key`
    fn get(&self, key: &str) -> Result<Option<String>>;

    /// Store `value` under `key`, replacing any previous value
    fn set(&self, key: &str, value: &str) -> Result<()>;

    /// Remove `key`; removing a missing key is not an error
    fn remove(&self, key: &str) -> Result<()>;
}

/// Load and deserialize a JSON document
///
/// A document that fails to parse is logged and treated as absent so a
/// corrupt record never prevents startup.
pub fn load_json<T: DeserializeOwned>(store: &dyn KeyValueStore, key: &str) -> Result<Option<T>> {
    let Some(raw) = store.get(key)? else {
        return Ok(None);
    };
    match serde_json::from_str(&raw) {
        Ok(value) => Ok(Some(value)),
        Err(e) => {
            tracing::warn!(key, error = %e, "Ignoring unreadable stored record");
            Ok(None)
        }
    }
}

/// Serialize `value` as JSON and store it under `key`
pub fn save_json<T: Serialize>(store: &dyn KeyValueStore, key: &str, value: &T) -> Result<()> {
    let raw = serde_json::to_string(value)
        .context("Failed to serialize record")
        .map_err(|e| ChatroomError::Storage(e.to_string()))?;
    store.set(key, &raw)
}

/// SQLite-backed key-value storage
pub struct SqliteStorage {
    db_path: PathBuf,
}

impl SqliteStorage {
    /// Create a new storage instance
    ///
    /// Initializes the database file in the user's data directory unless
    /// `CHATROOM_DB` points elsewhere.
    pub fn new() -> Result<Self> {
        if let Ok(override_path) = std::env::var("CHATROOM_DB") {
            return Self::new_with_path(override_path);
        }

        let proj_dirs = ProjectDirs::from("com", "chatroom", "chatroom").ok_or_else(|| {
            ChatroomError::Storage("Could not determine data directory".into())
        })?;

        Self::new_with_path(proj_dirs.data_dir().join("chatroom.db"))
    }

    /// Create a new storage instance that uses the specified database path.
    ///
    /// # Examples
    ///
    /// ```
    /// use chatroom::storage::{KeyValueStore, SqliteStorage};
    ///
    /// let dir = tempfile::tempdir().unwrap();
    /// let storage = SqliteStorage::new_with_path(dir.path().join("kv.db")).unwrap();
    /// storage.set("greeting", "hello").unwrap();
    /// assert_eq!(storage.get("greeting").unwrap().as_deref(), Some("hello"));
    /// ```
    pub fn new_with_path<P: Into<PathBuf>>(db_path: P) -> Result<Self> {
        let db_path = db_path.into();

        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .context("Failed to create parent directory for database")
                    .map_err(|e| ChatroomError::Storage(e.to_string()))?;
            }
        }

        let storage = Self { db_path };
        storage.init()?;
        Ok(storage)
    }

    /// Path of the underlying database file
    pub fn path(&self) -> &Path {
        &self.db_path
    }

    fn open(&self) -> Result<Connection> {
        let conn = Connection::open(&self.db_path)
            .context("Failed to open database")
            .map_err(|e| ChatroomError::Storage(e.to_string()))?;
        // Other processes may hold a write lock briefly.
        conn.busy_timeout(Duration::from_secs(5))
            .context("Failed to configure busy timeout")
            .map_err(|e| ChatroomError::Storage(e.to_string()))?;
        Ok(conn)
    }

    fn init(&self) -> Result<()> {
        let conn = self.open()?;
        conn.execute(
            "CREATE TABLE IF NOT EXISTS kv (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )",
            [],
        )
        .context("Failed to create tables")
        .map_err(|e| ChatroomError::Storage(e.to_string()))?;
        Ok(())
    }

    /// Summary of what is stored, for diagnostics
    pub fn stats(&self) -> Result<StorageStats> {
        let conn = self.open()?;
        let (keys, bytes): (i64, i64) = conn
            .query_row(
                "SELECT count(*), coalesce(sum(length(value)), 0) FROM kv",
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .context("Failed to query storage stats")
            .map_err(|e| ChatroomError::Storage(e.to_string()))?;
        Ok(StorageStats {
            keys: keys as usize,
            bytes: bytes as usize,
        })
    }
}

impl KeyValueStore for SqliteStorage {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let conn = self.open()?;
        let value = conn
            .query_row("SELECT value FROM kv WHERE key = ?", params![key], |row| {
                row.get(0)
            })
            .optional()
            .context("Failed to read key")
            .map_err(|e| ChatroomError::Storage(e.to_string()))?;
        Ok(value)
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        let conn = self.open()?;
        conn.execute(
            "INSERT INTO kv (key, value, updated_at) VALUES (?, ?, ?)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
            params![key, value, Utc::now().to_rfc3339()],
        )
        .context("Failed to write key")
        .map_err(|e| ChatroomError::Storage(e.to_string()))?;
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        let conn = self.open()?;
        conn.execute("DELETE FROM kv WHERE key = ?", params![key])
            .context("Failed to delete key")
            .map_err(|e| ChatroomError::Storage(e.to_string()))?;
        Ok(())
    }
}

/// In-memory key-value storage
///
/// Clones share the same map, so two coordinators built over clones of one
/// `MemoryStorage` behave like two windows over one browser profile.
#[derive(Debug, Clone, Default)]
pub struct MemoryStorage {
    inner: Arc<RwLock<HashMap<String, String>>>,
}

impl MemoryStorage {
    /// Create an empty in-memory store
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored keys
    pub fn len(&self) -> usize {
        self.inner.read().map(|m| m.len()).unwrap_or(0)
    }

    /// Whether the store holds no keys
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl KeyValueStore for MemoryStorage {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let map = self
            .inner
            .read()
            .map_err(|_| ChatroomError::Storage("Storage lock poisoned".into()))?;
        Ok(map.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        let mut map = self
            .inner
            .write()
            .map_err(|_| ChatroomError::Storage("Storage lock poisoned".into()))?;
        map.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        let mut map = self
            .inner
            .write()
            .map_err(|_| ChatroomError::Storage("Storage lock poisoned".into()))?;
        map.remove(key);
        Ok(())
    }
}
