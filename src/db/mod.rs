// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Local key-value storage backing the collection archive

use rusqlite::{Connection, OptionalExtension, params};
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};

use crate::{StampvaultError, Result};

/// String key to string value storage, in the spirit of browser local storage
pub trait KeyValueStore: Send + Sync {
    fn get_item(&self, key: &str) -> Result<Option<String>>;
    fn set_item(&self, key: &str, value: &str) -> Result<()>;
    fn remove_item(&self, key: &str) -> Result<()>;

    /// Size of the stored value in bytes
    fn value_size(&self, key: &str) -> Result<Option<usize>> {
        Ok(self.get_item(key)?.map(|v| v.len()))
    }
}

/// SQLite-backed storage (thread-safe wrapper)
#[derive(Clone)]
pub struct SqliteStorage {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStorage {
    /// Open or create the database
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let conn = Connection::open(path)?;
        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        db.initialize()?;
        Ok(db)
    }

    /// Open an in-memory database (for testing)
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        db.initialize()?;
        Ok(db)
    }

    fn lock_conn(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| StampvaultError::Config("Database lock poisoned".to_string()))
    }

    fn initialize(&self) -> Result<()> {
        let conn = self.lock_conn()?;
        conn.execute_batch(r#"
            CREATE TABLE IF NOT EXISTS kv (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                updated_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
            );
        "#)?;
        Ok(())
    }
}

impl KeyValueStore for SqliteStorage {
    fn get_item(&self, key: &str) -> Result<Option<String>> {
        let conn = self.lock_conn()?;
        let value = conn
            .query_row("SELECT value FROM kv WHERE key = ?1", params![key], |row| row.get(0))
            .optional()?;
        Ok(value)
    }

    fn set_item(&self, key: &str, value: &str) -> Result<()> {
        let conn = self.lock_conn()?;
        conn.execute(
            r#"INSERT INTO kv (key, value, updated_at) VALUES (?1, ?2, datetime('now'))
               ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at"#,
            params![key, value],
        )?;
        Ok(())
    }

    fn remove_item(&self, key: &str) -> Result<()> {
        let conn = self.lock_conn()?;
        conn.execute("DELETE FROM kv WHERE key = ?1", params![key])?;
        Ok(())
    }

    fn value_size(&self, key: &str) -> Result<Option<usize>> {
        let conn = self.lock_conn()?;
        let size: Option<i64> = conn
            .query_row("SELECT length(CAST(value AS BLOB)) FROM kv WHERE key = ?1", params![key], |row| row.get(0))
            .optional()?;
        Ok(size.map(|n| n as usize))
    }
}

/// Volatile in-process storage
#[derive(Clone, Default)]
pub struct MemoryStorage {
    items: Arc<Mutex<HashMap<String, String>>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, String>>> {
        self.items.lock().map_err(|_| StampvaultError::Config("Storage lock poisoned".to_string()))
    }
}

impl KeyValueStore for MemoryStorage {
    fn get_item(&self, key: &str) -> Result<Option<String>> {
        Ok(self.lock()?.get(key).cloned())
    }

    fn set_item(&self, key: &str, value: &str) -> Result<()> {
        self.lock()?.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove_item(&self, key: &str) -> Result<()> {
        self.lock()?.remove(key);
        Ok(())
    }
}

/// Storage whose writes can be switched off, for exercising failed saves
#[cfg(test)]
#[derive(Clone, Default)]
pub(crate) struct FlakyStorage {
    pub inner: MemoryStorage,
    pub fail_writes: Arc<std::sync::atomic::AtomicBool>,
}

#[cfg(test)]
impl FlakyStorage {
    pub fn set_failing(&self, failing: bool) {
        self.fail_writes.store(failing, std::sync::atomic::Ordering::SeqCst);
    }

    fn check(&self) -> Result<()> {
        if self.fail_writes.load(std::sync::atomic::Ordering::SeqCst) {
            return Err(StampvaultError::FileSystem(std::io::Error::other("disk full")));
        }
        Ok(())
    }
}

#[cfg(test)]
impl KeyValueStore for FlakyStorage {
    fn get_item(&self, key: &str) -> Result<Option<String>> {
        self.inner.get_item(key)
    }

    fn set_item(&self, key: &str, value: &str) -> Result<()> {
        self.check()?;
        self.inner.set_item(key, value)
    }

    fn remove_item(&self, key: &str) -> Result<()> {
        self.check()?;
        self.inner.remove_item(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sqlite_set_get_overwrite() {
        let db = SqliteStorage::in_memory().unwrap();
        assert_eq!(db.get_item("k").unwrap(), None);

        db.set_item("k", "one").unwrap();
        db.set_item("k", "two").unwrap();
        assert_eq!(db.get_item("k").unwrap().as_deref(), Some("two"));
        assert_eq!(db.value_size("k").unwrap(), Some(3));

        db.remove_item("k").unwrap();
        assert_eq!(db.get_item("k").unwrap(), None);
    }

    #[test]
    fn test_sqlite_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("archive.db");

        SqliteStorage::open(&path).unwrap().set_item("archive", "[]").unwrap();
        let reopened = SqliteStorage::open(&path).unwrap();
        assert_eq!(reopened.get_item("archive").unwrap().as_deref(), Some("[]"));
    }

    #[test]
    fn test_memory_storage_shares_state_between_clones() {
        let a = MemoryStorage::new();
        let b = a.clone();
        a.set_item("x", "1").unwrap();
        assert_eq!(b.get_item("x").unwrap().as_deref(), Some("1"));
    }

    #[test]
    fn test_value_size_counts_bytes() {
        let db = SqliteStorage::in_memory().unwrap();
        db.set_item("k", "120,00 €").unwrap();
        assert_eq!(db.value_size("k").unwrap(), Some(10));
        assert_eq!(db.value_size("missing").unwrap(), None);

        let mem = MemoryStorage::new();
        mem.set_item("k", "120,00 €").unwrap();
        assert_eq!(mem.value_size("k").unwrap(), Some(10));
    }
}
