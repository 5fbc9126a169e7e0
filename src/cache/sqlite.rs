//! SQLite persistence for cache namespaces, so cached data outlives a run.

use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Connection};
use serde::{de::DeserializeOwned, Serialize};
use std::marker::PhantomData;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::debug;

use crate::config::Config;

use super::storage::{CacheEntry, Persistence};

/// Schema for persisted cache entries.
const CACHE_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS cache_entries (
    namespace TEXT NOT NULL,
    entry_key TEXT NOT NULL,
    data BLOB NOT NULL,
    created_at TEXT NOT NULL,
    PRIMARY KEY (namespace, entry_key)
);
"#;

/// Cache database shared by every namespace. Cloning shares the connection.
#[derive(Clone)]
pub struct SqliteCache {
  conn: Arc<Mutex<Connection>>,
}

impl SqliteCache {
  /// Open or create `cache.db` in the data directory.
  pub fn open() -> Result<Self> {
    let path = Config::data_dir()?.join("cache.db");
    Self::open_at(&path)
  }

  pub fn open_at(path: &Path) -> Result<Self> {
    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| eyre!("Failed to create cache directory: {}", e))?;
    }

    let conn = Connection::open(path)
      .map_err(|e| eyre!("Failed to open cache database at {}: {}", path.display(), e))?;
    Self::with_connection(conn)
  }

  #[cfg(test)]
  pub fn open_in_memory() -> Result<Self> {
    let conn = Connection::open_in_memory()
      .map_err(|e| eyre!("Failed to open in-memory cache database: {}", e))?;
    Self::with_connection(conn)
  }

  fn with_connection(conn: Connection) -> Result<Self> {
    conn
      .execute_batch(CACHE_SCHEMA)
      .map_err(|e| eyre!("Failed to run cache migrations: {}", e))?;
    Ok(Self {
      conn: Arc::new(Mutex::new(conn)),
    })
  }

  fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
    self.conn.lock().map_err(|e| eyre!("Lock poisoned: {}", e))
  }

  /// Persistence for one namespace; keys and values are stored as JSON.
  pub fn namespace<K, V>(&self, name: &'static str) -> SqliteNamespace<K, V> {
    SqliteNamespace {
      db: self.clone(),
      name,
      _types: PhantomData,
    }
  }
}

/// One namespace of a `SqliteCache`.
pub struct SqliteNamespace<K, V> {
  db: SqliteCache,
  name: &'static str,
  _types: PhantomData<fn() -> (K, V)>,
}

impl<K, V> Persistence<K, V> for SqliteNamespace<K, V>
where
  K: Serialize + DeserializeOwned,
  V: Serialize + DeserializeOwned,
{
  fn load(&self) -> Result<Vec<(K, CacheEntry<V>)>> {
    let conn = self.db.lock()?;
    let mut stmt = conn
      .prepare("SELECT entry_key, data, created_at FROM cache_entries WHERE namespace = ?")
      .map_err(|e| eyre!("Failed to prepare cache query: {}", e))?;

    let rows = stmt
      .query_map(params![self.name], |row| {
        Ok((
          row.get::<_, String>(0)?,
          row.get::<_, Vec<u8>>(1)?,
          row.get::<_, String>(2)?,
        ))
      })
      .map_err(|e| eyre!("Failed to read cache entries: {}", e))?;

    let mut entries = Vec::new();
    for row in rows {
      let (key, data, created_at) = row.map_err(|e| eyre!("Failed to read cache row: {}", e))?;
      // Rows written by an incompatible build are skipped
      match decode(&key, &data, &created_at) {
        Ok(entry) => entries.push(entry),
        Err(e) => debug!(namespace = self.name, key = %key, error = %e, "Skipping unreadable cache row"),
      }
    }
    Ok(entries)
  }

  fn save(&self, key: &K, entry: &CacheEntry<V>) -> Result<()> {
    let key = serde_json::to_string(key).map_err(|e| eyre!("Failed to serialize cache key: {}", e))?;
    let data =
      serde_json::to_vec(&entry.value).map_err(|e| eyre!("Failed to serialize cache entry: {}", e))?;

    self
      .db
      .lock()?
      .execute(
        "INSERT OR REPLACE INTO cache_entries (namespace, entry_key, data, created_at)
         VALUES (?, ?, ?, ?)",
        params![self.name, key, data, entry.created_at.to_rfc3339()],
      )
      .map_err(|e| eyre!("Failed to store cache entry: {}", e))?;
    Ok(())
  }

  fn delete(&self, keys: &[K]) -> Result<()> {
    let conn = self.db.lock()?;
    for key in keys {
      let key =
        serde_json::to_string(key).map_err(|e| eyre!("Failed to serialize cache key: {}", e))?;
      conn
        .execute(
          "DELETE FROM cache_entries WHERE namespace = ? AND entry_key = ?",
          params![self.name, key],
        )
        .map_err(|e| eyre!("Failed to delete cache entry: {}", e))?;
    }
    Ok(())
  }

  fn clear(&self) -> Result<()> {
    self
      .db
      .lock()?
      .execute("DELETE FROM cache_entries WHERE namespace = ?", params![self.name])
      .map_err(|e| eyre!("Failed to clear cache namespace: {}", e))?;
    Ok(())
  }
}

fn decode<K, V>(key: &str, data: &[u8], created_at: &str) -> Result<(K, CacheEntry<V>)>
where
  K: DeserializeOwned,
  V: DeserializeOwned,
{
  let key = serde_json::from_str(key).map_err(|e| eyre!("bad key: {}", e))?;
  let value = serde_json::from_slice(data).map_err(|e| eyre!("bad data: {}", e))?;
  let created_at = DateTime::parse_from_rfc3339(created_at)
    .map_err(|e| eyre!("bad timestamp: {}", e))?
    .with_timezone(&Utc);
  Ok((key, CacheEntry { value, created_at }))
}
