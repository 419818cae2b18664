//! Cache storage trait with in-memory and SQLite implementations.

use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;

use super::key::QueryKey;
use super::traits::{CacheEntry, EntryStatus};

/// Trait for cache storage backends.
///
/// Storage only holds entries; freshness, coalescing and invalidation live
/// in [`super::QueryCache`], which is the only caller.
pub trait CacheStore: Send + Sync {
  fn get(&self, key: &QueryKey) -> Result<Option<CacheEntry>>;

  /// Insert or replace the entry for `entry.key`.
  fn set(&self, entry: &CacheEntry) -> Result<()>;

  fn remove(&self, key: &QueryKey) -> Result<()>;

  /// Every stored entry, in no particular order.
  fn entries(&self) -> Result<Vec<CacheEntry>>;

  fn clear(&self) -> Result<()>;
}

/// Process-local storage. The default backend.
#[derive(Default)]
pub struct MemoryStore {
  entries: Mutex<HashMap<String, CacheEntry>>,
}

impl MemoryStore {
  pub fn new() -> Self {
    Self::default()
  }

  fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, CacheEntry>>> {
    self.entries.lock().map_err(|e| eyre!("Lock poisoned: {}", e))
  }
}

impl CacheStore for MemoryStore {
  fn get(&self, key: &QueryKey) -> Result<Option<CacheEntry>> {
    Ok(self.lock()?.get(&key.cache_hash()).cloned())
  }

  fn set(&self, entry: &CacheEntry) -> Result<()> {
    self.lock()?.insert(entry.key.cache_hash(), entry.clone());
    Ok(())
  }

  fn remove(&self, key: &QueryKey) -> Result<()> {
    self.lock()?.remove(&key.cache_hash());
    Ok(())
  }

  fn entries(&self) -> Result<Vec<CacheEntry>> {
    Ok(self.lock()?.values().cloned().collect())
  }

  fn clear(&self) -> Result<()> {
    self.lock()?.clear();
    Ok(())
  }
}

/// SQLite-backed storage, so last-known-good results survive restarts.
pub struct SqliteStore {
  conn: Mutex<Connection>,
}

/// Schema for cache tables.
const CACHE_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS query_cache (
    query_hash TEXT PRIMARY KEY,
    query_key TEXT NOT NULL,
    description TEXT NOT NULL,
    payload BLOB,
    fetched_at TEXT,
    freshness_secs INTEGER NOT NULL,
    status TEXT NOT NULL,
    generation INTEGER NOT NULL,
    last_error TEXT
);
"#;

impl SqliteStore {
  /// Open (or create) the cache database at `path`.
  pub fn open(path: &Path) -> Result<Self> {
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
    let conn =
      Connection::open_in_memory().map_err(|e| eyre!("Failed to open in-memory cache: {}", e))?;
    Self::with_connection(conn)
  }

  fn with_connection(conn: Connection) -> Result<Self> {
    conn
      .execute_batch(CACHE_SCHEMA)
      .map_err(|e| eyre!("Failed to run cache migrations: {}", e))?;

    Ok(Self {
      conn: Mutex::new(conn),
    })
  }

  fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
    self.conn.lock().map_err(|e| eyre!("Lock poisoned: {}", e))
  }
}

/// Raw row as read from SQLite, before decoding.
struct Row {
  query_key: String,
  payload: Option<Vec<u8>>,
  fetched_at: Option<String>,
  freshness_secs: i64,
  status: String,
  generation: i64,
  last_error: Option<String>,
}

const SELECT_COLUMNS: &str =
  "SELECT query_key, payload, fetched_at, freshness_secs, status, generation, last_error FROM query_cache";

fn read_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Row> {
  Ok(Row {
    query_key: row.get(0)?,
    payload: row.get(1)?,
    fetched_at: row.get(2)?,
    freshness_secs: row.get(3)?,
    status: row.get(4)?,
    generation: row.get(5)?,
    last_error: row.get(6)?,
  })
}

impl Row {
  fn decode(self) -> Result<CacheEntry> {
    let key: QueryKey = serde_json::from_str(&self.query_key)
      .map_err(|e| eyre!("Failed to deserialize query key: {}", e))?;
    let payload = self
      .payload
      .map(|data| serde_json::from_slice(&data))
      .transpose()
      .map_err(|e| eyre!("Failed to deserialize payload for {}: {}", key, e))?;
    let fetched_at = self.fetched_at.as_deref().map(parse_datetime).transpose()?;
    let status = EntryStatus::parse(&self.status)
      .ok_or_else(|| eyre!("Unknown cache entry status '{}'", self.status))?;

    Ok(CacheEntry {
      key,
      payload,
      fetched_at,
      freshness: Duration::from_secs(self.freshness_secs.max(0) as u64),
      status,
      generation: self.generation.max(0) as u64,
      last_error: self.last_error,
    })
  }
}

impl CacheStore for SqliteStore {
  fn get(&self, key: &QueryKey) -> Result<Option<CacheEntry>> {
    let conn = self.lock()?;
    let sql = format!("{SELECT_COLUMNS} WHERE query_hash = ?");

    let row = conn
      .query_row(&sql, params![key.cache_hash()], read_row)
      .optional()
      .map_err(|e| eyre!("Failed to query cache entry: {}", e))?;

    row.map(Row::decode).transpose()
  }

  fn set(&self, entry: &CacheEntry) -> Result<()> {
    let conn = self.lock()?;
    let query_key =
      serde_json::to_string(&entry.key).map_err(|e| eyre!("Failed to serialize query key: {}", e))?;
    let payload = entry
      .payload
      .as_ref()
      .map(serde_json::to_vec)
      .transpose()
      .map_err(|e| eyre!("Failed to serialize payload: {}", e))?;

    conn
      .execute(
        "INSERT OR REPLACE INTO query_cache
           (query_hash, query_key, description, payload, fetched_at, freshness_secs, status, generation, last_error)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        params![
          entry.key.cache_hash(),
          query_key,
          entry.key.description(),
          payload,
          entry.fetched_at.map(|t| t.to_rfc3339()),
          entry.freshness.as_secs() as i64,
          entry.status.as_str(),
          entry.generation as i64,
          entry.last_error,
        ],
      )
      .map_err(|e| eyre!("Failed to store cache entry: {}", e))?;

    Ok(())
  }

  fn remove(&self, key: &QueryKey) -> Result<()> {
    self
      .lock()?
      .execute(
        "DELETE FROM query_cache WHERE query_hash = ?",
        params![key.cache_hash()],
      )
      .map_err(|e| eyre!("Failed to delete cache entry: {}", e))?;
    Ok(())
  }

  fn entries(&self) -> Result<Vec<CacheEntry>> {
    let conn = self.lock()?;
    let mut stmt = conn
      .prepare(SELECT_COLUMNS)
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let rows: Vec<Row> = stmt
      .query_map([], read_row)
      .map_err(|e| eyre!("Failed to query cache entries: {}", e))?
      .filter_map(|r| r.ok())
      .collect();

    // A row that no longer decodes (older schema, corrupt blob) is skipped.
    Ok(rows.into_iter().filter_map(|r| r.decode().ok()).collect())
  }

  fn clear(&self) -> Result<()> {
    self
      .lock()?
      .execute("DELETE FROM query_cache", [])
      .map_err(|e| eyre!("Failed to clear cache: {}", e))?;
    Ok(())
  }
}

/// Parse an RFC 3339 timestamp as written by `set`.
fn parse_datetime(s: &str) -> Result<DateTime<Utc>> {
  DateTime::parse_from_rfc3339(s)
    .map(|dt| dt.with_timezone(&Utc))
    .map_err(|e| eyre!("Failed to parse datetime '{}': {}", s, e))
}

#[cfg(test)]
mod tests {
  use super::*;
  use pretty_assertions::assert_eq;
  use serde_json::json;

  fn sample(key: QueryKey, generation: u64) -> CacheEntry {
    CacheEntry {
      key,
      payload: Some(json!({"success": true, "data": [{"name": "Cleaning", "count": 3}]})),
      fetched_at: Some(Utc::now()),
      freshness: Duration::from_secs(30),
      status: EntryStatus::Fresh,
      generation,
      last_error: None,
    }
  }

  fn exercise(store: &dyn CacheStore) {
    let a = sample(QueryKey::categories(), 1);
    let b = sample(QueryKey::detail("t1"), 2);
    store.set(&a).unwrap();
    store.set(&b).unwrap();

    let got = store.get(&QueryKey::categories()).unwrap().unwrap();
    assert_eq!(got.payload, a.payload);
    assert_eq!(got.status, EntryStatus::Fresh);
    assert_eq!(got.generation, 1);
    assert_eq!(store.entries().unwrap().len(), 2);

    let mut updated = got.clone();
    updated.status = EntryStatus::Stale;
    store.set(&updated).unwrap();
    assert_eq!(
      store.get(&QueryKey::categories()).unwrap().unwrap().status,
      EntryStatus::Stale
    );

    store.remove(&QueryKey::detail("t1")).unwrap();
    assert!(store.get(&QueryKey::detail("t1")).unwrap().is_none());

    store.clear().unwrap();
    assert!(store.entries().unwrap().is_empty());
  }

  #[test]
  fn test_memory_store() {
    exercise(&MemoryStore::new());
  }

  #[test]
  fn test_sqlite_store() {
    exercise(&SqliteStore::open_in_memory().unwrap());
  }

  #[test]
  fn test_sqlite_store_persists_across_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("cache.db");

    {
      let store = SqliteStore::open(&path).unwrap();
      let mut entry = sample(QueryKey::offers("t9"), 7);
      entry.status = EntryStatus::Error;
      entry.last_error = Some("server unreachable: refused".to_string());
      store.set(&entry).unwrap();
    }

    let store = SqliteStore::open(&path).unwrap();
    let entry = store.get(&QueryKey::offers("t9")).unwrap().unwrap();
    assert_eq!(entry.key, QueryKey::offers("t9"));
    assert_eq!(entry.generation, 7);
    assert_eq!(entry.status, EntryStatus::Error);
    assert_eq!(entry.freshness, Duration::from_secs(30));
    assert!(entry.fetched_at.is_some());
  }

  #[test]
  fn test_entry_without_payload() {
    let store = SqliteStore::open_in_memory().unwrap();
    let mut entry = sample(QueryKey::my_tasks(), 1);
    entry.payload = None;
    entry.fetched_at = None;
    entry.status = EntryStatus::Error;
    store.set(&entry).unwrap();

    let got = store.get(&QueryKey::my_tasks()).unwrap().unwrap();
    assert_eq!(got.payload, None);
    assert_eq!(got.fetched_at, None);
  }
}
