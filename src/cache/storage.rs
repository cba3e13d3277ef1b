//! Cache storage trait and SQLite implementation.

use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, OptionalExtension};

use crate::db::{parse_datetime, Database};
use crate::http::ResponseSnapshot;

/// A response snapshot read back from a partition.
#[derive(Debug, Clone)]
pub struct CachedResponse {
  /// The stored response
  pub snapshot: ResponseSnapshot,
  /// Partition the snapshot was found in
  pub partition: String,
  /// When the snapshot was written
  pub cached_at: DateTime<Utc>,
}

/// Trait for cache storage backends.
///
/// A backend holds any number of named partitions, each mapping request keys
/// to at most one response snapshot.
pub trait CacheStorage: Send + Sync + 'static {
  /// Create the partition if it does not exist yet.
  fn open_partition(&self, name: &str) -> Result<()>;

  /// Names of all partitions, in creation order.
  fn partition_names(&self) -> Result<Vec<String>>;

  /// Delete a partition and its entries. Returns whether it existed.
  fn delete_partition(&self, name: &str) -> Result<bool>;

  /// Look up a key in one partition.
  fn get(&self, partition: &str, key: &str) -> Result<Option<CachedResponse>>;

  /// Look up a key across all partitions, first hit in creation order.
  fn find(&self, key: &str) -> Result<Option<CachedResponse>>;

  /// Store a snapshot, replacing any previous one for the same key.
  /// Opens the partition if needed.
  fn put(&self, partition: &str, key: &str, snapshot: &ResponseSnapshot) -> Result<()>;

  /// Number of entries in a partition.
  fn entry_count(&self, partition: &str) -> Result<usize>;
}

/// SQLite-based cache storage implementation.
#[derive(Clone)]
pub struct SqliteStorage {
  db: Database,
}

impl SqliteStorage {
  pub fn new(db: Database) -> Self {
    Self { db }
  }

  /// Storage over a fresh in-memory database.
  pub fn open_in_memory() -> Result<Self> {
    Ok(Self::new(Database::open_in_memory()?))
  }
}

type EntryRow = (String, u16, String, Vec<u8>, String);

fn row_to_cached(row: EntryRow) -> Result<CachedResponse> {
  let (partition, status, headers, body, cached_at) = row;
  let headers: Vec<(String, String)> = serde_json::from_str(&headers)
    .map_err(|e| eyre!("Failed to deserialize cached headers: {}", e))?;
  Ok(CachedResponse {
    snapshot: ResponseSnapshot {
      status,
      headers,
      body,
    },
    partition,
    cached_at: parse_datetime(&cached_at)?,
  })
}

impl CacheStorage for SqliteStorage {
  fn open_partition(&self, name: &str) -> Result<()> {
    let conn = self.db.conn()?;
    conn
      .execute(
        "INSERT OR IGNORE INTO cache_partitions (name) VALUES (?)",
        params![name],
      )
      .map_err(|e| eyre!("Failed to open cache partition {}: {}", name, e))?;
    Ok(())
  }

  fn partition_names(&self) -> Result<Vec<String>> {
    let conn = self.db.conn()?;
    let mut stmt = conn
      .prepare("SELECT name FROM cache_partitions ORDER BY rowid")
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let names = stmt
      .query_map([], |row| row.get(0))
      .map_err(|e| eyre!("Failed to list cache partitions: {}", e))?
      .filter_map(|r| r.ok())
      .collect();

    Ok(names)
  }

  fn delete_partition(&self, name: &str) -> Result<bool> {
    let conn = self.db.conn()?;

    conn
      .execute("BEGIN TRANSACTION", [])
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    let result = conn
      .execute(
        "DELETE FROM cache_entries WHERE partition_name = ?",
        params![name],
      )
      .and_then(|_| {
        conn.execute(
          "DELETE FROM cache_partitions WHERE name = ?",
          params![name],
        )
      });

    match result {
      Ok(deleted) => {
        conn
          .execute("COMMIT", [])
          .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;
        Ok(deleted > 0)
      }
      Err(e) => {
        let _ = conn.execute("ROLLBACK", []);
        Err(eyre!("Failed to delete cache partition {}: {}", name, e))
      }
    }
  }

  fn get(&self, partition: &str, key: &str) -> Result<Option<CachedResponse>> {
    let conn = self.db.conn()?;

    let row: Option<EntryRow> = conn
      .query_row(
        "SELECT partition_name, status, headers, body, cached_at FROM cache_entries
         WHERE partition_name = ? AND request_key = ?",
        params![partition, key],
        |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?)),
      )
      .optional()
      .map_err(|e| eyre!("Failed to read cache entry {}: {}", key, e))?;

    row.map(row_to_cached).transpose()
  }

  fn find(&self, key: &str) -> Result<Option<CachedResponse>> {
    let conn = self.db.conn()?;

    let row: Option<EntryRow> = conn
      .query_row(
        "SELECT e.partition_name, e.status, e.headers, e.body, e.cached_at FROM cache_entries e
         INNER JOIN cache_partitions p ON p.name = e.partition_name
         WHERE e.request_key = ?
         ORDER BY p.rowid
         LIMIT 1",
        params![key],
        |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?)),
      )
      .optional()
      .map_err(|e| eyre!("Failed to match cache entry {}: {}", key, e))?;

    row.map(row_to_cached).transpose()
  }

  fn put(&self, partition: &str, key: &str, snapshot: &ResponseSnapshot) -> Result<()> {
    let headers = serde_json::to_string(&snapshot.headers)
      .map_err(|e| eyre!("Failed to serialize headers: {}", e))?;

    let conn = self.db.conn()?;
    conn
      .execute(
        "INSERT OR IGNORE INTO cache_partitions (name) VALUES (?)",
        params![partition],
      )
      .map_err(|e| eyre!("Failed to open cache partition {}: {}", partition, e))?;

    conn
      .execute(
        "INSERT OR REPLACE INTO cache_entries (partition_name, request_key, status, headers, body, cached_at)
         VALUES (?, ?, ?, ?, ?, datetime('now'))",
        params![partition, key, snapshot.status, headers, snapshot.body],
      )
      .map_err(|e| eyre!("Failed to store cache entry {}: {}", key, e))?;

    Ok(())
  }

  fn entry_count(&self, partition: &str) -> Result<usize> {
    let conn = self.db.conn()?;
    let count: i64 = conn
      .query_row(
        "SELECT COUNT(*) FROM cache_entries WHERE partition_name = ?",
        params![partition],
        |row| row.get(0),
      )
      .map_err(|e| eyre!("Failed to count cache entries: {}", e))?;
    Ok(count as usize)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  const KEY: &str = "https://kyc.test/manifest.json";

  #[test]
  fn test_put_replaces_snapshot() {
    let storage = SqliteStorage::open_in_memory().unwrap();
    storage.put("static", KEY, &ResponseSnapshot::new(200, "first")).unwrap();
    storage.put("static", KEY, &ResponseSnapshot::new(200, "second")).unwrap();

    let cached = storage.get("static", KEY).unwrap().unwrap();
    assert_eq!(cached.snapshot.text(), "second");
    assert_eq!(storage.entry_count("static").unwrap(), 1);
  }

  #[test]
  fn test_partitions_are_disjoint() {
    let storage = SqliteStorage::open_in_memory().unwrap();
    storage.put("static", KEY, &ResponseSnapshot::new(200, "s")).unwrap();

    assert!(storage.get("dynamic", KEY).unwrap().is_none());
    assert!(storage.get("static", KEY).unwrap().is_some());
  }

  #[test]
  fn test_find_uses_creation_order() {
    let storage = SqliteStorage::open_in_memory().unwrap();
    storage.open_partition("static").unwrap();
    storage.open_partition("dynamic").unwrap();
    storage.put("dynamic", KEY, &ResponseSnapshot::new(200, "dynamic")).unwrap();
    storage.put("static", KEY, &ResponseSnapshot::new(200, "static")).unwrap();

    let found = storage.find(KEY).unwrap().unwrap();
    assert_eq!(found.partition, "static");
    assert_eq!(found.snapshot.text(), "static");
    assert!(storage.find("https://kyc.test/missing").unwrap().is_none());
  }

  #[test]
  fn test_headers_roundtrip() {
    let storage = SqliteStorage::open_in_memory().unwrap();
    let snapshot = ResponseSnapshot::new(200, vec![0u8, 159, 146, 150])
      .with_header("content-type", "image/png");
    storage.put("static", KEY, &snapshot).unwrap();

    let cached = storage.get("static", KEY).unwrap().unwrap();
    assert_eq!(cached.snapshot, snapshot);
  }

  #[test]
  fn test_delete_partition() {
    let storage = SqliteStorage::open_in_memory().unwrap();
    storage.put("old", KEY, &ResponseSnapshot::new(200, "x")).unwrap();
    storage.open_partition("new").unwrap();

    assert!(storage.delete_partition("old").unwrap());
    assert!(!storage.delete_partition("old").unwrap());
    assert_eq!(storage.partition_names().unwrap(), vec!["new".to_string()]);
    assert!(storage.find(KEY).unwrap().is_none());
  }
}
