//! Durable storage for the sync queue.

use color_eyre::{eyre::eyre, Result};

use super::types::SyncQueueItem;
use crate::db::Database;

/// Key under which the serialized queue is stored.
pub const SYNC_QUEUE_KEY: &str = "dashboard-sync-queue";

/// Backing store for the queue. The whole queue is read and written at once.
pub trait QueueStore: Send + Sync + 'static {
  fn load(&self) -> Result<Vec<SyncQueueItem>>;

  fn save(&self, items: &[SyncQueueItem]) -> Result<()>;

  fn clear(&self) -> Result<()>;
}

/// Queue stored as one JSON array in the database key/value table.
#[derive(Clone)]
pub struct SqliteQueueStore {
  db: Database,
}

impl SqliteQueueStore {
  pub fn new(db: Database) -> Self {
    Self { db }
  }
}

impl QueueStore for SqliteQueueStore {
  fn load(&self) -> Result<Vec<SyncQueueItem>> {
    match self.db.get_value(SYNC_QUEUE_KEY)? {
      Some(json) => {
        serde_json::from_str(&json).map_err(|e| eyre!("Failed to parse sync queue: {}", e))
      }
      None => Ok(Vec::new()),
    }
  }

  fn save(&self, items: &[SyncQueueItem]) -> Result<()> {
    let json =
      serde_json::to_string(items).map_err(|e| eyre!("Failed to serialize sync queue: {}", e))?;
    self.db.set_value(SYNC_QUEUE_KEY, &json)
  }

  fn clear(&self) -> Result<()> {
    self.db.remove_value(SYNC_QUEUE_KEY)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::sync::types::{SessionStatus, SyncPayload};

  fn item(session: &str) -> SyncQueueItem {
    SyncQueueItem::new(SyncPayload::StatusUpdate {
      session_id: session.to_string(),
      status: SessionStatus::Expired,
    })
  }

  #[test]
  fn test_empty_queue() {
    let store = SqliteQueueStore::new(Database::open_in_memory().unwrap());
    assert!(store.load().unwrap().is_empty());
  }

  #[test]
  fn test_queue_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("offline.db");
    let items = vec![item("a"), item("b")];

    {
      let store = SqliteQueueStore::new(Database::open(Some(&path)).unwrap());
      store.save(&items).unwrap();
    }

    let store = SqliteQueueStore::new(Database::open(Some(&path)).unwrap());
    assert_eq!(store.load().unwrap(), items);
  }

  #[test]
  fn test_clear() {
    let store = SqliteQueueStore::new(Database::open_in_memory().unwrap());
    store.save(&[item("a")]).unwrap();
    store.clear().unwrap();
    assert!(store.load().unwrap().is_empty());
  }

  #[test]
  fn test_corrupt_queue_is_an_error() {
    let db = Database::open_in_memory().unwrap();
    db.set_value(SYNC_QUEUE_KEY, "{not json").unwrap();
    assert!(SqliteQueueStore::new(db).load().is_err());
  }
}
