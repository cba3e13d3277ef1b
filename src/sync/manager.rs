use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, Mutex};
use tracing::{debug, error, info, warn};

use super::error::SyncError;
use super::handlers::SyncHandlers;
use super::store::QueueStore;
use super::types::{SyncPayload, SyncQueueItem};
use crate::config::Config;
use crate::network::NetworkStatus;

/// Tunables for the sync queue
#[derive(Debug, Clone)]
pub struct SyncSettings {
  /// Failed attempts after which an item is dropped
  pub max_retries: u32,
  /// Upper bound for a single handler call
  pub handler_timeout: Option<Duration>,
  /// Delay before the first drain when `initialize` runs while online
  pub startup_delay: Duration,
}

impl Default for SyncSettings {
  fn default() -> Self {
    Self {
      max_retries: 3,
      handler_timeout: Some(Duration::from_secs(30)),
      startup_delay: Duration::from_secs(1),
    }
  }
}

impl SyncSettings {
  pub fn from_config(config: &Config) -> Self {
    Self {
      max_retries: config.sync.max_retries,
      handler_timeout: Some(config.handler_timeout()),
      startup_delay: config.startup_delay(),
    }
  }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncEvent {
  /// A drain removed items from the queue (synced or given up on)
  SyncComplete { synced_count: usize },
}

/// Outcome of a drain
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainReport {
  pub synced: usize,
  pub dropped: usize,
  pub retained: usize,
}

impl DrainReport {
  /// Items removed from the queue
  pub fn processed(&self) -> usize {
    self.synced + self.dropped
  }

  fn absorb(&mut self, pass: DrainReport) {
    self.synced += pass.synced;
    self.dropped += pass.dropped;
    self.retained += pass.retained;
  }
}

/// Clears the in-flight flag when a drain ends, however it ends.
struct DrainGuard<'a>(&'a AtomicBool);

impl Drop for DrainGuard<'_> {
  fn drop(&mut self) {
    self.0.store(false, Ordering::SeqCst);
  }
}

/// Persisted queue of mutating dashboard operations, replayed in order once
/// the backend is reachable.
pub struct SyncManager<S: QueueStore, H: SyncHandlers> {
  store: S,
  handlers: H,
  network: NetworkStatus,
  settings: SyncSettings,
  draining: AtomicBool,
  /// A drain was skipped while another was running
  rerun: AtomicBool,
  initialized: AtomicBool,
  /// Serializes read-modify-write cycles on the persisted queue
  queue_lock: Mutex<()>,
  events: broadcast::Sender<SyncEvent>,
}

impl<S: QueueStore, H: SyncHandlers> SyncManager<S, H> {
  pub fn new(store: S, handlers: H, network: NetworkStatus, settings: SyncSettings) -> Self {
    let (events, _) = broadcast::channel(16);
    Self {
      store,
      handlers,
      network,
      settings,
      draining: AtomicBool::new(false),
      rerun: AtomicBool::new(false),
      initialized: AtomicBool::new(false),
      queue_lock: Mutex::new(()),
      events,
    }
  }

  /// Sync-complete notifications
  pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
    self.events.subscribe()
  }

  /// Append an operation to the queue and return its id. When online the
  /// queue is drained before returning.
  pub async fn enqueue(&self, payload: SyncPayload) -> String {
    let item = SyncQueueItem::new(payload);
    let id = item.id.clone();
    let kind = item.kind();

    {
      let _lock = self.queue_lock.lock().await;
      let mut queue = self.load_queue().unwrap_or_default();
      queue.push(item);
      if let Err(e) = self.store.save(&queue) {
        error!("Failed to persist sync queue: {}", e);
      }
    }
    info!("Queued {} as {}", kind, id);

    if self.network.is_online() {
      self.drain().await;
    }

    id
  }

  /// Replay the queue front to back. Returns `None` if another drain is
  /// already running; that drain then makes one more pass so items queued
  /// in the meantime are not left behind.
  pub async fn drain(&self) -> Option<DrainReport> {
    let mut total: Option<DrainReport> = None;
    let mut seen = HashSet::new();

    loop {
      // Set before trying the flag so a running drain always sees it
      self.rerun.store(true, Ordering::SeqCst);
      if self
        .draining
        .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
        .is_err()
      {
        debug!("Sync already in progress, requested another pass");
        return total;
      }

      let mut report = total.unwrap_or_default();
      {
        let _guard = DrainGuard(&self.draining);
        while self.rerun.swap(false, Ordering::SeqCst) {
          report.absorb(self.drain_pass(&mut seen).await);
        }
      }
      total = Some(report);

      if !self.rerun.load(Ordering::SeqCst) {
        return total;
      }
    }
  }

  /// One pass over the items not yet attempted by the current drain.
  async fn drain_pass(&self, seen: &mut HashSet<String>) -> DrainReport {
    let snapshot: Vec<SyncQueueItem> = {
      let _lock = self.queue_lock.lock().await;
      self
        .load_queue()
        .unwrap_or_default()
        .into_iter()
        .filter(|item| seen.insert(item.id.clone()))
        .collect()
    };
    if snapshot.is_empty() {
      return DrainReport::default();
    }

    info!("Processing {} queued sync items", snapshot.len());

    let mut report = DrainReport::default();
    let mut removed = HashSet::new();
    let mut retries = HashMap::new();

    for item in &snapshot {
      match self.dispatch(item).await {
        Ok(()) => {
          debug!("Synced {} {}", item.kind(), item.id);
          report.synced += 1;
          removed.insert(item.id.clone());
        }
        Err(e) => {
          let attempts = item.retry_count + 1;
          if !e.is_retryable() || attempts >= self.settings.max_retries {
            error!(
              "Dropping {} {} after {} attempts: {}",
              item.kind(),
              item.id,
              attempts,
              e
            );
            report.dropped += 1;
            removed.insert(item.id.clone());
          } else {
            warn!("Failed to sync {} {}: {}", item.kind(), item.id, e);
            report.retained += 1;
            retries.insert(item.id.clone(), attempts);
          }
        }
      }
    }

    self.commit(&removed, &retries).await;

    if report.processed() > 0 {
      info!(
        "Sync complete: {} synced, {} dropped, {} pending",
        report.synced, report.dropped, report.retained
      );
      // No subscribers is fine
      let _ = self.events.send(SyncEvent::SyncComplete {
        synced_count: report.processed(),
      });
    }

    report
  }

  /// Write back the outcome of a pass. Reloads first so items enqueued
  /// while handlers were running are kept.
  async fn commit(&self, removed: &HashSet<String>, retries: &HashMap<String, u32>) {
    let _lock = self.queue_lock.lock().await;
    let Some(mut queue) = self.load_queue() else {
      return;
    };

    queue.retain(|item| !removed.contains(&item.id));
    for item in queue.iter_mut() {
      if let Some(&count) = retries.get(&item.id) {
        item.retry_count = count;
      }
    }

    if let Err(e) = self.store.save(&queue) {
      error!("Failed to persist sync queue: {}", e);
    }
  }

  async fn dispatch(&self, item: &SyncQueueItem) -> Result<(), SyncError> {
    let call = async {
      match &item.payload {
        SyncPayload::ReviewSubmission {
          session_id,
          review_action,
        } => self.handlers.submit_review(session_id, review_action).await,
        SyncPayload::StatusUpdate { session_id, status } => {
          self.handlers.update_status(session_id, *status).await
        }
        SyncPayload::BulkAction {
          action,
          session_ids,
        } => self.handlers.bulk_action(action, session_ids).await,
      }
    };

    match self.settings.handler_timeout {
      Some(limit) => tokio::time::timeout(limit, call)
        .await
        .map_err(|_| SyncError::Timeout(limit.as_secs()))?,
      None => call.await,
    }
  }

  fn load_queue(&self) -> Option<Vec<SyncQueueItem>> {
    match self.store.load() {
      Ok(queue) => Some(queue),
      Err(e) => {
        error!("Error reading sync queue: {}", e);
        None
      }
    }
  }

  /// Number of queued operations
  pub fn pending_count(&self) -> usize {
    self.pending_items().len()
  }

  pub fn pending_items(&self) -> Vec<SyncQueueItem> {
    self.load_queue().unwrap_or_default()
  }

  /// Drop everything in the queue.
  pub async fn reset(&self) {
    let _lock = self.queue_lock.lock().await;
    match self.store.clear() {
      Ok(()) => info!("Sync queue cleared"),
      Err(e) => error!("Failed to clear sync queue: {}", e),
    }
  }

  /// Start draining on every offline to online transition, and once after
  /// the startup delay if already online. Only the first call registers;
  /// later calls return false.
  pub fn initialize(self: &Arc<Self>) -> bool {
    if self.initialized.swap(true, Ordering::AcqRel) {
      return false;
    }

    let mut rx = self.network.subscribe();
    let mut online = *rx.borrow_and_update();
    let manager = Arc::downgrade(self);
    tokio::spawn(async move {
      while rx.changed().await.is_ok() {
        let now = *rx.borrow_and_update();
        let reconnected = now && !online;
        online = now;
        if !reconnected {
          continue;
        }

        let Some(manager) = manager.upgrade() else {
          break;
        };
        info!("Back online, processing sync queue");
        manager.drain().await;
      }
    });

    if online {
      let manager = Arc::downgrade(self);
      let delay = self.settings.startup_delay;
      tokio::spawn(async move {
        tokio::time::sleep(delay).await;
        if let Some(manager) = manager.upgrade() {
          manager.drain().await;
        }
      });
    }

    true
  }
}
