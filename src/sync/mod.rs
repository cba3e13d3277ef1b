//! Offline queue for dashboard mutations.
//!
//! Operations made while the backend is unreachable are persisted and
//! replayed in FIFO order once connectivity returns.

mod error;
mod handlers;
mod manager;
mod store;
mod types;

pub use error::SyncError;
pub use handlers::{HttpSyncHandlers, SyncHandlers};
pub use manager::{DrainReport, SyncEvent, SyncManager, SyncSettings};
pub use store::{QueueStore, SqliteQueueStore, SYNC_QUEUE_KEY};
pub use types::{
  DocType, ReviewAction, ReviewDecision, RiskAssessment, RiskLevel, SessionStatus, SyncKind,
  SyncPayload, SyncQueueItem,
};
