//! Queue item and dashboard payload types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::atomic::{AtomicU64, Ordering};

/// Document kinds collected during intake
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DocType {
  AadhaarFront,
  AadhaarBack,
  Pan,
  Selfie,
}

/// Reviewer verdict on an application
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReviewDecision {
  Approve,
  Reject,
  RequestDocuments,
}

impl std::str::FromStr for ReviewDecision {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.to_ascii_uppercase().replace('-', "_").as_str() {
      "APPROVE" => Ok(Self::Approve),
      "REJECT" => Ok(Self::Reject),
      "REQUEST_DOCUMENTS" => Ok(Self::RequestDocuments),
      other => Err(format!("unknown review decision: {}", other)),
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RiskLevel {
  Low,
  Medium,
  High,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskAssessment {
  pub score: f64,
  pub level: RiskLevel,
  pub factors: Vec<String>,
}

/// A review submitted from the admin dashboard
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewAction {
  /// Backend id, present once the review has been stored server-side
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub id: Option<i64>,
  pub session_id: String,
  pub reviewer_id: String,
  pub action: ReviewDecision,
  pub comments: String,
  pub timestamp: DateTime<Utc>,
  #[serde(default)]
  pub documents_reviewed: Vec<DocType>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub risk_assessment: Option<RiskAssessment>,
}

/// Status of a KYC intake session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionStatus {
  Active,
  Completed,
  Expired,
}

impl std::str::FromStr for SessionStatus {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.to_ascii_uppercase().as_str() {
      "ACTIVE" => Ok(Self::Active),
      "COMPLETED" => Ok(Self::Completed),
      "EXPIRED" => Ok(Self::Expired),
      other => Err(format!("unknown session status: {}", other)),
    }
  }
}

/// Kind of deferred operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncKind {
  ReviewSubmission,
  StatusUpdate,
  BulkAction,
}

impl std::fmt::Display for SyncKind {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    let s = match self {
      SyncKind::ReviewSubmission => "REVIEW_SUBMISSION",
      SyncKind::StatusUpdate => "STATUS_UPDATE",
      SyncKind::BulkAction => "BULK_ACTION",
    };
    f.write_str(s)
  }
}

/// A deferred operation; the variant is the item's `type` and its fields
/// the `data`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SyncPayload {
  #[serde(rename_all = "camelCase")]
  ReviewSubmission {
    session_id: String,
    review_action: ReviewAction,
  },
  #[serde(rename_all = "camelCase")]
  StatusUpdate {
    session_id: String,
    status: SessionStatus,
  },
  #[serde(rename_all = "camelCase")]
  BulkAction {
    action: String,
    session_ids: Vec<String>,
  },
}

impl SyncPayload {
  pub fn kind(&self) -> SyncKind {
    match self {
      SyncPayload::ReviewSubmission { .. } => SyncKind::ReviewSubmission,
      SyncPayload::StatusUpdate { .. } => SyncKind::StatusUpdate,
      SyncPayload::BulkAction { .. } => SyncKind::BulkAction,
    }
  }
}

/// One entry of the persisted sync queue
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncQueueItem {
  pub id: String,
  #[serde(flatten)]
  pub payload: SyncPayload,
  #[serde(alias = "timestamp")]
  pub enqueued_at: DateTime<Utc>,
  pub retry_count: u32,
}

impl SyncQueueItem {
  pub fn new(payload: SyncPayload) -> Self {
    let now = Utc::now();
    Self {
      id: new_item_id(now),
      payload,
      enqueued_at: now,
      retry_count: 0,
    }
  }

  pub fn kind(&self) -> SyncKind {
    self.payload.kind()
  }
}

static ID_COUNTER: AtomicU64 = AtomicU64::new(0);

/// `sync-<millis>-<9 hex chars>`
fn new_item_id(now: DateTime<Utc>) -> String {
  let count = ID_COUNTER.fetch_add(1, Ordering::Relaxed);

  let mut hasher = Sha256::new();
  hasher.update(now.timestamp_nanos_opt().unwrap_or_default().to_le_bytes());
  hasher.update(count.to_le_bytes());
  hasher.update(std::process::id().to_le_bytes());
  let suffix = hex::encode(hasher.finalize());

  format!("sync-{}-{}", now.timestamp_millis(), &suffix[..9])
}
