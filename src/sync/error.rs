use thiserror::Error;

/// Why a queued operation could not be replayed.
#[derive(Error, Debug)]
pub enum SyncError {
  #[error("Network error: {0}")]
  Network(String),

  #[error("Handler timed out after {0}s")]
  Timeout(u64),

  #[error("Server rejected request with status {status}")]
  Rejected { status: u16 },

  #[error("Invalid request: {0}")]
  Invalid(String),

  #[error("{0}")]
  Internal(String),
}

impl SyncError {
  /// Whether another attempt might succeed. Invalid requests are dropped
  /// without using up retries.
  pub fn is_retryable(&self) -> bool {
    !matches!(self, SyncError::Invalid(_))
  }

  /// Map an HTTP error status from the backend.
  pub fn from_status(status: u16, body: &str) -> Self {
    match status {
      400 | 404 | 409 | 422 => SyncError::Invalid(format!("status {}: {}", status, body.trim())),
      _ => SyncError::Rejected { status },
    }
  }
}

impl From<reqwest::Error> for SyncError {
  fn from(e: reqwest::Error) -> Self {
    if let Some(status) = e.status() {
      SyncError::from_status(status.as_u16(), "")
    } else {
      SyncError::Network(e.to_string())
    }
  }
}
