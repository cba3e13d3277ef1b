//! Handlers that replay queued operations against the KYC backend.

use color_eyre::{eyre::eyre, Result};
use reqwest::RequestBuilder;
use serde_json::json;
use std::future::Future;
use std::time::Duration;
use url::Url;

use super::error::SyncError;
use super::types::{ReviewAction, SessionStatus};

/// One handler per queue item type. Any error counts as a failed attempt.
pub trait SyncHandlers: Send + Sync + 'static {
  fn submit_review(
    &self,
    session_id: &str,
    action: &ReviewAction,
  ) -> impl Future<Output = Result<(), SyncError>> + Send;

  fn update_status(
    &self,
    session_id: &str,
    status: SessionStatus,
  ) -> impl Future<Output = Result<(), SyncError>> + Send;

  fn bulk_action(
    &self,
    action: &str,
    session_ids: &[String],
  ) -> impl Future<Output = Result<(), SyncError>> + Send;
}

/// Handlers backed by the dashboard HTTP API.
#[derive(Clone)]
pub struct HttpSyncHandlers {
  client: reqwest::Client,
  origin: Url,
  token: Option<String>,
}

impl HttpSyncHandlers {
  pub fn new(origin: Url, token: Option<String>, timeout: Duration) -> Result<Self> {
    if origin.cannot_be_a_base() {
      return Err(eyre!("Origin cannot be a base URL: {}", origin));
    }

    let client = reqwest::Client::builder()
      .timeout(timeout)
      .user_agent(concat!("kyc-lite-offline/", env!("CARGO_PKG_VERSION")))
      .build()
      .map_err(|e| eyre!("Failed to create HTTP client: {}", e))?;

    Ok(Self {
      client,
      origin,
      token,
    })
  }

  fn endpoint(&self, segments: &[&str]) -> Result<Url, SyncError> {
    let mut url = self.origin.clone();
    url
      .path_segments_mut()
      .map_err(|_| SyncError::Internal(format!("Origin cannot be a base URL: {}", self.origin)))?
      .pop_if_empty()
      .extend(segments);
    Ok(url)
  }

  fn authorized(&self, builder: RequestBuilder) -> RequestBuilder {
    match &self.token {
      Some(token) => builder.bearer_auth(token),
      None => builder,
    }
  }
}

async fn send(builder: RequestBuilder) -> Result<(), SyncError> {
  let response = builder.send().await?;
  let status = response.status();
  if status.is_success() {
    return Ok(());
  }

  let body = response.text().await.unwrap_or_default();
  Err(SyncError::from_status(status.as_u16(), &body))
}

impl SyncHandlers for HttpSyncHandlers {
  fn submit_review(
    &self,
    session_id: &str,
    action: &ReviewAction,
  ) -> impl Future<Output = Result<(), SyncError>> + Send {
    let request = self
      .endpoint(&["api", "applications", session_id, "review"])
      .map(|url| self.authorized(self.client.post(url)).json(action));
    async move { send(request?).await }
  }

  fn update_status(
    &self,
    session_id: &str,
    status: SessionStatus,
  ) -> impl Future<Output = Result<(), SyncError>> + Send {
    let request = self
      .endpoint(&["api", "sessions", session_id, "status"])
      .map(|url| {
        self
          .authorized(self.client.put(url))
          .json(&json!({ "status": status }))
      });
    async move { send(request?).await }
  }

  fn bulk_action(
    &self,
    action: &str,
    session_ids: &[String],
  ) -> impl Future<Output = Result<(), SyncError>> + Send {
    let request = self.endpoint(&["api", "applications", "bulk"]).map(|url| {
      self
        .authorized(self.client.post(url))
        .json(&json!({ "action": action, "sessionIds": session_ids }))
    });
    async move { send(request?).await }
  }
}
