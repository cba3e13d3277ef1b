//! Online/offline tracking.

use color_eyre::{eyre::eyre, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info};
use url::Url;

/// Shared online flag. Clones observe the same state.
#[derive(Clone)]
pub struct NetworkStatus {
  tx: Arc<watch::Sender<bool>>,
}

impl NetworkStatus {
  pub fn new(online: bool) -> Self {
    let (tx, _) = watch::channel(online);
    Self { tx: Arc::new(tx) }
  }

  pub fn is_online(&self) -> bool {
    *self.tx.borrow()
  }

  /// Update the flag. Returns true when the state actually changed.
  pub fn set_online(&self, online: bool) -> bool {
    let changed = self.tx.send_if_modified(|current| {
      if *current == online {
        false
      } else {
        *current = online;
        true
      }
    });

    if changed {
      info!("Network: {}", if online { "Online" } else { "Offline" });
    }
    changed
  }

  pub fn subscribe(&self) -> watch::Receiver<bool> {
    self.tx.subscribe()
  }
}

/// Periodically checks whether the origin answers and feeds the result into
/// a [`NetworkStatus`].
pub struct ConnectivityProbe {
  client: reqwest::Client,
  url: Url,
  interval: Duration,
  status: NetworkStatus,
}

impl ConnectivityProbe {
  pub fn new(url: Url, interval: Duration, status: NetworkStatus) -> Result<Self> {
    if interval.is_zero() {
      return Err(eyre!("Probe interval must be greater than zero"));
    }

    let client = reqwest::Client::builder()
      .timeout(interval.min(Duration::from_secs(5)))
      .build()
      .map_err(|e| eyre!("Failed to create HTTP client: {}", e))?;

    Ok(Self {
      client,
      url,
      interval,
      status,
    })
  }

  /// Any HTTP response counts as online, whatever its status.
  pub async fn check(&self) -> bool {
    match self.client.head(self.url.clone()).send().await {
      Ok(response) => {
        debug!("Probe {} answered {}", self.url, response.status());
        true
      }
      Err(e) => {
        debug!("Probe {} failed: {}", self.url, e);
        false
      }
    }
  }

  /// Probe once and record the result.
  pub async fn probe(&self) -> bool {
    let online = self.check().await;
    self.status.set_online(online);
    online
  }

  pub fn spawn(self) -> JoinHandle<()> {
    tokio::spawn(async move {
      let mut ticker = tokio::time::interval(self.interval);
      ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
      loop {
        ticker.tick().await;
        self.probe().await;
      }
    })
  }
}
