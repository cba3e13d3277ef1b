use color_eyre::{eyre::eyre, Result};
use reqwest::Method;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::cache::{CacheResult, CacheStorage, GatewayResponse, SqliteStorage};
use crate::config::Config;
use crate::db::Database;
use crate::gateway::{BoxFuture, CacheGateway, SyncHook, WorkerState, UPLOAD_QUEUE_TAG};
use crate::http::{GatewayRequest, HttpFetcher};
use crate::network::{ConnectivityProbe, NetworkStatus};
use crate::sync::{
  HttpSyncHandlers, QueueStore, SqliteQueueStore, SyncEvent, SyncHandlers, SyncManager,
  SyncSettings,
};

pub type Gateway = CacheGateway<SqliteStorage, HttpFetcher>;
pub type QueueManager = SyncManager<SqliteQueueStore, HttpSyncHandlers>;

/// Background sync hook that drains `manager` and reports how many items
/// left the queue.
pub fn drain_hook<S: QueueStore, H: SyncHandlers>(manager: &Arc<SyncManager<S, H>>) -> SyncHook {
  let manager = Arc::clone(manager);
  Arc::new(move || -> BoxFuture<usize> {
    let manager = Arc::clone(&manager);
    Box::pin(async move {
      manager
        .drain()
        .await
        .map(|report| report.processed())
        .unwrap_or(0)
    })
  })
}

/// The gateway and the sync queue sharing one database and one view of
/// connectivity.
pub struct App {
  config: Config,
  network: NetworkStatus,
  gateway: Arc<Gateway>,
  manager: Arc<QueueManager>,
}

impl App {
  pub fn new(config: Config) -> Result<Self> {
    let db = Database::open(config.database.as_deref())?;
    Self::with_database(config, db)
  }

  pub fn with_database(config: Config, db: Database) -> Result<Self> {
    // Offline until a probe says otherwise
    let network = NetworkStatus::new(false);

    let handlers = HttpSyncHandlers::new(
      config.origin_url()?,
      Config::get_api_token(),
      config.handler_timeout(),
    )?;
    let manager = Arc::new(SyncManager::new(
      SqliteQueueStore::new(db.clone()),
      handlers,
      network.clone(),
      SyncSettings::from_config(&config),
    ));

    let fetcher = HttpFetcher::new()?.with_network(network.clone());
    let gateway = Gateway::from_config(&config, SqliteStorage::new(db), fetcher)?
      .with_background_sync(drain_hook(&manager));
    if gateway.restore()? {
      debug!("Gateway already installed for this version");
    }

    Ok(Self {
      config,
      network,
      gateway: Arc::new(gateway),
      manager,
    })
  }

  pub fn network(&self) -> &NetworkStatus {
    &self.network
  }

  pub fn gateway(&self) -> &Arc<Gateway> {
    &self.gateway
  }

  pub fn manager(&self) -> &Arc<QueueManager> {
    &self.manager
  }

  fn probe(&self) -> Result<ConnectivityProbe> {
    let url = self
      .config
      .origin_url()?
      .join(&self.config.sync.probe_path)
      .map_err(|e| eyre!("Invalid probe path {}: {}", self.config.sync.probe_path, e))?;
    ConnectivityProbe::new(url, self.config.probe_interval(), self.network.clone())
  }

  /// Decide the initial connectivity. Forced offline skips the probe.
  pub async fn connect(&self, offline: bool) -> Result<bool> {
    if offline {
      self.network.set_online(false);
      return Ok(false);
    }
    Ok(self.probe()?.probe().await)
  }

  /// Route one request through the gateway. Requests the gateway does not
  /// intercept go straight to the network.
  pub async fn fetch(
    &self,
    path: &str,
    method: Method,
    accept: Option<&str>,
  ) -> Result<GatewayResponse> {
    let url = self
      .config
      .origin_url()?
      .join(path)
      .map_err(|e| eyre!("Invalid path {}: {}", path, e))?;
    let mut request = GatewayRequest::new(method, url);
    if let Some(accept) = accept {
      request = request.with_accept(accept);
    }

    if let Some(response) = self.gateway.handle_fetch(&request).await {
      return Ok(response);
    }

    debug!(url = %request.url, "Request not intercepted, passing through");
    let snapshot = self.gateway.layer().fetch_network(&request).await?;
    Ok(CacheResult::from_network(snapshot))
  }

  /// Cache partitions with their entry counts, oldest first.
  pub fn caches(&self) -> Result<Vec<(String, usize)>> {
    let storage = self.gateway.layer().storage();
    storage
      .partition_names()?
      .into_iter()
      .map(|name| {
        let count = storage.entry_count(&name)?;
        Ok((name, count))
      })
      .collect()
  }

  /// Install the gateway if needed, then fire the `upload-queue` background
  /// sync. Runs in its own task so the caller is never held up by a drain.
  fn spawn_reconnect_sync(&self) -> JoinHandle<()> {
    let gateway = Arc::clone(&self.gateway);
    tokio::spawn(async move {
      if gateway.state() != WorkerState::Activated {
        if let Err(e) = gateway.install().await {
          warn!("Gateway install failed: {}", e);
        }
      }
      gateway.handle_sync(UPLOAD_QUEUE_TAG).await;
    })
  }

  /// Monitor connectivity until Ctrl-C. Starting online and every reconnect
  /// fire the `upload-queue` background sync, which drains the queue.
  pub async fn run(&self, offline: bool) -> Result<()> {
    let probe = if offline {
      None
    } else {
      Some(self.probe()?.spawn())
    };

    let mut network = self.network.subscribe();
    let mut online = *network.borrow_and_update();
    if online {
      self.spawn_reconnect_sync();
    }

    let mut sync_events = self.manager.subscribe();
    let mut page = self.gateway.clients().connect();

    info!(
      online,
      pending = self.manager.pending_count(),
      "Running, press Ctrl-C to stop"
    );

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
      tokio::select! {
        result = &mut shutdown => {
          result.map_err(|e| eyre!("Failed to listen for Ctrl-C: {}", e))?;
          info!("Shutting down");
          break;
        }
        changed = network.changed() => {
          if changed.is_err() {
            break;
          }
          let now = *network.borrow_and_update();
          let reconnected = now && !online;
          online = now;
          if reconnected {
            self.spawn_reconnect_sync();
          }
        }
        event = sync_events.recv() => match event {
          Ok(SyncEvent::SyncComplete { synced_count }) => {
            info!(synced_count, "Dashboard sync complete");
          }
          Err(RecvError::Lagged(skipped)) => debug!(skipped, "Missed sync events"),
          Err(RecvError::Closed) => break,
        },
        Some(message) = page.next() => {
          debug!(?message, "Client message");
        }
      }
    }

    if let Some(probe) = probe {
      probe.abort();
    }
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::CacheSource;
  use crate::event::ClientMessage;
  use crate::sync::{SessionStatus, SyncPayload};

  fn test_config(origin: &str) -> Config {
    let mut config = Config::parse(&format!("origin: {}", origin)).unwrap();
    config.cache.precache = vec!["/".to_string()];
    config
  }

  #[tokio::test]
  async fn test_install_then_serve_offline() {
    let mut server = mockito::Server::new_async().await;
    let _root = server
      .mock("GET", "/")
      .with_status(200)
      .with_header("content-type", "text/html")
      .with_body("<h1>KYC Lite</h1>")
      .create_async()
      .await;

    let app = App::with_database(
      test_config(&server.url()),
      Database::open_in_memory().unwrap(),
    )
    .unwrap();

    // Unmatched HEAD still gets an HTTP answer, so the probe reports online
    assert!(app.connect(false).await.unwrap());
    app.gateway().install().await.unwrap();
    assert_eq!(
      app.caches().unwrap(),
      vec![("kyc-lite-static-v2".to_string(), 1)]
    );

    app.network().set_online(false);
    let response = app.fetch("/", Method::GET, Some("text/html")).await.unwrap();
    assert_eq!(response.source, CacheSource::Offline);
    assert_eq!(response.data.text(), "<h1>KYC Lite</h1>");
  }

  #[tokio::test]
  async fn test_fetch_passes_through_before_install() {
    let mut server = mockito::Server::new_async().await;
    let _api = server
      .mock("GET", "/api/sessions")
      .with_status(200)
      .with_body("[]")
      .create_async()
      .await;

    let app = App::with_database(
      test_config(&server.url()),
      Database::open_in_memory().unwrap(),
    )
    .unwrap();
    app.network().set_online(true);

    let response = app.fetch("/api/sessions", Method::GET, None).await.unwrap();
    assert_eq!(response.source, CacheSource::Network);
    assert_eq!(response.data.text(), "[]");
    assert!(app.caches().unwrap().is_empty());
  }

  #[tokio::test]
  async fn test_reconnect_sync_installs_and_drains() {
    let mut server = mockito::Server::new_async().await;
    let _root = server
      .mock("GET", "/")
      .with_status(200)
      .with_body("<h1>KYC Lite</h1>")
      .create_async()
      .await;
    let status = server
      .mock("PUT", "/api/sessions/s-9/status")
      .with_status(200)
      .create_async()
      .await;

    let app = App::with_database(
      test_config(&server.url()),
      Database::open_in_memory().unwrap(),
    )
    .unwrap();

    app
      .manager()
      .enqueue(SyncPayload::StatusUpdate {
        session_id: "s-9".to_string(),
        status: SessionStatus::Expired,
      })
      .await;
    let mut page = app.gateway().clients().connect();

    app.network().set_online(true);
    app.spawn_reconnect_sync().await.unwrap();

    status.assert_async().await;
    assert_eq!(app.gateway().state(), WorkerState::Activated);
    assert_eq!(app.manager().pending_count(), 0);

    let mut messages = Vec::new();
    while let Some(message) = page.try_next() {
      messages.push(message);
    }
    assert!(matches!(
      messages.last(),
      Some(ClientMessage::UploadQueueProcessed { .. })
    ));
  }

  #[tokio::test]
  async fn test_upload_queue_sync_drains_manager() {
    let mut server = mockito::Server::new_async().await;
    let status = server
      .mock("PUT", "/api/sessions/s-1/status")
      .with_status(200)
      .create_async()
      .await;

    let app = App::with_database(
      test_config(&server.url()),
      Database::open_in_memory().unwrap(),
    )
    .unwrap();

    app
      .manager()
      .enqueue(SyncPayload::StatusUpdate {
        session_id: "s-1".to_string(),
        status: SessionStatus::Completed,
      })
      .await;
    assert_eq!(app.manager().pending_count(), 1);

    let mut page = app.gateway().clients().connect();
    assert!(app.gateway().handle_sync(UPLOAD_QUEUE_TAG).await);

    status.assert_async().await;
    assert_eq!(app.manager().pending_count(), 0);
    assert!(page.try_next().is_some());
  }
}
