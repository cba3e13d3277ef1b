//! Request-intercepting cache gateway.
//!
//! Mirrors a service worker: it is installed (precaching the app shell),
//! activated (dropping partitions of other versions and claiming clients),
//! and from then on answers intercepted GET requests using one of four
//! caching strategies picked by [`Classifier`].

mod classify;
mod notify;

pub use classify::{is_under, Classifier, RequestClass};
pub use notify::{LogNotifier, Notification, Notifier};

use chrono::Utc;
use color_eyre::{eyre::eyre, Result};
use reqwest::Method;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use url::Url;

use crate::cache::{CacheLayer, CacheStorage, GatewayResponse, SqliteStorage};
use crate::config::Config;
use crate::event::{ClientMessage, Clients};
use crate::http::{Fetcher, GatewayRequest};

/// Tag of the background sync that replays the offline queue.
pub const UPLOAD_QUEUE_TAG: &str = "upload-queue";

/// A boxed future, as returned by the background sync hook
pub type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send>>;

/// Called when the `upload-queue` sync fires; resolves to the number of
/// queue items processed.
pub type SyncHook = Arc<dyn Fn() -> BoxFuture<usize> + Send + Sync>;

/// Lifecycle of the gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
  Parsed,
  Installing,
  Installed,
  Activating,
  /// Controlling clients and intercepting requests
  Activated,
  /// Install failed; never intercepts
  Redundant,
}

pub struct CacheGateway<S: CacheStorage, F: Fetcher> {
  layer: CacheLayer<S, F>,
  classifier: Classifier,
  /// Scope root; precache paths and fallbacks resolve against it
  origin: Url,
  precache: Vec<String>,
  admin_section: String,
  state: Mutex<WorkerState>,
  clients: Arc<Clients>,
  notifier: Arc<dyn Notifier>,
  background_sync: Option<SyncHook>,
}

impl<F: Fetcher> CacheGateway<SqliteStorage, F> {
  /// Build a gateway from configuration.
  pub fn from_config(config: &Config, storage: SqliteStorage, fetcher: F) -> Result<Self> {
    let layer = CacheLayer::new(storage, fetcher, config.cache_names())
      .with_timeout(config.network_timeout());
    let classifier = Classifier::new(
      config.cache.api_prefixes.clone(),
      config.cache.admin_routes.clone(),
    );

    Ok(
      Self::new(layer, config.origin_url()?, classifier)
        .with_precache(config.cache.precache.clone())
        .with_admin_section(&config.cache.admin_section),
    )
  }
}

impl<S: CacheStorage, F: Fetcher> CacheGateway<S, F> {
  pub fn new(layer: CacheLayer<S, F>, origin: Url, classifier: Classifier) -> Self {
    Self {
      layer,
      classifier,
      origin,
      precache: Vec::new(),
      admin_section: "/dashboard".to_string(),
      state: Mutex::new(WorkerState::Parsed),
      clients: Arc::new(Clients::new()),
      notifier: Arc::new(LogNotifier),
      background_sync: None,
    }
  }

  /// Paths fetched into the static partition on install.
  pub fn with_precache(mut self, paths: Vec<String>) -> Self {
    self.precache = paths;
    self
  }

  pub fn with_admin_section(mut self, section: &str) -> Self {
    self.admin_section = section.to_string();
    self
  }

  pub fn with_clients(mut self, clients: Arc<Clients>) -> Self {
    self.clients = clients;
    self
  }

  pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
    self.notifier = notifier;
    self
  }

  /// Hook run by the `upload-queue` background sync.
  pub fn with_background_sync(mut self, hook: SyncHook) -> Self {
    self.background_sync = Some(hook);
    self
  }

  pub fn state(&self) -> WorkerState {
    self
      .state
      .lock()
      .map(|s| *s)
      .unwrap_or(WorkerState::Redundant)
  }

  fn set_state(&self, state: WorkerState) {
    if let Ok(mut current) = self.state.lock() {
      tracing::debug!(from = ?*current, to = ?state, "Gateway state change");
      *current = state;
    }
  }

  pub fn clients(&self) -> &Arc<Clients> {
    &self.clients
  }

  pub fn layer(&self) -> &CacheLayer<S, F> {
    &self.layer
  }

  /// Resume control when a previous process already installed this version.
  /// Returns whether the gateway is now active.
  pub fn restore(&self) -> Result<bool> {
    let names = self.layer.storage().partition_names()?;
    if names.iter().any(|n| *n == self.layer.names().static_name) {
      self.set_state(WorkerState::Activated);
      Ok(true)
    } else {
      Ok(false)
    }
  }

  /// Install: precache the manifest into the static partition, then skip
  /// waiting and activate. Any precache failure leaves the gateway redundant.
  pub async fn install(&self) -> Result<()> {
    self.set_state(WorkerState::Installing);
    tracing::info!("Gateway: Installing...");

    let previous_version = match self.precache_assets().await {
      Ok(previous) => previous,
      Err(e) => {
        self.set_state(WorkerState::Redundant);
        return Err(e);
      }
    };

    self.set_state(WorkerState::Installed);
    if previous_version {
      tracing::info!("Gateway: update available");
      self.clients.post_all(ClientMessage::UpdateAvailable);
    }

    self.activate().await
  }

  /// Returns whether partitions of another version were present.
  async fn precache_assets(&self) -> Result<bool> {
    let storage = self.layer.storage();
    let names = self.layer.names();

    let previous_version = storage
      .partition_names()?
      .iter()
      .any(|n| !names.is_current(n));

    let urls = self
      .precache
      .iter()
      .map(|path| {
        self
          .origin
          .join(path)
          .map_err(|e| eyre!("Invalid precache path {}: {}", path, e))
      })
      .collect::<Result<Vec<_>>>()?;

    tracing::info!(count = urls.len(), "Gateway: Caching static assets");

    let responses = futures::future::try_join_all(urls.into_iter().map(|url| async move {
      let request = GatewayRequest::get(url);
      let snapshot = self.layer.fetch_network(&request).await?;
      if !snapshot.is_ok() {
        return Err(eyre!(
          "Failed to precache {}: status {}",
          request.url,
          snapshot.status
        ));
      }
      Ok::<_, color_eyre::Report>((request.cache_key(), snapshot))
    }))
    .await?;

    storage.open_partition(&names.static_name)?;
    for (key, snapshot) in &responses {
      storage.put(&names.static_name, key, snapshot)?;
    }

    Ok(previous_version)
  }

  /// Activate: delete partitions not owned by this version and claim all
  /// connected clients.
  pub async fn activate(&self) -> Result<()> {
    self.set_state(WorkerState::Activating);
    tracing::info!("Gateway: Activating...");

    let storage = self.layer.storage();
    let names = self.layer.names();

    for name in storage.partition_names()? {
      if !names.is_current(&name) {
        tracing::info!(partition = %name, "Gateway: Deleting old cache");
        storage.delete_partition(&name)?;
      }
    }

    let claimed = self.clients.post_all(ClientMessage::ControllerChanged);
    tracing::debug!(claimed, "Gateway: clients claimed");

    self.set_state(WorkerState::Activated);
    Ok(())
  }

  /// Intercept a request. `None` means the request is not handled and should
  /// go to the network untouched.
  pub async fn handle_fetch(&self, request: &GatewayRequest) -> Option<GatewayResponse> {
    if request.method != Method::GET {
      return None;
    }
    if !matches!(request.url.scheme(), "http" | "https") {
      return None;
    }
    if self.state() != WorkerState::Activated {
      return None;
    }

    let class = self.classifier.classify(request);
    tracing::debug!(url = %request.url, ?class, "Intercepted request");

    let response = match class {
      RequestClass::StaticAsset => self.layer.cache_first(request).await,
      RequestClass::Api => self.layer.network_first(request).await,
      RequestClass::Navigable => {
        let fallbacks = self.offline_fallbacks(request);
        self
          .layer
          .network_first_with_fallback(request, &fallbacks)
          .await
      }
      RequestClass::Other => self.layer.stale_while_revalidate(request).await,
    };

    Some(response)
  }

  /// Cached pages to try when a navigation fails: the admin section root
  /// (only for pages inside it), then the app root.
  fn offline_fallbacks(&self, request: &GatewayRequest) -> Vec<String> {
    let mut keys = Vec::new();
    if is_under(request.path(), &self.admin_section) {
      if let Ok(url) = self.origin.join(&self.admin_section) {
        keys.push(url.to_string());
      }
    }
    if let Ok(url) = self.origin.join("/") {
      keys.push(url.to_string());
    }
    keys
  }

  /// Handle a background sync event. Returns whether the tag was recognised.
  pub async fn handle_sync(&self, tag: &str) -> bool {
    tracing::info!(%tag, "Gateway: Background sync triggered");

    if tag != UPLOAD_QUEUE_TAG {
      tracing::debug!(%tag, "Ignoring unknown sync tag");
      return false;
    }

    if let Some(hook) = &self.background_sync {
      let processed = hook().await;
      tracing::debug!(processed, "Background sync drained queue");
    }

    self.clients.post_all(ClientMessage::UploadQueueProcessed {
      timestamp: Utc::now(),
    });
    tracing::info!("Gateway: Upload queue processed");
    true
  }

  /// Handle a push message by showing exactly one notification.
  pub fn handle_push(&self, data: Option<&str>) -> Notification {
    tracing::info!("Gateway: Push message received");
    let notification = Notification::for_push(data);
    self.notifier.show(&notification);
    notification
  }

  /// Close the clicked notification and open the app root.
  pub fn handle_notification_click(&self, notification: &Notification) {
    tracing::info!("Gateway: Notification clicked");
    self.notifier.close(&notification.tag);
    self.notifier.open_window(self.origin.as_str());
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::{CacheNames, CacheSource};
  use crate::http::ResponseSnapshot;
  use crate::testing::FakeFetcher;
  use std::sync::atomic::{AtomicUsize, Ordering};
  use std::time::Duration;

  const ORIGIN: &str = "https://kyc.test/";

  fn gateway(fetcher: &FakeFetcher, names: CacheNames) -> CacheGateway<SqliteStorage, FakeFetcher> {
    let layer = CacheLayer::new(SqliteStorage::open_in_memory().unwrap(), fetcher.clone(), names)
      .with_timeout(Duration::from_millis(200));
    let classifier = Classifier::new(
      vec!["/api/".to_string()],
      vec!["/dashboard".to_string()],
    );
    CacheGateway::new(layer, Url::parse(ORIGIN).unwrap(), classifier)
      .with_precache(vec!["/".to_string(), "/dashboard".to_string()])
  }

  fn names() -> CacheNames {
    CacheNames::new("v2-static", "v2-dynamic", "v2-shell")
  }

  fn url(path: &str) -> Url {
    Url::parse(ORIGIN).unwrap().join(path).unwrap()
  }

  fn serve_shell(fetcher: &FakeFetcher) {
    fetcher.respond("https://kyc.test/", ResponseSnapshot::new(200, "root page"));
    fetcher.respond("https://kyc.test/dashboard", ResponseSnapshot::new(200, "dashboard page"));
  }

  #[derive(Default)]
  struct RecordingNotifier {
    events: Mutex<Vec<String>>,
  }

  impl Notifier for RecordingNotifier {
    fn show(&self, notification: &Notification) {
      self.events.lock().unwrap().push(format!("show:{}", notification.tag));
    }

    fn close(&self, tag: &str) {
      self.events.lock().unwrap().push(format!("close:{}", tag));
    }

    fn open_window(&self, url: &str) {
      self.events.lock().unwrap().push(format!("open:{}", url));
    }
  }

  #[tokio::test]
  async fn test_install_precaches_and_activates() {
    let fetcher = FakeFetcher::new();
    serve_shell(&fetcher);
    let gateway = gateway(&fetcher, names());

    gateway.install().await.unwrap();

    assert_eq!(gateway.state(), WorkerState::Activated);
    let storage = gateway.layer().storage();
    assert_eq!(storage.entry_count("v2-static").unwrap(), 2);
    let root = storage.get("v2-static", "https://kyc.test/").unwrap().unwrap();
    assert_eq!(root.snapshot.text(), "root page");
  }

  #[tokio::test]
  async fn test_failed_precache_makes_gateway_redundant() {
    let fetcher = FakeFetcher::new();
    fetcher.respond("https://kyc.test/", ResponseSnapshot::new(200, "root page"));
    fetcher.respond("https://kyc.test/dashboard", ResponseSnapshot::new(500, "boom"));
    let gateway = gateway(&fetcher, names());

    assert!(gateway.install().await.is_err());
    assert_eq!(gateway.state(), WorkerState::Redundant);
    assert_eq!(gateway.layer().storage().entry_count("v2-static").unwrap(), 0);

    let request = GatewayRequest::get(url("/api/applications"));
    assert!(gateway.handle_fetch(&request).await.is_none());
  }

  #[tokio::test]
  async fn test_activate_removes_other_versions() {
    let fetcher = FakeFetcher::new();
    let gateway = gateway(&fetcher, names());
    let storage = gateway.layer().storage();
    storage.open_partition("v1-static").unwrap();
    storage.open_partition("v2-static").unwrap();
    storage.open_partition("v2-dynamic").unwrap();

    gateway.activate().await.unwrap();

    assert_eq!(
      storage.partition_names().unwrap(),
      vec!["v2-static".to_string(), "v2-dynamic".to_string()]
    );
  }

  #[tokio::test]
  async fn test_install_over_old_version_announces_update() {
    let fetcher = FakeFetcher::new();
    serve_shell(&fetcher);
    let gateway = gateway(&fetcher, names());
    gateway.layer().storage().open_partition("v1-static").unwrap();
    let mut client = gateway.clients().connect();

    gateway.install().await.unwrap();

    assert_eq!(client.try_next(), Some(ClientMessage::UpdateAvailable));
    assert_eq!(client.try_next(), Some(ClientMessage::ControllerChanged));
    assert!(!gateway
      .layer()
      .storage()
      .partition_names()
      .unwrap()
      .contains(&"v1-static".to_string()));
  }

  #[tokio::test]
  async fn test_passthrough_requests() {
    let fetcher = FakeFetcher::new();
    let gateway = gateway(&fetcher, names());

    // Not yet controlling
    let early = GatewayRequest::get(url("/api/applications"));
    assert!(gateway.handle_fetch(&early).await.is_none());

    gateway.activate().await.unwrap();

    let post = GatewayRequest::new(Method::POST, url("/api/applications"));
    assert!(gateway.handle_fetch(&post).await.is_none());

    let extension = GatewayRequest::get(Url::parse("chrome-extension://abc/script.js").unwrap());
    assert!(gateway.handle_fetch(&extension).await.is_none());

    assert!(gateway.handle_fetch(&early).await.is_some());
    assert_eq!(fetcher.calls("https://kyc.test/api/applications"), 1);
  }

  #[tokio::test]
  async fn test_admin_page_falls_back_to_section_root() {
    let fetcher = FakeFetcher::new();
    serve_shell(&fetcher);
    let gateway = gateway(&fetcher, names());
    gateway.install().await.unwrap();

    let request =
      GatewayRequest::get(url("/dashboard/applications/session-42")).with_accept("text/html");
    let response = gateway.handle_fetch(&request).await.unwrap();

    assert_eq!(response.source, CacheSource::Offline);
    assert_eq!(response.data.text(), "dashboard page");
  }

  #[tokio::test]
  async fn test_other_page_falls_back_to_root() {
    let fetcher = FakeFetcher::new();
    serve_shell(&fetcher);
    let gateway = gateway(&fetcher, names());
    gateway.install().await.unwrap();

    let request = GatewayRequest::get(url("/upload/pan")).with_accept("text/html");
    let response = gateway.handle_fetch(&request).await.unwrap();

    assert_eq!(response.data.text(), "root page");
  }

  #[tokio::test]
  async fn test_api_offline_json() {
    let fetcher = FakeFetcher::new();
    let gateway = gateway(&fetcher, names());
    gateway.activate().await.unwrap();

    let request = GatewayRequest::get(url("/api/dashboard/stats"));
    let response = gateway.handle_fetch(&request).await.unwrap();

    assert_eq!(response.data.status, 503);
    assert!(response.data.text().contains("\"offline\":true"));
  }

  #[tokio::test]
  async fn test_upload_queue_sync_runs_hook_and_notifies() {
    let fetcher = FakeFetcher::new();
    let runs = Arc::new(AtomicUsize::new(0));
    let hook_runs = Arc::clone(&runs);
    let hook: SyncHook = Arc::new(move || -> BoxFuture<usize> {
      let runs = Arc::clone(&hook_runs);
      Box::pin(async move {
        runs.fetch_add(1, Ordering::SeqCst);
        2
      })
    });
    let gateway = gateway(&fetcher, names()).with_background_sync(hook);
    let mut client = gateway.clients().connect();

    assert!(gateway.handle_sync(UPLOAD_QUEUE_TAG).await);
    assert_eq!(runs.load(Ordering::SeqCst), 1);
    assert!(matches!(
      client.try_next(),
      Some(ClientMessage::UploadQueueProcessed { .. })
    ));

    assert!(!gateway.handle_sync("something-else").await);
    assert_eq!(runs.load(Ordering::SeqCst), 1);
    assert_eq!(client.try_next(), None);
  }

  #[tokio::test]
  async fn test_push_and_click() {
    let fetcher = FakeFetcher::new();
    let notifier = Arc::new(RecordingNotifier::default());
    let gateway = gateway(&fetcher, names()).with_notifier(notifier.clone());

    let notification = gateway.handle_push(Some("Application approved"));
    assert_eq!(notification.body, "Application approved");
    assert_eq!(*notifier.events.lock().unwrap(), vec!["show:kyc-notification"]);

    gateway.handle_notification_click(&notification);
    assert_eq!(
      *notifier.events.lock().unwrap(),
      vec![
        "show:kyc-notification",
        "close:kyc-notification",
        "open:https://kyc.test/"
      ]
    );
  }

  #[tokio::test]
  async fn test_restore_existing_install() {
    let fetcher = FakeFetcher::new();
    let gateway = gateway(&fetcher, names());
    assert!(!gateway.restore().unwrap());

    gateway.layer().storage().open_partition("v2-static").unwrap();
    assert!(gateway.restore().unwrap());
    assert_eq!(gateway.state(), WorkerState::Activated);
  }
}
