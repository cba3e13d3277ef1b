//! Cache layer that orchestrates caching strategies with network fetching.

use color_eyre::{eyre::eyre, Result};
use std::sync::Arc;
use std::time::Duration;

use super::storage::{CacheStorage, CachedResponse};
use super::traits::{CacheNames, CacheResult, GatewayResponse};
use crate::http::{Fetcher, GatewayRequest, ResponseSnapshot};

/// Cache layer that manages caching logic and network fetching.
///
/// Every strategy resolves to some response: when neither the network nor
/// the cache can serve, a synthetic 503 is returned.
pub struct CacheLayer<S: CacheStorage, F: Fetcher> {
  storage: Arc<S>,
  fetcher: Arc<F>,
  names: CacheNames,
  /// Upper bound for a single network fetch
  timeout: Duration,
}

impl<S: CacheStorage, F: Fetcher> CacheLayer<S, F> {
  /// Create a new cache layer with the given storage backend and network.
  pub fn new(storage: S, fetcher: F, names: CacheNames) -> Self {
    Self {
      storage: Arc::new(storage),
      fetcher: Arc::new(fetcher),
      names,
      timeout: Duration::from_secs(10),
    }
  }

  /// Set the network timeout. A timed out fetch counts as a network failure.
  pub fn with_timeout(mut self, timeout: Duration) -> Self {
    self.timeout = timeout;
    self
  }

  pub fn storage(&self) -> &S {
    &self.storage
  }

  pub fn names(&self) -> &CacheNames {
    &self.names
  }

  /// Fetch from the network, bounded by the configured timeout.
  pub async fn fetch_network(&self, request: &GatewayRequest) -> Result<ResponseSnapshot> {
    fetch_with_timeout(self.fetcher.as_ref(), request, self.timeout).await
  }

  /// Cache-first: serve any cached snapshot, otherwise go to the network and
  /// keep successful responses in the static partition.
  pub async fn cache_first(&self, request: &GatewayRequest) -> GatewayResponse {
    let key = request.cache_key();

    if let Some(cached) = self.find(&key) {
      tracing::debug!(%key, partition = %cached.partition, "Cache hit");
      return CacheResult::from_cache(cached.snapshot, cached.cached_at);
    }

    match self.fetch_network(request).await {
      Ok(snapshot) => {
        if snapshot.is_ok() {
          self.store(&self.names.static_name, &key, &snapshot);
        }
        CacheResult::from_network(snapshot)
      }
      Err(e) => {
        tracing::warn!(%key, "Cache first failed: {}", e);
        CacheResult::synthetic(offline_asset())
      }
    }
  }

  /// Network-first: always try the network, falling back to any cached
  /// snapshot, then to a JSON body flagged `offline`.
  pub async fn network_first(&self, request: &GatewayRequest) -> GatewayResponse {
    let key = request.cache_key();

    match self.fetch_network(request).await {
      Ok(snapshot) => {
        if snapshot.is_ok() {
          self.store(&self.names.dynamic_name, &key, &snapshot);
        }
        CacheResult::from_network(snapshot)
      }
      Err(e) => {
        tracing::info!(%key, "Network failed, trying cache: {}", e);
        match self.find(&key) {
          Some(cached) => CacheResult::offline(cached.snapshot, cached.cached_at),
          None => CacheResult::synthetic(offline_json()),
        }
      }
    }
  }

  /// Network-first for navigations. On failure tries the exact cached page,
  /// then each key of `fallbacks` in order, then a plain 503.
  pub async fn network_first_with_fallback(
    &self,
    request: &GatewayRequest,
    fallbacks: &[String],
  ) -> GatewayResponse {
    let key = request.cache_key();

    match self.fetch_network(request).await {
      Ok(snapshot) => {
        if snapshot.is_ok() {
          self.store(&self.names.dynamic_name, &key, &snapshot);
        }
        CacheResult::from_network(snapshot)
      }
      Err(e) => {
        tracing::info!(%key, "Network failed for page, trying cache: {}", e);
        std::iter::once(&key)
          .chain(fallbacks.iter())
          .find_map(|k| self.find(k))
          .map(|cached| CacheResult::offline(cached.snapshot, cached.cached_at))
          .unwrap_or_else(|| CacheResult::synthetic(offline_page()))
      }
    }
  }

  /// Stale-while-revalidate on the dynamic partition: a cached snapshot is
  /// returned at once while a background task refreshes it.
  pub async fn stale_while_revalidate(&self, request: &GatewayRequest) -> GatewayResponse {
    let key = request.cache_key();
    let partition = &self.names.dynamic_name;

    let cached = match self.storage.get(partition, &key) {
      Ok(cached) => cached,
      Err(e) => {
        tracing::warn!(%key, "Cache read failed: {}", e);
        None
      }
    };

    if let Some(cached) = cached {
      self.spawn_revalidate(request.clone());
      return CacheResult::from_cache(cached.snapshot, cached.cached_at);
    }

    match self.fetch_network(request).await {
      Ok(snapshot) => {
        if snapshot.is_ok() {
          self.store(partition, &key, &snapshot);
        }
        CacheResult::from_network(snapshot)
      }
      Err(e) => {
        tracing::debug!(%key, "Revalidation fetch failed: {}", e);
        CacheResult::synthetic(offline_page())
      }
    }
  }

  /// Refresh the dynamic snapshot for `request` without blocking the caller.
  fn spawn_revalidate(&self, request: GatewayRequest) {
    let storage = Arc::clone(&self.storage);
    let fetcher = Arc::clone(&self.fetcher);
    let partition = self.names.dynamic_name.clone();
    let timeout = self.timeout;

    tokio::spawn(async move {
      let key = request.cache_key();
      match fetch_with_timeout(fetcher.as_ref(), &request, timeout).await {
        Ok(snapshot) if snapshot.is_ok() => {
          if let Err(e) = storage.put(&partition, &key, &snapshot) {
            tracing::warn!(%key, "Failed to store revalidated response: {}", e);
          }
        }
        Ok(snapshot) => {
          tracing::debug!(%key, status = snapshot.status, "Revalidation not stored");
        }
        Err(e) => {
          tracing::debug!(%key, "Revalidation fetch failed: {}", e);
        }
      }
    });
  }

  fn find(&self, key: &str) -> Option<CachedResponse> {
    match self.storage.find(key) {
      Ok(found) => found,
      Err(e) => {
        tracing::warn!(%key, "Cache read failed: {}", e);
        None
      }
    }
  }

  fn store(&self, partition: &str, key: &str, snapshot: &ResponseSnapshot) {
    if let Err(e) = self.storage.put(partition, key, snapshot) {
      tracing::warn!(%key, %partition, "Failed to store response: {}", e);
    }
  }
}

impl<S: CacheStorage, F: Fetcher> Clone for CacheLayer<S, F> {
  fn clone(&self) -> Self {
    Self {
      storage: Arc::clone(&self.storage),
      fetcher: Arc::clone(&self.fetcher),
      names: self.names.clone(),
      timeout: self.timeout,
    }
  }
}

async fn fetch_with_timeout<F: Fetcher>(
  fetcher: &F,
  request: &GatewayRequest,
  timeout: Duration,
) -> Result<ResponseSnapshot> {
  match tokio::time::timeout(timeout, fetcher.fetch(request)).await {
    Ok(result) => result,
    Err(_) => Err(eyre!(
      "Timed out after {}ms fetching {}",
      timeout.as_millis(),
      request.url
    )),
  }
}

/// 503 for a static asset that is neither cached nor reachable.
pub fn offline_asset() -> ResponseSnapshot {
  ResponseSnapshot::new(503, "Offline - Asset not available")
    .with_header("content-type", "text/plain; charset=utf-8")
}

/// 503 for an API call; the `offline` flag distinguishes it from a real
/// server error.
pub fn offline_json() -> ResponseSnapshot {
  let body = serde_json::json!({
    "error": "Network unavailable",
    "offline": true,
  });
  ResponseSnapshot::new(503, body.to_string()).with_header("content-type", "application/json")
}

/// 503 for pages and everything else.
pub fn offline_page() -> ResponseSnapshot {
  ResponseSnapshot::new(503, "Offline").with_header("content-type", "text/plain; charset=utf-8")
}
