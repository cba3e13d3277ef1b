//! Request/response snapshots and the network seam used by the gateway.

use color_eyre::{eyre::eyre, Result};
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, CONTENT_TYPE};
use reqwest::Method;
use serde::{Deserialize, Serialize};
use std::future::Future;
use url::Url;

use crate::network::NetworkStatus;

/// An intercepted outbound request.
#[derive(Debug, Clone)]
pub struct GatewayRequest {
  pub method: Method,
  pub url: Url,
  pub headers: HeaderMap,
}

impl GatewayRequest {
  pub fn new(method: Method, url: Url) -> Self {
    Self {
      method,
      url,
      headers: HeaderMap::new(),
    }
  }

  /// Plain GET with no headers.
  pub fn get(url: Url) -> Self {
    Self::new(Method::GET, url)
  }

  /// Set the `Accept` header. Invalid header values are ignored.
  pub fn with_accept(mut self, accept: &str) -> Self {
    if let Ok(value) = HeaderValue::from_str(accept) {
      self.headers.insert(ACCEPT, value);
    }
    self
  }

  /// Value of the `Accept` header, if present and valid UTF-8.
  pub fn accept(&self) -> Option<&str> {
    self.headers.get(ACCEPT).and_then(|v| v.to_str().ok())
  }

  pub fn path(&self) -> &str {
    self.url.path()
  }

  /// Key under which this request's response is cached: the absolute URL
  /// without its fragment.
  pub fn cache_key(&self) -> String {
    let mut url = self.url.clone();
    url.set_fragment(None);
    url.to_string()
  }
}

/// A fully buffered response, as stored in a cache partition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseSnapshot {
  pub status: u16,
  pub headers: Vec<(String, String)>,
  pub body: Vec<u8>,
}

impl ResponseSnapshot {
  pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
    Self {
      status,
      headers: Vec::new(),
      body: body.into(),
    }
  }

  pub fn with_header(mut self, name: &str, value: &str) -> Self {
    self.headers.push((name.to_string(), value.to_string()));
    self
  }

  /// 2xx status.
  pub fn is_ok(&self) -> bool {
    (200..300).contains(&self.status)
  }

  /// First header with the given name (case-insensitive).
  pub fn header(&self, name: &str) -> Option<&str> {
    self
      .headers
      .iter()
      .find(|(k, _)| k.eq_ignore_ascii_case(name))
      .map(|(_, v)| v.as_str())
  }

  pub fn content_type(&self) -> Option<&str> {
    self.header(CONTENT_TYPE.as_str())
  }

  /// Body decoded as UTF-8, lossily.
  pub fn text(&self) -> String {
    String::from_utf8_lossy(&self.body).into_owned()
  }
}

/// Network access used by the cache strategies.
///
/// An `Err` means the request never produced a response (connection refused,
/// DNS failure, timeout). HTTP error statuses are `Ok`.
pub trait Fetcher: Send + Sync + 'static {
  fn fetch(&self, request: &GatewayRequest)
    -> impl Future<Output = Result<ResponseSnapshot>> + Send;
}

/// Fetcher backed by a shared reqwest client.
#[derive(Clone)]
pub struct HttpFetcher {
  client: reqwest::Client,
  /// When set, requests fail without touching the network while offline
  network: Option<NetworkStatus>,
}

impl HttpFetcher {
  pub fn new() -> Result<Self> {
    let client = reqwest::Client::builder()
      .user_agent(concat!("kyc-lite-offline/", env!("CARGO_PKG_VERSION")))
      .build()
      .map_err(|e| eyre!("Failed to create HTTP client: {}", e))?;
    Ok(Self::with_client(client))
  }

  pub fn with_client(client: reqwest::Client) -> Self {
    Self {
      client,
      network: None,
    }
  }

  pub fn with_network(mut self, network: NetworkStatus) -> Self {
    self.network = Some(network);
    self
  }
}

impl Fetcher for HttpFetcher {
  fn fetch(
    &self,
    request: &GatewayRequest,
  ) -> impl Future<Output = Result<ResponseSnapshot>> + Send {
    let builder = self
      .client
      .request(request.method.clone(), request.url.clone())
      .headers(request.headers.clone());
    let url = request.url.clone();
    let offline = self.network.as_ref().is_some_and(|n| !n.is_online());

    async move {
      if offline {
        return Err(eyre!("Failed to fetch {}: network is offline", url));
      }

      let response = builder
        .send()
        .await
        .map_err(|e| eyre!("Failed to fetch {}: {}", url, e))?;

      let status = response.status().as_u16();
      let headers = response
        .headers()
        .iter()
        .filter_map(|(name, value)| {
          value
            .to_str()
            .ok()
            .map(|v| (name.as_str().to_string(), v.to_string()))
        })
        .collect();

      let body = response
        .bytes()
        .await
        .map_err(|e| eyre!("Failed to read body of {}: {}", url, e))?
        .to_vec();

      Ok(ResponseSnapshot {
        status,
        headers,
        body,
      })
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_cache_key_drops_fragment() {
    let request = GatewayRequest::get(Url::parse("https://kyc.test/dashboard?tab=1#top").unwrap());
    assert_eq!(request.cache_key(), "https://kyc.test/dashboard?tab=1");
  }

  #[test]
  fn test_accept_header() {
    let request = GatewayRequest::get(Url::parse("https://kyc.test/").unwrap())
      .with_accept("text/html,application/xhtml+xml");
    assert_eq!(request.accept(), Some("text/html,application/xhtml+xml"));
  }

  #[test]
  fn test_snapshot_status_and_headers() {
    let snapshot = ResponseSnapshot::new(204, "").with_header("Content-Type", "text/plain");
    assert!(snapshot.is_ok());
    assert_eq!(snapshot.content_type(), Some("text/plain"));
    assert!(!ResponseSnapshot::new(404, "").is_ok());
    assert!(!ResponseSnapshot::new(301, "").is_ok());
  }

  #[tokio::test]
  async fn test_http_fetcher_reads_response() {
    let mut server = mockito::Server::new_async().await;
    let _mock = server
      .mock("GET", "/api/applications")
      .with_status(200)
      .with_header("content-type", "application/json")
      .with_body(r#"{"applications":[]}"#)
      .create_async()
      .await;

    let url = Url::parse(&server.url()).unwrap().join("/api/applications").unwrap();
    let fetcher = HttpFetcher::new().unwrap();
    let snapshot = fetcher.fetch(&GatewayRequest::get(url)).await.unwrap();

    assert_eq!(snapshot.status, 200);
    assert_eq!(snapshot.content_type(), Some("application/json"));
    assert_eq!(snapshot.text(), r#"{"applications":[]}"#);
  }

  #[tokio::test]
  async fn test_http_fetcher_connection_error() {
    let fetcher = HttpFetcher::new().unwrap();
    // Port 9 (discard) on localhost is not expected to be listening.
    let url = Url::parse("http://127.0.0.1:9/").unwrap();
    assert!(fetcher.fetch(&GatewayRequest::get(url)).await.is_err());
  }

  #[tokio::test]
  async fn test_offline_fetch_skips_network() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
      .mock("GET", "/")
      .with_status(200)
      .expect(0)
      .create_async()
      .await;

    let network = NetworkStatus::new(false);
    let fetcher = HttpFetcher::new().unwrap().with_network(network.clone());
    let url = Url::parse(&server.url()).unwrap();

    let err = fetcher.fetch(&GatewayRequest::get(url)).await.unwrap_err();
    assert!(err.to_string().contains("offline"));
    mock.assert_async().await;
    assert!(!network.is_online());
  }
}
