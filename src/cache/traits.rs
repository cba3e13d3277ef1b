//! Core types for the caching system.

use chrono::{DateTime, Utc};

use crate::http::ResponseSnapshot;

/// Names of the three partitions owned by the current version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheNames {
  /// Precached app shell assets and cache-first responses
  pub static_name: String,
  /// API and page responses written as they are served
  pub dynamic_name: String,
  /// Legacy shell partition, kept so it survives activation
  pub shell_name: String,
}

impl CacheNames {
  pub fn new(
    static_name: impl Into<String>,
    dynamic_name: impl Into<String>,
    shell_name: impl Into<String>,
  ) -> Self {
    Self {
      static_name: static_name.into(),
      dynamic_name: dynamic_name.into(),
      shell_name: shell_name.into(),
    }
  }

  /// `<prefix>-static-<version>`, `<prefix>-dynamic-<version>`, `<prefix>-<version>`.
  pub fn versioned(prefix: &str, version: &str) -> Self {
    Self::new(
      format!("{}-static-{}", prefix, version),
      format!("{}-dynamic-{}", prefix, version),
      format!("{}-{}", prefix, version),
    )
  }

  /// Whether `name` belongs to the current version.
  pub fn is_current(&self, name: &str) -> bool {
    name == self.static_name || name == self.dynamic_name || name == self.shell_name
  }
}

/// Result from a cache operation, including data and metadata about the source.
#[derive(Debug, Clone)]
pub struct CacheResult<T> {
  /// The actual data
  pub data: T,
  /// Where the data came from
  pub source: CacheSource,
  /// When the data was cached (if from cache)
  pub cached_at: Option<DateTime<Utc>>,
}

/// What the gateway hands back for an intercepted request.
pub type GatewayResponse = CacheResult<ResponseSnapshot>;

impl<T> CacheResult<T> {
  /// Create a new cache result from fresh network data.
  pub fn from_network(data: T) -> Self {
    Self {
      data,
      source: CacheSource::Network,
      cached_at: None,
    }
  }

  /// Create a new cache result from cached data served without a network attempt.
  pub fn from_cache(data: T, cached_at: DateTime<Utc>) -> Self {
    Self {
      data,
      source: CacheSource::Cache,
      cached_at: Some(cached_at),
    }
  }

  /// Create a new cache result for offline mode.
  pub fn offline(data: T, cached_at: DateTime<Utc>) -> Self {
    Self {
      data,
      source: CacheSource::Offline,
      cached_at: Some(cached_at),
    }
  }

  /// A response fabricated because neither network nor cache could serve.
  pub fn synthetic(data: T) -> Self {
    Self {
      data,
      source: CacheSource::Synthetic,
      cached_at: None,
    }
  }
}

/// Indicates where a response came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheSource {
  /// Fresh data from network
  Network,
  /// Served from cache before (or instead of) touching the network
  Cache,
  /// Network unavailable, serving cached data
  Offline,
  /// Network unavailable and nothing cached
  Synthetic,
}

impl std::fmt::Display for CacheSource {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    let s = match self {
      CacheSource::Network => "network",
      CacheSource::Cache => "cache",
      CacheSource::Offline => "offline",
      CacheSource::Synthetic => "synthetic",
    };
    f.write_str(s)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_versioned_names() {
    let names = CacheNames::versioned("kyc-lite", "v2");
    assert_eq!(names.static_name, "kyc-lite-static-v2");
    assert_eq!(names.dynamic_name, "kyc-lite-dynamic-v2");
    assert_eq!(names.shell_name, "kyc-lite-v2");
    assert!(names.is_current("kyc-lite-v2"));
    assert!(!names.is_current("kyc-lite-static-v1"));
  }
}
