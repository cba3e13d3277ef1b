use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

use crate::cache::CacheNames;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
  /// Base URL of the KYC Lite deployment (app shell and API)
  pub origin: String,
  /// SQLite database path (defaults to $XDG_DATA_HOME/kyc-lite/offline.db)
  pub database: Option<PathBuf>,
  pub cache: CacheConfig,
  pub sync: SyncConfig,
  pub log: LogConfig,
}

impl Default for Config {
  fn default() -> Self {
    Self {
      origin: "http://localhost:3000".to_string(),
      database: None,
      cache: CacheConfig::default(),
      sync: SyncConfig::default(),
      log: LogConfig::default(),
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
  /// Partition name prefix
  pub prefix: String,
  /// Deployment version; partitions of other versions are dropped on activation
  pub version: String,
  /// Paths fetched into the static partition at install time
  #[serde(deserialize_with = "deserialize_paths")]
  pub precache: Vec<String>,
  /// Path prefixes routed network-first
  #[serde(deserialize_with = "deserialize_paths")]
  pub api_prefixes: Vec<String>,
  /// Admin routes treated as navigations regardless of Accept header
  #[serde(deserialize_with = "deserialize_paths")]
  pub admin_routes: Vec<String>,
  /// Section whose root page is the offline fallback for its sub-pages
  pub admin_section: String,
  pub network_timeout_secs: u64,
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      prefix: "kyc-lite".to_string(),
      version: "v2".to_string(),
      precache: [
        "/",
        "/dashboard",
        "/debug",
        "/manifest.json",
        "/icons/icon-192x192.png",
        "/icons/icon-512x512.png",
      ]
      .map(String::from)
      .to_vec(),
      api_prefixes: vec!["/api/".to_string()],
      admin_routes: ["/dashboard", "/dashboard/applications", "/dashboard/review"]
        .map(String::from)
        .to_vec(),
      admin_section: "/dashboard".to_string(),
      network_timeout_secs: 10,
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
  /// Failed attempts after which a queued item is dropped
  pub max_retries: u32,
  /// Delay before the first drain when starting online
  pub startup_delay_ms: u64,
  pub handler_timeout_secs: u64,
  pub probe_interval_secs: u64,
  /// Path probed to decide whether we are online
  pub probe_path: String,
}

impl Default for SyncConfig {
  fn default() -> Self {
    Self {
      max_retries: 3,
      startup_delay_ms: 1000,
      handler_timeout_secs: 30,
      probe_interval_secs: 15,
      probe_path: "/manifest.json".to_string(),
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LogConfig {
  /// tracing filter directive, overridden by RUST_LOG
  pub filter: String,
  /// Write logs to this file instead of stderr
  pub file: Option<PathBuf>,
}

impl Default for LogConfig {
  fn default() -> Self {
    Self {
      filter: "info".to_string(),
      file: None,
    }
  }
}

/// Make every configured path absolute. Trailing slashes are significant
/// (`/api/` matches only below `/api`) and left alone.
fn deserialize_paths<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
  D: serde::Deserializer<'de>,
{
  let v: Vec<String> = Vec::deserialize(deserializer)?;
  Ok(
    v.into_iter()
      .map(|s| {
        let s = s.trim();
        if s.starts_with('/') {
          s.to_string()
        } else {
          format!("/{}", s)
        }
      })
      .collect(),
  )
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./kyc-lite.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/kyc-lite/config.yaml
  ///
  /// Falls back to built-in defaults when no file is found.
  pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
    let path = if let Some(p) = explicit_path {
      if p.exists() {
        Some(p.to_path_buf())
      } else {
        return Err(eyre!("Config file not found: {}", p.display()));
      }
    } else {
      Self::find_config_file()
    };

    match path {
      Some(p) => Self::load_from_path(&p),
      None => Ok(Self::default()),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("kyc-lite.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("kyc-lite").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    Self::parse(&contents).map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))
  }

  /// Parse configuration from YAML text.
  pub fn parse(contents: &str) -> Result<Self> {
    let config: Config = serde_yaml::from_str(contents).map_err(|e| eyre!("{}", e))?;
    config.validate()?;
    Ok(config)
  }

  /// Check values serde cannot: the origin scheme and non-zero durations.
  pub fn validate(&self) -> Result<()> {
    self.origin_url()?;

    let durations = [
      ("cache.network_timeout_secs", self.cache.network_timeout_secs),
      ("sync.handler_timeout_secs", self.sync.handler_timeout_secs),
      ("sync.probe_interval_secs", self.sync.probe_interval_secs),
    ];
    for (name, value) in durations {
      if value == 0 {
        return Err(eyre!("{} must be greater than zero", name));
      }
    }
    Ok(())
  }

  /// The origin as a parsed URL.
  pub fn origin_url(&self) -> Result<Url> {
    let url = Url::parse(&self.origin)
      .map_err(|e| eyre!("Invalid origin '{}': {}", self.origin, e))?;
    match url.scheme() {
      "http" | "https" => Ok(url),
      other => Err(eyre!("Origin must be http(s), got '{}'", other)),
    }
  }

  pub fn cache_names(&self) -> CacheNames {
    CacheNames::versioned(&self.cache.prefix, &self.cache.version)
  }

  pub fn network_timeout(&self) -> Duration {
    Duration::from_secs(self.cache.network_timeout_secs)
  }

  pub fn handler_timeout(&self) -> Duration {
    Duration::from_secs(self.sync.handler_timeout_secs)
  }

  pub fn startup_delay(&self) -> Duration {
    Duration::from_millis(self.sync.startup_delay_ms)
  }

  pub fn probe_interval(&self) -> Duration {
    Duration::from_secs(self.sync.probe_interval_secs)
  }

  /// Get the backend API token from the environment, if set.
  ///
  /// Checks KYC_LITE_API_TOKEN.
  pub fn get_api_token() -> Option<String> {
    std::env::var("KYC_LITE_API_TOKEN")
      .ok()
      .filter(|t| !t.is_empty())
  }
}
