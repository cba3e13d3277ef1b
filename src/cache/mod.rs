//! Response caching with offline support.
//!
//! This module provides the partitioned response cache behind the gateway:
//! - Named partitions mapping request keys to response snapshots
//! - Cache-first, network-first and stale-while-revalidate strategies
//! - Deterministic synthetic responses when nothing can be served

mod layer;
mod storage;
mod traits;

pub use layer::{offline_asset, offline_json, offline_page, CacheLayer};
pub use storage::{CacheStorage, CachedResponse, SqliteStorage};
pub use traits::{CacheNames, CacheResult, CacheSource, GatewayResponse};
