//! Counter stores backing the window limiter.
//!
//! A store maps a rate key to a fixed-window count with expiry. The memory
//! store serves a single instance; the Redis store is shared by every
//! instance behind the load balancer, and the failover store keeps admission
//! control running on local memory whenever Redis is unreachable.

mod failover;
mod memory;
mod redis_store;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tracing::{info, warn};

pub use crate::ratelimit::Hit;
pub use failover::FailoverStore;
pub use memory::MemoryStore;
pub use redis_store::{RedisStore, RedisStoreConfig};

use crate::config::StoreConfig;
use crate::error::StoreResult;

/// Which backend is currently answering counter operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreMode {
    /// Process-local counters only
    Memory,
    /// Shared Redis counters
    Redis,
    /// Redis configured but unreachable; local counters in use
    Degraded,
}

impl std::fmt::Display for StoreMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            StoreMode::Memory => "memory",
            StoreMode::Redis => "redis",
            StoreMode::Degraded => "degraded",
        };
        f.write_str(s)
    }
}

/// Trait for counter store implementations.
///
/// `increment` must be atomic per key: two concurrent increments of the same
/// key never lose an update.
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Count one request for `key`, opening a new window of length `window`
    /// if none is active.
    async fn increment(&self, key: &str, window: Duration) -> StoreResult<Hit>;

    /// Give back one request counted in the active window for `key`.
    ///
    /// Never opens a window; returns the count afterwards, 0 when no window
    /// is active.
    async fn decrement(&self, key: &str) -> StoreResult<u64>;

    /// Read the active window for `key` without counting.
    async fn get(&self, key: &str) -> StoreResult<Option<Hit>>;

    /// Remove all state for `key`.
    async fn reset(&self, key: &str) -> StoreResult<()>;

    /// Drop expired entries. Returns how many were removed.
    async fn sweep(&self) -> usize {
        0
    }

    /// The backend currently in use.
    fn mode(&self) -> StoreMode;
}

/// Build the counter store described by `config`.
///
/// Without a Redis URL the store is process-local. With one, Redis is
/// wrapped in a [`FailoverStore`]; if Redis cannot be reached at startup the
/// gate runs on local counters only.
pub async fn open_store(config: &StoreConfig) -> Arc<dyn CounterStore> {
    let Some(url) = config.redis_url.clone() else {
        info!("No Redis URL configured, using in-memory counters");
        return Arc::new(MemoryStore::new());
    };

    let redis_config = RedisStoreConfig {
        url,
        connect_timeout: config.connect_timeout(),
        operation_timeout: config.operation_timeout(),
    };

    match RedisStore::connect(&redis_config).await {
        Ok(redis) => Arc::new(FailoverStore::new(
            Arc::new(redis),
            Arc::new(MemoryStore::new()),
            config.probe_interval(),
        )),
        Err(error) => {
            warn!(error = %error, "Redis unavailable at startup, using in-memory counters");
            Arc::new(MemoryStore::new())
        }
    }
}
