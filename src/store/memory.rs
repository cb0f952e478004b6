//! In-process counter store.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use tracing::trace;

use super::{CounterStore, StoreMode};
use crate::clock::{Clock, SystemClock};
use crate::error::StoreResult;
use crate::ratelimit::{Hit, WindowCounter};

/// Counters held in a sharded concurrent map.
///
/// Each increment runs under the shard's write lock through the entry API, so
/// rollover and increment are one step and concurrent handlers cannot lose
/// updates. Expired windows are recreated lazily on access and removed for
/// good by [`CounterStore::sweep`].
pub struct MemoryStore {
    counters: DashMap<String, WindowCounter>,
    clock: Arc<dyn Clock>,
}

impl MemoryStore {
    /// Create an empty store on the system clock.
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Create an empty store on the given clock.
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            counters: DashMap::new(),
            clock,
        }
    }

    /// Number of tracked keys, expired or not.
    pub fn len(&self) -> usize {
        self.counters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.counters.is_empty()
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CounterStore for MemoryStore {
    async fn increment(&self, key: &str, window: Duration) -> StoreResult<Hit> {
        let now = self.clock.now_ms();
        let mut counter = self
            .counters
            .entry(key.to_string())
            .or_insert_with(|| WindowCounter::open(now, window));

        let count = counter.hit(now, window, 1);
        trace!(key = %key, count = count, "Incremented memory counter");

        Ok(Hit {
            count,
            reset_after: counter.remaining(now),
        })
    }

    async fn decrement(&self, key: &str) -> StoreResult<u64> {
        let now = self.clock.now_ms();
        Ok(self
            .counters
            .get_mut(key)
            .map(|mut counter| counter.refund(now))
            .unwrap_or(0))
    }

    async fn get(&self, key: &str) -> StoreResult<Option<Hit>> {
        let now = self.clock.now_ms();
        Ok(self
            .counters
            .get(key)
            .filter(|counter| !counter.is_expired(now))
            .map(|counter| counter.snapshot(now)))
    }

    async fn reset(&self, key: &str) -> StoreResult<()> {
        self.counters.remove(key);
        Ok(())
    }

    async fn sweep(&self) -> usize {
        let now = self.clock.now_ms();
        let before = self.counters.len();
        self.counters.retain(|_, counter| !counter.is_expired(now));
        before.saturating_sub(self.counters.len())
    }

    fn mode(&self) -> StoreMode {
        StoreMode::Memory
    }
}
