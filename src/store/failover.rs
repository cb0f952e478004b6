//! Fail-open wrapper around a shared counter store.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::{info, warn};

use super::{CounterStore, MemoryStore, StoreMode};
use crate::clock::{Clock, SystemClock};
use crate::error::{StoreError, StoreResult};
use crate::ratelimit::counter::window_ms;
use crate::ratelimit::Hit;

/// Routes counter operations to a primary store and answers from local memory
/// while the primary is failing.
///
/// Errors from the primary never escape: the operation is replayed against
/// the fallback and the store switches to degraded mode. While degraded the
/// primary is only retried once per `probe_interval`, so an outage does not
/// add the primary's timeout to every request.
pub struct FailoverStore {
    primary: Arc<dyn CounterStore>,
    fallback: Arc<MemoryStore>,
    clock: Arc<dyn Clock>,
    probe_interval: Duration,
    degraded: AtomicBool,
    next_probe_ms: AtomicU64,
    last_error: Mutex<Option<String>>,
}

impl FailoverStore {
    /// Wrap `primary`, falling back to `fallback`.
    pub fn new(primary: Arc<dyn CounterStore>, fallback: Arc<MemoryStore>, probe_interval: Duration) -> Self {
        Self::with_clock(primary, fallback, probe_interval, Arc::new(SystemClock))
    }

    /// Wrap `primary` with an explicit clock driving the probe schedule.
    pub fn with_clock(
        primary: Arc<dyn CounterStore>,
        fallback: Arc<MemoryStore>,
        probe_interval: Duration,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            primary,
            fallback,
            clock,
            probe_interval,
            degraded: AtomicBool::new(false),
            next_probe_ms: AtomicU64::new(0),
            last_error: Mutex::new(None),
        }
    }

    /// Whether the fallback is currently answering.
    pub fn is_degraded(&self) -> bool {
        self.degraded.load(Ordering::SeqCst)
    }

    /// The most recent primary failure, if degraded.
    pub fn last_error(&self) -> Option<String> {
        self.last_error.lock().clone()
    }

    /// Whether the next operation should try the primary.
    fn should_try_primary(&self) -> bool {
        !self.is_degraded() || self.clock.now_ms() >= self.next_probe_ms.load(Ordering::SeqCst)
    }

    fn mark_failed(&self, op: &'static str, error: &StoreError) {
        let next_probe = self.clock.now_ms().saturating_add(window_ms(self.probe_interval));
        self.next_probe_ms.store(next_probe, Ordering::SeqCst);
        *self.last_error.lock() = Some(error.to_string());

        if !self.degraded.swap(true, Ordering::SeqCst) {
            warn!(
                op = op,
                error = %error,
                probe_interval_ms = window_ms(self.probe_interval),
                "Shared counter store unavailable, falling back to in-memory rate limiting"
            );
        }
    }

    fn mark_healthy(&self) {
        if self.degraded.swap(false, Ordering::SeqCst) {
            *self.last_error.lock() = None;
            info!("Shared counter store recovered, leaving in-memory fallback");
        }
    }
}

#[async_trait]
impl CounterStore for FailoverStore {
    async fn increment(&self, key: &str, window: Duration) -> StoreResult<Hit> {
        if self.should_try_primary() {
            match self.primary.increment(key, window).await {
                Ok(hit) => {
                    self.mark_healthy();
                    return Ok(hit);
                }
                Err(error) => self.mark_failed("increment", &error),
            }
        }
        self.fallback.increment(key, window).await
    }

    async fn decrement(&self, key: &str) -> StoreResult<u64> {
        if self.should_try_primary() {
            match self.primary.decrement(key).await {
                Ok(count) => {
                    self.mark_healthy();
                    return Ok(count);
                }
                Err(error) => self.mark_failed("decrement", &error),
            }
        }
        self.fallback.decrement(key).await
    }

    async fn get(&self, key: &str) -> StoreResult<Option<Hit>> {
        if self.should_try_primary() {
            match self.primary.get(key).await {
                Ok(hit) => {
                    self.mark_healthy();
                    return Ok(hit);
                }
                Err(error) => self.mark_failed("get", &error),
            }
        }
        self.fallback.get(key).await
    }

    async fn reset(&self, key: &str) -> StoreResult<()> {
        // Counts may sit in either store after a degraded period.
        self.fallback.reset(key).await?;
        if self.should_try_primary() {
            match self.primary.reset(key).await {
                Ok(()) => self.mark_healthy(),
                Err(error) => self.mark_failed("reset", &error),
            }
        }
        Ok(())
    }

    async fn sweep(&self) -> usize {
        self.fallback.sweep().await
    }

    fn mode(&self) -> StoreMode {
        if self.is_degraded() {
            StoreMode::Degraded
        } else {
            self.primary.mode()
        }
    }
}
