//! Failed-attempt tracking with temporary lockout.
//!
//! The guard keeps one record per (client, route). Failed responses (401 and
//! 403) accumulate until the client reaches the attempt limit, after which
//! every request for that route is refused until the block expires. A
//! successful response forgets the client entirely.

use std::sync::Arc;
use std::time::Duration;

use axum::http::StatusCode;
use dashmap::DashMap;
use tracing::{debug, info, warn};

use crate::clock::{Clock, SystemClock};
use crate::ratelimit::counter::window_ms;

/// Failures tolerated before a client is blocked.
pub const MAX_ATTEMPTS: u32 = 5;
/// How long a block lasts.
pub const BLOCK_DURATION: Duration = Duration::from_secs(15 * 60);

/// Failure history for one client on one route.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BruteForceRecord {
    pub failure_count: u32,
    /// Epoch millis at which the block lifts; `None` while accumulating.
    pub blocked_until: Option<u64>,
    pub last_failure_ms: u64,
}

/// A refused request from a blocked client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Lockout {
    /// Time until the block lifts
    pub remaining: Duration,
}

impl Lockout {
    /// Whole minutes left, rounded up.
    pub fn minutes(&self) -> u64 {
        window_ms(self.remaining).div_ceil(60_000)
    }

    pub fn message(&self) -> String {
        format!("Too many failed attempts. Try again in {} minutes", self.minutes())
    }
}

/// Tracks failed attempts per (client, route) and enforces lockouts.
pub struct BruteForceGuard {
    records: DashMap<(String, String), BruteForceRecord>,
    max_attempts: u32,
    block_ms: u64,
    clock: Arc<dyn Clock>,
}

impl BruteForceGuard {
    /// Create a guard using the system clock.
    pub fn new(max_attempts: u32, block_duration: Duration) -> Self {
        Self::with_clock(max_attempts, block_duration, Arc::new(SystemClock))
    }

    /// Create a guard driven by `clock`.
    pub fn with_clock(max_attempts: u32, block_duration: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            records: DashMap::new(),
            max_attempts: max_attempts.max(1),
            block_ms: window_ms(block_duration),
            clock,
        }
    }

    /// Refuse the request if the client is blocked on `route`.
    ///
    /// Expired blocks are removed here, on the client's next request.
    pub fn check(&self, client: &str, route: &str) -> Result<(), Lockout> {
        let now = self.clock.now_ms();
        let key = (client.to_string(), route.to_string());

        let blocked_until = match self.records.get(&key) {
            Some(record) => record.blocked_until,
            None => return Ok(()),
        };

        match blocked_until {
            Some(until) if now < until => Err(Lockout {
                remaining: Duration::from_millis(until - now),
            }),
            Some(_) => {
                self.records
                    .remove_if(&key, |_, record| record.blocked_until.is_some_and(|until| now >= until));
                info!(client = %client, route = %route, "Brute-force block expired");
                Ok(())
            }
            None => Ok(()),
        }
    }

    /// Update the record for (client, route) with the final response status.
    ///
    /// 2xx clears the record, 401 and 403 count as failures, anything else
    /// leaves the record untouched.
    pub fn record_outcome(&self, client: &str, route: &str, status: StatusCode) {
        if status.is_success() {
            if self.records.remove(&(client.to_string(), route.to_string())).is_some() {
                debug!(client = %client, route = %route, "Cleared failed attempts after success");
            }
            return;
        }

        if status != StatusCode::UNAUTHORIZED && status != StatusCode::FORBIDDEN {
            return;
        }

        let now = self.clock.now_ms();
        let mut record = self
            .records
            .entry((client.to_string(), route.to_string()))
            .or_insert(BruteForceRecord {
                failure_count: 0,
                blocked_until: None,
                last_failure_ms: now,
            });

        // Already blocked: the rejection itself is a 403, don't extend it.
        if record.blocked_until.is_some_and(|until| now < until) {
            return;
        }

        record.failure_count = record.failure_count.saturating_add(1);
        record.last_failure_ms = now;

        if record.failure_count >= self.max_attempts {
            record.blocked_until = Some(now.saturating_add(self.block_ms));
            warn!(
                client = %client,
                route = %route,
                failures = record.failure_count,
                block_ms = self.block_ms,
                "Client blocked after repeated failures"
            );
        }
    }

    /// Current record for (client, route), if any.
    pub fn record(&self, client: &str, route: &str) -> Option<BruteForceRecord> {
        self.records
            .get(&(client.to_string(), route.to_string()))
            .map(|record| *record)
    }

    /// Drop expired blocks and idle accumulating records.
    pub fn sweep(&self) -> usize {
        let now = self.clock.now_ms();
        let before = self.records.len();
        self.records.retain(|_, record| match record.blocked_until {
            Some(until) => now < until,
            None => now.saturating_sub(record.last_failure_ms) < self.block_ms,
        });
        before.saturating_sub(self.records.len())
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl Default for BruteForceGuard {
    fn default() -> Self {
        Self::new(MAX_ATTEMPTS, BLOCK_DURATION)
    }
}
