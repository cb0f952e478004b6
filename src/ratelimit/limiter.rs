//! Fixed-window rate limiter.

use std::sync::Arc;
use std::time::Duration;

use axum::http::StatusCode;
use tracing::{debug, trace, warn};

use super::counter::Hit;
use super::key::RateKey;
use super::policy::{BypassRules, CountMode, LimiterPolicy};
use crate::request::RequestInfo;
use crate::store::{CounterStore, StoreMode};

/// Default prefix namespacing rate keys in the counter store.
pub const DEFAULT_KEY_PREFIX: &str = "rl:";

/// Quota state reported to the client in `RateLimit-*` headers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Quota {
    /// Requests allowed per window
    pub limit: u64,
    /// Requests left in the current window
    pub remaining: u64,
    /// Time until the window resets
    pub reset_after: Duration,
}

/// The outcome of checking a request against a policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// The policy's skip rule matched; no counter was touched.
    Skip,
    /// Within quota.
    Allow { key: RateKey, quota: Quota },
    /// Over quota until `retry_after` elapses.
    Reject {
        key: RateKey,
        retry_after: Duration,
        quota: Quota,
    },
}

impl Decision {
    pub fn is_allowed(&self) -> bool {
        !matches!(self, Decision::Reject { .. })
    }
}

/// Applies limiter policies against a counter store.
///
/// This struct is thread-safe and can be shared across request tasks.
pub struct WindowLimiter {
    store: Arc<dyn CounterStore>,
    bypass: BypassRules,
    key_prefix: String,
}

impl WindowLimiter {
    /// Create a limiter over `store`.
    pub fn new(store: Arc<dyn CounterStore>, bypass: BypassRules) -> Self {
        Self::with_prefix(store, bypass, DEFAULT_KEY_PREFIX)
    }

    /// Create a limiter with a custom key prefix.
    pub fn with_prefix(store: Arc<dyn CounterStore>, bypass: BypassRules, key_prefix: impl Into<String>) -> Self {
        Self {
            store,
            bypass,
            key_prefix: key_prefix.into(),
        }
    }

    /// Check `request` against `policy`.
    ///
    /// Every admitted request is counted up front, so concurrent requests
    /// for one key can never overshoot the limit. Policies counting only
    /// failures give the hit back in [`WindowLimiter::record_outcome`] when
    /// the response succeeds. Store errors fail open.
    pub async fn check(&self, policy: &LimiterPolicy, request: &RequestInfo) -> Decision {
        if policy.should_skip(request, &self.bypass) {
            trace!(limiter = %policy.name(), path = %request.path, "Skipping rate limit");
            return Decision::Skip;
        }

        let key = policy.rate_key(&self.key_prefix, request);
        let limit = policy.max_requests();

        trace!(key = %key, limiter = %policy.name(), "Checking rate limit");

        let hit = match self.store.increment(key.as_str(), policy.window()).await {
            Ok(hit) => hit,
            Err(error) => {
                warn!(key = %key, error = %error, "Counter store failed, admitting request");
                return Decision::Allow {
                    key,
                    quota: Quota {
                        limit,
                        remaining: limit,
                        reset_after: policy.window(),
                    },
                };
            }
        };

        let Hit { count, reset_after } = hit;
        let over_limit = count > limit;

        let quota = Quota {
            limit,
            remaining: limit.saturating_sub(count),
            reset_after,
        };

        if over_limit {
            warn!(
                key = %key,
                limiter = %policy.name(),
                count = count,
                limit = limit,
                retry_after_ms = reset_after.as_millis() as u64,
                "Rate limit exceeded"
            );
            Decision::Reject {
                key,
                retry_after: reset_after,
                quota,
            }
        } else {
            Decision::Allow { key, quota }
        }
    }

    /// Feed the final response status back for policies counting failures.
    ///
    /// A response below 400 returns the hit taken in [`WindowLimiter::check`].
    /// Does nothing for policies that count every request.
    pub async fn record_outcome(&self, policy: &LimiterPolicy, key: &RateKey, status: StatusCode) {
        if policy.count_mode() != CountMode::FailuresOnly || status.as_u16() >= 400 {
            return;
        }

        match self.store.decrement(key.as_str()).await {
            Ok(count) => debug!(key = %key, status = status.as_u16(), count = count, "Refunded successful attempt"),
            Err(error) => warn!(key = %key, error = %error, "Failed to refund successful attempt"),
        }
    }

    /// Clear the counter for `key`.
    pub async fn reset(&self, key: &RateKey) {
        if let Err(error) = self.store.reset(key.as_str()).await {
            warn!(key = %key, error = %error, "Failed to reset rate limit counter");
        }
    }

    /// The underlying counter store.
    pub fn store(&self) -> &Arc<dyn CounterStore> {
        &self.store
    }

    /// Which backend is answering.
    pub fn store_mode(&self) -> StoreMode {
        self.store.mode()
    }

    pub fn bypass(&self) -> &BypassRules {
        &self.bypass
    }
}
