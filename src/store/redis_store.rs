//! Redis-backed counter store shared across instances.
//!
//! Atomicity is delegated to Redis: one Lua script increments the key and
//! arms its expiry on the first hit of a window, so the TTL is the window.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client, Script};
use tracing::{debug, info};

use super::{CounterStore, StoreMode};
use crate::error::{StoreError, StoreResult};
use crate::ratelimit::counter::window_ms;
use crate::ratelimit::Hit;

/// Increment, arm the expiry if the key has none, and return `{count, pttl}`.
const INCREMENT_SCRIPT: &str = r"
local count = redis.call('INCR', KEYS[1])
local ttl = redis.call('PTTL', KEYS[1])
if ttl < 0 then
    redis.call('PEXPIRE', KEYS[1], ARGV[1])
    ttl = tonumber(ARGV[1])
end
return {count, ttl}
";

/// Give one hit back to a live window; never creates the key or goes below 0.
/// `DECR` keeps the existing expiry.
const DECREMENT_SCRIPT: &str = r"
local count = tonumber(redis.call('GET', KEYS[1]) or '0')
if count > 0 then
    return redis.call('DECR', KEYS[1])
end
return 0
";

/// Connection settings for [`RedisStore`].
#[derive(Debug, Clone)]
pub struct RedisStoreConfig {
    /// Connection URL, e.g. `redis://127.0.0.1:6379`
    pub url: String,
    /// Bound on establishing the initial connection
    pub connect_timeout: Duration,
    /// Bound on each counter round-trip
    pub operation_timeout: Duration,
}

/// A counter store living in Redis.
pub struct RedisStore {
    connection: ConnectionManager,
    increment: Script,
    decrement: Script,
    operation_timeout: Duration,
}

impl std::fmt::Debug for RedisStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisStore")
            .field("operation_timeout", &self.operation_timeout)
            .finish()
    }
}

impl RedisStore {
    /// Connect to Redis.
    ///
    /// Fails if the server cannot be reached within `connect_timeout`; the
    /// caller decides whether to continue memory-only.
    pub async fn connect(config: &RedisStoreConfig) -> StoreResult<Self> {
        let client = Client::open(config.url.as_str())?;

        let connection = tokio::time::timeout(config.connect_timeout, client.get_connection_manager())
            .await
            .map_err(|_| StoreError::Timeout(millis(config.connect_timeout)))??;

        info!(timeout_ms = millis(config.operation_timeout), "Redis connected for rate limiting");

        Ok(Self {
            connection,
            increment: Script::new(INCREMENT_SCRIPT),
            decrement: Script::new(DECREMENT_SCRIPT),
            operation_timeout: config.operation_timeout,
        })
    }

    /// Run a Redis round-trip under the operation timeout.
    async fn bounded<T, F>(&self, op: F) -> StoreResult<T>
    where
        F: Future<Output = redis::RedisResult<T>>,
    {
        match tokio::time::timeout(self.operation_timeout, op).await {
            Ok(result) => result.map_err(StoreError::from),
            Err(_) => Err(StoreError::Timeout(millis(self.operation_timeout))),
        }
    }
}

#[async_trait]
impl CounterStore for RedisStore {
    async fn increment(&self, key: &str, window: Duration) -> StoreResult<Hit> {
        let mut connection = self.connection.clone();
        let mut invocation = self.increment.prepare_invoke();
        invocation.key(key).arg(window_ms(window));

        let (count, ttl): (i64, i64) = self
            .bounded(invocation.invoke_async(&mut connection))
            .await?;

        debug!(key = %key, count = count, ttl_ms = ttl, "Incremented redis counter");

        let count = u64::try_from(count)
            .map_err(|_| StoreError::Protocol(format!("negative count {count} for {key}")))?;

        Ok(Hit {
            count,
            reset_after: ttl_to_duration(ttl),
        })
    }

    async fn decrement(&self, key: &str) -> StoreResult<u64> {
        let mut connection = self.connection.clone();
        let mut invocation = self.decrement.prepare_invoke();
        invocation.key(key);

        let count: i64 = self.bounded(invocation.invoke_async(&mut connection)).await?;
        debug!(key = %key, count = count, "Decremented redis counter");

        u64::try_from(count).map_err(|_| StoreError::Protocol(format!("negative count {count} for {key}")))
    }

    async fn get(&self, key: &str) -> StoreResult<Option<Hit>> {
        let mut connection = self.connection.clone();
        let mut pipeline = redis::pipe();
        pipeline.get(key).pttl(key);

        let (count, ttl): (Option<u64>, i64) = self
            .bounded(pipeline.query_async(&mut connection))
            .await?;

        Ok(count.map(|count| Hit {
            count,
            reset_after: ttl_to_duration(ttl),
        }))
    }

    async fn reset(&self, key: &str) -> StoreResult<()> {
        let mut connection = self.connection.clone();
        let _: () = self.bounded(connection.del(key)).await?;
        Ok(())
    }

    fn mode(&self) -> StoreMode {
        StoreMode::Redis
    }
}

/// `PTTL` is -1 (no expiry) or -2 (missing) for keys without a live window.
fn ttl_to_duration(ttl: i64) -> Duration {
    u64::try_from(ttl).map(Duration::from_millis).unwrap_or(Duration::ZERO)
}

fn millis(duration: Duration) -> u64 {
    window_ms(duration)
}
