//! Error types for the admission gate.

use thiserror::Error;

/// Main error type for gate operations.
///
/// Everything here is an operator-facing fault. Caller-facing outcomes
/// (quota exceeded, lockout) are modelled by [`crate::admission::Rejection`].
#[derive(Error, Debug)]
pub enum GateError {
    /// Configuration or wiring errors. Fatal at startup.
    #[error("Configuration error: {0}")]
    Config(String),

    /// HTTP server errors
    #[error("Server error: {0}")]
    Server(String),
}

/// Errors raised by a counter store backend.
///
/// These never reach an HTTP caller: the failover store answers from memory
/// and the limiter fails open.
#[derive(Error, Debug)]
pub enum StoreError {
    /// The backend could not be reached.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// The round-trip exceeded the configured bound.
    #[error("store operation timed out after {0}ms")]
    Timeout(u64),

    /// Redis reported an error.
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),

    /// The backend returned something we could not interpret.
    #[error("unexpected store reply: {0}")]
    Protocol(String),
}

/// Result type alias for gate operations.
pub type Result<T> = std::result::Result<T, GateError>;

/// Result type alias for counter store operations.
pub type StoreResult<T> = std::result::Result<T, StoreError>;
