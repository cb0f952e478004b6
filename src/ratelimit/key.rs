//! Rate key generation.

use std::fmt;
use std::sync::Arc;

use crate::request::RequestInfo;

/// Derives the limited subject from a request.
pub type KeyFn = Arc<dyn Fn(&RequestInfo) -> String + Send + Sync>;

/// How a limiter identifies the subject it counts.
#[derive(Clone)]
pub enum KeyStrategy {
    /// The client address
    Ip,
    /// The client address and the `email` field of the body
    IpAndEmail,
    /// An application-supplied function
    Custom(KeyFn),
}

impl KeyStrategy {
    /// The subject part of the key for `request`.
    pub fn subject(&self, request: &RequestInfo) -> String {
        match self {
            KeyStrategy::Ip => request.client_id(),
            KeyStrategy::IpAndEmail => {
                let email = request.email.as_deref().unwrap_or("unknown");
                format!("{}:{}", request.client_id(), email)
            }
            KeyStrategy::Custom(key_fn) => key_fn(request),
        }
    }

    /// Whether the request body must be parsed before deriving the key.
    pub fn needs_body(&self) -> bool {
        matches!(self, KeyStrategy::IpAndEmail)
    }
}

impl fmt::Debug for KeyStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyStrategy::Ip => f.write_str("Ip"),
            KeyStrategy::IpAndEmail => f.write_str("IpAndEmail"),
            KeyStrategy::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

/// A key that uniquely identifies a limited subject.
///
/// Composed of the store prefix, the limiter name and the subject, so two
/// limiters never share a counter for the same client.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RateKey(String);

impl RateKey {
    /// Create a key for `subject` under limiter `limiter`.
    pub fn new(prefix: &str, limiter: &str, subject: &str) -> Self {
        Self(format!("{prefix}{limiter}:{subject}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
