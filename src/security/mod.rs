//! Request security filters.
//!
//! Small, independent axum middlewares: response hardening headers,
//! suspicious-request logging, an IP allowlist, API-key and content-type
//! checks, and a request timeout. All of them read a shared
//! [`SecurityPolicy`] built from configuration at startup.

mod filters;
mod headers;
mod suspicious;

use std::collections::HashSet;
use std::net::IpAddr;
use std::time::Duration;

pub use filters::{ip_allowlist, request_timeout, require_api_key, require_content_type};
pub use headers::security_headers;
pub use suspicious::{log_suspicious, SuspiciousPatterns};

use crate::config::SecurityConfig;
use crate::error::Result;

/// Header carrying the client API key.
pub const API_KEY_HEADER: &str = "x-api-key";

/// Settings shared by the security middlewares.
#[derive(Debug, Clone)]
pub struct SecurityPolicy {
    /// Addresses allowed on restricted routes; empty allows everyone
    pub allowed_ips: HashSet<IpAddr>,
    /// Accepted API keys; empty disables the check
    pub api_keys: HashSet<String>,
    /// Content types accepted on POST, PUT and PATCH
    pub allowed_content_types: Vec<String>,
    pub request_timeout: Duration,
    pub trust_proxy: bool,
    pub patterns: SuspiciousPatterns,
}

impl SecurityPolicy {
    /// Build the policy, compiling the suspicious-request patterns.
    pub fn from_config(config: &SecurityConfig, trust_proxy: bool) -> Result<Self> {
        Ok(Self {
            allowed_ips: config.allowed_ips.iter().copied().collect(),
            api_keys: config.api_keys.iter().cloned().collect(),
            allowed_content_types: config.allowed_content_types.clone(),
            request_timeout: Duration::from_millis(config.request_timeout_ms),
            trust_proxy,
            patterns: SuspiciousPatterns::new()?,
        })
    }
}
