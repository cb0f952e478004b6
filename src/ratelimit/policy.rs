//! Limiter policies and the rules that shape them.
//!
//! A policy is immutable once built. Configuration overrides are merged over
//! a policy at startup and validated there, never at first use.

use std::collections::HashSet;
use std::fmt;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::key::{KeyStrategy, RateKey};
use crate::error::{GateError, Result};
use crate::request::RequestInfo;

/// Default window for ad-hoc policies.
pub const DEFAULT_WINDOW: Duration = Duration::from_secs(15 * 60);
/// Default request budget for ad-hoc policies.
pub const DEFAULT_MAX_REQUESTS: u64 = 100;
/// Default rejection message.
pub const DEFAULT_MESSAGE: &str = "Too many requests, please try again later";

/// Decides whether a request bypasses a limiter.
pub type SkipFn = Arc<dyn Fn(&RequestInfo) -> bool + Send + Sync>;

/// Which requests increment the counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CountMode {
    /// Every admitted request counts, before the handler runs.
    All,
    /// Only requests whose response status is 400 or above count, after the
    /// handler runs. A subject stays blocked once its window count reaches
    /// the limit, until the window rolls over.
    FailuresOnly,
}

/// When a limiter is bypassed entirely.
#[derive(Clone)]
pub enum SkipRule {
    /// Never bypassed
    Never,
    /// Bypassed for the health-check path and trusted client addresses
    Bypass,
    /// Bypassed when the function returns true
    Custom(SkipFn),
}

impl SkipRule {
    /// Whether `request` skips the limiter.
    pub fn applies(&self, request: &RequestInfo, bypass: &BypassRules) -> bool {
        match self {
            SkipRule::Never => false,
            SkipRule::Bypass => bypass.matches(request),
            SkipRule::Custom(skip_fn) => skip_fn(request),
        }
    }
}

impl fmt::Debug for SkipRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipRule::Never => f.write_str("Never"),
            SkipRule::Bypass => f.write_str("Bypass"),
            SkipRule::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

/// Deployment-wide bypass: the health-check path and trusted addresses.
#[derive(Debug, Clone, Default)]
pub struct BypassRules {
    health_path: Option<String>,
    trusted_ips: HashSet<IpAddr>,
}

impl BypassRules {
    pub fn new(health_path: impl Into<String>, trusted_ips: impl IntoIterator<Item = IpAddr>) -> Self {
        Self {
            health_path: Some(health_path.into()),
            trusted_ips: trusted_ips.into_iter().collect(),
        }
    }

    /// Whether the client address is on the allowlist.
    pub fn is_trusted(&self, request: &RequestInfo) -> bool {
        request
            .client_ip
            .is_some_and(|ip| self.trusted_ips.contains(&ip))
    }

    /// Whether `request` is for the health-check path.
    pub fn is_health_check(&self, request: &RequestInfo) -> bool {
        self.health_path.as_deref() == Some(request.path.as_str())
    }

    pub fn matches(&self, request: &RequestInfo) -> bool {
        self.is_health_check(request) || self.is_trusted(request)
    }
}

/// Configuration override for a named limiter.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PolicyOverride {
    /// Window length in milliseconds
    #[serde(default)]
    pub window_ms: Option<u64>,
    /// Requests allowed per window
    #[serde(default)]
    pub max_requests: Option<u64>,
    /// Rejection message
    #[serde(default)]
    pub message: Option<String>,
}

/// An immutable limiter policy.
#[derive(Debug, Clone)]
pub struct LimiterPolicy {
    name: String,
    window: Duration,
    max_requests: u64,
    key: KeyStrategy,
    skip: SkipRule,
    count: CountMode,
    message: String,
}

impl LimiterPolicy {
    /// Start building an ad-hoc policy with the shared defaults
    /// (15 minutes, 100 requests, keyed by IP, counting everything).
    pub fn custom(name: impl Into<String>) -> PolicyBuilder {
        PolicyBuilder {
            policy: Self::preset(name, DEFAULT_WINDOW, DEFAULT_MAX_REQUESTS, DEFAULT_MESSAGE),
        }
    }

    /// A policy from known-good constants.
    pub(crate) fn preset(name: impl Into<String>, window: Duration, max_requests: u64, message: &str) -> Self {
        Self {
            name: name.into(),
            window,
            max_requests,
            key: KeyStrategy::Ip,
            skip: SkipRule::Never,
            count: CountMode::All,
            message: message.to_string(),
        }
    }

    pub(crate) fn keyed_by(mut self, key: KeyStrategy) -> Self {
        self.key = key;
        self
    }

    pub(crate) fn skipping(mut self, skip: SkipRule) -> Self {
        self.skip = skip;
        self
    }

    pub(crate) fn counting(mut self, count: CountMode) -> Self {
        self.count = count;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    pub fn max_requests(&self) -> u64 {
        self.max_requests
    }

    pub fn key_strategy(&self) -> &KeyStrategy {
        &self.key
    }

    pub fn skip_rule(&self) -> &SkipRule {
        &self.skip
    }

    pub fn count_mode(&self) -> CountMode {
        self.count
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    /// Whether `request` bypasses this policy.
    pub fn should_skip(&self, request: &RequestInfo, bypass: &BypassRules) -> bool {
        self.skip.applies(request, bypass)
    }

    /// The counter key for `request` under this policy.
    pub fn rate_key(&self, prefix: &str, request: &RequestInfo) -> RateKey {
        RateKey::new(prefix, &self.name, &self.key.subject(request))
    }

    /// Merge a configuration override and re-validate.
    pub fn with_override(mut self, patch: &PolicyOverride) -> Result<Self> {
        if let Some(window_ms) = patch.window_ms {
            self.window = Duration::from_millis(window_ms);
        }
        if let Some(max_requests) = patch.max_requests {
            self.max_requests = max_requests;
        }
        if let Some(message) = &patch.message {
            self.message = message.clone();
        }
        self.validate()?;
        Ok(self)
    }

    fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(GateError::Config("limiter name must not be empty".to_string()));
        }
        if self.window.is_zero() {
            return Err(GateError::Config(format!("limiter '{}': window must be positive", self.name)));
        }
        if self.max_requests == 0 {
            return Err(GateError::Config(format!(
                "limiter '{}': max_requests must be positive",
                self.name
            )));
        }
        Ok(())
    }
}

/// Builder for ad-hoc policies, validated on [`PolicyBuilder::build`].
#[derive(Debug, Clone)]
pub struct PolicyBuilder {
    policy: LimiterPolicy,
}

impl PolicyBuilder {
    pub fn window(mut self, window: Duration) -> Self {
        self.policy.window = window;
        self
    }

    pub fn max_requests(mut self, max_requests: u64) -> Self {
        self.policy.max_requests = max_requests;
        self
    }

    pub fn key(mut self, key: KeyStrategy) -> Self {
        self.policy.key = key;
        self
    }

    pub fn skip(mut self, skip: SkipRule) -> Self {
        self.policy.skip = skip;
        self
    }

    pub fn count(mut self, count: CountMode) -> Self {
        self.policy.count = count;
        self
    }

    pub fn message(mut self, message: impl Into<String>) -> Self {
        self.policy.message = message.into();
        self
    }

    /// Validate and return the policy.
    pub fn build(self) -> Result<LimiterPolicy> {
        self.policy.validate()?;
        Ok(self.policy)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Method;

    fn request(path: &str, ip: &str) -> RequestInfo {
        RequestInfo::new(Method::GET, path).with_client_ip(ip.parse().unwrap())
    }

    #[test]
    fn test_custom_policy_defaults() {
        let policy = LimiterPolicy::custom("reports").build().unwrap();

        assert_eq!(policy.name(), "reports");
        assert_eq!(policy.window(), DEFAULT_WINDOW);
        assert_eq!(policy.max_requests(), DEFAULT_MAX_REQUESTS);
        assert_eq!(policy.count_mode(), CountMode::All);
        assert_eq!(policy.message(), DEFAULT_MESSAGE);
    }

    #[test]
    fn test_builder_rejects_zero_window_and_max() {
        assert!(LimiterPolicy::custom("x").window(Duration::ZERO).build().is_err());
        assert!(LimiterPolicy::custom("x").max_requests(0).build().is_err());
        assert!(LimiterPolicy::custom("").build().is_err());
    }

    #[test]
    fn test_override_merges_and_validates() {
        let base = LimiterPolicy::custom("search")
            .window(Duration::from_secs(60))
            .max_requests(50)
            .build()
            .unwrap();

        let patched = base
            .clone()
            .with_override(&PolicyOverride {
                max_requests: Some(10),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(patched.max_requests(), 10);
        assert_eq!(patched.window(), Duration::from_secs(60));

        let invalid = base.with_override(&PolicyOverride {
            window_ms: Some(0),
            ..Default::default()
        });
        assert!(matches!(invalid, Err(GateError::Config(_))));
    }

    #[test]
    fn test_bypass_rules() {
        let bypass = BypassRules::new("/api/health", ["10.1.1.1".parse().unwrap()]);

        assert!(bypass.matches(&request("/api/health", "192.0.2.1")));
        assert!(bypass.matches(&request("/api/donations", "10.1.1.1")));
        assert!(!bypass.matches(&request("/api/donations", "192.0.2.1")));
        assert!(!bypass.matches(&RequestInfo::new(Method::GET, "/api/donations")));
    }

    #[test]
    fn test_skip_rules() {
        let bypass = BypassRules::new("/api/health", []);
        let health = request("/api/health", "192.0.2.1");

        assert!(SkipRule::Bypass.applies(&health, &bypass));
        assert!(!SkipRule::Never.applies(&health, &bypass));

        let custom = SkipRule::Custom(Arc::new(|r: &RequestInfo| r.method == Method::OPTIONS));
        assert!(!custom.applies(&health, &bypass));
    }

    #[test]
    fn test_rate_key_uses_policy_name() {
        let policy = LimiterPolicy::custom("upload").build().unwrap();
        let key = policy.rate_key("rl:", &request("/api/upload", "192.0.2.1"));
        assert_eq!(key.as_str(), "rl:upload:192.0.2.1");
    }
}
