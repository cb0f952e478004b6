//! Configuration management for the gate.
//!
//! Settings come from an optional YAML file, then `GATE__`-prefixed
//! environment variables (`GATE__SERVER__TRUST_PROXY=true`), then the
//! deployment variables the API has always used: `REDIS_URL`, `TRUSTED_IPS`
//! and `API_KEYS`.

use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::bruteforce::{BLOCK_DURATION, MAX_ATTEMPTS};
use crate::error::{GateError, Result};
use crate::ratelimit::{LimiterRegistry, PolicyOverride, DEFAULT_KEY_PREFIX};

/// Main configuration for the gate service.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GateConfig {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Counter store configuration
    #[serde(default)]
    pub store: StoreConfig,

    /// Client addresses that bypass the general limiter
    #[serde(default)]
    pub trusted_ips: Vec<IpAddr>,

    /// Per-limiter overrides keyed by limiter name
    #[serde(default)]
    pub limiters: HashMap<String, PolicyOverride>,

    /// Brute-force guard configuration
    #[serde(default)]
    pub brute_force: BruteForceConfig,

    /// Security filter configuration
    #[serde(default)]
    pub security: SecurityConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// HTTP listen address
    #[serde(default = "default_addr")]
    pub addr: SocketAddr,

    /// Take the client address from `X-Forwarded-For`
    #[serde(default)]
    pub trust_proxy: bool,

    /// Health-check path, never rate limited
    #[serde(default = "default_health_path")]
    pub health_path: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            addr: default_addr(),
            trust_proxy: false,
            health_path: default_health_path(),
        }
    }
}

fn default_addr() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 5000))
}

fn default_health_path() -> String {
    "/api/health".to_string()
}

/// Counter store configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Redis URL; absent means process-local counters only
    #[serde(default)]
    pub redis_url: Option<String>,

    /// Prefix for every rate key
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,

    /// Redis connect timeout in milliseconds
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_ms: u64,

    /// Bound on each Redis round-trip in milliseconds
    #[serde(default = "default_operation_timeout")]
    pub operation_timeout_ms: u64,

    /// How often a degraded store retries Redis, in milliseconds
    #[serde(default = "default_probe_interval")]
    pub probe_interval_ms: u64,

    /// Interval between sweeps of expired local state, in seconds
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            redis_url: None,
            key_prefix: default_key_prefix(),
            connect_timeout_ms: default_connect_timeout(),
            operation_timeout_ms: default_operation_timeout(),
            probe_interval_ms: default_probe_interval(),
            sweep_interval_secs: default_sweep_interval(),
        }
    }
}

impl StoreConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn operation_timeout(&self) -> Duration {
        Duration::from_millis(self.operation_timeout_ms)
    }

    pub fn probe_interval(&self) -> Duration {
        Duration::from_millis(self.probe_interval_ms)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

fn default_key_prefix() -> String {
    DEFAULT_KEY_PREFIX.to_string()
}

fn default_connect_timeout() -> u64 {
    2000
}

fn default_operation_timeout() -> u64 {
    250
}

fn default_probe_interval() -> u64 {
    5000
}

fn default_sweep_interval() -> u64 {
    60
}

/// Brute-force guard configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BruteForceConfig {
    /// Failures before a client is blocked
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Block length in seconds
    #[serde(default = "default_block_duration")]
    pub block_duration_secs: u64,
}

impl Default for BruteForceConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            block_duration_secs: default_block_duration(),
        }
    }
}

impl BruteForceConfig {
    pub fn block_duration(&self) -> Duration {
        Duration::from_secs(self.block_duration_secs)
    }
}

fn default_max_attempts() -> u32 {
    MAX_ATTEMPTS
}

/// Longest configurable lockout: one week.
pub const MAX_BLOCK_DURATION_SECS: u64 = 7 * 24 * 60 * 60;

fn default_block_duration() -> u64 {
    BLOCK_DURATION.as_secs()
}

/// Security filter configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityConfig {
    /// Allowlist for admin routes; empty allows everyone
    #[serde(default)]
    pub allowed_ips: Vec<IpAddr>,

    /// Accepted `X-API-Key` values; empty disables the check
    #[serde(default)]
    pub api_keys: Vec<String>,

    /// Content types accepted on POST, PUT and PATCH
    #[serde(default = "default_content_types")]
    pub allowed_content_types: Vec<String>,

    /// Request timeout in milliseconds
    #[serde(default = "default_request_timeout")]
    pub request_timeout_ms: u64,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            allowed_ips: Vec::new(),
            api_keys: Vec::new(),
            allowed_content_types: default_content_types(),
            request_timeout_ms: default_request_timeout(),
        }
    }
}

fn default_content_types() -> Vec<String> {
    vec!["application/json".to_string()]
}

fn default_request_timeout() -> u64 {
    30_000
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default filter directive when `RUST_LOG` is unset
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Emit JSON lines instead of human-readable output
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

impl GateConfig {
    /// Load configuration from an optional file and the environment.
    pub fn load(path: Option<&str>) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::with_name(path));
        }

        let mut config: GateConfig = builder
            .add_source(
                config::Environment::with_prefix("GATE")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .set_override_option("store.redis_url", env_var("REDIS_URL"))
            .and_then(|builder| builder.build())
            .and_then(|settings| settings.try_deserialize())
            .map_err(|e| GateError::Config(e.to_string()))?;

        if let Some(list) = env_var("TRUSTED_IPS") {
            config.trusted_ips = parse_ip_list(&list)?;
        }
        if let Some(list) = env_var("API_KEYS") {
            config.security.api_keys = split_list(&list).map(str::to_string).collect();
        }

        config.validate()?;
        Ok(config)
    }

    /// Parse and validate YAML configuration.
    pub fn from_yaml(contents: &str) -> Result<Self> {
        let config: GateConfig = serde_yaml::from_str(contents).map_err(|e| GateError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings that would only fail later, at first use.
    pub fn validate(&self) -> Result<()> {
        if self.store.operation_timeout_ms == 0 {
            return Err(GateError::Config("store.operation_timeout_ms must be positive".to_string()));
        }
        if self.store.sweep_interval_secs == 0 {
            return Err(GateError::Config("store.sweep_interval_secs must be positive".to_string()));
        }
        if self.brute_force.max_attempts == 0 {
            return Err(GateError::Config("brute_force.max_attempts must be positive".to_string()));
        }
        if self.brute_force.block_duration_secs == 0 {
            return Err(GateError::Config("brute_force.block_duration_secs must be positive".to_string()));
        }
        if self.brute_force.block_duration_secs > MAX_BLOCK_DURATION_SECS {
            return Err(GateError::Config(format!(
                "brute_force.block_duration_secs must be at most {MAX_BLOCK_DURATION_SECS}"
            )));
        }
        if self.security.request_timeout_ms == 0 {
            return Err(GateError::Config("security.request_timeout_ms must be positive".to_string()));
        }
        if !self.server.health_path.starts_with('/') {
            return Err(GateError::Config("server.health_path must start with '/'".to_string()));
        }
        self.registry().map(|_| ())
    }

    /// The limiter registry with this configuration's overrides applied.
    pub fn registry(&self) -> Result<LimiterRegistry> {
        LimiterRegistry::with_overrides(&self.limiters)
    }
}

fn env_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|value| !value.trim().is_empty())
}

fn split_list(list: &str) -> impl Iterator<Item = &str> {
    list.split(',').map(str::trim).filter(|item| !item.is_empty())
}

/// Parse a comma-separated address list.
pub fn parse_ip_list(list: &str) -> Result<Vec<IpAddr>> {
    split_list(list)
        .map(|item| {
            item.parse()
                .map_err(|_| GateError::Config(format!("invalid IP address '{item}'")))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ratelimit::LimiterName;

    #[test]
    fn test_defaults() {
        let config = GateConfig::default();

        assert_eq!(config.server.health_path, "/api/health");
        assert!(!config.server.trust_proxy);
        assert!(config.store.redis_url.is_none());
        assert_eq!(config.store.key_prefix, "rl:");
        assert_eq!(config.store.operation_timeout(), Duration::from_millis(250));
        assert_eq!(config.store.sweep_interval(), Duration::from_secs(60));
        assert_eq!(config.brute_force.max_attempts, 5);
        assert_eq!(config.brute_force.block_duration(), Duration::from_secs(900));
        assert_eq!(config.security.allowed_content_types, vec!["application/json"]);
        assert_eq!(config.security.request_timeout_ms, 30_000);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_yaml_with_overrides() {
        let yaml = r#"
server:
  addr: "0.0.0.0:8080"
  trust_proxy: true
store:
  redis_url: "redis://cache:6379"
trusted_ips: ["10.0.0.5"]
limiters:
  search:
    max_requests: 20
  passwordReset:
    window_ms: 1800000
"#;
        let config = GateConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.server.addr.port(), 8080);
        assert!(config.server.trust_proxy);
        assert_eq!(config.store.redis_url.as_deref(), Some("redis://cache:6379"));
        assert_eq!(config.trusted_ips, vec!["10.0.0.5".parse::<IpAddr>().unwrap()]);

        let registry = config.registry().unwrap();
        assert_eq!(registry.get(LimiterName::Search).max_requests(), 20);
        assert_eq!(registry.get(LimiterName::PasswordReset).window(), Duration::from_secs(1800));
    }

    #[test]
    fn test_unknown_limiter_rejected() {
        let yaml = "limiters:\n  donations:\n    max_requests: 1\n";
        assert!(matches!(GateConfig::from_yaml(yaml), Err(GateError::Config(_))));
    }

    #[test]
    fn test_invalid_override_rejected() {
        let yaml = "limiters:\n  auth:\n    max_requests: 0\n";
        assert!(GateConfig::from_yaml(yaml).is_err());
    }

    #[test]
    fn test_block_duration_is_capped() {
        let mut config = GateConfig::default();
        config.brute_force.block_duration_secs = MAX_BLOCK_DURATION_SECS;
        assert!(config.validate().is_ok());

        config.brute_force.block_duration_secs = u64::MAX;
        assert!(matches!(config.validate(), Err(GateError::Config(_))));
    }

    #[test]
    fn test_parse_ip_list() {
        let ips = parse_ip_list(" 10.0.0.1, ::1 ,,").unwrap();
        assert_eq!(ips.len(), 2);
        assert!(parse_ip_list("10.0.0.1,not-an-ip").is_err());
    }
}
