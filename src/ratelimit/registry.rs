//! The named limiters protecting the API.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::info;

use super::key::KeyStrategy;
use super::policy::{CountMode, LimiterPolicy, PolicyOverride, SkipRule};
use crate::error::{GateError, Result};

const MINUTE: Duration = Duration::from_secs(60);
const QUARTER_HOUR: Duration = Duration::from_secs(15 * 60);
const HOUR: Duration = Duration::from_secs(60 * 60);

/// The limiters every deployment has.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum LimiterName {
    General,
    Auth,
    Registration,
    PasswordReset,
    Creation,
    Upload,
    Search,
    Contact,
    Admin,
}

impl LimiterName {
    pub const ALL: [LimiterName; 9] = [
        LimiterName::General,
        LimiterName::Auth,
        LimiterName::Registration,
        LimiterName::PasswordReset,
        LimiterName::Creation,
        LimiterName::Upload,
        LimiterName::Search,
        LimiterName::Contact,
        LimiterName::Admin,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            LimiterName::General => "general",
            LimiterName::Auth => "auth",
            LimiterName::Registration => "registration",
            LimiterName::PasswordReset => "passwordReset",
            LimiterName::Creation => "creation",
            LimiterName::Upload => "upload",
            LimiterName::Search => "search",
            LimiterName::Contact => "contact",
            LimiterName::Admin => "admin",
        }
    }

    fn index(self) -> usize {
        self as usize
    }

    /// The built-in policy for this limiter.
    pub fn default_policy(self) -> LimiterPolicy {
        let name = self.as_str();
        match self {
            LimiterName::General => LimiterPolicy::preset(
                name,
                QUARTER_HOUR,
                100,
                "Too many requests from this IP, please try again later",
            )
            .skipping(SkipRule::Bypass),
            LimiterName::Auth => LimiterPolicy::preset(
                name,
                QUARTER_HOUR,
                5,
                "Too many authentication attempts, please try again later",
            )
            .keyed_by(KeyStrategy::IpAndEmail)
            .counting(CountMode::FailuresOnly),
            LimiterName::Registration => LimiterPolicy::preset(
                name,
                HOUR,
                3,
                "Too many registration attempts, please try again later",
            ),
            LimiterName::PasswordReset => LimiterPolicy::preset(
                name,
                HOUR,
                3,
                "Too many password reset attempts, please try again later",
            ),
            LimiterName::Creation => LimiterPolicy::preset(
                name,
                HOUR,
                20,
                "Too many creation requests, please try again later",
            ),
            LimiterName::Upload => LimiterPolicy::preset(
                name,
                HOUR,
                10,
                "Too many upload requests, please try again later",
            ),
            LimiterName::Search => LimiterPolicy::preset(
                name,
                MINUTE,
                50,
                "Too many search requests, please slow down",
            ),
            LimiterName::Contact => LimiterPolicy::preset(
                name,
                HOUR,
                5,
                "Too many contact form submissions, please try again later",
            ),
            LimiterName::Admin => LimiterPolicy::preset(
                name,
                QUARTER_HOUR,
                100,
                "Too many admin requests, please try again later",
            ),
        }
    }
}

impl fmt::Display for LimiterName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LimiterName {
    type Err = GateError;

    /// Accepts the camelCase names plus snake_case spellings used in env keys.
    fn from_str(s: &str) -> Result<Self> {
        let normalized: String = s.chars().filter(|c| *c != '_' && *c != '-').collect();
        LimiterName::ALL
            .into_iter()
            .find(|name| name.as_str().eq_ignore_ascii_case(&normalized))
            .ok_or_else(|| GateError::Config(format!("unknown limiter '{s}'")))
    }
}

/// The set of named limiter policies.
///
/// Every [`LimiterName`] always has a policy, so lookups cannot fail.
#[derive(Debug, Clone)]
pub struct LimiterRegistry {
    policies: [Arc<LimiterPolicy>; 9],
}

impl LimiterRegistry {
    /// A registry holding the built-in policies.
    pub fn new() -> Self {
        Self {
            policies: LimiterName::ALL.map(|name| Arc::new(name.default_policy())),
        }
    }

    /// Built-in policies with configuration overrides merged in.
    ///
    /// Unknown limiter names and invalid values are configuration errors.
    pub fn with_overrides(overrides: &HashMap<String, PolicyOverride>) -> Result<Self> {
        let mut registry = Self::new();
        for (raw_name, patch) in overrides {
            let name: LimiterName = raw_name.parse()?;
            let policy = name.default_policy().with_override(patch)?;
            info!(
                limiter = %name,
                window_ms = policy.window().as_millis() as u64,
                max_requests = policy.max_requests(),
                "Applied limiter override"
            );
            registry.policies[name.index()] = Arc::new(policy);
        }
        Ok(registry)
    }

    /// The policy for `name`.
    pub fn get(&self, name: LimiterName) -> Arc<LimiterPolicy> {
        self.policies[name.index()].clone()
    }

    /// Iterate over all named policies.
    pub fn iter(&self) -> impl Iterator<Item = (LimiterName, &Arc<LimiterPolicy>)> {
        LimiterName::ALL.into_iter().zip(self.policies.iter())
    }
}

impl Default for LimiterRegistry {
    fn default() -> Self {
        Self::new()
    }
}
