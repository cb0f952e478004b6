//! Rate limiting logic and state management.

pub(crate) mod counter;
mod key;
mod limiter;
mod policy;
mod registry;

pub use counter::{Hit, WindowCounter};
pub use key::{KeyFn, KeyStrategy, RateKey};
pub use limiter::{Decision, Quota, WindowLimiter, DEFAULT_KEY_PREFIX};
pub use policy::{
    BypassRules, CountMode, LimiterPolicy, PolicyBuilder, PolicyOverride, SkipFn, SkipRule,
    DEFAULT_MAX_REQUESTS, DEFAULT_MESSAGE, DEFAULT_WINDOW,
};
pub use registry::{LimiterName, LimiterRegistry};
