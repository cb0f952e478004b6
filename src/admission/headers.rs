//! Rate-limit response headers.

use std::time::Duration;

use axum::http::{HeaderMap, HeaderName, HeaderValue};

use crate::ratelimit::Quota;

pub const RATELIMIT_LIMIT: HeaderName = HeaderName::from_static("ratelimit-limit");
pub const RATELIMIT_REMAINING: HeaderName = HeaderName::from_static("ratelimit-remaining");
pub const RATELIMIT_RESET: HeaderName = HeaderName::from_static("ratelimit-reset");
pub const RATELIMIT_POLICY: HeaderName = HeaderName::from_static("x-ratelimit-policy");

const POLICY_NAME: &str = "FoodSaver API Rate Limiting";

/// Whole seconds, rounded up.
pub(crate) fn ceil_secs(duration: Duration) -> u64 {
    (duration.as_millis() as u64).div_ceil(1000)
}

/// Advertise the quota on an allowed response.
///
/// Layers nest, so the innermost (route-specific) limiter's quota wins.
pub fn insert_quota(headers: &mut HeaderMap, quota: &Quota) {
    if headers.contains_key(RATELIMIT_LIMIT) {
        return;
    }
    headers.insert(RATELIMIT_LIMIT, HeaderValue::from(quota.limit));
    headers.insert(RATELIMIT_REMAINING, HeaderValue::from(quota.remaining));
    headers.insert(RATELIMIT_RESET, HeaderValue::from(ceil_secs(quota.reset_after)));
    insert_policy(headers);
}

pub(crate) fn insert_policy(headers: &mut HeaderMap) {
    headers.insert(RATELIMIT_POLICY, HeaderValue::from_static(POLICY_NAME));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ceil_secs() {
        assert_eq!(ceil_secs(Duration::ZERO), 0);
        assert_eq!(ceil_secs(Duration::from_millis(1)), 1);
        assert_eq!(ceil_secs(Duration::from_millis(59_970)), 60);
        assert_eq!(ceil_secs(Duration::from_secs(900)), 900);
    }

    #[test]
    fn test_insert_quota() {
        let mut headers = HeaderMap::new();
        insert_quota(
            &mut headers,
            &Quota {
                limit: 100,
                remaining: 97,
                reset_after: Duration::from_millis(899_500),
            },
        );

        assert_eq!(headers[RATELIMIT_LIMIT], "100");
        assert_eq!(headers[RATELIMIT_REMAINING], "97");
        assert_eq!(headers[RATELIMIT_RESET], "900");
        assert_eq!(headers[RATELIMIT_POLICY], POLICY_NAME);
    }

    #[test]
    fn test_inner_quota_wins() {
        let mut headers = HeaderMap::new();
        let quota = |limit, remaining| Quota {
            limit,
            remaining,
            reset_after: Duration::from_secs(60),
        };

        insert_quota(&mut headers, &quota(5, 4));
        insert_quota(&mut headers, &quota(100, 99));

        assert_eq!(headers[RATELIMIT_LIMIT], "5");
        assert_eq!(headers[RATELIMIT_REMAINING], "4");
    }
}
