//! Ordering of admission checks and their completion hooks.

use std::sync::Arc;

use axum::http::StatusCode;
use tracing::{debug, trace};

use super::rejection::Rejection;
use crate::bruteforce::BruteForceGuard;
use crate::ratelimit::{Decision, LimiterName, LimiterPolicy, LimiterRegistry, Quota, RateKey, WindowLimiter};
use crate::request::RequestInfo;

/// The limiter a route group is held to.
#[derive(Debug, Clone)]
pub enum RouteLimiter {
    /// One of the registry's policies, overrides included
    Named(LimiterName),
    /// An ad-hoc policy from [`LimiterPolicy::custom`]
    Custom(Arc<LimiterPolicy>),
}

/// What protects a group of routes.
#[derive(Debug, Clone)]
pub struct RouteRule {
    pub limiter: RouteLimiter,
    /// Track failed attempts per client and lock out repeat offenders
    pub brute_force: bool,
}

impl RouteRule {
    pub const fn new(limiter: LimiterName) -> Self {
        Self {
            limiter: RouteLimiter::Named(limiter),
            brute_force: false,
        }
    }

    /// Rule for credential-checking routes.
    pub const fn guarded(limiter: LimiterName) -> Self {
        Self {
            limiter: RouteLimiter::Named(limiter),
            brute_force: true,
        }
    }

    /// Rule enforcing a policy outside the registry.
    pub fn custom(policy: impl Into<Arc<LimiterPolicy>>) -> Self {
        Self {
            limiter: RouteLimiter::Custom(policy.into()),
            brute_force: false,
        }
    }

    /// Add brute-force tracking to this rule.
    pub fn with_brute_force(mut self) -> Self {
        self.brute_force = true;
        self
    }
}

/// Proof of admission, consumed by [`AdmissionPipeline::complete`].
///
/// Completion hooks need the final response status, so the ticket is carried
/// across the handler call and redeemed exactly once.
#[must_use = "an admitted request must be completed with its final status"]
#[derive(Debug)]
pub struct Ticket {
    policy: Arc<LimiterPolicy>,
    key: Option<RateKey>,
    quota: Option<Quota>,
    guard_subject: Option<(String, String)>,
}

impl Ticket {
    /// Quota to advertise on the response; `None` when the limiter was skipped.
    pub fn quota(&self) -> Option<Quota> {
        self.quota
    }
}

/// Runs the admission checks for a request and the hooks after it.
///
/// Order: limiter skip rule, brute-force pre-check, window limiter. The
/// first refusal wins.
pub struct AdmissionPipeline {
    registry: LimiterRegistry,
    limiter: WindowLimiter,
    guard: Arc<BruteForceGuard>,
    trust_proxy: bool,
}

impl AdmissionPipeline {
    pub fn new(registry: LimiterRegistry, limiter: WindowLimiter, guard: Arc<BruteForceGuard>) -> Self {
        Self {
            registry,
            limiter,
            guard,
            trust_proxy: false,
        }
    }

    /// Take the client address from `X-Forwarded-For` when present.
    pub fn trust_proxy(mut self, trust_proxy: bool) -> Self {
        self.trust_proxy = trust_proxy;
        self
    }

    pub fn trusts_proxy(&self) -> bool {
        self.trust_proxy
    }

    pub fn registry(&self) -> &LimiterRegistry {
        &self.registry
    }

    pub fn limiter(&self) -> &WindowLimiter {
        &self.limiter
    }

    pub fn guard(&self) -> &Arc<BruteForceGuard> {
        &self.guard
    }

    /// The policy enforced for `rule`.
    pub fn policy(&self, rule: &RouteRule) -> Arc<LimiterPolicy> {
        match &rule.limiter {
            RouteLimiter::Named(name) => self.registry.get(*name),
            RouteLimiter::Custom(policy) => policy.clone(),
        }
    }

    /// Decide whether `request` may reach its handler.
    pub async fn admit(&self, rule: &RouteRule, request: &RequestInfo) -> Result<Ticket, Rejection> {
        let policy = self.policy(rule);

        if policy.should_skip(request, self.limiter.bypass()) {
            trace!(limiter = %policy.name(), path = %request.path, "Request bypasses admission checks");
            return Ok(Ticket {
                policy,
                key: None,
                quota: None,
                guard_subject: None,
            });
        }

        let guard_subject = if rule.brute_force {
            let client = request.client_id();
            self.guard
                .check(&client, &request.path)
                .map_err(Rejection::LockedOut)?;
            Some((client, request.path.clone()))
        } else {
            None
        };

        let (key, quota) = match self.limiter.check(&policy, request).await {
            Decision::Skip => (None, None),
            Decision::Allow { key, quota } => (Some(key), Some(quota)),
            Decision::Reject { retry_after, .. } => {
                return Err(Rejection::QuotaExceeded {
                    message: policy.message().to_string(),
                    retry_after,
                    limit: policy.max_requests(),
                });
            }
        };

        Ok(Ticket {
            policy,
            key,
            quota,
            guard_subject,
        })
    }

    /// Run the completion hooks with the handler's final status.
    ///
    /// On a guarded route a successful response clears the client's
    /// counter as well as its brute-force record.
    pub async fn complete(&self, ticket: Ticket, status: StatusCode) {
        let Ticket {
            policy,
            key,
            guard_subject,
            ..
        } = ticket;

        if let Some(key) = key {
            if guard_subject.is_some() && status.is_success() {
                self.limiter.reset(&key).await;
            } else {
                self.limiter.record_outcome(&policy, &key, status).await;
            }
        }

        if let Some((client, route)) = guard_subject {
            self.guard.record_outcome(&client, &route, status);
        }

        debug!(limiter = %policy.name(), status = status.as_u16(), "Admission completed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bruteforce::{BLOCK_DURATION, MAX_ATTEMPTS};
    use crate::clock::ManualClock;
    use crate::ratelimit::BypassRules;
    use crate::store::MemoryStore;
    use axum::http::Method;

    fn pipeline() -> (Arc<ManualClock>, AdmissionPipeline) {
        let clock = Arc::new(ManualClock::new(0));
        let store = Arc::new(MemoryStore::with_clock(clock.clone()));
        let limiter = WindowLimiter::new(store, BypassRules::new("/api/health", ["10.9.9.9".parse().unwrap()]));
        let guard = Arc::new(BruteForceGuard::with_clock(MAX_ATTEMPTS, BLOCK_DURATION, clock.clone()));
        (clock, AdmissionPipeline::new(LimiterRegistry::new(), limiter, guard))
    }

    fn login(email: &str) -> RequestInfo {
        RequestInfo::new(Method::POST, "/api/auth/login")
            .with_client_ip("203.0.113.50".parse().unwrap())
            .with_email(email)
    }

    #[tokio::test]
    async fn test_quota_rejection_carries_policy_message() {
        let (_clock, pipeline) = pipeline();
        let rule = RouteRule::new(LimiterName::Contact);
        let req = RequestInfo::new(Method::POST, "/api/contact").with_client_ip("203.0.113.1".parse().unwrap());

        for _ in 0..5 {
            let ticket = pipeline.admit(&rule, &req).await.unwrap();
            pipeline.complete(ticket, StatusCode::OK).await;
        }

        match pipeline.admit(&rule, &req).await {
            Err(Rejection::QuotaExceeded { message, limit, .. }) => {
                assert_eq!(message, "Too many contact form submissions, please try again later");
                assert_eq!(limit, 5);
            }
            other => panic!("expected quota rejection, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_skipped_request_has_no_quota() {
        let (_clock, pipeline) = pipeline();
        let req = RequestInfo::new(Method::GET, "/api/health");

        let ticket = pipeline.admit(&RouteRule::new(LimiterName::General), &req).await.unwrap();
        assert!(ticket.quota().is_none());
        pipeline.complete(ticket, StatusCode::OK).await;
    }

    #[tokio::test]
    async fn test_brute_force_lockout_precedes_limiter() {
        let (_clock, pipeline) = pipeline();
        let rule = RouteRule::guarded(LimiterName::Auth);

        // Rotate emails so the auth limiter never trips; the guard is per route.
        for attempt in 0..MAX_ATTEMPTS {
            let ticket = pipeline.admit(&rule, &login(&format!("u{attempt}@example.org"))).await.unwrap();
            pipeline.complete(ticket, StatusCode::UNAUTHORIZED).await;
        }

        match pipeline.admit(&rule, &login("fresh@example.org")).await {
            Err(Rejection::LockedOut(lockout)) => assert_eq!(lockout.minutes(), 15),
            other => panic!("expected lockout, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_success_clears_brute_force_and_auth_window() {
        let (_clock, pipeline) = pipeline();
        let rule = RouteRule::guarded(LimiterName::Auth);

        for _ in 0..3 {
            let ticket = pipeline.admit(&rule, &login("ngo@example.org")).await.unwrap();
            pipeline.complete(ticket, StatusCode::UNAUTHORIZED).await;
        }
        let ticket = pipeline.admit(&rule, &login("ngo@example.org")).await.unwrap();
        assert_eq!(ticket.quota().unwrap().remaining, 1);
        pipeline.complete(ticket, StatusCode::OK).await;

        assert!(pipeline.guard().record("203.0.113.50", "/api/auth/login").is_none());
        assert!(pipeline
            .limiter()
            .store()
            .get("rl:auth:203.0.113.50:ngo@example.org")
            .await
            .unwrap()
            .is_none());

        let ticket = pipeline.admit(&rule, &login("ngo@example.org")).await.unwrap();
        assert_eq!(ticket.quota().unwrap().remaining, 4);
        pipeline.complete(ticket, StatusCode::OK).await;
    }

    #[tokio::test]
    async fn test_bypassed_client_is_never_locked_out() {
        let (_clock, pipeline) = pipeline();
        let rule = RouteRule::guarded(LimiterName::General);
        let req = RequestInfo::new(Method::POST, "/api/auth/login").with_client_ip("10.9.9.9".parse().unwrap());

        for _ in 0..MAX_ATTEMPTS + 3 {
            let ticket = pipeline.admit(&rule, &req).await.unwrap();
            assert!(ticket.quota().is_none());
            pipeline.complete(ticket, StatusCode::UNAUTHORIZED).await;
        }

        assert!(pipeline.guard().record("10.9.9.9", "/api/auth/login").is_none());
    }

    #[tokio::test]
    async fn test_custom_policy_rule() {
        let (_clock, pipeline) = pipeline();
        let policy = LimiterPolicy::custom("export")
            .max_requests(2)
            .message("Too many exports")
            .build()
            .unwrap();
        let rule = RouteRule::custom(policy);
        let req = RequestInfo::new(Method::GET, "/api/export").with_client_ip("203.0.113.9".parse().unwrap());

        for remaining in [1, 0] {
            let ticket = pipeline.admit(&rule, &req).await.unwrap();
            assert_eq!(ticket.quota().unwrap().remaining, remaining);
            pipeline.complete(ticket, StatusCode::OK).await;
        }

        match pipeline.admit(&rule, &req).await {
            Err(Rejection::QuotaExceeded { message, limit, .. }) => {
                assert_eq!(message, "Too many exports");
                assert_eq!(limit, 2);
            }
            other => panic!("expected quota rejection, got {other:?}"),
        }
    }
}
