//! HTTP server hosting the admission layers.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::Response;
use axum::routing::get;
use axum::{middleware, Router};
use serde::Serialize;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::admission::{AdmissionLayer, AdmissionPipeline, RouteRule};
use crate::bruteforce::BruteForceGuard;
use crate::config::GateConfig;
use crate::error::{GateError, Result};
use crate::ratelimit::{BypassRules, LimiterName, WindowLimiter};
use crate::response::{error_response, SuccessBody};
use crate::security::{
    ip_allowlist, log_suspicious, request_timeout, require_api_key, require_content_type, security_headers,
    SecurityPolicy,
};
use crate::store::{CounterStore, StoreMode};

/// Everything the request path needs, built once at startup.
#[derive(Clone)]
pub struct Gate {
    pipeline: Arc<AdmissionPipeline>,
    security: Arc<SecurityPolicy>,
    health_path: String,
    started: Instant,
}

impl Gate {
    /// Wire the gate from configuration over an already opened store.
    pub fn from_config(config: &GateConfig, store: Arc<dyn CounterStore>) -> Result<Self> {
        let registry = config.registry()?;
        let bypass = BypassRules::new(config.server.health_path.clone(), config.trusted_ips.iter().copied());
        let limiter = WindowLimiter::with_prefix(store, bypass, config.store.key_prefix.clone());
        let guard = Arc::new(BruteForceGuard::new(
            config.brute_force.max_attempts,
            config.brute_force.block_duration(),
        ));
        let pipeline = AdmissionPipeline::new(registry, limiter, guard).trust_proxy(config.server.trust_proxy);
        let security = SecurityPolicy::from_config(&config.security, config.server.trust_proxy)?;

        Ok(Self::new(
            Arc::new(pipeline),
            Arc::new(security),
            config.server.health_path.clone(),
        ))
    }

    pub fn new(pipeline: Arc<AdmissionPipeline>, security: Arc<SecurityPolicy>, health_path: String) -> Self {
        Self {
            pipeline,
            security,
            health_path,
            started: Instant::now(),
        }
    }

    pub fn pipeline(&self) -> &Arc<AdmissionPipeline> {
        &self.pipeline
    }

    pub fn security(&self) -> &Arc<SecurityPolicy> {
        &self.security
    }

    /// Admission layer for a route group.
    pub fn limit(&self, rule: RouteRule) -> AdmissionLayer {
        AdmissionLayer::new(self.pipeline.clone(), rule)
    }

    /// Restrict `routes` to the configured admin allowlist.
    pub fn restrict_ips(&self, routes: Router) -> Router {
        routes.route_layer(middleware::from_fn_with_state(self.security.clone(), ip_allowlist))
    }

    /// Require a configured API key on `routes`.
    pub fn require_api_key(&self, routes: Router) -> Router {
        routes.route_layer(middleware::from_fn_with_state(self.security.clone(), require_api_key))
    }

    /// Wrap the application routes with the health check, the uniform 404,
    /// the general limiter and the security filters.
    pub fn router(&self, api: Router) -> Router {
        let health = Router::new()
            .route(&self.health_path, get(health))
            .with_state(self.clone());

        Router::new()
            .merge(health)
            .merge(api)
            .fallback(not_found)
            .layer(self.limit(RouteRule::new(LimiterName::General)))
            .layer(middleware::from_fn_with_state(self.security.clone(), require_content_type))
            .layer(middleware::from_fn_with_state(self.security.clone(), request_timeout))
            .layer(middleware::from_fn_with_state(self.security.clone(), log_suspicious))
            .layer(middleware::from_fn(security_headers))
            .layer(TraceLayer::new_for_http())
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct Health {
    uptime: f64,
    store: StoreMode,
}

async fn health(State(gate): State<Gate>) -> SuccessBody<Health> {
    SuccessBody::new(Health {
        uptime: gate.started.elapsed().as_secs_f64(),
        store: gate.pipeline.limiter().store_mode(),
    })
    .with_message("Backend is healthy")
}

async fn not_found() -> Response {
    error_response(StatusCode::NOT_FOUND, "Route not found")
}

/// HTTP server for the gate.
pub struct GateServer {
    /// Address to bind to
    addr: SocketAddr,
    router: Router,
}

impl GateServer {
    pub fn new(addr: SocketAddr, router: Router) -> Self {
        Self { addr, router }
    }

    /// Start the server with graceful shutdown.
    ///
    /// The server will shut down when the provided signal resolves.
    pub async fn serve_with_shutdown<F>(self, signal: F) -> Result<()>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let listener = tokio::net::TcpListener::bind(self.addr).await.map_err(|e| GateError::Server(e.to_string()))?;

        info!(addr = %self.addr, "Starting HTTP server with graceful shutdown");

        axum::serve(
            listener,
            self.router.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(signal)
        .await
        .map_err(|e| {
            error!(error = %e, "HTTP server failed");
            GateError::Server(e.to_string())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use tower::ServiceExt;

    fn gate() -> Gate {
        Gate::from_config(&GateConfig::default(), Arc::new(MemoryStore::new())).unwrap()
    }

    #[tokio::test]
    async fn test_health_reports_store_mode() {
        let app = gate().router(Router::new());
        let response = app
            .oneshot(Request::get("/api/health").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().get("ratelimit-limit").is_none());
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["message"], "Backend is healthy");
        assert_eq!(body["data"]["store"], "memory");
    }

    #[tokio::test]
    async fn test_dropping_gate_releases_store() {
        let store: Arc<dyn CounterStore> = Arc::new(MemoryStore::new());
        let gate = Gate::from_config(&GateConfig::default(), store.clone()).unwrap();
        let router = gate.router(Router::new());
        assert!(Arc::strong_count(&store) > 1);

        drop(router);
        drop(gate);
        assert_eq!(Arc::strong_count(&store), 1);
    }

    #[tokio::test]
    async fn test_unknown_route_is_uniform_404() {
        let app = gate().router(Router::new());
        let response = app
            .oneshot(Request::get("/api/nowhere").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(response.headers()["x-frame-options"], "DENY");
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["status"], "error");
        assert_eq!(body["message"], "Route not found");
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let mut config = GateConfig::default();
        config.limiters.insert("nope".to_string(), Default::default());
        assert!(Gate::from_config(&config, Arc::new(MemoryStore::new())).is_err());
    }
}
