use std::sync::Arc;

use axum::extract::{Request, State};
use axum::http::{header, Method, StatusCode};
use axum::middleware::Next;
use axum::response::Response;
use tracing::warn;

use super::{SecurityPolicy, API_KEY_HEADER};
use crate::request::RequestInfo;
use crate::response::{error_response, ErrorBody};

/// Refuse clients outside the allowlist. An empty allowlist admits everyone.
pub async fn ip_allowlist(State(policy): State<Arc<SecurityPolicy>>, req: Request, next: Next) -> Response {
    if policy.allowed_ips.is_empty() {
        return next.run(req).await;
    }

    let (parts, body) = req.into_parts();
    let info = RequestInfo::from_parts(&parts, policy.trust_proxy);

    match info.client_ip {
        Some(ip) if policy.allowed_ips.contains(&ip) => next.run(Request::from_parts(parts, body)).await,
        _ => {
            warn!(ip = %info.client_id(), path = %info.path, "Unauthorized IP access attempt");
            error_response(StatusCode::FORBIDDEN, "Access denied from your IP address")
        }
    }
}

/// Require a configured key in `X-API-Key`. Without configured keys the
/// check is off.
pub async fn require_api_key(State(policy): State<Arc<SecurityPolicy>>, req: Request, next: Next) -> Response {
    if policy.api_keys.is_empty() {
        return next.run(req).await;
    }

    let valid = req
        .headers()
        .get(API_KEY_HEADER)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|key| policy.api_keys.contains(key));

    if valid {
        next.run(req).await
    } else {
        error_response(StatusCode::UNAUTHORIZED, "Invalid or missing API key")
    }
}

/// Require an allowed content type on requests that carry a body.
pub async fn require_content_type(State(policy): State<Arc<SecurityPolicy>>, req: Request, next: Next) -> Response {
    if !matches!(*req.method(), Method::POST | Method::PUT | Method::PATCH) {
        return next.run(req).await;
    }

    let accepted = req
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|content_type| {
            policy
                .allowed_content_types
                .iter()
                .any(|allowed| content_type.contains(allowed.as_str()))
        });

    if accepted {
        next.run(req).await
    } else {
        ErrorBody::new("Unsupported content type")
            .with_allowed_types(policy.allowed_content_types.clone())
            .into_response_with(StatusCode::UNSUPPORTED_MEDIA_TYPE)
    }
}

/// Answer 408 when the rest of the stack takes longer than the configured
/// timeout.
pub async fn request_timeout(State(policy): State<Arc<SecurityPolicy>>, req: Request, next: Next) -> Response {
    let path = req.uri().path().to_string();
    match tokio::time::timeout(policy.request_timeout, next.run(req)).await {
        Ok(response) => response,
        Err(_) => {
            warn!(
                path = %path,
                timeout_ms = policy.request_timeout.as_millis() as u64,
                "Request timed out"
            );
            error_response(StatusCode::REQUEST_TIMEOUT, "Request timeout")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SecurityConfig;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use axum::routing::{get, post};
    use axum::{middleware, Router};
    use std::time::Duration;
    use tower::ServiceExt;

    fn policy(configure: impl FnOnce(&mut SecurityConfig)) -> Arc<SecurityPolicy> {
        let mut config = SecurityConfig::default();
        configure(&mut config);
        Arc::new(SecurityPolicy::from_config(&config, true).unwrap())
    }

    async fn json(response: Response) -> serde_json::Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_ip_allowlist() {
        let state = policy(|c| c.allowed_ips = vec!["10.0.0.1".parse().unwrap()]);
        let app = Router::new()
            .route("/admin", get(|| async { "ok" }))
            .layer(middleware::from_fn_with_state(state, ip_allowlist));

        let allowed = Request::get("/admin")
            .header("x-forwarded-for", "10.0.0.1")
            .body(Body::empty())
            .unwrap();
        assert_eq!(app.clone().oneshot(allowed).await.unwrap().status(), StatusCode::OK);

        let denied = Request::get("/admin")
            .header("x-forwarded-for", "10.0.0.2")
            .body(Body::empty())
            .unwrap();
        let response = app.oneshot(denied).await.unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        assert_eq!(json(response).await["message"], "Access denied from your IP address");
    }

    #[tokio::test]
    async fn test_empty_allowlist_admits_all() {
        let app = Router::new()
            .route("/admin", get(|| async { "ok" }))
            .layer(middleware::from_fn_with_state(policy(|_| {}), ip_allowlist));

        let response = app.oneshot(Request::get("/admin").body(Body::empty()).unwrap()).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_api_key() {
        let state = policy(|c| c.api_keys = vec!["k-123".to_string()]);
        let app = Router::new()
            .route("/", get(|| async { "ok" }))
            .layer(middleware::from_fn_with_state(state, require_api_key));

        let missing = app.clone().oneshot(Request::get("/").body(Body::empty()).unwrap()).await.unwrap();
        assert_eq!(missing.status(), StatusCode::UNAUTHORIZED);

        let valid = Request::get("/").header("x-api-key", "k-123").body(Body::empty()).unwrap();
        assert_eq!(app.oneshot(valid).await.unwrap().status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_content_type() {
        let app = Router::new()
            .route("/", post(|| async { "ok" }).get(|| async { "ok" }))
            .layer(middleware::from_fn_with_state(policy(|_| {}), require_content_type));

        let form = Request::post("/")
            .header("content-type", "text/plain")
            .body(Body::from("x"))
            .unwrap();
        let response = app.clone().oneshot(form).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNSUPPORTED_MEDIA_TYPE);
        assert_eq!(json(response).await["allowedTypes"][0], "application/json");

        let json_body = Request::post("/")
            .header("content-type", "application/json; charset=utf-8")
            .body(Body::from("{}"))
            .unwrap();
        assert_eq!(app.clone().oneshot(json_body).await.unwrap().status(), StatusCode::OK);

        let read = Request::get("/").body(Body::empty()).unwrap();
        assert_eq!(app.oneshot(read).await.unwrap().status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_request_timeout() {
        let state = policy(|c| c.request_timeout_ms = 20);
        let app = Router::new()
            .route(
                "/slow",
                get(|| async {
                    tokio::time::sleep(Duration::from_secs(5)).await;
                    "late"
                }),
            )
            .layer(middleware::from_fn_with_state(state, request_timeout));

        let response = app.oneshot(Request::get("/slow").body(Body::empty()).unwrap()).await.unwrap();
        assert_eq!(response.status(), StatusCode::REQUEST_TIMEOUT);
        assert_eq!(json(response).await["message"], "Request timeout");
    }
}
