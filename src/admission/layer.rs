//! Tower middleware applying the admission pipeline to axum routes.

use std::sync::Arc;
use std::task::{Context, Poll};

use axum::body::Body;
use axum::http::Request;
use axum::response::{IntoResponse, Response};
use futures::future::BoxFuture;
use tower::{Layer, Service};
use tracing::debug;

use super::headers;
use super::pipeline::{AdmissionPipeline, RouteRule};
use super::rejection::Rejection;
use crate::request::{email_from_json, RequestInfo};

/// Largest body buffered to derive a key from its contents.
pub const MAX_INSPECTED_BODY: usize = 10 * 1024 * 1024;

/// Admission middleware layer for one route group.
#[derive(Clone)]
pub struct AdmissionLayer {
    pipeline: Arc<AdmissionPipeline>,
    rule: RouteRule,
}

impl AdmissionLayer {
    pub fn new(pipeline: Arc<AdmissionPipeline>, rule: RouteRule) -> Self {
        Self { pipeline, rule }
    }
}

impl<S> Layer<S> for AdmissionLayer {
    type Service = AdmissionService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        AdmissionService {
            inner,
            pipeline: self.pipeline.clone(),
            rule: self.rule.clone(),
        }
    }
}

/// Admission middleware service.
#[derive(Clone)]
pub struct AdmissionService<S> {
    inner: S,
    pipeline: Arc<AdmissionPipeline>,
    rule: RouteRule,
}

impl<S> Service<Request<Body>> for AdmissionService<S>
where
    S: Service<Request<Body>, Response = Response> + Clone + Send + 'static,
    S::Future: Send + 'static,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request<Body>) -> Self::Future {
        let pipeline = self.pipeline.clone();
        let rule = self.rule.clone();
        // Keep the instance that was polled ready.
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);

        Box::pin(async move {
            let (parts, body) = req.into_parts();
            let mut info = RequestInfo::from_parts(&parts, pipeline.trusts_proxy());

            let body = if pipeline.policy(&rule).key_strategy().needs_body() {
                match axum::body::to_bytes(body, MAX_INSPECTED_BODY).await {
                    Ok(bytes) => {
                        info.email = email_from_json(&bytes);
                        Body::from(bytes)
                    }
                    Err(error) => {
                        debug!(path = %info.path, error = %error, "Failed to buffer request body");
                        return Ok(Rejection::PayloadTooLarge.into_response());
                    }
                }
            } else {
                body
            };

            let ticket = match pipeline.admit(&rule, &info).await {
                Ok(ticket) => ticket,
                Err(rejection) => return Ok(rejection.into_response()),
            };
            let quota = ticket.quota();

            let mut response = inner.call(Request::from_parts(parts, body)).await?;
            pipeline.complete(ticket, response.status()).await;

            if let Some(quota) = quota {
                headers::insert_quota(response.headers_mut(), &quota);
            }
            Ok(response)
        })
    }
}
