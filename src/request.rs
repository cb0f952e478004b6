//! The view of an inbound request that admission control works with.

use std::net::{IpAddr, SocketAddr};

use axum::extract::ConnectInfo;
use axum::http::{header, request::Parts, HeaderMap, Method};

/// Header consulted for the client address when running behind a proxy.
pub const FORWARDED_FOR: &str = "x-forwarded-for";

/// Request attributes used for key derivation, skip rules and logging.
#[derive(Debug, Clone)]
pub struct RequestInfo {
    /// HTTP method
    pub method: Method,
    /// Request path without the query string
    pub path: String,
    /// Raw query string, if any
    pub query: Option<String>,
    /// Client address, if it could be determined
    pub client_ip: Option<IpAddr>,
    /// `email` field of a JSON body, when the body was inspected
    pub email: Option<String>,
    pub user_agent: Option<String>,
    pub referer: Option<String>,
}

impl RequestInfo {
    /// Create a bare request description.
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query: None,
            client_ip: None,
            email: None,
            user_agent: None,
            referer: None,
        }
    }

    /// Set the client address.
    pub fn with_client_ip(mut self, ip: IpAddr) -> Self {
        self.client_ip = Some(ip);
        self
    }

    /// Set the body email.
    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }

    /// Describe a request from its head.
    ///
    /// With `trust_proxy`, the first `X-Forwarded-For` entry wins over the
    /// socket peer address.
    pub fn from_parts(parts: &Parts, trust_proxy: bool) -> Self {
        let peer = parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| addr.ip());

        Self {
            method: parts.method.clone(),
            path: parts.uri.path().to_string(),
            query: parts.uri.query().map(str::to_string),
            client_ip: client_ip(&parts.headers, peer, trust_proxy),
            email: None,
            user_agent: header_string(&parts.headers, header::USER_AGENT.as_str()),
            referer: header_string(&parts.headers, header::REFERER.as_str()),
        }
    }

    /// Stable client identifier used in keys; `unknown` without an address.
    pub fn client_id(&self) -> String {
        self.client_ip
            .map(|ip| ip.to_string())
            .unwrap_or_else(|| "unknown".to_string())
    }
}

/// Resolve the client address from the peer and, if trusted, the proxy header.
pub fn client_ip(headers: &HeaderMap, peer: Option<IpAddr>, trust_proxy: bool) -> Option<IpAddr> {
    if trust_proxy {
        let forwarded = headers
            .get(FORWARDED_FOR)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.split(',').next())
            .and_then(|first| first.trim().parse().ok());
        if forwarded.is_some() {
            return forwarded;
        }
    }
    peer
}

/// Pull a top-level string `email` field out of a JSON body.
pub fn email_from_json(body: &[u8]) -> Option<String> {
    let value: serde_json::Value = serde_json::from_slice(body).ok()?;
    value.get("email")?.as_str().map(str::to_string)
}

fn header_string(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string)
}
