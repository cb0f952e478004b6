//! Detection of requests that look like probing or injection attempts.
//!
//! Matches are logged and the request continues; nothing is rejected here.

use std::sync::Arc;

use axum::extract::{Query, Request, State};
use axum::http::Uri;
use axum::middleware::Next;
use axum::response::Response;
use regex::RegexSet;
use tracing::warn;

use super::SecurityPolicy;
use crate::error::{GateError, Result};
use crate::request::RequestInfo;

const PATTERNS: [&str; 4] = [
    // path traversal
    r"(?i)(\.\.|/etc/|/proc/|/sys/)",
    // SQL keywords
    r"(?i)(union|select|insert|update|delete|drop|create|alter)",
    // XSS markers
    r"(?i)(<script|javascript:|onerror=|onload=)",
    // code injection
    r"(?i)(eval\(|exec\(|system\()",
];

const CATEGORIES: [&str; 4] = ["path_traversal", "sql_injection", "xss", "code_injection"];

/// Compiled suspicious-request patterns.
#[derive(Debug, Clone)]
pub struct SuspiciousPatterns {
    set: RegexSet,
}

impl SuspiciousPatterns {
    pub fn new() -> Result<Self> {
        let set = RegexSet::new(PATTERNS).map_err(|e| GateError::Config(format!("suspicious patterns: {e}")))?;
        Ok(Self { set })
    }

    /// Categories matched by the path or query of `request`.
    pub fn matches(&self, request: &RequestInfo) -> Vec<&'static str> {
        let mut hits: Vec<usize> = self.set.matches(&request.path).into_iter().collect();
        if let Some(query) = &request.query {
            hits.extend(self.set.matches(query).into_iter());
            if let Some(decoded) = decode_query(query) {
                hits.extend(self.set.matches(&decoded).into_iter());
            }
            hits.sort_unstable();
            hits.dedup();
        }
        hits.into_iter().map(|i| CATEGORIES[i]).collect()
    }
}

/// Log requests whose path or query matches a suspicious pattern.
pub async fn log_suspicious(State(policy): State<Arc<SecurityPolicy>>, req: Request, next: Next) -> Response {
    let (parts, body) = req.into_parts();
    let info = RequestInfo::from_parts(&parts, policy.trust_proxy);

    let categories = policy.patterns.matches(&info);
    if !categories.is_empty() {
        warn!(
            method = %info.method,
            path = %info.path,
            ip = %info.client_id(),
            user_agent = info.user_agent.as_deref().unwrap_or("-"),
            referer = info.referer.as_deref().unwrap_or("-"),
            categories = ?categories,
            "Suspicious request detected"
        );
    }

    next.run(Request::from_parts(parts, body)).await
}

/// Form-decode a query string into `key=value&...`.
fn decode_query(query: &str) -> Option<String> {
    let uri: Uri = format!("/?{query}").parse().ok()?;
    let Query(pairs) = Query::<Vec<(String, String)>>::try_from_uri(&uri).ok()?;
    let decoded: Vec<String> = pairs.into_iter().map(|(key, value)| format!("{key}={value}")).collect();
    Some(decoded.join("&"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Method;

    fn request(path: &str, query: Option<&str>) -> RequestInfo {
        let mut info = RequestInfo::new(Method::GET, path);
        info.query = query.map(str::to_string);
        info
    }

    #[test]
    fn test_detects_each_category() {
        let patterns = SuspiciousPatterns::new().unwrap();

        assert_eq!(patterns.matches(&request("/api/../../etc/passwd", None)), vec!["path_traversal"]);
        assert_eq!(
            patterns.matches(&request("/api/donations", Some("q=1%20UNION%20SELECT%20*"))),
            vec!["sql_injection"]
        );
        assert_eq!(
            patterns.matches(&request("/api/search", Some("q=%3Cscript%3Ealert(1)"))),
            vec!["xss"]
        );
        assert_eq!(patterns.matches(&request("/api/eval(1)", None)), vec!["code_injection"]);
    }

    #[test]
    fn test_plain_request_is_clean() {
        let patterns = SuspiciousPatterns::new().unwrap();
        assert!(patterns.matches(&request("/api/donations", Some("page=2&limit=20"))).is_empty());
    }

    #[test]
    fn test_decode_query() {
        assert_eq!(decode_query("q=a%20b+c&page=2").as_deref(), Some("q=a b c&page=2"));
        assert_eq!(decode_query("q=%3Cscript%3E").as_deref(), Some("q=<script>"));
    }
}
