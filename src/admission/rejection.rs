//! Refusals produced by the admission pipeline.

use std::time::Duration;

use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};

use super::headers::{self, RATELIMIT_LIMIT, RATELIMIT_REMAINING, RATELIMIT_RESET};
use crate::bruteforce::Lockout;
use crate::response::ErrorBody;

/// Why a request was refused before reaching its handler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    /// A window limiter is over quota (429).
    QuotaExceeded {
        message: String,
        retry_after: Duration,
        limit: u64,
    },
    /// The client is locked out of this route (403).
    LockedOut(Lockout),
    /// The body had to be inspected but exceeded the buffer limit (413).
    PayloadTooLarge,
}

impl Rejection {
    pub fn status(&self) -> StatusCode {
        match self {
            Rejection::QuotaExceeded { .. } => StatusCode::TOO_MANY_REQUESTS,
            Rejection::LockedOut(_) => StatusCode::FORBIDDEN,
            Rejection::PayloadTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
        }
    }

    pub fn message(&self) -> String {
        match self {
            Rejection::QuotaExceeded { message, .. } => message.clone(),
            Rejection::LockedOut(lockout) => lockout.message(),
            Rejection::PayloadTooLarge => "Request entity too large".to_string(),
        }
    }
}

impl IntoResponse for Rejection {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = ErrorBody::new(self.message());

        match self {
            Rejection::QuotaExceeded { retry_after, limit, .. } => {
                let seconds = headers::ceil_secs(retry_after);
                let mut response = body.with_retry_after(seconds).into_response_with(status);
                let map = response.headers_mut();
                map.insert(header::RETRY_AFTER, HeaderValue::from(seconds));
                map.insert(RATELIMIT_LIMIT, HeaderValue::from(limit));
                map.insert(RATELIMIT_REMAINING, HeaderValue::from(0u64));
                map.insert(RATELIMIT_RESET, HeaderValue::from(seconds));
                headers::insert_policy(map);
                response
            }
            Rejection::LockedOut(_) | Rejection::PayloadTooLarge => body.into_response_with(status),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quota_exceeded_response() {
        let response = Rejection::QuotaExceeded {
            message: "Too many search requests, please slow down".to_string(),
            retry_after: Duration::from_millis(59_970),
            limit: 50,
        }
        .into_response();

        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers()[header::RETRY_AFTER], "60");
        assert_eq!(response.headers()[RATELIMIT_LIMIT], "50");
        assert_eq!(response.headers()[RATELIMIT_REMAINING], "0");
    }

    #[test]
    fn test_lockout_response() {
        let response = Rejection::LockedOut(Lockout {
            remaining: Duration::from_secs(10 * 60),
        })
        .into_response();

        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        assert!(response.headers().get(header::RETRY_AFTER).is_none());
    }

    #[test]
    fn test_lockout_message_rounds_up() {
        let rejection = Rejection::LockedOut(Lockout {
            remaining: Duration::from_secs(61),
        });
        assert_eq!(rejection.message(), "Too many failed attempts. Try again in 2 minutes");
    }
}
