//! Uniform JSON bodies for gate responses.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::{SecondsFormat, Utc};
use serde::Serialize;

/// The error body every refusal uses.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorBody {
    pub status: &'static str,
    pub message: String,
    /// Seconds until the client may retry
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub allowed_types: Option<Vec<String>>,
    /// ISO-8601 time of the refusal
    pub timestamp: String,
}

impl ErrorBody {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            status: "error",
            message: message.into(),
            retry_after: None,
            allowed_types: None,
            timestamp: now_iso(),
        }
    }

    pub fn with_retry_after(mut self, seconds: u64) -> Self {
        self.retry_after = Some(seconds);
        self
    }

    pub fn with_allowed_types(mut self, types: Vec<String>) -> Self {
        self.allowed_types = Some(types);
        self
    }

    /// Pair the body with a status code.
    pub fn into_response_with(self, status: StatusCode) -> Response {
        (status, Json(self)).into_response()
    }
}

/// Body for successful gate-owned endpoints.
#[derive(Debug, Clone, Serialize)]
pub struct SuccessBody<T: Serialize> {
    pub status: &'static str,
    pub message: String,
    pub data: T,
    pub timestamp: String,
}

impl<T: Serialize> SuccessBody<T> {
    pub fn new(data: T) -> Self {
        Self {
            status: "success",
            message: "Success".to_string(),
            data,
            timestamp: now_iso(),
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }
}

impl<T: Serialize> IntoResponse for SuccessBody<T> {
    fn into_response(self) -> Response {
        Json(self).into_response()
    }
}

/// Shorthand for an error response.
pub fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    ErrorBody::new(message).into_response_with(status)
}

fn now_iso() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_body_shape() {
        let body = serde_json::to_value(ErrorBody::new("Request timeout")).unwrap();

        assert_eq!(body["status"], "error");
        assert_eq!(body["message"], "Request timeout");
        assert!(body.get("retryAfter").is_none());
        assert!(body.get("allowedTypes").is_none());
        assert!(body["timestamp"].as_str().unwrap().ends_with('Z'));
    }

    #[test]
    fn test_error_body_optional_fields() {
        let body = ErrorBody::new("Unsupported content type")
            .with_retry_after(42)
            .with_allowed_types(vec!["application/json".to_string()]);
        let body = serde_json::to_value(body).unwrap();

        assert_eq!(body["retryAfter"], 42);
        assert_eq!(body["allowedTypes"][0], "application/json");
    }

    #[test]
    fn test_success_body_shape() {
        let body = serde_json::to_value(SuccessBody::new(serde_json::json!({"ok": true}))).unwrap();
        assert_eq!(body["status"], "success");
        assert_eq!(body["message"], "Success");
        assert_eq!(body["data"]["ok"], true);
    }
}
