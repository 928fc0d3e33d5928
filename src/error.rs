//! # Error Handling
//!
//! Error types for the HTTP surface and how they become responses.
//!
//! Call-level failures (a speech model that drops, a synthesis request that fails)
//! never reach this type: they are logged and scoped to the one call they belong
//! to. `AppError` only covers what an HTTP client can see, namely a webhook or
//! upgrade request that can't be served.
//!
//! ## Key Rust Concepts:
//! - **From trait**: lets `?` convert `anyhow` and JSON errors automatically
//! - **ResponseError trait**: turns an error returned from a handler into a response
//! - **Display trait**: the human-readable message used in logs and JSON bodies

use actix_web::http::StatusCode;
use actix_web::{HttpResponse, ResponseError};
use serde_json::json;
use std::fmt;

/// Custom error types for the application.
///
/// ## Error Categories:
/// - **Internal**: server-side problems (500)
/// - **BadRequest**: the client sent something unusable (400)
/// - **Unavailable**: at capacity, try again later (503)
#[derive(Debug)]
pub enum AppError {
    Internal(String),
    BadRequest(String),
    Unavailable(String),
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::Internal(msg) => write!(f, "Internal error: {}", msg),
            AppError::BadRequest(msg) => write!(f, "Bad request: {}", msg),
            AppError::Unavailable(msg) => write!(f, "Service unavailable: {}", msg),
        }
    }
}

/// ## JSON Response Format:
/// ```json
/// {
///   "error": {
///     "type": "unavailable",
///     "message": "50 calls already active",
///     "timestamp": "2025-01-01T12:00:00Z"
///   }
/// }
/// ```
impl ResponseError for AppError {
    fn status_code(&self) -> StatusCode {
        match self {
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let (error_type, message) = match self {
            AppError::Internal(msg) => ("internal_error", msg),
            AppError::BadRequest(msg) => ("bad_request", msg),
            AppError::Unavailable(msg) => ("unavailable", msg),
        };

        HttpResponse::build(self.status_code()).json(json!({
            "error": {
                "type": error_type,
                "message": message,
                "timestamp": chrono::Utc::now().to_rfc3339()
            }
        }))
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::Internal(err.to_string())
    }
}

/// Malformed JSON is almost always the client's fault, hence 400 rather than 500.
impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::BadRequest(format!("JSON parsing error: {}", err))
    }
}

/// Shorthand for `Result<T, AppError>`.
pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(AppError::Unavailable("full".into()).status_code(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(AppError::BadRequest("x".into()).status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(
            AppError::from(anyhow::anyhow!("boom")).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_json_error_is_bad_request() {
        let err = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        assert!(matches!(AppError::from(err), AppError::BadRequest(_)));
    }

    #[test]
    fn test_error_response_body() {
        let response = AppError::Unavailable("50 calls already active".into()).error_response();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }
}
