//! API error types and JSON error response formatting.
//!
//! ApiError provides a consistent JSON error response format across all
//! endpoints, mapping internal errors to appropriate HTTP status codes.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use tracing::warn;

use tessera_core::error::{ProviderErrorKind, TesseraError};

/// JSON error response body.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    /// Machine-readable error code (e.g., "bad_request", "gateway_timeout").
    pub error: String,
    /// Human-readable error message.
    pub message: String,
    /// Optional structured details about the error.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

/// API error type that maps to HTTP status codes and JSON responses.
#[derive(Debug)]
pub enum ApiError {
    /// 400 Bad Request - missing or invalid parameters.
    BadRequest(String),
    /// 401 Unauthorized - missing or wrong bearer token.
    Unauthorized(String),
    /// 422 Unprocessable Entity - vector dimensionality does not match.
    UnprocessableEntity(String, Option<serde_json::Value>),
    /// 500 Internal Server Error - unexpected server error.
    Internal(String),
    /// 502 Bad Gateway - a provider failed in a way retrying will not fix.
    BadGateway(String),
    /// 503 Service Unavailable - a provider failed transiently.
    ServiceUnavailable(String),
    /// 504 Gateway Timeout - the request deadline expired.
    GatewayTimeout(String),
    /// 429 Too Many Requests - the client exceeded its rate limit.
    TooManyRequests(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::UnprocessableEntity(..) => StatusCode::UNPROCESSABLE_ENTITY,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::BadGateway(_) => StatusCode::BAD_GATEWAY,
            ApiError::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::GatewayTimeout(_) => StatusCode::GATEWAY_TIMEOUT,
            ApiError::TooManyRequests(_) => StatusCode::TOO_MANY_REQUESTS,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let (error_code, message, details) = match self {
            ApiError::BadRequest(msg) => ("bad_request", msg, None),
            ApiError::Unauthorized(msg) => ("unauthorized", msg, None),
            ApiError::UnprocessableEntity(msg, details) => {
                ("unprocessable_entity", msg, details)
            }
            ApiError::Internal(msg) => ("internal_error", msg, None),
            ApiError::BadGateway(msg) => ("bad_gateway", msg, None),
            ApiError::ServiceUnavailable(msg) => ("service_unavailable", msg, None),
            ApiError::GatewayTimeout(msg) => ("gateway_timeout", msg, None),
            ApiError::TooManyRequests(msg) => ("too_many_requests", msg, None),
        };

        if status.is_server_error() {
            warn!(status = status.as_u16(), error = error_code, "{}", message);
        }

        let body = ErrorBody {
            error: error_code.to_string(),
            message,
            details,
        };

        (status, Json(body)).into_response()
    }
}

impl From<TesseraError> for ApiError {
    fn from(err: TesseraError) -> Self {
        match err {
            TesseraError::Config(msg) | TesseraError::InvalidInput(msg) => {
                ApiError::BadRequest(msg)
            }
            TesseraError::DimensionMismatch { expected, actual } => ApiError::UnprocessableEntity(
                err.to_string(),
                Some(serde_json::json!({ "expected": expected, "actual": actual })),
            ),
            TesseraError::Provider {
                kind: ProviderErrorKind::Temporary,
                ..
            } => ApiError::ServiceUnavailable(err.to_string()),
            TesseraError::Provider {
                kind: ProviderErrorKind::Permanent,
                ..
            } => ApiError::BadGateway(err.to_string()),
            TesseraError::Timeout(_) => ApiError::GatewayTimeout(err.to_string()),
            other => ApiError::Internal(other.to_string()),
        }
    }
}
