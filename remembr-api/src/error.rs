//! Error types for the Remembr API
//!
//! This module defines the stable wire error taxonomy, the `ApiError` struct
//! returned by every handler, and the Axum `IntoResponse` implementation that
//! renders the `{error: {code, message, details?, request_id}}` envelope.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use std::fmt;

// ============================================================================
// DETAIL CODES
// ============================================================================

/// Machine-friendly detail codes carried in `error.details.code`.
pub mod detail {
    pub const SESSION_NOT_FOUND: &str = "SESSION_NOT_FOUND";
    pub const EPISODE_NOT_FOUND: &str = "EPISODE_NOT_FOUND";
    pub const CHECKPOINT_NOT_FOUND: &str = "CHECKPOINT_NOT_FOUND";
    pub const API_KEY_NOT_FOUND: &str = "API_KEY_NOT_FOUND";
    pub const ORG_LEVEL_REQUIRED: &str = "ORG_LEVEL_REQUIRED";
    pub const INVALID_TIME_RANGE: &str = "INVALID_TIME_RANGE";
}

// ============================================================================
// ERROR CODE ENUM
// ============================================================================

/// Stable wire error codes.
///
/// Each code maps to exactly one HTTP status. Not-found deliberately covers
/// both "absent" and "outside scope" so callers cannot probe other tenants'
/// keyspace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    /// Missing, invalid, expired, or revoked credentials (401)
    AuthenticationError,

    /// Authenticated but the scope does not permit the operation (403)
    AuthorizationError,

    /// Resource absent or outside the caller's scope (404)
    NotFound,

    /// Shape violations, bad ranges, unknown modes (422)
    ValidationError,

    /// Duplicate unique constraint (409)
    ConflictError,

    /// Token bucket exhausted (429)
    RateLimitError,

    /// Uncategorized internal or storage failure (500)
    InternalError,
}

impl ErrorCode {
    /// Get the HTTP status code for this error code.
    pub fn status_code(&self) -> StatusCode {
        match self {
            ErrorCode::AuthenticationError => StatusCode::UNAUTHORIZED,
            ErrorCode::AuthorizationError => StatusCode::FORBIDDEN,
            ErrorCode::NotFound => StatusCode::NOT_FOUND,
            ErrorCode::ValidationError => StatusCode::UNPROCESSABLE_ENTITY,
            ErrorCode::ConflictError => StatusCode::CONFLICT,
            ErrorCode::RateLimitError => StatusCode::TOO_MANY_REQUESTS,
            ErrorCode::InternalError => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorCode::AuthenticationError => "AUTHENTICATION_ERROR",
            ErrorCode::AuthorizationError => "AUTHORIZATION_ERROR",
            ErrorCode::NotFound => "NOT_FOUND",
            ErrorCode::ValidationError => "VALIDATION_ERROR",
            ErrorCode::ConflictError => "CONFLICT_ERROR",
            ErrorCode::RateLimitError => "RATE_LIMIT_ERROR",
            ErrorCode::InternalError => "INTERNAL_ERROR",
        };
        write!(f, "{}", name)
    }
}

// ============================================================================
// API ERROR STRUCT
// ============================================================================

/// Structured error returned by API operations.
///
/// The `request_id` is attached by the handler (from its `RequestContext`) or
/// by the middleware for pre-authentication failures.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiError {
    pub code: ErrorCode,
    pub message: String,
    pub details: Option<serde_json::Value>,
    pub request_id: Option<String>,
}

/// Serialized body of the error envelope.
#[derive(Debug, Serialize)]
struct ErrorBody<'a> {
    code: ErrorCode,
    message: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<&'a serde_json::Value>,
    request_id: &'a str,
}

impl ApiError {
    /// Create a new API error with the given code and message.
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
            request_id: None,
        }
    }

    /// Attach additional details to the error.
    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    /// Attach a machine-friendly detail code (`details.code`).
    pub fn with_detail_code(self, code: &str) -> Self {
        self.with_details(serde_json::json!({ "code": code }))
    }

    /// Attach the current request id for the response envelope.
    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }

    /// Get the HTTP status code for this error.
    pub fn status_code(&self) -> StatusCode {
        self.code.status_code()
    }

    // ========================================================================
    // Convenience constructors
    // ========================================================================

    /// Create an AuthenticationError.
    pub fn authentication(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::AuthenticationError, message)
    }

    /// Create an AuthorizationError.
    pub fn authorization(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::AuthorizationError, message)
    }

    /// Create a NotFound error.
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::NotFound, message)
    }

    /// Create a session-not-found error.
    pub fn session_not_found() -> Self {
        Self::not_found("Session not found").with_detail_code(detail::SESSION_NOT_FOUND)
    }

    /// Create an episode-not-found error.
    pub fn episode_not_found() -> Self {
        Self::not_found("Episode not found").with_detail_code(detail::EPISODE_NOT_FOUND)
    }

    /// Create a checkpoint-not-found error.
    pub fn checkpoint_not_found() -> Self {
        Self::not_found("Checkpoint not found").with_detail_code(detail::CHECKPOINT_NOT_FOUND)
    }

    /// Create an api-key-not-found error.
    pub fn api_key_not_found() -> Self {
        Self::not_found("API key not found").with_detail_code(detail::API_KEY_NOT_FOUND)
    }

    /// Create an org-level-required authorization error.
    pub fn org_level_required() -> Self {
        Self::authorization("Org-level authority required")
            .with_detail_code(detail::ORG_LEVEL_REQUIRED)
    }

    /// Create a ValidationError.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::ValidationError, message)
    }

    /// Create a missing-required-field validation error.
    pub fn missing_field(field: &str) -> Self {
        Self::validation(format!("Required field '{}' is missing", field))
            .with_details(serde_json::json!({ "field": field }))
    }

    /// Create an invalid time range validation error.
    pub fn invalid_time_range() -> Self {
        Self::validation("to_time must be >= from_time")
            .with_detail_code(detail::INVALID_TIME_RANGE)
    }

    /// Create a ConflictError.
    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::ConflictError, message)
    }

    /// Create a RateLimitError with retry details.
    pub fn rate_limited(retry_after_secs: u64, limit_per_minute: u32) -> Self {
        Self::new(
            ErrorCode::RateLimitError,
            format!("Rate limit exceeded. Retry after {} seconds", retry_after_secs),
        )
        .with_details(serde_json::json!({
            "retry_after_secs": retry_after_secs,
            "limit_per_minute": limit_per_minute,
        }))
    }

    /// Create an InternalError.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InternalError, message)
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for ApiError {}

// ============================================================================
// AXUM INTEGRATION
// ============================================================================

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let request_id = self.request_id.as_deref().unwrap_or("unknown");
        let body = serde_json::json!({
            "error": ErrorBody {
                code: self.code,
                message: &self.message,
                details: self.details.as_ref(),
                request_id,
            }
        });
        (status, Json(body)).into_response()
    }
}

// ============================================================================
// CONVERSIONS FROM STANDARD ERRORS
// ============================================================================

/// Convert from tokio_postgres::Error to ApiError.
impl From<tokio_postgres::Error> for ApiError {
    fn from(err: tokio_postgres::Error) -> Self {
        // Unique-constraint violations surface as conflicts; everything else
        // is an opaque internal error so storage details never leak.
        if let Some(db_err) = err.as_db_error() {
            if db_err.code() == &tokio_postgres::error::SqlState::UNIQUE_VIOLATION {
                tracing::warn!(error = %db_err, "Unique constraint violation");
                return ApiError::conflict("Resource already exists");
            }
        }
        tracing::error!(error = %err, "Database error");
        ApiError::internal("Database operation failed")
    }
}

/// Convert from deadpool_postgres::PoolError to ApiError.
impl From<deadpool_postgres::PoolError> for ApiError {
    fn from(err: deadpool_postgres::PoolError) -> Self {
        tracing::error!(error = %err, "Connection pool error");
        ApiError::internal("Failed to acquire database connection")
    }
}

/// Convert from serde_json::Error to ApiError.
impl From<serde_json::Error> for ApiError {
    fn from(err: serde_json::Error) -> Self {
        tracing::error!(error = %err, "JSON serialization error");
        ApiError::validation(format!("Invalid JSON: {}", err))
    }
}

/// Convert from cache swap failures to ApiError.
///
/// Only the atomic window swap propagates cache errors; losing that write is
/// a data-loss risk the caller must observe.
impl From<remembr_cache::RedisError> for ApiError {
    fn from(err: remembr_cache::RedisError) -> Self {
        tracing::error!(error = %err, "Cache write error");
        ApiError::internal("Cache operation failed")
    }
}

/// Convert scope construction failures to ApiError.
impl From<remembr_core::CoreError> for ApiError {
    fn from(err: remembr_core::CoreError) -> Self {
        match &err {
            remembr_core::CoreError::InvalidScope(_)
            | remembr_core::CoreError::ScopeIdMissing { .. } => {
                ApiError::authorization(err.to_string())
            }
            remembr_core::CoreError::InvalidSearchMode(_)
            | remembr_core::CoreError::InvalidEnvironment(_)
            | remembr_core::CoreError::InvalidConfig { .. } => {
                ApiError::validation(err.to_string())
            }
            remembr_core::CoreError::MalformedWindow(_) => {
                tracing::error!(error = %err, "Malformed window payload");
                ApiError::internal("Malformed window payload")
            }
        }
    }
}

// ============================================================================
// RESULT TYPE ALIAS
// ============================================================================

/// Result type alias for API operations.
pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code_status_mapping() {
        assert_eq!(
            ErrorCode::AuthenticationError.status_code(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            ErrorCode::AuthorizationError.status_code(),
            StatusCode::FORBIDDEN
        );
        assert_eq!(ErrorCode::NotFound.status_code(), StatusCode::NOT_FOUND);
        assert_eq!(
            ErrorCode::ValidationError.status_code(),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(ErrorCode::ConflictError.status_code(), StatusCode::CONFLICT);
        assert_eq!(
            ErrorCode::RateLimitError.status_code(),
            StatusCode::TOO_MANY_REQUESTS
        );
        assert_eq!(
            ErrorCode::InternalError.status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_wire_code_serialization() {
        let json = serde_json::to_string(&ErrorCode::AuthenticationError).expect("serializable");
        assert_eq!(json, "\"AUTHENTICATION_ERROR\"");
        let json = serde_json::to_string(&ErrorCode::NotFound).expect("serializable");
        assert_eq!(json, "\"NOT_FOUND\"");
        let json = serde_json::to_string(&ErrorCode::RateLimitError).expect("serializable");
        assert_eq!(json, "\"RATE_LIMIT_ERROR\"");
    }

    #[test]
    fn test_detail_code_helpers() {
        let err = ApiError::session_not_found();
        assert_eq!(err.code, ErrorCode::NotFound);
        assert_eq!(
            err.details,
            Some(serde_json::json!({"code": "SESSION_NOT_FOUND"}))
        );

        let err = ApiError::org_level_required();
        assert_eq!(err.code, ErrorCode::AuthorizationError);
        assert_eq!(
            err.details,
            Some(serde_json::json!({"code": "ORG_LEVEL_REQUIRED"}))
        );
    }

    #[test]
    fn test_rate_limited_details() {
        let err = ApiError::rate_limited(12, 120);
        assert_eq!(err.code, ErrorCode::RateLimitError);
        let details = err.details.expect("details present");
        assert_eq!(details["retry_after_secs"], 12);
        assert_eq!(details["limit_per_minute"], 120);
    }

    #[test]
    fn test_request_id_attachment() {
        let err = ApiError::validation("bad input").with_request_id("req-42");
        assert_eq!(err.request_id.as_deref(), Some("req-42"));
    }

    #[test]
    fn test_display() {
        let err = ApiError::authentication("Invalid token");
        assert_eq!(format!("{}", err), "AUTHENTICATION_ERROR: Invalid token");
    }
}
