use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use sea_orm::error::{DbErr, SqlErr};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::error;
use utoipa::ToSchema;

fn current_request_id() -> Option<String> {
    crate::tracing::current_request_id().map(|rid| rid.as_str().to_string())
}

/// Error body returned by every failing endpoint
#[derive(Debug, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({
    "error": "Not Found",
    "message": "Not found: Product 550e8400-e29b-41d4-a716-446655440000 not found",
    "details": null,
    "request_id": "req-abc123xyz",
    "timestamp": "2026-03-09T10:30:00.000Z"
}))]
pub struct ErrorResponse {
    /// HTTP status category (e.g., "Not Found", "Bad Request", "Payment Required")
    #[schema(example = "Not Found")]
    pub error: String,
    /// Human-readable error description
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
    /// Request identifier echoed from `x-request-id`
    #[serde(skip_serializing_if = "Option::is_none")]
    #[schema(example = "req-abc123xyz")]
    pub request_id: Option<String>,
    #[schema(example = "2026-03-09T10:30:00.000Z")]
    pub timestamp: String,
}

#[derive(Debug, thiserror::Error, Serialize)]
pub enum ServiceError {
    #[error("Database error: {0}")]
    DatabaseError(
        #[from]
        #[serde(skip)]
        sea_orm::error::DbErr,
    ),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    #[error("Internal error: {0}")]
    InternalError(String),

    #[error("External service error: {0}")]
    ExternalServiceError(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Payment failed: {0}")]
    PaymentFailed(String),
}

impl From<validator::ValidationErrors> for ServiceError {
    fn from(err: validator::ValidationErrors) -> Self {
        ServiceError::ValidationError(err.to_string())
    }
}

impl ServiceError {
    /// Returns the HTTP status code for this error.
    /// This is the single source of truth for error-to-status mapping.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::ValidationError(_) | Self::InvalidOperation(_) => StatusCode::BAD_REQUEST,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::PaymentFailed(_) => StatusCode::PAYMENT_REQUIRED,
            Self::ExternalServiceError(_) => StatusCode::BAD_GATEWAY,
            Self::DatabaseError(_) | Self::InternalError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Returns the error message suitable for HTTP responses.
    /// Internal errors return generic messages to avoid leaking implementation details.
    pub fn response_message(&self) -> String {
        match self {
            Self::DatabaseError(_) => "Database error".to_string(),
            Self::InternalError(_) => "Internal server error".to_string(),
            _ => self.to_string(),
        }
    }

    /// True when the underlying database error is a unique constraint violation.
    pub fn is_unique_violation(&self) -> bool {
        matches!(self, Self::DatabaseError(err) if is_unique_violation(err))
    }
}

pub fn is_unique_violation(err: &DbErr) -> bool {
    matches!(err.sql_err(), Some(SqlErr::UniqueConstraintViolation(_)))
}

fn error_body(status: StatusCode, message: String) -> Response {
    let err = ErrorResponse {
        error: status.canonical_reason().unwrap_or("Error").to_string(),
        message,
        details: None,
        request_id: current_request_id(),
        timestamp: chrono::Utc::now().to_rfc3339(),
    };

    (status, Json(err)).into_response()
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            error!(error = %self, "request failed");
        }
        error_body(status, self.response_message())
    }
}

/// API Error type for HTTP responses
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("Service error: {0}")]
    ServiceError(#[from] ServiceError),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Bad request: {0}")]
    BadRequest(String),
}

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::BadRequest(message.into())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_message) = match self {
            ApiError::ServiceError(service_error) => return service_error.into_response(),
            ApiError::ValidationError(msg) | ApiError::BadRequest(msg) => {
                (StatusCode::BAD_REQUEST, msg)
            }
        };

        error_body(status, error_message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{body::to_bytes, http::StatusCode};

    #[tokio::test]
    async fn service_error_response_includes_request_id() {
        let response =
            crate::tracing::scope_request_id(crate::tracing::RequestId::new("req-123"), async {
                ServiceError::NotFound("missing".into()).into_response()
            })
            .await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let payload: ErrorResponse = serde_json::from_slice(&body).unwrap();
        assert_eq!(payload.request_id.as_deref(), Some("req-123"));
        assert_eq!(payload.error, "Not Found");
    }

    #[tokio::test]
    async fn api_error_response_includes_request_id() {
        let response =
            crate::tracing::scope_request_id(crate::tracing::RequestId::new("req-api-42"), async {
                ApiError::ServiceError(ServiceError::Forbidden("nope".into())).into_response()
            })
            .await;
        assert_eq!(response.status(), StatusCode::FORBIDDEN);

        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let payload: ErrorResponse = serde_json::from_slice(&body).unwrap();
        assert_eq!(payload.request_id.as_deref(), Some("req-api-42"));
    }

    #[test]
    fn service_error_status_code_mapping() {
        assert_eq!(
            ServiceError::NotFound("x".into()).status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ServiceError::ValidationError("x".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ServiceError::InvalidOperation("cart is empty".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ServiceError::Forbidden("x".into()).status_code(),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            ServiceError::Conflict("x".into()).status_code(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            ServiceError::PaymentFailed("amount mismatch".into()).status_code(),
            StatusCode::PAYMENT_REQUIRED
        );
        assert_eq!(
            ServiceError::ExternalServiceError("x".into()).status_code(),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            ServiceError::DatabaseError(DbErr::Custom("boom".into())).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn service_error_response_message_hides_internal_details() {
        assert_eq!(
            ServiceError::InternalError("sensitive".into()).response_message(),
            "Internal server error"
        );
        assert_eq!(
            ServiceError::DatabaseError(DbErr::Custom("select * from users".into()))
                .response_message(),
            "Database error"
        );
        assert_eq!(
            ServiceError::NotFound("Order not found".into()).response_message(),
            "Not found: Order not found"
        );
        assert_eq!(
            ServiceError::PaymentFailed("currency mismatch".into()).response_message(),
            "Payment failed: currency mismatch"
        );
    }

    #[tokio::test]
    async fn api_bad_request_uses_error_body() {
        let response = ApiError::bad_request("Idempotency-Key header is required").into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let payload: ErrorResponse = serde_json::from_slice(&body).unwrap();
        assert_eq!(payload.message, "Idempotency-Key header is required");
    }

    #[test]
    fn custom_db_error_is_not_a_unique_violation() {
        let err = ServiceError::DatabaseError(DbErr::Custom("nope".into()));
        assert!(!err.is_unique_violation());
    }
}
