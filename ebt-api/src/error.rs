use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use ebt_core::CoreError;
use ebt_shared::redact_text;
use serde_json::json;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("authentication failed: {0}")]
    AuthenticationError(String),
    #[error("not allowed: {0}")]
    AuthorizationError(String),
    #[error("invalid request: {0}")]
    ValidationError(String),
    #[error("not found: {0}")]
    NotFoundError(String),
    #[error("conflict: {0}")]
    ConflictError(String),
    #[error("{0} unavailable")]
    UpstreamError(&'static str),
    #[error("internal error: {0}")]
    InternalServerError(String),
}

impl From<CoreError> for AppError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::NotFound(msg) => AppError::NotFoundError(msg),
            CoreError::InvalidState(msg) | CoreError::Validation(msg) => AppError::ValidationError(msg),
            CoreError::Forbidden(msg) => AppError::AuthorizationError(msg),
            CoreError::Conflict(msg) => AppError::ConflictError(msg),
            CoreError::Upstream { service, source } => {
                tracing::warn!("Upstream {} failed: {}", service, redact_text(&source.to_string()));
                AppError::UpstreamError(service)
            }
            other => AppError::InternalServerError(other.to_string()),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_message) = match self {
            AppError::AuthenticationError(msg) => (StatusCode::UNAUTHORIZED, msg),
            AppError::AuthorizationError(msg) => (StatusCode::FORBIDDEN, msg),
            AppError::ValidationError(msg) => (StatusCode::BAD_REQUEST, msg),
            AppError::NotFoundError(msg) => (StatusCode::NOT_FOUND, msg),
            AppError::ConflictError(msg) => (StatusCode::CONFLICT, msg),
            AppError::UpstreamError(service) => (
                StatusCode::BAD_GATEWAY,
                format!(
                    "We could not reach the {} right now. Please try again shortly or contact support.",
                    service
                ),
            ),
            AppError::InternalServerError(msg) => {
                tracing::error!("Internal Server Error: {}", redact_text(&msg));
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error".to_string())
            }
        };

        let body = Json(json!({
            "error": error_message,
        }));

        (status, body).into_response()
    }
}
