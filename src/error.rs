//! Error handling module
//!
//! Provides unified error types and handling for the entire application.

use crate::ddl::ClassifyError;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;
use tracing::error;

/// Application-wide error type
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] tokio_postgres::Error),

    #[error("Pool error: {0}")]
    Pool(#[from] deadpool_postgres::PoolError),

    #[error("Invalid DDL statement: {0}")]
    Classification(#[from] ClassifyError),

    /// Stale lock version or a status that does not allow the transition
    #[error("Transition rejected: {0}")]
    TransitionRejected(String),

    /// The cluster already runs as many alters as it may
    #[error("Admission rejected: {0}")]
    AdmissionRejected(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

/// Error response structure
#[derive(Serialize)]
pub struct ErrorResponse {
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_code, message, details) = match &self {
            AppError::Database(e) => {
                error!("Database error: {:?}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "DATABASE_ERROR",
                    "A database error occurred".to_string(),
                    Some(e.to_string()),
                )
            }
            AppError::Pool(e) => {
                error!("Pool error: {:?}", e);
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    "POOL_EXHAUSTED",
                    "Database connection pool exhausted".to_string(),
                    Some(e.to_string()),
                )
            }
            AppError::Classification(e @ ClassifyError::Internal(msg)) => {
                error!("Internal classification error: {}", msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    e.code(),
                    "The statement could not be classified".to_string(),
                    Some(msg.clone()),
                )
            }
            AppError::Classification(e) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                e.code(),
                e.to_string(),
                None,
            ),
            AppError::TransitionRejected(msg) => (
                StatusCode::CONFLICT,
                "TRANSITION_REJECTED",
                msg.clone(),
                None,
            ),
            AppError::AdmissionRejected(msg) => (
                StatusCode::CONFLICT,
                "ADMISSION_REJECTED",
                msg.clone(),
                None,
            ),
            AppError::Validation(msg) => (
                StatusCode::BAD_REQUEST,
                "VALIDATION_ERROR",
                msg.clone(),
                None,
            ),
            AppError::NotFound(msg) => (
                StatusCode::NOT_FOUND,
                "NOT_FOUND",
                msg.clone(),
                None,
            ),
            AppError::Conflict(msg) => (
                StatusCode::CONFLICT,
                "CONFLICT",
                msg.clone(),
                None,
            ),
            AppError::BadRequest(msg) => (
                StatusCode::BAD_REQUEST,
                "BAD_REQUEST",
                msg.clone(),
                None,
            ),
            AppError::Unauthorized(msg) => (
                StatusCode::UNAUTHORIZED,
                "UNAUTHORIZED",
                msg.clone(),
                None,
            ),
            AppError::Forbidden(msg) => (
                StatusCode::FORBIDDEN,
                "FORBIDDEN",
                msg.clone(),
                None,
            ),
            AppError::Internal(msg) => {
                error!("Internal error: {}", msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL_ERROR",
                    "An internal error occurred".to_string(),
                    Some(msg.clone()),
                )
            }
            AppError::Config(msg) => {
                error!("Configuration error: {}", msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "CONFIG_ERROR",
                    "A configuration error occurred".to_string(),
                    Some(msg.clone()),
                )
            }
        };

        let body = Json(ErrorResponse {
            success: false,
            message,
            error: details,
            code: Some(error_code.to_string()),
        });

        (status, body).into_response()
    }
}

/// Result type alias for API handlers
pub type ApiResult<T> = Result<T, AppError>;

/// Helper function to create a validation error
pub fn validation_error(msg: impl Into<String>) -> AppError {
    AppError::Validation(msg.into())
}

/// Helper function to create a not found error
pub fn not_found_error(msg: impl Into<String>) -> AppError {
    AppError::NotFound(msg.into())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status_and_code(err: AppError) -> (StatusCode, String) {
        let response = err.into_response();
        let status = response.status();
        let body = body_json(response);
        (status, body["code"].as_str().unwrap_or_default().to_string())
    }

    fn body_json(response: Response) -> serde_json::Value {
        let bytes = tokio_test::block_on(axum::body::to_bytes(response.into_body(), usize::MAX)).unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[test]
    fn test_rejections_are_distinguishable() {
        assert_eq!(
            status_and_code(AppError::TransitionRejected("stale".into())),
            (StatusCode::CONFLICT, "TRANSITION_REJECTED".to_string())
        );
        assert_eq!(
            status_and_code(AppError::AdmissionRejected("full".into())),
            (StatusCode::CONFLICT, "ADMISSION_REJECTED".to_string())
        );
    }

    #[test]
    fn test_classification_errors_keep_their_codes() {
        assert_eq!(
            status_and_code(ClassifyError::Syntax("syntax error near 'X'".into()).into()),
            (StatusCode::UNPROCESSABLE_ENTITY, "SYNTAX_ERROR".to_string())
        );
        assert_eq!(
            status_and_code(ClassifyError::Internal("no rule".into()).into()),
            (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_CLASSIFICATION_ERROR".to_string())
        );
    }

    #[test]
    fn test_helpers() {
        assert!(matches!(not_found_error("x"), AppError::NotFound(_)));
        assert!(matches!(validation_error("x"), AppError::Validation(_)));
    }
}
