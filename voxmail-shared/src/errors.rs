use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::types::ApiErrorResponse;

/// Application error codes following the pattern E{area}{sequence}
///
/// Ranges:
/// - E0xxx: Shared/infrastructure errors
/// - E1xxx: Account and session errors
/// - E2xxx: Credit and mail errors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorCode {
    // Shared (E0xxx)
    InternalError,
    ValidationError,
    NotFound,

    // Account (E1xxx)
    SessionInvalid,
    InvalidCredentials,
    AccountNotFound,
    AccountExists,
    PasswordTooWeak,

    // Credits & mail (E2xxx)
    NoCredits,
    ProviderError,
}

impl ErrorCode {
    pub fn code(&self) -> &'static str {
        match self {
            // Shared
            Self::InternalError => "E0001",
            Self::ValidationError => "E0002",
            Self::NotFound => "E0003",

            // Account
            Self::SessionInvalid => "E1001",
            Self::InvalidCredentials => "E1002",
            Self::AccountNotFound => "E1003",
            Self::AccountExists => "E1004",
            Self::PasswordTooWeak => "E1005",

            // Credits & mail
            Self::NoCredits => "E2001",
            Self::ProviderError => "E2002",
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::InternalError => StatusCode::INTERNAL_SERVER_ERROR,
            Self::ValidationError | Self::PasswordTooWeak => StatusCode::BAD_REQUEST,
            Self::NotFound | Self::AccountNotFound => StatusCode::NOT_FOUND,
            Self::SessionInvalid | Self::InvalidCredentials => StatusCode::UNAUTHORIZED,
            Self::AccountExists => StatusCode::CONFLICT,
            Self::NoCredits => StatusCode::FORBIDDEN,
            Self::ProviderError => StatusCode::BAD_GATEWAY,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("{message}")]
    Known { code: ErrorCode, message: String },

    #[error("internal server error")]
    Internal(#[from] anyhow::Error),

    #[error("database error: {0}")]
    Database(#[from] diesel::result::Error),

    #[error("validation error: {0}")]
    Validation(String),
}

impl AppError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self::Known {
            code,
            message: message.into(),
        }
    }

    /// The single caller-visible outcome for every session token failure.
    pub fn session_invalid() -> Self {
        Self::new(ErrorCode::SessionInvalid, "invalid or expired session")
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::NotFound, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InternalError, message)
    }

    /// Collapses every variant onto its error code.
    pub fn error_code(&self) -> ErrorCode {
        match self {
            AppError::Known { code, .. } => *code,
            AppError::Internal(_) => ErrorCode::InternalError,
            AppError::Database(diesel::result::Error::NotFound) => ErrorCode::NotFound,
            AppError::Database(_) => ErrorCode::InternalError,
            AppError::Validation(_) => ErrorCode::ValidationError,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_response) = match &self {
            AppError::Known { code, message } => {
                let status = code.status_code();
                // Server-side messages carry causes; clients get a fixed text.
                if *code == ErrorCode::InternalError {
                    tracing::error!(code = code.code(), "{message}");
                    (status, ApiErrorResponse::new(code.code(), "internal server error"))
                } else {
                    if status.is_server_error() {
                        tracing::error!(code = code.code(), "{message}");
                    }
                    (status, ApiErrorResponse::new(code.code(), message))
                }
            }
            AppError::Internal(err) => {
                tracing::error!(error = %err, "internal server error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    ApiErrorResponse::new("E0001", "internal server error"),
                )
            }
            AppError::Database(err) => {
                tracing::error!(error = %err, "database error");
                match err {
                    diesel::result::Error::NotFound => (
                        StatusCode::NOT_FOUND,
                        ApiErrorResponse::new("E0003", "resource not found"),
                    ),
                    _ => (
                        StatusCode::INTERNAL_SERVER_ERROR,
                        ApiErrorResponse::new("E0001", "database error"),
                    ),
                }
            }
            AppError::Validation(msg) => (
                StatusCode::BAD_REQUEST,
                ApiErrorResponse::new("E0002", msg),
            ),
        };

        (status, Json(error_response)).into_response()
    }
}

pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;

    async fn body_json(err: AppError) -> serde_json::Value {
        let response = err.into_response();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn session_failures_share_one_message() {
        let value = body_json(AppError::session_invalid()).await;

        assert_eq!(value["success"], false);
        assert_eq!(value["error"]["code"], "E1001");
        assert_eq!(value["error"]["message"], "invalid or expired session");
    }

    #[tokio::test]
    async fn no_credits_is_forbidden() {
        let response = AppError::new(ErrorCode::NoCredits, "no credits remaining").into_response();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn internal_error_hides_cause() {
        let err = AppError::Internal(anyhow::anyhow!("pool exhausted at 10.0.0.3"));
        let value = body_json(err).await;

        assert_eq!(value["error"]["code"], "E0001");
        assert_eq!(value["error"]["message"], "internal server error");
    }

    #[tokio::test]
    async fn internal_message_is_logged_not_returned() {
        let err = AppError::internal("connection refused (os error 111) at 10.0.0.3:5432");
        let value = body_json(err).await;

        assert_eq!(value["error"]["code"], "E0001");
        assert_eq!(value["error"]["message"], "internal server error");
    }

    #[tokio::test]
    async fn provider_errors_keep_their_message() {
        let value = body_json(AppError::new(ErrorCode::ProviderError, "could not deliver the code")).await;
        assert_eq!(value["error"]["code"], "E2002");
        assert_eq!(value["error"]["message"], "could not deliver the code");
    }

    #[test]
    fn database_not_found_maps_to_not_found_code() {
        let err = AppError::from(diesel::result::Error::NotFound);
        assert_eq!(err.error_code(), ErrorCode::NotFound);
    }

    #[test]
    fn status_codes_follow_taxonomy() {
        assert_eq!(ErrorCode::AccountExists.status_code(), StatusCode::CONFLICT);
        assert_eq!(ErrorCode::ProviderError.status_code(), StatusCode::BAD_GATEWAY);
        assert_eq!(ErrorCode::InvalidCredentials.status_code(), StatusCode::UNAUTHORIZED);
        assert_eq!(ErrorCode::AccountNotFound.status_code(), StatusCode::NOT_FOUND);
    }
}
