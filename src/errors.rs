use crate::services::{
    drive_service::DriveError,
    identity::{AuthError, AuthFlow},
};
use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use std::fmt;

/// A lightweight wrapper for general errors that keeps the message local.
#[derive(Debug)]
pub struct AppError {
    pub status: StatusCode,
    pub message: String,
    /// Provider error code for authentication failures.
    pub code: Option<&'static str>,
}

impl AppError {
    /// Create a new AppError with a specific status and message.
    pub fn new(status: StatusCode, msg: impl Into<String>) -> Self {
        Self {
            status,
            message: msg.into(),
            code: None,
        }
    }

    /// Shortcut for a 500 Internal Server Error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, msg)
    }

    /// Shortcut for 404 Not Found
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, msg)
    }

    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, msg)
    }

    /// Map an authentication failure to its user-facing message.
    pub fn auth(err: AuthError, flow: AuthFlow) -> Self {
        let status = match &err {
            AuthError::MissingFields | AuthError::InvalidEmail | AuthError::WeakPassword => {
                StatusCode::BAD_REQUEST
            }
            AuthError::UserNotFound | AuthError::WrongPassword => StatusCode::UNAUTHORIZED,
            AuthError::EmailAlreadyInUse => StatusCode::CONFLICT,
            AuthError::ProviderNotEnabled(_) => StatusCode::NOT_IMPLEMENTED,
            AuthError::Hash(_) | AuthError::Sqlx(_) => {
                tracing::error!(error = %err, "authentication backend failure");
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        Self {
            status,
            message: err.user_message(flow).to_string(),
            code: Some(err.code()),
        }
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for AppError {}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = match self.code {
            Some(code) => Json(json!({
                "error": self.message,
                "code": code,
                "status": self.status.as_u16()
            })),
            None => Json(json!({
                "error": self.message,
                "status": self.status.as_u16()
            })),
        };

        (self.status, body).into_response()
    }
}

impl From<DriveError> for AppError {
    fn from(err: DriveError) -> Self {
        match err {
            DriveError::NotAuthenticated => Self::new(StatusCode::UNAUTHORIZED, err.to_string()),
            DriveError::NotFound(_) => Self::not_found(err.to_string()),
            DriveError::NotAvailable(_) => Self::new(StatusCode::CONFLICT, err.to_string()),
            DriveError::Validation(_) => Self::bad_request(err.to_string()),
            DriveError::CorruptPayload(_) | DriveError::Internal(_) | DriveError::Store(_) => {
                tracing::error!(error = %err, "drive command failed");
                Self::internal("Something went wrong, please try again")
            }
        }
    }
}
