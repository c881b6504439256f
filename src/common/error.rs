// Error handling types for the API

use axum::{http::StatusCode, response::IntoResponse, Json};
use serde::Serialize;
use std::fmt;
use tracing::error;

use super::validation::ValidationResult;
use crate::auth::errors::AuthError;

/// API error types
#[derive(Debug)]
pub enum ApiError {
    Unauthorized(String),
    InternalServer(String),
    Auth(AuthError),
    ValidationError(String),
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ApiError::Unauthorized(msg) => write!(f, "Unauthorized: {}", msg),
            ApiError::InternalServer(msg) => write!(f, "Internal Server Error: {}", msg),
            ApiError::Auth(e) => write!(f, "Auth Error: {}", e),
            ApiError::ValidationError(msg) => write!(f, "Validation Error: {}", msg),
        }
    }
}

/// JSON error response structure
#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

impl ApiError {
    /// Status code and machine-readable code for this error
    pub fn status_and_code(&self) -> (StatusCode, &'static str) {
        match self {
            ApiError::Unauthorized(_) => (StatusCode::UNAUTHORIZED, "UNAUTHORIZED"),
            ApiError::InternalServer(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_SERVER_ERROR")
            }
            ApiError::ValidationError(_) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR"),
            ApiError::Auth(e) => match e {
                AuthError::UnknownProvider(_) => (StatusCode::NOT_FOUND, "UNKNOWN_PROVIDER"),
                AuthError::CantCompleteAuth(_) => (StatusCode::BAD_REQUEST, "CANT_COMPLETE_AUTH"),
                AuthError::InvalidCode => (StatusCode::UNAUTHORIZED, "INVALID_CODE"),
                AuthError::TokenExpired => (StatusCode::UNAUTHORIZED, "TOKEN_EXPIRED"),
                AuthError::TokenMalformed => (StatusCode::UNAUTHORIZED, "TOKEN_MALFORMED"),
                AuthError::TokenInvalidSignature => {
                    (StatusCode::UNAUTHORIZED, "TOKEN_INVALID_SIGNATURE")
                }
                AuthError::TokenNotExpired => (StatusCode::UNAUTHORIZED, "TOKEN_NOT_EXPIRED"),
                AuthError::NotFound(_) => (StatusCode::NOT_FOUND, "NOT_FOUND"),
                AuthError::Signing(_) => (StatusCode::INTERNAL_SERVER_ERROR, "SIGNING_ERROR"),
                AuthError::Persistence(_) => {
                    (StatusCode::INTERNAL_SERVER_ERROR, "PERSISTENCE_ERROR")
                }
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let (status, code) = self.status_and_code();

        let error_message = match self {
            ApiError::Unauthorized(msg)
            | ApiError::InternalServer(msg)
            | ApiError::ValidationError(msg) => msg,
            ApiError::Auth(AuthError::Persistence(e)) => {
                error!(error = %e, "Persistence error occurred");
                "Database operation failed".to_string()
            }
            ApiError::Auth(AuthError::Signing(e)) => {
                error!(error = %e, "Token signing error occurred");
                "Failed to issue token".to_string()
            }
            ApiError::Auth(e) => e.to_string(),
        };

        let error_response = ErrorResponse {
            error: error_message,
            code: code.to_string(),
        };

        (status, Json(error_response)).into_response()
    }
}

impl From<AuthError> for ApiError {
    fn from(err: AuthError) -> Self {
        ApiError::Auth(err)
    }
}

/// Helper function to convert ValidationResult to ApiError
impl From<ValidationResult> for ApiError {
    fn from(result: ValidationResult) -> Self {
        if result.is_valid {
            ApiError::InternalServer(
                "Validation result was valid but converted to error".to_string(),
            )
        } else {
            let error_messages: Vec<String> = result
                .errors
                .iter()
                .map(|e| format!("{}: {}", e.field, e.message))
                .collect();
            ApiError::ValidationError(error_messages.join(", "))
        }
    }
}
