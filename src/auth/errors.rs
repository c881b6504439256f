//! Error taxonomy for the identity and token lifecycle

use thiserror::Error;

use super::repository::StoreError;

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Unknown provider: {0}")]
    UnknownProvider(String),

    #[error("Couldn't complete auth: {0}")]
    CantCompleteAuth(String),

    #[error("Invalid verification code")]
    InvalidCode,

    #[error("Token expired")]
    TokenExpired,

    #[error("Token malformed")]
    TokenMalformed,

    #[error("Token signature invalid")]
    TokenInvalidSignature,

    /// Renewal refused because the presented access token is still valid
    #[error("Token has not expired")]
    TokenNotExpired,

    #[error("{0} not found")]
    NotFound(String),

    #[error("Signing error: {0}")]
    Signing(String),

    #[error("Persistence error: {0}")]
    Persistence(#[from] StoreError),
}

impl AuthError {
    /// True for the token verification failures
    pub fn is_token_error(&self) -> bool {
        matches!(
            self,
            AuthError::TokenExpired
                | AuthError::TokenMalformed
                | AuthError::TokenInvalidSignature
                | AuthError::TokenNotExpired
        )
    }
}
