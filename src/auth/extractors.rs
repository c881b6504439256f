//! Authentication extractors for Axum

use async_trait::async_trait;
use axum::{
    extract::{Extension, FromRequestParts},
    http::{header::AUTHORIZATION, request::Parts},
};
use std::sync::Arc;
use tracing::debug;

use super::cookies::read_cookie;
use crate::common::{ApiError, AppState};

/// Raw access token from `Authorization: Bearer <token>` or the access token cookie.
///
/// Only presence is checked here; handlers decide how the token must verify.
#[derive(Debug, Clone)]
pub struct BearerToken(pub String);

#[async_trait]
impl<S> FromRequestParts<S> for BearerToken
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let Extension(app_state): Extension<Arc<AppState>> =
            Extension::from_request_parts(parts, state)
                .await
                .map_err(|_| ApiError::InternalServer("missing app state".to_string()))?;

        // Handle "Bearer <token>" format or raw token
        let header_token = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|h| h.to_str().ok())
            .map(|s| s.strip_prefix("Bearer ").unwrap_or(s).trim().to_string())
            .filter(|s| !s.is_empty());

        if let Some(token) = header_token {
            return Ok(BearerToken(token));
        }

        match read_cookie(&parts.headers, &app_state.config.cookies.access_token_name) {
            Some(token) => Ok(BearerToken(token)),
            None => {
                debug!("Authentication failed: no bearer token or access token cookie");
                Err(ApiError::Unauthorized("missing auth".into()))
            }
        }
    }
}
