//! Authentication handlers

use axum::{
    extract::{Extension, Json, Path, Query},
    http::{
        header::{LOCATION, SET_COOKIE},
        HeaderMap, HeaderValue, StatusCode,
    },
    response::{IntoResponse, Response},
};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use super::cookies::{auth_cookies, clear_auth_cookies, read_cookie};
use super::extractors::BearerToken;
use super::models::{
    AuthTokens, BeginOutcome, HandshakeContext, Introspection, LocalBeginRequest,
    LocalVerifyRequest, MessageResponse, RefreshRequest,
};
use super::validators::LocalLoginValidator;
use crate::common::{safe_email_log, ApiError, AppState, Validator};

/// GET /auth/:provider
/// Redirects to the provider's authorization page, or straight back to the
/// frontend when the caller already holds a valid access token
pub async fn begin_federated(
    Extension(state): Extension<Arc<AppState>>,
    Path(provider): Path<String>,
    Query(params): Query<HashMap<String, String>>,
    bearer: Option<BearerToken>,
) -> Result<Response, ApiError> {
    let ctx = HandshakeContext { query: params };
    let access_token = bearer.map(|BearerToken(token)| token);

    match state
        .session
        .begin_federated(&provider, &ctx, access_token.as_deref())
        .await?
    {
        BeginOutcome::Redirect(url) => {
            debug!(provider = %provider, "Starting federated login");
            found(&url, &[])
        }
        BeginOutcome::AlreadyAuthenticated => found(&state.config.frontend_url, &[]),
    }
}

/// GET /auth/:provider/callback
/// Completes the handshake, sets the token cookies and returns to the frontend
pub async fn federated_callback(
    Extension(state): Extension<Arc<AppState>>,
    Path(provider): Path<String>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<Response, ApiError> {
    let ctx = HandshakeContext { query: params };

    let tokens = state.session.complete_federated(&provider, &ctx).await?;

    found(
        &state.config.frontend_url,
        &auth_cookies(&state.config, &tokens),
    )
}

/// POST /auth/local/begin
/// Emails a one-time verification code
///
/// # Request Body
/// ```json
/// { "email": "jane@example.com" }
/// ```
pub async fn local_begin(
    Extension(state): Extension<Arc<AppState>>,
    Json(payload): Json<LocalBeginRequest>,
) -> Result<Json<MessageResponse>, ApiError> {
    LocalLoginValidator.validate(&payload).into_result()?;
    let email = payload.email.trim();

    info!(email = %safe_email_log(email), "Local login requested");
    state.session.begin_local(email).await?;

    Ok(Json(MessageResponse {
        message: "Verification code sent".to_string(),
    }))
}

/// POST /auth/local/verify
/// Redeems the emailed code and returns a token pair
///
/// # Request Body
/// ```json
/// { "token": "123456", "email": "jane@example.com" }
/// ```
///
/// # Response
/// ```json
/// { "access_token": "<jwt>", "refresh_token": "<opaque>" }
/// ```
pub async fn local_verify(
    Extension(state): Extension<Arc<AppState>>,
    Json(payload): Json<LocalVerifyRequest>,
) -> Result<Response, ApiError> {
    LocalLoginValidator.validate(&payload).into_result()?;

    let tokens = state
        .session
        .complete_local(payload.token.trim(), payload.email.trim())
        .await?;

    tokens_response(&state, tokens)
}

/// GET /auth/renew
/// Trades an expired access token for a new pair. A still-valid token is refused.
pub async fn renew(
    Extension(state): Extension<Arc<AppState>>,
    BearerToken(token): BearerToken,
) -> Result<Response, ApiError> {
    let tokens = state.session.renew(&token).await.map_err(|e| {
        if e.is_token_error() {
            debug!(error = %e, "Renewal rejected");
        }
        e
    })?;

    tokens_response(&state, tokens)
}

/// POST /auth/refresh
/// Rotates a refresh token taken from the body or the refresh cookie
pub async fn refresh(
    Extension(state): Extension<Arc<AppState>>,
    headers: HeaderMap,
    body: Option<Json<RefreshRequest>>,
) -> Result<Response, ApiError> {
    let refresh_token = body
        .and_then(|Json(req)| req.refresh_token)
        .filter(|t| !t.is_empty())
        .or_else(|| read_cookie(&headers, &state.config.cookies.refresh_token_name))
        .ok_or_else(|| ApiError::Unauthorized("missing refresh token".to_string()))?;

    let tokens = state.session.refresh(&refresh_token).await?;

    tokens_response(&state, tokens)
}

/// GET /auth/logout
/// Invalidates the refresh cookie, clears both cookies and returns to the frontend
pub async fn logout(
    Extension(state): Extension<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let refresh_token = read_cookie(&headers, &state.config.cookies.refresh_token_name);

    if let Err(e) = state.session.logout(refresh_token.as_deref()).await {
        // Cookies are cleared regardless
        warn!(error = %e, "Failed to invalidate refresh token during logout");
    }

    info!("User logout successful");
    found(
        &state.config.frontend_url,
        &clear_auth_cookies(&state.config.cookies),
    )
}

/// GET /auth/me
/// Returns the user, claims and linked identity behind the bearer token
pub async fn me(
    Extension(state): Extension<Arc<AppState>>,
    BearerToken(token): BearerToken,
) -> Result<Json<Introspection>, ApiError> {
    let introspection = state.session.introspect(&token).await?;
    Ok(Json(introspection))
}

// ---- Helper Functions ----

fn set_cookie_headers(cookies: &[String]) -> Result<HeaderMap, ApiError> {
    let mut headers = HeaderMap::new();
    for cookie in cookies {
        let value = HeaderValue::from_str(cookie).map_err(|e| {
            error!(error = %e, "Invalid Set-Cookie header value");
            ApiError::InternalServer("failed to build cookie".to_string())
        })?;
        headers.append(SET_COOKIE, value);
    }
    Ok(headers)
}

/// 302 to `url`, setting `cookies`
fn found(url: &str, cookies: &[String]) -> Result<Response, ApiError> {
    let mut headers = set_cookie_headers(cookies)?;
    let location = HeaderValue::from_str(url).map_err(|e| {
        error!(error = %e, "Invalid redirect location");
        ApiError::InternalServer("invalid redirect location".to_string())
    })?;
    headers.insert(LOCATION, location);

    Ok((StatusCode::FOUND, headers).into_response())
}

/// JSON token pair plus the matching cookies
fn tokens_response(state: &AppState, tokens: AuthTokens) -> Result<Response, ApiError> {
    let headers = set_cookie_headers(&auth_cookies(&state.config, &tokens))?;
    Ok((headers, Json(tokens)).into_response())
}
