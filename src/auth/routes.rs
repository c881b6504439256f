//! Authentication routes

use axum::{
    routing::{get, post},
    Router,
};

use super::handlers;

/// Creates and returns the authentication router
///
/// # Routes
/// - `POST /auth/local/begin` - Email a verification code
/// - `POST /auth/local/verify` - Redeem the code for a token pair
/// - `GET /auth/renew` - Renew an expired access token
/// - `POST /auth/refresh` - Rotate a refresh token
/// - `GET /auth/logout` - Invalidate the refresh token and clear cookies
/// - `GET /auth/me` - Introspect the current access token
/// - `GET /auth/:provider` - Start a federated login
/// - `GET /auth/:provider/callback` - Finish a federated login
pub fn auth_routes() -> Router {
    Router::new()
        .route("/auth/local/begin", post(handlers::local_begin))
        .route("/auth/local/verify", post(handlers::local_verify))
        .route("/auth/renew", get(handlers::renew))
        .route("/auth/refresh", post(handlers::refresh))
        .route("/auth/logout", get(handlers::logout))
        .route("/auth/me", get(handlers::me))
        .route("/auth/:provider", get(handlers::begin_federated))
        .route("/auth/:provider/callback", get(handlers::federated_callback))
}
