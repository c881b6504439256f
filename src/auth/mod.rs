//! # Auth Module
//!
//! Identity and token lifecycle:
//! - Access tokens (HS256 JWT) and persisted opaque refresh tokens
//! - Emailed one-time codes for passwordless login
//! - Federated and local identity resolution
//! - Session flows (login, renew, refresh, logout, introspection) and their HTTP routes

pub mod codes;
pub mod cookies;
pub mod errors;
pub mod extractors;
pub mod handlers;
pub mod identity;
pub mod models;
pub mod repository;
pub mod routes;
pub mod session;
pub mod tokens;
pub mod validators;

#[cfg(test)]
mod tests;

pub use errors::AuthError;
pub use repository::{Database, SqliteDatabase, StoreError};
pub use routes::auth_routes;
pub use session::SessionOrchestrator;
