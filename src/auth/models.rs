//! Authentication data models

use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::fmt;

/// Provider tag recorded on identities created through the emailed-code flow
pub const LOCAL_PROVIDER: &str = "local";

/// Where an identity came from
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Provider {
    /// A configured third-party login provider, by name (e.g. "github")
    Federated(String),
    /// Passwordless login through an emailed code
    Local,
}

impl Provider {
    pub fn as_str(&self) -> &str {
        match self {
            Provider::Federated(name) => name,
            Provider::Local => LOCAL_PROVIDER,
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// JWT claims structure
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Claims {
    pub user_id: String,
    pub iat: i64,
    pub nbf: i64,
    pub exp: i64,
}

/// User database model
#[derive(FromRow, Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct User {
    pub id: String,
    pub username: String,
    pub email: String,
    pub picture: String,
}

/// Link between a provider-issued identity and a local user
#[derive(FromRow, Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct FederatedIdentity {
    /// Provider subject id
    pub id: String,
    pub user_id: String,
    pub provider: String,
    /// Raw provider profile, as JSON
    pub data: String,
}

/// Persisted refresh token
#[derive(FromRow, Debug, Clone, PartialEq, Eq)]
pub struct OpaqueToken {
    pub id: String,
    pub user_id: String,
    pub token: String,
    /// Unix timestamp (seconds)
    pub expires_at: i64,
}

/// Emailed one-time code, at most one per email
#[derive(FromRow, Debug, Clone, PartialEq, Eq)]
pub struct VerificationCode {
    pub email: String,
    pub code: String,
    /// Unix timestamp (seconds)
    pub expires_at: i64,
}

/// Profile returned by a federated provider once its handshake completes
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct FederatedProfile {
    pub subject_id: String,
    pub email: String,
    pub display_name: String,
    pub avatar_url: String,
    pub provider_name: String,
    /// Provider payload as received
    #[serde(default)]
    pub raw: serde_json::Value,
}

/// Access/refresh token pair handed to the caller
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct AuthTokens {
    pub access_token: String,
    pub refresh_token: String,
}

/// Everything known about the bearer of an access token
#[derive(Serialize, Debug, Clone)]
pub struct Introspection {
    pub user: User,
    pub claims: Claims,
    pub federated_identity: Option<FederatedIdentity>,
}

/// Request-scoped data a provider needs to begin or complete its handshake
#[derive(Debug, Clone, Default)]
pub struct HandshakeContext {
    /// Query parameters of the incoming request (`code`, `state`, `error`, ...)
    pub query: std::collections::HashMap<String, String>,
}

impl HandshakeContext {
    pub fn param(&self, key: &str) -> Option<&str> {
        self.query.get(key).map(String::as_str)
    }
}

/// Outcome of starting a federated login
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BeginOutcome {
    /// The request already carries a completed handshake; nothing to do
    AlreadyAuthenticated,
    /// Send the caller to the provider's authorization page
    Redirect(String),
}

/// POST /auth/local/begin body
#[derive(Deserialize, Debug)]
pub struct LocalBeginRequest {
    pub email: String,
}

/// POST /auth/local/verify body
#[derive(Deserialize, Debug)]
pub struct LocalVerifyRequest {
    pub token: String,
    pub email: String,
}

/// POST /auth/refresh body
#[derive(Deserialize, Debug, Default)]
pub struct RefreshRequest {
    pub refresh_token: Option<String>,
}

#[derive(Serialize, Debug)]
pub struct MessageResponse {
    pub message: String,
}
