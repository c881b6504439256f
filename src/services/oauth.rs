// src/services/oauth.rs
//! Federated login providers (OAuth 2.0 authorization-code flow)
//!
//! The `state` parameter is a short-lived HS256 JWT naming the provider, so
//! callbacks can be checked without server-side session storage.

use async_trait::async_trait;
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::auth::models::{FederatedProfile, HandshakeContext};
use crate::common::{safe_email_log, AuthConfig, ProviderConfig};

const STATE_AUDIENCE: &str = "auth_api-oauth";
const STATE_TOKEN_TYPE: &str = "oauth_state";
const STATE_TTL_MINUTES: i64 = 10;
const USER_AGENT: &str = "auth_api";

#[derive(Debug, Error)]
pub enum OAuthError {
    #[error("Unsupported provider: {0}")]
    UnsupportedProvider(String),

    #[error("Missing callback parameter: {0}")]
    MissingParam(String),

    #[error("Provider denied authorization: {0}")]
    Denied(String),

    #[error("Invalid OAuth state: {0}")]
    InvalidState(String),

    #[error("HTTP request failed: {0}")]
    RequestFailed(String),

    #[error("Token exchange failed: {0}")]
    TokenExchange(String),

    #[error("Profile fetch failed: {0}")]
    Profile(String),
}

/// A federated login provider as seen by the session layer
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    fn name(&self) -> &str;

    /// URL of the provider's authorization page
    async fn begin_handshake(&self, ctx: &HandshakeContext) -> Result<String, OAuthError>;

    /// Finish the handshake from the callback request and fetch the user's profile
    async fn complete_handshake(
        &self,
        ctx: &HandshakeContext,
    ) -> Result<FederatedProfile, OAuthError>;
}

#[derive(Debug, Serialize, Deserialize)]
struct OAuthStateClaims {
    sub: String,
    aud: String,
    iat: i64,
    exp: i64,
    token_type: String,
    provider: String,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: Option<String>,
    error: Option<String>,
    error_description: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ProviderKind {
    GitHub,
    Google,
}

impl ProviderKind {
    fn from_name(name: &str) -> Option<Self> {
        match name {
            "github" => Some(ProviderKind::GitHub),
            "google" => Some(ProviderKind::Google),
            _ => None,
        }
    }

    fn authorize_url(&self) -> &'static str {
        match self {
            ProviderKind::GitHub => "https://github.com/login/oauth/authorize",
            ProviderKind::Google => "https://accounts.google.com/o/oauth2/v2/auth",
        }
    }

    fn token_url(&self) -> &'static str {
        match self {
            ProviderKind::GitHub => "https://github.com/login/oauth/access_token",
            ProviderKind::Google => "https://oauth2.googleapis.com/token",
        }
    }

    fn userinfo_url(&self) -> &'static str {
        match self {
            ProviderKind::GitHub => "https://api.github.com/user",
            ProviderKind::Google => "https://openidconnect.googleapis.com/v1/userinfo",
        }
    }

    fn scopes(&self) -> &'static str {
        match self {
            ProviderKind::GitHub => "read:user user:email",
            ProviderKind::Google => "openid email profile",
        }
    }
}

/// GitHub or Google login over plain OAuth 2.0
pub struct OAuthProvider {
    kind: ProviderKind,
    config: ProviderConfig,
    state_secret: String,
    client: Client,
}

impl OAuthProvider {
    pub fn new(config: ProviderConfig, state_secret: &str) -> Result<Self, OAuthError> {
        let kind = ProviderKind::from_name(&config.name)
            .ok_or_else(|| OAuthError::UnsupportedProvider(config.name.clone()))?;

        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .unwrap_or_else(|_| Client::new());

        Ok(Self {
            kind,
            config,
            state_secret: state_secret.to_string(),
            client,
        })
    }

    fn authorization_url(&self, state: &str) -> String {
        let mut url = format!(
            "{}?client_id={}&redirect_uri={}&response_type=code&scope={}&state={}",
            self.kind.authorize_url(),
            urlencoding::encode(&self.config.client_id),
            urlencoding::encode(&self.config.redirect_uri),
            urlencoding::encode(self.kind.scopes()),
            urlencoding::encode(state)
        );
        if self.kind == ProviderKind::Google {
            url.push_str("&prompt=select_account");
        }
        url
    }

    fn sign_state(&self) -> Result<String, OAuthError> {
        if self.state_secret.is_empty() {
            return Err(OAuthError::InvalidState(
                "signing key not configured".to_string(),
            ));
        }

        let now = Utc::now();
        let claims = OAuthStateClaims {
            sub: Uuid::new_v4().to_string(),
            aud: STATE_AUDIENCE.to_string(),
            iat: now.timestamp(),
            exp: (now + Duration::minutes(STATE_TTL_MINUTES)).timestamp(),
            token_type: STATE_TOKEN_TYPE.to_string(),
            provider: self.config.name.clone(),
        };

        encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(self.state_secret.as_bytes()),
        )
        .map_err(|e| OAuthError::InvalidState(e.to_string()))
    }

    fn verify_state(&self, state: &str) -> Result<(), OAuthError> {
        if self.state_secret.is_empty() {
            return Err(OAuthError::InvalidState(
                "signing key not configured".to_string(),
            ));
        }

        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_audience(&[STATE_AUDIENCE]);

        let claims = decode::<OAuthStateClaims>(
            state,
            &DecodingKey::from_secret(self.state_secret.as_bytes()),
            &validation,
        )
        .map_err(|e| OAuthError::InvalidState(e.to_string()))?
        .claims;

        if claims.token_type != STATE_TOKEN_TYPE {
            return Err(OAuthError::InvalidState(format!(
                "unexpected token type {}",
                claims.token_type
            )));
        }
        if claims.provider != self.config.name {
            return Err(OAuthError::InvalidState(format!(
                "state issued for {}",
                claims.provider
            )));
        }
        Ok(())
    }

    async fn exchange_code(&self, code: &str) -> Result<String, OAuthError> {
        let params = [
            ("code", code),
            ("client_id", self.config.client_id.as_str()),
            ("client_secret", self.config.client_secret.as_str()),
            ("redirect_uri", self.config.redirect_uri.as_str()),
            ("grant_type", "authorization_code"),
        ];

        debug!(provider = %self.config.name, "Exchanging authorization code for tokens");

        let response = self
            .client
            .post(self.kind.token_url())
            .header("Accept", "application/json")
            .form(&params)
            .send()
            .await
            .map_err(|e| OAuthError::RequestFailed(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            error!(provider = %self.config.name, status = %status, error = %error_text, "Token exchange failed");
            return Err(OAuthError::TokenExchange(format!(
                "HTTP {}: {}",
                status, error_text
            )));
        }

        let body = response
            .json::<TokenResponse>()
            .await
            .map_err(|e| OAuthError::TokenExchange(e.to_string()))?;

        // GitHub reports failures with 200 and an `error` field
        match (body.access_token, body.error) {
            (Some(token), None) => Ok(token),
            (_, Some(err)) => Err(OAuthError::TokenExchange(format!(
                "{}: {}",
                err,
                body.error_description.unwrap_or_default()
            ))),
            (None, None) => Err(OAuthError::TokenExchange(
                "no access token in response".to_string(),
            )),
        }
    }

    async fn get_json(&self, url: &str, access_token: &str) -> Result<serde_json::Value, OAuthError> {
        let response = self
            .client
            .get(url)
            .bearer_auth(access_token)
            .header("User-Agent", USER_AGENT)
            .header("Accept", "application/json")
            .send()
            .await
            .map_err(|e| OAuthError::RequestFailed(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(OAuthError::Profile(format!("HTTP {} from {}", status, url)));
        }

        response
            .json::<serde_json::Value>()
            .await
            .map_err(|e| OAuthError::Profile(e.to_string()))
    }

    async fn fetch_profile(&self, access_token: &str) -> Result<FederatedProfile, OAuthError> {
        let body = self.get_json(self.kind.userinfo_url(), access_token).await?;

        match self.kind {
            ProviderKind::Google => google_profile(body),
            ProviderKind::GitHub => {
                let mut profile = github_profile(body)?;
                // Private addresses are omitted from /user
                if profile.email.is_empty() {
                    let emails = self
                        .get_json("https://api.github.com/user/emails", access_token)
                        .await?;
                    profile.email = github_primary_email(&emails).unwrap_or_default();
                }
                Ok(profile)
            }
        }
    }
}

#[async_trait]
impl IdentityProvider for OAuthProvider {
    fn name(&self) -> &str {
        &self.config.name
    }

    async fn begin_handshake(&self, _ctx: &HandshakeContext) -> Result<String, OAuthError> {
        let state = self.sign_state()?;
        let url = self.authorization_url(&state);
        info!(provider = %self.config.name, "Redirecting to provider authorization page");
        Ok(url)
    }

    async fn complete_handshake(
        &self,
        ctx: &HandshakeContext,
    ) -> Result<FederatedProfile, OAuthError> {
        if let Some(err) = ctx.param("error") {
            warn!(provider = %self.config.name, oauth_error = %err, "Provider returned an error");
            return Err(OAuthError::Denied(err.to_string()));
        }

        let code = ctx
            .param("code")
            .ok_or_else(|| OAuthError::MissingParam("code".to_string()))?;
        let state = ctx
            .param("state")
            .ok_or_else(|| OAuthError::MissingParam("state".to_string()))?;

        self.verify_state(state)?;

        let access_token = self.exchange_code(code).await?;
        let profile = self.fetch_profile(&access_token).await?;

        info!(
            provider = %self.config.name,
            subject_id = %profile.subject_id,
            email = %safe_email_log(&profile.email),
            "Provider handshake completed"
        );

        Ok(profile)
    }
}

fn str_field(body: &serde_json::Value, key: &str) -> Option<String> {
    body.get(key)
        .and_then(|v| v.as_str())
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn google_profile(body: serde_json::Value) -> Result<FederatedProfile, OAuthError> {
    let subject_id =
        str_field(&body, "sub").ok_or_else(|| OAuthError::Profile("missing sub".to_string()))?;
    let email = str_field(&body, "email").unwrap_or_default();
    let display_name = str_field(&body, "name").unwrap_or_else(|| email.clone());

    Ok(FederatedProfile {
        subject_id,
        display_name,
        avatar_url: str_field(&body, "picture").unwrap_or_default(),
        email,
        provider_name: "google".to_string(),
        raw: body,
    })
}

fn github_profile(body: serde_json::Value) -> Result<FederatedProfile, OAuthError> {
    let subject_id = body
        .get("id")
        .and_then(|v| v.as_i64())
        .map(|id| id.to_string())
        .ok_or_else(|| OAuthError::Profile("missing id".to_string()))?;
    let login = str_field(&body, "login").unwrap_or_default();

    Ok(FederatedProfile {
        subject_id,
        display_name: str_field(&body, "name").unwrap_or(login),
        email: str_field(&body, "email").unwrap_or_default(),
        avatar_url: str_field(&body, "avatar_url").unwrap_or_default(),
        provider_name: "github".to_string(),
        raw: body,
    })
}

fn github_primary_email(emails: &serde_json::Value) -> Option<String> {
    emails.as_array()?.iter().find_map(|entry| {
        let primary = entry.get("primary").and_then(|v| v.as_bool()).unwrap_or(false);
        let verified = entry.get("verified").and_then(|v| v.as_bool()).unwrap_or(false);
        if primary && verified {
            str_field(entry, "email")
        } else {
            None
        }
    })
}

/// Configured providers by name
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    providers: HashMap<String, Arc<dyn IdentityProvider>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build an `OAuthProvider` for every provider in the configuration
    pub fn from_config(config: &AuthConfig) -> Self {
        let mut registry = Self::new();
        for provider_config in &config.providers {
            match OAuthProvider::new(provider_config.clone(), &config.jwt_secret) {
                Ok(provider) => registry.register(Arc::new(provider)),
                Err(e) => warn!(error = %e, "Skipping provider"),
            }
        }
        info!(providers = ?registry.names(), "Federated providers configured");
        registry
    }

    pub fn register(&mut self, provider: Arc<dyn IdentityProvider>) {
        self.providers.insert(provider.name().to_string(), provider);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn IdentityProvider>> {
        self.providers.get(name).cloned()
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.providers.keys().cloned().collect();
        names.sort();
        names
    }
}
