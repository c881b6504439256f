// src/common/config.rs
//! Service configuration, loaded once from the environment at startup.
//!
//! Nothing here is mutated after `main` builds it; components receive the
//! pieces they need at construction time.

use chrono::Duration;
use std::env;
use tracing::warn;

/// Default access token lifetime (24h)
pub const DEFAULT_ACCESS_TOKEN_TTL_SECONDS: i64 = 24 * 60 * 60;
/// Default refresh token lifetime (7d)
pub const DEFAULT_REFRESH_TOKEN_TTL_SECONDS: i64 = 7 * 24 * 60 * 60;
/// Default lifetime of the access token cookie (365d)
pub const DEFAULT_COOKIE_MAX_AGE_SECONDS: i64 = 365 * 24 * 60 * 60;

/// OAuth client registration for one federated provider
#[derive(Debug, Clone)]
pub struct ProviderConfig {
    pub name: String,
    pub client_id: String,
    pub client_secret: String,
    pub redirect_uri: String,
}

/// Cookie attributes used when handing tokens to browsers
#[derive(Debug, Clone)]
pub struct CookieConfig {
    pub http_only: bool,
    pub secure: bool,
    pub domain: Option<String>,
    /// Lifetime of the access token cookie. Must outlive the token itself so
    /// an expired token can still be presented to `/auth/renew`.
    pub max_age: Duration,
    pub access_token_name: String,
    pub refresh_token_name: String,
}

impl Default for CookieConfig {
    fn default() -> Self {
        Self {
            http_only: true,
            secure: true,
            domain: None,
            max_age: Duration::seconds(DEFAULT_COOKIE_MAX_AGE_SECONDS),
            access_token_name: "access_token".to_string(),
            refresh_token_name: "refresh_token".to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AuthConfig {
    /// HMAC secret for access tokens. Empty means no signing key is available.
    pub jwt_secret: String,
    pub jwt_leeway_seconds: u64,
    pub access_token_ttl: Duration,
    pub refresh_token_ttl: Duration,
    pub verification_code_length: usize,
    pub verification_code_ttl: Duration,
    pub verification_code_issue_attempts: u32,
    pub providers: Vec<ProviderConfig>,
    pub frontend_url: String,
    pub cookies: CookieConfig,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            jwt_secret: String::new(),
            jwt_leeway_seconds: 0,
            access_token_ttl: Duration::seconds(DEFAULT_ACCESS_TOKEN_TTL_SECONDS),
            refresh_token_ttl: Duration::seconds(DEFAULT_REFRESH_TOKEN_TTL_SECONDS),
            verification_code_length: 6,
            verification_code_ttl: Duration::minutes(15),
            verification_code_issue_attempts: 3,
            providers: Vec::new(),
            frontend_url: "http://localhost:3000".to_string(),
            cookies: CookieConfig::default(),
        }
    }
}

impl AuthConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        let mut config = Self::default();

        // JWT_SECRET - symmetric signing key for access tokens
        match env::var("JWT_SECRET") {
            Ok(secret) if !secret.trim().is_empty() => config.jwt_secret = secret,
            _ => warn!("JWT_SECRET is not set; access tokens cannot be issued"),
        }

        if let Some(val) = parse_var::<u64>("JWT_LEEWAY_SECONDS") {
            config.jwt_leeway_seconds = val;
        }

        if let Some(val) = parse_var::<i64>("ACCESS_TOKEN_TTL_SECONDS") {
            config.access_token_ttl = Duration::seconds(val);
        }

        if let Some(val) = parse_var::<i64>("REFRESH_TOKEN_TTL_SECONDS") {
            config.refresh_token_ttl = Duration::seconds(val);
        }

        if let Some(val) = parse_var::<usize>("VERIFICATION_CODE_LENGTH") {
            if val > 0 {
                config.verification_code_length = val;
            }
        }

        if let Some(val) = parse_var::<i64>("VERIFICATION_CODE_TTL_SECONDS") {
            config.verification_code_ttl = Duration::seconds(val);
        }

        if let Some(val) = parse_var::<u32>("VERIFICATION_CODE_ISSUE_ATTEMPTS") {
            config.verification_code_issue_attempts = val.max(1);
        }

        // AUTH_PROVIDERS - comma-separated list of federated providers to enable
        if let Ok(names) = env::var("AUTH_PROVIDERS") {
            config.providers = names
                .split(',')
                .map(|s| s.trim().to_lowercase())
                .filter(|s| !s.is_empty())
                .filter_map(|name| provider_from_env(&name))
                .collect();
        }

        if let Ok(url) = env::var("FRONTEND_URL") {
            config.frontend_url = url;
        }

        if let Ok(val) = env::var("COOKIE_HTTP_ONLY") {
            config.cookies.http_only = val.to_lowercase() != "false";
        }
        if let Ok(val) = env::var("COOKIE_SECURE") {
            config.cookies.secure = val.to_lowercase() != "false";
        }
        config.cookies.domain = env::var("COOKIE_DOMAIN").ok().filter(|d| !d.is_empty());
        if let Some(val) = parse_var::<i64>("COOKIE_MAX_AGE_SECONDS") {
            config.cookies.max_age = Duration::seconds(val);
        }
        if let Ok(name) = env::var("COOKIE_ACCESS_TOKEN_NAME") {
            config.cookies.access_token_name = name;
        }
        if let Ok(name) = env::var("COOKIE_REFRESH_TOKEN_NAME") {
            config.cookies.refresh_token_name = name;
        }

        config
    }
}

/// Reads `<NAME>_CLIENT_ID`, `<NAME>_CLIENT_SECRET` and `<NAME>_REDIRECT_URI`
fn provider_from_env(name: &str) -> Option<ProviderConfig> {
    let prefix = name.to_uppercase();
    let client_id = env::var(format!("{}_CLIENT_ID", prefix)).ok();
    let client_secret = env::var(format!("{}_CLIENT_SECRET", prefix)).ok();
    let redirect_uri = env::var(format!("{}_REDIRECT_URI", prefix)).ok();

    match (client_id, client_secret, redirect_uri) {
        (Some(client_id), Some(client_secret), Some(redirect_uri)) => Some(ProviderConfig {
            name: name.to_string(),
            client_id,
            client_secret,
            redirect_uri,
        }),
        _ => {
            warn!(provider = %name, "Provider listed in AUTH_PROVIDERS but its credentials are incomplete; skipping");
            None
        }
    }
}

fn parse_var<T: std::str::FromStr>(key: &str) -> Option<T> {
    let raw = env::var(key).ok()?;
    match raw.trim().parse::<T>() {
        Ok(val) => Some(val),
        Err(_) => {
            warn!(key = %key, value = %raw, "Ignoring unparsable configuration value");
            None
        }
    }
}
