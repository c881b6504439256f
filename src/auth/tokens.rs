//! Access token signing/verification and persisted refresh tokens

use chrono::{Duration, Utc};
use jsonwebtoken::{
    decode, encode, errors::ErrorKind, Algorithm, DecodingKey, EncodingKey, Header, Validation,
};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use super::errors::AuthError;
use super::models::{Claims, OpaqueToken, User};
use super::repository::Database;
use crate::common::{generate_opaque_token, generate_token_id, safe_token_log, AuthConfig};

pub struct TokenService {
    db: Arc<dyn Database>,
    secret: String,
    leeway: u64,
    access_token_ttl: Duration,
    refresh_token_ttl: Duration,
}

impl TokenService {
    pub fn new(db: Arc<dyn Database>, config: &AuthConfig) -> Self {
        Self {
            db,
            secret: config.jwt_secret.clone(),
            leeway: config.jwt_leeway_seconds,
            access_token_ttl: config.access_token_ttl,
            refresh_token_ttl: config.refresh_token_ttl,
        }
    }

    /// Sign an access token for `user`, valid from now until now + access TTL
    pub fn create_access_token(&self, user: &User) -> Result<String, AuthError> {
        let now = Utc::now();
        let claims = Claims {
            user_id: user.id.clone(),
            iat: now.timestamp(),
            nbf: now.timestamp(),
            exp: (now + self.access_token_ttl).timestamp(),
        };

        self.sign_claims(&claims)
    }

    pub(crate) fn sign_claims(&self, claims: &Claims) -> Result<String, AuthError> {
        if self.secret.is_empty() {
            error!(user_id = %claims.user_id, "Cannot sign access token: no signing key configured");
            return Err(AuthError::Signing("signing key not configured".to_string()));
        }

        encode(
            &Header::new(Algorithm::HS256),
            claims,
            &EncodingKey::from_secret(self.secret.as_bytes()),
        )
        .map_err(|e| {
            error!(error = %e, user_id = %claims.user_id, "JWT encoding error");
            AuthError::Signing(e.to_string())
        })
    }

    /// Check signature, expiry and not-before
    pub fn verify_access_token(&self, token: &str) -> Result<Claims, AuthError> {
        self.decode_with(token, true)
    }

    /// Decode a token whose signature is valid but whose expiry may have passed.
    /// Only the renewal path uses this.
    pub fn decode_expired(&self, token: &str) -> Result<Claims, AuthError> {
        self.decode_with(token, false)
    }

    fn decode_with(&self, token: &str, validate_exp: bool) -> Result<Claims, AuthError> {
        if self.secret.is_empty() {
            warn!("Access token rejected: no signing key configured");
            return Err(AuthError::TokenInvalidSignature);
        }

        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = self.leeway;
        validation.validate_exp = validate_exp;
        validation.validate_nbf = true;

        decode::<Claims>(
            token,
            &DecodingKey::from_secret(self.secret.as_bytes()),
            &validation,
        )
        .map(|data| data.claims)
        .map_err(|e| {
            let mapped = match e.kind() {
                ErrorKind::ExpiredSignature => AuthError::TokenExpired,
                ErrorKind::InvalidSignature => AuthError::TokenInvalidSignature,
                _ => AuthError::TokenMalformed,
            };
            debug!(error = %e, outcome = %mapped, "Access token rejected");
            mapped
        })
    }

    /// Persist a new refresh token for `user_id` and return its value
    pub async fn create_refresh_token(&self, user_id: &str) -> Result<String, AuthError> {
        let record = OpaqueToken {
            id: generate_token_id(),
            user_id: user_id.to_string(),
            token: generate_opaque_token(),
            expires_at: (Utc::now() + self.refresh_token_ttl).timestamp(),
        };

        self.db.create_opaque_token(&record).await.map_err(|e| {
            error!(error = %e, user_id = %user_id, "Failed to persist refresh token");
            AuthError::from(e)
        })?;

        debug!(user_id = %user_id, token_id = %record.id, "Refresh token created");
        Ok(record.token)
    }

    /// Returns the owning user id. An expired record is deleted on sight.
    pub async fn verify_refresh_token(&self, token: &str) -> Result<String, AuthError> {
        let record = self
            .db
            .get_opaque_token(token)
            .await?
            .ok_or_else(|| {
                debug!(token = %safe_token_log(token), "Refresh token not found");
                AuthError::NotFound("refresh token".to_string())
            })?;

        if Utc::now().timestamp() > record.expires_at {
            info!(user_id = %record.user_id, token_id = %record.id, "Refresh token expired, deleting");
            self.db.delete_opaque_token(&record.id).await?;
            return Err(AuthError::TokenExpired);
        }

        Ok(record.user_id)
    }

    /// Verify and delete the refresh token in one step, returning the owning
    /// user id. Only one caller can consume a given token.
    pub async fn consume_refresh_token(&self, token: &str) -> Result<String, AuthError> {
        let record = self
            .db
            .take_opaque_token(token)
            .await?
            .ok_or_else(|| {
                debug!(token = %safe_token_log(token), "Refresh token not found or already consumed");
                AuthError::NotFound("refresh token".to_string())
            })?;

        if Utc::now().timestamp() > record.expires_at {
            info!(user_id = %record.user_id, token_id = %record.id, "Consumed refresh token was expired");
            return Err(AuthError::TokenExpired);
        }

        debug!(user_id = %record.user_id, token_id = %record.id, "Refresh token consumed");
        Ok(record.user_id)
    }

    /// Delete the refresh token if it exists. Absence is not an error.
    pub async fn invalidate_refresh_token(&self, token: &str) -> Result<(), AuthError> {
        match self.db.get_opaque_token(token).await? {
            Some(record) => {
                let deleted = self.db.delete_opaque_token(&record.id).await?;
                debug!(user_id = %record.user_id, token_id = %record.id, deleted, "Refresh token invalidated");
            }
            None => {
                warn!(token = %safe_token_log(token), "Invalidate requested for unknown refresh token");
            }
        }
        Ok(())
    }
}
