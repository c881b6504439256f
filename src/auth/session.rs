//! Login, renewal and logout flows built on the token, code and identity components

use tracing::{debug, info, warn};

use super::codes::VerificationCodeManager;
use super::errors::AuthError;
use super::identity::IdentityResolver;
use super::models::{AuthTokens, BeginOutcome, HandshakeContext, Introspection, User};
use super::tokens::TokenService;
use crate::services::oauth::ProviderRegistry;

pub struct SessionOrchestrator {
    tokens: TokenService,
    codes: VerificationCodeManager,
    identities: IdentityResolver,
    providers: ProviderRegistry,
}

impl SessionOrchestrator {
    pub fn new(
        tokens: TokenService,
        codes: VerificationCodeManager,
        identities: IdentityResolver,
        providers: ProviderRegistry,
    ) -> Self {
        Self {
            tokens,
            codes,
            identities,
            providers,
        }
    }

    /// Start a federated login, unless the caller already holds a valid
    /// access token from an earlier login.
    ///
    /// No provider round trip happens here; callback parameters on the begin
    /// URL are ignored.
    pub async fn begin_federated(
        &self,
        provider_name: &str,
        ctx: &HandshakeContext,
        access_token: Option<&str>,
    ) -> Result<BeginOutcome, AuthError> {
        let provider = self
            .providers
            .get(provider_name)
            .ok_or_else(|| AuthError::UnknownProvider(provider_name.to_string()))?;

        if let Some(claims) = access_token.and_then(|t| self.tokens.verify_access_token(t).ok()) {
            debug!(user_id = %claims.user_id, provider = %provider_name, "Already authenticated, nothing to begin");
            return Ok(BeginOutcome::AlreadyAuthenticated);
        }

        let url = provider
            .begin_handshake(ctx)
            .await
            .map_err(|e| AuthError::CantCompleteAuth(e.to_string()))?;

        Ok(BeginOutcome::Redirect(url))
    }

    pub async fn complete_federated(
        &self,
        provider_name: &str,
        ctx: &HandshakeContext,
    ) -> Result<AuthTokens, AuthError> {
        self.identities.provider(provider_name)?;
        let provider = self
            .providers
            .get(provider_name)
            .ok_or_else(|| AuthError::UnknownProvider(provider_name.to_string()))?;

        let profile = provider.complete_handshake(ctx).await.map_err(|e| {
            warn!(provider = %provider_name, error = %e, "Federated handshake failed");
            AuthError::CantCompleteAuth(e.to_string())
        })?;

        let user = self
            .identities
            .resolve_federated(provider_name, &profile)
            .await?;

        info!(user_id = %user.id, provider = %provider_name, "Federated login completed");
        self.mint_tokens(&user).await
    }

    pub async fn begin_local(&self, email: &str) -> Result<(), AuthError> {
        self.codes.issue(email).await
    }

    pub async fn complete_local(&self, code: &str, email: &str) -> Result<AuthTokens, AuthError> {
        self.codes.redeem(email, code).await?;
        let user = self.identities.resolve_local(email).await?;

        info!(user_id = %user.id, "Local login completed");
        self.mint_tokens(&user).await
    }

    /// Exchange an expired access token for a new pair.
    ///
    /// Only an expired token is accepted; a still-valid one is refused with
    /// `TokenNotExpired` and every other verification failure is returned as is.
    pub async fn renew(&self, access_token: &str) -> Result<AuthTokens, AuthError> {
        match self.tokens.verify_access_token(access_token) {
            Err(AuthError::TokenExpired) => {}
            Ok(claims) => {
                debug!(user_id = %claims.user_id, "Renewal refused, access token still valid");
                return Err(AuthError::TokenNotExpired);
            }
            Err(e) => return Err(e),
        }

        let claims = self.tokens.decode_expired(access_token)?;
        let user = self.identities.get_user(&claims.user_id).await?;

        info!(user_id = %user.id, "Access token renewed");
        self.mint_tokens(&user).await
    }

    /// Rotate a refresh token: the presented one is consumed
    pub async fn refresh(&self, refresh_token: &str) -> Result<AuthTokens, AuthError> {
        self.tokens.verify_refresh_token(refresh_token).await?;
        let user_id = self.tokens.consume_refresh_token(refresh_token).await?;
        let user = self.identities.get_user(&user_id).await?;

        debug!(user_id = %user.id, "Refresh token rotated");
        self.mint_tokens(&user).await
    }

    pub async fn logout(&self, refresh_token: Option<&str>) -> Result<(), AuthError> {
        if let Some(token) = refresh_token {
            self.tokens.invalidate_refresh_token(token).await?;
        }
        Ok(())
    }

    pub async fn introspect(&self, access_token: &str) -> Result<Introspection, AuthError> {
        let claims = self.tokens.verify_access_token(access_token)?;
        let user = self.identities.get_user(&claims.user_id).await?;
        let federated_identity = self.identities.federated_identity_for(&user.id).await?;

        Ok(Introspection {
            user,
            claims,
            federated_identity,
        })
    }

    async fn mint_tokens(&self, user: &User) -> Result<AuthTokens, AuthError> {
        let access_token = self.tokens.create_access_token(user)?;
        let refresh_token = self.tokens.create_refresh_token(&user.id).await?;

        Ok(AuthTokens {
            access_token,
            refresh_token,
        })
    }
}
