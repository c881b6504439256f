//! Maps federated profiles and verified emails to local users

use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::errors::AuthError;
use super::models::{FederatedIdentity, FederatedProfile, Provider, User};
use super::repository::{Database, StoreError};
use crate::common::{email_local_part, safe_email_log};

pub struct IdentityResolver {
    db: Arc<dyn Database>,
    providers: HashSet<String>,
}

impl IdentityResolver {
    /// `providers` are the configured federated provider names
    pub fn new(db: Arc<dyn Database>, providers: impl IntoIterator<Item = String>) -> Self {
        Self {
            db,
            providers: providers.into_iter().collect(),
        }
    }

    /// Resolve a configured federated provider name
    pub fn provider(&self, name: &str) -> Result<Provider, AuthError> {
        if self.providers.contains(name) {
            Ok(Provider::Federated(name.to_string()))
        } else {
            Err(AuthError::UnknownProvider(name.to_string()))
        }
    }

    pub async fn resolve_federated(
        &self,
        provider_name: &str,
        profile: &FederatedProfile,
    ) -> Result<User, AuthError> {
        let provider = self.provider(provider_name)?;

        if let Some(user) = self
            .db
            .get_user_through_federated_identity(provider.as_str(), &profile.subject_id)
            .await?
        {
            debug!(user_id = %user.id, provider = %provider, "Existing user found for federated identity");
            return Ok(user);
        }

        let draft = User {
            id: profile.subject_id.clone(),
            username: profile.display_name.clone(),
            email: profile.email.clone(),
            picture: profile.avatar_url.clone(),
        };

        self.register_user(draft, &provider, &profile.subject_id, &profile.raw)
            .await
    }

    pub async fn resolve_local(&self, email: &str) -> Result<User, AuthError> {
        let provider = Provider::Local;

        if let Some(user) = self
            .db
            .get_user_through_federated_identity(provider.as_str(), email)
            .await?
        {
            debug!(user_id = %user.id, "Existing local user found");
            return Ok(user);
        }

        let draft = User {
            id: email.to_string(),
            username: email_local_part(email).to_string(),
            email: email.to_string(),
            picture: local_avatar_url(email),
        };
        let raw = serde_json::json!({ "email": email });

        self.register_user(draft, &provider, email, &raw).await
    }

    /// Persist the draft user and its identity link in one unit of work.
    ///
    /// On a uniqueness conflict a concurrent first login already created the
    /// pair, so the existing user is returned.
    async fn register_user(
        &self,
        draft: User,
        provider: &Provider,
        subject_id: &str,
        raw: &serde_json::Value,
    ) -> Result<User, AuthError> {
        let identity = FederatedIdentity {
            id: subject_id.to_string(),
            user_id: draft.id.clone(),
            provider: provider.as_str().to_string(),
            data: raw.to_string(),
        };

        match self.db.register_user(&draft, &identity).await {
            Ok(user) => {
                info!(
                    user_id = %user.id,
                    email = %safe_email_log(&user.email),
                    provider = %provider,
                    "New user registered"
                );
                Ok(user)
            }
            Err(StoreError::Conflict(reason)) => {
                let existing = self
                    .db
                    .get_user_through_federated_identity(provider.as_str(), subject_id)
                    .await?;
                match existing {
                    Some(user) => {
                        debug!(user_id = %user.id, provider = %provider, "Lost first-login race, using existing user");
                        Ok(user)
                    }
                    None => {
                        warn!(
                            user_id = %draft.id,
                            provider = %provider,
                            reason = %reason,
                            "User id already taken by a different identity"
                        );
                        Err(StoreError::Conflict(reason).into())
                    }
                }
            }
            Err(e) => Err(e.into()),
        }
    }

    pub async fn get_user(&self, user_id: &str) -> Result<User, AuthError> {
        self.db
            .get_user_by_id(user_id)
            .await?
            .ok_or_else(|| AuthError::NotFound("user".to_string()))
    }

    pub async fn federated_identity_for(
        &self,
        user_id: &str,
    ) -> Result<Option<FederatedIdentity>, AuthError> {
        Ok(self.db.get_federated_identity_by_user(user_id).await?)
    }
}

/// Deterministic generated avatar for users without a provider picture
pub fn local_avatar_url(email: &str) -> String {
    format!(
        "https://vercel.com/api/www/avatar/?u={}&s=80",
        urlencoding::encode(email)
    )
}
