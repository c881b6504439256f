//! Storage capability used by the auth core, and its SQLite implementation

use async_trait::async_trait;
use sqlx::SqlitePool;
use thiserror::Error;
use tracing::{debug, error};

use super::models::{FederatedIdentity, OpaqueToken, User, VerificationCode};

#[derive(Debug, Error)]
pub enum StoreError {
    /// A uniqueness constraint rejected the write
    #[error("Record already exists: {0}")]
    Conflict(String),

    #[error("Database error: {0}")]
    Database(sqlx::Error),
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::Database(db_err) if db_err.is_unique_violation() => {
                StoreError::Conflict(db_err.message().to_string())
            }
            _ => StoreError::Database(err),
        }
    }
}

/// CRUD for users, identities, refresh tokens and verification codes.
///
/// Lookups return `Ok(None)` when the record does not exist.
#[async_trait]
pub trait Database: Send + Sync {
    async fn get_user_by_id(&self, id: &str) -> Result<Option<User>, StoreError>;

    /// User linked to the identity `(provider, subject_id)`
    async fn get_user_through_federated_identity(
        &self,
        provider: &str,
        subject_id: &str,
    ) -> Result<Option<User>, StoreError>;

    /// Inserts the user and its identity link as one unit of work.
    /// Either both rows are committed or neither is.
    async fn register_user(
        &self,
        user: &User,
        identity: &FederatedIdentity,
    ) -> Result<User, StoreError>;

    async fn get_federated_identity_by_user(
        &self,
        user_id: &str,
    ) -> Result<Option<FederatedIdentity>, StoreError>;

    async fn create_opaque_token(&self, token: &OpaqueToken) -> Result<(), StoreError>;

    async fn get_opaque_token(&self, value: &str) -> Result<Option<OpaqueToken>, StoreError>;

    /// Returns whether a row was deleted
    async fn delete_opaque_token(&self, id: &str) -> Result<bool, StoreError>;

    /// Deletes the token with value `value` and returns it. Of two concurrent
    /// callers at most one receives the row.
    async fn take_opaque_token(&self, value: &str) -> Result<Option<OpaqueToken>, StoreError>;

    /// Fails with `StoreError::Conflict` when the email already has a code
    async fn create_verification_code(&self, code: &VerificationCode) -> Result<(), StoreError>;

    async fn get_verification_code(
        &self,
        email: &str,
    ) -> Result<Option<VerificationCode>, StoreError>;

    /// Deletes the row matching exactly `(email, code)` and returns it
    async fn delete_verification_code(
        &self,
        email: &str,
        code: &str,
    ) -> Result<Option<VerificationCode>, StoreError>;
}

#[derive(Debug, Clone)]
pub struct SqliteDatabase {
    db: SqlitePool,
}

impl SqliteDatabase {
    pub fn new(db: SqlitePool) -> Self {
        Self { db }
    }
}

#[async_trait]
impl Database for SqliteDatabase {
    async fn get_user_by_id(&self, id: &str) -> Result<Option<User>, StoreError> {
        let user = sqlx::query_as::<_, User>(
            "SELECT id, username, email, picture FROM users WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.db)
        .await?;

        Ok(user)
    }

    async fn get_user_through_federated_identity(
        &self,
        provider: &str,
        subject_id: &str,
    ) -> Result<Option<User>, StoreError> {
        let user = sqlx::query_as::<_, User>(
            r#"
            SELECT u.id, u.username, u.email, u.picture
            FROM users u
            JOIN federated_identities fi ON fi.user_id = u.id
            WHERE fi.provider = ? AND fi.id = ?
            "#,
        )
        .bind(provider)
        .bind(subject_id)
        .fetch_optional(&self.db)
        .await?;

        Ok(user)
    }

    async fn register_user(
        &self,
        user: &User,
        identity: &FederatedIdentity,
    ) -> Result<User, StoreError> {
        let mut tx = self.db.begin().await?;

        sqlx::query("INSERT INTO users (id, username, email, picture) VALUES (?, ?, ?, ?)")
            .bind(&user.id)
            .bind(&user.username)
            .bind(&user.email)
            .bind(&user.picture)
            .execute(&mut *tx)
            .await
            .map_err(|e| {
                debug!(error = %e, user_id = %user.id, "Inserting user failed, rolling back");
                StoreError::from(e)
            })?;

        sqlx::query(
            "INSERT INTO federated_identities (id, user_id, provider, data) VALUES (?, ?, ?, ?)",
        )
        .bind(&identity.id)
        .bind(&user.id)
        .bind(&identity.provider)
        .bind(&identity.data)
        .execute(&mut *tx)
        .await
        .map_err(|e| {
            debug!(
                error = %e,
                user_id = %user.id,
                provider = %identity.provider,
                "Inserting federated identity failed, rolling back"
            );
            StoreError::from(e)
        })?;

        tx.commit().await.map_err(|e| {
            error!(error = %e, user_id = %user.id, "Committing user registration failed");
            StoreError::from(e)
        })?;

        Ok(user.clone())
    }

    async fn get_federated_identity_by_user(
        &self,
        user_id: &str,
    ) -> Result<Option<FederatedIdentity>, StoreError> {
        let identity = sqlx::query_as::<_, FederatedIdentity>(
            r#"
            SELECT id, user_id, provider, data
            FROM federated_identities
            WHERE user_id = ?
            ORDER BY created_at ASC
            LIMIT 1
            "#,
        )
        .bind(user_id)
        .fetch_optional(&self.db)
        .await?;

        Ok(identity)
    }

    async fn create_opaque_token(&self, token: &OpaqueToken) -> Result<(), StoreError> {
        sqlx::query("INSERT INTO opaque_tokens (id, user_id, token, expires_at) VALUES (?, ?, ?, ?)")
            .bind(&token.id)
            .bind(&token.user_id)
            .bind(&token.token)
            .bind(token.expires_at)
            .execute(&self.db)
            .await?;

        Ok(())
    }

    async fn get_opaque_token(&self, value: &str) -> Result<Option<OpaqueToken>, StoreError> {
        let token = sqlx::query_as::<_, OpaqueToken>(
            "SELECT id, user_id, token, expires_at FROM opaque_tokens WHERE token = ?",
        )
        .bind(value)
        .fetch_optional(&self.db)
        .await?;

        Ok(token)
    }

    async fn delete_opaque_token(&self, id: &str) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM opaque_tokens WHERE id = ?")
            .bind(id)
            .execute(&self.db)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn take_opaque_token(&self, value: &str) -> Result<Option<OpaqueToken>, StoreError> {
        let token = sqlx::query_as::<_, OpaqueToken>(
            r#"
            DELETE FROM opaque_tokens
            WHERE token = ?
            RETURNING id, user_id, token, expires_at
            "#,
        )
        .bind(value)
        .fetch_optional(&self.db)
        .await?;

        Ok(token)
    }

    async fn create_verification_code(&self, code: &VerificationCode) -> Result<(), StoreError> {
        sqlx::query("INSERT INTO verification_codes (email, code, expires_at) VALUES (?, ?, ?)")
            .bind(&code.email)
            .bind(&code.code)
            .bind(code.expires_at)
            .execute(&self.db)
            .await?;

        Ok(())
    }

    async fn get_verification_code(
        &self,
        email: &str,
    ) -> Result<Option<VerificationCode>, StoreError> {
        let code = sqlx::query_as::<_, VerificationCode>(
            "SELECT email, code, expires_at FROM verification_codes WHERE email = ?",
        )
        .bind(email)
        .fetch_optional(&self.db)
        .await?;

        Ok(code)
    }

    async fn delete_verification_code(
        &self,
        email: &str,
        code: &str,
    ) -> Result<Option<VerificationCode>, StoreError> {
        let deleted = sqlx::query_as::<_, VerificationCode>(
            r#"
            DELETE FROM verification_codes
            WHERE email = ? AND code = ?
            RETURNING email, code, expires_at
            "#,
        )
        .bind(email)
        .bind(code)
        .fetch_optional(&self.db)
        .await?;

        Ok(deleted)
    }
}
