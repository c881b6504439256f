//! Emailed one-time codes for passwordless login
//!
//! One live code per email. Issuing a new code replaces any previous one;
//! redeeming deletes the exact `(email, code)` pair in a single statement.

use chrono::{Duration, Utc};
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::errors::AuthError;
use super::models::VerificationCode;
use super::repository::{Database, StoreError};
use crate::common::{generate_numeric_code, safe_email_log, AuthConfig};
use crate::services::email::EmailService;

/// Base delay between replace-on-collision attempts, multiplied by the attempt number
const ISSUE_BACKOFF_MS: u64 = 25;

pub struct VerificationCodeManager {
    db: Arc<dyn Database>,
    email: Arc<dyn EmailService>,
    code_length: usize,
    code_ttl: Duration,
    max_attempts: u32,
}

impl VerificationCodeManager {
    pub fn new(db: Arc<dyn Database>, email: Arc<dyn EmailService>, config: &AuthConfig) -> Self {
        Self {
            db,
            email,
            code_length: config.verification_code_length,
            code_ttl: config.verification_code_ttl,
            max_attempts: config.verification_code_issue_attempts.max(1),
        }
    }

    /// Generate and store a fresh code for `email`, then deliver it.
    ///
    /// Delivery failures are logged; the stored code stays redeemable.
    pub async fn issue(&self, email: &str) -> Result<(), AuthError> {
        let record = VerificationCode {
            email: email.to_string(),
            code: generate_numeric_code(self.code_length),
            expires_at: (Utc::now() + self.code_ttl).timestamp(),
        };

        let mut attempt = 0u32;
        loop {
            attempt += 1;
            match self.db.create_verification_code(&record).await {
                Ok(()) => break,
                Err(StoreError::Conflict(reason)) if attempt < self.max_attempts => {
                    debug!(
                        email = %safe_email_log(email),
                        attempt,
                        reason = %reason,
                        "Verification code already exists, replacing"
                    );
                    if let Some(existing) = self.db.get_verification_code(email).await? {
                        self.db
                            .delete_verification_code(&existing.email, &existing.code)
                            .await?;
                    }
                    tokio::time::sleep(std::time::Duration::from_millis(
                        ISSUE_BACKOFF_MS * u64::from(attempt),
                    ))
                    .await;
                }
                Err(e) => {
                    warn!(
                        error = %e,
                        email = %safe_email_log(email),
                        attempt,
                        "Failed to store verification code"
                    );
                    return Err(e.into());
                }
            }
        }

        info!(email = %safe_email_log(email), "Verification code issued");

        if let Err(e) = self.email.send_code(email, &record.code).await {
            warn!(
                error = %e,
                email = %safe_email_log(email),
                "Verification code stored but delivery failed"
            );
        }

        Ok(())
    }

    /// Consume the code. Fails with `InvalidCode` when it doesn't match or has expired.
    pub async fn redeem(&self, email: &str, code: &str) -> Result<(), AuthError> {
        let deleted = self.db.delete_verification_code(email, code).await?;

        match deleted {
            Some(record) if record.expires_at >= Utc::now().timestamp() => {
                debug!(email = %safe_email_log(email), "Verification code redeemed");
                Ok(())
            }
            Some(_) => {
                info!(email = %safe_email_log(email), "Expired verification code presented");
                Err(AuthError::InvalidCode)
            }
            None => {
                debug!(email = %safe_email_log(email), "No matching verification code");
                Err(AuthError::InvalidCode)
            }
        }
    }
}
