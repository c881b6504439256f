// src/services/email.rs
use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_sesv2::config::Region;
use aws_sdk_sesv2::Client as SesClient;
use std::env;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::common::safe_email_log;

pub const VERIFICATION_SUBJECT: &str = "Your verification code";

#[derive(Debug, Error)]
pub enum EmailError {
    #[error("Email sender not configured")]
    NotConfigured,

    #[error("SES operation failed: {0}")]
    SESError(String),
}

/// Outbound delivery of verification codes
#[async_trait]
pub trait EmailService: Send + Sync {
    async fn send_code(&self, email: &str, code: &str) -> Result<(), EmailError>;
}

/// Sends codes through AWS SES v2
pub struct SesEmailService {
    client: SesClient,
    from_email: String,
}

impl SesEmailService {
    /// Credentials come from the default AWS provider chain
    pub async fn new(from_email: String, region: String) -> Self {
        let aws_config = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(region))
            .load()
            .await;

        Self {
            client: SesClient::new(&aws_config),
            from_email,
        }
    }
}

#[async_trait]
impl EmailService for SesEmailService {
    async fn send_code(&self, email: &str, code: &str) -> Result<(), EmailError> {
        use aws_sdk_sesv2::types::{Body as SesBody, Content, Destination, EmailContent, Message};

        if self.from_email.is_empty() {
            return Err(EmailError::NotConfigured);
        }

        let destination = Destination::builder()
            .to_addresses(email.to_string())
            .build();

        let subject_content = Content::builder()
            .data(VERIFICATION_SUBJECT)
            .charset("UTF-8")
            .build()
            .map_err(|e| EmailError::SESError(format!("Failed to build subject: {}", e)))?;

        let body_content = Content::builder()
            .data(generate_verification_email(code))
            .charset("UTF-8")
            .build()
            .map_err(|e| EmailError::SESError(format!("Failed to build body: {}", e)))?;

        let message = Message::builder()
            .subject(subject_content)
            .body(SesBody::builder().html(body_content).build())
            .build();

        let result = self
            .client
            .send_email()
            .from_email_address(&self.from_email)
            .destination(destination)
            .content(EmailContent::builder().simple(message).build())
            .send()
            .await
            .map_err(|e| {
                error!(error = %e, to = %safe_email_log(email), "Failed to send email via SES");
                EmailError::SESError(format!("Send failed: {}", e))
            })?;

        info!(
            to = %safe_email_log(email),
            message_id = ?result.message_id(),
            "Verification email sent via SES"
        );

        Ok(())
    }
}

/// Writes codes to the log. Used when no sender address is configured.
pub struct LogEmailService;

#[async_trait]
impl EmailService for LogEmailService {
    async fn send_code(&self, email: &str, code: &str) -> Result<(), EmailError> {
        warn!(
            to = %safe_email_log(email),
            "AWS_SES_FROM_EMAIL not set; verification code not emailed"
        );
        debug!(to = %safe_email_log(email), code = %code, "Undelivered verification code");
        Ok(())
    }
}

/// Pick the delivery backend from `AWS_SES_FROM_EMAIL` / `AWS_SES_REGION`
pub async fn email_service_from_env() -> Arc<dyn EmailService> {
    match env::var("AWS_SES_FROM_EMAIL") {
        Ok(from) if !from.trim().is_empty() => {
            let region = env::var("AWS_SES_REGION").unwrap_or_else(|_| "us-east-1".to_string());
            info!(region = %region, "Verification emails will be sent via SES");
            Arc::new(SesEmailService::new(from, region).await)
        }
        _ => Arc::new(LogEmailService),
    }
}

pub fn generate_verification_email(code: &str) -> String {
    format!(
        r#"<!DOCTYPE html>
<html>
<head>
    <meta charset="UTF-8">
    <style>
        body {{ font-family: Arial, sans-serif; line-height: 1.6; color: #333; }}
        .container {{ max-width: 600px; margin: 0 auto; padding: 20px; }}
        .header {{ background-color: #4F46E5; color: white; padding: 20px; text-align: center; }}
        .content {{ padding: 20px; background-color: #f9f9f9; }}
        .code {{ font-size: 32px; font-weight: bold; letter-spacing: 8px; text-align: center; padding: 15px; background-color: #EEF2FF; border-radius: 8px; margin: 15px 0; }}
        .footer {{ padding: 20px; text-align: center; font-size: 12px; color: #666; }}
    </style>
</head>
<body>
    <div class="container">
        <div class="header">
            <h1>Verify your email</h1>
        </div>
        <div class="content">
            <p>Please enter the following code to verify your email address:</p>

            <div class="code">{}</div>

            <p>If you didn't request this code, you can safely ignore this email.</p>
        </div>
        <div class="footer">
            <p>This is an automated message. Please do not reply directly to this email.</p>
        </div>
    </div>
</body>
</html>"#,
        code
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verification_email_contains_code() {
        let html = generate_verification_email("482913");
        assert!(html.contains("482913"));
        assert!(html.contains("Please enter the following code to verify your email address"));
    }

    #[derive(Clone, Default)]
    struct CapturedLogs(Arc<std::sync::Mutex<Vec<u8>>>);

    impl std::io::Write for CapturedLogs {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl<'a> tracing_subscriber::fmt::MakeWriter<'a> for CapturedLogs {
        type Writer = CapturedLogs;

        fn make_writer(&'a self) -> Self::Writer {
            self.clone()
        }
    }

    #[tokio::test]
    async fn test_log_email_service_keeps_code_out_of_warn_logs() {
        let logs = CapturedLogs::default();
        let subscriber = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::WARN)
            .with_writer(logs.clone())
            .finish();
        let _guard = tracing::subscriber::set_default(subscriber);

        let service = LogEmailService;
        assert!(service.send_code("a@b.com", "482913").await.is_ok());

        let output = String::from_utf8(logs.0.lock().unwrap().clone()).unwrap();
        assert!(output.contains("verification code not emailed"));
        assert!(!output.contains("482913"));
    }
}
