//! Email provider (spec §4.11): SMTP transport via `lettre`, composing both
//! plain-text and HTML bodies, priority derived from severity, and
//! `X-Notification-Id` / `X-Alert-Id` / `X-Severity` / `X-Channel` headers.

use lettre::message::header::{ContentType, HeaderName, HeaderValue};
use lettre::message::{Mailbox, MultiPart, SinglePart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};

use crate::config::SmtpConfig;
use crate::error::{AppError, AppResult};
use crate::messages::{NotificationChannel, NotificationMessage, NotificationSeverity, SendOutcome};
use crate::notify::providers::ChannelProvider;

const X_PRIORITY_HIGH: &str = "1";
const X_PRIORITY_NORMAL: &str = "3";
const X_PRIORITY_LOW: &str = "5";

pub struct EmailProvider {
    config: SmtpConfig,
    transport: Option<AsyncSmtpTransport<Tokio1Executor>>,
}

impl EmailProvider {
    pub fn new(config: SmtpConfig) -> Self {
        Self {
            config,
            transport: None,
        }
    }

    fn priority_header(severity: NotificationSeverity) -> &'static str {
        match severity {
            NotificationSeverity::Critical | NotificationSeverity::Error => X_PRIORITY_HIGH,
            NotificationSeverity::Warning => X_PRIORITY_NORMAL,
            NotificationSeverity::Info => X_PRIORITY_LOW,
        }
    }

    fn severity_label(severity: NotificationSeverity) -> &'static str {
        match severity {
            NotificationSeverity::Info => "info",
            NotificationSeverity::Warning => "warning",
            NotificationSeverity::Error => "error",
            NotificationSeverity::Critical => "critical",
        }
    }

    fn build_transport(&self) -> AppResult<AsyncSmtpTransport<Tokio1Executor>> {
        let host = self
            .config
            .host
            .as_deref()
            .ok_or_else(|| AppError::Config("SMTP_HOST is not configured".to_string()))?;

        let mut builder = AsyncSmtpTransport::<Tokio1Executor>::relay(host)
            .map_err(|e| AppError::Config(format!("invalid SMTP host {host}: {e}")))?
            .port(self.config.port)
            .timeout(Some(std::time::Duration::from_secs(10)));

        if let (Some(username), Some(password)) = (&self.config.username, &self.config.password) {
            builder = builder.credentials(Credentials::new(username.clone(), password.clone()));
        }

        Ok(builder.build())
    }
}

#[async_trait::async_trait]
impl ChannelProvider for EmailProvider {
    fn channel(&self) -> NotificationChannel {
        NotificationChannel::Email
    }

    async fn initialize(&self) -> AppResult<()> {
        self.build_transport()?;
        Ok(())
    }

    /// Checks host/port/credentials/from are present; does not open a
    /// connection (spec §4.11 leaves the server ping optional).
    async fn validate_config(&self) -> AppResult<()> {
        if self.config.host.is_none() {
            return Err(AppError::Validation("SMTP_HOST is required".to_string()));
        }
        if self.config.from_address.is_empty() {
            return Err(AppError::Validation("SMTP_FROM_ADDRESS is required".to_string()));
        }
        self.build_transport()?;
        Ok(())
    }

    async fn send(&self, message: &NotificationMessage) -> AppResult<SendOutcome> {
        let transport = self.build_transport()?;

        let from: Mailbox = self
            .config
            .from_address
            .parse()
            .map_err(|e| AppError::Config(format!("invalid SMTP_FROM_ADDRESS: {e}")))?;

        let mut builder = Message::builder().from(from);
        for recipient in &message.recipients {
            let to: Mailbox = recipient
                .parse()
                .map_err(|e| AppError::Validation(format!("invalid recipient {recipient}: {e}")))?;
            builder = builder.to(to);
        }

        builder = builder
            .subject(&message.title)
            .header(
                HeaderName::new_from_ascii("X-Notification-Id".to_string()).unwrap(),
                HeaderValue::new(
                    HeaderName::new_from_ascii("X-Notification-Id".to_string()).unwrap(),
                    message.id.clone(),
                ),
            )
            .header(
                HeaderName::new_from_ascii("X-Severity".to_string()).unwrap(),
                HeaderValue::new(
                    HeaderName::new_from_ascii("X-Severity".to_string()).unwrap(),
                    Self::severity_label(message.severity).to_string(),
                ),
            )
            .header(
                HeaderName::new_from_ascii("X-Channel".to_string()).unwrap(),
                HeaderValue::new(
                    HeaderName::new_from_ascii("X-Channel".to_string()).unwrap(),
                    "email".to_string(),
                ),
            )
            .header(
                HeaderName::new_from_ascii("X-Priority".to_string()).unwrap(),
                HeaderValue::new(
                    HeaderName::new_from_ascii("X-Priority".to_string()).unwrap(),
                    Self::priority_header(message.severity).to_string(),
                ),
            );

        if let Some(alert_id) = &message.alert_id {
            builder = builder.header(
                HeaderName::new_from_ascii("X-Alert-Id".to_string()).unwrap(),
                HeaderValue::new(
                    HeaderName::new_from_ascii("X-Alert-Id".to_string()).unwrap(),
                    alert_id.clone(),
                ),
            );
        }

        let html_body = format!(
            "<html><body><h2>{}</h2><p>{}</p></body></html>",
            message.title, message.content
        );

        let email = builder
            .multipart(
                MultiPart::alternative()
                    .singlepart(
                        SinglePart::builder()
                            .header(ContentType::TEXT_PLAIN)
                            .body(message.content.clone()),
                    )
                    .singlepart(
                        SinglePart::builder()
                            .header(ContentType::TEXT_HTML)
                            .body(html_body),
                    ),
            )
            .map_err(|e| AppError::Protocol(format!("failed to build email: {e}")))?;

        match transport.send(email).await {
            Ok(response) => Ok(SendOutcome {
                success: true,
                message_id: Some(message.id.clone()),
                sent_at: chrono::Utc::now(),
                error: None,
                response: Some(format!("{:?}", response.code())),
            }),
            Err(e) => Ok(SendOutcome {
                success: false,
                message_id: None,
                sent_at: chrono::Utc::now(),
                error: Some(e.to_string()),
                response: None,
            }),
        }
    }

    async fn cleanup(&self) -> AppResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn blank_config() -> SmtpConfig {
        SmtpConfig {
            host: None,
            port: 587,
            username: None,
            password: None,
            from_address: "scheduler@drones.local".to_string(),
        }
    }

    #[test]
    fn priority_escalates_with_severity() {
        assert_eq!(
            EmailProvider::priority_header(NotificationSeverity::Critical),
            X_PRIORITY_HIGH
        );
        assert_eq!(
            EmailProvider::priority_header(NotificationSeverity::Warning),
            X_PRIORITY_NORMAL
        );
        assert_eq!(
            EmailProvider::priority_header(NotificationSeverity::Info),
            X_PRIORITY_LOW
        );
    }

    #[tokio::test]
    async fn validate_config_requires_host() {
        let provider = EmailProvider::new(blank_config());
        let result = provider.validate_config().await;
        assert!(result.is_err());
    }
}
