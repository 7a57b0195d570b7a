//! Mail Transport - One SMTP session per message
//!
//! Every call connects, upgrades to TLS, authenticates, submits and closes.
//! Failures are reported in the outcome, never as errors.

use async_trait::async_trait;
use bulkmail_common::config::MailConfig;
use bulkmail_storage::models::SmtpAccount;
use lettre::{
    message::{header::ContentType, Mailbox, MultiPart, SinglePart},
    transport::smtp::authentication::Credentials,
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
};
use std::time::Duration;
use tracing::{debug, warn};

/// Port on which the relay expects implicit TLS instead of STARTTLS
const IMPLICIT_TLS_PORT: u16 = 465;

/// Connection and identity used to submit mail
#[derive(Debug, Clone)]
pub struct SmtpCredentials {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    /// Display name for the From header
    pub from_name: Option<String>,
}

impl SmtpCredentials {
    /// Name shown as `{{sender_name}}`, falling back to the address
    pub fn sender_name(&self) -> &str {
        self.from_name.as_deref().unwrap_or(&self.username)
    }
}

impl From<&SmtpAccount> for SmtpCredentials {
    fn from(account: &SmtpAccount) -> Self {
        Self {
            host: account.smtp_server.clone(),
            port: u16::try_from(account.smtp_port).unwrap_or(587),
            username: account.email.clone(),
            password: account.password.clone(),
            from_name: account.from_name.clone(),
        }
    }
}

impl From<&MailConfig> for SmtpCredentials {
    fn from(config: &MailConfig) -> Self {
        Self {
            host: config.smtp_server.clone(),
            port: config.smtp_port,
            username: config.email.clone(),
            password: config.password.clone(),
            from_name: config.from_name.clone(),
        }
    }
}

/// A rendered message ready for submission
#[derive(Debug, Clone, PartialEq)]
pub struct OutgoingEmail {
    pub to: String,
    pub subject: String,
    pub text_body: String,
    pub html_body: Option<String>,
}

/// Result of one transport call
#[derive(Debug, Clone, PartialEq)]
pub struct SendOutcome {
    pub ok: bool,
    pub detail: String,
}

impl SendOutcome {
    pub fn success(detail: impl Into<String>) -> Self {
        Self {
            ok: true,
            detail: detail.into(),
        }
    }

    pub fn failure(detail: impl Into<String>) -> Self {
        Self {
            ok: false,
            detail: detail.into(),
        }
    }
}

/// Outbound mail transport
#[async_trait]
pub trait MailTransport: Send + Sync {
    /// Submit one message in its own session
    async fn send(&self, credentials: &SmtpCredentials, email: &OutgoingEmail) -> SendOutcome;

    /// Connect, negotiate TLS and authenticate without sending
    async fn verify(&self, credentials: &SmtpCredentials) -> SendOutcome;
}

/// SMTP transport backed by lettre
#[derive(Debug, Clone)]
pub struct LettreTransport {
    timeout: Duration,
}

impl LettreTransport {
    /// Create a new transport with a per-session timeout
    pub fn new(timeout_secs: u64) -> Self {
        Self {
            timeout: Duration::from_secs(timeout_secs),
        }
    }

    fn mailer(
        &self,
        credentials: &SmtpCredentials,
    ) -> Result<AsyncSmtpTransport<Tokio1Executor>, String> {
        let builder = if credentials.port == IMPLICIT_TLS_PORT {
            AsyncSmtpTransport::<Tokio1Executor>::relay(&credentials.host)
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&credentials.host)
        };
        let builder = builder.map_err(|e| format!("Failed to create SMTP transport: {}", e))?;

        Ok(builder
            .port(credentials.port)
            .credentials(Credentials::new(
                credentials.username.clone(),
                credentials.password.clone(),
            ))
            .timeout(Some(self.timeout))
            .build())
    }

    /// Build the MIME message; `multipart/alternative` when an HTML body exists
    pub fn build_message(
        credentials: &SmtpCredentials,
        email: &OutgoingEmail,
    ) -> Result<Message, String> {
        let from_address: lettre::Address = credentials
            .username
            .parse()
            .map_err(|e| format!("Invalid from address: {}", e))?;
        let from = Mailbox::new(credentials.from_name.clone(), from_address);

        let to: Mailbox = email
            .to
            .parse()
            .map_err(|e| format!("Invalid to address: {}", e))?;

        let builder = Message::builder().from(from).to(to).subject(&email.subject);

        let message = match &email.html_body {
            Some(html) => builder.multipart(
                MultiPart::alternative()
                    .singlepart(SinglePart::plain(email.text_body.clone()))
                    .singlepart(SinglePart::html(html.clone())),
            ),
            None => builder
                .header(ContentType::TEXT_PLAIN)
                .body(email.text_body.clone()),
        };

        message.map_err(|e| format!("Failed to build email: {}", e))
    }
}

#[async_trait]
impl MailTransport for LettreTransport {
    async fn send(&self, credentials: &SmtpCredentials, email: &OutgoingEmail) -> SendOutcome {
        let message = match Self::build_message(credentials, email) {
            Ok(m) => m,
            Err(e) => return SendOutcome::failure(e),
        };

        let mailer = match self.mailer(credentials) {
            Ok(m) => m,
            Err(e) => return SendOutcome::failure(e),
        };

        match mailer.send(message).await {
            Ok(response) => {
                debug!(to = %email.to, code = %response.code(), "Email sent");
                SendOutcome::success("Email sent successfully")
            }
            Err(e) => {
                warn!(to = %email.to, host = %credentials.host, error = %e, "SMTP send failed");
                SendOutcome::failure(e.to_string())
            }
        }
    }

    async fn verify(&self, credentials: &SmtpCredentials) -> SendOutcome {
        let mailer = match self.mailer(credentials) {
            Ok(m) => m,
            Err(e) => return SendOutcome::failure(format!("SMTP connection failed: {}", e)),
        };

        match mailer.test_connection().await {
            Ok(true) => SendOutcome::success("SMTP connection successful"),
            Ok(false) => SendOutcome::failure("SMTP connection failed: server refused the connection"),
            Err(e) => SendOutcome::failure(format!("SMTP connection failed: {}", e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn credentials() -> SmtpCredentials {
        SmtpCredentials {
            host: "smtp.example.com".to_string(),
            port: 587,
            username: "news@example.com".to_string(),
            password: "secret".to_string(),
            from_name: Some("Newsletter".to_string()),
        }
    }

    fn email(html: Option<&str>) -> OutgoingEmail {
        OutgoingEmail {
            to: "reader@example.org".to_string(),
            subject: "Hello".to_string(),
            text_body: "Plain body".to_string(),
            html_body: html.map(str::to_string),
        }
    }

    #[test]
    fn test_build_plain_message() {
        let message = LettreTransport::build_message(&credentials(), &email(None)).unwrap();
        let raw = String::from_utf8(message.formatted()).unwrap();
        assert!(raw.contains("From: Newsletter <news@example.com>"));
        assert!(raw.contains("To: reader@example.org"));
        assert!(raw.contains("Plain body"));
        assert!(!raw.contains("multipart/alternative"));
    }

    #[test]
    fn test_build_alternative_message() {
        let message =
            LettreTransport::build_message(&credentials(), &email(Some("<p>Hi</p>"))).unwrap();
        let raw = String::from_utf8(message.formatted()).unwrap();
        assert!(raw.contains("multipart/alternative"));
        assert!(raw.contains("<p>Hi</p>"));
    }

    #[test]
    fn test_invalid_recipient_is_reported() {
        let mut bad = email(None);
        bad.to = "not-an-address".to_string();
        let err = LettreTransport::build_message(&credentials(), &bad).unwrap_err();
        assert!(err.starts_with("Invalid to address"));
    }

    #[tokio::test]
    async fn test_send_never_errors_on_bad_input() {
        let transport = LettreTransport::new(1);
        let mut bad = email(None);
        bad.to = "bad".to_string();
        let outcome = transport.send(&credentials(), &bad).await;
        assert!(!outcome.ok);
    }

    #[test]
    fn test_sender_name_falls_back_to_address() {
        let mut creds = credentials();
        creds.from_name = None;
        assert_eq!(creds.sender_name(), "news@example.com");
    }
}
