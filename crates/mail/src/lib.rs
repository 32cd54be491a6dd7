//! SMTP delivery for outbound messages.
//!
//! Messages are `multipart/mixed`: one HTML part followed by the PDF attachments.
//! Gmail senders authenticate with XOAUTH2 using an access token fetched per send;
//! other relays can use plain username/password credentials.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use lettre::message::header::ContentType;
use lettre::message::{Attachment as MimeAttachment, Mailbox, MultiPart, SinglePart};
use lettre::transport::smtp::authentication::{Credentials, Mechanism};
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use quotedoc_core::config::{MailAuth, MailConfig, OAuthConfig};
use quotedoc_core::errors::MailError;
use quotedoc_core::mail::{MailSender, OutboundMessage};
use quotedoc_google::auth::{RefreshTokenSource, TokenSource};
use quotedoc_google::drive::http_client;
use secrecy::{ExposeSecret, SecretString};
use thiserror::Error;
use tracing::info;

const IMPLICIT_TLS_PORT: u16 = 465;

#[derive(Debug, Error)]
pub enum SmtpError {
    #[error("invalid address `{address}`: {reason}")]
    InvalidAddress { address: String, reason: String },
    #[error("message could not be built: {0}")]
    Build(String),
    #[error("credentials unavailable: {0}")]
    Credentials(String),
    #[error("SMTP transport failed: {0}")]
    Transport(String),
}

impl From<SmtpError> for MailError {
    fn from(error: SmtpError) -> Self {
        match error {
            SmtpError::InvalidAddress { address, .. } => MailError::InvalidAddress(address),
            SmtpError::Build(message) => MailError::Build(message),
            SmtpError::Credentials(message) => MailError::Credentials(message),
            SmtpError::Transport(message) => MailError::Transport(message),
        }
    }
}

enum SmtpAuth {
    Password { username: String, password: SecretString },
    OAuth2 { username: String, tokens: Arc<dyn TokenSource> },
}

pub struct SmtpMailSender {
    sender: Mailbox,
    relay: String,
    port: u16,
    timeout: Duration,
    auth: SmtpAuth,
}

impl SmtpMailSender {
    pub fn from_config(mail: &MailConfig, oauth: &OAuthConfig) -> Result<Self, SmtpError> {
        let sender = parse_mailbox(&mail.sender)?;
        let username = mail.username.clone().unwrap_or_else(|| mail.sender.trim().to_string());
        let timeout = Duration::from_secs(mail.timeout_secs);

        let auth = match mail.auth {
            MailAuth::Password => {
                let password = mail
                    .password
                    .clone()
                    .ok_or_else(|| SmtpError::Credentials("mail.password is not set".into()))?;
                SmtpAuth::Password { username, password }
            }
            MailAuth::OAuth2 => {
                let client = http_client(timeout)
                    .map_err(|error| SmtpError::Credentials(error.to_string()))?;
                let tokens = RefreshTokenSource::from_config(client, oauth)
                    .map_err(|error| SmtpError::Credentials(error.to_string()))?;
                SmtpAuth::OAuth2 { username, tokens: Arc::new(tokens) }
            }
        };

        Ok(Self { sender, relay: mail.smtp_host.clone(), port: mail.smtp_port, timeout, auth })
    }

    pub fn sender(&self) -> &Mailbox {
        &self.sender
    }

    async fn transport(&self) -> Result<AsyncSmtpTransport<Tokio1Executor>, SmtpError> {
        let builder = if self.port == IMPLICIT_TLS_PORT {
            AsyncSmtpTransport::<Tokio1Executor>::relay(&self.relay)
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&self.relay)
        }
        .map_err(|error| SmtpError::Transport(error.to_string()))?
        .port(self.port)
        .timeout(Some(self.timeout));

        let builder = match &self.auth {
            SmtpAuth::Password { username, password } => builder
                .credentials(Credentials::new(
                    username.clone(),
                    password.expose_secret().to_string(),
                ))
                .authentication(vec![Mechanism::Plain, Mechanism::Login]),
            SmtpAuth::OAuth2 { username, tokens } => {
                let token = tokens
                    .access_token()
                    .await
                    .map_err(|error| SmtpError::Credentials(error.to_string()))?;
                builder
                    .credentials(Credentials::new(
                        username.clone(),
                        token.expose_secret().to_string(),
                    ))
                    .authentication(vec![Mechanism::Xoauth2])
            }
        };

        Ok(builder.build())
    }
}

#[async_trait]
impl MailSender for SmtpMailSender {
    async fn send(&self, message: &OutboundMessage) -> Result<(), MailError> {
        let email = build_message(&self.sender, message)?;
        let transport = self.transport().await?;
        transport.send(email).await.map_err(|error| SmtpError::Transport(error.to_string()))?;

        info!(
            event_name = "mail.sent",
            audience = %message.audience,
            attachments = message.attachments.len(),
            relay = %self.relay,
            "message handed to SMTP relay"
        );
        Ok(())
    }
}

/// MIME message for `message`, sent from `sender`.
pub fn build_message(sender: &Mailbox, message: &OutboundMessage) -> Result<Message, SmtpError> {
    let recipient = parse_mailbox(&message.to)?;

    let mut body = MultiPart::mixed().singlepart(SinglePart::html(message.html_body.clone()));
    for attachment in &message.attachments {
        let content_type = ContentType::parse(attachment.content_type)
            .map_err(|error| SmtpError::Build(error.to_string()))?;
        body = body.singlepart(
            MimeAttachment::new(attachment.filename.clone())
                .body(attachment.content.clone(), content_type),
        );
    }

    Message::builder()
        .from(sender.clone())
        .to(recipient)
        .subject(message.subject.clone())
        .multipart(body)
        .map_err(|error| SmtpError::Build(error.to_string()))
}

fn parse_mailbox(raw: &str) -> Result<Mailbox, SmtpError> {
    let trimmed = raw.trim();
    trimmed.parse::<Mailbox>().map_err(|error| SmtpError::InvalidAddress {
        address: trimmed.to_string(),
        reason: error.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use quotedoc_core::config::{AppConfig, MailAuth};
    use quotedoc_core::errors::MailError;
    use quotedoc_core::mail::{Attachment, Audience, OutboundMessage};

    use super::{build_message, parse_mailbox, SmtpError, SmtpMailSender};

    fn message(to: &str) -> OutboundMessage {
        OutboundMessage {
            audience: Audience::Internal,
            to: to.to_string(),
            subject: "Preventivo e contratto - 42".to_string(),
            html_body: "<p>Nuovo preventivo generato</p>".to_string(),
            attachments: vec![
                Attachment::pdf("quote_1700000000000_0.pdf", b"%PDF-quote".to_vec()),
                Attachment::pdf("contract_1700000000000_1.pdf", b"%PDF-contract".to_vec()),
            ],
        }
    }

    #[test]
    fn message_is_multipart_with_html_and_pdf_parts() {
        let sender = parse_mailbox("noleggi@x.test").expect("sender");
        let email = build_message(&sender, &message("ops@x.test")).expect("message builds");
        let raw = String::from_utf8_lossy(&email.formatted()).to_string();

        assert!(raw.contains("From: noleggi@x.test"));
        assert!(raw.contains("To: ops@x.test"));
        assert!(raw.contains("Subject: Preventivo e contratto - 42"));
        assert!(raw.contains("multipart/mixed"));
        assert!(raw.contains("text/html"));
        assert_eq!(raw.matches("application/pdf").count(), 2);
        assert!(raw.contains("quote_1700000000000_0.pdf"));
        assert!(raw.contains("contract_1700000000000_1.pdf"));
    }

    #[test]
    fn invalid_recipient_is_reported_as_an_address_error() {
        let sender = parse_mailbox("noleggi@x.test").expect("sender");
        let error = build_message(&sender, &message("not an address")).expect_err("bad address");

        assert!(matches!(error, SmtpError::InvalidAddress { ref address, .. } if address == "not an address"));
        assert_eq!(
            MailError::from(error),
            MailError::InvalidAddress("not an address".to_string())
        );
    }

    #[test]
    fn password_auth_requires_a_password() {
        let mut config = AppConfig::default();
        config.mail.sender = "noleggi@x.test".to_string();
        config.mail.auth = MailAuth::Password;

        let result = SmtpMailSender::from_config(&config.mail, &config.oauth);
        assert!(matches!(result, Err(SmtpError::Credentials(_))));
    }

    #[test]
    fn oauth2_auth_requires_refresh_credentials() {
        let mut config = AppConfig::default();
        config.mail.sender = "noleggi@x.test".to_string();

        let result = SmtpMailSender::from_config(&config.mail, &config.oauth);
        assert!(matches!(result, Err(SmtpError::Credentials(ref message)) if message.contains("oauth.client_id")));
    }

    #[test]
    fn configured_sender_becomes_the_from_mailbox() {
        let mut config = AppConfig::default();
        config.mail.sender = " noleggi@x.test ".to_string();
        config.mail.auth = MailAuth::Password;
        config.mail.password = Some("app-password".to_string().into());

        let sender = SmtpMailSender::from_config(&config.mail, &config.oauth).expect("sender");
        assert_eq!(sender.sender().email.to_string(), "noleggi@x.test");
    }
}
