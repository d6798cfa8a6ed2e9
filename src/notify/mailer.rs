use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use lettre::message::{header, Mailbox, Message};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Tokio1Executor};
use thiserror::Error;
use tracing::{info, warn};

use crate::config::EmailSettings;

#[derive(Debug, Error)]
pub enum MailError {
    #[error("Invalid email address '{0}': {1}")]
    Address(String, String),

    #[error("No deliverable recipient among {0:?}")]
    NoRecipients(Vec<String>),

    #[error("Failed to build email message: {0}")]
    Build(String),

    #[error("Failed to configure SMTP transport: {0}")]
    Transport(String),

    #[error("Failed to send email: {0}")]
    Send(String),
}

/// A plain-text message addressed to one or more recipients.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingEmail {
    pub to: Vec<String>,
    pub subject: String,
    pub body: String,
}

#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, email: OutgoingEmail) -> Result<(), MailError>;
}

/// SMTP delivery through lettre.
///
/// With an empty SMTP host the mailer runs in no-op mode and only logs,
/// which is what development setups want.
#[derive(Clone)]
pub struct SmtpMailer {
    transport: Option<Arc<AsyncSmtpTransport<Tokio1Executor>>>,
    from: Mailbox,
}

impl SmtpMailer {
    pub fn new(config: &EmailSettings) -> Result<Self, MailError> {
        let from = config
            .from
            .parse::<Mailbox>()
            .map_err(|e| MailError::Address(config.from.clone(), e.to_string()))?;

        let transport = if config.smtp_host.trim().is_empty() {
            warn!("SMTP host not configured; mailer will operate in no-op mode");
            None
        } else {
            let builder = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.smtp_host)
                .map_err(|e| MailError::Transport(e.to_string()))?
                .port(config.smtp_port);

            let builder = match (&config.smtp_username, &config.smtp_password) {
                (Some(username), Some(password)) => {
                    builder.credentials(Credentials::new(username.clone(), password.clone()))
                }
                _ => builder,
            };

            Some(Arc::new(builder.build()))
        };

        Ok(Self { transport, from })
    }

    pub fn is_enabled(&self) -> bool {
        self.transport.is_some()
    }

    /// Builds the message, leaving out recipients whose address does not
    /// parse so that one bad address does not hold up everyone else.
    fn build_message(&self, email: &OutgoingEmail) -> Result<Message, MailError> {
        let mut builder = Message::builder()
            .from(self.from.clone())
            .subject(email.subject.clone())
            .header(header::ContentType::TEXT_PLAIN);

        let mut deliverable = 0;
        for recipient in &email.to {
            match recipient.parse::<Mailbox>() {
                Ok(mailbox) => {
                    builder = builder.to(mailbox);
                    deliverable += 1;
                }
                Err(e) => warn!(recipient = %recipient, error = %e, "Skipping invalid recipient"),
            }
        }

        if deliverable == 0 {
            return Err(MailError::NoRecipients(email.to.clone()));
        }

        builder
            .body(email.body.clone())
            .map_err(|e| MailError::Build(e.to_string()))
    }
}

#[async_trait]
impl Mailer for SmtpMailer {
    async fn send(&self, email: OutgoingEmail) -> Result<(), MailError> {
        let message = self.build_message(&email)?;
        let recipients = message.envelope().to().len();

        let Some(transport) = &self.transport else {
            info!(
                subject = %email.subject,
                recipients,
                "Mailer running in no-op mode; skipping actual send"
            );
            return Ok(());
        };

        transport
            .send(message)
            .await
            .map_err(|e| MailError::Send(e.to_string()))?;

        info!(subject = %email.subject, recipients, "Email sent");
        Ok(())
    }
}

/// Collects messages instead of sending them.
#[derive(Clone, Default)]
pub struct MemoryMailer {
    outbox: Arc<Mutex<Vec<OutgoingEmail>>>,
}

impl MemoryMailer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Everything "sent" so far, oldest first.
    pub fn outbox(&self) -> Vec<OutgoingEmail> {
        self.outbox.lock().expect("outbox lock poisoned").clone()
    }
}

#[async_trait]
impl Mailer for MemoryMailer {
    async fn send(&self, email: OutgoingEmail) -> Result<(), MailError> {
        self.outbox.lock().expect("outbox lock poisoned").push(email);
        Ok(())
    }
}
