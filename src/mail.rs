use anyhow::{Context, Result};
use async_trait::async_trait;
use lettre::{
    message::{header::ContentType, Message},
    transport::smtp::authentication::Credentials,
    SmtpTransport, Transport,
};
use tracing::info;

use crate::config::AppConfig;

/// Outbound ticket notifications. Sends are best-effort: route handlers log
/// failures and never fail the request over an unreachable SMTP relay.
#[async_trait]
pub trait Mailer: Send + Sync + 'static {
    async fn send(&self, to: &str, subject: &str, body: &str) -> Result<()>;
}

/// Used when SMTP credentials are not configured.
pub struct NoopMailer;

#[async_trait]
impl Mailer for NoopMailer {
    async fn send(&self, to: &str, subject: &str, _body: &str) -> Result<()> {
        info!(%to, %subject, "mail disabled, skipping notification");
        Ok(())
    }
}

pub struct SmtpMailer {
    smtp_host: String,
    credentials: Credentials,
    sender: String,
}

impl SmtpMailer {
    pub fn from_config(config: &AppConfig) -> Option<Self> {
        let smtp_host = config.mail_smtp_host.clone()?;
        let username = config.mail_username.clone()?;
        let password = config.mail_password.clone()?;
        Some(Self {
            smtp_host,
            credentials: Credentials::new(username, password),
            sender: config.mail_default_sender.clone(),
        })
    }
}

#[async_trait]
impl Mailer for SmtpMailer {
    async fn send(&self, to: &str, subject: &str, body: &str) -> Result<()> {
        let email = Message::builder()
            .from(self.sender.parse().context("invalid sender address")?)
            .to(to.parse().context("invalid recipient address")?)
            .subject(subject)
            .header(ContentType::TEXT_PLAIN)
            .body(body.to_string())
            .context("failed to build email")?;

        let transport = SmtpTransport::relay(&self.smtp_host)
            .context("SMTP relay error")?
            .credentials(self.credentials.clone())
            .build();

        // SmtpTransport is blocking; keep it off the async executor.
        tokio::task::spawn_blocking(move || transport.send(&email))
            .await
            .context("mail send task panicked")?
            .context("failed to send email")?;

        info!(%to, %subject, "notification email sent");
        Ok(())
    }
}
