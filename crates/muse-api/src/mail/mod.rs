//! Outbound notification mail.
//!
//! Every send is best-effort: callers go through [`notify`], which logs a
//! failure and carries on, so a broken mail relay never fails a request.

mod smtp;
pub mod templates;

pub use smtp::SmtpMailer;

use async_trait::async_trait;
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum MailError {
    #[error("Failed to send email: {0}")]
    SendFailed(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

/// A rendered message ready for delivery.
#[derive(Debug, Clone)]
pub struct Email {
    pub to: String,
    pub subject: String,
    pub text: String,
    pub html: String,
}

#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, email: Email) -> Result<(), MailError>;
}

/// Used when no SMTP relay is configured: the message is logged, not sent.
pub struct LogMailer;

#[async_trait]
impl Mailer for LogMailer {
    async fn send(&self, email: Email) -> Result<(), MailError> {
        info!("Mail (not sent, no SMTP configured) to {}: {}", email.to, email.subject);
        Ok(())
    }
}

/// Deliver `email`, logging instead of failing.
pub async fn notify(mailer: &dyn Mailer, email: Email) {
    let to = email.to.clone();
    let subject = email.subject.clone();
    if let Err(e) = mailer.send(email).await {
        warn!("Could not send '{}' to {}: {}", subject, to, e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Broken;

    #[async_trait]
    impl Mailer for Broken {
        async fn send(&self, _email: Email) -> Result<(), MailError> {
            Err(MailError::SendFailed("relay down".into()))
        }
    }

    #[tokio::test]
    async fn notify_swallows_failures() {
        let email = templates::welcome("v@x.com", "Vera", "http://localhost:5173");
        notify(&Broken, email.clone()).await;
        notify(&LogMailer, email).await;
    }
}
