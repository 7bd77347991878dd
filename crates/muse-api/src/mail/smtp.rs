use async_trait::async_trait;
use lettre::{
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
    message::{Mailbox, MultiPart, SinglePart, header::ContentType},
    transport::smtp::{
        authentication::Credentials,
        client::{Tls, TlsParameters},
    },
};

use super::{Email, MailError, Mailer};
use crate::config::SmtpConfig;

pub struct SmtpMailer {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
}

impl SmtpMailer {
    pub fn new(config: &SmtpConfig, from_address: &str, from_name: &str) -> Result<Self, MailError> {
        let tls_params = TlsParameters::new(config.host.clone())
            .map_err(|e| MailError::InvalidConfig(format!("TLS configuration error: {}", e)))?;

        // Port 465 uses implicit TLS (SMTPS), other ports use STARTTLS
        let mut builder = if config.port == 465 {
            AsyncSmtpTransport::<Tokio1Executor>::relay(&config.host)
                .map_err(|e| MailError::InvalidConfig(format!("SMTP relay error: {}", e)))?
                .port(config.port)
                .tls(Tls::Wrapper(tls_params))
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.host)
                .map_err(|e| MailError::InvalidConfig(format!("SMTP relay error: {}", e)))?
                .port(config.port)
                .tls(Tls::Required(tls_params))
        };

        if let (Some(user), Some(pass)) = (&config.user, &config.pass) {
            builder = builder.credentials(Credentials::new(user.clone(), pass.clone()));
        }

        let from = format!("{} <{}>", from_name, from_address)
            .parse()
            .map_err(|e| MailError::InvalidConfig(format!("Invalid from address: {}", e)))?;

        Ok(Self {
            transport: builder.build(),
            from,
        })
    }
}

#[async_trait]
impl Mailer for SmtpMailer {
    async fn send(&self, email: Email) -> Result<(), MailError> {
        let message = Message::builder()
            .from(self.from.clone())
            .to(email
                .to
                .parse()
                .map_err(|e| MailError::SendFailed(format!("Invalid to address: {}", e)))?)
            .subject(email.subject)
            .multipart(
                MultiPart::alternative()
                    .singlepart(SinglePart::builder().header(ContentType::TEXT_PLAIN).body(email.text))
                    .singlepart(SinglePart::builder().header(ContentType::TEXT_HTML).body(email.html)),
            )
            .map_err(|e| MailError::SendFailed(format!("Failed to build email: {}", e)))?;

        self.transport
            .send(message)
            .await
            .map_err(|e| MailError::SendFailed(e.to_string()))?;
        Ok(())
    }
}
