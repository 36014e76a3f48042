use std::time::Duration;

use async_trait::async_trait;
use lettre::{
    message::{header::ContentType, Attachment, Mailbox, MultiPart, SinglePart},
    transport::smtp::authentication::Credentials,
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
};
use tracing::debug;

use crate::config::ConfigEmail;

/// Everything an alert email carries.
#[derive(Debug, Clone, Copy)]
pub struct MailAlert<'a> {
    pub timestamp: &'a str,
    pub description: &'a str,
    /// File name and PNG bytes of the snapshot
    pub attachment: Option<(&'a str, &'a [u8])>,
}

#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, alert: &MailAlert<'_>) -> Result<(), MailError>;
}

pub struct SmtpMailer {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
    to: Mailbox,
    instance_name: String,
}

impl SmtpMailer {
    /// Builds the transport; no connection is made until the first send. Must be called from
    /// within a tokio runtime, the connection pool spawns its cleanup task here.
    pub fn new(cfg: &ConfigEmail, instance_name: &str) -> Result<SmtpMailer, MailError> {
        let builder = if cfg.use_tls {
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&cfg.smtp_server)?
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&cfg.smtp_server)
        };
        let mut builder = builder
            .port(cfg.smtp_port)
            .timeout(Some(Duration::from_secs(cfg.timeout_secs)));
        if !cfg.smtp_username.is_empty() && !cfg.smtp_password.is_empty() {
            builder = builder.credentials(Credentials::new(
                cfg.smtp_username.clone(),
                cfg.smtp_password.clone(),
            ));
        }
        Ok(SmtpMailer {
            transport: builder.build(),
            from: cfg.from_address.parse()?,
            to: cfg.to_address.parse()?,
            instance_name: instance_name.to_string(),
        })
    }

    pub fn compose(&self, alert: &MailAlert<'_>) -> Result<Message, MailError> {
        let text = SinglePart::plain(format!(
            "Motion Detection Alert\n\nTime: {}\n\nDescription: {}",
            alert.timestamp, alert.description
        ));
        let mut body = MultiPart::mixed().singlepart(text);
        if let Some((filename, bytes)) = alert.attachment {
            let content_type = ContentType::parse(mime::IMAGE_PNG.as_ref())
                .map_err(|e| MailError::ContentType(e.to_string()))?;
            body = body.singlepart(
                Attachment::new(filename.to_string()).body(bytes.to_vec(), content_type),
            );
        }
        Ok(Message::builder()
            .from(self.from.clone())
            .to(self.to.clone())
            .subject(format!(
                "{} - Motion Detected at {}",
                self.instance_name, alert.timestamp
            ))
            .multipart(body)?)
    }
}

#[async_trait]
impl Mailer for SmtpMailer {
    async fn send(&self, alert: &MailAlert<'_>) -> Result<(), MailError> {
        let message = self.compose(alert)?;
        let response = self.transport.send(message).await?;
        debug!(code = %response.code(), to = %self.to, "Alert email accepted");
        Ok(())
    }
}

quick_error! {
    #[derive(Debug)]
    pub enum MailError {
        Address(error: lettre::address::AddressError) {
            display("Invalid email address: {}", error)
            from()
            source(error)
        }
        ContentType(error: String) {
            display("Invalid attachment content type: {}", error)
        }
        Build(error: lettre::error::Error) {
            display("Unable to build email: {}", error)
            from()
            source(error)
        }
        Transport(error: lettre::transport::smtp::Error) {
            display("Unable to send email: {}", error)
            from()
            source(error)
        }
    }
}
