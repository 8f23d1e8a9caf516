//! SMTP mail transport via `lettre`.

use std::time::Duration;

use lettre::{
  AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
  message::{Mailbox, header::ContentType},
  transport::smtp::authentication::Credentials,
};

use crate::{
  dispatcher::{DeliveryError, Transport},
  error::{Error, Result},
  payload::Payload,
  settings::SmtpConfig,
};

const DEFAULT_SUBJECT: &str = "New airings";

/// Sends payloads as plain-text mail from a fixed sender.
#[derive(Clone)]
pub struct MailTransport {
  transport: AsyncSmtpTransport<Tokio1Executor>,
  from:      Mailbox,
}

impl MailTransport {
  pub fn new(transport: AsyncSmtpTransport<Tokio1Executor>, from: Mailbox) -> Self {
    Self { transport, from }
  }

  /// Build the SMTP connection settings. Port 465 uses implicit TLS, other
  /// ports STARTTLS unless `tls` is off. Nothing is connected yet.
  pub fn from_settings(settings: &SmtpConfig) -> Result<Self> {
    let from: Mailbox = settings
      .from
      .parse()
      .map_err(|e| Error::Setup(format!("invalid sender {:?}: {e}", settings.from)))?;

    let mut builder = if settings.port == 465 {
      AsyncSmtpTransport::<Tokio1Executor>::relay(&settings.host)
        .map_err(|e| Error::Setup(e.to_string()))?
    } else if settings.tls {
      AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&settings.host)
        .map_err(|e| Error::Setup(e.to_string()))?
    } else {
      AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&settings.host)
    };
    builder = builder
      .port(settings.port)
      .timeout(Some(Duration::from_secs(settings.timeout_secs)));

    if let (Some(username), Some(password)) = (&settings.username, &settings.password) {
      builder = builder.credentials(Credentials::new(username.clone(), password.clone()));
    }

    Ok(Self::new(builder.build(), from))
  }
}

#[async_trait::async_trait]
impl Transport for MailTransport {
  async fn send(&self, destination: &str, payload: &Payload) -> Result<(), DeliveryError> {
    let to: Mailbox = destination
      .trim()
      .parse()
      .map_err(|e| DeliveryError::permanent(destination, e))?;

    let message = Message::builder()
      .from(self.from.clone())
      .to(to)
      .subject(payload.subject.as_deref().unwrap_or(DEFAULT_SUBJECT))
      .header(ContentType::TEXT_PLAIN)
      .body(payload.body.clone())
      .map_err(|e| DeliveryError::Transient(e.to_string()))?;

    self
      .transport
      .send(message)
      .await
      .map_err(|e| DeliveryError::Transient(e.to_string()))?;
    Ok(())
  }

  fn name(&self) -> &str { "smtp" }
}
