//! Routes rendered payloads to the transport of each delivery channel.
//!
//! Every call is exactly one attempt. Retrying is left to the next
//! scheduler run, which finds the same airings still due because the
//! watermark did not move.

use std::{collections::BTreeMap, sync::Arc, time::Instant};

use seriesly_core::subscriber::Channel;
use thiserror::Error;

use crate::payload::Payload;

#[derive(Debug, Error)]
pub enum DeliveryError {
  /// The destination itself is invalid or gone; the channel should be
  /// disabled until the subscriber reconfigures it.
  #[error("destination {destination:?} rejected: {reason}")]
  PermanentDestination { destination: String, reason: String },

  #[error("delivery failed: {0}")]
  Transient(String),

  #[error("no transport configured for {0}")]
  NoTransport(Channel),
}

impl DeliveryError {
  pub fn is_permanent(&self) -> bool { matches!(self, Self::PermanentDestination { .. }) }

  pub(crate) fn permanent(destination: &str, reason: impl ToString) -> Self {
    Self::PermanentDestination {
      destination: destination.to_string(),
      reason:      reason.to_string(),
    }
  }
}

/// One way of getting a payload to a destination.
#[async_trait::async_trait]
pub trait Transport: Send + Sync {
  /// Send `payload` to `destination` once.
  async fn send(&self, destination: &str, payload: &Payload) -> Result<(), DeliveryError>;

  /// Short name used in logs.
  fn name(&self) -> &str;
}

// ─── Dispatcher ──────────────────────────────────────────────────────────────

#[derive(Default, Clone)]
pub struct DeliveryDispatcher {
  transports: BTreeMap<Channel, Arc<dyn Transport>>,
}

impl DeliveryDispatcher {
  pub fn new() -> Self { Self::default() }

  pub fn with_transport(mut self, channel: Channel, transport: Arc<dyn Transport>) -> Self {
    self.register(channel, transport);
    self
  }

  /// Install `transport` for `channel`, replacing any previous one.
  pub fn register(&mut self, channel: Channel, transport: Arc<dyn Transport>) {
    self.transports.insert(channel, transport);
  }

  /// Attempt delivery on `channel`. Failures are logged and returned,
  /// never propagated to other channels.
  pub async fn deliver(
    &self,
    channel: Channel,
    destination: &str,
    payload: &Payload,
  ) -> Result<(), DeliveryError> {
    let Some(transport) = self.transports.get(&channel) else {
      tracing::warn!(%channel, "no transport configured");
      return Err(DeliveryError::NoTransport(channel));
    };

    let start = Instant::now();
    let result = transport.send(destination, payload).await;
    let duration_ms = start.elapsed().as_millis() as u64;

    match &result {
      Ok(()) => tracing::info!(
        %channel,
        transport = transport.name(),
        duration_ms,
        "notification delivered"
      ),
      Err(error) => tracing::warn!(
        %channel,
        transport = transport.name(),
        %error,
        permanent = error.is_permanent(),
        duration_ms,
        "notification delivery failed"
      ),
    }
    result
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::testing::{Behaviour, MockTransport};

  fn payload() -> Payload {
    Payload {
      subject:      None,
      content_type: "text/plain",
      body:         "hello".into(),
    }
  }

  #[tokio::test]
  async fn delivers_through_the_channel_transport() {
    let mail = Arc::new(MockTransport::new(Behaviour::Accept));
    let hook = Arc::new(MockTransport::new(Behaviour::Accept));
    let dispatcher = DeliveryDispatcher::new()
      .with_transport(Channel::Email, mail.clone())
      .with_transport(Channel::Webhook, hook.clone());

    dispatcher
      .deliver(Channel::Email, "a@example.com", &payload())
      .await
      .unwrap();
    assert_eq!(mail.send_count(), 1);
    assert_eq!(hook.send_count(), 0);
    assert_eq!(mail.delivered.lock().unwrap()[0].0, "a@example.com");
  }

  #[tokio::test]
  async fn missing_transport_is_an_error() {
    let dispatcher = DeliveryDispatcher::new();
    let err = dispatcher
      .deliver(Channel::Xmpp, "a@jabber.example", &payload())
      .await
      .unwrap_err();
    assert!(matches!(err, DeliveryError::NoTransport(Channel::Xmpp)));
    assert!(!err.is_permanent());
  }

  #[tokio::test]
  async fn failures_are_single_attempt_and_classified() {
    let flaky = Arc::new(MockTransport::new(Behaviour::Transient));
    let gone = Arc::new(MockTransport::new(Behaviour::Permanent));
    let dispatcher = DeliveryDispatcher::new()
      .with_transport(Channel::Webhook, flaky.clone())
      .with_transport(Channel::Calendar, gone.clone());

    let err = dispatcher
      .deliver(Channel::Webhook, "https://x.test/", &payload())
      .await
      .unwrap_err();
    assert!(!err.is_permanent());
    assert_eq!(flaky.send_count(), 1);

    let err = dispatcher
      .deliver(Channel::Calendar, "https://cal.test/", &payload())
      .await
      .unwrap_err();
    assert!(err.is_permanent());
    assert_eq!(gone.send_count(), 1);
  }
}
