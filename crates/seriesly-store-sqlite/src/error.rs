//! Error type for `seriesly-store-sqlite`.

use seriesly_core::subscriber::Channel;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  #[error("core error: {0}")]
  Core(#[from] seriesly_core::Error),

  #[error("database error: {0}")]
  Database(#[from] tokio_rusqlite::Error),

  #[error("uuid parse error: {0}")]
  Uuid(#[from] uuid::Error),

  #[error("date/time parse error: {0}")]
  DateParse(String),

  #[error("subscriber not found: {0}")]
  SubscriberNotFound(uuid::Uuid),

  /// The channel has never been configured for this subscriber.
  #[error("channel {channel} is not configured for subscriber {subscriber}")]
  ChannelNotConfigured {
    subscriber: uuid::Uuid,
    channel:    Channel,
  },
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
