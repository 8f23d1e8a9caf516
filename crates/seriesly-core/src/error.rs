//! Error types for `seriesly-core`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  #[error("unknown delivery channel: {0:?}")]
  UnknownChannel(String),

  #[error("unknown payload format: {0:?}")]
  UnknownFormat(String),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
