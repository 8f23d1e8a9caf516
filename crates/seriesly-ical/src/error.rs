//! Error types for the seriesly-ical codec and recurrence engine.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  /// The rule is well-formed text but describes an invalid recurrence
  /// (conflicting COUNT/UNTIL, out-of-range numbers, misplaced BYxxx parts).
  #[error("invalid recurrence rule: {0}")]
  Configuration(String),

  #[error("malformed rule part: {0:?}")]
  MalformedRulePart(String),

  #[error("unknown rule part: {0}")]
  UnknownRulePart(String),

  #[error("invalid value for {part}: {value:?}")]
  InvalidValue { part: String, value: String },

  #[error("malformed content-line: {0}")]
  MalformedContentLine(String),

  #[error("invalid date in {property}: {value}")]
  InvalidDate { property: String, value: String },

  #[error("recurrence set has no DTSTART")]
  MissingStart,
}

impl Error {
  pub(crate) fn config(msg: impl Into<String>) -> Self {
    Self::Configuration(msg.into())
  }

  pub(crate) fn invalid(part: &str, value: &str) -> Self {
    Self::InvalidValue {
      part:  part.to_string(),
      value: value.to_string(),
    }
  }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
