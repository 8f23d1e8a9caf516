//! Subscribers, their tracked shows and per-channel delivery settings.

use std::{
  collections::{BTreeMap, BTreeSet},
  fmt,
  str::FromStr,
};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::Error;

// ─── Channels ────────────────────────────────────────────────────────────────

/// A delivery channel. Ordering is the order channels are attempted in.
#[derive(
  Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
  Email,
  Xmpp,
  Webhook,
  Calendar,
}

impl Channel {
  pub const ALL: [Channel; 4] =
    [Self::Email, Self::Xmpp, Self::Webhook, Self::Calendar];

  /// The discriminant stored in the `channel` column.
  pub fn as_str(&self) -> &'static str {
    match self {
      Self::Email => "email",
      Self::Xmpp => "xmpp",
      Self::Webhook => "webhook",
      Self::Calendar => "calendar",
    }
  }
}

impl fmt::Display for Channel {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

impl FromStr for Channel {
  type Err = Error;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.to_ascii_lowercase().as_str() {
      "email" | "mail" => Ok(Self::Email),
      "xmpp" | "jabber" => Ok(Self::Xmpp),
      "webhook" => Ok(Self::Webhook),
      "calendar" | "ical" => Ok(Self::Calendar),
      _ => Err(Error::UnknownChannel(s.to_string())),
    }
  }
}

/// Body encoding for webhook deliveries.
#[derive(
  Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum PayloadFormat {
  #[default]
  Xml,
  Json,
}

impl PayloadFormat {
  pub fn as_str(&self) -> &'static str {
    match self {
      Self::Xml => "xml",
      Self::Json => "json",
    }
  }
}

impl FromStr for PayloadFormat {
  type Err = Error;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.to_ascii_lowercase().as_str() {
      "xml" => Ok(Self::Xml),
      "json" => Ok(Self::Json),
      _ => Err(Error::UnknownFormat(s.to_string())),
    }
  }
}

/// Settings for one channel of one subscriber.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelSettings {
  pub enabled:     bool,
  /// Mail address, XMPP JID or URL, depending on the channel.
  pub destination: String,
  #[serde(default)]
  pub format:      PayloadFormat,
  /// Start of the latest airing delivered on this channel.
  #[serde(default)]
  pub watermark:   Option<DateTime<Utc>>,
}

impl ChannelSettings {
  pub fn new(destination: impl Into<String>) -> Self {
    Self {
      enabled:     true,
      destination: destination.into(),
      format:      PayloadFormat::default(),
      watermark:   None,
    }
  }
}

// ─── Subscriber ──────────────────────────────────────────────────────────────

/// Someone who wants to hear about new airings of the shows they track.
///
/// A subscriber is mutated on settings edits and after every successful
/// delivery batch. The driving task queue must never run two deliveries for
/// the same subscriber at once; nothing in this workspace enforces that.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Subscriber {
  pub subscriber_id: Uuid,
  pub created_at:    DateTime<Utc>,
  pub shows:         BTreeSet<String>,
  pub channels:      BTreeMap<Channel, ChannelSettings>,
}

impl Subscriber {
  pub fn new(subscriber_id: Uuid, created_at: DateTime<Utc>) -> Self {
    Self {
      subscriber_id,
      created_at,
      shows: BTreeSet::new(),
      channels: BTreeMap::new(),
    }
  }

  /// The effective watermark for `channel`: the stored one, or the signup
  /// time for a channel that has never delivered.
  pub fn watermark(&self, channel: Channel) -> DateTime<Utc> {
    self
      .channels
      .get(&channel)
      .and_then(|c| c.watermark)
      .unwrap_or(self.created_at)
  }

  /// Channels that are configured and enabled, in attempt order.
  pub fn enabled_channels(
    &self,
  ) -> impl Iterator<Item = (Channel, &ChannelSettings)> + '_ {
    self
      .channels
      .iter()
      .filter(|(_, s)| s.enabled && !s.destination.trim().is_empty())
      .map(|(c, s)| (*c, s))
  }
}
