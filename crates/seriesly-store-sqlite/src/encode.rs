//! Encoding and decoding helpers between Rust domain types and the plain-text
//! representations stored in SQLite columns.
//!
//! Timestamps are stored as RFC 3339 UTC strings with a fixed number of
//! fractional digits, so text comparison in SQL matches time order. UUIDs
//! are stored as hyphenated lowercase strings.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, SecondsFormat, Utc};
use seriesly_core::subscriber::{Channel, ChannelSettings, PayloadFormat, Subscriber};
use uuid::Uuid;

use crate::{Error, Result};

// ─── Uuid ────────────────────────────────────────────────────────────────────

pub fn encode_uuid(id: Uuid) -> String { id.hyphenated().to_string() }

pub fn decode_uuid(s: &str) -> Result<Uuid> { Ok(Uuid::parse_str(s)?) }

// ─── DateTime<Utc> ───────────────────────────────────────────────────────────

pub fn encode_dt(dt: DateTime<Utc>) -> String {
  dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub fn decode_dt(s: &str) -> Result<DateTime<Utc>> {
  DateTime::parse_from_rfc3339(s)
    .map(|dt| dt.with_timezone(&Utc))
    .map_err(|e| Error::DateParse(e.to_string()))
}

// ─── Row types ───────────────────────────────────────────────────────────────

/// Raw strings read directly from a `subscribers` row.
pub struct RawSubscriber {
  pub subscriber_id: String,
  pub created_at:    String,
}

/// Raw values read directly from a `channels` row.
pub struct RawChannel {
  pub subscriber_id: String,
  pub channel:       String,
  pub enabled:       bool,
  pub destination:   String,
  pub format:        String,
  pub watermark:     Option<String>,
}

impl RawChannel {
  pub fn into_settings(self) -> Result<(Channel, ChannelSettings)> {
    let channel: Channel = self.channel.parse()?;
    let format: PayloadFormat = self.format.parse()?;
    let watermark = self.watermark.as_deref().map(decode_dt).transpose()?;
    Ok((channel, ChannelSettings {
      enabled: self.enabled,
      destination: self.destination,
      format,
      watermark,
    }))
  }
}

/// Assemble subscribers from their rows and the rows of their shows and
/// channels. Show and channel rows of unknown subscribers are ignored.
pub fn assemble(
  subscribers: Vec<RawSubscriber>,
  shows: Vec<(String, String)>,
  channels: Vec<RawChannel>,
) -> Result<Vec<Subscriber>> {
  let mut by_id: BTreeMap<String, Subscriber> = BTreeMap::new();
  let mut order = Vec::with_capacity(subscribers.len());
  for raw in subscribers {
    let subscriber = Subscriber {
      subscriber_id: decode_uuid(&raw.subscriber_id)?,
      created_at:    decode_dt(&raw.created_at)?,
      shows:         BTreeSet::new(),
      channels:      BTreeMap::new(),
    };
    order.push(raw.subscriber_id.clone());
    by_id.insert(raw.subscriber_id, subscriber);
  }

  for (subscriber_id, show_id) in shows {
    if let Some(s) = by_id.get_mut(&subscriber_id) {
      s.shows.insert(show_id);
    }
  }
  for raw in channels {
    let Some(s) = by_id.get_mut(&raw.subscriber_id) else { continue };
    let (channel, settings) = raw.into_settings()?;
    s.channels.insert(channel, settings);
  }

  Ok(order.into_iter().filter_map(|id| by_id.remove(&id)).collect())
}
