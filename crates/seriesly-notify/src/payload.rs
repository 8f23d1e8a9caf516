//! Rendering due airings into the body each channel delivers.

use std::io::Cursor;

use chrono::{DateTime, SecondsFormat, Utc};
use quick_xml::{
  Writer,
  events::{BytesDecl, BytesEnd, BytesStart, Event},
};
use serde::Serialize;
use seriesly_core::{airing::Airing, subscriber::PayloadFormat};
use seriesly_ical::serialize_calendar;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PayloadError {
  #[error("xml error: {0}")]
  Xml(String),
  #[error("json error: {0}")]
  Json(#[from] serde_json::Error),
}

/// A rendered notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Payload {
  /// Mail subject; unused by other channels.
  pub subject:      Option<String>,
  pub content_type: &'static str,
  pub body:         String,
}

// ─── Text ────────────────────────────────────────────────────────────────────

fn line(airing: &Airing) -> String {
  let when = if airing.all_day {
    airing.local_start.format("%a %d %b, all day").to_string()
  } else {
    airing.local_start.format("%a %d %b %H:%M").to_string()
  };
  match &airing.network {
    Some(network) => format!("{when}  {} ({network})", airing.summary()),
    None => format!("{when}  {}", airing.summary()),
  }
}

fn text(airings: &[Airing]) -> String {
  let mut out = String::new();
  for airing in airings {
    out.push_str(&line(airing));
    out.push('\n');
  }
  out
}

/// Subject `"<n> new airings"` with one line per airing.
pub fn mail(airings: &[Airing]) -> Payload {
  Payload {
    subject:      Some(format!("{} new airings", airings.len())),
    content_type: "text/plain; charset=utf-8",
    body:         text(airings),
  }
}

pub fn xmpp(airings: &[Airing]) -> Payload {
  Payload {
    subject:      None,
    content_type: "text/plain; charset=utf-8",
    body:         format!("{} new airings:\n{}", airings.len(), text(airings)),
  }
}

// ─── Webhook ─────────────────────────────────────────────────────────────────

pub fn webhook(airings: &[Airing], format: PayloadFormat) -> Result<Payload, PayloadError> {
  match format {
    PayloadFormat::Xml => Ok(Payload {
      subject:      None,
      content_type: "application/xml; charset=utf-8",
      body:         xml(airings)?,
    }),
    PayloadFormat::Json => Ok(Payload {
      subject:      None,
      content_type: "application/json",
      body:         json(airings)?,
    }),
  }
}

fn timestamp(dt: DateTime<Utc>) -> String { dt.to_rfc3339_opts(SecondsFormat::Secs, true) }

fn xml_err(e: impl std::fmt::Display) -> PayloadError { PayloadError::Xml(e.to_string()) }

fn xml(airings: &[Airing]) -> Result<String, PayloadError> {
  let mut writer = Writer::new(Cursor::new(Vec::new()));
  writer
    .write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))
    .map_err(xml_err)?;

  let mut root = BytesStart::new("airings");
  root.push_attribute(("count", airings.len().to_string().as_str()));
  writer.write_event(Event::Start(root)).map_err(xml_err)?;

  for airing in airings {
    let uid = airing.uid();
    let starts = timestamp(airing.starts_at);
    let mut el = BytesStart::new("airing");
    el.push_attribute(("uid", uid.as_str()));
    el.push_attribute(("show", airing.show_id.as_str()));
    el.push_attribute(("title", airing.show_title.as_str()));
    if let Some(episode) = &airing.episode {
      el.push_attribute(("episode", episode.as_str()));
    }
    el.push_attribute(("starts", starts.as_str()));
    if let Some(ends) = airing.ends_at() {
      el.push_attribute(("ends", timestamp(ends).as_str()));
    }
    if airing.all_day {
      el.push_attribute(("all-day", "true"));
    }
    if let Some(network) = &airing.network {
      el.push_attribute(("network", network.as_str()));
    }
    writer.write_event(Event::Empty(el)).map_err(xml_err)?;
  }

  writer
    .write_event(Event::End(BytesEnd::new("airings")))
    .map_err(xml_err)?;
  String::from_utf8(writer.into_inner().into_inner()).map_err(xml_err)
}

#[derive(Serialize)]
struct JsonAiring<'a> {
  uid:     String,
  show:    &'a str,
  title:   &'a str,
  summary: String,
  episode: Option<&'a str>,
  starts:  DateTime<Utc>,
  ends:    Option<DateTime<Utc>>,
  all_day: bool,
  network: Option<&'a str>,
}

#[derive(Serialize)]
struct JsonBody<'a> {
  count:   usize,
  airings: Vec<JsonAiring<'a>>,
}

fn json(airings: &[Airing]) -> Result<String, PayloadError> {
  let body = JsonBody {
    count:   airings.len(),
    airings: airings
      .iter()
      .map(|a| JsonAiring {
        uid:     a.uid(),
        show:    &a.show_id,
        title:   &a.show_title,
        summary: a.summary(),
        episode: a.episode.as_deref(),
        starts:  a.starts_at,
        ends:    a.ends_at(),
        all_day: a.all_day,
        network: a.network.as_deref(),
      })
      .collect(),
  };
  Ok(serde_json::to_string(&body)?)
}

// ─── Calendar ────────────────────────────────────────────────────────────────

pub fn calendar(name: &str, airings: &[Airing], stamp: DateTime<Utc>) -> Payload {
  Payload {
    subject:      None,
    content_type: "text/calendar; charset=utf-8",
    body:         serialize_calendar(name, airings, stamp),
  }
}
