//! Show schedules and airings: the inputs and outputs of the episode guide.
//!
//! A [`ShowSchedule`] is the raw upstream description of when a show airs: a
//! local anchor, recurrence rules in RFC 5545 text form and explicit episode
//! dates, all in the show's IANA time zone. An [`Airing`] is one resolved
//! occurrence of a show, pinned to a UTC instant.

use chrono::{DateTime, Duration, NaiveDateTime, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

// ─── Upstream records ────────────────────────────────────────────────────────

/// An explicitly scheduled episode (maps to an iCalendar `RDATE`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EpisodeRecord {
  /// Local air time, in the show's time zone.
  pub airs_at: NaiveDateTime,
  pub season:  Option<u32>,
  pub number:  Option<u32>,
  pub title:   Option<String>,
}

impl EpisodeRecord {
  /// Human-readable label, e.g. `"S02E05 The One With The Cat"`.
  pub fn label(&self) -> Option<String> {
    let code = match (self.season, self.number) {
      (Some(s), Some(n)) => Some(format!("S{s:02}E{n:02}")),
      (None, Some(n)) => Some(format!("E{n:02}")),
      _ => None,
    };
    match (code, self.title.as_deref()) {
      (Some(c), Some(t)) => Some(format!("{c} {t}")),
      (Some(c), None) => Some(c),
      (None, Some(t)) => Some(t.to_string()),
      (None, None) => None,
    }
  }
}

/// Everything the upstream schedule provider knows about one show.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShowSchedule {
  pub show_id:            String,
  pub title:              String,
  /// Broadcasting network; exported as the event `LOCATION`.
  #[serde(default)]
  pub network:            Option<String>,
  /// Zone of the local broadcast time, e.g. `"America/New_York"`.
  #[serde(default = "utc")]
  pub timezone:           Tz,
  /// The recurrence anchor (`DTSTART`), in local time.
  pub dtstart:            NaiveDateTime,
  /// When set, the anchor and every occurrence are whole days.
  #[serde(default)]
  pub all_day:            bool,
  #[serde(default)]
  pub duration_minutes:   Option<u32>,
  /// RRULE values, e.g. `"FREQ=WEEKLY;BYDAY=TH"`.
  #[serde(default)]
  pub rrules:             Vec<String>,
  #[serde(default)]
  pub exrules:            Vec<String>,
  #[serde(default)]
  pub episodes:           Vec<EpisodeRecord>,
  /// Cancelled or pre-empted slots.
  #[serde(default)]
  pub exdates:            Vec<NaiveDateTime>,
  /// Opaque upstream version tag; a change invalidates cached airings.
  #[serde(default)]
  pub revision:           Option<String>,
}

impl ShowSchedule {
  /// Minimal schedule with no rules or episodes.
  pub fn new(
    show_id: impl Into<String>,
    title: impl Into<String>,
    dtstart: NaiveDateTime,
  ) -> Self {
    Self {
      show_id: show_id.into(),
      title: title.into(),
      network: None,
      timezone: Tz::UTC,
      dtstart,
      all_day: false,
      duration_minutes: None,
      rrules: Vec::new(),
      exrules: Vec::new(),
      episodes: Vec::new(),
      exdates: Vec::new(),
      revision: None,
    }
  }
}

fn utc() -> Tz { Tz::UTC }

// ─── Airing ──────────────────────────────────────────────────────────────────

/// One concrete airing of a show.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Airing {
  pub show_id:          String,
  pub show_title:       String,
  pub episode:          Option<String>,
  pub starts_at:        DateTime<Utc>,
  /// The start as broadcast, in the show's local time.
  pub local_start:      NaiveDateTime,
  pub all_day:          bool,
  pub duration_minutes: Option<u32>,
  pub network:          Option<String>,
}

impl Airing {
  /// Stable identifier, used as the iCalendar `UID` and for de-duplication
  /// across shows.
  pub fn uid(&self) -> String {
    format!(
      "{}-{}@seriesly",
      self.show_id,
      self.starts_at.format("%Y%m%dT%H%M%SZ")
    )
  }

  pub fn ends_at(&self) -> Option<DateTime<Utc>> {
    self
      .duration_minutes
      .map(|m| self.starts_at + Duration::minutes(i64::from(m)))
  }

  /// `"Show Title"` or `"Show Title - S01E02 Pilot"`.
  pub fn summary(&self) -> String {
    match &self.episode {
      Some(ep) => format!("{} - {}", self.show_title, ep),
      None => self.show_title.clone(),
    }
  }
}
