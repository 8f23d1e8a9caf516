//! RRULE text and iCalendar serializer.
//!
//! Produces CRLF line endings and folds at 75 octets per RFC 5545 §3.1.

use std::fmt;

use chrono::{DateTime, NaiveDateTime, TimeDelta, Utc};
use seriesly_core::airing::Airing;

use crate::{
  rule::{RecurrenceRule, Until, WeekdayNum, weekday_code},
  set::{RecurrenceSet, Start},
};

pub const PRODID: &str = "-//Seriesly//Episode Guide//EN";

// ─── RFC 5545 line folding ───────────────────────────────────────────────────

/// Emit `s` as one logical line, folding at 75 octets with CRLF + SP continuation.
pub(crate) fn fold_line(s: &str) -> String {
  if s.len() <= 75 {
    return format!("{s}\r\n");
  }

  let mut result = String::new();
  let total = s.len();
  let mut pos = 0usize;
  let mut first = true;

  while pos < total {
    let limit = if first { 75 } else { 74 };
    let end = if pos + limit >= total {
      total
    } else {
      let mut e = pos + limit;
      while e > pos && !s.is_char_boundary(e) {
        e -= 1;
      }
      if e == pos { pos + 1 } else { e }
    };

    if !first {
      result.push(' ');
    }
    result.push_str(&s[pos..end]);
    result.push_str("\r\n");
    pos = end;
    first = false;
  }

  result
}

/// Escape a TEXT value: `\`, `;`, `,`, newline.
fn escape_text(s: &str) -> String {
  s.replace('\\', "\\\\")
    .replace(';', "\\;")
    .replace(',', "\\,")
    .replace('\n', "\\n")
}

fn format_local(dt: NaiveDateTime) -> String { dt.format("%Y%m%dT%H%M%S").to_string() }

fn format_utc(dt: DateTime<Utc>) -> String { dt.format("%Y%m%dT%H%M%SZ").to_string() }

fn format_until(until: &Until) -> String {
  if until.is_date {
    until.value.format("%Y%m%d").to_string()
  } else if until.is_utc {
    format!("{}Z", format_local(until.value))
  } else {
    format_local(until.value)
  }
}

// ─── Rule text ───────────────────────────────────────────────────────────────

fn join<T: fmt::Display>(values: &[T]) -> String {
  values
    .iter()
    .map(ToString::to_string)
    .collect::<Vec<_>>()
    .join(",")
}

impl fmt::Display for WeekdayNum {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    if let Some(n) = self.n {
      write!(f, "{n}")?;
    }
    f.write_str(weekday_code(self.weekday))
  }
}

impl fmt::Display for RecurrenceRule {
  /// Canonical RRULE value text, without the `RRULE:` prefix. Parts at their
  /// default value are omitted.
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let mut parts = vec![format!("FREQ={}", self.freq.as_str())];
    if self.interval != 1 {
      parts.push(format!("INTERVAL={}", self.interval));
    }
    if self.week_start != chrono::Weekday::Mon {
      parts.push(format!("WKST={}", weekday_code(self.week_start)));
    }
    if let Some(count) = self.count {
      parts.push(format!("COUNT={count}"));
    }
    if let Some(until) = &self.until {
      parts.push(format!("UNTIL={}", format_until(until)));
    }

    let lists = [
      ("BYSETPOS", join(&self.by_set_pos)),
      ("BYMONTH", join(&self.by_month)),
      ("BYMONTHDAY", join(&self.by_month_day)),
      ("BYYEARDAY", join(&self.by_year_day)),
      ("BYWEEKNO", join(&self.by_week_no)),
      ("BYDAY", join(&self.by_weekday)),
      ("BYHOUR", join(&self.by_hour)),
      ("BYMINUTE", join(&self.by_minute)),
      ("BYSECOND", join(&self.by_second)),
    ];
    for (name, value) in lists {
      if !value.is_empty() {
        parts.push(format!("{name}={value}"));
      }
    }
    f.write_str(&parts.join(";"))
  }
}

// ─── Recurrence block ────────────────────────────────────────────────────────

/// Serialize a set as DTSTART / RRULE / EXRULE / RDATE / EXDATE content
/// lines, readable by [`crate::parse_set`].
pub fn serialize_set(set: &RecurrenceSet) -> String {
  let mut out = String::new();
  out.push_str(&fold_line(&match set.anchor {
    Start::Date(d) => format!("DTSTART;VALUE=DATE:{}", d.format("%Y%m%d")),
    Start::DateTime(dt) => format!("DTSTART:{}", format_local(dt)),
  }));
  for rule in &set.rrules {
    out.push_str(&fold_line(&format!("RRULE:{rule}")));
  }
  for rule in &set.exrules {
    out.push_str(&fold_line(&format!("EXRULE:{rule}")));
  }
  for (name, dates) in [("RDATE", &set.rdates), ("EXDATE", &set.exdates)] {
    if !dates.is_empty() {
      let values: Vec<String> = dates.iter().map(|d| format_local(*d)).collect();
      out.push_str(&fold_line(&format!("{name}:{}", values.join(","))));
    }
  }
  out
}

// ─── Calendar export ─────────────────────────────────────────────────────────

fn serialize_event(airing: &Airing, stamp: DateTime<Utc>) -> String {
  let mut lines: Vec<String> = vec![
    fold_line("BEGIN:VEVENT"),
    fold_line(&format!("UID:{}", airing.uid())),
    fold_line(&format!("DTSTAMP:{}", format_utc(stamp))),
  ];

  if airing.all_day {
    let day = airing.local_start.date();
    let days = airing
      .duration_minutes
      .map_or(1, |m| (i64::from(m) / (24 * 60)).max(1));
    let end = day + TimeDelta::days(days);
    lines.push(fold_line(&format!("DTSTART;VALUE=DATE:{}", day.format("%Y%m%d"))));
    lines.push(fold_line(&format!("DTEND;VALUE=DATE:{}", end.format("%Y%m%d"))));
  } else {
    lines.push(fold_line(&format!("DTSTART:{}", format_utc(airing.starts_at))));
    if let Some(end) = airing.ends_at() {
      lines.push(fold_line(&format!("DTEND:{}", format_utc(end))));
    }
  }

  lines.push(fold_line(&format!("SUMMARY:{}", escape_text(&airing.summary()))));
  if let Some(network) = &airing.network {
    lines.push(fold_line(&format!("LOCATION:{}", escape_text(network))));
  }
  lines.push(fold_line("END:VEVENT"));
  lines.concat()
}

/// Serialize airings as a VCALENDAR with one VEVENT each.
///
/// `stamp` is written as every event's `DTSTAMP`; passing a fixed value
/// keeps the output stable for the same airings.
pub fn serialize_calendar(name: &str, airings: &[Airing], stamp: DateTime<Utc>) -> String {
  let mut out = String::new();
  out.push_str(&fold_line("BEGIN:VCALENDAR"));
  out.push_str(&fold_line("VERSION:2.0"));
  out.push_str(&fold_line(&format!("PRODID:{PRODID}")));
  out.push_str(&fold_line("CALSCALE:GREGORIAN"));
  out.push_str(&fold_line(&format!("X-WR-CALNAME:{}", escape_text(name))));
  for airing in airings {
    out.push_str(&serialize_event(airing, stamp));
  }
  out.push_str(&fold_line("END:VCALENDAR"));
  out
}
