//! RRULE text and recurrence-block parser.
//!
//! Pipeline for a block:
//!   raw &str
//!     └─ unfold_lines()        → Vec<String>
//!          └─ parse_content_line() → ContentLine
//!               └─ DTSTART / RRULE / RDATE / EXRULE / EXDATE → RecurrenceSet

use std::str::FromStr;

use chrono::{NaiveDate, NaiveDateTime};

use crate::{
  error::{Error, Result},
  rule::{Frequency, RecurrenceRule, Until, WeekdayNum, weekday_from_code},
  set::{RecurrenceSet, Start},
};

// ─── Content-line representation ─────────────────────────────────────────────

struct ContentLine {
  name:   String,
  params: Vec<Param>,
  value:  String,
}

struct Param {
  name:  String,
  value: String,
}

impl ContentLine {
  fn param(&self, name: &str) -> Option<&str> {
    self
      .params
      .iter()
      .find(|p| p.name.eq_ignore_ascii_case(name))
      .map(|p| p.value.as_str())
  }
}

// ─── Low-level helpers ───────────────────────────────────────────────────────

/// Join CRLF+SP (or LF+SP / LF+HT) continuation lines (RFC 5545 §3.1).
pub(crate) fn unfold_lines(s: &str) -> Vec<String> {
  let mut lines: Vec<String> = Vec::new();
  for raw in s.split('\n') {
    let line = raw.strip_suffix('\r').unwrap_or(raw);
    if line.starts_with(' ') || line.starts_with('\t') {
      if let Some(last) = lines.last_mut() {
        last.push_str(&line[1..]);
      }
    } else {
      lines.push(line.to_string());
    }
  }
  lines.retain(|l| !l.trim().is_empty());
  lines
}

/// Find the first `:` that is not inside a double-quoted string.
fn find_unquoted_colon(s: &str) -> Option<usize> {
  let mut in_quotes = false;
  for (i, c) in s.char_indices() {
    match c {
      '"' => in_quotes = !in_quotes,
      ':' if !in_quotes => return Some(i),
      _ => {}
    }
  }
  None
}

/// Split on `;` while respecting double-quoted strings.
fn split_semicolons_respecting_quotes(s: &str) -> Vec<&str> {
  let mut result = Vec::new();
  let mut start = 0usize;
  let mut in_quotes = false;
  for (i, c) in s.char_indices() {
    match c {
      '"' => in_quotes = !in_quotes,
      ';' if !in_quotes => {
        result.push(&s[start..i]);
        start = i + 1;
      }
      _ => {}
    }
  }
  result.push(&s[start..]);
  result
}

fn parse_content_line(line: &str) -> Result<ContentLine> {
  let colon_pos = find_unquoted_colon(line)
    .ok_or_else(|| Error::MalformedContentLine(line.to_string()))?;

  let tokens = split_semicolons_respecting_quotes(&line[..colon_pos]);
  let name = tokens[0].trim().to_uppercase();
  if name.is_empty() {
    return Err(Error::MalformedContentLine(line.to_string()));
  }

  let params = tokens[1..]
    .iter()
    .filter_map(|token| {
      let (name, value) = token.split_once('=')?;
      Some(Param {
        name:  name.trim().to_uppercase(),
        value: value.trim().trim_matches('"').to_string(),
      })
    })
    .collect();

  Ok(ContentLine {
    name,
    params,
    value: line[colon_pos + 1..].trim().to_string(),
  })
}

/// A parsed DATE or DATE-TIME value.
struct DateValue {
  value:   NaiveDateTime,
  is_utc:  bool,
  is_date: bool,
}

/// Parse `YYYYMMDD`, `YYYYMMDDTHHMMSS` or `YYYYMMDDTHHMMSSZ`.
fn parse_date_value(property: &str, raw: &str) -> Result<DateValue> {
  let invalid = || Error::InvalidDate {
    property: property.to_string(),
    value:    raw.to_string(),
  };
  let s = raw.trim();
  let (s, is_utc) = match s.strip_suffix('Z').or_else(|| s.strip_suffix('z')) {
    Some(rest) => (rest, true),
    None => (s, false),
  };

  if s.len() == 8 {
    let date = NaiveDate::parse_from_str(s, "%Y%m%d").map_err(|_| invalid())?;
    return Ok(DateValue {
      value: date.and_time(chrono::NaiveTime::MIN),
      is_utc,
      is_date: true,
    });
  }
  let value = NaiveDateTime::parse_from_str(&s.to_ascii_uppercase(), "%Y%m%dT%H%M%S")
    .map_err(|_| invalid())?;
  Ok(DateValue {
    value,
    is_utc,
    is_date: false,
  })
}

fn parse_list<T: FromStr>(part: &str, value: &str) -> Result<Vec<T>> {
  value
    .split(',')
    .map(|v| v.trim().parse::<T>().map_err(|_| Error::invalid(part, v)))
    .collect()
}

/// Parse one BYDAY entry: `MO`, `2TH`, `-1FR`, `+3SU` or `MO(+1)`.
fn parse_weekday_num(raw: &str) -> Result<WeekdayNum> {
  let s = raw.trim().to_ascii_uppercase();
  if !s.is_ascii() {
    return Err(Error::invalid("BYDAY", raw));
  }
  let (ordinal, code) = if let Some(open) = s.find('(') {
    let inner = s[open + 1..]
      .strip_suffix(')')
      .ok_or_else(|| Error::invalid("BYDAY", raw))?;
    (inner.to_string(), s[..open].to_string())
  } else {
    let split = s.len().saturating_sub(2);
    (s[..split].to_string(), s[split..].to_string())
  };

  let weekday = weekday_from_code(&code).ok_or_else(|| Error::invalid("BYDAY", raw))?;
  let n = if ordinal.is_empty() {
    None
  } else {
    Some(
      ordinal
        .parse::<i32>()
        .map_err(|_| Error::invalid("BYDAY", raw))?,
    )
  };
  Ok(WeekdayNum { weekday, n })
}

// ─── Rule parser ─────────────────────────────────────────────────────────────

/// Parse an RRULE or EXRULE value such as `FREQ=WEEKLY;COUNT=2;BYDAY=TU,TH`.
///
/// Keys are case-insensitive and may appear in any order; an `RRULE:` or
/// `EXRULE:` prefix is accepted. Unknown or repeated keys are rejected, and
/// the result is validated.
pub fn parse_rule(input: &str) -> Result<RecurrenceRule> {
  let s = input.trim();
  let upper = s.to_ascii_uppercase();
  let s = ["RRULE:", "EXRULE:"]
    .iter()
    .find(|p| upper.starts_with(*p))
    .map_or(s, |p| &s[p.len()..]);

  let mut seen: Vec<String> = Vec::new();
  let mut freq = None;
  let mut rule = RecurrenceRule::new(Frequency::Yearly);

  for part in s.split(';').map(str::trim).filter(|p| !p.is_empty()) {
    let (key, value) = part
      .split_once('=')
      .ok_or_else(|| Error::MalformedRulePart(part.to_string()))?;
    let key = key.trim().to_ascii_uppercase();
    let value = value.trim();
    if seen.contains(&key) {
      return Err(Error::MalformedRulePart(format!("{key} given twice")));
    }

    match key.as_str() {
      "FREQ" => freq = Some(value.parse::<Frequency>()?),
      "INTERVAL" => {
        rule.interval = value.parse().map_err(|_| Error::invalid(&key, value))?;
      }
      "COUNT" => {
        rule.count = Some(value.parse().map_err(|_| Error::invalid(&key, value))?);
      }
      "UNTIL" => {
        let date = parse_date_value(&key, value)?;
        rule.until = Some(Until {
          value:   date.value,
          is_utc:  date.is_utc,
          is_date: date.is_date,
        });
      }
      "WKST" => {
        rule.week_start = weekday_from_code(&value.to_ascii_uppercase())
          .ok_or_else(|| Error::invalid(&key, value))?;
      }
      "BYSETPOS" => rule.by_set_pos = parse_list(&key, value)?,
      "BYMONTH" => rule.by_month = parse_list(&key, value)?,
      "BYMONTHDAY" => rule.by_month_day = parse_list(&key, value)?,
      "BYYEARDAY" => rule.by_year_day = parse_list(&key, value)?,
      "BYWEEKNO" => rule.by_week_no = parse_list(&key, value)?,
      "BYDAY" | "BYWEEKDAY" => {
        rule.by_weekday = value
          .split(',')
          .map(parse_weekday_num)
          .collect::<Result<_>>()?;
      }
      "BYHOUR" => rule.by_hour = parse_list(&key, value)?,
      "BYMINUTE" => rule.by_minute = parse_list(&key, value)?,
      "BYSECOND" => rule.by_second = parse_list(&key, value)?,
      _ => return Err(Error::UnknownRulePart(key)),
    }
    seen.push(key);
  }

  rule.freq = freq.ok_or_else(|| Error::MalformedRulePart("FREQ is required".into()))?;
  rule.validate()?;
  Ok(rule)
}

impl FromStr for RecurrenceRule {
  type Err = Error;

  fn from_str(s: &str) -> Result<Self> { parse_rule(s) }
}

// ─── Block parser ────────────────────────────────────────────────────────────

/// Parse a block of DTSTART, RRULE, RDATE, EXRULE and EXDATE content lines
/// into a [`RecurrenceSet`].
///
/// A bare rule line without a property name is read as an RRULE. Malformed
/// RRULE and EXRULE lines are skipped with a warning; malformed dates are
/// errors. `TZID` parameters are ignored and the set's offset is UTC. Other
/// properties are ignored.
pub fn parse_set(input: &str) -> Result<RecurrenceSet> {
  let mut start: Option<Start> = None;
  let mut rrules = Vec::new();
  let mut exrules = Vec::new();
  let mut rdates = Vec::new();
  let mut exdates = Vec::new();

  for line in unfold_lines(input) {
    let line = if find_unquoted_colon(&line).is_none() && line.contains('=') {
      format!("RRULE:{line}")
    } else {
      line
    };
    let cl = parse_content_line(&line)?;

    match cl.name.as_str() {
      "DTSTART" => {
        let date = parse_date_value(&cl.name, &cl.value)?;
        let as_date = date.is_date
          || cl
            .param("VALUE")
            .is_some_and(|v| v.eq_ignore_ascii_case("DATE"));
        start = Some(if as_date {
          Start::Date(date.value.date())
        } else {
          Start::DateTime(date.value)
        });
      }
      "RRULE" | "EXRULE" => match parse_rule(&cl.value) {
        Ok(rule) if cl.name == "RRULE" => rrules.push(rule),
        Ok(rule) => exrules.push(rule),
        Err(error) => {
          tracing::warn!(property = %cl.name, value = %cl.value, %error, "skipping malformed rule");
        }
      },
      "RDATE" | "EXDATE" => {
        if cl
          .param("VALUE")
          .is_some_and(|v| v.eq_ignore_ascii_case("PERIOD"))
        {
          return Err(Error::InvalidDate {
            property: cl.name.clone(),
            value:    cl.value.clone(),
          });
        }
        let target = if cl.name == "RDATE" { &mut rdates } else { &mut exdates };
        for raw in cl.value.split(',').filter(|v| !v.trim().is_empty()) {
          target.push(parse_date_value(&cl.name, raw)?.value);
        }
      }
      other => tracing::debug!(property = other, "ignoring property"),
    }
  }

  let mut set = RecurrenceSet::new(start.ok_or(Error::MissingStart)?);
  set.rrules = rrules;
  set.exrules = exrules;
  set.rdates = rdates;
  set.exdates = exdates;
  Ok(set)
}
