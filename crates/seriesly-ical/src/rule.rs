//! The RFC 5545 recurrence rule model.
//!
//! A [`RecurrenceRule`] stores only the parts that were given explicitly.
//! Defaults derived from the anchor (e.g. a yearly rule repeating on the
//! anchor's month and day) are applied at expansion time, so a parsed rule
//! serializes back to the same text.

use std::str::FromStr;

use chrono::{NaiveDateTime, Weekday};

use crate::error::{Error, Result};

// ─── Frequency ───────────────────────────────────────────────────────────────

/// How often a rule repeats, ordered from coarsest to finest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Frequency {
  Yearly,
  Monthly,
  Weekly,
  Daily,
  Hourly,
  Minutely,
  Secondly,
}

impl Frequency {
  pub fn as_str(&self) -> &'static str {
    match self {
      Self::Yearly => "YEARLY",
      Self::Monthly => "MONTHLY",
      Self::Weekly => "WEEKLY",
      Self::Daily => "DAILY",
      Self::Hourly => "HOURLY",
      Self::Minutely => "MINUTELY",
      Self::Secondly => "SECONDLY",
    }
  }
}

impl FromStr for Frequency {
  type Err = Error;

  fn from_str(s: &str) -> Result<Self> {
    match s.trim().to_ascii_uppercase().as_str() {
      "YEARLY" => Ok(Self::Yearly),
      "MONTHLY" => Ok(Self::Monthly),
      "WEEKLY" => Ok(Self::Weekly),
      "DAILY" => Ok(Self::Daily),
      "HOURLY" => Ok(Self::Hourly),
      "MINUTELY" => Ok(Self::Minutely),
      "SECONDLY" => Ok(Self::Secondly),
      _ => Err(Error::invalid("FREQ", s)),
    }
  }
}

// ─── Weekdays ────────────────────────────────────────────────────────────────

/// A `BYDAY` entry: a weekday with an optional ordinal, e.g. `2TU` (second
/// Tuesday) or `-1FR` (last Friday).
///
/// The ordinal only has meaning for yearly and monthly rules; finer rules
/// treat `2TU` like plain `TU`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WeekdayNum {
  pub weekday: Weekday,
  pub n:       Option<i32>,
}

impl WeekdayNum {
  /// Every `weekday` in the period.
  pub fn every(weekday: Weekday) -> Self { Self { weekday, n: None } }

  /// The `n`th `weekday` in the period; negative counts from the end.
  pub fn nth(weekday: Weekday, n: i32) -> Self {
    Self {
      weekday,
      n: Some(n),
    }
  }
}

impl From<Weekday> for WeekdayNum {
  fn from(weekday: Weekday) -> Self { Self::every(weekday) }
}

/// Two-letter RFC 5545 weekday code.
pub(crate) fn weekday_code(w: Weekday) -> &'static str {
  match w {
    Weekday::Mon => "MO",
    Weekday::Tue => "TU",
    Weekday::Wed => "WE",
    Weekday::Thu => "TH",
    Weekday::Fri => "FR",
    Weekday::Sat => "SA",
    Weekday::Sun => "SU",
  }
}

pub(crate) fn weekday_from_code(code: &str) -> Option<Weekday> {
  match code {
    "MO" => Some(Weekday::Mon),
    "TU" => Some(Weekday::Tue),
    "WE" => Some(Weekday::Wed),
    "TH" => Some(Weekday::Thu),
    "FR" => Some(Weekday::Fri),
    "SA" => Some(Weekday::Sat),
    "SU" => Some(Weekday::Sun),
    _ => None,
  }
}

// ─── Until ───────────────────────────────────────────────────────────────────

/// The inclusive upper bound of a rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Until {
  pub value:   NaiveDateTime,
  /// Written with a `Z` suffix; shifted into the set's offset on expansion.
  pub is_utc:  bool,
  /// Written as a bare date (`UNTIL=20050301`), meaning midnight.
  pub is_date: bool,
}

impl Until {
  pub fn local(value: NaiveDateTime) -> Self {
    Self {
      value,
      is_utc: false,
      is_date: false,
    }
  }

  pub fn utc(value: NaiveDateTime) -> Self {
    Self {
      value,
      is_utc: true,
      is_date: false,
    }
  }
}

// ─── Rule ────────────────────────────────────────────────────────────────────

/// A single recurrence rule (`RRULE` or `EXRULE` value).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecurrenceRule {
  pub freq:         Frequency,
  pub interval:     u32,
  pub week_start:   Weekday,
  pub count:        Option<u32>,
  pub until:        Option<Until>,
  pub by_set_pos:   Vec<i32>,
  pub by_month:     Vec<u32>,
  pub by_month_day: Vec<i32>,
  pub by_year_day:  Vec<i32>,
  pub by_week_no:   Vec<i32>,
  pub by_weekday:   Vec<WeekdayNum>,
  pub by_hour:      Vec<u32>,
  pub by_minute:    Vec<u32>,
  pub by_second:    Vec<u32>,
}

impl RecurrenceRule {
  /// A rule repeating every period of `freq`, forever.
  pub fn new(freq: Frequency) -> Self {
    Self {
      freq,
      interval: 1,
      week_start: Weekday::Mon,
      count: None,
      until: None,
      by_set_pos: Vec::new(),
      by_month: Vec::new(),
      by_month_day: Vec::new(),
      by_year_day: Vec::new(),
      by_week_no: Vec::new(),
      by_weekday: Vec::new(),
      by_hour: Vec::new(),
      by_minute: Vec::new(),
      by_second: Vec::new(),
    }
  }

  pub fn interval(self, interval: u32) -> Self { Self { interval, ..self } }

  pub fn count(self, count: u32) -> Self {
    Self {
      count: Some(count),
      ..self
    }
  }

  pub fn until(self, until: Until) -> Self {
    Self {
      until: Some(until),
      ..self
    }
  }

  pub fn week_start(self, week_start: Weekday) -> Self {
    Self { week_start, ..self }
  }

  pub fn by_set_pos(self, v: impl IntoIterator<Item = i32>) -> Self {
    Self {
      by_set_pos: v.into_iter().collect(),
      ..self
    }
  }

  pub fn by_month(self, v: impl IntoIterator<Item = u32>) -> Self {
    Self {
      by_month: v.into_iter().collect(),
      ..self
    }
  }

  pub fn by_month_day(self, v: impl IntoIterator<Item = i32>) -> Self {
    Self {
      by_month_day: v.into_iter().collect(),
      ..self
    }
  }

  pub fn by_year_day(self, v: impl IntoIterator<Item = i32>) -> Self {
    Self {
      by_year_day: v.into_iter().collect(),
      ..self
    }
  }

  pub fn by_week_no(self, v: impl IntoIterator<Item = i32>) -> Self {
    Self {
      by_week_no: v.into_iter().collect(),
      ..self
    }
  }

  pub fn by_weekday<W: Into<WeekdayNum>>(
    self,
    v: impl IntoIterator<Item = W>,
  ) -> Self {
    Self {
      by_weekday: v.into_iter().map(Into::into).collect(),
      ..self
    }
  }

  pub fn by_hour(self, v: impl IntoIterator<Item = u32>) -> Self {
    Self {
      by_hour: v.into_iter().collect(),
      ..self
    }
  }

  pub fn by_minute(self, v: impl IntoIterator<Item = u32>) -> Self {
    Self {
      by_minute: v.into_iter().collect(),
      ..self
    }
  }

  pub fn by_second(self, v: impl IntoIterator<Item = u32>) -> Self {
    Self {
      by_second: v.into_iter().collect(),
      ..self
    }
  }

  /// True when any BYxxx part other than BYSETPOS is present.
  pub fn has_by_parts(&self) -> bool {
    !(self.by_month.is_empty()
      && self.by_month_day.is_empty()
      && self.by_year_day.is_empty()
      && self.by_week_no.is_empty()
      && self.by_weekday.is_empty()
      && self.by_hour.is_empty()
      && self.by_minute.is_empty()
      && self.by_second.is_empty())
  }

  /// Check the rule for combinations RFC 5545 forbids.
  ///
  /// Frequency-inappropriate parts are rejected rather than ignored:
  /// BYWEEKNO outside yearly rules, BYYEARDAY on monthly, weekly and daily
  /// rules, BYMONTHDAY on weekly rules.
  pub fn validate(&self) -> Result<()> {
    if self.interval == 0 {
      return Err(Error::config("INTERVAL must be at least 1"));
    }
    if self.count.is_some() && self.until.is_some() {
      return Err(Error::config("COUNT and UNTIL are mutually exclusive"));
    }

    check_unsigned("BYMONTH", &self.by_month, 1, 12)?;
    check_signed("BYMONTHDAY", &self.by_month_day, 31)?;
    check_signed("BYYEARDAY", &self.by_year_day, 366)?;
    check_signed("BYWEEKNO", &self.by_week_no, 53)?;
    check_signed("BYSETPOS", &self.by_set_pos, 366)?;
    check_unsigned("BYHOUR", &self.by_hour, 0, 23)?;
    check_unsigned("BYMINUTE", &self.by_minute, 0, 59)?;
    check_unsigned("BYSECOND", &self.by_second, 0, 59)?;
    for wd in &self.by_weekday {
      if let Some(n) = wd.n
        && (n == 0 || !(-53..=53).contains(&n))
      {
        return Err(Error::config(format!("BYDAY ordinal {n} out of range")));
      }
    }

    if !self.by_set_pos.is_empty() && !self.has_by_parts() {
      return Err(Error::config("BYSETPOS requires another BYxxx rule part"));
    }
    if !self.by_week_no.is_empty() && self.freq != Frequency::Yearly {
      return Err(Error::config("BYWEEKNO is only valid for YEARLY rules"));
    }
    if !self.by_year_day.is_empty()
      && matches!(
        self.freq,
        Frequency::Monthly | Frequency::Weekly | Frequency::Daily
      )
    {
      return Err(Error::config(format!(
        "BYYEARDAY is not valid for {} rules",
        self.freq.as_str()
      )));
    }
    if !self.by_month_day.is_empty() && self.freq == Frequency::Weekly {
      return Err(Error::config("BYMONTHDAY is not valid for WEEKLY rules"));
    }
    Ok(())
  }
}

fn check_unsigned(part: &str, values: &[u32], min: u32, max: u32) -> Result<()> {
  match values.iter().find(|v| !(min..=max).contains(*v)) {
    Some(v) => Err(Error::config(format!("{part} value {v} out of range"))),
    None => Ok(()),
  }
}

/// Signed parts allow `±1..=max` and never zero.
fn check_signed(part: &str, values: &[i32], max: i32) -> Result<()> {
  match values.iter().find(|v| **v == 0 || v.abs() > max) {
    Some(v) => Err(Error::config(format!("{part} value {v} out of range"))),
    None => Ok(()),
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn count_and_until_conflict() {
    let until = chrono::NaiveDate::from_ymd_opt(2005, 3, 1)
      .unwrap()
      .and_hms_opt(0, 0, 0)
      .unwrap();
    let rule = RecurrenceRule::new(Frequency::Daily)
      .count(3)
      .until(Until::local(until));
    assert!(matches!(rule.validate(), Err(Error::Configuration(_))));
  }

  #[test]
  fn zero_interval_rejected() {
    let rule = RecurrenceRule::new(Frequency::Daily).interval(0);
    assert!(rule.validate().is_err());
  }

  #[test]
  fn out_of_range_parts_rejected() {
    let cases = [
      RecurrenceRule::new(Frequency::Yearly).by_month([13]),
      RecurrenceRule::new(Frequency::Monthly).by_month_day([0]),
      RecurrenceRule::new(Frequency::Monthly).by_month_day([-32]),
      RecurrenceRule::new(Frequency::Yearly).by_year_day([367]),
      RecurrenceRule::new(Frequency::Daily).by_hour([24]),
      RecurrenceRule::new(Frequency::Monthly)
        .by_weekday([WeekdayNum::nth(Weekday::Mon, 0)]),
    ];
    for rule in cases {
      assert!(rule.validate().is_err(), "{rule:?} should be rejected");
    }
  }

  #[test]
  fn set_pos_needs_another_by_part() {
    let bare = RecurrenceRule::new(Frequency::Monthly).by_set_pos([-1]);
    assert!(bare.validate().is_err());

    let ok = RecurrenceRule::new(Frequency::Monthly)
      .by_weekday([Weekday::Mon, Weekday::Fri])
      .by_set_pos([-1]);
    assert!(ok.validate().is_ok());
  }

  #[test]
  fn frequency_inappropriate_parts_rejected() {
    assert!(
      RecurrenceRule::new(Frequency::Monthly)
        .by_week_no([20])
        .validate()
        .is_err()
    );
    assert!(
      RecurrenceRule::new(Frequency::Daily)
        .by_year_day([100])
        .validate()
        .is_err()
    );
    assert!(
      RecurrenceRule::new(Frequency::Weekly)
        .by_month_day([1])
        .validate()
        .is_err()
    );
    assert!(
      RecurrenceRule::new(Frequency::Yearly)
        .by_week_no([20])
        .validate()
        .is_ok()
    );
  }

  #[test]
  fn frequencies_order_coarse_to_fine() {
    assert!(Frequency::Yearly < Frequency::Monthly);
    assert!(Frequency::Daily < Frequency::Hourly);
    assert!(Frequency::Minutely < Frequency::Secondly);
  }
}
