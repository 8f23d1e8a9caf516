//! Rule expansion.
//!
//! Expansion works one calendar year at a time. For the current year a set
//! of day masks is built (month, day of month, negative day of month,
//! weekday, week number and ordinal weekday), each indexed by the 0-based
//! day of the year and extended by seven days into the next year so weekly
//! periods may cross the year boundary. A period (year, month, week, day or
//! a single day for sub-daily rules) is the range of day indices it covers;
//! every day in the range is tested against the masks, combined with the
//! time-of-day set, narrowed by BYSETPOS and emitted in order.

use std::collections::VecDeque;

use chrono::{
  Datelike, Days, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime, Offset,
  TimeDelta, Timelike, Utc,
};

use crate::{
  error::Result,
  rule::{Frequency, RecurrenceRule, WeekdayNum},
};

/// No occurrence is produced past the end of this year.
const MAX_YEAR: i64 = 9999;

// ─── Effective rule ──────────────────────────────────────────────────────────

/// A rule with the anchor-derived defaults filled in and every list sorted.
#[derive(Debug, Clone)]
struct Effective {
  freq:          Frequency,
  interval:      u64,
  wkst:          u32,
  count:         Option<u32>,
  until:         Option<NaiveDateTime>,
  by_set_pos:    Vec<i64>,
  by_month:      Vec<u32>,
  by_month_day:  Vec<i32>,
  by_nmonth_day: Vec<i32>,
  by_year_day:   Vec<i32>,
  by_week_no:    Vec<i32>,
  by_weekday:    Vec<u32>,
  by_nweekday:   Vec<(u32, i32)>,
  by_hour:       Vec<u32>,
  by_minute:     Vec<u32>,
  by_second:     Vec<u32>,
}

impl Effective {
  fn resolve(
    rule: &RecurrenceRule,
    anchor: NaiveDateTime,
    offset: FixedOffset,
  ) -> Self {
    let mut by_month = rule.by_month.clone();
    let mut month_days = rule.by_month_day.clone();
    let mut weekdays = rule.by_weekday.clone();

    let no_day_parts = rule.by_week_no.is_empty()
      && rule.by_year_day.is_empty()
      && rule.by_month_day.is_empty()
      && rule.by_weekday.is_empty();
    if no_day_parts {
      match rule.freq {
        Frequency::Yearly => {
          if by_month.is_empty() {
            by_month.push(anchor.month());
          }
          month_days.push(anchor.day() as i32);
        }
        Frequency::Monthly => month_days.push(anchor.day() as i32),
        Frequency::Weekly => weekdays.push(WeekdayNum::every(anchor.weekday())),
        _ => {}
      }
    }

    let (mut by_nmonth_day, mut by_month_day): (Vec<i32>, Vec<i32>) =
      month_days.into_iter().partition(|d| *d < 0);

    let mut by_weekday = Vec::new();
    let mut by_nweekday = Vec::new();
    for wd in weekdays {
      let day = wd.weekday.num_days_from_monday();
      match wd.n {
        Some(n) if rule.freq <= Frequency::Monthly => by_nweekday.push((day, n)),
        _ => by_weekday.push(day),
      }
    }

    let default_time = |explicit: &[u32], finer: Frequency, value: u32| {
      if explicit.is_empty() && rule.freq < finer {
        vec![value]
      } else {
        explicit.to_vec()
      }
    };
    let mut by_hour = default_time(&rule.by_hour[..], Frequency::Hourly, anchor.hour());
    let mut by_minute =
      default_time(&rule.by_minute[..], Frequency::Minutely, anchor.minute());
    let mut by_second =
      default_time(&rule.by_second[..], Frequency::Secondly, anchor.second());

    let until = rule.until.map(|u| {
      if u.is_utc {
        u.value + TimeDelta::seconds(i64::from(offset.local_minus_utc()))
      } else {
        u.value
      }
    });

    let mut by_set_pos: Vec<i64> =
      rule.by_set_pos.iter().map(|p| i64::from(*p)).collect();
    let mut by_year_day = rule.by_year_day.clone();
    let mut by_week_no = rule.by_week_no.clone();
    for list in [&mut by_month, &mut by_hour, &mut by_minute, &mut by_second] {
      list.sort_unstable();
      list.dedup();
    }
    for list in [
      &mut by_month_day,
      &mut by_nmonth_day,
      &mut by_year_day,
      &mut by_week_no,
    ] {
      list.sort_unstable();
      list.dedup();
    }
    by_set_pos.sort_unstable();
    by_set_pos.dedup();
    by_weekday.sort_unstable();
    by_weekday.dedup();
    by_nweekday.sort_unstable();
    by_nweekday.dedup();

    Self {
      freq: rule.freq,
      interval: u64::from(rule.interval.max(1)),
      wkst: rule.week_start.num_days_from_monday(),
      count: rule.count,
      until,
      by_set_pos,
      by_month,
      by_month_day,
      by_nmonth_day,
      by_year_day,
      by_week_no,
      by_weekday,
      by_nweekday,
      by_hour,
      by_minute,
      by_second,
    }
  }

  /// Times of day for frequencies coarser than hourly.
  fn day_times(&self) -> Vec<NaiveTime> {
    let mut times = Vec::new();
    for &h in &self.by_hour {
      for &m in &self.by_minute {
        for &s in &self.by_second {
          if let Some(t) = NaiveTime::from_hms_opt(h, m, s) {
            times.push(t);
          }
        }
      }
    }
    times.sort_unstable();
    times
  }

  /// Times within the current hour, minute or second for sub-daily rules.
  fn period_times(&self, hour: u64, minute: u64, second: u64) -> Vec<NaiveTime> {
    let (h, m, s) = (hour as u32, minute as u32, second as u32);
    let mut times: Vec<NaiveTime> = match self.freq {
      Frequency::Hourly => self
        .by_minute
        .iter()
        .flat_map(|m| self.by_second.iter().map(move |s| (*m, *s)))
        .filter_map(|(m, s)| NaiveTime::from_hms_opt(h, m, s))
        .collect(),
      Frequency::Minutely => self
        .by_second
        .iter()
        .filter_map(|s| NaiveTime::from_hms_opt(h, m, *s))
        .collect(),
      _ => NaiveTime::from_hms_opt(h, m, s).into_iter().collect(),
    };
    times.sort_unstable();
    times
  }
}

// ─── Calendar helpers ────────────────────────────────────────────────────────

fn is_leap(year: i32) -> bool {
  (year % 4 == 0 && year % 100 != 0) || year % 400 == 0
}

fn year_len(year: i32) -> usize { if is_leap(year) { 366 } else { 365 } }

fn days_in_month(year: i32, month: u32) -> u32 {
  match month {
    2 if is_leap(year) => 29,
    2 => 28,
    4 | 6 | 9 | 11 => 30,
    _ => 31,
  }
}

/// Week numbering for a year: the day index where week 1 starts, the day
/// index of the first week start, and the number of weeks in the year.
///
/// Week 1 is the first week with at least four days in the year.
fn week_layout(year_weekday: u32, len: usize, wkst: u32) -> (usize, usize, usize) {
  let first_wkst = ((7 - year_weekday + wkst) % 7) as usize;
  let (no1_wkst, week_year_len) = if first_wkst >= 4 {
    (0, len + ((year_weekday + 7 - wkst) % 7) as usize)
  } else {
    (first_wkst, len - first_wkst)
  };
  let weeks = week_year_len / 7 + (week_year_len % 7) / 4;
  (no1_wkst, first_wkst, weeks)
}

fn gcd(a: u64, b: u64) -> u64 { if b == 0 { a } else { gcd(b, a % b) } }

/// Step `value` by `interval` (mod `base`) until it lands in `set`. Returns
/// the number of carries and the landing value, or `None` if no value in the
/// set is reachable.
fn mod_distance(
  value: u64,
  set: &[u32],
  base: u64,
  interval: u64,
) -> Option<(u64, u64)> {
  let mut carry = 0;
  let mut value = value;
  for _ in 0..base {
    let sum = value + interval;
    carry += sum / base;
    value = sum % base;
    if set.contains(&(value as u32)) {
      return Some((carry, value));
    }
  }
  None
}

// ─── Year info ───────────────────────────────────────────────────────────────

struct YearInfo {
  year:          i32,
  month:         u32,
  year_start:    NaiveDate,
  len:           usize,
  next_len:      usize,
  month_mask:    Vec<u32>,
  mday_mask:     Vec<i32>,
  nmday_mask:    Vec<i32>,
  wday_mask:     Vec<u32>,
  month_range:   [usize; 13],
  week_no_mask:  Option<Vec<bool>>,
  nweekday_mask: Option<Vec<bool>>,
}

impl YearInfo {
  fn new(rule: &Effective, year: i32, month: u32) -> Option<Self> {
    let mut info = Self {
      year,
      month,
      year_start: NaiveDate::from_ymd_opt(year, 1, 1)?,
      len: 0,
      next_len: 0,
      month_mask: Vec::new(),
      mday_mask: Vec::new(),
      nmday_mask: Vec::new(),
      wday_mask: Vec::new(),
      month_range: [0; 13],
      week_no_mask: None,
      nweekday_mask: None,
    };
    info.build_year(rule)?;
    info.build_nweekdays(rule);
    Some(info)
  }

  fn rebuild(&mut self, rule: &Effective, year: i32, month: u32) -> Option<()> {
    let year_changed = year != self.year;
    let month_changed = month != self.month;
    self.year = year;
    self.month = month;
    if year_changed {
      self.year_start = NaiveDate::from_ymd_opt(year, 1, 1)?;
      self.build_year(rule)?;
    }
    if year_changed || month_changed {
      self.build_nweekdays(rule);
    }
    Some(())
  }

  fn build_year(&mut self, rule: &Effective) -> Option<()> {
    let year = self.year;
    self.len = year_len(year);
    self.next_len = year_len(year + 1);

    let span = self.len + 14;
    self.month_mask.clear();
    self.mday_mask.clear();
    self.nmday_mask.clear();
    self.wday_mask.clear();
    let mut date = self.year_start;
    for _ in 0..span {
      let mday = date.day() as i32;
      self.month_mask.push(date.month());
      self.mday_mask.push(mday);
      self
        .nmday_mask
        .push(mday - days_in_month(date.year(), date.month()) as i32 - 1);
      self.wday_mask.push(date.weekday().num_days_from_monday());
      date = date.succ_opt()?;
    }

    self.month_range[0] = 0;
    for m in 1..=12u32 {
      self.month_range[m as usize] =
        self.month_range[m as usize - 1] + days_in_month(year, m) as usize;
    }

    self.week_no_mask = if rule.by_week_no.is_empty() {
      None
    } else {
      Some(self.week_numbers(rule)?)
    };
    Some(())
  }

  fn mark_week(&self, mask: &mut [bool], mut i: usize, wkst: u32) {
    for _ in 0..7 {
      let Some(slot) = mask.get_mut(i) else { return };
      *slot = true;
      i += 1;
      if self.wday_mask.get(i) == Some(&wkst) {
        return;
      }
    }
  }

  fn week_numbers(&self, rule: &Effective) -> Option<Vec<bool>> {
    let wkst = rule.wkst;
    let year_weekday = self.wday_mask[0];
    let (no1_wkst, first_wkst, weeks) = week_layout(year_weekday, self.len, wkst);
    let week_start = |n: usize| {
      if n > 1 {
        let i = no1_wkst + (n - 1) * 7;
        if no1_wkst != first_wkst { i - (7 - first_wkst) } else { i }
      } else {
        no1_wkst
      }
    };

    let mut mask = vec![false; self.len + 7];
    for &n in &rule.by_week_no {
      let n = if n < 0 { n + weeks as i32 + 1 } else { n };
      if n <= 0 || n as usize > weeks {
        continue;
      }
      self.mark_week(&mut mask, week_start(n as usize), wkst);
    }

    // Week 1 of next year may begin in the last days of this one.
    if rule.by_week_no.contains(&1) {
      let mut i = no1_wkst + weeks * 7;
      if no1_wkst != first_wkst {
        i -= 7 - first_wkst;
      }
      if i < self.len {
        self.mark_week(&mut mask, i, wkst);
      }
    }

    // Days before week 1 belong to the last week of the previous year.
    if no1_wkst > 0 {
      let last_week = if rule.by_week_no.contains(&-1) {
        -1
      } else {
        let prev = NaiveDate::from_ymd_opt(self.year - 1, 1, 1)?;
        let prev_weekday = prev.weekday().num_days_from_monday();
        week_layout(prev_weekday, year_len(self.year - 1), wkst).2 as i32
      };
      if rule.by_week_no.contains(&last_week) {
        mask[..no1_wkst].iter_mut().for_each(|d| *d = true);
      }
    }
    Some(mask)
  }

  fn build_nweekdays(&mut self, rule: &Effective) {
    if rule.by_nweekday.is_empty() {
      self.nweekday_mask = None;
      return;
    }
    let range = |m: u32| {
      (self.month_range[m as usize - 1], self.month_range[m as usize])
    };
    let ranges: Vec<(usize, usize)> = match rule.freq {
      Frequency::Yearly if rule.by_month.is_empty() => vec![(0, self.len)],
      Frequency::Yearly => rule.by_month.iter().map(|m| range(*m)).collect(),
      Frequency::Monthly => vec![range(self.month)],
      _ => Vec::new(),
    };

    let mut mask = vec![false; self.len];
    for (first, last) in ranges {
      let (first, last) = (first as i64, last as i64 - 1);
      for &(wday, n) in &rule.by_nweekday {
        let n = i64::from(n);
        let i = if n < 0 {
          let i = last + (n + 1) * 7;
          let Some(w) = self.weekday_at(i) else { continue };
          i - i64::from((w + 7 - wday) % 7)
        } else {
          let i = first + (n - 1) * 7;
          let Some(w) = self.weekday_at(i) else { continue };
          i + i64::from((7 - w + wday) % 7)
        };
        if first <= i && i <= last {
          mask[i as usize] = true;
        }
      }
    }
    self.nweekday_mask = Some(mask);
  }

  fn weekday_at(&self, i: i64) -> Option<u32> {
    usize::try_from(i).ok().and_then(|i| self.wday_mask.get(i).copied())
  }

  /// 0-based day index of `month`/`day` in the current year.
  fn day_index(&self, month: u32, day: u64) -> usize {
    self.month_range[month as usize - 1] + day as usize - 1
  }

  /// The day range `[start, end)` of the period containing the given day.
  fn period(&self, rule: &Effective, month: u32, day: u64) -> (usize, usize) {
    match rule.freq {
      Frequency::Yearly => (0, self.len),
      Frequency::Monthly => (
        self.month_range[month as usize - 1],
        self.month_range[month as usize],
      ),
      Frequency::Weekly => {
        let start = self.day_index(month, day);
        let mut i = start;
        for _ in 0..7 {
          i += 1;
          if self.wday_mask.get(i) == Some(&rule.wkst) {
            break;
          }
        }
        (start, i)
      }
      _ => {
        let i = self.day_index(month, day);
        (i, i + 1)
      }
    }
  }

  fn day_matches(&self, rule: &Effective, i: usize) -> bool {
    if !rule.by_month.is_empty() && !rule.by_month.contains(&self.month_mask[i]) {
      return false;
    }
    if let Some(mask) = &self.week_no_mask
      && !mask.get(i).copied().unwrap_or(false)
    {
      return false;
    }
    if !(rule.by_weekday.is_empty() && rule.by_nweekday.is_empty()) {
      let plain = rule.by_weekday.contains(&self.wday_mask[i]);
      let nth = self
        .nweekday_mask
        .as_ref()
        .is_some_and(|m| m.get(i).copied().unwrap_or(false));
      if !(plain || nth) {
        return false;
      }
    }
    if !(rule.by_month_day.is_empty() && rule.by_nmonth_day.is_empty())
      && !rule.by_month_day.contains(&self.mday_mask[i])
      && !rule.by_nmonth_day.contains(&self.nmday_mask[i])
    {
      return false;
    }
    if !rule.by_year_day.is_empty() {
      let (len, next) = (self.len as i32, self.next_len as i32);
      let i = i as i32;
      let hit = if i < len {
        rule.by_year_day.contains(&(i + 1)) || rule.by_year_day.contains(&(i - len))
      } else {
        rule.by_year_day.contains(&(i + 1 - len))
          || rule.by_year_day.contains(&(i - len - next))
      };
      if !hit {
        return false;
      }
    }
    true
  }

  fn date(&self, i: usize) -> Option<NaiveDate> {
    self.year_start.checked_add_days(Days::new(i as u64))
  }
}

// ─── Iterator ────────────────────────────────────────────────────────────────

/// Lazy, ascending expansion of a single rule from its anchor.
///
/// Iteration ends after `COUNT` occurrences, at the first candidate past
/// `UNTIL`, after year 9999, or when the BYHOUR/BYMINUTE/BYSECOND parts can
/// never be reached for a sub-daily rule.
pub struct RuleIter {
  rule:      Effective,
  anchor:    NaiveDateTime,
  info:      Option<YearInfo>,
  year:      i64,
  month:     u32,
  day:       u64,
  hour:      u64,
  minute:    u64,
  second:    u64,
  weekday:   u32,
  times:     Vec<NaiveTime>,
  remaining: Option<u32>,
  buffer:    VecDeque<NaiveDateTime>,
  done:      bool,
}

impl RuleIter {
  fn new(rule: Effective, anchor: NaiveDateTime) -> Self {
    let info = YearInfo::new(&rule, anchor.year(), anchor.month());
    let (hour, minute, second) = (
      u64::from(anchor.hour()),
      u64::from(anchor.minute()),
      u64::from(anchor.second()),
    );

    let times = if rule.freq < Frequency::Hourly {
      rule.day_times()
    } else {
      let off = |set: &[u32], finer: Frequency, v: u64| {
        rule.freq >= finer && !set.is_empty() && !set.contains(&(v as u32))
      };
      if off(&rule.by_hour[..], Frequency::Hourly, hour)
        || off(&rule.by_minute[..], Frequency::Minutely, minute)
        || off(&rule.by_second[..], Frequency::Secondly, second)
      {
        Vec::new()
      } else {
        rule.period_times(hour, minute, second)
      }
    };

    Self {
      done: info.is_none() || i64::from(anchor.year()) > MAX_YEAR,
      remaining: rule.count,
      info,
      anchor,
      year: i64::from(anchor.year()),
      month: anchor.month(),
      day: u64::from(anchor.day()),
      hour,
      minute,
      second,
      weekday: anchor.weekday().num_days_from_monday(),
      times,
      buffer: VecDeque::new(),
      rule,
    }
  }

  /// Queue `dt` for output. Returns false once iteration must stop.
  fn emit(&mut self, dt: NaiveDateTime) -> bool {
    if self.rule.until.is_some_and(|until| dt > until) {
      self.done = true;
      return false;
    }
    if dt < self.anchor {
      return true;
    }
    if let Some(remaining) = &mut self.remaining {
      if *remaining == 0 {
        self.done = true;
        return false;
      }
      *remaining -= 1;
      if *remaining == 0 {
        self.done = true;
        self.buffer.push_back(dt);
        return false;
      }
    }
    self.buffer.push_back(dt);
    true
  }

  /// Expand the current period into the buffer and move to the next one.
  fn step(&mut self) {
    let Some(info) = &self.info else {
      self.done = true;
      return;
    };

    let (start, end) = info.period(&self.rule, self.month, self.day);
    let days: Vec<usize> =
      (start..end).filter(|i| info.day_matches(&self.rule, *i)).collect();
    let filtered = days.len() < end - start;

    let mut out = Vec::new();
    if !self.rule.by_set_pos.is_empty() && !self.times.is_empty() {
      let per_day = self.times.len() as i64;
      for &pos in &self.rule.by_set_pos {
        let flat = if pos < 0 { pos } else { pos - 1 };
        let (day_pos, time_pos) = (flat.div_euclid(per_day), flat.rem_euclid(per_day));
        let idx = if day_pos < 0 { days.len() as i64 + day_pos } else { day_pos };
        let Some(day) = usize::try_from(idx).ok().and_then(|i| days.get(i)) else {
          continue;
        };
        if let Some(date) = info.date(*day) {
          let dt = date.and_time(self.times[time_pos as usize]);
          if !out.contains(&dt) {
            out.push(dt);
          }
        }
      }
      out.sort_unstable();
    } else {
      for &day in &days {
        let Some(date) = info.date(day) else { continue };
        out.extend(self.times.iter().map(|t| date.and_time(*t)));
      }
    }

    for dt in out {
      if !self.emit(dt) {
        return;
      }
    }

    self.advance(filtered);
  }

  fn advance(&mut self, mut filtered: bool) {
    let interval = self.rule.interval;
    let mut fix_day = false;

    match self.rule.freq {
      Frequency::Yearly => {
        self.year += interval as i64;
        if self.year > MAX_YEAR {
          self.done = true;
          return;
        }
        self.rebuild();
      }
      Frequency::Monthly => {
        let months = u64::from(self.month - 1) + interval;
        self.year += (months / 12) as i64;
        self.month = (months % 12) as u32 + 1;
        if self.year > MAX_YEAR {
          self.done = true;
          return;
        }
        self.rebuild();
      }
      Frequency::Weekly => {
        let wkst = self.rule.wkst;
        let back = if wkst > self.weekday {
          self.weekday + 7 - wkst
        } else {
          self.weekday - wkst
        };
        self.day = self.day + interval * 7 - u64::from(back);
        self.weekday = wkst;
        fix_day = true;
      }
      Frequency::Daily => {
        self.day += interval;
        fix_day = true;
      }
      Frequency::Hourly => {
        if filtered {
          // Skip to the last step of the day.
          self.hour += ((23 - self.hour) / interval) * interval;
        }
        let (days, hour) = if self.rule.by_hour.is_empty() {
          ((self.hour + interval) / 24, (self.hour + interval) % 24)
        } else {
          let Some(next) = mod_distance(self.hour, &self.rule.by_hour, 24, interval)
          else {
            self.done = true;
            return;
          };
          next
        };
        self.hour = hour;
        if days > 0 {
          self.day += days;
          fix_day = true;
        }
        self.times = self.rule.period_times(self.hour, self.minute, self.second);
      }
      Frequency::Minutely => {
        if filtered {
          self.minute +=
            ((1439 - (self.hour * 60 + self.minute)) / interval) * interval;
        }
        let rep_rate = 24 * 60;
        let mut valid = false;
        for _ in 0..rep_rate / gcd(interval, rep_rate) {
          let (hours, minute) = if self.rule.by_minute.is_empty() {
            ((self.minute + interval) / 60, (self.minute + interval) % 60)
          } else {
            let Some(next) =
              mod_distance(self.minute, &self.rule.by_minute, 60, interval)
            else {
              break;
            };
            next
          };
          self.minute = minute;
          let total = self.hour + hours;
          self.hour = total % 24;
          if total / 24 > 0 {
            self.day += total / 24;
            fix_day = true;
            filtered = false;
          }
          if self.rule.by_hour.is_empty()
            || self.rule.by_hour.contains(&(self.hour as u32))
          {
            valid = true;
            break;
          }
        }
        if !valid {
          self.done = true;
          return;
        }
        self.times = self.rule.period_times(self.hour, self.minute, self.second);
      }
      Frequency::Secondly => {
        if filtered {
          self.second += ((86399
            - (self.hour * 3600 + self.minute * 60 + self.second))
            / interval)
            * interval;
        }
        let rep_rate = 24 * 3600;
        let mut valid = false;
        for _ in 0..rep_rate / gcd(interval, rep_rate) {
          let (minutes, second) = if self.rule.by_second.is_empty() {
            ((self.second + interval) / 60, (self.second + interval) % 60)
          } else {
            let Some(next) =
              mod_distance(self.second, &self.rule.by_second, 60, interval)
            else {
              break;
            };
            next
          };
          self.second = second;
          let total = self.minute + minutes;
          self.minute = total % 60;
          if total / 60 > 0 {
            let hours = self.hour + total / 60;
            self.hour = hours % 24;
            if hours / 24 > 0 {
              self.day += hours / 24;
              fix_day = true;
            }
          }
          let ok = |set: &[u32], v: u64| set.is_empty() || set.contains(&(v as u32));
          if ok(&self.rule.by_hour[..], self.hour)
            && ok(&self.rule.by_minute[..], self.minute)
            && ok(&self.rule.by_second[..], self.second)
          {
            valid = true;
            break;
          }
        }
        if !valid {
          self.done = true;
          return;
        }
        self.times = self.rule.period_times(self.hour, self.minute, self.second);
      }
    }

    if fix_day && self.day > 28 {
      let mut dim = u64::from(days_in_month(self.year as i32, self.month));
      if self.day > dim {
        while self.day > dim {
          self.day -= dim;
          self.month += 1;
          if self.month == 13 {
            self.month = 1;
            self.year += 1;
            if self.year > MAX_YEAR {
              self.done = true;
              return;
            }
          }
          dim = u64::from(days_in_month(self.year as i32, self.month));
        }
        self.rebuild();
      }
    }
  }

  fn rebuild(&mut self) {
    let (year, month) = (self.year as i32, self.month);
    let rebuilt = match &mut self.info {
      Some(info) => info.rebuild(&self.rule, year, month).is_some(),
      None => false,
    };
    if !rebuilt {
      self.done = true;
    }
  }
}

impl Iterator for RuleIter {
  type Item = NaiveDateTime;

  fn next(&mut self) -> Option<NaiveDateTime> {
    loop {
      if let Some(dt) = self.buffer.pop_front() {
        return Some(dt);
      }
      if self.done {
        return None;
      }
      self.step();
    }
  }
}

// ─── Rule entry points ───────────────────────────────────────────────────────

impl RecurrenceRule {
  /// Day-of-year offsets (0-based) in `year` that fall in `month` and pass
  /// the rule's day-level filters when anchored at `anchor`.
  ///
  /// Time-of-day parts and BYSETPOS are not applied. An invalid month
  /// yields no candidates.
  pub fn candidates(&self, anchor: NaiveDateTime, year: i32, month: u32) -> Vec<u32> {
    if !(1..=12).contains(&month) {
      return Vec::new();
    }
    let rule = Effective::resolve(self, anchor, utc());
    let Some(info) = YearInfo::new(&rule, year, month) else {
      return Vec::new();
    };
    (info.month_range[month as usize - 1]..info.month_range[month as usize])
      .filter(|i| info.day_matches(&rule, *i))
      .map(|i| i as u32)
      .collect()
  }

  /// All occurrences from `anchor` on. A `Z`-suffixed UNTIL is compared as
  /// a UTC wall-clock time.
  pub fn iter(&self, anchor: NaiveDateTime) -> Result<RuleIter> {
    self.iter_in(anchor, utc())
  }

  /// All occurrences from `anchor` on, with `anchor` expressed in `offset`.
  pub(crate) fn iter_in(
    &self,
    anchor: NaiveDateTime,
    offset: FixedOffset,
  ) -> Result<RuleIter> {
    self.validate()?;
    Ok(RuleIter::new(Effective::resolve(self, anchor, offset), anchor))
  }

  /// Occurrences in the half-open range `[start, end)`.
  pub fn expand(
    &self,
    anchor: NaiveDateTime,
    start: NaiveDateTime,
    end: NaiveDateTime,
  ) -> Result<impl Iterator<Item = NaiveDateTime> + use<>> {
    Ok(
      self
        .iter(anchor)?
        .skip_while(move |dt| *dt < start)
        .take_while(move |dt| *dt < end),
    )
  }
}

fn utc() -> FixedOffset { Utc.fix() }
