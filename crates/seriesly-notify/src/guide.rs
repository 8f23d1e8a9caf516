//! The episode guide: turns an upstream [`ShowSchedule`] into a
//! [`RecurrenceSet`] and materialises [`Airing`]s from it.
//!
//! Rules expand in the show's local wall-clock time. Each occurrence is then
//! resolved to UTC in the show's time zone, so a 21:00 slot stays at 21:00
//! local across daylight-saving changes.

use std::collections::HashMap;

use chrono::{DateTime, LocalResult, NaiveDateTime, Offset as _, TimeDelta, TimeZone as _, Utc};
use chrono_tz::Tz;
use seriesly_core::airing::{Airing, ShowSchedule};
use seriesly_ical::{RecurrenceSet, Start, parse_rule};

/// Build the recurrence set of a show.
///
/// Rules that do not parse are skipped with a warning; the rest of the
/// schedule still produces airings. UTC `UNTIL` values are compared in the
/// offset in effect at `DTSTART`.
pub fn recurrence_set(schedule: &ShowSchedule) -> RecurrenceSet {
  let tz = schedule.timezone;
  let offset = tz
    .offset_from_utc_datetime(&to_utc(tz, schedule.dtstart).naive_utc())
    .fix();

  let anchor = if schedule.all_day {
    Start::Date(schedule.dtstart.date())
  } else {
    Start::DateTime(schedule.dtstart)
  };
  let mut set = RecurrenceSet::new(anchor).with_offset(offset);
  if let Some(minutes) = schedule.duration_minutes {
    set = set.with_duration(TimeDelta::minutes(i64::from(minutes)));
  }

  for (text, exclusion) in schedule
    .rrules
    .iter()
    .map(|r| (r, false))
    .chain(schedule.exrules.iter().map(|r| (r, true)))
  {
    match parse_rule(text).and_then(|rule| set.add(rule, exclusion)) {
      Ok(()) => {}
      Err(error) => tracing::warn!(
        show_id = %schedule.show_id,
        rule = %text,
        %error,
        "skipping unusable recurrence rule"
      ),
    }
  }

  for episode in &schedule.episodes {
    set.rdate(normalise(schedule, episode.airs_at));
  }
  for exdate in &schedule.exdates {
    set.exdate(normalise(schedule, *exdate));
  }
  set
}

/// All-day shows air at local midnight.
fn normalise(schedule: &ShowSchedule, dt: NaiveDateTime) -> NaiveDateTime {
  if schedule.all_day { dt.date().and_time(chrono::NaiveTime::MIN) } else { dt }
}

/// Resolve a wall-clock time in `tz` to UTC.
///
/// A time repeated when clocks go back takes the earlier instant. A time
/// skipped when clocks go forward is shifted forward by the length of the
/// gap, e.g. 02:30 on a spring-forward night becomes 03:30.
pub fn to_utc(tz: Tz, local: NaiveDateTime) -> DateTime<Utc> {
  match tz.from_local_datetime(&local) {
    LocalResult::Single(dt) => dt.with_timezone(&Utc),
    LocalResult::Ambiguous(earliest, _) => earliest.with_timezone(&Utc),
    LocalResult::None => {
      let before = tz
        .offset_from_utc_datetime(&(local - TimeDelta::days(1)))
        .fix();
      Utc.from_utc_datetime(&(local - TimeDelta::seconds(i64::from(before.local_minus_utc()))))
    }
  }
}

/// Airings of `schedule` starting in `[from, to)`, ascending by UTC start.
///
/// Explicit episodes label the airing that starts at their local air time.
pub fn airings(schedule: &ShowSchedule, from: DateTime<Utc>, to: DateTime<Utc>) -> Vec<Airing> {
  let set = recurrence_set(schedule);
  let tz = schedule.timezone;
  // Local time is not monotonic in UTC across DST changes: widen the local
  // window by a day and filter on the resolved instant.
  let local_from = from.with_timezone(&tz).naive_local() - TimeDelta::days(1);
  let local_to = to.with_timezone(&tz).naive_local() + TimeDelta::days(1);

  let labels: HashMap<NaiveDateTime, String> = schedule
    .episodes
    .iter()
    .filter_map(|e| e.label().map(|l| (normalise(schedule, e.airs_at), l)))
    .collect();

  let mut airings: Vec<Airing> = set
    .occurrences()
    .skip_while(|o| o.start < local_from)
    .take_while(|o| o.start < local_to)
    .map(|o| (to_utc(tz, o.start), o))
    .filter(|(starts_at, _)| from <= *starts_at && *starts_at < to)
    .map(|(starts_at, o)| Airing {
      show_id:          schedule.show_id.clone(),
      show_title:       schedule.title.clone(),
      episode:          labels.get(&o.start).cloned(),
      starts_at,
      local_start:      o.start,
      all_day:          o.all_day,
      duration_minutes: schedule.duration_minutes,
      network:          schedule.network.clone(),
    })
    .collect();
  airings.sort_by_key(|a| a.starts_at);
  airings
}

#[cfg(test)]
mod tests {
  use chrono::{NaiveDate, TimeZone};
  use chrono_tz::America::New_York;
  use seriesly_core::airing::EpisodeRecord;

  use super::*;

  fn local(y: i32, m: u32, d: u32, h: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(y, m, d)
      .unwrap()
      .and_hms_opt(h, 0, 0)
      .unwrap()
  }

  fn thursdays() -> ShowSchedule {
    let mut s = ShowSchedule::new("severance", "Severance", local(2024, 1, 4, 21));
    s.timezone = New_York;
    s.duration_minutes = Some(50);
    s.rrules = vec!["FREQ=WEEKLY;BYDAY=TH;COUNT=10".into()];
    s
  }

  #[test]
  fn airings_are_pinned_to_utc() {
    let from = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
    let to = Utc.with_ymd_and_hms(2024, 1, 20, 0, 0, 0).unwrap();
    let got = airings(&thursdays(), from, to);
    assert_eq!(got.len(), 3);
    assert_eq!(got[0].local_start, local(2024, 1, 4, 21));
    assert_eq!(got[0].starts_at, Utc.with_ymd_and_hms(2024, 1, 5, 2, 0, 0).unwrap());
    assert_eq!(got[0].duration_minutes, Some(50));
  }

  #[test]
  fn window_is_half_open_in_utc() {
    let first = Utc.with_ymd_and_hms(2024, 1, 5, 2, 0, 0).unwrap();
    let got = airings(&thursdays(), first, first + TimeDelta::days(7));
    assert_eq!(got.len(), 1);
    assert_eq!(got[0].starts_at, first);
  }

  #[test]
  fn episodes_label_and_extend_the_rule() {
    let mut s = thursdays();
    s.episodes = vec![
      EpisodeRecord {
        airs_at: local(2024, 1, 11, 21),
        season:  Some(2),
        number:  Some(1),
        title:   Some("Hello, Ms. Cobel".into()),
      },
      EpisodeRecord {
        airs_at: local(2024, 1, 13, 20),
        season:  Some(2),
        number:  Some(2),
        title:   None,
      },
    ];
    s.exdates = vec![local(2024, 1, 18, 21)];

    let from = Utc.with_ymd_and_hms(2024, 1, 10, 0, 0, 0).unwrap();
    let to = Utc.with_ymd_and_hms(2024, 1, 27, 0, 0, 0).unwrap();
    let got = airings(&s, from, to);
    let starts: Vec<_> = got.iter().map(|a| a.local_start).collect();
    assert_eq!(starts, vec![
      local(2024, 1, 11, 21),
      local(2024, 1, 13, 20),
      local(2024, 1, 25, 21),
    ]);
    assert_eq!(got[0].episode.as_deref(), Some("S02E01 Hello, Ms. Cobel"));
    assert_eq!(got[1].episode.as_deref(), Some("S02E02"));
    assert_eq!(got[2].episode, None);
  }

  #[test]
  fn broken_rules_are_skipped() {
    let mut s = thursdays();
    s.rrules.push("FREQ=SOMETIMES".into());
    s.exrules.push("FREQ=DAILY;COUNT=1;UNTIL=20240101".into());
    let set = recurrence_set(&s);
    assert_eq!(set.rrules.len(), 1);
    assert!(set.exrules.is_empty());
  }

  #[test]
  fn all_day_shows_air_at_midnight() {
    let mut s = ShowSchedule::new("derby", "Derby Day", local(2024, 5, 4, 15));
    s.all_day = true;
    s.rrules = vec!["FREQ=YEARLY".into()];
    let from = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
    let to = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
    let got = airings(&s, from, to);
    assert_eq!(got.len(), 2);
    assert!(got.iter().all(|a| a.all_day));
    assert_eq!(got[1].local_start, local(2025, 5, 4, 0));
  }

  #[test]
  fn airings_keep_local_time_across_daylight_saving() {
    let mut s = ShowSchedule::new("severance", "Severance", local(2024, 1, 4, 21));
    s.timezone = New_York;
    s.rrules = vec!["FREQ=WEEKLY;BYDAY=TH".into()];

    // Clocks go forward on 2024-03-10.
    let from = Utc.with_ymd_and_hms(2024, 3, 2, 0, 0, 0).unwrap();
    let to = Utc.with_ymd_and_hms(2024, 3, 16, 0, 0, 0).unwrap();
    let got = airings(&s, from, to);
    let starts: Vec<_> = got.iter().map(|a| a.starts_at).collect();
    assert_eq!(starts, vec![
      Utc.with_ymd_and_hms(2024, 3, 8, 2, 0, 0).unwrap(),
      Utc.with_ymd_and_hms(2024, 3, 15, 1, 0, 0).unwrap(),
    ]);
    assert!(got.iter().all(|a| a.local_start.format("%H:%M").to_string() == "21:00"));

    let from = Utc.with_ymd_and_hms(2024, 7, 1, 0, 0, 0).unwrap();
    let got = airings(&s, from, from + TimeDelta::days(7));
    assert_eq!(got.len(), 1);
    assert_eq!(got[0].local_start, local(2024, 7, 4, 21));
    assert_eq!(got[0].starts_at, Utc.with_ymd_and_hms(2024, 7, 5, 1, 0, 0).unwrap());
  }

  #[test]
  fn repeated_and_skipped_local_times() {
    let at = |y, m, d, h, mi| {
      NaiveDate::from_ymd_opt(y, m, d)
        .unwrap()
        .and_hms_opt(h, mi, 0)
        .unwrap()
    };
    // 01:30 happens twice on 2024-11-03; the EDT instant comes first.
    assert_eq!(
      to_utc(New_York, at(2024, 11, 3, 1, 30)),
      Utc.with_ymd_and_hms(2024, 11, 3, 5, 30, 0).unwrap()
    );
    // 02:30 never happens on 2024-03-10; it lands at 03:30 EDT.
    assert_eq!(
      to_utc(New_York, at(2024, 3, 10, 2, 30)),
      Utc.with_ymd_and_hms(2024, 3, 10, 7, 30, 0).unwrap()
    );
    assert_eq!(
      to_utc(New_York, at(2024, 3, 10, 3, 30)),
      Utc.with_ymd_and_hms(2024, 3, 10, 7, 30, 0).unwrap()
    );
  }

  #[test]
  fn daily_slot_inside_the_gap_stays_in_order() {
    let dtstart = local(2024, 3, 8, 2) + TimeDelta::minutes(30);
    let mut s = ShowSchedule::new("late", "Late Show", dtstart);
    s.timezone = New_York;
    s.rrules = vec!["FREQ=DAILY;COUNT=4".into()];
    let from = Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap();
    let to = Utc.with_ymd_and_hms(2024, 3, 20, 0, 0, 0).unwrap();
    let got = airings(&s, from, to);
    assert_eq!(got.len(), 4);
    assert!(got.windows(2).all(|w| w[0].starts_at < w[1].starts_at));
    // 02:30 EST, then 02:30 shifted to 03:30 EDT, then 02:30 EDT.
    assert_eq!(got[1].starts_at, Utc.with_ymd_and_hms(2024, 3, 9, 7, 30, 0).unwrap());
    assert_eq!(got[2].starts_at, Utc.with_ymd_and_hms(2024, 3, 10, 7, 30, 0).unwrap());
    assert_eq!(got[3].starts_at, Utc.with_ymd_and_hms(2024, 3, 11, 6, 30, 0).unwrap());
  }
}
