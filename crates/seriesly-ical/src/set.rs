//! Recurrence sets: rules and explicit dates merged into one stream.

use std::{
  cmp::Reverse,
  collections::BinaryHeap,
};

use chrono::{
  DateTime, FixedOffset, NaiveDate, NaiveDateTime, Offset, TimeDelta, Utc,
};

use crate::{error::Result, rule::RecurrenceRule};

// ─── Values ──────────────────────────────────────────────────────────────────

/// The anchor of a set: a calendar date for all-day events, or a wall-clock
/// date-time in the set's offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Start {
  Date(NaiveDate),
  DateTime(NaiveDateTime),
}

impl Start {
  pub fn naive(&self) -> NaiveDateTime {
    match self {
      Self::Date(d) => d.and_time(chrono::NaiveTime::MIN),
      Self::DateTime(dt) => *dt,
    }
  }

  pub fn is_date(&self) -> bool { matches!(self, Self::Date(_)) }
}

impl From<NaiveDate> for Start {
  fn from(d: NaiveDate) -> Self { Self::Date(d) }
}

impl From<NaiveDateTime> for Start {
  fn from(dt: NaiveDateTime) -> Self { Self::DateTime(dt) }
}

/// One concrete instance of a recurring event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Occurrence {
  /// Wall-clock start in the set's offset; midnight for all-day events.
  pub start:    NaiveDateTime,
  pub all_day:  bool,
  pub duration: Option<TimeDelta>,
}

/// Something that can be added to a set.
#[derive(Debug, Clone)]
pub enum SetItem {
  Rule(RecurrenceRule),
  Date(NaiveDateTime),
}

impl From<RecurrenceRule> for SetItem {
  fn from(rule: RecurrenceRule) -> Self { Self::Rule(rule) }
}

impl From<NaiveDateTime> for SetItem {
  fn from(dt: NaiveDateTime) -> Self { Self::Date(dt) }
}

impl From<NaiveDate> for SetItem {
  fn from(d: NaiveDate) -> Self { Self::Date(d.and_time(chrono::NaiveTime::MIN)) }
}

// ─── Set ─────────────────────────────────────────────────────────────────────

/// Inclusion and exclusion rules and dates sharing one anchor.
#[derive(Debug, Clone)]
pub struct RecurrenceSet {
  pub anchor:   Start,
  pub offset:   FixedOffset,
  pub duration: Option<TimeDelta>,
  pub rrules:   Vec<RecurrenceRule>,
  pub rdates:   Vec<NaiveDateTime>,
  pub exrules:  Vec<RecurrenceRule>,
  pub exdates:  Vec<NaiveDateTime>,
}

impl RecurrenceSet {
  pub fn new(anchor: impl Into<Start>) -> Self {
    Self {
      anchor:   anchor.into(),
      offset:   Utc.fix(),
      duration: None,
      rrules:   Vec::new(),
      rdates:   Vec::new(),
      exrules:  Vec::new(),
      exdates:  Vec::new(),
    }
  }

  pub fn with_offset(self, offset: FixedOffset) -> Self { Self { offset, ..self } }

  pub fn with_duration(self, duration: TimeDelta) -> Self {
    Self {
      duration: Some(duration),
      ..self
    }
  }

  /// Add a rule or date as an inclusion, or as an exclusion when
  /// `exclusion` is set. Rules are validated first; an invalid rule is
  /// rejected and the set is left unchanged.
  pub fn add(&mut self, item: impl Into<SetItem>, exclusion: bool) -> Result<()> {
    match (item.into(), exclusion) {
      (SetItem::Rule(rule), excl) => {
        rule.validate()?;
        if excl {
          self.exrules.push(rule);
        } else {
          self.rrules.push(rule);
        }
      }
      (SetItem::Date(dt), false) => self.rdates.push(dt),
      (SetItem::Date(dt), true) => self.exdates.push(dt),
    }
    Ok(())
  }

  pub fn rrule(&mut self, rule: RecurrenceRule) -> Result<()> { self.add(rule, false) }

  pub fn exrule(&mut self, rule: RecurrenceRule) -> Result<()> { self.add(rule, true) }

  pub fn rdate(&mut self, dt: NaiveDateTime) { self.rdates.push(dt); }

  pub fn exdate(&mut self, dt: NaiveDateTime) { self.exdates.push(dt); }

  /// A fresh ascending, duplicate-free iteration over the set.
  ///
  /// The stream is unbounded when any inclusion rule has neither COUNT nor
  /// UNTIL.
  pub fn occurrences(&self) -> SetIter {
    let anchor = self.anchor.naive();
    let mut rdates: Vec<_> =
      self.rdates.iter().copied().filter(|d| *d >= anchor).collect();
    rdates.sort_unstable();
    let mut exdates = self.exdates.clone();
    exdates.sort_unstable();

    let mut include: Vec<Cursor> = vec![Box::new(rdates.into_iter())];
    include.extend(self.rule_cursors(&self.rrules, anchor));
    let mut exclude: Vec<Cursor> = vec![Box::new(exdates.into_iter())];
    exclude.extend(self.rule_cursors(&self.exrules, anchor));

    SetIter {
      include: Merge::new(include),
      exclude: Merge::new(exclude),
      last:    None,
      all_day: self.anchor.is_date(),
      duration: self.duration,
    }
  }

  fn rule_cursors<'a>(
    &'a self,
    rules: &'a [RecurrenceRule],
    anchor: NaiveDateTime,
  ) -> impl Iterator<Item = Cursor> + 'a {
    rules.iter().filter_map(move |rule| match rule.iter_in(anchor, self.offset) {
      Ok(it) => Some(Box::new(it) as Cursor),
      Err(error) => {
        tracing::warn!(%rule, %error, "skipping invalid recurrence rule");
        None
      }
    })
  }

  /// The last occurrence before `ts` (or at `ts` when `inclusive`).
  pub fn before(&self, ts: NaiveDateTime, inclusive: bool) -> Option<Occurrence> {
    self
      .occurrences()
      .take_while(|o| if inclusive { o.start <= ts } else { o.start < ts })
      .last()
  }

  /// The first occurrence after `ts` (or at `ts` when `inclusive`).
  pub fn after(&self, ts: NaiveDateTime, inclusive: bool) -> Option<Occurrence> {
    self
      .occurrences()
      .find(|o| if inclusive { o.start >= ts } else { o.start > ts })
  }

  /// All occurrences between `start` and `end`, bounds included when
  /// `inclusive`.
  pub fn between(
    &self,
    start: NaiveDateTime,
    end: NaiveDateTime,
    inclusive: bool,
  ) -> Vec<Occurrence> {
    self
      .occurrences()
      .take_while(|o| if inclusive { o.start <= end } else { o.start < end })
      .filter(|o| if inclusive { o.start >= start } else { o.start > start })
      .collect()
  }

  /// The instant an occurrence starts at.
  pub fn to_utc(&self, occurrence: &Occurrence) -> DateTime<Utc> {
    (occurrence.start - TimeDelta::seconds(i64::from(self.offset.local_minus_utc())))
      .and_utc()
  }
}

// ─── Iteration ───────────────────────────────────────────────────────────────

type Cursor = Box<dyn Iterator<Item = NaiveDateTime> + Send>;

/// A k-way merge over ascending cursors. Equal values from different cursors
/// are all yielded; callers collapse them.
struct Merge {
  cursors: Vec<Cursor>,
  heap:    BinaryHeap<Reverse<(NaiveDateTime, usize)>>,
}

impl Merge {
  fn new(mut cursors: Vec<Cursor>) -> Self {
    let heap = cursors
      .iter_mut()
      .enumerate()
      .filter_map(|(i, c)| c.next().map(|dt| Reverse((dt, i))))
      .collect();
    Self { cursors, heap }
  }

  fn peek(&self) -> Option<NaiveDateTime> {
    self.heap.peek().map(|Reverse((dt, _))| *dt)
  }

  fn pop(&mut self) -> Option<NaiveDateTime> {
    let Reverse((dt, i)) = self.heap.pop()?;
    if let Some(next) = self.cursors[i].next() {
      self.heap.push(Reverse((next, i)));
    }
    Some(dt)
  }
}

/// Lazy iteration over a [`RecurrenceSet`].
pub struct SetIter {
  include:  Merge,
  exclude:  Merge,
  last:     Option<NaiveDateTime>,
  all_day:  bool,
  duration: Option<TimeDelta>,
}

impl Iterator for SetIter {
  type Item = Occurrence;

  fn next(&mut self) -> Option<Occurrence> {
    while let Some(dt) = self.include.pop() {
      if self.last == Some(dt) {
        continue;
      }
      self.last = Some(dt);
      while self.exclude.peek().is_some_and(|ex| ex < dt) {
        self.exclude.pop();
      }
      if self.exclude.peek() == Some(dt) {
        continue;
      }
      return Some(Occurrence {
        start:    dt,
        all_day:  self.all_day,
        duration: self.duration,
      });
    }
    None
  }
}
