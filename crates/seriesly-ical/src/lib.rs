//! RFC 5545 recurrence engine and iCalendar codec for Seriesly.
//!
//! Expands RRULE / RDATE / EXRULE / EXDATE combinations into a sorted,
//! de-duplicated occurrence stream, reads and writes RRULE text, and exports
//! airings as a VCALENDAR. Pure synchronous; no HTTP or database
//! dependencies.
//!
//! # Quick start
//!
//! ```no_run
//! use chrono::NaiveDate;
//! use seriesly_ical::{RecurrenceSet, parse_rule};
//!
//! let anchor = NaiveDate::from_ymd_opt(2005, 1, 19)
//!   .unwrap()
//!   .and_hms_opt(9, 0, 0)
//!   .unwrap();
//! let mut set = RecurrenceSet::new(anchor);
//! set
//!   .rrule(parse_rule("FREQ=WEEKLY;COUNT=2;INTERVAL=2;BYDAY=TU,TH").unwrap())
//!   .unwrap();
//! for occurrence in set.occurrences() {
//!   println!("{}", occurrence.start);
//! }
//! ```

pub mod error;
mod expand;
mod parse;
mod rule;
mod serialize;
mod set;

pub use error::{Error, Result};
pub use expand::RuleIter;
pub use parse::{parse_rule, parse_set};
pub use rule::{Frequency, RecurrenceRule, Until, WeekdayNum};
pub use serialize::{PRODID, serialize_calendar, serialize_set};
pub use set::{Occurrence, RecurrenceSet, SetItem, SetIter, Start};
