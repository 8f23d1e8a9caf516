//! Test doubles shared by the module tests.

use std::{
  collections::HashMap,
  sync::{
    Arc, Mutex,
    atomic::{AtomicBool, AtomicUsize, Ordering},
  },
};

use chrono::{NaiveDate, NaiveDateTime};
use seriesly_core::{airing::ShowSchedule, source::ScheduleSource};

use crate::{
  dispatcher::{DeliveryError, Transport},
  payload::Payload,
};

pub fn local(y: i32, m: u32, d: u32, h: u32) -> NaiveDateTime {
  NaiveDate::from_ymd_opt(y, m, d)
    .unwrap()
    .and_hms_opt(h, 0, 0)
    .unwrap()
}

/// A weekly show airing at `dtstart`, in UTC.
pub fn weekly(show_id: &str, dtstart: NaiveDateTime) -> ShowSchedule {
  let mut s = ShowSchedule::new(show_id, show_id.to_uppercase(), dtstart);
  s.rrules = vec!["FREQ=WEEKLY".into()];
  s.duration_minutes = Some(30);
  s
}

// ─── Source ──────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
#[error("upstream unavailable: {0}")]
pub struct Unavailable(pub String);

#[derive(Default)]
pub struct MockSource {
  schedules:   Mutex<HashMap<String, ShowSchedule>>,
  pub fetches: Arc<AtomicUsize>,
  failing:     AtomicBool,
}

impl MockSource {
  pub fn with(schedules: impl IntoIterator<Item = ShowSchedule>) -> Self {
    let source = Self::default();
    for s in schedules {
      source.set(s);
    }
    source
  }

  pub fn set(&self, schedule: ShowSchedule) {
    self
      .schedules
      .lock()
      .unwrap()
      .insert(schedule.show_id.clone(), schedule);
  }

  pub fn fail(&self, failing: bool) { self.failing.store(failing, Ordering::SeqCst); }

  pub fn fetch_count(&self) -> usize { self.fetches.load(Ordering::SeqCst) }
}

impl ScheduleSource for MockSource {
  type Error = Unavailable;

  async fn fetch_schedule<'a>(
    &'a self,
    show_id: &'a str,
  ) -> Result<ShowSchedule, Self::Error> {
    self.fetches.fetch_add(1, Ordering::SeqCst);
    if self.failing.load(Ordering::SeqCst) {
      return Err(Unavailable("mock outage".into()));
    }
    self
      .schedules
      .lock()
      .unwrap()
      .get(show_id)
      .cloned()
      .ok_or_else(|| Unavailable(format!("no such show {show_id}")))
  }
}

// ─── Transport ───────────────────────────────────────────────────────────────

#[derive(Clone, Copy)]
pub enum Behaviour {
  Accept,
  Transient,
  Permanent,
}

pub struct MockTransport {
  pub sends:     Arc<AtomicUsize>,
  pub delivered: Arc<Mutex<Vec<(String, Payload)>>>,
  behaviour:     Behaviour,
}

impl MockTransport {
  pub fn new(behaviour: Behaviour) -> Self {
    Self {
      sends: Arc::new(AtomicUsize::new(0)),
      delivered: Arc::new(Mutex::new(Vec::new())),
      behaviour,
    }
  }

  pub fn send_count(&self) -> usize { self.sends.load(Ordering::SeqCst) }
}

#[async_trait::async_trait]
impl Transport for MockTransport {
  async fn send(&self, destination: &str, payload: &Payload) -> Result<(), DeliveryError> {
    self.sends.fetch_add(1, Ordering::SeqCst);
    match self.behaviour {
      Behaviour::Accept => {
        self
          .delivered
          .lock()
          .unwrap()
          .push((destination.to_string(), payload.clone()));
        Ok(())
      }
      Behaviour::Transient => Err(DeliveryError::Transient("mock failure".into())),
      Behaviour::Permanent => Err(DeliveryError::PermanentDestination {
        destination: destination.to_string(),
        reason:      "mock rejection".into(),
      }),
    }
  }

  fn name(&self) -> &str { "mock" }
}
