//! The notification scheduler: decides what is due for a subscriber on each
//! channel, hands it to the dispatcher and records the outcome.
//!
//! Each enabled channel runs through `Idle -> Computing -> Delivering ->
//! Idle` independently. A delivered batch moves the channel watermark to the
//! newest airing it contained; a failed one leaves the watermark alone, so
//! the same airings are offered again on the next run.

use std::{
  collections::{BTreeMap, HashSet},
  fmt,
  sync::Arc,
};

use chrono::{DateTime, Utc};
use seriesly_core::{
  airing::Airing,
  source::ScheduleSource,
  store::SubscriberStore,
  subscriber::{Channel, ChannelSettings, Subscriber},
};
use tokio::task::JoinSet;
use uuid::Uuid;

use crate::{
  cache::OccurrenceCache,
  dispatcher::DeliveryDispatcher,
  payload::{self, Payload, PayloadError},
  settings::SchedulerConfig,
};

// ─── Reports ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelPhase {
  Idle,
  Computing,
  Delivering,
}

impl fmt::Display for ChannelPhase {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(match self {
      Self::Idle => "idle",
      Self::Computing => "computing",
      Self::Delivering => "delivering",
    })
  }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelOutcome {
  /// Nothing newer than the watermark was due.
  NothingDue,
  /// `airings` were delivered and the watermark now stands at `watermark`.
  Delivered {
    airings:   usize,
    watermark: DateTime<Utc>,
  },
  /// The run stopped in `phase`; the watermark did not move.
  Failed {
    phase:    ChannelPhase,
    error:    String,
    disabled: bool,
  },
}

#[derive(Debug, Clone)]
pub struct SubscriberReport {
  pub subscriber_id: Uuid,
  pub channels:      BTreeMap<Channel, ChannelOutcome>,
}

impl SubscriberReport {
  pub fn delivered(&self) -> usize {
    self
      .channels
      .values()
      .filter(|o| matches!(o, ChannelOutcome::Delivered { .. }))
      .count()
  }

  pub fn failed(&self) -> usize {
    self
      .channels
      .values()
      .filter(|o| matches!(o, ChannelOutcome::Failed { .. }))
      .count()
  }
}

// ─── Scheduler ───────────────────────────────────────────────────────────────

pub struct NotificationScheduler<S, St> {
  cache:      Arc<OccurrenceCache<S>>,
  store:      Arc<St>,
  dispatcher: DeliveryDispatcher,
  settings:   SchedulerConfig,
}

impl<S, St> NotificationScheduler<S, St>
where
  S: ScheduleSource + 'static,
  St: SubscriberStore + 'static,
{
  pub fn new(
    cache: Arc<OccurrenceCache<S>>,
    store: Arc<St>,
    dispatcher: DeliveryDispatcher,
    settings: SchedulerConfig,
  ) -> Self {
    Self {
      cache,
      store,
      dispatcher,
      settings,
    }
  }

  /// Airings due per enabled channel at `now`: newer than the channel
  /// watermark and starting before `now + lookahead`, ascending. Channels
  /// with nothing due are absent.
  pub async fn due_notifications(
    &self,
    subscriber: &Subscriber,
    now: DateTime<Utc>,
  ) -> BTreeMap<Channel, Vec<Airing>> {
    if subscriber.shows.is_empty() {
      return BTreeMap::new();
    }
    let all = self.cache.airings_for_shows(&subscriber.shows, now).await;
    self.due_from(subscriber, &all, now)
  }

  fn due_from(
    &self,
    subscriber: &Subscriber,
    all: &[Airing],
    now: DateTime<Utc>,
  ) -> BTreeMap<Channel, Vec<Airing>> {
    let until = now + self.settings.lookahead();
    subscriber
      .enabled_channels()
      .filter_map(|(channel, _)| {
        let watermark = subscriber.watermark(channel);
        let due: Vec<Airing> = all
          .iter()
          .filter(|a| a.starts_at > watermark && a.starts_at < until)
          .cloned()
          .collect();
        (!due.is_empty()).then_some((channel, due))
      })
      .collect()
  }

  fn render(
    &self,
    channel: Channel,
    settings: &ChannelSettings,
    due: &[Airing],
    all: &[Airing],
    now: DateTime<Utc>,
  ) -> Result<Payload, PayloadError> {
    Ok(match channel {
      Channel::Email => payload::mail(due),
      Channel::Xmpp => payload::xmpp(due),
      Channel::Webhook => payload::webhook(due, settings.format)?,
      // The calendar is replaced as a whole.
      Channel::Calendar => payload::calendar(&self.settings.calendar_name, all, now),
    })
  }

  /// Run every enabled channel of `subscriber` once.
  pub async fn run_subscriber(
    &self,
    subscriber: &Subscriber,
    now: DateTime<Utc>,
  ) -> SubscriberReport {
    let id = subscriber.subscriber_id;
    let all = if subscriber.shows.is_empty() {
      Vec::new()
    } else {
      self.cache.airings_for_shows(&subscriber.shows, now).await
    };
    let mut due = self.due_from(subscriber, &all, now);

    let mut channels = BTreeMap::new();
    for (channel, settings) in subscriber.enabled_channels() {
      let outcome = match due.remove(&channel) {
        None => ChannelOutcome::NothingDue,
        Some(airings) => self.run_channel(id, channel, settings, &airings, &all, now).await,
      };
      channels.insert(channel, outcome);
    }

    let report = SubscriberReport {
      subscriber_id: id,
      channels,
    };
    tracing::info!(
      subscriber = %id,
      delivered = report.delivered(),
      failed = report.failed(),
      "subscriber run finished"
    );
    report
  }

  async fn run_channel(
    &self,
    id: Uuid,
    channel: Channel,
    settings: &ChannelSettings,
    due: &[Airing],
    all: &[Airing],
    now: DateTime<Utc>,
  ) -> ChannelOutcome {
    let mut phase = ChannelPhase::Computing;
    tracing::debug!(subscriber = %id, %channel, %phase, due = due.len());

    let payload = match self.render(channel, settings, due, all, now) {
      Ok(p) => p,
      Err(e) => {
        return ChannelOutcome::Failed {
          phase,
          error: e.to_string(),
          disabled: false,
        };
      }
    };

    phase = ChannelPhase::Delivering;
    tracing::debug!(subscriber = %id, %channel, %phase);

    if let Err(e) = self
      .dispatcher
      .deliver(channel, &settings.destination, &payload)
      .await
    {
      let disabled = e.is_permanent() && self.disable(id, channel).await;
      return ChannelOutcome::Failed {
        phase,
        error: e.to_string(),
        disabled,
      };
    }

    let Some(newest) = due.iter().map(|a| a.starts_at).max() else {
      return ChannelOutcome::NothingDue;
    };
    let outcome = match self.store.advance_watermark(id, channel, newest).await {
      Ok(watermark) => ChannelOutcome::Delivered {
        airings: due.len(),
        watermark,
      },
      Err(e) => {
        tracing::error!(
          subscriber = %id,
          %channel,
          error = %e,
          "delivered but watermark not recorded"
        );
        return ChannelOutcome::Failed {
          phase,
          error: e.to_string(),
          disabled: false,
        };
      }
    };
    tracing::debug!(subscriber = %id, %channel, phase = %ChannelPhase::Idle, ?outcome);
    outcome
  }

  async fn disable(&self, id: Uuid, channel: Channel) -> bool {
    match self.store.disable_channel(id, channel).await {
      Ok(()) => {
        tracing::warn!(subscriber = %id, %channel, "destination rejected, channel disabled");
        true
      }
      Err(e) => {
        tracing::error!(subscriber = %id, %channel, error = %e, "could not disable channel");
        false
      }
    }
  }

  /// Run many subscribers concurrently, one task each. A subscriber listed
  /// twice is only run once.
  pub async fn run_batch(
    self: &Arc<Self>,
    subscribers: Vec<Subscriber>,
    now: DateTime<Utc>,
  ) -> Vec<SubscriberReport> {
    let mut seen = HashSet::new();
    let mut tasks = JoinSet::new();
    for subscriber in subscribers {
      if !seen.insert(subscriber.subscriber_id) {
        tracing::warn!(subscriber = %subscriber.subscriber_id, "already scheduled in this batch");
        continue;
      }
      let scheduler = Arc::clone(self);
      tasks.spawn(async move { scheduler.run_subscriber(&subscriber, now).await });
    }

    let mut reports = Vec::with_capacity(tasks.len());
    while let Some(joined) = tasks.join_next().await {
      match joined {
        Ok(report) => reports.push(report),
        Err(e) => tracing::error!(error = %e, "subscriber task failed"),
      }
    }
    reports.sort_by_key(|r| r.subscriber_id);
    reports
  }
}
