//! Per-show occurrence cache with a bimodal staleness policy.
//!
//! Entries hold the airings of one show inside
//! `[computed_at - history, computed_at + horizon]`. An entry is fresh for the
//! TTL chosen when it was computed: the short busy TTL inside the configured
//! wall-clock window, the long idle TTL outside it.
//!
//! An entry is also dropped early when the upstream announces a new schedule
//! revision through [`OccurrenceCache::note_revision`].
//!
//! No lock is held while the upstream schedule is fetched, so two callers
//! may recompute the same show concurrently; the last write wins.

use std::{collections::HashMap, sync::Arc};

use chrono::{DateTime, TimeDelta, Timelike, Utc};
use seriesly_core::{airing::Airing, source::ScheduleSource};
use thiserror::Error;
use tokio::sync::RwLock;

use crate::{guide, settings::CacheConfig};

#[derive(Debug, Error)]
pub enum CacheError {
  /// The airings could not be computed and nothing was cached to fall back on.
  #[error("could not compute airings of {show_id}: {reason}")]
  Recomputation { show_id: String, reason: String },
}

// ─── Entries ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct CacheEntry {
  pub show_id:     String,
  pub airings:     Arc<[Airing]>,
  pub computed_at: DateTime<Utc>,
  pub ttl:         TimeDelta,
  pub revision:    Option<String>,
}

impl CacheEntry {
  pub fn is_fresh(&self, now: DateTime<Utc>) -> bool {
    match self.computed_at.checked_add_signed(self.ttl) {
      Some(expires) => now < expires,
      None => true,
    }
  }
}

// ─── Cache ───────────────────────────────────────────────────────────────────

pub struct OccurrenceCache<S> {
  source:  Arc<S>,
  policy:  CacheConfig,
  entries: RwLock<HashMap<String, CacheEntry>>,
}

impl<S: ScheduleSource> OccurrenceCache<S> {
  pub fn new(source: Arc<S>, policy: CacheConfig) -> Self {
    Self {
      source,
      policy,
      entries: RwLock::new(HashMap::new()),
    }
  }

  pub async fn get(&self, show_id: &str) -> Result<Arc<[Airing]>, CacheError> {
    self.get_at(show_id, Utc::now()).await
  }

  /// The airings of `show_id` as seen at `now`, recomputed when missing or
  /// stale. A failed recomputation serves the stale entry if there is one.
  pub async fn get_at(
    &self,
    show_id: &str,
    now: DateTime<Utc>,
  ) -> Result<Arc<[Airing]>, CacheError> {
    if let Some(entry) = self.entries.read().await.get(show_id)
      && entry.is_fresh(now)
    {
      return Ok(entry.airings.clone());
    }

    match self.compute(show_id, now).await {
      Ok(entry) => {
        let airings = entry.airings.clone();
        self.entries.write().await.insert(show_id.to_string(), entry);
        Ok(airings)
      }
      Err(reason) => match self.entries.read().await.get(show_id) {
        Some(stale) => {
          tracing::warn!(
            show_id,
            error = %reason,
            computed_at = %stale.computed_at,
            "recomputation failed, serving stale airings"
          );
          Ok(stale.airings.clone())
        }
        None => Err(CacheError::Recomputation {
          show_id: show_id.to_string(),
          reason,
        }),
      },
    }
  }

  /// Airings of every show in `show_ids` as seen at `now`, ascending by
  /// start and de-duplicated by UID. Shows that cannot be computed are
  /// skipped.
  pub async fn airings_for_shows<'a>(
    &self,
    show_ids: impl IntoIterator<Item = &'a String>,
    now: DateTime<Utc>,
  ) -> Vec<Airing> {
    let mut all = Vec::new();
    for show_id in show_ids {
      match self.get_at(show_id, now).await {
        Ok(airings) => all.extend(airings.iter().cloned()),
        Err(error) => {
          tracing::warn!(show_id = %show_id, %error, "skipping show without airings");
        }
      }
    }
    all.sort_by(|a, b| a.starts_at.cmp(&b.starts_at).then_with(|| a.uid().cmp(&b.uid())));
    all.dedup_by_key(|a| a.uid());
    all
  }

  /// Evict `show_id` if the upstream now reports a revision other than the
  /// one its cached airings were computed from. Returns whether an entry was
  /// evicted; the next lookup recomputes regardless of the entry's TTL.
  pub async fn note_revision(&self, show_id: &str, revision: Option<&str>) -> bool {
    let mut entries = self.entries.write().await;
    let Some(entry) = entries.get(show_id) else {
      return false;
    };
    if entry.revision.as_deref() == revision {
      return false;
    }
    tracing::info!(
      show_id,
      old = ?entry.revision,
      new = ?revision,
      "schedule revision changed, evicting airings"
    );
    entries.remove(show_id);
    true
  }

  pub async fn invalidate(&self, show_id: &str) {
    self.entries.write().await.remove(show_id);
  }

  pub async fn invalidate_all(&self) { self.entries.write().await.clear(); }

  /// The TTL an entry computed at `now` receives.
  pub fn ttl_at(&self, now: DateTime<Utc>) -> TimeDelta {
    let hour = now.with_timezone(&self.policy.timezone).hour();
    let (start, end) = (self.policy.busy_start_hour, self.policy.busy_end_hour);
    let busy = if start <= end {
      start <= hour && hour < end
    } else {
      hour >= start || hour < end
    };
    if busy { self.policy.busy_ttl() } else { self.policy.idle_ttl() }
  }

  async fn compute(&self, show_id: &str, now: DateTime<Utc>) -> Result<CacheEntry, String> {
    let schedule = self
      .source
      .fetch_schedule(show_id)
      .await
      .map_err(|e| e.to_string())?;
    let airings = guide::airings(
      &schedule,
      now - self.policy.history(),
      now + self.policy.horizon(),
    );

    tracing::debug!(show_id, airings = airings.len(), "computed airings");
    Ok(CacheEntry {
      show_id:     show_id.to_string(),
      airings:     airings.into(),
      computed_at: now,
      ttl:         self.ttl_at(now),
      revision:    schedule.revision,
    })
  }
}

#[cfg(test)]
mod tests {
  use chrono::TimeZone;

  use super::*;
  use crate::testing::{MockSource, local, weekly};

  fn policy() -> CacheConfig {
    CacheConfig {
      busy_start_hour: 18,
      busy_end_hour: 23,
      ..CacheConfig::default()
    }
  }

  fn cache(source: MockSource) -> (Arc<MockSource>, OccurrenceCache<MockSource>) {
    let source = Arc::new(source);
    (source.clone(), OccurrenceCache::new(source, policy()))
  }

  fn noon() -> DateTime<Utc> { Utc.with_ymd_and_hms(2024, 3, 4, 12, 0, 0).unwrap() }

  #[tokio::test]
  async fn fresh_entries_are_served_from_cache() {
    let (source, cache) = cache(MockSource::with([weekly("lost", local(2024, 1, 1, 20))]));
    let first = cache.get_at("lost", noon()).await.unwrap();
    let second = cache.get_at("lost", noon() + TimeDelta::minutes(5)).await.unwrap();
    assert_eq!(source.fetch_count(), 1);
    assert_eq!(first, second);
    assert!(!first.is_empty());
  }

  #[tokio::test]
  async fn staleness_boundary() {
    let (source, cache) = cache(MockSource::with([weekly("lost", local(2024, 1, 1, 20))]));
    let t = noon();
    let ttl = cache.ttl_at(t);
    cache.get_at("lost", t).await.unwrap();

    cache.get_at("lost", t + ttl / 2).await.unwrap();
    assert_eq!(source.fetch_count(), 1);

    cache.get_at("lost", t + ttl * 2).await.unwrap();
    assert_eq!(source.fetch_count(), 2);
  }

  #[test]
  fn ttl_follows_the_busy_window() {
    let cache = OccurrenceCache::new(Arc::new(MockSource::default()), policy());
    let at = |h| Utc.with_ymd_and_hms(2024, 3, 4, h, 0, 0).unwrap();
    assert_eq!(cache.ttl_at(at(12)), TimeDelta::hours(6));
    assert_eq!(cache.ttl_at(at(18)), TimeDelta::minutes(20));
    assert_eq!(cache.ttl_at(at(22)), TimeDelta::minutes(20));
    assert_eq!(cache.ttl_at(at(23)), TimeDelta::hours(6));
  }

  #[test]
  fn busy_window_may_wrap_midnight_and_uses_local_time() {
    let policy = CacheConfig {
      busy_start_hour: 22,
      busy_end_hour: 2,
      timezone: chrono_tz::America::New_York,
      ..CacheConfig::default()
    };
    let cache = OccurrenceCache::new(Arc::new(MockSource::default()), policy);
    // 04:00 UTC is 23:00 EST in winter.
    let late = Utc.with_ymd_and_hms(2024, 3, 4, 4, 0, 0).unwrap();
    assert_eq!(cache.ttl_at(late), TimeDelta::minutes(20));
    let morning = Utc.with_ymd_and_hms(2024, 3, 4, 14, 0, 0).unwrap();
    assert_eq!(cache.ttl_at(morning), TimeDelta::hours(6));
    // 02:30 UTC is 22:30 EDT in summer but 21:30 EST in winter.
    let summer = Utc.with_ymd_and_hms(2024, 7, 4, 2, 30, 0).unwrap();
    assert_eq!(cache.ttl_at(summer), TimeDelta::minutes(20));
    let winter = Utc.with_ymd_and_hms(2024, 1, 4, 2, 30, 0).unwrap();
    assert_eq!(cache.ttl_at(winter), TimeDelta::hours(6));
  }

  #[tokio::test]
  async fn failure_serves_stale_entry() {
    let (source, cache) = cache(MockSource::with([weekly("lost", local(2024, 1, 1, 20))]));
    let before = cache.get_at("lost", noon()).await.unwrap();
    source.fail(true);
    let after = cache.get_at("lost", noon() + TimeDelta::days(1)).await.unwrap();
    assert_eq!(source.fetch_count(), 2);
    assert_eq!(before, after);
  }

  #[tokio::test]
  async fn failure_without_entry_is_an_error() {
    let (source, cache) = cache(MockSource::default());
    source.fail(true);
    let err = cache.get_at("lost", noon()).await.unwrap_err();
    let CacheError::Recomputation { show_id, .. } = err;
    assert_eq!(show_id, "lost");
  }

  #[tokio::test]
  async fn invalidation_forces_recomputation_with_new_revision() {
    let mut schedule = weekly("lost", local(2024, 1, 1, 20));
    schedule.revision = Some("r1".into());
    let (source, cache) = cache(MockSource::with([schedule.clone()]));
    let old = cache.get_at("lost", noon()).await.unwrap();

    schedule.revision = Some("r2".into());
    schedule.title = "Lost (remastered)".into();
    source.set(schedule);
    cache.invalidate("lost").await;
    let new = cache.get_at("lost", noon()).await.unwrap();
    assert_eq!(source.fetch_count(), 2);
    assert_ne!(old[0].show_title, new[0].show_title);

    cache.invalidate_all().await;
    cache.get_at("lost", noon()).await.unwrap();
    assert_eq!(source.fetch_count(), 3);
  }

  #[tokio::test]
  async fn changed_revision_evicts_a_fresh_entry() {
    let mut schedule = weekly("lost", local(2024, 1, 1, 20));
    schedule.revision = Some("r1".into());
    let (source, cache) = cache(MockSource::with([schedule.clone()]));
    cache.get_at("lost", noon()).await.unwrap();

    assert!(!cache.note_revision("lost", Some("r1")).await);
    assert!(!cache.note_revision("fringe", Some("r9")).await);
    cache.get_at("lost", noon() + TimeDelta::minutes(1)).await.unwrap();
    assert_eq!(source.fetch_count(), 1);

    schedule.revision = Some("r2".into());
    schedule.rrules = vec!["FREQ=DAILY".into()];
    source.set(schedule);
    assert!(cache.note_revision("lost", Some("r2")).await);

    // Well inside the TTL of the first computation.
    let later = noon() + TimeDelta::minutes(2);
    assert!(later < noon() + cache.ttl_at(noon()));
    let airings = cache.get_at("lost", later).await.unwrap();
    assert_eq!(source.fetch_count(), 2);
    assert!(airings.len() > 5);
    assert!(!cache.note_revision("lost", Some("r2")).await);
  }

  #[tokio::test]
  async fn merged_airings_are_sorted_and_deduplicated() {
    let (_, cache) = cache(MockSource::with([
      weekly("lost", local(2024, 1, 1, 20)),
      weekly("fringe", local(2024, 1, 2, 21)),
    ]));
    let shows: Vec<String> = vec!["fringe".into(), "lost".into(), "lost".into(), "gone".into()];
    let all = cache.airings_for_shows(&shows, noon()).await;
    assert!(all.windows(2).all(|w| w[0].starts_at < w[1].starts_at));
    assert!(all.iter().any(|a| a.show_id == "fringe"));
    let lost = all.iter().filter(|a| a.show_id == "lost").count();
    // One week of history and four weeks ahead.
    assert_eq!(lost, 5);
  }
}
