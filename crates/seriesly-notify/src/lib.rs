//! Air-date notifications for Seriesly.
//!
//! Ties the recurrence engine to subscribers: an [`OccurrenceCache`] of
//! airings per show, a [`NotificationScheduler`] that works out what is due
//! on each channel, a [`DeliveryDispatcher`] with webhook and mail
//! transports, and an axum [`Router`] serving per-subscriber calendar feeds.

pub mod cache;
pub mod dispatcher;
pub mod error;
pub mod feed;
pub mod guide;
pub mod mail;
pub mod payload;
pub mod revision;
pub mod scheduler;
pub mod settings;
pub mod source;
pub mod webhook;

#[cfg(test)]
mod testing;

pub use cache::{CacheError, OccurrenceCache};
pub use dispatcher::{DeliveryDispatcher, DeliveryError, Transport};
pub use error::Error;
pub use scheduler::{ChannelOutcome, ChannelPhase, NotificationScheduler, SubscriberReport};
pub use settings::WorkerConfig;

use std::sync::Arc;

use axum::{
  Router,
  routing::{get, post},
};
use seriesly_core::{source::ScheduleSource, store::SubscriberStore};
use settings::SchedulerConfig;

// ─── Application state ───────────────────────────────────────────────────────

/// Shared state threaded through the feed handlers.
pub struct AppState<S, St> {
  pub cache:    Arc<OccurrenceCache<S>>,
  pub store:    Arc<St>,
  pub settings: Arc<SchedulerConfig>,
}

impl<S, St> Clone for AppState<S, St> {
  fn clone(&self) -> Self {
    Self {
      cache:    self.cache.clone(),
      store:    self.store.clone(),
      settings: self.settings.clone(),
    }
  }
}

// ─── Router ──────────────────────────────────────────────────────────────────

/// Build the calendar feed [`Router`], including the schedule change hook.
pub fn router<S, St>(state: AppState<S, St>) -> Router
where
  S: ScheduleSource + 'static,
  St: SubscriberStore + 'static,
{
  Router::new()
    .route("/feeds/{file}",              get(feed::handler::<S, St>))
    .route("/shows/{show_id}/revision", post(revision::handler::<S, St>))
    .route("/healthz",                   get(|| async { "ok" }))
    .with_state(state)
}

#[cfg(test)]
mod tests {
  use axum::{
    body::Body,
    http::{Request, StatusCode, header},
  };
  use chrono::Utc;
  use seriesly_core::store::SubscriberStore;
  use seriesly_store_sqlite::SqliteStore;
  use tower::ServiceExt as _;
  use uuid::Uuid;

  use super::*;
  use crate::{
    settings::CacheConfig,
    testing::{MockSource, weekly},
  };

  async fn make_state() -> AppState<MockSource, SqliteStore> {
    let today = Utc::now().date_naive().and_hms_opt(20, 0, 0).unwrap();
    let source = Arc::new(MockSource::with([weekly("lost", today)]));
    let store = SqliteStore::open_in_memory().await.unwrap();
    AppState {
      cache:    Arc::new(OccurrenceCache::new(source, CacheConfig::default())),
      store:    Arc::new(store),
      settings: Arc::new(SchedulerConfig::default()),
    }
  }

  async fn oneshot(
    state:   AppState<MockSource, SqliteStore>,
    uri:     &str,
    headers: Vec<(header::HeaderName, &str)>,
  ) -> axum::response::Response {
    let mut builder = Request::builder().method("GET").uri(uri);
    for (k, v) in headers {
      builder = builder.header(k, v);
    }
    let req = builder.body(Body::empty()).unwrap();
    router(state).oneshot(req).await.unwrap()
  }

  async fn post_json(
    state: AppState<MockSource, SqliteStore>,
    uri:   &str,
    body:  &'static str,
  ) -> axum::response::Response {
    let req = Request::builder()
      .method("POST")
      .uri(uri)
      .header(header::CONTENT_TYPE, "application/json")
      .body(Body::from(body))
      .unwrap();
    router(state).oneshot(req).await.unwrap()
  }

  async fn body_string(resp: axum::response::Response) -> String {
    let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
  }

  #[tokio::test]
  async fn healthz_is_ok() {
    let resp = oneshot(make_state().await, "/healthz", vec![]).await;
    assert_eq!(resp.status(), StatusCode::OK);
  }

  #[tokio::test]
  async fn unknown_subscriber_is_404() {
    let uri = format!("/feeds/{}.ics", Uuid::new_v4());
    let resp = oneshot(make_state().await, &uri, vec![]).await;
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);

    let resp = oneshot(make_state().await, "/feeds/not-a-uuid.ics", vec![]).await;
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
  }

  #[tokio::test]
  async fn feed_serves_ics_with_etag() {
    let state = make_state().await;
    let sub = state.store.add_subscriber().await.unwrap();
    state
      .store
      .track_show(sub.subscriber_id, "lost".into())
      .await
      .unwrap();
    let uri = format!("/feeds/{}.ics", sub.subscriber_id);

    let resp = oneshot(state.clone(), &uri, vec![]).await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(
      resp.headers().get(header::CONTENT_TYPE).unwrap(),
      "text/calendar; charset=utf-8"
    );
    let etag = resp
      .headers()
      .get(header::ETAG)
      .unwrap()
      .to_str()
      .unwrap()
      .to_string();
    let body = body_string(resp).await;
    assert!(body.starts_with("BEGIN:VCALENDAR\r\n"));
    assert!(body.contains("SUMMARY:LOST\r\n"));

    let resp = oneshot(state.clone(), &uri, vec![(header::IF_NONE_MATCH, etag.as_str())]).await;
    assert_eq!(resp.status(), StatusCode::NOT_MODIFIED);
    assert_eq!(resp.headers().get(header::ETAG).unwrap(), etag.as_str());

    let resp = oneshot(state, &uri, vec![(header::IF_NONE_MATCH, "W/\"stale\"")]).await;
    assert_eq!(resp.status(), StatusCode::OK);
  }

  #[tokio::test]
  async fn revision_notice_evicts_cached_airings() {
    let state = make_state().await;
    let resp = post_json(state.clone(), "/shows/lost/revision", r#"{"revision":"r2"}"#).await;
    assert_eq!(resp.status(), StatusCode::NO_CONTENT);

    state.cache.get("lost").await.unwrap();
    let resp = post_json(state.clone(), "/shows/lost/revision", r#"{"revision":"r2"}"#).await;
    assert_eq!(resp.status(), StatusCode::ACCEPTED);

    state.cache.get("lost").await.unwrap();
    let resp = post_json(state.clone(), "/shows/lost/revision", "{}").await;
    assert_eq!(resp.status(), StatusCode::NO_CONTENT);

    let resp = post_json(state, "/shows/lost/revision", "not json").await;
    assert!(resp.status().is_client_error());
  }

  #[tokio::test]
  async fn feed_of_subscriber_without_shows_is_an_empty_calendar() {
    let state = make_state().await;
    let sub = state.store.add_subscriber().await.unwrap();
    let uri = format!("/feeds/{}.ics", sub.subscriber_id);
    let resp = oneshot(state, &uri, vec![]).await;
    assert_eq!(resp.status(), StatusCode::OK);
    let body = body_string(resp).await;
    assert!(!body.contains("BEGIN:VEVENT"));
    assert!(body.ends_with("END:VCALENDAR\r\n"));
  }
}
