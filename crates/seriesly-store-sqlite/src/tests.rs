//! Integration tests for `SqliteStore` against an in-memory database.

use chrono::{Duration, TimeZone, Utc};
use seriesly_core::{
  store::SubscriberStore,
  subscriber::{Channel, PayloadFormat},
};
use uuid::Uuid;

use crate::{Error, SqliteStore};

async fn store() -> SqliteStore {
  SqliteStore::open_in_memory()
    .await
    .expect("in-memory store")
}

// ─── Subscribers ─────────────────────────────────────────────────────────────

#[tokio::test]
async fn add_and_get_subscriber() {
  let s = store().await;

  let subscriber = s.add_subscriber().await.unwrap();
  assert!(subscriber.shows.is_empty());
  assert!(subscriber.channels.is_empty());

  let fetched = s.get_subscriber(subscriber.subscriber_id).await.unwrap();
  let Some(fetched) = fetched else { panic!("subscriber missing") };
  assert_eq!(fetched.subscriber_id, subscriber.subscriber_id);
  assert_eq!(fetched.created_at, subscriber.created_at);
}

#[tokio::test]
async fn get_subscriber_missing_returns_none() {
  let s = store().await;
  assert!(s.get_subscriber(Uuid::new_v4()).await.unwrap().is_none());
}

#[tokio::test]
async fn list_subscribers_includes_shows_and_channels() {
  let s = store().await;
  let a = s.add_subscriber().await.unwrap();
  let b = s.add_subscriber().await.unwrap();
  s.track_show(a.subscriber_id, "severance".into()).await.unwrap();
  s.track_show(b.subscriber_id, "andor".into()).await.unwrap();
  s.configure_channel(
    b.subscriber_id,
    Channel::Webhook,
    "https://hooks.example.com/x".into(),
    PayloadFormat::Json,
  )
  .await
  .unwrap();

  let all = s.list_subscribers().await.unwrap();
  assert_eq!(all.len(), 2);
  let Some(b) = all.iter().find(|x| x.subscriber_id == b.subscriber_id) else {
    panic!("second subscriber missing")
  };
  assert!(b.shows.contains("andor"));
  assert_eq!(b.channels[&Channel::Webhook].format, PayloadFormat::Json);
}

// ─── Shows ───────────────────────────────────────────────────────────────────

#[tokio::test]
async fn track_and_untrack_are_idempotent() {
  let s = store().await;
  let sub = s.add_subscriber().await.unwrap();
  let id = sub.subscriber_id;

  s.track_show(id, "severance".into()).await.unwrap();
  s.track_show(id, "severance".into()).await.unwrap();
  s.track_show(id, "andor".into()).await.unwrap();
  let fetched = s.get_subscriber(id).await.unwrap().unwrap();
  assert_eq!(fetched.shows.len(), 2);

  s.untrack_show(id, "andor".into()).await.unwrap();
  s.untrack_show(id, "andor".into()).await.unwrap();
  let fetched = s.get_subscriber(id).await.unwrap().unwrap();
  assert_eq!(fetched.shows.len(), 1);
}

#[tokio::test]
async fn tracking_for_unknown_subscriber_fails() {
  let s = store().await;
  let err = s.track_show(Uuid::new_v4(), "x".into()).await.unwrap_err();
  assert!(matches!(err, Error::SubscriberNotFound(_)));
}

// ─── Channels ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn reconfiguring_reenables_and_keeps_watermark() {
  let s = store().await;
  let id = s.add_subscriber().await.unwrap().subscriber_id;
  s.configure_channel(id, Channel::Email, "a@example.com".into(), PayloadFormat::Xml)
    .await
    .unwrap();

  let mark = Utc.with_ymd_and_hms(2024, 3, 1, 20, 0, 0).unwrap();
  s.advance_watermark(id, Channel::Email, mark).await.unwrap();
  s.disable_channel(id, Channel::Email).await.unwrap();

  let fetched = s.get_subscriber(id).await.unwrap().unwrap();
  assert!(!fetched.channels[&Channel::Email].enabled);

  s.configure_channel(id, Channel::Email, "b@example.com".into(), PayloadFormat::Xml)
    .await
    .unwrap();
  let fetched = s.get_subscriber(id).await.unwrap().unwrap();
  let settings = &fetched.channels[&Channel::Email];
  assert!(settings.enabled);
  assert_eq!(settings.destination, "b@example.com");
  assert_eq!(settings.watermark, Some(mark));
}

#[tokio::test]
async fn disabling_unconfigured_channel_fails() {
  let s = store().await;
  let id = s.add_subscriber().await.unwrap().subscriber_id;
  let err = s.disable_channel(id, Channel::Xmpp).await.unwrap_err();
  assert!(matches!(err, Error::ChannelNotConfigured { .. }));
}

// ─── Watermarks ──────────────────────────────────────────────────────────────

#[tokio::test]
async fn watermark_never_moves_backwards() {
  let s = store().await;
  let id = s.add_subscriber().await.unwrap().subscriber_id;
  s.configure_channel(id, Channel::Webhook, "https://x.test/".into(), PayloadFormat::Xml)
    .await
    .unwrap();

  let t1 = Utc.with_ymd_and_hms(2024, 3, 1, 20, 0, 0).unwrap();
  let t0 = t1 - Duration::days(2);
  let t2 = t1 + Duration::hours(1);

  assert_eq!(s.advance_watermark(id, Channel::Webhook, t1).await.unwrap(), t1);
  assert_eq!(s.advance_watermark(id, Channel::Webhook, t0).await.unwrap(), t1);
  assert_eq!(s.advance_watermark(id, Channel::Webhook, t2).await.unwrap(), t2);

  let fetched = s.get_subscriber(id).await.unwrap().unwrap();
  assert_eq!(fetched.watermark(Channel::Webhook), t2);
}

#[tokio::test]
async fn watermarks_are_per_channel() {
  let s = store().await;
  let id = s.add_subscriber().await.unwrap().subscriber_id;
  for (c, dest) in [(Channel::Email, "a@example.com"), (Channel::Xmpp, "a@jabber.example")] {
    s.configure_channel(id, c, dest.into(), PayloadFormat::Xml)
      .await
      .unwrap();
  }
  let t = Utc.with_ymd_and_hms(2024, 3, 1, 20, 0, 0).unwrap();
  s.advance_watermark(id, Channel::Email, t).await.unwrap();

  let fetched = s.get_subscriber(id).await.unwrap().unwrap();
  assert_eq!(fetched.watermark(Channel::Email), t);
  assert_eq!(fetched.watermark(Channel::Xmpp), fetched.created_at);
}

#[tokio::test]
async fn advancing_unconfigured_channel_fails() {
  let s = store().await;
  let id = s.add_subscriber().await.unwrap().subscriber_id;
  let err = s
    .advance_watermark(id, Channel::Calendar, Utc::now())
    .await
    .unwrap_err();
  assert!(matches!(err, Error::ChannelNotConfigured { .. }));
}
