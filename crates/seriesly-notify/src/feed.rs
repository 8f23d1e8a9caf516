//! Calendar feed handlers: `GET /feeds/{subscriber_id}.ics`.

use axum::{
  body::Body,
  extract::{Path, State},
  http::{HeaderMap, HeaderValue, StatusCode, header},
  response::Response,
};
use chrono::Utc;
use seriesly_core::{airing::Airing, source::ScheduleSource, store::SubscriberStore};
use seriesly_ical::serialize_calendar;
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::{AppState, error::Error};

/// Compute a weak ETag over the feed's airings.
///
/// `DTSTAMP` changes on every render, so only the event data is hashed.
pub fn compute_etag(airings: &[Airing]) -> String {
  let mut hasher = Sha256::new();
  for airing in airings {
    hasher.update(airing.uid().as_bytes());
    hasher.update([0]);
    hasher.update(airing.summary().as_bytes());
    hasher.update([0]);
    hasher.update(airing.duration_minutes.unwrap_or(0).to_le_bytes());
    hasher.update([u8::from(airing.all_day)]);
    hasher.update(airing.network.as_deref().unwrap_or_default().as_bytes());
    hasher.update([0xff]);
  }
  format!("W/\"{}\"", hex::encode(hasher.finalize()))
}

/// Whether an `If-None-Match` header value matches `etag` (weak comparison).
fn matches_etag(if_none_match: &str, etag: &str) -> bool {
  let opaque = |tag: &str| tag.trim().trim_start_matches("W/").to_string();
  let ours = opaque(etag);
  if_none_match
    .split(',')
    .any(|candidate| candidate.trim() == "*" || opaque(candidate) == ours)
}

/// Parse `"{uuid}.ics"`.
fn parse_feed_name(file: &str) -> Result<Uuid, Error> {
  file
    .strip_suffix(".ics")
    .and_then(|id| Uuid::parse_str(id).ok())
    .ok_or(Error::NotFound)
}

pub async fn handler<S, St>(
  State(state): State<AppState<S, St>>,
  Path(file): Path<String>,
  headers: HeaderMap,
) -> Result<Response, Error>
where
  S: ScheduleSource + 'static,
  St: SubscriberStore + 'static,
{
  let id = parse_feed_name(&file)?;
  let subscriber = state
    .store
    .get_subscriber(id)
    .await
    .map_err(|e| Error::Store(Box::new(e)))?
    .ok_or(Error::NotFound)?;

  let now = Utc::now();
  let airings = state.cache.airings_for_shows(&subscriber.shows, now).await;
  let etag = compute_etag(&airings);

  if let Some(inm) = headers.get(header::IF_NONE_MATCH).and_then(|v| v.to_str().ok())
    && matches_etag(inm, &etag)
  {
    return Ok(
      Response::builder()
        .status(StatusCode::NOT_MODIFIED)
        .header(header::ETAG, &etag)
        .body(Body::empty())?,
    );
  }

  let ics = serialize_calendar(&state.settings.calendar_name, &airings, now);
  tracing::debug!(subscriber = %id, airings = airings.len(), "serving calendar feed");
  Ok(
    Response::builder()
      .status(StatusCode::OK)
      .header(
        header::CONTENT_TYPE,
        HeaderValue::from_static("text/calendar; charset=utf-8"),
      )
      .header(header::ETAG, &etag)
      .body(Body::from(ics))?,
  )
}
