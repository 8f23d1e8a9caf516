//! Schedule change notices: `POST /shows/{show_id}/revision`.
//!
//! The upstream provider calls this when a show's schedule is edited. A
//! revision other than the cached one evicts the show's airings so the next
//! feed or notification run recomputes them.

use axum::{
  Json,
  extract::{Path, State},
  http::StatusCode,
};
use seriesly_core::{source::ScheduleSource, store::SubscriberStore};
use serde::Deserialize;

use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct RevisionNotice {
  #[serde(default)]
  pub revision: Option<String>,
}

/// `202 Accepted` when cached airings were evicted, `204 No Content` when
/// nothing was cached or the revision is unchanged.
pub async fn handler<S, St>(
  State(state): State<AppState<S, St>>,
  Path(show_id): Path<String>,
  Json(notice): Json<RevisionNotice>,
) -> StatusCode
where
  S: ScheduleSource + 'static,
  St: SubscriberStore + 'static,
{
  if state
    .cache
    .note_revision(&show_id, notice.revision.as_deref())
    .await
  {
    StatusCode::ACCEPTED
  } else {
    StatusCode::NO_CONTENT
  }
}
