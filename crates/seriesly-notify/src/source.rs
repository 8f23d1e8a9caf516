//! [`HttpScheduleSource`]: fetches show schedules as JSON over HTTP.

use std::time::Duration;

use reqwest::{StatusCode, Url};
use seriesly_core::{airing::ShowSchedule, source::ScheduleSource};
use thiserror::Error;

use crate::settings::UpstreamConfig;

#[derive(Debug, Error)]
pub enum SourceError {
  #[error("http error: {0}")]
  Http(#[from] reqwest::Error),
  #[error("invalid upstream url: {0}")]
  Url(String),
  #[error("upstream has no show {0:?}")]
  UnknownShow(String),
  #[error("upstream returned {status} for {show_id:?}")]
  Status { show_id: String, status: StatusCode },
}

/// `GET {base_url}/{show_id}` returning a [`ShowSchedule`] document.
#[derive(Debug, Clone)]
pub struct HttpScheduleSource {
  client:   reqwest::Client,
  base_url: Url,
}

impl HttpScheduleSource {
  pub fn new(settings: &UpstreamConfig) -> Result<Self, SourceError> {
    let mut base_url =
      Url::parse(&settings.base_url).map_err(|e| SourceError::Url(e.to_string()))?;
    if base_url.cannot_be_a_base() {
      return Err(SourceError::Url(settings.base_url.clone()));
    }
    if !base_url.path().ends_with('/') {
      let path = format!("{}/", base_url.path());
      base_url.set_path(&path);
    }
    let client = reqwest::Client::builder()
      .timeout(Duration::from_secs(settings.timeout_secs))
      .build()?;
    Ok(Self { client, base_url })
  }

  fn url_for(&self, show_id: &str) -> Result<Url, SourceError> {
    let mut url = self.base_url.clone();
    url
      .path_segments_mut()
      .map_err(|()| SourceError::Url(self.base_url.to_string()))?
      .pop_if_empty()
      .push(show_id);
    Ok(url)
  }
}

impl ScheduleSource for HttpScheduleSource {
  type Error = SourceError;

  async fn fetch_schedule<'a>(&'a self, show_id: &'a str) -> Result<ShowSchedule, SourceError> {
    let url = self.url_for(show_id)?;
    let response = self.client.get(url).send().await?;
    match response.status() {
      status if status.is_success() => {}
      StatusCode::NOT_FOUND => return Err(SourceError::UnknownShow(show_id.to_string())),
      status => {
        return Err(SourceError::Status {
          show_id: show_id.to_string(),
          status,
        });
      }
    }
    let schedule: ShowSchedule = response.json().await?;
    tracing::debug!(show_id, revision = ?schedule.revision, "fetched schedule");
    Ok(schedule)
  }
}

#[cfg(test)]
mod tests {
  use axum::{Json, Router, extract::Path, http::StatusCode as Status, routing::get};
  use tokio::net::TcpListener;

  use super::*;
  use crate::testing::{local, weekly};

  async fn upstream() -> String {
    let app = Router::new().route(
      "/api/shows/{id}",
      get(|Path(id): Path<String>| async move {
        if id == "the wire" {
          let mut s = weekly(&id, local(2024, 1, 7, 21));
          s.revision = Some("7".into());
          Ok(Json(s))
        } else if id == "flaky" {
          Err(Status::BAD_GATEWAY)
        } else {
          Err(Status::NOT_FOUND)
        }
      }),
    );
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });
    format!("http://{addr}/api/shows")
  }

  fn source(base_url: String) -> HttpScheduleSource {
    HttpScheduleSource::new(&UpstreamConfig {
      base_url,
      timeout_secs: 5,
    })
    .unwrap()
  }

  #[tokio::test]
  async fn fetches_and_decodes_schedules() {
    let source = source(upstream().await);
    let schedule = source.fetch_schedule("the wire").await.unwrap();
    assert_eq!(schedule.show_id, "the wire");
    assert_eq!(schedule.revision.as_deref(), Some("7"));
    assert_eq!(schedule.rrules, vec!["FREQ=WEEKLY".to_string()]);
  }

  #[tokio::test]
  async fn status_codes_map_to_errors() {
    let source = source(upstream().await);
    assert!(matches!(
      source.fetch_schedule("nope").await,
      Err(SourceError::UnknownShow(_))
    ));
    assert!(matches!(
      source.fetch_schedule("flaky").await,
      Err(SourceError::Status { status: StatusCode::BAD_GATEWAY, .. })
    ));
  }

  #[test]
  fn show_ids_are_path_escaped() {
    let source = source("http://upstream.test/api/shows".into());
    let url = source.url_for("law & order/svu").unwrap();
    assert_eq!(url.as_str(), "http://upstream.test/api/shows/law%20&%20order%2Fsvu");
  }
}
