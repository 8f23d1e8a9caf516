//! HTTP transports: webhook POSTs and calendar PUTs.
//!
//! A delivery succeeds on a 2xx response with an empty body. Anything the
//! endpoint says back is treated as a complaint. `410 Gone` and URLs that
//! cannot be requested at all are permanent destination errors. Redirects
//! are not followed; a 3xx is a failed delivery like any other non-2xx.

use std::time::Duration;

use reqwest::{Method, StatusCode, Url, header};

use crate::{
  dispatcher::{DeliveryError, Transport},
  payload::Payload,
  settings::WebhookConfig,
};

#[derive(Debug, Clone)]
pub struct WebhookTransport {
  client: reqwest::Client,
  method: Method,
}

impl WebhookTransport {
  /// A transport that POSTs payloads.
  pub fn new(settings: &WebhookConfig) -> reqwest::Result<Self> {
    let client = reqwest::Client::builder()
      .timeout(Duration::from_secs(settings.timeout_secs))
      .user_agent(settings.user_agent.clone())
      .redirect(reqwest::redirect::Policy::none())
      .build()?;
    Ok(Self {
      client,
      method: Method::POST,
    })
  }

  /// A transport that PUTs calendars to their destination URL.
  pub fn calendar(settings: &WebhookConfig) -> reqwest::Result<Self> {
    Ok(Self::new(settings)?.with_method(Method::PUT))
  }

  pub fn with_method(self, method: Method) -> Self { Self { method, ..self } }
}

fn parse_destination(destination: &str) -> Result<Url, DeliveryError> {
  let url = Url::parse(destination.trim()).map_err(|e| DeliveryError::permanent(destination, e))?;
  match url.scheme() {
    "http" | "https" if url.host().is_some() => Ok(url),
    scheme => Err(DeliveryError::permanent(
      destination,
      format!("unsupported url scheme {scheme:?}"),
    )),
  }
}

#[async_trait::async_trait]
impl Transport for WebhookTransport {
  async fn send(&self, destination: &str, payload: &Payload) -> Result<(), DeliveryError> {
    let url = parse_destination(destination)?;

    let response = self
      .client
      .request(self.method.clone(), url)
      .header(header::CONTENT_TYPE, payload.content_type)
      .body(payload.body.clone())
      .send()
      .await
      .map_err(|e| DeliveryError::Transient(e.to_string()))?;

    let status = response.status();
    if status == StatusCode::GONE {
      return Err(DeliveryError::permanent(destination, "endpoint is gone (410)"));
    }

    let body = response
      .text()
      .await
      .map_err(|e| DeliveryError::Transient(e.to_string()))?;
    if !status.is_success() {
      return Err(DeliveryError::Transient(format!("endpoint returned {status}")));
    }
    if !body.trim().is_empty() {
      tracing::debug!(destination, %status, body = %body, "endpoint replied with a body");
      return Err(DeliveryError::Transient(format!(
        "endpoint returned {status} with a response body"
      )));
    }

    tracing::debug!(destination, method = %self.method, %status, "payload accepted");
    Ok(())
  }

  fn name(&self) -> &str { if self.method == Method::PUT { "calendar" } else { "webhook" } }
}
