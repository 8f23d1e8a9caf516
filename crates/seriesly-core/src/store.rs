//! The `SubscriberStore` trait.
//!
//! The trait is implemented by storage backends (e.g.
//! `seriesly-store-sqlite`). The scheduler and the feed server depend on this
//! abstraction, not on any concrete backend.

use std::future::Future;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::subscriber::{Channel, PayloadFormat, Subscriber};

/// Abstraction over subscriber persistence.
///
/// All methods return `Send` futures so the trait can be used in
/// multi-threaded async runtimes.
pub trait SubscriberStore: Send + Sync {
  type Error: std::error::Error + Send + Sync + 'static;

  // ── Subscribers ───────────────────────────────────────────────────────

  /// Create and persist a new subscriber with no shows or channels.
  fn add_subscriber(
    &self,
  ) -> impl Future<Output = Result<Subscriber, Self::Error>> + Send + '_;

  /// Retrieve a subscriber by UUID. Returns `None` if not found.
  fn get_subscriber(
    &self,
    id: Uuid,
  ) -> impl Future<Output = Result<Option<Subscriber>, Self::Error>> + Send + '_;

  /// List all subscribers.
  fn list_subscribers(
    &self,
  ) -> impl Future<Output = Result<Vec<Subscriber>, Self::Error>> + Send + '_;

  // ── Settings edits ────────────────────────────────────────────────────

  /// Start tracking a show. Tracking an already tracked show is a no-op.
  fn track_show(
    &self,
    id: Uuid,
    show_id: String,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + '_;

  /// Stop tracking a show. Untracking an unknown show is a no-op.
  fn untrack_show(
    &self,
    id: Uuid,
    show_id: String,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + '_;

  /// Create or replace the destination of a channel and enable it. An
  /// existing watermark is kept.
  fn configure_channel(
    &self,
    id: Uuid,
    channel: Channel,
    destination: String,
    format: PayloadFormat,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + '_;

  /// Clear the enabled flag of a channel, e.g. after its destination was
  /// reported permanently invalid.
  fn disable_channel(
    &self,
    id: Uuid,
    channel: Channel,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + '_;

  // ── Delivery bookkeeping ──────────────────────────────────────────────

  /// Move the channel watermark forward to `to`. A watermark never moves
  /// backwards; the stored value after the call is returned.
  fn advance_watermark(
    &self,
    id: Uuid,
    channel: Channel,
    to: DateTime<Utc>,
  ) -> impl Future<Output = Result<DateTime<Utc>, Self::Error>> + Send + '_;
}
