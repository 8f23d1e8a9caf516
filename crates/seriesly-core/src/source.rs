//! The upstream schedule provider abstraction.

use std::future::Future;

use crate::airing::ShowSchedule;

/// Something that knows when shows air (e.g. a TV listings service).
///
/// Implementations enforce their own timeouts; callers treat every error as
/// "no fresh data this time".
pub trait ScheduleSource: Send + Sync {
  type Error: std::error::Error + Send + Sync + 'static;

  /// Fetch the current schedule for `show_id`.
  fn fetch_schedule<'a>(
    &'a self,
    show_id: &'a str,
  ) -> impl Future<Output = Result<ShowSchedule, Self::Error>> + Send + 'a;
}
