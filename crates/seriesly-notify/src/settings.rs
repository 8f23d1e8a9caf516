//! Worker configuration, deserialised from `seriesly.toml` layered with
//! `SERIESLY_*` environment variables.
//!
//! Every section has serde defaults, so an empty file (or no file at all)
//! yields a usable configuration.

use std::path::PathBuf;

use chrono::TimeDelta;
use chrono_tz::Tz;
use serde::Deserialize;

// ─── Top level ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
pub struct WorkerConfig {
  #[serde(default = "default_host")]
  pub host:       String,
  #[serde(default = "default_port")]
  pub port:       u16,
  #[serde(default = "default_store_path")]
  pub store_path: PathBuf,
  #[serde(default)]
  pub cache:      CacheConfig,
  #[serde(default)]
  pub scheduler:  SchedulerConfig,
  #[serde(default)]
  pub upstream:   UpstreamConfig,
  #[serde(default)]
  pub smtp:       Option<SmtpConfig>,
  #[serde(default)]
  pub webhook:    WebhookConfig,
}

impl Default for WorkerConfig {
  fn default() -> Self {
    Self {
      host:       default_host(),
      port:       default_port(),
      store_path: default_store_path(),
      cache:      CacheConfig::default(),
      scheduler:  SchedulerConfig::default(),
      upstream:   UpstreamConfig::default(),
      smtp:       None,
      webhook:    WebhookConfig::default(),
    }
  }
}

fn default_host() -> String { "127.0.0.1".to_string() }

fn default_port() -> u16 { 8642 }

fn default_store_path() -> PathBuf { PathBuf::from("~/.local/share/seriesly/seriesly.db") }

// ─── Cache ───────────────────────────────────────────────────────────────────

/// Staleness policy of the occurrence cache.
///
/// Between `busy_start_hour` and `busy_end_hour` (wall clock in `timezone`,
/// an IANA name such as `"America/New_York"`) entries expire after
/// `busy_ttl_secs`, otherwise after `idle_ttl_secs`. A window whose start is
/// after its end wraps past midnight.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
  pub busy_ttl_secs:   u64,
  pub idle_ttl_secs:   u64,
  pub busy_start_hour: u32,
  pub busy_end_hour:   u32,
  pub timezone:        Tz,
  /// How far back airings are materialised.
  pub history_days:    i64,
  /// How far ahead airings are materialised.
  pub horizon_days:    i64,
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      busy_ttl_secs:   20 * 60,
      idle_ttl_secs:   6 * 60 * 60,
      busy_start_hour: 17,
      busy_end_hour:   24,
      timezone:        Tz::UTC,
      history_days:    7,
      horizon_days:    28,
    }
  }
}

impl CacheConfig {
  pub fn busy_ttl(&self) -> TimeDelta { seconds(self.busy_ttl_secs) }

  pub fn idle_ttl(&self) -> TimeDelta { seconds(self.idle_ttl_secs) }

  pub fn history(&self) -> TimeDelta { TimeDelta::days(self.history_days) }

  pub fn horizon(&self) -> TimeDelta { TimeDelta::days(self.horizon_days) }
}

fn seconds(secs: u64) -> TimeDelta {
  i64::try_from(secs)
    .ok()
    .and_then(TimeDelta::try_seconds)
    .unwrap_or(TimeDelta::MAX)
}

// ─── Scheduler ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
  /// Airings starting up to this many minutes from now are already due.
  pub lookahead_minutes: i64,
  /// Name written as `X-WR-CALNAME` in calendar deliveries and feeds.
  pub calendar_name:     String,
}

impl Default for SchedulerConfig {
  fn default() -> Self {
    Self {
      lookahead_minutes: 0,
      calendar_name:     "Seriesly".to_string(),
    }
  }
}

impl SchedulerConfig {
  pub fn lookahead(&self) -> TimeDelta { TimeDelta::minutes(self.lookahead_minutes) }
}

// ─── Upstream ────────────────────────────────────────────────────────────────

/// The schedule provider; `GET {base_url}/{show_id}` returns a JSON
/// `ShowSchedule`.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct UpstreamConfig {
  pub base_url:     String,
  pub timeout_secs: u64,
}

impl Default for UpstreamConfig {
  fn default() -> Self {
    Self {
      base_url:     "http://localhost:8000/shows".to_string(),
      timeout_secs: 10,
    }
  }
}

// ─── Transports ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
pub struct SmtpConfig {
  pub host:     String,
  #[serde(default = "default_smtp_port")]
  pub port:     u16,
  #[serde(default = "default_true")]
  pub tls:      bool,
  pub from:     String,
  #[serde(default)]
  pub username: Option<String>,
  #[serde(default)]
  pub password: Option<String>,
  #[serde(default = "default_smtp_timeout")]
  pub timeout_secs: u64,
}

fn default_smtp_port() -> u16 { 587 }

fn default_true() -> bool { true }

fn default_smtp_timeout() -> u64 { 30 }

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WebhookConfig {
  pub timeout_secs: u64,
  pub user_agent:   String,
}

impl Default for WebhookConfig {
  fn default() -> Self {
    Self {
      timeout_secs: 15,
      user_agent:   concat!("seriesly/", env!("CARGO_PKG_VERSION")).to_string(),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn empty_source_yields_defaults() {
    let cfg: WorkerConfig = config::Config::builder()
      .build()
      .unwrap()
      .try_deserialize()
      .unwrap();
    assert_eq!(cfg.port, 8642);
    assert_eq!(cfg.cache.busy_ttl(), TimeDelta::minutes(20));
    assert_eq!(cfg.cache.idle_ttl(), TimeDelta::hours(6));
    assert!(cfg.smtp.is_none());
    assert_eq!(cfg.cache.timezone, Tz::UTC);
  }

  #[test]
  fn unknown_timezone_is_rejected() {
    let toml = "[cache]\ntimezone = \"Mars/Olympus_Mons\"\n";
    let result = config::Config::builder()
      .add_source(config::File::from_str(toml, config::FileFormat::Toml))
      .build()
      .unwrap()
      .try_deserialize::<WorkerConfig>();
    assert!(result.is_err());
  }

  #[test]
  fn nested_sections_override_defaults() {
    let toml = r#"
      port = 9000

      [cache]
      busy_ttl_secs = 60
      timezone = "America/New_York"

      [smtp]
      host = "smtp.example.com"
      from = "Seriesly <noreply@example.com>"
    "#;
    let cfg: WorkerConfig = config::Config::builder()
      .add_source(config::File::from_str(toml, config::FileFormat::Toml))
      .build()
      .unwrap()
      .try_deserialize()
      .unwrap();
    assert_eq!(cfg.port, 9000);
    assert_eq!(cfg.cache.busy_ttl_secs, 60);
    assert_eq!(cfg.cache.idle_ttl_secs, 6 * 60 * 60);
    assert_eq!(cfg.cache.timezone, chrono_tz::America::New_York);
    let Some(smtp) = cfg.smtp else { panic!("smtp section missing") };
    assert_eq!(smtp.port, 587);
    assert!(smtp.tls);
  }
}
