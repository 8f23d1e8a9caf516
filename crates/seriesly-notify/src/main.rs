//! `seriesly` worker binary.
//!
//! Reads `seriesly.toml` (or the path given with `--config`) layered with
//! `SERIESLY_*` environment variables, opens the SQLite subscriber store and
//! either runs one notification batch or serves calendar feeds over HTTP.
//!
//! Nested keys use a double underscore in the environment, e.g.
//! `SERIESLY_CACHE__BUSY_TTL_SECS=600`.

use std::{
  path::{Path, PathBuf},
  sync::Arc,
};

use anyhow::Context as _;
use chrono::Utc;
use clap::{Parser, Subcommand};
use seriesly_core::{store::SubscriberStore, subscriber::Channel};
use seriesly_notify::{
  AppState, ChannelOutcome, DeliveryDispatcher, NotificationScheduler, OccurrenceCache,
  WorkerConfig, mail::MailTransport, source::HttpScheduleSource, webhook::WebhookTransport,
};
use seriesly_store_sqlite::SqliteStore;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(author, version, about = "Seriesly notification worker")]
struct Cli {
  /// Path to the TOML configuration file.
  #[arg(short, long, default_value = "seriesly.toml", global = true)]
  config: PathBuf,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand)]
enum Command {
  /// Run one notification batch over all subscribers and exit.
  Run,
  /// Serve calendar feeds over HTTP.
  Serve,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
  tracing_subscriber::fmt()
    .with_env_filter(
      EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy(),
    )
    .init();

  let cli = Cli::parse();

  let settings = config::Config::builder()
    .add_source(config::File::from(cli.config).required(false))
    .add_source(
      config::Environment::with_prefix("SERIESLY")
        .prefix_separator("_")
        .separator("__"),
    )
    .build()
    .context("failed to read config file")?;

  let cfg: WorkerConfig = settings
    .try_deserialize()
    .context("failed to deserialise WorkerConfig")?;

  let store_path = expand_tilde(&cfg.store_path);
  if let Some(parent) = store_path.parent()
    && !parent.as_os_str().is_empty()
  {
    std::fs::create_dir_all(parent)
      .with_context(|| format!("failed to create {parent:?}"))?;
  }
  let store = SqliteStore::open(&store_path)
    .await
    .with_context(|| format!("failed to open store at {store_path:?}"))?;

  let source = HttpScheduleSource::new(&cfg.upstream).context("invalid upstream settings")?;
  let cache = Arc::new(OccurrenceCache::new(Arc::new(source), cfg.cache.clone()));

  match cli.command {
    Command::Run => run(&cfg, cache, store).await,
    Command::Serve => serve(&cfg, cache, store).await,
  }
}

async fn run(
  cfg: &WorkerConfig,
  cache: Arc<OccurrenceCache<HttpScheduleSource>>,
  store: SqliteStore,
) -> anyhow::Result<()> {
  let dispatcher = build_dispatcher(cfg)?;
  let subscribers = store
    .list_subscribers()
    .await
    .context("failed to list subscribers")?;

  let scheduler = Arc::new(NotificationScheduler::new(
    cache,
    Arc::new(store),
    dispatcher,
    cfg.scheduler.clone(),
  ));

  tracing::info!(subscribers = subscribers.len(), "starting notification batch");
  let reports = scheduler.run_batch(subscribers, Utc::now()).await;

  let delivered: usize = reports.iter().map(|r| r.delivered()).sum();
  let failed: usize = reports.iter().map(|r| r.failed()).sum();
  let disabled = reports
    .iter()
    .flat_map(|r| r.channels.values())
    .filter(|o| matches!(o, ChannelOutcome::Failed { disabled: true, .. }))
    .count();
  tracing::info!(delivered, failed, disabled, "notification batch finished");
  Ok(())
}

async fn serve(
  cfg: &WorkerConfig,
  cache: Arc<OccurrenceCache<HttpScheduleSource>>,
  store: SqliteStore,
) -> anyhow::Result<()> {
  let state = AppState {
    cache,
    store: Arc::new(store),
    settings: Arc::new(cfg.scheduler.clone()),
  };
  let app = seriesly_notify::router(state).layer(TraceLayer::new_for_http());
  let address = format!("{}:{}", cfg.host, cfg.port);

  tracing::info!("Listening on http://{address}");
  let listener = TcpListener::bind(&address)
    .await
    .with_context(|| format!("failed to bind {address}"))?;

  axum::serve(listener, app).await.context("server error")?;

  Ok(())
}

/// Install a transport for every channel the configuration covers. XMPP has
/// no built-in transport; its deliveries fail until one is registered.
fn build_dispatcher(cfg: &WorkerConfig) -> anyhow::Result<DeliveryDispatcher> {
  let mut dispatcher = DeliveryDispatcher::new()
    .with_transport(
      Channel::Webhook,
      Arc::new(WebhookTransport::new(&cfg.webhook).context("failed to build webhook client")?),
    )
    .with_transport(
      Channel::Calendar,
      Arc::new(
        WebhookTransport::calendar(&cfg.webhook).context("failed to build calendar client")?,
      ),
    );

  match &cfg.smtp {
    Some(smtp) => {
      let mail = MailTransport::from_settings(smtp).context("invalid smtp settings")?;
      dispatcher.register(Channel::Email, Arc::new(mail));
    }
    None => tracing::warn!("no [smtp] section, mail deliveries will fail"),
  }
  Ok(dispatcher)
}

/// Expand a leading `~` to the user's home directory.
fn expand_tilde(path: &Path) -> PathBuf {
  let s = path.to_string_lossy();
  if let Some(rest) = s.strip_prefix("~/")
    && let Ok(home) = std::env::var("HOME")
  {
    return PathBuf::from(home).join(rest);
  }
  path.to_path_buf()
}
