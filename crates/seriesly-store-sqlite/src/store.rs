//! [`SqliteStore`], the SQLite implementation of [`SubscriberStore`].

use std::path::Path;

use chrono::{DateTime, SubsecRound as _, Utc};
use rusqlite::OptionalExtension as _;
use seriesly_core::{
  store::SubscriberStore,
  subscriber::{Channel, PayloadFormat, Subscriber},
};
use uuid::Uuid;

use crate::{
  Error, Result,
  encode::{RawChannel, RawSubscriber, assemble, decode_dt, encode_dt, encode_uuid},
  schema::SCHEMA,
};

const CHANNEL_COLUMNS: &str =
  "subscriber_id, channel, enabled, destination, format, watermark";

fn raw_channel(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawChannel> {
  Ok(RawChannel {
    subscriber_id: row.get(0)?,
    channel:       row.get(1)?,
    enabled:       row.get(2)?,
    destination:   row.get(3)?,
    format:        row.get(4)?,
    watermark:     row.get(5)?,
  })
}

// ─── Store ───────────────────────────────────────────────────────────────────

/// A Seriesly subscriber store backed by a single SQLite file.
///
/// Cloning is cheap; the inner connection is reference-counted.
#[derive(Clone)]
pub struct SqliteStore {
  conn: tokio_rusqlite::Connection,
}

impl SqliteStore {
  /// Open (or create) a store at `path` and run schema initialisation.
  pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open(path).await?;
    let store = Self { conn };
    store.init_schema().await?;
    Ok(store)
  }

  /// Open an in-memory store for tests.
  pub async fn open_in_memory() -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open_in_memory().await?;
    let store = Self { conn };
    store.init_schema().await?;
    Ok(store)
  }

  async fn init_schema(&self) -> Result<()> {
    self
      .conn
      .call(|conn| {
        conn.execute_batch(SCHEMA)?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  async fn ensure_subscriber(&self, id: Uuid) -> Result<()> {
    let id_str = encode_uuid(id);
    let exists = self
      .conn
      .call(move |conn| {
        Ok(
          conn
            .query_row(
              "SELECT 1 FROM subscribers WHERE subscriber_id = ?1",
              rusqlite::params![id_str],
              |_| Ok(true),
            )
            .optional()?
            .unwrap_or(false),
        )
      })
      .await?;
    if exists { Ok(()) } else { Err(Error::SubscriberNotFound(id)) }
  }
}

// ─── SubscriberStore impl ────────────────────────────────────────────────────

impl SubscriberStore for SqliteStore {
  type Error = Error;

  // ── Subscribers ───────────────────────────────────────────────────────────

  async fn add_subscriber(&self) -> Result<Subscriber> {
    // Stored with microsecond precision.
    let subscriber = Subscriber::new(Uuid::new_v4(), Utc::now().trunc_subsecs(6));

    let id_str = encode_uuid(subscriber.subscriber_id);
    let at_str = encode_dt(subscriber.created_at);

    self
      .conn
      .call(move |conn| {
        conn.execute(
          "INSERT INTO subscribers (subscriber_id, created_at) VALUES (?1, ?2)",
          rusqlite::params![id_str, at_str],
        )?;
        Ok(())
      })
      .await?;

    Ok(subscriber)
  }

  async fn get_subscriber(&self, id: Uuid) -> Result<Option<Subscriber>> {
    let id_str = encode_uuid(id);

    let (raw, shows, channels) = self
      .conn
      .call(move |conn| {
        let raw = conn
          .query_row(
            "SELECT subscriber_id, created_at FROM subscribers WHERE subscriber_id = ?1",
            rusqlite::params![id_str],
            |row| {
              Ok(RawSubscriber {
                subscriber_id: row.get(0)?,
                created_at:    row.get(1)?,
              })
            },
          )
          .optional()?;

        let shows = conn
          .prepare("SELECT subscriber_id, show_id FROM subscriptions WHERE subscriber_id = ?1")?
          .query_map(rusqlite::params![id_str], |row| Ok((row.get(0)?, row.get(1)?)))?
          .collect::<rusqlite::Result<Vec<(String, String)>>>()?;

        let channels = conn
          .prepare(&format!(
            "SELECT {CHANNEL_COLUMNS} FROM channels WHERE subscriber_id = ?1"
          ))?
          .query_map(rusqlite::params![id_str], raw_channel)?
          .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok((raw, shows, channels))
      })
      .await?;

    let Some(raw) = raw else { return Ok(None) };
    Ok(assemble(vec![raw], shows, channels)?.into_iter().next())
  }

  async fn list_subscribers(&self) -> Result<Vec<Subscriber>> {
    let (raws, shows, channels) = self
      .conn
      .call(|conn| {
        let raws = conn
          .prepare("SELECT subscriber_id, created_at FROM subscribers ORDER BY created_at")?
          .query_map([], |row| {
            Ok(RawSubscriber {
              subscriber_id: row.get(0)?,
              created_at:    row.get(1)?,
            })
          })?
          .collect::<rusqlite::Result<Vec<_>>>()?;

        let shows = conn
          .prepare("SELECT subscriber_id, show_id FROM subscriptions")?
          .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
          .collect::<rusqlite::Result<Vec<(String, String)>>>()?;

        let channels = conn
          .prepare(&format!("SELECT {CHANNEL_COLUMNS} FROM channels"))?
          .query_map([], raw_channel)?
          .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok((raws, shows, channels))
      })
      .await?;

    assemble(raws, shows, channels)
  }

  // ── Settings edits ────────────────────────────────────────────────────────

  async fn track_show(&self, id: Uuid, show_id: String) -> Result<()> {
    self.ensure_subscriber(id).await?;
    let id_str = encode_uuid(id);

    self
      .conn
      .call(move |conn| {
        conn.execute(
          "INSERT OR IGNORE INTO subscriptions (subscriber_id, show_id) VALUES (?1, ?2)",
          rusqlite::params![id_str, show_id],
        )?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  async fn untrack_show(&self, id: Uuid, show_id: String) -> Result<()> {
    self.ensure_subscriber(id).await?;
    let id_str = encode_uuid(id);

    self
      .conn
      .call(move |conn| {
        conn.execute(
          "DELETE FROM subscriptions WHERE subscriber_id = ?1 AND show_id = ?2",
          rusqlite::params![id_str, show_id],
        )?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  async fn configure_channel(
    &self,
    id: Uuid,
    channel: Channel,
    destination: String,
    format: PayloadFormat,
  ) -> Result<()> {
    self.ensure_subscriber(id).await?;
    let id_str = encode_uuid(id);
    let channel_str = channel.as_str();
    let format_str = format.as_str();

    self
      .conn
      .call(move |conn| {
        conn.execute(
          "INSERT INTO channels (subscriber_id, channel, enabled, destination, format)
           VALUES (?1, ?2, 1, ?3, ?4)
           ON CONFLICT (subscriber_id, channel) DO UPDATE SET
             enabled     = 1,
             destination = excluded.destination,
             format      = excluded.format",
          rusqlite::params![id_str, channel_str, destination, format_str],
        )?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  async fn disable_channel(&self, id: Uuid, channel: Channel) -> Result<()> {
    let id_str = encode_uuid(id);
    let channel_str = channel.as_str();

    let updated = self
      .conn
      .call(move |conn| {
        Ok(conn.execute(
          "UPDATE channels SET enabled = 0 WHERE subscriber_id = ?1 AND channel = ?2",
          rusqlite::params![id_str, channel_str],
        )?)
      })
      .await?;

    if updated == 0 {
      return Err(Error::ChannelNotConfigured {
        subscriber: id,
        channel,
      });
    }
    Ok(())
  }

  // ── Delivery bookkeeping ──────────────────────────────────────────────────

  async fn advance_watermark(
    &self,
    id: Uuid,
    channel: Channel,
    to: DateTime<Utc>,
  ) -> Result<DateTime<Utc>> {
    let id_str = encode_uuid(id);
    let channel_str = channel.as_str();
    let to_str = encode_dt(to);

    let stored: Option<Option<String>> = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        tx.execute(
          "UPDATE channels SET watermark = ?3
           WHERE subscriber_id = ?1 AND channel = ?2
             AND (watermark IS NULL OR watermark < ?3)",
          rusqlite::params![id_str, channel_str, to_str],
        )?;
        let stored = tx
          .query_row(
            "SELECT watermark FROM channels WHERE subscriber_id = ?1 AND channel = ?2",
            rusqlite::params![id_str, channel_str],
            |row| row.get::<_, Option<String>>(0),
          )
          .optional()?;
        tx.commit()?;
        Ok(stored)
      })
      .await?;

    match stored.flatten() {
      Some(s) => decode_dt(&s),
      None => Err(Error::ChannelNotConfigured {
        subscriber: id,
        channel,
      }),
    }
  }
}
