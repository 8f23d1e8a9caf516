//! SQL schema for the Seriesly SQLite store.

/// Full schema DDL; idempotent thanks to `CREATE TABLE IF NOT EXISTS`.
pub const SCHEMA: &str = "
PRAGMA journal_mode = WAL;
PRAGMA foreign_keys = ON;

CREATE TABLE IF NOT EXISTS subscribers (
    subscriber_id TEXT PRIMARY KEY,
    created_at    TEXT NOT NULL
);

-- Shows a subscriber tracks.
CREATE TABLE IF NOT EXISTS subscriptions (
    subscriber_id TEXT NOT NULL REFERENCES subscribers(subscriber_id),
    show_id       TEXT NOT NULL,
    PRIMARY KEY (subscriber_id, show_id)
);

CREATE TABLE IF NOT EXISTS channels (
    subscriber_id TEXT NOT NULL REFERENCES subscribers(subscriber_id),
    channel       TEXT NOT NULL,   -- 'email' | 'xmpp' | 'webhook' | 'calendar'
    enabled       INTEGER NOT NULL DEFAULT 1,
    destination   TEXT NOT NULL,
    format        TEXT NOT NULL DEFAULT 'xml',
    watermark     TEXT,            -- fixed-width RFC 3339 UTC, so it sorts as text
    PRIMARY KEY (subscriber_id, channel)
);

PRAGMA user_version = 1;
";
