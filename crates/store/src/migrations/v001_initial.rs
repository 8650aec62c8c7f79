//! v001 -- Initial schema creation.
//!
//! Creates the core tables: `apps`, `peers`, `channels`, `subscriptions`,
//! `stored_messages`, and the coordinator's `shards` load table.

use rusqlite::Connection;

/// SQL executed when upgrading from version 0 to version 1.
const UP_SQL: &str = r#"
-- ----------------------------------------------------------------
-- Apps (tenants; rows are written by the external app manager)
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS apps (
    id         TEXT PRIMARY KEY NOT NULL,   -- opaque app id
    name       TEXT NOT NULL,
    secret_key TEXT NOT NULL UNIQUE,        -- source bearer token
    enabled    INTEGER NOT NULL DEFAULT 1,  -- boolean 0/1
    created_at TEXT NOT NULL                -- ISO-8601 / RFC-3339
);

-- ----------------------------------------------------------------
-- Peers (one row per live connection)
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS peers (
    id                    TEXT PRIMARY KEY NOT NULL,  -- assigned at socket open
    app_id                TEXT NOT NULL,
    kind                  TEXT NOT NULL,              -- 'source' | 'sink'
    authenticated_user_id TEXT,
    user_info             TEXT,                       -- opaque JSON

    FOREIGN KEY (app_id) REFERENCES apps(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_peers_app ON peers(app_id);
CREATE INDEX IF NOT EXISTS idx_peers_app_user ON peers(app_id, authenticated_user_id);

-- ----------------------------------------------------------------
-- Channels
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS channels (
    id             TEXT PRIMARY KEY NOT NULL,  -- UUID v4
    app_id         TEXT NOT NULL,
    name           TEXT NOT NULL,
    auth_mode      TEXT NOT NULL,              -- 'public' | 'private' | 'presence'
    store_messages INTEGER NOT NULL DEFAULT 0, -- boolean 0/1

    FOREIGN KEY (app_id) REFERENCES apps(id) ON DELETE CASCADE,
    UNIQUE (app_id, name)
);

-- ----------------------------------------------------------------
-- Subscriptions (peer <-> channel membership)
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS subscriptions (
    id         TEXT PRIMARY KEY NOT NULL,  -- UUID v4
    app_id     TEXT NOT NULL,
    peer_id    TEXT NOT NULL,
    channel_id TEXT NOT NULL,

    FOREIGN KEY (app_id) REFERENCES apps(id) ON DELETE CASCADE,
    FOREIGN KEY (peer_id) REFERENCES peers(id) ON DELETE CASCADE,
    FOREIGN KEY (channel_id) REFERENCES channels(id) ON DELETE CASCADE,
    UNIQUE (app_id, peer_id, channel_id)
);

CREATE INDEX IF NOT EXISTS idx_subscriptions_channel ON subscriptions(channel_id);
CREATE INDEX IF NOT EXISTS idx_subscriptions_peer ON subscriptions(peer_id);

-- ----------------------------------------------------------------
-- Stored channel messages (replayable by id)
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS stored_messages (
    id         TEXT PRIMARY KEY NOT NULL,  -- source-assigned envelope id
    app_id     TEXT NOT NULL,
    channel_id TEXT NOT NULL,
    created_at TEXT NOT NULL,              -- ISO-8601, fixed-width micros
    data       TEXT NOT NULL,              -- JSON: {event, message}

    FOREIGN KEY (app_id) REFERENCES apps(id) ON DELETE CASCADE,
    FOREIGN KEY (channel_id) REFERENCES channels(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_stored_messages_channel_ts
    ON stored_messages(channel_id, created_at ASC);

-- ----------------------------------------------------------------
-- Shards (coordinator load accounting)
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS shards (
    id               INTEGER PRIMARY KEY NOT NULL,
    connection_count INTEGER NOT NULL DEFAULT 0
);
"#;

/// Apply the initial migration.
pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}
