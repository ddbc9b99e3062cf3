//! SQL schema for the chorus SQLite store.
//!
//! Executed once at connection startup. Future migrations will be gated on
//! `PRAGMA user_version`.

/// Full schema DDL; idempotent thanks to `IF NOT EXISTS`.
///
/// Ids are `AUTOINCREMENT` so a deleted row's id is never handed out again.
/// Timestamps are fixed-width RFC 3339 UTC strings and sort lexically.
pub const SCHEMA: &str = "
PRAGMA journal_mode = WAL;
PRAGMA foreign_keys = ON;

CREATE TABLE IF NOT EXISTS tracks (
    track_id     INTEGER PRIMARY KEY AUTOINCREMENT,
    title        TEXT NOT NULL,
    artists      TEXT NOT NULL,          -- JSON array of names
    album        TEXT,
    duration_ms  INTEGER,
    release_date TEXT,                   -- YYYY-MM-DD
    catalog_id   TEXT,
    isrc         TEXT,
    registry_id  TEXT,
    created_at   TEXT NOT NULL,
    updated_at   TEXT NOT NULL,
    deleted_at   TEXT
);

CREATE INDEX IF NOT EXISTS tracks_catalog_idx  ON tracks(catalog_id);
CREATE INDEX IF NOT EXISTS tracks_isrc_idx     ON tracks(isrc);
CREATE INDEX IF NOT EXISTS tracks_registry_idx ON tracks(registry_id);

-- What one service reported about a recording.
CREATE TABLE IF NOT EXISTS connector_tracks (
    connector_track_id INTEGER PRIMARY KEY AUTOINCREMENT,
    service            TEXT NOT NULL,
    native_id          TEXT NOT NULL,
    title              TEXT NOT NULL,
    artists            TEXT NOT NULL,
    album              TEXT,
    duration_ms        INTEGER,
    release_date       TEXT,
    identifiers        TEXT NOT NULL,    -- JSON DirectIds
    raw                TEXT NOT NULL,    -- untouched payload
    refreshed_at       TEXT NOT NULL,
    UNIQUE (service, native_id)
);

CREATE TABLE IF NOT EXISTS track_mappings (
    mapping_id         INTEGER PRIMARY KEY AUTOINCREMENT,
    track_id           INTEGER NOT NULL REFERENCES tracks(track_id),
    connector_track_id INTEGER NOT NULL REFERENCES connector_tracks(connector_track_id),
    method             TEXT    NOT NULL,
    confidence         INTEGER NOT NULL CHECK (confidence BETWEEN 0 AND 100),
    verified_at        TEXT    NOT NULL,
    deleted_at         TEXT
);

-- At most one active mapping per (track, observation) pair.
CREATE UNIQUE INDEX IF NOT EXISTS track_mappings_active_idx
    ON track_mappings(track_id, connector_track_id)
    WHERE deleted_at IS NULL;
CREATE INDEX IF NOT EXISTS track_mappings_connector_idx
    ON track_mappings(connector_track_id);

CREATE TABLE IF NOT EXISTS play_events (
    play_event_id    INTEGER PRIMARY KEY AUTOINCREMENT,
    owner            TEXT    NOT NULL,
    track_id         INTEGER NOT NULL REFERENCES tracks(track_id),
    service          TEXT    NOT NULL,
    played_at        TEXT    NOT NULL,
    batch_id         TEXT    NOT NULL,
    outcome          TEXT    NOT NULL DEFAULT 'kept',  -- 'kept' | 'merged' | 'discarded'
    merged_into      INTEGER REFERENCES play_events(play_event_id),
    dedup_confidence INTEGER CHECK (dedup_confidence BETWEEN 0 AND 100),
    UNIQUE (owner, service, track_id, played_at),
    CHECK  (merged_into IS NULL OR merged_into != play_event_id),
    CHECK  ((outcome = 'merged') = (merged_into IS NOT NULL))
);

CREATE INDEX IF NOT EXISTS play_events_window_idx ON play_events(owner, played_at);

CREATE TABLE IF NOT EXISTS playlists (
    playlist_id    INTEGER PRIMARY KEY AUTOINCREMENT,
    owner          TEXT NOT NULL,
    name           TEXT NOT NULL,
    link_service   TEXT,
    link_remote_id TEXT,
    link_snapshot  TEXT,
    link_synced_at TEXT,
    created_at     TEXT NOT NULL,
    updated_at     TEXT NOT NULL,
    deleted_at     TEXT,
    CHECK ((link_service IS NULL) = (link_remote_id IS NULL))
);

-- Rows are soft-deleted; reordering only rewrites ordering_key.
CREATE TABLE IF NOT EXISTS playlist_tracks (
    playlist_track_id INTEGER PRIMARY KEY AUTOINCREMENT,
    playlist_id       INTEGER NOT NULL REFERENCES playlists(playlist_id),
    track_id          INTEGER NOT NULL REFERENCES tracks(track_id),
    ordering_key      TEXT    NOT NULL,
    added_at          TEXT    NOT NULL,
    deleted_at        TEXT
);

CREATE INDEX IF NOT EXISTS playlist_tracks_order_idx
    ON playlist_tracks(playlist_id, ordering_key);

CREATE TABLE IF NOT EXISTS sync_checkpoints (
    owner      TEXT NOT NULL,
    service    TEXT NOT NULL,
    entity     TEXT NOT NULL,            -- 'plays' | 'playlists' | 'tracks'
    cursor     TEXT,
    updated_at TEXT NOT NULL,
    PRIMARY KEY (owner, service, entity)
);

PRAGMA user_version = 1;
";
