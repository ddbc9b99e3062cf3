//! [`SqliteStore`], the SQLite implementation of [`Repository`].

use std::path::Path;

use chrono::{DateTime, Utc};
use rusqlite::OptionalExtension as _;

use chorus_core::{
  checkpoint::{EntityType, SyncCheckpoint},
  ids::{MappingId, PlayEventId, PlaylistId, ServiceName, TrackId},
  mapping::{MappedTrack, NewMapping},
  ordering,
  play::{DedupDecision, NewPlayEvent, PlayEvent},
  playlist::{NewPlaylist, Playlist, PlaylistEdit, PlaylistLink, PlaylistTrack},
  store::Repository,
  track::{
    ConnectorTrack, DirectIdentifier, IdentifierKind, NewTrack, ObservedTrack,
    Track, TrackMetadata, TrackQuery,
  },
};

use crate::{
  Error, Result,
  encode::{
    CHECKPOINT_COLUMNS, CONNECTOR_COLUMNS, ENTRY_COLUMNS, MAPPED_COLUMNS,
    ObservationRow, PLAY_COLUMNS, PLAYLIST_COLUMNS, RawCheckpoint,
    RawConnectorTrack, RawMapped, RawPlayEvent, RawPlaylist, RawPlaylistTrack,
    RawTrack, TRACK_COLUMNS, encode_artists, encode_date, encode_dt,
    encode_entity, encode_method, encode_outcome, like_pattern,
  },
  schema::SCHEMA,
};

// ─── Store ───────────────────────────────────────────────────────────────────

/// A chorus store backed by a single SQLite file.
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

  /// Open an in-memory store, for tests and dry runs.
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
}

// ─── Statement helpers ───────────────────────────────────────────────────────
//
// These run inside `Connection::call` closures, on the database thread.

fn identifier_column(kind: IdentifierKind) -> &'static str {
  match kind {
    IdentifierKind::CatalogId => "catalog_id",
    IdentifierKind::Isrc => "isrc",
    IdentifierKind::RegistryId => "registry_id",
  }
}

fn select_track(conn: &rusqlite::Connection, id: i64) -> rusqlite::Result<Option<RawTrack>> {
  conn
    .query_row(
      &format!("SELECT {TRACK_COLUMNS} FROM tracks WHERE track_id = ?1"),
      rusqlite::params![id],
      RawTrack::from_row,
    )
    .optional()
}

/// `Some(true)` for a live row, `Some(false)` for a soft-deleted one.
fn liveness(
  conn: &rusqlite::Connection,
  table: &str,
  key: &str,
  id: i64,
) -> rusqlite::Result<Option<bool>> {
  conn
    .query_row(
      &format!("SELECT deleted_at IS NULL FROM {table} WHERE {key} = ?1"),
      rusqlite::params![id],
      |r| r.get(0),
    )
    .optional()
}

/// Insert or refresh one observation; returns its id.
fn upsert_observation(
  conn: &rusqlite::Connection,
  row: &ObservationRow,
) -> rusqlite::Result<i64> {
  conn.execute(
    "INSERT INTO connector_tracks (
       service, native_id, title, artists, album, duration_ms,
       release_date, identifiers, raw, refreshed_at
     ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
     ON CONFLICT (service, native_id) DO UPDATE SET
       title        = excluded.title,
       artists      = excluded.artists,
       album        = excluded.album,
       duration_ms  = excluded.duration_ms,
       release_date = excluded.release_date,
       identifiers  = excluded.identifiers,
       raw          = excluded.raw,
       refreshed_at = excluded.refreshed_at",
    rusqlite::params![
      row.service,
      row.native_id,
      row.title,
      row.artists,
      row.album,
      row.duration_ms,
      row.release_date,
      row.identifiers,
      row.raw,
      row.refreshed_at,
    ],
  )?;
  conn.query_row(
    "SELECT connector_track_id FROM connector_tracks WHERE service = ?1 AND native_id = ?2",
    rusqlite::params![row.service, row.native_id],
    |r| r.get(0),
  )
}

fn select_connector(
  conn: &rusqlite::Connection,
  id: i64,
) -> rusqlite::Result<RawConnectorTrack> {
  conn.query_row(
    &format!(
      "SELECT {CONNECTOR_COLUMNS} FROM connector_tracks c WHERE c.connector_track_id = ?1"
    ),
    rusqlite::params![id],
    |r| RawConnectorTrack::from_row(r, 0),
  )
}

/// Mappings joined with their observation, strongest first.
fn select_mapped<P: rusqlite::Params>(
  conn: &rusqlite::Connection,
  filter: &str,
  params: P,
) -> rusqlite::Result<Vec<RawMapped>> {
  let mut stmt = conn.prepare(&format!(
    "SELECT {MAPPED_COLUMNS}
     FROM track_mappings m
     JOIN connector_tracks c ON c.connector_track_id = m.connector_track_id
     WHERE {filter}
     ORDER BY m.confidence DESC, m.verified_at DESC, m.mapping_id"
  ))?;
  stmt
    .query_map(params, RawMapped::from_row)?
    .collect::<rusqlite::Result<Vec<_>>>()
}

fn select_entries(
  conn: &rusqlite::Connection,
  playlist_id: i64,
) -> rusqlite::Result<Vec<RawPlaylistTrack>> {
  let mut stmt = conn.prepare(&format!(
    "SELECT {ENTRY_COLUMNS} FROM playlist_tracks
     WHERE playlist_id = ?1 AND deleted_at IS NULL
     ORDER BY ordering_key, playlist_track_id"
  ))?;
  stmt
    .query_map(rusqlite::params![playlist_id], RawPlaylistTrack::from_row)?
    .collect::<rusqlite::Result<Vec<_>>>()
}

fn into_mapped(raws: Vec<RawMapped>) -> Result<Vec<MappedTrack>> {
  raws.into_iter().map(RawMapped::into_mapped).collect()
}

// ─── Repository impl ─────────────────────────────────────────────────────────

impl Repository for SqliteStore {
  type Error = Error;

  // ── Tracks ────────────────────────────────────────────────────────────────

  async fn insert_track(&self, input: NewTrack) -> Result<Track> {
    if input.title.trim().is_empty() {
      return Err(chorus_core::Error::Validation("track title is empty".into()).into());
    }
    let artists_str = encode_artists(&input.artists)?;
    let release_str = input.release_date.map(encode_date);
    let now_str     = encode_dt(Utc::now());
    let NewTrack { title, album, duration_ms, identifiers, .. } = input;

    let raw: RawTrack = self
      .conn
      .call(move |conn| {
        conn.execute(
          "INSERT INTO tracks (
             title, artists, album, duration_ms, release_date,
             catalog_id, isrc, registry_id, created_at, updated_at
           ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?9)",
          rusqlite::params![
            title,
            artists_str,
            album,
            duration_ms,
            release_str,
            identifiers.catalog_id,
            identifiers.isrc,
            identifiers.registry_id,
            now_str,
          ],
        )?;
        let id = conn.last_insert_rowid();
        Ok(conn.query_row(
          &format!("SELECT {TRACK_COLUMNS} FROM tracks WHERE track_id = ?1"),
          rusqlite::params![id],
          RawTrack::from_row,
        )?)
      })
      .await?;

    raw.into_track()
  }

  async fn get_track(&self, id: TrackId) -> Result<Option<Track>> {
    let raw = self
      .conn
      .call(move |conn| Ok(select_track(conn, id.get())?))
      .await?;
    raw.map(RawTrack::into_track).transpose()
  }

  async fn find_tracks_by_identifier(&self, ident: DirectIdentifier) -> Result<Vec<Track>> {
    let column = identifier_column(ident.kind);
    let value  = ident.value;

    let raws: Vec<RawTrack> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(&format!(
          "SELECT {TRACK_COLUMNS} FROM tracks
           WHERE {column} = ?1 AND deleted_at IS NULL
           ORDER BY track_id"
        ))?;
        let rows = stmt
          .query_map(rusqlite::params![value], RawTrack::from_row)?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    raws.into_iter().map(RawTrack::into_track).collect()
  }

  async fn search_tracks(&self, query: TrackQuery) -> Result<Vec<Track>> {
    let title_pattern  = query.title.as_deref().map(like_pattern);
    let artist_pattern = query.artist.as_deref().map(like_pattern);
    // A negative LIMIT means no limit in SQLite.
    let limit_val      = query.limit.map_or(-1, |l| i64::try_from(l).unwrap_or(i64::MAX));

    let raws: Vec<RawTrack> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(&format!(
          r"SELECT {TRACK_COLUMNS} FROM tracks
            WHERE deleted_at IS NULL
              AND (?1 IS NULL OR title   LIKE ?1 ESCAPE '\')
              AND (?2 IS NULL OR artists LIKE ?2 ESCAPE '\')
            ORDER BY track_id
            LIMIT ?3"
        ))?;
        let rows = stmt
          .query_map(
            rusqlite::params![title_pattern, artist_pattern, limit_val],
            RawTrack::from_row,
          )?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    raws.into_iter().map(RawTrack::into_track).collect()
  }

  async fn refresh_track_metadata(
    &self,
    id: TrackId,
    metadata: TrackMetadata,
  ) -> Result<Track> {
    let mut track = self.get_track(id).await?.ok_or(Error::TrackNotFound(id))?;
    if track.is_deleted() {
      return Err(Error::TrackDeleted(id));
    }

    let TrackMetadata { album, duration_ms, release_date, identifiers } = metadata;
    if album.is_some() {
      track.album = album;
    }
    if duration_ms.is_some() {
      track.duration_ms = duration_ms;
    }
    if release_date.is_some() {
      track.release_date = release_date;
    }
    track.identifiers.fill_missing(&identifiers);

    let release_str = track.release_date.map(encode_date);
    let now_str     = encode_dt(Utc::now());
    let Track { album, duration_ms, identifiers, .. } = track;

    self
      .conn
      .call(move |conn| {
        conn.execute(
          "UPDATE tracks SET
             album = ?1, duration_ms = ?2, release_date = ?3,
             catalog_id = ?4, isrc = ?5, registry_id = ?6, updated_at = ?7
           WHERE track_id = ?8",
          rusqlite::params![
            album,
            duration_ms,
            release_str,
            identifiers.catalog_id,
            identifiers.isrc,
            identifiers.registry_id,
            now_str,
            id.get(),
          ],
        )?;
        Ok(())
      })
      .await?;

    self.get_track(id).await?.ok_or(Error::TrackNotFound(id))
  }

  async fn soft_delete_track(&self, id: TrackId) -> Result<()> {
    let now_str = encode_dt(Utc::now());

    self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        match liveness(&tx, "tracks", "track_id", id.get())? {
          None => return Ok(Err(Error::TrackNotFound(id))),
          Some(false) => return Ok(Ok(())),
          Some(true) => {}
        }
        tx.execute(
          "UPDATE tracks SET deleted_at = ?1, updated_at = ?1 WHERE track_id = ?2",
          rusqlite::params![now_str, id.get()],
        )?;
        // A deleted track keeps no active mappings.
        tx.execute(
          "UPDATE track_mappings SET deleted_at = ?1
           WHERE track_id = ?2 AND deleted_at IS NULL",
          rusqlite::params![now_str, id.get()],
        )?;
        tx.commit()?;
        Ok(Ok(()))
      })
      .await?
  }

  // ── Connector tracks ──────────────────────────────────────────────────────

  async fn upsert_connector_tracks(
    &self,
    observed: Vec<ObservedTrack>,
  ) -> Result<Vec<ConnectorTrack>> {
    let rows = observed
      .iter()
      .map(ObservationRow::encode)
      .collect::<Result<Vec<_>>>()?;

    let raws: Vec<RawConnectorTrack> = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        let mut out = Vec::with_capacity(rows.len());
        for row in &rows {
          let id = upsert_observation(&tx, row)?;
          out.push(select_connector(&tx, id)?);
        }
        tx.commit()?;
        Ok(out)
      })
      .await?;

    raws
      .into_iter()
      .map(RawConnectorTrack::into_connector_track)
      .collect()
  }

  async fn get_connector_track(
    &self,
    service: ServiceName,
    native_id: String,
  ) -> Result<Option<ConnectorTrack>> {
    let service_str = service.as_str().to_owned();

    let raw: Option<RawConnectorTrack> = self
      .conn
      .call(move |conn| {
        Ok(conn
          .query_row(
            &format!(
              "SELECT {CONNECTOR_COLUMNS} FROM connector_tracks c
               WHERE c.service = ?1 AND c.native_id = ?2"
            ),
            rusqlite::params![service_str, native_id],
            |r| RawConnectorTrack::from_row(r, 0),
          )
          .optional()?)
      })
      .await?;

    raw.map(RawConnectorTrack::into_connector_track).transpose()
  }

  // ── Mappings ──────────────────────────────────────────────────────────────

  async fn active_mappings(
    &self,
    track_id: TrackId,
    service: Option<ServiceName>,
  ) -> Result<Vec<MappedTrack>> {
    let service_str = service.map(|s| s.as_str().to_owned());

    let raws = self
      .conn
      .call(move |conn| {
        Ok(select_mapped(
          conn,
          "m.track_id = ?1 AND m.deleted_at IS NULL AND (?2 IS NULL OR c.service = ?2)",
          rusqlite::params![track_id.get(), service_str],
        )?)
      })
      .await?;

    into_mapped(raws)
  }

  async fn mappings_for_native(
    &self,
    service: ServiceName,
    native_id: String,
  ) -> Result<Vec<MappedTrack>> {
    let service_str = service.as_str().to_owned();

    let raws = self
      .conn
      .call(move |conn| {
        Ok(select_mapped(
          conn,
          "c.service = ?1 AND c.native_id = ?2 AND m.deleted_at IS NULL",
          rusqlite::params![service_str, native_id],
        )?)
      })
      .await?;

    into_mapped(raws)
  }

  async fn record_mapping(&self, input: NewMapping) -> Result<MappedTrack> {
    let NewMapping { track_id, observed, method, confidence } = input;
    let row        = ObservationRow::encode(&observed)?;
    let method_str = encode_method(method);
    let confidence = i64::from(confidence.value());
    let now_str    = encode_dt(Utc::now());

    let raw = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        match liveness(&tx, "tracks", "track_id", track_id.get())? {
          None => return Ok(Err(Error::TrackNotFound(track_id))),
          Some(false) => return Ok(Err(Error::TrackDeleted(track_id))),
          Some(true) => {}
        }

        let connector_id = upsert_observation(&tx, &row)?;
        tx.execute(
          "UPDATE track_mappings SET deleted_at = ?1
           WHERE track_id = ?2 AND connector_track_id = ?3 AND deleted_at IS NULL",
          rusqlite::params![now_str, track_id.get(), connector_id],
        )?;
        tx.execute(
          "INSERT INTO track_mappings (
             track_id, connector_track_id, method, confidence, verified_at
           ) VALUES (?1, ?2, ?3, ?4, ?5)",
          rusqlite::params![track_id.get(), connector_id, method_str, confidence, now_str],
        )?;
        let mapping_id = tx.last_insert_rowid();
        let mut raws = select_mapped(&tx, "m.mapping_id = ?1", rusqlite::params![mapping_id])?;
        tx.commit()?;
        Ok(raws.pop().ok_or(Error::MappingNotFound(MappingId(mapping_id))))
      })
      .await??;

    raw.into_mapped()
  }

  async fn soft_delete_mapping(&self, id: MappingId) -> Result<()> {
    let now_str = encode_dt(Utc::now());

    self
      .conn
      .call(move |conn| {
        match liveness(conn, "track_mappings", "mapping_id", id.get())? {
          None => return Ok(Err(Error::MappingNotFound(id))),
          Some(false) => return Ok(Ok(())),
          Some(true) => {}
        }
        conn.execute(
          "UPDATE track_mappings SET deleted_at = ?1 WHERE mapping_id = ?2",
          rusqlite::params![now_str, id.get()],
        )?;
        Ok(Ok(()))
      })
      .await?
  }

  // ── Play events ───────────────────────────────────────────────────────────

  async fn insert_play_events(&self, events: Vec<NewPlayEvent>) -> Result<Vec<PlayEvent>> {
    let rows: Vec<(String, i64, String, String, String)> = events
      .iter()
      .map(|e| {
        (
          e.owner.clone(),
          e.track_id.get(),
          e.service.as_str().to_owned(),
          encode_dt(e.played_at),
          e.batch_id.to_string(),
        )
      })
      .collect();

    let raws: Vec<RawPlayEvent> = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        let mut ids = Vec::with_capacity(rows.len());
        {
          let mut insert = tx.prepare(
            "INSERT INTO play_events (owner, track_id, service, played_at, batch_id)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT (owner, service, track_id, played_at) DO NOTHING",
          )?;
          for (owner, track_id, service, played_at, batch_id) in &rows {
            let changed =
              insert.execute(rusqlite::params![owner, track_id, service, played_at, batch_id])?;
            if changed == 1 {
              ids.push(tx.last_insert_rowid());
            }
          }
        }
        let mut out = Vec::with_capacity(ids.len());
        {
          let mut select = tx.prepare(&format!(
            "SELECT {PLAY_COLUMNS} FROM play_events WHERE play_event_id = ?1"
          ))?;
          for id in ids {
            out.push(select.query_row(rusqlite::params![id], RawPlayEvent::from_row)?);
          }
        }
        tx.commit()?;
        Ok(out)
      })
      .await?;

    raws.into_iter().map(RawPlayEvent::into_event).collect()
  }

  async fn play_events_in_window(
    &self,
    owner: String,
    from: DateTime<Utc>,
    to: DateTime<Utc>,
  ) -> Result<Vec<PlayEvent>> {
    let from_str = encode_dt(from);
    let to_str   = encode_dt(to);

    let raws: Vec<RawPlayEvent> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(&format!(
          "SELECT {PLAY_COLUMNS} FROM play_events
           WHERE owner = ?1 AND played_at >= ?2 AND played_at < ?3
           ORDER BY played_at, service, play_event_id"
        ))?;
        let rows = stmt
          .query_map(rusqlite::params![owner, from_str, to_str], RawPlayEvent::from_row)?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    raws.into_iter().map(RawPlayEvent::into_event).collect()
  }

  async fn record_dedup_outcomes(&self, decisions: Vec<DedupDecision>) -> Result<usize> {
    let rows: Vec<(i64, &'static str, Option<i64>, i64)> = decisions
      .iter()
      .map(|d| {
        let (outcome, merged_into) = encode_outcome(d.outcome);
        (d.event.get(), outcome, merged_into, i64::from(d.confidence.value()))
      })
      .collect();

    self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        let mut updated = 0;
        for &(event, outcome, merged_into, confidence) in &rows {
          if let Some(target) = merged_into {
            if target == event {
              return Ok(Err(Error::Core(chorus_core::Error::CyclicMerge(PlayEventId(event)))));
            }
            let exists = tx
              .query_row(
                "SELECT 1 FROM play_events WHERE play_event_id = ?1",
                rusqlite::params![target],
                |_| Ok(()),
              )
              .optional()?
              .is_some();
            if !exists {
              return Ok(Err(Error::Core(chorus_core::Error::DanglingMerge(PlayEventId(event)))));
            }
          }
          let changed = tx.execute(
            "UPDATE play_events SET outcome = ?1, merged_into = ?2, dedup_confidence = ?3
             WHERE play_event_id = ?4",
            rusqlite::params![outcome, merged_into, confidence, event],
          )?;
          if changed == 0 {
            return Ok(Err(Error::PlayEventNotFound(PlayEventId(event))));
          }
          updated += changed;
        }

        // Merge pointers are single-hop: every target must itself be kept.
        let chained: Option<i64> = tx
          .query_row(
            "SELECT p.play_event_id FROM play_events p
             JOIN play_events t ON t.play_event_id = p.merged_into
             WHERE t.outcome != 'kept'
             LIMIT 1",
            [],
            |r| r.get(0),
          )
          .optional()?;
        if let Some(event) = chained {
          return Ok(Err(Error::Core(chorus_core::Error::CyclicMerge(PlayEventId(event)))));
        }

        tx.commit()?;
        Ok(Ok(updated))
      })
      .await?
  }

  // ── Playlists ─────────────────────────────────────────────────────────────

  async fn create_playlist(&self, input: NewPlaylist) -> Result<Playlist> {
    let NewPlaylist { owner, name, link } = input;
    let now_str = encode_dt(Utc::now());
    let (service, remote_id, snapshot, synced_at) = match link {
      Some(l) => (
        Some(l.service.as_str().to_owned()),
        Some(l.remote_id),
        l.snapshot,
        l.synced_at.map(encode_dt),
      ),
      None => (None, None, None, None),
    };

    let raw: RawPlaylist = self
      .conn
      .call(move |conn| {
        conn.execute(
          "INSERT INTO playlists (
             owner, name, link_service, link_remote_id, link_snapshot,
             link_synced_at, created_at, updated_at
           ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7)",
          rusqlite::params![owner, name, service, remote_id, snapshot, synced_at, now_str],
        )?;
        let id = conn.last_insert_rowid();
        Ok(conn.query_row(
          &format!("SELECT {PLAYLIST_COLUMNS} FROM playlists WHERE playlist_id = ?1"),
          rusqlite::params![id],
          RawPlaylist::from_row,
        )?)
      })
      .await?;

    raw.into_playlist()
  }

  async fn get_playlist(&self, id: PlaylistId) -> Result<Option<Playlist>> {
    let raw: Option<RawPlaylist> = self
      .conn
      .call(move |conn| {
        Ok(conn
          .query_row(
            &format!("SELECT {PLAYLIST_COLUMNS} FROM playlists WHERE playlist_id = ?1"),
            rusqlite::params![id.get()],
            RawPlaylist::from_row,
          )
          .optional()?)
      })
      .await?;

    raw.map(RawPlaylist::into_playlist).transpose()
  }

  async fn playlist_tracks(&self, id: PlaylistId) -> Result<Vec<PlaylistTrack>> {
    let raws = self
      .conn
      .call(move |conn| Ok(select_entries(conn, id.get())?))
      .await?;
    raws.into_iter().map(RawPlaylistTrack::into_entry).collect()
  }

  async fn apply_playlist_edits(
    &self,
    id: PlaylistId,
    edits: Vec<PlaylistEdit>,
  ) -> Result<Vec<PlaylistTrack>> {
    for edit in &edits {
      match edit {
        PlaylistEdit::Insert { ordering_key, .. }
        | PlaylistEdit::Reorder { ordering_key, .. } => ordering::validate(ordering_key)?,
        PlaylistEdit::Remove { .. } => {}
      }
    }
    let now_str = encode_dt(Utc::now());

    let raws = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        if liveness(&tx, "playlists", "playlist_id", id.get())? != Some(true) {
          return Ok(Err(Error::PlaylistNotFound(id)));
        }

        for edit in &edits {
          match edit {
            PlaylistEdit::Insert { track_id, ordering_key } => {
              match liveness(&tx, "tracks", "track_id", track_id.get())? {
                None => return Ok(Err(Error::TrackNotFound(*track_id))),
                Some(false) => return Ok(Err(Error::TrackDeleted(*track_id))),
                Some(true) => {}
              }
              tx.execute(
                "INSERT INTO playlist_tracks (playlist_id, track_id, ordering_key, added_at)
                 VALUES (?1, ?2, ?3, ?4)",
                rusqlite::params![id.get(), track_id.get(), ordering_key, now_str],
              )?;
            }
            PlaylistEdit::Reorder { entry, ordering_key } => {
              let changed = tx.execute(
                "UPDATE playlist_tracks SET ordering_key = ?1
                 WHERE playlist_track_id = ?2 AND playlist_id = ?3 AND deleted_at IS NULL",
                rusqlite::params![ordering_key, entry.get(), id.get()],
              )?;
              if changed == 0 {
                return Ok(Err(Error::PlaylistTrackNotFound { playlist: id, entry: *entry }));
              }
            }
            PlaylistEdit::Remove { entry } => {
              let changed = tx.execute(
                "UPDATE playlist_tracks SET deleted_at = ?1
                 WHERE playlist_track_id = ?2 AND playlist_id = ?3 AND deleted_at IS NULL",
                rusqlite::params![now_str, entry.get(), id.get()],
              )?;
              if changed == 0 {
                return Ok(Err(Error::PlaylistTrackNotFound { playlist: id, entry: *entry }));
              }
            }
          }
        }

        tx.execute(
          "UPDATE playlists SET updated_at = ?1 WHERE playlist_id = ?2",
          rusqlite::params![now_str, id.get()],
        )?;
        let rows = select_entries(&tx, id.get())?;
        tx.commit()?;
        Ok(Ok(rows))
      })
      .await??;

    raws.into_iter().map(RawPlaylistTrack::into_entry).collect()
  }

  async fn record_playlist_sync(&self, id: PlaylistId, link: PlaylistLink) -> Result<Playlist> {
    let service_str   = link.service.as_str().to_owned();
    let synced_at_str = link.synced_at.map(encode_dt);
    let now_str       = encode_dt(Utc::now());
    let PlaylistLink { remote_id, snapshot, .. } = link;

    let changed = self
      .conn
      .call(move |conn| {
        Ok(conn.execute(
          "UPDATE playlists SET
             link_service = ?1, link_remote_id = ?2, link_snapshot = ?3,
             link_synced_at = ?4, updated_at = ?5
           WHERE playlist_id = ?6 AND deleted_at IS NULL",
          rusqlite::params![service_str, remote_id, snapshot, synced_at_str, now_str, id.get()],
        )?)
      })
      .await?;
    if changed == 0 {
      return Err(Error::PlaylistNotFound(id));
    }

    self.get_playlist(id).await?.ok_or(Error::PlaylistNotFound(id))
  }

  // ── Checkpoints ───────────────────────────────────────────────────────────

  async fn get_checkpoint(
    &self,
    owner: String,
    service: ServiceName,
    entity: EntityType,
  ) -> Result<Option<SyncCheckpoint>> {
    let service_str = service.as_str().to_owned();
    let entity_str  = encode_entity(entity);

    let raw: Option<RawCheckpoint> = self
      .conn
      .call(move |conn| {
        Ok(conn
          .query_row(
            &format!(
              "SELECT {CHECKPOINT_COLUMNS} FROM sync_checkpoints
               WHERE owner = ?1 AND service = ?2 AND entity = ?3"
            ),
            rusqlite::params![owner, service_str, entity_str],
            RawCheckpoint::from_row,
          )
          .optional()?)
      })
      .await?;

    raw.map(RawCheckpoint::into_checkpoint).transpose()
  }

  async fn save_checkpoint(&self, checkpoint: SyncCheckpoint) -> Result<()> {
    let service_str = checkpoint.service.as_str().to_owned();
    let entity_str  = encode_entity(checkpoint.entity);
    let at_str      = encode_dt(checkpoint.updated_at);
    let SyncCheckpoint { owner, cursor, .. } = checkpoint;

    self
      .conn
      .call(move |conn| {
        conn.execute(
          "INSERT INTO sync_checkpoints (owner, service, entity, cursor, updated_at)
           VALUES (?1, ?2, ?3, ?4, ?5)
           ON CONFLICT (owner, service, entity) DO UPDATE SET
             cursor     = excluded.cursor,
             updated_at = excluded.updated_at",
          rusqlite::params![owner, service_str, entity_str, cursor, at_str],
        )?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  async fn list_checkpoints(
    &self,
    owner: String,
    service: Option<ServiceName>,
  ) -> Result<Vec<SyncCheckpoint>> {
    let service_str = service.map(|s| s.as_str().to_owned());

    let raws: Vec<RawCheckpoint> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(&format!(
          "SELECT {CHECKPOINT_COLUMNS} FROM sync_checkpoints
           WHERE owner = ?1 AND (?2 IS NULL OR service = ?2)
           ORDER BY service, entity"
        ))?;
        let rows = stmt
          .query_map(rusqlite::params![owner, service_str], RawCheckpoint::from_row)?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    raws.into_iter().map(RawCheckpoint::into_checkpoint).collect()
  }
}
