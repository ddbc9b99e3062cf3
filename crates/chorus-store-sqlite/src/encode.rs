//! Encoding and decoding helpers between domain types and the plain values
//! stored in SQLite columns.
//!
//! Timestamps are fixed-width RFC 3339 strings in UTC, so lexical order is
//! chronological order. Artist lists and identifier sets on observations are
//! compact JSON. Batch ids are hyphenated lowercase UUIDs.

use chorus_core::{
  checkpoint::{EntityType, SyncCheckpoint},
  ids::{
    BatchId, ConnectorTrackId, MappingId, PlayEventId, PlaylistId,
    PlaylistTrackId, ServiceName, TrackId,
  },
  mapping::{Confidence, MappedTrack, MatchMethod, TrackMapping},
  play::{DedupOutcome, PlayEvent},
  playlist::{Playlist, PlaylistLink, PlaylistTrack},
  track::{ConnectorTrack, DirectIds, ObservedTrack, Track},
};
use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use rusqlite::Row;
use uuid::Uuid;

use crate::{Error, Result};

// ─── DateTime<Utc> ───────────────────────────────────────────────────────────

pub fn encode_dt(dt: DateTime<Utc>) -> String {
  dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub fn decode_dt(s: &str) -> Result<DateTime<Utc>> {
  DateTime::parse_from_rfc3339(s)
    .map(|dt| dt.with_timezone(&Utc))
    .map_err(|e| Error::DateParse(e.to_string()))
}

fn decode_opt_dt(s: Option<String>) -> Result<Option<DateTime<Utc>>> {
  s.as_deref().map(decode_dt).transpose()
}

// ─── NaiveDate ───────────────────────────────────────────────────────────────

pub fn encode_date(d: NaiveDate) -> String { d.format("%Y-%m-%d").to_string() }

fn decode_date(s: &str) -> Result<NaiveDate> {
  NaiveDate::parse_from_str(s, "%Y-%m-%d").map_err(|e| Error::DateParse(e.to_string()))
}

fn decode_opt_date(s: Option<String>) -> Result<Option<NaiveDate>> {
  s.as_deref().map(decode_date).transpose()
}

// ─── JSON columns ────────────────────────────────────────────────────────────

pub fn encode_artists(artists: &[String]) -> Result<String> {
  Ok(serde_json::to_string(artists)?)
}

pub fn encode_ids(ids: &DirectIds) -> Result<String> { Ok(serde_json::to_string(ids)?) }

// ─── Enumerations ────────────────────────────────────────────────────────────

pub fn encode_method(m: MatchMethod) -> &'static str { m.into() }

fn decode_method(s: &str) -> Result<MatchMethod> {
  s.parse().map_err(|_| {
    Error::Core(chorus_core::Error::UnknownDiscriminant {
      what:  "match method",
      value: s.to_owned(),
    })
  })
}

pub fn encode_entity(e: EntityType) -> &'static str { e.into() }

fn decode_entity(s: &str) -> Result<EntityType> {
  s.parse().map_err(|_| {
    Error::Core(chorus_core::Error::UnknownDiscriminant {
      what:  "entity type",
      value: s.to_owned(),
    })
  })
}

/// `(outcome, merged_into)` column pair.
pub fn encode_outcome(o: DedupOutcome) -> (&'static str, Option<i64>) {
  match o {
    DedupOutcome::Kept => ("kept", None),
    DedupOutcome::MergedInto(target) => ("merged", Some(target.get())),
    DedupOutcome::Discarded => ("discarded", None),
  }
}

fn decode_outcome(s: &str, merged_into: Option<i64>) -> Result<DedupOutcome> {
  match (s, merged_into) {
    ("kept", None) => Ok(DedupOutcome::Kept),
    ("merged", Some(target)) => Ok(DedupOutcome::MergedInto(PlayEventId(target))),
    ("discarded", None) => Ok(DedupOutcome::Discarded),
    (other, _) => Err(Error::Core(chorus_core::Error::UnknownDiscriminant {
      what:  "dedup outcome",
      value: other.to_owned(),
    })),
  }
}

fn decode_confidence(v: i64) -> Result<Confidence> { Ok(Confidence::new(v)?) }

/// `LIKE` pattern matching `text` anywhere, with wildcards in `text` escaped.
/// Use with `ESCAPE '\'`.
pub fn like_pattern(text: &str) -> String {
  let mut out = String::with_capacity(text.len() + 2);
  out.push('%');
  for c in text.chars() {
    if matches!(c, '\\' | '%' | '_') {
      out.push('\\');
    }
    out.push(c);
  }
  out.push('%');
  out
}

// ─── Observations ────────────────────────────────────────────────────────────

/// The column values of one `connector_tracks` row, ready to bind.
pub struct ObservationRow {
  pub service:      String,
  pub native_id:    String,
  pub title:        String,
  pub artists:      String,
  pub album:        Option<String>,
  pub duration_ms:  Option<u32>,
  pub release_date: Option<String>,
  pub identifiers:  String,
  pub raw:          String,
  pub refreshed_at: String,
}

impl ObservationRow {
  pub fn encode(obs: &ObservedTrack) -> Result<Self> {
    Ok(Self {
      service:      obs.service.as_str().to_owned(),
      native_id:    obs.native_id.clone(),
      title:        obs.title.clone(),
      artists:      encode_artists(&obs.artists)?,
      album:        obs.album.clone(),
      duration_ms:  obs.duration_ms,
      release_date: obs.release_date.map(encode_date),
      identifiers:  encode_ids(&obs.identifiers)?,
      raw:          serde_json::to_string(&obs.raw)?,
      refreshed_at: encode_dt(obs.observed_at),
    })
  }
}

// ─── Row types ───────────────────────────────────────────────────────────────

pub const TRACK_COLUMNS: &str = "track_id, title, artists, album, duration_ms, release_date,
   catalog_id, isrc, registry_id, created_at, updated_at, deleted_at";

/// Raw values read directly from a `tracks` row.
pub struct RawTrack {
  pub track_id:     i64,
  pub title:        String,
  pub artists:      String,
  pub album:        Option<String>,
  pub duration_ms:  Option<u32>,
  pub release_date: Option<String>,
  pub catalog_id:   Option<String>,
  pub isrc:         Option<String>,
  pub registry_id:  Option<String>,
  pub created_at:   String,
  pub updated_at:   String,
  pub deleted_at:   Option<String>,
}

impl RawTrack {
  /// Reads [`TRACK_COLUMNS`] in order.
  pub fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      track_id:     row.get(0)?,
      title:        row.get(1)?,
      artists:      row.get(2)?,
      album:        row.get(3)?,
      duration_ms:  row.get(4)?,
      release_date: row.get(5)?,
      catalog_id:   row.get(6)?,
      isrc:         row.get(7)?,
      registry_id:  row.get(8)?,
      created_at:   row.get(9)?,
      updated_at:   row.get(10)?,
      deleted_at:   row.get(11)?,
    })
  }

  pub fn into_track(self) -> Result<Track> {
    Ok(Track {
      id:           TrackId(self.track_id),
      title:        self.title,
      artists:      serde_json::from_str(&self.artists)?,
      album:        self.album,
      duration_ms:  self.duration_ms,
      release_date: decode_opt_date(self.release_date)?,
      identifiers:  DirectIds {
        catalog_id:  self.catalog_id,
        isrc:        self.isrc,
        registry_id: self.registry_id,
      },
      created_at:   decode_dt(&self.created_at)?,
      updated_at:   decode_dt(&self.updated_at)?,
      deleted_at:   decode_opt_dt(self.deleted_at)?,
    })
  }
}

pub const CONNECTOR_COLUMNS: &str = "c.connector_track_id, c.service, c.native_id, c.title,
   c.artists, c.album, c.duration_ms, c.release_date, c.identifiers, c.raw,
   c.refreshed_at";

/// Raw values read directly from a `connector_tracks` row.
pub struct RawConnectorTrack {
  pub connector_track_id: i64,
  pub service:            String,
  pub native_id:          String,
  pub title:              String,
  pub artists:            String,
  pub album:              Option<String>,
  pub duration_ms:        Option<u32>,
  pub release_date:       Option<String>,
  pub identifiers:        String,
  pub raw:                String,
  pub refreshed_at:       String,
}

impl RawConnectorTrack {
  /// Reads [`CONNECTOR_COLUMNS`] starting at column `at`.
  pub fn from_row(row: &Row<'_>, at: usize) -> rusqlite::Result<Self> {
    Ok(Self {
      connector_track_id: row.get(at)?,
      service:            row.get(at + 1)?,
      native_id:          row.get(at + 2)?,
      title:              row.get(at + 3)?,
      artists:            row.get(at + 4)?,
      album:              row.get(at + 5)?,
      duration_ms:        row.get(at + 6)?,
      release_date:       row.get(at + 7)?,
      identifiers:        row.get(at + 8)?,
      raw:                row.get(at + 9)?,
      refreshed_at:       row.get(at + 10)?,
    })
  }

  pub fn into_connector_track(self) -> Result<ConnectorTrack> {
    Ok(ConnectorTrack {
      id:           ConnectorTrackId(self.connector_track_id),
      service:      ServiceName::new(self.service),
      native_id:    self.native_id,
      title:        self.title,
      artists:      serde_json::from_str(&self.artists)?,
      album:        self.album,
      duration_ms:  self.duration_ms,
      release_date: decode_opt_date(self.release_date)?,
      identifiers:  serde_json::from_str(&self.identifiers)?,
      raw:          serde_json::from_str(&self.raw)?,
      refreshed_at: decode_dt(&self.refreshed_at)?,
    })
  }
}

/// `track_mappings m JOIN connector_tracks c`, mapping columns first.
pub const MAPPED_COLUMNS: &str = "m.mapping_id, m.track_id, m.method, m.confidence,
   m.verified_at, m.deleted_at, c.connector_track_id, c.service, c.native_id,
   c.title, c.artists, c.album, c.duration_ms, c.release_date, c.identifiers,
   c.raw, c.refreshed_at";

pub struct RawMapped {
  pub mapping_id:  i64,
  pub track_id:    i64,
  pub method:      String,
  pub confidence:  i64,
  pub verified_at: String,
  pub deleted_at:  Option<String>,
  pub connector:   RawConnectorTrack,
}

impl RawMapped {
  pub fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      mapping_id:  row.get(0)?,
      track_id:    row.get(1)?,
      method:      row.get(2)?,
      confidence:  row.get(3)?,
      verified_at: row.get(4)?,
      deleted_at:  row.get(5)?,
      connector:   RawConnectorTrack::from_row(row, 6)?,
    })
  }

  pub fn into_mapped(self) -> Result<MappedTrack> {
    let connector_track = self.connector.into_connector_track()?;
    Ok(MappedTrack {
      mapping: TrackMapping {
        id:                 MappingId(self.mapping_id),
        track_id:           TrackId(self.track_id),
        connector_track_id: connector_track.id,
        method:             decode_method(&self.method)?,
        confidence:         decode_confidence(self.confidence)?,
        verified_at:        decode_dt(&self.verified_at)?,
        deleted_at:         decode_opt_dt(self.deleted_at)?,
      },
      connector_track,
    })
  }
}

pub const PLAY_COLUMNS: &str = "play_event_id, owner, track_id, service, played_at, batch_id,
   outcome, merged_into, dedup_confidence";

pub struct RawPlayEvent {
  pub play_event_id:    i64,
  pub owner:            String,
  pub track_id:         i64,
  pub service:          String,
  pub played_at:        String,
  pub batch_id:         String,
  pub outcome:          String,
  pub merged_into:      Option<i64>,
  pub dedup_confidence: Option<i64>,
}

impl RawPlayEvent {
  pub fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      play_event_id:    row.get(0)?,
      owner:            row.get(1)?,
      track_id:         row.get(2)?,
      service:          row.get(3)?,
      played_at:        row.get(4)?,
      batch_id:         row.get(5)?,
      outcome:          row.get(6)?,
      merged_into:      row.get(7)?,
      dedup_confidence: row.get(8)?,
    })
  }

  pub fn into_event(self) -> Result<PlayEvent> {
    Ok(PlayEvent {
      id:               PlayEventId(self.play_event_id),
      owner:            self.owner,
      track_id:         TrackId(self.track_id),
      service:          ServiceName::new(self.service),
      played_at:        decode_dt(&self.played_at)?,
      batch_id:         BatchId(Uuid::parse_str(&self.batch_id)?),
      outcome:          decode_outcome(&self.outcome, self.merged_into)?,
      dedup_confidence: self.dedup_confidence.map(decode_confidence).transpose()?,
    })
  }
}

pub const PLAYLIST_COLUMNS: &str = "playlist_id, owner, name, link_service, link_remote_id,
   link_snapshot, link_synced_at, created_at, updated_at, deleted_at";

pub struct RawPlaylist {
  pub playlist_id:    i64,
  pub owner:          String,
  pub name:           String,
  pub link_service:   Option<String>,
  pub link_remote_id: Option<String>,
  pub link_snapshot:  Option<String>,
  pub link_synced_at: Option<String>,
  pub created_at:     String,
  pub updated_at:     String,
  pub deleted_at:     Option<String>,
}

impl RawPlaylist {
  pub fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      playlist_id:    row.get(0)?,
      owner:          row.get(1)?,
      name:           row.get(2)?,
      link_service:   row.get(3)?,
      link_remote_id: row.get(4)?,
      link_snapshot:  row.get(5)?,
      link_synced_at: row.get(6)?,
      created_at:     row.get(7)?,
      updated_at:     row.get(8)?,
      deleted_at:     row.get(9)?,
    })
  }

  pub fn into_playlist(self) -> Result<Playlist> {
    let link = match (self.link_service, self.link_remote_id) {
      (Some(service), Some(remote_id)) => Some(PlaylistLink {
        service: ServiceName::new(service),
        remote_id,
        snapshot: self.link_snapshot,
        synced_at: decode_opt_dt(self.link_synced_at)?,
      }),
      _ => None,
    };
    Ok(Playlist {
      id: PlaylistId(self.playlist_id),
      owner: self.owner,
      name: self.name,
      link,
      created_at: decode_dt(&self.created_at)?,
      updated_at: decode_dt(&self.updated_at)?,
      deleted_at: decode_opt_dt(self.deleted_at)?,
    })
  }
}

pub const ENTRY_COLUMNS: &str =
  "playlist_track_id, playlist_id, track_id, ordering_key, added_at, deleted_at";

pub struct RawPlaylistTrack {
  pub playlist_track_id: i64,
  pub playlist_id:       i64,
  pub track_id:          i64,
  pub ordering_key:      String,
  pub added_at:          String,
  pub deleted_at:        Option<String>,
}

impl RawPlaylistTrack {
  pub fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      playlist_track_id: row.get(0)?,
      playlist_id:       row.get(1)?,
      track_id:          row.get(2)?,
      ordering_key:      row.get(3)?,
      added_at:          row.get(4)?,
      deleted_at:        row.get(5)?,
    })
  }

  pub fn into_entry(self) -> Result<PlaylistTrack> {
    Ok(PlaylistTrack {
      id:           PlaylistTrackId(self.playlist_track_id),
      playlist_id:  PlaylistId(self.playlist_id),
      track_id:     TrackId(self.track_id),
      ordering_key: self.ordering_key,
      added_at:     decode_dt(&self.added_at)?,
      deleted_at:   decode_opt_dt(self.deleted_at)?,
    })
  }
}

pub const CHECKPOINT_COLUMNS: &str = "owner, service, entity, cursor, updated_at";

pub struct RawCheckpoint {
  pub owner:      String,
  pub service:    String,
  pub entity:     String,
  pub cursor:     Option<String>,
  pub updated_at: String,
}

impl RawCheckpoint {
  pub fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      owner:      row.get(0)?,
      service:    row.get(1)?,
      entity:     row.get(2)?,
      cursor:     row.get(3)?,
      updated_at: row.get(4)?,
    })
  }

  pub fn into_checkpoint(self) -> Result<SyncCheckpoint> {
    Ok(SyncCheckpoint {
      owner:      self.owner,
      service:    ServiceName::new(self.service),
      entity:     decode_entity(&self.entity)?,
      cursor:     self.cursor,
      updated_at: decode_dt(&self.updated_at)?,
    })
  }
}

#[cfg(test)]
mod tests {
  use chrono::TimeZone;

  use super::*;

  #[test]
  fn timestamps_sort_lexically() {
    let a = Utc.with_ymd_and_hms(2024, 3, 1, 10, 0, 0).unwrap();
    let b = a + chrono::TimeDelta::milliseconds(500);
    let c = a + chrono::TimeDelta::seconds(1);
    let (ea, eb, ec) = (encode_dt(a), encode_dt(b), encode_dt(c));
    assert!(ea < eb && eb < ec);
    assert_eq!(decode_dt(&eb).unwrap(), b);
  }

  #[test]
  fn like_patterns_escape_wildcards() {
    assert_eq!(like_pattern("100%_x"), r"%100\%\_x%");
  }

  #[test]
  fn merge_outcome_requires_target() {
    assert!(decode_outcome("merged", None).is_err());
    assert_eq!(
      decode_outcome("merged", Some(4)).unwrap(),
      DedupOutcome::MergedInto(PlayEventId(4))
    );
  }
}
