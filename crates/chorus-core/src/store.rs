//! The `Repository` trait: persistence for every entity of the hub.
//!
//! Implemented by storage backends (e.g. `chorus-store-sqlite`). The
//! resolution, dedup and sync layers depend on this abstraction only.
//!
//! Nothing is ever physically deleted through this trait: removal is a
//! `deleted_at` timestamp, so history stays queryable.

use std::future::Future;

use chrono::{DateTime, Utc};

use crate::{
  checkpoint::{EntityType, SyncCheckpoint},
  ids::{MappingId, PlaylistId, ServiceName, TrackId},
  mapping::{MappedTrack, NewMapping},
  play::{DedupDecision, NewPlayEvent, PlayEvent},
  playlist::{NewPlaylist, Playlist, PlaylistEdit, PlaylistLink, PlaylistTrack},
  track::{
    ConnectorTrack, DirectIdentifier, NewTrack, ObservedTrack, Track,
    TrackMetadata, TrackQuery,
  },
};

/// Abstraction over a chorus storage backend.
///
/// Every write is scoped to one logical unit (one mapping, one import page,
/// one playlist edit set) and runs in its own short transaction.
///
/// All methods return `Send` futures so the trait can be driven from
/// multi-threaded runtimes and `buffer_unordered` streams.
pub trait Repository: Send + Sync {
  type Error: std::error::Error + Send + Sync + 'static;

  // ── Tracks ────────────────────────────────────────────────────────────

  /// Persist a new canonical track. The id is assigned by the store and
  /// never reused.
  fn insert_track(
    &self,
    input: NewTrack,
  ) -> impl Future<Output = Result<Track, Self::Error>> + Send + '_;

  /// Retrieve a track by id, including soft-deleted ones.
  fn get_track(
    &self,
    id: TrackId,
  ) -> impl Future<Output = Result<Option<Track>, Self::Error>> + Send + '_;

  /// Live tracks carrying `ident`.
  fn find_tracks_by_identifier(
    &self,
    ident: DirectIdentifier,
  ) -> impl Future<Output = Result<Vec<Track>, Self::Error>> + Send + '_;

  /// Live tracks matching `query`, ordered by id.
  fn search_tracks(
    &self,
    query: TrackQuery,
  ) -> impl Future<Output = Result<Vec<Track>, Self::Error>> + Send + '_;

  /// Refresh the mutable metadata of a live track. Identifiers are only
  /// ever added, never overwritten.
  fn refresh_track_metadata(
    &self,
    id: TrackId,
    metadata: TrackMetadata,
  ) -> impl Future<Output = Result<Track, Self::Error>> + Send + '_;

  fn soft_delete_track(
    &self,
    id: TrackId,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + '_;

  // ── Connector tracks ──────────────────────────────────────────────────

  /// Insert or refresh observations, keyed by `(service, native_id)`, in one
  /// transaction.
  fn upsert_connector_tracks(
    &self,
    observed: Vec<ObservedTrack>,
  ) -> impl Future<Output = Result<Vec<ConnectorTrack>, Self::Error>> + Send + '_;

  fn get_connector_track(
    &self,
    service: ServiceName,
    native_id: String,
  ) -> impl Future<Output = Result<Option<ConnectorTrack>, Self::Error>> + Send + '_;

  // ── Mappings ──────────────────────────────────────────────────────────

  /// Active mappings of a track, optionally restricted to one service,
  /// strongest first.
  fn active_mappings(
    &self,
    track_id: TrackId,
    service: Option<ServiceName>,
  ) -> impl Future<Output = Result<Vec<MappedTrack>, Self::Error>> + Send + '_;

  /// Active mappings pointing at one service observation.
  fn mappings_for_native(
    &self,
    service: ServiceName,
    native_id: String,
  ) -> impl Future<Output = Result<Vec<MappedTrack>, Self::Error>> + Send + '_;

  /// Upsert the observation and the mapping edge in one transaction.
  ///
  /// If an active mapping already links the pair it is soft-deleted and
  /// replaced, so at most one active mapping exists per pair.
  fn record_mapping(
    &self,
    input: NewMapping,
  ) -> impl Future<Output = Result<MappedTrack, Self::Error>> + Send + '_;

  fn soft_delete_mapping(
    &self,
    id: MappingId,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + '_;

  // ── Play events ───────────────────────────────────────────────────────

  /// Insert a page of play events in one transaction. Events identical in
  /// `(owner, service, track, played_at)` to a stored event are skipped;
  /// only newly stored events are returned.
  fn insert_play_events(
    &self,
    events: Vec<NewPlayEvent>,
  ) -> impl Future<Output = Result<Vec<PlayEvent>, Self::Error>> + Send + '_;

  /// The owner's events with `from <= played_at < to`, ordered by
  /// `(played_at, service, id)`.
  fn play_events_in_window(
    &self,
    owner: String,
    from: DateTime<Utc>,
    to: DateTime<Utc>,
  ) -> impl Future<Output = Result<Vec<PlayEvent>, Self::Error>> + Send + '_;

  /// Persist deduplication verdicts in one transaction. Returns the number
  /// of events updated.
  fn record_dedup_outcomes(
    &self,
    decisions: Vec<DedupDecision>,
  ) -> impl Future<Output = Result<usize, Self::Error>> + Send + '_;

  // ── Playlists ─────────────────────────────────────────────────────────

  fn create_playlist(
    &self,
    input: NewPlaylist,
  ) -> impl Future<Output = Result<Playlist, Self::Error>> + Send + '_;

  fn get_playlist(
    &self,
    id: PlaylistId,
  ) -> impl Future<Output = Result<Option<Playlist>, Self::Error>> + Send + '_;

  /// Live membership rows ordered by ordering key.
  fn playlist_tracks(
    &self,
    id: PlaylistId,
  ) -> impl Future<Output = Result<Vec<PlaylistTrack>, Self::Error>> + Send + '_;

  /// Apply `edits` in one transaction and return the resulting live
  /// membership, ordered.
  fn apply_playlist_edits(
    &self,
    id: PlaylistId,
    edits: Vec<PlaylistEdit>,
  ) -> impl Future<Output = Result<Vec<PlaylistTrack>, Self::Error>> + Send + '_;

  /// Record where and at which snapshot the playlist was last synced.
  fn record_playlist_sync(
    &self,
    id: PlaylistId,
    link: PlaylistLink,
  ) -> impl Future<Output = Result<Playlist, Self::Error>> + Send + '_;

  // ── Checkpoints ───────────────────────────────────────────────────────

  fn get_checkpoint(
    &self,
    owner: String,
    service: ServiceName,
    entity: EntityType,
  ) -> impl Future<Output = Result<Option<SyncCheckpoint>, Self::Error>> + Send + '_;

  /// Insert or replace the checkpoint for its `(owner, service, entity)`.
  fn save_checkpoint(
    &self,
    checkpoint: SyncCheckpoint,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + '_;

  fn list_checkpoints(
    &self,
    owner: String,
    service: Option<ServiceName>,
  ) -> impl Future<Output = Result<Vec<SyncCheckpoint>, Self::Error>> + Send + '_;
}
