//! Error type for `chorus-store-sqlite`.

use chorus_core::{
  ErrorKind,
  ids::{MappingId, PlayEventId, PlaylistId, PlaylistTrackId, TrackId},
};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  #[error("core error: {0}")]
  Core(#[from] chorus_core::Error),

  #[error("database error: {0}")]
  Database(#[from] tokio_rusqlite::Error),

  #[error("json error: {0}")]
  Json(#[from] serde_json::Error),

  #[error("uuid parse error: {0}")]
  Uuid(#[from] uuid::Error),

  #[error("date/time parse error: {0}")]
  DateParse(String),

  #[error("track not found: {0}")]
  TrackNotFound(TrackId),

  #[error("track {0} is deleted")]
  TrackDeleted(TrackId),

  #[error("mapping not found: {0}")]
  MappingNotFound(MappingId),

  #[error("play event not found: {0}")]
  PlayEventNotFound(PlayEventId),

  #[error("playlist not found: {0}")]
  PlaylistNotFound(PlaylistId),

  /// The entry is missing, deleted, or belongs to another playlist.
  #[error("playlist entry {entry} not found in playlist {playlist}")]
  PlaylistTrackNotFound {
    playlist: PlaylistId,
    entry:    PlaylistTrackId,
  },
}

impl Error {
  pub fn kind(&self) -> ErrorKind {
    match self {
      Self::Core(e) => e.kind(),
      Self::Database(_) => ErrorKind::Storage,
      Self::Json(_) | Self::Uuid(_) | Self::DateParse(_) => ErrorKind::DataIntegrity,
      Self::TrackDeleted(_) => ErrorKind::Validation,
      Self::TrackNotFound(_)
      | Self::MappingNotFound(_)
      | Self::PlayEventNotFound(_)
      | Self::PlaylistNotFound(_)
      | Self::PlaylistTrackNotFound { .. } => ErrorKind::NotFound,
    }
  }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
