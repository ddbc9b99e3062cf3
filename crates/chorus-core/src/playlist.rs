//! Playlists and their ordered membership.
//!
//! Order lives in an opaque, densely sortable ordering key per membership row
//! (see [`crate::ordering`]). Inserting between two rows or moving a row only
//! touches that row's key.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{PlaylistId, PlaylistTrackId, ServiceName, TrackId};

/// Where a local playlist is mirrored on an external service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaylistLink {
  pub service:   ServiceName,
  pub remote_id: String,
  /// The snapshot token observed after the last successful sync.
  pub snapshot:  Option<String>,
  pub synced_at: Option<DateTime<Utc>>,
}

/// The canonical playlist container.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Playlist {
  pub id:         PlaylistId,
  pub owner:      String,
  pub name:       String,
  pub link:       Option<PlaylistLink>,
  pub created_at: DateTime<Utc>,
  pub updated_at: DateTime<Utc>,
  pub deleted_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct NewPlaylist {
  pub owner: String,
  pub name:  String,
  pub link:  Option<PlaylistLink>,
}

/// One row of a playlist. Belongs to exactly one playlist.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaylistTrack {
  pub id:           PlaylistTrackId,
  pub playlist_id:  PlaylistId,
  pub track_id:     TrackId,
  pub ordering_key: String,
  pub added_at:     DateTime<Utc>,
  pub deleted_at:   Option<DateTime<Utc>>,
}

/// A single change to a playlist's membership, applied transactionally by
/// [`Repository::apply_playlist_edits`](crate::store::Repository::apply_playlist_edits).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlaylistEdit {
  Insert {
    track_id:     TrackId,
    ordering_key: String,
  },
  /// Reordering is a key update; the row itself is never rewritten.
  Reorder {
    entry:        PlaylistTrackId,
    ordering_key: String,
  },
  /// Soft delete.
  Remove { entry: PlaylistTrackId },
}
