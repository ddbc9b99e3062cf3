//! Connector contracts: the narrow surface over each service's HTTP plumbing.
//!
//! A [`Connector`] speaks raw payloads (`serde_json::Value`). Interpreting
//! those payloads is the job of a [`ProviderAdapter`](crate::provider::ProviderAdapter);
//! nothing else in the workspace reads raw structure.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use strum::{Display, IntoStaticStr};
use thiserror::Error;

use crate::{
  ErrorKind,
  ids::ServiceName,
  track::{DirectIdentifier, TrackLike},
};

// ─── Errors ──────────────────────────────────────────────────────────────────

/// A classified failure returned by a connector or adapter call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind}: {message}")]
pub struct ConnectorError {
  pub kind:        ErrorKind,
  pub message:     String,
  /// Server-provided hint for rate-limited responses.
  pub retry_after: Option<Duration>,
}

impl ConnectorError {
  pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
    Self { kind, message: message.into(), retry_after: None }
  }

  pub fn transient(message: impl Into<String>) -> Self {
    Self::new(ErrorKind::Transient, message)
  }

  pub fn permanent(message: impl Into<String>) -> Self {
    Self::new(ErrorKind::Permanent, message)
  }

  pub fn not_found(message: impl Into<String>) -> Self {
    Self::new(ErrorKind::NotFound, message)
  }

  pub fn conflict(message: impl Into<String>) -> Self {
    Self::new(ErrorKind::Conflict, message)
  }

  pub fn validation(message: impl Into<String>) -> Self {
    Self::new(ErrorKind::Validation, message)
  }

  pub fn rate_limited(
    message: impl Into<String>,
    retry_after: Option<Duration>,
  ) -> Self {
    Self { retry_after, ..Self::new(ErrorKind::RateLimited, message) }
  }

  pub fn is_retryable(&self) -> bool { self.kind.is_retryable() }
}

// ─── Queries and pages ───────────────────────────────────────────────────────

/// A search request against one service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "by", rename_all = "snake_case")]
pub enum SearchQuery {
  Identifier(DirectIdentifier),
  Text {
    title:  String,
    artist: Option<String>,
  },
}

impl SearchQuery {
  /// A free-text query built from a track's title and lead artist.
  pub fn for_track(track: &impl TrackLike) -> Self {
    Self::Text {
      title:  track.title().trim().to_owned(),
      artist: track.artists().first().map(|a| a.trim().to_owned()),
    }
  }
}

/// One page of raw recent-play payloads.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PlaysPage {
  pub items:       Vec<serde_json::Value>,
  /// `None` once the history is exhausted.
  pub next_cursor: Option<String>,
}

/// A raw remote playlist as the service returned it.
#[derive(Debug, Clone, PartialEq)]
pub struct RemotePlaylistPayload {
  pub remote_id: String,
  /// The service's own snapshot/version token, if it has one.
  pub version:   Option<String>,
  pub items:     Vec<serde_json::Value>,
}

// ─── Playlist write operations ───────────────────────────────────────────────

#[derive(
  Debug, Clone, Copy, PartialEq, Eq, Hash, Display, IntoStaticStr, Serialize,
  Deserialize,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum OpKind {
  Remove,
  Add,
  Move,
}

/// A concrete, index-based playlist write.
///
/// Indices refer to the remote list as it stands when the operation is
/// applied, after every earlier operation in the same run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum PlaylistOp {
  /// Remove the item at `index`. `native_id` lets services that remove by
  /// id double-check the target.
  Remove { index: usize, native_id: String },
  /// Insert `native_ids`, in order, so the first lands at `index`.
  Add { index: usize, native_ids: Vec<String> },
  /// Take `len` items starting at `from`; after removal, reinsert them so the
  /// first lands at `to`.
  Move { from: usize, to: usize, len: usize },
}

impl PlaylistOp {
  pub fn kind(&self) -> OpKind {
    match self {
      Self::Remove { .. } => OpKind::Remove,
      Self::Add { .. } => OpKind::Add,
      Self::Move { .. } => OpKind::Move,
    }
  }

  /// How many items count against a service's per-call ceiling.
  pub fn item_count(&self) -> usize {
    match self {
      Self::Remove { .. } => 1,
      Self::Add { native_ids, .. } => native_ids.len(),
      Self::Move { len, .. } => *len,
    }
  }
}

// ─── Connector ───────────────────────────────────────────────────────────────

/// Raw access to one external service.
///
/// Implementations wrap HTTP plumbing and credentials; they never persist
/// anything and never decide matches. Every method returns a classified
/// [`ConnectorError`] on failure.
#[async_trait]
pub trait Connector: Send + Sync {
  fn service(&self) -> &ServiceName;

  async fn fetch_catalog_track(
    &self,
    native_id: &str,
  ) -> Result<Option<serde_json::Value>, ConnectorError>;

  async fn search(
    &self,
    query: &SearchQuery,
  ) -> Result<Vec<serde_json::Value>, ConnectorError>;

  /// Fetch plays after `cursor` (from the beginning when `None`).
  async fn fetch_recent_plays(
    &self,
    cursor: Option<&str>,
  ) -> Result<PlaysPage, ConnectorError>;

  async fn fetch_playlist(
    &self,
    remote_id: &str,
  ) -> Result<RemotePlaylistPayload, ConnectorError>;

  /// Apply `ops` in order, only if the remote version still equals
  /// `expected_version`. Returns the new version.
  async fn write_playlist_ops(
    &self,
    remote_id: &str,
    ops: &[PlaylistOp],
    expected_version: &str,
  ) -> Result<String, ConnectorError>;
}

// ─── Playlist writer ─────────────────────────────────────────────────────────

/// The external write collaborator the sync executor drives.
#[async_trait]
pub trait PlaylistWriter: Send + Sync {
  /// The current snapshot token of the remote playlist.
  async fn snapshot_token(&self, remote_id: &str) -> Result<String, ConnectorError>;

  /// Apply one batch of operations guarded by `expected_version`; returns
  /// the token after the write.
  async fn write_ops(
    &self,
    remote_id: &str,
    ops: &[PlaylistOp],
    expected_version: &str,
  ) -> Result<String, ConnectorError>;
}
