//! Resumable-import checkpoints.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString, IntoStaticStr};

use crate::ids::ServiceName;

/// What kind of entity a checkpoint tracks progress for.
#[derive(
  Debug,
  Clone,
  Copy,
  PartialEq,
  Eq,
  Hash,
  Display,
  EnumString,
  IntoStaticStr,
  Serialize,
  Deserialize,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
  Plays,
  Playlists,
  Tracks,
}

/// The last successfully processed position for one
/// `(owner, service, entity)` stream. One row per key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncCheckpoint {
  pub owner:      String,
  pub service:    ServiceName,
  pub entity:     EntityType,
  /// Opaque to everything but the connector that issued it.
  pub cursor:     Option<String>,
  pub updated_at: DateTime<Utc>,
}
