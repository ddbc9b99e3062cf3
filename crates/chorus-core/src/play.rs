//! Play events: immutable records of a track being played.
//!
//! The only mutation a play event ever receives is the outcome of
//! deduplication. Merge pointers go one way, from a merged event to the
//! event that was kept.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
  ids::{BatchId, PlayEventId, ServiceName, TrackId},
  mapping::Confidence,
  track::ObservedTrack,
};

/// What deduplication decided about a play event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "outcome", content = "into", rename_all = "snake_case")]
pub enum DedupOutcome {
  /// The event stands on its own (the default until deduplicated).
  #[default]
  Kept,
  /// The same physical play as the referenced (kept) event.
  MergedInto(PlayEventId),
  /// An exact re-report of another event from the same service.
  Discarded,
}

impl DedupOutcome {
  pub fn merge_target(self) -> Option<PlayEventId> {
    match self {
      Self::MergedInto(id) => Some(id),
      Self::Kept | Self::Discarded => None,
    }
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayEvent {
  pub id:               PlayEventId,
  pub owner:            String,
  pub track_id:         TrackId,
  /// The service that reported the play.
  pub service:          ServiceName,
  pub played_at:        DateTime<Utc>,
  pub batch_id:         BatchId,
  pub outcome:          DedupOutcome,
  /// Evidence for the outcome; `None` until deduplication has run.
  pub dedup_confidence: Option<Confidence>,
}

/// Input to [`Repository::insert_play_events`](crate::store::Repository::insert_play_events).
#[derive(Debug, Clone, PartialEq)]
pub struct NewPlayEvent {
  pub owner:     String,
  pub track_id:  TrackId,
  pub service:   ServiceName,
  pub played_at: DateTime<Utc>,
  pub batch_id:  BatchId,
}

/// A play as reported by a service, before the track is resolved.
#[derive(Debug, Clone, PartialEq)]
pub struct ObservedPlay {
  pub track:     ObservedTrack,
  pub played_at: DateTime<Utc>,
}

/// One deduplication verdict, persisted by
/// [`Repository::record_dedup_outcomes`](crate::store::Repository::record_dedup_outcomes).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DedupDecision {
  pub event:      PlayEventId,
  pub outcome:    DedupOutcome,
  pub confidence: Confidence,
}
