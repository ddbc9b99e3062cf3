//! Mapping edges between canonical tracks and connector observations.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString, IntoStaticStr};

use crate::{
  Error, Result,
  ids::{ConnectorTrackId, MappingId, TrackId},
  track::{ConnectorTrack, ObservedTrack},
};

// ─── Confidence ──────────────────────────────────────────────────────────────

/// Certainty, 0–100, that two records denote the same recording.
///
/// The range is enforced at construction and on deserialisation; a value
/// outside it is a data-integrity error.
#[derive(
  Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default,
  Serialize, Deserialize,
)]
#[serde(try_from = "i64", into = "u8")]
pub struct Confidence(u8);

impl Confidence {
  pub const ZERO: Self = Self(0);
  pub const MAX: Self = Self(100);

  pub fn new(value: i64) -> Result<Self> {
    if (0..=100).contains(&value) {
      Ok(Self(value as u8))
    } else {
      Err(Error::ConfidenceOutOfRange(value))
    }
  }

  /// Clamp into range; used where arithmetic may overshoot (penalties).
  pub fn saturating(value: i64) -> Self { Self(value.clamp(0, 100) as u8) }

  pub fn value(self) -> u8 { self.0 }
}

impl TryFrom<i64> for Confidence {
  type Error = Error;

  fn try_from(value: i64) -> Result<Self> { Self::new(value) }
}

impl From<Confidence> for u8 {
  fn from(c: Confidence) -> Self { c.0 }
}

impl fmt::Display for Confidence {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}", self.0)
  }
}

// ─── Match method ────────────────────────────────────────────────────────────

/// How a mapping was established.
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
pub enum MatchMethod {
  /// The canonical track was created from this very observation.
  DirectImport,
  /// Linked through a shared direct identifier.
  DeterministicIdChain,
  FuzzyMetadata,
  /// Set by the owner. Always trusted, never replaced by automatic matching.
  ManualOverride,
}

// ─── Mapping ─────────────────────────────────────────────────────────────────

/// An edge between a [`Track`](crate::track::Track) and a [`ConnectorTrack`].
///
/// At most one active (non-deleted) mapping exists per pair; re-recording a
/// pair replaces the active edge and refreshes `verified_at`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackMapping {
  pub id:                 MappingId,
  pub track_id:           TrackId,
  pub connector_track_id: ConnectorTrackId,
  pub method:             MatchMethod,
  pub confidence:         Confidence,
  pub verified_at:        DateTime<Utc>,
  pub deleted_at:         Option<DateTime<Utc>>,
}

impl TrackMapping {
  /// Whether downstream consumers may rely on this mapping.
  pub fn is_trusted(&self, trust_threshold: Confidence) -> bool {
    self.deleted_at.is_none()
      && (self.method == MatchMethod::ManualOverride
        || self.confidence >= trust_threshold)
  }
}

/// A mapping together with the observation it points at.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MappedTrack {
  pub mapping:         TrackMapping,
  pub connector_track: ConnectorTrack,
}

/// Input to [`Repository::record_mapping`](crate::store::Repository::record_mapping).
///
/// The observation is upserted in the same transaction as the mapping.
#[derive(Debug, Clone)]
pub struct NewMapping {
  pub track_id:   TrackId,
  pub observed:   ObservedTrack,
  pub method:     MatchMethod,
  pub confidence: Confidence,
}
