//! Error types for `chorus-core`, and the failure classification shared by
//! every crate in the workspace.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString, IntoStaticStr};
use thiserror::Error;

use crate::ids::PlayEventId;

// ─── Classification ──────────────────────────────────────────────────────────

/// The classified kind of a failure.
///
/// Every failure reported out of a batch names one of these, so callers can
/// decide whether to retry the affected entity, fix its input, or escalate.
#[derive(
  Debug,
  Clone,
  Copy,
  PartialEq,
  Eq,
  Hash,
  PartialOrd,
  Ord,
  Display,
  EnumString,
  IntoStaticStr,
  Serialize,
  Deserialize,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
  /// Malformed input. Rejected immediately, never retried.
  Validation,
  /// Timeout, connection reset, 5xx.
  Transient,
  /// The service asked us to slow down.
  RateLimited,
  /// Auth failure or any other error that will not go away on retry.
  Permanent,
  NotFound,
  /// Version mismatch against the remote state.
  Conflict,
  /// A broken invariant: indicates a defect, never retried.
  DataIntegrity,
  Cancelled,
  Storage,
}

impl ErrorKind {
  /// Only transient and rate-limited failures are eligible for retry.
  pub fn is_retryable(self) -> bool {
    matches!(self, Self::Transient | Self::RateLimited)
  }
}

// ─── Error ───────────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum Error {
  #[error("validation error: {0}")]
  Validation(String),

  #[error("confidence {0} is outside 0..=100")]
  ConfidenceOutOfRange(i64),

  #[error("merge pointer from play event {0} is cyclic or multi-hop")]
  CyclicMerge(PlayEventId),

  #[error("merge pointer from play event {0} targets an event outside the set")]
  DanglingMerge(PlayEventId),

  #[error("invalid ordering key: {0:?}")]
  InvalidOrderingKey(String),

  #[error("ordering keys out of order: {0:?} must sort before {1:?}")]
  KeysOutOfOrder(String, String),

  #[error("unknown {what}: {value:?}")]
  UnknownDiscriminant { what: &'static str, value: String },

  #[error("serialization error: {0}")]
  Serialization(#[from] serde_json::Error),
}

impl Error {
  pub fn kind(&self) -> ErrorKind {
    match self {
      Self::ConfidenceOutOfRange(_)
      | Self::CyclicMerge(_)
      | Self::DanglingMerge(_) => ErrorKind::DataIntegrity,
      Self::Validation(_)
      | Self::InvalidOrderingKey(_)
      | Self::KeysOutOfOrder(..)
      | Self::UnknownDiscriminant { .. }
      | Self::Serialization(_) => ErrorKind::Validation,
    }
  }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
