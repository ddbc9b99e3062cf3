//! Sync policy.

use serde::{Deserialize, Serialize};
use strum::Display;

use crate::error::{Result, SyncError};

/// What to do when the remote snapshot no longer matches the plan.
#[derive(
  Debug, Clone, Copy, Default, PartialEq, Eq, Display, Serialize, Deserialize,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ConflictPolicy {
  /// Report a conflict and write nothing.
  #[default]
  Abort,
  /// Write the plan against whatever the remote holds now.
  Overwrite,
}

/// How target tracks are paired with entries already on the remote list.
#[derive(
  Debug, Clone, Copy, Default, PartialEq, Eq, Display, Serialize, Deserialize,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum MatchStrategy {
  /// Mapped native ids and shared direct identifiers only.
  IdOnly,
  /// Identifiers first, then metadata scoring at or above the trust
  /// threshold for whatever is left.
  #[default]
  Comprehensive,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
  /// Most items one write call may carry.
  pub batch_ceiling:   usize,
  pub conflict_policy: ConflictPolicy,
  pub strategy:        MatchStrategy,
}

impl Default for SyncConfig {
  fn default() -> Self {
    Self {
      batch_ceiling:   100,
      conflict_policy: ConflictPolicy::default(),
      strategy:        MatchStrategy::default(),
    }
  }
}

impl SyncConfig {
  pub fn validate(&self) -> Result<()> {
    if self.batch_ceiling == 0 {
      return Err(SyncError::InvalidConfig("batch_ceiling must be at least 1".to_owned()));
    }
    Ok(())
  }
}
