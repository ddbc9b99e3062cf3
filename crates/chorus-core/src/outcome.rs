//! Per-item outcomes and aggregate summaries for batch operations.
//!
//! One item's failure never fails a batch: it becomes an [`ItemFailure`]
//! in the outcome list, naming the affected entity and its classified kind so
//! the caller can retry exactly that entity.

use std::{collections::BTreeMap, fmt};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{
  ErrorKind,
  ids::{PlayEventId, PlaylistId, ServiceName, TrackId},
};

/// The entity a failure is about.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "entity", rename_all = "snake_case")]
pub enum EntityRef {
  Track { id: TrackId },
  PlayEvent { id: PlayEventId },
  Playlist { id: PlaylistId },
  /// Something that only exists on a service, e.g. a remote track or play.
  Remote { service: ServiceName, native_id: String },
  /// One page of a paginated import.
  Page { service: ServiceName, cursor: Option<String> },
}

impl fmt::Display for EntityRef {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Self::Track { id } => write!(f, "track {id}"),
      Self::PlayEvent { id } => write!(f, "play event {id}"),
      Self::Playlist { id } => write!(f, "playlist {id}"),
      Self::Remote { service, native_id } => write!(f, "{service}:{native_id}"),
      Self::Page { service, cursor } => {
        write!(f, "{service} page at {}", cursor.as_deref().unwrap_or("start"))
      }
    }
  }
}

/// A failed batch item.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{kind} failure on {entity} after {attempts} attempt(s): {message}")]
pub struct ItemFailure {
  pub entity:   EntityRef,
  pub kind:     ErrorKind,
  pub message:  String,
  pub attempts: u32,
}

pub type ItemOutcome<T> = Result<T, ItemFailure>;

/// Aggregate counts over a batch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchSummary {
  pub total:     usize,
  pub succeeded: usize,
  pub failed:    usize,
  pub by_kind:   BTreeMap<ErrorKind, usize>,
}

/// The result of any batch operation: every item's outcome plus a summary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchReport<T> {
  pub outcomes: Vec<ItemOutcome<T>>,
  pub summary:  BatchSummary,
}

impl<T> BatchReport<T> {
  pub fn from_outcomes(outcomes: Vec<ItemOutcome<T>>) -> Self {
    let mut summary = BatchSummary {
      total: outcomes.len(),
      ..BatchSummary::default()
    };
    for outcome in &outcomes {
      match outcome {
        Ok(_) => summary.succeeded += 1,
        Err(failure) => {
          summary.failed += 1;
          *summary.by_kind.entry(failure.kind).or_default() += 1;
        }
      }
    }
    Self { outcomes, summary }
  }

  pub fn successes(&self) -> impl Iterator<Item = &T> {
    self.outcomes.iter().filter_map(|o| o.as_ref().ok())
  }

  pub fn failures(&self) -> impl Iterator<Item = &ItemFailure> {
    self.outcomes.iter().filter_map(|o| o.as_ref().err())
  }

  pub fn is_complete_success(&self) -> bool { self.summary.failed == 0 }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn summary_counts_by_kind() {
    let fail = |kind| ItemFailure {
      entity: EntityRef::Track { id: TrackId(1) },
      kind,
      message: "boom".into(),
      attempts: 1,
    };
    let report = BatchReport::from_outcomes(vec![
      Ok(1),
      Err(fail(ErrorKind::Transient)),
      Ok(2),
      Err(fail(ErrorKind::Transient)),
      Err(fail(ErrorKind::NotFound)),
    ]);
    assert_eq!(report.summary.total, 5);
    assert_eq!(report.summary.succeeded, 2);
    assert_eq!(report.summary.failed, 3);
    assert_eq!(report.summary.by_kind[&ErrorKind::Transient], 2);
    assert_eq!(report.successes().copied().collect::<Vec<_>>(), vec![1, 2]);
    assert!(!report.is_complete_success());
  }
}
