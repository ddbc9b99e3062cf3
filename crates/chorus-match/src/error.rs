//! Error types for `chorus-match`.
//!
//! Only failures that stop a whole operation surface here. Per-item
//! failures inside a batch are values in its
//! [`BatchReport`](chorus_core::outcome::BatchReport).

use chorus_core::{
  ErrorKind,
  ids::ServiceName,
  outcome::{EntityRef, ItemFailure},
};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  #[error("no provider adapter registered for service {0}")]
  UnknownService(ServiceName),

  #[error("invalid configuration: {0}")]
  InvalidConfig(String),

  #[error("storage error: {0}")]
  Storage(#[source] Box<dyn std::error::Error + Send + Sync>),

  #[error(transparent)]
  Core(#[from] chorus_core::Error),
}

impl Error {
  pub(crate) fn storage(e: impl std::error::Error + Send + Sync + 'static) -> Self {
    Self::Storage(Box::new(e))
  }

  pub fn kind(&self) -> ErrorKind {
    match self {
      Self::UnknownService(_) | Self::InvalidConfig(_) => ErrorKind::Validation,
      Self::Storage(_) => ErrorKind::Storage,
      Self::Core(e) => e.kind(),
    }
  }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// A storage failure scoped to one batch item.
pub(crate) fn storage_failure(
  entity: EntityRef,
  e: impl std::fmt::Display,
) -> ItemFailure {
  ItemFailure {
    entity,
    kind: ErrorKind::Storage,
    message: e.to_string(),
    attempts: 1,
  }
}
