//! Error type for `chorus-sync`.
//!
//! Conflicts and partially applied syncs are not errors; they come back as
//! [`SyncOutcome`](crate::SyncOutcome) values.

use chorus_core::{
  ErrorKind,
  ids::{PlaylistId, ServiceName},
};
use chorus_match::RetryFailure;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SyncError {
  #[error("a sync for playlist {0} is already in flight")]
  InFlight(PlaylistId),

  #[error("playlist not found: {0}")]
  PlaylistNotFound(PlaylistId),

  #[error("playlist {0} is not linked to a remote playlist")]
  NotLinked(PlaylistId),

  #[error("no provider adapter registered for service {0}")]
  UnknownService(ServiceName),

  #[error("invalid configuration: {0}")]
  InvalidConfig(String),

  /// The diff refers to positions the lists it is applied to do not have.
  #[error("diff does not fit its lists: {0}")]
  InconsistentDiff(String),

  #[error("remote call failed: {0}")]
  Remote(#[from] RetryFailure),

  #[error("storage error: {0}")]
  Storage(#[source] Box<dyn std::error::Error + Send + Sync>),

  #[error(transparent)]
  Match(#[from] chorus_match::Error),

  #[error(transparent)]
  Core(#[from] chorus_core::Error),
}

impl SyncError {
  pub fn storage(e: impl std::error::Error + Send + Sync + 'static) -> Self {
    Self::Storage(Box::new(e))
  }

  pub fn kind(&self) -> ErrorKind {
    match self {
      Self::InFlight(_) => ErrorKind::Conflict,
      Self::PlaylistNotFound(_) => ErrorKind::NotFound,
      Self::NotLinked(_) | Self::UnknownService(_) | Self::InvalidConfig(_) => {
        ErrorKind::Validation
      }
      Self::InconsistentDiff(_) => ErrorKind::DataIntegrity,
      Self::Remote(f) => f.kind(),
      Self::Storage(_) => ErrorKind::Storage,
      Self::Match(e) => e.kind(),
      Self::Core(e) => e.kind(),
    }
  }
}

pub type Result<T, E = SyncError> = std::result::Result<T, E>;
