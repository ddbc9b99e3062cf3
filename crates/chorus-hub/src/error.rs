//! Error type for `chorus-hub`.

use chorus_core::ErrorKind;
use chorus_sync::SyncError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  #[error(transparent)]
  Match(#[from] chorus_match::Error),

  #[error(transparent)]
  Sync(#[from] SyncError),

  #[error("storage error: {0}")]
  Storage(#[source] Box<dyn std::error::Error + Send + Sync>),

  #[error(transparent)]
  Core(#[from] chorus_core::Error),

  #[error("configuration error: {0}")]
  Config(#[from] config::ConfigError),
}

impl Error {
  pub(crate) fn storage(e: impl std::error::Error + Send + Sync + 'static) -> Self {
    Self::Storage(Box::new(e))
  }

  pub fn kind(&self) -> ErrorKind {
    match self {
      Self::Match(e) => e.kind(),
      Self::Sync(e) => e.kind(),
      Self::Storage(_) => ErrorKind::Storage,
      Self::Core(e) => e.kind(),
      Self::Config(_) => ErrorKind::Validation,
    }
  }
}

impl From<chorus_match::RetryFailure> for Error {
  fn from(failure: chorus_match::RetryFailure) -> Self { Self::Sync(SyncError::Remote(failure)) }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
