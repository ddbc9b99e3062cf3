//! Error types for payload normalisation.

use chorus_core::connector::ConnectorError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  #[error("{service} payload is missing `{field}`")]
  MissingField {
    service: &'static str,
    field:   &'static str,
  },

  #[error("{service} payload has an invalid `{field}`: {value}")]
  InvalidField {
    service: &'static str,
    field:   &'static str,
    value:   String,
  },

  #[error("{0} does not report plays")]
  PlaysUnsupported(&'static str),

  #[error("JSON error: {0}")]
  Json(#[from] serde_json::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// A payload that cannot be interpreted is malformed input, never retried.
impl From<Error> for ConnectorError {
  fn from(e: Error) -> Self { ConnectorError::validation(e.to_string()) }
}
