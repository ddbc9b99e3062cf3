//! Track identity resolution for the chorus hub.
//!
//! Scores candidate pairs, resolves canonical tracks onto external services,
//! imports play history, and deduplicates plays reported by more than one
//! service. Everything here talks to storage through
//! [`Repository`](chorus_core::store::Repository) and to services through
//! [`ProviderAdapter`](chorus_core::provider::ProviderAdapter).

pub mod config;
pub mod dedup;
pub mod error;
pub mod import;
pub mod resolve;
pub mod retry;
pub mod scoring;
#[cfg(test)]
mod testing;

pub use self::{
  config::{DedupConfig, MatchConfig},
  dedup::{DedupResult, dedup, dedup_between, validate_merge_chains},
  error::{Error, Result},
  import::{ImportReport, PlayImporter},
  resolve::{MatchOutcome, MatchStatus, Resolver},
  retry::{RetryFailure, RetryPolicy},
  scoring::{Evidence, MatchScore, score},
};
