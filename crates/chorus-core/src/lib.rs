//! Core types and trait definitions for the chorus music metadata hub.
//!
//! This crate is deliberately free of HTTP and database dependencies. It
//! defines the canonical data model (tracks, connector observations, mappings,
//! play events, playlists, checkpoints), the error taxonomy, and the contracts
//! every backend and service integration implements.

// We intentionally use native `async fn` in traits for the repository.
// Suppress the advisory lint about `Send` bounds on the returned futures.
#![allow(async_fn_in_trait)]

pub mod checkpoint;
pub mod connector;
pub mod error;
pub mod ids;
pub mod mapping;
pub mod ordering;
pub mod outcome;
pub mod play;
pub mod playlist;
pub mod provider;
pub mod store;
pub mod track;

pub use error::{Error, ErrorKind, Result};
