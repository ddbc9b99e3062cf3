//! Differential playlist sync for the chorus hub.
//!
//! A sync runs in three steps, each usable on its own:
//!
//! 1. [`diff`](diff::diff) pairs the remote list with the target list and
//!    keeps the longest already-ordered run of pairs in place.
//! 2. [`SyncPlan::build`] turns that diff into concrete index operations,
//!    grouped into single-kind batches under the service's item ceiling.
//! 3. [`SyncExecutor`] checks the remote snapshot token and writes the
//!    batches in order, each guarded by the version the previous one
//!    returned.
//!
//! [`reconcile_local_playlist`] reuses the same diff to reorder a local
//! playlist through ordering-key edits.

pub mod config;
pub mod diff;
pub mod error;
pub mod executor;
pub mod local;
pub mod plan;
pub mod snapshot;
pub mod writer;

pub use config::{ConflictPolicy, MatchStrategy, SyncConfig};
pub use diff::{Move, Pair, PlaylistDiff, TargetTrack, diff, diff_ids};
pub use error::{Result, SyncError};
pub use executor::{SyncExecutor, SyncOutcome};
pub use local::reconcile_local_playlist;
pub use plan::{OpBatch, SyncEstimate, SyncPlan, apply_ops, sequence_operations};
pub use snapshot::{compute_token, snapshot_token};
pub use writer::AdapterWriter;
