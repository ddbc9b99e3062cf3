//! Differential sync executor.
//!
//! Before the first write the remote snapshot token is read and compared
//! with the token the plan was built against. A mismatch aborts with zero
//! writes unless the policy says to overwrite. Batches are then written in
//! plan order, each guarded by the version the previous write returned.
//! Cancellation is checked before every external call, never during one.

use chorus_core::{
  ErrorKind,
  connector::PlaylistWriter,
  outcome::{EntityRef, ItemFailure},
};
use chorus_match::RetryPolicy;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{
  config::{ConflictPolicy, SyncConfig},
  error::Result,
  plan::{SyncEstimate, SyncPlan},
};

/// How a sync run ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum SyncOutcome {
  /// Nothing was dispatched.
  DryRun { estimate: SyncEstimate },
  Applied {
    batches:    usize,
    operations: usize,
    /// The remote version after the last write.
    version:    String,
  },
  /// The remote changed since the plan was computed; nothing was written.
  /// The caller must re-fetch and re-diff.
  Conflict {
    expected: String,
    /// `None` when the service rejected the first write without saying
    /// what it holds now.
    actual:   Option<String>,
  },
  /// Writing stopped after `applied_batches` of `total_batches`.
  PartialFailure {
    applied_batches: usize,
    total_batches:   usize,
    /// The remote version after the last successful write.
    version:         String,
    failure:         ItemFailure,
  },
}

impl SyncOutcome {
  pub fn is_applied(&self) -> bool { matches!(self, Self::Applied { .. }) }
}

pub struct SyncExecutor {
  config: SyncConfig,
  retry:  RetryPolicy,
}

impl SyncExecutor {
  pub fn new(config: SyncConfig, retry: RetryPolicy) -> Self { Self { config, retry } }

  /// Run `plan` against `writer`.
  ///
  /// Fails only when the snapshot token cannot be read; every outcome after
  /// that is a [`SyncOutcome`].
  pub async fn execute(
    &self,
    writer: &dyn PlaylistWriter,
    plan: &SyncPlan,
    dry_run: bool,
    cancel: &CancellationToken,
  ) -> Result<SyncOutcome> {
    if dry_run {
      let estimate = plan.estimate();
      info!(
        service = %plan.service,
        remote_id = %plan.remote_id,
        operations = estimate.operations,
        calls = estimate.calls,
        "dry run; nothing written"
      );
      return Ok(SyncOutcome::DryRun { estimate });
    }

    let actual = self
      .retry
      .run(cancel, "snapshot_token", || writer.snapshot_token(&plan.remote_id))
      .await?;

    let mut version = if actual == plan.base_token {
      actual
    } else {
      match self.config.conflict_policy {
        ConflictPolicy::Abort => {
          warn!(
            service = %plan.service,
            remote_id = %plan.remote_id,
            expected = %plan.base_token,
            actual = %actual,
            "remote playlist changed since planning; nothing written"
          );
          return Ok(SyncOutcome::Conflict {
            expected: plan.base_token.clone(),
            actual:   Some(actual),
          });
        }
        ConflictPolicy::Overwrite => {
          warn!(
            service = %plan.service,
            remote_id = %plan.remote_id,
            expected = %plan.base_token,
            actual = %actual,
            "remote playlist changed since planning; overwriting"
          );
          actual
        }
      }
    };

    let total = plan.batches.len();
    for (applied, batch) in plan.batches.iter().enumerate() {
      let written = self
        .retry
        .run(cancel, "write_playlist_ops", || {
          writer.write_ops(&plan.remote_id, &batch.ops, &version)
        })
        .await;
      match written {
        Ok(next) => {
          debug!(
            remote_id = %plan.remote_id,
            batch = applied,
            kind = %batch.kind,
            items = batch.item_count(),
            "batch written"
          );
          version = next;
        }
        Err(failure) if applied == 0 && failure.kind() == ErrorKind::Conflict => {
          warn!(
            remote_id = %plan.remote_id,
            expected = %version,
            "first write rejected as a conflict; nothing written"
          );
          return Ok(SyncOutcome::Conflict { expected: version, actual: None });
        }
        Err(failure) => {
          warn!(
            remote_id = %plan.remote_id,
            applied,
            total,
            kind = %failure.kind(),
            "sync stopped: {}", failure.error.message
          );
          let entity = EntityRef::Remote {
            service:   plan.service.clone(),
            native_id: plan.remote_id.clone(),
          };
          return Ok(SyncOutcome::PartialFailure {
            applied_batches: applied,
            total_batches: total,
            version,
            failure: failure.into_item_failure(entity),
          });
        }
      }
    }

    let operations = plan.batches.iter().map(|b| b.ops.len()).sum();
    info!(
      service = %plan.service,
      remote_id = %plan.remote_id,
      batches = total,
      operations,
      version = %version,
      "playlist synced"
    );
    Ok(SyncOutcome::Applied { batches: total, operations, version })
  }
}
