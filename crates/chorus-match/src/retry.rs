//! Retry policy for external calls.
//!
//! Exponential backoff with a capped attempt count. Only failures classified
//! as transient or rate-limited are retried; everything else propagates on
//! the first attempt.

use std::{future::Future, time::Duration};

use chorus_core::{
  ErrorKind,
  connector::ConnectorError,
  outcome::{EntityRef, ItemFailure},
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::warn;

/// Retry policy implementing exponential backoff.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
  /// Total attempts, the first one included.
  pub max_attempts:       u32,
  pub initial_backoff_ms: u64,
  /// Cap for exponential growth and for server-provided retry hints.
  pub max_backoff_ms:     u64,
  pub backoff_multiplier: f64,
}

impl Default for RetryPolicy {
  fn default() -> Self {
    Self {
      max_attempts:       4,
      initial_backoff_ms: 200,
      max_backoff_ms:     10_000,
      backoff_multiplier: 2.0,
    }
  }
}

/// The last error of a call that did not succeed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{error} (after {attempts} attempt(s))")]
pub struct RetryFailure {
  pub error:    ConnectorError,
  pub attempts: u32,
}

impl RetryFailure {
  fn cancelled(attempts: u32) -> Self {
    Self {
      error: ConnectorError::new(ErrorKind::Cancelled, "cancelled"),
      attempts,
    }
  }

  pub fn kind(&self) -> ErrorKind { self.error.kind }

  /// Attach the affected entity for a batch outcome.
  pub fn into_item_failure(self, entity: EntityRef) -> ItemFailure {
    ItemFailure {
      entity,
      kind: self.error.kind,
      message: self.error.message,
      attempts: self.attempts,
    }
  }
}

impl RetryPolicy {
  /// A policy that never retries.
  pub fn none() -> Self { Self { max_attempts: 1, ..Self::default() } }

  /// Whether a call that failed with `error` on attempt number `attempt`
  /// (1-based) gets another try.
  pub fn should_retry(&self, error: &ConnectorError, attempt: u32) -> bool {
    error.is_retryable() && attempt < self.max_attempts
  }

  /// Delay after the `attempt`-th failure: `initial * multiplier^(attempt-1)`,
  /// capped at `max_backoff_ms`.
  pub fn backoff(&self, attempt: u32) -> Duration {
    let exp = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
    let ms = self.initial_backoff_ms as f64 * self.backoff_multiplier.powi(exp);
    Duration::from_millis(ms.min(self.max_backoff_ms as f64) as u64)
  }

  /// A server hint wins over the schedule, within the same cap.
  fn delay(&self, error: &ConnectorError, attempt: u32) -> Duration {
    let cap = Duration::from_millis(self.max_backoff_ms);
    error
      .retry_after
      .map_or_else(|| self.backoff(attempt), |hint| hint.min(cap))
  }

  /// Drive `call` until it succeeds, fails permanently, runs out of
  /// attempts, or `cancel` fires.
  ///
  /// Cancellation is checked before every attempt and interrupts a backoff
  /// sleep, never an in-flight call.
  pub async fn run<T, F, Fut>(
    &self,
    cancel: &CancellationToken,
    what: &str,
    mut call: F,
  ) -> Result<T, RetryFailure>
  where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ConnectorError>>,
  {
    let mut attempt = 0;
    loop {
      if cancel.is_cancelled() {
        return Err(RetryFailure::cancelled(attempt));
      }
      attempt += 1;
      match call().await {
        Ok(value) => return Ok(value),
        Err(error) if self.should_retry(&error, attempt) => {
          let delay = self.delay(&error, attempt);
          warn!(
            call = what,
            attempt,
            kind = %error.kind,
            delay_ms = delay.as_millis() as u64,
            "retrying after {}", error.message
          );
          tokio::select! {
            _ = cancel.cancelled() => return Err(RetryFailure::cancelled(attempt)),
            _ = tokio::time::sleep(delay) => {}
          }
        }
        Err(error) => return Err(RetryFailure { error, attempts: attempt }),
      }
    }
  }
}
