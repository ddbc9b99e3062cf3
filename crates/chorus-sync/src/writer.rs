//! The production [`PlaylistWriter`]: a provider adapter.
//!
//! A service that exposes no version of its own cannot check the computed
//! token passed as `expected_version`. For those playlists the writer checks
//! it: it refetches the list before each write and refuses with a conflict
//! if the computed token moved, then returns the token of the list after the
//! write. A change landing between that refetch and the write goes unseen.

use std::{
  collections::HashSet,
  sync::{Arc, Mutex, PoisonError},
};

use async_trait::async_trait;
use chorus_core::{
  connector::{ConnectorError, PlaylistOp, PlaylistWriter},
  provider::ProviderAdapter,
};
use tracing::debug;

use crate::snapshot::snapshot_token;

/// Reads snapshot tokens and writes operations through one service's
/// rate-limited adapter.
pub struct AdapterWriter {
  adapter:     Arc<dyn ProviderAdapter>,
  /// Playlists whose last snapshot carried no service version.
  unversioned: Mutex<HashSet<String>>,
}

impl AdapterWriter {
  pub fn new(adapter: Arc<dyn ProviderAdapter>) -> Self {
    Self { adapter, unversioned: Mutex::default() }
  }

  fn is_unversioned(&self, remote_id: &str) -> bool {
    self
      .unversioned
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
      .contains(remote_id)
  }

  async fn computed_token(&self, remote_id: &str) -> Result<String, ConnectorError> {
    let snapshot = self.adapter.fetch_playlist(remote_id).await?;
    Ok(snapshot_token(&snapshot))
  }
}

#[async_trait]
impl PlaylistWriter for AdapterWriter {
  async fn snapshot_token(&self, remote_id: &str) -> Result<String, ConnectorError> {
    let snapshot = self.adapter.fetch_playlist(remote_id).await?;
    let mut unversioned = self.unversioned.lock().unwrap_or_else(PoisonError::into_inner);
    if snapshot.version.is_none() {
      unversioned.insert(remote_id.to_owned());
    } else {
      unversioned.remove(remote_id);
    }
    Ok(snapshot_token(&snapshot))
  }

  async fn write_ops(
    &self,
    remote_id: &str,
    ops: &[PlaylistOp],
    expected_version: &str,
  ) -> Result<String, ConnectorError> {
    if !self.is_unversioned(remote_id) {
      return self
        .adapter
        .write_playlist_ops(remote_id, ops, expected_version)
        .await;
    }

    let current = self.computed_token(remote_id).await?;
    if current != expected_version {
      debug!(remote_id, expected = expected_version, current, "remote playlist moved");
      return Err(ConnectorError::conflict(format!(
        "remote playlist {remote_id} changed since its snapshot"
      )));
    }
    self
      .adapter
      .write_playlist_ops(remote_id, ops, expected_version)
      .await?;
    self.computed_token(remote_id).await
  }
}
