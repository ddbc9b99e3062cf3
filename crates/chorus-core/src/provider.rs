//! Provider adapters: per-service normalisation behind one contract.
//!
//! An adapter turns a service's raw payloads into [`ObservedTrack`]s and
//! [`ObservedPlay`]s, and owns that service's rate limiting. It never persists
//! anything and never decides whether two tracks match.

use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;

use crate::{
  connector::{ConnectorError, PlaylistOp, SearchQuery},
  ids::ServiceName,
  play::ObservedPlay,
  track::{DirectIdentifier, ObservedTrack},
};

/// One normalised page of recent plays.
#[derive(Debug, Clone, Default)]
pub struct PlayPage {
  pub plays:       Vec<ObservedPlay>,
  /// Items the adapter could not interpret, with the reason.
  pub rejected:    Vec<ConnectorError>,
  pub next_cursor: Option<String>,
}

/// A remote playlist normalised to observed tracks, in remote order.
#[derive(Debug, Clone)]
pub struct RemoteSnapshot {
  pub service:   ServiceName,
  pub remote_id: String,
  /// The service's own version token, if it exposes one.
  pub version:   Option<String>,
  pub tracks:    Vec<ObservedTrack>,
}

#[async_trait]
pub trait ProviderAdapter: Send + Sync {
  fn service(&self) -> &ServiceName;

  /// Interpret one raw track payload.
  fn normalize_track(
    &self,
    raw: &serde_json::Value,
  ) -> Result<ObservedTrack, ConnectorError>;

  /// Interpret one raw play payload.
  fn normalize_play(
    &self,
    raw: &serde_json::Value,
  ) -> Result<ObservedPlay, ConnectorError>;

  /// The identifier this service natively keys tracks by, if the payload
  /// carries one.
  fn direct_identifier(&self, raw: &serde_json::Value) -> Option<DirectIdentifier>;

  /// Candidates for `query`. Payloads that fail to normalise are skipped.
  async fn search(
    &self,
    query: &SearchQuery,
  ) -> Result<Vec<ObservedTrack>, ConnectorError>;

  async fn fetch_by_id(
    &self,
    native_id: &str,
  ) -> Result<Option<ObservedTrack>, ConnectorError>;

  /// The track this service holds under `ident`, if any.
  ///
  /// Only an exact identifier hit counts; the default implementation
  /// searches by identifier and keeps the first candidate carrying it.
  async fn lookup_identifier(
    &self,
    ident: &DirectIdentifier,
  ) -> Result<Option<ObservedTrack>, ConnectorError> {
    let candidates = self.search(&SearchQuery::Identifier(ident.clone())).await?;
    Ok(candidates.into_iter().find(|c| c.identifiers.contains(ident)))
  }

  async fn recent_plays(
    &self,
    cursor: Option<&str>,
  ) -> Result<PlayPage, ConnectorError>;

  async fn fetch_playlist(
    &self,
    remote_id: &str,
  ) -> Result<RemoteSnapshot, ConnectorError>;

  /// Apply `ops` to a remote playlist, guarded by `expected_version`.
  ///
  /// Services that cannot be written to keep the default, which fails
  /// permanently.
  async fn write_playlist_ops(
    &self,
    remote_id: &str,
    ops: &[PlaylistOp],
    expected_version: &str,
  ) -> Result<String, ConnectorError> {
    let _ = (remote_id, ops, expected_version);
    Err(ConnectorError::permanent(format!(
      "{} does not accept playlist writes",
      self.service()
    )))
  }
}

/// Adapters by service name.
///
/// Registering a new service is the only step needed to make it available to
/// resolution and import.
#[derive(Clone, Default)]
pub struct ProviderRegistry {
  adapters: HashMap<ServiceName, Arc<dyn ProviderAdapter>>,
}

impl ProviderRegistry {
  pub fn new() -> Self { Self::default() }

  /// Register `adapter` under its own service name, replacing any previous
  /// adapter for that service.
  pub fn register(&mut self, adapter: Arc<dyn ProviderAdapter>) -> &mut Self {
    self.adapters.insert(adapter.service().clone(), adapter);
    self
  }

  pub fn get(&self, service: &ServiceName) -> Option<Arc<dyn ProviderAdapter>> {
    self.adapters.get(service).cloned()
  }

  pub fn services(&self) -> impl Iterator<Item = &ServiceName> {
    self.adapters.keys()
  }
}

impl std::fmt::Debug for ProviderRegistry {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_set().entries(self.adapters.keys()).finish()
  }
}
