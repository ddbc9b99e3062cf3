//! The rate-limited adapter shared by every payload format.

use std::{marker::PhantomData, num::NonZeroU32, sync::Arc};

use async_trait::async_trait;
use chorus_core::{
  connector::{Connector, ConnectorError, PlaylistOp, SearchQuery},
  ids::ServiceName,
  play::ObservedPlay,
  provider::{PlayPage, ProviderAdapter, RemoteSnapshot},
  track::{DirectIdentifier, IdentifierKind, ObservedTrack},
};
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::Result;

// ─── Limits ──────────────────────────────────────────────────────────────────

/// Per-service call budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceLimits {
  /// Sustained request rate; bursts up to the same number are allowed.
  pub requests_per_second: u32,
  /// Ceiling on concurrent in-flight resolution units for this service.
  pub max_concurrency:     usize,
}

impl Default for ServiceLimits {
  fn default() -> Self { Self { requests_per_second: 5, max_concurrency: 4 } }
}

// ─── Payload formats ─────────────────────────────────────────────────────────

/// How one service's raw payloads map onto the normalised track subset.
pub trait PayloadFormat: Send + Sync + 'static {
  /// The service these payloads come from.
  const SERVICE: &'static str;

  /// The identifier kind the service keys its own tracks by, if it is one
  /// of the shared direct identifiers.
  const NATIVE_KIND: Option<IdentifierKind>;

  fn track(raw: &serde_json::Value) -> Result<ObservedTrack>;

  fn play(raw: &serde_json::Value) -> Result<ObservedPlay>;

  fn direct_identifier(raw: &serde_json::Value) -> Option<DirectIdentifier>;
}

// ─── Adapter ─────────────────────────────────────────────────────────────────

/// A [`ProviderAdapter`] that waits on a token-bucket limiter before every
/// connector call and normalises responses with `F`.
pub struct Adapter<F> {
  service:   ServiceName,
  connector: Arc<dyn Connector>,
  limiter:   DefaultDirectRateLimiter,
  limits:    ServiceLimits,
  _format:   PhantomData<fn() -> F>,
}

impl<F: PayloadFormat> Adapter<F> {
  pub fn new(connector: Arc<dyn Connector>, limits: ServiceLimits) -> Self {
    let rate =
      NonZeroU32::new(limits.requests_per_second).unwrap_or(NonZeroU32::MIN);
    Self {
      service: ServiceName::new(F::SERVICE),
      connector,
      limiter: RateLimiter::direct(Quota::per_second(rate)),
      limits,
      _format: PhantomData,
    }
  }

  pub fn limits(&self) -> ServiceLimits { self.limits }

  async fn throttle(&self) { self.limiter.until_ready().await }

  /// Normalise a list of candidates, skipping payloads that do not parse.
  fn normalize_candidates(
    &self,
    raws: Vec<serde_json::Value>,
  ) -> Vec<ObservedTrack> {
    raws
      .iter()
      .filter_map(|raw| match F::track(raw) {
        Ok(track) => Some(track),
        Err(e) => {
          debug!(service = %self.service, error = %e, "skipping candidate");
          None
        }
      })
      .collect()
  }
}

#[async_trait]
impl<F: PayloadFormat> ProviderAdapter for Adapter<F> {
  fn service(&self) -> &ServiceName { &self.service }

  fn normalize_track(
    &self,
    raw: &serde_json::Value,
  ) -> Result<ObservedTrack, ConnectorError> {
    Ok(F::track(raw)?)
  }

  fn normalize_play(
    &self,
    raw: &serde_json::Value,
  ) -> Result<ObservedPlay, ConnectorError> {
    Ok(F::play(raw)?)
  }

  fn direct_identifier(&self, raw: &serde_json::Value) -> Option<DirectIdentifier> {
    F::direct_identifier(raw)
  }

  async fn search(
    &self,
    query: &SearchQuery,
  ) -> Result<Vec<ObservedTrack>, ConnectorError> {
    self.throttle().await;
    let raws = self.connector.search(query).await?;
    Ok(self.normalize_candidates(raws))
  }

  async fn fetch_by_id(
    &self,
    native_id: &str,
  ) -> Result<Option<ObservedTrack>, ConnectorError> {
    self.throttle().await;
    match self.connector.fetch_catalog_track(native_id).await? {
      Some(raw) => Ok(Some(F::track(&raw)?)),
      None => Ok(None),
    }
  }

  async fn lookup_identifier(
    &self,
    ident: &DirectIdentifier,
  ) -> Result<Option<ObservedTrack>, ConnectorError> {
    if F::NATIVE_KIND == Some(ident.kind) {
      return self.fetch_by_id(&ident.value).await;
    }
    let candidates = self.search(&SearchQuery::Identifier(ident.clone())).await?;
    Ok(candidates.into_iter().find(|c| c.identifiers.contains(ident)))
  }

  async fn recent_plays(
    &self,
    cursor: Option<&str>,
  ) -> Result<PlayPage, ConnectorError> {
    self.throttle().await;
    let page = self.connector.fetch_recent_plays(cursor).await?;
    let mut out = PlayPage { next_cursor: page.next_cursor, ..PlayPage::default() };
    for raw in &page.items {
      match F::play(raw) {
        Ok(play) => out.plays.push(play),
        Err(e) => out.rejected.push(e.into()),
      }
    }
    Ok(out)
  }

  /// Any item that fails to normalise fails the whole snapshot: skipping it
  /// would shift every later position.
  async fn fetch_playlist(
    &self,
    remote_id: &str,
  ) -> Result<RemoteSnapshot, ConnectorError> {
    self.throttle().await;
    let payload = self.connector.fetch_playlist(remote_id).await?;
    let tracks = payload
      .items
      .iter()
      .map(|raw| F::track(raw).map_err(ConnectorError::from))
      .collect::<Result<Vec<_>, _>>()?;
    Ok(RemoteSnapshot {
      service: self.service.clone(),
      remote_id: payload.remote_id,
      version: payload.version,
      tracks,
    })
  }

  async fn write_playlist_ops(
    &self,
    remote_id: &str,
    ops: &[PlaylistOp],
    expected_version: &str,
  ) -> Result<String, ConnectorError> {
    self.throttle().await;
    self
      .connector
      .write_playlist_ops(remote_id, ops, expected_version)
      .await
  }
}
