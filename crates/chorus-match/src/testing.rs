//! A scripted provider adapter for tests.

use std::{
  collections::HashMap,
  sync::{
    Mutex,
    atomic::{AtomicU32, Ordering},
  },
};

use async_trait::async_trait;
use chorus_core::{
  connector::{ConnectorError, SearchQuery},
  ids::ServiceName,
  play::ObservedPlay,
  provider::{PlayPage, ProviderAdapter, RemoteSnapshot},
  track::{DirectIdentifier, DirectIds, ObservedTrack},
};
use chrono::Utc;

pub(crate) fn observed(
  service: ServiceName,
  native_id: &str,
  title: &str,
  artists: &[&str],
  identifiers: DirectIds,
) -> ObservedTrack {
  ObservedTrack {
    service,
    native_id: native_id.into(),
    title: title.into(),
    artists: artists.iter().map(|a| a.to_string()).collect(),
    album: None,
    duration_ms: Some(200_000),
    release_date: None,
    identifiers,
    raw: serde_json::Value::Null,
    observed_at: Utc::now(),
  }
}

/// Serves canned lookups, candidates and play pages; records every call.
pub(crate) struct FakeProvider {
  service:          ServiceName,
  by_identifier:    HashMap<DirectIdentifier, ObservedTrack>,
  candidates:       Vec<ObservedTrack>,
  pages:            HashMap<Option<String>, PlayPage>,
  failing_cursor:   Option<String>,
  search_fails:     bool,
  transient_budget: AtomicU32,
  calls:            Mutex<Vec<String>>,
}

impl FakeProvider {
  pub(crate) fn new(service: ServiceName) -> Self {
    Self {
      service,
      by_identifier: HashMap::new(),
      candidates: Vec::new(),
      pages: HashMap::new(),
      failing_cursor: None,
      search_fails: false,
      transient_budget: AtomicU32::new(0),
      calls: Mutex::default(),
    }
  }

  /// Answer identifier lookups for every identifier `track` carries.
  pub(crate) fn with_identifier(mut self, track: ObservedTrack) -> Self {
    for ident in track.identifiers.iter() {
      self.by_identifier.insert(ident, track.clone());
    }
    self
  }

  pub(crate) fn with_candidate(mut self, track: ObservedTrack) -> Self {
    self.candidates.push(track);
    self
  }

  pub(crate) fn with_page(
    mut self,
    cursor: Option<&str>,
    plays: Vec<ObservedPlay>,
    next_cursor: Option<&str>,
  ) -> Self {
    self.pages.insert(cursor.map(str::to_owned), PlayPage {
      plays,
      rejected: Vec::new(),
      next_cursor: next_cursor.map(str::to_owned),
    });
    self
  }

  /// The page fetched with `cursor` fails permanently.
  pub(crate) fn failing_at(mut self, cursor: &str) -> Self {
    self.failing_cursor = Some(cursor.to_owned());
    self
  }

  pub(crate) fn failing_search_permanently(mut self) -> Self {
    self.search_fails = true;
    self
  }

  /// The first `n` calls of any kind fail transiently.
  pub(crate) fn failing_first(self, n: u32) -> Self {
    self.transient_budget.store(n, Ordering::SeqCst);
    self
  }

  pub(crate) fn calls(&self) -> Vec<String> { self.calls.lock().unwrap().clone() }

  fn record(&self, call: String) -> Result<(), ConnectorError> {
    self.calls.lock().unwrap().push(call);
    let budget = self.transient_budget.load(Ordering::SeqCst);
    if budget > 0 {
      self.transient_budget.store(budget - 1, Ordering::SeqCst);
      return Err(ConnectorError::transient("connection reset"));
    }
    Ok(())
  }
}

#[async_trait]
impl ProviderAdapter for FakeProvider {
  fn service(&self) -> &ServiceName { &self.service }

  fn normalize_track(
    &self,
    _raw: &serde_json::Value,
  ) -> Result<ObservedTrack, ConnectorError> {
    Err(ConnectorError::validation("not supported"))
  }

  fn normalize_play(
    &self,
    _raw: &serde_json::Value,
  ) -> Result<ObservedPlay, ConnectorError> {
    Err(ConnectorError::validation("not supported"))
  }

  fn direct_identifier(&self, _raw: &serde_json::Value) -> Option<DirectIdentifier> {
    None
  }

  async fn search(
    &self,
    query: &SearchQuery,
  ) -> Result<Vec<ObservedTrack>, ConnectorError> {
    self.record(format!("search {query:?}"))?;
    if self.search_fails {
      return Err(ConnectorError::permanent("search disabled"));
    }
    Ok(self.candidates.clone())
  }

  async fn fetch_by_id(
    &self,
    native_id: &str,
  ) -> Result<Option<ObservedTrack>, ConnectorError> {
    self.record(format!("fetch {native_id}"))?;
    Ok(self.candidates.iter().find(|c| c.native_id == native_id).cloned())
  }

  async fn lookup_identifier(
    &self,
    ident: &DirectIdentifier,
  ) -> Result<Option<ObservedTrack>, ConnectorError> {
    self.record(format!("lookup {}:{}", ident.kind, ident.value))?;
    Ok(self.by_identifier.get(ident).cloned())
  }

  async fn recent_plays(
    &self,
    cursor: Option<&str>,
  ) -> Result<PlayPage, ConnectorError> {
    self.record(format!("plays {cursor:?}"))?;
    if cursor.is_some() && cursor == self.failing_cursor.as_deref() {
      return Err(ConnectorError::permanent("page unavailable"));
    }
    Ok(
      self
        .pages
        .get(&cursor.map(str::to_owned))
        .cloned()
        .unwrap_or_default(),
    )
  }

  async fn fetch_playlist(
    &self,
    remote_id: &str,
  ) -> Result<RemoteSnapshot, ConnectorError> {
    self.record(format!("playlist {remote_id}"))?;
    Err(ConnectorError::not_found(remote_id.to_owned()))
  }
}
