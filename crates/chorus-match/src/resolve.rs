//! Identity resolution: mapping canonical tracks onto one target service.
//!
//! Per track, the first step that decides wins:
//!
//! 1. An active mapping at or above the trust threshold is returned
//!    unchanged, so re-running a batch is idempotent.
//! 2. Each direct identifier, strongest first, is looked up on the target.
//! 3. The target is searched by title and artist, every candidate is scored,
//!    and the best is kept if it clears the acceptance floor.
//!
//! Matches are persisted together with the observation they point at.

use std::{collections::HashMap, sync::Arc};

use chorus_core::{
  ErrorKind,
  connector::SearchQuery,
  ids::{ServiceName, TrackId},
  mapping::{Confidence, MappedTrack, MatchMethod, NewMapping},
  outcome::{BatchReport, EntityRef, ItemFailure, ItemOutcome},
  provider::{ProviderAdapter, ProviderRegistry},
  store::Repository,
  track::{ObservedTrack, Track},
};
use futures::{StreamExt as _, stream};
use serde::Serialize;
use strum::Display;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::{
  config::MatchConfig,
  error::{Error, Result, storage_failure},
  retry::RetryPolicy,
  scoring::{self, Evidence, MatchScore, Ranked, pick_best},
};

/// Concurrent resolution units per service when none is configured.
pub const DEFAULT_CONCURRENCY: usize = 4;

// ─── Outcomes ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, Serialize)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum MatchStatus {
  /// A trusted mapping already existed; nothing was written.
  Existing,
  /// A new mapping at or above the trust threshold.
  Matched,
  /// Stored for visibility, but not usable downstream.
  BelowTrust,
  /// Nothing cleared the acceptance floor.
  Unresolved,
}

/// What resolution decided for one track.
#[derive(Debug, Clone, Serialize)]
pub struct MatchOutcome {
  pub track_id:   TrackId,
  pub status:     MatchStatus,
  pub mapping:    Option<MappedTrack>,
  /// The mapping's confidence, or the best rejected score.
  pub confidence: Confidence,
  pub method:     Option<MatchMethod>,
  pub evidence:   Option<Evidence>,
}

impl MatchOutcome {
  pub fn is_trusted(&self) -> bool {
    matches!(self.status, MatchStatus::Existing | MatchStatus::Matched)
  }
}

// ─── Resolver ────────────────────────────────────────────────────────────────

pub struct Resolver<R> {
  repo:        Arc<R>,
  providers:   ProviderRegistry,
  config:      MatchConfig,
  retry:       RetryPolicy,
  concurrency: HashMap<ServiceName, usize>,
}

impl<R: Repository> Resolver<R> {
  pub fn new(
    repo: Arc<R>,
    providers: ProviderRegistry,
    config: MatchConfig,
    retry: RetryPolicy,
  ) -> Self {
    Self { repo, providers, config, retry, concurrency: HashMap::new() }
  }

  /// Cap concurrent resolution units against `service`.
  pub fn with_concurrency(mut self, service: ServiceName, limit: usize) -> Self {
    self.concurrency.insert(service, limit.max(1));
    self
  }

  pub fn config(&self) -> &MatchConfig { &self.config }

  /// Resolve every track against `target`.
  ///
  /// Fails as a whole only when no adapter serves `target`. Everything else
  /// (lookup failures, storage errors, cancellation) is reported per item.
  /// The order of outcomes is unspecified.
  pub async fn resolve(
    &self,
    tracks: Vec<Track>,
    target: &ServiceName,
    cancel: &CancellationToken,
  ) -> Result<BatchReport<MatchOutcome>> {
    let adapter = self
      .providers
      .get(target)
      .ok_or_else(|| Error::UnknownService(target.clone()))?;
    let limit = self
      .concurrency
      .get(target)
      .copied()
      .unwrap_or(DEFAULT_CONCURRENCY);

    let outcomes: Vec<_> = stream::iter(tracks)
      .map(|track| self.resolve_one(track, adapter.as_ref(), cancel))
      .buffer_unordered(limit)
      .collect()
      .await;

    let report = BatchReport::from_outcomes(outcomes);
    info!(
      service = %target,
      total = report.summary.total,
      succeeded = report.summary.succeeded,
      failed = report.summary.failed,
      "resolution batch finished"
    );
    Ok(report)
  }

  async fn resolve_one(
    &self,
    track: Track,
    adapter: &dyn ProviderAdapter,
    cancel: &CancellationToken,
  ) -> ItemOutcome<MatchOutcome> {
    let entity = EntityRef::Track { id: track.id };
    if cancel.is_cancelled() {
      return Err(ItemFailure {
        entity,
        kind: ErrorKind::Cancelled,
        message: "cancelled before resolution".into(),
        attempts: 0,
      });
    }
    if track.is_deleted() {
      return Err(ItemFailure {
        entity,
        kind: ErrorKind::Validation,
        message: "track is deleted".into(),
        attempts: 0,
      });
    }

    if let Some(existing) = self.trusted_mapping(&track, adapter.service()).await? {
      debug!(track_id = %track.id, mapping_id = %existing.mapping.id, "trusted mapping exists");
      return Ok(MatchOutcome {
        track_id:   track.id,
        status:     MatchStatus::Existing,
        confidence: existing.mapping.confidence,
        method:     Some(existing.mapping.method),
        evidence:   None,
        mapping:    Some(existing),
      });
    }

    for ident in track.identifiers.iter() {
      let hit = self
        .retry
        .run(cancel, "lookup_identifier", || adapter.lookup_identifier(&ident))
        .await;
      match hit {
        Ok(Some(observed)) => {
          debug!(track_id = %track.id, kind = %ident.kind, "identifier chain hit");
          let score = MatchScore::identifier(ident.kind);
          return self.persist(&track, observed, score).await;
        }
        Ok(None) => {}
        Err(f) if f.kind() == ErrorKind::NotFound => {}
        Err(f) => return Err(f.into_item_failure(entity)),
      }
    }

    let query = SearchQuery::for_track(&track);
    let candidates = match self
      .retry
      .run(cancel, "search", || adapter.search(&query))
      .await
    {
      Ok(candidates) => candidates,
      Err(f) if f.kind() == ErrorKind::NotFound => Vec::new(),
      Err(f) => return Err(f.into_item_failure(entity)),
    };

    let best = pick_best(candidates.into_iter().map(|c| {
      let s = scoring::score(&track, &c, &self.config);
      let rank = Ranked {
        confidence:  s.confidence,
        verified_at: None,
        key:         c.native_id.clone(),
      };
      (rank, (c, s))
    }));

    match best {
      Some((_, (observed, score))) if score.confidence >= self.config.acceptance_floor => {
        self.persist(&track, observed, score).await
      }
      rejected => {
        let (confidence, evidence) = rejected
          .map(|(_, (_, s))| (s.confidence, Some(s.evidence)))
          .unwrap_or((Confidence::ZERO, None));
        debug!(track_id = %track.id, %confidence, "unresolved");
        Ok(MatchOutcome {
          track_id: track.id,
          status: MatchStatus::Unresolved,
          mapping: None,
          confidence,
          method: None,
          evidence,
        })
      }
    }
  }

  /// The preferred trusted mapping of `track` on `service`, if any.
  async fn trusted_mapping(
    &self,
    track: &Track,
    service: &ServiceName,
  ) -> ItemOutcome<Option<MappedTrack>> {
    let mappings = self
      .repo
      .active_mappings(track.id, Some(service.clone()))
      .await
      .map_err(|e| storage_failure(EntityRef::Track { id: track.id }, e))?;
    let trust = self.config.trust_threshold;
    Ok(
      pick_best(
        mappings
          .into_iter()
          .filter(|m| m.mapping.is_trusted(trust))
          .map(|m| {
            let rank = Ranked {
              confidence:  m.mapping.confidence,
              verified_at: Some(m.mapping.verified_at),
              key:         m.mapping.id,
            };
            (rank, m)
          }),
      )
      .map(|(_, m)| m),
    )
  }

  async fn persist(
    &self,
    track: &Track,
    observed: ObservedTrack,
    score: MatchScore,
  ) -> ItemOutcome<MatchOutcome> {
    let method = score.method();
    let mapped = self
      .repo
      .record_mapping(NewMapping {
        track_id: track.id,
        observed,
        method,
        confidence: score.confidence,
      })
      .await
      .map_err(|e| storage_failure(EntityRef::Track { id: track.id }, e))?;

    let status = if score.confidence >= self.config.trust_threshold {
      MatchStatus::Matched
    } else {
      MatchStatus::BelowTrust
    };
    debug!(
      track_id = %track.id,
      native_id = %mapped.connector_track.native_id,
      confidence = %score.confidence,
      %method,
      %status,
      "mapping recorded"
    );
    Ok(MatchOutcome {
      track_id: track.id,
      status,
      mapping: Some(mapped),
      confidence: score.confidence,
      method: Some(method),
      evidence: Some(score.evidence),
    })
  }
}
