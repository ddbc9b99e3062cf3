//! The chorus hub: one facade over resolution, dedup, import and sync.
//!
//! [`Hub`] owns the configured engines and a storage backend, and exposes
//! the operations callers drive: [`Hub::resolve_batch`],
//! [`Hub::dedup_window`], [`Hub::compute_playlist_diff`],
//! [`Hub::execute_playlist_sync`] and [`Hub::import_recent_plays`].

pub mod config;
pub mod error;

pub use config::HubConfig;
pub use error::{Error, Result};

use std::{
  collections::{HashMap, HashSet},
  sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use chorus_core::{
  ErrorKind,
  checkpoint::SyncCheckpoint,
  ids::{PlaylistId, ServiceName, TrackId},
  mapping::MappedTrack,
  outcome::{BatchReport, EntityRef, ItemFailure},
  playlist::{Playlist, PlaylistLink, PlaylistTrack},
  provider::{ProviderAdapter, ProviderRegistry, RemoteSnapshot},
  store::Repository,
  track::Track,
};
use chorus_match::{
  DedupResult, ImportReport, MatchOutcome, PlayImporter, Resolver, dedup_between,
  scoring::{Ranked, pick_best},
  validate_merge_chains,
};
use chorus_sync::{
  AdapterWriter, PlaylistDiff, SyncError, SyncEstimate, SyncExecutor, SyncOutcome,
  SyncPlan, TargetTrack, diff, reconcile_local_playlist, snapshot_token,
};
use chrono::{DateTime, TimeDelta, Utc};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

// ─── Reports ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize)]
pub struct DedupReport {
  pub owner:   String,
  /// Plays inside the window; context plays around it are not counted.
  pub events:  usize,
  pub dry_run: bool,
  /// Events whose stored outcome was written; zero on a dry run.
  pub updated: usize,
  #[serde(flatten)]
  pub result:  DedupResult,
}

/// A sync plan for one local playlist.
#[derive(Debug, Clone, Serialize)]
pub struct PlaylistPlan {
  pub playlist_id: PlaylistId,
  pub plan:        SyncPlan,
  pub estimate:    SyncEstimate,
  /// Tracks with no trusted mapping on the remote service and no
  /// counterpart on the remote list. They are left out of the target.
  pub unresolved:  Vec<TrackId>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SyncReport {
  pub playlist_id: PlaylistId,
  pub unresolved:  Vec<TrackId>,
  pub outcome:     SyncOutcome,
}

// ─── Hub ─────────────────────────────────────────────────────────────────────

pub struct Hub<R> {
  repo:      Arc<R>,
  providers: ProviderRegistry,
  config:    HubConfig,
  resolver:  Resolver<R>,
  importer:  PlayImporter<R>,
  executor:  SyncExecutor,
  in_flight: Mutex<HashSet<PlaylistId>>,
}

impl<R: Repository> Hub<R> {
  pub fn new(repo: Arc<R>, providers: ProviderRegistry, config: HubConfig) -> Self {
    let mut resolver = Resolver::new(
      repo.clone(),
      providers.clone(),
      config.matching.clone(),
      config.retry.clone(),
    );
    for (service, limits) in &config.services {
      resolver = resolver.with_concurrency(service.clone(), limits.max_concurrency);
    }
    let importer = PlayImporter::new(
      repo.clone(),
      providers.clone(),
      config.matching.clone(),
      config.retry.clone(),
    );
    let executor = SyncExecutor::new(config.sync.clone(), config.retry.clone());
    Self {
      repo,
      providers,
      config,
      resolver,
      importer,
      executor,
      in_flight: Mutex::default(),
    }
  }

  pub fn config(&self) -> &HubConfig { &self.config }

  pub fn repository(&self) -> &Arc<R> { &self.repo }

  // ── Resolution and import ───────────────────────────────────────────────

  /// Resolve stored tracks onto `target`.
  ///
  /// Ids that are missing, deleted or unreadable become per-item failures.
  pub async fn resolve_batch(
    &self,
    track_ids: Vec<TrackId>,
    target: &ServiceName,
    cancel: &CancellationToken,
  ) -> Result<BatchReport<MatchOutcome>> {
    let mut tracks = Vec::with_capacity(track_ids.len());
    let mut failures = Vec::new();
    for id in track_ids {
      let failure = |kind, message: String| ItemFailure {
        entity: EntityRef::Track { id },
        kind,
        message,
        attempts: 1,
      };
      match self.repo.get_track(id).await {
        Ok(Some(track)) if !track.is_deleted() => tracks.push(track),
        Ok(Some(_)) => failures.push(failure(ErrorKind::NotFound, "track is deleted".into())),
        Ok(None) => failures.push(failure(ErrorKind::NotFound, "no such track".into())),
        Err(e) => failures.push(failure(ErrorKind::Storage, e.to_string())),
      }
    }

    let report = self.resolver.resolve(tracks, target, cancel).await?;
    if failures.is_empty() {
      return Ok(report);
    }
    let mut outcomes = report.outcomes;
    outcomes.extend(failures.into_iter().map(Err));
    Ok(BatchReport::from_outcomes(outcomes))
  }

  pub async fn import_recent_plays(
    &self,
    owner: &str,
    service: &ServiceName,
    cancel: &CancellationToken,
  ) -> Result<ImportReport> {
    Ok(self.importer.import_recent_plays(owner, service, cancel).await?)
  }

  pub async fn checkpoints(
    &self,
    owner: &str,
    service: Option<ServiceName>,
  ) -> Result<Vec<SyncCheckpoint>> {
    self
      .repo
      .list_checkpoints(owner.to_owned(), service)
      .await
      .map_err(Error::storage)
  }

  // ── Dedup ───────────────────────────────────────────────────────────────

  /// Deduplicate `owner`'s plays in `[from, to)`.
  ///
  /// Plays within one dedup window of either edge are loaded as context, and
  /// verdicts stored by earlier runs are never rewritten, so adjacent or
  /// overlapping windows agree. Verdicts are validated before anything is
  /// written, and written in one transaction unless `dry_run` is set.
  pub async fn dedup_window(
    &self,
    owner: &str,
    from: DateTime<Utc>,
    to: DateTime<Utc>,
    dry_run: bool,
  ) -> Result<DedupReport> {
    let margin = TimeDelta::seconds(self.config.dedup.window_secs.into());
    let events = self
      .repo
      .play_events_in_window(owner.to_owned(), from - margin, to + margin)
      .await
      .map_err(Error::storage)?;
    let result = dedup_between(&events, from, to, &self.config.dedup);
    validate_merge_chains(&result.decisions, &events)?;
    let in_window = events
      .iter()
      .filter(|e| from <= e.played_at && e.played_at < to)
      .count();

    let updated = if dry_run {
      0
    } else {
      self
        .repo
        .record_dedup_outcomes(result.decisions.clone())
        .await
        .map_err(Error::storage)?
    };
    info!(
      owner,
      events = in_window,
      context = events.len() - in_window,
      kept = result.kept,
      merged = result.merged,
      discarded = result.discarded,
      dry_run,
      "dedup window finished"
    );
    Ok(DedupReport { owner: owner.to_owned(), events: in_window, dry_run, updated, result })
  }

  // ── Playlists ───────────────────────────────────────────────────────────

  /// Reorder a local playlist to `target`, touching only rows that change.
  pub async fn set_playlist_order(
    &self,
    id: PlaylistId,
    target: Vec<TrackId>,
  ) -> Result<Vec<PlaylistTrack>> {
    let entries = self.repo.playlist_tracks(id).await.map_err(Error::storage)?;
    let edits = reconcile_local_playlist(&entries, &target)?;
    if edits.is_empty() {
      return Ok(entries);
    }
    self
      .repo
      .apply_playlist_edits(id, edits)
      .await
      .map_err(Error::storage)
  }

  /// Fetch the linked remote playlist and plan a sync against it.
  pub async fn compute_playlist_diff(
    &self,
    id: PlaylistId,
    cancel: &CancellationToken,
  ) -> Result<PlaylistPlan> {
    let link = self.link(id).await?;
    let adapter = self.adapter(&link.service)?;
    let snapshot = self
      .config
      .retry
      .run(cancel, "fetch_playlist", || adapter.fetch_playlist(&link.remote_id))
      .await?;
    self.plan_against_snapshot(id, snapshot, true, cancel).await
  }

  /// Plan a sync of playlist `id` against an already fetched `snapshot`.
  ///
  /// With `resolve_unmapped`, tracks lacking a trusted mapping on the
  /// snapshot's service are resolved first; otherwise they can only pair
  /// with remote entries by identifier or metadata.
  pub async fn plan_against_snapshot(
    &self,
    id: PlaylistId,
    snapshot: RemoteSnapshot,
    resolve_unmapped: bool,
    cancel: &CancellationToken,
  ) -> Result<PlaylistPlan> {
    self.playlist(id).await?;
    let tracks = self.playlist_tracks(id).await?;
    let targets = self
      .targets(tracks, &snapshot.service, resolve_unmapped, cancel)
      .await?;
    let (diff, targets, unresolved) = self.diff_writable(&snapshot, targets);

    let current_ids: Vec<String> =
      snapshot.tracks.iter().map(|t| t.native_id.clone()).collect();
    // Paired slots keep the remote entry already there.
    let mut target_ids: Vec<String> = targets
      .iter()
      .map(|t| t.native_id().unwrap_or_default().to_owned())
      .collect();
    for p in &diff.kept {
      target_ids[p.target] = current_ids[p.current].clone();
    }
    for m in &diff.moves {
      target_ids[m.to] = current_ids[m.from].clone();
    }

    let plan = SyncPlan::build(
      snapshot.service.clone(),
      snapshot.remote_id.clone(),
      snapshot_token(&snapshot),
      diff,
      &current_ids,
      &target_ids,
      self.config.sync.batch_ceiling,
    )?;
    let estimate = plan.estimate();
    info!(
      playlist_id = %id,
      service = %plan.service,
      adds = estimate.adds,
      removes = estimate.removes,
      moves = estimate.moves,
      calls = estimate.calls,
      unresolved = unresolved.len(),
      "playlist diff computed"
    );
    Ok(PlaylistPlan { playlist_id: id, plan, estimate, unresolved })
  }

  /// Plan and, unless `dry_run`, apply a sync of playlist `id` to its
  /// linked remote playlist.
  ///
  /// Only one sync per playlist runs at a time; a concurrent call fails
  /// with [`SyncError::InFlight`]. After a fully applied sync the link
  /// records the new remote version.
  pub async fn execute_playlist_sync(
    &self,
    id: PlaylistId,
    dry_run: bool,
    cancel: &CancellationToken,
  ) -> Result<SyncReport> {
    let _claim = self.claim(id)?;
    let planned = self.compute_playlist_diff(id, cancel).await?;
    let writer = AdapterWriter::new(self.adapter(&planned.plan.service)?);
    let outcome = self
      .executor
      .execute(&writer, &planned.plan, dry_run, cancel)
      .await?;

    if let SyncOutcome::Applied { version, .. } = &outcome {
      let link = PlaylistLink {
        service:   planned.plan.service.clone(),
        remote_id: planned.plan.remote_id.clone(),
        snapshot:  Some(version.clone()),
        synced_at: Some(Utc::now()),
      };
      self
        .repo
        .record_playlist_sync(id, link)
        .await
        .map_err(Error::storage)?;
    }
    Ok(SyncReport { playlist_id: id, unresolved: planned.unresolved, outcome })
  }

  // ── Helpers ─────────────────────────────────────────────────────────────

  fn adapter(&self, service: &ServiceName) -> Result<Arc<dyn ProviderAdapter>> {
    self
      .providers
      .get(service)
      .ok_or_else(|| SyncError::UnknownService(service.clone()).into())
  }

  async fn playlist(&self, id: PlaylistId) -> Result<Playlist> {
    match self.repo.get_playlist(id).await.map_err(Error::storage)? {
      Some(playlist) if playlist.deleted_at.is_none() => Ok(playlist),
      _ => Err(SyncError::PlaylistNotFound(id).into()),
    }
  }

  async fn link(&self, id: PlaylistId) -> Result<PlaylistLink> {
    self
      .playlist(id)
      .await?
      .link
      .ok_or_else(|| SyncError::NotLinked(id).into())
  }

  /// The playlist's live tracks in order.
  async fn playlist_tracks(&self, id: PlaylistId) -> Result<Vec<Track>> {
    let entries = self.repo.playlist_tracks(id).await.map_err(Error::storage)?;
    let mut tracks = Vec::with_capacity(entries.len());
    for entry in entries {
      match self.repo.get_track(entry.track_id).await.map_err(Error::storage)? {
        Some(track) if !track.is_deleted() => tracks.push(track),
        _ => warn!(playlist_id = %id, track_id = %entry.track_id, "skipping deleted track"),
      }
    }
    Ok(tracks)
  }

  /// Each track with its preferred trusted mapping on `service`.
  async fn targets(
    &self,
    tracks: Vec<Track>,
    service: &ServiceName,
    resolve_unmapped: bool,
    cancel: &CancellationToken,
  ) -> Result<Vec<TargetTrack>> {
    let trust = self.config.matching.trust_threshold;
    let mut targets = Vec::with_capacity(tracks.len());
    for track in tracks {
      let mappings = self
        .repo
        .active_mappings(track.id, Some(service.clone()))
        .await
        .map_err(Error::storage)?;
      let mapping = pick_best(
        mappings
          .into_iter()
          .filter(|m| m.mapping.is_trusted(trust))
          .map(|m| (ranked(&m), m)),
      )
      .map(|(_, m)| m);
      targets.push(TargetTrack { track, mapping });
    }

    if resolve_unmapped {
      let mut seen = HashSet::new();
      let unmapped: Vec<Track> = targets
        .iter()
        .filter(|t| t.mapping.is_none() && seen.insert(t.track.id))
        .map(|t| t.track.clone())
        .collect();
      if !unmapped.is_empty() {
        let report = self.resolver.resolve(unmapped, service, cancel).await?;
        let resolved: HashMap<TrackId, MappedTrack> = report
          .successes()
          .filter(|o| o.is_trusted())
          .filter_map(|o| Some((o.track_id, o.mapping.clone()?)))
          .collect();
        for target in targets.iter_mut().filter(|t| t.mapping.is_none()) {
          target.mapping = resolved.get(&target.track.id).cloned();
        }
      }
    }
    Ok(targets)
  }

  /// Diff, leaving out target tracks that would have to be added but have
  /// no native id to add them by.
  ///
  /// Dropping an unpaired target does not change how the others pair, so
  /// one re-diff suffices.
  fn diff_writable(
    &self,
    snapshot: &RemoteSnapshot,
    targets: Vec<TargetTrack>,
  ) -> (PlaylistDiff, Vec<TargetTrack>, Vec<TrackId>) {
    let (strategy, cfg) = (self.config.sync.strategy, &self.config.matching);
    let first = diff(&snapshot.tracks, &targets, strategy, cfg);
    let unwritable: HashSet<usize> = first
      .adds
      .iter()
      .copied()
      .filter(|&t| targets[t].native_id().is_none())
      .collect();
    if unwritable.is_empty() {
      return (first, targets, Vec::new());
    }

    let mut unresolved = Vec::new();
    let mut writable = Vec::with_capacity(targets.len() - unwritable.len());
    for (i, target) in targets.into_iter().enumerate() {
      if unwritable.contains(&i) {
        unresolved.push(target.track.id);
      } else {
        writable.push(target);
      }
    }
    let second = diff(&snapshot.tracks, &writable, strategy, cfg);
    (second, writable, unresolved)
  }

  fn claim(&self, id: PlaylistId) -> Result<InFlight<'_>> {
    if !lock(&self.in_flight).insert(id) {
      return Err(SyncError::InFlight(id).into());
    }
    Ok(InFlight { set: &self.in_flight, id })
  }
}

fn ranked(m: &MappedTrack) -> Ranked<chorus_core::ids::MappingId> {
  Ranked {
    confidence:  m.mapping.confidence,
    verified_at: Some(m.mapping.verified_at),
    key:         m.mapping.id,
  }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> { m.lock().unwrap_or_else(PoisonError::into_inner) }

/// Releases a playlist's single-flight claim when dropped.
struct InFlight<'a> {
  set: &'a Mutex<HashSet<PlaylistId>>,
  id:  PlaylistId,
}

impl Drop for InFlight<'_> {
  fn drop(&mut self) { lock(self.set).remove(&self.id); }
}
