//! Resumable play-history import.
//!
//! Pages through a service's recent plays starting at the stored checkpoint.
//! Each observed track is adopted to a canonical track, each page's events
//! are written in one transaction, and the checkpoint advances only after
//! the page is committed.

use std::{
  collections::{BTreeMap, HashMap},
  sync::Arc,
};

use chorus_core::{
  checkpoint::{EntityType, SyncCheckpoint},
  ids::{BatchId, ServiceName, TrackId},
  mapping::{Confidence, MatchMethod, NewMapping},
  outcome::{EntityRef, ItemFailure, ItemOutcome},
  play::NewPlayEvent,
  provider::ProviderRegistry,
  store::Repository,
  track::{NewTrack, ObservedTrack, Track, TrackMetadata, TrackQuery},
};
use chrono::Utc;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::{
  config::MatchConfig,
  error::{Error, Result, storage_failure},
  retry::RetryPolicy,
  scoring::{self, MatchScore, Ranked, pick_best},
};

#[derive(Debug, Clone, Default, Serialize)]
pub struct ImportReport {
  /// Pages committed in this run.
  pub pages:          usize,
  pub inserted:       usize,
  /// Plays already stored by an earlier run.
  pub duplicates:     usize,
  pub created_tracks: usize,
  pub failures:       Vec<ItemFailure>,
  /// The checkpoint cursor after this run.
  pub cursor:         Option<String>,
  /// The service reported no further pages.
  pub completed:      bool,
}

pub struct PlayImporter<R> {
  repo:      Arc<R>,
  providers: ProviderRegistry,
  config:    MatchConfig,
  retry:     RetryPolicy,
}

impl<R: Repository> PlayImporter<R> {
  pub fn new(
    repo: Arc<R>,
    providers: ProviderRegistry,
    config: MatchConfig,
    retry: RetryPolicy,
  ) -> Self {
    Self { repo, providers, config, retry }
  }

  /// Import `owner`'s plays from `service`, resuming at the checkpoint.
  ///
  /// Returns `Err` only when the checkpoint cannot be read or written. A
  /// page that cannot be fetched or stored ends the run with the
  /// checkpoint at the last committed page.
  pub async fn import_recent_plays(
    &self,
    owner: &str,
    service: &ServiceName,
    cancel: &CancellationToken,
  ) -> Result<ImportReport> {
    let adapter = self
      .providers
      .get(service)
      .ok_or_else(|| Error::UnknownService(service.clone()))?;
    let mut cursor = self
      .repo
      .get_checkpoint(owner.to_owned(), service.clone(), EntityType::Plays)
      .await
      .map_err(Error::storage)?
      .and_then(|c| c.cursor);

    let mut report = ImportReport { cursor: cursor.clone(), ..ImportReport::default() };
    let mut adopted: HashMap<String, TrackId> = HashMap::new();

    loop {
      if cancel.is_cancelled() {
        info!(%service, owner, pages = report.pages, "import cancelled");
        break;
      }
      let page_ref = EntityRef::Page { service: service.clone(), cursor: cursor.clone() };
      let page = match self
        .retry
        .run(cancel, "recent_plays", || adapter.recent_plays(cursor.as_deref()))
        .await
      {
        Ok(page) => page,
        Err(f) => {
          report.failures.push(f.into_item_failure(page_ref));
          break;
        }
      };
      report.failures.extend(page.rejected.into_iter().map(|e| ItemFailure {
        entity:   page_ref.clone(),
        kind:     e.kind,
        message:  e.message,
        attempts: 1,
      }));

      let batch_id = BatchId::new();
      let mut events = Vec::with_capacity(page.plays.len());
      for play in &page.plays {
        match self.adopt(&play.track, &mut adopted, &mut report).await {
          Ok(track_id) => events.push(NewPlayEvent {
            owner: owner.to_owned(),
            track_id,
            service: service.clone(),
            played_at: play.played_at,
            batch_id,
          }),
          Err(failure) => report.failures.push(failure),
        }
      }

      let attempted = events.len();
      let inserted = match self.repo.insert_play_events(events).await {
        Ok(stored) => stored.len(),
        Err(e) => {
          report.failures.push(storage_failure(page_ref, e));
          break;
        }
      };
      report.pages += 1;
      report.inserted += inserted;
      report.duplicates += attempted - inserted;
      debug!(%service, %batch_id, inserted, duplicates = attempted - inserted, "page committed");

      match page.next_cursor {
        Some(next) if cursor.as_ref() != Some(&next) => {
          self
            .repo
            .save_checkpoint(SyncCheckpoint {
              owner:      owner.to_owned(),
              service:    service.clone(),
              entity:     EntityType::Plays,
              cursor:     Some(next.clone()),
              updated_at: Utc::now(),
            })
            .await
            .map_err(Error::storage)?;
          cursor = Some(next);
          report.cursor = cursor.clone();
        }
        _ => {
          report.completed = true;
          break;
        }
      }
    }

    info!(
      %service,
      owner,
      pages = report.pages,
      inserted = report.inserted,
      duplicates = report.duplicates,
      created_tracks = report.created_tracks,
      failed = report.failures.len(),
      "play import finished"
    );
    Ok(report)
  }

  /// Find or create the canonical track for an observation.
  ///
  /// Tries, in order: a trusted mapping of the observation itself, a local
  /// track sharing a direct identifier, a local fuzzy match at or above the
  /// trust threshold, and finally a new track seeded from the observation.
  async fn adopt(
    &self,
    observed: &ObservedTrack,
    adopted: &mut HashMap<String, TrackId>,
    report: &mut ImportReport,
  ) -> ItemOutcome<TrackId> {
    if let Some(&id) = adopted.get(&observed.native_id) {
      return Ok(id);
    }
    let entity = EntityRef::Remote {
      service:   observed.service.clone(),
      native_id: observed.native_id.clone(),
    };
    let fail = |e: R::Error| storage_failure(entity.clone(), e);

    let mapped = self
      .repo
      .mappings_for_native(observed.service.clone(), observed.native_id.clone())
      .await
      .map_err(fail)?;
    let trusted = pick_best(
      mapped
        .into_iter()
        .filter(|m| m.mapping.is_trusted(self.config.trust_threshold))
        .map(|m| {
          let rank = Ranked {
            confidence:  m.mapping.confidence,
            verified_at: Some(m.mapping.verified_at),
            key:         m.mapping.id,
          };
          (rank, m.mapping.track_id)
        }),
    );
    if let Some((_, track_id)) = trusted {
      adopted.insert(observed.native_id.clone(), track_id);
      return Ok(track_id);
    }

    let track_id = match self.local_match(observed).await.map_err(fail)? {
      Some((track, score)) => {
        if !observed.identifiers.iter().all(|i| track.identifiers.contains(&i)) {
          self
            .repo
            .refresh_track_metadata(track.id, TrackMetadata {
              identifiers: observed.identifiers.clone(),
              ..TrackMetadata::default()
            })
            .await
            .map_err(fail)?;
        }
        self.link(track.id, observed, score.method(), score.confidence).await.map_err(fail)?;
        track.id
      }
      None => {
        let track = self
          .repo
          .insert_track(NewTrack::from_observation(observed))
          .await
          .map_err(fail)?;
        self
          .link(track.id, observed, MatchMethod::DirectImport, Confidence::MAX)
          .await
          .map_err(fail)?;
        report.created_tracks += 1;
        debug!(track_id = %track.id, native_id = %observed.native_id, "track created");
        track.id
      }
    };
    adopted.insert(observed.native_id.clone(), track_id);
    Ok(track_id)
  }

  /// A live local track sharing a direct identifier, or else the best
  /// fuzzy match that reaches the trust threshold.
  async fn local_match(
    &self,
    observed: &ObservedTrack,
  ) -> Result<Option<(Track, MatchScore)>, R::Error> {
    for ident in observed.identifiers.iter() {
      let kind = ident.kind;
      let hits = self.repo.find_tracks_by_identifier(ident).await?;
      if let Some(track) = hits.into_iter().min_by_key(|t| t.id) {
        return Ok(Some((track, MatchScore::identifier(kind))));
      }
    }

    let limit = Some(self.config.candidate_limit);
    let mut candidates: BTreeMap<TrackId, Track> = BTreeMap::new();
    let by_title = TrackQuery { title: Some(search_title(&observed.title)), artist: None, limit };
    for track in self.repo.search_tracks(by_title).await? {
      candidates.insert(track.id, track);
    }
    if let Some(artist) = observed.artists.first() {
      let by_artist = TrackQuery { title: None, artist: Some(artist.clone()), limit };
      for track in self.repo.search_tracks(by_artist).await? {
        candidates.insert(track.id, track);
      }
    }

    let best = pick_best(candidates.into_values().map(|track| {
      let s = scoring::score(observed, &track, &self.config);
      (Ranked { confidence: s.confidence, verified_at: None, key: track.id }, (track, s))
    }));
    Ok(
      best
        .filter(|(rank, _)| rank.confidence >= self.config.trust_threshold)
        .map(|(_, hit)| hit),
    )
  }

  async fn link(
    &self,
    track_id: TrackId,
    observed: &ObservedTrack,
    method: MatchMethod,
    confidence: Confidence,
  ) -> Result<(), R::Error> {
    self
      .repo
      .record_mapping(NewMapping { track_id, observed: observed.clone(), method, confidence })
      .await?;
    Ok(())
  }
}

/// The title without bracketed or dashed annotations, for substring search.
fn search_title(title: &str) -> String {
  let cut = title
    .find(['(', '['])
    .into_iter()
    .chain(title.find(" - "))
    .min()
    .unwrap_or(title.len());
  let head = title[..cut].trim();
  let head = if head.is_empty() { title.trim() } else { head };
  head.to_owned()
}

#[cfg(test)]
mod tests {
  use chorus_core::{
    ErrorKind,
    play::ObservedPlay,
    track::{DirectIds, IdentifierKind},
  };
  use chorus_store_sqlite::SqliteStore;
  use chrono::{DateTime, TimeZone};

  use super::*;
  use crate::testing::{FakeProvider, observed};

  fn at(m: u32) -> DateTime<Utc> { Utc.with_ymd_and_hms(2024, 3, 1, 10, m, 0).unwrap() }

  fn play(native_id: &str, title: &str, isrc: Option<&str>, minute: u32) -> ObservedPlay {
    let ids = isrc.map_or_else(DirectIds::default, |i| {
      DirectIds::default().with(IdentifierKind::Isrc, i)
    });
    ObservedPlay {
      track:     observed(ServiceName::history(), native_id, title, &["Artist"], ids),
      played_at: at(minute),
    }
  }

  async fn importer(
    provider: FakeProvider,
  ) -> (Arc<SqliteStore>, Arc<FakeProvider>, PlayImporter<SqliteStore>) {
    let repo = Arc::new(SqliteStore::open_in_memory().await.unwrap());
    let provider = Arc::new(provider);
    let mut providers = ProviderRegistry::new();
    providers.register(provider.clone());
    let importer = PlayImporter::new(
      repo.clone(),
      providers,
      MatchConfig::default(),
      RetryPolicy::none(),
    );
    (repo, provider, importer)
  }

  #[tokio::test]
  async fn pages_are_imported_and_checkpointed() {
    let provider = FakeProvider::new(ServiceName::history())
      .with_page(None, vec![play("h-1", "One", None, 0), play("h-2", "Two", None, 5)], Some("c1"))
      .with_page(Some("c1"), vec![play("h-1", "One", None, 10)], None);
    let (repo, _, importer) = importer(provider).await;

    let report = importer
      .import_recent_plays("me", &ServiceName::history(), &CancellationToken::new())
      .await
      .unwrap();
    assert!(report.completed);
    assert_eq!(report.pages, 2);
    assert_eq!(report.inserted, 3);
    assert_eq!(report.created_tracks, 2);
    assert!(report.failures.is_empty());

    let cp = repo
      .get_checkpoint("me".into(), ServiceName::history(), EntityType::Plays)
      .await
      .unwrap()
      .unwrap();
    assert_eq!(cp.cursor.as_deref(), Some("c1"));
  }

  #[tokio::test]
  async fn rerun_resumes_at_checkpoint_and_drops_duplicates() {
    let provider = FakeProvider::new(ServiceName::history())
      .with_page(None, vec![play("h-1", "One", None, 0)], Some("c1"))
      .with_page(Some("c1"), vec![play("h-2", "Two", None, 5)], None);
    let (_, provider, importer) = importer(provider).await;
    let cancel = CancellationToken::new();

    importer.import_recent_plays("me", &ServiceName::history(), &cancel).await.unwrap();
    let again = importer
      .import_recent_plays("me", &ServiceName::history(), &cancel)
      .await
      .unwrap();
    assert_eq!(again.inserted, 0);
    assert_eq!(again.duplicates, 1);
    assert_eq!(again.created_tracks, 0, "existing mapping reused");
    let calls = provider.calls();
    assert_eq!(calls.last().map(String::as_str), Some(r#"plays Some("c1")"#));
  }

  #[tokio::test]
  async fn failed_page_keeps_last_committed_checkpoint() {
    let provider = FakeProvider::new(ServiceName::history())
      .with_page(None, vec![play("h-1", "One", None, 0)], Some("c1"))
      .with_page(Some("c1"), vec![play("h-2", "Two", None, 5)], Some("c2"))
      .failing_at("c2");
    let (repo, _, importer) = importer(provider).await;

    let report = importer
      .import_recent_plays("me", &ServiceName::history(), &CancellationToken::new())
      .await
      .unwrap();
    assert!(!report.completed);
    assert_eq!(report.pages, 2);
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].kind, ErrorKind::Permanent);
    assert_eq!(report.failures[0].entity, EntityRef::Page {
      service: ServiceName::history(),
      cursor:  Some("c2".into()),
    });
    let cp = repo
      .get_checkpoint("me".into(), ServiceName::history(), EntityType::Plays)
      .await
      .unwrap()
      .unwrap();
    assert_eq!(cp.cursor.as_deref(), Some("c2"));
  }

  #[tokio::test]
  async fn shared_isrc_adopts_existing_track() {
    let provider = FakeProvider::new(ServiceName::history()).with_page(
      None,
      vec![play("h-1", "Song Title (Remastered)", Some("USABC1234567"), 0)],
      None,
    );
    let (repo, _, importer) = importer(provider).await;
    let existing = repo
      .insert_track(NewTrack {
        title:        "Song Title".into(),
        artists:      vec!["Artist".into()],
        album:        None,
        duration_ms:  None,
        release_date: None,
        identifiers:  DirectIds::default().with(IdentifierKind::Isrc, "USABC1234567"),
      })
      .await
      .unwrap();

    let report = importer
      .import_recent_plays("me", &ServiceName::history(), &CancellationToken::new())
      .await
      .unwrap();
    assert_eq!(report.created_tracks, 0);
    let mapped = repo.active_mappings(existing.id, None).await.unwrap();
    assert_eq!(mapped.len(), 1);
    assert_eq!(mapped[0].mapping.method, MatchMethod::DeterministicIdChain);
    assert_eq!(mapped[0].mapping.confidence.value(), 95);
  }

  #[tokio::test]
  async fn cancelled_import_fetches_nothing() {
    let provider = FakeProvider::new(ServiceName::history())
      .with_page(None, vec![play("h-1", "One", None, 0)], None);
    let (_, provider, importer) = importer(provider).await;
    let cancel = CancellationToken::new();
    cancel.cancel();
    let report = importer
      .import_recent_plays("me", &ServiceName::history(), &cancel)
      .await
      .unwrap();
    assert_eq!(report.pages, 0);
    assert!(provider.calls().is_empty());
  }

  #[test]
  fn search_title_drops_annotations() {
    assert_eq!(search_title("Song (Live) - 2011 Remaster"), "Song");
    assert_eq!(search_title("Song - Edit"), "Song");
    assert_eq!(search_title("(Intro)"), "(Intro)");
  }
}
