//! Integration tests for `SqliteStore` against an in-memory database.

use chorus_core::{
  checkpoint::{EntityType, SyncCheckpoint},
  ids::{BatchId, PlayEventId, PlaylistTrackId, ServiceName, TrackId},
  mapping::{Confidence, MatchMethod, NewMapping},
  ordering,
  play::{DedupDecision, DedupOutcome, NewPlayEvent},
  playlist::{NewPlaylist, PlaylistEdit, PlaylistLink},
  store::Repository,
  track::{
    DirectIdentifier, DirectIds, IdentifierKind, NewTrack, ObservedTrack,
    TrackMetadata, TrackQuery,
  },
};
use chrono::{DateTime, TimeZone, Utc};

use crate::{Error, SqliteStore};

async fn store() -> SqliteStore {
  SqliteStore::open_in_memory()
    .await
    .expect("in-memory store")
}

fn new_track(title: &str, artist: &str, ids: DirectIds) -> NewTrack {
  NewTrack {
    title:        title.into(),
    artists:      vec![artist.into()],
    album:        None,
    duration_ms:  Some(200_000),
    release_date: None,
    identifiers:  ids,
  }
}

fn observed(service: ServiceName, native_id: &str, title: &str) -> ObservedTrack {
  ObservedTrack {
    service,
    native_id: native_id.into(),
    title: title.into(),
    artists: vec!["Artist".into()],
    album: Some("Album".into()),
    duration_ms: Some(200_000),
    release_date: None,
    identifiers: DirectIds::default().with(IdentifierKind::Isrc, "USABC1234567"),
    raw: serde_json::json!({ "id": native_id }),
    observed_at: Utc::now(),
  }
}

fn at(m: u32) -> DateTime<Utc> { Utc.with_ymd_and_hms(2024, 3, 1, 10, m, 0).unwrap() }

// ─── Tracks ──────────────────────────────────────────────────────────────────

#[tokio::test]
async fn insert_and_get_track() {
  let s = store().await;
  let ids = DirectIds::default().with(IdentifierKind::Isrc, "us-abc-12-34567");
  let track = s.insert_track(new_track("Song", "Artist", ids)).await.unwrap();
  assert_eq!(track.identifiers.isrc.as_deref(), Some("USABC1234567"));

  let fetched = s.get_track(track.id).await.unwrap().unwrap();
  assert_eq!(fetched, track);
  assert!(s.get_track(TrackId(999)).await.unwrap().is_none());
}

#[tokio::test]
async fn empty_title_is_rejected() {
  let s = store().await;
  let err = s
    .insert_track(new_track("  ", "Artist", DirectIds::default()))
    .await
    .unwrap_err();
  assert!(matches!(err, Error::Core(chorus_core::Error::Validation(_))));
}

#[tokio::test]
async fn track_ids_are_never_reused() {
  let s = store().await;
  let a = s.insert_track(new_track("A", "X", DirectIds::default())).await.unwrap();
  s.soft_delete_track(a.id).await.unwrap();
  let b = s.insert_track(new_track("B", "X", DirectIds::default())).await.unwrap();
  assert!(b.id > a.id);
  assert!(s.get_track(a.id).await.unwrap().unwrap().is_deleted());
}

#[tokio::test]
async fn identifier_lookup_skips_deleted_tracks() {
  let s = store().await;
  let ids = DirectIds::default().with(IdentifierKind::Isrc, "USABC1234567");
  let live = s.insert_track(new_track("A", "X", ids.clone())).await.unwrap();
  let gone = s.insert_track(new_track("A", "X", ids)).await.unwrap();
  s.soft_delete_track(gone.id).await.unwrap();

  let ident = DirectIdentifier::new(IdentifierKind::Isrc, "USABC1234567").unwrap();
  let hits = s.find_tracks_by_identifier(ident).await.unwrap();
  assert_eq!(hits.iter().map(|t| t.id).collect::<Vec<_>>(), vec![live.id]);
}

#[tokio::test]
async fn search_matches_substrings_case_insensitively() {
  let s = store().await;
  s.insert_track(new_track("Song Title", "The Band", DirectIds::default())).await.unwrap();
  s.insert_track(new_track("Other", "Solo Act", DirectIds::default())).await.unwrap();
  s.insert_track(new_track("100% Song", "Solo Act", DirectIds::default())).await.unwrap();

  let by_title = s
    .search_tracks(TrackQuery { title: Some("song".into()), ..TrackQuery::default() })
    .await
    .unwrap();
  assert_eq!(by_title.len(), 2);

  let by_artist = s
    .search_tracks(TrackQuery { artist: Some("band".into()), ..TrackQuery::default() })
    .await
    .unwrap();
  assert_eq!(by_artist.len(), 1);
  assert_eq!(by_artist[0].title, "Song Title");

  let literal = s
    .search_tracks(TrackQuery { title: Some("0%".into()), ..TrackQuery::default() })
    .await
    .unwrap();
  assert_eq!(literal.len(), 1);

  let limited = s
    .search_tracks(TrackQuery { artist: Some("solo".into()), limit: Some(1), ..TrackQuery::default() })
    .await
    .unwrap();
  assert_eq!(limited.len(), 1);
}

#[tokio::test]
async fn refresh_fills_identifiers_without_overwriting() {
  let s = store().await;
  let ids = DirectIds::default().with(IdentifierKind::Isrc, "USABC1234567");
  let track = s.insert_track(new_track("Song", "Artist", ids)).await.unwrap();

  let refreshed = s
    .refresh_track_metadata(track.id, TrackMetadata {
      album:       Some("Album".into()),
      identifiers: DirectIds::default()
        .with(IdentifierKind::Isrc, "GBXYZ7654321")
        .with(IdentifierKind::RegistryId, "ABC-123"),
      ..TrackMetadata::default()
    })
    .await
    .unwrap();
  assert_eq!(refreshed.album.as_deref(), Some("Album"));
  assert_eq!(refreshed.duration_ms, Some(200_000));
  assert_eq!(refreshed.identifiers.isrc.as_deref(), Some("USABC1234567"));
  assert_eq!(refreshed.identifiers.registry_id.as_deref(), Some("abc-123"));
  assert_eq!(refreshed.title, "Song");
}

#[tokio::test]
async fn refresh_rejects_deleted_track() {
  let s = store().await;
  let track = s.insert_track(new_track("Song", "Artist", DirectIds::default())).await.unwrap();
  s.soft_delete_track(track.id).await.unwrap();
  let err = s
    .refresh_track_metadata(track.id, TrackMetadata::default())
    .await
    .unwrap_err();
  assert!(matches!(err, Error::TrackDeleted(_)));
}

// ─── Connector tracks & mappings ─────────────────────────────────────────────

#[tokio::test]
async fn connector_tracks_upsert_by_native_id() {
  let s = store().await;
  let first = s
    .upsert_connector_tracks(vec![observed(ServiceName::catalog(), "cat-1", "Old")])
    .await
    .unwrap();
  let second = s
    .upsert_connector_tracks(vec![observed(ServiceName::catalog(), "cat-1", "New")])
    .await
    .unwrap();
  assert_eq!(first[0].id, second[0].id);
  assert_eq!(second[0].title, "New");
  assert_eq!(second[0].raw["id"], "cat-1");

  let fetched = s
    .get_connector_track(ServiceName::catalog(), "cat-1".into())
    .await
    .unwrap()
    .unwrap();
  assert_eq!(fetched.title, "New");
  assert_eq!(fetched.identifiers.isrc.as_deref(), Some("USABC1234567"));
}

#[tokio::test]
async fn record_mapping_replaces_active_pair() {
  let s = store().await;
  let track = s.insert_track(new_track("Song", "Artist", DirectIds::default())).await.unwrap();
  let mapping = |confidence: i64, method| NewMapping {
    track_id: track.id,
    observed: observed(ServiceName::catalog(), "cat-1", "Song"),
    method,
    confidence: Confidence::new(confidence).unwrap(),
  };

  let first = s.record_mapping(mapping(45, MatchMethod::FuzzyMetadata)).await.unwrap();
  let second = s
    .record_mapping(mapping(95, MatchMethod::DeterministicIdChain))
    .await
    .unwrap();
  assert_ne!(first.mapping.id, second.mapping.id);
  assert_eq!(first.connector_track.id, second.connector_track.id);

  let active = s.active_mappings(track.id, None).await.unwrap();
  assert_eq!(active.len(), 1);
  assert_eq!(active[0].mapping.id, second.mapping.id);
  assert_eq!(active[0].mapping.confidence.value(), 95);

  let by_native = s
    .mappings_for_native(ServiceName::catalog(), "cat-1".into())
    .await
    .unwrap();
  assert_eq!(by_native.len(), 1);
}

#[tokio::test]
async fn active_mappings_filter_by_service_and_order_by_strength() {
  let s = store().await;
  let track = s.insert_track(new_track("Song", "Artist", DirectIds::default())).await.unwrap();
  for (service, native, conf) in [
    (ServiceName::catalog(), "cat-1", 70),
    (ServiceName::catalog(), "cat-2", 90),
    (ServiceName::registry(), "reg-1", 85),
  ] {
    s.record_mapping(NewMapping {
      track_id:   track.id,
      observed:   observed(service, native, "Song"),
      method:     MatchMethod::FuzzyMetadata,
      confidence: Confidence::new(conf).unwrap(),
    })
    .await
    .unwrap();
  }

  let catalog = s
    .active_mappings(track.id, Some(ServiceName::catalog()))
    .await
    .unwrap();
  let natives: Vec<_> = catalog.iter().map(|m| m.connector_track.native_id.as_str()).collect();
  assert_eq!(natives, ["cat-2", "cat-1"]);
  assert_eq!(s.active_mappings(track.id, None).await.unwrap().len(), 3);
}

#[tokio::test]
async fn mapping_to_deleted_track_is_rejected() {
  let s = store().await;
  let track = s.insert_track(new_track("Song", "Artist", DirectIds::default())).await.unwrap();
  s.soft_delete_track(track.id).await.unwrap();
  let err = s
    .record_mapping(NewMapping {
      track_id:   track.id,
      observed:   observed(ServiceName::catalog(), "cat-1", "Song"),
      method:     MatchMethod::ManualOverride,
      confidence: Confidence::MAX,
    })
    .await
    .unwrap_err();
  assert!(matches!(err, Error::TrackDeleted(_)));
  assert!(
    s.get_connector_track(ServiceName::catalog(), "cat-1".into())
      .await
      .unwrap()
      .is_none(),
    "observation write rolled back"
  );
}

#[tokio::test]
async fn deleting_a_track_retires_its_mappings() {
  let s = store().await;
  let track = s.insert_track(new_track("Song", "Artist", DirectIds::default())).await.unwrap();
  let mapped = s
    .record_mapping(NewMapping {
      track_id:   track.id,
      observed:   observed(ServiceName::catalog(), "cat-1", "Song"),
      method:     MatchMethod::DirectImport,
      confidence: Confidence::MAX,
    })
    .await
    .unwrap();
  s.soft_delete_track(track.id).await.unwrap();
  assert!(s.active_mappings(track.id, None).await.unwrap().is_empty());
  // Idempotent once retired.
  s.soft_delete_mapping(mapped.mapping.id).await.unwrap();
}

// ─── Play events ─────────────────────────────────────────────────────────────

fn play(track_id: TrackId, service: ServiceName, minute: u32, batch: BatchId) -> NewPlayEvent {
  NewPlayEvent {
    owner: "me".into(),
    track_id,
    service,
    played_at: at(minute),
    batch_id: batch,
  }
}

#[tokio::test]
async fn duplicate_plays_are_skipped() {
  let s = store().await;
  let track = s.insert_track(new_track("Song", "Artist", DirectIds::default())).await.unwrap();
  let batch = BatchId::new();

  let first = s
    .insert_play_events(vec![
      play(track.id, ServiceName::history(), 0, batch),
      play(track.id, ServiceName::history(), 0, batch),
      play(track.id, ServiceName::catalog(), 0, batch),
    ])
    .await
    .unwrap();
  assert_eq!(first.len(), 2);
  assert!(first.iter().all(|e| e.outcome == DedupOutcome::Kept && e.batch_id == batch));

  let again = s
    .insert_play_events(vec![play(track.id, ServiceName::history(), 0, BatchId::new())])
    .await
    .unwrap();
  assert!(again.is_empty());
}

#[tokio::test]
async fn window_is_half_open_and_ordered() {
  let s = store().await;
  let track = s.insert_track(new_track("Song", "Artist", DirectIds::default())).await.unwrap();
  let batch = BatchId::new();
  s.insert_play_events(vec![
    play(track.id, ServiceName::history(), 10, batch),
    play(track.id, ServiceName::catalog(), 5, batch),
    play(track.id, ServiceName::history(), 5, batch),
    play(track.id, ServiceName::history(), 0, batch),
  ])
  .await
  .unwrap();

  let window = s.play_events_in_window("me".into(), at(0), at(10)).await.unwrap();
  let seen: Vec<_> = window.iter().map(|e| (e.played_at, e.service.as_str())).collect();
  assert_eq!(seen, [(at(0), "history"), (at(5), "catalog"), (at(5), "history")]);
  assert!(
    s.play_events_in_window("someone else".into(), at(0), at(60))
      .await
      .unwrap()
      .is_empty()
  );
}

#[tokio::test]
async fn dedup_outcomes_persist_and_reject_chains() {
  let s = store().await;
  let track = s.insert_track(new_track("Song", "Artist", DirectIds::default())).await.unwrap();
  let batch = BatchId::new();
  let events = s
    .insert_play_events(vec![
      play(track.id, ServiceName::history(), 0, batch),
      play(track.id, ServiceName::catalog(), 3, batch),
      play(track.id, ServiceName::registry(), 4, batch),
    ])
    .await
    .unwrap();
  let (a, b, c) = (events[0].id, events[1].id, events[2].id);
  let conf = Confidence::new(70).unwrap();

  let n = s
    .record_dedup_outcomes(vec![
      DedupDecision { event: a, outcome: DedupOutcome::MergedInto(b), confidence: conf },
      DedupDecision { event: b, outcome: DedupOutcome::Kept, confidence: Confidence::MAX },
    ])
    .await
    .unwrap();
  assert_eq!(n, 2);
  let window = s.play_events_in_window("me".into(), at(0), at(60)).await.unwrap();
  assert_eq!(window[0].outcome, DedupOutcome::MergedInto(b));
  assert_eq!(window[0].dedup_confidence, Some(conf));

  // Pointing at a merged event would create a two-hop chain.
  let err = s
    .record_dedup_outcomes(vec![DedupDecision {
      event:      c,
      outcome:    DedupOutcome::MergedInto(a),
      confidence: conf,
    }])
    .await
    .unwrap_err();
  assert!(matches!(err, Error::Core(chorus_core::Error::CyclicMerge(_))));

  let err = s
    .record_dedup_outcomes(vec![DedupDecision {
      event:      c,
      outcome:    DedupOutcome::MergedInto(PlayEventId(999)),
      confidence: conf,
    }])
    .await
    .unwrap_err();
  assert!(matches!(err, Error::Core(chorus_core::Error::DanglingMerge(_))));

  // Rolled back: c is still kept.
  let window = s.play_events_in_window("me".into(), at(0), at(60)).await.unwrap();
  assert_eq!(window[2].outcome, DedupOutcome::Kept);
}

// ─── Playlists ───────────────────────────────────────────────────────────────

#[tokio::test]
async fn playlist_edits_keep_key_order() {
  let s = store().await;
  let t1 = s.insert_track(new_track("One", "A", DirectIds::default())).await.unwrap();
  let t2 = s.insert_track(new_track("Two", "A", DirectIds::default())).await.unwrap();
  let playlist = s
    .create_playlist(NewPlaylist { owner: "me".into(), name: "Mix".into(), link: None })
    .await
    .unwrap();

  let keys = ordering::keys_between(None, None, 2).unwrap();
  let rows = s
    .apply_playlist_edits(playlist.id, vec![
      PlaylistEdit::Insert { track_id: t1.id, ordering_key: keys[0].clone() },
      PlaylistEdit::Insert { track_id: t2.id, ordering_key: keys[1].clone() },
    ])
    .await
    .unwrap();
  assert_eq!(rows.iter().map(|r| r.track_id).collect::<Vec<_>>(), vec![t1.id, t2.id]);

  // Move the second row in front of the first.
  let front = ordering::key_between(None, Some(keys[0].as_str())).unwrap();
  let rows = s
    .apply_playlist_edits(playlist.id, vec![PlaylistEdit::Reorder {
      entry:        rows[1].id,
      ordering_key: front,
    }])
    .await
    .unwrap();
  assert_eq!(rows.iter().map(|r| r.track_id).collect::<Vec<_>>(), vec![t2.id, t1.id]);

  let rows = s
    .apply_playlist_edits(playlist.id, vec![PlaylistEdit::Remove { entry: rows[0].id }])
    .await
    .unwrap();
  assert_eq!(rows.len(), 1);
  assert_eq!(s.playlist_tracks(playlist.id).await.unwrap(), rows);
}

#[tokio::test]
async fn failed_edit_set_changes_nothing() {
  let s = store().await;
  let t1 = s.insert_track(new_track("One", "A", DirectIds::default())).await.unwrap();
  let playlist = s
    .create_playlist(NewPlaylist { owner: "me".into(), name: "Mix".into(), link: None })
    .await
    .unwrap();
  let err = s
    .apply_playlist_edits(playlist.id, vec![
      PlaylistEdit::Insert { track_id: t1.id, ordering_key: "V".into() },
      PlaylistEdit::Remove { entry: PlaylistTrackId(42) },
    ])
    .await
    .unwrap_err();
  assert!(matches!(err, Error::PlaylistTrackNotFound { .. }));
  assert!(s.playlist_tracks(playlist.id).await.unwrap().is_empty());

  let err = s
    .apply_playlist_edits(playlist.id, vec![PlaylistEdit::Insert {
      track_id:     t1.id,
      ordering_key: "not a key!".into(),
    }])
    .await
    .unwrap_err();
  assert!(matches!(err, Error::Core(chorus_core::Error::InvalidOrderingKey(_))));
}

#[tokio::test]
async fn playlist_sync_link_is_recorded() {
  let s = store().await;
  let playlist = s
    .create_playlist(NewPlaylist { owner: "me".into(), name: "Mix".into(), link: None })
    .await
    .unwrap();
  assert!(playlist.link.is_none());

  let link = PlaylistLink {
    service:   ServiceName::catalog(),
    remote_id: "pl-1".into(),
    snapshot:  Some("abc".into()),
    synced_at: Some(at(0)),
  };
  let updated = s.record_playlist_sync(playlist.id, link.clone()).await.unwrap();
  assert_eq!(updated.link, Some(link));
}

// ─── Checkpoints ─────────────────────────────────────────────────────────────

#[tokio::test]
async fn checkpoints_are_one_row_per_key() {
  let s = store().await;
  let checkpoint = |service: ServiceName, cursor: &str| SyncCheckpoint {
    owner: "me".into(),
    service,
    entity: EntityType::Plays,
    cursor: Some(cursor.into()),
    updated_at: at(0),
  };
  s.save_checkpoint(checkpoint(ServiceName::history(), "c1")).await.unwrap();
  s.save_checkpoint(checkpoint(ServiceName::history(), "c2")).await.unwrap();
  s.save_checkpoint(checkpoint(ServiceName::catalog(), "x")).await.unwrap();

  let got = s
    .get_checkpoint("me".into(), ServiceName::history(), EntityType::Plays)
    .await
    .unwrap()
    .unwrap();
  assert_eq!(got.cursor.as_deref(), Some("c2"));
  assert_eq!(s.list_checkpoints("me".into(), None).await.unwrap().len(), 2);
  assert_eq!(
    s.list_checkpoints("me".into(), Some(ServiceName::catalog()))
      .await
      .unwrap()
      .len(),
    1
  );
  assert!(
    s.get_checkpoint("me".into(), ServiceName::history(), EntityType::Playlists)
      .await
      .unwrap()
      .is_none()
  );
}
