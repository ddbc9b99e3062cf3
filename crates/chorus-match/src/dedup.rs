//! Cross-service play deduplication.
//!
//! Two services often report the same physical play. Within one track,
//! events from different services that fall inside the configured window of
//! each other collapse into one kept event; the rest point at it.
//!
//! Input is sorted by `(played_at, service, id)` before anything is
//! compared, so the result does not depend on input order.

use std::collections::{BTreeMap, HashMap};

use chorus_core::{
  Error,
  ids::{PlayEventId, ServiceName, TrackId},
  mapping::Confidence,
  play::{DedupDecision, DedupOutcome, PlayEvent},
};
use chrono::{DateTime, TimeDelta, Utc};
use serde::Serialize;
use tracing::error;

use crate::config::DedupConfig;

/// Every event's verdict, ordered by event id, plus counts.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DedupResult {
  pub decisions: Vec<DedupDecision>,
  pub kept:      usize,
  pub merged:    usize,
  pub discarded: usize,
}

/// Deduplicate one owner's play events.
///
/// Events that already carry a stored verdict are context only; see
/// [`dedup_between`].
pub fn dedup(events: &[PlayEvent], cfg: &DedupConfig) -> DedupResult {
  dedup_scoped(events, |_| true, cfg)
}

/// Deduplicate the plays with `from <= played_at < to`.
///
/// `events` should also hold the plays within one dedup window of either
/// edge. Those, and every event whose verdict is already stored, receive no
/// decision: they only anchor merges. A stored verdict is final, so a kept
/// event stays kept even when a newly seen report outranks it.
pub fn dedup_between(
  events: &[PlayEvent],
  from: DateTime<Utc>,
  to: DateTime<Utc>,
  cfg: &DedupConfig,
) -> DedupResult {
  dedup_scoped(events, |e| from <= e.played_at && e.played_at < to, cfg)
}

fn dedup_scoped(
  events: &[PlayEvent],
  in_scope: impl Fn(&PlayEvent) -> bool,
  cfg: &DedupConfig,
) -> DedupResult {
  let mut sorted: Vec<&PlayEvent> = events.iter().collect();
  sorted.sort_by(|a, b| {
    (a.played_at, &a.service, a.id).cmp(&(b.played_at, &b.service, b.id))
  });

  let mut groups: BTreeMap<TrackId, Vec<&PlayEvent>> = BTreeMap::new();
  for event in sorted {
    groups.entry(event.track_id).or_default().push(event);
  }

  let window = TimeDelta::seconds(cfg.window_secs.into());
  let mut decisions = BTreeMap::new();
  for group in groups.values() {
    decide_group(group, &in_scope, window, cfg, &mut decisions);
  }

  let decisions: Vec<DedupDecision> = decisions.into_values().collect();
  let count = |f: fn(&DedupOutcome) -> bool| {
    decisions.iter().filter(|d| f(&d.outcome)).count()
  };
  DedupResult {
    kept: count(|o| matches!(o, DedupOutcome::Kept)),
    merged: count(|o| matches!(o, DedupOutcome::MergedInto(_))),
    discarded: count(|o| matches!(o, DedupOutcome::Discarded)),
    decisions,
  }
}

/// Whether deduplication has already stored a verdict for `event`.
fn is_settled(event: &PlayEvent) -> bool { event.dedup_confidence.is_some() }

/// Decide one track's open events, already in canonical order.
fn decide_group(
  group: &[&PlayEvent],
  in_scope: &impl Fn(&PlayEvent) -> bool,
  window: TimeDelta,
  cfg: &DedupConfig,
  out: &mut BTreeMap<PlayEventId, DedupDecision>,
) {
  let settled: Vec<&PlayEvent> = group
    .iter()
    .copied()
    .filter(|e| is_settled(e) && e.outcome != DedupOutcome::Discarded)
    .collect();

  // Exact re-reports: same service, same instant.
  let mut live: Vec<&PlayEvent> = Vec::with_capacity(group.len());
  for &event in group.iter().filter(|e| !is_settled(e) && in_scope(**e)) {
    let duplicate = settled
      .iter()
      .chain(&live)
      .any(|k| k.service == event.service && k.played_at == event.played_at);
    if duplicate {
      out.insert(event.id, DedupDecision {
        event:      event.id,
        outcome:    DedupOutcome::Discarded,
        confidence: Confidence::MAX,
      });
    } else {
      live.push(event);
    }
  }

  // Stored keeps absorb new reports from services not yet merged into them.
  let mut seen: HashMap<PlayEventId, Vec<&ServiceName>> = settled
    .iter()
    .filter(|e| e.outcome == DedupOutcome::Kept)
    .map(|e| (e.id, vec![&e.service]))
    .collect();
  for e in &settled {
    if let Some(services) = e.outcome.merge_target().and_then(|t| seen.get_mut(&t)) {
      services.push(&e.service);
    }
  }
  let mut open: Vec<&PlayEvent> = Vec::with_capacity(live.len());
  for event in live {
    let anchor = settled
      .iter()
      .copied()
      .filter(|k| (event.played_at - k.played_at).abs() <= window)
      .filter(|k| seen.get(&k.id).is_some_and(|s| !s.contains(&&event.service)))
      .min_by_key(|k| ((event.played_at - k.played_at).abs(), k.played_at, k.id));
    let Some(keep) = anchor else {
      open.push(event);
      continue;
    };
    if let Some(services) = seen.get_mut(&keep.id) {
      services.push(&event.service);
    }
    out.insert(event.id, DedupDecision {
      event:      event.id,
      outcome:    DedupOutcome::MergedInto(keep.id),
      confidence: merge_confidence(event.played_at - keep.played_at, window),
    });
  }

  // Greedy clusters anchored at the earliest unassigned event, at most one
  // event per service.
  let mut assigned = vec![false; open.len()];
  for i in 0..open.len() {
    if assigned[i] {
      continue;
    }
    assigned[i] = true;
    let anchor = open[i];
    let mut cluster = vec![anchor];
    let mut services: Vec<&ServiceName> = vec![&anchor.service];
    for j in i + 1..open.len() {
      if open[j].played_at - anchor.played_at > window {
        break;
      }
      if !assigned[j] && !services.contains(&&open[j].service) {
        assigned[j] = true;
        services.push(&open[j].service);
        cluster.push(open[j]);
      }
    }

    let Some(keep) = cluster
      .iter()
      .copied()
      .min_by_key(|e| (cfg.rank(&e.service), e.played_at, e.id))
    else {
      continue;
    };
    for event in cluster {
      let (outcome, confidence) = if event.id == keep.id {
        (DedupOutcome::Kept, Confidence::MAX)
      } else {
        (
          DedupOutcome::MergedInto(keep.id),
          merge_confidence(event.played_at - keep.played_at, window),
        )
      };
      out.insert(event.id, DedupDecision { event: event.id, outcome, confidence });
    }
  }
}

/// `100 - 50 * |gap| / window`: 100 for simultaneous reports, 50 at the
/// window's edge.
fn merge_confidence(gap: TimeDelta, window: TimeDelta) -> Confidence {
  let window_ms = window.num_milliseconds();
  if window_ms <= 0 {
    return Confidence::MAX;
  }
  let gap_ms = gap.num_milliseconds().abs().min(window_ms);
  Confidence::saturating(100 - 50 * gap_ms / window_ms)
}

/// Reject merge pointers that are self-referential, chained through another
/// merged event, or aimed at no known event.
///
/// `context` holds events with stored verdicts that `decisions` may point
/// at; a decision overrides the stored outcome of the same event.
pub fn validate_merge_chains(
  decisions: &[DedupDecision],
  context: &[PlayEvent],
) -> Result<(), Error> {
  let mut outcomes: HashMap<PlayEventId, DedupOutcome> = context
    .iter()
    .map(|e| (e.id, e.outcome))
    .collect();
  outcomes.extend(decisions.iter().map(|d| (d.event, d.outcome)));
  for d in decisions {
    let Some(target) = d.outcome.merge_target() else { continue };
    let err = match outcomes.get(&target) {
      _ if target == d.event => Some(Error::CyclicMerge(d.event)),
      Some(DedupOutcome::Kept) => None,
      Some(_) => Some(Error::CyclicMerge(d.event)),
      None => Some(Error::DanglingMerge(d.event)),
    };
    if let Some(err) = err {
      error!(event = %d.event, target = %target, "invalid merge pointer");
      return Err(err);
    }
  }
  Ok(())
}

#[cfg(test)]
mod tests {
  use chorus_core::ids::BatchId;
  use chrono::TimeZone;

  use super::*;

  fn at(h: u32, m: u32, s: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 1, h, m, s).unwrap()
  }

  fn event(id: i64, track: i64, service: &str, played_at: DateTime<Utc>) -> PlayEvent {
    PlayEvent {
      id: PlayEventId(id),
      owner: "me".into(),
      track_id: TrackId(track),
      service: ServiceName::new(service),
      played_at,
      batch_id: BatchId::new(),
      outcome: DedupOutcome::Kept,
      dedup_confidence: None,
    }
  }

  fn settled(mut event: PlayEvent, outcome: DedupOutcome) -> PlayEvent {
    event.outcome = outcome;
    event.dedup_confidence = Some(Confidence::MAX);
    event
  }

  fn outcome(result: &DedupResult, id: i64) -> DedupOutcome {
    result
      .decisions
      .iter()
      .find(|d| d.event == PlayEventId(id))
      .map(|d| d.outcome)
      .unwrap()
  }

  fn scenario() -> Vec<PlayEvent> {
    vec![
      event(1, 7, "history", at(10, 0, 0)),
      event(2, 7, "catalog", at(10, 3, 0)),
      event(3, 7, "history", at(10, 20, 0)),
    ]
  }

  #[test]
  fn cross_service_plays_within_window_merge() {
    let result = dedup(&scenario(), &DedupConfig::default());
    // The catalog ranks first, so its report is kept.
    assert_eq!(outcome(&result, 2), DedupOutcome::Kept);
    assert_eq!(outcome(&result, 1), DedupOutcome::MergedInto(PlayEventId(2)));
    assert_eq!(outcome(&result, 3), DedupOutcome::Kept);
    assert_eq!((result.kept, result.merged, result.discarded), (2, 1, 0));
    let merged = result.decisions.iter().find(|d| d.event == PlayEventId(1)).unwrap();
    assert_eq!(merged.confidence.value(), 70);
    validate_merge_chains(&result.decisions, &[]).unwrap();
  }

  #[test]
  fn output_is_independent_of_input_order() {
    let mut events = scenario();
    events.push(event(4, 7, "registry", at(10, 1, 0)));
    events.push(event(5, 8, "catalog", at(10, 2, 0)));
    events.push(event(6, 8, "history", at(10, 2, 30)));
    let cfg = DedupConfig::default();
    let expected = dedup(&events, &cfg);
    for rotation in 0..events.len() {
      let mut shuffled = events.clone();
      shuffled.rotate_left(rotation);
      assert_eq!(dedup(&shuffled, &cfg), expected);
      shuffled.reverse();
      assert_eq!(dedup(&shuffled, &cfg), expected);
    }
  }

  #[test]
  fn same_service_plays_are_not_merged() {
    let events = vec![
      event(1, 7, "history", at(10, 0, 0)),
      event(2, 7, "history", at(10, 2, 0)),
    ];
    let result = dedup(&events, &DedupConfig::default());
    assert_eq!(result.kept, 2);
  }

  #[test]
  fn exact_same_service_duplicates_are_discarded() {
    let events = vec![
      event(1, 7, "history", at(10, 0, 0)),
      event(2, 7, "history", at(10, 0, 0)),
    ];
    let result = dedup(&events, &DedupConfig::default());
    assert_eq!(outcome(&result, 1), DedupOutcome::Kept);
    assert_eq!(outcome(&result, 2), DedupOutcome::Discarded);
  }

  #[test]
  fn different_tracks_never_merge() {
    let events = vec![
      event(1, 7, "history", at(10, 0, 0)),
      event(2, 8, "catalog", at(10, 0, 0)),
    ];
    assert_eq!(dedup(&events, &DedupConfig::default()).merged, 0);
  }

  #[test]
  fn unknown_services_rank_last() {
    let cfg = DedupConfig {
      window_secs:      300,
      service_priority: vec![ServiceName::history()],
    };
    let events = vec![
      event(1, 7, "elsewhere", at(10, 0, 0)),
      event(2, 7, "history", at(10, 1, 0)),
    ];
    let result = dedup(&events, &cfg);
    assert_eq!(outcome(&result, 2), DedupOutcome::Kept);
    assert_eq!(outcome(&result, 1), DedupOutcome::MergedInto(PlayEventId(2)));
  }

  #[test]
  fn stored_verdicts_are_not_rewritten() {
    let events = vec![
      settled(event(1, 7, "catalog", at(10, 0, 0)), DedupOutcome::Kept),
      settled(
        event(2, 7, "history", at(10, 0, 1)),
        DedupOutcome::MergedInto(PlayEventId(1)),
      ),
      event(3, 7, "registry", at(10, 2, 0)),
    ];
    let result = dedup(&events, &DedupConfig::default());
    assert_eq!(result.decisions.len(), 1);
    assert_eq!(outcome(&result, 3), DedupOutcome::MergedInto(PlayEventId(1)));
    assert_eq!((result.kept, result.merged, result.discarded), (0, 1, 0));
    validate_merge_chains(&result.decisions, &events).unwrap();

    // A second pass over the stored result has nothing left to decide.
    let mut stored = events.clone();
    stored[2] = settled(stored[2].clone(), DedupOutcome::MergedInto(PlayEventId(1)));
    assert!(dedup(&stored, &DedupConfig::default()).decisions.is_empty());
  }

  #[test]
  fn stored_keep_outlasts_higher_ranked_newcomer() {
    let events = vec![
      settled(event(1, 7, "history", at(10, 0, 0)), DedupOutcome::Kept),
      event(2, 7, "catalog", at(10, 1, 0)),
      event(3, 7, "history", at(10, 1, 30)),
    ];
    let result = dedup(&events, &DedupConfig::default());
    assert_eq!(outcome(&result, 2), DedupOutcome::MergedInto(PlayEventId(1)));
    // The kept history play already has its history report.
    assert_eq!(outcome(&result, 3), DedupOutcome::Kept);
    validate_merge_chains(&result.decisions, &events).unwrap();
  }

  #[test]
  fn re_report_of_stored_event_is_discarded() {
    let events = vec![
      settled(event(1, 7, "history", at(10, 0, 0)), DedupOutcome::Kept),
      event(2, 7, "history", at(10, 0, 0)),
    ];
    let result = dedup(&events, &DedupConfig::default());
    assert_eq!(outcome(&result, 2), DedupOutcome::Discarded);
  }

  #[test]
  fn events_outside_range_only_anchor() {
    let events = vec![
      event(1, 7, "catalog", at(9, 59, 0)),
      event(2, 7, "history", at(10, 0, 30)),
    ];
    let result =
      dedup_between(&events, at(10, 0, 0), at(11, 0, 0), &DedupConfig::default());
    // Unsettled plays before the range get no verdict and cannot anchor.
    assert_eq!(result.decisions.len(), 1);
    assert_eq!(outcome(&result, 2), DedupOutcome::Kept);

    let events = vec![settled(events[0].clone(), DedupOutcome::Kept), events[1].clone()];
    let result =
      dedup_between(&events, at(10, 0, 0), at(11, 0, 0), &DedupConfig::default());
    assert_eq!(outcome(&result, 2), DedupOutcome::MergedInto(PlayEventId(1)));
  }

  #[test]
  fn merge_chains_are_validated() {
    let d = |event, outcome| DedupDecision {
      event: PlayEventId(event),
      outcome,
      confidence: Confidence::MAX,
    };
    let multi_hop = [
      d(1, DedupOutcome::MergedInto(PlayEventId(2))),
      d(2, DedupOutcome::MergedInto(PlayEventId(3))),
      d(3, DedupOutcome::Kept),
    ];
    assert!(matches!(
      validate_merge_chains(&multi_hop, &[]),
      Err(Error::CyclicMerge(PlayEventId(1)))
    ));

    let self_loop = [d(1, DedupOutcome::MergedInto(PlayEventId(1)))];
    assert!(matches!(validate_merge_chains(&self_loop, &[]), Err(Error::CyclicMerge(_))));

    let dangling = [d(1, DedupOutcome::MergedInto(PlayEventId(9)))];
    let err = validate_merge_chains(&dangling, &[]).unwrap_err();
    assert_eq!(err.kind(), chorus_core::ErrorKind::DataIntegrity);

    // Targets may be stored events, but only kept ones.
    let stored = [
      settled(event(9, 7, "catalog", at(10, 0, 0)), DedupOutcome::Kept),
      settled(event(8, 7, "history", at(10, 0, 0)), DedupOutcome::Discarded),
    ];
    validate_merge_chains(&dangling, &stored).unwrap();
    let onto_discarded = [d(1, DedupOutcome::MergedInto(PlayEventId(8)))];
    assert!(matches!(
      validate_merge_chains(&onto_discarded, &stored),
      Err(Error::CyclicMerge(_))
    ));
  }
}
