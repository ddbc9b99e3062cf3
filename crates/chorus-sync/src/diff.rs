//! Playlist diff: current list vs. target list → adds, removes, moves.
//!
//! Entries are paired first. Unpaired target entries are adds, unpaired
//! current entries are removes. Among the pairs, one longest subsequence
//! whose current positions already increase in target order stays put;
//! every other pair is a move. No reordering can leave more entries in
//! place, so the move count is minimal.
//!
//! The diff is a pure function of its inputs.

use std::{
  collections::{HashMap, VecDeque},
  hash::Hash,
};

use chorus_core::{
  mapping::{Confidence, MappedTrack},
  track::{DirectIdentifier, ObservedTrack, Track},
};
use chorus_match::{
  MatchConfig, MatchScore,
  scoring::{self, Ranked, pick_best},
};
use serde::Serialize;

use crate::config::MatchStrategy;

// ─── Types ───────────────────────────────────────────────────────────────────

/// One entry of the target list: a canonical track and its preferred
/// trusted mapping on the remote service.
#[derive(Debug, Clone)]
pub struct TargetTrack {
  pub track:   Track,
  pub mapping: Option<MappedTrack>,
}

impl TargetTrack {
  /// The native id this entry is written as, if it has one.
  pub fn native_id(&self) -> Option<&str> {
    self
      .mapping
      .as_ref()
      .map(|m| m.connector_track.native_id.as_str())
  }
}

/// A current entry and a target entry judged to be the same recording.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Pair {
  pub current:    usize,
  pub target:     usize,
  pub confidence: Confidence,
}

/// A paired entry that must change position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Move {
  /// Index in the current list.
  pub from: usize,
  /// Index in the target list.
  pub to:   usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PlaylistDiff {
  /// Target indices with no counterpart in the current list, ascending.
  pub adds:    Vec<usize>,
  /// Current indices with no counterpart in the target list, ascending.
  pub removes: Vec<usize>,
  /// Pairs outside the kept subsequence, in target order.
  pub moves:   Vec<Move>,
  /// Pairs already in the right relative order, in target order.
  pub kept:    Vec<Pair>,
}

impl PlaylistDiff {
  pub fn is_empty(&self) -> bool {
    self.adds.is_empty() && self.removes.is_empty() && self.moves.is_empty()
  }

  pub fn operation_count(&self) -> usize {
    self.adds.len() + self.removes.len() + self.moves.len()
  }
}

// ─── Entry points ────────────────────────────────────────────────────────────

/// Diff a remote list against the target list for that service.
pub fn diff(
  current: &[ObservedTrack],
  target: &[TargetTrack],
  strategy: MatchStrategy,
  cfg: &MatchConfig,
) -> PlaylistDiff {
  let pairs = pair_tracks(current, target, strategy, cfg);
  diff_pairs(current.len(), target.len(), pairs)
}

/// Diff two lists of plain keys; equal keys are the same entry.
///
/// Duplicates pair up in order: the n-th occurrence in `target` takes the
/// n-th occurrence in `current`.
pub fn diff_ids<T: Eq + Hash>(current: &[T], target: &[T]) -> PlaylistDiff {
  let mut positions: HashMap<&T, VecDeque<usize>> = HashMap::new();
  for (i, key) in current.iter().enumerate() {
    positions.entry(key).or_default().push_back(i);
  }
  let pairs = target
    .iter()
    .enumerate()
    .filter_map(|(t, key)| {
      let c = positions.get_mut(key)?.pop_front()?;
      Some(Pair { current: c, target: t, confidence: Confidence::MAX })
    })
    .collect();
  diff_pairs(current.len(), target.len(), pairs)
}

// ─── Pairing ─────────────────────────────────────────────────────────────────

/// Greedy one-to-one pairing in target order.
///
/// Each target entry takes the best unpaired current entry: highest
/// confidence, then most recently verified, then lowest index. Identifier
/// evidence is exhausted for every target entry before any metadata scoring
/// runs, so a fuzzy pair never takes an entry an exact one needed.
fn pair_tracks(
  current: &[ObservedTrack],
  target: &[TargetTrack],
  strategy: MatchStrategy,
  cfg: &MatchConfig,
) -> Vec<Pair> {
  let mut by_native: HashMap<&str, Vec<usize>> = HashMap::new();
  let mut by_ident: HashMap<DirectIdentifier, Vec<usize>> = HashMap::new();
  for (i, entry) in current.iter().enumerate() {
    by_native.entry(entry.native_id.as_str()).or_default().push(i);
    for ident in entry.identifiers.iter() {
      by_ident.entry(ident).or_default().push(i);
    }
  }

  let mut taken = vec![false; current.len()];
  let mut pairs = Vec::new();
  let mut unpaired = Vec::new();

  for (t, entry) in target.iter().enumerate() {
    let mut candidates = Vec::new();
    if let Some(mapped) = &entry.mapping {
      let native = mapped.connector_track.native_id.as_str();
      for &c in by_native.get(native).into_iter().flatten() {
        let ranked = Ranked {
          confidence:  mapped.mapping.confidence,
          verified_at: Some(mapped.mapping.verified_at),
          key:         c,
        };
        candidates.push((ranked, c));
      }
    }
    for ident in entry.track.identifiers.iter() {
      let confidence = MatchScore::identifier(ident.kind).confidence;
      for &c in by_ident.get(&ident).into_iter().flatten() {
        candidates.push((Ranked { confidence, verified_at: None, key: c }, c));
      }
    }

    let best = pick_best(candidates.into_iter().filter(|&(_, c)| !taken[c]));
    match best {
      Some((ranked, c)) => {
        taken[c] = true;
        pairs.push(Pair { current: c, target: t, confidence: ranked.confidence });
      }
      None => unpaired.push(t),
    }
  }

  if strategy == MatchStrategy::Comprehensive {
    for t in unpaired {
      let best = pick_best((0..current.len()).filter(|&c| !taken[c]).filter_map(
        |c| {
          let score = scoring::score(&current[c], &target[t].track, cfg);
          (score.confidence >= cfg.trust_threshold).then(|| {
            let ranked =
              Ranked { confidence: score.confidence, verified_at: None, key: c };
            (ranked, c)
          })
        },
      ));
      if let Some((ranked, c)) = best {
        taken[c] = true;
        pairs.push(Pair { current: c, target: t, confidence: ranked.confidence });
      }
    }
  }

  pairs
}

// ─── Minimal reorder ─────────────────────────────────────────────────────────

fn diff_pairs(current_len: usize, target_len: usize, mut pairs: Vec<Pair>) -> PlaylistDiff {
  let mut current_paired = vec![false; current_len];
  let mut target_paired = vec![false; target_len];
  for p in &pairs {
    current_paired[p.current] = true;
    target_paired[p.target] = true;
  }

  // Walking pairs in current order, the kept ones are those whose target
  // positions form the longest increasing run.
  pairs.sort_by_key(|p| p.current);
  let targets: Vec<usize> = pairs.iter().map(|p| p.target).collect();
  let mut in_lis = vec![false; pairs.len()];
  for i in longest_increasing(&targets) {
    in_lis[i] = true;
  }

  let mut kept = Vec::new();
  let mut moves = Vec::new();
  for (p, keep) in pairs.into_iter().zip(in_lis) {
    if keep {
      kept.push(p);
    } else {
      moves.push(Move { from: p.current, to: p.target });
    }
  }
  kept.sort_by_key(|p| p.target);
  moves.sort_by_key(|m| m.to);

  PlaylistDiff {
    adds: unpaired(&target_paired),
    removes: unpaired(&current_paired),
    moves,
    kept,
  }
}

fn unpaired(paired: &[bool]) -> Vec<usize> {
  paired
    .iter()
    .enumerate()
    .filter_map(|(i, &p)| (!p).then_some(i))
    .collect()
}

/// Positions in `seq` of one longest strictly increasing subsequence.
///
/// Patience sorting with back-pointers, `O(n log n)`. The result depends on
/// `seq` alone.
fn longest_increasing(seq: &[usize]) -> Vec<usize> {
  // tails[k]: position of the smallest tail of an increasing run of length k+1.
  let mut tails: Vec<usize> = Vec::new();
  let mut prev: Vec<Option<usize>> = vec![None; seq.len()];
  for (i, &value) in seq.iter().enumerate() {
    let k = tails.partition_point(|&p| seq[p] < value);
    if k > 0 {
      prev[i] = Some(tails[k - 1]);
    }
    if k == tails.len() {
      tails.push(i);
    } else {
      tails[k] = i;
    }
  }

  let mut out = Vec::with_capacity(tails.len());
  let mut cursor = tails.last().copied();
  while let Some(i) = cursor {
    out.push(i);
    cursor = prev[i];
  }
  out.reverse();
  out
}
