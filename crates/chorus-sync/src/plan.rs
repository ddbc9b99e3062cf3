//! Sequencing a diff into concrete index operations and write batches.
//!
//! Operations run in a fixed order: removes from the highest index down,
//! then adds in ascending target order, then moves in ascending target
//! order. Every index is computed by simulating the list as the earlier
//! operations leave it, so applying the operations one after another
//! reproduces the target exactly.

use chorus_core::{
  connector::{OpKind, PlaylistOp},
  ids::ServiceName,
};
use serde::Serialize;

use crate::{
  diff::PlaylistDiff,
  error::{Result, SyncError},
};

// ─── Sequencing ──────────────────────────────────────────────────────────────

/// Concrete operations turning `current_ids` into `target_ids`.
///
/// Adds that land at consecutive indices are coalesced into one operation of
/// at most `ceiling` tracks. Moves whose simulated source and destination
/// coincide are dropped.
pub fn sequence_operations(
  diff: &PlaylistDiff,
  current_ids: &[String],
  target_ids: &[String],
  ceiling: usize,
) -> Result<Vec<PlaylistOp>> {
  let ceiling = ceiling.max(1);
  check_bounds(diff, current_ids.len(), target_ids.len())?;

  // Each slot holds the target index its entry ends up at; `None` for
  // entries about to be removed.
  let mut work: Vec<Option<usize>> = vec![None; current_ids.len()];
  let mut placed = vec![false; target_ids.len()];
  for p in &diff.kept {
    work[p.current] = Some(p.target);
    placed[p.target] = true;
  }
  for m in &diff.moves {
    work[m.from] = Some(m.to);
  }

  let mut ops = Vec::with_capacity(diff.operation_count());

  let mut removes = diff.removes.clone();
  removes.sort_unstable();
  for &index in removes.iter().rev() {
    if work[index].is_some() {
      return Err(SyncError::InconsistentDiff(format!(
        "current entry {index} is both paired and removed"
      )));
    }
    work.remove(index);
    ops.push(PlaylistOp::Remove { index, native_id: current_ids[index].clone() });
  }

  let mut adds = diff.adds.clone();
  adds.sort_unstable();
  for &t in &adds {
    let index = insertion_point(&work, &placed, t);
    work.insert(index, Some(t));
    placed[t] = true;
    let native_id = target_ids[t].clone();
    match ops.last_mut() {
      Some(PlaylistOp::Add { index: start, native_ids })
        if *start + native_ids.len() == index && native_ids.len() < ceiling =>
      {
        native_ids.push(native_id);
      }
      _ => ops.push(PlaylistOp::Add { index, native_ids: vec![native_id] }),
    }
  }

  let mut moves = diff.moves.clone();
  moves.sort_by_key(|m| m.to);
  for m in &moves {
    let from = work
      .iter()
      .position(|slot| *slot == Some(m.to))
      .ok_or_else(|| SyncError::InconsistentDiff(format!("lost track of target {}", m.to)))?;
    work.remove(from);
    let to = insertion_point(&work, &placed, m.to);
    work.insert(to, Some(m.to));
    placed[m.to] = true;
    if from != to {
      ops.push(PlaylistOp::Move { from, to, len: 1 });
    }
  }

  let reproduced = work.len() == target_ids.len()
    && work.iter().enumerate().all(|(i, slot)| *slot == Some(i));
  if !reproduced {
    return Err(SyncError::InconsistentDiff(
      "operations do not reproduce the target".into(),
    ));
  }
  Ok(ops)
}

/// Just after the nearest already-placed entry that precedes target index
/// `t`, or the front of the list when there is none.
fn insertion_point(work: &[Option<usize>], placed: &[bool], t: usize) -> usize {
  (0..t)
    .rev()
    .find(|&p| placed[p])
    .and_then(|p| work.iter().position(|slot| *slot == Some(p)))
    .map_or(0, |pos| pos + 1)
}

fn check_bounds(diff: &PlaylistDiff, current: usize, target: usize) -> Result<()> {
  let current_ok = diff.removes.iter().all(|&i| i < current)
    && diff.moves.iter().all(|m| m.from < current)
    && diff.kept.iter().all(|p| p.current < current);
  let target_ok = diff.adds.iter().all(|&i| i < target)
    && diff.moves.iter().all(|m| m.to < target)
    && diff.kept.iter().all(|p| p.target < target);
  if current_ok && target_ok {
    Ok(())
  } else {
    Err(SyncError::InconsistentDiff(format!(
      "diff indices exceed lists of {current} and {target} entries"
    )))
  }
}

/// Apply `ops` in order to a list of native ids, the way a remote service
/// would.
pub fn apply_ops(list: &mut Vec<String>, ops: &[PlaylistOp]) -> Result<()> {
  for op in ops {
    match op {
      PlaylistOp::Remove { index, native_id } => {
        if list.get(*index) != Some(native_id) {
          return Err(SyncError::InconsistentDiff(format!(
            "no {native_id} at index {index}"
          )));
        }
        list.remove(*index);
      }
      PlaylistOp::Add { index, native_ids } => {
        if *index > list.len() {
          return Err(SyncError::InconsistentDiff(format!("add past end at {index}")));
        }
        list.splice(*index..*index, native_ids.iter().cloned());
      }
      PlaylistOp::Move { from, to, len } => {
        if from + len > list.len() || to + len > list.len() {
          return Err(SyncError::InconsistentDiff(format!(
            "move {from}+{len} -> {to} out of range"
          )));
        }
        let taken: Vec<_> = list.drain(*from..from + len).collect();
        list.splice(*to..*to, taken);
      }
    }
  }
  Ok(())
}

// ─── Batching ────────────────────────────────────────────────────────────────

/// Operations sent in one write call. Never mixes kinds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OpBatch {
  pub kind: OpKind,
  pub ops:  Vec<PlaylistOp>,
}

impl OpBatch {
  pub fn item_count(&self) -> usize { self.ops.iter().map(PlaylistOp::item_count).sum() }
}

/// Group consecutive operations of one kind into batches of at most
/// `ceiling` items. Operations are never split.
pub fn batch_operations(ops: Vec<PlaylistOp>, ceiling: usize) -> Vec<OpBatch> {
  let ceiling = ceiling.max(1);
  let mut batches: Vec<OpBatch> = Vec::new();
  for op in ops {
    match batches.last_mut() {
      Some(batch)
        if batch.kind == op.kind()
          && batch.item_count() + op.item_count() <= ceiling =>
      {
        batch.ops.push(op);
      }
      _ => batches.push(OpBatch { kind: op.kind(), ops: vec![op] }),
    }
  }
  batches
}

// ─── Plan ────────────────────────────────────────────────────────────────────

/// What a sync would do, in call-count terms.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SyncEstimate {
  pub adds:       usize,
  pub removes:    usize,
  pub moves:      usize,
  /// Concrete operations after coalescing.
  pub operations: usize,
  /// External write calls.
  pub calls:      usize,
}

/// A diff sequenced and batched against one remote snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct SyncPlan {
  pub service:    ServiceName,
  pub remote_id:  String,
  /// Token of the remote state the plan was computed against.
  pub base_token: String,
  pub diff:       PlaylistDiff,
  pub batches:    Vec<OpBatch>,
}

impl SyncPlan {
  pub fn build(
    service: ServiceName,
    remote_id: String,
    base_token: String,
    diff: PlaylistDiff,
    current_ids: &[String],
    target_ids: &[String],
    ceiling: usize,
  ) -> Result<Self> {
    let ops = sequence_operations(&diff, current_ids, target_ids, ceiling)?;
    let batches = batch_operations(ops, ceiling);
    Ok(Self { service, remote_id, base_token, diff, batches })
  }

  pub fn estimate(&self) -> SyncEstimate {
    SyncEstimate {
      adds:       self.diff.adds.len(),
      removes:    self.diff.removes.len(),
      moves:      self.diff.moves.len(),
      operations: self.batches.iter().map(|b| b.ops.len()).sum(),
      calls:      self.batches.len(),
    }
  }

  pub fn is_noop(&self) -> bool { self.batches.is_empty() }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::diff::diff_ids;

  fn ids(s: &str) -> Vec<String> { s.chars().map(String::from).collect() }

  fn round_trip(current: &str, target: &str, ceiling: usize) -> Vec<PlaylistOp> {
    let (current, target) = (ids(current), ids(target));
    let diff = diff_ids(&current, &target);
    let ops = sequence_operations(&diff, &current, &target, ceiling).unwrap();
    let mut list = current.clone();
    apply_ops(&mut list, &ops).unwrap();
    assert_eq!(list, target, "ops: {ops:?}");
    ops
  }

  #[test]
  fn fixed_order_remove_add_move() {
    let ops = round_trip("ABCXD", "BADCE", 100);
    let kinds: Vec<_> = ops.iter().map(PlaylistOp::kind).collect();
    let first_add = kinds.iter().position(|k| *k == OpKind::Add).unwrap();
    let first_move = kinds.iter().position(|k| *k == OpKind::Move).unwrap();
    assert_eq!(kinds[0], OpKind::Remove);
    assert!(first_add < first_move);
    assert!(kinds[first_move..].iter().all(|k| *k == OpKind::Move));
  }

  #[test]
  fn removes_run_from_the_highest_index() {
    let ops = round_trip("AXBYC", "ABC", 100);
    assert_eq!(ops, [
      PlaylistOp::Remove { index: 3, native_id: "Y".into() },
      PlaylistOp::Remove { index: 1, native_id: "X".into() },
    ]);
  }

  #[test]
  fn adds_land_at_their_target_index() {
    let ops = round_trip("AC", "ABCD", 100);
    assert_eq!(ops, [
      PlaylistOp::Add { index: 1, native_ids: vec!["B".into()] },
      PlaylistOp::Add { index: 3, native_ids: vec!["D".into()] },
    ]);
  }

  #[test]
  fn consecutive_adds_coalesce_up_to_the_ceiling() {
    let ops = round_trip("A", "ABCDE", 100);
    assert_eq!(ops, [PlaylistOp::Add {
      index:      1,
      native_ids: ids("BCDE"),
    }]);

    let ops = round_trip("A", "ABCDE", 3);
    assert_eq!(ops, [
      PlaylistOp::Add { index: 1, native_ids: ids("BCD") },
      PlaylistOp::Add { index: 4, native_ids: ids("E") },
    ]);
  }

  #[test]
  fn every_permutation_round_trips() {
    let base = "ABCDE";
    let mut seen = 0;
    let chars: Vec<char> = base.chars().collect();
    for a in 0..chars.len() {
      for b in 0..chars.len() {
        for c in 0..chars.len() {
          let mut current = chars.clone();
          current.swap(a, b);
          current.rotate_left(c);
          let current: String = current.into_iter().collect();
          round_trip(&current, "ABCDE", 100);
          round_trip(&current, "BXDAY", 2);
          round_trip("ABCDE", &current, 100);
          seen += 1;
        }
      }
    }
    assert_eq!(seen, 125);
  }

  #[test]
  fn identical_lists_produce_no_operations() {
    assert!(round_trip("ABCDE", "ABCDE", 100).is_empty());
    assert!(round_trip("", "", 100).is_empty());
  }

  #[test]
  fn batches_respect_kind_and_ceiling() {
    let ops = round_trip("ABCDEFGH", "HGFXYZ", 2);
    let batches = batch_operations(ops, 2);
    assert!(batches.iter().all(|b| b.item_count() <= 2));
    assert!(batches.iter().all(|b| b.ops.iter().all(|op| op.kind() == b.kind)));
  }

  #[test]
  fn estimate_counts_calls() {
    let (current, target) = (ids("ABCD"), ids("BADCE"));
    let diff = diff_ids(&current, &target);
    let plan = SyncPlan::build(
      ServiceName::catalog(),
      "pl".into(),
      "v1".into(),
      diff,
      &current,
      &target,
      100,
    )
    .unwrap();
    let estimate = plan.estimate();
    assert_eq!((estimate.adds, estimate.removes, estimate.moves), (1, 0, 2));
    assert_eq!(estimate.calls, 2);
    assert!(!plan.is_noop());
  }

  #[test]
  fn a_diff_for_other_lists_is_rejected() {
    let diff = diff_ids(&ids("ABC"), &ids("CBA"));
    let err = sequence_operations(&diff, &ids("AB"), &ids("BA"), 100).unwrap_err();
    assert!(matches!(err, SyncError::InconsistentDiff(_)));
  }
}
