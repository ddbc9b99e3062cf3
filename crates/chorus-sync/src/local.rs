//! Reordering a local playlist through ordering-key edits.
//!
//! Entries the diff keeps in place keep their keys. Every added or moved
//! entry gets a fresh key between the kept neighbours around its target
//! position, so no other row is touched. Removal is a soft delete.

use chorus_core::{
  ids::TrackId,
  ordering,
  playlist::{PlaylistEdit, PlaylistTrack},
};

use crate::{diff::diff_ids, error::Result};

/// Edits that turn `entries` into `target`.
///
/// `entries` are the playlist's live rows in ordering-key order.
pub fn reconcile_local_playlist(
  entries: &[PlaylistTrack],
  target: &[TrackId],
) -> Result<Vec<PlaylistEdit>> {
  let current: Vec<TrackId> = entries.iter().map(|e| e.track_id).collect();
  let diff = diff_ids(&current, target);

  // What fills each target slot: a kept row, a moved row, or a new track.
  let mut kept_key: Vec<Option<&str>> = vec![None; target.len()];
  let mut moved_from: Vec<Option<usize>> = vec![None; target.len()];
  for p in &diff.kept {
    kept_key[p.target] = Some(entries[p.current].ordering_key.as_str());
  }
  for m in &diff.moves {
    moved_from[m.to] = Some(m.from);
  }

  let mut edits: Vec<PlaylistEdit> = diff
    .removes
    .iter()
    .map(|&c| PlaylistEdit::Remove { entry: entries[c].id })
    .collect();

  let mut t = 0;
  while t < target.len() {
    if kept_key[t].is_some() {
      t += 1;
      continue;
    }
    // A run of slots needing keys, bounded by kept neighbours.
    let start = t;
    while t < target.len() && kept_key[t].is_none() {
      t += 1;
    }
    let before = start.checked_sub(1).and_then(|i| kept_key[i]);
    let after = kept_key.get(t).copied().flatten();
    let keys = ordering::keys_between(before, after, t - start)?;
    for (slot, ordering_key) in (start..t).zip(keys) {
      edits.push(match moved_from[slot] {
        Some(c) => PlaylistEdit::Reorder { entry: entries[c].id, ordering_key },
        None => PlaylistEdit::Insert { track_id: target[slot], ordering_key },
      });
    }
  }

  Ok(edits)
}
