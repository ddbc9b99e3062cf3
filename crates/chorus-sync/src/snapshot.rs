//! Snapshot tokens for remote playlists.
//!
//! Services that expose a version of their own keep it. For the rest, the
//! token is a SHA-256 hash over the playlist's native ids in remote order,
//! so any addition, removal or reordering changes it. Such a service cannot
//! check a computed token itself;
//! [`AdapterWriter`](crate::writer::AdapterWriter) does that before writing.

use chorus_core::provider::RemoteSnapshot;
use sha2::{Digest, Sha256};

/// Compute an order-sensitive token over `native_ids`.
///
/// Each id is length-prefixed, so `["ab", "c"]` and `["a", "bc"]` differ.
pub fn compute_token<'a>(native_ids: impl IntoIterator<Item = &'a str>) -> String {
  let mut hasher = Sha256::new();
  for id in native_ids {
    hasher.update((id.len() as u64).to_le_bytes());
    hasher.update(id.as_bytes());
  }
  hex::encode(hasher.finalize())
}

/// The snapshot's own version, or a token computed from its content.
pub fn snapshot_token(snapshot: &RemoteSnapshot) -> String {
  match &snapshot.version {
    Some(version) => version.clone(),
    None => compute_token(snapshot.tracks.iter().map(|t| t.native_id.as_str())),
  }
}
