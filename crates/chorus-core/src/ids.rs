//! Identifier newtypes.
//!
//! Every persisted entity is keyed by a store-assigned integer that is never
//! reused. Edges between entities (mappings, merge pointers, playlist
//! membership) hold these ids rather than embedded references.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

macro_rules! int_id {
  ($(#[$meta:meta])* $name:ident) => {
    $(#[$meta])*
    #[derive(
      Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize,
      Deserialize,
    )]
    #[serde(transparent)]
    pub struct $name(pub i64);

    impl $name {
      pub fn get(self) -> i64 { self.0 }
    }

    impl fmt::Display for $name {
      fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
      }
    }
  };
}

int_id!(
  /// A canonical, locally-owned track.
  TrackId
);
int_id!(
  /// A service-specific observation of a track.
  ConnectorTrackId
);
int_id!(MappingId);
int_id!(PlayEventId);
int_id!(PlaylistId);
int_id!(
  /// One membership row of a playlist (the same track may appear twice).
  PlaylistTrackId
);

// ─── Import batches ──────────────────────────────────────────────────────────

/// Tags every play event written by one import page.
#[derive(
  Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize,
  Deserialize,
)]
#[serde(transparent)]
pub struct BatchId(pub Uuid);

impl BatchId {
  pub fn new() -> Self { Self(Uuid::new_v4()) }
}

impl Default for BatchId {
  fn default() -> Self { Self::new() }
}

impl fmt::Display for BatchId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}", self.0.hyphenated())
  }
}

// ─── Services ────────────────────────────────────────────────────────────────

/// The name of an external service.
///
/// Open-ended: a new service only needs a provider adapter registered under
/// its name. Names are trimmed and lower-cased on construction.
#[derive(
  Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(from = "String", into = "String")]
pub struct ServiceName(String);

impl ServiceName {
  /// The primary catalog service playlists are synced to.
  pub const CATALOG: &'static str = "catalog";
  /// The play-history / social service.
  pub const HISTORY: &'static str = "history";
  /// The canonical metadata registry.
  pub const REGISTRY: &'static str = "registry";

  pub fn new(name: impl AsRef<str>) -> Self {
    Self(name.as_ref().trim().to_lowercase())
  }

  pub fn catalog() -> Self { Self::new(Self::CATALOG) }

  pub fn history() -> Self { Self::new(Self::HISTORY) }

  pub fn registry() -> Self { Self::new(Self::REGISTRY) }

  pub fn as_str(&self) -> &str { &self.0 }
}

impl From<String> for ServiceName {
  fn from(s: String) -> Self { Self::new(s) }
}

impl From<&str> for ServiceName {
  fn from(s: &str) -> Self { Self::new(s) }
}

impl From<ServiceName> for String {
  fn from(s: ServiceName) -> Self { s.0 }
}

impl fmt::Display for ServiceName {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.0)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn service_names_are_normalised() {
    assert_eq!(ServiceName::new("  Catalog "), ServiceName::catalog());
    let parsed: ServiceName = serde_json::from_str("\"REGISTRY\"").unwrap();
    assert_eq!(parsed.as_str(), "registry");
  }
}
