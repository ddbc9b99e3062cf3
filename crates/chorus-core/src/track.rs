//! Track types: canonical tracks and per-service observations.
//!
//! A canonical [`Track`] is the locally-owned representation of a recording.
//! A [`ConnectorTrack`] is what one external service reported about a
//! recording. The two are linked by [`TrackMapping`](crate::mapping::TrackMapping)
//! edges, never by embedded references.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString, IntoStaticStr};

use crate::ids::{ConnectorTrackId, ServiceName, TrackId};

// ─── Direct identifiers ──────────────────────────────────────────────────────

/// A globally meaningful code that allows deterministic matching.
#[derive(
  Debug,
  Clone,
  Copy,
  PartialEq,
  Eq,
  Hash,
  PartialOrd,
  Ord,
  Display,
  EnumString,
  IntoStaticStr,
  Serialize,
  Deserialize,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum IdentifierKind {
  /// The primary catalog service's own track id.
  CatalogId,
  Isrc,
  /// The metadata registry's recording id.
  RegistryId,
}

impl IdentifierKind {
  /// Strongest first. Matching walks identifiers in this order.
  pub const TIER_ORDER: [IdentifierKind; 3] =
    [Self::CatalogId, Self::Isrc, Self::RegistryId];

  /// Confidence assigned when two records share this identifier.
  pub fn tier_score(self) -> u8 {
    match self {
      Self::CatalogId => 100,
      Self::Isrc => 95,
      Self::RegistryId => 85,
    }
  }

  /// Canonical form of a raw identifier, or `None` if nothing is left.
  ///
  /// ISRCs are upper-cased with separators removed, registry ids are
  /// lower-cased, catalog ids are only trimmed (they are case-sensitive).
  pub fn normalize(self, raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    let value = match self {
      Self::CatalogId => trimmed.to_owned(),
      Self::Isrc => trimmed
        .chars()
        .filter(|c| !c.is_whitespace() && *c != '-')
        .flat_map(char::to_uppercase)
        .collect(),
      Self::RegistryId => trimmed.to_lowercase(),
    };
    (!value.is_empty()).then_some(value)
  }
}

/// One normalised identifier value.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DirectIdentifier {
  pub kind:  IdentifierKind,
  pub value: String,
}

impl DirectIdentifier {
  /// Normalise `raw`; `None` if it is blank.
  pub fn new(kind: IdentifierKind, raw: &str) -> Option<Self> {
    kind.normalize(raw).map(|value| Self { kind, value })
  }
}

/// The optional direct identifiers known for a record.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectIds {
  pub catalog_id:  Option<String>,
  pub isrc:        Option<String>,
  pub registry_id: Option<String>,
}

impl DirectIds {
  pub fn get(&self, kind: IdentifierKind) -> Option<&str> {
    match kind {
      IdentifierKind::CatalogId => self.catalog_id.as_deref(),
      IdentifierKind::Isrc => self.isrc.as_deref(),
      IdentifierKind::RegistryId => self.registry_id.as_deref(),
    }
  }

  /// Store `ident`, replacing any previous value of the same kind.
  pub fn set(&mut self, ident: DirectIdentifier) {
    let slot = match ident.kind {
      IdentifierKind::CatalogId => &mut self.catalog_id,
      IdentifierKind::Isrc => &mut self.isrc,
      IdentifierKind::RegistryId => &mut self.registry_id,
    };
    *slot = Some(ident.value);
  }

  /// Builder-style [`DirectIds::set`] from a raw value.
  pub fn with(mut self, kind: IdentifierKind, raw: &str) -> Self {
    if let Some(ident) = DirectIdentifier::new(kind, raw) {
      self.set(ident);
    }
    self
  }

  /// All present identifiers, normalised, in tier order.
  pub fn iter(&self) -> impl Iterator<Item = DirectIdentifier> + '_ {
    IdentifierKind::TIER_ORDER
      .into_iter()
      .filter_map(|kind| DirectIdentifier::new(kind, self.get(kind)?))
  }

  pub fn is_empty(&self) -> bool { self.iter().next().is_none() }

  /// Whether the value stored for `ident.kind` normalises to `ident.value`.
  pub fn contains(&self, ident: &DirectIdentifier) -> bool {
    self
      .get(ident.kind)
      .and_then(|v| ident.kind.normalize(v))
      .is_some_and(|v| v == ident.value)
  }

  /// The strongest identifier kind both sides carry with an equal value.
  pub fn shared_with(&self, other: &DirectIds) -> Option<IdentifierKind> {
    IdentifierKind::TIER_ORDER.into_iter().find(|&kind| {
      match (self.get(kind), other.get(kind)) {
        (Some(a), Some(b)) => {
          let (a, b) = (kind.normalize(a), kind.normalize(b));
          a.is_some() && a == b
        }
        _ => false,
      }
    })
  }

  /// Fill identifiers missing here from `other`. Present values never change.
  pub fn fill_missing(&mut self, other: &DirectIds) {
    for ident in other.iter() {
      if self.get(ident.kind).is_none() {
        self.set(ident);
      }
    }
  }
}

// ─── TrackLike ───────────────────────────────────────────────────────────────

/// The normalised common subset every track-shaped record exposes.
/// Confidence scoring and playlist diffing operate on this view only.
pub trait TrackLike {
  fn title(&self) -> &str;
  fn artists(&self) -> &[String];
  fn duration_ms(&self) -> Option<u32>;
  fn identifiers(&self) -> &DirectIds;
}

macro_rules! impl_track_like {
  ($($ty:ty),* $(,)?) => {
    $(
      impl TrackLike for $ty {
        fn title(&self) -> &str { &self.title }
        fn artists(&self) -> &[String] { &self.artists }
        fn duration_ms(&self) -> Option<u32> { self.duration_ms }
        fn identifiers(&self) -> &DirectIds { &self.identifiers }
      }
    )*
  };
}

impl_track_like!(Track, NewTrack, ObservedTrack, ConnectorTrack);

// ─── Canonical track ─────────────────────────────────────────────────────────

/// The locally-owned representation of a recording.
///
/// Created on first observation and only ever soft-deleted. The title,
/// artists and any identifier once set are identity fields and never change;
/// album, duration and release date may be refreshed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Track {
  pub id:           TrackId,
  pub title:        String,
  pub artists:      Vec<String>,
  pub album:        Option<String>,
  pub duration_ms:  Option<u32>,
  pub release_date: Option<NaiveDate>,
  pub identifiers:  DirectIds,
  pub created_at:   DateTime<Utc>,
  pub updated_at:   DateTime<Utc>,
  pub deleted_at:   Option<DateTime<Utc>>,
}

impl Track {
  pub fn is_deleted(&self) -> bool { self.deleted_at.is_some() }
}

/// Input to [`Repository::insert_track`](crate::store::Repository::insert_track).
#[derive(Debug, Clone, PartialEq)]
pub struct NewTrack {
  pub title:        String,
  pub artists:      Vec<String>,
  pub album:        Option<String>,
  pub duration_ms:  Option<u32>,
  pub release_date: Option<NaiveDate>,
  pub identifiers:  DirectIds,
}

impl NewTrack {
  /// Seed a canonical track from the first observation of a recording.
  pub fn from_observation(obs: &ObservedTrack) -> Self {
    Self {
      title:        obs.title.clone(),
      artists:      obs.artists.clone(),
      album:        obs.album.clone(),
      duration_ms:  obs.duration_ms,
      release_date: obs.release_date,
      identifiers:  obs.identifiers.clone(),
    }
  }
}

/// The refreshable subset of a [`Track`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TrackMetadata {
  pub album:        Option<String>,
  pub duration_ms:  Option<u32>,
  pub release_date: Option<NaiveDate>,
  /// Merged with [`DirectIds::fill_missing`]; never overwrites.
  pub identifiers:  DirectIds,
}

/// Parameters for [`Repository::search_tracks`](crate::store::Repository::search_tracks).
#[derive(Debug, Clone, Default)]
pub struct TrackQuery {
  /// Case-insensitive substring over the title.
  pub title:  Option<String>,
  /// Case-insensitive substring over any artist name.
  pub artist: Option<String>,
  pub limit:  Option<usize>,
}

// ─── Connector observations ──────────────────────────────────────────────────

/// A track exactly as one service reported it, normalised to the common
/// subset. `raw` keeps the untouched payload; only provider adapters read it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObservedTrack {
  pub service:      ServiceName,
  pub native_id:    String,
  pub title:        String,
  pub artists:      Vec<String>,
  pub album:        Option<String>,
  pub duration_ms:  Option<u32>,
  pub release_date: Option<NaiveDate>,
  pub identifiers:  DirectIds,
  pub raw:          serde_json::Value,
  pub observed_at:  DateTime<Utc>,
}

/// A persisted observation. Unique per `(service, native_id)`; may exist
/// without any mapping to a canonical track.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectorTrack {
  pub id:           ConnectorTrackId,
  pub service:      ServiceName,
  pub native_id:    String,
  pub title:        String,
  pub artists:      Vec<String>,
  pub album:        Option<String>,
  pub duration_ms:  Option<u32>,
  pub release_date: Option<NaiveDate>,
  pub identifiers:  DirectIds,
  pub raw:          serde_json::Value,
  pub refreshed_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn isrc_normalisation_ignores_formatting() {
    assert_eq!(
      IdentifierKind::Isrc.normalize(" us-abc-12-34567 ").as_deref(),
      Some("USABC1234567")
    );
    assert_eq!(IdentifierKind::Isrc.normalize("  "), None);
  }

  #[test]
  fn shared_identifier_prefers_strongest_tier() {
    let a = DirectIds::default()
      .with(IdentifierKind::Isrc, "USABC1234567")
      .with(IdentifierKind::RegistryId, "ABC");
    let b = DirectIds::default()
      .with(IdentifierKind::Isrc, "usabc1234567")
      .with(IdentifierKind::RegistryId, "abc");
    assert_eq!(a.shared_with(&b), Some(IdentifierKind::Isrc));
  }

  #[test]
  fn differing_values_are_not_shared() {
    let a = DirectIds::default().with(IdentifierKind::CatalogId, "x1");
    let b = DirectIds::default().with(IdentifierKind::CatalogId, "X1");
    assert_eq!(a.shared_with(&b), None);
  }

  #[test]
  fn fill_missing_never_overwrites() {
    let mut a = DirectIds::default().with(IdentifierKind::Isrc, "AAA");
    let b = DirectIds::default()
      .with(IdentifierKind::Isrc, "BBB")
      .with(IdentifierKind::RegistryId, "r-1");
    a.fill_missing(&b);
    assert_eq!(a.isrc.as_deref(), Some("AAA"));
    assert_eq!(a.registry_id.as_deref(), Some("r-1"));
  }
}
