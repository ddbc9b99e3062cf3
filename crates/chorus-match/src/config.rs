//! Matching and deduplication thresholds.
//!
//! Passed explicitly into every engine, so differing policies can coexist
//! in one process.

use chorus_core::{ids::ServiceName, mapping::Confidence, track::IdentifierKind};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Thresholds for confidence scoring and identity resolution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MatchConfig {
  /// Mappings at or above this are usable downstream.
  pub trust_threshold:          Confidence,
  /// Fuzzy matches at or above this are stored, but stay untrusted below
  /// `trust_threshold`.
  pub acceptance_floor:         Confidence,
  /// Duration differences up to this are free.
  pub duration_tolerance_ms:    u32,
  /// Points deducted per full second beyond the tolerance.
  pub duration_penalty_per_sec: u32,
  pub max_duration_penalty:     u32,
  /// Deducted when the version markers of the two titles differ.
  pub version_penalty:          u32,
  /// Ceiling for metadata-only matches; must stay below every identifier
  /// tier score.
  pub fuzzy_cap:                u32,
  /// Weight of title similarity against artist overlap, in `0.0..=1.0`.
  pub title_weight:             f64,
  /// Artist names at or above this Jaro-Winkler similarity count as equal.
  pub artist_similarity:        f64,
  /// Local candidates considered per fuzzy lookup.
  pub candidate_limit:          usize,
}

impl Default for MatchConfig {
  fn default() -> Self {
    Self {
      trust_threshold:          Confidence::saturating(60),
      acceptance_floor:         Confidence::saturating(40),
      duration_tolerance_ms:    3_000,
      duration_penalty_per_sec: 1,
      max_duration_penalty:     30,
      version_penalty:          30,
      fuzzy_cap:                75,
      title_weight:             0.6,
      artist_similarity:        0.9,
      candidate_limit:          25,
    }
  }
}

impl MatchConfig {
  /// Reject thresholds that would let a metadata match outrank an
  /// identifier match or accept what it never trusts.
  pub fn validate(&self) -> Result<()> {
    let weakest_tier = IdentifierKind::TIER_ORDER
      .iter()
      .map(|kind| u32::from(kind.tier_score()))
      .min()
      .unwrap_or(100);
    if self.fuzzy_cap >= weakest_tier {
      return Err(invalid(format!(
        "fuzzy_cap {} must be below the weakest identifier score {weakest_tier}",
        self.fuzzy_cap
      )));
    }
    if self.acceptance_floor > self.trust_threshold {
      return Err(invalid(format!(
        "acceptance_floor {} is above trust_threshold {}",
        self.acceptance_floor.value(),
        self.trust_threshold.value()
      )));
    }
    for (name, value) in
      [("title_weight", self.title_weight), ("artist_similarity", self.artist_similarity)]
    {
      if !(0.0..=1.0).contains(&value) {
        return Err(invalid(format!("{name} {value} is outside 0.0..=1.0")));
      }
    }
    if self.candidate_limit == 0 {
      return Err(invalid("candidate_limit must be at least 1".to_owned()));
    }
    Ok(())
  }
}

fn invalid(message: String) -> Error { Error::InvalidConfig(message) }

/// Cross-service play deduplication policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DedupConfig {
  /// Events for the same track from different services within this many
  /// seconds of each other are one physical play.
  pub window_secs:      u32,
  /// Services in keep-preference order; unlisted services rank last.
  pub service_priority: Vec<ServiceName>,
}

impl Default for DedupConfig {
  fn default() -> Self {
    Self {
      window_secs:      300,
      service_priority: vec![
        ServiceName::catalog(),
        ServiceName::history(),
        ServiceName::registry(),
      ],
    }
  }
}

impl DedupConfig {
  pub fn validate(&self) -> Result<()> {
    if self.window_secs == 0 {
      return Err(invalid("dedup window_secs must be at least 1".to_owned()));
    }
    Ok(())
  }

  /// Position of `service` in the priority list; lower keeps first.
  pub fn rank(&self, service: &ServiceName) -> usize {
    self
      .service_priority
      .iter()
      .position(|s| s == service)
      .unwrap_or(self.service_priority.len())
  }
}
