//! Confidence scoring primitives.
//!
//! Pure functions over any two [`TrackLike`] records. Scoring is tiered and
//! the first satisfied tier wins; tiers never add up:
//!
//! 1. A shared direct identifier scores its fixed tier score.
//! 2. A missing title or artist on either side scores 0.
//! 3. Otherwise title similarity and artist overlap are blended up to the
//!    fuzzy cap, minus duration and version-marker penalties.

use std::{cmp::Ordering, collections::BTreeSet};

use chorus_core::{
  mapping::{Confidence, MatchMethod},
  track::{IdentifierKind, TrackLike},
};
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::config::MatchConfig;

/// Title annotations that denote a different recording of the same song.
pub const VERSION_MARKERS: &[&str] = &[
  "live",
  "remix",
  "acoustic",
  "demo",
  "instrumental",
  "karaoke",
  "cover",
  "edit",
  "extended",
  "unplugged",
];

const ARTIST_SEPARATORS: &[&str] =
  &[" featuring ", " feat. ", " feat ", " ft. ", " with ", " & ", ", ", "; "];

// ─── Result types ────────────────────────────────────────────────────────────

/// Why a pair scored what it did.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Evidence {
  /// Set when the score came from a shared identifier.
  pub identifier:        Option<IdentifierKind>,
  pub title_similarity:  Option<f64>,
  pub artist_overlap:    Option<f64>,
  pub duration_delta_ms: Option<u32>,
  pub duration_penalty:  u32,
  pub version_penalty:   u32,
  pub missing_title:     bool,
  pub missing_artist:    bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MatchScore {
  pub confidence: Confidence,
  pub evidence:   Evidence,
}

impl MatchScore {
  /// The method a mapping built on this score records.
  pub fn method(&self) -> MatchMethod {
    match self.evidence.identifier {
      Some(_) => MatchMethod::DeterministicIdChain,
      None => MatchMethod::FuzzyMetadata,
    }
  }

  /// A tier-1 score for a hit on `kind`.
  pub fn identifier(kind: IdentifierKind) -> Self {
    Self {
      confidence: Confidence::saturating(kind.tier_score().into()),
      evidence:   Evidence { identifier: Some(kind), ..Evidence::default() },
    }
  }
}

// ─── Scoring ─────────────────────────────────────────────────────────────────

/// Score how likely `a` and `b` are the same recording.
pub fn score(a: &impl TrackLike, b: &impl TrackLike, cfg: &MatchConfig) -> MatchScore {
  if let Some(kind) = a.identifiers().shared_with(b.identifiers()) {
    return MatchScore::identifier(kind);
  }

  let missing_title = a.title().trim().is_empty() || b.title().trim().is_empty();
  let (artists_a, artists_b) = (split_artists(a.artists()), split_artists(b.artists()));
  let missing_artist = artists_a.is_empty() || artists_b.is_empty();
  if missing_title || missing_artist {
    return MatchScore {
      confidence: Confidence::ZERO,
      evidence:   Evidence { missing_title, missing_artist, ..Evidence::default() },
    };
  }

  let (title_a, title_b) = (TitleParts::parse(a.title()), TitleParts::parse(b.title()));
  let title_similarity = strsim::normalized_levenshtein(&title_a.core, &title_b.core);
  let artist_overlap = set_overlap(&artists_a, &artists_b, cfg.artist_similarity);

  let weight = cfg.title_weight.clamp(0.0, 1.0);
  let blended = weight * title_similarity + (1.0 - weight) * artist_overlap;
  let base = (blended * f64::from(cfg.fuzzy_cap)).round() as i64;

  let duration_delta_ms = match (a.duration_ms(), b.duration_ms()) {
    (Some(x), Some(y)) => Some(x.abs_diff(y)),
    _ => None,
  };
  let duration_penalty = duration_delta_ms
    .filter(|&d| d > cfg.duration_tolerance_ms)
    .map_or(0, |d| {
      let over_secs = (d - cfg.duration_tolerance_ms) / 1000;
      over_secs
        .saturating_mul(cfg.duration_penalty_per_sec)
        .min(cfg.max_duration_penalty)
    });
  let version_penalty = if title_a.markers == title_b.markers {
    0
  } else {
    cfg.version_penalty
  };

  let value = base.min(cfg.fuzzy_cap.into())
    - i64::from(duration_penalty)
    - i64::from(version_penalty);
  MatchScore {
    confidence: Confidence::saturating(value),
    evidence:   Evidence {
      identifier: None,
      title_similarity: Some(title_similarity),
      artist_overlap: Some(artist_overlap),
      duration_delta_ms,
      duration_penalty,
      version_penalty,
      missing_title,
      missing_artist,
    },
  }
}

// ─── Normalisation ───────────────────────────────────────────────────────────

/// A title split into its comparable core and its version markers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TitleParts {
  pub core:    String,
  pub markers: BTreeSet<&'static str>,
}

impl TitleParts {
  /// Markers are only recognised in annotations: bracketed segments and a
  /// trailing ` - ` suffix. "Live Forever" carries no marker.
  pub fn parse(title: &str) -> Self {
    let lower = title.to_lowercase();
    let mut main = String::new();
    let mut notes = String::new();
    let mut depth = 0usize;
    for c in lower.chars() {
      match c {
        '(' | '[' | '{' => {
          depth += 1;
          notes.push(' ');
        }
        ')' | ']' | '}' => depth = depth.saturating_sub(1),
        _ if depth > 0 => notes.push(c),
        _ => main.push(c),
      }
    }
    if let Some((head, tail)) = main.split_once(" - ") {
      notes.push(' ');
      notes.push_str(tail);
      main = head.to_owned();
    }

    let markers = words(&notes)
      .filter_map(|w| VERSION_MARKERS.iter().copied().find(|m| *m == w))
      .collect();
    let mut core = words(&main).collect::<Vec<_>>().join(" ");
    if core.is_empty() {
      core = words(&lower).collect::<Vec<_>>().join(" ");
    }
    Self { core, markers }
  }
}

/// Lower-cased alphanumeric words.
fn words(s: &str) -> impl Iterator<Item = &str> {
  s.split(|c: char| !c.is_alphanumeric()).filter(|w| !w.is_empty())
}

fn normalize_artist(name: &str) -> String {
  let joined = words(name).collect::<Vec<_>>().join(" ");
  if let Some(rest) = joined.strip_prefix("the ") {
    return rest.to_owned();
  }
  joined
}

/// Individual, normalised artist names; credits like "A feat. B" split.
pub fn split_artists(artists: &[String]) -> Vec<String> {
  let mut out: Vec<String> = Vec::new();
  for credit in artists {
    let mut parts = vec![credit.to_lowercase()];
    for sep in ARTIST_SEPARATORS {
      parts = parts
        .iter()
        .flat_map(|p| p.split(sep).map(str::to_owned).collect::<Vec<_>>())
        .collect();
    }
    for part in parts {
      let name = normalize_artist(&part);
      if !name.is_empty() && !out.contains(&name) {
        out.push(name);
      }
    }
  }
  out
}

/// Jaccard overlap where two names count as the same element when their
/// Jaro-Winkler similarity reaches `threshold`. Each name matches once.
fn set_overlap(a: &[String], b: &[String], threshold: f64) -> f64 {
  if a.is_empty() || b.is_empty() {
    return 0.0;
  }
  let mut used = vec![false; b.len()];
  let mut matched = 0usize;
  for x in a {
    let hit = b
      .iter()
      .position(|y| y == x)
      .filter(|&j| !used[j])
      .or_else(|| {
        (0..b.len())
          .find(|&j| !used[j] && strsim::jaro_winkler(x, &b[j]) >= threshold)
      });
    if let Some(j) = hit {
      used[j] = true;
      matched += 1;
    }
  }
  matched as f64 / (a.len() + b.len() - matched) as f64
}

// ─── Tie-breaking ────────────────────────────────────────────────────────────

/// Ranking data for one candidate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ranked<K> {
  pub confidence:  Confidence,
  /// When an existing mapping to this candidate was last verified.
  pub verified_at: Option<DateTime<Utc>>,
  /// Final, deterministic tie-breaker; lower wins.
  pub key:         K,
}

impl<K: Ord> Ranked<K> {
  /// `Less` when `self` is preferred: highest confidence, then most recently
  /// verified (unverified last), then lowest key.
  pub fn preference(&self, other: &Self) -> Ordering {
    other
      .confidence
      .cmp(&self.confidence)
      .then_with(|| match (self.verified_at, other.verified_at) {
        (Some(a), Some(b)) => b.cmp(&a),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
      })
      .then_with(|| self.key.cmp(&other.key))
  }
}

/// The preferred candidate, if any.
pub fn pick_best<K: Ord, T>(
  candidates: impl IntoIterator<Item = (Ranked<K>, T)>,
) -> Option<(Ranked<K>, T)> {
  candidates.into_iter().min_by(|a, b| a.0.preference(&b.0))
}

#[cfg(test)]
mod tests {
  use chorus_core::track::{DirectIds, NewTrack};
  use chrono::TimeZone;

  use super::*;

  fn track(title: &str, artists: &[&str], duration_ms: Option<u32>) -> NewTrack {
    NewTrack {
      title: title.into(),
      artists: artists.iter().map(|a| a.to_string()).collect(),
      album: None,
      duration_ms,
      release_date: None,
      identifiers: DirectIds::default(),
    }
  }

  fn cfg() -> MatchConfig { MatchConfig::default() }

  #[test]
  fn shared_isrc_scores_its_tier_despite_formatting() {
    let mut a = track("Song Title", &["Artist"], Some(200_000));
    let mut b = track("SONG TITLE", &["ARTIST"], Some(260_000));
    a.identifiers = DirectIds::default().with(IdentifierKind::Isrc, "USABC1234567");
    b.identifiers = DirectIds::default().with(IdentifierKind::Isrc, "us-abc-12-34567");
    let s = score(&a, &b, &cfg());
    assert!(s.confidence.value() >= 95);
    assert_eq!(s.confidence.value(), 95);
    assert_eq!(s.method(), MatchMethod::DeterministicIdChain);
    assert_eq!(s.evidence.identifier, Some(IdentifierKind::Isrc));
  }

  #[test]
  fn identifier_tier_ignores_other_fields() {
    let mut a = track("Completely", &["One"], None);
    let mut b = track("Different (Live)", &[], None);
    a.identifiers = DirectIds::default().with(IdentifierKind::CatalogId, "c1");
    b.identifiers = DirectIds::default().with(IdentifierKind::CatalogId, "c1");
    assert_eq!(score(&a, &b, &cfg()).confidence, Confidence::MAX);

    a.identifiers = DirectIds::default().with(IdentifierKind::RegistryId, "R-9");
    b.identifiers = DirectIds::default().with(IdentifierKind::RegistryId, "r-9");
    assert_eq!(score(&a, &b, &cfg()).confidence.value(), 85);
  }

  #[test]
  fn identical_metadata_is_capped() {
    let a = track("Song Title", &["Artist"], Some(200_000));
    let b = track("song title!", &["The Artist"], Some(201_000));
    let s = score(&a, &b, &cfg());
    assert_eq!(s.confidence.value(), 75);
    assert_eq!(s.method(), MatchMethod::FuzzyMetadata);
  }

  #[test]
  fn missing_data_scores_zero() {
    let a = track("Song", &[], None);
    let b = track("Song", &["Artist"], None);
    let s = score(&a, &b, &cfg());
    assert_eq!(s.confidence, Confidence::ZERO);
    assert!(s.evidence.missing_artist);
    assert!(!s.evidence.missing_title);

    let s = score(&track("  ", &["A"], None), &track("x", &["A"], None), &cfg());
    assert!(s.evidence.missing_title);
  }

  #[test]
  fn duration_mismatch_beyond_tolerance_is_penalised() {
    let a = track("Song", &["Artist"], Some(200_000));
    let b = track("Song", &["Artist"], Some(210_000));
    let s = score(&a, &b, &cfg());
    assert_eq!(s.evidence.duration_penalty, 7);
    assert_eq!(s.confidence.value(), 68);

    let far = track("Song", &["Artist"], Some(400_000));
    assert_eq!(score(&a, &far, &cfg()).evidence.duration_penalty, 30);
  }

  #[test]
  fn version_markers_must_agree() {
    let studio = track("Song", &["Artist"], None);
    let live = track("Song (Live)", &["Artist"], None);
    let live_too = track("Song - Live at Wembley", &["Artist"], None);
    assert_eq!(score(&studio, &live, &cfg()).confidence.value(), 45);
    assert_eq!(score(&live, &live_too, &cfg()).confidence.value(), 75);
  }

  #[test]
  fn markers_only_count_in_annotations() {
    let parts = TitleParts::parse("Live Forever (2014 Remaster)");
    assert_eq!(parts.core, "live forever");
    assert!(parts.markers.is_empty());
    let parts = TitleParts::parse("Track [Radio Edit]");
    assert_eq!(parts.markers.into_iter().collect::<Vec<_>>(), ["edit"]);
  }

  #[test]
  fn featured_credits_split() {
    assert_eq!(split_artists(&["A feat. B".into()]), ["a", "b"]);
    let a = track("Song", &["A feat. B"], None);
    let b = track("Song", &["A", "B"], None);
    assert_eq!(score(&a, &b, &cfg()).evidence.artist_overlap, Some(1.0));
  }

  #[test]
  fn fuzzy_scores_never_exceed_cap() {
    let titles = ["Song", "Song Title", "Other", "Song (Remix)", ""];
    let artists: [&[&str]; 3] = [&["A"], &["A", "B"], &["Z"]];
    for ta in titles {
      for tb in titles {
        for aa in artists {
          for ab in artists {
            let s = score(&track(ta, aa, None), &track(tb, ab, None), &cfg());
            assert!(s.confidence.value() <= 75, "{ta} / {tb}");
          }
        }
      }
    }
  }

  #[test]
  fn tie_break_prefers_recent_verification_then_key() {
    let t = |h| Some(Utc.with_ymd_and_hms(2024, 1, 1, h, 0, 0).unwrap());
    let c = Confidence::saturating(80);
    let candidates = vec![
      (Ranked { confidence: c, verified_at: None, key: 1 }, "unverified"),
      (Ranked { confidence: c, verified_at: t(9), key: 3 }, "older"),
      (Ranked { confidence: c, verified_at: t(10), key: 5 }, "newer-5"),
      (Ranked { confidence: c, verified_at: t(10), key: 4 }, "newer-4"),
      (Ranked { confidence: Confidence::saturating(70), verified_at: t(11), key: 0 }, "weaker"),
    ];
    assert_eq!(pick_best(candidates).unwrap().1, "newer-4");
  }
}
