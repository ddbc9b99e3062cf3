//! Serde helpers shared by the payload formats.

use chrono::NaiveDate;
use serde::Deserialize;

/// A field that some services send as a bare string and others as an object
/// (`{"#text": ...}` or `{"name": ...}`).
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub(crate) enum Text {
  Plain(String),
  Object {
    #[serde(rename = "#text", alias = "name")]
    text: String,
  },
}

impl Text {
  pub(crate) fn into_string(self) -> String {
    match self {
      Self::Plain(s) | Self::Object { text: s } => s.trim().to_owned(),
    }
  }
}

/// A number that may arrive quoted.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub(crate) enum Number {
  Int(u64),
  Float(f64),
  Str(String),
}

impl Number {
  pub(crate) fn as_u64(&self) -> Option<u64> {
    match self {
      Self::Int(n) => Some(*n),
      Self::Float(f) if f.is_finite() && *f >= 0.0 => Some(f.round() as u64),
      Self::Float(_) => None,
      Self::Str(s) => s.trim().parse().ok(),
    }
  }
}

/// Parse a release date at year, month or day precision. Missing parts
/// default to the first month/day.
pub(crate) fn release_date(raw: &str) -> Option<NaiveDate> {
  let mut parts = raw.trim().splitn(3, '-');
  let year = parts.next()?.parse().ok()?;
  let month = parts.next().map_or(Some(1), |m| m.parse().ok())?;
  let day = parts.next().map_or(Some(1), |d| d.parse().ok())?;
  NaiveDate::from_ymd_opt(year, month, day)
}

/// Trimmed, non-empty names.
pub(crate) fn names(raw: impl IntoIterator<Item = String>) -> Vec<String> {
  raw
    .into_iter()
    .map(|n| n.trim().to_owned())
    .filter(|n| !n.is_empty())
    .collect()
}

pub(crate) fn non_empty(raw: Option<String>) -> Option<String> {
  raw.map(|s| s.trim().to_owned()).filter(|s| !s.is_empty())
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn release_dates_at_every_precision() {
    assert_eq!(release_date("2020"), NaiveDate::from_ymd_opt(2020, 1, 1));
    assert_eq!(release_date("2020-07"), NaiveDate::from_ymd_opt(2020, 7, 1));
    assert_eq!(release_date("2020-07-14"), NaiveDate::from_ymd_opt(2020, 7, 14));
    assert_eq!(release_date("someday"), None);
    assert_eq!(release_date("2020-13-01"), None);
  }

  #[test]
  fn text_accepts_both_shapes() {
    let a: Text = serde_json::from_str(r#""Artist""#).unwrap();
    let b: Text = serde_json::from_str(r##"{"#text": " Artist "}"##).unwrap();
    let c: Text = serde_json::from_str(r#"{"name": "Artist"}"#).unwrap();
    for t in [a, b, c] {
      assert_eq!(t.into_string(), "Artist");
    }
  }

  #[test]
  fn quoted_numbers() {
    let n: Number = serde_json::from_str(r#""215""#).unwrap();
    assert_eq!(n.as_u64(), Some(215));
    let n: Number = serde_json::from_str("215.4").unwrap();
    assert_eq!(n.as_u64(), Some(215));
  }
}
