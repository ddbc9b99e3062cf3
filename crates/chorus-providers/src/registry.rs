//! Recordings from the canonical metadata registry.
//!
//! ```json
//! {
//!   "id": "b1a9..", "title": "Song", "length": 215000,
//!   "artist-credit": [{ "name": "Artist" }],
//!   "isrcs": ["USABC1234567"],
//!   "releases": [{ "title": "Album", "date": "2019-05-03" }]
//! }
//! ```
//!
//! The registry is a lookup source only; it reports no plays.

use chorus_core::{
  ids::ServiceName,
  play::ObservedPlay,
  track::{DirectIdentifier, DirectIds, IdentifierKind, ObservedTrack},
};
use chrono::Utc;
use serde::Deserialize;

use crate::{
  Error, Result,
  adapter::PayloadFormat,
  payload::{self, Text},
};

const SERVICE: &str = ServiceName::REGISTRY;

#[derive(Debug, Deserialize)]
struct Recording {
  id:            Option<String>,
  title:         Option<String>,
  length:        Option<u32>,
  #[serde(rename = "artist-credit", default)]
  artist_credit: Vec<Text>,
  #[serde(default)]
  isrcs:         Vec<String>,
  #[serde(default)]
  releases:      Vec<Release>,
}

#[derive(Debug, Deserialize)]
struct Release {
  title: Option<String>,
  date:  Option<String>,
}

pub struct RegistryFormat;

impl PayloadFormat for RegistryFormat {
  const SERVICE: &'static str = SERVICE;
  const NATIVE_KIND: Option<IdentifierKind> = Some(IdentifierKind::RegistryId);

  fn track(raw: &serde_json::Value) -> Result<ObservedTrack> {
    let r = Recording::deserialize(raw)?;
    let id = payload::non_empty(r.id)
      .ok_or(Error::MissingField { service: SERVICE, field: "id" })?;
    let title = r
      .title
      .ok_or(Error::MissingField { service: SERVICE, field: "title" })?;

    let mut identifiers = DirectIds::default().with(IdentifierKind::RegistryId, &id);
    // A recording may carry several ISRCs; the first is kept.
    if let Some(isrc) = r.isrcs.iter().find_map(|i| DirectIdentifier::new(IdentifierKind::Isrc, i)) {
      identifiers.set(isrc);
    }

    // Earliest dated release wins; undated releases only name the album.
    let first = r
      .releases
      .iter()
      .filter_map(|rel| {
        let date = rel.date.as_deref().and_then(payload::release_date)?;
        Some((date, rel))
      })
      .min_by_key(|(date, _)| *date);
    let (album, release_date) = match first {
      Some((date, rel)) => (payload::non_empty(rel.title.clone()), Some(date)),
      None => (
        r.releases.first().and_then(|rel| payload::non_empty(rel.title.clone())),
        None,
      ),
    };

    Ok(ObservedTrack {
      service: ServiceName::registry(),
      native_id: id.to_lowercase(),
      title: title.trim().to_owned(),
      artists: payload::names(r.artist_credit.into_iter().map(Text::into_string)),
      album,
      duration_ms: r.length,
      release_date,
      identifiers,
      raw: raw.clone(),
      observed_at: Utc::now(),
    })
  }

  fn play(_raw: &serde_json::Value) -> Result<ObservedPlay> {
    Err(Error::PlaysUnsupported(SERVICE))
  }

  fn direct_identifier(raw: &serde_json::Value) -> Option<DirectIdentifier> {
    DirectIdentifier::new(IdentifierKind::RegistryId, raw.get("id")?.as_str()?)
  }
}
