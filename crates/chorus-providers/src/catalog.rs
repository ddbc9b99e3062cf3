//! Payloads from the primary catalog service.
//!
//! ```json
//! {
//!   "id": "4uLU6hMC", "name": "Song", "duration_ms": 215000,
//!   "artists": [{ "name": "Artist" }],
//!   "album": { "name": "Album", "release_date": "2019-05" },
//!   "external_ids": { "isrc": "USABC1234567" }
//! }
//! ```
//!
//! Plays and playlist items wrap the track: `{ "track": {..}, "played_at": ".." }`.

use chorus_core::{
  ids::ServiceName,
  play::ObservedPlay,
  track::{DirectIdentifier, DirectIds, IdentifierKind, ObservedTrack},
};
use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::{
  Error, Result,
  adapter::PayloadFormat,
  payload::{self, Text},
};

const SERVICE: &str = ServiceName::CATALOG;

#[derive(Debug, Deserialize)]
struct CatalogTrack {
  id:           Option<String>,
  name:         Option<String>,
  #[serde(default)]
  artists:      Vec<Text>,
  album:        Option<CatalogAlbum>,
  duration_ms:  Option<u32>,
  #[serde(default)]
  external_ids: ExternalIds,
}

#[derive(Debug, Deserialize)]
struct CatalogAlbum {
  name:         Option<String>,
  release_date: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ExternalIds {
  isrc: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CatalogPlay {
  track:     serde_json::Value,
  played_at: Option<String>,
}

/// Playlist and play items wrap the track object; bare tracks are accepted
/// too.
fn unwrap_item(raw: &serde_json::Value) -> &serde_json::Value {
  raw.get("track").filter(|t| t.is_object()).unwrap_or(raw)
}

pub struct CatalogFormat;

impl PayloadFormat for CatalogFormat {
  const SERVICE: &'static str = SERVICE;
  const NATIVE_KIND: Option<IdentifierKind> = Some(IdentifierKind::CatalogId);

  fn track(raw: &serde_json::Value) -> Result<ObservedTrack> {
    let raw = unwrap_item(raw);
    let t = CatalogTrack::deserialize(raw)?;
    let native_id = payload::non_empty(t.id)
      .ok_or(Error::MissingField { service: SERVICE, field: "id" })?;
    let title = t
      .name
      .ok_or(Error::MissingField { service: SERVICE, field: "name" })?;

    let identifiers = DirectIds::default()
      .with(IdentifierKind::CatalogId, &native_id)
      .with(IdentifierKind::Isrc, t.external_ids.isrc.as_deref().unwrap_or_default());
    let (album, release_date) = match t.album {
      Some(a) => (
        payload::non_empty(a.name),
        a.release_date.as_deref().and_then(payload::release_date),
      ),
      None => (None, None),
    };

    Ok(ObservedTrack {
      service: ServiceName::catalog(),
      native_id,
      title: title.trim().to_owned(),
      artists: payload::names(t.artists.into_iter().map(Text::into_string)),
      album,
      duration_ms: t.duration_ms,
      release_date,
      identifiers,
      raw: raw.clone(),
      observed_at: Utc::now(),
    })
  }

  fn play(raw: &serde_json::Value) -> Result<ObservedPlay> {
    let p = CatalogPlay::deserialize(raw)?;
    let stamp = p
      .played_at
      .ok_or(Error::MissingField { service: SERVICE, field: "played_at" })?;
    let played_at = DateTime::parse_from_rfc3339(&stamp)
      .map_err(|_| Error::InvalidField {
        service: SERVICE,
        field:   "played_at",
        value:   stamp.clone(),
      })?
      .with_timezone(&Utc);
    Ok(ObservedPlay { track: Self::track(&p.track)?, played_at })
  }

  fn direct_identifier(raw: &serde_json::Value) -> Option<DirectIdentifier> {
    let id = unwrap_item(raw).get("id")?.as_str()?;
    DirectIdentifier::new(IdentifierKind::CatalogId, id)
  }
}
