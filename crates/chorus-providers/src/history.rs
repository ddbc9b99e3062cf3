//! Payloads from the play-history service.
//!
//! Shapes are loose: `artist` and `album` arrive as strings or as objects
//! (`{"#text": ..}` / `{"name": ..}`), numbers may be quoted, and an empty
//! `mbid` means "unknown". Durations are in seconds.
//!
//! ```json
//! {
//!   "name": "Song", "artist": { "#text": "Artist" }, "album": "Album",
//!   "mbid": "5f1c..", "duration": "215", "date": { "uts": "1709287200" }
//! }
//! ```

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
  payload::{self, Number, Text},
};

const SERVICE: &str = ServiceName::HISTORY;

#[derive(Debug, Deserialize)]
struct HistoryTrack {
  name:     Option<String>,
  artist:   Option<Text>,
  album:    Option<Text>,
  mbid:     Option<String>,
  duration: Option<Number>,
  date:     Option<HistoryDate>,
}

#[derive(Debug, Deserialize)]
struct HistoryDate {
  uts: Number,
}

/// The history service has no stable track ids: use the registry id when
/// present, else a normalised `artist - title` key.
fn native_id(mbid: Option<&str>, artist: &str, title: &str) -> String {
  if let Some(mbid) = mbid {
    return mbid.to_lowercase();
  }
  let squash = |s: &str| s.split_whitespace().collect::<Vec<_>>().join(" ").to_lowercase();
  format!("{} - {}", squash(artist), squash(title))
}

fn parse(raw: &serde_json::Value) -> Result<(ObservedTrack, Option<HistoryDate>)> {
  let t = HistoryTrack::deserialize(raw)?;
  let title = t
    .name
    .map(|n| n.trim().to_owned())
    .ok_or(Error::MissingField { service: SERVICE, field: "name" })?;
  let artist = t.artist.map(Text::into_string).unwrap_or_default();
  let mbid = payload::non_empty(t.mbid);

  let identifiers = DirectIds::default()
    .with(IdentifierKind::RegistryId, mbid.as_deref().unwrap_or_default());
  let duration_ms = t
    .duration
    .and_then(|d| d.as_u64())
    .filter(|&secs| secs > 0)
    .and_then(|secs| u32::try_from(secs * 1000).ok());

  let track = ObservedTrack {
    service: ServiceName::history(),
    native_id: native_id(mbid.as_deref(), &artist, &title),
    artists: payload::names([artist]),
    title,
    album: payload::non_empty(t.album.map(Text::into_string)),
    duration_ms,
    release_date: None,
    identifiers,
    raw: raw.clone(),
    observed_at: Utc::now(),
  };
  Ok((track, t.date))
}

pub struct HistoryFormat;

impl PayloadFormat for HistoryFormat {
  const SERVICE: &'static str = SERVICE;
  const NATIVE_KIND: Option<IdentifierKind> = None;

  fn track(raw: &serde_json::Value) -> Result<ObservedTrack> {
    parse(raw).map(|(track, _)| track)
  }

  /// Now-playing entries carry no date and are rejected.
  fn play(raw: &serde_json::Value) -> Result<ObservedPlay> {
    let (track, date) = parse(raw)?;
    let date = date.ok_or(Error::MissingField { service: SERVICE, field: "date" })?;
    let played_at = date
      .uts
      .as_u64()
      .and_then(|secs| i64::try_from(secs).ok())
      .and_then(|secs| DateTime::from_timestamp(secs, 0))
      .ok_or_else(|| Error::InvalidField {
        service: SERVICE,
        field:   "date.uts",
        value:   format!("{:?}", date.uts),
      })?;
    Ok(ObservedPlay { track, played_at })
  }

  fn direct_identifier(raw: &serde_json::Value) -> Option<DirectIdentifier> {
    let mbid = raw.get("mbid")?.as_str()?;
    DirectIdentifier::new(IdentifierKind::RegistryId, mbid)
  }
}
