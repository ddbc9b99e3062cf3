//! `chorus`: operator commands for the chorus hub.
//!
//! Reads `chorus.toml` (or the path given with `--config`) overlaid by
//! `CHORUS_*` environment variables, opens the SQLite store, and runs one
//! command. Results are printed as JSON.
//!
//! ```text
//! chorus dedup --owner ana --from 2024-05-01T00:00:00Z --to 2024-05-02T00:00:00Z --dry-run
//! chorus plan --playlist 3 --remote remote.json
//! chorus reorder --playlist 3 --tracks 12,7,9
//! chorus checkpoints --owner ana
//! ```

use std::{
  path::{Path, PathBuf},
  sync::Arc,
};

use anyhow::Context as _;
use chorus_core::{
  ids::{PlaylistId, ServiceName, TrackId},
  provider::{ProviderRegistry, RemoteSnapshot},
};
use chorus_hub::{Hub, HubConfig};
use chorus_providers::{CatalogFormat, PayloadFormat};
use chorus_store_sqlite::SqliteStore;
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(author, version, about = "Chorus music metadata hub")]
struct Cli {
  /// Path to the TOML configuration file.
  #[arg(short, long, default_value = "chorus.toml")]
  config: PathBuf,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand)]
enum Command {
  /// Deduplicate one owner's plays in a time window.
  Dedup {
    #[arg(long)]
    owner:   String,
    /// Window start (RFC 3339), inclusive.
    #[arg(long)]
    from:    DateTime<Utc>,
    /// Window end (RFC 3339), exclusive.
    #[arg(long)]
    to:      DateTime<Utc>,
    /// Report verdicts without storing them.
    #[arg(long)]
    dry_run: bool,
  },
  /// Plan a sync of a local playlist against a saved catalog playlist.
  Plan {
    #[arg(long)]
    playlist: i64,
    /// JSON file with `remote_id`, optional `version`, and `items` holding
    /// raw catalog track payloads in remote order.
    #[arg(long)]
    remote:   PathBuf,
  },
  /// Put a local playlist's tracks in the given order.
  Reorder {
    #[arg(long)]
    playlist: i64,
    /// Track ids in the new order, comma separated.
    #[arg(long, value_delimiter = ',')]
    tracks:   Vec<i64>,
  },
  /// List import checkpoints.
  Checkpoints {
    #[arg(long)]
    owner:   String,
    #[arg(long)]
    service: Option<String>,
  },
}

/// A remote playlist as saved from the catalog service.
#[derive(Deserialize)]
struct SavedPlaylist {
  remote_id: String,
  #[serde(default)]
  version:   Option<String>,
  items:     Vec<serde_json::Value>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
  tracing_subscriber::fmt()
    .with_env_filter(
      EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy(),
    )
    .init();

  let cli = Cli::parse();

  let config = HubConfig::load(&cli.config)
    .with_context(|| format!("failed to load config from {:?}", cli.config))?;
  let store = SqliteStore::open(&config.store_path)
    .await
    .with_context(|| format!("failed to open store at {:?}", config.store_path))?;

  // No connector transports are compiled in; commands that only need the
  // store (or a saved remote snapshot) work without them.
  let hub = Hub::new(Arc::new(store), ProviderRegistry::new(), config);
  let cancel = CancellationToken::new();

  match cli.command {
    Command::Dedup { owner, from, to, dry_run } => {
      print(&hub.dedup_window(&owner, from, to, dry_run).await?)
    }
    Command::Plan { playlist, remote } => {
      let snapshot = read_snapshot(&remote)?;
      let planned = hub
        .plan_against_snapshot(PlaylistId(playlist), snapshot, false, &cancel)
        .await?;
      print(&planned)
    }
    Command::Reorder { playlist, tracks } => {
      let target = tracks.into_iter().map(TrackId).collect();
      print(&hub.set_playlist_order(PlaylistId(playlist), target).await?)
    }
    Command::Checkpoints { owner, service } => {
      print(&hub.checkpoints(&owner, service.map(ServiceName::new)).await?)
    }
  }
}

fn read_snapshot(path: &Path) -> anyhow::Result<RemoteSnapshot> {
  let raw = std::fs::read_to_string(path)
    .with_context(|| format!("reading remote playlist {}", path.display()))?;
  let saved: SavedPlaylist =
    serde_json::from_str(&raw).context("parsing remote playlist")?;
  let tracks = saved
    .items
    .iter()
    .enumerate()
    .map(|(i, item)| {
      CatalogFormat::track(item).with_context(|| format!("remote item {i}"))
    })
    .collect::<anyhow::Result<_>>()?;
  Ok(RemoteSnapshot {
    service: ServiceName::catalog(),
    remote_id: saved.remote_id,
    version: saved.version,
    tracks,
  })
}

fn print(value: &impl Serialize) -> anyhow::Result<()> {
  println!("{}", serde_json::to_string_pretty(value)?);
  Ok(())
}
