//! Hub configuration.
//!
//! Read from an optional TOML file overlaid by `CHORUS_`-prefixed
//! environment variables, `__` separating nested keys:
//!
//! ```text
//! CHORUS_STORE_PATH=/var/lib/chorus.db
//! CHORUS_MATCHING__TRUST_THRESHOLD=70
//! CHORUS_SYNC__CONFLICT_POLICY=overwrite
//! ```

use std::{
  collections::BTreeMap,
  path::{Path, PathBuf},
};

use chorus_core::ids::ServiceName;
use chorus_match::{DedupConfig, MatchConfig, RetryPolicy};
use chorus_providers::ServiceLimits;
use chorus_sync::SyncConfig;
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};

use crate::error::Result;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HubConfig {
  pub store_path: PathBuf,
  pub matching:   MatchConfig,
  pub dedup:      DedupConfig,
  pub sync:       SyncConfig,
  pub retry:      RetryPolicy,
  /// Per-service call budgets; unlisted services get the defaults.
  pub services:   BTreeMap<ServiceName, ServiceLimits>,
}

impl Default for HubConfig {
  fn default() -> Self {
    Self {
      store_path: PathBuf::from("chorus.db"),
      matching:   MatchConfig::default(),
      dedup:      DedupConfig::default(),
      sync:       SyncConfig::default(),
      retry:      RetryPolicy::default(),
      services:   BTreeMap::new(),
    }
  }
}

impl HubConfig {
  /// Load `path` if it exists, then apply the environment.
  ///
  /// Values that parse but contradict each other are rejected here, before
  /// any engine sees them.
  pub fn load(path: &Path) -> Result<Self> {
    let cfg: Self = Config::builder()
      .add_source(File::from(path).required(false))
      .add_source(environment())
      .build()?
      .try_deserialize()?;
    cfg.validate()?;
    Ok(cfg)
  }

  pub fn validate(&self) -> Result<()> {
    self.matching.validate()?;
    self.dedup.validate()?;
    self.sync.validate()?;
    Ok(())
  }

  pub fn limits(&self, service: &ServiceName) -> ServiceLimits {
    self.services.get(service).copied().unwrap_or_default()
  }
}

fn environment() -> Environment {
  Environment::with_prefix("CHORUS")
    .prefix_separator("_")
    .separator("__")
    .try_parsing(true)
}
