//! Runtime configuration, deserialised from `resolver.toml` and `RESOLVER_*`
//! environment variables.

use std::{
  collections::BTreeSet,
  path::{Path, PathBuf},
};

use resolver_core::{
  diff::DEFAULT_VOLATILE_KEYS,
  merge::{DEFAULT_BATCH_SIZE, MergeOptions},
};
use serde::Deserialize;

/// Prefix for environment overrides, e.g. `RESOLVER_STORE_PATH`.
pub const ENV_PREFIX: &str = "RESOLVER";

#[derive(Debug, Clone, Deserialize)]
pub struct IngestConfig {
  pub store_path:        PathBuf,
  pub catalog_dir:       PathBuf,
  #[serde(default = "default_duplicates_path")]
  pub duplicates_path:   PathBuf,
  #[serde(default = "default_batch_size")]
  pub batch_size:        usize,
  #[serde(default = "default_volatile_keys")]
  pub volatile_keys:     Vec<String>,
  /// Datasets never ingested, e.g. ones too large for a scheduled run.
  #[serde(default)]
  pub excluded_datasets: BTreeSet<String>,
}

fn default_duplicates_path() -> PathBuf { PathBuf::from("duplicates.txt") }

fn default_batch_size() -> usize { DEFAULT_BATCH_SIZE }

fn default_volatile_keys() -> Vec<String> {
  DEFAULT_VOLATILE_KEYS.iter().map(|k| k.to_string()).collect()
}

impl IngestConfig {
  /// Layer the optional TOML file at `path` under the environment.
  pub fn load(path: &Path) -> Result<Self, config::ConfigError> {
    config::Config::builder()
      .add_source(config::File::from(path).required(false))
      .add_source(config::Environment::with_prefix(ENV_PREFIX))
      .build()?
      .try_deserialize()
  }

  /// Expand `~` in every configured path.
  pub fn with_expanded_paths(self) -> Self {
    Self {
      store_path: expand_tilde(&self.store_path),
      catalog_dir: expand_tilde(&self.catalog_dir),
      duplicates_path: expand_tilde(&self.duplicates_path),
      ..self
    }
  }

  pub fn merge_options(&self) -> MergeOptions {
    MergeOptions {
      batch_size:    self.batch_size,
      volatile_keys: self.volatile_keys.clone(),
    }
  }
}

/// Expand a leading `~` to the user's home directory.
pub fn expand_tilde(path: &Path) -> PathBuf {
  let s = path.to_string_lossy();
  if let Some(rest) = s.strip_prefix("~/")
    && let Ok(home) = std::env::var("HOME")
  {
    return PathBuf::from(home).join(rest);
  }
  path.to_path_buf()
}
