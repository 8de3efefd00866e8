use chrono::Duration;
use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::cache::CachePolicy;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
  pub api: ApiConfig,
  #[serde(default)]
  pub cache: CacheConfig,
  #[serde(default)]
  pub sync: SyncConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
  /// Base URL of the remote storefront API
  pub url: String,
  /// Per-request timeout so one unreachable endpoint cannot stall a replay
  #[serde(default = "default_timeout_secs")]
  pub timeout_secs: u64,
}

fn default_timeout_secs() -> u64 {
  15
}

/// Overrides for one named cache store. Every field is optional; anything
/// left out keeps the store's built-in policy value.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
  pub ttl_secs: Option<i64>,
  pub max_entries: Option<usize>,
  pub persist: Option<bool>,
}

impl StoreConfig {
  pub fn policy(&self, base: CachePolicy) -> CachePolicy {
    CachePolicy::new(
      self
        .ttl_secs
        .map(Duration::seconds)
        .unwrap_or(base.default_ttl),
      self.max_entries.unwrap_or(base.max_volatile_entries),
      self.persist.unwrap_or(base.persist),
    )
  }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
  #[serde(rename = "static")]
  pub static_data: StoreConfig,
  #[serde(rename = "dynamic")]
  pub dynamic_data: StoreConfig,
  #[serde(rename = "user")]
  pub user_data: StoreConfig,
  #[serde(rename = "session")]
  pub session_data: StoreConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
  /// Recurring replay-check interval, in seconds
  pub interval_secs: u64,
}

impl Default for SyncConfig {
  fn default() -> Self {
    Self { interval_secs: 300 }
  }
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./tienda.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/tienda/config.yaml
  pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
    let path = if let Some(p) = explicit_path {
      if p.exists() {
        Some(p.to_path_buf())
      } else {
        return Err(eyre!("Config file not found: {}", p.display()));
      }
    } else {
      Self::find_config_file()
    };

    match path {
      Some(p) => Self::load_from_path(&p),
      None => Err(eyre!(
        "No configuration file found. Create one at ~/.config/tienda/config.yaml\n\
                 See config.example.yaml for the format."
      )),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("tienda.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("tienda").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    let config: Config = serde_yaml::from_str(&contents)
      .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))?;

    Ok(config)
  }

  /// Get the API bearer token from the environment, when set.
  pub fn get_api_token() -> Option<String> {
    std::env::var("TIENDA_API_TOKEN").ok()
  }
}
