use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Base URL used when neither the environment nor the config file set one.
pub const DEFAULT_API_URL: &str = "http://localhost:8000/api";

/// Environment variable overriding `api.base_url`.
pub const API_URL_ENV: &str = "HRDESK_API_URL";

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
  #[serde(default)]
  pub api: ApiConfig,
  #[serde(default)]
  pub cache: CacheConfig,
  #[serde(default)]
  pub storage: StorageConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
  /// Backend root, e.g. "https://hr.example.com/api"
  pub base_url: Option<String>,
  /// Per-request timeout in milliseconds
  #[serde(default = "default_timeout_ms")]
  pub timeout_ms: u64,
}

impl Default for ApiConfig {
  fn default() -> Self {
    Self {
      base_url: None,
      timeout_ms: default_timeout_ms(),
    }
  }
}

fn default_timeout_ms() -> u64 {
  30_000
}

#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
  /// How long an unobserved read stays cached
  #[serde(default = "default_eviction_grace_secs")]
  pub eviction_grace_secs: u64,
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      eviction_grace_secs: default_eviction_grace_secs(),
    }
  }
}

fn default_eviction_grace_secs() -> u64 {
  5
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct StorageConfig {
  /// SQLite file backing the persisted session (defaults to the data dir)
  pub path: Option<PathBuf>,
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./hrdesk.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/hrdesk/config.yaml
  ///
  /// Without any file the defaults are used.
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
      None => Ok(Self::default()),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("hrdesk.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("hrdesk").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    Self::parse(&contents).map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))
  }

  fn parse(contents: &str) -> Result<Self> {
    // An empty file is a valid, all-defaults config.
    if contents.trim().is_empty() {
      return Ok(Self::default());
    }
    Ok(serde_yaml::from_str(contents)?)
  }

  /// Backend root URL.
  ///
  /// Checks HRDESK_API_URL first, then `api.base_url`, then the built-in
  /// default.
  pub fn api_base_url(&self) -> String {
    self.resolve_base_url(std::env::var(API_URL_ENV).ok())
  }

  fn resolve_base_url(&self, from_env: Option<String>) -> String {
    from_env
      .filter(|url| !url.trim().is_empty())
      .or_else(|| self.api.base_url.clone())
      .unwrap_or_else(|| DEFAULT_API_URL.to_string())
  }

  pub fn eviction_grace(&self) -> Duration {
    Duration::from_secs(self.cache.eviction_grace_secs)
  }
}
