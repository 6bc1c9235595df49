use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

const APP_DIR: &str = "sense-dash";

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
  #[serde(default)]
  pub api: ApiConfig,
  #[serde(default)]
  pub cache: CacheConfig,
  #[serde(default)]
  pub preferences: PreferencesConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
  /// Base URL of the analytics service
  #[serde(default = "default_base_url")]
  pub base_url: String,
  #[serde(default = "default_timeout_secs")]
  pub timeout_secs: u64,
}

impl Default for ApiConfig {
  fn default() -> Self {
    Self {
      base_url: default_base_url(),
      timeout_secs: default_timeout_secs(),
    }
  }
}

impl ApiConfig {
  pub fn timeout(&self) -> Duration {
    Duration::from_secs(self.timeout_secs)
  }
}

fn default_base_url() -> String {
  "http://localhost:8000".to_string()
}

fn default_timeout_secs() -> u64 {
  20
}

#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
  /// Upper bound on cached keys; least recently used idle keys go first
  #[serde(default = "default_max_entries")]
  pub max_entries: usize,
  /// Keys nobody touched for this long are dropped
  #[serde(default = "default_idle_ttl_secs")]
  pub idle_ttl_secs: u64,
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      max_entries: default_max_entries(),
      idle_ttl_secs: default_idle_ttl_secs(),
    }
  }
}

impl CacheConfig {
  pub fn idle_ttl(&self) -> Duration {
    Duration::from_secs(self.idle_ttl_secs)
  }
}

fn default_max_entries() -> usize {
  256
}

fn default_idle_ttl_secs() -> u64 {
  300
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PreferencesConfig {
  /// SQLite file for starred/tracked ids (default: $XDG_DATA_HOME/sense-dash/preferences.db)
  pub path: Option<PathBuf>,
}

impl PreferencesConfig {
  pub fn resolved_path(&self) -> Result<PathBuf> {
    match &self.path {
      Some(p) => Ok(p.clone()),
      None => Ok(data_dir()?.join("preferences.db")),
    }
  }
}

/// Per-user data directory for the preference database and log files.
pub fn data_dir() -> Result<PathBuf> {
  let base = dirs::data_dir()
    .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
    .ok_or_else(|| eyre!("Could not determine data directory"))?;
  Ok(base.join(APP_DIR))
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./sense-dash.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/sense-dash/config.yaml
  ///
  /// Without any file the defaults apply. `SENSE_DASH_API_URL` overrides the
  /// service base URL either way.
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

    let mut config = match path {
      Some(p) => Self::load_from_path(&p)?,
      None => Config::default(),
    };

    if let Ok(url) = std::env::var("SENSE_DASH_API_URL") {
      if !url.trim().is_empty() {
        config.api.base_url = url;
      }
    }

    Ok(config)
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("sense-dash.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join(APP_DIR).join("config.yaml");
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

  fn parse(contents: &str) -> Result<Self, serde_yaml::Error> {
    // An empty file is a valid, all-defaults config
    if contents.trim().is_empty() {
      return Ok(Config::default());
    }
    serde_yaml::from_str(contents)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_partial_config_uses_defaults() {
    let config = Config::parse("api:\n  base_url: https://sense.example.com\n").unwrap();
    assert_eq!(config.api.base_url, "https://sense.example.com");
    assert_eq!(config.api.timeout_secs, 20);
    assert_eq!(config.cache.max_entries, 256);
    assert_eq!(config.cache.idle_ttl(), Duration::from_secs(300));
    assert!(config.preferences.path.is_none());
  }

  #[test]
  fn test_empty_config() {
    let config = Config::parse("").unwrap();
    assert_eq!(config.api.base_url, "http://localhost:8000");
  }

  #[test]
  fn test_explicit_missing_path_is_an_error() {
    assert!(Config::load(Some(Path::new("/nonexistent/sense-dash.yaml"))).is_err());
  }

  #[test]
  fn test_load_from_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.yaml");
    std::fs::write(&path, "cache:\n  max_entries: 8\npreferences:\n  path: /tmp/p.db\n").unwrap();

    let config = Config::load(Some(&path)).unwrap();
    assert_eq!(config.cache.max_entries, 8);
    assert_eq!(config.preferences.resolved_path().unwrap(), PathBuf::from("/tmp/p.db"));
  }
}
