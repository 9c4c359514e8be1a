use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
  /// Cache version identifier; bump on every deployment
  pub version: String,
  pub remote: RemoteConfig,
  /// Paths served cache-first and pre-populated at install time
  #[serde(default = "default_static_paths")]
  pub static_paths: Vec<String>,
  /// Path prefixes served network-first with a cached fallback
  #[serde(default = "default_api_prefixes")]
  pub api_prefixes: Vec<String>,
  /// Document served when a navigation fails with nothing cached
  #[serde(default = "default_offline_landing")]
  pub offline_landing: String,
  /// Prefixes whose dynamic snapshots are re-fetched on reconnect
  #[serde(default = "default_refresh_prefixes")]
  pub refresh_prefixes: Vec<String>,
  /// Where the engine database lives (defaults to the platform data dir)
  pub data_dir: Option<PathBuf>,
  #[serde(default)]
  pub reminders: ReminderConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RemoteConfig {
  /// Base URL of the remote API
  pub url: String,
  /// Path probed to detect reconnection
  #[serde(default = "default_probe_path")]
  pub probe_path: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReminderConfig {
  /// Delay applied when the user picks "remind later"
  #[serde(default = "default_defer_minutes")]
  pub defer_minutes: u64,
  /// Where the app navigates when a reminder is acted on
  #[serde(default = "default_open_path")]
  pub open_path: String,
}

impl Default for ReminderConfig {
  fn default() -> Self {
    Self {
      defer_minutes: default_defer_minutes(),
      open_path: default_open_path(),
    }
  }
}

fn default_static_paths() -> Vec<String> {
  [
    "/",
    "/static/js/bundle.js",
    "/static/css/main.css",
    "/manifest.json",
    "/icon-192.png",
    "/icon-512.png",
  ]
  .into_iter()
  .map(String::from)
  .collect()
}

fn default_api_prefixes() -> Vec<String> {
  vec!["/api/".to_string()]
}

fn default_offline_landing() -> String {
  "/".to_string()
}

fn default_refresh_prefixes() -> Vec<String> {
  vec!["/api/progress/".to_string()]
}

fn default_probe_path() -> String {
  "/api/auth/me".to_string()
}

fn default_defer_minutes() -> u64 {
  30
}

fn default_open_path() -> String {
  "/questions".to_string()
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./medsync.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/medsync/config.yaml
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
        "No configuration file found. Create one at ~/.config/medsync/config.yaml"
      )),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("medsync.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("medsync").join("config.yaml");
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
}
