use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::cache::QueryKind;

/// Used when neither the config file nor `TASKHUB_API_URL` names a server.
pub const DEFAULT_BASE_URL: &str = "http://localhost:5000/api";

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
  #[serde(default)]
  pub api: ApiConfig,
  /// Serve synthetic data everywhere without touching the network
  #[serde(default)]
  pub offline: bool,
  /// Seed for the synthetic data set
  #[serde(default = "default_seed")]
  pub demo_seed: u64,
  #[serde(default)]
  pub cache: CacheConfig,
  #[serde(default)]
  pub fallback: FallbackConfig,
  #[serde(default)]
  pub logging: LoggingConfig,
}

fn default_seed() -> u64 {
  42
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
  #[serde(default = "default_base_url")]
  pub base_url: String,
  #[serde(default = "default_timeout")]
  pub timeout_secs: u64,
  /// Page size used when aggregating paginated collections
  #[serde(default = "default_page_size")]
  pub page_size: u32,
  /// Bearer token; normally injected through `TASKHUB_TOKEN`
  #[serde(skip)]
  pub token: Option<String>,
}

impl Default for ApiConfig {
  fn default() -> Self {
    Self {
      base_url: default_base_url(),
      timeout_secs: default_timeout(),
      page_size: default_page_size(),
      token: None,
    }
  }
}

fn default_base_url() -> String {
  DEFAULT_BASE_URL.to_string()
}

fn default_timeout() -> u64 {
  15
}

fn default_page_size() -> u32 {
  50
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CacheConfig {
  /// Persist last-known-good results in SQLite across restarts
  #[serde(default)]
  pub persist: bool,
  /// Database location (default: $XDG_DATA_HOME/taskhub/cache.db)
  pub path: Option<PathBuf>,
  #[serde(default)]
  pub freshness: FreshnessConfig,
}

/// Freshness windows in seconds, per query kind.
#[derive(Debug, Clone, Deserialize)]
pub struct FreshnessConfig {
  #[serde(default = "secs_60")]
  pub list: u64,
  #[serde(default = "secs_30")]
  pub detail: u64,
  #[serde(default = "secs_60")]
  pub my_tasks: u64,
  #[serde(default = "secs_60")]
  pub my_offers: u64,
  #[serde(default = "secs_30")]
  pub offers: u64,
  #[serde(default = "secs_60")]
  pub questions: u64,
  #[serde(default = "secs_15")]
  pub completion_status: u64,
  #[serde(default = "secs_15")]
  pub payment_status: u64,
  #[serde(default = "secs_3600")]
  pub categories: u64,
}

impl Default for FreshnessConfig {
  fn default() -> Self {
    Self {
      list: 60,
      detail: 30,
      my_tasks: 60,
      my_offers: 60,
      offers: 30,
      questions: 60,
      completion_status: 15,
      payment_status: 15,
      categories: 3600,
    }
  }
}

impl FreshnessConfig {
  pub fn window(&self, kind: QueryKind) -> Duration {
    let secs = match kind {
      QueryKind::List => self.list,
      QueryKind::Detail => self.detail,
      QueryKind::MyTasks => self.my_tasks,
      QueryKind::MyOffers => self.my_offers,
      QueryKind::Offers => self.offers,
      QueryKind::Questions => self.questions,
      QueryKind::CompletionStatus => self.completion_status,
      QueryKind::PaymentStatus => self.payment_status,
      QueryKind::Categories => self.categories,
    };
    Duration::from_secs(secs)
  }
}

fn secs_15() -> u64 {
  15
}

fn secs_30() -> u64 {
  30
}

fn secs_60() -> u64 {
  60
}

fn secs_3600() -> u64 {
  3600
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct FallbackConfig {
  #[serde(default)]
  pub empty_falls_through: EmptyFallsThrough,
}

/// Whether an empty list from a dedicated endpoint counts as "no data here,
/// try the next source" rather than a real empty state.
#[derive(Debug, Clone, Deserialize)]
pub struct EmptyFallsThrough {
  #[serde(default = "yes")]
  pub categories: bool,
  #[serde(default = "yes")]
  pub my_tasks: bool,
  #[serde(default = "yes")]
  pub my_offers: bool,
}

impl Default for EmptyFallsThrough {
  fn default() -> Self {
    Self {
      categories: true,
      my_tasks: true,
      my_offers: true,
    }
  }
}

fn yes() -> bool {
  true
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
  /// Used when RUST_LOG is unset
  #[serde(default = "default_level")]
  pub level: String,
  /// Write logs here instead of stderr
  pub file: Option<PathBuf>,
}

impl Default for LoggingConfig {
  fn default() -> Self {
    Self {
      level: default_level(),
      file: None,
    }
  }
}

fn default_level() -> String {
  "warn".to_string()
}

impl Config {
  /// Load configuration from file, then apply environment overrides.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./taskhub.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/taskhub/config.yaml
  ///
  /// With no file found, defaults are used.
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

    let config = match path {
      Some(p) => Self::load_from_path(&p)?,
      None => Config {
        demo_seed: default_seed(),
        ..Config::default()
      },
    };

    Ok(config.with_env_overrides())
  }

  fn find_config_file() -> Option<PathBuf> {
    let local = PathBuf::from("taskhub.yaml");
    if local.exists() {
      return Some(local);
    }

    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("taskhub").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    Self::parse(&contents)
      .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))
  }

  fn parse(contents: &str) -> Result<Self, serde_yaml::Error> {
    // An empty file is a valid, all-defaults config.
    if contents.trim().is_empty() {
      return serde_yaml::from_str("{}");
    }
    serde_yaml::from_str(contents)
  }

  /// Apply `TASKHUB_API_URL`, `TASKHUB_TOKEN` and `TASKHUB_OFFLINE`.
  fn with_env_overrides(mut self) -> Self {
    if let Ok(url) = std::env::var("TASKHUB_API_URL") {
      if !url.trim().is_empty() {
        self.api.base_url = url;
      }
    }
    if let Ok(token) = std::env::var("TASKHUB_TOKEN") {
      if !token.trim().is_empty() {
        self.api.token = Some(token);
      }
    }
    if let Ok(offline) = std::env::var("TASKHUB_OFFLINE") {
      self.offline = matches!(offline.trim(), "1" | "true" | "yes");
    }
    self
  }

  /// Cache database path, falling back to the user data directory.
  pub fn cache_path(&self) -> Result<PathBuf> {
    if let Some(path) = &self.cache.path {
      return Ok(path.clone());
    }
    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| eyre!("Could not determine data directory"))?;

    Ok(data_dir.join("taskhub").join("cache.db"))
  }
}
