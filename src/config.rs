use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::catalog::aggregate::{PricePolicy, TieBreak, UrlSource};

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
  #[serde(default)]
  pub api: ApiConfig,
  #[serde(default)]
  pub cache: CacheConfig,
  #[serde(default)]
  pub pagination: PaginationConfig,
  #[serde(default)]
  pub pricing: PricingConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
  /// Base URL of the catalog server
  pub url: String,
  /// Request timeout; a fetch slower than this fails with a timeout error
  pub timeout_secs: u64,
}

impl Default for ApiConfig {
  fn default() -> Self {
    Self {
      url: "http://127.0.0.1:8000/".to_string(),
      timeout_secs: 60,
    }
  }
}

impl ApiConfig {
  pub fn timeout(&self) -> Duration {
    Duration::from_secs(self.timeout_secs)
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
  pub list_ttl_secs: u64,
  pub detail_ttl_secs: u64,
  /// Maximum entries per namespace before the oldest is evicted
  pub max_entries: usize,
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      list_ttl_secs: 300,
      detail_ttl_secs: 300,
      max_entries: 50,
    }
  }
}

impl CacheConfig {
  /// Longest accepted TTL (ten years)
  pub const MAX_TTL_SECS: u64 = 10 * 365 * 24 * 60 * 60;

  pub fn list_ttl(&self) -> chrono::Duration {
    ttl(self.list_ttl_secs)
  }

  pub fn detail_ttl(&self) -> chrono::Duration {
    ttl(self.detail_ttl_secs)
  }

  fn validate(&self) -> Result<()> {
    for (name, secs) in [
      ("list_ttl_secs", self.list_ttl_secs),
      ("detail_ttl_secs", self.detail_ttl_secs),
    ] {
      if secs > Self::MAX_TTL_SECS {
        return Err(eyre!(
          "cache.{} must be at most {} seconds, got {}",
          name,
          Self::MAX_TTL_SECS,
          secs
        ));
      }
    }
    Ok(())
  }
}

/// Clamped to `MAX_TTL_SECS` so the conversion cannot overflow.
fn ttl(secs: u64) -> chrono::Duration {
  chrono::Duration::seconds(secs.min(CacheConfig::MAX_TTL_SECS) as i64)
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PaginationConfig {
  pub page_size: usize,
  /// Fetch the following page into the cache after each successful page
  pub preload: bool,
  /// Number of products shown for an empty search
  pub popular_limit: usize,
  pub popular_category: String,
}

impl Default for PaginationConfig {
  fn default() -> Self {
    Self {
      page_size: 20,
      preload: true,
      popular_limit: 10,
      popular_category: "электроника".to_string(),
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PricingConfig {
  pub tie_break: TieBreak,
  pub url_order: Vec<UrlSource>,
}

impl Default for PricingConfig {
  fn default() -> Self {
    let policy = PricePolicy::default();
    Self {
      tie_break: policy.tie_break,
      url_order: policy.url_order,
    }
  }
}

impl PricingConfig {
  pub fn policy(&self) -> PricePolicy {
    PricePolicy {
      tie_break: self.tie_break,
      url_order: self.url_order.clone(),
    }
  }
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./pricewatch.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/pricewatch/config.yaml
  ///
  /// Falls back to built-in defaults when no file is found.
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
    let local = PathBuf::from("pricewatch.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("pricewatch").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    let config = Self::parse(&contents)
      .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))?;
    config
      .validate()
      .map_err(|e| eyre!("Invalid config file {}: {}", path.display(), e))?;
    Ok(config)
  }

  fn validate(&self) -> Result<()> {
    self.cache.validate()
  }

  fn parse(contents: &str) -> std::result::Result<Self, serde_yaml::Error> {
    serde_yaml::from_str(contents)
  }

  /// Get the API token from the environment, if one is set.
  pub fn get_api_token() -> Option<String> {
    std::env::var("PRICEWATCH_API_TOKEN")
      .ok()
      .filter(|t| !t.trim().is_empty())
  }

  /// Directory for the settings database and log file.
  pub fn data_dir() -> Result<PathBuf> {
    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| eyre!("Could not determine data directory"))?;

    Ok(data_dir.join("pricewatch"))
  }
}
