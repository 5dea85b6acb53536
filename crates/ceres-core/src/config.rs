//! Configuration types for Ceres components.
//!
//! Values are layered: the `Default` impls below, then an optional TOML file
//! (see [`load_config`]), then whatever the CLI overrides from flags and
//! environment variables.
//!
//! ```toml
//! [catalog]
//! base_url = "https://www.donneesquebec.ca/recherche/api/3/action"
//! timeout_secs = 30
//! max_retries = 3
//!
//! [harvest]
//! page_size = 100
//! prune_missing_resources = false
//! merge_strategy = "replace"
//!
//! [database]
//! max_connections = 5
//!
//! [stats]
//! top_organizations = 10
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::upsert::{MergeStrategy, UpsertConfig};
use crate::AppError;

/// Catalog the harvester pulls from when nothing else is configured.
pub const DEFAULT_CATALOG_URL: &str = "https://www.donneesquebec.ca/recherche/api/3/action";

/// Database connection pool configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DbConfig {
    pub max_connections: u32,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self { max_connections: 5 }
    }
}

/// HTTP client configuration for catalog calls.
#[derive(Debug, Clone)]
pub struct HttpConfig {
    pub timeout: Duration,
    pub max_retries: u32,
    pub retry_base_delay: Duration,
    pub retry_max_delay: Duration,
    pub user_agent: String,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            max_retries: 3,
            retry_base_delay: Duration::from_millis(500),
            retry_max_delay: Duration::from_secs(10),
            user_agent: "Ceres/0.1 (catalog-harvester)".to_string(),
        }
    }
}

/// Remote catalog location and transport settings, as written in the config file.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CatalogConfig {
    pub base_url: String,
    pub timeout_secs: u64,
    pub max_retries: u32,
    pub retry_base_delay_ms: u64,
    pub retry_max_delay_ms: u64,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        let http = HttpConfig::default();
        Self {
            base_url: DEFAULT_CATALOG_URL.to_string(),
            timeout_secs: http.timeout.as_secs(),
            max_retries: http.max_retries,
            retry_base_delay_ms: http.retry_base_delay.as_millis() as u64,
            retry_max_delay_ms: http.retry_max_delay.as_millis() as u64,
        }
    }
}

impl CatalogConfig {
    pub fn http(&self) -> HttpConfig {
        HttpConfig {
            timeout: Duration::from_secs(self.timeout_secs),
            max_retries: self.max_retries,
            retry_base_delay: Duration::from_millis(self.retry_base_delay_ms),
            retry_max_delay: Duration::from_millis(self.retry_max_delay_ms),
            ..HttpConfig::default()
        }
    }
}

/// Harvest run configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HarvestConfig {
    /// Records requested per page (`rows`). Must be positive.
    pub page_size: u32,
    /// Stop after this many non-empty pages. `None` harvests until exhaustion.
    pub max_pages: Option<u32>,
    /// Delete stored resources that are missing from a dataset's new payload.
    pub prune_missing_resources: bool,
    pub merge_strategy: MergeStrategy,
    /// Time-to-live of the run lease, when one is used.
    pub lease_ttl_secs: u64,
}

impl Default for HarvestConfig {
    fn default() -> Self {
        Self {
            page_size: 100,
            max_pages: None,
            prune_missing_resources: false,
            merge_strategy: MergeStrategy::Replace,
            lease_ttl_secs: 3600,
        }
    }
}

impl HarvestConfig {
    pub fn upsert(&self) -> UpsertConfig {
        UpsertConfig {
            merge_strategy: self.merge_strategy,
            prune_missing_resources: self.prune_missing_resources,
        }
    }

    pub fn lease_ttl(&self) -> Duration {
        Duration::from_secs(self.lease_ttl_secs)
    }

    /// Rejects values the orchestrator cannot run with.
    pub fn validate(&self) -> Result<(), AppError> {
        if self.page_size == 0 {
            return Err(AppError::ConfigError(
                "harvest.page_size must be greater than zero".to_string(),
            ));
        }
        if self.max_pages == Some(0) {
            return Err(AppError::ConfigError(
                "harvest.max_pages must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// Dashboard statistics configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StatsConfig {
    /// Number of organizations kept in the "top organizations" chart.
    pub top_organizations: usize,
}

impl Default for StatsConfig {
    fn default() -> Self {
        Self {
            top_organizations: 10,
        }
    }
}

/// Complete configuration file.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct CeresConfig {
    pub catalog: CatalogConfig,
    pub harvest: HarvestConfig,
    pub database: DbConfig,
    pub stats: StatsConfig,
}

/// Returns the default location of the configuration file
/// (`<config dir>/ceres/config.toml`).
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("ceres").join("config.toml"))
}

/// Loads configuration from `path`, or from [`default_config_path`] when `None`.
///
/// A missing file at the default location yields the defaults. A missing file
/// that was asked for explicitly is an error.
pub fn load_config(path: Option<&Path>) -> Result<CeresConfig, AppError> {
    let (path, explicit) = match path {
        Some(p) => (p.to_path_buf(), true),
        None => match default_config_path() {
            Some(p) => (p, false),
            None => return Ok(CeresConfig::default()),
        },
    };

    if !path.exists() {
        if explicit {
            return Err(AppError::ConfigError(format!(
                "config file not found: {}",
                path.display()
            )));
        }
        tracing::debug!(path = %path.display(), "No config file, using defaults");
        return Ok(CeresConfig::default());
    }

    let content = std::fs::read_to_string(&path).map_err(|e| {
        AppError::ConfigError(format!("cannot read {}: {}", path.display(), e))
    })?;
    let config: CeresConfig = toml::from_str(&content).map_err(|e| {
        AppError::ConfigError(format!("invalid TOML in {}: {}", path.display(), e))
    })?;
    config.harvest.validate()?;

    tracing::debug!(path = %path.display(), "Loaded configuration");
    Ok(config)
}
