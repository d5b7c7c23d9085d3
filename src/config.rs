//! Application configuration.
//!
//! Layered loading: `config.yaml` in the working directory, an explicit file
//! path, the file named by `TRACEGAP_CONFIG`, then `TRACEGAP`-prefixed
//! environment variables. The flat environment names the deployment already
//! uses (`DD_API_KEY`, `DD_APP_KEY`, `DD_SITE`, `SYNC_INTERVAL_MINUTES`,
//! `DATABASE_URL`) are honored last and win.

use serde::Deserialize;

/// Default configuration file name.
pub const DEFAULT_CONFIG_FILE: &str = "config.yaml";
/// Environment variable for configuration file path.
pub const CONFIG_ENV_VAR: &str = "TRACEGAP_CONFIG";
/// Prefix for configuration environment variables.
pub const CONFIG_ENV_PREFIX: &str = "TRACEGAP";
/// Environment variable for logging configuration.
pub const LOG_ENV_VAR: &str = "TRACEGAP_LOG";

/// Environment variable for the platform API key.
pub const API_KEY_ENV_VAR: &str = "DD_API_KEY";
/// Environment variable for the platform application key.
pub const APP_KEY_ENV_VAR: &str = "DD_APP_KEY";
/// Environment variable for the platform site.
pub const SITE_ENV_VAR: &str = "DD_SITE";
/// Environment variable for the sync interval in minutes.
pub const SYNC_INTERVAL_ENV_VAR: &str = "SYNC_INTERVAL_MINUTES";
/// Environment variable for the database path.
pub const DATABASE_URL_ENV_VAR: &str = "DATABASE_URL";

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("configuration error: {0}")]
    Load(#[from] config::ConfigError),

    #[error("invalid configuration value: {0}")]
    Invalid(String),
}

/// Remote telemetry platform credentials and client settings.
///
/// Credentials are supplied via process configuration and never persisted.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DatadogSettings {
    pub api_key: String,
    pub app_key: String,
    pub site: String,
    /// Bound on every gateway call; a hit timeout is treated as the remote
    /// platform being unavailable.
    pub request_timeout_secs: u64,
    /// Catalog page size; the pagination walk stops on a shorter page.
    pub page_size: u64,
}

impl Default for DatadogSettings {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            app_key: String::new(),
            site: "datadoghq.com".to_string(),
            request_timeout_secs: 30,
            page_size: 100,
        }
    }
}

/// Storage configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// SQLite database path; `:memory:` for an in-memory database.
    pub path: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: "data/tracegap.db".to_string(),
        }
    }
}

/// Sync pipeline configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Minutes between scheduled full syncs.
    pub interval_minutes: u64,
    /// Telemetry lookback window for the coverage stage.
    pub telemetry_window_hours: u64,
    /// Upper bound on broken-trace candidates per analysis run, shared by
    /// both heuristic passes.
    pub candidate_cap: usize,
    /// Page size for the service list consumed by the presentation layer.
    pub services_per_page: u64,
    /// Page size for the broken-trace list.
    pub traces_per_page: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            interval_minutes: 15,
            telemetry_window_hours: 24,
            candidate_cap: 100,
            services_per_page: 50,
            traces_per_page: 25,
        }
    }
}

/// Main application configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub datadog: DatadogSettings,
    pub storage: StorageConfig,
    pub sync: SyncConfig,
}

impl Config {
    /// Load configuration from file and environment.
    ///
    /// Sources in priority order (later overrides earlier):
    /// 1. `config.yaml` in the current directory (if it exists)
    /// 2. File specified by `path` argument (if provided)
    /// 3. File specified by `TRACEGAP_CONFIG` (if set)
    /// 4. Environment variables with the `TRACEGAP` prefix
    /// 5. Flat legacy environment variables (`DD_API_KEY`, ...)
    pub fn load(path: Option<&str>) -> Result<Self, ConfigError> {
        use ::config::{Config as ConfigLib, Environment, File, FileFormat};

        let mut builder = ConfigLib::builder()
            .add_source(File::new(DEFAULT_CONFIG_FILE, FileFormat::Yaml).required(false));

        if let Some(config_path) = path {
            builder = builder.add_source(File::new(config_path, FileFormat::Yaml).required(true));
        }

        if let Ok(config_path) = std::env::var(CONFIG_ENV_VAR) {
            builder = builder.add_source(File::new(&config_path, FileFormat::Yaml).required(true));
        }

        let loaded = builder
            .add_source(
                Environment::with_prefix(CONFIG_ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let mut config: Config = loaded.try_deserialize()?;
        config.apply_legacy_env()?;
        Ok(config)
    }

    /// Fold in the flat environment variables the deployment already sets.
    fn apply_legacy_env(&mut self) -> Result<(), ConfigError> {
        if let Ok(api_key) = std::env::var(API_KEY_ENV_VAR) {
            self.datadog.api_key = api_key;
        }
        if let Ok(app_key) = std::env::var(APP_KEY_ENV_VAR) {
            self.datadog.app_key = app_key;
        }
        if let Ok(site) = std::env::var(SITE_ENV_VAR) {
            self.datadog.site = site;
        }
        if let Ok(minutes) = std::env::var(SYNC_INTERVAL_ENV_VAR) {
            self.sync.interval_minutes = minutes
                .parse()
                .map_err(|_| ConfigError::Invalid(format!("{SYNC_INTERVAL_ENV_VAR}={minutes}")))?;
        }
        if let Ok(path) = std::env::var(DATABASE_URL_ENV_VAR) {
            self.storage.path = path;
        }
        Ok(())
    }

    /// Create config for testing.
    pub fn for_test() -> Self {
        let mut config = Self::default();
        config.storage.path = ":memory:".to_string();
        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_deployment_expectations() {
        let config = Config::default();
        assert_eq!(config.datadog.site, "datadoghq.com");
        assert_eq!(config.sync.interval_minutes, 15);
        assert_eq!(config.sync.telemetry_window_hours, 24);
        assert_eq!(config.sync.candidate_cap, 100);
        assert_eq!(config.sync.services_per_page, 50);
        assert_eq!(config.sync.traces_per_page, 25);
    }

    #[test]
    fn test_config_uses_in_memory_storage() {
        let config = Config::for_test();
        assert_eq!(config.storage.path, ":memory:");
    }

    #[test]
    fn invalid_interval_is_rejected() {
        let mut config = Config::default();
        std::env::set_var(SYNC_INTERVAL_ENV_VAR, "not-a-number");
        let result = config.apply_legacy_env();
        std::env::remove_var(SYNC_INTERVAL_ENV_VAR);
        assert!(result.is_err());
    }
}
