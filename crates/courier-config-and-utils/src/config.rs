//! Configuration management for the engine.

use crate::{CoreError, CoreResult, Endpoints, Paths};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use url::Url;

/// Default client service base URL.
pub const DEFAULT_CLIENT_SERVICE_URL: &str = "https://me-client.courier.dev/v3";

/// Default event service base URL.
pub const DEFAULT_EVENT_SERVICE_URL: &str = "https://mobile-events.courier.dev/v3";

/// Default log level.
pub const DEFAULT_LOG_LEVEL: &str = "info";

/// Default request time-to-live (4 hours), in milliseconds.
pub const DEFAULT_TTL_MS: u64 = 4 * 60 * 60 * 1000;

/// Default per-call transport timeout.
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

/// Main engine configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Log level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Base URL of the client service (authenticated, hosts the refresh endpoint).
    #[serde(default = "default_client_service_url")]
    pub client_service_url: String,
    /// Base URL of the event service (authenticated).
    #[serde(default = "default_event_service_url")]
    pub event_service_url: String,
    /// Time-to-live applied to descriptors built without an explicit ttl.
    #[serde(default = "default_ttl_ms")]
    pub default_ttl_ms: u64,
    /// Transport timeout per request.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}

fn default_client_service_url() -> String {
    DEFAULT_CLIENT_SERVICE_URL.to_string()
}

fn default_event_service_url() -> String {
    DEFAULT_EVENT_SERVICE_URL.to_string()
}

fn default_ttl_ms() -> u64 {
    DEFAULT_TTL_MS
}

fn default_request_timeout_secs() -> u64 {
    DEFAULT_REQUEST_TIMEOUT_SECS
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            client_service_url: default_client_service_url(),
            event_service_url: default_event_service_url(),
            default_ttl_ms: DEFAULT_TTL_MS,
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
        }
    }
}

impl Config {
    /// Create a new Config with default values, then override from environment.
    pub fn new() -> Self {
        let mut config = Self::default();
        config.load_from_env();
        config
    }

    /// Load configuration from the config file, falling back to defaults,
    /// then apply environment overrides.
    pub fn load(paths: &Paths) -> CoreResult<Self> {
        let config_path = paths.config_file();

        let mut config = if config_path.exists() {
            Self::load_from_file(&config_path)?
        } else {
            Self::default()
        };

        config.load_from_env();
        config.validate()?;

        Ok(config)
    }

    /// Load configuration from a specific file.
    pub fn load_from_file(path: &Path) -> CoreResult<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to a file.
    pub fn save(&self, paths: &Paths) -> CoreResult<()> {
        paths.ensure_dirs()?;
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(paths.config_file(), content)?;
        Ok(())
    }

    fn load_from_env(&mut self) {
        if let Ok(log_level) = std::env::var("COURIER_LOG_LEVEL") {
            self.log_level = log_level;
        }
        if let Ok(url) = std::env::var("COURIER_CLIENT_SERVICE_URL") {
            self.client_service_url = url;
        }
        if let Ok(url) = std::env::var("COURIER_EVENT_SERVICE_URL") {
            self.event_service_url = url;
        }
    }

    /// Check that both service URLs parse and the ttl is non-zero.
    pub fn validate(&self) -> CoreResult<()> {
        self.client_service_url()?;
        self.event_service_url()?;
        if self.default_ttl_ms == 0 {
            return Err(CoreError::Config("default_ttl_ms must be positive".into()));
        }
        Ok(())
    }

    /// Get the client service URL as a parsed URL.
    pub fn client_service_url(&self) -> CoreResult<Url> {
        Url::parse(&self.client_service_url).map_err(CoreError::from)
    }

    /// Get the event service URL as a parsed URL.
    pub fn event_service_url(&self) -> CoreResult<Url> {
        Url::parse(&self.event_service_url).map_err(CoreError::from)
    }

    pub fn default_ttl(&self) -> Duration {
        Duration::from_millis(self.default_ttl_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Build the authenticated endpoint whitelist for this configuration.
    pub fn endpoints(&self) -> CoreResult<Endpoints> {
        Endpoints::new(&self.client_service_url, &self.event_service_url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.log_level, DEFAULT_LOG_LEVEL);
        assert_eq!(config.client_service_url, DEFAULT_CLIENT_SERVICE_URL);
        assert_eq!(config.event_service_url, DEFAULT_EVENT_SERVICE_URL);
        assert_eq!(config.default_ttl(), Duration::from_secs(4 * 60 * 60));
    }

    #[test]
    fn test_config_load_from_file_fills_missing_fields() {
        let dir = tempdir().unwrap();
        let config_path = dir.path().join("config.json");

        std::fs::write(&config_path, r#"{ "log_level": "debug", "default_ttl_ms": 5000 }"#)
            .unwrap();

        let config = Config::load_from_file(&config_path).unwrap();
        assert_eq!(config.log_level, "debug");
        assert_eq!(config.default_ttl_ms, 5000);
        assert_eq!(config.client_service_url, DEFAULT_CLIENT_SERVICE_URL);
        assert_eq!(config.request_timeout_secs, DEFAULT_REQUEST_TIMEOUT_SECS);
    }

    #[test]
    fn test_config_save_and_load_roundtrip() {
        let dir = tempdir().unwrap();
        let paths = Paths::with_base_dir(dir.path().to_path_buf());

        let config = Config {
            default_ttl_ms: 1234,
            request_timeout_secs: 7,
            ..Config::default()
        };
        config.save(&paths).unwrap();

        let loaded = Config::load_from_file(&paths.config_file()).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_config_load_nonexistent_uses_defaults() {
        let dir = tempdir().unwrap();
        let paths = Paths::with_base_dir(dir.path().to_path_buf());

        let config = Config::load(&paths).unwrap();
        assert_eq!(config.default_ttl_ms, DEFAULT_TTL_MS);
    }

    #[test]
    fn test_config_invalid_url() {
        let config = Config {
            client_service_url: "not a valid url".to_string(),
            ..Config::default()
        };

        assert!(config.client_service_url().is_err());
        assert!(config.validate().is_err());
        assert!(config.endpoints().is_err());
    }

    #[test]
    fn test_config_zero_ttl_rejected() {
        let config = Config {
            default_ttl_ms: 0,
            ..Config::default()
        };

        assert!(matches!(config.validate(), Err(CoreError::Config(_))));
    }

    #[test]
    fn test_default_urls_parse() {
        let config = Config::default();
        assert_eq!(config.client_service_url().unwrap().scheme(), "https");
        assert_eq!(config.event_service_url().unwrap().scheme(), "https");
    }
}
