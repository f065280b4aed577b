//! # Observability
//!
//! Centralized logging layer for the Courier workspace.
//!
//! Components are **log producers** only. They use the standard `tracing`
//! macros and never know where the lines end up. A binary calls
//! [`init_with_config`] once at startup; from then on every event is written
//! as one JSON object per line to `~/.courier/logs/courier.jsonl` (or the
//! configured path), optionally mirrored to stderr.
//!
//! ```rust,ignore
//! observability::init_with_config(observability::LogConfig {
//!     service_name: "courier".into(),
//!     default_level: "debug".into(),
//!     also_stderr: true,
//!     ..Default::default()
//! });
//! tracing::info!("ready");
//! ```

mod file_writer;
mod json_layer;

use std::io;
use std::path::PathBuf;

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

pub use file_writer::{LogFileWriter, WriterFactory};
pub use json_layer::{JsonLayer, LogEntry};

/// Configuration for the logging system.
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Name of the service, written into every log line.
    pub service_name: String,

    /// Default log level filter (e.g. "debug", "info").
    /// Overridden by `RUST_LOG` when set.
    pub default_level: String,

    /// Custom JSONL file path. Defaults to `~/.courier/logs/courier.jsonl`.
    pub log_path: Option<PathBuf>,

    /// Also emit compact human-readable lines to stderr.
    pub also_stderr: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            service_name: "unknown".into(),
            default_level: "info".into(),
            log_path: None,
            also_stderr: false,
        }
    }
}

/// Default JSONL log location.
pub fn default_log_path() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".courier").join("logs").join("courier.jsonl"))
}

/// Initialize logging with default settings for `service_name`.
pub fn init(service_name: &str) {
    init_with_config(LogConfig {
        service_name: service_name.into(),
        ..Default::default()
    });
}

/// Initialize logging with a custom configuration.
///
/// If the log file cannot be opened the subscriber still installs with the
/// stderr layer only, and the failure is logged once. Calling this twice is a
/// no-op for the second call.
pub fn init_with_config(config: LogConfig) {
    let file_factory = match open_log_file(&config) {
        Ok(factory) => Some(factory),
        Err(e) => {
            eprintln!("courier: could not open log file: {e}");
            None
        }
    };

    let json_layer = file_factory.map(|factory| {
        JsonLayer::new(config.service_name.clone(), factory).with_filter(env_filter(&config))
    });

    // Without a file the stderr layer is the only sink, so force it on.
    let stderr_enabled = config.also_stderr || json_layer.is_none();
    let stderr_layer = stderr_enabled.then(|| {
        tracing_subscriber::fmt::layer()
            .with_target(true)
            .compact()
            .with_writer(io::stderr)
            .with_filter(env_filter(&config))
    });

    let installed = tracing_subscriber::registry()
        .with(json_layer)
        .with(stderr_layer)
        .try_init()
        .is_ok();

    if installed {
        tracing::debug!(service = %config.service_name, "observability initialized");
    }
}

fn env_filter(config: &LogConfig) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.default_level))
}

fn open_log_file(config: &LogConfig) -> io::Result<WriterFactory> {
    let path = config
        .log_path
        .clone()
        .or_else(default_log_path)
        .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "home directory not found"))?;
    let writer = LogFileWriter::new(&path)?;
    Ok(WriterFactory::new(writer))
}

/// Re-export tracing macros for convenience.
pub use tracing::{debug, error, info, instrument, trace, warn};

/// Re-export Level for advanced filtering.
pub use tracing::Level;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = LogConfig::default();
        assert_eq!(config.service_name, "unknown");
        assert_eq!(config.default_level, "info");
        assert!(config.log_path.is_none());
        assert!(!config.also_stderr);
    }

    #[test]
    fn test_open_log_file_uses_configured_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("logs").join("test.jsonl");
        let config = LogConfig {
            log_path: Some(path.clone()),
            ..Default::default()
        };

        assert!(open_log_file(&config).is_ok());
        assert!(path.exists());
    }
}
