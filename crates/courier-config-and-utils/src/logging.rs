//! Logging initialization for the engine.
//!
//! Every component logs through `tracing`; the binary calls one of the
//! functions below once, before anything else runs.

use std::path::PathBuf;

use observability::LogConfig;

const SERVICE_NAME: &str = "courier";

/// Structured JSONL goes to `~/.courier/logs/courier.jsonl`; compact lines
/// are mirrored to stderr. `RUST_LOG` overrides `level`.
///
/// ```ignore
/// init_logging("info");
/// tracing::info!("courier started");
/// ```
pub fn init_logging(level: &str) {
    observability::init_with_config(log_config(level, None));
}

/// Like [`init_logging`] but writing JSONL to `log_file`, typically
/// [`crate::Paths::log_file`].
pub fn init_logging_at(level: &str, log_file: PathBuf) {
    observability::init_with_config(log_config(level, Some(log_file)));
}

fn log_config(level: &str, log_path: Option<PathBuf>) -> LogConfig {
    LogConfig {
        service_name: SERVICE_NAME.into(),
        default_level: level.into(),
        log_path,
        also_stderr: true,
    }
}
