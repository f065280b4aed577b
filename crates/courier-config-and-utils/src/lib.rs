//! Configuration, paths, endpoint helpers and logging for the Courier engine.

mod config;
mod endpoints;
mod error;
mod logging;
mod paths;

pub use config::{
    Config, DEFAULT_CLIENT_SERVICE_URL, DEFAULT_EVENT_SERVICE_URL, DEFAULT_LOG_LEVEL,
    DEFAULT_REQUEST_TIMEOUT_SECS, DEFAULT_TTL_MS,
};
pub use endpoints::Endpoints;
pub use error::{CoreError, CoreResult};
pub use logging::{init_logging, init_logging_at};
pub use paths::Paths;
