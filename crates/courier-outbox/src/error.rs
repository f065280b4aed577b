//! Outbox error types.

use thiserror::Error;

/// Outbox error type.
#[derive(Error, Debug)]
pub enum OutboxError {
    /// Database error
    #[error("Database error: {0}")]
    Database(#[from] courier_database::DatabaseError),

    /// Storage cache error
    #[error("Storage error: {0}")]
    Storage(#[from] courier_storage::StorageError),

    /// Configuration error
    #[error("Config error: {0}")]
    Core(#[from] courier_config_and_utils::CoreError),

    /// HTTP client error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Malformed request descriptor
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Missing or inconsistent collaborator at construction
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// A serial context was shut down
    #[error("Execution context closed: {0}")]
    ContextClosed(String),

    /// Queue cannot drain while connectivity is down
    #[error("Offline with {0} pending request(s)")]
    Offline(usize),
}

/// Result type alias using OutboxError.
pub type OutboxResult<T> = Result<T, OutboxError>;
