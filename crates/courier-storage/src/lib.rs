//! Key/value storage for the Courier engine.
//!
//! - [`KeyValueStore`]: the persisted backing capability (SQLite in
//!   `courier-database`, [`MemoryStore`] for tests and ephemeral use)
//! - [`StorageCache`]: a typed memory-plus-persisted cache over one key
//! - [`Credentials`]: the contact token, refresh token and client state caches

mod cache;
mod credentials;
mod keys;
mod memory;
mod traits;

pub use cache::{StorageCache, StorageCacheBuilder};
pub use credentials::Credentials;
pub use keys::StorageKeys;
pub use memory::MemoryStore;
pub use traits::KeyValueStore;

use thiserror::Error;

/// Error type for storage operations.
#[derive(Error, Debug)]
pub enum StorageError {
    /// Backing store failure
    #[error("Backend storage error: {0}")]
    Backend(String),

    /// Encoding/decoding error
    #[error("Encoding error: {0}")]
    Encoding(#[from] serde_json::Error),

    /// Cache built without a required collaborator
    #[error("Illegal configuration: {0}")]
    IllegalConfiguration(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;
