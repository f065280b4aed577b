//! SQLite persistence for the Courier engine.
//!
//! This crate provides:
//! - The `request_queue` table backing the persistent request store
//! - The `key_value_store` table backing [`courier_storage::StorageCache`]
//! - Versioned migrations
//!
//! A [`Database`] owns one connection behind a mutex, so every append and
//! remove is atomic with respect to concurrent callers.

mod db;
mod error;
mod migrations;
mod models;

pub use db::Database;
pub use error::{DatabaseError, DatabaseResult};
pub use migrations::{run_migrations, CURRENT_VERSION};
pub use models::QueueRow;
