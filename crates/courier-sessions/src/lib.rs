//! Session correlation for the Courier engine.
//!
//! A session is the interval during which activity is attributed to one
//! identified contact. [`SessionCorrelator`] closes the open session and opens
//! a new one whenever the identity changes; [`IdentityContext`] persists the
//! identity and drives the correlator.

mod correlator;
mod identity;

pub use correlator::{Session, SessionCorrelator, SessionObserver, SessionTransition};
pub use identity::IdentityContext;

use thiserror::Error;

/// Errors from session bookkeeping.
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Storage error: {0}")]
    Storage(#[from] courier_storage::StorageError),
}

/// Result type alias using SessionError.
pub type SessionResult<T> = Result<T, SessionError>;
