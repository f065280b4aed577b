//! Row types.

use chrono::{DateTime, Utc};

/// One persisted queue record: `(sequence, payload, inserted_at)`.
///
/// The payload is opaque to this crate; decoding it is the store's job so a
/// corrupt row can be isolated instead of failing the whole listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueRow {
    pub sequence: i64,
    pub payload: Vec<u8>,
    pub inserted_at: DateTime<Utc>,
}
