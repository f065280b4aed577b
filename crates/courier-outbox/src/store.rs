//! Persistent request store.
//!
//! Append-only, insertion-ordered log of pending requests on top of the
//! `request_queue` table. Every append is durable before it returns and then
//! fires the registered append hook in the same call.

use crate::{OutboxError, OutboxResult, Request};
use chrono::{DateTime, Utc};
use courier_database::{Database, QueueRow};
use std::sync::{Arc, PoisonError, RwLock};
use tracing::{debug, error};

/// Invoked synchronously with the new sequence after every successful append.
pub type AppendHook = Arc<dyn Fn(i64) + Send + Sync>;

/// Receives records that could not be decoded when loaded back.
pub trait CorruptionObserver: Send + Sync {
    fn on_corrupt_entry(&self, sequence: i64, reason: &str);
}

/// A decoded queue record.
#[derive(Debug, Clone, PartialEq)]
pub struct QueueEntry {
    pub sequence: i64,
    pub request: Request,
    pub inserted_at: DateTime<Utc>,
}

pub struct RequestStore {
    db: Arc<Database>,
    hook: RwLock<Option<AppendHook>>,
    observer: RwLock<Option<Arc<dyn CorruptionObserver>>>,
}

impl RequestStore {
    pub fn new(db: Arc<Database>) -> Self {
        Self {
            db,
            hook: RwLock::new(None),
            observer: RwLock::new(None),
        }
    }

    /// Replace the append hook.
    pub fn set_append_hook(&self, hook: AppendHook) {
        *self.hook.write().unwrap_or_else(PoisonError::into_inner) = Some(hook);
    }

    pub fn set_corruption_observer(&self, observer: Arc<dyn CorruptionObserver>) {
        *self.observer.write().unwrap_or_else(PoisonError::into_inner) = Some(observer);
    }

    /// Durably append `request`, returning its sequence.
    ///
    /// A request that cannot be serialized is not queued.
    pub fn append(&self, request: &Request) -> OutboxResult<i64> {
        let payload = serde_json::to_vec(request)?;
        let sequence = self.db.insert_queue_entry(&payload)?;
        debug!(request_id = %request.id(), sequence, "Request appended");

        let hook = self
            .hook
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        if let Some(hook) = hook {
            hook(sequence);
        }

        Ok(sequence)
    }

    /// All decodable entries in ascending sequence order.
    ///
    /// Corrupt records are reported, deleted and skipped.
    pub fn entries(&self) -> OutboxResult<Vec<QueueEntry>> {
        let rows = self.db.list_queue_entries()?;
        let mut entries = Vec::with_capacity(rows.len());
        for row in rows {
            if let Some(entry) = self.decode(row)? {
                entries.push(entry);
            }
        }
        Ok(entries)
    }

    /// The lowest-sequence decodable entry.
    pub fn first(&self) -> OutboxResult<Option<QueueEntry>> {
        while let Some(row) = self.db.first_queue_entry()? {
            if let Some(entry) = self.decode(row)? {
                return Ok(Some(entry));
            }
        }
        Ok(None)
    }

    pub fn remove(&self, sequence: i64) -> OutboxResult<bool> {
        let removed = self.db.delete_queue_entry(sequence)?;
        if removed {
            debug!(sequence, "Request removed");
        }
        Ok(removed)
    }

    pub fn len(&self) -> OutboxResult<usize> {
        Ok(self.db.count_queue_entries()?)
    }

    pub fn is_empty(&self) -> OutboxResult<bool> {
        Ok(self.len()? == 0)
    }

    /// Drop every pending entry without delivering it.
    pub fn clear(&self) -> OutboxResult<usize> {
        Ok(self.db.clear_queue()?)
    }

    fn decode(&self, row: QueueRow) -> OutboxResult<Option<QueueEntry>> {
        match serde_json::from_slice::<Request>(&row.payload) {
            Ok(request) => Ok(Some(QueueEntry {
                sequence: row.sequence,
                request,
                inserted_at: row.inserted_at,
            })),
            Err(e) => {
                let reason = e.to_string();
                error!(sequence = row.sequence, error = %reason, "Corrupt queue record skipped");
                let observer = self
                    .observer
                    .read()
                    .unwrap_or_else(PoisonError::into_inner)
                    .clone();
                if let Some(observer) = observer {
                    observer.on_corrupt_entry(row.sequence, &reason);
                }
                // Deleted so it is reported once and never blocks the head.
                self.db
                    .delete_queue_entry(row.sequence)
                    .map_err(OutboxError::from)?;
                Ok(None)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::RequestDescriptor;
    use std::sync::atomic::{AtomicI64, Ordering};
    use std::sync::Mutex;
    use tempfile::tempdir;

    fn request(id: &str) -> Request {
        RequestDescriptor::builder(format!("https://events.test/v3/{id}"))
            .id(id)
            .build()
            .unwrap()
            .into()
    }

    fn create_store() -> (Arc<Database>, RequestStore) {
        let db = Arc::new(Database::open_in_memory().unwrap());
        (db.clone(), RequestStore::new(db))
    }

    #[derive(Default)]
    struct RecordingObserver {
        seen: Mutex<Vec<i64>>,
    }

    impl CorruptionObserver for RecordingObserver {
        fn on_corrupt_entry(&self, sequence: i64, _reason: &str) {
            self.seen.lock().unwrap().push(sequence);
        }
    }

    #[test]
    fn test_entries_in_append_order() {
        let (_db, store) = create_store();
        let s1 = store.append(&request("a")).unwrap();
        let s2 = store.append(&request("b")).unwrap();
        let s3 = store.append(&request("c")).unwrap();
        assert!(s1 < s2 && s2 < s3);

        let ids: Vec<_> = store
            .entries()
            .unwrap()
            .into_iter()
            .map(|entry| entry.request.id().to_string())
            .collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
        assert_eq!(store.first().unwrap().unwrap().sequence, s1);
    }

    #[test]
    fn test_append_hook_fires_after_durable_write() {
        let (db, store) = create_store();
        let store = Arc::new(store);
        let last = Arc::new(AtomicI64::new(0));

        let seen = last.clone();
        let hook_db = db.clone();
        store.set_append_hook(Arc::new(move |sequence: i64| {
            assert_eq!(hook_db.count_queue_entries().unwrap(), 1);
            seen.store(sequence, Ordering::SeqCst);
        }));

        let sequence = store.append(&request("a")).unwrap();
        assert_eq!(last.load(Ordering::SeqCst), sequence);
    }

    #[test]
    fn test_durability_round_trip_across_restart() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("courier.sqlite");

        let appended: Vec<i64> = {
            let store = RequestStore::new(Arc::new(Database::open(&path).unwrap()));
            ["r1", "r2", "r3"]
                .iter()
                .map(|id| store.append(&request(id)).unwrap())
                .collect()
        };

        let reopened = RequestStore::new(Arc::new(Database::open(&path).unwrap()));
        let entries = reopened.entries().unwrap();
        let sequences: Vec<_> = entries.iter().map(|entry| entry.sequence).collect();
        let ids: Vec<_> = entries.iter().map(|entry| entry.request.id()).collect();

        assert_eq!(sequences, appended);
        assert_eq!(ids, vec!["r1", "r2", "r3"]);
    }

    #[test]
    fn test_corrupt_record_skipped_and_reported_once() {
        let (db, store) = create_store();
        let observer = Arc::new(RecordingObserver::default());
        store.set_corruption_observer(observer.clone());

        store.append(&request("a")).unwrap();
        let bad = db.insert_queue_entry(b"{truncated").unwrap();
        store.append(&request("c")).unwrap();

        let ids: Vec<_> = store
            .entries()
            .unwrap()
            .into_iter()
            .map(|entry| entry.request.id().to_string())
            .collect();
        assert_eq!(ids, vec!["a", "c"]);

        store.entries().unwrap();
        assert_eq!(*observer.seen.lock().unwrap(), vec![bad]);
        assert_eq!(store.len().unwrap(), 2);
    }

    #[test]
    fn test_first_skips_corrupt_head() {
        let (db, store) = create_store();
        db.insert_queue_entry(b"not json").unwrap();
        store.append(&request("b")).unwrap();

        assert_eq!(store.first().unwrap().unwrap().request.id(), "b");
    }

    #[test]
    fn test_remove_len_and_clear() {
        let (_db, store) = create_store();
        assert!(store.is_empty().unwrap());
        assert!(store.first().unwrap().is_none());

        let s1 = store.append(&request("a")).unwrap();
        store.append(&request("b")).unwrap();
        assert!(store.remove(s1).unwrap());
        assert_eq!(store.len().unwrap(), 1);

        assert_eq!(store.clear().unwrap(), 1);
        assert!(store.is_empty().unwrap());
    }
}
