//! Typed memory-plus-persisted cache over a single key.
//!
//! Reads are served from memory when the slot is populated, otherwise from the
//! backing [`KeyValueStore`] (the result is then held in memory). Writes hit
//! memory first, then the backing store, before returning.

use crate::{KeyValueStore, StorageError, StorageResult};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, warn};

enum Slot<V> {
    /// Backing store not consulted yet.
    Unknown,
    /// Backing store consulted and held no value.
    Absent,
    Present(V),
}

/// Thread-safe cache for one value of type `V`, persisted as JSON.
pub struct StorageCache<V> {
    key: String,
    store: Arc<dyn KeyValueStore>,
    cache_absence: bool,
    slot: Mutex<Slot<V>>,
}

impl<V> StorageCache<V>
where
    V: Serialize + DeserializeOwned + Clone,
{
    /// Cache over `key` in `store`, without absence caching.
    pub fn new(key: impl Into<String>, store: Arc<dyn KeyValueStore>) -> Self {
        Self {
            key: key.into(),
            store,
            cache_absence: false,
            slot: Mutex::new(Slot::Unknown),
        }
    }

    pub fn builder(key: impl Into<String>) -> StorageCacheBuilder<V> {
        StorageCacheBuilder {
            key: key.into(),
            store: None,
            cache_absence: false,
            _value: std::marker::PhantomData,
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Current value, reading through to the backing store on a memory miss.
    pub fn get(&self) -> StorageResult<Option<V>> {
        let mut slot = self.lock();
        match &*slot {
            Slot::Present(value) => return Ok(Some(value.clone())),
            Slot::Absent if self.cache_absence => return Ok(None),
            _ => {}
        }

        match self.store.get(&self.key)? {
            Some(raw) => {
                let value: V = serde_json::from_str(&raw).map_err(|e| {
                    warn!(key = %self.key, error = %e, "persisted value could not be decoded");
                    StorageError::from(e)
                })?;
                debug!(key = %self.key, "promoted persisted value into memory");
                *slot = Slot::Present(value.clone());
                Ok(Some(value))
            }
            None => {
                if self.cache_absence {
                    *slot = Slot::Absent;
                }
                Ok(None)
            }
        }
    }

    /// Write `value` to memory, then durably to the backing store.
    ///
    /// When the backing write fails the in-memory value is already updated and
    /// the error is returned.
    pub fn set(&self, value: V) -> StorageResult<()> {
        let raw = serde_json::to_string(&value)?;
        let mut slot = self.lock();
        *slot = Slot::Present(value);
        self.store.set(&self.key, &raw)
    }

    /// Clear both layers.
    pub fn remove(&self) -> StorageResult<()> {
        let mut slot = self.lock();
        *slot = if self.cache_absence {
            Slot::Absent
        } else {
            Slot::Unknown
        };
        self.store.delete(&self.key)?;
        Ok(())
    }

    /// Drop the in-memory layer so the next `get` reads the backing store.
    pub fn invalidate(&self) {
        *self.lock() = Slot::Unknown;
    }

    fn lock(&self) -> MutexGuard<'_, Slot<V>> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<V> fmt::Debug for StorageCache<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StorageCache")
            .field("key", &self.key)
            .field("cache_absence", &self.cache_absence)
            .finish_non_exhaustive()
    }
}

/// Builder for [`StorageCache`]. A backing store is mandatory.
pub struct StorageCacheBuilder<V> {
    key: String,
    store: Option<Arc<dyn KeyValueStore>>,
    cache_absence: bool,
    _value: std::marker::PhantomData<fn() -> V>,
}

impl<V> StorageCacheBuilder<V>
where
    V: Serialize + DeserializeOwned + Clone,
{
    pub fn store(mut self, store: Arc<dyn KeyValueStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Remember a missing persisted value so later reads skip the store.
    pub fn cache_absence(mut self, enabled: bool) -> Self {
        self.cache_absence = enabled;
        self
    }

    pub fn build(self) -> StorageResult<StorageCache<V>> {
        let store = self.store.ok_or_else(|| {
            StorageError::IllegalConfiguration(format!(
                "storage cache '{}' requires a backing store",
                self.key
            ))
        })?;

        Ok(StorageCache {
            key: self.key,
            store,
            cache_absence: self.cache_absence,
            slot: Mutex::new(Slot::Unknown),
        })
    }
}
