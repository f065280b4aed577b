//! Cached contact credentials.

use crate::{KeyValueStore, StorageCache, StorageKeys, StorageResult};
use std::sync::Arc;

/// The credential values stamped onto authenticated requests, each held in its
/// own [`StorageCache`] over a shared backing store.
#[derive(Debug)]
pub struct Credentials {
    contact_token: StorageCache<String>,
    refresh_token: StorageCache<String>,
    client_state: StorageCache<String>,
}

impl Credentials {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self {
            contact_token: StorageCache::new(StorageKeys::CONTACT_TOKEN, store.clone()),
            refresh_token: StorageCache::new(StorageKeys::REFRESH_TOKEN, store.clone()),
            client_state: StorageCache::new(StorageKeys::CLIENT_STATE, store),
        }
    }

    pub fn contact_token(&self) -> &StorageCache<String> {
        &self.contact_token
    }

    pub fn refresh_token(&self) -> &StorageCache<String> {
        &self.refresh_token
    }

    pub fn client_state(&self) -> &StorageCache<String> {
        &self.client_state
    }

    /// Remove every credential from memory and the backing store.
    pub fn clear(&self) -> StorageResult<()> {
        self.contact_token.remove()?;
        self.refresh_token.remove()?;
        self.client_state.remove()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MemoryStore;

    #[test]
    fn test_clear_removes_all_credentials() {
        let store = Arc::new(MemoryStore::new());
        let credentials = Credentials::new(store.clone());

        credentials.contact_token().set("T1".into()).unwrap();
        credentials.refresh_token().set("R1".into()).unwrap();
        credentials.client_state().set("S1".into()).unwrap();
        assert_eq!(store.len(), 3);

        credentials.clear().unwrap();

        assert!(store.is_empty());
        assert_eq!(credentials.contact_token().get().unwrap(), None);
    }
}
