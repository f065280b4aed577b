//! Identity context: the tracked contact identity and its credentials.

use crate::{SessionCorrelator, SessionResult, SessionTransition};
use courier_storage::{Credentials, KeyValueStore, StorageCache, StorageKeys};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, info};

/// Persists the current identity and restarts the session when it changes.
///
/// The new identity is durable before the correlator is told about it, so
/// anything reacting to the session boundary already observes it.
pub struct IdentityContext {
    identity: StorageCache<String>,
    credentials: Arc<Credentials>,
    correlator: Arc<SessionCorrelator>,
    changes: Mutex<()>,
}

impl IdentityContext {
    pub fn new(
        store: Arc<dyn KeyValueStore>,
        credentials: Arc<Credentials>,
        correlator: Arc<SessionCorrelator>,
    ) -> Self {
        Self {
            identity: StorageCache::new(StorageKeys::IDENTITY, store),
            credentials,
            correlator,
            changes: Mutex::new(()),
        }
    }

    pub fn current_identity(&self) -> SessionResult<Option<String>> {
        Ok(self.identity.get()?)
    }

    /// Returns `None` when `identity` equals the current one.
    pub fn set_identity(&self, identity: Option<String>) -> SessionResult<Option<SessionTransition>> {
        let _change = self.changes.lock().unwrap_or_else(PoisonError::into_inner);

        if self.identity.get()? == identity {
            debug!("Identity unchanged");
            return Ok(None);
        }

        match &identity {
            Some(value) => self.identity.set(value.clone())?,
            None => self.identity.remove()?,
        }
        info!(identified = identity.is_some(), "Identity changed");

        let transition = self.correlator.on_identity_changed(identity.as_deref())?;
        Ok(Some(transition))
    }

    /// Forget the identity and wipe the stored credentials.
    pub fn clear(&self) -> SessionResult<Option<SessionTransition>> {
        self.credentials.clear()?;
        self.set_identity(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::correlator::tests::RecordingObserver;
    use courier_storage::MemoryStore;

    struct Fixture {
        store: Arc<MemoryStore>,
        credentials: Arc<Credentials>,
        observer: Arc<RecordingObserver>,
        context: IdentityContext,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let credentials = Arc::new(Credentials::new(store.clone()));
        let observer = Arc::new(RecordingObserver::default());
        let correlator =
            Arc::new(SessionCorrelator::new(store.clone()).with_observer(observer.clone()));
        let context = IdentityContext::new(store.clone(), credentials.clone(), correlator);
        Fixture {
            store,
            credentials,
            observer,
            context,
        }
    }

    #[test]
    fn test_identity_persisted_before_session_starts() {
        let fixture = fixture();

        let transition = fixture
            .context
            .set_identity(Some("alice".into()))
            .unwrap()
            .unwrap();

        assert_eq!(transition.started.unwrap().identity, "alice");
        assert_eq!(
            fixture.store.get(StorageKeys::IDENTITY).unwrap(),
            Some("\"alice\"".into())
        );
    }

    #[test]
    fn test_same_identity_does_not_restart_session() {
        let fixture = fixture();
        fixture.context.set_identity(Some("alice".into())).unwrap();

        assert!(fixture
            .context
            .set_identity(Some("alice".into()))
            .unwrap()
            .is_none());
        assert_eq!(*fixture.observer.events.lock().unwrap(), vec!["start:alice"]);
    }

    #[test]
    fn test_clear_wipes_credentials_and_ends_session() {
        let fixture = fixture();
        fixture.context.set_identity(Some("alice".into())).unwrap();
        fixture.credentials.contact_token().set("T1".into()).unwrap();
        fixture.credentials.refresh_token().set("R1".into()).unwrap();

        let transition = fixture.context.clear().unwrap().unwrap();

        assert_eq!(transition.ended.unwrap().identity, "alice");
        assert!(transition.started.is_none());
        assert!(fixture.context.current_identity().unwrap().is_none());
        assert!(fixture.credentials.contact_token().get().unwrap().is_none());
        assert!(fixture.store.is_empty());
    }
}
