//! Session correlator.

use crate::SessionResult;
use chrono::{DateTime, Duration, Utc};
use courier_storage::{KeyValueStore, StorageCache, StorageKeys};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::info;
use uuid::Uuid;

/// A bounded interval correlating activity to one identified contact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub identity: String,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
}

impl Session {
    fn open(identity: &str) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            identity: identity.to_string(),
            started_at: Utc::now(),
            ended_at: None,
        }
    }

    pub fn is_open(&self) -> bool {
        self.ended_at.is_none()
    }

    /// Elapsed time of a closed session.
    pub fn duration(&self) -> Option<Duration> {
        self.ended_at.map(|ended| ended - self.started_at)
    }
}

/// Notified of session boundaries.
pub trait SessionObserver: Send + Sync {
    fn session_started(&self, session: &Session);

    fn session_ended(&self, session: &Session, duration: Duration);
}

/// What an identity change did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionTransition {
    pub ended: Option<Session>,
    pub started: Option<Session>,
}

/// Keeps at most one open session, persisted so the invariant survives
/// restarts.
pub struct SessionCorrelator {
    active: StorageCache<Session>,
    observer: Option<Arc<dyn SessionObserver>>,
    transitions: Mutex<()>,
}

impl SessionCorrelator {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self {
            active: StorageCache::new(StorageKeys::ACTIVE_SESSION, store),
            observer: None,
            transitions: Mutex::new(()),
        }
    }

    pub fn with_observer(mut self, observer: Arc<dyn SessionObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    pub fn active_session(&self) -> SessionResult<Option<Session>> {
        Ok(self.active.get()?)
    }

    /// Close the open session, if any, then open one for `identity` unless it
    /// is `None`.
    pub fn on_identity_changed(&self, identity: Option<&str>) -> SessionResult<SessionTransition> {
        let _transition = self
            .transitions
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        let ended = self.close_active()?;
        let started = match identity {
            Some(identity) => {
                let session = Session::open(identity);
                self.active.set(session.clone())?;
                info!(session_id = %session.id, "Session started");
                if let Some(observer) = &self.observer {
                    observer.session_started(&session);
                }
                Some(session)
            }
            None => None,
        };

        Ok(SessionTransition { ended, started })
    }

    /// Close the open session without opening another.
    pub fn end_session(&self) -> SessionResult<Option<Session>> {
        let _transition = self
            .transitions
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        self.close_active()
    }

    fn close_active(&self) -> SessionResult<Option<Session>> {
        let Some(mut session) = self.active.get()? else {
            return Ok(None);
        };

        session.ended_at = Some(Utc::now());
        self.active.remove()?;

        let duration = session.duration().unwrap_or_else(Duration::zero);
        info!(
            session_id = %session.id,
            duration_ms = duration.num_milliseconds(),
            "Session ended"
        );
        if let Some(observer) = &self.observer {
            observer.session_ended(&session, duration);
        }
        Ok(Some(session))
    }
}
