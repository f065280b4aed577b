//! Completion handlers and the registry at the bottom of the chain.

use crate::{ErrorOutcome, Request, Response};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::debug;

/// Receives the terminal outcome of a request.
///
/// Handlers compose by wrapping: each layer holds the next one and may
/// intercept or forward.
#[async_trait]
pub trait CompletionHandler: Send + Sync {
    async fn on_success(&self, request_id: &str, response: Response);

    async fn on_error(&self, request_id: &str, error: ErrorOutcome);
}

/// Terminal outcome as seen by a [`CallbackHandler`].
pub type CompletionResult = Result<Response, ErrorOutcome>;

/// Adapts a closure to [`CompletionHandler`].
pub struct CallbackHandler<F> {
    callback: F,
}

impl<F> CallbackHandler<F>
where
    F: Fn(&str, CompletionResult) + Send + Sync,
{
    pub fn new(callback: F) -> Self {
        Self { callback }
    }
}

#[async_trait]
impl<F> CompletionHandler for CallbackHandler<F>
where
    F: Fn(&str, CompletionResult) + Send + Sync,
{
    async fn on_success(&self, request_id: &str, response: Response) {
        (self.callback)(request_id, Ok(response));
    }

    async fn on_error(&self, request_id: &str, error: ErrorOutcome) {
        (self.callback)(request_id, Err(error));
    }
}

#[derive(Default)]
struct Registrations {
    handlers: HashMap<String, Arc<dyn CompletionHandler>>,
    composites: HashMap<String, Vec<String>>,
    default: Option<Arc<dyn CompletionHandler>>,
}

/// Routes terminal outcomes to the handler registered for each request id.
///
/// Falls back to the default handler when a request was submitted without
/// one. A registration is forgotten after its terminal call. An outcome
/// delivered under a composite's id is replicated to each of its original ids.
#[derive(Default)]
pub struct HandlerRegistry {
    inner: Mutex<Registrations>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install the handler used for requests without their own.
    pub fn set_default(&self, handler: Arc<dyn CompletionHandler>) {
        self.lock().default = Some(handler);
    }

    /// Record `request` so its terminal outcome reaches `handler`.
    ///
    /// For a composite the handler is registered under every original id.
    pub fn register(&self, request: &Request, handler: Option<Arc<dyn CompletionHandler>>) {
        let mut inner = self.lock();
        match request.original_ids() {
            Some(original_ids) => {
                inner
                    .composites
                    .insert(request.id().to_string(), original_ids.to_vec());
                if let Some(handler) = handler {
                    for id in original_ids {
                        inner.handlers.insert(id.clone(), handler.clone());
                    }
                }
            }
            None => {
                if let Some(handler) = handler {
                    inner.handlers.insert(request.id().to_string(), handler);
                }
            }
        }
    }

    /// Register a handler for a bare id, e.g. one member of a future composite.
    pub fn register_id(&self, request_id: &str, handler: Arc<dyn CompletionHandler>) {
        self.lock().handlers.insert(request_id.to_string(), handler);
    }

    /// Number of ids still awaiting a terminal call.
    pub fn pending(&self) -> usize {
        self.lock().handlers.len()
    }

    fn lock(&self) -> MutexGuard<'_, Registrations> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Resolve the delivery targets for `request_id`, consuming the
    /// registrations.
    fn take_targets(&self, request_id: &str) -> Vec<(String, Arc<dyn CompletionHandler>)> {
        let mut inner = self.lock();
        let ids = inner
            .composites
            .remove(request_id)
            .unwrap_or_else(|| vec![request_id.to_string()]);

        ids.into_iter()
            .filter_map(|id| {
                let handler = inner
                    .handlers
                    .remove(&id)
                    .or_else(|| inner.default.clone());
                match handler {
                    Some(handler) => Some((id, handler)),
                    None => {
                        debug!(request_id = %id, "No completion handler registered");
                        None
                    }
                }
            })
            .collect()
    }
}

#[async_trait]
impl CompletionHandler for HandlerRegistry {
    async fn on_success(&self, request_id: &str, response: Response) {
        for (id, handler) in self.take_targets(request_id) {
            handler.on_success(&id, response.clone()).await;
        }
    }

    async fn on_error(&self, request_id: &str, error: ErrorOutcome) {
        for (id, handler) in self.take_targets(request_id) {
            handler.on_error(&id, error.clone()).await;
        }
    }
}
