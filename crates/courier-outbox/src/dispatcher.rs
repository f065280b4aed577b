//! Dispatcher: the single logical worker draining the request store.
//!
//! Two serial contexts are owned per dispatcher:
//! - the request context runs drain steps and `submit_now` attempts
//! - the completion context runs the handler chain behind a [`WorkerProxy`]
//!
//! A drain step takes the lowest-sequence entry, delivers it (or its `Expired`
//! error), waits for the chain to finish, removes the entry and posts the next
//! step. The loop idles when the store is empty or the connectivity probe
//! reports offline, and is woken by the store's append hook.

use crate::{
    CompletionHandler, ConnectivityProbe, DeliveryContext, ErrorOutcome, FailureCause,
    HandlerRegistry, MappedTransport, OutboxError, OutboxResult, QueueEntry, RefreshTokenProxy,
    Request, RequestStore, RestTransport, SerialContext, WorkerProxy,
};
use chrono::Utc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::Notify;
use tracing::{debug, error, info, warn};

/// Handle to a running dispatcher. Cheap to clone.
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<DispatcherInner>,
}

struct DispatcherInner {
    store: Arc<RequestStore>,
    transport: Arc<dyn RestTransport>,
    chain: Arc<dyn CompletionHandler>,
    registry: Arc<HandlerRegistry>,
    connectivity: Arc<dyn ConnectivityProbe>,
    request_context: SerialContext,
    drain_scheduled: AtomicBool,
    idle: Notify,
}

impl Dispatcher {
    /// Assemble the chain (registry, refresh proxy, worker proxy), hook the
    /// store and resume any entries persisted by a previous run.
    ///
    /// Must be called inside a tokio runtime.
    pub fn new(context: DeliveryContext) -> Self {
        let transport: Arc<dyn RestTransport> = Arc::new(MappedTransport::new(
            context.transport,
            context.request_mappers,
            context.response_handlers,
        ));

        let registry = Arc::new(HandlerRegistry::new());
        let base: Arc<dyn CompletionHandler> = registry.clone();
        let refreshing: Arc<dyn CompletionHandler> = match context.refresher {
            Some(refresher) => Arc::new(RefreshTokenProxy::new(
                base,
                transport.clone(),
                refresher,
                context.endpoints,
            )),
            None => base,
        };
        let chain: Arc<dyn CompletionHandler> = Arc::new(WorkerProxy::new(
            refreshing,
            SerialContext::spawn("completion"),
        ));

        let inner = Arc::new(DispatcherInner {
            store: context.store,
            transport,
            chain,
            registry,
            connectivity: context.connectivity,
            request_context: SerialContext::spawn("request"),
            drain_scheduled: AtomicBool::new(false),
            idle: Notify::new(),
        });

        let weak: Weak<DispatcherInner> = Arc::downgrade(&inner);
        inner.store.set_append_hook(Arc::new(move |_sequence: i64| {
            if let Some(inner) = weak.upgrade() {
                inner.schedule_drain();
            }
        }));

        info!("Dispatcher started");
        inner.schedule_drain();

        Self { inner }
    }

    /// Durably append `request`, then wake the drain loop.
    ///
    /// `handler` receives the terminal outcome; without one the default
    /// handler does. When the append fails the handler also receives an
    /// immediate error outcome.
    pub fn submit(
        &self,
        request: impl Into<Request>,
        handler: Option<Arc<dyn CompletionHandler>>,
    ) -> OutboxResult<i64> {
        let request = request.into();
        request.validate()?;
        self.inner.registry.register(&request, handler);

        match self.inner.store.append(&request) {
            Ok(sequence) => Ok(sequence),
            Err(e) => {
                error!(request_id = %request.id(), error = %e, "Failed to persist request");
                let cause = match &e {
                    OutboxError::Json(inner) => FailureCause::Serialization(inner.to_string()),
                    other => FailureCause::Persistence(other.to_string()),
                };
                self.inner.post_error(request.id().to_string(), cause);
                Err(e)
            }
        }
    }

    /// Execute `request` on the request context without persisting it.
    pub fn submit_now(
        &self,
        request: impl Into<Request>,
        handler: Option<Arc<dyn CompletionHandler>>,
    ) -> OutboxResult<()> {
        let request = request.into();
        request.validate()?;
        self.inner.registry.register(&request, handler);

        let inner = self.inner.clone();
        self.inner.request_context.post(async move {
            inner.attempt(&request).await;
        })
    }

    /// Install the handler for requests submitted without their own.
    pub fn register_completion_handler(&self, handler: Arc<dyn CompletionHandler>) {
        self.inner.registry.set_default(handler);
    }

    pub fn pending_count(&self) -> OutboxResult<usize> {
        self.inner.store.len()
    }

    /// Notify the dispatcher of a connectivity change; `true` resumes draining.
    pub fn connectivity_changed(&self, connected: bool) {
        if connected {
            info!("Connectivity restored, resuming drain");
            self.inner.schedule_drain();
        } else {
            info!("Connectivity lost, drain will pause");
        }
    }

    /// Resolve once the store is empty, the drain loop is idle and every
    /// `submit_now` posted so far has completed.
    ///
    /// Fails with [`OutboxError::Offline`] if entries remain while offline.
    /// Must not be awaited from inside a completion handler.
    pub async fn flush(&self) -> OutboxResult<()> {
        loop {
            let idle = self.inner.idle.notified();
            tokio::pin!(idle);
            idle.as_mut().enable();

            if !self.inner.drain_scheduled.load(Ordering::SeqCst) {
                self.inner.request_context.run(async {}).await?;
                if !self.inner.drain_scheduled.load(Ordering::SeqCst) {
                    let pending = self.inner.store.len()?;
                    if pending == 0 {
                        return Ok(());
                    }
                    if !self.inner.connectivity.is_connected() {
                        return Err(OutboxError::Offline(pending));
                    }
                    // Entries left behind by a failed step; try again.
                    self.inner.schedule_drain();
                }
                continue;
            }

            idle.await;
        }
    }
}

impl DispatcherInner {
    fn schedule_drain(self: &Arc<Self>) {
        if self.drain_scheduled.swap(true, Ordering::SeqCst) {
            return;
        }
        self.post_step();
    }

    fn post_step(self: &Arc<Self>) {
        let inner = Arc::clone(self);
        let posted = self.request_context.post(async move {
            if inner.drain_step().await {
                inner.post_step();
            }
        });
        if let Err(e) = posted {
            error!(error = %e, "Drain loop stopped");
            self.go_idle();
        }
    }

    fn go_idle(&self) {
        self.drain_scheduled.store(false, Ordering::SeqCst);
        self.idle.notify_waiters();
    }

    /// Process at most one entry. Returns whether another step should follow.
    async fn drain_step(&self) -> bool {
        if !self.connectivity.is_connected() {
            debug!("Offline, drain loop idle");
            self.go_idle();
            return false;
        }

        let entry = match self.store.first() {
            Ok(Some(entry)) => entry,
            Ok(None) => {
                self.go_idle();
                // An append between the read and going idle saw the loop as
                // scheduled and did not wake it.
                return match self.store.is_empty() {
                    Ok(false) => !self.drain_scheduled.swap(true, Ordering::SeqCst),
                    _ => false,
                };
            }
            Err(e) => {
                error!(error = %e, "Failed to read request store");
                self.go_idle();
                return false;
            }
        };

        self.deliver(&entry).await;

        match self.store.remove(entry.sequence) {
            Ok(_) => true,
            Err(e) => {
                error!(sequence = entry.sequence, error = %e, "Failed to remove delivered request");
                self.go_idle();
                false
            }
        }
    }

    async fn deliver(&self, entry: &QueueEntry) {
        debug!(
            request_id = %entry.request.id(),
            sequence = entry.sequence,
            "Dispatching queued request"
        );
        self.attempt(&entry.request).await;
    }

    /// One attempt: expiry check, transport call, then the chain to completion.
    async fn attempt(&self, request: &Request) {
        let request_id = request.id();

        if request.is_expired(Utc::now()) {
            warn!(request_id = %request_id, "Request expired before dispatch");
            self.chain
                .on_error(request_id, ErrorOutcome::Cause(FailureCause::Expired))
                .await;
            return;
        }

        match self.transport.execute(request).await {
            Ok(response) if response.is_success() => {
                self.chain.on_success(request_id, response).await;
            }
            Ok(response) => {
                debug!(request_id = %request_id, status = response.status, "Request failed");
                self.chain
                    .on_error(request_id, ErrorOutcome::Response(response))
                    .await;
            }
            Err(cause) => {
                self.chain
                    .on_error(request_id, ErrorOutcome::Cause(cause))
                    .await;
            }
        }
    }

    fn post_error(self: &Arc<Self>, request_id: String, cause: FailureCause) {
        let inner = Arc::clone(self);
        let posted = self.request_context.post(async move {
            inner
                .chain
                .on_error(&request_id, ErrorOutcome::Cause(cause))
                .await;
        });
        if let Err(e) = posted {
            error!(error = %e, "Could not deliver persistence failure");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::tests::RecordingHandler;
    use crate::{
        CompositeRequestDescriptor, ConnectivityFlag, RefreshError, RefreshedCredential,
        RequestDescriptor, Response, ResponseOutcome, TokenRefresher,
    };
    use async_trait::async_trait;
    use courier_config_and_utils::Endpoints;
    use courier_database::Database;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex;
    use std::time::Duration;
    use tempfile::tempdir;

    type Script = Box<dyn Fn(&Request) -> ResponseOutcome + Send + Sync>;

    /// Records every request and answers from a script.
    struct FakeTransport {
        seen: Mutex<Vec<Request>>,
        script: Script,
    }

    impl FakeTransport {
        fn new(script: impl Fn(&Request) -> ResponseOutcome + Send + Sync + 'static) -> Self {
            Self {
                seen: Mutex::new(Vec::new()),
                script: Box::new(script),
            }
        }

        fn ok() -> Self {
            Self::new(|request| Ok(respond(request, 200)))
        }

        fn ids(&self) -> Vec<String> {
            self.seen
                .lock()
                .unwrap()
                .iter()
                .map(|request| request.id().to_string())
                .collect()
        }
    }

    #[async_trait]
    impl RestTransport for FakeTransport {
        async fn execute(&self, request: &Request) -> ResponseOutcome {
            self.seen.lock().unwrap().push(request.clone());
            (self.script)(request)
        }
    }

    struct FakeRefresher {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl TokenRefresher for FakeRefresher {
        async fn refresh(&self) -> Result<RefreshedCredential, RefreshError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(RefreshedCredential {
                headers: vec![("Authorization".into(), "T2".into())],
            })
        }
    }

    fn respond(request: &Request, status: u16) -> Response {
        Response {
            request: request.clone(),
            status,
            headers: vec![],
            body: vec![],
        }
    }

    fn endpoints() -> Endpoints {
        Endpoints::new("https://client.test/v3", "https://events.test/v3").unwrap()
    }

    fn request(id: &str) -> RequestDescriptor {
        RequestDescriptor::builder(format!("https://events.test/v3/apps/A/{id}"))
            .id(id)
            .build()
            .unwrap()
    }

    fn store() -> Arc<RequestStore> {
        Arc::new(RequestStore::new(Arc::new(
            Database::open_in_memory().unwrap(),
        )))
    }

    fn dispatcher_with(
        store: Arc<RequestStore>,
        transport: Arc<FakeTransport>,
        refresher: Option<Arc<dyn TokenRefresher>>,
        connectivity: Option<Arc<dyn ConnectivityProbe>>,
    ) -> Dispatcher {
        let mut builder = DeliveryContext::builder()
            .store(store)
            .transport(transport)
            .endpoints(endpoints());
        if let Some(refresher) = refresher {
            builder = builder.refresher(refresher);
        }
        if let Some(connectivity) = connectivity {
            builder = builder.connectivity(connectivity);
        }
        Dispatcher::new(builder.build().unwrap())
    }

    #[tokio::test]
    async fn test_transport_sees_requests_in_append_order() {
        let transport = Arc::new(FakeTransport::ok());
        let dispatcher = dispatcher_with(store(), transport.clone(), None, None);
        let handler = Arc::new(RecordingHandler::default());

        let ids = ["r1", "r2", "r3", "r4", "r5"];
        for id in ids {
            dispatcher.submit(request(id), Some(handler.clone())).unwrap();
        }
        dispatcher.flush().await.unwrap();

        assert_eq!(transport.ids(), ids);
        assert_eq!(handler.ids(), ids);
        assert_eq!(dispatcher.pending_count().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_exactly_one_terminal_call_per_request() {
        let transport = Arc::new(FakeTransport::new(|request| match request.id() {
            "ok" => Ok(respond(request, 201)),
            "bad" => Ok(respond(request, 500)),
            _ => Err(FailureCause::Transport("connection reset".into())),
        }));
        let dispatcher = dispatcher_with(store(), transport, None, None);
        let handler = Arc::new(RecordingHandler::default());

        for id in ["ok", "bad", "down"] {
            dispatcher.submit(request(id), Some(handler.clone())).unwrap();
        }
        dispatcher.flush().await.unwrap();

        let calls = handler.calls();
        assert_eq!(calls.len(), 3);
        assert_eq!(calls[0].1.as_ref().unwrap().status, 201);
        assert_eq!(calls[1].1.as_ref().unwrap_err().status(), Some(500));
        assert_eq!(
            calls[2].1.as_ref().unwrap_err().cause(),
            Some(&FailureCause::Transport("connection reset".into()))
        );
    }

    #[tokio::test]
    async fn test_expired_request_is_removed_without_transport_call() {
        let transport = Arc::new(FakeTransport::ok());
        let dispatcher = dispatcher_with(store(), transport.clone(), None, None);
        let handler = Arc::new(RecordingHandler::default());

        let stale = RequestDescriptor::builder("https://events.test/v3/e")
            .id("stale")
            .created_at(Utc::now() - chrono::Duration::seconds(60))
            .ttl(Duration::from_secs(1))
            .build()
            .unwrap();
        dispatcher.submit(stale, Some(handler.clone())).unwrap();
        dispatcher.flush().await.unwrap();

        assert!(transport.ids().is_empty());
        assert_eq!(
            handler.calls(),
            vec![(
                "stale".to_string(),
                Err(ErrorOutcome::Cause(FailureCause::Expired))
            )]
        );
        assert_eq!(dispatcher.pending_count().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_composite_success_fans_out() {
        let transport = Arc::new(FakeTransport::ok());
        let dispatcher = dispatcher_with(store(), transport.clone(), None, None);
        let default = Arc::new(RecordingHandler::default());
        dispatcher.register_completion_handler(default.clone());

        let composite = CompositeRequestDescriptor::new(
            request("batch-1"),
            vec!["a".into(), "b".into(), "c".into()],
        );
        dispatcher.submit(composite, None).unwrap();
        dispatcher.flush().await.unwrap();

        assert_eq!(transport.ids(), vec!["batch-1"]);
        let calls = default.calls();
        assert_eq!(default.ids(), vec!["a", "b", "c"]);
        let first = calls[0].1.clone().unwrap();
        assert!(calls.iter().all(|(_, result)| result == &Ok(first.clone())));
    }

    #[tokio::test]
    async fn test_401_refresh_and_replay_scenario() {
        let transport = Arc::new(FakeTransport::new(|request| {
            let status = match request.descriptor().header("Authorization") {
                Some("T2") => 200,
                _ => 401,
            };
            Ok(respond(request, status))
        }));
        let refresher = Arc::new(FakeRefresher {
            calls: AtomicUsize::new(0),
        });
        let dispatcher = dispatcher_with(
            store(),
            transport.clone(),
            Some(refresher.clone()),
            None,
        );
        let handler = Arc::new(RecordingHandler::default());

        let r1 = RequestDescriptor::builder("https://client.test/v3/apps/A/client/contact")
            .id("r1")
            .header("Authorization", "T1")
            .build()
            .unwrap();
        dispatcher.submit(r1, Some(handler.clone())).unwrap();
        dispatcher.flush().await.unwrap();

        assert_eq!(refresher.calls.load(Ordering::SeqCst), 1);
        let seen = transport.seen.lock().unwrap().clone();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0].descriptor().header("Authorization"), Some("T1"));
        assert_eq!(seen[1].descriptor().header("Authorization"), Some("T2"));

        let calls = handler.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].0, "r1");
        assert_eq!(calls[0].1.as_ref().unwrap().status, 200);
    }

    #[tokio::test]
    async fn test_replay_does_not_reorder_queue() {
        let transport = Arc::new(FakeTransport::new(|request| {
            let status = match (request.id(), request.descriptor().header("Authorization")) {
                ("r1", Some("T2")) | ("r2", _) => 200,
                _ => 401,
            };
            Ok(respond(request, status))
        }));
        let refresher = Arc::new(FakeRefresher {
            calls: AtomicUsize::new(0),
        });
        let dispatcher = dispatcher_with(store(), transport.clone(), Some(refresher), None);

        dispatcher.submit(request("r1"), None).unwrap();
        dispatcher.submit(request("r2"), None).unwrap();
        dispatcher.flush().await.unwrap();

        assert_eq!(transport.ids(), vec!["r1", "r1", "r2"]);
    }

    #[tokio::test]
    async fn test_persisted_entries_resume_after_restart() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("courier.sqlite");

        {
            let store = RequestStore::new(Arc::new(Database::open(&path).unwrap()));
            for id in ["r1", "r2", "r3"] {
                store.append(&request(id).into()).unwrap();
            }
        }

        let store = Arc::new(RequestStore::new(Arc::new(Database::open(&path).unwrap())));
        let transport = Arc::new(FakeTransport::ok());
        let dispatcher = dispatcher_with(store, transport.clone(), None, None);
        dispatcher.flush().await.unwrap();

        assert_eq!(transport.ids(), vec!["r1", "r2", "r3"]);
    }

    #[tokio::test]
    async fn test_offline_gate_holds_queue_until_connectivity_returns() {
        let flag = Arc::new(ConnectivityFlag::new(false));
        let transport = Arc::new(FakeTransport::ok());
        let dispatcher = dispatcher_with(store(), transport.clone(), None, Some(flag.clone()));

        dispatcher.submit(request("r1"), None).unwrap();
        assert!(matches!(
            dispatcher.flush().await,
            Err(OutboxError::Offline(1))
        ));
        assert!(transport.ids().is_empty());

        flag.set(true);
        dispatcher.connectivity_changed(true);
        dispatcher.flush().await.unwrap();

        assert_eq!(transport.ids(), vec!["r1"]);
    }

    #[tokio::test]
    async fn test_submit_now_bypasses_store() {
        let store = store();
        let transport = Arc::new(FakeTransport::ok());
        let dispatcher = dispatcher_with(store.clone(), transport.clone(), None, None);
        let handler = Arc::new(RecordingHandler::default());

        dispatcher
            .submit_now(request("now"), Some(handler.clone()))
            .unwrap();
        dispatcher.flush().await.unwrap();

        assert!(store.is_empty().unwrap());
        assert_eq!(transport.ids(), vec!["now"]);
        assert_eq!(handler.ids(), vec!["now"]);
    }

    #[tokio::test]
    async fn test_handler_may_submit_follow_up_requests() {
        let transport = Arc::new(FakeTransport::ok());
        let dispatcher = dispatcher_with(store(), transport.clone(), None, None);

        let follow_up = dispatcher.clone();
        let handler = Arc::new(crate::CallbackHandler::new(move |id: &str, _result: crate::CompletionResult| {
            if id == "first" {
                follow_up.submit(request("second"), None).unwrap();
            }
        }));
        dispatcher.submit(request("first"), Some(handler)).unwrap();
        dispatcher.flush().await.unwrap();

        assert_eq!(transport.ids(), vec!["first", "second"]);
    }

    #[tokio::test]
    async fn test_invalid_request_rejected_before_queueing() {
        let dispatcher = dispatcher_with(store(), Arc::new(FakeTransport::ok()), None, None);
        let mut bad = request("bad");
        bad.url = "not a url".into();

        assert!(matches!(
            dispatcher.submit(bad, None),
            Err(OutboxError::InvalidRequest(_))
        ));
        assert_eq!(dispatcher.pending_count().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_failed_append_delivers_persistence_error() {
        let db = Arc::new(Database::open_in_memory().unwrap());
        db.connection()
            .execute_batch(
                "CREATE TRIGGER reject_appends BEFORE INSERT ON request_queue
                 BEGIN SELECT RAISE(ABORT, 'disk full'); END;",
            )
            .unwrap();
        let transport = Arc::new(FakeTransport::ok());
        let dispatcher = dispatcher_with(
            Arc::new(RequestStore::new(db)),
            transport.clone(),
            None,
            None,
        );
        let handler = Arc::new(RecordingHandler::default());

        assert!(dispatcher
            .submit(request("r1"), Some(handler.clone()))
            .is_err());
        dispatcher.flush().await.unwrap();

        let calls = handler.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].0, "r1");
        assert!(matches!(
            calls[0].1,
            Err(ErrorOutcome::Cause(FailureCause::Persistence(_)))
        ));
        assert!(transport.ids().is_empty());
        assert_eq!(dispatcher.pending_count().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_composite_401_replay_fans_out_success() {
        let transport = Arc::new(FakeTransport::new(|request| {
            let status = match request.descriptor().header("Authorization") {
                Some("T2") => 200,
                _ => 401,
            };
            Ok(respond(request, status))
        }));
        let refresher = Arc::new(FakeRefresher {
            calls: AtomicUsize::new(0),
        });
        let dispatcher = dispatcher_with(
            store(),
            transport.clone(),
            Some(refresher.clone()),
            None,
        );
        let handler = Arc::new(RecordingHandler::default());

        let batch = RequestDescriptor::builder("https://events.test/v3/apps/A/batch")
            .id("batch-1")
            .header("Authorization", "T1")
            .build()
            .unwrap();
        let composite =
            CompositeRequestDescriptor::new(batch, vec!["a".into(), "b".into(), "c".into()]);
        dispatcher.submit(composite, Some(handler.clone())).unwrap();
        dispatcher.flush().await.unwrap();

        assert_eq!(refresher.calls.load(Ordering::SeqCst), 1);
        assert_eq!(transport.ids(), vec!["batch-1", "batch-1"]);
        assert_eq!(handler.ids(), vec!["a", "b", "c"]);
        assert!(handler
            .calls()
            .iter()
            .all(|(_, result)| result.as_ref().map(|response| response.status) == Ok(200)));
        assert_eq!(dispatcher.pending_count().unwrap(), 0);
    }
}
