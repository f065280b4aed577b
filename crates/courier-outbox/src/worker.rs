//! Serial execution contexts and the worker proxy.
//!
//! A [`SerialContext`] is one tokio task consuming a channel of jobs; jobs run
//! strictly one after another in submission order.

use crate::{CompletionHandler, ErrorOutcome, OutboxError, OutboxResult, Response};
use async_trait::async_trait;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error};

type Job = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// Handle to a single logical worker.
#[derive(Clone)]
pub struct SerialContext {
    name: Arc<str>,
    tx: mpsc::UnboundedSender<Job>,
}

impl SerialContext {
    /// Spawn the worker task on the current tokio runtime.
    pub fn spawn(name: &str) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<Job>();
        let name: Arc<str> = Arc::from(name);

        let task_name = name.clone();
        tokio::spawn(async move {
            while let Some(job) = rx.recv().await {
                job.await;
            }
            debug!(context = %task_name, "Serial context stopped");
        });

        Self { name, tx }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Queue `job` behind everything already posted.
    pub fn post<F>(&self, job: F) -> OutboxResult<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.tx
            .send(Box::pin(job))
            .map_err(|_| OutboxError::ContextClosed(self.name.to_string()))
    }

    /// Run `job` on this context and wait for its result.
    ///
    /// Must not be awaited from a job already running on the same context.
    pub async fn run<F, T>(&self, job: F) -> OutboxResult<T>
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let (done_tx, done_rx) = oneshot::channel();
        self.post(async move {
            let _ = done_tx.send(job.await);
        })?;
        done_rx
            .await
            .map_err(|_| OutboxError::ContextClosed(self.name.to_string()))
    }
}

/// Re-dispatches every call of the wrapped handler onto a serial context and
/// waits for it to finish there.
///
/// Handler code therefore never runs concurrently with itself, and the caller
/// resumes only after the wrapped chain has completed.
pub struct WorkerProxy {
    inner: Arc<dyn CompletionHandler>,
    context: SerialContext,
}

impl WorkerProxy {
    pub fn new(inner: Arc<dyn CompletionHandler>, context: SerialContext) -> Self {
        Self { inner, context }
    }
}

#[async_trait]
impl CompletionHandler for WorkerProxy {
    async fn on_success(&self, request_id: &str, response: Response) {
        let inner = self.inner.clone();
        let id = request_id.to_string();
        let result = self
            .context
            .run(async move { inner.on_success(&id, response).await })
            .await;
        if let Err(e) = result {
            error!(request_id = %request_id, error = %e, "Completion dropped");
        }
    }

    async fn on_error(&self, request_id: &str, outcome: ErrorOutcome) {
        let inner = self.inner.clone();
        let id = request_id.to_string();
        let result = self
            .context
            .run(async move { inner.on_error(&id, outcome).await })
            .await;
        if let Err(e) = result {
            error!(request_id = %request_id, error = %e, "Completion dropped");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::tests::RecordingHandler;
    use crate::{FailureCause, RequestDescriptor};
    use std::sync::Mutex;
    use std::time::Duration;

    #[tokio::test]
    async fn test_jobs_run_in_post_order() {
        let context = SerialContext::spawn("test");
        let order = Arc::new(Mutex::new(Vec::new()));

        for i in 0..5u64 {
            let order = order.clone();
            context
                .post(async move {
                    // Later jobs sleep less; order must still hold.
                    tokio::time::sleep(Duration::from_millis(10 - i * 2)).await;
                    order.lock().unwrap().push(i);
                })
                .unwrap();
        }

        context.run(async {}).await.unwrap();
        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn test_run_returns_value() {
        let context = SerialContext::spawn("test");
        assert_eq!(context.run(async { 41 + 1 }).await.unwrap(), 42);
        assert_eq!(context.name(), "test");
    }

    #[tokio::test]
    async fn test_worker_proxy_completes_before_returning() {
        let recorder = Arc::new(RecordingHandler::default());
        let proxy = WorkerProxy::new(recorder.clone(), SerialContext::spawn("completion"));

        proxy
            .on_error("r1", ErrorOutcome::Cause(FailureCause::Expired))
            .await;

        assert_eq!(recorder.ids(), vec!["r1"]);

        let request = RequestDescriptor::builder("https://events.test/v3/e")
            .id("r2")
            .build()
            .unwrap()
            .into();
        proxy
            .on_success(
                "r2",
                Response {
                    request,
                    status: 200,
                    headers: vec![],
                    body: vec![],
                },
            )
            .await;
        assert_eq!(recorder.ids(), vec!["r1", "r2"]);
    }
}
