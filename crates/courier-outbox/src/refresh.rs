//! Token refresh on 401 and the refresh-token proxy.
//!
//! A 401 from an authenticated endpoint is not surfaced. The first one starts
//! exactly one refresh; any that arrive while it is in flight queue behind it.
//! On success each affected request is replayed with the new credential, in
//! the order its 401 arrived, and the replay's outcome is forwarded under the
//! original request id. On failure every queued 401 is forwarded unchanged.

use crate::{
    CompletionHandler, ErrorOutcome, FailureCause, Request, RequestDescriptor, RequestMethod,
    Response, RestTransport, CLIENT_STATE_HEADER, CONTACT_TOKEN_HEADER,
};
use async_trait::async_trait;
use courier_config_and_utils::Endpoints;
use courier_storage::{Credentials, StorageError};
use serde_json::json;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use thiserror::Error;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

/// Credential header values to substitute into a replayed request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefreshedCredential {
    pub headers: Vec<(String, String)>,
}

#[derive(Error, Debug)]
pub enum RefreshError {
    #[error("no refresh token stored")]
    MissingRefreshToken,

    #[error("refresh rejected with status {0}")]
    Rejected(u16),

    #[error("refresh response has no contact token: {0}")]
    InvalidBody(String),

    #[error("refresh transport failure: {0}")]
    Transport(#[from] FailureCause),

    #[error("refresh request could not be built: {0}")]
    Request(String),

    #[error("credential storage failure: {0}")]
    Storage(#[from] StorageError),
}

/// Obtains a new credential.
#[async_trait]
pub trait TokenRefresher: Send + Sync {
    async fn refresh(&self) -> Result<RefreshedCredential, RefreshError>;
}

/// Exchanges the stored refresh token for a new contact token.
///
/// `POST <client>/contact-token` with `{"refreshToken": ...}`; a 2xx body of
/// `{"contactToken": ...}` is persisted and returned as `X-Contact-Token`.
pub struct ContactTokenRefresher {
    transport: Arc<dyn RestTransport>,
    credentials: Arc<Credentials>,
    endpoints: Endpoints,
}

impl ContactTokenRefresher {
    pub fn new(
        transport: Arc<dyn RestTransport>,
        credentials: Arc<Credentials>,
        endpoints: Endpoints,
    ) -> Self {
        Self {
            transport,
            credentials,
            endpoints,
        }
    }

    fn build_request(&self, refresh_token: &str) -> Result<Request, RefreshError> {
        let mut builder = RequestDescriptor::builder(self.endpoints.refresh_token_url())
            .method(RequestMethod::Post)
            .json_body(&json!({ "refreshToken": refresh_token }))
            .map_err(|e| RefreshError::Request(e.to_string()))?;
        if let Some(state) = self.credentials.client_state().get()? {
            builder = builder.header(CLIENT_STATE_HEADER, state);
        }
        let descriptor = builder
            .build()
            .map_err(|e| RefreshError::Request(e.to_string()))?;
        Ok(descriptor.into())
    }
}

#[async_trait]
impl TokenRefresher for ContactTokenRefresher {
    async fn refresh(&self) -> Result<RefreshedCredential, RefreshError> {
        let refresh_token = self
            .credentials
            .refresh_token()
            .get()?
            .ok_or(RefreshError::MissingRefreshToken)?;

        let request = self.build_request(&refresh_token)?;
        let response = self.transport.execute(&request).await?;
        if !response.is_success() {
            return Err(RefreshError::Rejected(response.status));
        }

        let contact_token = response
            .body_json()
            .ok()
            .and_then(|body| body.get("contactToken")?.as_str().map(str::to_string))
            .ok_or_else(|| {
                RefreshError::InvalidBody(String::from_utf8_lossy(&response.body).into_owned())
            })?;

        self.credentials.contact_token().set(contact_token.clone())?;
        info!("Contact token refreshed");

        Ok(RefreshedCredential {
            headers: vec![(CONTACT_TOKEN_HEADER.to_string(), contact_token)],
        })
    }
}

struct Waiter {
    request_id: String,
    response: Response,
    done: oneshot::Sender<()>,
}

#[derive(Default)]
struct RefreshState {
    in_flight: bool,
    waiters: VecDeque<Waiter>,
}

/// Completion handler layer implementing refresh-and-replay.
pub struct RefreshTokenProxy {
    inner: Arc<dyn CompletionHandler>,
    transport: Arc<dyn RestTransport>,
    refresher: Arc<dyn TokenRefresher>,
    endpoints: Endpoints,
    state: Mutex<RefreshState>,
}

impl RefreshTokenProxy {
    pub fn new(
        inner: Arc<dyn CompletionHandler>,
        transport: Arc<dyn RestTransport>,
        refresher: Arc<dyn TokenRefresher>,
        endpoints: Endpoints,
    ) -> Self {
        Self {
            inner,
            transport,
            refresher,
            endpoints,
            state: Mutex::new(RefreshState::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, RefreshState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn needs_refresh(&self, error: &ErrorOutcome) -> bool {
        match error {
            ErrorOutcome::Response(response) => {
                response.status == 401 && self.endpoints.is_refresh_eligible(response.request.url())
            }
            ErrorOutcome::Cause(_) => false,
        }
    }

    async fn handle_unauthorized(&self, request_id: &str, response: Response) {
        let queued = {
            let mut state = self.lock();
            if state.in_flight {
                let (done, done_rx) = oneshot::channel();
                state.waiters.push_back(Waiter {
                    request_id: request_id.to_string(),
                    response,
                    done,
                });
                debug!(request_id = %request_id, "401 queued behind in-flight refresh");
                Err(done_rx)
            } else {
                state.in_flight = true;
                Ok(response)
            }
        };

        let response = match queued {
            Ok(response) => response,
            Err(done_rx) => {
                // The refresh initiator delivers our outcome before signalling.
                let _ = done_rx.await;
                return;
            }
        };

        info!(request_id = %request_id, "401 on authenticated endpoint, refreshing token");
        let credential = match self.refresher.refresh().await {
            Ok(credential) => Some(credential),
            Err(e) => {
                warn!(request_id = %request_id, error = %e, "Token refresh failed");
                None
            }
        };

        self.resolve(request_id, response, credential.as_ref()).await;

        loop {
            let next = {
                let mut state = self.lock();
                let next = state.waiters.pop_front();
                if next.is_none() {
                    state.in_flight = false;
                }
                next
            };
            let Some(waiter) = next else {
                break;
            };
            self.resolve(&waiter.request_id, waiter.response, credential.as_ref())
                .await;
            let _ = waiter.done.send(());
        }
    }

    /// Replay with `credential`, or forward the original 401 when the
    /// refresh failed.
    async fn resolve(
        &self,
        request_id: &str,
        response: Response,
        credential: Option<&RefreshedCredential>,
    ) {
        let Some(credential) = credential else {
            self.inner
                .on_error(request_id, ErrorOutcome::Response(response))
                .await;
            return;
        };

        let mut request = response.request;
        for (name, value) in &credential.headers {
            request.descriptor_mut().set_header(name, value);
        }

        debug!(request_id = %request_id, "Replaying request with refreshed credential");
        // A second 401 here is terminal; only the first one triggers a refresh.
        match self.transport.execute(&request).await {
            Ok(replayed) if replayed.is_success() => {
                self.inner.on_success(request_id, replayed).await
            }
            Ok(replayed) => {
                self.inner
                    .on_error(request_id, ErrorOutcome::Response(replayed))
                    .await
            }
            Err(cause) => {
                self.inner
                    .on_error(request_id, ErrorOutcome::Cause(cause))
                    .await
            }
        }
    }
}

#[async_trait]
impl CompletionHandler for RefreshTokenProxy {
    async fn on_success(&self, request_id: &str, response: Response) {
        self.inner.on_success(request_id, response).await;
    }

    async fn on_error(&self, request_id: &str, error: ErrorOutcome) {
        if !self.needs_refresh(&error) {
            self.inner.on_error(request_id, error).await;
            return;
        }
        if let ErrorOutcome::Response(response) = error {
            self.handle_unauthorized(request_id, response).await;
        }
    }
}
