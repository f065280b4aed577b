//! Response handlers offered every transport response.

use crate::{Response, CLIENT_STATE_HEADER};
use courier_config_and_utils::Endpoints;
use courier_storage::Credentials;
use std::sync::Arc;
use tracing::{debug, warn};

/// Observes a response before it enters the completion chain.
pub trait ResponseHandler: Send + Sync {
    fn handle(&self, response: &Response);
}

/// Persists an `X-Client-State` header returned by an authenticated service.
pub struct ClientStateResponseHandler {
    credentials: Arc<Credentials>,
    endpoints: Endpoints,
}

impl ClientStateResponseHandler {
    pub fn new(credentials: Arc<Credentials>, endpoints: Endpoints) -> Self {
        Self {
            credentials,
            endpoints,
        }
    }
}

impl ResponseHandler for ClientStateResponseHandler {
    fn handle(&self, response: &Response) {
        if !self.endpoints.is_authenticated_url(response.request.url()) {
            return;
        }
        if let Some(state) = response.header(CLIENT_STATE_HEADER) {
            match self.credentials.client_state().set(state.to_string()) {
                Ok(()) => debug!(request_id = %response.request_id(), "Client state updated"),
                Err(e) => warn!(error = %e, "Failed to persist client state"),
            }
        }
    }
}

/// Persists `contactToken` / `refreshToken` fields of successful JSON bodies.
pub struct ContactTokenResponseHandler {
    credentials: Arc<Credentials>,
    endpoints: Endpoints,
}

impl ContactTokenResponseHandler {
    pub fn new(credentials: Arc<Credentials>, endpoints: Endpoints) -> Self {
        Self {
            credentials,
            endpoints,
        }
    }
}

impl ResponseHandler for ContactTokenResponseHandler {
    fn handle(&self, response: &Response) {
        if !response.is_success() || !self.endpoints.is_authenticated_url(response.request.url())
        {
            return;
        }
        let Ok(body) = response.body_json() else {
            return;
        };

        let fields = [
            ("contactToken", self.credentials.contact_token()),
            ("refreshToken", self.credentials.refresh_token()),
        ];
        for (field, cache) in fields {
            if let Some(value) = body.get(field).and_then(|v| v.as_str()) {
                if let Err(e) = cache.set(value.to_string()) {
                    warn!(field, error = %e, "Failed to persist token");
                }
            }
        }
    }
}
