//! Request mappers applied before every transport attempt.

use crate::Request;
use courier_config_and_utils::Endpoints;
use courier_storage::Credentials;
use std::sync::Arc;
use tracing::warn;

/// Header carrying the contact token.
pub const CONTACT_TOKEN_HEADER: &str = "X-Contact-Token";
/// Header carrying the opaque client state.
pub const CLIENT_STATE_HEADER: &str = "X-Client-State";

/// Rewrites an outgoing request in place.
pub trait RequestMapper: Send + Sync {
    fn map(&self, request: &mut Request);
}

/// Stamps the current contact credentials onto authenticated requests.
///
/// The refresh-token request is left untouched; it carries its own headers.
pub struct AuthHeaderMapper {
    credentials: Arc<Credentials>,
    endpoints: Endpoints,
}

impl AuthHeaderMapper {
    pub fn new(credentials: Arc<Credentials>, endpoints: Endpoints) -> Self {
        Self {
            credentials,
            endpoints,
        }
    }
}

impl RequestMapper for AuthHeaderMapper {
    fn map(&self, request: &mut Request) {
        if !self.endpoints.is_refresh_eligible(request.url()) {
            return;
        }

        let stamps = [
            (CONTACT_TOKEN_HEADER, self.credentials.contact_token()),
            (CLIENT_STATE_HEADER, self.credentials.client_state()),
        ];
        for (header, cache) in stamps {
            match cache.get() {
                Ok(Some(value)) => request.descriptor_mut().set_header(header, &value),
                Ok(None) => {}
                Err(e) => {
                    warn!(request_id = %request.id(), header, error = %e, "Credential unavailable")
                }
            }
        }
    }
}
