//! Rest Transport capability.
//!
//! `execute` resolves once the call has completed; the dispatcher awaits it
//! on its serial context, so from the queue's point of view each call blocks
//! until it has an outcome.

use crate::{
    FailureCause, OutboxResult, Request, RequestMapper, RequestMethod, Response, ResponseHandler,
    ResponseOutcome,
};
use async_trait::async_trait;
use reqwest::Client;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

#[async_trait]
pub trait RestTransport: Send + Sync {
    async fn execute(&self, request: &Request) -> ResponseOutcome;
}

/// HTTP transport backed by reqwest.
pub struct ReqwestTransport {
    client: Client,
}

impl ReqwestTransport {
    pub fn new(timeout: Duration) -> OutboxResult<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl RestTransport for ReqwestTransport {
    async fn execute(&self, request: &Request) -> ResponseOutcome {
        let descriptor = request.descriptor();
        let method = match descriptor.method {
            RequestMethod::Get => reqwest::Method::GET,
            RequestMethod::Post => reqwest::Method::POST,
            RequestMethod::Put => reqwest::Method::PUT,
            RequestMethod::Delete => reqwest::Method::DELETE,
        };

        let mut builder = self.client.request(method, &descriptor.url);
        for (name, value) in &descriptor.headers {
            builder = builder.header(name, value);
        }
        if !descriptor.body.is_empty() {
            builder = builder.body(descriptor.body.clone());
        }

        let response = builder
            .send()
            .await
            .map_err(|e| FailureCause::Transport(e.to_string()))?;

        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|value| (name.as_str().to_string(), value.to_string()))
            })
            .collect();
        let body = response
            .bytes()
            .await
            .map_err(|e| FailureCause::Transport(e.to_string()))?
            .to_vec();

        debug!(request_id = %descriptor.id, status, "HTTP call completed");

        Ok(Response {
            request: request.clone(),
            status,
            headers,
            body,
        })
    }
}

/// Wraps a transport with the request mappers and response handlers.
///
/// Mappers run in order on a copy of the request before each attempt; every
/// response, successful or not, is offered to the handlers in order.
pub struct MappedTransport {
    inner: Arc<dyn RestTransport>,
    mappers: Vec<Arc<dyn RequestMapper>>,
    response_handlers: Vec<Arc<dyn ResponseHandler>>,
}

impl MappedTransport {
    pub fn new(
        inner: Arc<dyn RestTransport>,
        mappers: Vec<Arc<dyn RequestMapper>>,
        response_handlers: Vec<Arc<dyn ResponseHandler>>,
    ) -> Self {
        Self {
            inner,
            mappers,
            response_handlers,
        }
    }
}

#[async_trait]
impl RestTransport for MappedTransport {
    async fn execute(&self, request: &Request) -> ResponseOutcome {
        let mut mapped = request.clone();
        for mapper in &self.mappers {
            mapper.map(&mut mapped);
        }

        let outcome = self.inner.execute(&mapped).await;
        match &outcome {
            Ok(response) => {
                for handler in &self.response_handlers {
                    handler.handle(response);
                }
            }
            Err(cause) => {
                warn!(request_id = %request.id(), error = %cause, "Transport attempt failed");
            }
        }
        outcome
    }
}
