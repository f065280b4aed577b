//! Explicit collaborator bundle the dispatcher is built from.

use crate::{
    AlwaysConnected, AuthHeaderMapper, ClientStateResponseHandler, ConnectivityProbe,
    ContactTokenRefresher, ContactTokenResponseHandler, OutboxError, OutboxResult, RequestMapper,
    RequestStore, ResponseHandler, RestTransport, TokenRefresher,
};
use courier_config_and_utils::{Config, Endpoints};
use courier_database::Database;
use courier_storage::Credentials;
use std::sync::Arc;

/// Everything a [`crate::Dispatcher`] needs, constructed once by the
/// embedding application.
pub struct DeliveryContext {
    pub store: Arc<RequestStore>,
    pub transport: Arc<dyn RestTransport>,
    pub endpoints: Endpoints,
    /// Without a refresher 401s are delivered as ordinary errors.
    pub refresher: Option<Arc<dyn TokenRefresher>>,
    pub request_mappers: Vec<Arc<dyn RequestMapper>>,
    pub response_handlers: Vec<Arc<dyn ResponseHandler>>,
    pub connectivity: Arc<dyn ConnectivityProbe>,
}

impl DeliveryContext {
    pub fn builder() -> DeliveryContextBuilder {
        DeliveryContextBuilder::default()
    }

    /// Standard wiring over one database: credentials in its key/value table,
    /// auth header stamping, response token capture and contact-token refresh.
    pub fn standard(
        db: Arc<Database>,
        transport: Arc<dyn RestTransport>,
        config: &Config,
    ) -> OutboxResult<Self> {
        let endpoints = config.endpoints()?;
        let credentials = Arc::new(Credentials::new(db.clone()));

        Self::builder()
            .store(Arc::new(RequestStore::new(db)))
            .transport(transport.clone())
            .endpoints(endpoints.clone())
            .refresher(Arc::new(ContactTokenRefresher::new(
                transport,
                credentials.clone(),
                endpoints.clone(),
            )))
            .request_mapper(Arc::new(AuthHeaderMapper::new(
                credentials.clone(),
                endpoints.clone(),
            )))
            .response_handler(Arc::new(ClientStateResponseHandler::new(
                credentials.clone(),
                endpoints.clone(),
            )))
            .response_handler(Arc::new(ContactTokenResponseHandler::new(
                credentials,
                endpoints,
            )))
            .build()
    }
}

/// Builder for [`DeliveryContext`]. Store, transport and endpoints are
/// required.
#[derive(Default)]
pub struct DeliveryContextBuilder {
    store: Option<Arc<RequestStore>>,
    transport: Option<Arc<dyn RestTransport>>,
    endpoints: Option<Endpoints>,
    refresher: Option<Arc<dyn TokenRefresher>>,
    request_mappers: Vec<Arc<dyn RequestMapper>>,
    response_handlers: Vec<Arc<dyn ResponseHandler>>,
    connectivity: Option<Arc<dyn ConnectivityProbe>>,
}

impl DeliveryContextBuilder {
    pub fn store(mut self, store: Arc<RequestStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn transport(mut self, transport: Arc<dyn RestTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn endpoints(mut self, endpoints: Endpoints) -> Self {
        self.endpoints = Some(endpoints);
        self
    }

    pub fn refresher(mut self, refresher: Arc<dyn TokenRefresher>) -> Self {
        self.refresher = Some(refresher);
        self
    }

    pub fn request_mapper(mut self, mapper: Arc<dyn RequestMapper>) -> Self {
        self.request_mappers.push(mapper);
        self
    }

    pub fn response_handler(mut self, handler: Arc<dyn ResponseHandler>) -> Self {
        self.response_handlers.push(handler);
        self
    }

    pub fn connectivity(mut self, connectivity: Arc<dyn ConnectivityProbe>) -> Self {
        self.connectivity = Some(connectivity);
        self
    }

    pub fn build(self) -> OutboxResult<DeliveryContext> {
        let missing = |what: &str| OutboxError::InvalidConfiguration(format!("{what} is required"));

        Ok(DeliveryContext {
            store: self.store.ok_or_else(|| missing("request store"))?,
            transport: self.transport.ok_or_else(|| missing("rest transport"))?,
            endpoints: self.endpoints.ok_or_else(|| missing("endpoints"))?,
            refresher: self.refresher,
            request_mappers: self.request_mappers,
            response_handlers: self.response_handlers,
            connectivity: self
                .connectivity
                .unwrap_or_else(|| Arc::new(AlwaysConnected)),
        })
    }
}
