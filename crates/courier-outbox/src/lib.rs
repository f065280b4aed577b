//! Durable request delivery for the Courier engine.
//!
//! This crate provides:
//! - RequestStore: append-only SQLite-backed queue with an append hook
//! - Dispatcher: serial drain loop over the store, plus `submit_now`
//! - The completion handler chain: HandlerRegistry, RefreshTokenProxy,
//!   WorkerProxy
//! - RestTransport with a reqwest implementation, request mappers and
//!   response handlers

mod connectivity;
mod context;
mod dispatcher;
mod error;
mod handler;
mod mapper;
mod model;
mod refresh;
mod response;
mod store;
mod transport;
mod worker;

pub use connectivity::{AlwaysConnected, ConnectivityFlag, ConnectivityProbe};
pub use context::{DeliveryContext, DeliveryContextBuilder};
pub use dispatcher::Dispatcher;
pub use error::{OutboxError, OutboxResult};
pub use handler::{CallbackHandler, CompletionHandler, CompletionResult, HandlerRegistry};
pub use mapper::{AuthHeaderMapper, RequestMapper, CLIENT_STATE_HEADER, CONTACT_TOKEN_HEADER};
pub use model::{
    CompositeRequestDescriptor, ErrorOutcome, FailureCause, Headers, Priority, Request,
    RequestBuilder, RequestDescriptor, RequestMethod, Response, ResponseOutcome,
};
pub use refresh::{
    ContactTokenRefresher, RefreshError, RefreshTokenProxy, RefreshedCredential, TokenRefresher,
};
pub use response::{ClientStateResponseHandler, ContactTokenResponseHandler, ResponseHandler};
pub use store::{AppendHook, CorruptionObserver, QueueEntry, RequestStore};
pub use transport::{MappedTransport, ReqwestTransport, RestTransport};
pub use worker::{SerialContext, WorkerProxy};
