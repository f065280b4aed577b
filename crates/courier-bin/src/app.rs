//! Subcommand implementations.

use anyhow::Context;
use courier_config_and_utils::{Config, Paths};
use courier_database::Database;
use courier_outbox::{
    CallbackHandler, CompletionResult, DeliveryContext, Dispatcher, OutboxError,
    ReqwestTransport, RequestDescriptor, RequestMethod, RequestStore,
};
use courier_sessions::{IdentityContext, SessionCorrelator};
use courier_storage::Credentials;
use std::sync::Arc;
use tracing::{info, warn};

fn open_database(paths: &Paths) -> anyhow::Result<Arc<Database>> {
    let path = paths.database_file();
    let db = Database::open(&path)
        .with_context(|| format!("failed to open database at {}", path.display()))?;
    Ok(Arc::new(db))
}

fn identity_context(db: Arc<Database>) -> IdentityContext {
    let credentials = Arc::new(Credentials::new(db.clone()));
    let correlator = Arc::new(SessionCorrelator::new(db.clone()));
    IdentityContext::new(db, credentials, correlator)
}

fn dispatcher(config: &Config, paths: &Paths) -> anyhow::Result<Dispatcher> {
    let db = open_database(paths)?;
    let transport = Arc::new(ReqwestTransport::new(config.request_timeout())?);
    let context = DeliveryContext::standard(db, transport, config)?;
    let dispatcher = Dispatcher::new(context);
    dispatcher.register_completion_handler(Arc::new(CallbackHandler::new(report)));
    Ok(dispatcher)
}

fn report(request_id: &str, result: CompletionResult) {
    match result {
        Ok(response) => println!("{request_id}: delivered ({})", response.status),
        Err(outcome) => match outcome.status() {
            Some(status) => println!("{request_id}: rejected ({status})"),
            None => println!(
                "{request_id}: failed ({})",
                outcome
                    .cause()
                    .map(ToString::to_string)
                    .unwrap_or_default()
            ),
        },
    }
}

async fn flush(dispatcher: &Dispatcher) -> anyhow::Result<()> {
    match dispatcher.flush().await {
        Ok(()) => Ok(()),
        Err(OutboxError::Offline(pending)) => {
            warn!(pending, "Offline, requests left queued");
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}

pub fn status(paths: &Paths) -> anyhow::Result<()> {
    let db = open_database(paths)?;
    let store = RequestStore::new(db.clone());
    let identity = identity_context(db.clone());
    let session = SessionCorrelator::new(db).active_session()?;

    println!("Pending requests: {}", store.len()?);
    match identity.current_identity()? {
        Some(identity) => println!("Identity: {identity}"),
        None => println!("Identity: anonymous"),
    }
    match session {
        Some(session) => println!("Session: {} (since {})", session.id, session.started_at),
        None => println!("Session: none"),
    }
    Ok(())
}

pub async fn drain(config: &Config, paths: &Paths) -> anyhow::Result<()> {
    let dispatcher = dispatcher(config, paths)?;
    flush(&dispatcher).await?;
    info!(remaining = dispatcher.pending_count()?, "Drain finished");
    Ok(())
}

pub async fn enqueue(
    config: &Config,
    paths: &Paths,
    url: String,
    method: &str,
    body: Option<String>,
) -> anyhow::Result<()> {
    let mut builder = RequestDescriptor::builder(url)
        .method(RequestMethod::parse(method)?)
        .ttl(config.default_ttl());
    if let Some(body) = body {
        builder = builder
            .header("Content-Type", "application/json")
            .body(body);
    }
    let request = builder.build()?;
    let request_id = request.id.clone();

    let dispatcher = dispatcher(config, paths)?;
    let sequence = dispatcher.submit(request, None)?;
    info!(request_id = %request_id, sequence, "Request queued");

    flush(&dispatcher).await
}

pub fn login(paths: &Paths, identity: String) -> anyhow::Result<()> {
    let context = identity_context(open_database(paths)?);
    match context.set_identity(Some(identity))? {
        Some(transition) => {
            if let Some(ended) = transition.ended {
                println!("Ended session {}", ended.id);
            }
            if let Some(started) = transition.started {
                println!("Started session {}", started.id);
            }
        }
        None => println!("Already identified"),
    }
    Ok(())
}

pub fn logout(paths: &Paths) -> anyhow::Result<()> {
    let context = identity_context(open_database(paths)?);
    if let Some(ended) = context.clear()?.and_then(|transition| transition.ended) {
        println!("Ended session {}", ended.id);
    }
    Ok(())
}

pub fn purge(paths: &Paths) -> anyhow::Result<()> {
    let store = RequestStore::new(open_database(paths)?);
    println!("Dropped {} pending requests", store.clear()?);
    Ok(())
}
