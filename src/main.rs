//! Headless participant client wiring the sync core to a live document
//! store: resolves identity, optionally enters the classroom, and logs
//! screen-state transitions until interrupted.

use std::{env, sync::Arc};

use anyhow::Context;
use futures::StreamExt;
use tokio_stream::wrappers::WatchStream;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use pawlive_client::{
    config::AppConfig,
    services::{
        self,
        entry::EnterRequest,
        identity::AnonymousIdentity,
    },
    state::{LocalStore, SessionState, SharedSession, subscriptions},
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let config = AppConfig::load();
    let classroom_id =
        env::var("PAWLIVE_CLASSROOM").context("PAWLIVE_CLASSROOM must be set to a classroom id")?;

    let store = connect_store(&config).await?;
    let local = LocalStore::from_env();
    let session = SessionState::new(store, classroom_id, local.clone(), config.message_window());
    let provider = Arc::new(AnonymousIdentity::new(local));

    let driver = subscriptions::spawn(session.clone(), provider.clone());
    tokio::spawn(log_screen_transitions(session.clone()));

    // Headless runs can pass the gate straight from the environment.
    if !session.is_entered()
        && let Ok(full_name) = env::var("PAWLIVE_NAME")
    {
        match services::entry::enter(&session, provider.as_ref(), EnterRequest { full_name }).await
        {
            Ok(()) => {}
            Err(err) => error!(error = %err, "classroom entry failed"),
        }
    }

    shutdown_signal().await;
    info!("shutting down");
    session.shutdown();
    let _ = driver.await;

    Ok(())
}

/// Connect to the configured CouchDB store, retrying with capped exponential
/// backoff until it answers.
#[cfg(feature = "couch-store")]
async fn connect_store(
    config: &AppConfig,
) -> anyhow::Result<Arc<dyn pawlive_client::dao::document_store::DocumentStore>> {
    use pawlive_client::dao::document_store::couchdb::{CouchConfig, CouchStore};
    use tokio::time::sleep;
    use tracing::warn;

    let couch = CouchConfig::from_env().context("reading CouchDB environment")?;
    let mut delay = config.connect_retry_initial();

    loop {
        match CouchStore::connect(couch.clone()).await {
            Ok(store) => {
                info!("connected to document store");
                return Ok(Arc::new(store));
            }
            Err(err) => {
                warn!(error = %err, "store connection attempt failed");
                sleep(delay).await;
                delay = (delay * 2).min(config.connect_retry_max());
            }
        }
    }
}

/// Without a remote backend the client runs against a process-local store,
/// useful only for poking at the derivation logic.
#[cfg(not(feature = "couch-store"))]
async fn connect_store(
    _config: &AppConfig,
) -> anyhow::Result<Arc<dyn pawlive_client::dao::document_store::DocumentStore>> {
    use pawlive_client::dao::document_store::memory::MemoryStore;

    tracing::warn!("built without couch-store; using an in-memory document store");
    Ok(Arc::new(MemoryStore::new()))
}

/// Log every derived screen transition.
async fn log_screen_transitions(session: SharedSession) {
    let mut screens = WatchStream::new(session.screen_watcher());
    while let Some(screen) = screens.next().await {
        info!(screen = ?screen, "screen state");
    }
}

/// Configure tracing subscribers so logs include spans by default.
fn init_tracing() {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info".into());
    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Wait for Ctrl+C or SIGTERM and shut the client down gracefully.
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        let mut term = signal(SignalKind::terminate()).expect("install SIGTERM handler");
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {},
            _ = term.recv() => {},
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
