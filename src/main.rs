//! Scouter Service - Main Entry Point
//!
//! Wires the broker consumer, the fan-out and sink workers, and the platform
//! client, then runs until interrupted.

use std::sync::Arc;

use anyhow::Result;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use scouter::bluesky::{
    AuthClient, BlueskyClient, RedisSessionStore, SessionStore, SingleFlightRefresher,
};
use scouter::broker::{ConnectionManager, Consumer, RedisRetryLedger, RetryPolicy};
use scouter::listeners::{BlueskySocialListener, SocialListener};
use scouter::pipeline::{self, ListenerWorker, LoggingResultHandler, SinkWorker};
use scouter::types::{AppConfig, ListeningTask};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "scouter=info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    dotenvy::dotenv().ok();
    let config = AppConfig::from_env();

    info!("Starting Scouter Service v{}", env!("CARGO_PKG_VERSION"));
    info!(
        queue = %config.broker.task_queue,
        max_retry_attempts = config.broker.max_retry_attempts,
        max_concurrent_tasks = config.max_concurrent_tasks,
        "configuration loaded"
    );

    // External store (retry ledger + session store)
    let redis_client = redis::Client::open(config.redis_url.clone())?;
    let redis_conn = redis_client.get_connection_manager().await?;

    // Broker connection shared by every channel
    let connection = Arc::new(ConnectionManager::connect(&config.broker.uri).await?);

    // Platform session and credential guard
    let session_store: Arc<dyn SessionStore> = Arc::new(RedisSessionStore::new(redis_conn.clone()));
    let auth_client = Arc::new(AuthClient::new(&config.bluesky.base_url));

    bootstrap_session(&config, &auth_client, session_store.as_ref()).await?;

    let refresher = Arc::new(SingleFlightRefresher::new(
        auth_client,
        Arc::clone(&session_store),
    ));
    let bluesky_client = Arc::new(BlueskyClient::new(
        &config.bluesky.base_url,
        Arc::clone(&session_store),
        refresher,
    ));

    // Listeners are registered explicitly; the fan-out worker runs them all
    // concurrently per task.
    let listeners: Vec<Arc<dyn SocialListener>> =
        vec![Arc::new(BlueskySocialListener::new(bluesky_client))];

    // Pipeline channels
    let (task_tx, task_rx) = pipeline::task_channel();
    let (result_tx, result_rx) = pipeline::result_channel(config.result_buffer);

    // Broker consumer with the Redis-backed retry ledger
    let ledger = Arc::new(RedisRetryLedger::new(redis_conn));
    let policy = RetryPolicy::new(ledger, config.broker.max_retry_attempts);
    let consumer: Consumer<ListeningTask> =
        Consumer::new(Arc::clone(&connection), config.broker.clone(), policy, task_tx);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let consumer_handle = tokio::spawn({
        let shutdown = shutdown_rx.clone();
        async move {
            if let Err(e) = consumer.run(shutdown).await {
                error!(error = %e, "consumer exited with error");
            }
        }
    });

    let worker = ListenerWorker::new(listeners, task_rx, result_tx, config.max_concurrent_tasks);
    let worker_handle = tokio::spawn(worker.run(shutdown_rx.clone()));

    let sink = SinkWorker::new(result_rx, Arc::new(LoggingResultHandler));
    let sink_handle = tokio::spawn(sink.run(shutdown_rx));

    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received");
    let _ = shutdown_tx.send(true);

    let _ = tokio::join!(consumer_handle, worker_handle, sink_handle);

    connection.close().await?;
    info!("Scouter Service stopped");

    Ok(())
}

/// Seed the session store from configured credentials when no session exists
/// yet; searches fail until a session is available.
async fn bootstrap_session(
    config: &AppConfig,
    auth_client: &AuthClient,
    session_store: &dyn SessionStore,
) -> Result<()> {
    if session_store.get_session().await?.is_some() {
        return Ok(());
    }

    match (&config.bluesky.identifier, &config.bluesky.password) {
        (Some(identifier), Some(password)) => {
            let session = auth_client.create_session(identifier, password).await?;
            session_store.save_session(&session).await?;
            info!("platform session bootstrapped");
        }
        _ => {
            warn!("no stored session and no credentials configured; searches will fail until a session is seeded");
        }
    }

    Ok(())
}
