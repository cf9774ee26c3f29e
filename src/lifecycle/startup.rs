//! Startup orchestration.

use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;

use crate::api::AppState;
use crate::config::RegistryConfig;
use crate::eviction::{EvictionWorker, Evictor};
use crate::http::HttpServer;
use crate::lifecycle::signals::spawn_signal_handler;
use crate::lifecycle::Shutdown;
use crate::observability::{logging, metrics};
use crate::registry::Registry;
use crate::storage::{self, Storage};

const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Bring every subsystem up in order and serve until a termination signal.
pub async fn run(config: RegistryConfig) -> Result<(), Box<dyn std::error::Error>> {
    logging::init_logging(&config.observability);
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "service-center starting");

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(e) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                error = %e,
                "Failed to parse metrics address"
            ),
        }
    }

    let backend = storage::build_backend(&config.storage)?;
    let (evictor, eviction_rx) = Evictor::new(config.eviction.queue_capacity);
    let registry = Arc::new(Registry::new(evictor));
    let storage = Arc::new(Storage::new(backend, registry.clone(), &config.storage));

    let summary = storage.load_all().await?;
    tracing::info!(
        services = summary.services,
        nodes = summary.nodes,
        key_prefix = %config.storage.key_prefix,
        "Initial load complete"
    );

    let shutdown = Shutdown::new();
    spawn_signal_handler(shutdown.clone());

    let worker = EvictionWorker::new(eviction_rx, storage.clone());
    let eviction_task = tokio::spawn(worker.run(shutdown.subscribe()));

    let watch_task = {
        let storage = storage.clone();
        let retry = config.watch.clone();
        let rx = shutdown.subscribe();
        tokio::spawn(async move { storage.watch(&retry, rx).await })
    };

    let listener = TcpListener::bind(&config.api.bind_address).await?;
    let state = AppState::new(registry, storage, config.api.clone());
    HttpServer::new(state).run(listener, shutdown.subscribe()).await?;

    // The server also stops if the listener fails; make sure the rest follows
    shutdown.trigger();
    for (name, task) in [("eviction", eviction_task), ("watch", watch_task)] {
        if tokio::time::timeout(DRAIN_TIMEOUT, task).await.is_err() {
            tracing::warn!(task = name, "Background task did not stop in time");
        }
    }

    tracing::info!("Shutdown complete");
    Ok(())
}
