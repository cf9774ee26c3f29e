//! Background eviction worker.

use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};

use crate::eviction::{Eviction, NodeCleaner};
use crate::observability::metrics;

/// Drains the eviction queue and asks the store to drop expired nodes.
pub struct EvictionWorker {
    rx: mpsc::Receiver<Eviction>,
    cleaner: Arc<dyn NodeCleaner>,
}

impl EvictionWorker {
    pub fn new(rx: mpsc::Receiver<Eviction>, cleaner: Arc<dyn NodeCleaner>) -> Self {
        Self { rx, cleaner }
    }

    pub async fn run(mut self, mut shutdown: broadcast::Receiver<()>) {
        tracing::info!("Eviction worker starting");

        loop {
            tokio::select! {
                eviction = self.rx.recv() => match eviction {
                    Some(eviction) => self.evict(eviction).await,
                    None => break,
                },
                _ = shutdown.recv() => {
                    tracing::info!("Eviction worker received shutdown signal, exiting loop");
                    break;
                }
            }
        }
    }

    async fn evict(&self, eviction: Eviction) {
        let count = eviction.nodes.len();
        match self.cleaner.clean(&eviction.service_id, &eviction.nodes).await {
            Ok(()) => {
                tracing::info!(service_id = %eviction.service_id, nodes = count, "Evicted expired nodes");
                metrics::record_eviction(count);
            }
            Err(e) => {
                tracing::error!(
                    service_id = %eviction.service_id,
                    nodes = count,
                    error = %e,
                    "Failed to evict expired nodes"
                );
                metrics::record_eviction_failure();
            }
        }
    }
}
