//! Expired node eviction.
//!
//! # Data Flow
//! ```text
//! Cluster::select() finds expired nodes
//!     → Evictor::report() (try_send, never blocks the selector)
//!     → bounded queue
//!     → worker.rs drains the queue on its own task
//!     → NodeCleaner::clean() deletes the nodes from the store
//!     → store watch feeds the deletions back into every registry instance
//! ```
//!
//! # Design Decisions
//! - Fire-and-forget: selection never waits on, or fails because of, cleanup
//! - A full queue drops the report; the next selection reports the node again
//! - Cleanup failures are logged and counted, not retried

pub mod worker;

use async_trait::async_trait;
use tokio::sync::mpsc::{self, error::TrySendError};

use crate::cluster::Node;
use crate::observability::metrics;
use crate::storage::StorageResult;

pub use worker::EvictionWorker;

/// Expired nodes of one service awaiting cleanup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Eviction {
    pub service_id: String,
    pub nodes: Vec<Node>,
}

/// Deletes expired nodes from durable storage.
#[async_trait]
pub trait NodeCleaner: Send + Sync {
    async fn clean(&self, service_id: &str, nodes: &[Node]) -> StorageResult<()>;
}

/// Sending half of the eviction queue, shared by every cluster.
#[derive(Debug, Clone)]
pub struct Evictor {
    tx: Option<mpsc::Sender<Eviction>>,
}

impl Evictor {
    /// Create an evictor with a queue of `capacity` pending reports.
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<Eviction>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx: Some(tx) }, rx)
    }

    /// An evictor that discards every report.
    pub fn disabled() -> Self {
        Self { tx: None }
    }

    /// Queue expired nodes for cleanup without waiting.
    pub fn report(&self, service_id: &str, nodes: Vec<Node>) {
        let Some(tx) = &self.tx else {
            return;
        };

        let eviction = Eviction {
            service_id: service_id.to_string(),
            nodes,
        };
        match tx.try_send(eviction) {
            Ok(()) => {}
            Err(TrySendError::Full(eviction)) => {
                tracing::warn!(
                    service_id = %eviction.service_id,
                    nodes = eviction.nodes.len(),
                    "Eviction queue full, dropping report"
                );
                metrics::record_eviction_dropped();
            }
            Err(TrySendError::Closed(_)) => {
                tracing::debug!(service_id = %service_id, "Eviction worker stopped, report ignored");
            }
        }
    }
}
