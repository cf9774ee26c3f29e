//! Cluster and load balancing subsystem.
//!
//! # Data Flow
//! ```text
//! Registry lookup → Arc<Cluster>
//!     → Cluster::select() takes the per-cluster lock
//!     → Apply the service's algorithm:
//!         - wr.rs   (weighted random)
//!         - wrr.rs  (weighted round robin, LVS style)
//!         - swrr.rs (smooth weighted round robin, nginx style)
//!     → Expired nodes collected during the pass
//!     → Lock released, expired nodes handed to the evictor
//!     → Return selected node (if any)
//! ```
//!
//! # Design Decisions
//! - One mutex per cluster; no global lock on the selection path
//! - Algorithms only see `&mut self`, locking lives in `Cluster`
//! - Node liveness is decided by one shared rule (`node::Node::liveness`)
//! - Algorithm changes build a new cluster; a published cluster is never reconfigured

pub mod factory;
pub mod node;
pub mod swrr;
pub mod wr;
pub mod wrr;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::RegistryError;
use crate::eviction::Evictor;
use crate::observability::metrics;

pub use node::Node;

/// Load balancing algorithm of a service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Algorithm {
    /// Weighted random.
    Wr,
    /// Weighted round robin.
    Wrr,
    /// Smooth weighted round robin.
    Swrr,
}

impl Algorithm {
    pub fn as_str(&self) -> &'static str {
        match self {
            Algorithm::Wr => "WR",
            Algorithm::Wrr => "WRR",
            Algorithm::Swrr => "SWRR",
        }
    }
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Algorithm {
    type Err = RegistryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "WR" => Ok(Algorithm::Wr),
            "WRR" => Ok(Algorithm::Wrr),
            "SWRR" => Ok(Algorithm::Swrr),
            _ => Err(RegistryError::UnsupportedAlgorithm(s.to_string())),
        }
    }
}

/// Registration record of a service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceConfig {
    pub service_id: String,
    pub load_balance: String,
}

impl ServiceConfig {
    pub fn new(service_id: impl Into<String>, load_balance: impl Into<String>) -> Self {
        Self {
            service_id: service_id.into(),
            load_balance: load_balance.into(),
        }
    }
}

/// A node list plus the derived state of one algorithm.
///
/// Implementations are not synchronized; `Cluster` serializes access.
pub trait LoadBalancer: Send + fmt::Debug {
    /// Insert a node or update an existing one with the same identity.
    fn set(&mut self, node: Node);

    /// Remove a node, returning it if it was present.
    fn remove(&mut self, ip: &str, port: u16) -> Option<Node>;

    /// Pick the next node. Expired nodes met on the way are pushed to `lost`.
    fn select(&mut self, now: i64, lost: &mut Vec<Node>) -> Option<Node>;

    /// Iterate nodes in insertion order.
    fn iter(&self) -> Box<dyn Iterator<Item = &Node> + '_>;

    /// Mutable access to a node's non-weight fields.
    fn node_mut(&mut self, ip: &str, port: u16) -> Option<&mut Node>;

    fn total(&self) -> usize;

    fn find(&self, ip: &str, port: u16) -> Option<Node> {
        self.iter().find(|n| n.is(ip, port)).cloned()
    }

    fn nodes(&self) -> Vec<Node> {
        self.iter().cloned().collect()
    }

    /// Push a node's deadline out by its TTL, giving `fallback_ttl` to a node
    /// without one. Weights are untouched so no derived state changes.
    fn touch(&mut self, ip: &str, port: u16, now: i64, fallback_ttl: u32) -> Option<Node> {
        let node = self.node_mut(ip, port)?;
        if node.ttl == 0 {
            node.ttl = fallback_ttl;
        }
        node.expires = node::deadline(node.ttl, now);
        Some(node.clone())
    }
}

/// The node list and balancing state of one service.
#[derive(Debug)]
pub struct Cluster {
    config: ServiceConfig,
    algorithm: Algorithm,
    balancer: Mutex<Box<dyn LoadBalancer>>,
    evictor: Evictor,
}

impl Cluster {
    pub(crate) fn new(
        config: ServiceConfig,
        algorithm: Algorithm,
        balancer: Box<dyn LoadBalancer>,
        evictor: Evictor,
    ) -> Self {
        Self {
            config,
            algorithm,
            balancer: Mutex::new(balancer),
            evictor,
        }
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    pub fn service_id(&self) -> &str {
        &self.config.service_id
    }

    pub fn algorithm(&self) -> Algorithm {
        self.algorithm
    }

    pub fn set(&self, node: Node) {
        self.balancer.lock().set(node);
    }

    /// Refresh an existing node. Returns the updated node, or `None` if it is gone.
    pub fn touch(&self, ip: &str, port: u16, now: i64, fallback_ttl: u32) -> Option<Node> {
        self.balancer.lock().touch(ip, port, now, fallback_ttl)
    }

    pub fn remove(&self, ip: &str, port: u16) -> Option<Node> {
        self.balancer.lock().remove(ip, port)
    }

    pub fn find(&self, ip: &str, port: u16) -> Option<Node> {
        self.balancer.lock().find(ip, port)
    }

    pub fn nodes(&self) -> Vec<Node> {
        self.balancer.lock().nodes()
    }

    pub fn total(&self) -> usize {
        self.balancer.lock().total()
    }

    /// Select a node using the current wall clock.
    pub fn select(&self) -> Option<Node> {
        self.select_at(node::unix_now())
    }

    /// Select a node as of `now`. Expired nodes are reported to the evictor
    /// after the lock is released.
    pub fn select_at(&self, now: i64) -> Option<Node> {
        let mut lost = Vec::new();
        let selected = self.balancer.lock().select(now, &mut lost);

        if !lost.is_empty() {
            tracing::debug!(
                service_id = %self.config.service_id,
                lost = lost.len(),
                "Expired nodes found during selection"
            );
            self.evictor.report(&self.config.service_id, lost);
        }
        metrics::record_selection(selected.is_some());
        selected
    }
}

/// Select from a cluster of exactly one node.
pub(crate) fn select_single(node: &Node, now: i64, lost: &mut Vec<Node>) -> Option<Node> {
    match node.liveness(now) {
        node::Liveness::Live => Some(node.clone()),
        node::Liveness::Idle => None,
        node::Liveness::Lost => {
            node::push_lost(lost, node);
            None
        }
    }
}
