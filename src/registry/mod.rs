//! Service registry.
//!
//! # Responsibilities
//! - Map service IDs to their clusters
//! - Rebuild a cluster when a service's algorithm changes, keeping its nodes
//! - Validate node and service mutations before touching any state
//!
//! # Design Decisions
//! - `DashMap` shards give concurrent readers and writers without a global lock
//! - A config change builds a complete new cluster, then swaps it in under the
//!   entry lock; selectors holding the old `Arc<Cluster>` keep a consistent view
//! - Node writes hold the shard read guard so they cannot land on a cluster that
//!   is being replaced
//! - Only `del_service` removes a service; a cluster may sit empty

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::cluster::node::MAX_WEIGHT;
use crate::cluster::{factory, Cluster, Node, ServiceConfig};
use crate::error::{RegistryError, RegistryResult};
use crate::eviction::Evictor;
use crate::observability::metrics;

/// Concurrent map of service ID to cluster.
#[derive(Debug)]
pub struct Registry {
    clusters: DashMap<String, Arc<Cluster>>,
    total_services: AtomicUsize,
    evictor: Evictor,
}

impl Registry {
    /// Create an empty registry. Every cluster reports expired nodes to `evictor`.
    pub fn new(evictor: Evictor) -> Self {
        Self {
            clusters: DashMap::new(),
            total_services: AtomicUsize::new(0),
            evictor,
        }
    }

    /// Register a service or change its algorithm.
    pub fn set_service(&self, config: ServiceConfig) -> RegistryResult<()> {
        if config.service_id.is_empty() {
            return Err(RegistryError::invalid("service_id must not be empty"));
        }
        if config.load_balance.is_empty() {
            return Err(RegistryError::invalid("load_balance must not be empty"));
        }

        let service_id = config.service_id.clone();
        let fresh = factory::build(config, self.evictor.clone())?;

        match self.clusters.entry(service_id) {
            Entry::Occupied(mut entry) => {
                let old = entry.get();
                for node in old.nodes() {
                    fresh.set(node);
                }
                tracing::info!(
                    service_id = %entry.key(),
                    from = %old.algorithm(),
                    to = %fresh.algorithm(),
                    nodes = fresh.total(),
                    "Service cluster rebuilt"
                );
                entry.insert(Arc::new(fresh));
            }
            Entry::Vacant(entry) => {
                tracing::info!(
                    service_id = %entry.key(),
                    algorithm = %fresh.algorithm(),
                    "Service registered"
                );
                // Counted under the shard lock so a racing del_service sees it
                let total = self.total_services.fetch_add(1, Ordering::Relaxed) + 1;
                entry.insert(Arc::new(fresh));
                metrics::record_services(total);
            }
        }
        Ok(())
    }

    /// Remove a service and all its nodes. Unknown services are ignored.
    pub fn del_service(&self, service_id: &str) {
        if self.clusters.remove(service_id).is_some() {
            let total = self.total_services.fetch_sub(1, Ordering::Relaxed) - 1;
            metrics::record_services(total);
            tracing::info!(service_id = %service_id, "Service removed");
        }
    }

    pub fn find_cluster(&self, service_id: &str) -> Option<Arc<Cluster>> {
        self.clusters.get(service_id).map(|c| c.value().clone())
    }

    pub fn contains(&self, service_id: &str) -> bool {
        self.clusters.contains_key(service_id)
    }

    /// Insert or update a node of a registered service.
    pub fn set_node(&self, service_id: &str, node: Node) -> RegistryResult<()> {
        if service_id.is_empty() {
            return Err(RegistryError::invalid("service_id must not be empty"));
        }
        if node.ip.is_empty() {
            return Err(RegistryError::invalid("ip must not be empty"));
        }
        if node.port == 0 {
            return Err(RegistryError::invalid("port must not be 0"));
        }
        if node.weight > MAX_WEIGHT {
            return Err(RegistryError::invalid(format!(
                "weight must not exceed {}",
                MAX_WEIGHT
            )));
        }

        let cluster = self
            .clusters
            .get(service_id)
            .ok_or_else(|| RegistryError::ServiceNotFound(service_id.to_string()))?;
        tracing::debug!(
            service_id = %service_id,
            ip = %node.ip,
            port = node.port,
            weight = node.weight,
            "Node set"
        );
        cluster.set(node);
        Ok(())
    }

    /// Push an existing node's deadline out. A node without a TTL is given
    /// `fallback_ttl`. Never creates a node.
    pub fn touch_node(
        &self,
        service_id: &str,
        ip: &str,
        port: u16,
        now: i64,
        fallback_ttl: u32,
    ) -> RegistryResult<Node> {
        let cluster = self
            .clusters
            .get(service_id)
            .ok_or_else(|| RegistryError::ServiceNotFound(service_id.to_string()))?;
        cluster
            .touch(ip, port, now, fallback_ttl)
            .ok_or_else(|| RegistryError::NodeNotFound {
                service_id: service_id.to_string(),
                node: format!("{}:{}", ip, port),
            })
    }

    /// Remove a node. Returns the removed node, or `None` if it was not present.
    pub fn del_node(&self, service_id: &str, ip: &str, port: u16) -> RegistryResult<Option<Node>> {
        let cluster = self
            .clusters
            .get(service_id)
            .ok_or_else(|| RegistryError::ServiceNotFound(service_id.to_string()))?;
        let removed = cluster.remove(ip, port);
        if removed.is_some() {
            tracing::debug!(service_id = %service_id, ip = %ip, port = port, "Node removed");
        }
        Ok(removed)
    }

    /// Snapshot of every service config.
    pub fn services(&self) -> Vec<ServiceConfig> {
        let mut services: Vec<ServiceConfig> = self
            .clusters
            .iter()
            .map(|c| c.value().config().clone())
            .collect();
        services.sort_by(|a, b| a.service_id.cmp(&b.service_id));
        services
    }

    /// Snapshot of every cluster handle.
    pub fn clusters(&self) -> Vec<Arc<Cluster>> {
        self.clusters.iter().map(|c| c.value().clone()).collect()
    }

    pub fn total_services(&self) -> usize {
        self.total_services.load(Ordering::Relaxed)
    }
}
