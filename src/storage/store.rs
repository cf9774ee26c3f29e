//! Mediator between the registry and the key/value backend.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};

use crate::cluster::node::unix_now;
use crate::cluster::{Node, ServiceConfig};
use crate::config::{StorageConfig, WatchConfig};
use crate::error::RegistryError;
use crate::eviction::NodeCleaner;
use crate::observability::metrics;
use crate::registry::Registry;
use crate::resilience::backoff::calculate_backoff;
use crate::resilience::timeouts::with_timeout;
use crate::storage::{KeyLayout, KvBackend, StorageError, StorageResult, StoreKey, WatchEvent};

/// Stored form of a service.
#[derive(Debug, Serialize, Deserialize)]
struct ServiceRecord {
    load_balance: String,
}

/// Stored form of a node. Identity lives in the key.
#[derive(Debug, Serialize, Deserialize)]
struct NodeRecord {
    weight: u32,
    #[serde(default)]
    ttl: u32,
    #[serde(default)]
    expires: i64,
    #[serde(default)]
    meta: String,
}

impl NodeRecord {
    fn from_node(node: &Node) -> Self {
        Self {
            weight: node.weight,
            ttl: node.ttl,
            expires: node.expires,
            meta: node.meta.clone(),
        }
    }

    fn into_node(self, ip: String, port: u16) -> Node {
        Node {
            ip,
            port,
            weight: self.weight,
            ttl: self.ttl,
            expires: self.expires,
            meta: self.meta,
        }
    }
}

/// Counts reported by a full load.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LoadSummary {
    pub services: usize,
    pub nodes: usize,
    pub skipped: usize,
}

/// Reads and writes registry state through a `KvBackend`.
pub struct Storage {
    backend: Arc<dyn KvBackend>,
    registry: Arc<Registry>,
    keys: KeyLayout,
    timeout_secs: u64,
}

impl Storage {
    pub fn new(backend: Arc<dyn KvBackend>, registry: Arc<Registry>, config: &StorageConfig) -> Self {
        Self {
            backend,
            registry,
            keys: KeyLayout::new(&config.key_prefix),
            timeout_secs: config.timeout_secs,
        }
    }

    pub fn keys(&self) -> &KeyLayout {
        &self.keys
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub async fn save_service(&self, config: &ServiceConfig) -> StorageResult<()> {
        let key = self.keys.service_key(&config.service_id);
        let value = serde_json::to_string(&ServiceRecord {
            load_balance: config.load_balance.clone(),
        })?;
        with_timeout(self.timeout_secs, self.backend.put(&key, &value)).await
    }

    /// Delete a service and every node stored under it.
    pub async fn delete_storage_service(&self, service_id: &str) -> StorageResult<()> {
        let nodes = self.keys.service_nodes_prefix(service_id);
        with_timeout(self.timeout_secs, self.backend.delete_prefix(&nodes)).await?;
        let key = self.keys.service_key(service_id);
        with_timeout(self.timeout_secs, self.backend.delete(&key)).await
    }

    pub async fn save_node(&self, service_id: &str, node: &Node) -> StorageResult<()> {
        let key = self.keys.node_key(service_id, &node.ip, node.port);
        let value = serde_json::to_string(&NodeRecord::from_node(node))?;
        with_timeout(self.timeout_secs, self.backend.put(&key, &value)).await
    }

    pub async fn delete_storage_node(&self, service_id: &str, ip: &str, port: u16) -> StorageResult<()> {
        let key = self.keys.node_key(service_id, ip, port);
        with_timeout(self.timeout_secs, self.backend.delete(&key)).await
    }

    /// Load every service and node from the store into the registry.
    ///
    /// Services go first so nodes always find their cluster. Malformed
    /// entries are logged and skipped.
    pub async fn load_all(&self) -> StorageResult<LoadSummary> {
        self.load(false).await
    }

    /// Like `load_all`, but local entries the store no longer has are
    /// removed. Reconciles deletions missed while the watch was down.
    pub async fn resync(&self) -> StorageResult<LoadSummary> {
        self.load(true).await
    }

    async fn load(&self, prune: bool) -> StorageResult<LoadSummary> {
        let mut summary = LoadSummary::default();

        let services_prefix = self.keys.services_prefix();
        let services = with_timeout(self.timeout_secs, self.backend.get_prefix(&services_prefix)).await?;
        let nodes_prefix = self.keys.nodes_prefix();
        let nodes = with_timeout(self.timeout_secs, self.backend.get_prefix(&nodes_prefix)).await?;

        let mut seen_services = HashSet::new();
        for (key, value) in &services {
            match self.apply_put(key, value) {
                Ok(Applied::Service(service_id)) => {
                    seen_services.insert(service_id);
                    summary.services += 1;
                }
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!(key = %key, error = %e, "Skipping stored service");
                    summary.skipped += 1;
                }
            }
        }

        let mut seen_nodes = HashSet::new();
        for (key, value) in &nodes {
            match self.apply_put(key, value) {
                Ok(Applied::Node(service_id, ip, port)) => {
                    seen_nodes.insert((service_id, ip, port));
                    summary.nodes += 1;
                }
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!(key = %key, error = %e, "Skipping stored node");
                    summary.skipped += 1;
                }
            }
        }

        let stale = if prune { self.registry.clusters() } else { Vec::new() };
        for cluster in stale {
            let service_id = cluster.service_id().to_string();
            if !seen_services.contains(&service_id) {
                self.registry.del_service(&service_id);
                continue;
            }
            for node in cluster.nodes() {
                if !seen_nodes.contains(&(service_id.clone(), node.ip.clone(), node.port)) {
                    match self.registry.del_node(&service_id, &node.ip, node.port) {
                        Ok(_) | Err(RegistryError::ServiceNotFound(_)) => {}
                        Err(e) => tracing::warn!(
                            service_id = %service_id,
                            node = %node.address(),
                            error = %e,
                            "Failed to prune node"
                        ),
                    }
                }
            }
        }

        tracing::info!(
            services = summary.services,
            nodes = summary.nodes,
            skipped = summary.skipped,
            "Loaded registry from storage"
        );
        Ok(summary)
    }

    /// Make the store match the in-memory registry.
    pub async fn save_all(&self) -> StorageResult<()> {
        let mut wanted = Vec::new();
        for cluster in self.registry.clusters() {
            let config = cluster.config();
            wanted.push((
                self.keys.service_key(&config.service_id),
                serde_json::to_string(&ServiceRecord {
                    load_balance: config.load_balance.clone(),
                })?,
            ));
            for node in cluster.nodes() {
                wanted.push((
                    self.keys.node_key(&config.service_id, &node.ip, node.port),
                    serde_json::to_string(&NodeRecord::from_node(&node))?,
                ));
            }
        }

        let root = self.keys.root();
        let existing = with_timeout(self.timeout_secs, self.backend.get_prefix(&root)).await?;
        let wanted_keys: HashSet<&str> = wanted.iter().map(|(k, _)| k.as_str()).collect();
        for (key, _) in &existing {
            if !wanted_keys.contains(key.as_str()) {
                with_timeout(self.timeout_secs, self.backend.delete(key)).await?;
            }
        }

        // Services before nodes so watchers never see an orphan node
        for (key, value) in &wanted {
            with_timeout(self.timeout_secs, self.backend.put(key, value)).await?;
        }

        tracing::info!(keys = wanted.len(), "Saved registry to storage");
        Ok(())
    }

    /// Follow the store's change feed until shutdown.
    ///
    /// A lost subscription is retried with backoff. Every subscription is
    /// followed by a full reload; after the first one the reload also prunes.
    pub async fn watch(&self, retry: &WatchConfig, mut shutdown: broadcast::Receiver<()>) {
        let root = self.keys.root();
        let mut attempt: u32 = 0;
        let mut subscribed_before = false;

        tracing::info!(prefix = %root, "Storage watch starting");

        loop {
            let stream = match with_timeout(self.timeout_secs, self.backend.watch(&root)).await {
                Ok(stream) => stream,
                Err(e) => {
                    attempt = attempt.saturating_add(1);
                    tracing::warn!(error = %e, attempt = attempt, "Failed to subscribe to storage changes");
                    let delay = calculate_backoff(attempt, retry.retry_base_ms, retry.retry_max_ms);
                    if !pause(delay, &mut shutdown).await {
                        break;
                    }
                    continue;
                }
            };

            // The first subscription only has to cover writes made since startup
            let loaded = if subscribed_before { self.resync().await } else { self.load_all().await };
            if let Err(e) = loaded {
                tracing::warn!(error = %e, "Reload after subscribe failed");
            }

            attempt = 0;
            subscribed_before = true;
            if !self.follow(stream, &mut shutdown).await {
                break;
            }

            attempt = attempt.saturating_add(1);
            tracing::warn!(attempt = attempt, error = %StorageError::Closed, "Resubscribing to storage changes");
            let delay = calculate_backoff(attempt, retry.retry_base_ms, retry.retry_max_ms);
            if !pause(delay, &mut shutdown).await {
                break;
            }
        }

        tracing::info!("Storage watch stopped");
    }

    /// Apply events until the stream ends (true) or shutdown fires (false).
    async fn follow(
        &self,
        mut stream: mpsc::Receiver<WatchEvent>,
        shutdown: &mut broadcast::Receiver<()>,
    ) -> bool {
        loop {
            tokio::select! {
                event = stream.recv() => match event {
                    Some(event) => self.apply(event),
                    None => return true,
                },
                _ = shutdown.recv() => {
                    tracing::info!("Storage watch received shutdown signal, exiting loop");
                    return false;
                }
            }
        }
    }

    /// Apply one change event to the registry.
    pub fn apply(&self, event: WatchEvent) {
        metrics::record_watch_event(event.kind());
        let result = match &event {
            WatchEvent::Put { key, value } => self.apply_put(key, value).map(|_| ()),
            WatchEvent::Delete { key } => self.apply_delete(key),
        };
        if let Err(e) = result {
            tracing::warn!(key = %event.key(), kind = event.kind(), error = %e, "Failed to apply storage event");
        }
    }

    fn apply_put(&self, key: &str, value: &str) -> Result<Applied, RegistryError> {
        match self.keys.parse(key)? {
            StoreKey::Service(service_id) => {
                let record: ServiceRecord = serde_json::from_str(value).map_err(StorageError::from)?;
                let unchanged = self
                    .registry
                    .find_cluster(&service_id)
                    .is_some_and(|c| c.algorithm().as_str().eq_ignore_ascii_case(record.load_balance.trim()));
                // Rebuilding would reset balancing state for no reason
                if !unchanged {
                    self.registry
                        .set_service(ServiceConfig::new(service_id.clone(), record.load_balance))?;
                }
                Ok(Applied::Service(service_id))
            }
            StoreKey::Node { service_id, ip, port } => {
                let record: NodeRecord = serde_json::from_str(value).map_err(StorageError::from)?;
                self.registry
                    .set_node(&service_id, record.into_node(ip.clone(), port))?;
                Ok(Applied::Node(service_id, ip, port))
            }
        }
    }

    fn apply_delete(&self, key: &str) -> Result<(), RegistryError> {
        match self.keys.parse(key)? {
            StoreKey::Service(service_id) => self.registry.del_service(&service_id),
            StoreKey::Node { service_id, ip, port } => match self.registry.del_node(&service_id, &ip, port) {
                Ok(_) | Err(RegistryError::ServiceNotFound(_)) => {}
                Err(e) => return Err(e),
            },
        }
        Ok(())
    }
}

enum Applied {
    Service(String),
    Node(String, String, u16),
}

/// Sleep for `delay` unless shutdown fires first. Returns false on shutdown.
async fn pause(delay: Duration, shutdown: &mut broadcast::Receiver<()>) -> bool {
    tokio::select! {
        _ = tokio::time::sleep(delay) => true,
        _ = shutdown.recv() => false,
    }
}

#[async_trait]
impl NodeCleaner for Storage {
    /// Delete expired nodes from the store. Nodes refreshed since they were
    /// reported are left alone. Every node is attempted; the first error wins.
    async fn clean(&self, service_id: &str, nodes: &[Node]) -> StorageResult<()> {
        let now = unix_now();
        let cluster = self.registry.find_cluster(service_id);
        let mut first_error = None;

        for node in nodes {
            let refreshed = cluster
                .as_ref()
                .and_then(|c| c.find(&node.ip, node.port))
                .is_some_and(|current| !current.is_expired(now));
            if refreshed {
                tracing::debug!(service_id = %service_id, ip = %node.ip, port = node.port, "Node refreshed before eviction");
                continue;
            }

            if let Err(e) = self.delete_storage_node(service_id, &node.ip, node.port).await {
                tracing::warn!(service_id = %service_id, ip = %node.ip, port = node.port, error = %e, "Failed to delete expired node");
                first_error.get_or_insert(e);
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::eviction::Evictor;
    use crate::lifecycle::Shutdown;
    use crate::storage::MemoryBackend;

    fn setup() -> (Arc<MemoryBackend>, Storage) {
        let backend = Arc::new(MemoryBackend::new());
        let registry = Arc::new(Registry::new(Evictor::disabled()));
        let storage = Storage::new(backend.clone(), registry, &StorageConfig::default());
        (backend, storage)
    }

    #[tokio::test]
    async fn test_save_then_load_into_fresh_registry() {
        let (backend, storage) = setup();
        storage.save_service(&ServiceConfig::new("svc", "SWRR")).await.unwrap();
        storage
            .save_node("svc", &Node::new("10.0.0.1", 80, 3).with_meta("m"))
            .await
            .unwrap();

        let registry = Arc::new(Registry::new(Evictor::disabled()));
        let other = Storage::new(backend, registry.clone(), &StorageConfig::default());
        let summary = other.load_all().await.unwrap();
        assert_eq!(summary, LoadSummary { services: 1, nodes: 1, skipped: 0 });

        let cluster = registry.find_cluster("svc").unwrap();
        assert_eq!(cluster.config().load_balance, "SWRR");
        assert_eq!(cluster.find("10.0.0.1", 80).unwrap().meta, "m");
    }

    #[tokio::test]
    async fn test_load_skips_garbage_and_resync_prunes() {
        let (backend, storage) = setup();
        let keys = storage.keys().clone();
        backend.put(&keys.service_key("svc"), "{\"load_balance\":\"WR\"}").await.unwrap();
        backend.put(&keys.service_key("bad"), "not json").await.unwrap();
        backend.put(&keys.node_key("ghost", "10.0.0.9", 80), "{\"weight\":1}").await.unwrap();

        storage.registry().set_service(ServiceConfig::new("stale", "WR")).unwrap();

        storage.load_all().await.unwrap();
        assert!(storage.registry().contains("stale"));

        let summary = storage.resync().await.unwrap();
        assert_eq!(summary.services, 1);
        assert_eq!(summary.skipped, 2);
        assert!(storage.registry().find_cluster("stale").is_none());
        assert!(storage.registry().find_cluster("svc").is_some());
    }

    #[tokio::test]
    async fn test_resync_prunes_stale_nodes() {
        let (_backend, storage) = setup();
        let config = ServiceConfig::new("svc", "WRR");
        storage.registry().set_service(config.clone()).unwrap();
        storage.save_service(&config).await.unwrap();
        let kept = Node::new("10.0.0.1", 80, 1);
        storage.registry().set_node("svc", kept.clone()).unwrap();
        storage.save_node("svc", &kept).await.unwrap();

        // In memory only
        storage.registry().set_node("svc", Node::new("10.0.0.2", 80, 1)).unwrap();

        let summary = storage.resync().await.unwrap();
        assert_eq!((summary.services, summary.nodes), (1, 1));
        let cluster = storage.registry().find_cluster("svc").unwrap();
        assert_eq!(cluster.nodes(), vec![kept]);
    }

    #[tokio::test]
    async fn test_delete_service_drops_nodes() {
        let (backend, storage) = setup();
        storage.save_service(&ServiceConfig::new("svc", "WR")).await.unwrap();
        storage.save_node("svc", &Node::new("10.0.0.1", 80, 1)).await.unwrap();
        storage.save_node("svc", &Node::new("10.0.0.2", 80, 1)).await.unwrap();
        storage.save_service(&ServiceConfig::new("keep", "WR")).await.unwrap();

        storage.delete_storage_service("svc").await.unwrap();
        assert_eq!(backend.len(), 1);
    }

    #[tokio::test]
    async fn test_save_all_replaces_store() {
        let (backend, storage) = setup();
        backend.put(&storage.keys().service_key("old"), "{\"load_balance\":\"WR\"}").await.unwrap();

        let registry = storage.registry();
        registry.set_service(ServiceConfig::new("svc", "wrr")).unwrap();
        registry.set_node("svc", Node::new("10.0.0.1", 80, 2)).unwrap();

        storage.save_all().await.unwrap();

        let keys: Vec<String> = backend.get_prefix("/").await.unwrap().into_iter().map(|(k, _)| k).collect();
        assert_eq!(keys.len(), 2);
        assert!(keys.contains(&storage.keys().service_key("svc")));
        assert!(keys.contains(&storage.keys().node_key("svc", "10.0.0.1", 80)));
    }

    #[tokio::test]
    async fn test_apply_events() {
        let (_, storage) = setup();
        let keys = storage.keys().clone();
        let registry = storage.registry().clone();

        storage.apply(WatchEvent::Put {
            key: keys.service_key("svc"),
            value: "{\"load_balance\":\"wrr\"}".into(),
        });
        storage.apply(WatchEvent::Put {
            key: keys.node_key("svc", "10.0.0.1", 80),
            value: "{\"weight\":4,\"ttl\":10,\"expires\":99}".into(),
        });
        let node = registry.find_cluster("svc").unwrap().find("10.0.0.1", 80).unwrap();
        assert_eq!((node.weight, node.ttl, node.expires), (4, 10, 99));

        // Same algorithm keeps the published cluster
        let before = registry.find_cluster("svc").unwrap();
        storage.apply(WatchEvent::Put {
            key: keys.service_key("svc"),
            value: "{\"load_balance\":\"WRR\"}".into(),
        });
        assert!(Arc::ptr_eq(&before, &registry.find_cluster("svc").unwrap()));

        storage.apply(WatchEvent::Delete {
            key: keys.node_key("svc", "10.0.0.1", 80),
        });
        assert_eq!(registry.find_cluster("svc").unwrap().total(), 0);

        storage.apply(WatchEvent::Delete { key: keys.service_key("svc") });
        assert!(registry.find_cluster("svc").is_none());

        // Unknown services and junk keys are ignored
        storage.apply(WatchEvent::Delete {
            key: keys.node_key("svc", "10.0.0.1", 80),
        });
        storage.apply(WatchEvent::Put {
            key: "/elsewhere".into(),
            value: String::new(),
        });
    }

    #[tokio::test]
    async fn test_clean_skips_refreshed_nodes() {
        let (backend, storage) = setup();
        let registry = storage.registry().clone();
        let now = unix_now();
        registry.set_service(ServiceConfig::new("svc", "WR")).unwrap();

        let expired = Node::new("10.0.0.1", 80, 1).with_ttl(5, now - 60);
        let refreshed = Node::new("10.0.0.2", 80, 1).with_ttl(5, now - 60);
        registry.set_node("svc", expired.clone()).unwrap();
        registry.set_node("svc", Node::new("10.0.0.2", 80, 1).with_ttl(60, now)).unwrap();
        storage.save_node("svc", &expired).await.unwrap();
        storage.save_node("svc", &refreshed).await.unwrap();

        storage.clean("svc", &[expired, refreshed]).await.unwrap();

        let left = backend.get_prefix(&storage.keys().nodes_prefix()).await.unwrap();
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].0, storage.keys().node_key("svc", "10.0.0.2", 80));
    }

    #[tokio::test]
    async fn test_watch_follows_and_stops() {
        let (backend, storage) = setup();
        let storage = Arc::new(storage);
        let shutdown = Shutdown::new();
        let retry = WatchConfig::default();

        let handle = {
            let storage = storage.clone();
            let rx = shutdown.subscribe();
            tokio::spawn(async move { storage.watch(&retry, rx).await })
        };

        for _ in 0..50 {
            if backend.watchers() > 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        let keys = storage.keys().clone();
        backend.put(&keys.service_key("svc"), "{\"load_balance\":\"WR\"}").await.unwrap();

        for _ in 0..50 {
            if storage.registry().contains("svc") {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(storage.registry().contains("svc"));

        shutdown.trigger();
        handle.await.unwrap();
    }
}
