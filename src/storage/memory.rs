//! In-process key/value backend.
//!
//! An ordered map plus a broadcast change feed. Several registries in one
//! process can share a single instance and converge through its watch stream.

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use tokio::sync::{broadcast, mpsc};

use crate::storage::{KvBackend, StorageResult, WatchEvent};

const FEED_CAPACITY: usize = 1024;
const WATCH_BUFFER: usize = 256;

pub struct MemoryBackend {
    data: RwLock<BTreeMap<String, String>>,
    feed: broadcast::Sender<WatchEvent>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        let (feed, _) = broadcast::channel(FEED_CAPACITY);
        Self {
            data: RwLock::new(BTreeMap::new()),
            feed,
        }
    }

    pub fn len(&self) -> usize {
        self.data.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.read().is_empty()
    }

    /// Number of live watch subscriptions.
    pub fn watchers(&self) -> usize {
        self.feed.receiver_count()
    }

    // Events are published while the write lock is held so the feed order
    // matches the order of writes.
    fn publish(&self, event: WatchEvent) {
        let _ = self.feed.send(event);
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl KvBackend for MemoryBackend {
    async fn get_prefix(&self, prefix: &str) -> StorageResult<Vec<(String, String)>> {
        let data = self.data.read();
        Ok(data
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }

    async fn put(&self, key: &str, value: &str) -> StorageResult<()> {
        let mut data = self.data.write();
        data.insert(key.to_string(), value.to_string());
        self.publish(WatchEvent::Put {
            key: key.to_string(),
            value: value.to_string(),
        });
        Ok(())
    }

    async fn delete(&self, key: &str) -> StorageResult<()> {
        let mut data = self.data.write();
        if data.remove(key).is_some() {
            self.publish(WatchEvent::Delete {
                key: key.to_string(),
            });
        }
        Ok(())
    }

    async fn delete_prefix(&self, prefix: &str) -> StorageResult<usize> {
        let mut data = self.data.write();
        let doomed: Vec<String> = data
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, _)| k.clone())
            .collect();
        for key in &doomed {
            data.remove(key);
            self.publish(WatchEvent::Delete { key: key.clone() });
        }
        Ok(doomed.len())
    }

    async fn watch(&self, prefix: &str) -> StorageResult<mpsc::Receiver<WatchEvent>> {
        let mut feed = self.feed.subscribe();
        let (tx, rx) = mpsc::channel(WATCH_BUFFER);
        let prefix = prefix.to_string();

        tokio::spawn(async move {
            loop {
                match feed.recv().await {
                    Ok(event) => {
                        if !event.key().starts_with(&prefix) {
                            continue;
                        }
                        if tx.send(event).await.is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        // Closing the stream makes the watcher resubscribe and resync
                        tracing::warn!(prefix = %prefix, missed = missed, "Watch subscriber lagged, closing stream");
                        break;
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });

        Ok(rx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_prefix_operations() {
        let backend = MemoryBackend::new();
        backend.put("/a/1", "x").await.unwrap();
        backend.put("/a/2", "y").await.unwrap();
        backend.put("/b/1", "z").await.unwrap();

        let pairs = backend.get_prefix("/a/").await.unwrap();
        assert_eq!(pairs, vec![("/a/1".into(), "x".into()), ("/a/2".into(), "y".into())]);

        assert_eq!(backend.delete_prefix("/a/").await.unwrap(), 2);
        assert_eq!(backend.len(), 1);

        backend.delete("/missing").await.unwrap();
        backend.delete("/b/1").await.unwrap();
        assert!(backend.is_empty());
    }

    #[tokio::test]
    async fn test_watch_filters_by_prefix() {
        let backend = MemoryBackend::new();
        let mut rx = backend.watch("/a/").await.unwrap();

        backend.put("/b/1", "ignored").await.unwrap();
        backend.put("/a/1", "x").await.unwrap();
        backend.delete("/a/1").await.unwrap();

        assert_eq!(
            rx.recv().await.unwrap(),
            WatchEvent::Put {
                key: "/a/1".into(),
                value: "x".into()
            }
        );
        assert_eq!(rx.recv().await.unwrap(), WatchEvent::Delete { key: "/a/1".into() });
    }

    #[tokio::test]
    async fn test_watch_ends_with_backend() {
        let backend = MemoryBackend::new();
        let mut rx = backend.watch("/").await.unwrap();
        assert_eq!(backend.watchers(), 1);

        drop(backend);
        assert!(rx.recv().await.is_none());
    }
}
