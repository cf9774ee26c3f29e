//! Durable storage subsystem.
//!
//! # Data Flow
//! ```text
//! API mutation → Registry (memory) → Storage::save_* → KvBackend::put/delete
//!
//! KvBackend change feed
//!     → Storage::watch() (own task, resubscribes with backoff)
//!     → decode key (keys.rs) and JSON record
//!     → Registry::set_service / set_node / del_service / del_node
//!
//! Evictor queue → EvictionWorker → Storage::clean() → KvBackend::delete
//! ```
//!
//! # Design Decisions
//! - Backends are plain key/value stores with prefix reads and a prefix watch
//! - Every backend call is bounded by the configured timeout
//! - Service IDs and node addresses are URL-safe base64 inside keys
//! - After every (re)subscription the full store is reloaded to cover missed events

pub mod keys;
pub mod memory;
pub mod store;

use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::config::StorageConfig;

pub use keys::{KeyLayout, StoreKey};
pub use memory::MemoryBackend;
pub use store::Storage;

/// Errors raised at the storage boundary.
#[derive(Debug, Error)]
pub enum StorageError {
    /// The backend rejected or failed the operation.
    #[error("storage backend error: {0}")]
    Backend(String),

    /// The operation did not finish in time.
    #[error("storage operation timed out after {0} seconds")]
    Timeout(u64),

    /// A stored value could not be encoded or decoded.
    #[error("storage codec error: {0}")]
    Codec(#[from] serde_json::Error),

    /// A key did not match the expected layout.
    #[error("malformed storage key: {0}")]
    KeyFormat(String),

    /// The change feed is gone.
    #[error("storage watch stream closed")]
    Closed,
}

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// A change observed on the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchEvent {
    Put { key: String, value: String },
    Delete { key: String },
}

impl WatchEvent {
    pub fn key(&self) -> &str {
        match self {
            WatchEvent::Put { key, .. } | WatchEvent::Delete { key } => key,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            WatchEvent::Put { .. } => "put",
            WatchEvent::Delete { .. } => "delete",
        }
    }
}

/// Key/value store with prefix reads and a prefix change feed.
#[async_trait]
pub trait KvBackend: Send + Sync {
    /// All pairs whose key starts with `prefix`, ordered by key.
    async fn get_prefix(&self, prefix: &str) -> StorageResult<Vec<(String, String)>>;

    async fn put(&self, key: &str, value: &str) -> StorageResult<()>;

    /// Delete one key. Missing keys are not an error.
    async fn delete(&self, key: &str) -> StorageResult<()>;

    /// Delete every key under `prefix`, returning how many were removed.
    async fn delete_prefix(&self, prefix: &str) -> StorageResult<usize>;

    /// Subscribe to changes under `prefix`. The stream ends when the
    /// subscription is lost; callers resubscribe and resync.
    async fn watch(&self, prefix: &str) -> StorageResult<mpsc::Receiver<WatchEvent>>;
}

/// Build the backend named in the config.
pub fn build_backend(config: &StorageConfig) -> StorageResult<Arc<dyn KvBackend>> {
    match config.backend.trim().to_ascii_lowercase().as_str() {
        "memory" => Ok(Arc::new(MemoryBackend::new())),
        other => Err(StorageError::Backend(format!(
            "unsupported storage backend: {}",
            other
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_backend() {
        assert!(build_backend(&StorageConfig::default()).is_ok());

        let config = StorageConfig {
            backend: "etcd".into(),
            ..Default::default()
        };
        assert!(matches!(build_backend(&config), Err(StorageError::Backend(_))));
    }

    #[test]
    fn test_event_kind() {
        let put = WatchEvent::Put {
            key: "k".into(),
            value: "v".into(),
        };
        assert_eq!(put.kind(), "put");
        assert_eq!(WatchEvent::Delete { key: "k".into() }.key(), "k");
    }
}
