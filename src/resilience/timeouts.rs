//! Deadlines for backend calls.

use std::future::Future;
use std::time::Duration;

use crate::storage::{StorageError, StorageResult};

/// Run a storage future, failing with `StorageError::Timeout` after `secs`.
pub async fn with_timeout<T, F>(secs: u64, fut: F) -> StorageResult<T>
where
    F: Future<Output = StorageResult<T>>,
{
    match tokio::time::timeout(Duration::from_secs(secs), fut).await {
        Ok(result) => result,
        Err(_) => Err(StorageError::Timeout(secs)),
    }
}
