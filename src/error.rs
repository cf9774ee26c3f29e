//! Registry error definitions.

use thiserror::Error;

use crate::storage::StorageError;

/// Errors raised by registry operations.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// A required field was empty or zero.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The service is not registered.
    #[error("service not found: {0}")]
    ServiceNotFound(String),

    /// The node is not part of the service's cluster.
    #[error("node {node} not found in service {service_id}")]
    NodeNotFound { service_id: String, node: String },

    /// The load balancing algorithm name is not recognized.
    #[error("unsupported load balance algorithm: {0}")]
    UnsupportedAlgorithm(String),

    /// Passthrough from the backing store.
    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl RegistryError {
    pub fn invalid(msg: impl Into<String>) -> Self {
        RegistryError::InvalidArgument(msg.into())
    }
}

/// Result type for registry operations.
pub type RegistryResult<T> = Result<T, RegistryError>;
