//! Configuration schema definitions.
//!
//! All types derive Serde traits for deserialization from TOML files.

use serde::{Deserialize, Serialize};

/// Root configuration for the service registry.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct RegistryConfig {
    /// HTTP management API.
    pub api: ApiConfig,

    /// Durable store settings.
    pub storage: StorageConfig,

    /// Store watch reconnection policy.
    pub watch: WatchConfig,

    /// Expired node cleanup.
    pub eviction: EvictionConfig,

    /// Logging and metrics.
    pub observability: ObservabilityConfig,
}

/// HTTP API configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ApiConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    pub bind_address: String,

    /// Bearer token required on every request. Empty disables the check.
    pub secret: String,

    /// Per-request timeout.
    pub request_timeout_secs: u64,

    /// Lifetime granted by a touch when the node has no TTL of its own.
    pub touch_ttl_secs: u32,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
            secret: String::new(),
            request_timeout_secs: 10,
            touch_ttl_secs: 30,
        }
    }
}

/// Storage backend configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Backend name. Only "memory" is built in.
    pub backend: String,

    /// Root of every key written by the registry.
    pub key_prefix: String,

    /// Deadline for each backend call.
    pub timeout_secs: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: "memory".to_string(),
            key_prefix: "/service-center".to_string(),
            timeout_secs: 5,
        }
    }
}

/// Watch resubscription backoff.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct WatchConfig {
    pub retry_base_ms: u64,
    pub retry_max_ms: u64,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            retry_base_ms: 100,
            retry_max_ms: 5_000,
        }
    }
}

/// Eviction queue configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct EvictionConfig {
    /// Pending cleanup reports before new ones are dropped.
    pub queue_capacity: usize,
}

impl Default for EvictionConfig {
    fn default() -> Self {
        Self { queue_capacity: 1024 }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Log format ("pretty" or "compact").
    pub log_format: String,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: "pretty".to_string(),
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}
