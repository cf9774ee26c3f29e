//! Configuration validation.
//!
//! Semantic checks only; serde handles syntax. Every problem is reported,
//! not just the first.

use std::fmt;
use std::net::SocketAddr;

use crate::config::schema::RegistryConfig;

/// One failed check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub field: &'static str,
    pub message: String,
}

impl ValidationError {
    fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

pub fn validate_config(config: &RegistryConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.api.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::new("api.bind_address", "not a socket address"));
    }
    if config.api.request_timeout_secs == 0 {
        errors.push(ValidationError::new("api.request_timeout_secs", "must be greater than 0"));
    }

    if config.storage.backend.trim().to_ascii_lowercase() != "memory" {
        errors.push(ValidationError::new(
            "storage.backend",
            format!("unsupported backend '{}'", config.storage.backend),
        ));
    }
    if !config.storage.key_prefix.starts_with('/') || config.storage.key_prefix.trim_end_matches('/').is_empty() {
        errors.push(ValidationError::new("storage.key_prefix", "must start with '/' and name a path"));
    }
    if config.storage.timeout_secs == 0 {
        errors.push(ValidationError::new("storage.timeout_secs", "must be greater than 0"));
    }

    if config.watch.retry_base_ms == 0 {
        errors.push(ValidationError::new("watch.retry_base_ms", "must be greater than 0"));
    }
    if config.watch.retry_max_ms < config.watch.retry_base_ms {
        errors.push(ValidationError::new("watch.retry_max_ms", "must not be below retry_base_ms"));
    }

    if config.eviction.queue_capacity == 0 {
        errors.push(ValidationError::new("eviction.queue_capacity", "must be greater than 0"));
    }

    if !matches!(config.observability.log_format.as_str(), "pretty" | "compact") {
        errors.push(ValidationError::new("observability.log_format", "must be 'pretty' or 'compact'"));
    }
    if config.observability.metrics_enabled
        && config.observability.metrics_address.parse::<SocketAddr>().is_err()
    {
        errors.push(ValidationError::new("observability.metrics_address", "not a socket address"));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
