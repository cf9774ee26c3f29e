//! Storage key layout.
//!
//! ```text
//! {prefix}/services/{b64(service_id)}            → {"load_balance": "..."}
//! {prefix}/nodes/{b64(service_id)}/{b64(ip:port)} → {"weight": .., "ttl": .., "expires": .., "meta": ".."}
//! ```

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;

use crate::cluster::node::parse_address;
use crate::storage::{StorageError, StorageResult};

/// URL-safe base64 without padding.
pub fn encode_id(raw: &str) -> String {
    URL_SAFE_NO_PAD.encode(raw.as_bytes())
}

pub fn decode_id(encoded: &str) -> StorageResult<String> {
    let bytes = URL_SAFE_NO_PAD
        .decode(encoded.as_bytes())
        .map_err(|e| StorageError::KeyFormat(format!("{}: {}", encoded, e)))?;
    String::from_utf8(bytes).map_err(|e| StorageError::KeyFormat(format!("{}: {}", encoded, e)))
}

/// What a storage key refers to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreKey {
    Service(String),
    Node {
        service_id: String,
        ip: String,
        port: u16,
    },
}

/// Builds and parses keys under one prefix.
#[derive(Debug, Clone)]
pub struct KeyLayout {
    prefix: String,
}

impl KeyLayout {
    pub fn new(prefix: &str) -> Self {
        Self {
            prefix: prefix.trim_end_matches('/').to_string(),
        }
    }

    /// Prefix covering every key this registry owns.
    pub fn root(&self) -> String {
        format!("{}/", self.prefix)
    }

    pub fn services_prefix(&self) -> String {
        format!("{}/services/", self.prefix)
    }

    pub fn nodes_prefix(&self) -> String {
        format!("{}/nodes/", self.prefix)
    }

    pub fn service_key(&self, service_id: &str) -> String {
        format!("{}{}", self.services_prefix(), encode_id(service_id))
    }

    pub fn service_nodes_prefix(&self, service_id: &str) -> String {
        format!("{}{}/", self.nodes_prefix(), encode_id(service_id))
    }

    pub fn node_key(&self, service_id: &str, ip: &str, port: u16) -> String {
        format!(
            "{}{}",
            self.service_nodes_prefix(service_id),
            encode_id(&format!("{}:{}", ip, port))
        )
    }

    pub fn parse(&self, key: &str) -> StorageResult<StoreKey> {
        let malformed = || StorageError::KeyFormat(key.to_string());

        if let Some(rest) = key.strip_prefix(&self.services_prefix()) {
            if rest.is_empty() || rest.contains('/') {
                return Err(malformed());
            }
            return Ok(StoreKey::Service(decode_id(rest)?));
        }

        if let Some(rest) = key.strip_prefix(&self.nodes_prefix()) {
            let (service, node) = rest.split_once('/').ok_or_else(malformed)?;
            if service.is_empty() || node.is_empty() || node.contains('/') {
                return Err(malformed());
            }
            let service_id = decode_id(service)?;
            let (ip, port) = parse_address(&decode_id(node)?).ok_or_else(malformed)?;
            return Ok(StoreKey::Node {
                service_id,
                ip,
                port,
            });
        }

        Err(malformed())
    }
}
