//! Node abstraction.
//!
//! # Responsibilities
//! - Represent a single selectable endpoint of a service
//! - Decide whether a node may be selected right now (liveness)
//! - Compute expiry deadlines from a TTL

use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

/// Largest weight a node may carry.
pub const MAX_WEIGHT: u32 = u16::MAX as u32;

/// A single endpoint registered under a service.
///
/// `(ip, port)` is the identity of a node within one cluster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    pub ip: String,
    pub port: u16,
    /// Relative share of selections. 0 parks the node.
    #[serde(default)]
    pub weight: u32,
    /// Lifetime in seconds. 0 means the node never expires.
    #[serde(default)]
    pub ttl: u32,
    /// Absolute deadline (unix seconds). 0 means no deadline.
    #[serde(default)]
    pub expires: i64,
    /// Opaque payload passed through unmodified.
    #[serde(default)]
    pub meta: String,
}

/// How a node behaves during a selection pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Liveness {
    /// Eligible for selection.
    Live,
    /// Zero weight: skipped, but not reported.
    Idle,
    /// TTL elapsed: skipped and reported for cleanup.
    Lost,
}

impl Node {
    pub fn new(ip: impl Into<String>, port: u16, weight: u32) -> Self {
        Self {
            ip: ip.into(),
            port,
            weight,
            ttl: 0,
            expires: 0,
            meta: String::new(),
        }
    }

    /// Set a TTL and derive the deadline from `now`.
    pub fn with_ttl(mut self, ttl: u32, now: i64) -> Self {
        self.ttl = ttl;
        self.expires = deadline(ttl, now);
        self
    }

    pub fn with_meta(mut self, meta: impl Into<String>) -> Self {
        self.meta = meta.into();
        self
    }

    /// True if this node has the given identity.
    pub fn is(&self, ip: &str, port: u16) -> bool {
        self.port == port && self.ip == ip
    }

    /// `ip:port`, the form used in storage keys and URLs.
    pub fn address(&self) -> String {
        format!("{}:{}", self.ip, self.port)
    }

    pub fn is_expired(&self, now: i64) -> bool {
        self.ttl > 0 && self.expires != 0 && self.expires <= now
    }

    pub fn liveness(&self, now: i64) -> Liveness {
        if self.is_expired(now) {
            Liveness::Lost
        } else if self.weight == 0 {
            Liveness::Idle
        } else {
            Liveness::Live
        }
    }

    /// Copy everything except the weight from `other`.
    pub(crate) fn refresh_from(&mut self, other: &Node) {
        self.ttl = other.ttl;
        self.expires = other.expires;
        if self.meta != other.meta {
            self.meta = other.meta.clone();
        }
    }
}

/// Current time in unix seconds.
pub fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}

/// Deadline for a node refreshed at `now`. A zero TTL has no deadline.
pub fn deadline(ttl: u32, now: i64) -> i64 {
    if ttl == 0 {
        0
    } else {
        now + ttl as i64
    }
}

/// Split an `ip:port` string. The port is taken after the last colon so
/// bare IPv6 addresses keep their own colons.
pub fn parse_address(addr: &str) -> Option<(String, u16)> {
    let pos = addr.rfind(':')?;
    let ip = &addr[..pos];
    let port: u16 = addr[pos + 1..].parse().ok()?;
    if ip.is_empty() || port == 0 {
        return None;
    }
    Some((ip.to_string(), port))
}

/// Record a lost node once per selection pass.
pub(crate) fn push_lost(lost: &mut Vec<Node>, node: &Node) {
    if !lost.iter().any(|n| n.is(&node.ip, node.port)) {
        lost.push(node.clone());
    }
}

/// Totals over the nodes that may be selected right now.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct LiveScan {
    pub weight: u64,
    pub max: u32,
}

/// One liveness pass: sums live weights and reports lost nodes.
pub(crate) fn scan_live<'a>(
    nodes: impl Iterator<Item = &'a Node>,
    now: i64,
    lost: &mut Vec<Node>,
) -> LiveScan {
    let mut scan = LiveScan::default();
    for node in nodes {
        match node.liveness(now) {
            Liveness::Live => {
                scan.weight += node.weight as u64;
                scan.max = scan.max.max(node.weight);
            }
            Liveness::Lost => push_lost(lost, node),
            Liveness::Idle => {}
        }
    }
    scan
}
