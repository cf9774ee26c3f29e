//! Weighted random load balancing strategy.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::fmt;

use crate::cluster::node::{scan_live, Liveness, Node};
use crate::cluster::{select_single, LoadBalancer};

/// Weighted random selector.
/// Each live node is picked with probability `weight / live_weight`.
pub struct WeightedRandom {
    nodes: Vec<Node>,
    /// Running sum of all node weights, live or not.
    total_weight: u64,
    rng: StdRng,
}

impl WeightedRandom {
    pub fn new() -> Self {
        Self {
            nodes: Vec::new(),
            total_weight: 0,
            rng: StdRng::from_entropy(),
        }
    }

    pub fn total_weight(&self) -> u64 {
        self.total_weight
    }

    fn reseed(&mut self) {
        self.rng = StdRng::from_entropy();
    }
}

impl Default for WeightedRandom {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for WeightedRandom {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WeightedRandom")
            .field("nodes", &self.nodes)
            .field("total_weight", &self.total_weight)
            .finish_non_exhaustive()
    }
}

impl LoadBalancer for WeightedRandom {
    fn set(&mut self, node: Node) {
        if let Some(existing) = self.nodes.iter_mut().find(|n| n.is(&node.ip, node.port)) {
            existing.refresh_from(&node);
            if existing.weight == node.weight {
                return;
            }
            self.total_weight = self.total_weight + node.weight as u64 - existing.weight as u64;
            existing.weight = node.weight;
            self.reseed();
            return;
        }

        self.total_weight += node.weight as u64;
        self.nodes.push(node);
        self.reseed();
    }

    fn remove(&mut self, ip: &str, port: u16) -> Option<Node> {
        let index = self.nodes.iter().position(|n| n.is(ip, port))?;
        let removed = self.nodes.remove(index);
        self.total_weight -= removed.weight as u64;
        self.reseed();
        Some(removed)
    }

    fn select(&mut self, now: i64, lost: &mut Vec<Node>) -> Option<Node> {
        match self.nodes.len() {
            0 => return None,
            1 => return select_single(&self.nodes[0], now, lost),
            _ => {}
        }

        // Expired and parked nodes take no share of the draw
        let live_weight = scan_live(self.nodes.iter(), now, lost).weight;
        if live_weight == 0 {
            return None;
        }
        debug_assert!(live_weight <= self.total_weight);

        let mut point = self.rng.gen_range(0..live_weight);
        for node in &self.nodes {
            if node.liveness(now) != Liveness::Live {
                continue;
            }
            let weight = node.weight as u64;
            if point < weight {
                return Some(node.clone());
            }
            point -= weight;
        }
        None
    }

    fn iter(&self) -> Box<dyn Iterator<Item = &Node> + '_> {
        Box::new(self.nodes.iter())
    }

    fn node_mut(&mut self, ip: &str, port: u16) -> Option<&mut Node> {
        self.nodes.iter_mut().find(|n| n.is(ip, port))
    }

    fn total(&self) -> usize {
        self.nodes.len()
    }
}
