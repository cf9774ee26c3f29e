//! Weighted round-robin load balancing strategy (LVS style).
//!
//! A cursor walks the node list; each time it wraps to the front the
//! admission threshold `current_weight` drops by the GCD of all weights and
//! restarts at the maximum weight once exhausted. A node is picked when its
//! weight reaches the threshold.

use crate::cluster::node::{push_lost, scan_live, Liveness, Node};
use crate::cluster::{select_single, LoadBalancer};

/// Weighted round-robin selector.
#[derive(Debug, Default)]
pub struct WeightedRoundRobin {
    nodes: Vec<Node>,
    weight_gcd: u32,
    max_weight: u32,
    /// Index of the last visited node. `None` before the first pass.
    last_index: Option<usize>,
    current_weight: i64,
}

impl WeightedRoundRobin {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn weight_gcd(&self) -> u32 {
        self.weight_gcd
    }

    pub fn max_weight(&self) -> u32 {
        self.max_weight
    }

    /// Refold GCD and maximum over the current weights and restart the cursor.
    /// Called after every weight change, including inserts and removals.
    fn recompute_derived_state(&mut self) {
        let weights = self.nodes.iter().map(|n| n.weight).filter(|w| *w > 0);
        self.weight_gcd = weights.clone().fold(0, gcd);
        self.max_weight = weights.max().unwrap_or(0);
        self.last_index = None;
        self.current_weight = 0;
    }
}

impl LoadBalancer for WeightedRoundRobin {
    fn set(&mut self, node: Node) {
        if let Some(existing) = self.nodes.iter_mut().find(|n| n.is(&node.ip, node.port)) {
            existing.refresh_from(&node);
            if existing.weight == node.weight {
                return;
            }
            existing.weight = node.weight;
            self.recompute_derived_state();
            return;
        }

        self.nodes.push(node);
        self.recompute_derived_state();
    }

    fn remove(&mut self, ip: &str, port: u16) -> Option<Node> {
        let index = self.nodes.iter().position(|n| n.is(ip, port))?;
        let removed = self.nodes.remove(index);
        self.recompute_derived_state();
        Some(removed)
    }

    fn select(&mut self, now: i64, lost: &mut Vec<Node>) -> Option<Node> {
        let len = self.nodes.len();
        match len {
            0 => return None,
            1 => return select_single(&self.nodes[0], now, lost),
            _ => {}
        }
        let live = scan_live(self.nodes.iter(), now, lost);
        if live.max == 0 {
            return None;
        }

        // One sweep per threshold level is enough to reach any live node
        let levels = (live.max / self.weight_gcd) as usize + 1;
        for _ in 0..len * levels {
            let index = match self.last_index {
                Some(last) => (last + 1) % len,
                None => 0,
            };
            self.last_index = Some(index);

            if index == 0 {
                self.current_weight -= self.weight_gcd as i64;
                if self.current_weight <= 0 {
                    self.current_weight = self.max_weight as i64;
                }
                // Levels above the heaviest live node could only admit dead ones
                self.current_weight = self.current_weight.min(live.max as i64);
            }

            let node = &self.nodes[index];
            match node.liveness(now) {
                Liveness::Idle => continue,
                Liveness::Lost => push_lost(lost, node),
                Liveness::Live => {
                    if node.weight as i64 >= self.current_weight {
                        return Some(node.clone());
                    }
                }
            }
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

/// Greatest common divisor. `gcd(0, x) == x`.
fn gcd(a: u32, b: u32) -> u32 {
    let (mut a, mut b) = (a, b);
    while b != 0 {
        let r = a % b;
        a = b;
        b = r;
    }
    a
}
