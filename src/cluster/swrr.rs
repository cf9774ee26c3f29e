//! Smooth weighted round-robin load balancing strategy (nginx style).

use crate::cluster::node::{push_lost, Liveness, Node};
use crate::cluster::{select_single, LoadBalancer};

#[derive(Debug)]
struct Peer {
    node: Node,
    current_weight: i64,
    /// Starts at `weight`; may sit below it while ramping back up.
    effective_weight: i64,
}

impl Peer {
    fn new(node: Node) -> Self {
        let effective_weight = node.weight as i64;
        Self {
            node,
            current_weight: 0,
            effective_weight,
        }
    }
}

/// Smooth weighted round-robin selector.
/// Spreads picks of heavy nodes across the period instead of bursting them.
#[derive(Debug, Default)]
pub struct SmoothWeightedRoundRobin {
    peers: Vec<Peer>,
}

impl SmoothWeightedRoundRobin {
    pub fn new() -> Self {
        Self::default()
    }

    /// Restart smoothing for every peer after any weight change.
    fn reset(&mut self) {
        for peer in &mut self.peers {
            peer.effective_weight = peer.node.weight as i64;
            peer.current_weight = 0;
        }
    }
}

impl LoadBalancer for SmoothWeightedRoundRobin {
    fn set(&mut self, node: Node) {
        if let Some(peer) = self.peers.iter_mut().find(|p| p.node.is(&node.ip, node.port)) {
            peer.node.refresh_from(&node);
            if peer.node.weight == node.weight {
                return;
            }
            peer.node.weight = node.weight;
            self.reset();
            return;
        }

        self.peers.push(Peer::new(node));
        self.reset();
    }

    fn remove(&mut self, ip: &str, port: u16) -> Option<Node> {
        let index = self.peers.iter().position(|p| p.node.is(ip, port))?;
        let removed = self.peers.remove(index);
        self.reset();
        Some(removed.node)
    }

    fn select(&mut self, now: i64, lost: &mut Vec<Node>) -> Option<Node> {
        match self.peers.len() {
            0 => return None,
            1 => return select_single(&self.peers[0].node, now, lost),
            _ => {}
        }

        let mut total_weight = 0i64;
        // (index, current_weight) of the leading peer
        let mut best: Option<(usize, i64)> = None;
        for (index, peer) in self.peers.iter_mut().enumerate() {
            match peer.node.liveness(now) {
                Liveness::Idle => continue,
                Liveness::Lost => {
                    push_lost(lost, &peer.node);
                    continue;
                }
                Liveness::Live => {}
            }

            peer.current_weight += peer.effective_weight;
            total_weight += peer.effective_weight;
            if peer.effective_weight < peer.node.weight as i64 {
                peer.effective_weight += 1;
            }
            match best {
                Some((_, lead)) if lead >= peer.current_weight => {}
                _ => best = Some((index, peer.current_weight)),
            }
        }

        let (index, _) = best?;
        let winner = &mut self.peers[index];
        winner.current_weight -= total_weight;
        Some(winner.node.clone())
    }

    fn iter(&self) -> Box<dyn Iterator<Item = &Node> + '_> {
        Box::new(self.peers.iter().map(|p| &p.node))
    }

    fn node_mut(&mut self, ip: &str, port: u16) -> Option<&mut Node> {
        self.peers
            .iter_mut()
            .map(|p| &mut p.node)
            .find(|n| n.is(ip, port))
    }

    fn total(&self) -> usize {
        self.peers.len()
    }
}
