//! Overlay topologies consumed by the network coordinator
//!
//! A [`Topology`] lists, per node index, the node id, its listening port and
//! its neighbors. The coordinator takes it as given: connectivity and degree
//! bounds are the provider's business.

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet, VecDeque};

use crate::config::BASE_PORT;
use crate::error::RumorError;
use crate::message::NodeId;

/// Neighbor of a node as listed by a topology
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Neighbor {
    pub id: NodeId,
    pub port: u16,
}

/// One node of an overlay
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopologyEntry {
    /// Stable node id, also the node's ack bitmap slot
    pub id: NodeId,
    /// UDP port the node listens on
    pub port: u16,
    /// Nodes this node gossips with
    pub neighbors: Vec<Neighbor>,
}

/// Overlay description: entry `i` describes node index `i`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Topology {
    entries: Vec<TopologyEntry>,
}

impl Topology {
    pub fn from_entries(entries: Vec<TopologyEntry>) -> Self {
        Self { entries }
    }

    /// Every node neighbors every other node
    pub fn fully_connected(size: usize, base_port: u16) -> Result<Self, RumorError> {
        check_port_range(size, base_port)?;
        let port = |id: NodeId| base_port + id as u16;

        let entries = (0..size)
            .map(|id| TopologyEntry {
                id,
                port: port(id),
                neighbors: (0..size)
                    .filter(|other| *other != id)
                    .map(|other| Neighbor {
                        id: other,
                        port: port(other),
                    })
                    .collect(),
            })
            .collect();

        Ok(Self { entries })
    }

    pub fn entries(&self) -> &[TopologyEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entry at node index `index`
    pub fn get(&self, index: usize) -> Option<&TopologyEntry> {
        self.entries.get(index)
    }

    /// Number of neighbors of node index `index`
    pub fn degree(&self, index: usize) -> usize {
        self.entries.get(index).map_or(0, |entry| entry.neighbors.len())
    }

    /// Whether every node can reach every other node along neighbor links
    pub fn is_connected(&self) -> bool {
        let Some(first) = self.entries.first() else {
            return true;
        };

        let mut visited = HashSet::from([first.id]);
        let mut frontier = VecDeque::from([first]);
        while let Some(entry) = frontier.pop_front() {
            for neighbor in &entry.neighbors {
                if visited.insert(neighbor.id) {
                    if let Some(next) = self.entries.iter().find(|e| e.id == neighbor.id) {
                        frontier.push_back(next);
                    }
                }
            }
        }

        self.entries.iter().all(|entry| visited.contains(&entry.id))
    }
}

/// Source of overlay topologies
pub trait TopologyProvider {
    fn topology(&self) -> Result<Topology, RumorError>;
}

impl TopologyProvider for Topology {
    fn topology(&self) -> Result<Topology, RumorError> {
        Ok(self.clone())
    }
}

/// Random connected overlay with bounded node degrees
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RandomTopology {
    pub size: usize,
    pub min_degree: usize,
    pub max_degree: usize,
    pub base_port: u16,
    /// Fixed seed for reproducible graphs
    pub seed: Option<u64>,
}

impl RandomTopology {
    pub fn new(size: usize, min_degree: usize, max_degree: usize) -> Self {
        Self {
            size,
            min_degree,
            max_degree,
            base_port: BASE_PORT,
            seed: None,
        }
    }

    pub fn with_base_port(mut self, base_port: u16) -> Self {
        self.base_port = base_port;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Build a graph with the given random source
    ///
    /// A random spanning tree keeps the graph connected, then extra edges
    /// are added until every node reaches `min_degree` where `max_degree`
    /// allows it.
    pub fn generate_with<R: Rng + ?Sized>(&self, rng: &mut R) -> Result<Topology, RumorError> {
        if self.size == 0 {
            return Err(RumorError::topology("network size must be greater than zero"));
        }
        if self.min_degree > self.max_degree {
            return Err(RumorError::topology(format!(
                "min degree {} exceeds max degree {}",
                self.min_degree, self.max_degree
            )));
        }
        if self.size > 1 && self.max_degree == 0 {
            return Err(RumorError::topology("max degree must allow at least one neighbor"));
        }
        check_port_range(self.size, self.base_port)?;

        let n = self.size;
        let max_degree = self.max_degree.min(n - 1);
        let min_degree = self.min_degree.min(max_degree);
        let mut adjacency: Vec<BTreeSet<NodeId>> = vec![BTreeSet::new(); n];

        let mut order: Vec<NodeId> = (0..n).collect();
        order.shuffle(rng);
        for k in 1..order.len() {
            let node = order[k];
            let open: Vec<NodeId> = order[..k]
                .iter()
                .copied()
                .filter(|other| adjacency[*other].len() < max_degree)
                .collect();
            let pool = if open.is_empty() { &order[..k] } else { &open[..] };
            if let Some(&peer) = pool.choose(rng) {
                adjacency[node].insert(peer);
                adjacency[peer].insert(node);
            }
        }

        for node in 0..n {
            if adjacency[node].len() >= min_degree {
                continue;
            }
            let mut candidates: Vec<NodeId> = (0..n)
                .filter(|other| *other != node && !adjacency[node].contains(other))
                .collect();
            candidates.shuffle(rng);
            for other in candidates {
                if adjacency[node].len() >= min_degree {
                    break;
                }
                if adjacency[other].len() < max_degree {
                    adjacency[node].insert(other);
                    adjacency[other].insert(node);
                }
            }
        }

        let port = |id: NodeId| self.base_port + id as u16;
        let entries = adjacency
            .into_iter()
            .enumerate()
            .map(|(id, neighbors)| TopologyEntry {
                id,
                port: port(id),
                neighbors: neighbors
                    .into_iter()
                    .map(|other| Neighbor {
                        id: other,
                        port: port(other),
                    })
                    .collect(),
            })
            .collect();

        Ok(Topology { entries })
    }
}

impl TopologyProvider for RandomTopology {
    fn topology(&self) -> Result<Topology, RumorError> {
        match self.seed {
            Some(seed) => self.generate_with(&mut StdRng::seed_from_u64(seed)),
            None => self.generate_with(&mut rand::thread_rng()),
        }
    }
}

fn check_port_range(size: usize, base_port: u16) -> Result<(), RumorError> {
    if base_port as usize + size > u16::MAX as usize + 1 {
        return Err(RumorError::topology(format!(
            "{} nodes do not fit above port {}",
            size, base_port
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fully_connected() {
        let topology = Topology::fully_connected(4, 9080).unwrap();
        assert_eq!(topology.len(), 4);
        for (index, entry) in topology.entries().iter().enumerate() {
            assert_eq!(entry.id, index);
            assert_eq!(entry.port, 9080 + index as u16);
            assert_eq!(topology.degree(index), 3);
            assert!(entry.neighbors.iter().all(|n| n.id != entry.id));
        }
        assert!(topology.is_connected());
    }

    #[test]
    fn test_random_topology_is_connected_and_bounded() {
        for seed in 0..20 {
            let topology = RandomTopology::new(30, 2, 5)
                .with_seed(seed)
                .topology()
                .unwrap();

            assert_eq!(topology.len(), 30);
            assert!(topology.is_connected(), "seed {} not connected", seed);
            for index in 0..topology.len() {
                assert!(topology.degree(index) >= 1);
                assert!(topology.degree(index) <= 5);
            }
        }
    }

    #[test]
    fn test_random_topology_is_symmetric() {
        let topology = RandomTopology::new(12, 1, 4).with_seed(3).topology().unwrap();
        for entry in topology.entries() {
            for neighbor in &entry.neighbors {
                let back = topology.get(neighbor.id).unwrap();
                assert!(back.neighbors.iter().any(|n| n.id == entry.id));
                assert_eq!(neighbor.port, back.port);
            }
        }
    }

    #[test]
    fn test_seeded_topology_is_reproducible() {
        let a = RandomTopology::new(10, 1, 3).with_seed(11).topology().unwrap();
        let b = RandomTopology::new(10, 1, 3).with_seed(11).topology().unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_invalid_random_parameters() {
        assert!(RandomTopology::new(0, 1, 5).topology().is_err());
        assert!(RandomTopology::new(5, 4, 2).topology().is_err());
        assert!(RandomTopology::new(5, 0, 0).topology().is_err());
        assert!(RandomTopology::new(10, 1, 3)
            .with_base_port(65530)
            .topology()
            .is_err());
    }

    #[test]
    fn test_single_node_topology() {
        let topology = RandomTopology::new(1, 1, 5).topology().unwrap();
        assert_eq!(topology.len(), 1);
        assert_eq!(topology.degree(0), 0);
        assert!(topology.is_connected());
    }
}
