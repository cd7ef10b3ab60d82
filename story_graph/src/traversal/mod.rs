//! Ego-network traversal scored with spreading activation.
//!
//! 1. **Seed**: The center node receives the initial energy
//! 2. **Expand**: Breadth-first over active edges, ignoring direction, up to the radius
//! 3. **Spread**: Each hop passes energy outward, scaled by edge weight and decay
//! 4. **Rank**: Members are ordered by accumulated energy, then distance

mod activation;

use activation::ActivationState;

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

use crate::error::{GraphError, Result};
use crate::{EdgeId, NodeId, StoryGraph};

/// Configuration for activation spreading during ego-network traversal.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ActivationConfig {
    /// Initial energy given to the center node.
    pub initial_energy: f32,

    /// Share of energy that survives each hop (0.0-1.0).
    pub decay_rate: f32,
}

impl Default for ActivationConfig {
    fn default() -> Self {
        Self {
            initial_energy: 1.0,
            decay_rate: 0.5,
        }
    }
}

/// A node reached from the center.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EgoMember {
    pub node_id: NodeId,
    pub hops: usize,
    pub activation: f32,
}

/// The subgraph within a fixed hop count of a node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EgoNetwork {
    pub center: NodeId,
    pub radius: usize,

    /// Center first, then by activation (descending) and distance.
    pub members: Vec<EgoMember>,

    /// Active edges with both endpoints inside the network.
    pub edges: Vec<EdgeId>,
}

impl EgoNetwork {
    pub fn contains(&self, node: NodeId) -> bool {
        self.members.iter().any(|m| m.node_id == node)
    }

    /// Members other than the center.
    pub fn neighbors(&self) -> impl Iterator<Item = &EgoMember> {
        self.members.iter().filter(move |m| m.node_id != self.center)
    }
}

impl StoryGraph {
    /// Ego network of `center` within `radius` hops, with default activation.
    pub fn ego_network(&self, center: NodeId, radius: usize) -> Result<EgoNetwork> {
        self.ego_network_with(center, radius, &ActivationConfig::default())
    }

    /// Ego network of `center` within `radius` hops.
    pub fn ego_network_with(
        &self,
        center: NodeId,
        radius: usize,
        config: &ActivationConfig,
    ) -> Result<EgoNetwork> {
        if self.node(center).is_none() {
            return Err(GraphError::NodeNotFound(center));
        }

        let mut state = ActivationState::new();
        let mut hops: HashMap<NodeId, usize> = HashMap::new();
        state.add_energy(center, config.initial_energy);
        hops.insert(center, 0);

        let mut frontier = vec![center];
        for depth in 0..radius {
            let mut next = Vec::new();
            let mut new_energies: HashMap<NodeId, f32> = HashMap::new();

            for &node in &frontier {
                let energy = state.get_energy(node);
                for edge in self.active_edges_touching(node) {
                    let Some(neighbor) = edge.other_end(node) else {
                        continue;
                    };
                    let neighbor_hops = *hops.entry(neighbor).or_insert_with(|| {
                        next.push(neighbor);
                        depth + 1
                    });
                    // Energy only flows outward.
                    if neighbor_hops == depth + 1 {
                        let spread = energy * edge.weight.clamp(0.0, 1.0) * config.decay_rate;
                        *new_energies.entry(neighbor).or_default() += spread;
                    }
                }
            }

            for (node, energy) in new_energies {
                state.add_energy(node, energy);
            }
            if next.is_empty() {
                break;
            }
            frontier = next;
        }

        let mut members: Vec<EgoMember> = hops
            .iter()
            .map(|(&node_id, &hops)| EgoMember {
                node_id,
                hops,
                activation: state.get_energy(node_id),
            })
            .collect();
        members.sort_by(|a, b| {
            a.hops
                .min(1)
                .cmp(&b.hops.min(1))
                .then(
                    b.activation
                        .partial_cmp(&a.activation)
                        .unwrap_or(std::cmp::Ordering::Equal),
                )
                .then(a.hops.cmp(&b.hops))
                .then(a.node_id.cmp(&b.node_id))
        });

        let inside: HashSet<NodeId> = hops.keys().copied().collect();
        let mut edges: Vec<EdgeId> = self
            .active_edges()
            .filter(|e| inside.contains(&e.source_id) && inside.contains(&e.target_id))
            .map(|e| e.id)
            .collect();
        edges.sort();

        Ok(EgoNetwork {
            center,
            radius,
            members,
            edges,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Edge, Node, NodeType, RelationType};

    /// mara - jon - harbor - lighthouse, plus a dormant edge mara - ghost.
    fn chain() -> (StoryGraph, Vec<NodeId>) {
        let mut graph = StoryGraph::new();
        let mara = graph.add_node(Node::character("Mara")).unwrap();
        let jon = graph.add_node(Node::character("Jon")).unwrap();
        let harbor = graph.add_node(Node::new(NodeType::Location, "Harbor")).unwrap();
        let lighthouse = graph
            .add_node(Node::new(NodeType::Location, "Lighthouse"))
            .unwrap();
        let ghost = graph.add_node(Node::character("Ghost")).unwrap();

        graph.add_edge(Edge::new(mara, jon, RelationType::Knows)).unwrap();
        graph
            .add_edge(Edge::new(jon, harbor, RelationType::LocatedIn))
            .unwrap();
        graph
            .add_edge(Edge::new(lighthouse, harbor, RelationType::PartOf))
            .unwrap();
        let dormant = graph
            .add_edge(Edge::new(ghost, mara, RelationType::Hinders))
            .unwrap();
        graph.deactivate_edge(dormant).unwrap();

        (graph, vec![mara, jon, harbor, lighthouse, ghost])
    }

    #[test]
    fn test_radius_limits_membership() {
        let (graph, ids) = chain();
        let ego = graph.ego_network(ids[0], 2).unwrap();

        assert!(ego.contains(ids[0]));
        assert!(ego.contains(ids[1]));
        assert!(ego.contains(ids[2]));
        assert!(!ego.contains(ids[3]), "three hops away");
        assert!(!ego.contains(ids[4]), "only reachable through an inactive edge");
        assert_eq!(ego.edges.len(), 2);
    }

    #[test]
    fn test_radius_zero_is_center_only() {
        let (graph, ids) = chain();
        let ego = graph.ego_network(ids[0], 0).unwrap();
        assert_eq!(ego.members.len(), 1);
        assert!(ego.edges.is_empty());
    }

    #[test]
    fn test_activation_decays_with_distance() {
        let (graph, ids) = chain();
        let ego = graph.ego_network(ids[0], 3).unwrap();

        assert_eq!(ego.members[0].node_id, ids[0]);
        let energy = |id: NodeId| {
            ego.members
                .iter()
                .find(|m| m.node_id == id)
                .map(|m| m.activation)
                .unwrap()
        };
        assert!(energy(ids[1]) > energy(ids[2]));
        assert!(energy(ids[2]) > energy(ids[3]));
        assert_eq!(ego.neighbors().count(), 3);
    }

    #[test]
    fn test_unknown_center() {
        let (graph, _) = chain();
        assert!(matches!(
            graph.ego_network(NodeId::new(), 1),
            Err(GraphError::NodeNotFound(_))
        ));
    }
}
