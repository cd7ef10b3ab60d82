//! Energy bookkeeping for spreading activation.

use std::collections::HashMap;

use crate::NodeId;

/// Accumulated activation energy per node.
#[derive(Debug, Clone, Default)]
pub(crate) struct ActivationState {
    energies: HashMap<NodeId, f32>,
}

impl ActivationState {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Energy accumulates across every path that reaches the node.
    pub(crate) fn add_energy(&mut self, node: NodeId, energy: f32) {
        *self.energies.entry(node).or_insert(0.0) += energy;
    }

    pub(crate) fn get_energy(&self, node: NodeId) -> f32 {
        self.energies.get(&node).copied().unwrap_or(0.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_energy_accumulates_per_node() {
        let mut state = ActivationState::new();
        let node = NodeId::new();

        state.add_energy(node, 0.3);
        state.add_energy(node, 0.4);

        assert!((state.get_energy(node) - 0.7).abs() < 0.001);
        assert_eq!(state.get_energy(NodeId::new()), 0.0);
    }
}
