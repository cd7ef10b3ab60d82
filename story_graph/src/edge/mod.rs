//! Edge definitions - directed narrative relations between nodes.

mod relation;

pub use relation::*;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{NodeId, Provenance};

/// Unique identifier for edges.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EdgeId(pub Uuid);

impl EdgeId {
    /// Create a new random edge ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for EdgeId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for EdgeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A directed relation `source_id -> target_id`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Edge {
    pub id: EdgeId,
    pub source_id: NodeId,
    pub target_id: NodeId,
    pub relation: RelationType,
    pub description: String,

    /// Strength of the relation; feeds tension scoring.
    pub weight: f32,

    /// Obstacles and conflicts are deactivated, never deleted.
    pub is_active: bool,

    pub source: Provenance,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Edge {
    /// Create a new active edge with weight 1.0.
    pub fn new(source_id: NodeId, target_id: NodeId, relation: RelationType) -> Self {
        let now = Utc::now();
        Self {
            id: EdgeId::new(),
            source_id,
            target_id,
            relation,
            description: String::new(),
            weight: 1.0,
            is_active: true,
            source: Provenance::Manual,
            created_at: now,
            updated_at: now,
        }
    }

    /// Set the description.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Set the weight. Validation happens when the edge enters the graph.
    pub fn with_weight(mut self, weight: f32) -> Self {
        self.weight = weight;
        self
    }

    /// Set the provenance.
    pub fn with_source(mut self, source: Provenance) -> Self {
        self.source = source;
        self
    }

    /// Whether this edge touches `node` at either end.
    pub fn touches(&self, node: NodeId) -> bool {
        self.source_id == node || self.target_id == node
    }

    /// The endpoint opposite `node`, if the edge touches it.
    pub fn other_end(&self, node: NodeId) -> Option<NodeId> {
        if self.source_id == node {
            Some(self.target_id)
        } else if self.target_id == node {
            Some(self.source_id)
        } else {
            None
        }
    }

    /// Whether this edge joins `a` and `b` in either direction.
    pub fn connects(&self, a: NodeId, b: NodeId) -> bool {
        (self.source_id == a && self.target_id == b) || (self.source_id == b && self.target_id == a)
    }
}
