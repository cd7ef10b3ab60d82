//! Errors raised by graph mutations and lookups.

use thiserror::Error;

use crate::{ConflictId, EdgeId, NodeId, NodeType};

/// Failures of graph operations.
#[derive(Debug, Error)]
pub enum GraphError {
    #[error("node not found: {0}")]
    NodeNotFound(NodeId),

    #[error("edge not found: {0}")]
    EdgeNotFound(EdgeId),

    #[error("conflict not found: {0}")]
    ConflictNotFound(ConflictId),

    #[error("edge endpoint does not exist: {0}")]
    MissingEndpoint(NodeId),

    #[error("a {node_type} node named '{name}' already exists")]
    DuplicateName { node_type: NodeType, name: String },

    #[error("node name must not be empty")]
    EmptyName,

    #[error("edge weight must be finite and non-negative, got {0}")]
    InvalidWeight(f32),

    #[error("graph serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result alias for graph operations.
pub type Result<T> = std::result::Result<T, GraphError>;
