//! # Story Graph
//!
//! The single source of narrative truth: characters, locations, plot beats and
//! thematic rules stored as typed nodes joined by a closed vocabulary of
//! narrative relations. This crate holds no retrieval or AI logic.
//!
//! ## Core Components
//!
//! - **node**: Typed nodes with identity, provenance and optional embeddings
//! - **edge**: Directed relations drawn from the narrative vocabulary
//! - **graph**: The in-memory graph, its indexes, the conflict queue and the
//!   single-writer [`GraphStore`]
//! - **traversal**: Ego networks scored with spreading activation
//!
//! Nodes and edges are merged by name and deactivated rather than deleted, so
//! the history of a story stays inspectable.

pub mod edge;
pub mod error;
pub mod graph;
pub mod node;
pub mod traversal;

pub use edge::*;
pub use error::*;
pub use graph::*;
pub use node::*;
pub use traversal::*;
