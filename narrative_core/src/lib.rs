//! # Narrative Core (The Cortex)
//!
//! Retrieval and analytics over the story graph. This crate reads the
//! `story_graph` snapshot, turns free-text questions into budgeted context for
//! a downstream model, and keeps the graph in sync with new scenes.
//!
//! ## Core Components
//!
//! - **classifier**: Rule-based intent, entity and keyword extraction
//! - **embedding**: Model-tagged vector index with pluggable providers
//! - **extractor**: Scene text to validated graph proposals
//! - **analyzer**: Communities, bridge characters, tension and pacing
//! - **context_assembler**: Priority-ordered, token-budgeted context with an audit manifest
//! - **sources**: Story bible and decision log lookups
//! - **router**: The query facade tying the above together
//!
//! ## Design Philosophy
//!
//! - **Graph-First**: The graph store is the only ground truth; analytics are recomputed, never stored
//! - **Degrade, Don't Fail**: A slow or broken optional source costs a section, not the query
//! - **Explicit Configuration**: One immutable [`NarrativeConfig`] is handed to every component

pub mod analyzer;
pub mod classifier;
pub mod config;
pub mod context_assembler;
pub mod embedding;
pub mod error;
pub mod extractor;
pub mod router;
pub mod sources;

pub use analyzer::*;
pub use classifier::*;
pub use config::*;
pub use context_assembler::*;
pub use embedding::*;
pub use error::*;
pub use extractor::*;
pub use router::*;
pub use sources::*;
