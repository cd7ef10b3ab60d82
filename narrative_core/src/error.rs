//! Typed failures for narrative operations.

use thiserror::Error;

use story_graph::{GraphError, NodeId};

/// Failures surfaced by the narrative components.
///
/// Classification ambiguity, missing entities, optional-source failures and
/// hard-budget overruns are not errors: they are reported in the assembly
/// manifest instead.
#[derive(Debug, Error)]
pub enum NarrativeError {
    #[error("graph error: {0}")]
    Graph(#[from] GraphError),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("embedding provider failed: {0}")]
    Embedding(String),

    #[error("embedding provider timed out after {0} ms")]
    EmbeddingTimeout(u64),

    #[error("node {0} has no description to embed")]
    MissingDescription(NodeId),

    #[error("scene inference failed: {0}")]
    Inference(String),

    #[error("extraction output rejected: {0}")]
    ExtractionSchema(String),

    #[error("knowledge source '{source_name}' failed: {message}")]
    Source { source_name: String, message: String },

    #[error("no node named '{0}'")]
    UnknownEntity(String),
}

impl NarrativeError {
    pub fn source_failure(source_name: impl Into<String>, message: impl Into<String>) -> Self {
        NarrativeError::Source {
            source_name: source_name.into(),
            message: message.into(),
        }
    }
}

/// Result alias for narrative operations.
pub type Result<T> = std::result::Result<T, NarrativeError>;
