//! Conflict queue entries - proposed contradictions awaiting review.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{EdgeId, NodeId, Provenance};

/// Unique identifier for conflicts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConflictId(pub Uuid);

impl ConflictId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConflictId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ConflictId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Review state of a conflict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConflictStatus {
    Open,
    /// Accepted by the author; the contradiction now exists as this edge.
    Accepted(EdgeId),
    Dismissed,
}

/// A proposed `CONTRADICTS` relation kept out of the accepted facts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConflictRecord {
    pub id: ConflictId,
    pub source_id: NodeId,
    pub target_id: NodeId,
    pub description: String,
    pub proposed_by: Provenance,
    pub status: ConflictStatus,
    pub created_at: DateTime<Utc>,
}

impl ConflictRecord {
    pub fn new(source_id: NodeId, target_id: NodeId, description: impl Into<String>) -> Self {
        Self {
            id: ConflictId::new(),
            source_id,
            target_id,
            description: description.into(),
            proposed_by: Provenance::Manual,
            status: ConflictStatus::Open,
            created_at: Utc::now(),
        }
    }

    pub fn with_source(mut self, source: Provenance) -> Self {
        self.proposed_by = source;
        self
    }

    pub fn is_open(&self) -> bool {
        self.status == ConflictStatus::Open
    }
}
