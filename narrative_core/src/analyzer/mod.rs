//! Graph Analyzer - narrative analytics over a graph snapshot.
//!
//! Every result is recomputed from the snapshot it is given; nothing here is
//! cached or written back to the graph.

mod centrality;
mod community;
mod health;

pub use centrality::BridgeCharacter;
pub use community::{Community, CommunityMethod, CommunityReport};
pub use health::{PacingLabel, PacingReport, TensionLevel, TensionReport};

use std::sync::Arc;
use tracing::debug;

use story_graph::StoryGraph;

use crate::config::NarrativeConfig;
use community::CharacterProjection;

/// Community, centrality, tension and pacing analytics.
pub struct GraphAnalyzer {
    config: Arc<NarrativeConfig>,
}

impl GraphAnalyzer {
    pub fn new(config: Arc<NarrativeConfig>) -> Self {
        Self { config }
    }

    /// Cluster characters over the undirected projection of active edges.
    pub fn detect_communities(&self, graph: &StoryGraph) -> CommunityReport {
        let projection = CharacterProjection::build(graph);
        let report = community::detect(&projection, self.config.analyzer.min_modularity);
        debug!(
            characters = projection.len(),
            communities = report.communities.len(),
            modularity = report.modularity,
            method = ?report.method,
            "detected communities"
        );
        report
    }

    /// Characters that connect otherwise separate parts of the cast, top
    /// `analyzer.bridge_count` by betweenness.
    pub fn find_bridge_characters(&self, graph: &StoryGraph) -> Vec<BridgeCharacter> {
        let projection = CharacterProjection::build(graph);
        centrality::rank_bridges(&projection, self.config.analyzer.bridge_count)
    }

    /// Weighted count of open obstacles, unresolved foreshadowing and
    /// contradictions, normalized to [0, 1]. Deactivated edges do not count.
    pub fn calculate_tension(&self, graph: &StoryGraph) -> TensionReport {
        health::tension(graph, &self.config.analyzer)
    }

    pub fn calculate_pacing(&self, graph: &StoryGraph) -> PacingReport {
        health::pacing(graph, &self.config.analyzer)
    }
}
