//! Tension and pacing heuristics derived from edge types.

use serde::{Deserialize, Serialize};

use story_graph::{Edge, RelationType, StoryGraph};

use crate::config::AnalyzerConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TensionLevel {
    Low,
    Medium,
    High,
}

impl TensionLevel {
    fn recommendation(&self) -> &'static str {
        match self {
            TensionLevel::Low => {
                "Tension is low. Put an obstacle in a character's way or plant a new thread."
            }
            TensionLevel::Medium => {
                "Tension is building. Keep pressure on the open obstacles before paying them off."
            }
            TensionLevel::High => {
                "Tension is high. Consider resolving an obstacle or paying off a foreshadowed thread."
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TensionReport {
    /// Normalized score in [0, 1].
    pub score: f32,
    /// Weighted sum before normalization.
    pub raw: f32,
    pub level: TensionLevel,
    pub active_hinders: usize,
    pub unresolved_foreshadows: usize,
    /// Active CONTRADICTS edges plus open conflicts.
    pub contradictions: usize,
    pub recommendation: String,
}

pub(crate) fn tension(graph: &StoryGraph, config: &AnalyzerConfig) -> TensionReport {
    let active: Vec<&Edge> = graph.active_edges().collect();

    let hinders: Vec<&&Edge> = active
        .iter()
        .filter(|e| e.relation == RelationType::Hinders)
        .collect();
    let hinders_weight: f32 = hinders.iter().map(|e| e.weight).sum();

    let unresolved_foreshadows = active
        .iter()
        .filter(|e| e.relation == RelationType::Foreshadows)
        .filter(|f| {
            !active
                .iter()
                .any(|e| e.relation == RelationType::Callbacks && e.connects(f.source_id, f.target_id))
        })
        .count();

    let contradictions = active
        .iter()
        .filter(|e| e.relation == RelationType::Contradicts)
        .count()
        + graph.open_conflicts().len();

    let raw = config.hinders_weight * hinders_weight
        + config.foreshadows_weight * unresolved_foreshadows as f32
        + config.contradicts_weight * contradictions as f32;
    let score = (1.0 - (-raw / config.tension_scale).exp()).clamp(0.0, 1.0);

    let level = if score >= config.tension_high_threshold {
        TensionLevel::High
    } else if score >= config.tension_medium_threshold {
        TensionLevel::Medium
    } else {
        TensionLevel::Low
    };

    TensionReport {
        score,
        raw,
        level,
        active_hinders: hinders.len(),
        unresolved_foreshadows,
        contradictions,
        recommendation: level.recommendation().to_string(),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PacingLabel {
    Fast,
    Slow,
    Balanced,
    Concluding,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PacingReport {
    pub action: usize,
    pub setup: usize,
    pub resolution: usize,
    pub action_ratio: f32,
    pub setup_ratio: f32,
    pub resolution_ratio: f32,
    pub label: PacingLabel,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Beat {
    Action,
    Setup,
    Resolution,
}

fn classify(edge: &Edge) -> Option<Beat> {
    use RelationType::*;
    match (&edge.relation, edge.is_active) {
        (Hinders | Challenges | Causes | Hates | Contradicts, true) => Some(Beat::Action),
        (Foreshadows | Motivates | Knows | LocatedIn | Owns | PartOf | Loves, true) => Some(Beat::Setup),
        (Callbacks, true) => Some(Beat::Resolution),
        // An obstacle or contradiction that was cleared.
        (Hinders | Contradicts, false) => Some(Beat::Resolution),
        _ => None,
    }
}

pub(crate) fn pacing(graph: &StoryGraph, config: &AnalyzerConfig) -> PacingReport {
    let (mut action, mut setup, mut resolution) = (0, 0, 0);
    for edge in graph.edges() {
        match classify(edge) {
            Some(Beat::Action) => action += 1,
            Some(Beat::Setup) => setup += 1,
            Some(Beat::Resolution) => resolution += 1,
            None => {}
        }
    }

    let total = (action + setup + resolution) as f32;
    let ratio = |count: usize| if total > 0.0 { count as f32 / total } else { 0.0 };
    let (action_ratio, setup_ratio, resolution_ratio) = (ratio(action), ratio(setup), ratio(resolution));

    let label = if total == 0.0 {
        PacingLabel::Balanced
    } else if resolution_ratio >= config.pacing_concluding_threshold {
        PacingLabel::Concluding
    } else if action_ratio >= config.pacing_fast_threshold {
        PacingLabel::Fast
    } else if setup_ratio >= config.pacing_slow_threshold {
        PacingLabel::Slow
    } else {
        PacingLabel::Balanced
    };

    PacingReport {
        action,
        setup,
        resolution,
        action_ratio,
        setup_ratio,
        resolution_ratio,
        label,
    }
}
