//! Audit manifest describing what an assembly kept and dropped.

use serde::{Deserialize, Serialize};

use crate::embedding::SearchMode;

/// Context sections in priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SectionKind {
    /// Weakness, belief and arc of every queried entity. Never truncated.
    CharacterCore,
    ActiveScene,
    /// Edges among the queried entities.
    Relationships,
    /// Beats and the queried entities' surroundings.
    Structure,
    WorldRules,
    DecisionLog,
    /// Semantic search and other free-text results.
    Supplementary,
}

impl SectionKind {
    pub const ALL: [SectionKind; 7] = [
        SectionKind::CharacterCore,
        SectionKind::ActiveScene,
        SectionKind::Relationships,
        SectionKind::Structure,
        SectionKind::WorldRules,
        SectionKind::DecisionLog,
        SectionKind::Supplementary,
    ];

    /// 1 is the highest priority.
    pub fn priority(&self) -> u8 {
        match self {
            SectionKind::CharacterCore => 1,
            SectionKind::ActiveScene => 2,
            SectionKind::Relationships => 3,
            SectionKind::Structure => 4,
            SectionKind::WorldRules => 5,
            SectionKind::DecisionLog => 6,
            SectionKind::Supplementary => 7,
        }
    }

    pub fn title(&self) -> &'static str {
        match self {
            SectionKind::CharacterCore => "Character Core",
            SectionKind::ActiveScene => "Active Scene",
            SectionKind::Relationships => "Relationships",
            SectionKind::Structure => "Story Structure",
            SectionKind::WorldRules => "World Rules",
            SectionKind::DecisionLog => "Recent Decisions",
            SectionKind::Supplementary => "Related Material",
        }
    }
}

/// Why a section is missing from the output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OmissionReason {
    /// Nothing to include.
    Empty,
    /// Not even one item fit in the remaining budget.
    BudgetExhausted,
    /// A higher-priority section was already cut.
    HigherPriorityTruncated,
    /// Character core alone exceeds the budget.
    HardBudget,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SectionStatus {
    Included,
    Truncated { kept: usize, dropped: usize },
    Omitted { reason: OmissionReason },
}

impl SectionStatus {
    pub fn is_present(&self) -> bool {
        !matches!(self, SectionStatus::Omitted { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SectionReport {
    pub kind: SectionKind,
    pub status: SectionStatus,
    /// Candidate items before budgeting.
    pub available: usize,
    /// Tokens this section contributes to the output.
    pub tokens: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BudgetStatus {
    WithinBudget,
    /// Character-core content alone is larger than the budget. The output
    /// carries it in full and nothing else.
    HardBudgetExceeded { core_tokens: usize, budget: usize },
}

/// What happened to one retrieval source while answering a query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceStatus {
    Ok { entries: usize },
    Failed { message: String },
    TimedOut { after_ms: u64 },
    /// Cut off by the caller's deadline.
    Cancelled,
    /// Not consulted for this query type.
    Skipped,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceOutcome {
    pub source: String,
    pub status: SourceStatus,
}

impl SourceOutcome {
    pub fn new(source: impl Into<String>, status: SourceStatus) -> Self {
        Self {
            source: source.into(),
            status,
        }
    }

    pub fn is_ok(&self) -> bool {
        matches!(self.status, SourceStatus::Ok { .. })
    }
}

/// Everything a caller needs to audit an assembly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssemblyManifest {
    pub model: String,
    pub budget: usize,
    pub total_tokens: usize,
    pub tokenizer_family: String,
    /// Counts are estimates; no exact tokenizer was configured for the model.
    pub approximate_tokens: bool,
    pub budget_status: BudgetStatus,
    /// One entry per section kind, in priority order.
    pub sections: Vec<SectionReport>,
    /// Entities named in the query but absent from the graph.
    pub missing_entities: Vec<String>,
    pub source_outcomes: Vec<SourceOutcome>,
    /// How the supplementary semantic results were produced, if any were requested.
    pub search_mode: Option<SearchMode>,
}

impl AssemblyManifest {
    pub fn section(&self, kind: SectionKind) -> Option<&SectionReport> {
        self.sections.iter().find(|s| s.kind == kind)
    }

    pub fn is_hard_budget_exceeded(&self) -> bool {
        matches!(self.budget_status, BudgetStatus::HardBudgetExceeded { .. })
    }

    /// Sections that were cut or left out because of the budget.
    pub fn dropped_sections(&self) -> Vec<SectionKind> {
        self.sections
            .iter()
            .filter(|s| {
                matches!(
                    s.status,
                    SectionStatus::Truncated { .. }
                        | SectionStatus::Omitted {
                            reason: OmissionReason::BudgetExhausted
                                | OmissionReason::HigherPriorityTruncated
                                | OmissionReason::HardBudget
                        }
                )
            })
            .map(|s| s.kind)
            .collect()
    }
}
