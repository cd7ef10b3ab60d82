//! Context Assembler - merges retrieval results into a token-budgeted block.
//!
//! Sections are filled in strict priority order:
//! 1. **Character core**: weakness, belief and arc of every queried entity
//! 2. **Active scene**: the scene being written and its scaffold
//! 3. **Relationships**: edges among the queried entities
//! 4. **Structure**: beats and the entities' surroundings
//! 5. **World rules**: rule and story-bible facts sharing a keyword with the query
//! 6. **Decisions**: most recent decision-log entries
//! 7. **Supplementary**: semantic search results
//!
//! The character core is never truncated; if it alone exceeds the budget the
//! assembly reports a hard-budget condition instead. Everything else is cut
//! whole items at a time, from the lowest priority up, and every cut leaves a
//! marker in the text and an entry in the [`AssemblyManifest`].

mod manifest;
mod tokens;

pub use manifest::*;
pub use tokens::*;

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, warn};

use story_graph::{normalize_name, CharacterCore, Node, NodeId, NodeType};

use crate::classifier::{ClassifiedQuery, QueryType};
use crate::config::NarrativeConfig;
use crate::embedding::SemanticResults;
use crate::sources::SourceEntry;

/// Everything the graph knows about one queried entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityFacts {
    pub node_id: NodeId,
    pub name: String,
    pub node_type: NodeType,
    pub description: String,
    pub aliases: Vec<String>,
    pub core: Option<CharacterCore>,
}

impl EntityFacts {
    pub fn from_node(node: &Node) -> Self {
        Self {
            node_id: node.id,
            name: node.name.clone(),
            node_type: node.node_type,
            description: node.description.clone(),
            aliases: node.aliases.clone(),
            core: node.core.clone(),
        }
    }

    fn render(&self) -> String {
        let mut block = format!("### {} ({})\n", self.name, self.node_type);
        let description = single_line(&self.description);
        if !description.is_empty() {
            block.push_str(&description);
            block.push('\n');
        }
        if !self.aliases.is_empty() {
            block.push_str(&format!("- Also known as: {}\n", self.aliases.join(", ")));
        }
        if let Some(core) = &self.core {
            for (label, value) in core.facts() {
                block.push_str(&format!("- {}: {}\n", label, single_line(value)));
            }
        }
        block
    }
}

/// Graph retrieval results, grouped by the section they feed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GraphContext {
    pub entities: Vec<EntityFacts>,
    pub scene: Vec<String>,
    pub relationships: Vec<String>,
    pub structure: Vec<String>,
    /// Unfiltered; the assembler keeps those sharing a term with the query.
    pub world_rules: Vec<String>,
}

/// One rendered section of the output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssembledSection {
    pub kind: SectionKind,
    pub text: String,
    pub tokens: usize,
    /// Tokens of the output up to and including this section.
    pub running_total: usize,
}

/// Budgeted context text plus its audit manifest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssembledContext {
    pub text: String,
    pub sections: Vec<AssembledSection>,
    pub manifest: AssemblyManifest,
}

impl AssembledContext {
    pub fn section(&self, kind: SectionKind) -> Option<&AssembledSection> {
        self.sections.iter().find(|s| s.kind == kind)
    }
}

/// A section's candidates and how many of them made it.
struct Plan {
    kind: SectionKind,
    items: Vec<String>,
    kept: usize,
    omitted: Option<OmissionReason>,
}

impl Plan {
    fn status(&self) -> SectionStatus {
        match &self.omitted {
            Some(reason) => SectionStatus::Omitted {
                reason: reason.clone(),
            },
            None if self.kept == self.items.len() => SectionStatus::Included,
            None => SectionStatus::Truncated {
                kept: self.kept,
                dropped: self.items.len() - self.kept,
            },
        }
    }

    fn is_present(&self) -> bool {
        self.omitted.is_none() && self.kept > 0
    }
}

/// Builds budgeted context for a target model.
pub struct ContextAssembler {
    config: Arc<NarrativeConfig>,
    tokenizers: TokenizerRegistry,
}

impl ContextAssembler {
    /// Assembler that estimates tokens for every model.
    pub fn new(config: Arc<NarrativeConfig>) -> Self {
        Self::with_tokenizers(config, TokenizerRegistry::new())
    }

    pub fn with_tokenizers(config: Arc<NarrativeConfig>, tokenizers: TokenizerRegistry) -> Self {
        Self { config, tokenizers }
    }

    /// Assemble context for `model` within its configured budget.
    pub fn assemble(
        &self,
        query: &ClassifiedQuery,
        graph_context: &GraphContext,
        story_bible_context: &[SourceEntry],
        decision_log_context: &[SourceEntry],
        semantic_results: Option<&SemanticResults>,
        model: &str,
    ) -> AssembledContext {
        let settings = &self.config.assembler;
        let budget = settings.budget_for(model);
        let counter = self
            .tokenizers
            .counter_for(settings.tokenizer_family_for(model));

        let mut plans = self.candidates(
            query,
            graph_context,
            story_bible_context,
            decision_log_context,
            semantic_results,
        );

        let core = &mut plans[0];
        core.kept = core.items.len();
        if core.items.is_empty() {
            core.omitted = Some(OmissionReason::Empty);
        }
        let core_tokens = counter.count(&render(&plans[..1]).0);

        let budget_status = if core_tokens > budget {
            warn!(model, budget, core_tokens, "character core exceeds budget");
            for plan in &mut plans[1..] {
                plan.omitted = Some(OmissionReason::HardBudget);
            }
            BudgetStatus::HardBudgetExceeded {
                core_tokens,
                budget,
            }
        } else {
            fill(&mut plans, budget, core_tokens, counter.as_ref());
            BudgetStatus::WithinBudget
        };

        let (text, pieces) = render(&plans);
        let mut sections = Vec::with_capacity(pieces.len());
        let mut so_far = String::new();
        for (kind, piece) in pieces {
            so_far.push_str(&piece);
            sections.push(AssembledSection {
                kind,
                tokens: counter.count(&piece),
                running_total: counter.count(&so_far),
                text: piece,
            });
        }
        let total_tokens = counter.count(&text);

        let reports = plans
            .iter()
            .map(|plan| SectionReport {
                kind: plan.kind,
                status: plan.status(),
                available: plan.items.len(),
                tokens: sections
                    .iter()
                    .find(|s| s.kind == plan.kind)
                    .map_or(0, |s| s.tokens),
            })
            .collect();

        let manifest = AssemblyManifest {
            model: model.to_string(),
            budget,
            total_tokens,
            tokenizer_family: counter.family().to_string(),
            approximate_tokens: counter.is_approximate(),
            budget_status,
            sections: reports,
            missing_entities: missing_entities(query, graph_context),
            source_outcomes: Vec::new(),
            search_mode: semantic_results.map(|r| r.mode.clone()),
        };

        debug!(
            model,
            budget,
            total_tokens,
            sections = sections.len(),
            "assembled context"
        );

        AssembledContext {
            text,
            sections,
            manifest,
        }
    }

    fn candidates(
        &self,
        query: &ClassifiedQuery,
        graph_context: &GraphContext,
        story_bible_context: &[SourceEntry],
        decision_log_context: &[SourceEntry],
        semantic_results: Option<&SemanticResults>,
    ) -> Vec<Plan> {
        let settings = &self.config.assembler;

        let mut seen = HashSet::new();
        let core: Vec<String> = graph_context
            .entities
            .iter()
            .filter(|e| seen.insert(e.node_id))
            .map(EntityFacts::render)
            .collect();

        let rules: Vec<String> = graph_context
            .world_rules
            .iter()
            .cloned()
            .chain(story_bible_context.iter().map(SourceEntry::render))
            .collect();
        let rules = filter_by_overlap(query, rules);

        let mut decisions: Vec<&SourceEntry> = decision_log_context.iter().collect();
        decisions.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        let decisions: Vec<String> = decisions
            .into_iter()
            .take(settings.max_decision_entries)
            .map(|entry| match entry.timestamp {
                Some(at) => format!("[{}] {}", at.format("%Y-%m-%d"), entry.render()),
                None => entry.render(),
            })
            .collect();

        let supplementary: Vec<String> = semantic_results
            .map(|results| {
                results
                    .hits
                    .iter()
                    .filter(|hit| !seen.contains(&hit.node_id))
                    .take(settings.max_semantic_results)
                    .map(|hit| {
                        let description = single_line(&hit.description);
                        if description.is_empty() {
                            format!("{} ({})", hit.name, hit.node_type)
                        } else {
                            format!("{} ({}): {}", hit.name, hit.node_type, description)
                        }
                    })
                    .collect()
            })
            .unwrap_or_default();

        let items = [
            core,
            graph_context.scene.clone(),
            graph_context.relationships.clone(),
            graph_context.structure.clone(),
            rules,
            decisions,
            supplementary,
        ];
        SectionKind::ALL
            .into_iter()
            .zip(items)
            .map(|(kind, items)| Plan {
                kind,
                items: if kind == SectionKind::CharacterCore {
                    items
                } else {
                    items.iter().map(|i| single_line(i)).filter(|i| !i.is_empty()).collect()
                },
                kept: 0,
                omitted: None,
            })
            .collect()
    }
}

/// Greedily fill sections after the core. The first section that does not fit
/// whole is cut at an item boundary and every later section is omitted.
fn fill(plans: &mut [Plan], budget: usize, core_tokens: usize, counter: &dyn TokenCounter) {
    let mut used = core_tokens;
    let mut started = plans[0].is_present();
    let mut blocked = false;

    for plan in plans.iter_mut().skip(1) {
        if plan.items.is_empty() {
            plan.omitted = Some(OmissionReason::Empty);
            continue;
        }
        if blocked {
            plan.omitted = Some(OmissionReason::HigherPriorityTruncated);
            continue;
        }

        let remaining = budget.saturating_sub(used);
        let header_tokens = counter.count(&header(plan.kind, started));
        let line_tokens: Vec<usize> = plan.items.iter().map(|i| counter.count(&item_line(i))).collect();
        let whole = header_tokens + line_tokens.iter().sum::<usize>();
        if whole <= remaining {
            plan.kept = plan.items.len();
            used += whole;
            started = true;
            continue;
        }

        blocked = true;
        let mut kept = 0;
        let mut cost = header_tokens;
        let mut kept_cost = 0;
        for (i, tokens) in line_tokens.iter().enumerate() {
            cost += tokens;
            let marker = counter.count(&marker_line(plan.items.len() - (i + 1)));
            if cost + marker > remaining {
                break;
            }
            kept = i + 1;
            kept_cost = cost + marker;
        }

        if kept == 0 {
            plan.omitted = Some(OmissionReason::BudgetExhausted);
        } else {
            plan.kept = kept;
            used += kept_cost;
            started = true;
        }
    }

    // Per-piece counts may disagree with the count of the joined text for
    // exact tokenizers; shed items from the bottom until the whole fits.
    loop {
        if counter.count(&render(plans).0) <= budget {
            break;
        }
        let Some(plan) = plans.iter_mut().skip(1).rev().find(|p| p.is_present()) else {
            break;
        };
        plan.kept -= 1;
        if plan.kept == 0 {
            plan.omitted = Some(OmissionReason::BudgetExhausted);
        }
    }
}

/// Full text plus each present section's own text.
fn render(plans: &[Plan]) -> (String, Vec<(SectionKind, String)>) {
    let mut text = String::new();
    let mut pieces = Vec::new();
    for plan in plans.iter().filter(|p| p.is_present()) {
        let mut piece = header(plan.kind, !text.is_empty());
        for item in &plan.items[..plan.kept] {
            piece.push_str(&item_line_for(plan.kind, item));
        }
        if plan.kept < plan.items.len() {
            piece.push_str(&marker_line(plan.items.len() - plan.kept));
        }
        text.push_str(&piece);
        pieces.push((plan.kind, piece));
    }
    (text, pieces)
}

fn header(kind: SectionKind, after_other_sections: bool) -> String {
    if after_other_sections {
        format!("\n## {}\n", kind.title())
    } else {
        format!("## {}\n", kind.title())
    }
}

fn item_line(item: &str) -> String {
    format!("- {}\n", item)
}

fn item_line_for(kind: SectionKind, item: &str) -> String {
    if kind == SectionKind::CharacterCore {
        item.to_string()
    } else {
        item_line(item)
    }
}

fn marker_line(dropped: usize) -> String {
    format!("- [… {} more items truncated]\n", dropped)
}

fn single_line(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn terms(text: &str) -> HashSet<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(str::to_string)
        .collect()
}

/// Keep items sharing a term with the query's keywords or entities, most
/// overlap first. Rule and craft queries without usable terms keep everything.
fn filter_by_overlap(query: &ClassifiedQuery, items: Vec<String>) -> Vec<String> {
    let mut wanted: HashSet<String> = query.keywords.iter().map(|k| k.to_lowercase()).collect();
    for entity in &query.entities {
        wanted.extend(terms(entity));
    }
    if wanted.is_empty() {
        return match query.query_type {
            QueryType::WorldRules | QueryType::WritingTechnique => items,
            _ => Vec::new(),
        };
    }

    let mut scored: Vec<(usize, String)> = items
        .into_iter()
        .map(|item| (terms(&item).intersection(&wanted).count(), item))
        .filter(|(score, _)| *score > 0)
        .collect();
    scored.sort_by(|a, b| b.0.cmp(&a.0));
    scored.into_iter().map(|(_, item)| item).collect()
}

fn missing_entities(query: &ClassifiedQuery, graph_context: &GraphContext) -> Vec<String> {
    query
        .entities
        .iter()
        .filter(|name| {
            let wanted = normalize_name(name);
            !graph_context.entities.iter().any(|e| {
                normalize_name(&e.name) == wanted || e.aliases.iter().any(|a| normalize_name(a) == wanted)
            })
        })
        .cloned()
        .collect()
}
