//! Narrative Extractor - proposes graph facts from scene prose.
//!
//! Extraction runs in two steps. [`NarrativeExtractor::extract`] asks the
//! inference backend for structured output, validates it and resolves every
//! name against the known entities, producing an [`ExtractionProposal`]
//! without touching the graph. [`NarrativeExtractor::apply`] commits a
//! proposal in a single atomic write.
//!
//! `CONTRADICTS` relations never become edges here; they are queued as
//! conflicts for the author to accept or dismiss.

mod inference;
pub mod schema;

pub use inference::*;

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

use story_graph::{
    normalize_name, ConflictRecord, Edge, GraphStore, Node, NodeId, NodeType, Provenance,
    RelationType, StoryGraph,
};

use crate::classifier::{EntityDictionary, KnownEntity};
use crate::config::{NarrativeConfig, UnknownRelationPolicy};
use crate::error::{NarrativeError, Result};
use schema::RawExtraction;

/// A node the extraction wants to exist.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProposedNode {
    pub name: String,
    pub node_type: NodeType,
    pub description: String,
    /// Set when the name resolved to a known entity.
    pub existing: Option<NodeId>,
}

impl ProposedNode {
    pub fn is_new(&self) -> bool {
        self.existing.is_none()
    }
}

/// Endpoint of a proposed relation, by canonical name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EntityRef {
    pub name: String,
    pub node_type: NodeType,
    pub existing: Option<NodeId>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProposedEdge {
    pub source: EntityRef,
    pub target: EntityRef,
    pub relation: RelationType,
    pub description: String,
    pub weight: f32,
}

/// A `CONTRADICTS` relation held back for review.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProposedConflict {
    pub source: EntityRef,
    pub target: EntityRef,
    pub description: String,
}

/// A relation left out of the proposal, with the reason.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DroppedRelation {
    pub source: String,
    pub target: String,
    pub relation: String,
    pub reason: String,
}

/// Everything one extraction pass proposes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExtractionProposal {
    /// Scene label recorded as provenance when applied.
    pub scene: Option<String>,
    pub nodes: Vec<ProposedNode>,
    pub edges: Vec<ProposedEdge>,
    pub conflicts: Vec<ProposedConflict>,
    pub dropped: Vec<DroppedRelation>,
    /// The scene tests a character's core weakness.
    pub challenges_flaw: bool,
    pub structural_position: Option<String>,
    /// Whether the scene sits where the outline expects. `None` when either
    /// side is unknown.
    pub structural_alignment: Option<bool>,
    /// Scene text was cut to the configured ceiling before inference.
    pub input_truncated: bool,
}

impl ExtractionProposal {
    pub fn with_scene(mut self, scene: impl Into<String>) -> Self {
        self.scene = Some(scene.into());
        self
    }

    pub fn new_nodes(&self) -> impl Iterator<Item = &ProposedNode> {
        self.nodes.iter().filter(|n| n.is_new())
    }
}

/// What [`NarrativeExtractor::apply`] changed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplyReport {
    pub nodes_created: usize,
    pub nodes_merged: usize,
    pub edges_created: usize,
    pub edges_merged: usize,
    pub conflicts_queued: usize,
}

/// Turns scene text into proposed graph facts.
pub struct NarrativeExtractor {
    provider: Arc<dyn SceneInferenceProvider>,
    config: Arc<NarrativeConfig>,
}

impl NarrativeExtractor {
    pub fn new(provider: Arc<dyn SceneInferenceProvider>, config: Arc<NarrativeConfig>) -> Self {
        Self { provider, config }
    }

    /// Propose nodes and edges for a scene. Never mutates the graph.
    ///
    /// Fails with [`NarrativeError::Inference`] when the backend fails and
    /// with [`NarrativeError::ExtractionSchema`] when its output does not
    /// match the schema.
    #[instrument(skip_all, fields(provider = self.provider.name(), chars = scene_text.len()))]
    pub async fn extract(
        &self,
        scene_text: &str,
        known_entities: &[KnownEntity],
        expected_position: Option<&str>,
    ) -> Result<ExtractionProposal> {
        let (text, input_truncated) = truncate_chars(scene_text, self.config.extractor.max_input_chars);
        if input_truncated {
            warn!(
                limit = self.config.extractor.max_input_chars,
                "scene text truncated before inference"
            );
        }

        let prompt = self.build_prompt(text, known_entities, expected_position);
        let output = self.provider.generate_structured(&prompt).await?;
        let raw = RawExtraction::parse(&output)?;

        let mut proposal = self.resolve(raw, known_entities, expected_position);
        proposal.input_truncated = input_truncated;
        debug!(
            nodes = proposal.nodes.len(),
            edges = proposal.edges.len(),
            conflicts = proposal.conflicts.len(),
            dropped = proposal.dropped.len(),
            "extraction proposal ready"
        );
        Ok(proposal)
    }

    /// Commit a proposal in one atomic write. Re-applying the same proposal
    /// changes nothing.
    pub fn apply(&self, proposal: &ExtractionProposal, store: &GraphStore) -> Result<ApplyReport> {
        let provenance = Provenance::Extraction {
            scene: proposal.scene.clone(),
        };

        let report = store.write(|graph| -> Result<ApplyReport> {
            let mut report = ApplyReport::default();
            let mut ids: HashMap<(NodeType, String), NodeId> = HashMap::new();

            for proposed in &proposal.nodes {
                let (id, created) = upsert_proposed(graph, proposed, &provenance)?;
                if created {
                    report.nodes_created += 1;
                } else {
                    report.nodes_merged += 1;
                }
                ids.insert((proposed.node_type, normalize_name(&proposed.name)), id);
            }

            for proposed in &proposal.edges {
                let source = endpoint_id(graph, &ids, &proposed.source)?;
                let target = endpoint_id(graph, &ids, &proposed.target)?;
                let edge = Edge::new(source, target, proposed.relation.clone())
                    .with_description(proposed.description.clone())
                    .with_weight(proposed.weight)
                    .with_source(provenance.clone());
                let (_, created) = graph.upsert_edge(edge)?;
                if created {
                    report.edges_created += 1;
                } else {
                    report.edges_merged += 1;
                }
            }

            for conflict in &proposal.conflicts {
                let source = endpoint_id(graph, &ids, &conflict.source)?;
                let target = endpoint_id(graph, &ids, &conflict.target)?;
                let before = graph.open_conflicts().len();
                graph.push_conflict(
                    ConflictRecord::new(source, target, conflict.description.clone())
                        .with_source(provenance.clone()),
                )?;
                report.conflicts_queued += graph.open_conflicts().len() - before;
            }

            Ok(report)
        })?;

        info!(
            created = report.nodes_created,
            merged = report.nodes_merged,
            edges = report.edges_created,
            conflicts = report.conflicts_queued,
            "applied extraction"
        );
        Ok(report)
    }

    /// Extract against the store's current entities and apply the result.
    pub async fn extract_and_apply(
        &self,
        scene_text: &str,
        scene_label: Option<&str>,
        expected_position: Option<&str>,
        store: &GraphStore,
    ) -> Result<(ExtractionProposal, ApplyReport)> {
        let known = EntityDictionary::from_graph(&store.snapshot());
        let mut proposal = self
            .extract(scene_text, known.entities(), expected_position)
            .await?;
        proposal.scene = scene_label.map(str::to_string);
        let report = self.apply(&proposal, store)?;
        Ok((proposal, report))
    }

    fn build_prompt(
        &self,
        scene_text: &str,
        known_entities: &[KnownEntity],
        expected_position: Option<&str>,
    ) -> String {
        let node_types: Vec<&str> = NodeType::ALL
            .iter()
            .filter(|t| !matches!(t, NodeType::Scene | NodeType::Beat))
            .map(NodeType::as_str)
            .collect();
        let relations: Vec<&str> = RelationType::ALL
            .iter()
            .filter(|r| self.config.extractor.is_enabled(r) || r.is_experimental())
            .map(RelationType::as_str)
            .collect();
        let known: Vec<String> = known_entities
            .iter()
            .map(|e| format!("{} ({})", e.name, e.node_type))
            .collect();

        let mut prompt = String::new();
        prompt.push_str("Extract story facts from the scene below. Respond with JSON only:\n");
        prompt.push_str(
            "{\"entities\": [{\"name\", \"type\", \"description\"}], \
             \"relations\": [{\"source\", \"target\", \"relation\", \"description\", \"weight\"}], \
             \"challenges_flaw\": bool, \"structural_position\": string|null}\n",
        );
        prompt.push_str(&format!("Entity types: {}\n", node_types.join(", ")));
        prompt.push_str(&format!("Relation types: {}\n", relations.join(", ")));
        prompt.push_str("Use CONTRADICTS only when the scene conflicts with an established fact.\n");
        if !known.is_empty() {
            prompt.push_str(&format!(
                "Known entities (reuse these exact names): {}\n",
                known.join(", ")
            ));
        }
        if let Some(position) = expected_position {
            prompt.push_str(&format!("Expected structural position: {}\n", position));
        }
        prompt.push_str("\nSCENE:\n");
        prompt.push_str(scene_text);
        prompt
    }

    fn resolve(
        &self,
        raw: RawExtraction,
        known_entities: &[KnownEntity],
        expected_position: Option<&str>,
    ) -> ExtractionProposal {
        let settings = &self.config.extractor;
        let mut proposal = ExtractionProposal::default();

        for entity in &raw.entities {
            let Some(node_type) = NodeType::parse(&entity.entity_type) else {
                continue;
            };
            let reference = self.resolve_name(&entity.name, Some(node_type), known_entities, &proposal.nodes);
            let description = entity.description.trim().to_string();
            match proposal
                .nodes
                .iter_mut()
                .find(|n| n.node_type == reference.node_type && n.name == reference.name)
            {
                Some(existing) => {
                    if existing.description.is_empty() {
                        existing.description = description;
                    }
                }
                None => proposal.nodes.push(ProposedNode {
                    name: reference.name,
                    node_type: reference.node_type,
                    description,
                    existing: reference.existing,
                }),
            }
        }

        for relation in &raw.relations {
            let source = self.lookup(&relation.source, known_entities, &proposal.nodes);
            let target = self.lookup(&relation.target, known_entities, &proposal.nodes);
            let (Some(source), Some(target)) = (source, target) else {
                proposal.dropped.push(dropped(relation, "endpoint is not a known or proposed entity"));
                continue;
            };

            let parsed = RelationType::parse(&relation.relation);
            if parsed.is_experimental() {
                proposal.conflicts.push(ProposedConflict {
                    source,
                    target,
                    description: relation.description.trim().to_string(),
                });
                continue;
            }

            let accepted = if settings.is_enabled(&parsed) {
                Some(parsed)
            } else {
                match settings.unknown_relation_policy {
                    UnknownRelationPolicy::Coerce => Some(match parsed {
                        RelationType::Custom(label) => RelationType::Custom(label),
                        named => RelationType::Custom(named.as_str().to_string()),
                    }),
                    UnknownRelationPolicy::Drop => None,
                }
            };

            match accepted {
                Some(relation_type) => {
                    let edge = ProposedEdge {
                        source,
                        target,
                        relation: relation_type,
                        description: relation.description.trim().to_string(),
                        weight: relation.weight.unwrap_or(1.0),
                    };
                    let duplicate = proposal.edges.iter().any(|e| {
                        e.source == edge.source && e.target == edge.target && e.relation == edge.relation
                    });
                    if !duplicate {
                        proposal.edges.push(edge);
                    }
                }
                None => proposal.dropped.push(dropped(relation, "relation type disabled")),
            }
        }

        proposal.challenges_flaw = raw.challenges_flaw
            || proposal
                .edges
                .iter()
                .any(|e| e.relation == RelationType::Challenges);
        proposal.structural_position = raw
            .structural_position
            .map(|p| p.trim().to_string())
            .filter(|p| !p.is_empty());
        proposal.structural_alignment = match (expected_position, &proposal.structural_position) {
            (Some(expected), Some(actual)) => Some(position_key(expected) == position_key(actual)),
            _ => None,
        };
        proposal
    }

    /// Resolve a relation endpoint. Unlike entities, endpoints must already be
    /// known or proposed in the same pass.
    fn lookup(&self, name: &str, known: &[KnownEntity], proposed: &[ProposedNode]) -> Option<EntityRef> {
        let reference = self.resolve_name(name, None, known, proposed);
        if reference.existing.is_some()
            || proposed
                .iter()
                .any(|n| n.name == reference.name && n.node_type == reference.node_type)
        {
            Some(reference)
        } else {
            None
        }
    }

    /// Map a raw name onto a known entity, then onto an entity already in the
    /// proposal, falling back to the name itself.
    fn resolve_name(
        &self,
        name: &str,
        node_type: Option<NodeType>,
        known: &[KnownEntity],
        proposed: &[ProposedNode],
    ) -> EntityRef {
        let max_distance = self.config.extractor.near_match_distance;

        if let Some(entity) = best_match(name, node_type, known.iter().map(|e| (e, e.node_type)), max_distance, |e| {
            std::iter::once(e.name.as_str())
                .chain(e.aliases.iter().map(String::as_str))
                .collect()
        }) {
            return EntityRef {
                name: entity.name.clone(),
                node_type: entity.node_type,
                existing: Some(entity.node_id),
            };
        }

        if let Some(node) = best_match(name, node_type, proposed.iter().map(|n| (n, n.node_type)), max_distance, |n| {
            vec![n.name.as_str()]
        }) {
            return EntityRef {
                name: node.name.clone(),
                node_type: node.node_type,
                existing: node.existing,
            };
        }

        EntityRef {
            name: name.split_whitespace().collect::<Vec<_>>().join(" "),
            node_type: node_type.unwrap_or(NodeType::Concept),
            existing: None,
        }
    }
}

/// Find the candidate whose names match `name`, trying progressively looser
/// comparisons: exact (case-insensitive), normalized, then edit distance.
/// Exact and normalized matches ignore type; fuzzy matches require it.
fn best_match<'a, T>(
    name: &str,
    node_type: Option<NodeType>,
    candidates: impl Iterator<Item = (&'a T, NodeType)> + Clone,
    max_distance: usize,
    names: impl Fn(&'a T) -> Vec<&'a str>,
) -> Option<&'a T> {
    let prefer_type = |found: Vec<(&'a T, NodeType)>| -> Option<&'a T> {
        found
            .iter()
            .find(|(_, t)| Some(*t) == node_type)
            .or_else(|| found.iter().find(|(_, t)| *t == NodeType::Character))
            .or_else(|| found.first())
            .map(|(c, _)| *c)
    };

    let exact = normalize_name(name);
    let found: Vec<_> = candidates
        .clone()
        .filter(|(c, _)| names(*c).iter().any(|n| normalize_name(n) == exact))
        .collect();
    if !found.is_empty() {
        return prefer_type(found);
    }

    let key = match_key(name);
    if key.is_empty() {
        return None;
    }
    let found: Vec<_> = candidates
        .clone()
        .filter(|(c, _)| names(*c).iter().any(|n| match_key(n) == key))
        .collect();
    if !found.is_empty() {
        return prefer_type(found);
    }

    if max_distance == 0 || key.chars().count() < 5 {
        return None;
    }
    candidates
        .filter(|(_, t)| node_type.map_or(true, |wanted| *t == wanted))
        .filter_map(|(c, _)| {
            names(c)
                .iter()
                .map(|n| match_key(n))
                .filter(|k| k.chars().count() >= 5)
                .map(|k| edit_distance(&k, &key))
                .min()
                .filter(|d| *d <= max_distance)
                .map(|d| (c, d))
        })
        .min_by_key(|(_, d)| *d)
        .map(|(c, _)| c)
}

/// Lower-cased, punctuation-free, without a leading article.
fn match_key(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| if c.is_alphanumeric() || c.is_whitespace() { c } else { ' ' })
        .collect();
    let words: Vec<String> = cleaned.split_whitespace().map(str::to_lowercase).collect();
    let start = match words.first().map(String::as_str) {
        Some("the" | "a" | "an") if words.len() > 1 => 1,
        _ => 0,
    };
    words[start..].join(" ")
}

fn position_key(position: &str) -> String {
    match_key(&position.replace(['_', '-'], " "))
}

/// Levenshtein distance over chars.
fn edit_distance(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let mut previous: Vec<usize> = (0..=b.len()).collect();
    let mut current = vec![0; b.len() + 1];
    for (i, ca) in a.iter().enumerate() {
        current[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let substitution = previous[j] + usize::from(ca != cb);
            current[j + 1] = substitution.min(previous[j + 1] + 1).min(current[j] + 1);
        }
        std::mem::swap(&mut previous, &mut current);
    }
    previous[b.len()]
}

/// Cut `text` to at most `max_chars` characters on a char boundary.
fn truncate_chars(text: &str, max_chars: usize) -> (&str, bool) {
    match text.char_indices().nth(max_chars) {
        Some((end, _)) => (&text[..end], true),
        None => (text, false),
    }
}

fn dropped(relation: &schema::RawRelation, reason: &str) -> DroppedRelation {
    DroppedRelation {
        source: relation.source.clone(),
        target: relation.target.clone(),
        relation: relation.relation.clone(),
        reason: reason.to_string(),
    }
}

fn upsert_proposed(
    graph: &mut StoryGraph,
    proposed: &ProposedNode,
    provenance: &Provenance,
) -> Result<(NodeId, bool)> {
    let target = proposed
        .existing
        .and_then(|id| graph.node(id))
        .map(|n| (n.node_type, n.name.clone()))
        .or_else(|| {
            graph
                .find_by_name(&proposed.name)
                .first()
                .map(|n| (n.node_type, n.name.clone()))
        });
    let (node_type, name) = target.unwrap_or((proposed.node_type, proposed.name.clone()));

    let node = Node::new(node_type, name)
        .with_description(proposed.description.clone())
        .with_source(provenance.clone());
    Ok(graph.upsert_node(node)?)
}

fn endpoint_id(
    graph: &StoryGraph,
    ids: &HashMap<(NodeType, String), NodeId>,
    reference: &EntityRef,
) -> Result<NodeId> {
    if let Some(id) = reference.existing.filter(|id| graph.node(*id).is_some()) {
        return Ok(id);
    }
    if let Some(id) = ids.get(&(reference.node_type, normalize_name(&reference.name))) {
        return Ok(*id);
    }
    graph
        .node_by_name(reference.node_type, &reference.name)
        .map(|n| n.id)
        .ok_or_else(|| NarrativeError::UnknownEntity(reference.name.clone()))
}
