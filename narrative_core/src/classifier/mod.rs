//! Query Classifier - intent, entity and keyword extraction from free text.
//!
//! Classification is ordered rule matching, most specific rule first:
//! 1. **Contradiction**: continuity cues
//! 2. **Relationship**: two known entities plus a relational cue
//! 3. **Deep character**: a known entity plus deep-analysis cues
//! 4. **Writing technique**: craft vocabulary and no known entity
//! 5. **Scene / plot / world**: topical cues
//! 6. **Lookup**: a known entity on its own
//!
//! Anything else, or any match whose confidence falls below the configured
//! floor, becomes HYBRID and consults every source.

mod entities;
pub(crate) mod vocabulary;

pub use entities::*;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::debug;

use story_graph::{normalize_name, NodeType, StoryGraph};

use crate::config::NarrativeConfig;
use vocabulary::*;

/// Closed set of query intents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum QueryType {
    /// Who or what a named entity is.
    CharacterLookup,
    /// Flaws, motives and arc of a named character.
    CharacterDeep,
    PlotStatus,
    Relationship,
    WorldRules,
    /// Craft questions answered from external material, not the graph.
    WritingTechnique,
    SceneContext,
    ContradictionCheck,
    Hybrid,
}

/// Where retrieval may look.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetrievalSource {
    Graph,
    Embeddings,
    StoryBible,
    DecisionLog,
}

impl RetrievalSource {
    pub const ALL: [RetrievalSource; 4] = [
        RetrievalSource::Graph,
        RetrievalSource::Embeddings,
        RetrievalSource::StoryBible,
        RetrievalSource::DecisionLog,
    ];
}

impl QueryType {
    /// Sources consulted for this intent.
    pub fn sources(&self) -> Vec<RetrievalSource> {
        use RetrievalSource::*;
        match self {
            QueryType::CharacterLookup => vec![Graph, StoryBible],
            QueryType::CharacterDeep => vec![Graph, Embeddings, StoryBible, DecisionLog],
            QueryType::PlotStatus => vec![Graph, DecisionLog, Embeddings],
            QueryType::Relationship => vec![Graph, DecisionLog],
            QueryType::WorldRules => vec![StoryBible, Graph, Embeddings],
            QueryType::WritingTechnique => vec![StoryBible],
            QueryType::SceneContext => vec![Graph, Embeddings, DecisionLog],
            QueryType::ContradictionCheck => vec![Graph, StoryBible, DecisionLog, Embeddings],
            QueryType::Hybrid => RetrievalSource::ALL.to_vec(),
        }
    }
}

/// The result of classifying one query.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassifiedQuery {
    pub text: String,
    pub query_type: QueryType,

    /// Canonical names of known entities, in order of appearance.
    pub entities: Vec<String>,

    pub mentions: Vec<EntityMention>,

    /// Lower-cased content words, stopwords and entity names removed.
    pub keywords: Vec<String>,

    pub sources: Vec<RetrievalSource>,

    /// Share of independent signals that agreed, in `[0, 1]`.
    pub confidence: f32,

    pub requires_semantic: bool,
}

impl ClassifiedQuery {
    pub fn uses(&self, source: RetrievalSource) -> bool {
        self.sources.contains(&source)
    }
}

/// Rule-based classifier over a refreshable entity dictionary.
pub struct QueryClassifier {
    config: Arc<NarrativeConfig>,
    dictionary: RwLock<EntityDictionary>,
    stopwords: HashSet<String>,
}

impl QueryClassifier {
    /// Create a classifier with an empty dictionary.
    pub fn new(config: Arc<NarrativeConfig>) -> Self {
        Self::with_dictionary(config, EntityDictionary::new())
    }

    /// Create a classifier that knows every named node of `graph`.
    pub fn from_graph(config: Arc<NarrativeConfig>, graph: &StoryGraph) -> Self {
        Self::with_dictionary(config, EntityDictionary::from_graph(graph))
    }

    pub fn with_dictionary(config: Arc<NarrativeConfig>, dictionary: EntityDictionary) -> Self {
        let stopwords = STOPWORDS
            .iter()
            .map(|w| w.to_string())
            .chain(
                config
                    .classifier
                    .extra_stopwords
                    .iter()
                    .map(|w| w.to_lowercase()),
            )
            .collect();
        Self {
            config,
            dictionary: RwLock::new(dictionary),
            stopwords,
        }
    }

    /// Replace the cached entity dictionary.
    pub fn update_entities(&self, dictionary: EntityDictionary) {
        *self.dictionary.write() = dictionary;
    }

    /// Number of known entities.
    pub fn entity_count(&self) -> usize {
        self.dictionary.read().len()
    }

    /// Classify free text.
    pub fn classify(&self, text: &str) -> ClassifiedQuery {
        let normalized = normalize_name(text);
        let mentions = self.dictionary.read().find_mentions(&normalized);
        let keywords = self.keywords(&normalized, &mentions);

        let (rule_type, signals) = Self::match_rules(&normalized, &mentions);
        let confidence = (0.3 + 0.25 * signals as f32).min(1.0);

        let query_type = if confidence < self.config.classifier.min_confidence {
            QueryType::Hybrid
        } else {
            rule_type
        };
        let sources = query_type.sources();
        let requires_semantic = sources.contains(&RetrievalSource::Embeddings);

        debug!(
            ?query_type,
            entities = mentions.len(),
            confidence,
            "classified query"
        );

        ClassifiedQuery {
            text: text.to_string(),
            query_type,
            entities: mentions.iter().map(|m| m.name.clone()).collect(),
            mentions,
            keywords,
            sources,
            confidence,
            requires_semantic,
        }
    }

    /// First matching rule and how many independent signals supported it.
    fn match_rules(text: &str, mentions: &[EntityMention]) -> (QueryType, usize) {
        let entities = mentions.len();
        let cue_signals = |cues: &[&str]| matching_cues(text, cues).len().min(2);

        let contradiction = cue_signals(CONTRADICTION_CUES);
        if contradiction > 0 {
            return (
                QueryType::ContradictionCheck,
                contradiction + usize::from(entities > 0),
            );
        }

        let relational = cue_signals(RELATIONAL_CUES);
        if entities >= 2 && relational > 0 {
            return (QueryType::Relationship, 1 + relational);
        }

        let deep = cue_signals(DEEP_CUES);
        if entities >= 1 && deep > 0 {
            return (QueryType::CharacterDeep, 1 + deep);
        }

        let craft = cue_signals(CRAFT_CUES);
        if entities == 0 && craft > 0 {
            return (QueryType::WritingTechnique, 1 + craft);
        }

        let topical = [
            (QueryType::SceneContext, cue_signals(SCENE_CUES)),
            (QueryType::PlotStatus, cue_signals(PLOT_CUES)),
            (QueryType::WorldRules, cue_signals(WORLD_CUES)),
        ];
        if let Some((query_type, signals)) = topical.into_iter().find(|(_, s)| *s > 0) {
            return (query_type, signals);
        }

        if entities >= 1 {
            let lookup = cue_signals(LOOKUP_CUES);
            let character = mentions
                .iter()
                .any(|m| m.node_type == NodeType::Character);
            return (
                QueryType::CharacterLookup,
                1 + lookup + usize::from(character && lookup == 0 && entities == 1),
            );
        }

        (QueryType::Hybrid, 0)
    }

    fn keywords(&self, text: &str, mentions: &[EntityMention]) -> Vec<String> {
        let entity_words: HashSet<String> = mentions
            .iter()
            .flat_map(|m| {
                normalize_name(&m.name)
                    .split(' ')
                    .map(str::to_string)
                    .collect::<Vec<_>>()
            })
            .collect();

        let mut seen = HashSet::new();
        text.split(|c: char| !c.is_alphanumeric())
            .filter(|w| w.chars().count() >= 3)
            .filter(|w| !self.stopwords.contains(*w) && !entity_words.contains(*w))
            .filter(|w| seen.insert(w.to_string()))
            .map(str::to_string)
            .collect()
    }
}
