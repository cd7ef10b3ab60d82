//! Node definitions - the typed vertices of the story graph.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for nodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(pub Uuid);

impl NodeId {
    /// Create a new random node ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Create a node ID from a specific UUID.
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl Default for NodeId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Kinds of story elements a node can represent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NodeType {
    Character,
    Location,
    Object,
    Event,
    Theme,
    Concept,
    /// A scene or scene scaffold.
    Scene,
    /// A structural beat (inciting incident, midpoint, ...).
    Beat,
    /// A rule of the world (magic system, law, taboo).
    WorldRule,
    Faction,
}

impl NodeType {
    pub const ALL: [NodeType; 10] = [
        NodeType::Character,
        NodeType::Location,
        NodeType::Object,
        NodeType::Event,
        NodeType::Theme,
        NodeType::Concept,
        NodeType::Scene,
        NodeType::Beat,
        NodeType::WorldRule,
        NodeType::Faction,
    ];

    /// Canonical upper-case label.
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeType::Character => "CHARACTER",
            NodeType::Location => "LOCATION",
            NodeType::Object => "OBJECT",
            NodeType::Event => "EVENT",
            NodeType::Theme => "THEME",
            NodeType::Concept => "CONCEPT",
            NodeType::Scene => "SCENE",
            NodeType::Beat => "BEAT",
            NodeType::WorldRule => "WORLD_RULE",
            NodeType::Faction => "FACTION",
        }
    }

    /// Parse a label, tolerating case, spaces and hyphens. Returns `None` for
    /// labels outside the closed set.
    pub fn parse(label: &str) -> Option<Self> {
        let canonical = label.trim().to_ascii_uppercase().replace([' ', '-'], "_");
        NodeType::ALL.into_iter().find(|t| t.as_str() == canonical)
    }
}

impl std::fmt::Display for NodeType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where a node or edge came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum Provenance {
    /// Created by an explicit author action.
    #[default]
    Manual,
    /// Proposed by the narrative extractor.
    Extraction { scene: Option<String> },
    /// Loaded from an external import.
    Import,
}

/// The defining inner facts of a character. Never truncated during assembly.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct CharacterCore {
    /// Core weakness or fatal flaw.
    pub weakness: Option<String>,
    /// The lie or belief the character holds.
    pub belief: Option<String>,
    /// Arc summary.
    pub arc: Option<String>,
    pub want: Option<String>,
    pub need: Option<String>,
}

impl CharacterCore {
    /// Labelled facts present on this core, in a stable order.
    pub fn facts(&self) -> Vec<(&'static str, &str)> {
        [
            ("Weakness", &self.weakness),
            ("Belief", &self.belief),
            ("Arc", &self.arc),
            ("Want", &self.want),
            ("Need", &self.need),
        ]
        .into_iter()
        .filter_map(|(label, value)| value.as_deref().map(|v| (label, v)))
        .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.facts().is_empty()
    }
}

/// A vector tagged with the model that produced it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeEmbedding {
    pub vector: Vec<f32>,
    pub model: String,
}

impl NodeEmbedding {
    pub fn new(vector: Vec<f32>, model: impl Into<String>) -> Self {
        Self {
            vector,
            model: model.into(),
        }
    }
}

/// A story element stored in the graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    pub id: NodeId,
    pub node_type: NodeType,

    /// Unique per type; used for entity resolution.
    pub name: String,

    /// Alternative names resolving to this node.
    #[serde(default)]
    pub aliases: Vec<String>,

    pub description: String,

    /// Only meaningful for characters.
    #[serde(default)]
    pub core: Option<CharacterCore>,

    #[serde(default)]
    pub embedding: Option<NodeEmbedding>,

    pub source: Provenance,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Node {
    /// Create a new node with the given type and name.
    pub fn new(node_type: NodeType, name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: NodeId::new(),
            node_type,
            name: name.into().trim().to_string(),
            aliases: Vec::new(),
            description: String::new(),
            core: None,
            embedding: None,
            source: Provenance::Manual,
            created_at: now,
            updated_at: now,
        }
    }

    /// Shorthand for a character node.
    pub fn character(name: impl Into<String>) -> Self {
        Self::new(NodeType::Character, name)
    }

    /// Set the description.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Add an alias.
    pub fn with_alias(mut self, alias: impl Into<String>) -> Self {
        self.aliases.push(alias.into());
        self
    }

    /// Set the character core.
    pub fn with_core(mut self, core: CharacterCore) -> Self {
        self.core = Some(core);
        self
    }

    /// Set the provenance.
    pub fn with_source(mut self, source: Provenance) -> Self {
        self.source = source;
        self
    }

    /// All names this node answers to, canonical name first.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.name.as_str()).chain(self.aliases.iter().map(String::as_str))
    }

    /// Whether `name` matches this node's name or an alias, ignoring case.
    pub fn answers_to(&self, name: &str) -> bool {
        let wanted = normalize_name(name);
        self.names().any(|n| normalize_name(n) == wanted)
    }

    /// Text used for embedding; empty when there is no description.
    pub fn embedding_text(&self) -> Option<String> {
        let description = self.description.trim();
        if description.is_empty() {
            None
        } else {
            Some(format!("{} ({}): {}", self.name, self.node_type, description))
        }
    }

    pub fn is_character(&self) -> bool {
        self.node_type == NodeType::Character
    }

    pub(crate) fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

/// Normalize a name for identity comparisons: trimmed, lower-cased, single spaces.
pub fn normalize_name(name: &str) -> String {
    name.split_whitespace()
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_creation() {
        let node = Node::character("  Mara ").with_description("A smuggler");
        assert_eq!(node.name, "Mara");
        assert_eq!(node.node_type, NodeType::Character);
        assert!(node.embedding.is_none());
        assert_eq!(node.source, Provenance::Manual);
    }

    #[test]
    fn test_answers_to_aliases() {
        let node = Node::character("Jonathan Vale").with_alias("Jon");
        assert!(node.answers_to("jonathan   vale"));
        assert!(node.answers_to("JON"));
        assert!(!node.answers_to("Jonas"));
    }

    #[test]
    fn test_node_type_parse() {
        assert_eq!(NodeType::parse("character"), Some(NodeType::Character));
        assert_eq!(NodeType::parse("world rule"), Some(NodeType::WorldRule));
        assert_eq!(NodeType::parse("World-Rule"), Some(NodeType::WorldRule));
        assert_eq!(NodeType::parse("spaceship"), None);
    }

    #[test]
    fn test_embedding_text_requires_description() {
        let bare = Node::new(NodeType::Location, "Harbor");
        assert!(bare.embedding_text().is_none());

        let described = bare.with_description("Fog-bound docks");
        assert_eq!(
            described.embedding_text().as_deref(),
            Some("Harbor (LOCATION): Fog-bound docks")
        );
    }

    #[test]
    fn test_character_core_facts() {
        let core = CharacterCore {
            weakness: Some("Cannot trust".to_string()),
            arc: Some("Learns to rely on others".to_string()),
            ..Default::default()
        };
        let facts = core.facts();
        assert_eq!(facts.len(), 2);
        assert_eq!(facts[0], ("Weakness", "Cannot trust"));
        assert!(!core.is_empty());
        assert!(CharacterCore::default().is_empty());
    }
}
