//! Entity dictionary - cached names and aliases of known graph nodes.

use serde::{Deserialize, Serialize};

use story_graph::{normalize_name, Node, NodeId, NodeType, StoryGraph};

use super::vocabulary::phrase_positions;

/// A known entity the classifier can recognize.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KnownEntity {
    pub node_id: NodeId,
    pub name: String,
    pub node_type: NodeType,
    pub aliases: Vec<String>,
}

impl From<&Node> for KnownEntity {
    fn from(node: &Node) -> Self {
        Self {
            node_id: node.id,
            name: node.name.clone(),
            node_type: node.node_type,
            aliases: node.aliases.clone(),
        }
    }
}

/// An entity found in query text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityMention {
    pub node_id: NodeId,
    /// Canonical name, even when an alias matched.
    pub name: String,
    pub node_type: NodeType,
    /// Byte offset in the normalized text.
    pub position: usize,
}

/// Name and alias lookup table.
#[derive(Debug, Clone, Default)]
pub struct EntityDictionary {
    entities: Vec<KnownEntity>,
    /// (normalized name or alias, index into `entities`), longest first.
    patterns: Vec<(String, usize)>,
}

impl EntityDictionary {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every named node in the graph. Scenes and beats are structural and are
    /// not matched against queries.
    pub fn from_graph(graph: &StoryGraph) -> Self {
        let mut nodes: Vec<&Node> = graph
            .nodes()
            .filter(|n| !matches!(n.node_type, NodeType::Scene | NodeType::Beat))
            .collect();
        nodes.sort_by_key(|n| (n.node_type, n.name.clone()));
        Self::from_entities(nodes.into_iter().map(KnownEntity::from))
    }

    pub fn from_entities(entities: impl IntoIterator<Item = KnownEntity>) -> Self {
        let mut dictionary = Self::new();
        for entity in entities {
            dictionary.insert(entity);
        }
        dictionary
    }

    pub fn insert(&mut self, entity: KnownEntity) {
        let index = self.entities.len();
        let mut forms: Vec<String> = std::iter::once(entity.name.as_str())
            .chain(entity.aliases.iter().map(String::as_str))
            .map(normalize_name)
            .filter(|form| !form.is_empty())
            .collect();
        forms.dedup();

        for form in forms {
            self.patterns.push((form, index));
        }
        self.entities.push(entity);

        // Longest first so "jonas" claims its span before "jon"; characters win
        // ties between types sharing a name.
        let entities = &self.entities;
        self.patterns.sort_by(|(a, ai), (b, bi)| {
            b.len()
                .cmp(&a.len())
                .then_with(|| {
                    let a_char = entities[*ai].node_type == NodeType::Character;
                    let b_char = entities[*bi].node_type == NodeType::Character;
                    b_char.cmp(&a_char)
                })
                .then_with(|| a.cmp(b))
        });
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    pub fn entities(&self) -> &[KnownEntity] {
        &self.entities
    }

    /// Entities mentioned in `normalized_text` (lower-cased, single-spaced), in
    /// order of first appearance. Matches are word-bounded, so a name never
    /// matches inside a longer word or a longer known name.
    pub fn find_mentions(&self, normalized_text: &str) -> Vec<EntityMention> {
        let mut claimed: Vec<(usize, usize)> = Vec::new();
        let mut mentions: Vec<EntityMention> = Vec::new();

        for (form, index) in &self.patterns {
            for start in phrase_positions(normalized_text, form) {
                let end = start + form.len();
                if claimed.iter().any(|&(s, e)| start < e && s < end) {
                    continue;
                }
                claimed.push((start, end));

                let entity = &self.entities[*index];
                match mentions.iter_mut().find(|m| m.node_id == entity.node_id) {
                    Some(existing) => existing.position = existing.position.min(start),
                    None => mentions.push(EntityMention {
                        node_id: entity.node_id,
                        name: entity.name.clone(),
                        node_type: entity.node_type,
                        position: start,
                    }),
                }
            }
        }

        mentions.sort_by_key(|m| m.position);
        mentions
    }
}
