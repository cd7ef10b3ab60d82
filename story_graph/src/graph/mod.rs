//! Story Graph - typed nodes, directed relations and their indexes.

mod conflict;
mod store;

pub use conflict::*;
pub use store::*;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

use crate::error::{GraphError, Result};
use crate::{
    normalize_name, CharacterCore, Edge, EdgeId, Node, NodeEmbedding, NodeId, NodeType,
    RelationType,
};

/// The main graph structure.
///
/// Nodes are unique by `(type, name)`; edges are unique by
/// `(source, target, relation)`. Nothing is ever hard-deleted: edges are
/// deactivated and contradictions wait in the conflict queue.
#[derive(Debug, Clone, Default)]
pub struct StoryGraph {
    /// All nodes stored by ID.
    nodes: HashMap<NodeId, Node>,

    /// All edges stored by ID.
    edges: HashMap<EdgeId, Edge>,

    /// Proposed contradictions, kept apart from the accepted edges.
    conflicts: Vec<ConflictRecord>,

    active_scene: Option<NodeId>,

    /// Index: (type, normalized canonical name) -> node.
    by_name: HashMap<(NodeType, String), NodeId>,

    /// Index: normalized name or alias -> nodes of any type.
    by_any_name: HashMap<String, Vec<NodeId>>,

    /// Adjacency lists.
    outgoing: HashMap<NodeId, Vec<EdgeId>>,
    incoming: HashMap<NodeId, Vec<EdgeId>>,
}

/// Serialized form of a graph; indexes are rebuilt on load.
#[derive(Serialize, Deserialize)]
struct GraphSnapshot {
    nodes: Vec<Node>,
    edges: Vec<Edge>,
    #[serde(default)]
    conflicts: Vec<ConflictRecord>,
    #[serde(default)]
    active_scene: Option<NodeId>,
}

impl StoryGraph {
    /// Create a new empty graph.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a new node. Fails if a node of the same type already has this name.
    pub fn add_node(&mut self, node: Node) -> Result<NodeId> {
        if node.name.trim().is_empty() {
            return Err(GraphError::EmptyName);
        }
        let key = (node.node_type, normalize_name(&node.name));
        if self.by_name.contains_key(&key) {
            return Err(GraphError::DuplicateName {
                node_type: node.node_type,
                name: node.name,
            });
        }

        let id = node.id;
        self.by_name.insert(key, id);
        for name in node.names() {
            self.index_any_name(name, id);
        }
        self.nodes.insert(id, node);
        Ok(id)
    }

    /// Merge a node by `(type, name)`.
    ///
    /// An existing node keeps its identity; an empty description or missing
    /// core is filled from `node` and new aliases are added. Returns the ID and
    /// whether a new node was created.
    pub fn upsert_node(&mut self, node: Node) -> Result<(NodeId, bool)> {
        let Some(existing_id) = self.node_by_name(node.node_type, &node.name).map(|n| n.id) else {
            return self.add_node(node).map(|id| (id, true));
        };

        let mut new_aliases = Vec::new();
        if let Some(existing) = self.nodes.get_mut(&existing_id) {
            let mut changed = false;
            if existing.description.trim().is_empty() && !node.description.trim().is_empty() {
                existing.description = node.description;
                existing.embedding = None;
                changed = true;
            }
            if existing.core.is_none() && node.core.is_some() {
                existing.core = node.core;
                changed = true;
            }
            for alias in node.aliases {
                if !existing.answers_to(&alias) {
                    existing.aliases.push(alias.clone());
                    new_aliases.push(alias);
                    changed = true;
                }
            }
            if changed {
                existing.touch();
            }
        }
        for alias in new_aliases {
            self.index_any_name(&alias, existing_id);
        }

        Ok((existing_id, false))
    }

    /// Get node by ID.
    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(&id)
    }

    /// Get a node by type and canonical name (case-insensitive).
    pub fn node_by_name(&self, node_type: NodeType, name: &str) -> Option<&Node> {
        self.by_name
            .get(&(node_type, normalize_name(name)))
            .and_then(|id| self.nodes.get(id))
    }

    /// Find nodes of any type answering to `name` or one of their aliases.
    /// Characters come first.
    pub fn find_by_name(&self, name: &str) -> Vec<&Node> {
        let mut found: Vec<&Node> = self
            .by_any_name
            .get(&normalize_name(name))
            .map(|ids| ids.iter().filter_map(|id| self.nodes.get(id)).collect())
            .unwrap_or_default();
        found.sort_by_key(|n| (!n.is_character(), n.node_type, n.name.clone()));
        found
    }

    /// All nodes, in no particular order.
    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.values()
    }

    /// All nodes of a type, sorted by name.
    pub fn nodes_of_type(&self, node_type: NodeType) -> Vec<&Node> {
        let mut nodes: Vec<&Node> = self
            .nodes
            .values()
            .filter(|n| n.node_type == node_type)
            .collect();
        nodes.sort_by(|a, b| a.name.cmp(&b.name));
        nodes
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Replace a node's description. The stored embedding no longer matches
    /// the text, so it is unset.
    pub fn update_description(&mut self, id: NodeId, description: impl Into<String>) -> Result<()> {
        let node = self.node_mut(id)?;
        node.description = description.into();
        node.embedding = None;
        node.touch();
        Ok(())
    }

    pub fn set_character_core(&mut self, id: NodeId, core: CharacterCore) -> Result<()> {
        let node = self.node_mut(id)?;
        node.core = Some(core);
        node.touch();
        Ok(())
    }

    pub fn add_alias(&mut self, id: NodeId, alias: impl Into<String>) -> Result<()> {
        let alias = alias.into();
        let node = self.node_mut(id)?;
        if node.answers_to(&alias) {
            return Ok(());
        }
        node.aliases.push(alias.clone());
        node.touch();
        self.index_any_name(&alias, id);
        Ok(())
    }

    pub fn set_embedding(&mut self, id: NodeId, embedding: NodeEmbedding) -> Result<()> {
        self.node_mut(id)?.embedding = Some(embedding);
        Ok(())
    }

    pub fn clear_embedding(&mut self, id: NodeId) -> Result<()> {
        self.node_mut(id)?.embedding = None;
        Ok(())
    }

    /// Unset every vector not produced by `model`. Returns how many were cleared.
    pub fn clear_stale_embeddings(&mut self, model: &str) -> usize {
        let mut cleared = 0;
        for node in self.nodes.values_mut() {
            if node.embedding.as_ref().is_some_and(|e| e.model != model) {
                node.embedding = None;
                cleared += 1;
            }
        }
        cleared
    }

    /// Add a new edge. Both endpoints must already exist.
    pub fn add_edge(&mut self, edge: Edge) -> Result<EdgeId> {
        for endpoint in [edge.source_id, edge.target_id] {
            if !self.nodes.contains_key(&endpoint) {
                return Err(GraphError::MissingEndpoint(endpoint));
            }
        }
        if !edge.weight.is_finite() || edge.weight < 0.0 {
            return Err(GraphError::InvalidWeight(edge.weight));
        }

        let id = edge.id;
        self.outgoing.entry(edge.source_id).or_default().push(id);
        self.incoming.entry(edge.target_id).or_default().push(id);
        self.edges.insert(id, edge);
        Ok(id)
    }

    /// Merge an edge by `(source, target, relation)`.
    ///
    /// An existing edge keeps its identity, weight and active flag; an empty
    /// description is filled in. Returns the ID and whether a new edge was created.
    pub fn upsert_edge(&mut self, edge: Edge) -> Result<(EdgeId, bool)> {
        let existing_id = self
            .find_edge(edge.source_id, edge.target_id, &edge.relation)
            .map(|e| e.id);

        match existing_id {
            Some(id) => {
                if let Some(existing) = self.edges.get_mut(&id) {
                    if existing.description.trim().is_empty() && !edge.description.trim().is_empty() {
                        existing.description = edge.description;
                        existing.updated_at = Utc::now();
                    }
                }
                Ok((id, false))
            }
            None => self.add_edge(edge).map(|id| (id, true)),
        }
    }

    /// Find the edge `source -> target` with the given relation.
    pub fn find_edge(
        &self,
        source: NodeId,
        target: NodeId,
        relation: &RelationType,
    ) -> Option<&Edge> {
        self.outgoing
            .get(&source)?
            .iter()
            .filter_map(|id| self.edges.get(id))
            .find(|e| e.target_id == target && &e.relation == relation)
    }

    /// Get edge by ID.
    pub fn edge(&self, id: EdgeId) -> Option<&Edge> {
        self.edges.get(&id)
    }

    /// All edges, active or not.
    pub fn edges(&self) -> impl Iterator<Item = &Edge> {
        self.edges.values()
    }

    /// Active edges only.
    pub fn active_edges(&self) -> impl Iterator<Item = &Edge> {
        self.edges.values().filter(|e| e.is_active)
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    /// Mark an edge inactive. It stays in the graph for inspection.
    pub fn deactivate_edge(&mut self, id: EdgeId) -> Result<()> {
        self.set_edge_active(id, false)
    }

    pub fn reactivate_edge(&mut self, id: EdgeId) -> Result<()> {
        self.set_edge_active(id, true)
    }

    /// Edges leaving `id`, active or not.
    pub fn outgoing_edges(&self, id: NodeId) -> Vec<&Edge> {
        self.edges_in(self.outgoing.get(&id))
    }

    /// Edges arriving at `id`, active or not.
    pub fn incoming_edges(&self, id: NodeId) -> Vec<&Edge> {
        self.edges_in(self.incoming.get(&id))
    }

    /// Active edges touching `id` in either direction.
    pub fn active_edges_touching(&self, id: NodeId) -> Vec<&Edge> {
        // Self-loops show up in both lists.
        let mut seen = HashSet::new();
        let mut edges: Vec<&Edge> = self
            .outgoing_edges(id)
            .into_iter()
            .chain(self.incoming_edges(id))
            .filter(|e| e.is_active && seen.insert(e.id))
            .collect();
        edges.sort_by_key(|e| e.created_at);
        edges
    }

    /// Active edges joining `a` and `b` in either direction.
    pub fn active_edges_between(&self, a: NodeId, b: NodeId) -> Vec<&Edge> {
        self.outgoing_edges(a)
            .into_iter()
            .chain(self.outgoing_edges(b))
            .filter(|e| e.is_active && e.connects(a, b))
            .collect()
    }

    /// Nodes joined to `id` by an active edge, ignoring direction.
    pub fn neighbors(&self, id: NodeId) -> Vec<NodeId> {
        let mut seen = HashSet::new();
        self.active_edges_touching(id)
            .into_iter()
            .filter_map(|e| e.other_end(id))
            .filter(|n| *n != id && seen.insert(*n))
            .collect()
    }

    /// Set the scene currently being written.
    pub fn set_active_scene(&mut self, id: NodeId) -> Result<()> {
        if !self.nodes.contains_key(&id) {
            return Err(GraphError::NodeNotFound(id));
        }
        self.active_scene = Some(id);
        Ok(())
    }

    pub fn active_scene(&self) -> Option<&Node> {
        self.active_scene.and_then(|id| self.nodes.get(&id))
    }

    /// Queue a proposed contradiction. Both endpoints must exist.
    pub fn push_conflict(&mut self, conflict: ConflictRecord) -> Result<ConflictId> {
        for endpoint in [conflict.source_id, conflict.target_id] {
            if !self.nodes.contains_key(&endpoint) {
                return Err(GraphError::MissingEndpoint(endpoint));
            }
        }
        let duplicate = self.conflicts.iter().find(|c| {
            c.is_open() && c.source_id == conflict.source_id && c.target_id == conflict.target_id
        });
        if let Some(existing) = duplicate {
            return Ok(existing.id);
        }
        let id = conflict.id;
        self.conflicts.push(conflict);
        Ok(id)
    }

    /// Every conflict ever queued.
    pub fn conflicts(&self) -> &[ConflictRecord] {
        &self.conflicts
    }

    /// Conflicts still awaiting review.
    pub fn open_conflicts(&self) -> Vec<&ConflictRecord> {
        self.conflicts.iter().filter(|c| c.is_open()).collect()
    }

    /// Accept or dismiss an open conflict. Accepting records an explicit
    /// `CONTRADICTS` edge and returns its ID.
    pub fn resolve_conflict(&mut self, id: ConflictId, accept: bool) -> Result<Option<EdgeId>> {
        let conflict = self
            .conflicts
            .iter()
            .find(|c| c.id == id && c.is_open())
            .cloned()
            .ok_or(GraphError::ConflictNotFound(id))?;

        let (status, edge_id) = if accept {
            let edge = Edge::new(conflict.source_id, conflict.target_id, RelationType::Contradicts)
                .with_description(conflict.description.clone())
                .with_source(conflict.proposed_by.clone());
            let (edge_id, _) = self.upsert_edge(edge)?;
            (ConflictStatus::Accepted(edge_id), Some(edge_id))
        } else {
            (ConflictStatus::Dismissed, None)
        };

        if let Some(record) = self.conflicts.iter_mut().find(|c| c.id == id) {
            record.status = status;
        }
        Ok(edge_id)
    }

    /// Serialize the whole graph as JSON.
    pub fn to_json(&self) -> Result<String> {
        let mut nodes: Vec<Node> = self.nodes.values().cloned().collect();
        nodes.sort_by_key(|n| n.created_at);
        let mut edges: Vec<Edge> = self.edges.values().cloned().collect();
        edges.sort_by_key(|e| e.created_at);

        let snapshot = GraphSnapshot {
            nodes,
            edges,
            conflicts: self.conflicts.clone(),
            active_scene: self.active_scene,
        };
        Ok(serde_json::to_string_pretty(&snapshot)?)
    }

    /// Load a graph from JSON produced by [`StoryGraph::to_json`].
    pub fn from_json(json: &str) -> Result<Self> {
        let snapshot: GraphSnapshot = serde_json::from_str(json)?;
        let mut graph = StoryGraph::new();
        for node in snapshot.nodes {
            graph.add_node(node)?;
        }
        for edge in snapshot.edges {
            graph.add_edge(edge)?;
        }
        for conflict in snapshot.conflicts {
            graph.conflicts.push(conflict);
        }
        if let Some(scene) = snapshot.active_scene {
            graph.set_active_scene(scene)?;
        }
        Ok(graph)
    }

    fn node_mut(&mut self, id: NodeId) -> Result<&mut Node> {
        self.nodes.get_mut(&id).ok_or(GraphError::NodeNotFound(id))
    }

    fn set_edge_active(&mut self, id: EdgeId, active: bool) -> Result<()> {
        let edge = self.edges.get_mut(&id).ok_or(GraphError::EdgeNotFound(id))?;
        if edge.is_active != active {
            edge.is_active = active;
            edge.updated_at = Utc::now();
        }
        Ok(())
    }

    fn edges_in(&self, ids: Option<&Vec<EdgeId>>) -> Vec<&Edge> {
        ids.map(|ids| ids.iter().filter_map(|id| self.edges.get(id)).collect())
            .unwrap_or_default()
    }

    fn index_any_name(&mut self, name: &str, id: NodeId) {
        let ids = self.by_any_name.entry(normalize_name(name)).or_default();
        if !ids.contains(&id) {
            ids.push(id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_characters() -> (StoryGraph, NodeId, NodeId) {
        let mut graph = StoryGraph::new();
        let mara = graph
            .add_node(Node::character("Mara").with_description("A smuggler"))
            .unwrap();
        let jon = graph.add_node(Node::character("Jon")).unwrap();
        (graph, mara, jon)
    }

    #[test]
    fn test_add_and_get_node() {
        let (graph, mara, _) = two_characters();
        let node = graph.node(mara).unwrap();
        assert_eq!(node.name, "Mara");
        assert_eq!(graph.node_count(), 2);
        assert_eq!(
            graph.node_by_name(NodeType::Character, "mara").map(|n| n.id),
            Some(mara)
        );
    }

    #[test]
    fn test_duplicate_name_rejected_per_type() {
        let (mut graph, _, _) = two_characters();
        let err = graph.add_node(Node::character("MARA")).unwrap_err();
        assert!(matches!(err, GraphError::DuplicateName { .. }));

        // Same name, different type is fine.
        assert!(graph.add_node(Node::new(NodeType::Location, "Mara")).is_ok());
    }

    #[test]
    fn test_upsert_merges_by_name() {
        let (mut graph, _, jon) = two_characters();
        let (id, created) = graph
            .upsert_node(
                Node::character("jon")
                    .with_description("A disgraced knight")
                    .with_alias("Jonny"),
            )
            .unwrap();

        assert_eq!(id, jon);
        assert!(!created);
        assert_eq!(graph.node_count(), 2);
        assert_eq!(graph.node(jon).unwrap().description, "A disgraced knight");
        assert_eq!(graph.find_by_name("Jonny")[0].id, jon);
    }

    #[test]
    fn test_upsert_keeps_existing_description() {
        let (mut graph, mara, _) = two_characters();
        graph
            .upsert_node(Node::character("Mara").with_description("Something else"))
            .unwrap();
        assert_eq!(graph.node(mara).unwrap().description, "A smuggler");
    }

    #[test]
    fn test_find_by_name_prefers_characters() {
        let (mut graph, mara, _) = two_characters();
        graph.add_node(Node::new(NodeType::Location, "Mara")).unwrap();
        let found = graph.find_by_name("MARA");
        assert_eq!(found.len(), 2);
        assert_eq!(found[0].id, mara);
    }

    #[test]
    fn test_edge_requires_endpoints() {
        let (mut graph, mara, _) = two_characters();
        let ghost = NodeId::new();
        let err = graph
            .add_edge(Edge::new(mara, ghost, RelationType::Knows))
            .unwrap_err();
        assert!(matches!(err, GraphError::MissingEndpoint(id) if id == ghost));
        assert_eq!(graph.edge_count(), 0);
    }

    #[test]
    fn test_edge_weight_validated() {
        let (mut graph, mara, jon) = two_characters();
        let err = graph
            .add_edge(Edge::new(mara, jon, RelationType::Hinders).with_weight(f32::NAN))
            .unwrap_err();
        assert!(matches!(err, GraphError::InvalidWeight(_)));
    }

    #[test]
    fn test_upsert_edge_never_duplicates() {
        let (mut graph, mara, jon) = two_characters();
        let (first, created) = graph
            .upsert_edge(Edge::new(mara, jon, RelationType::Loves))
            .unwrap();
        assert!(created);
        let (second, created) = graph
            .upsert_edge(Edge::new(mara, jon, RelationType::Loves).with_description("Quietly"))
            .unwrap();
        assert!(!created);
        assert_eq!(first, second);
        assert_eq!(graph.edge_count(), 1);
        assert_eq!(graph.edge(first).unwrap().description, "Quietly");
    }

    #[test]
    fn test_deactivate_keeps_history() {
        let (mut graph, mara, jon) = two_characters();
        let id = graph
            .add_edge(Edge::new(jon, mara, RelationType::Hinders))
            .unwrap();

        graph.deactivate_edge(id).unwrap();

        assert_eq!(graph.edge_count(), 1);
        assert!(!graph.edge(id).unwrap().is_active);
        assert!(graph.neighbors(mara).is_empty());
        assert!(graph.active_edges_between(mara, jon).is_empty());

        graph.reactivate_edge(id).unwrap();
        assert_eq!(graph.neighbors(mara), vec![jon]);
    }

    #[test]
    fn test_adjacency() {
        let (mut graph, mara, jon) = two_characters();
        let harbor = graph.add_node(Node::new(NodeType::Location, "Harbor")).unwrap();
        graph.add_edge(Edge::new(mara, jon, RelationType::Knows)).unwrap();
        graph.add_edge(Edge::new(jon, mara, RelationType::Hates)).unwrap();
        graph.add_edge(Edge::new(mara, harbor, RelationType::LocatedIn)).unwrap();

        assert_eq!(graph.outgoing_edges(mara).len(), 2);
        assert_eq!(graph.incoming_edges(mara).len(), 1);
        assert_eq!(graph.active_edges_between(mara, jon).len(), 2);
        assert_eq!(graph.neighbors(mara).len(), 2);
    }

    #[test]
    fn test_update_description_clears_embedding() {
        let (mut graph, mara, _) = two_characters();
        graph
            .set_embedding(mara, NodeEmbedding::new(vec![1.0, 0.0], "model-a"))
            .unwrap();
        graph.update_description(mara, "A reformed smuggler").unwrap();
        assert!(graph.node(mara).unwrap().embedding.is_none());
    }

    #[test]
    fn test_clear_stale_embeddings() {
        let (mut graph, mara, jon) = two_characters();
        graph
            .set_embedding(mara, NodeEmbedding::new(vec![1.0], "model-a"))
            .unwrap();
        graph
            .set_embedding(jon, NodeEmbedding::new(vec![1.0], "model-b"))
            .unwrap();

        assert_eq!(graph.clear_stale_embeddings("model-b"), 1);
        assert!(graph.node(mara).unwrap().embedding.is_none());
        assert!(graph.node(jon).unwrap().embedding.is_some());
    }

    #[test]
    fn test_conflict_queue_is_separate() {
        let (mut graph, mara, jon) = two_characters();
        let conflict = graph
            .push_conflict(ConflictRecord::new(mara, jon, "Eye colour differs"))
            .unwrap();

        assert_eq!(graph.edge_count(), 0);
        assert_eq!(graph.open_conflicts().len(), 1);

        // Re-queuing the same pair returns the open record.
        let again = graph
            .push_conflict(ConflictRecord::new(mara, jon, "Eye colour differs"))
            .unwrap();
        assert_eq!(again, conflict);

        let edge = graph.resolve_conflict(conflict, true).unwrap().unwrap();
        assert_eq!(graph.edge(edge).unwrap().relation, RelationType::Contradicts);
        assert!(graph.open_conflicts().is_empty());
        assert!(graph.resolve_conflict(conflict, true).is_err());
    }

    #[test]
    fn test_dismiss_conflict() {
        let (mut graph, mara, jon) = two_characters();
        let conflict = graph
            .push_conflict(ConflictRecord::new(mara, jon, "Timeline clash"))
            .unwrap();
        assert_eq!(graph.resolve_conflict(conflict, false).unwrap(), None);
        assert_eq!(graph.conflicts()[0].status, ConflictStatus::Dismissed);
        assert_eq!(graph.edge_count(), 0);
    }

    #[test]
    fn test_json_round_trip_rebuilds_indexes() {
        let (mut graph, mara, jon) = two_characters();
        graph.add_alias(mara, "The Fox").unwrap();
        let edge = graph.add_edge(Edge::new(mara, jon, RelationType::Knows)).unwrap();
        graph.set_active_scene(jon).unwrap();

        let restored = StoryGraph::from_json(&graph.to_json().unwrap()).unwrap();

        assert_eq!(restored.node_count(), 2);
        assert_eq!(restored.find_by_name("the fox")[0].id, mara);
        assert_eq!(restored.outgoing_edges(mara)[0].id, edge);
        assert_eq!(restored.active_scene().map(|n| n.id), Some(jon));
    }
}
