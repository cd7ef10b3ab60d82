//! Graph retrieval for one classified query.

use std::collections::{HashMap, HashSet};

use story_graph::{ActivationConfig, Edge, EdgeId, Node, NodeId, NodeType, StoryGraph};
use tracing::debug;

use crate::classifier::{ClassifiedQuery, QueryType};
use crate::context_assembler::{EntityFacts, GraphContext};

/// Collect graph facts around the entities named in `query`.
pub(crate) fn gather(
    graph: &StoryGraph,
    query: &ClassifiedQuery,
    radius: usize,
    activation: &ActivationConfig,
) -> GraphContext {
    let entities = resolve_entities(graph, query);
    let mut listed: HashSet<EdgeId> = HashSet::new();

    let scene = scene_lines(graph, &mut listed);

    let mut relationships = Vec::new();
    for (i, a) in entities.iter().enumerate() {
        for b in &entities[i + 1..] {
            for edge in graph.active_edges_between(a.id, b.id) {
                if listed.insert(edge.id) {
                    relationships.push(describe_edge(graph, edge));
                }
            }
        }
    }

    let mut structure = Vec::new();
    for entity in &entities {
        let Ok(network) = graph.ego_network_with(entity.id, radius, activation) else {
            continue;
        };
        let rank: HashMap<NodeId, usize> = network
            .members
            .iter()
            .enumerate()
            .map(|(i, m)| (m.node_id, i))
            .collect();
        let mut edges: Vec<&Edge> = network
            .edges
            .iter()
            .filter_map(|id| graph.edge(*id))
            .filter(|e| !listed.contains(&e.id))
            .collect();
        // Edges to the most activated neighbours first.
        edges.sort_by_key(|e| {
            let source = rank.get(&e.source_id).copied().unwrap_or(usize::MAX);
            let target = rank.get(&e.target_id).copied().unwrap_or(usize::MAX);
            source.max(target)
        });
        for edge in edges {
            if listed.insert(edge.id) {
                structure.push(describe_edge(graph, edge));
            }
        }
    }
    if matches!(
        query.query_type,
        QueryType::PlotStatus | QueryType::SceneContext | QueryType::Hybrid
    ) {
        structure.extend(graph.nodes_of_type(NodeType::Beat).into_iter().map(describe_node));
    }

    let world_rules = graph
        .nodes_of_type(NodeType::WorldRule)
        .into_iter()
        .map(describe_node)
        .collect();

    debug!(
        entities = entities.len(),
        relationships = relationships.len(),
        structure = structure.len(),
        "gathered graph context"
    );

    GraphContext {
        entities: entities.into_iter().map(EntityFacts::from_node).collect(),
        scene,
        relationships,
        structure,
        world_rules,
    }
}

/// Nodes for the query's mentions, in mention order and without repeats.
fn resolve_entities<'g>(graph: &'g StoryGraph, query: &ClassifiedQuery) -> Vec<&'g Node> {
    let mut seen = HashSet::new();
    query
        .mentions
        .iter()
        .filter_map(|m| {
            graph
                .node(m.node_id)
                .or_else(|| graph.find_by_name(&m.name).into_iter().next())
        })
        .filter(|n| seen.insert(n.id))
        .collect()
}

fn scene_lines(graph: &StoryGraph, listed: &mut HashSet<EdgeId>) -> Vec<String> {
    let Some(scene) = graph.active_scene() else {
        return Vec::new();
    };
    let mut lines = vec![describe_node(scene)];
    for edge in graph.active_edges_touching(scene.id) {
        if listed.insert(edge.id) {
            lines.push(describe_edge(graph, edge));
        }
    }
    lines
}

fn describe_node(node: &Node) -> String {
    let description = node.description.trim();
    if description.is_empty() {
        node.name.clone()
    } else {
        format!("{}: {}", node.name, description)
    }
}

/// `Mara HINDERS Jon: refuses him passage`
fn describe_edge(graph: &StoryGraph, edge: &Edge) -> String {
    let name = |id: NodeId| graph.node(id).map_or("?", |n| n.name.as_str());
    let line = format!("{} {} {}", name(edge.source_id), edge.relation, name(edge.target_id));
    let description = edge.description.trim();
    if description.is_empty() {
        line
    } else {
        format!("{}: {}", line, description)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::QueryClassifier;
    use crate::config::NarrativeConfig;
    use std::sync::Arc;
    use story_graph::RelationType;

    fn harbor() -> (StoryGraph, NodeId, NodeId) {
        let mut graph = StoryGraph::new();
        let mara = graph
            .add_node(Node::character("Mara").with_description("A smuggler"))
            .unwrap();
        let jon = graph.add_node(Node::character("Jon")).unwrap();
        let guild = graph
            .add_node(Node::new(NodeType::Faction, "Harbor Guild"))
            .unwrap();
        let docks = graph
            .add_node(Node::new(NodeType::Scene, "Night at the docks").with_description("Mara bargains for passage"))
            .unwrap();
        graph
            .add_node(Node::new(NodeType::WorldRule, "Tithe").with_description("Every member pays at the full moon"))
            .unwrap();
        graph
            .add_edge(Edge::new(mara, jon, RelationType::Hinders).with_description("refuses him passage"))
            .unwrap();
        graph
            .add_edge(Edge::new(mara, guild, RelationType::PartOf))
            .unwrap();
        graph
            .add_edge(Edge::new(jon, docks, RelationType::LocatedIn))
            .unwrap();
        graph.set_active_scene(docks).unwrap();
        (graph, mara, jon)
    }

    fn classify(graph: &StoryGraph, text: &str) -> ClassifiedQuery {
        QueryClassifier::from_graph(Arc::new(NarrativeConfig::default()), graph).classify(text)
    }

    #[test]
    fn test_relationship_edges_between_entities() {
        let (graph, _, _) = harbor();
        let query = classify(&graph, "Mara and Jon: how does she feel about him?");
        let context = gather(&graph, &query, 2, &ActivationConfig::default());

        assert_eq!(context.entities.len(), 2);
        assert_eq!(context.relationships, vec!["Mara HINDERS Jon: refuses him passage"]);
        assert!(context.structure.iter().any(|l| l == "Mara PART_OF Harbor Guild"));
        // Listed once, under the highest-priority section.
        assert!(!context.structure.iter().any(|l| l.contains("HINDERS")));
    }

    #[test]
    fn test_scene_and_world_rules() {
        let (graph, _, _) = harbor();
        let query = classify(&graph, "Who is Mara?");
        let context = gather(&graph, &query, 1, &ActivationConfig::default());

        assert_eq!(context.scene[0], "Night at the docks: Mara bargains for passage");
        assert!(context.scene.iter().any(|l| l == "Jon LOCATED_IN Night at the docks"));
        assert_eq!(context.world_rules, vec!["Tithe: Every member pays at the full moon"]);
        assert_eq!(context.entities[0].description, "A smuggler");
    }

    #[test]
    fn test_no_mentions_no_entities() {
        let (graph, _, _) = harbor();
        let query = classify(&graph, "What happened so far in the plot?");
        let context = gather(&graph, &query, 2, &ActivationConfig::default());

        assert!(context.entities.is_empty());
        assert!(context.relationships.is_empty());
    }
}
