//! Character communities via Louvain modularity optimization.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, VecDeque};

use story_graph::{NodeId, NodeType, StoryGraph};

/// Undirected, weighted projection of the graph onto character nodes.
#[derive(Debug, Clone, Default)]
pub(crate) struct CharacterProjection {
    pub nodes: Vec<NodeId>,
    pub names: Vec<String>,
    /// Neighbor lists with merged weights; no self loops.
    pub adjacency: Vec<Vec<(usize, f64)>>,
}

impl CharacterProjection {
    /// Characters ordered by name, joined by their active edges.
    pub fn build(graph: &StoryGraph) -> Self {
        let characters = graph.nodes_of_type(NodeType::Character);
        let nodes: Vec<NodeId> = characters.iter().map(|n| n.id).collect();
        let names: Vec<String> = characters.iter().map(|n| n.name.clone()).collect();
        let index: HashMap<NodeId, usize> = nodes.iter().enumerate().map(|(i, id)| (*id, i)).collect();

        let mut merged: Vec<BTreeMap<usize, f64>> = vec![BTreeMap::new(); nodes.len()];
        for edge in graph.active_edges() {
            let (Some(&a), Some(&b)) = (index.get(&edge.source_id), index.get(&edge.target_id)) else {
                continue;
            };
            if a == b {
                continue;
            }
            // Zero-weight edges still connect.
            let weight = f64::from(edge.weight).max(f64::EPSILON);
            *merged[a].entry(b).or_default() += weight;
            *merged[b].entry(a).or_default() += weight;
        }

        Self {
            nodes,
            names,
            adjacency: merged.into_iter().map(|m| m.into_iter().collect()).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }
}

/// How the reported partition was produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CommunityMethod {
    Louvain,
    /// Louvain found no partition above the modularity floor.
    ConnectedComponents,
}

/// A group of characters more densely connected to each other than to the rest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Community {
    pub members: Vec<NodeId>,
    pub names: Vec<String>,
    /// Summed weight of edges inside the community.
    pub internal_weight: f64,
}

impl Community {
    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn contains(&self, node: NodeId) -> bool {
        self.members.contains(&node)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommunityReport {
    /// Largest first.
    pub communities: Vec<Community>,
    pub modularity: f64,
    pub method: CommunityMethod,
}

/// Partition characters, falling back to connected components when the best
/// Louvain partition scores below `min_modularity`.
pub(crate) fn detect(projection: &CharacterProjection, min_modularity: f64) -> CommunityReport {
    if projection.len() == 0 {
        return CommunityReport {
            communities: Vec::new(),
            modularity: 0.0,
            method: CommunityMethod::Louvain,
        };
    }

    let louvain = louvain(&projection.adjacency);
    let louvain_q = modularity(&projection.adjacency, &louvain);

    let (assignment, modularity_value, method) = if louvain_q >= min_modularity {
        (louvain, louvain_q, CommunityMethod::Louvain)
    } else {
        let components = connected_components(&projection.adjacency);
        let q = modularity(&projection.adjacency, &components);
        (components, q, CommunityMethod::ConnectedComponents)
    };

    CommunityReport {
        communities: group(projection, &assignment),
        modularity: modularity_value,
        method,
    }
}

/// Newman modularity of `assignment`; 0 for a graph without edges.
pub(crate) fn modularity(adjacency: &[Vec<(usize, f64)>], assignment: &[usize]) -> f64 {
    let two_m: f64 = adjacency.iter().flatten().map(|(_, w)| w).sum();
    if two_m == 0.0 {
        return 0.0;
    }

    let mut internal: HashMap<usize, f64> = HashMap::new();
    let mut degree: HashMap<usize, f64> = HashMap::new();
    for (i, neighbors) in adjacency.iter().enumerate() {
        for &(j, w) in neighbors {
            *degree.entry(assignment[i]).or_default() += w;
            if assignment[i] == assignment[j] {
                *internal.entry(assignment[i]).or_default() += w;
            }
        }
    }

    degree
        .iter()
        .map(|(c, tot)| internal.get(c).copied().unwrap_or(0.0) / two_m - (tot / two_m).powi(2))
        .sum()
}

/// Multi-level Louvain. Returns a community index per node.
fn louvain(adjacency: &[Vec<(usize, f64)>]) -> Vec<usize> {
    let mut membership: Vec<usize> = (0..adjacency.len()).collect();
    let mut level = Level {
        adjacency: adjacency.to_vec(),
        self_loops: vec![0.0; adjacency.len()],
    };

    loop {
        let (assignment, moved) = level.local_moving();
        if !moved {
            break;
        }
        let (next, count) = level.aggregate(&assignment);
        for community in membership.iter_mut() {
            *community = assignment[*community];
        }
        if count == level.adjacency.len() {
            break;
        }
        level = next;
    }

    renumber(&membership)
}

/// One level of the Louvain hierarchy: nodes are communities of the level below.
struct Level {
    adjacency: Vec<Vec<(usize, f64)>>,
    /// Internal weight of each aggregated node, each edge counted once.
    self_loops: Vec<f64>,
}

impl Level {
    fn degrees(&self) -> Vec<f64> {
        self.adjacency
            .iter()
            .zip(&self.self_loops)
            .map(|(neighbors, internal)| neighbors.iter().map(|(_, w)| w).sum::<f64>() + 2.0 * internal)
            .collect()
    }

    /// Move nodes between neighboring communities while modularity improves.
    /// Returns the (dense) assignment and whether anything moved.
    fn local_moving(&self) -> (Vec<usize>, bool) {
        let n = self.adjacency.len();
        let degree = self.degrees();
        let two_m: f64 = degree.iter().sum();
        let mut community: Vec<usize> = (0..n).collect();
        if two_m == 0.0 {
            return (community, false);
        }

        let mut totals = degree.clone();
        let mut moved_any = false;
        loop {
            let mut moved = false;
            for i in 0..n {
                let current = community[i];
                totals[current] -= degree[i];

                let mut links: BTreeMap<usize, f64> = BTreeMap::new();
                for &(j, w) in &self.adjacency[i] {
                    *links.entry(community[j]).or_default() += w;
                }

                let gain = |c: usize, k_in: f64| k_in - totals[c] * degree[i] / two_m;
                let mut best = current;
                let mut best_gain = gain(current, links.get(&current).copied().unwrap_or(0.0));
                for (&c, &k_in) in &links {
                    let g = gain(c, k_in);
                    if g > best_gain + 1e-12 {
                        best = c;
                        best_gain = g;
                    }
                }

                totals[best] += degree[i];
                if best != current {
                    community[i] = best;
                    moved = true;
                    moved_any = true;
                }
            }
            if !moved {
                break;
            }
        }

        (renumber(&community), moved_any)
    }

    /// Collapse each community into a single node.
    fn aggregate(&self, assignment: &[usize]) -> (Level, usize) {
        let count = assignment.iter().max().map_or(0, |m| m + 1);
        let mut links: Vec<BTreeMap<usize, f64>> = vec![BTreeMap::new(); count];
        let mut self_loops = vec![0.0; count];

        for (i, neighbors) in self.adjacency.iter().enumerate() {
            let ci = assignment[i];
            self_loops[ci] += self.self_loops[i];
            for &(j, w) in neighbors {
                let cj = assignment[j];
                if ci == cj {
                    // Seen from both ends.
                    self_loops[ci] += w / 2.0;
                } else {
                    *links[ci].entry(cj).or_default() += w;
                }
            }
        }

        let level = Level {
            adjacency: links.into_iter().map(|m| m.into_iter().collect()).collect(),
            self_loops,
        };
        (level, count)
    }
}

fn connected_components(adjacency: &[Vec<(usize, f64)>]) -> Vec<usize> {
    let mut component = vec![usize::MAX; adjacency.len()];
    let mut next = 0;
    for start in 0..adjacency.len() {
        if component[start] != usize::MAX {
            continue;
        }
        component[start] = next;
        let mut queue = VecDeque::from([start]);
        while let Some(v) = queue.pop_front() {
            for &(w, _) in &adjacency[v] {
                if component[w] == usize::MAX {
                    component[w] = next;
                    queue.push_back(w);
                }
            }
        }
        next += 1;
    }
    component
}

/// Relabel communities 0.. in order of first appearance.
fn renumber(assignment: &[usize]) -> Vec<usize> {
    let mut labels: HashMap<usize, usize> = HashMap::new();
    assignment
        .iter()
        .map(|c| {
            let next = labels.len();
            *labels.entry(*c).or_insert(next)
        })
        .collect()
}

fn group(projection: &CharacterProjection, assignment: &[usize]) -> Vec<Community> {
    let mut communities: BTreeMap<usize, Community> = BTreeMap::new();
    for (i, &c) in assignment.iter().enumerate() {
        let community = communities.entry(c).or_insert_with(|| Community {
            members: Vec::new(),
            names: Vec::new(),
            internal_weight: 0.0,
        });
        community.members.push(projection.nodes[i]);
        community.names.push(projection.names[i].clone());
        for &(j, w) in &projection.adjacency[i] {
            if assignment[j] == c && i < j {
                community.internal_weight += w;
            }
        }
    }

    let mut communities: Vec<Community> = communities.into_values().collect();
    communities.sort_by(|a, b| b.len().cmp(&a.len()).then_with(|| a.names.cmp(&b.names)));
    communities
}

#[cfg(test)]
mod tests {
    use super::*;

    fn adjacency(n: usize, edges: &[(usize, usize)]) -> Vec<Vec<(usize, f64)>> {
        let mut adjacency = vec![Vec::new(); n];
        for &(a, b) in edges {
            adjacency[a].push((b, 1.0));
            adjacency[b].push((a, 1.0));
        }
        adjacency
    }

    #[test]
    fn test_louvain_splits_two_triangles() {
        let adj = adjacency(6, &[(0, 1), (1, 2), (0, 2), (3, 4), (4, 5), (3, 5), (2, 3)]);
        let assignment = louvain(&adj);

        assert_eq!(assignment[0], assignment[1]);
        assert_eq!(assignment[1], assignment[2]);
        assert_eq!(assignment[3], assignment[4]);
        assert_eq!(assignment[4], assignment[5]);
        assert_ne!(assignment[0], assignment[3]);
        assert!((modularity(&adj, &assignment) - 5.0 / 14.0).abs() < 1e-9);
    }

    #[test]
    fn test_modularity_of_single_community_is_zero() {
        let adj = adjacency(3, &[(0, 1), (1, 2), (0, 2)]);
        assert!(modularity(&adj, &[0, 0, 0]).abs() < 1e-9);
    }

    #[test]
    fn test_connected_components() {
        let adj = adjacency(5, &[(0, 1), (3, 4)]);
        assert_eq!(connected_components(&adj), vec![0, 0, 1, 2, 2]);
    }

    #[test]
    fn test_renumber() {
        assert_eq!(renumber(&[7, 7, 2, 9, 2]), vec![0, 0, 1, 2, 1]);
    }
}
