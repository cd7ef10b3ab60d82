use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

use story_graph::NodeId;

use super::community::CharacterProjection;

/// A character ranked by how often it sits between others.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BridgeCharacter {
    pub node_id: NodeId,
    pub name: String,
    /// Normalized betweenness in [0, 1].
    pub centrality: f64,
    /// Distinct characters directly connected.
    pub degree: usize,
}

/// Brandes betweenness over the unweighted character projection, normalized
/// for an undirected graph.
pub(crate) fn betweenness(projection: &CharacterProjection) -> Vec<f64> {
    let n = projection.len();
    let mut centrality = vec![0.0; n];

    for s in 0..n {
        let mut stack: Vec<usize> = Vec::with_capacity(n);
        let mut predecessors: Vec<Vec<usize>> = vec![Vec::new(); n];
        let mut sigma = vec![0.0_f64; n];
        let mut dist: Vec<Option<usize>> = vec![None; n];
        sigma[s] = 1.0;
        dist[s] = Some(0);

        let mut queue = VecDeque::from([s]);
        while let Some(v) = queue.pop_front() {
            stack.push(v);
            let v_dist = dist[v].unwrap_or(0);
            for &(w, _) in &projection.adjacency[v] {
                if dist[w].is_none() {
                    dist[w] = Some(v_dist + 1);
                    queue.push_back(w);
                }
                if dist[w] == Some(v_dist + 1) {
                    sigma[w] += sigma[v];
                    predecessors[w].push(v);
                }
            }
        }

        let mut delta = vec![0.0_f64; n];
        while let Some(w) = stack.pop() {
            for &v in &predecessors[w] {
                delta[v] += (sigma[v] / sigma[w]) * (1.0 + delta[w]);
            }
            if w != s {
                centrality[w] += delta[w];
            }
        }
    }

    // Each pair was counted from both ends.
    let pairs = if n > 2 { ((n - 1) * (n - 2)) as f64 } else { 1.0 };
    centrality.iter().map(|c| c / pairs).collect()
}

/// Characters by descending betweenness, ties broken by name.
pub(crate) fn rank_bridges(projection: &CharacterProjection, count: usize) -> Vec<BridgeCharacter> {
    let scores = betweenness(projection);
    let mut ranked: Vec<BridgeCharacter> = scores
        .into_iter()
        .enumerate()
        .map(|(i, centrality)| BridgeCharacter {
            node_id: projection.nodes[i],
            name: projection.names[i].clone(),
            centrality,
            degree: projection.adjacency[i].len(),
        })
        .collect();
    ranked.sort_by(|a, b| {
        b.centrality
            .partial_cmp(&a.centrality)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.name.cmp(&b.name))
    });
    ranked.truncate(count);
    ranked
}

#[cfg(test)]
mod tests {
    use super::*;

    fn projection(names: &[&str], edges: &[(usize, usize)]) -> CharacterProjection {
        let mut adjacency = vec![Vec::new(); names.len()];
        for &(a, b) in edges {
            adjacency[a].push((b, 1.0));
            adjacency[b].push((a, 1.0));
        }
        CharacterProjection {
            nodes: names.iter().map(|_| NodeId::new()).collect(),
            names: names.iter().map(|n| n.to_string()).collect(),
            adjacency,
        }
    }

    #[test]
    fn test_star_center_has_full_betweenness() {
        let p = projection(&["Hub", "A", "B", "C"], &[(0, 1), (0, 2), (0, 3)]);
        let scores = betweenness(&p);
        assert!((scores[0] - 1.0).abs() < 1e-9);
        assert!(scores[1..].iter().all(|s| *s == 0.0));
    }

    #[test]
    fn test_path_middle_ranks_first() {
        let p = projection(&["Ana", "Bo", "Cy", "Di"], &[(0, 1), (1, 2), (2, 3)]);
        let ranked = rank_bridges(&p, 2);
        assert_eq!(ranked.len(), 2);
        // Bo and Cy tie; names break the tie.
        assert_eq!(ranked[0].name, "Bo");
        assert_eq!(ranked[1].name, "Cy");
        assert!((ranked[0].centrality - 2.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_empty_projection() {
        let p = CharacterProjection::default();
        assert!(rank_bridges(&p, 3).is_empty());
    }
}
