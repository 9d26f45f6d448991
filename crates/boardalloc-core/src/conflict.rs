//! Detects which flows contend for wire time: two flows conflict iff their
//! flow graphs share at least one directed edge. Everything here is pure and
//! safe to call from worker threads.

use std::collections::{BTreeMap, BTreeSet};

use itertools::Itertools;
use rustc_hash::FxHashMap;

use crate::model::FlowGraph;
use crate::network::NodeId;

/// All unordered pairs of flows whose edge sets intersect, computed with an
/// inverted edge index.
pub fn crossing_flows(flows: &BTreeMap<i64, FlowGraph>) -> BTreeSet<(i64, i64)> {
    let mut by_edge: FxHashMap<(NodeId, NodeId), Vec<i64>> = FxHashMap::default();
    for (&cvid, graph) in flows {
        for edge in graph.edges() {
            by_edge.entry(edge).or_default().push(cvid);
        }
    }
    let mut crossings = BTreeSet::new();
    for ids in by_edge.values() {
        for (&a, &b) in ids.iter().tuple_combinations() {
            crossings.insert(if a < b { (a, b) } else { (b, a) });
        }
    }
    crossings
}

/// How many other flows the given flow shares at least one edge with. Used
/// as the primary score when ranking candidate paths.
pub fn crossings_for_a_flow(flows: &BTreeMap<i64, FlowGraph>, target: i64) -> usize {
    let Some(graph) = flows.get(&target) else {
        return 0;
    };
    flows
        .iter()
        .filter(|&(&id, other)| id != target && other.intersects(graph))
        .count()
}

/// The flow-conflict graph as an adjacency map. Every flow appears as a key,
/// isolated flows with an empty neighbor set.
pub(crate) fn conflict_adjacency(
    flows: &BTreeMap<i64, FlowGraph>,
) -> BTreeMap<i64, BTreeSet<i64>> {
    let mut adj: BTreeMap<i64, BTreeSet<i64>> =
        flows.keys().map(|&id| (id, BTreeSet::new())).collect();
    for (a, b) in crossing_flows(flows) {
        adj.get_mut(&a).unwrap().insert(b);
        adj.get_mut(&b).unwrap().insert(a);
    }
    adj
}

/// Enumerates all maximal cliques of the conflict graph (Bron-Kerbosch with
/// pivoting). Singleton cliques are included; callers interested in real
/// contention filter for size >= 2.
pub(crate) fn maximal_cliques(adj: &BTreeMap<i64, BTreeSet<i64>>) -> Vec<BTreeSet<i64>> {
    let mut out = Vec::new();
    let mut r = BTreeSet::new();
    let mut p = adj.keys().copied().collect::<BTreeSet<_>>();
    let mut x = BTreeSet::new();
    bron_kerbosch(adj, &mut r, &mut p, &mut x, &mut out);
    out
}

fn bron_kerbosch(
    adj: &BTreeMap<i64, BTreeSet<i64>>,
    r: &mut BTreeSet<i64>,
    p: &mut BTreeSet<i64>,
    x: &mut BTreeSet<i64>,
    out: &mut Vec<BTreeSet<i64>>,
) {
    if p.is_empty() && x.is_empty() {
        out.push(r.clone());
        return;
    }
    // Pivot on the vertex covering the most of `p`.
    let pivot = p
        .iter()
        .chain(x.iter())
        .max_by_key(|u| adj[u].intersection(p).count())
        .copied()
        .unwrap();
    let candidates = p.difference(&adj[&pivot]).copied().collect::<Vec<_>>();
    for v in candidates {
        r.insert(v);
        let mut p2 = p.intersection(&adj[&v]).copied().collect::<BTreeSet<_>>();
        let mut x2 = x.intersection(&adj[&v]).copied().collect::<BTreeSet<_>>();
        bron_kerbosch(adj, r, &mut p2, &mut x2, out);
        r.remove(&v);
        p.remove(&v);
        x.insert(v);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::Path;

    fn graph_of(edges: &[(usize, usize)]) -> FlowGraph {
        let mut g = FlowGraph::default();
        for &(a, b) in edges {
            let path: Path = vec![NodeId::new(a), NodeId::new(b)];
            g.add_path(&path);
        }
        g
    }

    fn flow_set(entries: &[(i64, &[(usize, usize)])]) -> BTreeMap<i64, FlowGraph> {
        entries
            .iter()
            .map(|&(id, edges)| (id, graph_of(edges)))
            .collect()
    }

    #[test]
    fn crossing_flows_finds_shared_edges() {
        let flows = flow_set(&[
            (0, &[(0, 1), (1, 2)]),
            (1, &[(1, 2), (2, 3)]),
            (2, &[(4, 5)]),
        ]);
        let crossings = crossing_flows(&flows);
        assert_eq!(crossings, [(0, 1)].into_iter().collect());
    }

    #[test]
    fn crossing_flows_is_permutation_invariant() {
        let forward = flow_set(&[(0, &[(0, 1)]), (1, &[(0, 1)]), (2, &[(1, 2)])]);
        let backward = flow_set(&[(2, &[(1, 2)]), (1, &[(0, 1)]), (0, &[(0, 1)])]);
        assert_eq!(crossing_flows(&forward), crossing_flows(&backward));
    }

    #[test]
    fn per_flow_count_matches_crossing_set() {
        let flows = flow_set(&[
            (0, &[(0, 1), (1, 2)]),
            (1, &[(1, 2)]),
            (2, &[(0, 1), (3, 4)]),
            (3, &[(3, 4)]),
        ]);
        let crossings = crossing_flows(&flows);
        for &id in flows.keys() {
            let expected = crossings
                .iter()
                .filter(|&&(a, b)| a == id || b == id)
                .count();
            assert_eq!(crossings_for_a_flow(&flows, id), expected);
        }
    }

    #[test]
    fn maximal_cliques_of_a_triangle_plus_pendant() {
        let flows = flow_set(&[
            (0, &[(0, 1)]),
            (1, &[(0, 1), (1, 2)]),
            (2, &[(0, 1), (1, 2), (9, 0)]),
            (3, &[(9, 0)]),
        ]);
        // 0-1, 0-2, 1-2 form a triangle; 3 only touches 2.
        let adj = conflict_adjacency(&flows);
        let mut cliques = maximal_cliques(&adj);
        cliques.sort();
        assert_eq!(
            cliques,
            vec![
                [0, 1, 2].into_iter().collect::<BTreeSet<i64>>(),
                [2, 3].into_iter().collect(),
            ]
        );
    }
}
