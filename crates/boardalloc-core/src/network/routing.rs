//! The all-shortest-paths table over ordered pairs of cores.

use std::collections::VecDeque;

use petgraph::graph::NodeIndex;

use crate::network::topology::Topology;
use crate::network::types::{NodeId, NodeKind};
use crate::utils;

/// A route through the fabric, as a sequence of node IDs. Starts at the
/// source core and ends at the destination core, or at the destination's
/// switch when the final ejection channel is multi-ejection capable.
pub type Path = Vec<NodeId>;

/// The immutable table of minimum-hop paths for every ordered pair of
/// distinct cores. Built once at construction; safe to share across threads.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct PathTable {
    nr_cores: usize,
    inner: Vec<Vec<Vec<Path>>>,
}

impl PathTable {
    /// Enumerates every shortest path between every ordered pair of cores
    /// using one BFS per source. Each source is independent, so sources are
    /// processed in parallel chunks.
    pub(crate) fn new(topology: &Topology) -> Self {
        let g = &topology.graph;
        let nr_cores = topology.nr_cores();
        let sources = topology
            .core_ids()
            .map(|id| *topology.idx_of(&id).unwrap())
            .collect::<Vec<_>>();

        let entries = utils::par_chunks(&sources, |indices| {
            let mut entries = Vec::new();
            for &start in indices {
                let mut dist = vec![usize::MAX; g.node_count()];
                let mut preds: Vec<Vec<NodeIndex>> = vec![Vec::new(); g.node_count()];
                dist[start.index()] = 0;

                let mut queue = VecDeque::new();
                queue.push_back(start);
                while let Some(n) = queue.pop_front() {
                    let cur = dist[n.index()];
                    for succ in g.neighbors(n) {
                        if dist[succ.index()] == usize::MAX {
                            dist[succ.index()] = cur + 1;
                            // Cores never forward traffic.
                            if matches!(g[succ].kind, NodeKind::Switch) {
                                queue.push_back(succ);
                            }
                        }
                        if dist[succ.index()] == cur + 1 {
                            preds[succ.index()].push(n);
                        }
                    }
                }

                for dst in 0..nr_cores {
                    let dst_id = NodeId::new(dst);
                    let dst_idx = *topology.idx_of(&dst_id).unwrap();
                    if dst_idx == start || dist[dst_idx.index()] == usize::MAX {
                        continue;
                    }
                    let mut paths = Vec::new();
                    let mut suffix = Vec::new();
                    collect_paths(g, &preds, start, dst_idx, &mut suffix, &mut paths);
                    // Elide the final ejection hop where the switch delivers
                    // to its core in the same cycle.
                    for path in &mut paths {
                        let n = path.len();
                        if n >= 2 && topology.is_multi_ejection(path[n - 2], path[n - 1]) {
                            path.pop();
                        }
                    }
                    paths.sort();
                    entries.push((g[start].id, dst_id, paths));
                }
            }
            entries
        });

        let mut inner = vec![vec![Vec::new(); nr_cores]; nr_cores];
        for (src, dst, paths) in entries {
            inner[src.inner()][dst.inner()] = paths;
        }
        Self { nr_cores, inner }
    }

    /// All minimum-hop paths from core `src` to core `dst`. Non-empty for
    /// every ordered pair of distinct cores in a connected fabric.
    pub fn paths(&self, src: NodeId, dst: NodeId) -> &[Path] {
        &self.inner[src.inner()][dst.inner()]
    }

    /// The minimum hop count from `src` to `dst`, measured in path edges.
    pub fn min_hops(&self, src: NodeId, dst: NodeId) -> usize {
        self.paths(src, dst)
            .first()
            .map(|p| p.len() - 1)
            .expect("no path between cores")
    }

    pub fn nr_cores(&self) -> usize {
        self.nr_cores
    }
}

/// Walks the BFS predecessor lists backwards from `node` to `start`,
/// emitting every shortest path in forward order.
fn collect_paths(
    g: &petgraph::graph::DiGraph<crate::network::types::Node, crate::network::types::Channel>,
    preds: &[Vec<NodeIndex>],
    start: NodeIndex,
    node: NodeIndex,
    suffix: &mut Vec<NodeId>,
    out: &mut Vec<Path>,
) {
    suffix.push(g[node].id);
    if node == start {
        let mut path = suffix.clone();
        path.reverse();
        out.push(path);
    } else {
        for &pred in &preds[node.index()] {
            collect_paths(g, preds, start, pred, suffix, out);
        }
    }
    suffix.pop();
}
