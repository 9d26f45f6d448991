//! Slot assignment over the flow-conflict graph: a saturation-degree greedy
//! coloring for every search loop, and an exact branch-and-bound clique
//! cover for lower-bound reporting.
//!
//! Vertices are flow cvids. Negative cvids are slots fixed by a previous
//! `apply`; the coloring may add flows to those slots but never renumbers
//! them.

use std::collections::{BTreeMap, BTreeSet};

use crate::conflict;
use crate::model::FlowGraph;

/// Colors the conflict graph and returns `cvid -> slot`.
///
/// Every distinct negative cvid is pinned to its own class up front, so a
/// prior slot can gain members but cannot move or merge. The remaining
/// classes are renumbered onto the unused slot indices in ascending order,
/// largest (by total flow-graph edges) first.
pub(crate) fn greedy_coloring(flows: &BTreeMap<i64, FlowGraph>) -> BTreeMap<i64, usize> {
    let adj = conflict::conflict_adjacency(flows);

    let mut color_of: BTreeMap<i64, usize> = BTreeMap::new();
    let mut fixed_slot_of_color: BTreeMap<usize, usize> = BTreeMap::new();
    for (color, &cvid) in flows.keys().filter(|&&c| c < 0).enumerate() {
        color_of.insert(cvid, color);
        fixed_slot_of_color.insert(color, (-cvid - 1) as usize);
    }

    // DSATUR: repeatedly color the vertex seeing the most distinct neighbor
    // colors, breaking ties by uncolored degree, then by smallest cvid.
    let mut uncolored = flows
        .keys()
        .copied()
        .filter(|&c| c >= 0)
        .collect::<BTreeSet<_>>();
    while !uncolored.is_empty() {
        let pick = uncolored
            .iter()
            .copied()
            .max_by_key(|v| {
                let saturation = adj[v]
                    .iter()
                    .filter_map(|n| color_of.get(n))
                    .collect::<BTreeSet<_>>()
                    .len();
                let degree = adj[v].iter().filter(|n| uncolored.contains(n)).count();
                (saturation, degree, std::cmp::Reverse(*v))
            })
            .unwrap();
        uncolored.remove(&pick);
        let neighbor_colors = adj[&pick]
            .iter()
            .filter_map(|n| color_of.get(n).copied())
            .collect::<BTreeSet<_>>();
        let mut color = 0;
        while neighbor_colors.contains(&color) {
            color += 1;
        }
        color_of.insert(pick, color);
    }

    // Renumber color classes onto slot indices. Fixed classes keep their
    // slot; free classes take the remaining indices in ascending order,
    // heaviest class first.
    let mut members: BTreeMap<usize, Vec<i64>> = BTreeMap::new();
    for (&cvid, &color) in &color_of {
        members.entry(color).or_default().push(cvid);
    }
    let taken = fixed_slot_of_color.values().copied().collect::<BTreeSet<_>>();
    let mut free_slots = (0..).filter(|s| !taken.contains(s));
    let mut free_classes = members
        .iter()
        .filter(|(color, _)| !fixed_slot_of_color.contains_key(color))
        .map(|(&color, cvids)| {
            let nr_edges = cvids.iter().map(|c| flows[c].nr_edges()).sum::<usize>();
            (color, nr_edges)
        })
        .collect::<Vec<_>>();
    free_classes.sort_by_key(|&(color, nr_edges)| (std::cmp::Reverse(nr_edges), color));

    let mut slot_of_color = fixed_slot_of_color;
    for (color, _) in free_classes {
        slot_of_color.insert(color, free_slots.next().unwrap());
    }
    color_of
        .into_iter()
        .map(|(cvid, color)| (cvid, slot_of_color[&color]))
        .collect()
}

/// Asserts the post-condition that no two edge-sharing flows share a slot.
/// A violation is a coloring bug; it is never recovered from.
pub(crate) fn verify_coloring(flows: &BTreeMap<i64, FlowGraph>, coloring: &BTreeMap<i64, usize>) {
    for (a, b) in conflict::crossing_flows(flows) {
        if coloring[&a] == coloring[&b] {
            panic!(
                "slot coloring violation: flows {a} and {b} share an edge and slot {}",
                coloring[&a]
            );
        }
    }
}

/// Minimum number of slots for the given flow set, via a depth-limited
/// branch-and-bound clique cover of the complement of the conflict graph.
/// An empty flow set needs zero slots.
pub(crate) fn exact_cover_size(flows: &BTreeMap<i64, FlowGraph>) -> usize {
    if flows.is_empty() {
        return 0;
    }
    let adj = conflict::conflict_adjacency(flows);
    let ids = flows.keys().copied().collect::<Vec<_>>();

    // Compatibility graph: flows that may share a slot. Distinct fixed slots
    // must stay distinct, so negative cvids are never compatible.
    let mut compat: BTreeMap<i64, BTreeSet<i64>> =
        ids.iter().map(|&id| (id, BTreeSet::new())).collect();
    for (i, &a) in ids.iter().enumerate() {
        for &b in &ids[i + 1..] {
            if !adj[&a].contains(&b) && !(a < 0 && b < 0) {
                compat.get_mut(&a).unwrap().insert(b);
                compat.get_mut(&b).unwrap().insert(a);
            }
        }
    }

    let upper = greedy_coloring(flows)
        .values()
        .copied()
        .collect::<BTreeSet<_>>()
        .len();
    let all = ids.iter().copied().collect::<BTreeSet<_>>();
    mcc(&compat, &all, all.len(), upper + 1).unwrap_or(upper)
}

/// Searches for a clique cover of `r` strictly shorter than `best`. Returns
/// the best cover length found, or `None` if nothing beats `best`.
fn mcc(
    compat: &BTreeMap<i64, BTreeSet<i64>>,
    r: &BTreeSet<i64>,
    k: usize,
    mut best: usize,
) -> Option<usize> {
    if r.is_empty() {
        return (best > 0).then_some(0);
    }
    let mut answer = None;
    let kmax = k.min(r.len());
    for k2 in (2..=kmax).rev() {
        // The bound only grows as k2 shrinks, so the first failure ends the
        // whole scan.
        if div_ceil(r.len(), k2) >= best {
            break;
        }
        for clique in k_cliques(compat, r, k2) {
            let rest = r.difference(&clique).copied().collect::<BTreeSet<_>>();
            if let Some(sub) = mcc(compat, &rest, k2, best - 1) {
                let total = sub + 1;
                if total < best {
                    best = total;
                    answer = Some(total);
                }
            }
        }
    }
    if r.len() < best {
        // Every remaining vertex in its own class.
        answer = Some(r.len());
    }
    answer
}

fn div_ceil(a: usize, b: usize) -> usize {
    (a + b - 1) / b
}

/// All cliques of exactly `k` vertices within `r`.
fn k_cliques(
    compat: &BTreeMap<i64, BTreeSet<i64>>,
    r: &BTreeSet<i64>,
    k: usize,
) -> Vec<BTreeSet<i64>> {
    let mut out = Vec::new();
    let mut current = Vec::new();
    extend_clique(compat, r, k, &mut current, &mut out);
    out
}

fn extend_clique(
    compat: &BTreeMap<i64, BTreeSet<i64>>,
    r: &BTreeSet<i64>,
    k: usize,
    current: &mut Vec<i64>,
    out: &mut Vec<BTreeSet<i64>>,
) {
    if current.len() == k {
        out.push(current.iter().copied().collect());
        return;
    }
    let candidates = match current.last() {
        Some(&last) => r
            .range((std::ops::Bound::Excluded(last), std::ops::Bound::Unbounded))
            .copied()
            .collect::<Vec<_>>(),
        None => r.iter().copied().collect(),
    };
    for v in candidates {
        if current.iter().all(|u| compat[u].contains(&v)) {
            current.push(v);
            extend_clique(compat, r, k, current, out);
            current.pop();
        }
    }
}
