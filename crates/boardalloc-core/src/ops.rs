//! The neighborhood operator library. Every operator is functional: it takes
//! an allocator by reference, structurally copies it, mutates the copy
//! through the primitives, re-runs greedy slot allocation, and returns the
//! copy. Inputs are never modified, and an operator whose domain is empty
//! returns the copy unchanged instead of failing.

use rand::seq::SliceRandom;
use rand::Rng;

use crate::conflict;
use crate::model::{FlowGraph, FlowId, PairId};
use crate::network::Path;
use crate::unit::AllocatorUnit;

/// What `break_and_repair` rips up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    Node,
    Pair,
}

/// Random board for every unplaced vNode, random route for every unrouted
/// pair.
pub fn generate_initial_solution<R: Rng + ?Sized>(
    unit: &AllocatorUnit,
    rng: &mut R,
) -> AllocatorUnit {
    let mut next = unit.clone();
    for id in next.allocating_vnode_ids() {
        if next.vnode(id).unwrap().rnode.is_none() {
            next.random_node_allocation(id, true, rng)
                .expect("initial board allocation failed");
        }
    }
    for pid in next.allocating_pair_ids() {
        if next.pair(pid).unwrap().path.is_none() {
            next.random_pair_allocation(pid, rng)
                .expect("initial pair allocation failed");
        }
    }
    next.greedy_slot_allocation();
    next
}

/// Constructive heuristic: random boards, then routes chosen one pair at a
/// time in order of non-decreasing shortest-path length, scoring each
/// candidate by (new conflicts, flow-graph edges) and breaking ties at
/// random.
pub fn initialize_by_assist<R: Rng + ?Sized>(unit: &AllocatorUnit, rng: &mut R) -> AllocatorUnit {
    let mut next = unit.clone();
    for id in next.allocating_vnode_ids() {
        if next.vnode(id).unwrap().rnode.is_none() {
            next.random_node_allocation(id, false, rng)
                .expect("initial board allocation failed");
        }
    }
    let todo = next
        .allocating_pair_ids()
        .into_iter()
        .filter(|&pid| next.pair(pid).unwrap().path.is_none())
        .collect::<Vec<_>>();
    route_pairs_by_assist(&mut next, todo, rng);
    next.greedy_slot_allocation();
    next
}

/// Routes `todo` in ascending minimum-hop order. For each pair, every
/// candidate path is provisionally merged into its flow's graph and scored
/// lexicographically by (number of other flows the graph then crosses, total
/// edges of the graph); ties are broken uniformly at random.
fn route_pairs_by_assist<R: Rng + ?Sized>(
    unit: &mut AllocatorUnit,
    mut todo: Vec<PairId>,
    rng: &mut R,
) {
    let placement = |unit: &AllocatorUnit, pid: PairId| {
        let pair = unit.pair(pid).unwrap();
        let src = unit.vnode(pair.src).unwrap().rnode.expect("unplaced src");
        let dst = unit.vnode(pair.dst).unwrap().rnode.expect("unplaced dst");
        (src, dst)
    };
    todo.sort_by_key(|&pid| {
        let (src, dst) = placement(unit, pid);
        (unit.fabric().paths().min_hops(src, dst), pid)
    });

    for pid in todo {
        let (src, dst) = placement(unit, pid);
        let flow_id = unit.pair(pid).unwrap().flow;
        let cvid = unit.flow(flow_id).unwrap().cvid();
        let mut others = unit.coloring_flows();
        others.remove(&cvid);
        let flow = unit.flow(flow_id).unwrap();
        let base = FlowGraph::from_paths(
            flow.pairs
                .iter()
                .filter(|&&p| p != pid)
                .filter_map(|p| unit.pair(*p).unwrap().path.as_ref()),
        );

        let scored = unit
            .fabric()
            .paths()
            .paths(src, dst)
            .iter()
            .map(|path| {
                let mut graph = base.clone();
                graph.add_path(path);
                let crossings = others.values().filter(|g| g.intersects(&graph)).count();
                ((crossings, graph.nr_edges()), path)
            })
            .collect::<Vec<_>>();
        let best = scored
            .iter()
            .map(|&(score, _)| score)
            .min()
            .expect("no candidate path");
        let ties = scored
            .into_iter()
            .filter(|&(score, _)| score == best)
            .map(|(_, path)| path)
            .collect::<Vec<_>>();
        let path: Path = (*ties.choose(rng).unwrap()).clone();
        unit.pair_allocation(pid, path)
            .expect("assist routing failed");
    }
}

/// Moves one allocating vNode to a board drawn from the empty boards plus
/// the boards of other allocating vNodes; an occupied target swaps the two.
pub fn node_swap<R: Rng + ?Sized>(unit: &AllocatorUnit, rng: &mut R) -> AllocatorUnit {
    let mut next = unit.clone();
    let candidates = next
        .allocating_vnode_ids()
        .into_iter()
        .filter(|&id| next.vnode(id).unwrap().rnode.is_some())
        .collect::<Vec<_>>();
    let Some(&a) = candidates.choose(rng) else {
        return next;
    };
    let a_board = next.vnode(a).unwrap().rnode.unwrap();

    let pool = next
        .empty_rnodes()
        .into_iter()
        .chain(next.temp_allocated_rnodes().into_keys())
        .collect::<std::collections::BTreeSet<_>>()
        .into_iter()
        .collect::<Vec<_>>();
    let &target = pool.choose(rng).expect("target pool cannot be empty");
    if target == a_board {
        next.greedy_slot_allocation();
        return next;
    }

    match next.temp_allocated_rnodes().get(&target).copied() {
        Some(b) => {
            next.node_deallocation(a, true).expect("node_swap");
            next.node_deallocation(b, true).expect("node_swap");
            next.node_allocation(b, a_board, true, rng).expect("node_swap");
            next.node_allocation(a, target, true, rng).expect("node_swap");
        }
        None => {
            next.node_deallocation(a, true).expect("node_swap");
            next.node_allocation(a, target, true, rng).expect("node_swap");
        }
    }
    next.greedy_slot_allocation();
    next
}

/// Rips up `k` allocating items chosen uniformly without replacement and
/// reallocates each of them at random.
pub fn break_and_repair<R: Rng + ?Sized>(
    unit: &AllocatorUnit,
    k: usize,
    target: Target,
    rng: &mut R,
) -> AllocatorUnit {
    let mut next = unit.clone();
    if k == 0 {
        return next;
    }
    match target {
        Target::Node => {
            let ids = next
                .allocating_vnode_ids()
                .into_iter()
                .filter(|&id| next.vnode(id).unwrap().rnode.is_some())
                .collect::<Vec<_>>();
            if ids.is_empty() {
                return next;
            }
            let chosen = ids
                .choose_multiple(rng, k.min(ids.len()))
                .copied()
                .collect::<Vec<_>>();
            for &id in &chosen {
                next.node_deallocation(id, true).expect("break_and_repair");
            }
            for &id in &chosen {
                next.random_node_allocation(id, true, rng)
                    .expect("break_and_repair");
            }
            repair_unrouted_pairs(&mut next, rng);
        }
        Target::Pair => {
            let ids = next
                .allocating_pair_ids()
                .into_iter()
                .filter(|&pid| {
                    let pair = next.pair(pid).unwrap();
                    next.vnode(pair.src).unwrap().rnode.is_some()
                        && next.vnode(pair.dst).unwrap().rnode.is_some()
                })
                .collect::<Vec<_>>();
            if ids.is_empty() {
                return next;
            }
            let chosen = ids
                .choose_multiple(rng, k.min(ids.len()))
                .copied()
                .collect::<Vec<_>>();
            for &pid in &chosen {
                next.pair_deallocation(pid).expect("break_and_repair");
                next.random_pair_allocation(pid, rng)
                    .expect("break_and_repair");
            }
        }
    }
    next.greedy_slot_allocation();
    next
}

/// Single-flow rip-up: deallocates every route of one allocating flow chosen
/// uniformly, then re-routes them at random.
pub fn break_and_repair2<R: Rng + ?Sized>(unit: &AllocatorUnit, rng: &mut R) -> AllocatorUnit {
    let mut next = unit.clone();
    let flows = next
        .allocating_flow_ids()
        .into_iter()
        .filter(|&fid| {
            next.flow(fid).unwrap().pairs.iter().any(|pid| {
                let pair = next.pair(*pid).unwrap();
                pair.allocating && pair.path.is_some()
            })
        })
        .collect::<Vec<_>>();
    let Some(&fid) = flows.choose(rng) else {
        return next;
    };
    let ripped = next
        .flow(fid)
        .unwrap()
        .pairs
        .iter()
        .copied()
        .filter(|&pid| {
            let pair = next.pair(pid).unwrap();
            pair.allocating && pair.path.is_some()
        })
        .collect::<Vec<_>>();
    for &pid in &ripped {
        next.pair_deallocation(pid).expect("break_and_repair2");
        next.random_pair_allocation(pid, rng)
            .expect("break_and_repair2");
    }
    next.greedy_slot_allocation();
    next
}

/// Picks one maximal clique (size >= 2) of the flow-conflict graph uniformly,
/// rips up every movable route of its flows, and re-routes them with the
/// assist scoring rule.
pub fn break_a_maximal_clique_and_repair<R: Rng + ?Sized>(
    unit: &AllocatorUnit,
    rng: &mut R,
) -> AllocatorUnit {
    let mut next = unit.clone();
    let flows = next.coloring_flows();
    let adj = conflict::conflict_adjacency(&flows);
    let cliques = conflict::maximal_cliques(&adj)
        .into_iter()
        .filter(|c| c.len() >= 2)
        .collect::<Vec<_>>();
    let Some(clique) = cliques.choose(rng) else {
        return next;
    };

    let mut ripped = Vec::new();
    for &cvid in clique {
        if cvid < 0 {
            // A fixed slot's routes are frozen.
            continue;
        }
        let fid = FlowId::new(cvid as usize);
        for pid in next.flow(fid).unwrap().pairs.clone() {
            let pair = next.pair(pid).unwrap();
            if pair.allocating && pair.path.is_some() {
                next.pair_deallocation(pid).expect("clique break");
                ripped.push(pid);
            }
        }
    }
    route_pairs_by_assist(&mut next, ripped, rng);
    next.greedy_slot_allocation();
    next
}

fn repair_unrouted_pairs<R: Rng + ?Sized>(unit: &mut AllocatorUnit, rng: &mut R) {
    for pid in unit.allocating_pair_ids() {
        let pair = unit.pair(pid).unwrap();
        if pair.path.is_none()
            && unit.vnode(pair.src).unwrap().rnode.is_some()
            && unit.vnode(pair.dst).unwrap().rnode.is_some()
        {
            unit.random_pair_allocation(pid, rng)
                .expect("pair repair failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    use super::*;
    use crate::model::IdGen;
    use crate::testing;

    fn allocated_unit() -> AllocatorUnit {
        let mut unit = testing::ring_unit(8, false);
        let mut ids = IdGen::new();
        assert!(unit.add_app(testing::fully_connected_app(4, &mut ids)));
        let mut rng = StdRng::seed_from_u64(0);
        generate_initial_solution(&unit, &mut rng)
    }

    #[test]
    fn initial_solution_places_and_routes_everything() {
        let unit = allocated_unit();
        assert!(unit.vnodes().all(|v| v.rnode.is_some()));
        assert!(unit.pairs().all(|p| p.path.is_some()));
        assert!(unit.flows().all(|f| f.slot.is_some()));
        unit.consistency_checker().unwrap();
    }

    #[test]
    fn operators_do_not_mutate_their_input() {
        let unit = allocated_unit();
        let before = unit.clone();
        let mut rng = StdRng::seed_from_u64(1);
        let _ = node_swap(&unit, &mut rng);
        let _ = break_and_repair(&unit, 2, Target::Node, &mut rng);
        let _ = break_and_repair(&unit, 3, Target::Pair, &mut rng);
        let _ = break_and_repair2(&unit, &mut rng);
        let _ = break_a_maximal_clique_and_repair(&unit, &mut rng);
        assert_eq!(unit, before);
    }

    #[test]
    fn initialize_by_assist_yields_a_consistent_full_allocation() {
        let mut unit = testing::ring_unit(8, false);
        let mut ids = IdGen::new();
        assert!(unit.add_app(testing::fully_connected_app(4, &mut ids)));
        let mut rng = StdRng::seed_from_u64(0);
        let built = initialize_by_assist(&unit, &mut rng);
        assert!(built.pairs().all(|p| p.path.is_some()));
        assert!(built.flows().all(|f| f.slot.is_some()));
        built.consistency_checker().unwrap();
    }

    #[test]
    fn node_swap_preserves_the_board_multiset() {
        let unit = allocated_unit();
        let mut rng = StdRng::seed_from_u64(7);
        let swapped = node_swap(&unit, &mut rng);
        assert_eq!(
            unit.temp_allocated_rnodes().len(),
            swapped.temp_allocated_rnodes().len()
        );
        swapped.consistency_checker().unwrap();
    }

    #[test]
    fn node_swap_with_nothing_allocated_is_a_no_op() {
        let unit = testing::ring_unit(4, false);
        let mut rng = StdRng::seed_from_u64(0);
        let out = node_swap(&unit, &mut rng);
        assert_eq!(out, unit);
    }

    #[test]
    fn break_and_repair_keeps_the_allocation_complete() {
        let unit = allocated_unit();
        let mut rng = StdRng::seed_from_u64(3);
        for k in [1, 2, 4] {
            let repaired = break_and_repair(&unit, k, Target::Node, &mut rng);
            assert_eq!(
                repaired.nr_allocating_vnodes(),
                unit.nr_allocating_vnodes()
            );
            assert!(repaired.vnodes().all(|v| v.rnode.is_some()));
            assert!(repaired.pairs().all(|p| p.path.is_some()));
            repaired.consistency_checker().unwrap();
        }
    }

    #[test]
    fn break_and_repair_of_zero_items_is_a_no_op() {
        let unit = allocated_unit();
        let mut rng = StdRng::seed_from_u64(3);
        let out = break_and_repair(&unit, 0, Target::Node, &mut rng);
        assert_eq!(out, unit);
    }

    #[test]
    fn break_and_repair_pairs_only_moves_routes() {
        let unit = allocated_unit();
        let placement = unit.temp_allocated_rnodes();
        let mut rng = StdRng::seed_from_u64(9);
        let repaired = break_and_repair(&unit, 5, Target::Pair, &mut rng);
        assert_eq!(repaired.temp_allocated_rnodes(), placement);
        assert!(repaired.pairs().all(|p| p.path.is_some()));
        repaired.consistency_checker().unwrap();
    }

    #[test]
    fn clique_break_reroutes_without_losing_pairs() {
        let unit = allocated_unit();
        let mut rng = StdRng::seed_from_u64(5);
        let repaired = break_a_maximal_clique_and_repair(&unit, &mut rng);
        assert_eq!(
            repaired.pairs().filter(|p| p.path.is_some()).count(),
            unit.pairs().filter(|p| p.path.is_some()).count()
        );
        repaired.consistency_checker().unwrap();
    }
}
