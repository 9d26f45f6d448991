//! Single-trajectory time-bounded searches. All of them keep a best-so-far
//! copy under a lexicographic objective and only ever accept strict
//! improvements, so acceptance is deterministic given the visit sequence.

use std::time::{Duration, Instant};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::conflict;
use crate::ops;
use crate::unit::AllocatorUnit;

/// Options shared by the single-trajectory drivers.
#[derive(Debug, Clone, typed_builder::TypedBuilder)]
pub struct SearchOpts {
    /// Wall-clock budget. Checked between iterations; the loop never aborts
    /// an operator midway.
    pub budget: Duration,
    /// RNG seed, threaded through every random choice.
    #[builder(default)]
    pub seed: u64,
}

/// Adaptive large-neighborhood search. Starts from a random full allocation,
/// then alternates between single-flow rip-ups (favored early) and small
/// node-level break-and-repair moves, keeping the lexicographically best
/// `(max_slot_num, total_flow_edges)` seen.
pub fn alns(unit: &AllocatorUnit, opts: &SearchOpts) -> AllocatorUnit {
    let mut rng = StdRng::seed_from_u64(opts.seed);
    let start = Instant::now();

    let mut best = ops::generate_initial_solution(unit, &mut rng);
    let nr_vnodes = best.nr_allocating_vnodes();
    if nr_vnodes == 0 || opts.budget.is_zero() {
        return best;
    }
    let p_range = nr_vnodes.min(2) + 1;
    let mut best_slots = best.max_slot_num();
    let mut best_edges = best.total_flow_edges();
    tracing::info!(slots = best_slots, edges = best_edges, "initial solution");

    let mut loops = 0u64;
    while start.elapsed() < opts.budget {
        loops += 1;
        let flow_rip_pb =
            (1.0 - start.elapsed().as_secs_f64() / opts.budget.as_secs_f64()).clamp(0.0, 1.0);
        let candidate = if rng.gen_bool(flow_rip_pb) {
            ops::break_and_repair2(&best, &mut rng)
        } else {
            let k = rng.gen_range(1..p_range);
            ops::break_and_repair(&best, k, ops::Target::Node, &mut rng)
        };

        let slots = candidate.max_slot_num();
        let edges = candidate.total_flow_edges();
        if slots < best_slots || (slots == best_slots && edges < best_edges) {
            tracing::info!(
                loops,
                slots_from = best_slots,
                slots_to = slots,
                edges_from = best_edges,
                edges_to = edges,
                "accepted improving move"
            );
            best = candidate;
            best_slots = slots;
            best_edges = edges;
        }
    }
    tracing::debug!(loops, slots = best_slots, edges = best_edges, "search finished");
    best
}

/// Hill climber over single `node_swap` moves, with the same acceptance rule
/// as [`alns`].
pub fn two_opt(unit: &AllocatorUnit, opts: &SearchOpts) -> AllocatorUnit {
    let mut rng = StdRng::seed_from_u64(opts.seed);
    let start = Instant::now();

    let mut best = ops::generate_initial_solution(unit, &mut rng);
    if best.nr_allocating_vnodes() == 0 || opts.budget.is_zero() {
        return best;
    }
    let mut best_slots = best.max_slot_num();
    let mut best_edges = best.total_flow_edges();
    tracing::info!(slots = best_slots, edges = best_edges, "initial solution");

    let mut loops = 0u64;
    while start.elapsed() < opts.budget {
        loops += 1;
        let candidate = ops::node_swap(&best, &mut rng);
        let slots = candidate.max_slot_num();
        let edges = candidate.total_flow_edges();
        if slots < best_slots || (slots == best_slots && edges < best_edges) {
            tracing::info!(
                loops,
                slots_from = best_slots,
                slots_to = slots,
                edges_from = best_edges,
                edges_to = edges,
                "accepted improving swap"
            );
            best = candidate;
            best_slots = slots;
            best_edges = edges;
        }
    }
    tracing::debug!(loops, slots = best_slots, edges = best_edges, "search finished");
    best
}

/// Clique-guided descent: repeatedly rips up one maximal clique of the
/// flow-conflict graph and re-routes it with the assist rule. Acceptance is
/// lexicographic over (slots, largest clique size, number of largest
/// cliques, flow edges), which keeps pressure on the conflict structure even
/// while the slot count is stuck.
pub fn clique_search(unit: &AllocatorUnit, opts: &SearchOpts) -> AllocatorUnit {
    let mut rng = StdRng::seed_from_u64(opts.seed);
    let start = Instant::now();

    let untouched = unit
        .allocating_pair_ids()
        .iter()
        .all(|&p| unit.pair(p).unwrap().path.is_none())
        && unit
            .allocating_vnode_ids()
            .iter()
            .all(|&v| unit.vnode(v).unwrap().rnode.is_none());
    let mut best = if untouched {
        ops::initialize_by_assist(unit, &mut rng)
    } else {
        let mut copy = unit.clone();
        copy.greedy_slot_allocation();
        copy
    };
    if best.nr_allocating_vnodes() == 0 || opts.budget.is_zero() {
        return best;
    }
    let mut best_score = clique_score(&best);
    tracing::info!(
        slots = best_score.0,
        clique = best_score.1,
        nr_cliques = best_score.2,
        edges = best_score.3,
        "initial solution"
    );

    let mut loops = 0u64;
    while start.elapsed() < opts.budget {
        loops += 1;
        let candidate = ops::break_a_maximal_clique_and_repair(&best, &mut rng);
        let score = clique_score(&candidate);
        if score < best_score {
            tracing::info!(
                loops,
                slots = score.0,
                clique = score.1,
                nr_cliques = score.2,
                edges = score.3,
                "accepted improving move"
            );
            best = candidate;
            best_score = score;
        }
    }
    tracing::debug!(loops, slots = best_score.0, "search finished");
    best
}

/// (slots, max clique size, number of maximum cliques, total flow edges).
fn clique_score(unit: &AllocatorUnit) -> (usize, usize, usize, usize) {
    let flows = unit.coloring_flows();
    let adj = conflict::conflict_adjacency(&flows);
    let cliques = conflict::maximal_cliques(&adj);
    let largest = cliques.iter().map(|c| c.len()).max().unwrap_or(0);
    let nr_largest = cliques.iter().filter(|c| c.len() == largest).count();
    (
        unit.max_slot_num(),
        largest,
        nr_largest,
        unit.total_flow_edges(),
    )
}
