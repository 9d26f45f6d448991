//! End-to-end scenarios exercising the public API only, with every random
//! choice seeded to zero.

use std::collections::BTreeMap;
use std::time::Duration;

use boardalloc_core::alns::{alns, SearchOpts};
use boardalloc_core::conflict;
use boardalloc_core::ga::{nsga2, GaOpts};
use boardalloc_core::ops;
use boardalloc_core::testing;
use boardalloc_core::{FlowGraph, IdGen};

use rand::rngs::StdRng;
use rand::SeedableRng;

fn one_second() -> SearchOpts {
    SearchOpts::builder()
        .budget(Duration::from_secs(1))
        .seed(0)
        .build()
}

#[test]
fn ring_with_one_pair_settles_into_one_slot() {
    let mut unit = testing::ring_unit(4, false);
    let mut ids = IdGen::new();
    assert!(unit.add_app(testing::single_pair_app(&mut ids)));
    let best = alns(&unit, &one_second());
    assert_eq!(best.max_slot_num(), 1);
    // Best placement puts the endpoints on neighboring boards: injection
    // hop, one inter-switch hop, ejection hop.
    assert_eq!(best.total_flow_edges(), 3);
}

#[test]
fn multi_ejection_shortens_the_single_pair_route() {
    let mut unit = testing::ring_unit(4, true);
    let mut ids = IdGen::new();
    assert!(unit.add_app(testing::single_pair_app(&mut ids)));
    let best = alns(&unit, &one_second());
    assert_eq!(best.max_slot_num(), 1);
    // The ejection hop is elided.
    assert_eq!(best.total_flow_edges(), 2);
}

#[test]
fn greedy_slots_are_independent_sets_of_the_conflict_graph() {
    let mut unit = testing::ring_unit(4, false);
    let mut ids = IdGen::new();
    assert!(unit.add_app(testing::fully_connected_app(4, &mut ids)));
    let mut rng = StdRng::seed_from_u64(0);
    let unit = ops::generate_initial_solution(&unit, &mut rng);

    let mut by_cvid: BTreeMap<i64, FlowGraph> = BTreeMap::new();
    let mut slot_of: BTreeMap<i64, usize> = BTreeMap::new();
    for flow in unit.flows() {
        by_cvid.insert(flow.cvid(), unit.flow_graph(flow.id));
        slot_of.insert(flow.cvid(), flow.slot.expect("flow left unslotted"));
    }
    for (a, b) in conflict::crossing_flows(&by_cvid) {
        assert_ne!(
            slot_of[&a], slot_of[&b],
            "flows {a} and {b} share an edge but also slot {}",
            slot_of[&a]
        );
    }
}

#[test]
fn adding_the_same_app_twice_fails_without_mutation() {
    let mut unit = testing::ring_unit(4, false);
    let mut ids = IdGen::new();
    let bundle = testing::fully_connected_app(4, &mut ids);
    assert!(unit.add_app(bundle.clone()));
    let before = unit.clone();
    assert!(!unit.add_app(bundle));
    assert_eq!(unit, before);
}

#[test]
fn apply_freezes_the_allocation_against_operators() {
    let mut unit = testing::ring_unit(4, false);
    let mut ids = IdGen::new();
    assert!(unit.add_app(testing::single_pair_app(&mut ids)));
    let mut rng = StdRng::seed_from_u64(0);
    let mut unit = ops::generate_initial_solution(&unit, &mut rng);
    unit.apply();
    assert_eq!(unit.nr_allocating_vnodes(), 0);

    // Operators only act on allocating items, so everything is a no-op.
    let swapped = ops::node_swap(&unit, &mut rng);
    assert_eq!(swapped, unit);
    let repaired = ops::break_and_repair(&unit, 2, ops::Target::Node, &mut rng);
    assert_eq!(repaired, unit);
    let ripped = ops::break_and_repair2(&unit, &mut rng);
    assert_eq!(ripped, unit);
}

#[test]
fn frozen_slots_survive_a_second_app_and_search() {
    let mut unit = testing::ring_unit(8, false);
    let mut ids = IdGen::new();
    assert!(unit.add_app(testing::fully_connected_app(3, &mut ids)));
    let mut rng = StdRng::seed_from_u64(0);
    let mut unit = ops::generate_initial_solution(&unit, &mut rng);
    unit.apply();
    let frozen_slots = unit
        .flows()
        .map(|f| (f.id, f.slot.unwrap()))
        .collect::<BTreeMap<_, _>>();

    assert!(unit.add_app(testing::fully_connected_app(3, &mut ids)));
    let best = alns(&unit, &one_second());
    for (fid, slot) in frozen_slots {
        assert_eq!(best.flow(fid).unwrap().slot, Some(slot));
    }
    best.consistency_checker().unwrap();
}

#[test]
fn nsga2_on_a_mesh_with_fft_traffic_meets_the_slot_budget() {
    let mut unit = testing::mesh_unit(4, 4);
    let mut ids = IdGen::new();
    assert!(unit.add_app(testing::fft_app(16, &mut ids)));
    let opts = GaOpts::builder()
        .budget(Duration::from_secs(5))
        .seed(0)
        .archive_size(16)
        .offspring_size(16)
        .build();
    let front = nsga2(&unit, &opts);
    assert!(!front.is_empty());
    let best_slots = front
        .iter()
        .map(|ind| ind.fitness.values()[0])
        .min()
        .unwrap();
    assert!(best_slots <= 16, "front never got below {best_slots} slots");
}

#[test]
fn exact_cover_is_a_lower_bound_on_greedy() {
    let mut unit = testing::ring_unit(4, false);
    let mut ids = IdGen::new();
    assert!(unit.add_app(testing::fully_connected_app(4, &mut ids)));
    let mut rng = StdRng::seed_from_u64(0);
    let unit = ops::generate_initial_solution(&unit, &mut rng);
    let exact = unit.optimal_slot_num();
    assert!(exact <= unit.max_slot_num());
    assert!(exact <= unit.flows().count());
}
