//! Population-based multi-objective search. The three drivers (NSGA-II,
//! NCGA, SPEA2) differ only in how they pick parents and survivors; mating,
//! mutation, evaluation, and the hall of fame live here and are shared by
//! all of them.

mod ncga;
mod nsga2;
mod select;
mod spea2;

pub use ncga::{ncga, SortMethod};
pub use nsga2::nsga2;
pub use spea2::spea2;

use std::collections::BTreeMap;
use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use rustc_hash::{FxHashMap, FxHashSet};

use crate::eval::{Evaluator, Fitness};
use crate::model::VNodeId;
use crate::network::NodeId;
use crate::ops;
use crate::unit::AllocatorUnit;

/// One candidate solution with its objective vector and the bookkeeping the
/// selection schemes hang off it.
#[derive(Debug, Clone)]
pub struct Individual {
    pub unit: AllocatorUnit,
    pub fitness: Fitness,
    pub(crate) rank: usize,
    pub(crate) crowding: f64,
}

impl Individual {
    pub(crate) fn new(unit: AllocatorUnit) -> Self {
        let fitness = Evaluator::evaluate(&unit);
        Self {
            unit,
            fitness,
            rank: 0,
            crowding: 0.0,
        }
    }
}

/// Options shared by the population drivers.
#[derive(Debug, Clone, typed_builder::TypedBuilder)]
pub struct GaOpts {
    /// Wall-clock budget, checked between generations.
    pub budget: Duration,
    /// RNG seed for every random choice made by the driver.
    #[builder(default)]
    pub seed: u64,
    /// Population/archive size.
    #[builder(default = 40)]
    pub archive_size: usize,
    /// Offspring per generation. NSGA-II's tournament wants a multiple of 4;
    /// the others only need it even.
    #[builder(default = 40)]
    pub offspring_size: usize,
    /// Probability that a parent pair actually mates (else it is copied).
    #[builder(default = 1.0)]
    pub mate_pb: f64,
    /// Per-individual probability of a `node_swap` mutation.
    #[builder(default = 0.5)]
    pub mutation_pb: f64,
}

/// A Pareto-front archive kept across generations. Two individuals with
/// identical objective vectors count as the same entry, so the front never
/// accumulates duplicates.
#[derive(Debug, Clone, Default)]
pub struct ParetoFront {
    items: Vec<Individual>,
}

impl ParetoFront {
    pub fn update(&mut self, pop: &[Individual]) {
        for ind in pop {
            let beaten = self
                .items
                .iter()
                .any(|m| m.fitness.dominates(&ind.fitness) || m.fitness == ind.fitness);
            if beaten {
                continue;
            }
            self.items.retain(|m| !ind.fitness.dominates(&m.fitness));
            self.items.push(ind.clone());
        }
    }

    pub fn items(&self) -> &[Individual] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Individual> {
        self.items.iter()
    }
}

/// Builds `n` constructive-heuristic individuals in parallel, each from its
/// own deterministic sub-seed, and evaluates them.
pub(crate) fn seed_population(
    base: &AllocatorUnit,
    n: usize,
    rng: &mut StdRng,
) -> Vec<Individual> {
    let seeds = (0..n).map(|_| rng.gen::<u64>()).collect::<Vec<_>>();
    seeds
        .into_par_iter()
        .map(|seed| {
            let mut sub = StdRng::seed_from_u64(seed);
            Individual::new(ops::initialize_by_assist(base, &mut sub))
        })
        .collect()
}

/// Evaluates freshly built units in parallel.
pub(crate) fn evaluate_all(units: Vec<AllocatorUnit>) -> Vec<Individual> {
    units.into_par_iter().map(Individual::new).collect()
}

/// Uniform masked crossover. One random bit per allocating vNode (over the
/// sorted ID list) decides which parent each child inherits that vNode's
/// board from; the second child uses the complementary mask. Before a child
/// is built, its projected assignment is scanned for board collisions and
/// one colliding bit per clash, chosen uniformly, is degraded to "inherit
/// nothing". Whatever ends up unset is repaired at random.
pub(crate) fn uniform_masked_crossover(
    p0: &AllocatorUnit,
    p1: &AllocatorUnit,
    rng: &mut StdRng,
) -> (AllocatorUnit, AllocatorUnit) {
    let ids = p0.allocating_vnode_ids();
    let mask = ids.iter().map(|_| rng.gen::<bool>()).collect::<Vec<_>>();
    let c0 = build_child(p0, p1, &ids, &mask, false, rng);
    let c1 = build_child(p0, p1, &ids, &mask, true, rng);
    (c0, c1)
}

fn build_child(
    p0: &AllocatorUnit,
    p1: &AllocatorUnit,
    ids: &[VNodeId],
    mask: &[bool],
    invert: bool,
    rng: &mut StdRng,
) -> AllocatorUnit {
    let parent = |s: usize| if s == 0 { p0 } else { p1 };
    let mut source = mask
        .iter()
        .map(|&bit| Some((bit ^ invert) as usize))
        .collect::<Vec<Option<usize>>>();

    // Collision scan over the projected assignment. Each parent is injective
    // on its own, so a board can be claimed at most once per side.
    let mut claims: BTreeMap<NodeId, Vec<usize>> = BTreeMap::new();
    for (i, &id) in ids.iter().enumerate() {
        if let Some(s) = source[i] {
            if let Some(board) = parent(s).vnode(id).unwrap().rnode {
                claims.entry(board).or_default().push(i);
            }
        }
    }
    for (_, mut idxs) in claims {
        while idxs.len() > 1 {
            let drop = rng.gen_range(0..idxs.len());
            source[idxs[drop]] = None;
            idxs.remove(drop);
        }
    }

    let mut child = p0.clone();
    for &id in ids {
        if child.vnode(id).unwrap().rnode.is_some() {
            child.node_deallocation(id, true).expect("crossover");
        }
    }
    for (i, &id) in ids.iter().enumerate() {
        if let Some(s) = source[i] {
            if let Some(board) = parent(s).vnode(id).unwrap().rnode {
                child
                    .node_allocation(id, board, false, rng)
                    .expect("collision-free by construction");
            }
        }
    }

    // A pair's route travels with its endpoints when both came from the same
    // parent; anything else is re-routed below.
    let index_of = ids
        .iter()
        .enumerate()
        .map(|(i, &id)| (id, i))
        .collect::<FxHashMap<_, _>>();
    for pid in child.allocating_pair_ids() {
        let (src, dst) = {
            let pair = child.pair(pid).unwrap();
            (pair.src, pair.dst)
        };
        let (Some(&si), Some(&di)) = (index_of.get(&src), index_of.get(&dst)) else {
            continue;
        };
        if let (Some(s), Some(d)) = (source[si], source[di]) {
            if s == d {
                if let Some(path) = parent(s).pair(pid).unwrap().path.clone() {
                    child.pair_allocation(pid, path).expect("crossover");
                }
            }
        }
    }

    for &id in ids {
        if child.vnode(id).unwrap().rnode.is_none() {
            child
                .random_node_allocation(id, false, rng)
                .expect("crossover repair");
        }
    }
    for pid in child.allocating_pair_ids() {
        if child.pair(pid).unwrap().path.is_none() {
            child
                .random_pair_allocation(pid, rng)
                .expect("crossover repair");
        }
    }
    child.greedy_slot_allocation();
    child
}

/// `node_swap` with probability `pb`, identity otherwise.
pub(crate) fn mutate(unit: &AllocatorUnit, pb: f64, rng: &mut StdRng) -> AllocatorUnit {
    if rng.gen_bool(pb) {
        ops::node_swap(unit, rng)
    } else {
        unit.clone()
    }
}

/// Drops individuals whose allocation state hashes identically to an earlier
/// one.
pub(crate) fn dedup_by_hash(pop: Vec<Individual>) -> Vec<Individual> {
    let mut seen = FxHashSet::default();
    pop.into_iter()
        .filter(|ind| seen.insert(ind.unit.structural_hash()))
        .collect()
}

/// Mates adjacent parent pairs, each pair with probability `mate_pb`, and
/// mutates the children. Returns the raw child units, two per pair.
pub(crate) fn mate_and_mutate(
    parents: &[Individual],
    opts: &GaOpts,
    rng: &mut StdRng,
) -> Vec<AllocatorUnit> {
    let mut children = Vec::with_capacity(parents.len());
    for pair in parents.chunks(2) {
        if pair.len() < 2 {
            break;
        }
        if rng.gen_bool(opts.mate_pb) {
            let (c0, c1) = uniform_masked_crossover(&pair[0].unit, &pair[1].unit, rng);
            children.push(c0);
            children.push(c1);
        } else {
            children.push(pair[0].unit.clone());
            children.push(pair[1].unit.clone());
        }
    }
    children
        .iter()
        .map(|unit| mutate(unit, opts.mutation_pb, rng))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::IdGen;
    use crate::testing;

    fn parents() -> (AllocatorUnit, AllocatorUnit) {
        let mut unit = testing::ring_unit(8, false);
        let mut ids = IdGen::new();
        assert!(unit.add_app(testing::fully_connected_app(4, &mut ids)));
        let mut rng = StdRng::seed_from_u64(0);
        let p0 = ops::initialize_by_assist(&unit, &mut rng);
        let p1 = ops::initialize_by_assist(&unit, &mut rng);
        (p0, p1)
    }

    #[test]
    fn crossover_children_are_complete_and_consistent() {
        let (p0, p1) = parents();
        let mut rng = StdRng::seed_from_u64(42);
        let (c0, c1) = uniform_masked_crossover(&p0, &p1, &mut rng);
        for child in [&c0, &c1] {
            assert!(child.vnodes().all(|v| v.rnode.is_some()));
            assert!(child.pairs().all(|p| p.path.is_some()));
            child.consistency_checker().unwrap();
        }
    }

    #[test]
    fn self_crossover_reproduces_the_parent_placement() {
        // Both parents identical: every bit inherits the same board, there
        // are no collisions, and no vNode needs repair.
        let (p0, _) = parents();
        let mut rng = StdRng::seed_from_u64(3);
        let (c0, c1) = uniform_masked_crossover(&p0, &p0, &mut rng);
        for child in [&c0, &c1] {
            for id in child.allocating_vnode_ids() {
                assert_eq!(
                    child.vnode(id).unwrap().rnode,
                    p0.vnode(id).unwrap().rnode
                );
            }
        }
    }

    #[test]
    fn crossover_leaves_parents_untouched() {
        let (p0, p1) = parents();
        let (s0, s1) = (p0.clone(), p1.clone());
        let mut rng = StdRng::seed_from_u64(8);
        let _ = uniform_masked_crossover(&p0, &p1, &mut rng);
        assert_eq!(p0, s0);
        assert_eq!(p1, s1);
    }

    #[test]
    fn pareto_front_rejects_dominated_and_duplicate_entries() {
        let (p0, _) = parents();
        let make = |fitness: [u64; 3]| Individual {
            unit: p0.clone(),
            fitness: Fitness(fitness),
            rank: 0,
            crowding: 0.0,
        };
        let mut front = ParetoFront::default();
        front.update(&[make([3, 10, 5])]);
        front.update(&[make([3, 10, 5])]); // duplicate
        assert_eq!(front.len(), 1);
        front.update(&[make([2, 11, 5])]); // incomparable
        assert_eq!(front.len(), 2);
        front.update(&[make([2, 10, 5])]); // dominates both members
        assert_eq!(front.len(), 1);
        assert_eq!(front.items()[0].fitness, Fitness([2, 10, 5]));
    }

    #[test]
    fn dedup_keeps_the_first_of_equal_states() {
        let (p0, p1) = parents();
        let pop = vec![
            Individual::new(p0.clone()),
            Individual::new(p0),
            Individual::new(p1),
        ];
        assert_eq!(dedup_by_hash(pop).len(), 2);
    }
}
