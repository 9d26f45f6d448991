//! The neighborhood-cultivation driver: parents are sorted by one objective
//! (rotating or random) and mated with their neighbors, so recombination
//! happens between individuals that are already close in objective space.

use std::time::Instant;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use super::{evaluate_all, mate_and_mutate, seed_population, select, GaOpts, ParetoFront};
use crate::eval::Evaluator;
use crate::unit::AllocatorUnit;

/// How the mating order rotates through the objectives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortMethod {
    Cyclic,
    Random,
}

/// Sort-then-mate search with SPEA2 survivor selection.
pub fn ncga(unit: &AllocatorUnit, opts: &GaOpts, sort_method: SortMethod) -> ParetoFront {
    let nr_objectives = Evaluator::eval_list().len();
    let mut rng = StdRng::seed_from_u64(opts.seed);
    let start = Instant::now();

    let mut pop = seed_population(unit, opts.archive_size, &mut rng);
    let mut hof = ParetoFront::default();
    hof.update(&pop);

    let mut gen = 0u64;
    while start.elapsed() < opts.budget {
        gen += 1;
        let index = match sort_method {
            SortMethod::Cyclic => (gen as usize - 1) % nr_objectives,
            SortMethod::Random => rng.gen_range(0..nr_objectives),
        };
        let mut parents = pop.clone();
        parents.sort_by_key(|ind| ind.fitness.values()[index]);
        parents.truncate(opts.offspring_size - (opts.offspring_size % 2));

        let children = mate_and_mutate(&parents, opts, &mut rng);
        let offspring = evaluate_all(children);

        let mut merged = pop;
        merged.extend(offspring);
        pop = select::sel_spea2(merged, opts.archive_size);

        hof.update(&pop);
        tracing::debug!(gen, index, front = hof.len(), "generation complete");
    }
    tracing::info!(gen, front = hof.len(), "ncga finished");
    hof
}
