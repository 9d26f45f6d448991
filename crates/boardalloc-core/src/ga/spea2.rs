//! The plain SPEA2 driver.

use std::time::Instant;

use rand::rngs::StdRng;
use rand::seq::{index, SliceRandom};
use rand::SeedableRng;

use super::{evaluate_all, mate_and_mutate, seed_population, select, GaOpts, ParetoFront};
use crate::unit::AllocatorUnit;

/// Strength-Pareto search: parents come from an index tournament over the
/// strength-sorted archive, survivors from SPEA2 environmental selection.
pub fn spea2(unit: &AllocatorUnit, opts: &GaOpts) -> ParetoFront {
    let mut rng = StdRng::seed_from_u64(opts.seed);
    let start = Instant::now();

    let pop = seed_population(unit, opts.archive_size, &mut rng);
    let mut pop = select::sel_spea2(pop, opts.archive_size);
    let mut hof = ParetoFront::default();
    hof.update(&pop);

    let mut gen = 0u64;
    while start.elapsed() < opts.budget {
        gen += 1;

        // The archive is ordered best-first, so the smaller of two random
        // indices is a binary tournament over strength ranks.
        let nr_parents = opts.offspring_size - (opts.offspring_size % 2);
        let parents = (0..nr_parents)
            .map(|_| {
                let picks = index::sample(&mut rng, pop.len(), 2.min(pop.len()));
                let best = picks.iter().min().unwrap();
                pop[best].clone()
            })
            .collect::<Vec<_>>();

        let children = mate_and_mutate(&parents, opts, &mut rng);
        let offspring = evaluate_all(children);

        let mut merged = pop;
        // Ties in the strength ranking would otherwise always resolve in
        // favor of the longest-lived individuals.
        merged.shuffle(&mut rng);
        merged.extend(offspring);
        pop = select::sel_spea2(merged, opts.archive_size);

        hof.update(&pop);
        tracing::debug!(gen, front = hof.len(), "generation complete");
    }
    tracing::info!(gen, front = hof.len(), "spea2 finished");
    hof
}
