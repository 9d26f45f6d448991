//! The NSGA-II driver.

use std::time::Instant;

use rand::rngs::StdRng;
use rand::SeedableRng;

use super::{
    dedup_by_hash, evaluate_all, mate_and_mutate, seed_population, select, GaOpts, ParetoFront,
};
use crate::unit::AllocatorUnit;

/// Non-dominated-sorting genetic search. Seeds the population with the
/// constructive heuristic, then runs tournament selection, uniform masked
/// crossover, swap mutation, and elitist survivor selection until the budget
/// runs out. Returns the Pareto hall of fame.
pub fn nsga2(unit: &AllocatorUnit, opts: &GaOpts) -> ParetoFront {
    let mut rng = StdRng::seed_from_u64(opts.seed);
    let start = Instant::now();

    let pop = seed_population(unit, opts.archive_size, &mut rng);
    let mut pop = select::sel_nsga2(pop, opts.archive_size);
    let mut hof = ParetoFront::default();
    hof.update(&pop);

    let mut gen = 0u64;
    while start.elapsed() < opts.budget {
        gen += 1;

        // Re-rank the whole pool (random injections arrive unranked).
        let pool_size = opts.archive_size.max(pop.len());
        pop = select::sel_nsga2(pop, pool_size);
        let parents = select::tournament_dcd(&pop, opts.offspring_size, &mut rng);
        let children = mate_and_mutate(&parents, opts, &mut rng);
        let offspring = evaluate_all(children);

        let mut merged = pop;
        merged.extend(offspring);
        let merged = dedup_by_hash(merged);
        pop = select::sel_nsga2(merged, opts.archive_size);

        // Fresh blood: up to 20 random individuals, plus however many the
        // dedup step cost the archive.
        let deficit = opts.archive_size.saturating_sub(pop.len());
        let nr_random = 20.min(opts.archive_size) + deficit;
        pop.extend(seed_population(unit, nr_random, &mut rng));

        hof.update(&pop);
        tracing::debug!(gen, pop = pop.len(), front = hof.len(), "generation complete");
    }
    tracing::info!(gen, front = hof.len(), "nsga2 finished");
    hof
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::model::IdGen;
    use crate::testing;

    #[test]
    fn nsga2_front_is_mutually_non_dominating() {
        let mut unit = testing::ring_unit(8, false);
        let mut ids = IdGen::new();
        assert!(unit.add_app(testing::fully_connected_app(4, &mut ids)));
        let opts = GaOpts::builder()
            .budget(Duration::from_millis(300))
            .archive_size(8)
            .offspring_size(8)
            .build();
        let front = nsga2(&unit, &opts);
        assert!(!front.is_empty());
        for a in front.iter() {
            a.unit.consistency_checker().unwrap();
            for b in front.iter() {
                assert!(!a.fitness.dominates(&b.fitness) || a.fitness == b.fitness);
            }
        }
    }

    #[test]
    fn nsga2_on_fft_traffic_stays_within_the_slot_budget() {
        let mut unit = testing::mesh_unit(4, 4);
        let mut ids = IdGen::new();
        assert!(unit.add_app(testing::fft_app(16, &mut ids)));
        let opts = GaOpts::builder()
            .budget(Duration::from_secs(5))
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
        assert!(best_slots <= 16);
    }
}
