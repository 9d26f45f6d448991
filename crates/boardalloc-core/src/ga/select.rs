//! Survivor and parent selection schemes: NSGA-II fronts with crowding
//! distance, dominance/crowding binary tournament, and SPEA2 strength
//! fitness with nearest-neighbor truncation.

use rand::rngs::StdRng;
use rand::seq::index;

use super::Individual;

/// Fast non-dominated sort; writes `rank` on every individual and returns
/// the fronts as index lists.
pub(crate) fn assign_fronts(pop: &mut [Individual]) -> Vec<Vec<usize>> {
    let n = pop.len();
    let mut dominated_by: Vec<Vec<usize>> = vec![Vec::new(); n];
    let mut nr_dominators = vec![0usize; n];
    for i in 0..n {
        for j in (i + 1)..n {
            if pop[i].fitness.dominates(&pop[j].fitness) {
                dominated_by[i].push(j);
                nr_dominators[j] += 1;
            } else if pop[j].fitness.dominates(&pop[i].fitness) {
                dominated_by[j].push(i);
                nr_dominators[i] += 1;
            }
        }
    }
    let mut fronts = Vec::new();
    let mut current = (0..n)
        .filter(|&i| nr_dominators[i] == 0)
        .collect::<Vec<_>>();
    let mut rank = 0;
    while !current.is_empty() {
        for &i in &current {
            pop[i].rank = rank;
        }
        let mut next = Vec::new();
        for &i in &current {
            for &j in &dominated_by[i] {
                nr_dominators[j] -= 1;
                if nr_dominators[j] == 0 {
                    next.push(j);
                }
            }
        }
        fronts.push(std::mem::replace(&mut current, next));
        rank += 1;
    }
    fronts
}

/// Crowding distance within one front. Boundary points get infinity.
pub(crate) fn assign_crowding(pop: &mut [Individual], front: &[usize]) {
    for &i in front {
        pop[i].crowding = 0.0;
    }
    if front.len() <= 2 {
        for &i in front {
            pop[i].crowding = f64::INFINITY;
        }
        return;
    }
    let nr_objectives = pop[front[0]].fitness.values().len();
    for m in 0..nr_objectives {
        let mut sorted = front.to_vec();
        sorted.sort_by_key(|&i| pop[i].fitness.values()[m]);
        let lo = pop[sorted[0]].fitness.values()[m] as f64;
        let hi = pop[sorted[sorted.len() - 1]].fitness.values()[m] as f64;
        pop[sorted[0]].crowding = f64::INFINITY;
        pop[sorted[sorted.len() - 1]].crowding = f64::INFINITY;
        if hi <= lo {
            continue;
        }
        for w in sorted.windows(3) {
            let prev = pop[w[0]].fitness.values()[m] as f64;
            let next = pop[w[2]].fitness.values()[m] as f64;
            pop[w[1]].crowding += (next - prev) / (hi - lo);
        }
    }
}

/// NSGA-II survivor selection: fill whole fronts while they fit, then cut
/// the boundary front by descending crowding distance. The returned
/// population is ordered best-first and carries fresh ranks and crowding
/// distances.
pub(crate) fn sel_nsga2(mut pop: Vec<Individual>, k: usize) -> Vec<Individual> {
    let fronts = assign_fronts(&mut pop);
    for front in &fronts {
        assign_crowding(&mut pop, front);
    }
    let mut order = Vec::with_capacity(pop.len());
    for front in &fronts {
        let mut front = front.clone();
        front.sort_by(|&a, &b| {
            pop[b]
                .crowding
                .partial_cmp(&pop[a].crowding)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        order.extend(front);
    }
    order.truncate(k);
    let mut by_index = pop.into_iter().map(Some).collect::<Vec<_>>();
    order
        .into_iter()
        .map(|i| by_index[i].take().unwrap())
        .collect()
}

/// Binary tournament on (dominance, crowding distance). Assumes ranks and
/// crowding are current, e.g. right after [`sel_nsga2`].
pub(crate) fn tournament_dcd(pop: &[Individual], k: usize, rng: &mut StdRng) -> Vec<Individual> {
    assert!(pop.len() >= 2, "tournament needs at least two individuals");
    (0..k)
        .map(|_| {
            let picks = index::sample(rng, pop.len(), 2);
            let (a, b) = (&pop[picks.index(0)], &pop[picks.index(1)]);
            let winner = if a.fitness.dominates(&b.fitness) {
                a
            } else if b.fitness.dominates(&a.fitness) {
                b
            } else if a.crowding >= b.crowding {
                a
            } else {
                b
            };
            winner.clone()
        })
        .collect()
}

/// SPEA2 environmental selection: strength-based raw fitness plus k-th
/// nearest neighbor density, then archive truncation by nearest-neighbor
/// distance. Returns the archive ordered best-first.
pub(crate) fn sel_spea2(mut pop: Vec<Individual>, k: usize) -> Vec<Individual> {
    let n = pop.len();
    if n <= k {
        let fronts = assign_fronts(&mut pop);
        for front in &fronts {
            assign_crowding(&mut pop, front);
        }
        return pop;
    }

    // Strength: how many an individual dominates. Raw fitness: total
    // strength of everyone dominating it (0 = non-dominated).
    let mut strength = vec![0usize; n];
    let mut dominators: Vec<Vec<usize>> = vec![Vec::new(); n];
    for i in 0..n {
        for j in 0..n {
            if i != j && pop[i].fitness.dominates(&pop[j].fitness) {
                strength[i] += 1;
                dominators[j].push(i);
            }
        }
    }
    let raw = (0..n)
        .map(|i| dominators[i].iter().map(|&d| strength[d]).sum::<usize>())
        .collect::<Vec<_>>();

    let dist = |a: usize, b: usize| -> f64 {
        let fa = pop[a].fitness.as_f64();
        let fb = pop[b].fitness.as_f64();
        fa.iter()
            .zip(fb.iter())
            .map(|(x, y)| (x - y) * (x - y))
            .sum::<f64>()
            .sqrt()
    };
    let knn = (n as f64).sqrt() as usize;
    let density = (0..n)
        .map(|i| {
            let mut ds = (0..n).filter(|&j| j != i).map(|j| dist(i, j)).collect::<Vec<_>>();
            ds.sort_by(|a, b| a.partial_cmp(b).unwrap());
            1.0 / (ds.get(knn.saturating_sub(1)).copied().unwrap_or(0.0) + 2.0)
        })
        .collect::<Vec<_>>();
    let fitness = (0..n)
        .map(|i| raw[i] as f64 + density[i])
        .collect::<Vec<_>>();

    let nondominated = (0..n).filter(|&i| raw[i] == 0).collect::<Vec<_>>();
    let chosen = if nondominated.len() <= k {
        // Fill the archive with the best of the rest.
        let mut order = (0..n).collect::<Vec<_>>();
        order.sort_by(|&a, &b| fitness[a].partial_cmp(&fitness[b]).unwrap());
        order.truncate(k);
        order
    } else {
        // Too many non-dominated individuals: repeatedly drop the one packed
        // tightest against its neighbors.
        let mut keep = nondominated;
        while keep.len() > k {
            let mut worst = 0;
            let mut worst_key: Option<Vec<f64>> = None;
            for (pos, &i) in keep.iter().enumerate() {
                let mut ds = keep
                    .iter()
                    .filter(|&&j| j != i)
                    .map(|&j| dist(i, j))
                    .collect::<Vec<_>>();
                ds.sort_by(|a, b| a.partial_cmp(b).unwrap());
                let smaller = match &worst_key {
                    None => true,
                    Some(key) => ds < *key,
                };
                if smaller {
                    worst = pos;
                    worst_key = Some(ds);
                }
            }
            keep.remove(worst);
        }
        keep
    };

    let mut by_index = pop.into_iter().map(Some).collect::<Vec<_>>();
    let mut archive = chosen
        .into_iter()
        .map(|i| by_index[i].take().unwrap())
        .collect::<Vec<_>>();
    let fronts = assign_fronts(&mut archive);
    for front in &fronts {
        assign_crowding(&mut archive, front);
    }
    archive
}

#[cfg(test)]
mod tests {
    use rand::SeedableRng;

    use super::*;
    use crate::eval::Fitness;
    use crate::testing;

    fn pop_with(fitnesses: &[[u64; 3]]) -> Vec<Individual> {
        let unit = testing::ring_unit(4, false);
        fitnesses
            .iter()
            .map(|&f| Individual {
                unit: unit.clone(),
                fitness: Fitness(f),
                rank: 0,
                crowding: 0.0,
            })
            .collect()
    }

    #[test]
    fn fronts_order_by_dominance() {
        let mut pop = pop_with(&[[1, 1, 1], [2, 2, 2], [1, 2, 1], [3, 1, 1]]);
        let fronts = assign_fronts(&mut pop);
        assert_eq!(fronts[0], vec![0]);
        assert_eq!(pop[0].rank, 0);
        assert!(pop[1].rank > 0);
        // [3,1,1] is incomparable with [1,2,1] and [2,2,2] beats neither.
        assert_eq!(pop[3].rank, 1);
    }

    #[test]
    fn sel_nsga2_prefers_lower_fronts() {
        let pop = pop_with(&[[5, 5, 5], [1, 1, 1], [2, 1, 1], [1, 2, 1]]);
        let survivors = sel_nsga2(pop, 2);
        assert_eq!(survivors.len(), 2);
        assert!(survivors.iter().all(|ind| ind.fitness != Fitness([5, 5, 5])));
        assert_eq!(survivors[0].fitness, Fitness([1, 1, 1]));
    }

    #[test]
    fn sel_nsga2_boundary_cut_uses_crowding() {
        // Front 0 has four incomparable points; the extremes must survive a
        // cut to three.
        let pop = pop_with(&[[1, 8, 1], [2, 6, 1], [3, 5, 1], [4, 1, 1]]);
        let survivors = sel_nsga2(pop, 3);
        let kept = survivors
            .iter()
            .map(|ind| ind.fitness.values()[0])
            .collect::<Vec<_>>();
        assert!(kept.contains(&1));
        assert!(kept.contains(&4));
    }

    #[test]
    fn tournament_winner_is_never_dominated_by_its_opponent() {
        // With two individuals every tournament pits them against each other,
        // and the dominating one must win every time.
        let mut pop = pop_with(&[[1, 1, 1], [2, 2, 2]]);
        let fronts = assign_fronts(&mut pop);
        for front in &fronts {
            assign_crowding(&mut pop, front);
        }
        let mut rng = StdRng::seed_from_u64(0);
        let picked = tournament_dcd(&pop, 8, &mut rng);
        assert!(picked.iter().all(|ind| ind.fitness == Fitness([1, 1, 1])));
    }

    #[test]
    fn sel_spea2_keeps_nondominated_points_first() {
        let pop = pop_with(&[[1, 9, 1], [9, 1, 1], [5, 5, 5], [9, 9, 9]]);
        let archive = sel_spea2(pop, 3);
        assert_eq!(archive.len(), 3);
        assert!(archive.iter().any(|i| i.fitness == Fitness([1, 9, 1])));
        assert!(archive.iter().any(|i| i.fitness == Fitness([9, 1, 1])));
        assert!(archive.iter().all(|i| i.fitness != Fitness([9, 9, 9])));
    }

    #[test]
    fn sel_spea2_truncation_keeps_spread() {
        // Five non-dominated points on a line; truncation to four drops one
        // of the packed middle points, never both extremes.
        let pop = pop_with(&[[1, 10, 1], [2, 8, 1], [3, 7, 1], [4, 6, 1], [10, 1, 1]]);
        let archive = sel_spea2(pop, 4);
        let kept = archive
            .iter()
            .map(|i| i.fitness.values()[0])
            .collect::<Vec<_>>();
        assert!(kept.contains(&1));
        assert!(kept.contains(&10));
    }
}
