//! Pareto dominance, non-dominated sorting and crowding distance.

use std::cmp::Ordering;

use rand::Rng;

use super::Individual;

/// `candidate` dominates `other` when it is no worse in every objective and
/// strictly better in at least one. Lower is better.
pub fn dominates(candidate: &[u32], other: &[u32]) -> bool {
    let mut strictly_better = false;
    for (&a, &b) in candidate.iter().zip(other.iter()) {
        if a > b {
            return false;
        }
        if a < b {
            strictly_better = true;
        }
    }
    strictly_better
}

/// Partitions the population into successive non-dominated fronts and writes
/// each individual's front index to `rank`.
///
/// Returns the fronts as index lists; front 0 is the non-dominated set.
pub fn fast_non_dominated_sort(population: &mut [Individual]) -> Vec<Vec<usize>> {
    let size = population.len();
    let mut domination_counts = vec![0usize; size];
    let mut dominated: Vec<Vec<usize>> = vec![Vec::new(); size];
    let mut fronts: Vec<Vec<usize>> = Vec::new();
    let mut current_front = Vec::new();

    for p in 0..size {
        for q in 0..size {
            if dominates(&population[p].objectives, &population[q].objectives) {
                dominated[p].push(q);
            } else if dominates(&population[q].objectives, &population[p].objectives) {
                domination_counts[p] += 1;
            }
        }
        if domination_counts[p] == 0 {
            population[p].rank = 0;
            current_front.push(p);
        }
    }

    let mut rank = 0usize;
    while !current_front.is_empty() {
        let mut next_front = Vec::new();
        for &p in &current_front {
            for &q in &dominated[p] {
                domination_counts[q] -= 1;
                if domination_counts[q] == 0 {
                    population[q].rank = rank + 1;
                    next_front.push(q);
                }
            }
        }
        fronts.push(current_front);
        rank += 1;
        current_front = next_front;
    }

    fronts
}

/// Assigns crowding distances within one front.
///
/// Boundary points of every objective get infinity, as does every member of a
/// front with two or fewer points. Interior points sum their normalised
/// neighbour gaps; objectives with zero range contribute nothing.
pub fn assign_crowding_distance(population: &mut [Individual], front: &[usize]) {
    if front.is_empty() {
        return;
    }
    if front.len() <= 2 {
        for &idx in front {
            population[idx].crowding_distance = f64::INFINITY;
        }
        return;
    }

    for &idx in front {
        population[idx].crowding_distance = 0.0;
    }

    let objectives = population[front[0]].objectives.len();
    for obj_idx in 0..objectives {
        let mut sorted = front.to_vec();
        sorted.sort_by_key(|&idx| population[idx].objectives[obj_idx]);

        let first = sorted[0];
        let last = sorted[sorted.len() - 1];
        population[first].crowding_distance = f64::INFINITY;
        population[last].crowding_distance = f64::INFINITY;

        let min = f64::from(population[first].objectives[obj_idx]);
        let max = f64::from(population[last].objectives[obj_idx]);
        if max - min <= 0.0 {
            continue;
        }

        for window in sorted.windows(3) {
            if let [prev, current, next] = window {
                let gap = f64::from(population[*next].objectives[obj_idx])
                    - f64::from(population[*prev].objectives[obj_idx]);
                if population[*current].crowding_distance.is_finite() {
                    population[*current].crowding_distance += gap / (max - min);
                }
            }
        }
    }
}

/// Ranks the population and assigns crowding distances front by front.
pub fn assign_ranks_and_crowding(population: &mut [Individual]) -> Vec<Vec<usize>> {
    let fronts = fast_non_dominated_sort(population);
    for front in &fronts {
        assign_crowding_distance(population, front);
    }
    fronts
}

/// Crowded-comparison order: lower rank first, then larger crowding distance.
pub fn compare_rank_and_crowding(a: &Individual, b: &Individual) -> Ordering {
    match a.rank.cmp(&b.rank) {
        Ordering::Equal => b.crowding_distance.total_cmp(&a.crowding_distance),
        other => other,
    }
}

/// Picks two distinct individuals at random and returns the index of the winner.
pub fn binary_tournament<R: Rng + ?Sized>(population: &[Individual], rng: &mut R) -> usize {
    if population.len() <= 1 {
        return 0;
    }
    let idx_a = rng.random_range(0..population.len());
    let mut idx_b = rng.random_range(0..population.len());
    while idx_a == idx_b {
        idx_b = rng.random_range(0..population.len());
    }
    if compare_rank_and_crowding(&population[idx_a], &population[idx_b]) == Ordering::Greater {
        idx_b
    } else {
        idx_a
    }
}
