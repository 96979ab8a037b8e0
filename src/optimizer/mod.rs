//! # Multi-Objective Optimizer
//!
//! NSGA-II style search over filter genomes. The optimizer is synchronous and
//! owns no evaluation machinery: the run controller asks it for genomes,
//! evaluates them, and hands scored individuals back for ranking and
//! survivor selection.
//!
//! - `dominance`: Pareto dominance, non-dominated sorting, crowding distance, tournaments
//! - `operators`: SBX crossover and polynomial mutation
//! - `archive`: run-wide non-dominated archive

pub mod archive;
pub mod dominance;
pub mod operators;

use std::fmt;

use rand::Rng;
use tracing::debug;

pub use archive::ParetoArchive;
pub use dominance::{
    assign_crowding_distance, assign_ranks_and_crowding, binary_tournament, dominates,
    fast_non_dominated_sort,
};
pub use operators::{PolynomialMutation, SimulatedBinaryCrossover};

use crate::errors::{AppError, AppResult};
use crate::fitness::ObjectiveVector;
use crate::genome::FilterGenome;

pub const MIN_POPULATION_SIZE: usize = 2;
pub const MAX_POPULATION_SIZE: usize = 500;

/// A genome with its objective vector.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredGenome {
    pub genome: FilterGenome,
    pub objectives: ObjectiveVector,
}

impl ScoredGenome {
    pub fn new(genome: FilterGenome, objectives: ObjectiveVector) -> Self {
        Self { genome, objectives }
    }

    /// Summed edit distance over all slots
    pub fn total(&self) -> u64 {
        self.objectives.iter().map(|&v| u64::from(v)).sum()
    }
}

/// A population member with its ranking state.
#[derive(Debug, Clone, PartialEq)]
pub struct Individual {
    pub genome: FilterGenome,
    pub objectives: ObjectiveVector,
    /// Index of the non-dominated front (0 is best)
    pub rank: usize,
    pub crowding_distance: f64,
}

impl Individual {
    pub fn new(genome: FilterGenome, objectives: ObjectiveVector) -> Self {
        Self {
            genome,
            objectives,
            rank: 0,
            crowding_distance: 0.0,
        }
    }

    pub fn scored(&self) -> ScoredGenome {
        ScoredGenome::new(self.genome, self.objectives.clone())
    }
}

impl From<ScoredGenome> for Individual {
    fn from(scored: ScoredGenome) -> Self {
        Individual::new(scored.genome, scored.objectives)
    }
}

/// Where the optimizer is in its generation cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OptimizerPhase {
    Initializing,
    Evaluating,
    Ranking,
    Selecting,
    Varying,
    Terminated,
}

impl fmt::Display for OptimizerPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            OptimizerPhase::Initializing => "initializing",
            OptimizerPhase::Evaluating => "evaluating",
            OptimizerPhase::Ranking => "ranking",
            OptimizerPhase::Selecting => "selecting",
            OptimizerPhase::Varying => "varying",
            OptimizerPhase::Terminated => "terminated",
        };
        f.write_str(name)
    }
}

/// NSGA-II selection and variation over filter genomes.
#[derive(Debug, Clone)]
pub struct ParetoOptimizer {
    population_size: usize,
    crossover: SimulatedBinaryCrossover,
    mutation: PolynomialMutation,
    phase: OptimizerPhase,
}

impl ParetoOptimizer {
    /// # Errors
    ///
    /// [`AppError::Config`] when the population size is outside 2..=500.
    pub fn new(
        population_size: usize,
        crossover: SimulatedBinaryCrossover,
        mutation: PolynomialMutation,
    ) -> AppResult<Self> {
        if !(MIN_POPULATION_SIZE..=MAX_POPULATION_SIZE).contains(&population_size) {
            return Err(AppError::Config(format!(
                "Population size must be between {} and {} (received {})",
                MIN_POPULATION_SIZE, MAX_POPULATION_SIZE, population_size
            )));
        }
        Ok(Self {
            population_size,
            crossover,
            mutation,
            phase: OptimizerPhase::Initializing,
        })
    }

    pub fn population_size(&self) -> usize {
        self.population_size
    }

    pub fn phase(&self) -> OptimizerPhase {
        self.phase
    }

    pub fn set_phase(&mut self, phase: OptimizerPhase) {
        if self.phase != phase {
            debug!(from = %self.phase, to = %phase, "Optimizer phase transition");
            self.phase = phase;
        }
    }

    /// Samples the first generation uniformly within the gene bounds.
    pub fn initial_population<R: Rng + ?Sized>(&mut self, rng: &mut R) -> Vec<FilterGenome> {
        self.set_phase(OptimizerPhase::Initializing);
        (0..self.population_size)
            .map(|_| FilterGenome::random(rng))
            .collect()
    }

    /// Assigns rank and crowding distance to every member; returns the fronts.
    pub fn rank_population(&mut self, pool: &mut [Individual]) -> Vec<Vec<usize>> {
        self.set_phase(OptimizerPhase::Ranking);
        assign_ranks_and_crowding(pool)
    }

    /// Reduces a combined parent + offspring pool to the population size.
    ///
    /// Whole fronts are taken in rank order; the front that does not fit is
    /// split by descending crowding distance. Survivors are then re-ranked
    /// among themselves, so their ranking depends only on the population and
    /// is reproduced exactly when a population is restored from a checkpoint.
    pub fn select_survivors(&mut self, mut pool: Vec<Individual>) -> Vec<Individual> {
        let fronts = self.rank_population(&mut pool);
        self.set_phase(OptimizerPhase::Selecting);

        let mut next = Vec::with_capacity(self.population_size);
        for mut front in fronts {
            if next.len() == self.population_size {
                break;
            }
            if next.len() + front.len() <= self.population_size {
                next.extend(front.into_iter().map(|idx| pool[idx].clone()));
                continue;
            }
            front.sort_by(|&a, &b| pool[b].crowding_distance.total_cmp(&pool[a].crowding_distance));
            let remaining = self.population_size - next.len();
            next.extend(front.into_iter().take(remaining).map(|idx| pool[idx].clone()));
        }
        assign_ranks_and_crowding(&mut next);
        next
    }

    /// Breeds `population_size` children from ranked parents by binary
    /// tournament, SBX crossover and polynomial mutation.
    pub fn make_offspring<R: Rng + ?Sized>(
        &mut self,
        parents: &[Individual],
        rng: &mut R,
    ) -> Vec<FilterGenome> {
        self.set_phase(OptimizerPhase::Varying);
        if parents.is_empty() {
            return Vec::new();
        }

        let mut offspring = Vec::with_capacity(self.population_size);
        while offspring.len() < self.population_size {
            let parent_a = &parents[binary_tournament(parents, rng)];
            let parent_b = &parents[binary_tournament(parents, rng)];
            let (child_a, child_b) = self
                .crossover
                .crossover(&parent_a.genome, &parent_b.genome, rng);
            offspring.push(self.mutation.mutate(&child_a, rng));
            if offspring.len() < self.population_size {
                offspring.push(self.mutation.mutate(&child_b, rng));
            }
        }
        offspring
    }

    pub fn terminate(&mut self) {
        self.set_phase(OptimizerPhase::Terminated);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn optimizer(size: usize) -> ParetoOptimizer {
        ParetoOptimizer::new(
            size,
            SimulatedBinaryCrossover::default(),
            PolynomialMutation::default(),
        )
        .expect("optimizer")
    }

    /// Two conflicting objectives derived from the first gene.
    fn score(genome: &FilterGenome) -> Vec<u32> {
        let x = genome.values()[0].round() as u32;
        vec![x, 30 - x]
    }

    #[test]
    fn test_population_size_bounds() {
        for size in [0, 1, 501] {
            let result = ParetoOptimizer::new(
                size,
                SimulatedBinaryCrossover::default(),
                PolynomialMutation::default(),
            );
            assert!(matches!(result, Err(AppError::Config(_))));
        }
        assert!(ParetoOptimizer::new(
            2,
            SimulatedBinaryCrossover::default(),
            PolynomialMutation::default()
        )
        .is_ok());
    }

    #[test]
    fn test_initial_population_size() {
        let mut rng = StdRng::seed_from_u64(1);
        let mut opt = optimizer(12);
        assert_eq!(opt.initial_population(&mut rng).len(), 12);
        assert_eq!(opt.phase(), OptimizerPhase::Initializing);
    }

    #[test]
    fn test_select_survivors_keeps_best_fronts() {
        let mut opt = optimizer(3);
        let pool = vec![
            Individual::new(FilterGenome::decode(&[1.0]), vec![5, 5]),
            Individual::new(FilterGenome::decode(&[2.0]), vec![1, 9]),
            Individual::new(FilterGenome::decode(&[3.0]), vec![9, 1]),
            Individual::new(FilterGenome::decode(&[4.0]), vec![6, 6]),
            Individual::new(FilterGenome::decode(&[5.0]), vec![9, 9]),
        ];
        let survivors = opt.select_survivors(pool);

        assert_eq!(survivors.len(), 3);
        assert!(survivors.iter().all(|s| s.rank == 0));
        assert_eq!(opt.phase(), OptimizerPhase::Selecting);
    }

    #[test]
    fn test_last_front_split_by_crowding() {
        let mut opt = optimizer(2);
        let pool = vec![
            Individual::new(FilterGenome::decode(&[1.0]), vec![0, 10]),
            Individual::new(FilterGenome::decode(&[2.0]), vec![5, 5]),
            Individual::new(FilterGenome::decode(&[3.0]), vec![10, 0]),
        ];
        let survivors = opt.select_survivors(pool);
        let objectives: Vec<Vec<u32>> = survivors.iter().map(|s| s.objectives.clone()).collect();
        // Boundary points have infinite crowding distance
        assert!(objectives.contains(&vec![0, 10]));
        assert!(objectives.contains(&vec![10, 0]));
    }

    /// Re-ranking a survivor population from scratch changes nothing.
    #[test]
    fn test_survivor_ranking_is_reproducible_from_members() {
        let mut opt = optimizer(4);
        let pool = vec![
            Individual::new(FilterGenome::decode(&[1.0]), vec![0, 20]),
            Individual::new(FilterGenome::decode(&[2.0]), vec![4, 12]),
            Individual::new(FilterGenome::decode(&[3.0]), vec![8, 8]),
            Individual::new(FilterGenome::decode(&[4.0]), vec![9, 7]),
            Individual::new(FilterGenome::decode(&[5.0]), vec![20, 0]),
            Individual::new(FilterGenome::decode(&[6.0]), vec![21, 21]),
        ];
        let survivors = opt.select_survivors(pool);

        let mut restored: Vec<Individual> = survivors
            .iter()
            .map(|s| Individual::new(s.genome, s.objectives.clone()))
            .collect();
        opt.rank_population(&mut restored);
        assert_eq!(restored, survivors);
    }

    #[test]
    fn test_make_offspring_size_and_legality() {
        let mut rng = StdRng::seed_from_u64(2);
        let mut opt = optimizer(7);
        let mut parents: Vec<Individual> = opt
            .initial_population(&mut rng)
            .into_iter()
            .map(|g| {
                let objectives = score(&g);
                Individual::new(g, objectives)
            })
            .collect();
        opt.rank_population(&mut parents);

        let children = opt.make_offspring(&parents, &mut rng);
        assert_eq!(children.len(), 7);
        for child in &children {
            assert_eq!(&FilterGenome::decode(child.values()), child);
        }
        assert_eq!(opt.phase(), OptimizerPhase::Varying);
    }

    #[test]
    fn test_generational_loop_improves_front() {
        let mut rng = StdRng::seed_from_u64(3);
        let mut opt = optimizer(10);
        let mut population: Vec<Individual> = opt
            .initial_population(&mut rng)
            .into_iter()
            .map(|g| {
                let objectives = score(&g);
                Individual::new(g, objectives)
            })
            .collect();
        opt.rank_population(&mut population);

        for _ in 0..5 {
            let children: Vec<Individual> = opt
                .make_offspring(&population, &mut rng)
                .into_iter()
                .map(|g| {
                    let objectives = score(&g);
                    Individual::new(g, objectives)
                })
                .collect();
            let mut pool = population;
            pool.extend(children);
            population = opt.select_survivors(pool);
        }
        opt.terminate();

        assert_eq!(population.len(), 10);
        // Every point of x + (30 - x) lies on the trade-off line, so all rank 0
        assert!(population.iter().all(|i| i.rank == 0));
        assert_eq!(opt.phase(), OptimizerPhase::Terminated);
    }
}
