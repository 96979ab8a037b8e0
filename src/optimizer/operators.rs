//! Variation operators on filter genomes.
//!
//! Both operators work on raw gene values and hand the result back through
//! [`FilterGenome::decode`], so children always land in the legal space.

use rand::Rng;

use crate::errors::{AppError, AppResult};
use crate::genome::{FilterGenome, GENE_COUNT, GENE_SPECS};

pub const DEFAULT_SBX_ETA: f64 = 15.0;
pub const DEFAULT_CROSSOVER_PROBABILITY: f64 = 0.9;
pub const DEFAULT_MUTATION_ETA: f64 = 20.0;

fn validate_eta(operator: &str, eta: f64) -> AppResult<()> {
    if !(eta.is_finite() && eta > 0.0) {
        return Err(AppError::Config(format!(
            "{} distribution index must be positive (received {})",
            operator, eta
        )));
    }
    Ok(())
}

fn validate_probability(operator: &str, probability: f64) -> AppResult<()> {
    if !(probability.is_finite() && (0.0..=1.0).contains(&probability)) {
        return Err(AppError::Config(format!(
            "{} probability must be within [0, 1] (received {})",
            operator, probability
        )));
    }
    Ok(())
}

/// Simulated Binary Crossover (SBX) following Deb & Agrawal.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SimulatedBinaryCrossover {
    eta: f64,
    probability: f64,
}

impl SimulatedBinaryCrossover {
    /// # Errors
    ///
    /// [`AppError::Config`] for a non-positive distribution index or a
    /// probability outside [0, 1].
    pub fn new(eta: f64, probability: f64) -> AppResult<Self> {
        validate_eta("SBX", eta)?;
        validate_probability("crossover", probability)?;
        Ok(Self { eta, probability })
    }

    pub fn eta(&self) -> f64 {
        self.eta
    }

    pub fn probability(&self) -> f64 {
        self.probability
    }

    fn crossover_gene<R: Rng + ?Sized>(&self, value_a: f64, value_b: f64, rng: &mut R) -> (f64, f64) {
        if (value_a - value_b).abs() < f64::EPSILON {
            return (value_a, value_b);
        }
        let u: f64 = rng.random();
        let beta = if u <= 0.5 {
            (2.0 * u).powf(1.0 / (self.eta + 1.0))
        } else {
            (2.0 * (1.0 - u)).powf(-1.0 / (self.eta + 1.0))
        };
        let child1 = 0.5 * ((1.0 + beta) * value_a + (1.0 - beta) * value_b);
        let child2 = 0.5 * ((1.0 - beta) * value_a + (1.0 + beta) * value_b);
        (child1, child2)
    }

    /// Produces two children; with probability `1 - p` they are copies of the parents.
    pub fn crossover<R: Rng + ?Sized>(
        &self,
        parent_a: &FilterGenome,
        parent_b: &FilterGenome,
        rng: &mut R,
    ) -> (FilterGenome, FilterGenome) {
        if rng.random::<f64>() > self.probability {
            return (*parent_a, *parent_b);
        }

        let mut child_a = Vec::with_capacity(GENE_COUNT);
        let mut child_b = Vec::with_capacity(GENE_COUNT);
        for (&value_a, &value_b) in parent_a.values().iter().zip(parent_b.values().iter()) {
            let (gene_a, gene_b) = self.crossover_gene(value_a, value_b, rng);
            child_a.push(gene_a);
            child_b.push(gene_b);
        }
        (FilterGenome::decode(&child_a), FilterGenome::decode(&child_b))
    }
}

impl Default for SimulatedBinaryCrossover {
    fn default() -> Self {
        Self {
            eta: DEFAULT_SBX_ETA,
            probability: DEFAULT_CROSSOVER_PROBABILITY,
        }
    }
}

/// Bounded polynomial mutation applied gene by gene.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PolynomialMutation {
    eta: f64,
    probability: f64,
}

impl PolynomialMutation {
    /// # Errors
    ///
    /// [`AppError::Config`] for a non-positive distribution index or a
    /// probability outside [0, 1].
    pub fn new(eta: f64, probability: f64) -> AppResult<Self> {
        validate_eta("polynomial mutation", eta)?;
        validate_probability("mutation", probability)?;
        Ok(Self { eta, probability })
    }

    pub fn eta(&self) -> f64 {
        self.eta
    }

    pub fn probability(&self) -> f64 {
        self.probability
    }

    pub fn mutate<R: Rng + ?Sized>(&self, parent: &FilterGenome, rng: &mut R) -> FilterGenome {
        let mut child = parent.values().to_vec();
        for (gene, spec) in child.iter_mut().zip(GENE_SPECS.iter()) {
            if rng.random::<f64>() > self.probability {
                continue;
            }
            let range = spec.span();
            if range.abs() < f64::EPSILON {
                *gene = spec.min;
                continue;
            }
            let delta1 = (*gene - spec.min) / range;
            let delta2 = (spec.max - *gene) / range;
            let u: f64 = rng.random();
            let mut delta_q = if u <= 0.5 {
                let term = 2.0 * u + (1.0 - 2.0 * u) * (1.0 - delta1).powf(self.eta + 1.0);
                term.powf(1.0 / (self.eta + 1.0)) - 1.0
            } else {
                let v = 1.0 - u;
                let term = 2.0 * v + (1.0 - 2.0 * v) * (1.0 - delta2).powf(self.eta + 1.0);
                1.0 - term.powf(1.0 / (self.eta + 1.0))
            };
            if !delta_q.is_finite() {
                delta_q = 0.0;
            }
            *gene = (*gene + delta_q * range).clamp(spec.min, spec.max);
        }
        FilterGenome::decode(&child)
    }
}

impl Default for PolynomialMutation {
    fn default() -> Self {
        Self {
            eta: DEFAULT_MUTATION_ETA,
            probability: 1.0 / GENE_COUNT as f64,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn assert_in_bounds(genome: &FilterGenome) {
        for (value, spec) in genome.values().iter().zip(GENE_SPECS.iter()) {
            assert!(*value >= spec.min && *value <= spec.max);
        }
    }

    #[test]
    fn test_operator_validation() {
        assert!(SimulatedBinaryCrossover::new(0.0, 0.9).is_err());
        assert!(SimulatedBinaryCrossover::new(15.0, 1.5).is_err());
        assert!(PolynomialMutation::new(f64::NAN, 0.1).is_err());
        assert!(PolynomialMutation::new(20.0, -0.1).is_err());
        assert!(PolynomialMutation::new(20.0, 0.0).is_ok());
    }

    #[test]
    fn test_defaults() {
        let sbx = SimulatedBinaryCrossover::default();
        assert_eq!(sbx.eta(), 15.0);
        assert_eq!(sbx.probability(), 0.9);
        let mutation = PolynomialMutation::default();
        assert_eq!(mutation.eta(), 20.0);
        assert!((mutation.probability() - 1.0 / 9.0).abs() < 1e-12);
    }

    #[test]
    fn test_crossover_children_are_legal() {
        let mut rng = StdRng::seed_from_u64(11);
        let sbx = SimulatedBinaryCrossover::new(2.0, 1.0).expect("operator");
        for _ in 0..200 {
            let a = FilterGenome::random(&mut rng);
            let b = FilterGenome::random(&mut rng);
            let (c, d) = sbx.crossover(&a, &b, &mut rng);
            assert_in_bounds(&c);
            assert_in_bounds(&d);
            assert_eq!(FilterGenome::decode(c.values()), c);
        }
    }

    #[test]
    fn test_crossover_of_identical_parents_is_identity() {
        let mut rng = StdRng::seed_from_u64(12);
        let parent = FilterGenome::random(&mut rng);
        let (a, b) = SimulatedBinaryCrossover::default().crossover(&parent, &parent, &mut rng);
        assert_eq!(a, parent);
        assert_eq!(b, parent);
    }

    #[test]
    fn test_zero_probability_crossover_copies_parents() {
        let mut rng = StdRng::seed_from_u64(13);
        let a = FilterGenome::random(&mut rng);
        let b = FilterGenome::random(&mut rng);
        let sbx = SimulatedBinaryCrossover::new(15.0, 0.0).expect("operator");
        assert_eq!(sbx.crossover(&a, &b, &mut rng), (a, b));
    }

    #[test]
    fn test_mutation_respects_bounds() {
        let mut rng = StdRng::seed_from_u64(14);
        let mutation = PolynomialMutation::new(1.0, 1.0).expect("operator");
        for _ in 0..200 {
            let parent = FilterGenome::random(&mut rng);
            assert_in_bounds(&mutation.mutate(&parent, &mut rng));
        }
    }

    #[test]
    fn test_zero_probability_mutation_is_identity() {
        let mut rng = StdRng::seed_from_u64(15);
        let parent = FilterGenome::random(&mut rng);
        let mutation = PolynomialMutation::new(20.0, 0.0).expect("operator");
        assert_eq!(mutation.mutate(&parent, &mut rng), parent);
    }

    #[test]
    fn test_mutation_changes_something_at_full_probability() {
        let mut rng = StdRng::seed_from_u64(16);
        let parent = FilterGenome::random(&mut rng);
        let mutation = PolynomialMutation::new(5.0, 1.0).expect("operator");
        let changed = (0..10).any(|_| mutation.mutate(&parent, &mut rng) != parent);
        assert!(changed);
    }
}
