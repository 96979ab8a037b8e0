//! # Checkpoint Module
//!
//! Versioned snapshot of a run taken at the end of every generation. A
//! checkpoint carries everything needed to continue the run bit-for-bit:
//! population, archive, evaluation cache, statistics and the seed of the next
//! generation's random stream.
//!
//! Writes are atomic (temp file in the same directory, then rename), so a
//! crash mid-write leaves the previous checkpoint intact.

use std::io::Write;
use std::path::Path;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use tracing::info;

use crate::controller::GenerationStats;
use crate::errors::{error_logging, AppError, AppResult};
use crate::genome::{gene_names, FilterGenome};
use crate::observability;
use crate::optimizer::ScoredGenome;

/// Current on-disk format.
pub const CHECKPOINT_FORMAT_VERSION: u32 = 1;

/// Checkpoint file name inside the output directory.
pub const CHECKPOINT_FILE: &str = "checkpoint.json";

/// Serialised form of a scored genome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SavedGenome {
    pub genes: Vec<f64>,
    pub objectives: Vec<u32>,
}

impl From<&ScoredGenome> for SavedGenome {
    fn from(scored: &ScoredGenome) -> Self {
        Self {
            genes: scored.genome.values().to_vec(),
            objectives: scored.objectives.clone(),
        }
    }
}

impl SavedGenome {
    pub fn to_scored(&self) -> ScoredGenome {
        ScoredGenome::new(FilterGenome::decode(&self.genes), self.objectives.clone())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub format_version: u32,
    pub created_at: DateTime<Utc>,
    /// Last completed generation (0 = initial population only)
    pub generation: u32,
    /// Seed of the next generation's RNG
    pub next_seed: u64,
    pub evaluation_count: u64,
    /// Slot keys in objective order
    pub benchmark: Vec<String>,
    pub gene_names: Vec<String>,
    pub population: Vec<SavedGenome>,
    pub archive: Vec<SavedGenome>,
    pub cache: Vec<SavedGenome>,
    /// Worst successful distance per slot, for the worst-observed penalty policy
    #[serde(default)]
    pub worst_observed: Vec<Option<u32>>,
    pub stats: Vec<GenerationStats>,
}

impl Checkpoint {
    /// Writes the checkpoint as pretty JSON, atomically replacing `path`.
    pub fn save(&self, path: &Path) -> AppResult<()> {
        let started = Instant::now();
        let result = self.write_atomically(path);
        observability::record_checkpoint_metrics(result.is_ok(), started.elapsed());

        match &result {
            Ok(()) => info!(
                path = %path.display(),
                generation = self.generation,
                population = self.population.len(),
                archive = self.archive.len(),
                cached = self.cache.len(),
                "Checkpoint saved"
            ),
            Err(e) => error_logging::log_checkpoint_error(e, &path.display().to_string(), "save"),
        }
        result
    }

    fn write_atomically(&self, path: &Path) -> AppResult<()> {
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| AppError::Checkpoint(format!("Failed to serialise checkpoint: {}", e)))?;

        let dir = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        let mut temp = NamedTempFile::new_in(dir)?;
        temp.write_all(json.as_bytes())?;
        temp.as_file().sync_all()?;
        temp.persist(path).map_err(|e| AppError::from(e.error))?;
        Ok(())
    }

    /// Reads a checkpoint without validating it against the current run.
    pub fn load(path: &Path) -> AppResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            AppError::Checkpoint(format!("Cannot read checkpoint {}: {}", path.display(), e))
        })?;
        serde_json::from_str(&content).map_err(|e| {
            AppError::Checkpoint(format!("Corrupt checkpoint {}: {}", path.display(), e))
        })
    }

    /// Checks that this checkpoint belongs to a run over `benchmark` with the
    /// current gene layout.
    pub fn validate(&self, benchmark: &[String]) -> AppResult<()> {
        if self.format_version != CHECKPOINT_FORMAT_VERSION {
            return Err(AppError::Checkpoint(format!(
                "Unsupported checkpoint format version {} (expected {})",
                self.format_version, CHECKPOINT_FORMAT_VERSION
            )));
        }

        let expected_genes = gene_names();
        if self.gene_names != expected_genes {
            return Err(AppError::Checkpoint(format!(
                "Gene layout mismatch: checkpoint has {:?}, expected {:?}",
                self.gene_names, expected_genes
            )));
        }

        if self.benchmark != benchmark {
            return Err(AppError::Checkpoint(format!(
                "Benchmark mismatch: checkpoint has {:?}, run has {:?}",
                self.benchmark, benchmark
            )));
        }

        if self.population.is_empty() {
            return Err(AppError::Checkpoint(
                "Checkpoint population is empty".to_string(),
            ));
        }

        let sections = [
            ("population", &self.population),
            ("archive", &self.archive),
            ("cache", &self.cache),
        ];
        for (section, entries) in sections {
            for (index, entry) in entries.iter().enumerate() {
                if entry.objectives.len() != benchmark.len() {
                    return Err(AppError::Checkpoint(format!(
                        "{} entry {} has {} objectives, expected {}",
                        section,
                        index,
                        entry.objectives.len(),
                        benchmark.len()
                    )));
                }
                if entry.genes.len() != expected_genes.len() {
                    return Err(AppError::Checkpoint(format!(
                        "{} entry {} has {} genes, expected {}",
                        section,
                        index,
                        entry.genes.len(),
                        expected_genes.len()
                    )));
                }
            }
        }

        Ok(())
    }

    /// Loads and validates; any problem is fatal for the resume.
    pub fn load_validated(path: &Path, benchmark: &[String]) -> AppResult<Self> {
        let checkpoint = Self::load(path).and_then(|checkpoint| {
            checkpoint.validate(benchmark)?;
            Ok(checkpoint)
        });
        if let Err(e) = &checkpoint {
            error_logging::log_checkpoint_error(e, &path.display().to_string(), "resume");
        }
        checkpoint
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn benchmark() -> Vec<String> {
        vec!["light/a.png".to_string(), "heavy/a.png".to_string()]
    }

    fn saved(first_gene: f64, objectives: Vec<u32>) -> SavedGenome {
        SavedGenome::from(&ScoredGenome::new(
            FilterGenome::decode(&[first_gene]),
            objectives,
        ))
    }

    fn sample() -> Checkpoint {
        Checkpoint {
            format_version: CHECKPOINT_FORMAT_VERSION,
            created_at: Utc::now(),
            generation: 3,
            next_seed: 42,
            evaluation_count: 17,
            benchmark: benchmark(),
            gene_names: gene_names(),
            population: vec![saved(1.0, vec![3, 4]), saved(2.0, vec![4, 3])],
            archive: vec![saved(1.0, vec![3, 4])],
            cache: vec![saved(1.0, vec![3, 4]), saved(2.0, vec![4, 3])],
            worst_observed: vec![Some(4), None],
            stats: Vec::new(),
        }
    }

    #[test]
    fn test_save_and_load_validated() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join(CHECKPOINT_FILE);
        let checkpoint = sample();

        checkpoint.save(&path).expect("save");
        let loaded = Checkpoint::load_validated(&path, &benchmark()).expect("load");
        assert_eq!(loaded, checkpoint);

        // Only the checkpoint itself remains after the atomic rename
        let files: Vec<_> = std::fs::read_dir(dir.path()).expect("read dir").collect();
        assert_eq!(files.len(), 1);
    }

    #[test]
    fn test_save_replaces_existing_checkpoint() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join(CHECKPOINT_FILE);
        let mut checkpoint = sample();
        checkpoint.save(&path).expect("first save");
        checkpoint.generation = 4;
        checkpoint.save(&path).expect("second save");
        assert_eq!(Checkpoint::load(&path).expect("load").generation, 4);
    }

    #[test]
    fn test_corrupt_file_is_checkpoint_error() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join(CHECKPOINT_FILE);
        std::fs::write(&path, "{ not json").expect("write");
        assert!(matches!(
            Checkpoint::load_validated(&path, &benchmark()),
            Err(AppError::Checkpoint(_))
        ));
    }

    #[test]
    fn test_missing_file_is_checkpoint_error() {
        let result = Checkpoint::load(Path::new("/nonexistent/checkpoint.json"));
        assert!(matches!(result, Err(AppError::Checkpoint(_))));
    }

    #[test]
    fn test_validation_failures() {
        let mut wrong_version = sample();
        wrong_version.format_version = 2;
        assert!(wrong_version.validate(&benchmark()).is_err());

        let mut wrong_genes = sample();
        wrong_genes.gene_names.pop();
        assert!(wrong_genes.validate(&benchmark()).is_err());

        assert!(sample().validate(&["light/a.png".to_string()]).is_err());

        let mut wrong_objectives = sample();
        wrong_objectives.cache.push(saved(3.0, vec![1]));
        assert!(wrong_objectives.validate(&benchmark()).is_err());

        let mut empty = sample();
        empty.population.clear();
        assert!(matches!(
            empty.validate(&benchmark()),
            Err(AppError::Checkpoint(_))
        ));
    }

    #[test]
    fn test_missing_worst_observed_defaults_to_empty() {
        let mut value = serde_json::to_value(sample()).expect("to value");
        value
            .as_object_mut()
            .expect("object")
            .remove("worst_observed");
        let checkpoint: Checkpoint = serde_json::from_value(value).expect("from value");
        assert!(checkpoint.worst_observed.is_empty());
    }

    #[test]
    fn test_saved_genome_round_trip() {
        let scored = ScoredGenome::new(FilterGenome::decode(&[7.5, 5.0]), vec![1, 2]);
        assert_eq!(SavedGenome::from(&scored).to_scored(), scored);
    }

    /// Genes reloaded from JSON keep their exact bits, so cache keys survive a resume.
    #[test]
    fn test_random_genomes_survive_json_bit_exact() {
        use rand::rngs::StdRng;
        use rand::SeedableRng;

        let mut rng = StdRng::seed_from_u64(2024);
        let mismatches = (0..5_000)
            .filter(|_| {
                let scored = ScoredGenome::new(FilterGenome::random(&mut rng), vec![1, 2]);
                let json = serde_json::to_string(&SavedGenome::from(&scored)).expect("serialise");
                let reloaded: SavedGenome = serde_json::from_str(&json).expect("deserialise");
                reloaded.to_scored().genome.key() != scored.genome.key()
            })
            .count();
        assert_eq!(mismatches, 0);
    }
}
