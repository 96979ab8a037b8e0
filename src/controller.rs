//! # Run Controller
//!
//! Drives one optimisation run end to end:
//!
//! 1. validate configuration, build the benchmark set and ground truth
//! 2. resume from the checkpoint, or sample and evaluate a first population
//! 3. per generation: offspring, evaluation barrier, survivor selection,
//!    archive update, statistics, checkpoint, cancellation check
//! 4. write the Pareto catalog and the run summary
//!
//! The controller is the only writer of the run's own files (checkpoint,
//! progress log, catalog, summary). Its evaluation counter and progress log
//! are plain fields, so several controllers can coexist in one process.

use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn, Instrument};

use crate::checkpoint::{Checkpoint, SavedGenome, CHECKPOINT_FORMAT_VERSION};
use crate::config::{AppConfig, RunConfig};
use crate::errors::{error_logging, AppError, AppResult};
use crate::fitness::{
    BenchmarkSet, Evaluation, EvaluatorSettings, FitnessEvaluator, GroundTruthStore,
};
use crate::genome::{gene_names, FilterParameters};
use crate::observability;
use crate::ocr::{build_extractor, ExtractionHints, TextExtractor};
use crate::optimizer::{
    Individual, OptimizerPhase, ParetoArchive, ParetoOptimizer, ScoredGenome,
};

/// Per-generation statistics, kept in checkpoints and the run summary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationStats {
    /// 0 is the initial population
    pub generation: u32,
    /// Genomes in the evaluated batch
    pub evaluations: usize,
    pub cache_hits: usize,
    /// Penalised slots among freshly evaluated genomes
    pub failed_slots: usize,
    pub failure_rate: f64,
    /// Failure rate above the configured ratio
    pub flagged: bool,
    pub best_total: Option<u64>,
    /// Archive size after the generation
    pub front_size: usize,
}

impl GenerationStats {
    pub fn from_batch(
        generation: u32,
        batch: &[Evaluation],
        slots: usize,
        archive: &ParetoArchive,
        flag_ratio: f64,
    ) -> Self {
        let cache_hits = batch.iter().filter(|e| e.cache_hit).count();
        let fresh = batch.len() - cache_hits;
        let failed_slots: usize = batch
            .iter()
            .filter(|e| !e.cache_hit)
            .map(|e| e.failures)
            .sum();
        let attempted = fresh * slots;
        let failure_rate = if attempted == 0 {
            0.0
        } else {
            failed_slots as f64 / attempted as f64
        };

        Self {
            generation,
            evaluations: batch.len(),
            cache_hits,
            failed_slots,
            failure_rate,
            flagged: failure_rate > flag_ratio,
            best_total: archive.best_total(),
            front_size: archive.len(),
        }
    }
}

/// One line of `progress.jsonl`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressEntry {
    pub timestamp: DateTime<Utc>,
    /// Run-wide evaluation counter, 1-based
    pub evaluation: u64,
    pub generation: u32,
    pub genome: String,
    pub cache_hit: bool,
    pub failures: usize,
    pub objectives: Vec<u32>,
}

/// Append-only JSON-lines sink for evaluation progress.
pub struct ProgressLog {
    path: PathBuf,
    writer: BufWriter<File>,
}

impl ProgressLog {
    /// Opens the log; `append` keeps earlier lines (resume), otherwise the file is truncated.
    pub fn open(path: &Path, append: bool) -> AppResult<Self> {
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .append(append)
            .truncate(!append)
            .open(path)
            .map_err(|e| {
                error_logging::log_filesystem_error(&e, "open_progress_log", path.to_str());
                AppError::from(e)
            })?;
        Ok(Self {
            path: path.to_path_buf(),
            writer: BufWriter::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn append(&mut self, entry: &ProgressEntry) -> AppResult<()> {
        serde_json::to_writer(&mut self.writer, entry)
            .map_err(|e| AppError::Internal(format!("Failed to serialise progress entry: {}", e)))?;
        self.writer.write_all(b"\n")?;
        Ok(())
    }

    pub fn flush(&mut self) -> AppResult<()> {
        self.writer.flush()?;
        Ok(())
    }

    /// Reads every entry of a progress log.
    pub fn read_entries(path: &Path) -> AppResult<Vec<ProgressEntry>> {
        let content = std::fs::read_to_string(path)?;
        content
            .lines()
            .filter(|line| !line.trim().is_empty())
            .map(|line| {
                serde_json::from_str(line).map_err(|e| {
                    AppError::Internal(format!("Corrupt progress line in {}: {}", path.display(), e))
                })
            })
            .collect()
    }
}

/// A genome of the final Pareto front with its objectives by name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogEntry {
    pub id: usize,
    pub genome: FilterParameters,
    /// Raw decoded gene values, in gene order
    pub genes: Vec<f64>,
    /// Edit distance per "level/document" slot
    pub objectives: BTreeMap<String, u32>,
    /// Summed edit distance per degradation level
    pub totals: BTreeMap<String, u64>,
    pub total_edits: u64,
}

/// The run's answer: every non-dominated genome, best total first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParetoCatalog {
    pub created_at: DateTime<Utc>,
    /// False when the run stopped early on cancellation
    pub completed: bool,
    pub generations_completed: u32,
    pub evaluation_count: u64,
    pub benchmark: Vec<String>,
    pub entries: Vec<CatalogEntry>,
}

impl ParetoCatalog {
    pub fn from_archive(
        archive: &ParetoArchive,
        benchmark: &BenchmarkSet,
        generations_completed: u32,
        evaluation_count: u64,
        completed: bool,
    ) -> Self {
        let mut members: Vec<&ScoredGenome> = archive.members().iter().collect();
        members.sort_by(|a, b| {
            a.total()
                .cmp(&b.total())
                .then_with(|| a.genome.key().cmp(&b.genome.key()))
        });

        let entries = members
            .into_iter()
            .enumerate()
            .map(|(id, member)| {
                let mut objectives = BTreeMap::new();
                let mut totals: BTreeMap<String, u64> = BTreeMap::new();
                for (slot, &value) in benchmark.slots().iter().zip(member.objectives.iter()) {
                    objectives.insert(slot.key(), value);
                    *totals.entry(slot.level.clone()).or_default() += u64::from(value);
                }
                CatalogEntry {
                    id,
                    genome: member.genome.parameters(),
                    genes: member.genome.values().to_vec(),
                    objectives,
                    totals,
                    total_edits: member.total(),
                }
            })
            .collect();

        Self {
            created_at: Utc::now(),
            completed,
            generations_completed,
            evaluation_count,
            benchmark: benchmark.keys(),
            entries,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn load(path: &Path) -> AppResult<Self> {
        let content = std::fs::read_to_string(path)?;
        serde_json::from_str(&content).map_err(|e| {
            AppError::Internal(format!("Corrupt catalog {}: {}", path.display(), e))
        })
    }
}

/// `run_summary.json`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub completed: bool,
    pub resumed_from_generation: Option<u32>,
    pub generations_completed: u32,
    pub evaluation_count: u64,
    pub cached_genomes: usize,
    pub penalty_policy: String,
    pub front_size: usize,
    pub best_total: Option<u64>,
    /// Best distance per slot over the whole front
    pub per_slot_best: BTreeMap<String, u32>,
    pub config: RunConfig,
    pub stats: Vec<GenerationStats>,
}

fn write_json<T: Serialize>(value: &T, path: &Path, operation: &str) -> AppResult<()> {
    let json = serde_json::to_string_pretty(value)
        .map_err(|e| AppError::Internal(format!("Failed to serialise {}: {}", operation, e)))?;
    std::fs::write(path, json).map_err(|e| {
        error_logging::log_filesystem_error(&e, operation, path.to_str());
        AppError::from(e)
    })
}

/// Mutable state of the generation loop.
struct RunState {
    generation: u32,
    next_seed: u64,
    population: Vec<Individual>,
    archive: ParetoArchive,
    stats: Vec<GenerationStats>,
    resumed_from: Option<u32>,
}

/// Owns one optimisation run.
pub struct RunController {
    config: AppConfig,
    extractor: Arc<dyn TextExtractor>,
    evaluation_count: u64,
    progress: Option<ProgressLog>,
}

impl RunController {
    /// Builds a controller with the extractor named by the OCR configuration.
    pub fn new(config: AppConfig) -> AppResult<Self> {
        let extractor = build_extractor(&config.ocr)?;
        Self::with_extractor(config, extractor)
    }

    /// Builds a controller around an existing extractor.
    pub fn with_extractor(config: AppConfig, extractor: Arc<dyn TextExtractor>) -> AppResult<Self> {
        config.validate().inspect_err(|e| {
            error_logging::log_config_error(e, "app_config", "controller_init");
        })?;
        Ok(Self {
            config,
            extractor,
            evaluation_count: 0,
            progress: None,
        })
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Genomes scored so far, cache hits included.
    pub fn evaluation_count(&self) -> u64 {
        self.evaluation_count
    }

    /// Runs the optimisation to completion or cancellation.
    ///
    /// Cancellation during a generation discards that generation's selection
    /// but not its work: the checkpoint of the previous generation is saved
    /// again with every genome scored so far in its cache, so a resume
    /// replays the generation without re-evaluating them. Either way the
    /// catalog and summary reflect the last completed generation, with
    /// `completed = false`.
    ///
    /// # Errors
    ///
    /// Configuration, ground-truth and checkpoint problems are fatal.
    /// [`AppError::Cancelled`] when cancelled before the initial population
    /// has been scored.
    pub async fn run(&mut self, cancel: &CancellationToken) -> AppResult<ParetoCatalog> {
        let started_at = Utc::now();
        let run = self.config.run.clone();

        std::fs::create_dir_all(&run.output_dir).map_err(|e| {
            error_logging::log_filesystem_error(&e, "create_output_dir", run.output_dir.to_str());
            AppError::from(e)
        })?;

        let benchmark =
            BenchmarkSet::discover(&run.corpus_dir, &run.degradation_levels, &run.document_ids)?;
        let span = observability::run_span(run.population_size, run.generations, benchmark.len());

        async move {
            info!(config = %self.config.summary(), "Starting optimisation run");
            let evaluator = self.build_evaluator(benchmark).await?;
            let mut optimizer =
                ParetoOptimizer::new(run.population_size, run.crossover()?, run.mutation()?)?;
            let keys = evaluator.benchmark().keys();
            let checkpoint_path = run.checkpoint_path();

            let mut state = if run.resume && checkpoint_path.exists() {
                let checkpoint = Checkpoint::load_validated(&checkpoint_path, &keys)?;
                self.restore(checkpoint, &evaluator, &mut optimizer)?
            } else {
                self.initialise(&evaluator, &mut optimizer, cancel).await?
            };

            let mut completed = true;
            while state.generation < run.generations {
                if cancel.is_cancelled() {
                    completed = false;
                    break;
                }
                let generation = state.generation + 1;
                let advanced = self
                    .advance(&mut state, &evaluator, &mut optimizer, cancel)
                    .instrument(observability::generation_span(generation))
                    .await;
                match advanced {
                    Ok(()) => {}
                    Err(AppError::Cancelled) => {
                        warn!(
                            generation,
                            cached = evaluator.cache().len(),
                            "Run cancelled mid-generation, keeping scored genomes for resume"
                        );
                        self.checkpoint(&state, &evaluator)
                            .save(&run.checkpoint_path())?;
                        completed = false;
                        break;
                    }
                    Err(e) => return Err(e),
                }
            }
            optimizer.terminate();

            self.finish(&state, &evaluator, started_at, completed)
        }
        .instrument(span)
        .await
    }

    async fn build_evaluator(&self, benchmark: BenchmarkSet) -> AppResult<FitnessEvaluator> {
        let run = &self.config.run;
        let hints = ExtractionHints::from_config(&self.config.ocr);
        let recovery = self.config.ocr.recovery.clone();

        let ground_truth = GroundTruthStore::load_or_build(
            &run.ground_truth_path(),
            Arc::clone(&self.extractor),
            &run.pristine_dir,
            &benchmark.document_ids(),
            &hints,
            &recovery,
        )
        .await?;

        FitnessEvaluator::new(
            benchmark,
            ground_truth,
            Arc::clone(&self.extractor),
            EvaluatorSettings {
                corpus_dir: run.corpus_dir.clone(),
                hints,
                recovery,
                penalty: run.penalty()?,
                max_workers: run.max_workers,
            },
        )
    }

    fn restore(
        &mut self,
        checkpoint: Checkpoint,
        evaluator: &FitnessEvaluator,
        optimizer: &mut ParetoOptimizer,
    ) -> AppResult<RunState> {
        evaluator.cache().import(checkpoint.cache.iter().map(|saved| {
            let scored = saved.to_scored();
            (scored.genome, scored.objectives)
        }));
        evaluator.penalties().restore(&checkpoint.worst_observed);

        let mut population: Vec<Individual> = checkpoint
            .population
            .iter()
            .map(|saved| Individual::from(saved.to_scored()))
            .collect();
        optimizer.rank_population(&mut population);
        let archive = ParetoArchive::from_entries(checkpoint.archive.iter().map(SavedGenome::to_scored));

        self.evaluation_count = checkpoint.evaluation_count;
        self.progress = Some(ProgressLog::open(&self.config.run.progress_log_path(), true)?);

        info!(
            generation = checkpoint.generation,
            population = population.len(),
            archive = archive.len(),
            cached = evaluator.cache().len(),
            "Resumed from checkpoint"
        );

        Ok(RunState {
            generation: checkpoint.generation,
            next_seed: checkpoint.next_seed,
            population,
            archive,
            stats: checkpoint.stats,
            resumed_from: Some(checkpoint.generation),
        })
    }

    async fn initialise(
        &mut self,
        evaluator: &FitnessEvaluator,
        optimizer: &mut ParetoOptimizer,
        cancel: &CancellationToken,
    ) -> AppResult<RunState> {
        self.evaluation_count = 0;
        self.progress = Some(ProgressLog::open(&self.config.run.progress_log_path(), false)?);

        let seed = self.config.run.random_seed.unwrap_or_else(rand::random);
        info!(seed, "Sampling initial population");
        let mut rng = StdRng::seed_from_u64(seed);
        let genomes = optimizer.initial_population(&mut rng);
        let next_seed: u64 = rng.random();

        optimizer.set_phase(OptimizerPhase::Evaluating);
        let batch = evaluator
            .evaluate_population(&genomes, cancel)
            .instrument(observability::generation_span(0))
            .await?;
        self.log_batch(0, &batch)?;

        let mut population: Vec<Individual> = batch
            .iter()
            .map(|e| Individual::new(e.genome, e.objectives.clone()))
            .collect();
        optimizer.rank_population(&mut population);

        let mut archive = ParetoArchive::new();
        archive.extend(batch.iter().map(|e| ScoredGenome::new(e.genome, e.objectives.clone())));

        let mut state = RunState {
            generation: 0,
            next_seed,
            population,
            archive,
            stats: Vec::new(),
            resumed_from: None,
        };
        self.close_generation(&mut state, &batch, evaluator)?;
        Ok(state)
    }

    async fn advance(
        &mut self,
        state: &mut RunState,
        evaluator: &FitnessEvaluator,
        optimizer: &mut ParetoOptimizer,
        cancel: &CancellationToken,
    ) -> AppResult<()> {
        let generation = state.generation + 1;
        let mut rng = StdRng::seed_from_u64(state.next_seed);
        let offspring = optimizer.make_offspring(&state.population, &mut rng);
        let next_seed: u64 = rng.random();

        optimizer.set_phase(OptimizerPhase::Evaluating);
        let batch = evaluator.evaluate_population(&offspring, cancel).await?;
        self.log_batch(generation, &batch)?;

        state
            .archive
            .extend(batch.iter().map(|e| ScoredGenome::new(e.genome, e.objectives.clone())));

        let mut pool = std::mem::take(&mut state.population);
        pool.extend(
            batch
                .iter()
                .map(|e| Individual::new(e.genome, e.objectives.clone())),
        );
        state.population = optimizer.select_survivors(pool);
        state.generation = generation;
        state.next_seed = next_seed;

        self.close_generation(state, &batch, evaluator)
    }

    /// Statistics, metrics and checkpoint for the generation just completed.
    fn close_generation(
        &mut self,
        state: &mut RunState,
        batch: &[Evaluation],
        evaluator: &FitnessEvaluator,
    ) -> AppResult<()> {
        let stats = GenerationStats::from_batch(
            state.generation,
            batch,
            evaluator.benchmark().len(),
            &state.archive,
            self.config.run.failure_flag_ratio,
        );
        observability::record_generation_metrics(
            stats.generation,
            stats.front_size,
            stats.failure_rate,
        );
        if stats.flagged {
            warn!(
                generation = stats.generation,
                failure_rate = stats.failure_rate,
                threshold = self.config.run.failure_flag_ratio,
                "Generation flagged: slot failure rate above threshold"
            );
        }
        info!(
            generation = stats.generation,
            evaluations = stats.evaluations,
            cache_hits = stats.cache_hits,
            failed_slots = stats.failed_slots,
            best_total = ?stats.best_total,
            front_size = stats.front_size,
            "Generation complete"
        );
        state.stats.push(stats);

        self.checkpoint(state, evaluator)
            .save(&self.config.run.checkpoint_path())
    }

    fn checkpoint(&self, state: &RunState, evaluator: &FitnessEvaluator) -> Checkpoint {
        Checkpoint {
            format_version: CHECKPOINT_FORMAT_VERSION,
            created_at: Utc::now(),
            generation: state.generation,
            next_seed: state.next_seed,
            evaluation_count: self.evaluation_count,
            benchmark: evaluator.benchmark().keys(),
            gene_names: gene_names(),
            population: state
                .population
                .iter()
                .map(|individual| SavedGenome::from(&individual.scored()))
                .collect(),
            archive: state.archive.members().iter().map(SavedGenome::from).collect(),
            cache: evaluator
                .cache()
                .export()
                .into_iter()
                .map(|(genome, objectives)| SavedGenome {
                    genes: genome.values().to_vec(),
                    objectives,
                })
                .collect(),
            worst_observed: evaluator.penalties().snapshot(),
            stats: state.stats.clone(),
        }
    }

    fn log_batch(&mut self, generation: u32, batch: &[Evaluation]) -> AppResult<()> {
        let Some(progress) = self.progress.as_mut() else {
            return Err(AppError::Internal("progress log is not open".to_string()));
        };
        for evaluation in batch {
            self.evaluation_count += 1;
            progress.append(&ProgressEntry {
                timestamp: Utc::now(),
                evaluation: self.evaluation_count,
                generation,
                genome: evaluation.genome.key().to_string(),
                cache_hit: evaluation.cache_hit,
                failures: evaluation.failures,
                objectives: evaluation.objectives.clone(),
            })?;
        }
        progress.flush()
    }

    fn finish(
        &mut self,
        state: &RunState,
        evaluator: &FitnessEvaluator,
        started_at: DateTime<Utc>,
        completed: bool,
    ) -> AppResult<ParetoCatalog> {
        let run = &self.config.run;
        if let Some(mut progress) = self.progress.take() {
            if let Err(e) = progress.flush() {
                error_logging::log_filesystem_error(&e, "flush_progress_log", progress.path().to_str());
            }
        }

        let catalog = ParetoCatalog::from_archive(
            &state.archive,
            evaluator.benchmark(),
            state.generation,
            self.evaluation_count,
            completed,
        );
        write_json(&catalog, &run.catalog_path(), "write_catalog")?;

        let per_slot_best = evaluator
            .benchmark()
            .keys()
            .into_iter()
            .zip(state.archive.per_objective_best())
            .collect();
        let summary = RunSummary {
            started_at,
            finished_at: Utc::now(),
            completed,
            resumed_from_generation: state.resumed_from,
            generations_completed: state.generation,
            evaluation_count: self.evaluation_count,
            cached_genomes: evaluator.cache().len(),
            penalty_policy: evaluator.penalties().policy().to_string(),
            front_size: state.archive.len(),
            best_total: state.archive.best_total(),
            per_slot_best,
            config: run.clone(),
            stats: state.stats.clone(),
        };
        write_json(&summary, &run.summary_path(), "write_run_summary")?;

        info!(
            completed,
            generations = state.generation,
            evaluations = self.evaluation_count,
            front_size = catalog.len(),
            best_total = ?summary.best_total,
            catalog = %run.catalog_path().display(),
            "Optimisation run finished"
        );
        Ok(catalog)
    }
}
