//! # Unified Application Configuration
//!
//! All settings of a tuning run in one structure: the run itself (corpus,
//! population, operators, penalties), the text-extraction collaborator and
//! logging. Loaded from environment variables (a `.env` file is honoured by
//! the binary through `dotenvy`) and validated before anything touches the
//! corpus.

use std::env;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::checkpoint::CHECKPOINT_FILE;
use crate::errors::{AppError, AppResult};
use crate::fitness::{PenaltyPolicy, DEFAULT_PENALTY, GROUND_TRUTH_FILE};
use crate::genome::GENE_COUNT;
use crate::observability_config::ObservabilityConfig;
use crate::ocr_config::{OcrBackend, OcrConfig, PageSegMode};
use crate::optimizer::operators::{
    DEFAULT_CROSSOVER_PROBABILITY, DEFAULT_MUTATION_ETA, DEFAULT_SBX_ETA,
};
use crate::optimizer::{
    PolynomialMutation, SimulatedBinaryCrossover, MAX_POPULATION_SIZE, MIN_POPULATION_SIZE,
};

pub const CATALOG_FILE: &str = "pareto_front.json";
pub const RUN_SUMMARY_FILE: &str = "run_summary.json";
pub const PROGRESS_LOG_FILE: &str = "progress.jsonl";

pub const MAX_GENERATIONS: u32 = 1000;
pub const MAX_WORKERS_LIMIT: usize = 256;

/// Settings of the optimisation run itself
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunConfig {
    /// Degraded corpus root, laid out as `{corpus}/{level}/{document_id}`
    pub corpus_dir: PathBuf,
    /// Pristine originals, `{pristine}/{document_id}`
    pub pristine_dir: PathBuf,
    /// Checkpoint, catalog, summary, progress log and ground truth land here
    pub output_dir: PathBuf,
    /// Explicit degradation levels; empty means discover from the corpus
    pub degradation_levels: Vec<String>,
    /// Explicit document ids; empty means every document present at all levels
    pub document_ids: Vec<String>,
    pub population_size: usize,
    pub generations: u32,
    /// Concurrent genome evaluations
    pub max_workers: usize,
    /// Seed of the first generation; random when unset
    pub random_seed: Option<u64>,
    /// Continue from an existing checkpoint in `output_dir`
    pub resume: bool,
    /// "fixed" or "worst+<margin>"
    pub penalty_policy: String,
    /// Penalty objective of the fixed policy and the fallback of the other
    pub penalty_value: u32,
    /// Generations whose slot failure rate exceeds this are flagged
    pub failure_flag_ratio: f64,
    pub sbx_eta: f64,
    pub crossover_probability: f64,
    pub mutation_eta: f64,
    pub mutation_probability: f64,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            corpus_dir: PathBuf::from("corpus/degraded"),
            pristine_dir: PathBuf::from("corpus/pristine"),
            output_dir: PathBuf::from("output"),
            degradation_levels: Vec::new(),
            document_ids: Vec::new(),
            population_size: 24,
            generations: 30,
            max_workers: default_max_workers(),
            random_seed: None,
            resume: true,
            penalty_policy: "fixed".to_string(),
            penalty_value: DEFAULT_PENALTY,
            failure_flag_ratio: 0.25,
            sbx_eta: DEFAULT_SBX_ETA,
            crossover_probability: DEFAULT_CROSSOVER_PROBABILITY,
            mutation_eta: DEFAULT_MUTATION_ETA,
            mutation_probability: 1.0 / GENE_COUNT as f64,
        }
    }
}

fn default_max_workers() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
        .min(MAX_WORKERS_LIMIT)
}

impl RunConfig {
    /// Validate run configuration
    pub fn validate(&self) -> AppResult<()> {
        for (name, dir) in [
            ("corpus_dir", &self.corpus_dir),
            ("pristine_dir", &self.pristine_dir),
            ("output_dir", &self.output_dir),
        ] {
            if dir.as_os_str().is_empty() {
                return Err(AppError::Config(format!("{} cannot be empty", name)));
            }
        }

        if !(MIN_POPULATION_SIZE..=MAX_POPULATION_SIZE).contains(&self.population_size) {
            return Err(AppError::Config(format!(
                "population_size ({}) must be between {} and {}",
                self.population_size, MIN_POPULATION_SIZE, MAX_POPULATION_SIZE
            )));
        }

        if self.generations == 0 || self.generations > MAX_GENERATIONS {
            return Err(AppError::Config(format!(
                "generations ({}) must be between 1 and {}",
                self.generations, MAX_GENERATIONS
            )));
        }

        if self.max_workers == 0 || self.max_workers > MAX_WORKERS_LIMIT {
            return Err(AppError::Config(format!(
                "max_workers ({}) must be between 1 and {}",
                self.max_workers, MAX_WORKERS_LIMIT
            )));
        }

        if self.penalty_value == 0 {
            return Err(AppError::Config(
                "penalty_value must be greater than 0".to_string(),
            ));
        }

        if !(self.failure_flag_ratio.is_finite() && (0.0..=1.0).contains(&self.failure_flag_ratio))
        {
            return Err(AppError::Config(format!(
                "failure_flag_ratio ({}) must be within [0, 1]",
                self.failure_flag_ratio
            )));
        }

        check_unique("degradation_levels", &self.degradation_levels)?;
        check_unique("document_ids", &self.document_ids)?;

        self.penalty()?;
        self.crossover()?;
        self.mutation()?;

        Ok(())
    }

    pub fn penalty(&self) -> AppResult<PenaltyPolicy> {
        PenaltyPolicy::parse(&self.penalty_policy, self.penalty_value)
    }

    pub fn crossover(&self) -> AppResult<SimulatedBinaryCrossover> {
        SimulatedBinaryCrossover::new(self.sbx_eta, self.crossover_probability)
    }

    pub fn mutation(&self) -> AppResult<PolynomialMutation> {
        PolynomialMutation::new(self.mutation_eta, self.mutation_probability)
    }

    pub fn checkpoint_path(&self) -> PathBuf {
        self.output_dir.join(CHECKPOINT_FILE)
    }

    pub fn catalog_path(&self) -> PathBuf {
        self.output_dir.join(CATALOG_FILE)
    }

    pub fn summary_path(&self) -> PathBuf {
        self.output_dir.join(RUN_SUMMARY_FILE)
    }

    pub fn progress_log_path(&self) -> PathBuf {
        self.output_dir.join(PROGRESS_LOG_FILE)
    }

    pub fn ground_truth_path(&self) -> PathBuf {
        self.output_dir.join(GROUND_TRUTH_FILE)
    }
}

fn check_unique(name: &str, values: &[String]) -> AppResult<()> {
    for (index, value) in values.iter().enumerate() {
        if value.trim().is_empty() {
            return Err(AppError::Config(format!("{} contains an empty entry", name)));
        }
        if values[..index].contains(value) {
            return Err(AppError::Config(format!(
                "{} contains '{}' more than once",
                name, value
            )));
        }
    }
    Ok(())
}

/// Unified application configuration
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AppConfig {
    /// Optimisation run configuration
    pub run: RunConfig,
    /// Text-extraction configuration
    pub ocr: OcrConfig,
    /// Observability configuration
    pub observability: ObservabilityConfig,
}

impl AppConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> AppResult<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration from any key/value source; unset keys keep their defaults.
    pub fn from_lookup<F>(lookup: F) -> AppResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        // Run configuration
        let run = &mut config.run;
        if let Some(dir) = lookup("CORPUS_DIR") {
            run.corpus_dir = PathBuf::from(dir);
        }
        if let Some(dir) = lookup("PRISTINE_DIR") {
            run.pristine_dir = PathBuf::from(dir);
        }
        if let Some(dir) = lookup("OUTPUT_DIR") {
            run.output_dir = PathBuf::from(dir);
        }
        if let Some(levels) = lookup("DEGRADATION_LEVELS") {
            run.degradation_levels = split_list(&levels);
        }
        if let Some(documents) = lookup("DOCUMENT_IDS") {
            run.document_ids = split_list(&documents);
        }
        run.population_size = parse_var(&lookup, "POPULATION_SIZE", run.population_size)?;
        run.generations = parse_var(&lookup, "GENERATIONS", run.generations)?;
        run.max_workers = parse_var(&lookup, "MAX_WORKERS", run.max_workers)?;
        run.random_seed = match lookup("RANDOM_SEED") {
            Some(seed) if !seed.trim().is_empty() => Some(seed.trim().parse().map_err(|_| {
                AppError::Config("RANDOM_SEED must be a valid number".to_string())
            })?),
            _ => None,
        };
        run.resume = lookup("RESUME")
            .unwrap_or_else(|| "true".to_string())
            .to_lowercase()
            == "true";
        if let Some(policy) = lookup("PENALTY_POLICY") {
            run.penalty_policy = policy;
        }
        run.penalty_value = parse_var(&lookup, "PENALTY_VALUE", run.penalty_value)?;
        run.failure_flag_ratio = parse_var(&lookup, "FAILURE_FLAG_RATIO", run.failure_flag_ratio)?;
        run.sbx_eta = parse_var(&lookup, "SBX_ETA", run.sbx_eta)?;
        run.crossover_probability =
            parse_var(&lookup, "CROSSOVER_PROBABILITY", run.crossover_probability)?;
        run.mutation_eta = parse_var(&lookup, "MUTATION_ETA", run.mutation_eta)?;
        run.mutation_probability =
            parse_var(&lookup, "MUTATION_PROBABILITY", run.mutation_probability)?;

        // OCR configuration
        let ocr = &mut config.ocr;
        if let Some(languages) = lookup("OCR_LANGUAGES") {
            ocr.languages = languages;
        }
        if let Some(psm) = lookup("OCR_PSM") {
            ocr.psm_mode = psm
                .trim()
                .parse::<u8>()
                .ok()
                .and_then(PageSegMode::from_number)
                .ok_or_else(|| {
                    AppError::Config("OCR_PSM must be a page segmentation mode from 0 to 13".to_string())
                })?;
        }
        ocr.recovery.operation_timeout_secs = parse_var(
            &lookup,
            "OCR_TIMEOUT_SECS",
            ocr.recovery.operation_timeout_secs,
        )?;
        ocr.recovery.max_retries = parse_var(&lookup, "OCR_MAX_RETRIES", ocr.recovery.max_retries)?;
        if let Some(backend) = lookup("OCR_BACKEND") {
            ocr.backend = OcrBackend::from_str(&backend)?;
        }
        if let Some(path) = lookup("TESSERACT_PATH") {
            ocr.tesseract_path = path;
        }

        // Observability configuration
        let observability = &mut config.observability;
        if let Some(environment) = lookup("ENVIRONMENT") {
            observability.environment = environment;
        }
        if let Some(level) = lookup("LOG_LEVEL") {
            observability.log_level = level;
        }
        if let Some(format) = lookup("LOG_FORMAT") {
            observability.log_format = format;
        }

        Ok(config)
    }

    /// Validate all configuration sections
    pub fn validate(&self) -> AppResult<()> {
        self.run.validate()?;
        self.ocr.validate()?;
        self.observability.validate()?;
        Ok(())
    }

    /// Get a summary of the current configuration for logging
    pub fn summary(&self) -> String {
        format!(
            "Configuration: corpus={}, output={}, population={}, generations={}, workers={}, seed={}, resume={}, penalty={}, ocr_backend={:?}, ocr_languages={}",
            self.run.corpus_dir.display(),
            self.run.output_dir.display(),
            self.run.population_size,
            self.run.generations,
            self.run.max_workers,
            self.run
                .random_seed
                .map(|seed| seed.to_string())
                .unwrap_or_else(|| "random".to_string()),
            self.run.resume,
            self.run.penalty_policy,
            self.ocr.backend,
            self.ocr.languages
        )
    }
}

fn parse_var<T, F>(lookup: &F, key: &str, default: T) -> AppResult<T>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        Some(value) => value
            .trim()
            .parse()
            .map_err(|_| AppError::Config(format!("{} must be a valid number", key))),
        None => Ok(default),
    }
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_default_config_validation() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.run.population_size, 24);
        assert_eq!(config.run.generations, 30);
        assert!(config.run.resume);
        assert_eq!(config.run.penalty().unwrap(), PenaltyPolicy::Fixed(9999));
    }

    #[test]
    #[allow(unused_assignments)]
    fn test_run_config_validation() {
        let mut config = RunConfig::default();

        config.population_size = 1;
        assert!(config.validate().is_err());
        config.population_size = 501;
        assert!(config.validate().is_err());
        config.population_size = 2;
        assert!(config.validate().is_ok());

        config.generations = 0;
        assert!(config.validate().is_err());
        config.generations = 1001;
        assert!(config.validate().is_err());
        config.generations = 1;

        config.max_workers = 0;
        assert!(config.validate().is_err());
        config.max_workers = 2;

        config.failure_flag_ratio = 1.5;
        assert!(config.validate().is_err());
        config.failure_flag_ratio = 0.25;

        config.penalty_policy = "cheapest".to_string();
        assert!(config.validate().is_err());
        config.penalty_policy = "worst+50".to_string();
        assert!(config.validate().is_ok());

        config.crossover_probability = 1.2;
        assert!(config.validate().is_err());
        config.crossover_probability = 0.9;

        config.mutation_eta = 0.0;
        assert!(config.validate().is_err());
        config.mutation_eta = 20.0;

        config.document_ids = vec!["a.png".to_string(), "a.png".to_string()];
        assert!(config.validate().is_err());
        config.document_ids.clear();

        config.output_dir = PathBuf::new();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_from_lookup_reads_every_section() {
        let config = AppConfig::from_lookup(lookup_from(&[
            ("CORPUS_DIR", "/data/degraded"),
            ("PRISTINE_DIR", "/data/pristine"),
            ("OUTPUT_DIR", "/data/out"),
            ("DEGRADATION_LEVELS", "light, heavy ,"),
            ("DOCUMENT_IDS", "a.png,b.png"),
            ("POPULATION_SIZE", "40"),
            ("GENERATIONS", "12"),
            ("MAX_WORKERS", "3"),
            ("RANDOM_SEED", "1234"),
            ("RESUME", "false"),
            ("PENALTY_POLICY", "worst+100"),
            ("PENALTY_VALUE", "5000"),
            ("OCR_LANGUAGES", "eng+fra"),
            ("OCR_PSM", "6"),
            ("OCR_TIMEOUT_SECS", "15"),
            ("OCR_MAX_RETRIES", "0"),
            ("OCR_BACKEND", "cli"),
            ("TESSERACT_PATH", "/usr/local/bin/tesseract"),
            ("LOG_LEVEL", "debug"),
            ("LOG_FORMAT", "pretty"),
        ]))
        .expect("config");

        assert_eq!(config.run.corpus_dir, PathBuf::from("/data/degraded"));
        assert_eq!(config.run.degradation_levels, vec!["light", "heavy"]);
        assert_eq!(config.run.document_ids, vec!["a.png", "b.png"]);
        assert_eq!(config.run.population_size, 40);
        assert_eq!(config.run.generations, 12);
        assert_eq!(config.run.max_workers, 3);
        assert_eq!(config.run.random_seed, Some(1234));
        assert!(!config.run.resume);
        assert_eq!(
            config.run.penalty().unwrap(),
            PenaltyPolicy::WorstObservedPlusMargin { margin: 100 }
        );
        assert_eq!(config.ocr.languages, "eng+fra");
        assert_eq!(config.ocr.psm_mode, PageSegMode::SingleBlock);
        assert_eq!(config.ocr.recovery.operation_timeout_secs, 15);
        assert_eq!(config.ocr.recovery.max_retries, 0);
        assert_eq!(config.ocr.tesseract_path, "/usr/local/bin/tesseract");
        assert_eq!(config.observability.log_level, "debug");
        assert!(config.validate().is_ok());
        assert_eq!(
            config.run.checkpoint_path(),
            PathBuf::from("/data/out/checkpoint.json")
        );
    }

    #[test]
    fn test_from_lookup_rejects_malformed_numbers() {
        for (key, value) in [
            ("POPULATION_SIZE", "many"),
            ("GENERATIONS", "-1"),
            ("RANDOM_SEED", "seed"),
            ("OCR_PSM", "42"),
            ("OCR_BACKEND", "cloud"),
        ] {
            let result = AppConfig::from_lookup(lookup_from(&[(key, value)]));
            assert!(matches!(result, Err(AppError::Config(_))), "{}", key);
        }
    }

    #[test]
    fn test_empty_seed_means_random() {
        let config = AppConfig::from_lookup(lookup_from(&[("RANDOM_SEED", " ")])).expect("config");
        assert_eq!(config.run.random_seed, None);
    }

    #[test]
    fn test_summary_mentions_key_settings() {
        let summary = AppConfig::default().summary();
        assert!(summary.contains("population=24"));
        assert!(summary.contains("seed=random"));
        assert!(summary.contains("penalty=fixed"));
    }
}
