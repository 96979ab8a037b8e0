//! # Fitness Evaluation Module
//!
//! Scores filter genomes against a benchmark of degraded documents. For every
//! (degradation level, document) slot the genome's pipeline is applied to the
//! degraded scan, the result is run through the text extractor, and the edit
//! distance to the document's ground-truth text becomes one objective.
//!
//! Slot failures never abort an evaluation: they are logged, counted and
//! replaced by a penalty objective so the optimizer simply sees a bad genome.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use image::{DynamicImage, ImageFormat};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tempfile::{NamedTempFile, TempDir};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn, Instrument};

use crate::errors::{error_logging, AppError, AppResult};
use crate::genome::{FilterGenome, GenomeKey};
use crate::ocr::{extract_with_recovery, ExtractionHints, TextExtractor};
use crate::ocr_config::RecoveryConfig;
use crate::ocr_errors::OcrError;
use crate::observability;
use crate::text_processing::{levenshtein, normalize_text};

/// Edit distances, one per benchmark slot, in benchmark order. Lower is better.
pub type ObjectiveVector = Vec<u32>;

/// Penalty used when no better estimate is available.
pub const DEFAULT_PENALTY: u32 = 9999;

/// File extensions recognised as document images during corpus discovery.
pub const SUPPORTED_IMAGE_EXTENSIONS: [&str; 7] =
    ["png", "jpg", "jpeg", "tif", "tiff", "bmp", "webp"];

/// Name of the ground-truth cache file inside the output directory.
pub const GROUND_TRUTH_FILE: &str = "ground_truth.json";

/// One (degradation level, document) pair of the benchmark.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BenchmarkSlot {
    pub level: String,
    pub document_id: String,
}

impl BenchmarkSlot {
    pub fn new(level: impl Into<String>, document_id: impl Into<String>) -> Self {
        Self {
            level: level.into(),
            document_id: document_id.into(),
        }
    }

    /// `"{level}/{document_id}"`
    pub fn key(&self) -> String {
        format!("{}/{}", self.level, self.document_id)
    }

    /// Location of this slot's degraded scan under the corpus root.
    pub fn degraded_path(&self, corpus_dir: &Path) -> PathBuf {
        corpus_dir.join(&self.level).join(&self.document_id)
    }
}

/// Ordered benchmark slots, level-major.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BenchmarkSet {
    slots: Vec<BenchmarkSlot>,
}

impl BenchmarkSet {
    /// Builds the cross product of `levels` x `documents`.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Config`] when either list is empty.
    pub fn new(levels: &[String], documents: &[String]) -> AppResult<Self> {
        if levels.is_empty() || documents.is_empty() {
            return Err(AppError::Config(
                "Benchmark set is empty: at least one degradation level and one document are required"
                    .to_string(),
            ));
        }

        let slots = levels
            .iter()
            .flat_map(|level| {
                documents
                    .iter()
                    .map(move |doc| BenchmarkSlot::new(level.clone(), doc.clone()))
            })
            .collect();
        Ok(Self { slots })
    }

    /// Builds the benchmark from the corpus layout `{corpus}/{level}/{document_id}`.
    ///
    /// Explicit `levels` / `documents` take precedence; an empty list means
    /// "discover": every sub-directory is a level, and every supported image
    /// present under all levels is a document. Explicit documents must exist
    /// under every level.
    pub fn discover(corpus_dir: &Path, levels: &[String], documents: &[String]) -> AppResult<Self> {
        let levels = if levels.is_empty() {
            list_level_dirs(corpus_dir)?
        } else {
            levels.to_vec()
        };

        let documents = if documents.is_empty() {
            common_documents(corpus_dir, &levels)?
        } else {
            for level in &levels {
                for doc in documents {
                    let path = corpus_dir.join(level).join(doc);
                    if !path.is_file() {
                        return Err(AppError::Config(format!(
                            "Degraded image missing for slot {}/{}: {}",
                            level,
                            doc,
                            path.display()
                        )));
                    }
                }
            }
            documents.to_vec()
        };

        let set = Self::new(&levels, &documents)?;
        info!(
            corpus = %corpus_dir.display(),
            levels = levels.len(),
            documents = documents.len(),
            slots = set.len(),
            "Benchmark set built"
        );
        Ok(set)
    }

    pub fn slots(&self) -> &[BenchmarkSlot] {
        &self.slots
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Slot keys in benchmark order
    pub fn keys(&self) -> Vec<String> {
        self.slots.iter().map(BenchmarkSlot::key).collect()
    }

    /// Distinct levels in first-appearance order
    pub fn levels(&self) -> Vec<String> {
        let mut levels: Vec<String> = Vec::new();
        for slot in &self.slots {
            if !levels.contains(&slot.level) {
                levels.push(slot.level.clone());
            }
        }
        levels
    }

    /// Distinct documents in first-appearance order
    pub fn document_ids(&self) -> Vec<String> {
        let mut docs: Vec<String> = Vec::new();
        for slot in &self.slots {
            if !docs.contains(&slot.document_id) {
                docs.push(slot.document_id.clone());
            }
        }
        docs
    }
}

fn is_supported_image(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| SUPPORTED_IMAGE_EXTENSIONS.contains(&ext.to_lowercase().as_str()))
        .unwrap_or(false)
}

fn read_dir_sorted(dir: &Path) -> AppResult<Vec<PathBuf>> {
    let entries = std::fs::read_dir(dir).map_err(|e| {
        AppError::Config(format!("Cannot read corpus directory {}: {}", dir.display(), e))
    })?;
    let mut paths = Vec::new();
    for entry in entries {
        paths.push(entry?.path());
    }
    paths.sort();
    Ok(paths)
}

fn file_name(path: &Path) -> Option<String> {
    path.file_name()
        .and_then(|name| name.to_str())
        .map(str::to_string)
}

fn list_level_dirs(corpus_dir: &Path) -> AppResult<Vec<String>> {
    Ok(read_dir_sorted(corpus_dir)?
        .into_iter()
        .filter(|path| path.is_dir())
        .filter_map(|path| file_name(&path))
        .collect())
}

fn common_documents(corpus_dir: &Path, levels: &[String]) -> AppResult<Vec<String>> {
    let mut common: Option<Vec<String>> = None;
    for level in levels {
        let docs: Vec<String> = read_dir_sorted(&corpus_dir.join(level))?
            .into_iter()
            .filter(|path| path.is_file() && is_supported_image(path))
            .filter_map(|path| file_name(&path))
            .collect();

        common = Some(match common {
            None => docs,
            Some(existing) => existing.into_iter().filter(|d| docs.contains(d)).collect(),
        });
    }
    Ok(common.unwrap_or_default())
}

/// Normalised ground-truth text per document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GroundTruthStore {
    texts: BTreeMap<String, String>,
}

impl GroundTruthStore {
    /// Builds a store from already-known texts (normalised on insert).
    pub fn from_texts<I, K, V>(texts: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: AsRef<str>,
    {
        Self {
            texts: texts
                .into_iter()
                .map(|(doc, text)| (doc.into(), normalize_text(text.as_ref())))
                .collect(),
        }
    }

    pub fn get(&self, document_id: &str) -> Option<&str> {
        self.texts.get(document_id).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.texts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.texts.is_empty()
    }

    /// Documents of `documents` that have no ground truth yet.
    pub fn missing<'a>(&self, documents: &'a [String]) -> Vec<&'a String> {
        documents
            .iter()
            .filter(|doc| !self.texts.contains_key(doc.as_str()))
            .collect()
    }

    pub fn load(path: &Path) -> AppResult<Self> {
        let content = std::fs::read_to_string(path)?;
        serde_json::from_str(&content).map_err(|e| {
            AppError::GroundTruth(format!("Corrupt ground truth file {}: {}", path.display(), e))
        })
    }

    pub fn save(&self, path: &Path) -> AppResult<()> {
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| AppError::Internal(format!("Failed to serialise ground truth: {}", e)))?;
        std::fs::write(path, json).map_err(|e| {
            error_logging::log_filesystem_error(&e, "write_ground_truth", path.to_str());
            AppError::from(e)
        })
    }

    /// Runs the extractor on `{pristine_dir}/{document_id}` for every missing
    /// document and stores the normalised text.
    ///
    /// # Errors
    ///
    /// Any extraction failure is fatal: without ground truth no slot of that
    /// document can be scored.
    pub async fn extract_missing(
        &mut self,
        extractor: Arc<dyn TextExtractor>,
        pristine_dir: &Path,
        documents: &[String],
        hints: &ExtractionHints,
        recovery: &RecoveryConfig,
    ) -> AppResult<usize> {
        let missing: Vec<String> = self.missing(documents).into_iter().cloned().collect();
        for doc in &missing {
            let path = pristine_dir.join(doc);
            let (text, duration) =
                extract_with_recovery(Arc::clone(&extractor), &path, hints, recovery)
                    .await
                    .map_err(|e| {
                        AppError::GroundTruth(format!(
                            "Failed to extract ground truth for {} ({}): {}",
                            doc,
                            path.display(),
                            e
                        ))
                    })?;
            let normalized = normalize_text(&text);
            debug!(
                document = %doc,
                characters = normalized.chars().count(),
                duration_ms = duration.as_millis() as u64,
                "Ground truth extracted"
            );
            self.texts.insert(doc.clone(), normalized);
        }
        Ok(missing.len())
    }

    /// Loads `{output_dir}/ground_truth.json` when present, extracts whatever
    /// is missing and writes the file back if anything changed.
    pub async fn load_or_build(
        cache_path: &Path,
        extractor: Arc<dyn TextExtractor>,
        pristine_dir: &Path,
        documents: &[String],
        hints: &ExtractionHints,
        recovery: &RecoveryConfig,
    ) -> AppResult<Self> {
        let mut store = if cache_path.exists() {
            Self::load(cache_path)?
        } else {
            Self::default()
        };

        let added = store
            .extract_missing(extractor, pristine_dir, documents, hints, recovery)
            .await?;
        if added > 0 {
            store.save(cache_path)?;
        }

        info!(
            documents = documents.len(),
            extracted = added,
            path = %cache_path.display(),
            "Ground truth ready"
        );
        Ok(store)
    }
}

/// Objective vectors keyed by decoded genome.
#[derive(Debug, Default)]
pub struct EvaluationCache {
    entries: RwLock<HashMap<GenomeKey, (FilterGenome, ObjectiveVector)>>,
}

impl EvaluationCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, genome: &FilterGenome) -> Option<ObjectiveVector> {
        self.entries
            .read()
            .get(&genome.key())
            .map(|(_, objectives)| objectives.clone())
    }

    pub fn insert(&self, genome: FilterGenome, objectives: ObjectiveVector) {
        self.entries.write().insert(genome.key(), (genome, objectives));
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// All entries, ordered by genome key so exports are reproducible.
    pub fn export(&self) -> Vec<(FilterGenome, ObjectiveVector)> {
        let entries = self.entries.read();
        let mut exported: Vec<(GenomeKey, FilterGenome, ObjectiveVector)> = entries
            .iter()
            .map(|(key, (genome, objectives))| (*key, *genome, objectives.clone()))
            .collect();
        exported.sort_by(|a, b| a.0.cmp(&b.0));
        exported
            .into_iter()
            .map(|(_, genome, objectives)| (genome, objectives))
            .collect()
    }

    pub fn import<I>(&self, entries: I)
    where
        I: IntoIterator<Item = (FilterGenome, ObjectiveVector)>,
    {
        let mut map = self.entries.write();
        for (genome, objectives) in entries {
            map.insert(genome.key(), (genome, objectives));
        }
    }
}

/// How a failed slot is scored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PenaltyPolicy {
    /// A constant penalty for every failure
    Fixed(u32),
    /// Worst finite distance seen so far for the slot plus a margin;
    /// [`DEFAULT_PENALTY`] until the slot has scored once
    WorstObservedPlusMargin { margin: u32 },
}

impl Default for PenaltyPolicy {
    fn default() -> Self {
        PenaltyPolicy::Fixed(DEFAULT_PENALTY)
    }
}

impl PenaltyPolicy {
    /// Parses `fixed` or `worst+<margin>`; `fixed_value` is used by the fixed policy.
    pub fn parse(policy: &str, fixed_value: u32) -> AppResult<Self> {
        let policy = policy.trim().to_lowercase();
        if policy == "fixed" {
            return Ok(PenaltyPolicy::Fixed(fixed_value));
        }
        if let Some(margin) = policy.strip_prefix("worst+") {
            let margin = margin.parse::<u32>().map_err(|e| {
                AppError::Config(format!("Invalid penalty margin '{}': {}", margin, e))
            })?;
            return Ok(PenaltyPolicy::WorstObservedPlusMargin { margin });
        }
        Err(AppError::Config(format!(
            "Unknown penalty policy '{}' (expected 'fixed' or 'worst+<margin>')",
            policy
        )))
    }
}

impl fmt::Display for PenaltyPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PenaltyPolicy::Fixed(value) => write!(f, "fixed({})", value),
            PenaltyPolicy::WorstObservedPlusMargin { margin } => write!(f, "worst+{}", margin),
        }
    }
}

/// Applies a [`PenaltyPolicy`] and tracks the worst observed distance per slot.
#[derive(Debug)]
pub struct PenaltyTracker {
    policy: PenaltyPolicy,
    worst: RwLock<Vec<Option<u32>>>,
}

impl PenaltyTracker {
    pub fn new(policy: PenaltyPolicy, slot_count: usize) -> Self {
        Self {
            policy,
            worst: RwLock::new(vec![None; slot_count]),
        }
    }

    pub fn policy(&self) -> PenaltyPolicy {
        self.policy
    }

    /// Records a successful slot distance.
    pub fn observe(&self, slot: usize, distance: u32) {
        let mut worst = self.worst.write();
        if let Some(entry) = worst.get_mut(slot) {
            *entry = Some(entry.map_or(distance, |w| w.max(distance)));
        }
    }

    pub fn penalty_for(&self, slot: usize) -> u32 {
        match self.policy {
            PenaltyPolicy::Fixed(value) => value,
            PenaltyPolicy::WorstObservedPlusMargin { margin } => self
                .worst
                .read()
                .get(slot)
                .copied()
                .flatten()
                .map_or(DEFAULT_PENALTY, |w| w.saturating_add(margin)),
        }
    }

    /// Worst observed distances, for checkpoints
    pub fn snapshot(&self) -> Vec<Option<u32>> {
        self.worst.read().clone()
    }

    /// Restores worst observed distances; ignored when the slot count differs.
    pub fn restore(&self, worst: &[Option<u32>]) {
        let mut current = self.worst.write();
        if worst.len() == current.len() {
            current.copy_from_slice(worst);
        }
    }
}

/// Why a benchmark slot fell back to the penalty objective.
#[derive(Debug, Clone, PartialEq)]
pub enum SlotFailure {
    /// Degraded scan missing or undecodable
    ImageLoad(String),
    /// Enhanced image could not be written for the extractor
    TempFile(String),
    /// Extractor error, timeout or empty output
    Extraction(OcrError),
    /// Ground truth unavailable for the document
    MissingGroundTruth(String),
}

impl SlotFailure {
    /// Short label for metrics
    pub fn kind(&self) -> &'static str {
        match self {
            SlotFailure::ImageLoad(_) => "image_load",
            SlotFailure::TempFile(_) => "temp_file",
            SlotFailure::Extraction(OcrError::Timeout(_)) => "timeout",
            SlotFailure::Extraction(OcrError::EmptyOutput(_)) => "empty_output",
            SlotFailure::Extraction(_) => "extraction",
            SlotFailure::MissingGroundTruth(_) => "ground_truth",
        }
    }
}

impl fmt::Display for SlotFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SlotFailure::ImageLoad(msg) => write!(f, "image load failed: {}", msg),
            SlotFailure::TempFile(msg) => write!(f, "temporary image write failed: {}", msg),
            SlotFailure::Extraction(err) => write!(f, "{}", err),
            SlotFailure::MissingGroundTruth(doc) => write!(f, "no ground truth for {}", doc),
        }
    }
}

/// Result of scoring one genome.
#[derive(Debug, Clone, PartialEq)]
pub struct Evaluation {
    pub genome: FilterGenome,
    pub objectives: ObjectiveVector,
    /// Slots that received the penalty objective
    pub failures: usize,
    /// Served from the cache (or shared with an identical genome in the same batch)
    pub cache_hit: bool,
    pub duration: Duration,
}

impl Evaluation {
    pub fn total(&self) -> u64 {
        self.objectives.iter().map(|&v| u64::from(v)).sum()
    }
}

/// Runtime settings of a [`FitnessEvaluator`].
#[derive(Debug, Clone)]
pub struct EvaluatorSettings {
    pub corpus_dir: PathBuf,
    pub hints: ExtractionHints,
    pub recovery: RecoveryConfig,
    pub penalty: PenaltyPolicy,
    pub max_workers: usize,
}

struct EvaluatorInner {
    benchmark: BenchmarkSet,
    ground_truth: GroundTruthStore,
    extractor: Arc<dyn TextExtractor>,
    settings: EvaluatorSettings,
    penalties: PenaltyTracker,
    cache: EvaluationCache,
    work_dir: TempDir,
    semaphore: Arc<Semaphore>,
}

/// Scores genomes against a benchmark set, concurrently and with caching.
#[derive(Clone)]
pub struct FitnessEvaluator {
    inner: Arc<EvaluatorInner>,
}

impl FitnessEvaluator {
    /// # Errors
    ///
    /// [`AppError::GroundTruth`] when a benchmark document has no ground truth,
    /// [`AppError::FileSystem`] when the worker temp directory cannot be created.
    pub fn new(
        benchmark: BenchmarkSet,
        ground_truth: GroundTruthStore,
        extractor: Arc<dyn TextExtractor>,
        settings: EvaluatorSettings,
    ) -> AppResult<Self> {
        let documents = benchmark.document_ids();
        let missing = ground_truth.missing(&documents);
        if !missing.is_empty() {
            return Err(AppError::GroundTruth(format!(
                "No ground truth for documents: {:?}",
                missing
            )));
        }

        let work_dir = tempfile::Builder::new()
            .prefix("ocr-filter-eval-")
            .tempdir()?;
        let workers = settings.max_workers.max(1);

        debug!(
            work_dir = %work_dir.path().display(),
            workers,
            extractor = extractor.name(),
            penalty = %settings.penalty,
            "Fitness evaluator created"
        );

        Ok(Self {
            inner: Arc::new(EvaluatorInner {
                penalties: PenaltyTracker::new(settings.penalty, benchmark.len()),
                benchmark,
                ground_truth,
                extractor,
                settings,
                cache: EvaluationCache::new(),
                work_dir,
                semaphore: Arc::new(Semaphore::new(workers)),
            }),
        })
    }

    pub fn benchmark(&self) -> &BenchmarkSet {
        &self.inner.benchmark
    }

    pub fn cache(&self) -> &EvaluationCache {
        &self.inner.cache
    }

    pub fn penalties(&self) -> &PenaltyTracker {
        &self.inner.penalties
    }

    /// Directory holding the per-slot enhanced images while they are read.
    pub fn work_dir(&self) -> &Path {
        self.inner.work_dir.path()
    }

    /// Scores one genome, using the cache when possible.
    pub async fn evaluate(&self, genome: &FilterGenome) -> Evaluation {
        if let Some(objectives) = self.inner.cache.get(genome) {
            return cached_evaluation(*genome, objectives);
        }
        let evaluation = evaluate_uncached(Arc::clone(&self.inner), *genome, None).await;
        match evaluation {
            Ok(evaluation) => {
                self.inner
                    .cache
                    .insert(*genome, evaluation.objectives.clone());
                evaluation
            }
            // Unreachable without a cancellation token; score as all-penalty
            Err(_) => Evaluation {
                genome: *genome,
                objectives: (0..self.inner.benchmark.len())
                    .map(|slot| self.inner.penalties.penalty_for(slot))
                    .collect(),
                failures: self.inner.benchmark.len(),
                cache_hit: false,
                duration: Duration::ZERO,
            },
        }
    }

    /// Scores a batch of genomes and returns their evaluations in input order.
    ///
    /// Identical genomes are evaluated once; cached genomes are not evaluated
    /// at all. Distinct genomes run concurrently, bounded by `max_workers`.
    /// Returns only once every genome is scored.
    ///
    /// # Errors
    ///
    /// [`AppError::Cancelled`] when `cancel` fires before the batch completes.
    /// Genomes that finished scoring are still cached; the batch result is
    /// discarded.
    pub async fn evaluate_population(
        &self,
        genomes: &[FilterGenome],
        cancel: &CancellationToken,
    ) -> AppResult<Vec<Evaluation>> {
        let mut results: Vec<Option<Evaluation>> = vec![None; genomes.len()];
        let mut pending: HashMap<GenomeKey, Vec<usize>> = HashMap::new();
        let mut order: Vec<FilterGenome> = Vec::new();

        for (index, genome) in genomes.iter().enumerate() {
            if let Some(objectives) = self.inner.cache.get(genome) {
                results[index] = Some(cached_evaluation(*genome, objectives));
                continue;
            }
            let waiting = pending.entry(genome.key()).or_default();
            if waiting.is_empty() {
                order.push(*genome);
            }
            waiting.push(index);
        }

        debug!(
            batch = genomes.len(),
            unique_uncached = order.len(),
            "Evaluating population"
        );

        let mut tasks = JoinSet::new();
        for genome in order {
            let inner = Arc::clone(&self.inner);
            let token = cancel.clone();
            let span = observability::evaluation_span(&genome.key().to_string());
            tasks.spawn(
                async move {
                    let permit = Arc::clone(&inner.semaphore)
                        .acquire_owned()
                        .await
                        .map_err(|e| AppError::Internal(format!("worker pool closed: {}", e)))?;
                    let evaluation = evaluate_uncached(inner, genome, Some(&token)).await;
                    drop(permit);
                    evaluation
                }
                .instrument(span),
            );
        }

        let mut cancelled = false;
        while let Some(joined) = tasks.join_next().await {
            let evaluation = match joined {
                Ok(Ok(evaluation)) => evaluation,
                // Remaining tasks stop at their next slot; keep what finishes
                Ok(Err(AppError::Cancelled)) => {
                    cancelled = true;
                    continue;
                }
                Ok(Err(err)) => {
                    tasks.abort_all();
                    return Err(err);
                }
                Err(join_err) => {
                    tasks.abort_all();
                    return Err(AppError::from(join_err));
                }
            };

            self.inner
                .cache
                .insert(evaluation.genome, evaluation.objectives.clone());

            let indices = pending.remove(&evaluation.genome.key()).unwrap_or_default();
            for (position, index) in indices.into_iter().enumerate() {
                let mut entry = evaluation.clone();
                // Later duplicates in the same batch reuse the first evaluation
                entry.cache_hit = position > 0;
                results[index] = Some(entry);
            }
        }

        if cancelled || cancel.is_cancelled() {
            return Err(AppError::Cancelled);
        }

        results
            .into_iter()
            .enumerate()
            .map(|(index, result)| {
                result.ok_or_else(|| {
                    AppError::Internal(format!("genome {} was never evaluated", index))
                })
            })
            .collect()
    }
}

fn cached_evaluation(genome: FilterGenome, objectives: ObjectiveVector) -> Evaluation {
    observability::record_evaluation_metrics(true, 0, Duration::ZERO);
    Evaluation {
        genome,
        objectives,
        failures: 0,
        cache_hit: true,
        duration: Duration::ZERO,
    }
}

async fn evaluate_uncached(
    inner: Arc<EvaluatorInner>,
    genome: FilterGenome,
    cancel: Option<&CancellationToken>,
) -> AppResult<Evaluation> {
    let started = Instant::now();
    let genome_key = genome.key().to_string();
    let mut objectives = Vec::with_capacity(inner.benchmark.len());
    let mut failures = 0;

    for (index, slot) in inner.benchmark.slots().iter().enumerate() {
        if cancel.is_some_and(CancellationToken::is_cancelled) {
            return Err(AppError::Cancelled);
        }

        let slot_started = Instant::now();
        match score_slot(&inner, &genome, slot).await {
            Ok(distance) => {
                inner.penalties.observe(index, distance);
                objectives.push(distance);
            }
            Err(failure) => {
                let penalty = inner.penalties.penalty_for(index);
                error_logging::log_slot_failure(
                    &failure,
                    &slot.key(),
                    &genome_key,
                    penalty,
                    Some(slot_started.elapsed()),
                );
                observability::record_slot_failure(failure.kind());
                failures += 1;
                objectives.push(penalty);
            }
        }
    }

    let duration = started.elapsed();
    observability::record_evaluation_metrics(false, failures, duration);
    debug!(
        genome = %genome_key,
        failures,
        total = objectives.iter().map(|&v| u64::from(v)).sum::<u64>(),
        duration_ms = duration.as_millis() as u64,
        "Genome evaluated"
    );

    Ok(Evaluation {
        genome,
        objectives,
        failures,
        cache_hit: false,
        duration,
    })
}

async fn score_slot(
    inner: &EvaluatorInner,
    genome: &FilterGenome,
    slot: &BenchmarkSlot,
) -> Result<u32, SlotFailure> {
    let expected = inner
        .ground_truth
        .get(&slot.document_id)
        .ok_or_else(|| SlotFailure::MissingGroundTruth(slot.document_id.clone()))?
        .to_string();

    let source = slot.degraded_path(&inner.settings.corpus_dir);
    let work_dir = inner.work_dir.path().to_path_buf();
    let genome = *genome;

    // Filtering is CPU-bound; keep it off the async workers
    let enhanced = tokio::task::spawn_blocking(move || render_to_temp(&genome, &source, &work_dir))
        .await
        .map_err(|e| SlotFailure::TempFile(format!("filter worker failed: {}", e)))??;

    let extraction = extract_with_recovery(
        Arc::clone(&inner.extractor),
        enhanced.path(),
        &inner.settings.hints,
        &inner.settings.recovery,
    )
    .await;

    let temp_path = enhanced.path().display().to_string();
    if let Err(e) = enhanced.close() {
        error_logging::log_cleanup_failure(&e, Some(&temp_path));
    }

    let (text, _) = extraction.map_err(SlotFailure::Extraction)?;
    let distance = levenshtein(&expected, &normalize_text(&text));
    Ok(u32::try_from(distance).unwrap_or(u32::MAX))
}

/// Applies the genome to the degraded scan and writes the result as PNG to a
/// uniquely named file inside `work_dir`.
fn render_to_temp(
    genome: &FilterGenome,
    source: &Path,
    work_dir: &Path,
) -> Result<NamedTempFile, SlotFailure> {
    let enhanced = genome
        .apply_path(source)
        .map_err(|e| SlotFailure::ImageLoad(e.to_string()))?;

    let mut file = tempfile::Builder::new()
        .prefix("slot-")
        .suffix(".png")
        .tempfile_in(work_dir)
        .map_err(|e| SlotFailure::TempFile(e.to_string()))?;

    DynamicImage::ImageLuma8(enhanced)
        .write_to(file.as_file_mut(), ImageFormat::Png)
        .map_err(|e| SlotFailure::TempFile(e.to_string()))?;

    if let Err(e) = std::io::Write::flush(file.as_file_mut()) {
        warn!(error = %e, "Failed to flush enhanced image");
    }
    Ok(file)
}
