//! # Test Helper Library
//!
//! Shared fixtures for the integration tests: stub text extractors, a small
//! synthetic corpus written to a temp directory, and run configurations that
//! point at it.

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};

use image::{GrayImage, Luma};
use ocr_filter_tuner::config::AppConfig;
use ocr_filter_tuner::ocr::{ExtractionHints, OcrError, TextExtractor};
use ocr_filter_tuner::preprocessing::quality::estimate_noise;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

pub const CELL: u32 = 8;

/// "Reads" an image as a grid of 8x8 cells: `#` for cells darker than the
/// image mean, `.` otherwise, one text line per cell row.
pub struct CellPatternExtractor;

impl TextExtractor for CellPatternExtractor {
    fn extract(&self, image_path: &Path, _hints: &ExtractionHints) -> Result<String, OcrError> {
        let image = image::open(image_path)
            .map_err(|e| OcrError::ImageLoad(e.to_string()))?
            .to_luma8();
        Ok(cell_pattern(&image))
    }

    fn name(&self) -> &str {
        "cell-pattern"
    }
}

pub fn cell_pattern(image: &GrayImage) -> String {
    let (width, height) = image.dimensions();
    let total: u64 = image.pixels().map(|p| u64::from(p[0])).sum();
    let mean = total as f64 / f64::from(width * height).max(1.0);

    let mut lines = Vec::new();
    for cy in 0..height / CELL {
        let mut line = String::new();
        for cx in 0..width / CELL {
            let mut sum = 0u64;
            for y in cy * CELL..(cy + 1) * CELL {
                for x in cx * CELL..(cx + 1) * CELL {
                    sum += u64::from(image.get_pixel(x, y)[0]);
                }
            }
            let cell_mean = sum as f64 / f64::from(CELL * CELL);
            line.push(if cell_mean < mean { '#' } else { '.' });
        }
        lines.push(line);
    }
    lines.join("\n")
}

/// Cell pattern followed by one `~` per four units of estimated noise, so
/// residual noise costs edits and denoising filters pay off.
pub struct NoiseAwareExtractor;

impl TextExtractor for NoiseAwareExtractor {
    fn extract(&self, image_path: &Path, _hints: &ExtractionHints) -> Result<String, OcrError> {
        let image = image::open(image_path)
            .map_err(|e| OcrError::ImageLoad(e.to_string()))?
            .to_luma8();
        let specks = (estimate_noise(&image) / 4.0).round() as usize;
        Ok(format!("{}\n{}", cell_pattern(&image), "~".repeat(specks)))
    }
}

/// Cell-pattern reader that counts its calls and can cancel a token once a
/// given number of calls has been made.
pub struct CountingExtractor {
    calls: AtomicUsize,
    cancel_at: Option<(usize, CancellationToken)>,
}

impl CountingExtractor {
    pub fn new() -> Self {
        Self {
            calls: AtomicUsize::new(0),
            cancel_at: None,
        }
    }

    pub fn cancelling_at(call: usize, token: CancellationToken) -> Self {
        Self {
            calls: AtomicUsize::new(0),
            cancel_at: Some((call, token)),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl TextExtractor for CountingExtractor {
    fn extract(&self, image_path: &Path, hints: &ExtractionHints) -> Result<String, OcrError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some((limit, token)) = &self.cancel_at {
            if call >= *limit {
                token.cancel();
            }
        }
        CellPatternExtractor.extract(image_path, hints)
    }
}

/// Reports only the image size, so every filter setting reads the same text.
pub struct DimensionExtractor;

impl TextExtractor for DimensionExtractor {
    fn extract(&self, image_path: &Path, _hints: &ExtractionHints) -> Result<String, OcrError> {
        let (width, height) = image::image_dimensions(image_path)
            .map_err(|e| OcrError::ImageLoad(e.to_string()))?;
        Ok(format!("page {} by {}", width, height))
    }
}

/// Succeeds for the first `successes` calls, then fails every call.
pub struct FlakyExtractor {
    calls: AtomicUsize,
    successes: usize,
}

impl FlakyExtractor {
    pub fn new(successes: usize) -> Self {
        Self {
            calls: AtomicUsize::new(0),
            successes,
        }
    }
}

impl TextExtractor for FlakyExtractor {
    fn extract(&self, image_path: &Path, hints: &ExtractionHints) -> Result<String, OcrError> {
        if self.calls.fetch_add(1, Ordering::SeqCst) < self.successes {
            DimensionExtractor.extract(image_path, hints)
        } else {
            Err(OcrError::Extraction("engine crashed".to_string()))
        }
    }
}

/// Blocky "document": dark text-like bars on a light page.
pub fn document_image(variant: u32) -> GrayImage {
    GrayImage::from_fn(64, 48, |x, y| {
        let bar = (y / CELL) % 2 == 1 && ((x / CELL) + variant) % 3 != 0;
        Luma([if bar { 40 } else { 215 }])
    })
}

/// Adds uniform noise of the given amplitude (seeded).
pub fn degrade(image: &GrayImage, amplitude: i32, seed: u64) -> GrayImage {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut degraded = image.clone();
    if amplitude == 0 {
        return degraded;
    }
    for pixel in degraded.pixels_mut() {
        let noise = rng.random_range(-amplitude..=amplitude);
        pixel[0] = (i32::from(pixel[0]) + noise).clamp(0, 255) as u8;
    }
    degraded
}

/// A corpus laid out as `{degraded}/{level}/{doc}.png` plus `{pristine}/{doc}.png`.
pub struct TestCorpus {
    pub root: TempDir,
    pub corpus_dir: PathBuf,
    pub pristine_dir: PathBuf,
    pub output_dir: PathBuf,
}

/// Writes `documents` pristine pages and one degraded copy per `(level, noise amplitude)`.
pub fn build_corpus(levels: &[(&str, i32)], documents: u32) -> TestCorpus {
    let root = tempfile::tempdir().expect("temp dir");
    let corpus_dir = root.path().join("degraded");
    let pristine_dir = root.path().join("pristine");
    let output_dir = root.path().join("output");
    std::fs::create_dir_all(&pristine_dir).expect("pristine dir");

    for doc in 0..documents {
        let name = format!("doc{}.png", doc);
        let page = document_image(doc);
        page.save(pristine_dir.join(&name)).expect("save pristine");

        for (index, (level, amplitude)) in levels.iter().enumerate() {
            let level_dir = corpus_dir.join(level);
            std::fs::create_dir_all(&level_dir).expect("level dir");
            degrade(&page, *amplitude, u64::from(doc) * 100 + index as u64)
                .save(level_dir.join(&name))
                .expect("save degraded");
        }
    }

    TestCorpus {
        root,
        corpus_dir,
        pristine_dir,
        output_dir,
    }
}

/// A small, seeded run over `corpus`.
pub fn test_config(corpus: &TestCorpus, population: usize, generations: u32, seed: u64) -> AppConfig {
    let mut config = AppConfig::default();
    config.run.corpus_dir = corpus.corpus_dir.clone();
    config.run.pristine_dir = corpus.pristine_dir.clone();
    config.run.output_dir = corpus.output_dir.clone();
    config.run.population_size = population;
    config.run.generations = generations;
    config.run.max_workers = 2;
    config.run.random_seed = Some(seed);
    config.ocr.recovery.max_retries = 0;
    config.ocr.recovery.operation_timeout_secs = 10;
    config
}
