//! # OCR Processing Module
//!
//! This module wraps the external text-extraction collaborator. The optimizer
//! only ever sees the [`TextExtractor`] capability: an image path plus language
//! and layout hints in, raw text (or an [`OcrError`]) out. Engines are
//! substitutable, tests use in-memory stubs.
//!
//! ## Backends
//!
//! - [`TesseractCliExtractor`]: runs the `tesseract` binary and reads stdout
//! - `LepTessExtractor` (feature `leptess`): in-process Tesseract with pooled
//!   instances, see [`crate::instance_manager`]
//!
//! ## Timeouts and retries
//!
//! [`extract_with_recovery`] bounds every attempt with `tokio::time::timeout`
//! and retries retryable failures with exponential backoff plus jitter.
//! Engines running as a child process are driven asynchronously and killed
//! when the timeout drops them; in-process engines run on the blocking thread
//! pool and a timed-out call is abandoned there. Either way the caller moves
//! on and the slot is scored with the penalty objective.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::process::{Command, Output};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

pub use crate::ocr_config::{OcrBackend, OcrConfig, PageSegMode, RecoveryConfig};
pub use crate::ocr_errors::OcrError;
use crate::errors::{AppError, AppResult};

/// Language and layout hints handed to the engine with every image.
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractionHints {
    pub language: String,
    pub page_seg_mode: PageSegMode,
}

impl ExtractionHints {
    pub fn from_config(config: &OcrConfig) -> Self {
        Self {
            language: config.languages.clone(),
            page_seg_mode: config.psm_mode,
        }
    }
}

impl Default for ExtractionHints {
    fn default() -> Self {
        Self::from_config(&OcrConfig::default())
    }
}

/// Future returned by [`TextExtractor::extract_async`].
pub type ExtractionFuture<'a> = Pin<Box<dyn Future<Output = Result<String, OcrError>> + Send + 'a>>;

/// Opaque text extraction.
///
/// Implementations must not inspect or rely on engine confidence scores; only
/// the returned text is used. Returning `Ok` with an empty string is allowed,
/// the caller treats it like a failure.
pub trait TextExtractor: Send + Sync {
    fn extract(&self, image_path: &Path, hints: &ExtractionHints) -> Result<String, OcrError>;

    /// Non-blocking extraction for engines that run outside the process.
    ///
    /// Dropping the returned future must stop the engine. `None` (the default)
    /// means [`TextExtractor::extract`] runs on the blocking pool instead.
    fn extract_async<'a>(
        &'a self,
        _image_path: &'a Path,
        _hints: &'a ExtractionHints,
    ) -> Option<ExtractionFuture<'a>> {
        None
    }

    /// Short name used in logs.
    fn name(&self) -> &str {
        "custom"
    }
}

impl<T: TextExtractor + ?Sized> TextExtractor for Arc<T> {
    fn extract(&self, image_path: &Path, hints: &ExtractionHints) -> Result<String, OcrError> {
        (**self).extract(image_path, hints)
    }

    fn extract_async<'a>(
        &'a self,
        image_path: &'a Path,
        hints: &'a ExtractionHints,
    ) -> Option<ExtractionFuture<'a>> {
        (**self).extract_async(image_path, hints)
    }

    fn name(&self) -> &str {
        (**self).name()
    }
}

/// Validate image file path and basic properties before handing it to an engine
pub fn validate_image_path(image_path: &Path) -> Result<(), OcrError> {
    let display = image_path.display();

    if !image_path.exists() {
        return Err(OcrError::Validation(format!(
            "file does not exist ({})",
            display
        )));
    }

    if !image_path.is_file() {
        return Err(OcrError::Validation(format!(
            "path is not a file ({})",
            display
        )));
    }

    match image_path.metadata() {
        Ok(metadata) if metadata.len() == 0 => Err(OcrError::Validation(format!(
            "file is empty ({})",
            display
        ))),
        Ok(_) => Ok(()),
        Err(e) => Err(OcrError::Validation(format!(
            "cannot read file metadata ({}) - {}",
            display, e
        ))),
    }
}

/// Clean up raw engine output: trim lines and drop empty ones.
pub fn clean_extracted_text(raw: &str) -> String {
    raw.trim()
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect::<Vec<&str>>()
        .join("\n")
}

/// Text extraction through the `tesseract` command-line program.
#[derive(Debug, Clone)]
pub struct TesseractCliExtractor {
    binary: PathBuf,
}

impl TesseractCliExtractor {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    pub fn binary(&self) -> &Path {
        &self.binary
    }

    fn command(&self, image_path: &Path, hints: &ExtractionHints) -> Command {
        let mut command = Command::new(&self.binary);
        command
            .arg(image_path)
            .arg("stdout")
            .arg("-l")
            .arg(&hints.language)
            .arg("--psm")
            .arg(hints.page_seg_mode.as_str());
        command
    }

    fn launch_error(&self, e: std::io::Error) -> OcrError {
        OcrError::Initialization(format!(
            "failed to run {} (is it installed?): {}",
            self.binary.display(),
            e
        ))
    }

    fn read_output(output: &Output) -> Result<String, OcrError> {
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(OcrError::Extraction(format!(
                "tesseract exited with {}: {}",
                output.status,
                stderr.trim()
            )));
        }

        Ok(clean_extracted_text(&String::from_utf8_lossy(&output.stdout)))
    }
}

impl Default for TesseractCliExtractor {
    fn default() -> Self {
        Self::new(crate::ocr_config::DEFAULT_TESSERACT_BINARY)
    }
}

impl TextExtractor for TesseractCliExtractor {
    fn extract(&self, image_path: &Path, hints: &ExtractionHints) -> Result<String, OcrError> {
        validate_image_path(image_path)?;

        let output = self
            .command(image_path, hints)
            .output()
            .map_err(|e| self.launch_error(e))?;
        Self::read_output(&output)
    }

    fn extract_async<'a>(
        &'a self,
        image_path: &'a Path,
        hints: &'a ExtractionHints,
    ) -> Option<ExtractionFuture<'a>> {
        let mut command = tokio::process::Command::from(self.command(image_path, hints));
        command.kill_on_drop(true);

        Some(Box::pin(async move {
            validate_image_path(image_path)?;
            let output = command.output().await.map_err(|e| self.launch_error(e))?;
            Self::read_output(&output)
        }))
    }

    fn name(&self) -> &str {
        "tesseract-cli"
    }
}

/// Text extraction through in-process Tesseract instances.
#[cfg(feature = "leptess")]
pub struct LepTessExtractor {
    config: OcrConfig,
    instances: crate::instance_manager::OcrInstanceManager,
}

#[cfg(feature = "leptess")]
impl LepTessExtractor {
    pub fn new(config: OcrConfig) -> Self {
        Self {
            config,
            instances: crate::instance_manager::OcrInstanceManager::new(),
        }
    }
}

#[cfg(feature = "leptess")]
impl TextExtractor for LepTessExtractor {
    fn extract(&self, image_path: &Path, hints: &ExtractionHints) -> Result<String, OcrError> {
        validate_image_path(image_path)?;

        let instance = self
            .instances
            .get_instance(&hints.language, hints.page_seg_mode, self.config.model_type)
            .map_err(|e| OcrError::Initialization(e.to_string()))?;

        let mut tess = instance.lock();
        tess.set_image(image_path).map_err(|e| {
            OcrError::ImageLoad(format!("Failed to load image for OCR: {e}"))
        })?;
        let text = tess.get_utf8_text().map_err(|e| {
            OcrError::Extraction(format!("Failed to extract text from image: {e}"))
        })?;

        Ok(clean_extracted_text(&text))
    }

    fn name(&self) -> &str {
        "leptess"
    }
}

/// Build the extractor selected by configuration.
pub fn build_extractor(config: &OcrConfig) -> AppResult<Arc<dyn TextExtractor>> {
    match config.backend {
        OcrBackend::Cli => {
            info!(binary = %config.tesseract_path, "Using tesseract command-line backend");
            Ok(Arc::new(TesseractCliExtractor::new(&config.tesseract_path)))
        }
        #[cfg(feature = "leptess")]
        OcrBackend::LepTess => {
            info!(languages = %config.languages, "Using in-process leptess backend");
            Ok(Arc::new(LepTessExtractor::new(config.clone())))
        }
        #[cfg(not(feature = "leptess"))]
        OcrBackend::LepTess => Err(AppError::Config(
            "OCR backend 'leptess' requires building with the `leptess` feature".to_string(),
        )),
    }
}

/// Run one extraction with a timeout and bounded retries.
///
/// Returns the extracted text and the duration of the successful attempt.
/// Empty output is reported as [`OcrError::EmptyOutput`] so callers can treat
/// it exactly like an engine failure.
pub async fn extract_with_recovery(
    extractor: Arc<dyn TextExtractor>,
    image_path: &Path,
    hints: &ExtractionHints,
    recovery: &RecoveryConfig,
) -> Result<(String, Duration), OcrError> {
    let max_attempts = recovery.max_retries + 1;
    let mut attempt = 0;

    loop {
        attempt += 1;

        match perform_extraction(Arc::clone(&extractor), image_path, hints, recovery).await {
            Ok(result) => {
                crate::observability::record_ocr_metrics(true, result.1);
                return Ok(result);
            }
            Err(err) => {
                if attempt >= max_attempts || !err.is_retryable() {
                    crate::observability::record_ocr_metrics(false, Duration::ZERO);
                    return Err(err);
                }

                let delay_ms = calculate_retry_delay(attempt, recovery);
                debug!(
                    attempt,
                    delay_ms,
                    error = %err,
                    "OCR extraction attempt failed, retrying"
                );
                tokio::time::sleep(Duration::from_millis(delay_ms)).await;
            }
        }
    }
}

async fn perform_extraction(
    extractor: Arc<dyn TextExtractor>,
    image_path: &Path,
    hints: &ExtractionHints,
    recovery: &RecoveryConfig,
) -> Result<(String, Duration), OcrError> {
    let started = Instant::now();
    let timeout_duration = Duration::from_secs(recovery.operation_timeout_secs);

    let result = match extractor.extract_async(image_path, hints) {
        Some(future) => tokio::time::timeout(timeout_duration, future).await,
        None => {
            let blocking = Arc::clone(&extractor);
            let path = image_path.to_path_buf();
            let task_hints = hints.clone();
            let handle =
                tokio::task::spawn_blocking(move || blocking.extract(&path, &task_hints));
            tokio::time::timeout(timeout_duration, handle)
                .await
                .map(|joined| {
                    joined.unwrap_or_else(|join_err| {
                        Err(OcrError::Extraction(format!(
                            "extraction worker failed: {join_err}"
                        )))
                    })
                })
        }
    };
    let elapsed = started.elapsed();

    match result {
        Ok(Ok(text)) => {
            if text.trim().is_empty() {
                return Err(OcrError::EmptyOutput(format!(
                    "no text extracted from {}",
                    image_path.display()
                )));
            }
            debug!(
                duration_ms = elapsed.as_millis() as u64,
                characters = text.len(),
                "OCR processing completed"
            );
            Ok((text, elapsed))
        }
        Ok(Err(e)) => Err(e),
        Err(_) => {
            warn!(
                duration_ms = elapsed.as_millis() as u64,
                limit_secs = recovery.operation_timeout_secs,
                "OCR processing timed out"
            );
            Err(OcrError::Timeout(format!(
                "OCR operation timed out after {} seconds",
                recovery.operation_timeout_secs
            )))
        }
    }
}

/// Exponential backoff with jitter, capped at `max_retry_delay_ms`.
pub fn calculate_retry_delay(attempt: u32, recovery: &RecoveryConfig) -> u64 {
    #[allow(clippy::cast_precision_loss)]
    let base_delay = recovery.base_retry_delay_ms as f64;

    let exponential_delay = base_delay * 2.0_f64.powi(attempt.saturating_sub(1) as i32);

    #[allow(clippy::cast_precision_loss)]
    let delay = exponential_delay.min(recovery.max_retry_delay_ms as f64) as u64;

    // Jitter keeps concurrent workers from retrying in lockstep
    let jitter_range = delay / 4;
    if jitter_range == 0 {
        return delay;
    }
    delay + rand::random::<u64>() % jitter_range
}
