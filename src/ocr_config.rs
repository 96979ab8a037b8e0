//! # OCR Configuration Module
//!
//! This module defines configuration structures for the text-extraction
//! collaborator: language and layout hints, backend selection, timeouts and
//! retry behaviour.

use crate::errors::{AppError, AppResult};

// Constants for OCR configuration
pub const DEFAULT_LANGUAGES: &str = "eng";
pub const DEFAULT_TESSERACT_BINARY: &str = "tesseract";
pub const DEFAULT_OPERATION_TIMEOUT_SECS: u64 = 60;

/// Retry and timeout behaviour for a single extraction.
///
/// A slot that still fails after `max_retries` additional attempts is scored
/// with the penalty objective; it never aborts the generation.
#[derive(Debug, Clone, PartialEq)]
pub struct RecoveryConfig {
    /// Additional attempts after the first one (0 disables retries)
    pub max_retries: u32,
    pub base_retry_delay_ms: u64,
    pub max_retry_delay_ms: u64,
    /// Hard limit for one extraction call
    pub operation_timeout_secs: u64,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            max_retries: 1,
            base_retry_delay_ms: 250,
            max_retry_delay_ms: 2000,
            operation_timeout_secs: DEFAULT_OPERATION_TIMEOUT_SECS,
        }
    }
}

impl RecoveryConfig {
    pub fn validate(&self) -> AppResult<()> {
        if self.max_retries > 10 {
            return Err(AppError::Config(format!(
                "max_retries ({}) must not exceed 10",
                self.max_retries
            )));
        }
        if self.base_retry_delay_ms == 0 {
            return Err(AppError::Config(
                "base_retry_delay_ms must be greater than 0".to_string(),
            ));
        }
        if self.max_retry_delay_ms < self.base_retry_delay_ms {
            return Err(AppError::Config(format!(
                "max_retry_delay_ms ({}) must be >= base_retry_delay_ms ({})",
                self.max_retry_delay_ms, self.base_retry_delay_ms
            )));
        }
        if self.operation_timeout_secs == 0 {
            return Err(AppError::Config(
                "operation_timeout_secs must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}

/// Tesseract page segmentation modes (the "layout-mode hint").
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum PageSegMode {
    OsdOnly = 0,
    AutoOsd = 1,
    AutoNoOsd = 2,
    #[default]
    Auto = 3,
    SingleColumn = 4,
    SingleBlockVert = 5,
    SingleBlock = 6,
    SingleLine = 7,
    SingleWord = 8,
    WordInCircle = 9,
    SingleChar = 10,
    SparseText = 11,
    SparseTextOsd = 12,
    RawLine = 13,
}

impl PageSegMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            PageSegMode::OsdOnly => "0",
            PageSegMode::AutoOsd => "1",
            PageSegMode::AutoNoOsd => "2",
            PageSegMode::Auto => "3",
            PageSegMode::SingleColumn => "4",
            PageSegMode::SingleBlockVert => "5",
            PageSegMode::SingleBlock => "6",
            PageSegMode::SingleLine => "7",
            PageSegMode::SingleWord => "8",
            PageSegMode::WordInCircle => "9",
            PageSegMode::SingleChar => "10",
            PageSegMode::SparseText => "11",
            PageSegMode::SparseTextOsd => "12",
            PageSegMode::RawLine => "13",
        }
    }

    /// Parses the numeric form used by `tesseract --psm`.
    pub fn from_number(value: u8) -> Option<Self> {
        let mode = match value {
            0 => PageSegMode::OsdOnly,
            1 => PageSegMode::AutoOsd,
            2 => PageSegMode::AutoNoOsd,
            3 => PageSegMode::Auto,
            4 => PageSegMode::SingleColumn,
            5 => PageSegMode::SingleBlockVert,
            6 => PageSegMode::SingleBlock,
            7 => PageSegMode::SingleLine,
            8 => PageSegMode::SingleWord,
            9 => PageSegMode::WordInCircle,
            10 => PageSegMode::SingleChar,
            11 => PageSegMode::SparseText,
            12 => PageSegMode::SparseTextOsd,
            13 => PageSegMode::RawLine,
            _ => return None,
        };
        Some(mode)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum ModelType {
    #[default]
    Fast,
    Best,
}

impl ModelType {
    pub fn tessdata_dir(&self) -> &'static str {
        match self {
            ModelType::Fast => "tessdata_fast",
            ModelType::Best => "tessdata_best",
        }
    }
}

/// Which text-extraction collaborator drives the evaluations.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum OcrBackend {
    /// Spawn the `tesseract` binary per image
    #[default]
    Cli,
    /// In-process Tesseract through leptess (requires the `leptess` feature)
    LepTess,
}

impl std::str::FromStr for OcrBackend {
    type Err = AppError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "cli" | "tesseract" => Ok(OcrBackend::Cli),
            "leptess" => Ok(OcrBackend::LepTess),
            other => Err(AppError::Config(format!(
                "Unknown OCR backend '{}'. Expected 'cli' or 'leptess'",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct OcrConfig {
    /// Language hint passed to the engine (Tesseract `-l` syntax, e.g. "eng+fra")
    pub languages: String,
    /// Layout-mode hint
    pub psm_mode: PageSegMode,
    pub model_type: ModelType,
    pub backend: OcrBackend,
    /// Binary used by the command-line backend
    pub tesseract_path: String,
    pub recovery: RecoveryConfig,
}

impl Default for OcrConfig {
    fn default() -> Self {
        Self {
            languages: DEFAULT_LANGUAGES.to_string(),
            psm_mode: PageSegMode::default(),
            model_type: ModelType::default(),
            backend: OcrBackend::default(),
            tesseract_path: DEFAULT_TESSERACT_BINARY.to_string(),
            recovery: RecoveryConfig::default(),
        }
    }
}

impl OcrConfig {
    pub fn validate(&self) -> AppResult<()> {
        if self.languages.trim().is_empty() {
            return Err(AppError::Config("languages cannot be empty".to_string()));
        }
        if self
            .languages
            .split('+')
            .any(|lang| lang.is_empty() || !lang.chars().all(|c| c.is_ascii_alphanumeric() || c == '_'))
        {
            return Err(AppError::Config(format!(
                "languages '{}' must be '+'-separated Tesseract language codes",
                self.languages
            )));
        }
        if self.backend == OcrBackend::Cli && self.tesseract_path.trim().is_empty() {
            return Err(AppError::Config(
                "tesseract_path cannot be empty for the cli backend".to_string(),
            ));
        }
        if self.backend == OcrBackend::LepTess && !cfg!(feature = "leptess") {
            return Err(AppError::Config(
                "OCR backend 'leptess' requires building with the `leptess` feature".to_string(),
            ));
        }

        self.recovery.validate()?;

        Ok(())
    }
}
