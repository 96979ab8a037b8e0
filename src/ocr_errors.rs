//! # OCR Error Types Module
//!
//! This module defines the error type returned by text-extraction collaborators.
//! Inside the fitness evaluator every variant is contained and turned into a
//! penalty objective for the affected benchmark slot.

/// Custom error types for OCR operations
#[derive(Debug, Clone, PartialEq)]
pub enum OcrError {
    /// File validation errors
    Validation(String),
    /// OCR engine initialization errors
    Initialization(String),
    /// Image loading errors
    ImageLoad(String),
    /// Text extraction errors
    Extraction(String),
    /// The engine ran but produced no text
    EmptyOutput(String),
    /// Timeout errors
    Timeout(String),
}

impl OcrError {
    /// Whether another attempt could plausibly succeed.
    ///
    /// Validation and initialization problems are deterministic, so retrying them
    /// only burns the timeout budget.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            OcrError::Extraction(_) | OcrError::Timeout(_) | OcrError::EmptyOutput(_)
        )
    }
}

impl std::fmt::Display for OcrError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OcrError::Validation(msg) => write!(f, "[VALIDATION] Image validation failed: {}", msg),
            OcrError::Initialization(msg) => write!(f, "[OCR_INIT] OCR engine initialization failed: {}", msg),
            OcrError::ImageLoad(msg) => write!(f, "[IMAGE_LOAD] Failed to load image for OCR processing: {}", msg),
            OcrError::Extraction(msg) => write!(f, "[OCR_EXTRACT] Text extraction from image failed: {}", msg),
            OcrError::EmptyOutput(msg) => write!(f, "[OCR_EMPTY] OCR returned no text: {}", msg),
            OcrError::Timeout(msg) => write!(f, "[OCR_TIMEOUT] OCR processing timed out: {}", msg),
        }
    }
}

impl std::error::Error for OcrError {}

impl From<anyhow::Error> for OcrError {
    fn from(err: anyhow::Error) -> Self {
        OcrError::Extraction(err.to_string())
    }
}
