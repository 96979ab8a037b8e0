//! # Application Error Types
//!
//! This module defines the run-level error type used throughout the optimizer.
//! Per-evaluation failures never reach this type: they are converted to penalty
//! objectives inside the fitness evaluator. What remains here is what the
//! operator has to act on (configuration, checkpoint corruption, I/O on the
//! run's own files, cancellation).

use std::fmt;

/// General application error type for consistent error handling
#[derive(Debug, Clone, PartialEq)]
pub enum AppError {
    /// Configuration validation errors (invalid bounds, empty benchmark set, ...)
    Config(String),
    /// Unreadable, incompatible or inconsistent checkpoint on resume
    Checkpoint(String),
    /// Ground-truth text could not be established for a document
    GroundTruth(String),
    /// OCR collaborator errors that are fatal in their context
    Ocr(String),
    /// File system errors on files owned by the run controller
    FileSystem(String),
    /// Run was cancelled cooperatively
    Cancelled,
    /// Internal application errors
    Internal(String),
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::Config(msg) => write!(f, "[CONFIG] {}", msg),
            AppError::Checkpoint(msg) => write!(f, "[CHECKPOINT] {}", msg),
            AppError::GroundTruth(msg) => write!(f, "[GROUND_TRUTH] {}", msg),
            AppError::Ocr(msg) => write!(f, "[OCR] {}", msg),
            AppError::FileSystem(msg) => write!(f, "[FILESYSTEM] {}", msg),
            AppError::Cancelled => write!(f, "[CANCELLED] Run cancelled"),
            AppError::Internal(msg) => write!(f, "[INTERNAL] {}", msg),
        }
    }
}

impl std::error::Error for AppError {}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::Internal(err.to_string())
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::FileSystem(err.to_string())
    }
}

impl From<crate::ocr_errors::OcrError> for AppError {
    fn from(err: crate::ocr_errors::OcrError) -> Self {
        AppError::Ocr(err.to_string())
    }
}

impl From<tokio::task::JoinError> for AppError {
    fn from(err: tokio::task::JoinError) -> Self {
        AppError::Internal(format!("worker task failed: {}", err))
    }
}

/// Result type alias for convenience
pub type AppResult<T> = Result<T, AppError>;

/// Standardized error logging utilities for consistent error reporting across the application
pub mod error_logging {
    use tracing::{error, warn};

    /// Log a benchmark slot that degraded to a penalty objective
    pub fn log_slot_failure(
        error: &impl std::fmt::Display,
        slot: &str,
        genome_key: &str,
        penalty: u32,
        processing_duration: Option<std::time::Duration>,
    ) {
        warn!(
            error = %error,
            slot = %slot,
            genome = %genome_key,
            penalty = penalty,
            processing_duration_ms = ?processing_duration.map(|d| d.as_millis()),
            "Evaluation slot failed, penalty objective assigned"
        );
    }

    /// Log file system errors with path and operation context
    pub fn log_filesystem_error(
        error: &impl std::fmt::Display,
        operation: &str,
        path: Option<&str>,
    ) {
        error!(
            error = %error,
            operation = %operation,
            path = ?path,
            "File system operation failed"
        );
    }

    /// Log a transient file that could not be removed (stale artifacts only cost disk)
    pub fn log_cleanup_failure(error: &impl std::fmt::Display, path: Option<&str>) {
        warn!(
            error = %error,
            path = ?path,
            "Failed to remove transient file"
        );
    }

    /// Log checkpoint errors during resume or persistence
    pub fn log_checkpoint_error(error: &impl std::fmt::Display, path: &str, operation: &str) {
        error!(
            error = %error,
            path = %path,
            operation = %operation,
            "Checkpoint operation failed"
        );
    }

    /// Log configuration errors during startup/initialization
    pub fn log_config_error(error: &impl std::fmt::Display, config_key: &str, operation: &str) {
        error!(
            error = %error,
            config_key = %config_key,
            operation = %operation,
            "Configuration error"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_prefixes() {
        assert_eq!(
            AppError::Config("empty benchmark set".to_string()).to_string(),
            "[CONFIG] empty benchmark set"
        );
        assert_eq!(
            AppError::Checkpoint("bad version".to_string()).to_string(),
            "[CHECKPOINT] bad version"
        );
        assert_eq!(AppError::Cancelled.to_string(), "[CANCELLED] Run cancelled");
    }

    #[test]
    fn test_io_error_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        let err: AppError = io.into();
        assert!(matches!(err, AppError::FileSystem(msg) if msg.contains("missing")));
    }

    #[test]
    fn test_ocr_error_conversion() {
        let err: AppError = crate::ocr_errors::OcrError::Timeout("60s".to_string()).into();
        assert!(matches!(err, AppError::Ocr(msg) if msg.contains("OCR_TIMEOUT")));
    }
}
