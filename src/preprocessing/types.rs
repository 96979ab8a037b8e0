//! # Shared Types for Image Preprocessing
//!
//! This module contains the shared types, structs, and enums used across
//! the preprocessing sub-modules.

use serde::{Deserialize, Serialize};

/// Errors that can occur during image preprocessing operations.
#[derive(Debug, Clone, PartialEq)]
pub enum PreprocessingError {
    /// Image processing operation failed
    ProcessingFailed { message: String },
    /// Failed to load or decode image
    ImageLoad { message: String },
}

impl std::fmt::Display for PreprocessingError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PreprocessingError::ProcessingFailed { message } => {
                write!(f, "Image processing failed: {}", message)
            }
            PreprocessingError::ImageLoad { message } => {
                write!(f, "Failed to load image: {}", message)
            }
        }
    }
}

impl std::error::Error for PreprocessingError {}

impl From<image::ImageError> for PreprocessingError {
    fn from(err: image::ImageError) -> Self {
        PreprocessingError::ImageLoad {
            message: err.to_string(),
        }
    }
}

/// Document quality classifications, best first.
///
/// The derived ordering follows declaration order, so `Pristine < Good < ... <
/// VeryPoor` and a higher score never maps to a greater (worse) category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum QualityCategory {
    Pristine,
    Good,
    Fair,
    Poor,
    VeryPoor,
}

/// How hard the enhancement pipeline should push for a document of a given quality.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnhancementStrength {
    None,
    Light,
    Moderate,
    Strong,
    Aggressive,
}

/// Frequency-domain descriptors of a grayscale image.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct SpectrumReport {
    /// Power inside the low-frequency disk (DC included)
    pub low_freq_energy: f64,
    /// Power outside the low-frequency disk
    pub high_freq_energy: f64,
    /// high / total, 0 for an all-zero spectrum
    pub high_freq_ratio: f64,
    pub low_freq_percent: f64,
    pub high_freq_percent: f64,
    /// Distance of the strongest non-DC peak from DC, normalised by min(w, h) / 2.
    /// Large isolated peaks flag periodic scan artifacts (moire, halftone).
    pub dominant_frequency_distance: f64,
    /// Shannon entropy (bits) of the normalised power spectrum
    pub spectral_entropy: f64,
}

/// Objective image-quality descriptors for one image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityReport {
    /// Variance of the Laplacian
    pub sharpness: f64,
    /// Robust Gaussian sigma estimate of the noise
    pub noise: f64,
    pub contrast_rms: f64,
    pub contrast_michelson: f64,
    pub brightness_mean: f64,
    pub brightness_median: f64,
    pub brightness_std: f64,
    pub spectral_entropy: f64,
    pub high_freq_ratio: f64,
    pub spectrum: SpectrumReport,
    /// Shannon entropy (bits) of the 256-bin intensity histogram
    pub histogram_entropy: f64,
    /// p99 - p1 of intensities
    pub dynamic_range: f64,
    /// Composite score in [0, 100]
    pub quality_score: f64,
    pub category: QualityCategory,
    pub recommended_strength: EnhancementStrength,
}
