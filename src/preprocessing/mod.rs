//! # Image Preprocessing Module
//!
//! Image quality measurement and the enhancement filters tuned by the optimizer.
//!
//! The module is organized into focused sub-modules:
//! - `quality`: spatial-domain quality metrics and the composite score
//! - `spectrum`: frequency-domain metrics over a downsampled 2-D DFT
//! - `filtering`: non-local-means denoising, CLAHE, bilateral filter, unsharp mask
//! - `types`: shared report types and error definitions

pub mod filtering;
pub mod quality;
pub mod spectrum;
pub mod types;

// Re-export commonly used types and functions for convenience
pub use types::{
    EnhancementStrength, PreprocessingError, QualityCategory, QualityReport, SpectrumReport,
};

pub use filtering::{apply_clahe, bilateral_filter, non_local_means, unsharp_mask};
pub use quality::{analyze, analyze_path};
pub use spectrum::analyze_spectrum;
