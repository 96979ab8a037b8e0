//! # OCR Filter Tuner
//!
//! Multi-objective tuning of an image-enhancement pipeline (denoise, CLAHE,
//! bilateral filter, unsharp mask) so that a text-recognition engine reads
//! degraded scans as closely as possible to their pristine originals, across
//! several documents and degradation levels at once.

pub mod checkpoint;
pub mod config;
pub mod controller;
pub mod errors;
pub mod fitness;
pub mod genome;
#[cfg(feature = "leptess")]
pub mod instance_manager;
pub mod observability;
pub mod observability_config;
pub mod ocr;
pub mod ocr_config;
pub mod ocr_errors;
pub mod optimizer;
pub mod preprocessing;
pub mod text_processing;

// Re-export types for easier access
pub use config::AppConfig;
pub use controller::{ParetoCatalog, RunController};
pub use errors::{AppError, AppResult};
pub use fitness::FitnessEvaluator;
pub use genome::FilterGenome;
pub use optimizer::ParetoOptimizer;
