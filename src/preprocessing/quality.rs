//! # Image Quality Assessment Module
//!
//! Objective quality descriptors for scanned documents: sharpness, noise,
//! contrast, brightness and frequency-domain statistics, folded into a 0-100
//! score with a category and a recommended enhancement strength.
//!
//! Everything here is a pure function of the pixel buffer, so repeated calls
//! on the same image always produce an identical [`QualityReport`].

use std::path::Path;

use image::{DynamicImage, GrayImage};
use imageproc::filter::median_filter;
use tracing;

use super::spectrum::analyze_spectrum;
use super::types::{EnhancementStrength, PreprocessingError, QualityCategory, QualityReport};

/// Scale from median absolute deviation to a Gaussian sigma.
const MAD_TO_SIGMA: f64 = 0.6745;

/// Assesses the quality of an image file.
///
/// # Errors
///
/// Returns [`PreprocessingError::ImageLoad`] when the file cannot be opened or
/// decoded. There are no other failure states.
pub fn analyze_path(path: &Path) -> Result<QualityReport, PreprocessingError> {
    let image = image::open(path).map_err(|e| PreprocessingError::ImageLoad {
        message: format!("{}: {}", path.display(), e),
    })?;
    Ok(analyze(&image))
}

/// Assesses the quality of a decoded image.
///
/// # Examples
///
/// ```
/// use image::{DynamicImage, GrayImage, Luma};
/// use ocr_filter_tuner::preprocessing::{analyze, QualityCategory};
///
/// let flat = DynamicImage::ImageLuma8(GrayImage::from_pixel(64, 64, Luma([128])));
/// let report = analyze(&flat);
/// assert!(report.quality_score <= 100.0);
/// assert!(report.category >= QualityCategory::Fair);
/// ```
pub fn analyze(image: &DynamicImage) -> QualityReport {
    let start_time = std::time::Instant::now();

    let gray = image.to_luma8();

    let sharpness = laplacian_variance(&gray);
    let noise = estimate_noise(&gray);
    let stats = IntensityStats::from_image(&gray);
    let spectrum = analyze_spectrum(&gray);

    let quality_score = composite_score(
        sharpness,
        noise,
        stats.std,
        stats.histogram_entropy,
        stats.dynamic_range,
    );
    let (category, recommended_strength) = classify_score(quality_score);

    tracing::debug!(
        target: "ocr_preprocessing",
        duration_ms = start_time.elapsed().as_millis() as u64,
        sharpness,
        noise,
        contrast_rms = stats.std,
        quality_score,
        category = ?category,
        "Quality assessment completed"
    );

    QualityReport {
        sharpness,
        noise,
        contrast_rms: stats.std,
        contrast_michelson: stats.michelson,
        brightness_mean: stats.mean,
        brightness_median: stats.median,
        brightness_std: stats.std,
        spectral_entropy: spectrum.spectral_entropy,
        high_freq_ratio: spectrum.high_freq_ratio,
        spectrum,
        histogram_entropy: stats.histogram_entropy,
        dynamic_range: stats.dynamic_range,
        quality_score,
        category,
        recommended_strength,
    }
}

/// Variance of the 4-neighbour Laplacian over interior pixels.
///
/// Images smaller than 3x3 have no interior and report 0.
pub fn laplacian_variance(image: &GrayImage) -> f64 {
    let (width, height) = image.dimensions();
    if width < 3 || height < 3 {
        return 0.0;
    }

    let mut sum = 0.0;
    let mut sum_sq = 0.0;
    let mut count = 0.0;

    for y in 1..height - 1 {
        for x in 1..width - 1 {
            // Laplacian kernel: [[0, 1, 0], [1, -4, 1], [0, 1, 0]]
            let center = f64::from(image.get_pixel(x, y)[0]);
            let top = f64::from(image.get_pixel(x, y - 1)[0]);
            let bottom = f64::from(image.get_pixel(x, y + 1)[0]);
            let left = f64::from(image.get_pixel(x - 1, y)[0]);
            let right = f64::from(image.get_pixel(x + 1, y)[0]);

            let laplacian = top + bottom + left + right - 4.0 * center;
            sum += laplacian;
            sum_sq += laplacian * laplacian;
            count += 1.0;
        }
    }

    let mean = sum / count;
    (sum_sq / count - mean * mean).max(0.0)
}

/// Robust noise sigma: MAD of (image - median3x3(image)) / 0.6745.
///
/// The median residual ignores edges that a mean-based estimate would count
/// as noise.
pub fn estimate_noise(image: &GrayImage) -> f64 {
    if image.width() == 0 || image.height() == 0 {
        return 0.0;
    }

    let smoothed = median_filter(image, 1, 1);
    let mut residuals: Vec<f64> = image
        .pixels()
        .zip(smoothed.pixels())
        .map(|(orig, med)| f64::from(orig[0]) - f64::from(med[0]))
        .collect();

    let center = median_in_place(&mut residuals);
    let mut deviations: Vec<f64> = residuals.iter().map(|r| (r - center).abs()).collect();
    median_in_place(&mut deviations) / MAD_TO_SIGMA
}

fn median_in_place(values: &mut [f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.sort_unstable_by(f64::total_cmp);
    let mid = values.len() / 2;
    if values.len() % 2 == 0 {
        (values[mid - 1] + values[mid]) / 2.0
    } else {
        values[mid]
    }
}

/// Histogram-derived intensity statistics.
#[derive(Debug, Clone, Copy, PartialEq)]
struct IntensityStats {
    mean: f64,
    median: f64,
    std: f64,
    michelson: f64,
    histogram_entropy: f64,
    dynamic_range: f64,
}

impl IntensityStats {
    fn from_image(image: &GrayImage) -> Self {
        let mut histogram = [0u64; 256];
        for pixel in image.pixels() {
            histogram[pixel[0] as usize] += 1;
        }
        Self::from_histogram(&histogram)
    }

    fn from_histogram(histogram: &[u64; 256]) -> Self {
        let total: u64 = histogram.iter().sum();
        if total == 0 {
            return Self {
                mean: 0.0,
                median: 0.0,
                std: 0.0,
                michelson: 0.0,
                histogram_entropy: 0.0,
                dynamic_range: 0.0,
            };
        }
        let n = total as f64;

        let mean = histogram
            .iter()
            .enumerate()
            .map(|(v, &c)| v as f64 * c as f64)
            .sum::<f64>()
            / n;
        let variance = histogram
            .iter()
            .enumerate()
            .map(|(v, &c)| (v as f64 - mean).powi(2) * c as f64)
            .sum::<f64>()
            / n;

        let min = histogram.iter().position(|&c| c > 0).unwrap_or(0) as f64;
        let max = histogram.iter().rposition(|&c| c > 0).unwrap_or(0) as f64;
        let michelson = if max + min > 0.0 {
            (max - min) / (max + min)
        } else {
            0.0
        };

        let histogram_entropy = histogram
            .iter()
            .filter(|&&c| c > 0)
            .map(|&c| {
                let p = c as f64 / n;
                -p * p.log2()
            })
            .sum();

        let median = percentile(histogram, total, 0.5);
        let dynamic_range = percentile(histogram, total, 0.99) - percentile(histogram, total, 0.01);

        Self {
            mean,
            median,
            std: variance.sqrt(),
            michelson,
            histogram_entropy,
            dynamic_range,
        }
    }
}

/// Smallest intensity whose cumulative count reaches `fraction` of the pixels.
fn percentile(histogram: &[u64; 256], total: u64, fraction: f64) -> f64 {
    let target = ((total as f64) * fraction).ceil().max(1.0) as u64;
    let mut cumulative = 0u64;
    for (value, &count) in histogram.iter().enumerate() {
        cumulative += count;
        if cumulative >= target {
            return value as f64;
        }
    }
    255.0
}

/// Sharpness sub-score, up to 30 points.
fn sharpness_score(laplacian_var: f64) -> f64 {
    if laplacian_var >= 500.0 {
        30.0
    } else if laplacian_var >= 100.0 {
        20.0 + 10.0 * (laplacian_var - 100.0) / 400.0
    } else if laplacian_var >= 50.0 {
        10.0 + 10.0 * (laplacian_var - 50.0) / 50.0
    } else {
        10.0 * laplacian_var.max(0.0) / 50.0
    }
}

/// Noise sub-score, up to 25 points (less noise scores higher).
fn noise_score(noise: f64) -> f64 {
    if noise <= 5.0 {
        25.0
    } else if noise <= 15.0 {
        25.0 - 10.0 * (noise - 5.0) / 10.0
    } else if noise <= 30.0 {
        15.0 - 10.0 * (noise - 15.0) / 15.0
    } else {
        (5.0 - (noise - 30.0) / 6.0).max(0.0)
    }
}

/// Contrast sub-score from RMS contrast, up to 25 points.
fn contrast_score(contrast_rms: f64) -> f64 {
    if contrast_rms >= 50.0 {
        25.0
    } else if contrast_rms >= 30.0 {
        15.0 + 10.0 * (contrast_rms - 30.0) / 20.0
    } else if contrast_rms >= 15.0 {
        5.0 + 10.0 * (contrast_rms - 15.0) / 15.0
    } else {
        5.0 * contrast_rms.max(0.0) / 15.0
    }
}

/// Histogram sub-score, up to 20 points: half entropy, half dynamic range.
fn histogram_score(entropy: f64, dynamic_range: f64) -> f64 {
    let entropy_part = 10.0 * (entropy / 8.0).clamp(0.0, 1.0);
    let range_part = 10.0 * (dynamic_range / 255.0).clamp(0.0, 1.0);
    entropy_part + range_part
}

fn composite_score(
    sharpness: f64,
    noise: f64,
    contrast_rms: f64,
    entropy: f64,
    dynamic_range: f64,
) -> f64 {
    let total = sharpness_score(sharpness)
        + noise_score(noise)
        + contrast_score(contrast_rms)
        + histogram_score(entropy, dynamic_range);
    if total.is_finite() {
        total.clamp(0.0, 100.0)
    } else {
        0.0
    }
}

/// Maps a quality score to its category and enhancement strength.
pub fn classify_score(score: f64) -> (QualityCategory, EnhancementStrength) {
    if score >= 80.0 {
        (QualityCategory::Pristine, EnhancementStrength::None)
    } else if score >= 60.0 {
        (QualityCategory::Good, EnhancementStrength::Light)
    } else if score >= 40.0 {
        (QualityCategory::Fair, EnhancementStrength::Moderate)
    } else if score >= 20.0 {
        (QualityCategory::Poor, EnhancementStrength::Strong)
    } else {
        (QualityCategory::VeryPoor, EnhancementStrength::Aggressive)
    }
}
