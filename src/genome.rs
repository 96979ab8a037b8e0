//! # Filter Genome Module
//!
//! A filter genome is the fixed-length parameter vector the optimizer evolves.
//! Each gene is declared in [`GENE_SPECS`] with its bounds and kind; raw
//! vectors produced by variation operators are brought back into the legal
//! space by [`FilterGenome::decode`], which is the only way to build a genome.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::path::Path;

use image::{DynamicImage, GrayImage};
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::preprocessing::filtering::{
    apply_clahe, bilateral_filter, non_local_means, unsharp_mask, NLM_SEARCH_WINDOW,
};
use crate::preprocessing::PreprocessingError;

/// How a gene's raw value is snapped to its legal set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GeneKind {
    Continuous,
    Integer,
    /// Integer restricted to odd values (kernel and window sizes)
    OddInteger,
}

/// Declared bounds and kind of one gene.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeneSpec {
    pub name: &'static str,
    pub min: f64,
    pub max: f64,
    pub kind: GeneKind,
}

impl GeneSpec {
    const fn new(name: &'static str, min: f64, max: f64, kind: GeneKind) -> Self {
        Self {
            name,
            min,
            max,
            kind,
        }
    }

    /// Snaps a raw value into this gene's legal set.
    pub fn decode(&self, raw: f64) -> f64 {
        if !raw.is_finite() {
            return self.min;
        }
        let clamped = raw.clamp(self.min, self.max);
        let decoded = match self.kind {
            GeneKind::Continuous => clamped,
            GeneKind::Integer => clamped.round().clamp(self.min, self.max),
            GeneKind::OddInteger => {
                let rounded = clamped.round().clamp(self.min, self.max);
                if rounded % 2.0 != 0.0 {
                    rounded
                } else if rounded + 1.0 <= self.max {
                    rounded + 1.0
                } else {
                    rounded - 1.0
                }
            }
        };
        // -0.0 and 0.0 must share a key
        if decoded == 0.0 {
            0.0
        } else {
            decoded
        }
    }

    pub fn span(&self) -> f64 {
        self.max - self.min
    }
}

/// Number of genes in a filter genome.
pub const GENE_COUNT: usize = 9;

/// Gene layout, in pipeline order.
pub const GENE_SPECS: [GeneSpec; GENE_COUNT] = [
    GeneSpec::new("denoise_strength", 0.0, 30.0, GeneKind::Continuous),
    GeneSpec::new("denoise_template_window", 3.0, 7.0, GeneKind::OddInteger),
    GeneSpec::new("clahe_clip_limit", 0.0, 6.0, GeneKind::Continuous),
    GeneSpec::new("clahe_grid_size", 2.0, 16.0, GeneKind::Integer),
    GeneSpec::new("bilateral_diameter", 1.0, 15.0, GeneKind::OddInteger),
    GeneSpec::new("bilateral_sigma_color", 1.0, 150.0, GeneKind::Continuous),
    GeneSpec::new("bilateral_sigma_space", 1.0, 150.0, GeneKind::Continuous),
    GeneSpec::new("unsharp_amount", 0.0, 3.0, GeneKind::Continuous),
    GeneSpec::new("unsharp_radius", 0.3, 5.0, GeneKind::Continuous),
];

/// Gene names in declaration order.
pub fn gene_names() -> Vec<String> {
    GENE_SPECS.iter().map(|spec| spec.name.to_string()).collect()
}

/// Identity of a decoded genome: the exact bit patterns of its values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct GenomeKey([u64; GENE_COUNT]);

impl fmt::Display for GenomeKey {
    /// Short stable digest for logs
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // FNV-1a over the value bits
        let mut digest: u64 = 0xcbf2_9ce4_8422_2325;
        for word in self.0 {
            for byte in word.to_le_bytes() {
                digest ^= u64::from(byte);
                digest = digest.wrapping_mul(0x0000_0100_0000_01b3);
            }
        }
        write!(f, "{:016x}", digest)
    }
}

/// Decoded filter parameters with named fields.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FilterParameters {
    pub denoise_strength: f32,
    pub denoise_template_window: u32,
    pub clahe_clip_limit: f32,
    pub clahe_grid_size: u32,
    pub bilateral_diameter: u32,
    pub bilateral_sigma_color: f64,
    pub bilateral_sigma_space: f64,
    pub unsharp_amount: f32,
    pub unsharp_radius: f32,
}

/// An immutable, always-legal filter parameter vector.
///
/// Equality and hashing go through [`GenomeKey`], so two genomes are equal
/// exactly when they share a cache entry.
#[derive(Debug, Clone, Copy)]
pub struct FilterGenome {
    values: [f64; GENE_COUNT],
}

impl PartialEq for FilterGenome {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl Hash for FilterGenome {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.key().hash(state);
    }
}

impl Eq for FilterGenome {}

impl FilterGenome {
    /// Builds a genome from a raw vector.
    ///
    /// Values are clamped to bounds, integer genes rounded, odd genes forced
    /// odd and non-finite values replaced by the lower bound. Missing trailing
    /// genes take their lower bound; surplus values are ignored. Decoding a
    /// decoded vector returns it unchanged.
    pub fn decode(raw: &[f64]) -> Self {
        let mut values = [0.0; GENE_COUNT];
        for (i, (value, spec)) in values.iter_mut().zip(GENE_SPECS.iter()).enumerate() {
            *value = spec.decode(raw.get(i).copied().unwrap_or(spec.min));
        }
        Self { values }
    }

    /// Samples every gene uniformly within its bounds.
    pub fn random<R: Rng + ?Sized>(rng: &mut R) -> Self {
        let raw: Vec<f64> = GENE_SPECS
            .iter()
            .map(|spec| rng.random_range(spec.min..=spec.max))
            .collect();
        Self::decode(&raw)
    }

    pub fn values(&self) -> &[f64; GENE_COUNT] {
        &self.values
    }

    pub fn key(&self) -> GenomeKey {
        GenomeKey(self.values.map(f64::to_bits))
    }

    pub fn parameters(&self) -> FilterParameters {
        let v = &self.values;
        FilterParameters {
            denoise_strength: v[0] as f32,
            denoise_template_window: v[1] as u32,
            clahe_clip_limit: v[2] as f32,
            clahe_grid_size: v[3] as u32,
            bilateral_diameter: v[4] as u32,
            bilateral_sigma_color: v[5],
            bilateral_sigma_space: v[6],
            unsharp_amount: v[7] as f32,
            unsharp_radius: v[8] as f32,
        }
    }

    /// Runs the enhancement pipeline: grayscale, non-local-means, CLAHE,
    /// bilateral, unsharp mask. The stage order is fixed.
    pub fn apply(&self, image: &DynamicImage) -> GrayImage {
        let p = self.parameters();
        let gray = image.to_luma8();
        let denoised = non_local_means(
            &gray,
            p.denoise_strength,
            p.denoise_template_window,
            NLM_SEARCH_WINDOW,
        );
        let equalized = apply_clahe(&denoised, p.clahe_clip_limit, p.clahe_grid_size);
        let smoothed = bilateral_filter(
            &equalized,
            p.bilateral_diameter,
            p.bilateral_sigma_color,
            p.bilateral_sigma_space,
        );
        unsharp_mask(&smoothed, p.unsharp_amount, p.unsharp_radius)
    }

    /// Loads an image and runs [`FilterGenome::apply`] on it.
    pub fn apply_path(&self, path: &Path) -> Result<GrayImage, PreprocessingError> {
        let image = image::open(path).map_err(|e| PreprocessingError::ImageLoad {
            message: format!("{}: {}", path.display(), e),
        })?;
        Ok(self.apply(&image))
    }
}

impl Default for FilterGenome {
    /// Every gene at its lower bound: all stages disabled.
    fn default() -> Self {
        Self::decode(&[])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn assert_legal(genome: &FilterGenome) {
        for (value, spec) in genome.values().iter().zip(GENE_SPECS.iter()) {
            assert!(
                *value >= spec.min && *value <= spec.max,
                "{} = {} out of bounds",
                spec.name,
                value
            );
            match spec.kind {
                GeneKind::Continuous => {}
                GeneKind::Integer => assert_eq!(value.fract(), 0.0),
                GeneKind::OddInteger => {
                    assert_eq!(value.fract(), 0.0);
                    assert_eq!(*value as i64 % 2, 1, "{} must be odd", spec.name);
                }
            }
        }
    }

    #[test]
    fn test_decode_clamps_extremes() {
        let low = FilterGenome::decode(&[-1e9; GENE_COUNT]);
        let high = FilterGenome::decode(&[1e9; GENE_COUNT]);
        assert_legal(&low);
        assert_legal(&high);
        assert_eq!(low.values()[0], 0.0);
        assert_eq!(high.values()[4], 15.0);
    }

    #[test]
    fn test_decode_non_finite_takes_lower_bound() {
        let genome = FilterGenome::decode(&[f64::NAN, f64::INFINITY, f64::NEG_INFINITY]);
        assert_eq!(genome.values()[0], 0.0);
        assert_eq!(genome.values()[1], 3.0);
        assert_eq!(genome.values()[2], 0.0);
        assert_legal(&genome);
    }

    #[test]
    fn test_decode_odd_genes() {
        let spec = GENE_SPECS[1];
        assert_eq!(spec.decode(4.0), 5.0);
        assert_eq!(spec.decode(6.6), 7.0);
        assert_eq!(spec.decode(5.4), 5.0);
        assert_eq!(spec.decode(3.0), 3.0);

        let diameter = GENE_SPECS[4];
        assert_eq!(diameter.decode(14.0), 15.0);
        assert_eq!(diameter.decode(1.2), 1.0);
    }

    #[test]
    fn test_decode_negative_zero_shares_key_with_zero() {
        let negative = FilterGenome::decode(&[-0.0, 3.0, -0.0]);
        let positive = FilterGenome::decode(&[0.0, 3.0, 0.0]);
        assert_eq!(negative.key(), positive.key());
        assert!(negative.values()[0].is_sign_positive());
        assert!(GENE_SPECS[7].decode(-0.0).is_sign_positive());
    }

    #[test]
    fn test_decode_even_at_upper_bound_steps_down() {
        let spec = GeneSpec::new("window", 3.0, 8.0, GeneKind::OddInteger);
        assert_eq!(spec.decode(8.0), 7.0);
    }

    #[test]
    fn test_decode_missing_and_surplus_genes() {
        let short = FilterGenome::decode(&[12.0]);
        assert_eq!(short.values()[0], 12.0);
        for (value, spec) in short.values().iter().zip(GENE_SPECS.iter()).skip(1) {
            assert_eq!(*value, spec.min);
        }

        let mut long = vec![1.0; GENE_COUNT + 4];
        long[0] = 2.5;
        assert_eq!(FilterGenome::decode(&long).values()[0], 2.5);
    }

    #[test]
    fn test_decode_is_idempotent() {
        let mut rng = StdRng::seed_from_u64(42);
        for _ in 0..200 {
            let raw: Vec<f64> = (0..GENE_COUNT).map(|_| rng.random_range(-50.0..200.0)).collect();
            let once = FilterGenome::decode(&raw);
            let twice = FilterGenome::decode(once.values());
            assert_eq!(once, twice);
            assert_eq!(once.key(), twice.key());
        }
    }

    #[test]
    fn test_boundary_values_are_fixed_points() {
        let mins: Vec<f64> = GENE_SPECS.iter().map(|s| s.min).collect();
        let maxs: Vec<f64> = GENE_SPECS.iter().map(|s| s.max).collect();
        assert_eq!(FilterGenome::decode(&mins).values().to_vec(), mins);
        assert_eq!(FilterGenome::decode(&maxs).values().to_vec(), maxs);
    }

    #[test]
    fn test_random_genomes_are_legal() {
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..100 {
            assert_legal(&FilterGenome::random(&mut rng));
        }
    }

    #[test]
    fn test_key_distinguishes_genomes() {
        let a = FilterGenome::decode(&[1.0]);
        let b = FilterGenome::decode(&[1.5]);
        assert_ne!(a.key(), b.key());
        assert_eq!(a.key().to_string().len(), 16);
        assert_eq!(a.key().to_string(), FilterGenome::decode(&[1.0]).key().to_string());
    }

    #[test]
    fn test_parameters_follow_gene_order() {
        let genome = FilterGenome::decode(&[10.0, 5.0, 2.0, 8.0, 9.0, 75.0, 30.0, 1.5, 2.0]);
        let p = genome.parameters();
        assert_eq!(p.denoise_strength, 10.0);
        assert_eq!(p.denoise_template_window, 5);
        assert_eq!(p.clahe_grid_size, 8);
        assert_eq!(p.bilateral_diameter, 9);
        assert_eq!(p.bilateral_sigma_space, 30.0);
        assert_eq!(p.unsharp_radius, 2.0);
    }

    #[test]
    fn test_default_genome_is_identity() {
        let gray = GrayImage::from_fn(24, 24, |x, y| Luma([((x * 7 + y * 13) % 256) as u8]));
        let output = FilterGenome::default().apply(&DynamicImage::ImageLuma8(gray.clone()));
        assert_eq!(output, gray);
    }

    #[test]
    fn test_apply_preserves_dimensions() {
        let img = DynamicImage::new_rgb8(31, 17);
        let genome = FilterGenome::decode(&[5.0, 3.0, 2.0, 4.0, 5.0, 40.0, 10.0, 1.0, 1.0]);
        assert_eq!(genome.apply(&img).dimensions(), (31, 17));
    }

    #[test]
    fn test_apply_path_missing_file() {
        let result = FilterGenome::default().apply_path(Path::new("/nonexistent/page.png"));
        assert!(matches!(result, Err(PreprocessingError::ImageLoad { .. })));
    }

    #[test]
    fn test_gene_names_match_specs() {
        let names = gene_names();
        assert_eq!(names.len(), GENE_COUNT);
        assert_eq!(names[0], "denoise_strength");
        assert_eq!(names[8], "unsharp_radius");
    }
}
