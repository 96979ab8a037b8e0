//! # Preprocessing Tests
//!
//! Quality metrics and the enhancement pipeline on synthetic scans.

mod test_helpers;

#[cfg(test)]
mod tests {
    use image::DynamicImage;
    use ocr_filter_tuner::genome::FilterGenome;
    use ocr_filter_tuner::preprocessing::quality::estimate_noise;
    use ocr_filter_tuner::preprocessing::{analyze, analyze_path, PreprocessingError};

    use crate::test_helpers::{build_corpus, degrade, document_image};

    /// Noise estimates follow the noise actually added.
    #[test]
    fn test_noise_estimate_tracks_degradation() {
        let page = document_image(0);
        let light = degrade(&page, 15, 1);
        let heavy = degrade(&page, 80, 1);

        let clean_noise = estimate_noise(&page);
        let light_noise = estimate_noise(&light);
        let heavy_noise = estimate_noise(&heavy);

        assert!(clean_noise < light_noise);
        assert!(light_noise < heavy_noise);
    }

    /// Reports from a file and from the decoded image agree.
    #[test]
    fn test_analyze_path_matches_in_memory_analysis() {
        let corpus = build_corpus(&[("medium", 40)], 1);
        let path = corpus.corpus_dir.join("medium").join("doc0.png");

        let from_file = analyze_path(&path).expect("analyze");
        let decoded = image::open(&path).expect("decode");
        assert_eq!(from_file, analyze(&decoded));
        assert!((0.0..=100.0).contains(&from_file.quality_score));
    }

    #[test]
    fn test_analyze_path_reports_undecodable_file() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("broken.png");
        std::fs::write(&path, b"not an image").expect("write");

        assert!(matches!(
            analyze_path(&path),
            Err(PreprocessingError::ImageLoad { .. })
        ));
    }

    /// A denoising genome lowers the measured noise of a degraded page.
    #[test]
    fn test_denoising_genome_reduces_noise() {
        let noisy = degrade(&document_image(1), 60, 7);
        let genome = FilterGenome::decode(&[25.0, 7.0, 0.0, 8.0, 9.0, 80.0, 10.0, 0.0, 1.0]);

        let enhanced = genome.apply(&DynamicImage::ImageLuma8(noisy.clone()));

        assert_eq!(enhanced.dimensions(), noisy.dimensions());
        assert!(estimate_noise(&enhanced) < estimate_noise(&noisy));
    }

    /// The identity genome leaves a grayscale page untouched.
    #[test]
    fn test_identity_genome_is_lossless() {
        let page = document_image(2);
        let output = FilterGenome::default().apply(&DynamicImage::ImageLuma8(page.clone()));
        assert_eq!(output, page);
    }
}
