//! # Image Filtering Module
//!
//! The four enhancement stages a filter genome parameterises: non-local-means
//! denoising, contrast limited adaptive histogram equalization, bilateral
//! smoothing and unsharp masking.
//!
//! Every stage takes a grayscale buffer and returns a new one. Parameters at
//! their no-op end return an unchanged copy, so the optimizer can switch a
//! stage off by driving its gene to the bound.

use image::{GrayImage, Luma};
use imageproc::filter::gaussian_blur_f32;
use tracing;

/// Strength at or below which non-local-means is skipped.
pub const NLM_MIN_STRENGTH: f32 = 0.5;

/// Side of the square neighbourhood searched for similar patches.
pub const NLM_SEARCH_WINDOW: u32 = 11;

fn clamp_coord(value: i64, upper: u32) -> u32 {
    value.clamp(0, i64::from(upper) - 1) as u32
}

fn to_u8(value: f64) -> u8 {
    value.round().clamp(0.0, 255.0) as u8
}

/// Non-local-means denoising.
///
/// Each pixel becomes a weighted mean of the pixels in its search window,
/// weighted by `exp(-d / h²)` where `d` is the mean squared difference between
/// the template patches around the two pixels. Patch distances are computed
/// per search offset from an integral image of squared differences, so the
/// cost does not grow with the template size.
///
/// # Arguments
///
/// * `image` - Grayscale input
/// * `strength` - Filter strength `h`; values at or below [`NLM_MIN_STRENGTH`] are a no-op
/// * `template_window` - Patch side (odd)
/// * `search_window` - Search neighbourhood side (odd)
pub fn non_local_means(
    image: &GrayImage,
    strength: f32,
    template_window: u32,
    search_window: u32,
) -> GrayImage {
    let (width, height) = image.dimensions();
    if strength <= NLM_MIN_STRENGTH || width == 0 || height == 0 {
        return image.clone();
    }

    let start_time = std::time::Instant::now();
    let template_radius = i64::from(template_window / 2);
    let search_radius = i64::from(search_window / 2);
    let h_squared = f64::from(strength) * f64::from(strength);

    let (w, h) = (width as usize, height as usize);
    let stride = w + 1;
    let pixel = |x: u32, y: u32| f64::from(image.get_pixel(x, y)[0]);

    let mut weight_sum = vec![0.0f64; w * h];
    let mut value_sum = vec![0.0f64; w * h];
    let mut integral = vec![0.0f64; stride * (h + 1)];

    for dy in -search_radius..=search_radius {
        for dx in -search_radius..=search_radius {
            // Integral image of squared differences between each pixel and its shifted twin
            for y in 0..h {
                let mut row_sum = 0.0;
                let sy = clamp_coord(y as i64 + dy, height);
                for x in 0..w {
                    let sx = clamp_coord(x as i64 + dx, width);
                    let diff = pixel(x as u32, y as u32) - pixel(sx, sy);
                    row_sum += diff * diff;
                    integral[(y + 1) * stride + x + 1] = integral[y * stride + x + 1] + row_sum;
                }
            }

            for y in 0..h {
                let y0 = (y as i64 - template_radius).max(0) as usize;
                let y1 = ((y as i64 + template_radius) as usize).min(h - 1) + 1;
                let sy = clamp_coord(y as i64 + dy, height);
                for x in 0..w {
                    let x0 = (x as i64 - template_radius).max(0) as usize;
                    let x1 = ((x as i64 + template_radius) as usize).min(w - 1) + 1;

                    let patch = integral[y1 * stride + x1] - integral[y0 * stride + x1]
                        - integral[y1 * stride + x0]
                        + integral[y0 * stride + x0];
                    let count = ((x1 - x0) * (y1 - y0)) as f64;
                    let weight = (-(patch / count) / h_squared).exp();

                    let sx = clamp_coord(x as i64 + dx, width);
                    weight_sum[y * w + x] += weight;
                    value_sum[y * w + x] += weight * pixel(sx, sy);
                }
            }
        }
    }

    let output = GrayImage::from_fn(width, height, |x, y| {
        let idx = y as usize * w + x as usize;
        // The zero offset always contributes weight 1
        Luma([to_u8(value_sum[idx] / weight_sum[idx])])
    });

    tracing::debug!(
        target: "ocr_preprocessing",
        "Non-local means completed in {}ms: h={:.2}, template={}, search={}",
        start_time.elapsed().as_millis(),
        strength,
        template_window,
        search_window
    );

    output
}

/// Contrast Limited Adaptive Histogram Equalization (CLAHE).
///
/// The image is split into a `grid_size` x `grid_size` grid of tiles. Each
/// tile gets its own clipped-histogram equalization mapping, and every pixel
/// is mapped through the four nearest tile mappings blended bilinearly, so no
/// seams appear at tile borders.
///
/// # Arguments
///
/// * `image` - Grayscale input
/// * `clip_limit` - Histogram clip as a multiple of the mean bin height; `<= 0` is a no-op
/// * `grid_size` - Tiles per side (clamped to the image size)
pub fn apply_clahe(image: &GrayImage, clip_limit: f32, grid_size: u32) -> GrayImage {
    let (width, height) = image.dimensions();
    if clip_limit <= 0.0 || width == 0 || height == 0 {
        return image.clone();
    }

    let start_time = std::time::Instant::now();
    let tiles_x = grid_size.clamp(1, width);
    let tiles_y = grid_size.clamp(1, height);

    // mappings[ty * tiles_x + tx] is the equalization LUT of tile (tx, ty)
    let mut mappings: Vec<[u8; 256]> = Vec::with_capacity((tiles_x * tiles_y) as usize);
    for ty in 0..tiles_y {
        let (y0, y1) = tile_bounds(ty, tiles_y, height);
        for tx in 0..tiles_x {
            let (x0, x1) = tile_bounds(tx, tiles_x, width);
            mappings.push(tile_mapping(image, x0, x1, y0, y1, clip_limit));
        }
    }

    let tile_w = f64::from(width) / f64::from(tiles_x);
    let tile_h = f64::from(height) / f64::from(tiles_y);

    let output = GrayImage::from_fn(width, height, |x, y| {
        let (tx0, tx1, ax) = neighbour_tiles(x, tile_w, tiles_x);
        let (ty0, ty1, ay) = neighbour_tiles(y, tile_h, tiles_y);
        let value = image.get_pixel(x, y)[0] as usize;

        let lookup = |tx: u32, ty: u32| f64::from(mappings[(ty * tiles_x + tx) as usize][value]);
        let top = (1.0 - ax) * lookup(tx0, ty0) + ax * lookup(tx1, ty0);
        let bottom = (1.0 - ax) * lookup(tx0, ty1) + ax * lookup(tx1, ty1);
        Luma([to_u8((1.0 - ay) * top + ay * bottom)])
    });

    tracing::debug!(
        target: "ocr_preprocessing",
        "CLAHE applied in {}ms: clip_limit={:.2}, grid={}x{}",
        start_time.elapsed().as_millis(),
        clip_limit,
        tiles_x,
        tiles_y
    );

    output
}

/// Half-open pixel range covered by tile `index` out of `count` along an axis of `extent` pixels.
fn tile_bounds(index: u32, count: u32, extent: u32) -> (u32, u32) {
    let start = (u64::from(index) * u64::from(extent) / u64::from(count)) as u32;
    let end = (u64::from(index + 1) * u64::from(extent) / u64::from(count)) as u32;
    (start, end.max(start + 1).min(extent))
}

/// The two tiles whose centres bracket `coord`, and the blend weight of the second.
fn neighbour_tiles(coord: u32, tile_extent: f64, tiles: u32) -> (u32, u32, f64) {
    let position = (f64::from(coord) + 0.5) / tile_extent - 0.5;
    if position <= 0.0 {
        return (0, 0, 0.0);
    }
    let lower = (position.floor() as u32).min(tiles - 1);
    let upper = (lower + 1).min(tiles - 1);
    let alpha = if upper == lower {
        0.0
    } else {
        position - f64::from(lower)
    };
    (lower, upper, alpha)
}

/// Clipped-histogram equalization LUT for one tile.
fn tile_mapping(image: &GrayImage, x0: u32, x1: u32, y0: u32, y1: u32, clip_limit: f32) -> [u8; 256] {
    let mut histogram = [0u32; 256];
    for y in y0..y1 {
        for x in x0..x1 {
            histogram[image.get_pixel(x, y)[0] as usize] += 1;
        }
    }

    let total_pixels = (x1 - x0) * (y1 - y0);
    let clip_pixels = ((clip_limit * total_pixels as f32 / 256.0).round() as u32).max(1);

    let mut excess_pixels = 0u32;
    for count in &mut histogram {
        if *count > clip_pixels {
            excess_pixels += *count - clip_pixels;
            *count = clip_pixels;
        }
    }

    // Redistribute the clipped mass uniformly, spreading the remainder evenly
    let uniform_increment = excess_pixels / 256;
    let remainder = excess_pixels % 256;
    for count in &mut histogram {
        *count += uniform_increment;
    }
    if remainder > 0 {
        let step = (256 / remainder).max(1) as usize;
        for count in histogram.iter_mut().step_by(step).take(remainder as usize) {
            *count += 1;
        }
    }

    let scale = 255.0 / f64::from(total_pixels);
    let mut mapping = [0u8; 256];
    let mut cumulative = 0u32;
    for (value, count) in histogram.iter().enumerate() {
        cumulative += count;
        mapping[value] = to_u8(f64::from(cumulative) * scale);
    }
    mapping
}

/// Edge-preserving bilateral filter over a square window of side `diameter`.
///
/// Diameters of 1 or less are a no-op.
pub fn bilateral_filter(
    image: &GrayImage,
    diameter: u32,
    sigma_color: f64,
    sigma_space: f64,
) -> GrayImage {
    let (width, height) = image.dimensions();
    if diameter <= 1 || width == 0 || height == 0 {
        return image.clone();
    }

    let start_time = std::time::Instant::now();
    let sigma_color = sigma_color.max(f64::from(f32::EPSILON)) as f32;
    let sigma_space = sigma_space.max(f64::from(f32::EPSILON)) as f32;
    let output = imageproc::filter::bilateral_filter(image, diameter, sigma_color, sigma_space);

    tracing::debug!(
        target: "ocr_preprocessing",
        "Bilateral filter completed in {}ms: d={}, sigma_color={:.1}, sigma_space={:.1}",
        start_time.elapsed().as_millis(),
        diameter,
        sigma_color,
        sigma_space
    );

    output
}

/// Unsharp masking: `out = in + amount · (in - gaussian(in, radius))`.
///
/// An amount of 0 or less is a no-op.
pub fn unsharp_mask(image: &GrayImage, amount: f32, radius: f32) -> GrayImage {
    if amount <= 0.0 || radius <= 0.0 || image.width() == 0 || image.height() == 0 {
        return image.clone();
    }

    let blurred = gaussian_blur_f32(image, radius);
    let amount = f64::from(amount);

    GrayImage::from_fn(image.width(), image.height(), |x, y| {
        let original = f64::from(image.get_pixel(x, y)[0]);
        let smooth = f64::from(blurred.get_pixel(x, y)[0]);
        Luma([to_u8(original + amount * (original - smooth))])
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn variance(image: &GrayImage) -> f64 {
        let n = (image.width() * image.height()) as f64;
        let mean = image.pixels().map(|p| f64::from(p[0])).sum::<f64>() / n;
        image
            .pixels()
            .map(|p| (f64::from(p[0]) - mean).powi(2))
            .sum::<f64>()
            / n
    }

    fn noisy_flat_image(seed: u64) -> GrayImage {
        let mut rng = StdRng::seed_from_u64(seed);
        GrayImage::from_fn(32, 32, |_, _| Luma([rng.random_range(108..=148)]))
    }

    fn gradient_image() -> GrayImage {
        GrayImage::from_fn(64, 64, |x, _| Luma([100 + (x * 40 / 63) as u8]))
    }

    #[test]
    fn test_nlm_low_strength_is_identity() {
        let img = noisy_flat_image(1);
        assert_eq!(non_local_means(&img, 0.5, 7, NLM_SEARCH_WINDOW), img);
    }

    #[test]
    fn test_nlm_reduces_noise() {
        let img = noisy_flat_image(2);
        let denoised = non_local_means(&img, 25.0, 3, NLM_SEARCH_WINDOW);
        assert!(variance(&denoised) < variance(&img));
    }

    #[test]
    fn test_nlm_keeps_uniform_image() {
        let img = GrayImage::from_pixel(20, 15, Luma([77]));
        assert_eq!(non_local_means(&img, 10.0, 5, NLM_SEARCH_WINDOW), img);
    }

    #[test]
    fn test_clahe_non_positive_clip_is_identity() {
        let img = gradient_image();
        assert_eq!(apply_clahe(&img, 0.0, 8), img);
    }

    #[test]
    fn test_clahe_stretches_low_contrast() {
        let img = gradient_image();
        let enhanced = apply_clahe(&img, 3.0, 4);
        assert!(variance(&enhanced) > variance(&img));
    }

    #[test]
    fn test_clahe_uniform_image_stays_uniform() {
        let img = GrayImage::from_pixel(40, 40, Luma([90]));
        let enhanced = apply_clahe(&img, 2.0, 8);
        let first = enhanced.get_pixel(0, 0)[0];
        assert!(enhanced.pixels().all(|p| p[0] == first));
    }

    #[test]
    fn test_clahe_grid_larger_than_image() {
        let img = GrayImage::from_fn(3, 2, |x, y| Luma([(x * 40 + y * 10) as u8]));
        let enhanced = apply_clahe(&img, 2.0, 16);
        assert_eq!(enhanced.dimensions(), (3, 2));
    }

    #[test]
    fn test_tile_bounds_cover_axis() {
        let mut covered = 0;
        for i in 0..7 {
            let (start, end) = tile_bounds(i, 7, 100);
            assert_eq!(start, covered);
            covered = end;
        }
        assert_eq!(covered, 100);
    }

    #[test]
    fn test_bilateral_small_diameter_is_identity() {
        let img = noisy_flat_image(3);
        assert_eq!(bilateral_filter(&img, 1, 50.0, 50.0), img);
    }

    #[test]
    fn test_bilateral_preserves_hard_edge() {
        let img = GrayImage::from_fn(30, 30, |x, _| if x < 15 { Luma([0]) } else { Luma([255]) });
        let filtered = bilateral_filter(&img, 7, 10.0, 5.0);
        // A 255 step has negligible range weight at sigma_color=10
        assert_eq!(filtered.get_pixel(14, 10)[0], 0);
        assert_eq!(filtered.get_pixel(15, 10)[0], 255);
    }

    #[test]
    fn test_bilateral_keeps_black_page() {
        let img = GrayImage::new(12, 9);
        assert_eq!(bilateral_filter(&img, 5, 30.0, 3.0), img);
    }

    #[test]
    fn test_bilateral_smooths_noise() {
        let img = noisy_flat_image(4);
        let filtered = bilateral_filter(&img, 5, 100.0, 3.0);
        assert!(variance(&filtered) < variance(&img));
    }

    #[test]
    fn test_unsharp_zero_amount_is_identity() {
        let img = gradient_image();
        assert_eq!(unsharp_mask(&img, 0.0, 1.0), img);
    }

    #[test]
    fn test_unsharp_increases_edge_contrast() {
        let img = GrayImage::from_fn(30, 30, |x, _| if x < 15 { Luma([80]) } else { Luma([170]) });
        let sharpened = unsharp_mask(&img, 1.5, 2.0);
        assert!(sharpened.get_pixel(14, 10)[0] < 80);
        assert!(sharpened.get_pixel(15, 10)[0] > 170);
    }
}
