//! # Frequency-Domain Descriptors
//!
//! Power-spectrum statistics used by quality assessment: low/high frequency
//! energy split, dominant periodic component and spectral entropy.
//!
//! The 2-D DFT is computed separably (rows, then columns) on a copy of the
//! image downsampled to at most [`MAX_SPECTRUM_SIDE`] pixels on its longest
//! side, which keeps the quadratic transform cheap on full-page scans while
//! preserving the relative frequency layout.

use image::imageops::FilterType;
use image::GrayImage;

use super::types::SpectrumReport;

/// Longest side of the image actually transformed.
pub const MAX_SPECTRUM_SIDE: u32 = 128;

/// Radius of the low-frequency disk as a fraction of min(width, height).
const LOW_FREQ_RADIUS_FRACTION: f64 = 0.1;

#[derive(Debug, Clone, Copy, Default, PartialEq)]
struct Complex {
    re: f64,
    im: f64,
}

impl Complex {
    fn mul(self, other: Complex) -> Complex {
        Complex {
            re: self.re * other.re - self.im * other.im,
            im: self.re * other.im + self.im * other.re,
        }
    }

    fn norm_sqr(self) -> f64 {
        self.re * self.re + self.im * self.im
    }
}

/// Computes the frequency-domain descriptors of a grayscale image.
pub fn analyze_spectrum(gray: &GrayImage) -> SpectrumReport {
    let (width, height) = gray.dimensions();
    if width == 0 || height == 0 {
        return SpectrumReport::default();
    }

    let sample = downsample(gray);
    let (width, height) = sample.dimensions();
    let power = power_spectrum(&sample);

    let radius = f64::from(width.min(height)) * LOW_FREQ_RADIUS_FRACTION;
    let half_extent = (f64::from(width.min(height)) / 2.0).max(1.0);

    let mut low = 0.0;
    let mut high = 0.0;
    let mut peak_power = 0.0;
    let mut peak_distance = 0.0;

    for y in 0..height as usize {
        for x in 0..width as usize {
            let p = power[y * width as usize + x];
            let distance = wrapped_distance(x, y, width as usize, height as usize);
            if distance <= radius {
                low += p;
            } else {
                high += p;
            }
            if (x, y) != (0, 0) && p > peak_power {
                peak_power = p;
                peak_distance = distance;
            }
        }
    }

    let total = low + high;
    if total <= 0.0 {
        return SpectrumReport::default();
    }

    let spectral_entropy = power
        .iter()
        .filter(|&&p| p > 0.0)
        .map(|&p| {
            let q = p / total;
            -q * q.log2()
        })
        .sum();

    SpectrumReport {
        low_freq_energy: low,
        high_freq_energy: high,
        high_freq_ratio: high / total,
        low_freq_percent: 100.0 * low / total,
        high_freq_percent: 100.0 * high / total,
        dominant_frequency_distance: peak_distance / half_extent,
        spectral_entropy,
    }
}

fn downsample(gray: &GrayImage) -> GrayImage {
    let (width, height) = gray.dimensions();
    let longest = width.max(height);
    if longest <= MAX_SPECTRUM_SIDE {
        return gray.clone();
    }

    let scale = f64::from(MAX_SPECTRUM_SIDE) / f64::from(longest);
    let new_width = ((f64::from(width) * scale).round() as u32).max(1);
    let new_height = ((f64::from(height) * scale).round() as u32).max(1);
    image::imageops::resize(gray, new_width, new_height, FilterType::Triangle)
}

/// Distance of a DFT bin from DC, treating indices past n/2 as negative frequencies.
fn wrapped_distance(x: usize, y: usize, width: usize, height: usize) -> f64 {
    let fx = x.min(width - x) as f64;
    let fy = y.min(height - y) as f64;
    (fx * fx + fy * fy).sqrt()
}

/// |F(u, v)|² in row-major order.
fn power_spectrum(gray: &GrayImage) -> Vec<f64> {
    let (width, height) = gray.dimensions();
    let (width, height) = (width as usize, height as usize);

    let row_twiddles = twiddles(width);
    let mut rows: Vec<Complex> = Vec::with_capacity(width * height);
    let mut line = vec![Complex::default(); width];
    for y in 0..height {
        for (x, slot) in line.iter_mut().enumerate() {
            *slot = Complex {
                re: f64::from(gray.get_pixel(x as u32, y as u32)[0]),
                im: 0.0,
            };
        }
        rows.extend(dft(&line, &row_twiddles));
    }

    let column_twiddles = twiddles(height);
    let mut power = vec![0.0; width * height];
    let mut column = vec![Complex::default(); height];
    for x in 0..width {
        for (y, slot) in column.iter_mut().enumerate() {
            *slot = rows[y * width + x];
        }
        for (y, value) in dft(&column, &column_twiddles).into_iter().enumerate() {
            power[y * width + x] = value.norm_sqr();
        }
    }

    power
}

/// exp(-2πi·m/n) for m in 0..n.
fn twiddles(n: usize) -> Vec<Complex> {
    (0..n)
        .map(|m| {
            let angle = -2.0 * std::f64::consts::PI * m as f64 / n as f64;
            Complex {
                re: angle.cos(),
                im: angle.sin(),
            }
        })
        .collect()
}

fn dft(input: &[Complex], twiddles: &[Complex]) -> Vec<Complex> {
    let n = input.len();
    (0..n)
        .map(|k| {
            input
                .iter()
                .enumerate()
                .fold(Complex::default(), |acc, (j, &value)| {
                    let term = value.mul(twiddles[(j * k) % n]);
                    Complex {
                        re: acc.re + term.re,
                        im: acc.im + term.im,
                    }
                })
        })
        .collect()
}
