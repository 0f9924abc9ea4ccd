//! Perceptual hashing: 32x32 grayscale -> 2D DCT -> top-left 8x8 block vs. its
//! median -> 64-bit bitstring -> hex. Ported from the exact algorithm in
//! `original_source/modules/provenance_registry.py::compute_perceptual_hash`.

use image::{imageops::FilterType, DynamicImage, GenericImageView};
use std::f64::consts::PI;

const SIZE: usize = 32;
const LOW: usize = 8;

/// Compute the 64-bit perceptual hash of a decoded image, as a 16-character hex string.
pub fn compute_perceptual_hash(image: &DynamicImage) -> String {
    let gray = image.resize_exact(SIZE as u32, SIZE as u32, FilterType::Triangle).to_luma8();
    let mut samples = [[0f64; SIZE]; SIZE];
    for y in 0..SIZE {
        for x in 0..SIZE {
            samples[y][x] = gray.get_pixel(x as u32, y as u32).0[0] as f64;
        }
    }

    let dct = dct2d(&samples);

    let mut low = Vec::with_capacity(LOW * LOW);
    for row in dct.iter().take(LOW) {
        low.extend_from_slice(&row[..LOW]);
    }
    let median = median(&low);

    let mut bits: u64 = 0;
    for &value in &low {
        bits <<= 1;
        if value > median {
            bits |= 1;
        }
    }
    format!("{bits:016x}")
}

/// Hamming distance between two equal-length hex strings, via XOR popcount.
/// Mismatched lengths are treated as maximally distant rather than panicking.
pub fn hamming_distance_hex(a: &str, b: &str) -> u32 {
    if a.len() != b.len() {
        return (a.len().max(b.len()) * 4) as u32;
    }
    match (u64::from_str_radix(a, 16), u64::from_str_radix(b, 16)) {
        (Ok(x), Ok(y)) => (x ^ y).count_ones(),
        _ => (a.len().max(b.len()) * 4) as u32,
    }
}

fn median(values: &[f64]) -> f64 {
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let n = sorted.len();
    if n == 0 {
        return 0.0;
    }
    if n % 2 == 1 {
        sorted[n / 2]
    } else {
        (sorted[n / 2 - 1] + sorted[n / 2]) / 2.0
    }
}

/// Naive separable 2D DCT-II. 32x32 is small enough that the O(n^3) separable
/// form (rows then columns) is cheap and needs no external DCT crate.
fn dct2d(samples: &[[f64; SIZE]; SIZE]) -> Vec<Vec<f64>> {
    let mut rows = vec![vec![0f64; SIZE]; SIZE];
    for (y, row) in samples.iter().enumerate() {
        rows[y] = dct1d(row);
    }

    let mut out = vec![vec![0f64; SIZE]; SIZE];
    for x in 0..SIZE {
        let column: Vec<f64> = (0..SIZE).map(|y| rows[y][x]).collect();
        let transformed = dct1d(&column);
        for (y, value) in transformed.into_iter().enumerate() {
            out[y][x] = value;
        }
    }
    out
}

fn dct1d(input: &[f64; SIZE]) -> Vec<f64> {
    let n = SIZE as f64;
    let mut out = vec![0f64; SIZE];
    for (k, slot) in out.iter_mut().enumerate() {
        let mut sum = 0.0;
        for (i, &value) in input.iter().enumerate() {
            sum += value * ((PI / n) * (i as f64 + 0.5) * k as f64).cos();
        }
        let scale = if k == 0 { (1.0 / n).sqrt() } else { (2.0 / n).sqrt() };
        *slot = scale * sum;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageBuffer, Rgb};

    fn solid(width: u32, height: u32, value: u8) -> DynamicImage {
        DynamicImage::ImageRgb8(ImageBuffer::from_pixel(width, height, Rgb([value, value, value])))
    }

    #[test]
    fn identical_images_hash_identically() {
        let a = solid(200, 200, 128);
        let b = solid(200, 200, 128);
        assert_eq!(compute_perceptual_hash(&a), compute_perceptual_hash(&b));
    }

    #[test]
    fn hash_is_stable_under_resize() {
        let a = solid(200, 200, 40);
        let b = solid(64, 64, 40);
        assert_eq!(compute_perceptual_hash(&a), compute_perceptual_hash(&b));
    }

    #[test]
    fn hamming_distance_zero_for_equal_hashes() {
        let h = "00ff00ff00ff00ff";
        assert_eq!(hamming_distance_hex(h, h), 0);
    }

    #[test]
    fn hamming_distance_counts_differing_bits() {
        assert_eq!(hamming_distance_hex("0000000000000000", "0000000000000001"), 1);
        assert_eq!(hamming_distance_hex("0000000000000000", "ffffffffffffffff"), 64);
    }

    #[test]
    fn mismatched_length_is_maximally_distant() {
        assert_eq!(hamming_distance_hex("00", "0000000000000000"), 64);
    }
}
