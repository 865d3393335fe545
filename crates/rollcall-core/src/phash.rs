//! DCT perceptual hash.
//!
//! The whole image is reduced to 32×32 luma, transformed with a 2-D DCT-II,
//! and the top-left 8×8 low-frequency block is thresholded at its median.
//! Visually similar images land a few bits apart.

use crate::types::PerceptualHash;
use image::imageops::{self, FilterType};
use image::{GrayImage, Luma, RgbImage};

const HASH_SIZE: usize = 8;
const HIGHFREQ_FACTOR: usize = 4;
const IMG_SIZE: usize = HASH_SIZE * HIGHFREQ_FACTOR;

/// Compute the 64-bit perceptual hash of an RGB image.
///
/// Bits are packed row-major from the most significant bit.
pub fn perceptual_hash(image: &RgbImage) -> PerceptualHash {
    let gray = luma_601(image);
    let small = imageops::resize(&gray, IMG_SIZE as u32, IMG_SIZE as u32, FilterType::Lanczos3);

    let mut pixels = [[0.0f64; IMG_SIZE]; IMG_SIZE];
    for (x, y, p) in small.enumerate_pixels() {
        pixels[y as usize][x as usize] = p[0] as f64;
    }

    let coeffs = dct_2d(&pixels);

    let mut low = [0.0f64; HASH_SIZE * HASH_SIZE];
    for r in 0..HASH_SIZE {
        low[r * HASH_SIZE..(r + 1) * HASH_SIZE].copy_from_slice(&coeffs[r][..HASH_SIZE]);
    }
    let med = median(&low);

    let bits = low
        .iter()
        .fold(0u64, |acc, &c| (acc << 1) | u64::from(c > med));
    PerceptualHash(bits)
}

/// ITU-R 601-2 luma: L = R * 299/1000 + G * 587/1000 + B * 114/1000.
fn luma_601(image: &RgbImage) -> GrayImage {
    GrayImage::from_fn(image.width(), image.height(), |x, y| {
        let [r, g, b] = image.get_pixel(x, y).0;
        let l = (u32::from(r) * 299 + u32::from(g) * 587 + u32::from(b) * 114) / 1000;
        Luma([l as u8])
    })
}

/// Unnormalized DCT-II along columns, then along rows.
fn dct_2d(input: &[[f64; IMG_SIZE]; IMG_SIZE]) -> [[f64; IMG_SIZE]; IMG_SIZE] {
    let n = IMG_SIZE as f64;
    let mut table = [[0.0f64; IMG_SIZE]; IMG_SIZE];
    for (k, row) in table.iter_mut().enumerate() {
        for (i, v) in row.iter_mut().enumerate() {
            *v = (std::f64::consts::PI * k as f64 * (2.0 * i as f64 + 1.0) / (2.0 * n)).cos();
        }
    }

    let mut cols = [[0.0f64; IMG_SIZE]; IMG_SIZE];
    for x in 0..IMG_SIZE {
        for k in 0..IMG_SIZE {
            cols[k][x] = 2.0 * (0..IMG_SIZE).map(|y| input[y][x] * table[k][y]).sum::<f64>();
        }
    }

    let mut out = [[0.0f64; IMG_SIZE]; IMG_SIZE];
    for y in 0..IMG_SIZE {
        for k in 0..IMG_SIZE {
            out[y][k] = 2.0 * (0..IMG_SIZE).map(|x| cols[y][x] * table[k][x]).sum::<f64>();
        }
    }
    out
}

fn median(values: &[f64]) -> f64 {
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    } else {
        sorted[mid]
    }
}
