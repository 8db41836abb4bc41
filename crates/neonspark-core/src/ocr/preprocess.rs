//! Image cleanup before OCR.
//!
//! Grayscale conversion, Otsu binarization, and a 3x3 median pass to drop
//! isolated specks. The result is re-encoded as PNG for the OCR engine.

use crate::Result;
use image::{DynamicImage, GrayImage, ImageOutputFormat, Luma};
use std::io::Cursor;

/// Decode `bytes`, clean the image up, and return it as PNG.
pub fn preprocess(bytes: &[u8]) -> Result<Vec<u8>> {
    let gray = image::load_from_memory(bytes)?.to_luma8();
    let threshold = otsu_threshold(&gray);
    let binary = binarize(&gray, threshold);
    let cleaned = median_filter_3x3(&binary);

    let mut png = Vec::new();
    DynamicImage::ImageLuma8(cleaned).write_to(&mut Cursor::new(&mut png), ImageOutputFormat::Png)?;
    Ok(png)
}

/// Threshold that maximizes between-class variance of the histogram.
pub fn otsu_threshold(image: &GrayImage) -> u8 {
    let mut histogram = [0u64; 256];
    for pixel in image.pixels() {
        histogram[pixel.0[0] as usize] += 1;
    }

    let total: u64 = histogram.iter().sum();
    if total == 0 {
        return 0;
    }
    let weighted_sum: f64 = histogram
        .iter()
        .enumerate()
        .map(|(level, count)| level as f64 * *count as f64)
        .sum();

    let mut background_weight = 0u64;
    let mut background_sum = 0f64;
    let mut best_variance = -1f64;
    let mut threshold = 0u8;

    for (level, count) in histogram.iter().enumerate() {
        background_weight += count;
        if background_weight == 0 {
            continue;
        }
        let foreground_weight = total - background_weight;
        if foreground_weight == 0 {
            break;
        }

        background_sum += level as f64 * *count as f64;
        let background_mean = background_sum / background_weight as f64;
        let foreground_mean = (weighted_sum - background_sum) / foreground_weight as f64;
        let variance = background_weight as f64
            * foreground_weight as f64
            * (background_mean - foreground_mean).powi(2);

        if variance > best_variance {
            best_variance = variance;
            threshold = level as u8;
        }
    }

    threshold
}

/// Pixels above `threshold` become white, the rest black.
pub fn binarize(image: &GrayImage, threshold: u8) -> GrayImage {
    GrayImage::from_fn(image.width(), image.height(), |x, y| {
        if image.get_pixel(x, y).0[0] > threshold {
            Luma([255])
        } else {
            Luma([0])
        }
    })
}

/// 3x3 median of a binary image, with edge pixels replicated.
pub fn median_filter_3x3(image: &GrayImage) -> GrayImage {
    let (width, height) = image.dimensions();
    if width == 0 || height == 0 {
        return image.clone();
    }

    GrayImage::from_fn(width, height, |x, y| {
        let mut white = 0;
        for dy in -1i64..=1 {
            for dx in -1i64..=1 {
                let nx = (x as i64 + dx).clamp(0, width as i64 - 1) as u32;
                let ny = (y as i64 + dy).clamp(0, height as i64 - 1) as u32;
                if image.get_pixel(nx, ny).0[0] > 127 {
                    white += 1;
                }
            }
        }
        if white > 4 {
            Luma([255])
        } else {
            Luma([0])
        }
    })
}
