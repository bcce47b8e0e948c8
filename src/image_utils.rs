use image::{GrayImage, Luma};
use imageproc::contrast::{adaptive_threshold, otsu_level};

use crate::config::Binarization;

pub const WHITE: Luma<u8> = Luma([u8::MAX]);
pub const BLACK: Luma<u8> = Luma([u8::MIN]);

/// Binarizes a grayscale sheet so that marks (dark ink) become foreground
/// white and paper becomes background black.
pub fn binarize_marks(img: &GrayImage, binarization: &Binarization) -> GrayImage {
    match binarization {
        Binarization::Otsu => {
            let level = otsu_level(img);
            let mut out = GrayImage::new(img.width(), img.height());
            for (x, y, pixel) in img.enumerate_pixels() {
                let value = if pixel.0[0] <= level { WHITE } else { BLACK };
                out.put_pixel(x, y, value);
            }
            out
        }
        Binarization::Adaptive { block_radius } => {
            // adaptive_threshold lights up pixels at or above the local mean,
            // which is the paper; flip it so ink is the foreground.
            let bright = adaptive_threshold(img, *block_radius);
            let mut out = bright;
            for pixel in out.pixels_mut() {
                pixel.0[0] = u8::MAX - pixel.0[0];
            }
            out
        }
    }
}

/// Determines the number of pixels in an image that match the given luma.
pub fn count_pixels(img: &GrayImage, luma: &Luma<u8>) -> u32 {
    img.pixels().filter(|p| *p == luma).count() as u32
}

/// Fraction of samples at or below a gray cutoff.
pub fn dark_ratio(pixels: &[u8], level: u8) -> f32 {
    if pixels.is_empty() {
        return 0.0;
    }
    let dark = pixels.iter().filter(|p| **p <= level).count();
    dark as f32 / pixels.len() as f32
}

/// Mean and standard deviation of a gray sample.
pub fn mean_std(pixels: &[u8]) -> (f32, f32) {
    if pixels.is_empty() {
        return (0.0, 0.0);
    }
    let n = pixels.len() as f64;
    let mean = pixels.iter().map(|p| f64::from(*p)).sum::<f64>() / n;
    let variance = pixels
        .iter()
        .map(|p| {
            let d = f64::from(*p) - mean;
            d * d
        })
        .sum::<f64>()
        / n;
    (mean as f32, variance.sqrt() as f32)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn otsu_binarization_turns_ink_into_foreground() {
        let mut img = GrayImage::from_pixel(20, 20, WHITE);
        for y in 5..10 {
            for x in 5..10 {
                img.put_pixel(x, y, Luma([20]));
            }
        }
        let bin = binarize_marks(&img, &Binarization::Otsu);
        assert_eq!(count_pixels(&bin, &WHITE), 25);
    }

    #[test]
    fn dark_ratio_counts_inclusive() {
        let pixels = [10u8, 64, 65, 200];
        assert_eq!(dark_ratio(&pixels, 64), 0.5);
        assert_eq!(dark_ratio(&[], 64), 0.0);
    }

    #[test]
    fn mean_std_of_constant_sample_has_zero_spread() {
        let (mean, std) = mean_std(&[42u8; 16]);
        assert_eq!(mean, 42.0);
        assert_eq!(std, 0.0);
    }
}
