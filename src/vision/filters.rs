//! Single-channel image operations used by the motion detector.

use image::{GrayImage, Luma};

pub const MASK_ON: u8 = 255;

/// Normalized 1-D gaussian weights for an odd kernel size.
///
/// The sigma is derived from the size the same way common vision libraries do when
/// no explicit sigma is given, so a `21` kernel behaves like the usual `(21, 21), 0` blur.
pub fn gaussian_kernel(size: u32) -> Vec<f32> {
    if size <= 1 {
        return vec![1.0];
    }
    let sigma = 0.3 * ((size as f32 - 1.0) * 0.5 - 1.0) + 0.8;
    let center = (size / 2) as f32;
    let mut weights: Vec<f32> = (0..size)
        .map(|i| {
            let d = i as f32 - center;
            (-(d * d) / (2.0 * sigma * sigma)).exp()
        })
        .collect();
    let sum: f32 = weights.iter().sum();
    weights.iter_mut().for_each(|w| *w /= sum);
    weights
}

/// Separable gaussian blur with replicated borders.
pub fn gaussian_blur(img: &GrayImage, kernel_width: u32, kernel_height: u32) -> GrayImage {
    if kernel_width <= 1 && kernel_height <= 1 {
        return img.clone();
    }
    let (width, height) = img.dimensions();
    let (w, h) = (width as i64, height as i64);
    let kx = gaussian_kernel(kernel_width);
    let ky = gaussian_kernel(kernel_height);
    let rx = (kx.len() / 2) as i64;
    let ry = (ky.len() / 2) as i64;

    let mut horizontal = vec![0f32; (width * height) as usize];
    for y in 0..h {
        for x in 0..w {
            let mut acc = 0.0;
            for (k, weight) in kx.iter().enumerate() {
                let sx = (x + k as i64 - rx).clamp(0, w - 1);
                acc += weight * img.get_pixel(sx as u32, y as u32).0[0] as f32;
            }
            horizontal[(y * w + x) as usize] = acc;
        }
    }

    GrayImage::from_fn(width, height, |x, y| {
        let mut acc = 0.0;
        for (k, weight) in ky.iter().enumerate() {
            let sy = (y as i64 + k as i64 - ry).clamp(0, h - 1);
            acc += weight * horizontal[(sy * w + x as i64) as usize];
        }
        Luma([acc.round().clamp(0.0, 255.0) as u8])
    })
}

/// Per-pixel `|a - b|`. Both images must have the same dimensions.
pub fn abs_diff(a: &GrayImage, b: &GrayImage) -> GrayImage {
    GrayImage::from_fn(a.width(), a.height(), |x, y| {
        Luma([a.get_pixel(x, y).0[0].abs_diff(b.get_pixel(x, y).0[0])])
    })
}

/// Pixels strictly brighter than `threshold` become [`MASK_ON`], everything else 0.
pub fn binarize(img: &GrayImage, threshold: u8) -> GrayImage {
    GrayImage::from_fn(img.width(), img.height(), |x, y| {
        if img.get_pixel(x, y).0[0] > threshold {
            Luma([MASK_ON])
        } else {
            Luma([0])
        }
    })
}

/// Dilation with a 3x3 square structuring element, repeated `iterations` times.
pub fn dilate(mask: &GrayImage, iterations: u32) -> GrayImage {
    let mut current = mask.clone();
    let (width, height) = mask.dimensions();
    for _ in 0..iterations {
        let src = current;
        current = GrayImage::from_fn(width, height, |x, y| {
            let x0 = x.saturating_sub(1);
            let y0 = y.saturating_sub(1);
            let x1 = (x + 1).min(width - 1);
            let y1 = (y + 1).min(height - 1);
            for ny in y0..=y1 {
                for nx in x0..=x1 {
                    if src.get_pixel(nx, ny).0[0] != 0 {
                        return Luma([MASK_ON]);
                    }
                }
            }
            Luma([0])
        });
    }
    current
}
