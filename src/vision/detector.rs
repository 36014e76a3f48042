use image::GrayImage;
use serde::{Deserialize, Serialize};
use tracing::trace;

use super::{contour, filters, Frame, MotionRegion};
use crate::config::ConfigMotionDetection;

#[derive(Debug, PartialEq, Eq, Deserialize, Serialize, Clone)]
pub struct DetectionSettings {
    pub min_area: u32,
    pub blur_size: (u32, u32),
    pub threshold: u8,
    pub dilate_iterations: u32,
}

impl From<&ConfigMotionDetection> for DetectionSettings {
    fn from(cfg: &ConfigMotionDetection) -> Self {
        Self {
            min_area: cfg.min_area,
            blur_size: cfg.blur_size,
            threshold: cfg.threshold,
            dilate_iterations: cfg.dilate_iterations,
        }
    }
}

#[derive(Debug, PartialEq, Eq, Deserialize, Serialize, Clone, Default)]
pub struct MotionResult {
    pub detected: bool,
    pub regions: Vec<MotionRegion>,
}

/// Frame differencing motion detector: blur, diff, threshold, dilate, then keep the blobs
/// larger than `min_area`.
#[derive(Debug, Clone)]
pub struct MotionDetector {
    settings: DetectionSettings,
}

impl MotionDetector {
    pub fn new(mut settings: DetectionSettings) -> Self {
        settings.blur_size = (
            odd_kernel(settings.blur_size.0),
            odd_kernel(settings.blur_size.1),
        );
        Self { settings }
    }

    pub fn settings(&self) -> &DetectionSettings {
        &self.settings
    }

    pub fn detect(&self, prev: &Frame, curr: &Frame) -> Result<MotionResult, DetectError> {
        if prev.dimensions() != curr.dimensions() {
            return Err(DetectError::InvalidFrameDimensions {
                expected: prev.dimensions(),
                found: curr.dimensions(),
            });
        }
        self.compare(&self.prepare(prev), &self.prepare(curr))
    }

    /// Blurred luma of a frame. A frame prepared once can serve as the reference for the next
    /// comparison.
    pub fn prepare(&self, frame: &Frame) -> GrayImage {
        let (kw, kh) = self.settings.blur_size;
        filters::gaussian_blur(&frame.to_luma(), kw, kh)
    }

    /// Same as `detect`, on frames already run through `prepare`.
    pub fn compare(&self, prev: &GrayImage, curr: &GrayImage) -> Result<MotionResult, DetectError> {
        if prev.dimensions() != curr.dimensions() {
            return Err(DetectError::InvalidFrameDimensions {
                expected: prev.dimensions(),
                found: curr.dimensions(),
            });
        }
        let diff = filters::abs_diff(prev, curr);
        let mask = filters::binarize(&diff, self.settings.threshold);
        let mask = filters::dilate(&mask, self.settings.dilate_iterations);

        let candidates = contour::find_regions(&mask);
        let total = candidates.len();
        let regions: Vec<MotionRegion> = candidates
            .into_iter()
            .filter(|r| r.area > self.settings.min_area)
            .collect();
        trace!(candidates = total, kept = regions.len(), "Frame pair compared");

        Ok(MotionResult {
            detected: !regions.is_empty(),
            regions,
        })
    }
}

/// Even kernels have no centre pixel; round them up. Zero becomes the identity kernel.
fn odd_kernel(size: u32) -> u32 {
    match size {
        0 => 1,
        s if s % 2 == 0 => s + 1,
        s => s,
    }
}

quick_error! {
    #[derive(Debug, PartialEq, Eq, Serialize, Deserialize, Clone)]
    pub enum DetectError {
        InvalidFrameDimensions { expected: (u32, u32), found: (u32, u32) } {
            display("Frames differ in size: expected {:?}, got {:?}", expected, found)
        }
    }
}

#[cfg(test)]
mod test {
    use super::{DetectError, DetectionSettings, MotionDetector};
    use crate::vision::Frame;
    use chrono::Utc;
    use image::{Rgb, RgbImage};

    fn frame(width: u32, height: u32) -> Frame {
        Frame::new(0, Utc::now(), RgbImage::from_pixel(width, height, Rgb([20, 20, 20])))
    }

    fn with_rect(mut base: Frame, x: u32, y: u32, w: u32, h: u32) -> Frame {
        for yy in y..y + h {
            for xx in x..x + w {
                base.image.put_pixel(xx, yy, Rgb([230, 230, 230]));
            }
        }
        base.sequence += 1;
        base
    }

    /// No blur and no dilation so a region's area equals the changed rectangle exactly
    fn exact(min_area: u32) -> MotionDetector {
        MotionDetector::new(DetectionSettings {
            min_area,
            blur_size: (1, 1),
            threshold: 25,
            dilate_iterations: 0,
        })
    }

    #[test]
    fn test_identical_frames() {
        let detector = MotionDetector::new(DetectionSettings {
            min_area: 0,
            blur_size: (21, 21),
            threshold: 25,
            dilate_iterations: 2,
        });
        let result = detector.detect(&frame(64, 48), &frame(64, 48)).unwrap();
        assert!(!result.detected);
        assert!(result.regions.is_empty());
    }

    #[test]
    fn test_min_area_boundary() {
        let prev = frame(80, 60);
        // 20 x 25 = 500
        let curr = with_rect(prev.clone(), 10, 10, 20, 25);
        assert!(!exact(500).detect(&prev, &curr).unwrap().detected);

        // 501 pixels: the 500 block plus one pixel touching its edge
        let mut curr = with_rect(prev.clone(), 10, 10, 20, 25);
        curr.image.put_pixel(30, 10, Rgb([230, 230, 230]));
        let result = exact(500).detect(&prev, &curr).unwrap();
        assert!(result.detected);
        assert_eq!(result.regions.len(), 1);
        assert_eq!(result.regions[0].area, 501);
    }

    #[test]
    fn test_small_flicker_filtered_out() {
        let prev = frame(64, 64);
        let curr = with_rect(with_rect(prev.clone(), 2, 2, 2, 2), 30, 30, 20, 20);
        let result = exact(100).detect(&prev, &curr).unwrap();
        assert!(result.detected);
        assert_eq!(result.regions.len(), 1);
        assert_eq!(result.regions[0].area, 400);
    }

    #[test]
    fn test_default_pipeline_finds_square() {
        let detector = MotionDetector::new(DetectionSettings {
            min_area: 500,
            blur_size: (21, 21),
            threshold: 25,
            dilate_iterations: 2,
        });
        let prev = frame(160, 120);
        let curr = with_rect(prev.clone(), 50, 40, 50, 50);
        let result = detector.detect(&prev, &curr).unwrap();
        assert!(result.detected);
        assert_eq!(result.regions.len(), 1);
        let bounds = result.regions[0].bounds;
        assert!(bounds.x <= 50 && bounds.y <= 40);
        assert!(bounds.x + bounds.width >= 100 && bounds.y + bounds.height >= 90);
    }

    #[test]
    fn test_hollow_outline_counts_as_its_enclosed_area() {
        let prev = frame(80, 80);
        // Only the 2 px rim of a 40x40 square changes: 304 pixels enclosing 1600
        let mut curr = with_rect(prev.clone(), 10, 10, 40, 40);
        for y in 12..48 {
            for x in 12..48 {
                curr.image.put_pixel(x, y, Rgb([20, 20, 20]));
            }
        }
        let result = exact(500).detect(&prev, &curr).unwrap();
        assert!(result.detected);
        assert_eq!(result.regions.len(), 1);
        assert_eq!(result.regions[0].area, 1600);
    }

    #[test]
    fn test_prepared_reference_matches_detect() {
        let detector = MotionDetector::new(DetectionSettings {
            min_area: 500,
            blur_size: (21, 21),
            threshold: 25,
            dilate_iterations: 2,
        });
        let prev = frame(120, 90);
        let curr = with_rect(prev.clone(), 30, 20, 40, 40);
        let reference = detector.prepare(&prev);
        assert_eq!(
            detector.compare(&reference, &detector.prepare(&curr)).unwrap(),
            detector.detect(&prev, &curr).unwrap()
        );
        assert!(matches!(
            detector.compare(&reference, &detector.prepare(&frame(60, 90))),
            Err(DetectError::InvalidFrameDimensions { .. })
        ));
    }

    #[test]
    fn test_dimension_mismatch() {
        let err = exact(0).detect(&frame(10, 10), &frame(10, 12)).unwrap_err();
        assert_eq!(
            err,
            DetectError::InvalidFrameDimensions {
                expected: (10, 10),
                found: (10, 12)
            }
        );
    }

    #[test]
    fn test_even_kernel_is_clamped() {
        let detector = MotionDetector::new(DetectionSettings {
            min_area: 0,
            blur_size: (4, 0),
            threshold: 25,
            dilate_iterations: 0,
        });
        assert_eq!(detector.settings().blur_size, (5, 1));
    }
}
