use std::io::Cursor;

use chrono::{DateTime, Utc};
use image::{GrayImage, ImageOutputFormat, RgbImage};

/// One captured image. `sequence` increases by one per frame read from the source.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub sequence: u64,
    pub captured_at: DateTime<Utc>,
    pub image: RgbImage,
}

impl Frame {
    pub fn new(sequence: u64, captured_at: DateTime<Utc>, image: RgbImage) -> Self {
        Self {
            sequence,
            captured_at,
            image,
        }
    }

    /// Wraps a packed RGB24 buffer. Returns `None` when the buffer is shorter than `width * height * 3`.
    pub fn from_rgb24(
        sequence: u64,
        captured_at: DateTime<Utc>,
        width: u32,
        height: u32,
        data: Vec<u8>,
    ) -> Option<Self> {
        RgbImage::from_raw(width, height, data).map(|image| Self::new(sequence, captured_at, image))
    }

    pub fn dimensions(&self) -> (u32, u32) {
        self.image.dimensions()
    }

    pub fn to_luma(&self) -> GrayImage {
        image::imageops::grayscale(&self.image)
    }

    pub fn encode_png(&self) -> Result<Vec<u8>, image::ImageError> {
        let mut buf = Vec::new();
        self.image
            .write_to(&mut Cursor::new(&mut buf), ImageOutputFormat::Png)?;
        Ok(buf)
    }
}
