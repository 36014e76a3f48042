use image::{Rgb, RgbImage};

use super::{Frame, MotionRegion};
use crate::config::ConfigVisualization;

const LABEL_ANCHOR: (u32, u32) = (10, 10);
const LABEL_SCALE: u32 = 3;
const MAX_THICKNESS: i64 = 16;

/// Draws motion outlines and a text label on a copy of the frame.
#[derive(Debug, Clone, PartialEq)]
pub struct Annotator {
    draw_contours: bool,
    contour_color: Rgb<u8>,
    thickness: u32,
    draw_label: bool,
    label_color: Rgb<u8>,
}

impl Annotator {
    /// Out of range colours and thickness are clamped, never rejected.
    pub fn new(cfg: &ConfigVisualization) -> Self {
        Self {
            draw_contours: cfg.draw_contours,
            contour_color: clamp_color(cfg.contour_color),
            thickness: cfg.contour_thickness.clamp(1, MAX_THICKNESS) as u32,
            draw_label: cfg.draw_timestamp,
            label_color: clamp_color(cfg.timestamp_color),
        }
    }

    pub fn annotate(&self, frame: &Frame, regions: &[MotionRegion], label: &str) -> Frame {
        let mut annotated = frame.clone();
        if self.draw_contours {
            for region in regions {
                for p in &region.boundary {
                    self.stamp(&mut annotated.image, p.x, p.y);
                }
            }
        }
        if self.draw_label {
            draw_text(
                &mut annotated.image,
                label,
                LABEL_ANCHOR,
                LABEL_SCALE,
                self.label_color,
            );
        }
        annotated
    }

    fn stamp(&self, img: &mut RgbImage, x: u32, y: u32) {
        let half = self.thickness / 2;
        let x0 = x.saturating_sub(half);
        let y0 = y.saturating_sub(half);
        for yy in y0..(y0 + self.thickness).min(img.height()) {
            for xx in x0..(x0 + self.thickness).min(img.width()) {
                img.put_pixel(xx, yy, self.contour_color);
            }
        }
    }
}

fn clamp_color(c: [i64; 3]) -> Rgb<u8> {
    Rgb(c.map(|v| v.clamp(0, 255) as u8))
}

fn draw_text(img: &mut RgbImage, text: &str, anchor: (u32, u32), scale: u32, color: Rgb<u8>) {
    let advance = (GLYPH_WIDTH + 1) * scale;
    for (i, ch) in text.chars().enumerate() {
        let origin_x = anchor.0 + i as u32 * advance;
        if origin_x >= img.width() {
            break;
        }
        for (row, bits) in glyph(ch).iter().enumerate() {
            for col in 0..GLYPH_WIDTH {
                if bits & (1 << (GLYPH_WIDTH - 1 - col)) == 0 {
                    continue;
                }
                let px = origin_x + col * scale;
                let py = anchor.1 + row as u32 * scale;
                for dy in 0..scale {
                    for dx in 0..scale {
                        if px + dx < img.width() && py + dy < img.height() {
                            img.put_pixel(px + dx, py + dy, color);
                        }
                    }
                }
            }
        }
    }
}

const GLYPH_WIDTH: u32 = 5;

/// 5x7 bitmap glyphs covering what timestamps need. Anything else renders as a box.
fn glyph(ch: char) -> [u8; 7] {
    match ch {
        '0' => [0x0E, 0x11, 0x13, 0x15, 0x19, 0x11, 0x0E],
        '1' => [0x04, 0x0C, 0x04, 0x04, 0x04, 0x04, 0x0E],
        '2' => [0x0E, 0x11, 0x01, 0x02, 0x04, 0x08, 0x1F],
        '3' => [0x1F, 0x02, 0x04, 0x02, 0x01, 0x11, 0x0E],
        '4' => [0x02, 0x06, 0x0A, 0x12, 0x1F, 0x02, 0x02],
        '5' => [0x1F, 0x10, 0x1E, 0x01, 0x01, 0x11, 0x0E],
        '6' => [0x06, 0x08, 0x10, 0x1E, 0x11, 0x11, 0x0E],
        '7' => [0x1F, 0x01, 0x02, 0x04, 0x08, 0x08, 0x08],
        '8' => [0x0E, 0x11, 0x11, 0x0E, 0x11, 0x11, 0x0E],
        '9' => [0x0E, 0x11, 0x11, 0x0F, 0x01, 0x02, 0x0C],
        '-' => [0x00, 0x00, 0x00, 0x1F, 0x00, 0x00, 0x00],
        ':' => [0x00, 0x0C, 0x0C, 0x00, 0x0C, 0x0C, 0x00],
        '_' => [0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x1F],
        '.' => [0x00, 0x00, 0x00, 0x00, 0x00, 0x0C, 0x0C],
        '/' => [0x00, 0x01, 0x02, 0x04, 0x08, 0x10, 0x00],
        ' ' => [0x00; 7],
        _ => [0x1F, 0x11, 0x11, 0x11, 0x11, 0x11, 0x1F],
    }
}
