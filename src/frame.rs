//! Decoded frames and alert annotation.
//!
//! - `Frame`: one RGB24 image as produced by a frame source.
//! - `Frame::annotate`: draws the detector's boxes onto a copy of the frame.
//! - `encode_jpeg`: serializes an annotated frame for the alert artifact.

use anyhow::{anyhow, Context, Result};
use image::codecs::jpeg::JpegEncoder;
use image::{ImageBuffer, Rgb, RgbImage};
use imageproc::drawing::draw_hollow_rect_mut;
use imageproc::rect::Rect;
use std::time::Instant;

use crate::detect::{BoundingBox, DetectionBox};

/// Image attached to an alert.
pub type AnnotatedFrame = RgbImage;

const TARGET_COLOR: Rgb<u8> = Rgb([230, 40, 40]);
const BEST_COLOR: Rgb<u8> = Rgb([255, 220, 0]);
const OTHER_COLOR: Rgb<u8> = Rgb([90, 160, 255]);

pub const DEFAULT_JPEG_QUALITY: u8 = 85;

/// One decoded RGB24 frame.
pub struct Frame {
    pixels: Vec<u8>,
    pub width: u32,
    pub height: u32,
    /// 1-based position of the frame within its source.
    pub index: u64,
    pub captured_at: Instant,
}

impl Frame {
    pub fn new(pixels: Vec<u8>, width: u32, height: u32, index: u64) -> Result<Self> {
        let expected = (width as usize)
            .checked_mul(height as usize)
            .and_then(|v| v.checked_mul(3))
            .ok_or_else(|| anyhow!("frame dimensions overflow"))?;
        if pixels.len() != expected {
            return Err(anyhow!(
                "expected {} RGB bytes for {}x{}, received {}",
                expected,
                width,
                height,
                pixels.len()
            ));
        }
        Ok(Self {
            pixels,
            width,
            height,
            index,
            captured_at: Instant::now(),
        })
    }

    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    pub fn byte_len(&self) -> usize {
        self.pixels.len()
    }

    pub fn to_image(&self) -> RgbImage {
        ImageBuffer::from_raw(self.width, self.height, self.pixels.clone())
            .unwrap_or_else(|| RgbImage::new(self.width, self.height))
    }

    /// Copy of the frame with every detection outlined.
    ///
    /// Boxes of `target_class` are red, other classes blue, and `best` gets a
    /// thick yellow outline.
    pub fn annotate(
        &self,
        boxes: &[DetectionBox],
        target_class: u32,
        best: Option<&BoundingBox>,
    ) -> AnnotatedFrame {
        let mut image = self.to_image();
        for detection in boxes {
            let color = if detection.class_id == target_class {
                TARGET_COLOR
            } else {
                OTHER_COLOR
            };
            outline(&mut image, &detection.bbox, color, 1);
        }
        if let Some(best) = best {
            outline(&mut image, best, BEST_COLOR, 3);
        }
        image
    }
}

fn outline(image: &mut RgbImage, bbox: &BoundingBox, color: Rgb<u8>, thickness: i32) {
    let (w, h) = (image.width() as i32, image.height() as i32);
    if w == 0 || h == 0 {
        return;
    }
    for inset in 0..thickness {
        let x1 = bbox.x1.clamp(0, w - 1) + inset;
        let y1 = bbox.y1.clamp(0, h - 1) + inset;
        let x2 = bbox.x2.clamp(0, w) - inset;
        let y2 = bbox.y2.clamp(0, h) - inset;
        if x2 <= x1 || y2 <= y1 {
            return;
        }
        let rect = Rect::at(x1, y1).of_size((x2 - x1) as u32, (y2 - y1) as u32);
        draw_hollow_rect_mut(image, rect, color);
    }
}

pub fn encode_jpeg(image: &RgbImage, quality: u8) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    JpegEncoder::new_with_quality(&mut out, quality)
        .encode_image(image)
        .context("encode alert frame as jpeg")?;
    Ok(out)
}
