//! Box drawing for the annotated-image endpoints.

use ab_glyph::{FontArc, PxScale};
use anyhow::{anyhow, Context, Result};
use image::{DynamicImage, Rgb, RgbImage};
use imageproc::drawing::{draw_hollow_rect_mut, draw_text_mut};
use imageproc::rect::Rect;
use std::path::Path;

use crate::compress::encode_jpeg;
use crate::detect::Detection;

pub const BOX_COLOR: Rgb<u8> = Rgb([255, 0, 255]);
const STROKE_WIDTH: u32 = 3;
const LABEL_SCALE: f32 = 14.0;
const LABEL_OFFSET: i32 = 10;
const RESPONSE_JPEG_QUALITY: u8 = 75;

/// DejaVu Sans, see `fonts/LICENSE-DejaVu`.
const EMBEDDED_FONT: &[u8] = include_bytes!("../fonts/DejaVuSans.ttf");

/// Draws detection boxes with `"{class} {pct}%"` labels.
pub struct Annotator {
    font: Option<FontArc>,
    color: Rgb<u8>,
    stroke_width: u32,
}

impl Default for Annotator {
    fn default() -> Self {
        let font = match FontArc::try_from_slice(EMBEDDED_FONT) {
            Ok(font) => Some(font),
            Err(err) => {
                log::warn!("embedded label font unusable, drawing boxes only: {}", err);
                None
            }
        };
        Self {
            font,
            color: BOX_COLOR,
            stroke_width: STROKE_WIDTH,
        }
    }
}

impl Annotator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the embedded label font with a TrueType/OpenType file.
    pub fn with_font_file(mut self, path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path)
            .with_context(|| format!("read label font {}", path.display()))?;
        let font = FontArc::try_from_vec(bytes)
            .map_err(|e| anyhow!("invalid label font {}: {}", path.display(), e))?;
        self.font = Some(font);
        Ok(self)
    }

    /// Copy of `image` with every detection outlined.
    pub fn draw(&self, image: &DynamicImage, detections: &[Detection]) -> RgbImage {
        let mut canvas = image.to_rgb8();
        for detection in detections {
            self.draw_one(&mut canvas, detection);
        }
        canvas
    }

    /// Draw and encode as JPEG for the response body.
    pub fn annotate_jpeg(&self, image: &DynamicImage, detections: &[Detection]) -> Result<Vec<u8>> {
        let canvas = self.draw(image, detections);
        encode_jpeg(&DynamicImage::ImageRgb8(canvas), RESPONSE_JPEG_QUALITY)
    }

    fn draw_one(&self, canvas: &mut RgbImage, detection: &Detection) {
        let (canvas_w, canvas_h) = canvas.dimensions();
        let bbox = detection.bounding_box();

        // Clamp a stroke's width past each border so off-canvas edges stay
        // off-canvas and pixel math cannot overflow.
        let pad = self.stroke_width as f64 + 1.0;
        let clamp = |v: f64, limit: u32| v.round().clamp(-pad, limit as f64 + pad) as i32;
        let x0 = clamp(bbox.xmin, canvas_w);
        let y0 = clamp(bbox.ymin, canvas_h);
        let x1 = clamp(bbox.xmax, canvas_w);
        let y1 = clamp(bbox.ymax, canvas_h);
        if x1 <= 0 || y1 <= 0 || x0 >= canvas_w as i32 || y0 >= canvas_h as i32 {
            return;
        }
        let width = (x1 - x0).max(1) as u32;
        let height = (y1 - y0).max(1) as u32;

        // Strokes grow inward from the box edge.
        for inset in 0..self.stroke_width {
            let w = width.saturating_sub(2 * inset);
            let h = height.saturating_sub(2 * inset);
            if w == 0 || h == 0 {
                break;
            }
            let offset = inset as i32;
            let rect = Rect::at(x0.saturating_add(offset), y0.saturating_add(offset)).of_size(w, h);
            draw_hollow_rect_mut(canvas, rect, self.color);
        }

        if let Some(font) = &self.font {
            draw_text_mut(
                canvas,
                self.color,
                x0,
                y0.saturating_sub(LABEL_OFFSET),
                PxScale::from(LABEL_SCALE),
                font,
                &detection.label(),
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::GenericImageView;

    fn black(width: u32, height: u32) -> DynamicImage {
        DynamicImage::ImageRgb8(RgbImage::from_pixel(width, height, Rgb([0, 0, 0])))
    }

    #[test]
    fn draws_three_pixel_outline() {
        let annotator = Annotator::new();
        let detection = Detection::new(25.0, 25.0, 20.0, 20.0, "x", 0.9);
        let canvas = annotator.draw(&black(50, 50), &[detection]);

        // Box spans 15..35; strokes at 15, 16, 17.
        assert_eq!(*canvas.get_pixel(15, 25), BOX_COLOR);
        assert_eq!(*canvas.get_pixel(17, 25), BOX_COLOR);
        assert_eq!(*canvas.get_pixel(18, 25), Rgb([0, 0, 0]));
        assert_eq!(*canvas.get_pixel(25, 25), Rgb([0, 0, 0]));
        assert_eq!(*canvas.get_pixel(25, 34), BOX_COLOR);
    }

    #[test]
    fn boxes_outside_the_image_are_clipped() {
        let annotator = Annotator::new();
        let detection = Detection::new(-5.0, 48.0, 30.0, 30.0, "edge", 0.6);
        let canvas = annotator.draw(&black(50, 50), &[detection]);
        assert_eq!(canvas.dimensions(), (50, 50));
    }

    #[test]
    fn far_out_of_range_boxes_are_skipped() {
        let annotator = Annotator::new();
        let detections = [
            Detection::new(1e12, 10.0, 10.0, 10.0, "x", 0.9),
            Detection::new(-1e12, -1e12, 5.0, 5.0, "y", 0.9),
            Detection::new(25.0, 25.0, 1e13, 1e13, "z", 0.9),
        ];
        let canvas = annotator.draw(&black(50, 50), &detections[..2]);
        assert!(canvas.pixels().all(|p| *p == Rgb([0, 0, 0])));

        // Covers the whole canvas; every edge lands outside it.
        let canvas = annotator.draw(&black(50, 50), &detections[2..]);
        assert_eq!(canvas.dimensions(), (50, 50));
        assert_eq!(*canvas.get_pixel(25, 49), Rgb([0, 0, 0]));
    }

    #[test]
    fn labels_use_the_embedded_font() {
        let annotator = Annotator::new();
        let detection = Detection::new(50.0, 60.0, 40.0, 40.0, "satellite", 0.87);
        let canvas = annotator.draw(&black(100, 100), &[detection]);

        // Box top is y=40; the label sits above it.
        let label_band = (30..40).flat_map(|y| (30..90).map(move |x| (x, y)));
        let inked = label_band
            .filter(|&(x, y)| *canvas.get_pixel(x, y) != Rgb([0, 0, 0]))
            .count();
        assert!(inked > 0);
    }

    #[test]
    fn annotated_jpeg_keeps_dimensions() -> Result<()> {
        let annotator = Annotator::new();
        let bytes = annotator.annotate_jpeg(&black(64, 32), &[])?;
        let decoded = image::load_from_memory(&bytes)?;
        assert_eq!(decoded.dimensions(), (64, 32));
        Ok(())
    }

    #[test]
    fn missing_font_file_is_an_error() {
        let result = Annotator::new().with_font_file(Path::new("/nonexistent/font.ttf"));
        assert!(result.is_err());
    }
}
