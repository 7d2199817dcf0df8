//! Detection overlay rendering.
//!
//! `FrameRenderer::render` is pure: it copies the input frame, draws boxes and
//! labels into the copy and returns it. With no detections the copy is
//! pixel-identical to the input.

mod font;

use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_filled_rect_mut, draw_hollow_rect_mut};
use imageproc::rect::Rect;

use crate::detect::{class_name, BoundingBox, Detection};
use crate::error::{RelayError, RelayResult};
use crate::frame::Frame;

use font::{glyph, text_width, GLYPH_HEIGHT};

/// Per-class box colours.
const PALETTE: [[u8; 3]; 10] = [
    [255, 56, 56],
    [255, 157, 151],
    [255, 112, 31],
    [255, 178, 29],
    [207, 210, 49],
    [72, 249, 10],
    [26, 147, 52],
    [0, 212, 187],
    [44, 153, 168],
    [0, 194, 255],
];

#[derive(Clone, Debug)]
pub struct RenderOptions {
    /// Box outline thickness in pixels.
    pub thickness: u32,
    /// Integer upscale of the bitmap font.
    pub label_scale: u32,
    pub draw_labels: bool,
}

impl Default for RenderOptions {
    fn default() -> Self {
        Self {
            thickness: 2,
            label_scale: 2,
            draw_labels: true,
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct FrameRenderer {
    options: RenderOptions,
}

impl FrameRenderer {
    pub fn new(options: RenderOptions) -> Self {
        Self { options }
    }

    /// Draw `detections` onto a copy of `frame`.
    pub fn render(&self, frame: &Frame, detections: &[Detection]) -> RelayResult<Frame> {
        if frame.width == 0 || frame.height == 0 {
            return Err(RelayError::render(format!(
                "frame has invalid dimensions {}x{}",
                frame.width, frame.height
            )));
        }
        for d in detections {
            validate_box(&d.bbox)?;
        }
        let mut canvas = frame.to_image().ok_or_else(|| {
            RelayError::render(format!(
                "frame buffer of {} bytes does not match {}x{}",
                frame.pixels().len(),
                frame.width,
                frame.height
            ))
        })?;

        for d in detections {
            self.draw_detection(&mut canvas, d);
        }

        Frame::from_image(canvas).map_err(|e| RelayError::render(e.to_string()))
    }

    fn draw_detection(&self, canvas: &mut RgbImage, detection: &Detection) {
        let (width, height) = canvas.dimensions();
        let bbox = detection.bbox.clamped(width, height);
        let x1 = bbox.x1.floor() as i32;
        let y1 = bbox.y1.floor() as i32;
        let x2 = (bbox.x2.ceil() as i32).min(width as i32);
        let y2 = (bbox.y2.ceil() as i32).min(height as i32);
        let color = Rgb(class_color(detection.class_id));

        for t in 0..self.options.thickness as i32 {
            let w = x2 - x1 - 2 * t;
            let h = y2 - y1 - 2 * t;
            if w <= 0 || h <= 0 {
                break;
            }
            draw_hollow_rect_mut(
                canvas,
                Rect::at(x1 + t, y1 + t).of_size(w as u32, h as u32),
                color,
            );
        }

        if self.options.draw_labels {
            let label = label_text(detection);
            self.draw_label(canvas, &label, x1, y1, color);
        }
    }

    fn draw_label(&self, canvas: &mut RgbImage, text: &str, x: i32, y: i32, color: Rgb<u8>) {
        let scale = self.options.label_scale.max(1);
        let pad = scale as i32;
        let tag_w = text_width(text, scale) as i32 + 2 * pad;
        let tag_h = (GLYPH_HEIGHT * scale) as i32 + 2 * pad;
        // Above the box when there is room, otherwise just inside it.
        let tag_y = if y - tag_h >= 0 { y - tag_h } else { y };
        draw_filled_rect_mut(
            canvas,
            Rect::at(x, tag_y).of_size(tag_w as u32, tag_h as u32),
            color,
        );

        draw_text(canvas, text, x + pad, tag_y + pad, scale, text_color(color.0));
    }
}

/// Draw `text` with the bitmap font, top-left at `(x, y)`. Unknown characters
/// leave a gap.
pub fn draw_text(canvas: &mut RgbImage, text: &str, x: i32, y: i32, scale: u32, ink: Rgb<u8>) {
    let scale = scale.max(1);
    let mut pen_x = x;
    for c in text.chars() {
        if let Some(rows) = glyph(c) {
            draw_glyph(canvas, rows, pen_x, y, scale, ink);
        }
        pen_x += (font::GLYPH_ADVANCE * scale) as i32;
    }
}

fn validate_box(bbox: &BoundingBox) -> RelayResult<()> {
    if !bbox.is_finite() {
        return Err(RelayError::render(format!(
            "detection box has non-finite coordinates {:?}",
            bbox
        )));
    }
    if bbox.x2 < bbox.x1 || bbox.y2 < bbox.y1 {
        return Err(RelayError::render(format!(
            "detection box is inverted {:?}",
            bbox
        )));
    }
    Ok(())
}

fn draw_glyph(canvas: &mut RgbImage, rows: [u8; 5], x: i32, y: i32, scale: u32, ink: Rgb<u8>) {
    let (width, height) = canvas.dimensions();
    for (row, bits) in rows.iter().enumerate() {
        for col in 0..font::GLYPH_WIDTH {
            if bits & (1 << (font::GLYPH_WIDTH - 1 - col)) == 0 {
                continue;
            }
            for dy in 0..scale {
                for dx in 0..scale {
                    let px = x + (col * scale + dx) as i32;
                    let py = y + (row as u32 * scale + dy) as i32;
                    if px >= 0 && py >= 0 && (px as u32) < width && (py as u32) < height {
                        canvas.put_pixel(px as u32, py as u32, ink);
                    }
                }
            }
        }
    }
}

pub fn class_color(class_id: u32) -> [u8; 3] {
    PALETTE[class_id as usize % PALETTE.len()]
}

fn text_color(background: [u8; 3]) -> Rgb<u8> {
    let luma = 0.299 * background[0] as f32
        + 0.587 * background[1] as f32
        + 0.114 * background[2] as f32;
    if luma > 150.0 {
        Rgb([0, 0, 0])
    } else {
        Rgb([255, 255, 255])
    }
}

/// `"<name> <confidence>"`, falling back to the numeric id.
pub fn label_text(detection: &Detection) -> String {
    match class_name(detection.class_id) {
        Some(name) => format!("{} {:.2}", name, detection.confidence),
        None => format!("{} {:.2}", detection.class_id, detection.confidence),
    }
}
