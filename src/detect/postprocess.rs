//! YOLO output decoding.
//!
//! Ultralytics exports emit one tensor of shape `[1, 4 + C, N]` (or the
//! transposed `[1, N, 4 + C]`): centre-x, centre-y, width, height in
//! letterboxed input pixels, followed by `C` per-class scores.

use anyhow::{anyhow, Result};

use crate::detect::result::{BoundingBox, Detection};

/// Upper bound on candidates fed to NMS.
const MAX_NMS_INPUTS: usize = 4096;

/// Mapping between the source frame and the square model input.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Letterbox {
    pub scale: f32,
    pub pad_x: f32,
    pub pad_y: f32,
    pub orig_w: u32,
    pub orig_h: u32,
    /// Resized content size inside the square input.
    pub resized_w: u32,
    pub resized_h: u32,
}

impl Letterbox {
    pub fn compute(orig_w: u32, orig_h: u32, input_size: u32) -> Result<Self> {
        if orig_w == 0 || orig_h == 0 || input_size == 0 {
            return Err(anyhow!(
                "cannot letterbox {}x{} into {}",
                orig_w,
                orig_h,
                input_size
            ));
        }
        let size = input_size as f32;
        let scale = (size / orig_w as f32).min(size / orig_h as f32);
        let resized_w = ((orig_w as f32 * scale).round() as u32).clamp(1, input_size);
        let resized_h = ((orig_h as f32 * scale).round() as u32).clamp(1, input_size);
        Ok(Self {
            scale,
            pad_x: (input_size - resized_w) as f32 / 2.0,
            pad_y: (input_size - resized_h) as f32 / 2.0,
            orig_w,
            orig_h,
            resized_w,
            resized_h,
        })
    }

    fn to_source(&self, cx: f32, cy: f32, w: f32, h: f32) -> BoundingBox {
        BoundingBox::new(
            (cx - w / 2.0 - self.pad_x) / self.scale,
            (cy - h / 2.0 - self.pad_y) / self.scale,
            (cx + w / 2.0 - self.pad_x) / self.scale,
            (cy + h / 2.0 - self.pad_y) / self.scale,
        )
        .clamped(self.orig_w, self.orig_h)
    }
}

/// Decode raw predictions into source-space detections above `threshold`.
///
/// `shape` is the output tensor shape; a leading batch dimension of one is
/// accepted and ignored.
pub fn decode_predictions(
    data: &[f32],
    shape: &[usize],
    letterbox: &Letterbox,
    threshold: f32,
) -> Result<Vec<Detection>> {
    let (a, b) = match shape {
        [1, a, b] | [a, b] => (*a, *b),
        other => return Err(anyhow!("unexpected prediction shape {:?}", other)),
    };
    if a.checked_mul(b) != Some(data.len()) {
        return Err(anyhow!(
            "prediction shape {:?} does not match {} values",
            shape,
            data.len()
        ));
    }

    // Anchors outnumber features in every YOLO head.
    let features_first = a <= b;
    let (features, anchors) = if features_first { (a, b) } else { (b, a) };
    if features <= 4 {
        return Err(anyhow!("prediction has no class scores ({:?})", shape));
    }
    let value = |anchor: usize, feature: usize| -> f32 {
        if features_first {
            data[feature * anchors + anchor]
        } else {
            data[anchor * features + feature]
        }
    };

    let mut candidates = Vec::new();
    for anchor in 0..anchors {
        let (class_id, score) = (4..features)
            .map(|f| (f - 4, value(anchor, f)))
            .fold((0usize, f32::NEG_INFINITY), |best, cur| {
                if cur.1 > best.1 {
                    cur
                } else {
                    best
                }
            });
        if !score.is_finite() || score < threshold {
            continue;
        }
        let (cx, cy, w, h) = (
            value(anchor, 0),
            value(anchor, 1),
            value(anchor, 2),
            value(anchor, 3),
        );
        if !(cx.is_finite() && cy.is_finite() && w.is_finite() && h.is_finite()) {
            continue;
        }
        if w <= 0.0 || h <= 0.0 {
            continue;
        }
        let bbox = letterbox.to_source(cx, cy, w, h);
        if bbox.width() < 1.0 || bbox.height() < 1.0 {
            continue;
        }
        candidates.push(Detection::new(class_id as u32, score.min(1.0), bbox));
    }
    Ok(candidates)
}

/// Per-class non-maximum suppression. Output is ordered by descending
/// confidence; ties keep their input order.
pub fn non_max_suppression(mut detections: Vec<Detection>, iou_threshold: f32) -> Vec<Detection> {
    detections.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
    if detections.len() > MAX_NMS_INPUTS {
        log::warn!(
            "nms input truncated from {} to {}",
            detections.len(),
            MAX_NMS_INPUTS
        );
        detections.truncate(MAX_NMS_INPUTS);
    }

    let mut kept: Vec<Detection> = Vec::with_capacity(detections.len().min(100));
    for candidate in detections {
        let suppressed = kept.iter().any(|k| {
            k.class_id == candidate.class_id && k.bbox.iou(&candidate.bbox) > iou_threshold
        });
        if !suppressed {
            kept.push(candidate);
        }
    }
    kept
}
