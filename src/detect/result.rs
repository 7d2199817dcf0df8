/// Axis-aligned box in source-frame pixel coordinates.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BoundingBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

impl BoundingBox {
    pub fn new(x1: f32, y1: f32, x2: f32, y2: f32) -> Self {
        Self { x1, y1, x2, y2 }
    }

    pub fn width(&self) -> f32 {
        self.x2 - self.x1
    }

    pub fn height(&self) -> f32 {
        self.y2 - self.y1
    }

    pub fn area(&self) -> f32 {
        self.width().max(0.0) * self.height().max(0.0)
    }

    pub fn is_finite(&self) -> bool {
        self.x1.is_finite() && self.y1.is_finite() && self.x2.is_finite() && self.y2.is_finite()
    }

    /// Intersection over union; zero when either box is empty.
    pub fn iou(&self, other: &BoundingBox) -> f32 {
        let inter_w = (self.x2.min(other.x2) - self.x1.max(other.x1)).max(0.0);
        let inter_h = (self.y2.min(other.y2) - self.y1.max(other.y1)).max(0.0);
        let inter = inter_w * inter_h;
        let union = self.area() + other.area() - inter;
        if union > f32::EPSILON {
            inter / union
        } else {
            0.0
        }
    }

    /// Clamp into `[0, width] x [0, height]`.
    pub fn clamped(&self, width: u32, height: u32) -> Self {
        let w = width as f32;
        let h = height as f32;
        Self {
            x1: self.x1.clamp(0.0, w),
            y1: self.y1.clamp(0.0, h),
            x2: self.x2.clamp(0.0, w),
            y2: self.y2.clamp(0.0, h),
        }
    }
}

/// One model output for one frame.
#[derive(Clone, Debug, PartialEq)]
pub struct Detection {
    pub class_id: u32,
    /// Confidence in `[0, 1]`.
    pub confidence: f32,
    pub bbox: BoundingBox,
}

impl Detection {
    pub fn new(class_id: u32, confidence: f32, bbox: BoundingBox) -> Self {
        Self {
            class_id,
            confidence,
            bbox,
        }
    }
}
