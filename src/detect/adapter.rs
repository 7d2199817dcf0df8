use anyhow::{anyhow, Result};

use crate::detect::backend::DetectorBackend;
use crate::detect::classes::ClassAllowList;
use crate::detect::result::Detection;
use crate::error::{RelayError, RelayResult};
use crate::frame::Frame;

/// Process-wide detection model.
///
/// Built once at startup and passed by reference into every job. The
/// confidence threshold and the allow-list are enforced here on top of
/// whatever the backend itself filters.
pub struct VehicleDetector {
    backend: Box<dyn DetectorBackend>,
    confidence_threshold: f32,
}

impl VehicleDetector {
    pub fn new(backend: Box<dyn DetectorBackend>, confidence_threshold: f32) -> Result<Self> {
        if !(0.0..=1.0).contains(&confidence_threshold) {
            return Err(anyhow!(
                "confidence threshold {} is outside [0, 1]",
                confidence_threshold
            ));
        }
        Ok(Self {
            backend,
            confidence_threshold,
        })
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    pub fn confidence_threshold(&self) -> f32 {
        self.confidence_threshold
    }

    pub fn warm_up(&self) -> RelayResult<()> {
        self.backend.warm_up().map_err(RelayError::inference)
    }

    /// Detect objects in one frame.
    ///
    /// The returned sequence keeps the backend's order and contains only
    /// detections at or above the threshold whose class is in `allowed`
    /// (when given).
    pub fn detect(
        &self,
        frame: &Frame,
        allowed: Option<&ClassAllowList>,
    ) -> RelayResult<Vec<Detection>> {
        let raw = self
            .backend
            .predict(frame)
            .map_err(RelayError::inference)?;
        let total = raw.len();
        let kept: Vec<Detection> = raw
            .into_iter()
            .filter(|d| d.confidence.is_finite() && d.confidence >= self.confidence_threshold)
            .filter(|d| allowed.map_or(true, |list| list.contains(d.class_id)))
            .collect();
        if kept.len() != total {
            log::trace!(
                "{}: kept {} of {} detections",
                self.backend.name(),
                kept.len(),
                total
            );
        }
        Ok(kept)
    }
}
