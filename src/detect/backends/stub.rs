use anyhow::{anyhow, Result};
use std::sync::atomic::{AtomicU64, Ordering};

use crate::detect::backend::DetectorBackend;
use crate::detect::result::{BoundingBox, Detection};
use crate::frame::Frame;

/// Scripted backend for tests and model-less runs.
///
/// Each call returns the next entry of the script (cycling); frame-relative
/// boxes are scaled to the frame being predicted on.
pub struct StubBackend {
    script: Vec<Vec<StubDetection>>,
    fail_on_call: Option<u64>,
    calls: AtomicU64,
}

/// A detection with box coordinates as fractions of the frame size.
#[derive(Clone, Copy, Debug)]
pub struct StubDetection {
    pub class_id: u32,
    pub confidence: f32,
    pub rel: [f32; 4],
}

impl StubDetection {
    pub fn new(class_id: u32, confidence: f32, rel: [f32; 4]) -> Self {
        Self {
            class_id,
            confidence,
            rel,
        }
    }
}

impl StubBackend {
    /// Never detects anything.
    pub fn empty() -> Self {
        Self::scripted(vec![Vec::new()])
    }

    /// One car covering the middle half of every frame.
    pub fn center_car() -> Self {
        Self::scripted(vec![vec![StubDetection::new(
            2,
            0.9,
            [0.25, 0.25, 0.75, 0.75],
        )]])
    }

    pub fn scripted(script: Vec<Vec<StubDetection>>) -> Self {
        Self {
            script,
            fail_on_call: None,
            calls: AtomicU64::new(0),
        }
    }

    /// Fault on the given zero-based call.
    pub fn failing_on(mut self, call: u64) -> Self {
        self.fail_on_call = Some(call);
        self
    }

    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Default for StubBackend {
    fn default() -> Self {
        Self::empty()
    }
}

impl DetectorBackend for StubBackend {
    fn name(&self) -> &'static str {
        "stub"
    }

    fn predict(&self, frame: &Frame) -> Result<Vec<Detection>> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_on_call == Some(call) {
            return Err(anyhow!("stub backend fault on call {}", call));
        }
        if self.script.is_empty() {
            return Ok(Vec::new());
        }
        let entry = &self.script[(call as usize) % self.script.len()];
        let (w, h) = (frame.width as f32, frame.height as f32);
        Ok(entry
            .iter()
            .map(|d| {
                Detection::new(
                    d.class_id,
                    d.confidence,
                    BoundingBox::new(d.rel[0] * w, d.rel[1] * h, d.rel[2] * w, d.rel[3] * h),
                )
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scales_boxes_to_frame() {
        let backend = StubBackend::center_car();
        let frame = Frame::filled(200, 100, [0, 0, 0]).unwrap();
        let dets = backend.predict(&frame).unwrap();
        assert_eq!(dets.len(), 1);
        assert_eq!(dets[0].bbox, BoundingBox::new(50.0, 25.0, 150.0, 75.0));
    }

    #[test]
    fn fails_on_requested_call_only() {
        let backend = StubBackend::empty().failing_on(1);
        let frame = Frame::filled(8, 8, [0, 0, 0]).unwrap();
        assert!(backend.predict(&frame).is_ok());
        assert!(backend.predict(&frame).is_err());
        assert!(backend.predict(&frame).is_ok());
        assert_eq!(backend.calls(), 3);
    }
}
