#![cfg(feature = "backend-tract")]

use std::path::Path;

use anyhow::{anyhow, Context, Result};
use image::imageops::{self, FilterType};
use image::{Rgb, RgbImage};
use tract_onnx::prelude::*;

use crate::detect::backend::DetectorBackend;
use crate::detect::backends::BackendSettings;
use crate::detect::postprocess::{decode_predictions, non_max_suppression, Letterbox};
use crate::detect::result::Detection;
use crate::frame::Frame;

/// Grey used by Ultralytics for letterbox padding.
const PAD_VALUE: u8 = 114;

/// Tract-based backend for YOLO-style ONNX exports.
///
/// The model is loaded and optimised once; inference only reads it.
pub struct TractBackend {
    model: TypedSimplePlan<TypedModel>,
    input_size: u32,
    confidence_threshold: f32,
    iou_threshold: f32,
}

impl TractBackend {
    /// Load an ONNX model from disk and prepare it for inference.
    pub fn new<P: AsRef<Path>>(model_path: P, settings: &BackendSettings) -> Result<Self> {
        let model_path = model_path.as_ref();
        let size = settings.input_size as usize;
        let model = tract_onnx::onnx()
            .model_for_path(model_path)
            .with_context(|| format!("failed to load ONNX model from {}", model_path.display()))?
            .with_input_fact(0, f32::fact([1, 3, size, size]).into())
            .context("failed to set input fact")?
            .into_optimized()
            .context("failed to optimize ONNX model")?
            .into_runnable()
            .context("failed to build runnable ONNX model")?;

        Ok(Self {
            model,
            input_size: settings.input_size,
            confidence_threshold: settings.confidence,
            iou_threshold: settings.iou,
        })
    }

    fn build_input(&self, frame: &Frame) -> Result<(Tensor, Letterbox)> {
        let letterbox = Letterbox::compute(frame.width, frame.height, self.input_size)?;
        let source = frame
            .to_image()
            .ok_or_else(|| anyhow!("frame buffer does not match {}x{}", frame.width, frame.height))?;
        let resized = imageops::resize(
            &source,
            letterbox.resized_w,
            letterbox.resized_h,
            FilterType::Triangle,
        );
        let mut canvas = RgbImage::from_pixel(
            self.input_size,
            self.input_size,
            Rgb([PAD_VALUE, PAD_VALUE, PAD_VALUE]),
        );
        imageops::replace(
            &mut canvas,
            &resized,
            letterbox.pad_x.floor() as i64,
            letterbox.pad_y.floor() as i64,
        );

        let size = self.input_size as usize;
        let input = tract_ndarray::Array4::from_shape_fn((1, 3, size, size), |(_, c, y, x)| {
            canvas.get_pixel(x as u32, y as u32)[c] as f32 / 255.0
        });
        Ok((input.into_tensor(), letterbox))
    }
}

impl DetectorBackend for TractBackend {
    fn name(&self) -> &'static str {
        "tract"
    }

    fn predict(&self, frame: &Frame) -> Result<Vec<Detection>> {
        let (input, letterbox) = self.build_input(frame)?;
        let outputs = self
            .model
            .run(tvec!(input.into()))
            .context("ONNX inference failed")?;
        let output = outputs
            .first()
            .ok_or_else(|| anyhow!("model produced no outputs"))?;
        let view = output
            .to_array_view::<f32>()
            .context("model output tensor was not f32")?;
        let shape = view.shape().to_vec();
        let data: Vec<f32> = view.iter().copied().collect();
        let candidates =
            decode_predictions(&data, &shape, &letterbox, self.confidence_threshold)?;
        Ok(non_max_suppression(candidates, self.iou_threshold))
    }

    fn warm_up(&self) -> Result<()> {
        let frame = Frame::filled(self.input_size, self.input_size, [0, 0, 0])?;
        self.predict(&frame).map(|_| ())
    }
}
