pub mod stub;

#[cfg(feature = "backend-tract")]
pub mod tract;

use anyhow::{anyhow, Result};

pub use stub::{StubBackend, StubDetection};

#[cfg(feature = "backend-tract")]
pub use tract::TractBackend;

use crate::detect::backend::DetectorBackend;

/// Model-level settings shared by every backend.
#[derive(Clone, Debug, PartialEq)]
pub struct BackendSettings {
    pub confidence: f32,
    pub iou: f32,
    /// Square model input edge in pixels.
    pub input_size: u32,
}

impl Default for BackendSettings {
    fn default() -> Self {
        Self {
            confidence: 0.5,
            iou: 0.45,
            input_size: 640,
        }
    }
}

/// Load the backend named by `model_path`.
///
/// `stub://empty` and `stub://center` select the scripted backend; anything
/// else is treated as a local ONNX file.
pub fn load_backend(model_path: &str, settings: &BackendSettings) -> Result<Box<dyn DetectorBackend>> {
    if let Some(name) = model_path.strip_prefix("stub://") {
        return match name {
            "empty" => Ok(Box::new(StubBackend::empty())),
            "center" => Ok(Box::new(StubBackend::center_car())),
            other => Err(anyhow!("unknown stub model '{}'", other)),
        };
    }
    if model_path.contains("://") {
        return Err(anyhow!(
            "model path must be a local file (no URL schemes): {}",
            model_path
        ));
    }

    #[cfg(feature = "backend-tract")]
    {
        let backend = TractBackend::new(model_path, settings)?;
        log::info!(
            "loaded ONNX model {} (input {}x{})",
            model_path,
            settings.input_size,
            settings.input_size
        );
        Ok(Box::new(backend))
    }
    #[cfg(not(feature = "backend-tract"))]
    {
        let _ = settings;
        Err(anyhow!(
            "loading {} requires the backend-tract feature",
            model_path
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_stub_models() {
        let settings = BackendSettings::default();
        assert_eq!(load_backend("stub://empty", &settings).unwrap().name(), "stub");
        assert!(load_backend("stub://nope", &settings).is_err());
        assert!(load_backend("https://example.com/best.onnx", &settings).is_err());
    }
}
