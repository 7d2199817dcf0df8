use anyhow::Result;

use crate::detect::result::Detection;
use crate::frame::Frame;

/// Detector backend trait.
///
/// A backend is loaded once at startup and shared by every job, so `predict`
/// takes `&self` and must not keep per-call state that changes results.
pub trait DetectorBackend: Send + Sync {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    /// Run the model on one frame.
    ///
    /// Boxes are in the frame's pixel space. Backends apply their own
    /// confidence threshold; the adapter filters again regardless.
    fn predict(&self, frame: &Frame) -> Result<Vec<Detection>>;

    /// Optional warm-up hook.
    fn warm_up(&self) -> Result<()> {
        Ok(())
    }
}
