//! Media pipelines.
//!
//! A job moves through `Received -> Decoded -> Detected -> Rendered ->
//! Written`; the dispatcher then marks it `Sent`. Any step may fail, in which
//! case the pipeline returns a [`JobFailure`] naming the last state reached.
//! Pipelines never release temporary files themselves; the caller owns the
//! [`JobFiles`](crate::store::JobFiles) scope.

mod still;
mod video;

use std::fmt;
use std::path::{Path, PathBuf};

use crate::detect::{ClassAllowList, Detection, VehicleDetector};
use crate::error::{RelayError, RelayResult};
use crate::frame::Frame;
use crate::render::FrameRenderer;

pub use still::StillImagePipeline;
pub use video::VideoPipeline;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MediaKind {
    Image,
    Video,
}

impl MediaKind {
    /// File suffix for temporary handles of this kind.
    pub fn suffix(&self) -> &'static str {
        match self {
            MediaKind::Image => ".jpg",
            MediaKind::Video => ".mp4",
        }
    }

    /// Guess from a file extension.
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        match ext.as_str() {
            "jpg" | "jpeg" | "png" | "bmp" | "webp" | "gif" => Some(MediaKind::Image),
            "mp4" | "mov" | "mkv" | "webm" | "avi" | "m4v" => Some(MediaKind::Video),
            _ => None,
        }
    }

    /// Guess from a MIME type such as `video/mp4`. Image types are limited to
    /// the formats the still decoder is built with.
    pub fn from_mime(mime: &str) -> Option<Self> {
        let mime = mime.split(';').next()?.trim().to_ascii_lowercase();
        match mime.as_str() {
            "image/jpeg" | "image/jpg" | "image/pjpeg" | "image/png" | "image/webp"
            | "image/gif" | "image/bmp" | "image/x-ms-bmp" => Some(MediaKind::Image),
            _ if mime.starts_with("video/") => Some(MediaKind::Video),
            _ => None,
        }
    }
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MediaKind::Image => f.write_str("image"),
            MediaKind::Video => f.write_str("video"),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum JobState {
    Received,
    Decoded,
    Detected,
    Rendered,
    Written,
    Sent,
    Failed,
}

/// A job that stopped before producing output.
#[derive(Debug)]
pub struct JobFailure {
    /// Last state reached before the failing step.
    pub reached: JobState,
    pub error: RelayError,
}

impl fmt::Display for JobFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (after {:?})", self.error, self.reached)
    }
}

impl std::error::Error for JobFailure {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.error)
    }
}

/// Annotated output ready to send.
#[derive(Clone, Debug, PartialEq)]
pub struct PipelineOutput {
    pub kind: MediaKind,
    pub path: PathBuf,
    pub frames: u64,
    pub detections: u64,
}

/// Detector, renderer and allow-list shared by both pipelines.
#[derive(Clone, Copy)]
pub struct Annotator<'a> {
    pub detector: &'a VehicleDetector,
    pub renderer: &'a FrameRenderer,
    pub allow_list: &'a ClassAllowList,
}

impl<'a> Annotator<'a> {
    pub fn new(
        detector: &'a VehicleDetector,
        renderer: &'a FrameRenderer,
        allow_list: &'a ClassAllowList,
    ) -> Self {
        Self {
            detector,
            renderer,
            allow_list,
        }
    }

    pub fn detect(&self, frame: &Frame) -> RelayResult<Vec<Detection>> {
        self.detector.detect(frame, Some(self.allow_list))
    }

    pub fn render(&self, frame: &Frame, detections: &[Detection]) -> RelayResult<Frame> {
        self.renderer.render(frame, detections)
    }
}

/// Records state transitions for one job.
pub(crate) struct JobTracker<'a> {
    job_id: &'a str,
    state: JobState,
}

impl<'a> JobTracker<'a> {
    pub(crate) fn new(job_id: &'a str) -> Self {
        log::debug!("job {}: {:?}", job_id, JobState::Received);
        Self {
            job_id,
            state: JobState::Received,
        }
    }

    pub(crate) fn advance(&mut self, next: JobState) {
        log::debug!("job {}: {:?} -> {:?}", self.job_id, self.state, next);
        self.state = next;
    }

    pub(crate) fn fail(&self, error: RelayError) -> JobFailure {
        JobFailure {
            reached: self.state,
            error,
        }
    }
}

/// Persist the inbound attachment to the job's input handle.
pub(crate) fn persist_input(path: &Path, bytes: &[u8]) -> RelayResult<()> {
    std::fs::write(path, bytes).map_err(|e| RelayError::io(path, e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_from_path_and_mime() {
        assert_eq!(MediaKind::from_path(Path::new("a/b.JPG")), Some(MediaKind::Image));
        assert_eq!(MediaKind::from_path(Path::new("clip.mov")), Some(MediaKind::Video));
        assert_eq!(MediaKind::from_path(Path::new("notes.txt")), None);
        assert_eq!(MediaKind::from_mime("video/quicktime"), Some(MediaKind::Video));
        assert_eq!(MediaKind::from_mime("image/png"), Some(MediaKind::Image));
        assert_eq!(MediaKind::from_mime("application/pdf"), None);
    }

    #[test]
    fn undecodable_image_types_are_not_media() {
        assert_eq!(MediaKind::from_mime("image/webp"), Some(MediaKind::Image));
        assert_eq!(MediaKind::from_mime("Image/JPEG; q=1"), Some(MediaKind::Image));
        assert_eq!(MediaKind::from_mime("image/heic"), None);
        assert_eq!(MediaKind::from_mime("image/svg+xml"), None);
        assert_eq!(MediaKind::from_mime("image/tiff"), None);
    }

    #[test]
    fn failure_reports_reached_state() {
        let mut tracker = JobTracker::new("job-1");
        tracker.advance(JobState::Decoded);
        let failure = tracker.fail(RelayError::render("bad box"));
        assert_eq!(failure.reached, JobState::Decoded);
        assert!(failure.to_string().contains("render failed"));
    }
}
