//! Vehicle detection relay.
//!
//! A bot front end receives a photo or video, runs a pre-trained object
//! detector restricted to vehicle classes on it, burns the detections into
//! the media and replies with the annotated file.
//!
//! # Module Structure
//!
//! - `detect`: detector backends and the allow-list filtering adapter
//! - `render`: box and label overlays
//! - `store`: scoped temporary files for each job
//! - `media`: still image codecs and the FFmpeg video codec
//! - `pipeline`: still image and video jobs
//! - `transport`, `dispatch`: bot I/O and request routing
//! - `config`, `error`: runtime settings and error types

pub mod config;
pub mod detect;
pub mod dispatch;
pub mod error;
pub mod frame;
pub mod media;
pub mod pipeline;
pub mod render;
pub mod store;
pub mod transport;

pub use config::{BotToken, RelayConfig};
pub use detect::{
    load_backend, BackendSettings, BoundingBox, ClassAllowList, Detection, DetectorBackend,
    VehicleDetector,
};
pub use dispatch::{DispatchOutcome, Dispatcher};
pub use error::{CleanupError, RelayError, RelayResult};
pub use frame::Frame;
pub use media::{FfmpegCodec, FrameRate, VideoCodec, VideoInfo, VideoSink, VideoSource};
pub use pipeline::{
    Annotator, JobFailure, JobState, MediaKind, PipelineOutput, StillImagePipeline, VideoPipeline,
};
pub use render::{FrameRenderer, RenderOptions};
pub use store::{JobFiles, MediaHandle, StoreStats, TempMediaStore};
pub use transport::{BotTransport, InboundRequest, TelegramTransport};
