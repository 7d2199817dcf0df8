//! Media decoding and encoding.
//!
//! Still images go through the `image` crate. Video goes through the
//! [`VideoCodec`] seam so pipelines can be exercised without FFmpeg; the
//! production codec is [`FfmpegCodec`].

pub mod ffmpeg;
pub mod still;

use std::fmt;
use std::path::Path;

use anyhow::{anyhow, Result};

use crate::error::RelayResult;
use crate::frame::Frame;

pub use ffmpeg::FfmpegCodec;
pub use still::{decode_image_file, encode_image_file};

/// Exact rational frame rate, e.g. `30000/1001`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FrameRate {
    pub num: u32,
    pub den: u32,
}

impl FrameRate {
    pub fn new(num: u32, den: u32) -> Result<Self> {
        if num == 0 || den == 0 {
            return Err(anyhow!("invalid frame rate {}/{}", num, den));
        }
        Ok(Self { num, den })
    }

    /// Parse `"num/den"` or a plain integer.
    pub fn parse(value: &str) -> Result<Self> {
        let value = value.trim();
        let (num, den) = match value.split_once('/') {
            Some((num, den)) => (num.trim(), den.trim()),
            None => (value, "1"),
        };
        let num = num
            .parse::<u32>()
            .map_err(|_| anyhow!("invalid frame rate '{}'", value))?;
        let den = den
            .parse::<u32>()
            .map_err(|_| anyhow!("invalid frame rate '{}'", value))?;
        Self::new(num, den)
    }

    pub fn as_f64(&self) -> f64 {
        self.num as f64 / self.den as f64
    }
}

impl fmt::Display for FrameRate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.num, self.den)
    }
}

/// Stream parameters shared by a source and the sink built from it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct VideoInfo {
    pub width: u32,
    pub height: u32,
    pub frame_rate: FrameRate,
}

/// Sequential frame reader.
pub trait VideoSource {
    fn info(&self) -> VideoInfo;

    /// Next frame in presentation order; `Ok(None)` at end of stream.
    fn read_frame(&mut self) -> RelayResult<Option<Frame>>;

    /// Stop decoding and free the underlying resources. Idempotent.
    fn close(&mut self) -> RelayResult<()>;
}

/// Sequential frame writer.
pub trait VideoSink {
    fn write_frame(&mut self, frame: &Frame) -> RelayResult<()>;

    /// Flush and finalise the container. Idempotent.
    fn finish(&mut self) -> RelayResult<()>;

    /// Stop without finalising; the output is left incomplete. Idempotent.
    fn abort(&mut self);
}

/// Opens sources and sinks for files on disk.
pub trait VideoCodec {
    fn open_source(&self, path: &Path) -> RelayResult<Box<dyn VideoSource>>;

    /// Open a sink writing `info.width x info.height` at `info.frame_rate`.
    fn open_sink(&self, path: &Path, info: &VideoInfo) -> RelayResult<Box<dyn VideoSink>>;
}
