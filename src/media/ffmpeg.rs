//! FFmpeg CLI video codec.
//!
//! Decoding runs `ffmpeg` with a raw RGB24 pipe on stdout; encoding feeds raw
//! RGB24 frames into `ffmpeg` on stdin. Stream parameters come from
//! `ffprobe`. Children are killed and reaped if a source or sink is dropped
//! without being closed.
//!
//! The decoder applies display rotation, so frames arrive upright and the
//! probed geometry is the displayed one. The encoder writes upright frames
//! with no rotation metadata.

use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, ChildStdout, Command, ExitStatus, Stdio};
use std::thread::JoinHandle;

use anyhow::{anyhow, Context, Result};
use serde::Deserialize;

use crate::error::{RelayError, RelayResult};
use crate::frame::{expected_len, Frame};
use crate::media::{FrameRate, VideoCodec, VideoInfo, VideoSink, VideoSource};

pub const DEFAULT_VIDEO_CODEC: &str = "libx264";

#[derive(Clone, Debug)]
pub struct FfmpegCodec {
    ffmpeg: PathBuf,
    ffprobe: PathBuf,
    video_codec: String,
}

#[derive(Debug, Deserialize)]
struct ProbeOutput {
    #[serde(default)]
    streams: Vec<ProbeStream>,
}

#[derive(Debug, Deserialize)]
struct ProbeStream {
    width: Option<u32>,
    height: Option<u32>,
    r_frame_rate: Option<String>,
    avg_frame_rate: Option<String>,
    #[serde(default)]
    tags: ProbeTags,
    #[serde(default)]
    side_data_list: Vec<ProbeSideData>,
}

#[derive(Debug, Default, Deserialize)]
struct ProbeTags {
    rotate: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ProbeSideData {
    rotation: Option<f64>,
}

impl ProbeStream {
    /// Display rotation in degrees, normalised to `0..360`.
    fn rotation(&self) -> i64 {
        let degrees = self
            .side_data_list
            .iter()
            .find_map(|side| side.rotation)
            .or_else(|| {
                self.tags
                    .rotate
                    .as_deref()
                    .and_then(|r| r.trim().parse::<f64>().ok())
            })
            .unwrap_or(0.0);
        (degrees.round() as i64).rem_euclid(360)
    }
}

impl FfmpegCodec {
    pub fn new(ffmpeg: PathBuf, ffprobe: PathBuf, video_codec: impl Into<String>) -> Self {
        Self {
            ffmpeg,
            ffprobe,
            video_codec: video_codec.into(),
        }
    }

    /// Resolve binaries, searching `PATH` for any not given explicitly.
    pub fn locate(
        ffmpeg: Option<&Path>,
        ffprobe: Option<&Path>,
        video_codec: impl Into<String>,
    ) -> Result<Self> {
        let ffmpeg = match ffmpeg {
            Some(path) => path.to_path_buf(),
            None => which::which("ffmpeg").context("ffmpeg not found in PATH")?,
        };
        let ffprobe = match ffprobe {
            Some(path) => path.to_path_buf(),
            None => which::which("ffprobe").context("ffprobe not found in PATH")?,
        };
        Ok(Self::new(ffmpeg, ffprobe, video_codec))
    }

    /// Width, height and frame rate of the first video stream.
    pub fn probe(&self, path: &Path) -> RelayResult<VideoInfo> {
        let output = Command::new(&self.ffprobe)
            .args([
                "-v",
                "error",
                "-select_streams",
                "v:0",
                "-show_entries",
                "stream=width,height,r_frame_rate,avg_frame_rate:stream_tags=rotate:stream_side_data=rotation",
                "-of",
                "json",
            ])
            .arg(path)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .map_err(|e| RelayError::decode_with("spawn ffprobe", e))?;

        if !output.status.success() {
            return Err(RelayError::decode_with(
                format!("ffprobe rejected {}", path.display()),
                anyhow!("{}", String::from_utf8_lossy(&output.stderr).trim()),
            ));
        }
        parse_probe(&output.stdout)
            .map_err(|e| RelayError::decode_with(format!("probe {}", path.display()), e))
    }

    fn decode_args(&self, path: &Path) -> Vec<String> {
        vec![
            "-hide_banner".into(),
            "-loglevel".into(),
            "error".into(),
            "-nostdin".into(),
            "-i".into(),
            path.to_string_lossy().into_owned(),
            "-map".into(),
            "0:v:0".into(),
            "-vsync".into(),
            "passthrough".into(),
            "-f".into(),
            "rawvideo".into(),
            "-pix_fmt".into(),
            "rgb24".into(),
            "pipe:1".into(),
        ]
    }

    fn encode_args(&self, path: &Path, info: &VideoInfo) -> Vec<String> {
        let pix_fmt = pixel_format(info);
        let rate = info.frame_rate.to_string();
        vec![
            "-hide_banner".into(),
            "-loglevel".into(),
            "error".into(),
            "-y".into(),
            "-f".into(),
            "rawvideo".into(),
            "-pix_fmt".into(),
            "rgb24".into(),
            "-s".into(),
            format!("{}x{}", info.width, info.height),
            "-framerate".into(),
            rate.clone(),
            "-i".into(),
            "pipe:0".into(),
            "-an".into(),
            "-c:v".into(),
            self.video_codec.clone(),
            "-pix_fmt".into(),
            pix_fmt.into(),
            "-r".into(),
            rate,
            "-movflags".into(),
            "+faststart".into(),
            path.to_string_lossy().into_owned(),
        ]
    }
}

impl VideoCodec for FfmpegCodec {
    fn open_source(&self, path: &Path) -> RelayResult<Box<dyn VideoSource>> {
        let info = self.probe(path)?;
        let mut child = Command::new(&self.ffmpeg)
            .args(self.decode_args(path))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| RelayError::decode_with("spawn ffmpeg decoder", e))?;
        let stdout = child.stdout.take();
        let stderr = collect_stderr(&mut child);
        let frame_len = expected_len(info.width, info.height)
            .ok_or_else(|| RelayError::decode("video dimensions overflow"))?;
        log::debug!(
            "ffmpeg decoder for {} ({}x{} @ {})",
            path.display(),
            info.width,
            info.height,
            info.frame_rate
        );
        Ok(Box::new(FfmpegSource {
            info,
            frame_len,
            child: Some(child),
            stdout,
            stderr,
        }))
    }

    fn open_sink(&self, path: &Path, info: &VideoInfo) -> RelayResult<Box<dyn VideoSink>> {
        if pixel_format(info) != "yuv420p" {
            log::warn!(
                "{}x{} has an odd dimension; encoding 4:4:4, which many mobile players reject",
                info.width,
                info.height
            );
        }
        let mut child = Command::new(&self.ffmpeg)
            .args(self.encode_args(path, info))
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| RelayError::encode_with("spawn ffmpeg encoder", e))?;
        let stdin = child.stdin.take();
        let stderr = collect_stderr(&mut child);
        log::debug!(
            "ffmpeg encoder for {} ({}x{} @ {}, {})",
            path.display(),
            info.width,
            info.height,
            info.frame_rate,
            self.video_codec
        );
        Ok(Box::new(FfmpegSink {
            info: *info,
            child: Some(child),
            stdin,
            stderr,
        }))
    }
}

/// 4:2:0 needs even dimensions. Odd sizes fall back to 4:4:4 so the output
/// keeps the source geometry, at the cost of High 4:4:4 profile output that
/// most phone and browser decoders refuse.
fn pixel_format(info: &VideoInfo) -> &'static str {
    if info.width % 2 == 0 && info.height % 2 == 0 {
        "yuv420p"
    } else {
        "yuv444p"
    }
}

fn parse_probe(raw: &[u8]) -> Result<VideoInfo> {
    let probe: ProbeOutput = serde_json::from_slice(raw).context("invalid ffprobe output")?;
    let stream = probe
        .streams
        .into_iter()
        .next()
        .ok_or_else(|| anyhow!("no video stream"))?;
    let width = stream.width.filter(|w| *w > 0).ok_or_else(|| anyhow!("missing width"))?;
    let height = stream
        .height
        .filter(|h| *h > 0)
        .ok_or_else(|| anyhow!("missing height"))?;
    let rotation = stream.rotation();
    let frame_rate = [stream.avg_frame_rate, stream.r_frame_rate]
        .into_iter()
        .flatten()
        .find_map(|rate| FrameRate::parse(&rate).ok())
        .ok_or_else(|| anyhow!("missing frame rate"))?;
    let (width, height) = match rotation {
        90 | 270 => (height, width),
        _ => (width, height),
    };
    Ok(VideoInfo {
        width,
        height,
        frame_rate,
    })
}

fn collect_stderr(child: &mut Child) -> Option<JoinHandle<String>> {
    let mut stderr = child.stderr.take()?;
    Some(std::thread::spawn(move || {
        let mut text = String::new();
        let _ = stderr.read_to_string(&mut text);
        text
    }))
}

fn join_stderr(handle: Option<JoinHandle<String>>) -> String {
    handle
        .and_then(|h| h.join().ok())
        .map(|text| text.trim().to_string())
        .unwrap_or_default()
}

fn kill_and_reap(child: &mut Child) -> io::Result<ExitStatus> {
    // Already exited is fine; `wait` still reaps it.
    let _ = child.kill();
    child.wait()
}

struct FfmpegSource {
    info: VideoInfo,
    frame_len: usize,
    child: Option<Child>,
    stdout: Option<ChildStdout>,
    stderr: Option<JoinHandle<String>>,
}

impl FfmpegSource {
    /// Fill `buf` completely; returns the number of bytes read before EOF.
    fn read_full(stdout: &mut ChildStdout, buf: &mut [u8]) -> io::Result<usize> {
        let mut filled = 0;
        while filled < buf.len() {
            match stdout.read(&mut buf[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(filled)
    }

    /// Reap the decoder after EOF and surface a failed exit.
    fn finish_stream(&mut self) -> RelayResult<()> {
        self.stdout = None;
        let Some(mut child) = self.child.take() else {
            return Ok(());
        };
        let status = child
            .wait()
            .map_err(|e| RelayError::decode_with("wait for ffmpeg decoder", e))?;
        let stderr = join_stderr(self.stderr.take());
        if status.success() {
            Ok(())
        } else {
            Err(RelayError::decode_with(
                format!("ffmpeg decoder exited with {}", status),
                anyhow!("{}", stderr),
            ))
        }
    }
}

impl VideoSource for FfmpegSource {
    fn info(&self) -> VideoInfo {
        self.info
    }

    fn read_frame(&mut self) -> RelayResult<Option<Frame>> {
        let Some(stdout) = self.stdout.as_mut() else {
            return Ok(None);
        };
        let mut buf = vec![0u8; self.frame_len];
        let filled = Self::read_full(stdout, &mut buf)
            .map_err(|e| RelayError::decode_with("read decoded frame", e))?;
        if filled == 0 {
            self.finish_stream()?;
            return Ok(None);
        }
        if filled < self.frame_len {
            let _ = self.finish_stream();
            return Err(RelayError::decode(format!(
                "truncated frame: {} of {} bytes",
                filled, self.frame_len
            )));
        }
        let frame = Frame::new(self.info.width, self.info.height, buf)
            .map_err(|e| RelayError::decode_with("wrap decoded frame", e))?;
        Ok(Some(frame))
    }

    fn close(&mut self) -> RelayResult<()> {
        self.stdout = None;
        if let Some(mut child) = self.child.take() {
            kill_and_reap(&mut child)
                .map_err(|e| RelayError::decode_with("stop ffmpeg decoder", e))?;
        }
        let _ = join_stderr(self.stderr.take());
        Ok(())
    }
}

impl Drop for FfmpegSource {
    fn drop(&mut self) {
        if let Some(mut child) = self.child.take() {
            let _ = kill_and_reap(&mut child);
        }
    }
}

struct FfmpegSink {
    info: VideoInfo,
    child: Option<Child>,
    stdin: Option<ChildStdin>,
    stderr: Option<JoinHandle<String>>,
}

impl FfmpegSink {
    fn failure(&mut self, context: String) -> RelayError {
        let stderr = match self.child.take() {
            Some(mut child) => {
                let _ = kill_and_reap(&mut child);
                join_stderr(self.stderr.take())
            }
            None => String::new(),
        };
        RelayError::encode_with(context, anyhow!("{}", stderr))
    }
}

impl VideoSink for FfmpegSink {
    fn write_frame(&mut self, frame: &Frame) -> RelayResult<()> {
        if frame.width != self.info.width || frame.height != self.info.height {
            return Err(RelayError::encode(format!(
                "frame {}x{} does not match sink {}x{}",
                frame.width, frame.height, self.info.width, self.info.height
            )));
        }
        let Some(stdin) = self.stdin.as_mut() else {
            return Err(RelayError::encode("sink already closed"));
        };
        if let Err(e) = stdin.write_all(frame.pixels()) {
            self.stdin = None;
            return Err(self.failure(format!("write frame to ffmpeg encoder: {}", e)));
        }
        Ok(())
    }

    fn finish(&mut self) -> RelayResult<()> {
        // Closing stdin signals end of stream.
        self.stdin = None;
        let Some(mut child) = self.child.take() else {
            return Ok(());
        };
        let status = child
            .wait()
            .map_err(|e| RelayError::encode_with("wait for ffmpeg encoder", e))?;
        let stderr = join_stderr(self.stderr.take());
        if status.success() {
            Ok(())
        } else {
            Err(RelayError::encode_with(
                format!("ffmpeg encoder exited with {}", status),
                anyhow!("{}", stderr),
            ))
        }
    }

    fn abort(&mut self) {
        self.stdin = None;
        if let Some(mut child) = self.child.take() {
            let _ = kill_and_reap(&mut child);
        }
        let _ = join_stderr(self.stderr.take());
    }
}

impl Drop for FfmpegSink {
    fn drop(&mut self) {
        self.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_probe_json() {
        let raw = br#"{"streams":[{"width":1280,"height":720,"r_frame_rate":"30/1","avg_frame_rate":"30000/1001"}]}"#;
        let info = parse_probe(raw).unwrap();
        assert_eq!((info.width, info.height), (1280, 720));
        assert_eq!(info.frame_rate, FrameRate::new(30000, 1001).unwrap());
    }

    #[test]
    fn falls_back_to_base_rate() {
        let raw = br#"{"streams":[{"width":640,"height":480,"r_frame_rate":"25/1","avg_frame_rate":"0/0"}]}"#;
        assert_eq!(parse_probe(raw).unwrap().frame_rate, FrameRate::new(25, 1).unwrap());
    }

    #[test]
    fn probe_without_video_stream_fails() {
        assert!(parse_probe(br#"{"streams":[]}"#).is_err());
        assert!(parse_probe(br#"{}"#).is_err());
        assert!(parse_probe(b"not json").is_err());
    }

    #[test]
    fn rotated_stream_reports_display_geometry() {
        let side_data = br#"{"streams":[{"width":1920,"height":1080,"avg_frame_rate":"30/1",
            "side_data_list":[{"side_data_type":"Display Matrix","rotation":-90}]}]}"#;
        let info = parse_probe(side_data).unwrap();
        assert_eq!((info.width, info.height), (1080, 1920));

        let tag = br#"{"streams":[{"width":1280,"height":720,"avg_frame_rate":"25/1",
            "tags":{"rotate":"90"}}]}"#;
        let info = parse_probe(tag).unwrap();
        assert_eq!((info.width, info.height), (720, 1280));

        let upside_down = br#"{"streams":[{"width":640,"height":480,"avg_frame_rate":"25/1",
            "side_data_list":[{"rotation":180}]}]}"#;
        let info = parse_probe(upside_down).unwrap();
        assert_eq!((info.width, info.height), (640, 480));
    }

    #[test]
    fn decoder_applies_display_rotation() {
        let codec = FfmpegCodec::new("ffmpeg".into(), "ffprobe".into(), DEFAULT_VIDEO_CODEC);
        let args = codec.decode_args(Path::new("in.mp4"));
        assert!(!args.iter().any(|a| a == "-noautorotate"));
    }

    #[test]
    fn odd_dimensions_fall_back_to_full_chroma() {
        let info = VideoInfo {
            width: 640,
            height: 480,
            frame_rate: FrameRate::new(30, 1).unwrap(),
        };
        assert_eq!(pixel_format(&info), "yuv420p");
        assert_eq!(pixel_format(&VideoInfo { height: 481, ..info }), "yuv444p");
    }

    #[test]
    fn encode_args_keep_size_and_rate() {
        let codec = FfmpegCodec::new("ffmpeg".into(), "ffprobe".into(), DEFAULT_VIDEO_CODEC);
        let info = VideoInfo {
            width: 1280,
            height: 720,
            frame_rate: FrameRate::new(30, 1).unwrap(),
        };
        let args = codec.encode_args(Path::new("/tmp/out.mp4"), &info);
        let joined = args.join(" ");
        assert!(joined.contains("-s 1280x720"));
        assert!(joined.contains("-framerate 30/1"));
        assert!(joined.contains("-c:v libx264 -pix_fmt yuv420p"));
        assert_eq!(args.last().unwrap(), "/tmp/out.mp4");

        let odd = VideoInfo { width: 641, ..info };
        assert!(codec.encode_args(Path::new("o.mp4"), &odd).contains(&"yuv444p".to_string()));
    }
}
