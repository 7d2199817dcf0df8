#![allow(dead_code)]

//! Test doubles shared by the integration tests.

use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use vehicle_relay::detect::{StubBackend, StubDetection};
use vehicle_relay::media::encode_image_file;
use vehicle_relay::transport::{Attachment, Command, ReplyTo, RequestPayload};
use vehicle_relay::{
    BotTransport, Frame, FrameRate, InboundRequest, MediaKind, RelayError, RelayResult,
    VehicleDetector, VideoCodec, VideoInfo, VideoSink, VideoSource,
};

const MAGIC: &[u8; 4] = b"RVID";

/// Serialise frames into the container understood by [`MemoryCodec`].
pub fn encode_test_video(info: &VideoInfo, frames: &[Frame]) -> Vec<u8> {
    let mut out = MAGIC.to_vec();
    for value in [info.width, info.height, info.frame_rate.num, info.frame_rate.den] {
        out.extend_from_slice(&value.to_le_bytes());
    }
    for frame in frames {
        out.extend_from_slice(frame.pixels());
    }
    out
}

fn read_u32(bytes: &[u8], at: usize) -> Option<u32> {
    let raw: [u8; 4] = bytes.get(at..at + 4)?.try_into().ok()?;
    Some(u32::from_le_bytes(raw))
}

fn parse_test_video(bytes: &[u8]) -> Option<(VideoInfo, Vec<u8>)> {
    if bytes.get(..4)? != MAGIC {
        return None;
    }
    let info = VideoInfo {
        width: read_u32(bytes, 4)?,
        height: read_u32(bytes, 8)?,
        frame_rate: FrameRate::new(read_u32(bytes, 12)?, read_u32(bytes, 16)?).ok()?,
    };
    Some((info, bytes[20..].to_vec()))
}

pub fn sequence(info: &VideoInfo, count: u8) -> Vec<Frame> {
    (0..count)
        .map(|i| Frame::filled(info.width, info.height, [i * 10, i * 10, i * 10]).unwrap())
        .collect()
}

#[derive(Debug, Default)]
pub struct CodecLog {
    pub sources_opened: u32,
    pub sources_closed: u32,
    pub sink_info: Option<VideoInfo>,
    pub written: Vec<Frame>,
    pub finished: bool,
    pub aborted: bool,
}

/// In-memory stand-in for the FFmpeg codec.
#[derive(Clone, Default)]
pub struct MemoryCodec {
    pub log: Arc<Mutex<CodecLog>>,
    pub fail_sink_open: bool,
}

impl MemoryCodec {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_sink() -> Self {
        Self {
            fail_sink_open: true,
            ..Self::default()
        }
    }

    pub fn snapshot<T>(&self, f: impl FnOnce(&CodecLog) -> T) -> T {
        f(&self.log.lock().unwrap())
    }
}

struct MemorySource {
    info: VideoInfo,
    data: Vec<u8>,
    offset: usize,
    closed: bool,
    log: Arc<Mutex<CodecLog>>,
}

impl VideoSource for MemorySource {
    fn info(&self) -> VideoInfo {
        self.info
    }

    fn read_frame(&mut self) -> RelayResult<Option<Frame>> {
        let len = (self.info.width * self.info.height * 3) as usize;
        if self.offset + len > self.data.len() {
            return Ok(None);
        }
        let pixels = self.data[self.offset..self.offset + len].to_vec();
        self.offset += len;
        Frame::new(self.info.width, self.info.height, pixels)
            .map(Some)
            .map_err(|e| RelayError::decode_with("memory frame", e))
    }

    fn close(&mut self) -> RelayResult<()> {
        if !self.closed {
            self.closed = true;
            self.log.lock().unwrap().sources_closed += 1;
        }
        Ok(())
    }
}

struct MemorySink {
    path: std::path::PathBuf,
    bytes: Vec<u8>,
    done: bool,
    log: Arc<Mutex<CodecLog>>,
}

impl VideoSink for MemorySink {
    fn write_frame(&mut self, frame: &Frame) -> RelayResult<()> {
        self.bytes.extend_from_slice(frame.pixels());
        self.log.lock().unwrap().written.push(frame.clone());
        Ok(())
    }

    fn finish(&mut self) -> RelayResult<()> {
        if self.done {
            return Ok(());
        }
        self.done = true;
        std::fs::write(&self.path, &self.bytes).map_err(|e| RelayError::io(&self.path, e))?;
        self.log.lock().unwrap().finished = true;
        Ok(())
    }

    fn abort(&mut self) {
        if !self.done {
            self.done = true;
            self.log.lock().unwrap().aborted = true;
        }
    }
}

impl VideoCodec for MemoryCodec {
    fn open_source(&self, path: &Path) -> RelayResult<Box<dyn VideoSource>> {
        let bytes = std::fs::read(path).map_err(|e| RelayError::io(path, e))?;
        let (info, data) = parse_test_video(&bytes)
            .ok_or_else(|| RelayError::decode(format!("not a test video: {}", path.display())))?;
        self.log.lock().unwrap().sources_opened += 1;
        Ok(Box::new(MemorySource {
            info,
            data,
            offset: 0,
            closed: false,
            log: Arc::clone(&self.log),
        }))
    }

    fn open_sink(&self, path: &Path, info: &VideoInfo) -> RelayResult<Box<dyn VideoSink>> {
        if self.fail_sink_open {
            return Err(RelayError::encode("sink unavailable"));
        }
        self.log.lock().unwrap().sink_info = Some(*info);
        Ok(Box::new(MemorySink {
            path: path.to_path_buf(),
            bytes: Vec::new(),
            done: false,
            log: Arc::clone(&self.log),
        }))
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Sent {
    Media {
        to: ReplyTo,
        kind: MediaKind,
        bytes: u64,
    },
    Text {
        to: ReplyTo,
        text: String,
    },
}

/// Scripted bot transport that records every reply.
pub struct RecordingTransport {
    batches: Mutex<VecDeque<RelayResult<Vec<InboundRequest>>>>,
    files: Mutex<HashMap<String, Vec<u8>>>,
    pub sent: Mutex<Vec<Sent>>,
    pub fail_media: bool,
    shutdown: Arc<AtomicBool>,
}

impl RecordingTransport {
    pub fn new() -> Self {
        Self {
            batches: Mutex::new(VecDeque::new()),
            files: Mutex::new(HashMap::new()),
            sent: Mutex::new(Vec::new()),
            fail_media: false,
            shutdown: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn with_file(self, file_id: &str, bytes: Vec<u8>) -> Self {
        self.files.lock().unwrap().insert(file_id.to_string(), bytes);
        self
    }

    pub fn with_batch(self, batch: RelayResult<Vec<InboundRequest>>) -> Self {
        self.batches.lock().unwrap().push_back(batch);
        self
    }

    /// Raised once every scripted batch has been polled.
    pub fn shutdown_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.shutdown)
    }

    pub fn sent(&self) -> Vec<Sent> {
        self.sent.lock().unwrap().clone()
    }
}

impl BotTransport for RecordingTransport {
    fn poll(&self) -> RelayResult<Vec<InboundRequest>> {
        let next = self.batches.lock().unwrap().pop_front();
        match next {
            Some(batch) => batch,
            None => {
                self.shutdown.store(true, Ordering::SeqCst);
                Ok(Vec::new())
            }
        }
    }

    fn download(&self, attachment: &Attachment) -> RelayResult<Vec<u8>> {
        self.files
            .lock()
            .unwrap()
            .get(&attachment.file_id)
            .cloned()
            .ok_or_else(|| RelayError::transport(format!("no file {}", attachment.file_id)))
    }

    fn send_media(&self, to: ReplyTo, kind: MediaKind, path: &Path) -> RelayResult<()> {
        if self.fail_media {
            return Err(RelayError::transport("upload rejected"));
        }
        let bytes = std::fs::metadata(path)
            .map_err(|e| RelayError::io(path, e))?
            .len();
        self.sent.lock().unwrap().push(Sent::Media { to, kind, bytes });
        Ok(())
    }

    fn send_text(&self, to: ReplyTo, text: &str) -> RelayResult<()> {
        self.sent.lock().unwrap().push(Sent::Text {
            to,
            text: text.to_string(),
        });
        Ok(())
    }
}

pub fn reply_to(id: i64) -> ReplyTo {
    ReplyTo {
        chat_id: 100,
        message_id: id,
    }
}

pub fn media_request(id: i64, kind: MediaKind, file_id: &str) -> InboundRequest {
    InboundRequest {
        update_id: id,
        reply_to: reply_to(id),
        payload: RequestPayload::Media(Attachment {
            kind,
            file_id: file_id.to_string(),
            file_size: None,
        }),
    }
}

pub fn command_request(id: i64, command: Command) -> InboundRequest {
    InboundRequest {
        update_id: id,
        reply_to: reply_to(id),
        payload: RequestPayload::Command(command),
    }
}

pub fn center_detector() -> VehicleDetector {
    VehicleDetector::new(Box::new(StubBackend::center_car()), 0.5).unwrap()
}

pub fn scripted_detector(script: Vec<Vec<StubDetection>>) -> VehicleDetector {
    VehicleDetector::new(Box::new(StubBackend::scripted(script)), 0.5).unwrap()
}

pub fn failing_detector(call: u64) -> VehicleDetector {
    VehicleDetector::new(Box::new(StubBackend::center_car().failing_on(call)), 0.5).unwrap()
}

/// A solid-colour JPEG as raw upload bytes.
pub fn jpeg_bytes(width: u32, height: u32) -> Vec<u8> {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("photo.jpg");
    encode_image_file(&Frame::filled(width, height, [90, 120, 150]).unwrap(), &path).unwrap();
    std::fs::read(&path).unwrap()
}
