//! Messaging transport seam.
//!
//! The dispatcher only needs four primitives: poll for inbound requests,
//! download an attachment, reply with a media file and reply with text.

pub mod telegram;

use std::path::Path;

use crate::error::RelayResult;
use crate::pipeline::MediaKind;

pub use telegram::TelegramTransport;

/// Where a reply goes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ReplyTo {
    pub chat_id: i64,
    pub message_id: i64,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InboundRequest {
    pub update_id: i64,
    pub reply_to: ReplyTo,
    pub payload: RequestPayload,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RequestPayload {
    Command(Command),
    Media(Attachment),
    /// Text or an attachment neither pipeline handles.
    Unsupported,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Command {
    Start,
    Help,
    Other(String),
}

impl Command {
    /// Parse `/name` or `/name@bot args`; `None` when `text` is not a command.
    pub fn parse(text: &str) -> Option<Self> {
        let word = text.trim().split_whitespace().next()?;
        let name = word.strip_prefix('/')?;
        let name = name.split('@').next().unwrap_or(name).to_ascii_lowercase();
        Some(match name.as_str() {
            "start" => Command::Start,
            "help" => Command::Help,
            _ => Command::Other(name),
        })
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Attachment {
    pub kind: MediaKind,
    pub file_id: String,
    pub file_size: Option<u64>,
}

pub trait BotTransport {
    /// Next batch of inbound requests. May block for a long-poll interval and
    /// may return an empty batch.
    fn poll(&self) -> RelayResult<Vec<InboundRequest>>;

    fn download(&self, attachment: &Attachment) -> RelayResult<Vec<u8>>;

    fn send_media(&self, to: ReplyTo, kind: MediaKind, path: &Path) -> RelayResult<()>;

    fn send_text(&self, to: ReplyTo, text: &str) -> RelayResult<()>;
}
