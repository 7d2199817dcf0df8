//! Telegram Bot API transport.
//!
//! Long-polls `getUpdates`, downloads attachments via `getFile`, and replies
//! with `sendPhoto`, `sendVideo` or `sendMessage`. Request URLs embed the bot
//! token, so every reqwest error is stripped of its URL before it is wrapped.

use std::path::Path;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use reqwest::blocking::{multipart, Client, RequestBuilder};
use serde::de::DeserializeOwned;
use serde::Deserialize;

use crate::config::{BotToken, TelegramSettings};
use crate::error::{RelayError, RelayResult};
use crate::pipeline::MediaKind;
use crate::transport::{Attachment, BotTransport, Command, InboundRequest, ReplyTo, RequestPayload};

/// Bot API limit for `getFile` downloads.
pub const MAX_DOWNLOAD_BYTES: u64 = 20 * 1024 * 1024;

const UPLOAD_TIMEOUT: Duration = Duration::from_secs(300);
const POLL_GRACE: Duration = Duration::from_secs(15);

#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    ok: bool,
    result: Option<T>,
    description: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct Update {
    update_id: i64,
    message: Option<Message>,
}

#[derive(Debug, Deserialize)]
struct Message {
    message_id: i64,
    chat: Chat,
    text: Option<String>,
    #[serde(default)]
    photo: Vec<PhotoSize>,
    video: Option<FileRef>,
    document: Option<Document>,
}

#[derive(Debug, Deserialize)]
struct Chat {
    id: i64,
}

#[derive(Debug, Deserialize)]
struct PhotoSize {
    file_id: String,
    width: u32,
    height: u32,
    file_size: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct FileRef {
    file_id: String,
    file_size: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct Document {
    file_id: String,
    mime_type: Option<String>,
    file_size: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct RemoteFile {
    file_path: Option<String>,
}

pub struct TelegramTransport {
    client: Client,
    token: BotToken,
    api_base: String,
    poll_timeout: Duration,
    next_offset: AtomicI64,
}

impl TelegramTransport {
    pub fn new(token: BotToken, settings: &TelegramSettings) -> RelayResult<Self> {
        let client = Client::builder()
            .timeout(UPLOAD_TIMEOUT)
            .build()
            .map_err(|e| RelayError::transport_with("build http client", e.without_url()))?;
        log::info!(
            "telegram transport for bot {} via {}",
            token.redacted(),
            settings.api_base
        );
        Ok(Self {
            client,
            token,
            api_base: settings.api_base.trim_end_matches('/').to_string(),
            poll_timeout: settings.poll_timeout,
            next_offset: AtomicI64::new(0),
        })
    }

    fn method_url(&self, method: &str) -> String {
        format!("{}/bot{}/{}", self.api_base, self.token.expose(), method)
    }

    fn call<T: DeserializeOwned>(&self, method: &str, request: RequestBuilder) -> RelayResult<T> {
        let response = request
            .send()
            .map_err(|e| RelayError::transport_with(method.to_string(), e.without_url()))?;
        let status = response.status();
        let body: ApiResponse<T> = response.json().map_err(|e| {
            RelayError::transport_with(format!("{} returned HTTP {}", method, status), e.without_url())
        })?;
        match (body.ok, body.result) {
            (true, Some(result)) => Ok(result),
            _ => Err(RelayError::transport(format!(
                "{} rejected: {}",
                method,
                body.description
                    .unwrap_or_else(|| format!("HTTP {}", status))
            ))),
        }
    }

    fn send_file(&self, to: ReplyTo, kind: MediaKind, path: &Path) -> RelayResult<()> {
        let (method, field) = match kind {
            MediaKind::Image => ("sendPhoto", "photo"),
            MediaKind::Video => ("sendVideo", "video"),
        };
        let mut form = multipart::Form::new()
            .text("chat_id", to.chat_id.to_string())
            .text("reply_parameters", reply_parameters(to).to_string());
        if kind == MediaKind::Video {
            form = form.text("supports_streaming", "true");
        }
        let form = form.file(field, path).map_err(|e| RelayError::io(path, e))?;
        let request = self.client.post(self.method_url(method)).multipart(form);
        let _: serde_json::Value = self.call(method, request)?;
        Ok(())
    }
}

impl BotTransport for TelegramTransport {
    fn poll(&self) -> RelayResult<Vec<InboundRequest>> {
        let offset = self.next_offset.load(Ordering::SeqCst);
        let request = self
            .client
            .get(self.method_url("getUpdates"))
            .query(&[
                ("offset", offset.to_string()),
                ("timeout", self.poll_timeout.as_secs().to_string()),
                ("allowed_updates", r#"["message"]"#.to_string()),
            ])
            .timeout(self.poll_timeout + POLL_GRACE);
        let updates: Vec<Update> = self.call("getUpdates", request)?;
        if let Some(last) = updates.iter().map(|update| update.update_id).max() {
            self.next_offset.store(last + 1, Ordering::SeqCst);
        }
        Ok(updates.into_iter().filter_map(to_request).collect())
    }

    fn download(&self, attachment: &Attachment) -> RelayResult<Vec<u8>> {
        if let Some(size) = attachment.file_size {
            if size > MAX_DOWNLOAD_BYTES {
                return Err(RelayError::transport(format!(
                    "attachment of {} bytes exceeds the {} byte download limit",
                    size, MAX_DOWNLOAD_BYTES
                )));
            }
        }
        let request = self
            .client
            .get(self.method_url("getFile"))
            .query(&[("file_id", attachment.file_id.as_str())]);
        let remote: RemoteFile = self.call("getFile", request)?;
        let file_path = remote
            .file_path
            .ok_or_else(|| RelayError::transport("getFile returned no file_path"))?;

        let url = format!(
            "{}/file/bot{}/{}",
            self.api_base,
            self.token.expose(),
            file_path
        );
        let response = self
            .client
            .get(url)
            .send()
            .and_then(|response| response.error_for_status())
            .map_err(|e| RelayError::transport_with("download attachment", e.without_url()))?;
        let bytes = response
            .bytes()
            .map_err(|e| RelayError::transport_with("download attachment", e.without_url()))?;
        log::debug!("downloaded {} bytes for {}", bytes.len(), attachment.kind);
        Ok(bytes.to_vec())
    }

    fn send_media(&self, to: ReplyTo, kind: MediaKind, path: &Path) -> RelayResult<()> {
        self.send_file(to, kind, path)
    }

    fn send_text(&self, to: ReplyTo, text: &str) -> RelayResult<()> {
        let request = self.client.post(self.method_url("sendMessage")).json(&serde_json::json!({
            "chat_id": to.chat_id,
            "reply_parameters": reply_parameters(to),
            "text": text,
        }));
        let _: serde_json::Value = self.call("sendMessage", request)?;
        Ok(())
    }
}

/// Reply threading that still delivers when the user deleted their message.
fn reply_parameters(to: ReplyTo) -> serde_json::Value {
    serde_json::json!({
        "message_id": to.message_id,
        "allow_sending_without_reply": true,
    })
}

/// Classify one update; `None` for updates that carry no message.
pub(crate) fn to_request(update: Update) -> Option<InboundRequest> {
    let message = update.message?;
    let reply_to = ReplyTo {
        chat_id: message.chat.id,
        message_id: message.message_id,
    };
    let payload = classify(message);
    Some(InboundRequest {
        update_id: update.update_id,
        reply_to,
        payload,
    })
}

fn classify(message: Message) -> RequestPayload {
    if let Some(largest) = message
        .photo
        .into_iter()
        .max_by_key(|size| u64::from(size.width) * u64::from(size.height))
    {
        return RequestPayload::Media(Attachment {
            kind: MediaKind::Image,
            file_id: largest.file_id,
            file_size: largest.file_size,
        });
    }
    if let Some(video) = message.video {
        return RequestPayload::Media(Attachment {
            kind: MediaKind::Video,
            file_id: video.file_id,
            file_size: video.file_size,
        });
    }
    if let Some(document) = message.document {
        if let Some(kind) = document.mime_type.as_deref().and_then(MediaKind::from_mime) {
            return RequestPayload::Media(Attachment {
                kind,
                file_id: document.file_id,
                file_size: document.file_size,
            });
        }
        return RequestPayload::Unsupported;
    }
    match message.text.as_deref().and_then(Command::parse) {
        Some(command) => RequestPayload::Command(command),
        None => RequestPayload::Unsupported,
    }
}
