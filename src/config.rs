use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::detect::{BackendSettings, ClassAllowList};
use crate::media::ffmpeg::DEFAULT_VIDEO_CODEC;

const DEFAULT_API_BASE: &str = "https://api.telegram.org";
const DEFAULT_POLL_TIMEOUT_SECS: u64 = 30;
const MAX_POLL_TIMEOUT_SECS: u64 = 50;
const DEFAULT_MODEL_PATH: &str = "car_detection_model/best.onnx";
const DEFAULT_CONFIDENCE: f32 = 0.5;
const DEFAULT_IOU: f32 = 0.45;
const DEFAULT_INPUT_SIZE: u32 = 640;
const DEFAULT_STALE_AFTER_SECS: u64 = 60 * 60 * 24;

#[derive(Debug, Deserialize, Default)]
struct RelayConfigFile {
    telegram: Option<TelegramConfigFile>,
    model: Option<ModelConfigFile>,
    classes: Option<ClassesConfigFile>,
    storage: Option<StorageConfigFile>,
    video: Option<VideoConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct TelegramConfigFile {
    token: Option<String>,
    api_base: Option<String>,
    poll_timeout_secs: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct ModelConfigFile {
    path: Option<String>,
    confidence: Option<f32>,
    iou: Option<f32>,
    input_size: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
struct ClassesConfigFile {
    allowed: Option<Vec<u32>>,
}

#[derive(Debug, Deserialize, Default)]
struct StorageConfigFile {
    temp_root: Option<PathBuf>,
    stale_after_secs: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct VideoConfigFile {
    ffmpeg: Option<PathBuf>,
    ffprobe: Option<PathBuf>,
    codec: Option<String>,
}

/// Bot API token. Never printed in full.
#[derive(Clone, PartialEq, Eq)]
pub struct BotToken(String);

impl BotToken {
    pub fn new(raw: impl Into<String>) -> Result<Self> {
        let raw = raw.into().trim().to_string();
        if raw.is_empty() || raw.chars().any(char::is_whitespace) {
            return Err(anyhow!("bot token must be a non-empty string without whitespace"));
        }
        Ok(Self(raw))
    }

    pub fn expose(&self) -> &str {
        &self.0
    }

    /// Bot id prefix followed by a mask, e.g. `123456:***`.
    pub fn redacted(&self) -> String {
        match self.0.split_once(':') {
            Some((bot_id, _)) => format!("{}:***", bot_id),
            None => "***".to_string(),
        }
    }
}

impl fmt::Debug for BotToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BotToken({})", self.redacted())
    }
}

#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub telegram: TelegramSettings,
    pub model: ModelSettings,
    pub classes: ClassAllowList,
    pub storage: StorageSettings,
    pub video: VideoSettings,
}

#[derive(Debug, Clone)]
pub struct TelegramSettings {
    pub token: Option<BotToken>,
    pub api_base: String,
    pub poll_timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct ModelSettings {
    /// ONNX file path, or a `stub://` backend name.
    pub path: String,
    pub confidence: f32,
    pub iou: f32,
    pub input_size: u32,
}

impl ModelSettings {
    pub fn backend_settings(&self) -> BackendSettings {
        BackendSettings {
            confidence: self.confidence,
            iou: self.iou,
            input_size: self.input_size,
        }
    }
}

#[derive(Debug, Clone)]
pub struct StorageSettings {
    pub temp_root: PathBuf,
    pub stale_after: Duration,
}

#[derive(Debug, Clone)]
pub struct VideoSettings {
    /// Explicit binaries; looked up on `PATH` when unset.
    pub ffmpeg: Option<PathBuf>,
    pub ffprobe: Option<PathBuf>,
    pub codec: String,
}

impl RelayConfig {
    /// Load `.env`, the optional `RELAY_CONFIG` file, then environment
    /// overrides.
    pub fn load() -> Result<Self> {
        match dotenvy::dotenv() {
            Ok(path) => log::debug!("loaded environment from {}", path.display()),
            Err(err) if err.not_found() => {}
            Err(err) => return Err(anyhow!("failed to read .env: {}", err)),
        }
        let config_path = std::env::var("RELAY_CONFIG").ok();
        let file_cfg = match config_path.as_deref() {
            Some(path) if !path.trim().is_empty() => Some(read_config_file(Path::new(path))?),
            _ => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default())?;
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Token required by the bot daemon.
    pub fn bot_token(&self) -> Result<&BotToken> {
        self.telegram
            .token
            .as_ref()
            .ok_or_else(|| anyhow!("TELEGRAM_BOT_TOKEN is not set"))
    }

    fn from_file(file: RelayConfigFile) -> Result<Self> {
        let telegram = file.telegram.unwrap_or_default();
        let model = file.model.unwrap_or_default();
        let storage = file.storage.unwrap_or_default();
        let video = file.video.unwrap_or_default();

        let token = match telegram.token {
            Some(raw) if !raw.trim().is_empty() => Some(BotToken::new(raw)?),
            _ => None,
        };
        let classes = match file.classes.and_then(|classes| classes.allowed) {
            Some(ids) => ClassAllowList::new(ids)?,
            None => ClassAllowList::vehicles(),
        };

        Ok(Self {
            telegram: TelegramSettings {
                token,
                api_base: telegram
                    .api_base
                    .unwrap_or_else(|| DEFAULT_API_BASE.to_string()),
                poll_timeout: Duration::from_secs(
                    telegram
                        .poll_timeout_secs
                        .unwrap_or(DEFAULT_POLL_TIMEOUT_SECS),
                ),
            },
            model: ModelSettings {
                path: model
                    .path
                    .unwrap_or_else(|| DEFAULT_MODEL_PATH.to_string()),
                confidence: model.confidence.unwrap_or(DEFAULT_CONFIDENCE),
                iou: model.iou.unwrap_or(DEFAULT_IOU),
                input_size: model.input_size.unwrap_or(DEFAULT_INPUT_SIZE),
            },
            classes,
            storage: StorageSettings {
                temp_root: storage.temp_root.unwrap_or_else(std::env::temp_dir),
                stale_after: Duration::from_secs(
                    storage
                        .stale_after_secs
                        .unwrap_or(DEFAULT_STALE_AFTER_SECS),
                ),
            },
            video: VideoSettings {
                ffmpeg: video.ffmpeg,
                ffprobe: video.ffprobe,
                codec: video
                    .codec
                    .unwrap_or_else(|| DEFAULT_VIDEO_CODEC.to_string()),
            },
        })
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(token) = std::env::var("TELEGRAM_BOT_TOKEN") {
            if !token.trim().is_empty() {
                self.telegram.token = Some(BotToken::new(token)?);
            }
        }
        if let Ok(base) = std::env::var("RELAY_API_BASE") {
            if !base.trim().is_empty() {
                self.telegram.api_base = base;
            }
        }
        if let Ok(path) = std::env::var("RELAY_MODEL_PATH") {
            if !path.trim().is_empty() {
                self.model.path = path;
            }
        }
        if let Ok(confidence) = std::env::var("RELAY_CONFIDENCE") {
            self.model.confidence = confidence
                .trim()
                .parse()
                .map_err(|_| anyhow!("RELAY_CONFIDENCE must be a number between 0 and 1"))?;
        }
        if let Ok(classes) = std::env::var("RELAY_ALLOWED_CLASSES") {
            if !classes.trim().is_empty() {
                self.classes = ClassAllowList::parse_csv(&classes)?;
            }
        }
        if let Ok(dir) = std::env::var("RELAY_TEMP_DIR") {
            if !dir.trim().is_empty() {
                self.storage.temp_root = PathBuf::from(dir);
            }
        }
        if let Ok(path) = std::env::var("RELAY_FFMPEG") {
            if !path.trim().is_empty() {
                self.video.ffmpeg = Some(PathBuf::from(path));
            }
        }
        if let Ok(path) = std::env::var("RELAY_FFPROBE") {
            if !path.trim().is_empty() {
                self.video.ffprobe = Some(PathBuf::from(path));
            }
        }
        Ok(())
    }

    fn validate(&mut self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.model.confidence) {
            return Err(anyhow!("model confidence must be within [0, 1]"));
        }
        if !(0.0..=1.0).contains(&self.model.iou) {
            return Err(anyhow!("model IoU threshold must be within [0, 1]"));
        }
        if self.model.input_size == 0 || self.model.input_size % 32 != 0 {
            return Err(anyhow!(
                "model input size must be a positive multiple of 32, got {}",
                self.model.input_size
            ));
        }
        if self.model.path.trim().is_empty() {
            return Err(anyhow!("model path must not be empty"));
        }
        if self.telegram.poll_timeout.as_secs() > MAX_POLL_TIMEOUT_SECS {
            return Err(anyhow!(
                "poll timeout must be at most {} seconds",
                MAX_POLL_TIMEOUT_SECS
            ));
        }
        self.telegram.api_base = self.telegram.api_base.trim_end_matches('/').to_string();
        if !self.telegram.api_base.starts_with("http://")
            && !self.telegram.api_base.starts_with("https://")
        {
            return Err(anyhow!("api base must be an http(s) URL"));
        }
        if self.video.codec.trim().is_empty() {
            return Err(anyhow!("video codec must not be empty"));
        }
        Ok(())
    }
}

fn read_config_file(path: &Path) -> Result<RelayConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let is_toml = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"));
    let cfg = if is_toml {
        toml::from_str(&raw).map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    } else {
        serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    };
    Ok(cfg)
}
