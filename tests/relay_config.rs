use std::io::Write;
use std::sync::Mutex;
use std::time::Duration;

use vehicle_relay::{ClassAllowList, RelayConfig};

static ENV_LOCK: Mutex<()> = Mutex::new(());

fn clear_env() {
    for key in [
        "RELAY_CONFIG",
        "TELEGRAM_BOT_TOKEN",
        "RELAY_API_BASE",
        "RELAY_MODEL_PATH",
        "RELAY_CONFIDENCE",
        "RELAY_ALLOWED_CLASSES",
        "RELAY_TEMP_DIR",
        "RELAY_FFMPEG",
        "RELAY_FFPROBE",
    ] {
        std::env::remove_var(key);
    }
}

fn config_file(suffix: &str, contents: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::Builder::new()
        .suffix(suffix)
        .tempfile()
        .expect("temp config");
    file.write_all(contents.as_bytes()).expect("write config");
    file
}

#[test]
fn loads_toml_file_with_env_overrides() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let file = config_file(
        ".toml",
        r#"
            [telegram]
            token = "111:file-token"
            poll_timeout_secs = 20

            [model]
            path = "models/yolov8n.onnx"
            confidence = 0.4
            input_size = 416

            [classes]
            allowed = [2, 3]

            [storage]
            stale_after_secs = 600

            [video]
            codec = "libx265"
        "#,
    );
    std::env::set_var("RELAY_CONFIG", file.path());
    std::env::set_var("TELEGRAM_BOT_TOKEN", "222:env-token");
    std::env::set_var("RELAY_CONFIDENCE", "0.65");
    std::env::set_var("RELAY_FFMPEG", "/opt/ffmpeg/bin/ffmpeg");

    let cfg = RelayConfig::load().expect("load config");

    assert_eq!(cfg.bot_token().unwrap().expose(), "222:env-token");
    assert_eq!(cfg.telegram.poll_timeout, Duration::from_secs(20));
    assert_eq!(cfg.telegram.api_base, "https://api.telegram.org");
    assert_eq!(cfg.model.path, "models/yolov8n.onnx");
    assert_eq!(cfg.model.confidence, 0.65);
    assert_eq!(cfg.model.input_size, 416);
    assert_eq!(cfg.classes, ClassAllowList::new([2, 3]).unwrap());
    assert_eq!(cfg.storage.stale_after, Duration::from_secs(600));
    assert_eq!(cfg.video.codec, "libx265");
    assert_eq!(
        cfg.video.ffmpeg.as_deref(),
        Some(std::path::Path::new("/opt/ffmpeg/bin/ffmpeg"))
    );
    assert!(cfg.video.ffprobe.is_none());

    clear_env();
}

#[test]
fn loads_json_file() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let file = config_file(
        ".json",
        r#"{
            "telegram": { "api_base": "http://localhost:8081/" },
            "model": { "path": "stub://center", "iou": 0.6 }
        }"#,
    );
    std::env::set_var("RELAY_CONFIG", file.path());

    let cfg = RelayConfig::load().expect("load config");
    assert_eq!(cfg.telegram.api_base, "http://localhost:8081");
    assert_eq!(cfg.model.path, "stub://center");
    assert_eq!(cfg.model.iou, 0.6);
    assert_eq!(cfg.classes, ClassAllowList::vehicles());
    assert!(cfg.bot_token().is_err());

    clear_env();
}

#[test]
fn env_allow_list_and_temp_dir_override_defaults() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    std::env::set_var("RELAY_ALLOWED_CLASSES", "7, 5");
    std::env::set_var("RELAY_TEMP_DIR", "/var/tmp/relay");

    let cfg = RelayConfig::load().expect("load config");
    assert_eq!(cfg.classes, ClassAllowList::new([5, 7]).unwrap());
    assert_eq!(cfg.storage.temp_root, std::path::PathBuf::from("/var/tmp/relay"));

    clear_env();
}

#[test]
fn rejects_invalid_values() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    std::env::set_var("RELAY_CONFIDENCE", "high");
    assert!(RelayConfig::load().is_err());

    std::env::set_var("RELAY_CONFIDENCE", "1.2");
    assert!(RelayConfig::load().is_err());
    std::env::remove_var("RELAY_CONFIDENCE");

    let file = config_file(".toml", "[telegram]\npoll_timeout_secs = 90\n");
    std::env::set_var("RELAY_CONFIG", file.path());
    assert!(RelayConfig::load().is_err());

    let file = config_file(".json", "{ not json");
    std::env::set_var("RELAY_CONFIG", file.path());
    assert!(RelayConfig::load().is_err());

    clear_env();
}
