//! relayd - vehicle detection bot daemon
//!
//! Loads configuration and the detection model once, then long-polls the bot
//! API and answers every photo or video with an annotated copy.

use anyhow::{anyhow, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use vehicle_relay::{
    load_backend, Annotator, Dispatcher, FfmpegCodec, FrameRenderer, RelayConfig, TelegramTransport,
    TempMediaStore, VehicleDetector,
};

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cfg = RelayConfig::load()?;
    let token = cfg.bot_token()?.clone();

    let backend = load_backend(&cfg.model.path, &cfg.model.backend_settings())?;
    let detector = VehicleDetector::new(backend, cfg.model.confidence)?;
    detector.warm_up()?;
    log::info!(
        "model {} loaded with backend {} (confidence >= {}, classes {:?})",
        cfg.model.path,
        detector.backend_name(),
        detector.confidence_threshold(),
        cfg.classes.ids().collect::<Vec<_>>()
    );

    let renderer = FrameRenderer::default();
    let store = TempMediaStore::open_sweeping(&cfg.storage.temp_root, cfg.storage.stale_after)?;
    let codec = FfmpegCodec::locate(
        cfg.video.ffmpeg.as_deref(),
        cfg.video.ffprobe.as_deref(),
        cfg.video.codec.clone(),
    )?;
    let transport = TelegramTransport::new(token, &cfg.telegram)?;

    let shutdown = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&shutdown);
    ctrlc::set_handler(move || {
        log::info!("shutdown requested; finishing current request");
        flag.store(true, Ordering::SeqCst);
    })
    .map_err(|e| anyhow!("failed to install signal handler: {}", e))?;

    let annotator = Annotator::new(&detector, &renderer, &cfg.classes);
    let dispatcher = Dispatcher::new(annotator, &codec, &store);
    log::info!("relayd serving");
    let summary = dispatcher.serve(&transport, &shutdown);

    let stats = store.stats();
    log::info!(
        "handled {} request(s); temp files created {}, removed {}, cleanup failures {}",
        summary.handled,
        stats.created,
        stats.removed,
        stats.cleanup_failures
    );
    Ok(())
}
