//! annotate - run the relay pipelines on a local file
//!
//! Uses the same configuration, model and pipelines as `relayd`, without the
//! bot: the annotated result is written to `--out`.

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use std::path::PathBuf;

#[path = "../ui.rs"]
mod ui;

use vehicle_relay::media::{decode_image_file, encode_image_file};
use vehicle_relay::{
    load_backend, Annotator, FfmpegCodec, FrameRenderer, MediaKind, RelayConfig, StillImagePipeline,
    TempMediaStore, VehicleDetector, VideoPipeline,
};

#[derive(Clone, Copy, Debug, clap::ValueEnum)]
enum KindArg {
    Image,
    Video,
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Annotate a photo or video with vehicle detections")]
struct Args {
    /// Input photo or video.
    input: PathBuf,
    /// Output path; image format follows the extension.
    #[arg(long)]
    out: PathBuf,
    /// Media kind; guessed from the input extension when omitted.
    #[arg(long, value_enum)]
    kind: Option<KindArg>,
    /// Model path or stub:// backend, overriding the configuration.
    #[arg(long, env = "RELAY_MODEL_PATH")]
    model: Option<String>,
    #[arg(long, value_enum, default_value = "auto")]
    ui: ui::UiMode,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    let args = Args::parse();
    let ui = ui::Ui::new(args.ui);

    let kind = match args.kind {
        Some(KindArg::Image) => MediaKind::Image,
        Some(KindArg::Video) => MediaKind::Video,
        None => MediaKind::from_path(&args.input).ok_or_else(|| {
            anyhow!(
                "cannot tell whether {} is an image or a video; pass --kind",
                args.input.display()
            )
        })?,
    };

    let mut cfg = RelayConfig::load()?;
    if let Some(model) = args.model {
        cfg.model.path = model;
    }

    let detector = {
        let _stage = ui.stage("Loading model");
        let backend = load_backend(&cfg.model.path, &cfg.model.backend_settings())?;
        VehicleDetector::new(backend, cfg.model.confidence)?
    };
    let renderer = FrameRenderer::default();
    let annotator = Annotator::new(&detector, &renderer, &cfg.classes);
    let store = TempMediaStore::open(&cfg.storage.temp_root)?;

    let bytes = std::fs::read(&args.input)
        .with_context(|| format!("read {}", args.input.display()))?;
    let files = store.acquire_job(kind)?;
    let job_id = uuid::Uuid::new_v4().to_string();

    let output = {
        let mut stage = ui.stage(&format!("Annotating {}", kind));
        let result = match kind {
            MediaKind::Image => StillImagePipeline::new(annotator).run(&job_id, &bytes, &files),
            MediaKind::Video => {
                let codec = FfmpegCodec::locate(
                    cfg.video.ffmpeg.as_deref(),
                    cfg.video.ffprobe.as_deref(),
                    cfg.video.codec.clone(),
                )?;
                VideoPipeline::new(annotator, &codec).run(&job_id, &bytes, &files)
            }
        };
        let output = result.map_err(|failure| anyhow!("{}", failure))?;
        stage.set_detail(format!(
            "{} frame(s), {} detection(s)",
            output.frames, output.detections
        ));
        output
    };

    {
        let _stage = ui.stage("Writing output");
        match kind {
            MediaKind::Image => {
                let frame = decode_image_file(&output.path)?;
                encode_image_file(&frame, &args.out)?;
            }
            MediaKind::Video => {
                std::fs::copy(&output.path, &args.out)
                    .with_context(|| format!("write {}", args.out.display()))?;
            }
        }
    }
    files.release();

    println!("{}", args.out.display());
    Ok(())
}
