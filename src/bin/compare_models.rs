//! compare_models - run two checkpoints on one image
//!
//! Writes both annotated results side by side into a single PNG and prints
//! the detections of each model.

use anyhow::{anyhow, Result};
use clap::Parser;
use image::{imageops, Rgb, RgbImage};
use std::path::PathBuf;

#[path = "../ui.rs"]
mod ui;

use vehicle_relay::detect::class_name;
use vehicle_relay::media::{decode_image_file, encode_image_file};
use vehicle_relay::render::draw_text;
use vehicle_relay::{
    load_backend, BackendSettings, ClassAllowList, Detection, Frame, FrameRenderer, VehicleDetector,
};

const GUTTER: u32 = 16;
const HEADER: u32 = 28;

#[derive(Parser, Debug)]
#[command(author, version, about = "Compare two detection models on one image")]
struct Args {
    #[arg(long)]
    model_a: String,
    #[arg(long)]
    model_b: String,
    #[arg(long)]
    image: PathBuf,
    #[arg(long, default_value = "comparison.png")]
    out: PathBuf,
    #[arg(long, default_value_t = 0.5)]
    confidence: f32,
    /// Keep every class instead of only vehicles.
    #[arg(long)]
    all_classes: bool,
    #[arg(long, value_enum, default_value = "auto")]
    ui: ui::UiMode,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    let args = Args::parse();
    let ui = ui::Ui::new(args.ui);

    let frame = decode_image_file(&args.image)?;
    let settings = BackendSettings {
        confidence: args.confidence,
        ..BackendSettings::default()
    };
    let allow_list = ClassAllowList::vehicles();
    let allowed = if args.all_classes { None } else { Some(&allow_list) };
    let renderer = FrameRenderer::default();

    let mut panels = Vec::with_capacity(2);
    for (label, model) in [("A", &args.model_a), ("B", &args.model_b)] {
        let mut stage = ui.stage(&format!("Model {} ({})", label, model));
        let backend = load_backend(model, &settings)?;
        let detector = VehicleDetector::new(backend, args.confidence)?;
        let detections = detector.detect(&frame, allowed)?;
        let rendered = renderer.render(&frame, &detections)?;
        stage.set_detail(format!("{} detection(s)", detections.len()));
        drop(stage);
        print_detections(label, model, &detections);
        panels.push((label, rendered));
    }

    let canvas = side_by_side(&panels)?;
    let combined = Frame::from_image(canvas)?;
    encode_image_file(&combined, &args.out)?;
    println!("wrote {}", args.out.display());
    Ok(())
}

fn print_detections(label: &str, model: &str, detections: &[Detection]) {
    println!("model {} ({}): {} detection(s)", label, model, detections.len());
    for det in detections {
        let name = class_name(det.class_id).unwrap_or("unknown");
        println!(
            "  {:>3} {:<12} {:.2}  [{:.0}, {:.0}, {:.0}, {:.0}]",
            det.class_id, name, det.confidence, det.bbox.x1, det.bbox.y1, det.bbox.x2, det.bbox.y2
        );
    }
}

fn side_by_side(panels: &[(&str, Frame)]) -> Result<RgbImage> {
    let width = panels.iter().map(|(_, f)| f.width).sum::<u32>() + GUTTER * (panels.len() as u32 + 1);
    let height = panels.iter().map(|(_, f)| f.height).max().unwrap_or(0) + HEADER + GUTTER;
    let mut canvas = RgbImage::from_pixel(width, height, Rgb([255, 255, 255]));
    let mut x = GUTTER;
    for (label, frame) in panels {
        let image = frame
            .to_image()
            .ok_or_else(|| anyhow!("rendered frame has an inconsistent buffer"))?;
        draw_text(&mut canvas, &format!("model {}", label), x as i32, 6, 3, Rgb([0, 0, 0]));
        imageops::replace(&mut canvas, &image, i64::from(x), i64::from(HEADER));
        x += frame.width + GUTTER;
    }
    Ok(canvas)
}
