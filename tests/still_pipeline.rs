mod common;

use vehicle_relay::detect::StubDetection;
use vehicle_relay::media::decode_image_file;
use vehicle_relay::{
    Annotator, ClassAllowList, FrameRenderer, JobState, MediaKind, StillImagePipeline,
    TempMediaStore,
};

#[test]
fn annotates_a_photo_with_original_dimensions() {
    let root = tempfile::tempdir().unwrap();
    let store = TempMediaStore::open(root.path()).unwrap();
    let detector = common::center_detector();
    let renderer = FrameRenderer::default();
    let allow = ClassAllowList::vehicles();
    let pipeline = StillImagePipeline::new(Annotator::new(&detector, &renderer, &allow));

    let files = store.acquire_job(MediaKind::Image).unwrap();
    let output = pipeline
        .run("job-photo", &common::jpeg_bytes(160, 120), &files)
        .expect("pipeline succeeds");

    assert_eq!(output.kind, MediaKind::Image);
    assert_eq!(output.frames, 1);
    assert_eq!(output.detections, 1);
    let annotated = decode_image_file(&output.path).unwrap();
    assert_eq!((annotated.width, annotated.height), (160, 120));

    files.release();
    assert!(!output.path.exists());
    assert_eq!(store.stats().outstanding(), 0);
}

#[test]
fn allow_list_drops_non_vehicle_classes() {
    let root = tempfile::tempdir().unwrap();
    let store = TempMediaStore::open(root.path()).unwrap();
    let detector = common::scripted_detector(vec![vec![
        StubDetection::new(0, 0.95, [0.1, 0.1, 0.3, 0.9]),
        StubDetection::new(7, 0.80, [0.4, 0.2, 0.9, 0.8]),
        StubDetection::new(2, 0.30, [0.0, 0.0, 0.2, 0.2]),
    ]]);
    let renderer = FrameRenderer::default();
    let allow = ClassAllowList::vehicles();
    let pipeline = StillImagePipeline::new(Annotator::new(&detector, &renderer, &allow));

    let files = store.acquire_job(MediaKind::Image).unwrap();
    let output = pipeline
        .run("job-filter", &common::jpeg_bytes(100, 100), &files)
        .unwrap();
    // The person is not a vehicle and the low-confidence car is below 0.5.
    assert_eq!(output.detections, 1);
    files.release();
}

#[test]
fn corrupt_photo_fails_with_decode_error_and_no_leak() {
    let root = tempfile::tempdir().unwrap();
    let store = TempMediaStore::open(root.path()).unwrap();
    let detector = common::center_detector();
    let renderer = FrameRenderer::default();
    let allow = ClassAllowList::vehicles();
    let pipeline = StillImagePipeline::new(Annotator::new(&detector, &renderer, &allow));

    let files = store.acquire_job(MediaKind::Image).unwrap();
    let failure = pipeline
        .run("job-corrupt", b"\x00\x01 not an image at all", &files)
        .unwrap_err();
    assert_eq!(failure.reached, JobState::Received);
    assert_eq!(failure.error.kind(), "decode");

    files.release();
    let stats = store.stats();
    assert_eq!(stats.created, 2);
    assert_eq!(stats.outstanding(), 0);
    assert_eq!(std::fs::read_dir(store.path()).unwrap().count(), 0);
}

#[test]
fn model_fault_is_reported_after_decode() {
    let root = tempfile::tempdir().unwrap();
    let store = TempMediaStore::open(root.path()).unwrap();
    let detector = common::failing_detector(0);
    let renderer = FrameRenderer::default();
    let allow = ClassAllowList::vehicles();
    let pipeline = StillImagePipeline::new(Annotator::new(&detector, &renderer, &allow));

    let files = store.acquire_job(MediaKind::Image).unwrap();
    let failure = pipeline
        .run("job-fault", &common::jpeg_bytes(32, 32), &files)
        .unwrap_err();
    assert_eq!(failure.reached, JobState::Decoded);
    assert_eq!(failure.error.kind(), "model_inference");
    assert!(std::error::Error::source(&failure.error).is_some());
    drop(files);
    assert_eq!(store.stats().outstanding(), 0);
}

#[test]
fn photo_with_only_non_vehicles_is_left_unmarked() {
    let root = tempfile::tempdir().unwrap();
    let store = TempMediaStore::open(root.path()).unwrap();
    let detector = common::scripted_detector(vec![vec![StubDetection::new(
        0,
        0.99,
        [0.2, 0.2, 0.8, 0.8],
    )]]);
    let renderer = FrameRenderer::default();
    let allow = ClassAllowList::vehicles();
    let pipeline = StillImagePipeline::new(Annotator::new(&detector, &renderer, &allow));

    let bytes = common::jpeg_bytes(64, 64);
    let files = store.acquire_job(MediaKind::Image).unwrap();
    let output = pipeline.run("job-person", &bytes, &files).unwrap();
    assert_eq!(output.detections, 0);

    let original = decode_image_file(files.input()).unwrap();
    let annotated = decode_image_file(&output.path).unwrap();
    assert_eq!((annotated.width, annotated.height), (original.width, original.height));
    // Only JPEG re-encoding noise separates the two.
    let max_diff = original
        .pixels()
        .iter()
        .zip(annotated.pixels())
        .map(|(a, b)| a.abs_diff(*b))
        .max()
        .unwrap();
    assert!(max_diff <= 4, "pixel drift {}", max_diff);
    files.release();
}

#[test]
fn render_fault_is_reported_after_detection_and_no_leak() {
    let root = tempfile::tempdir().unwrap();
    let store = TempMediaStore::open(root.path()).unwrap();
    let detector = common::scripted_detector(vec![vec![StubDetection::new(
        2,
        0.9,
        [0.6, 0.6, 0.2, 0.2],
    )]]);
    let renderer = FrameRenderer::default();
    let allow = ClassAllowList::vehicles();
    let pipeline = StillImagePipeline::new(Annotator::new(&detector, &renderer, &allow));

    let files = store.acquire_job(MediaKind::Image).unwrap();
    let failure = pipeline
        .run("job-render-fault", &common::jpeg_bytes(48, 48), &files)
        .unwrap_err();
    assert_eq!(failure.reached, JobState::Detected);
    assert_eq!(failure.error.kind(), "render");
    assert_eq!(std::fs::metadata(files.output()).unwrap().len(), 0);

    files.release();
    assert_eq!(store.stats().outstanding(), 0);
    assert_eq!(std::fs::read_dir(store.path()).unwrap().count(), 0);
}
