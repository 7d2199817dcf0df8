use crate::error::RelayResult;
use crate::media::{VideoCodec, VideoSink, VideoSource};
use crate::pipeline::{persist_input, Annotator, JobFailure, JobState, JobTracker, MediaKind, PipelineOutput};
use crate::store::JobFiles;

/// Frame-by-frame annotation of a video file.
///
/// The output keeps the source resolution and frame rate, one output frame
/// per input frame in source order. The first failing frame aborts the job.
pub struct VideoPipeline<'a> {
    annotator: Annotator<'a>,
    codec: &'a dyn VideoCodec,
}

struct LoopStats {
    frames: u64,
    detections: u64,
}

impl<'a> VideoPipeline<'a> {
    pub fn new(annotator: Annotator<'a>, codec: &'a dyn VideoCodec) -> Self {
        Self { annotator, codec }
    }

    pub fn run(
        &self,
        job_id: &str,
        bytes: &[u8],
        files: &JobFiles<'_>,
    ) -> Result<PipelineOutput, JobFailure> {
        let mut job = JobTracker::new(job_id);

        persist_input(files.input(), bytes).map_err(|e| job.fail(e))?;

        let mut source = self
            .codec
            .open_source(files.input())
            .map_err(|e| job.fail(e))?;
        let info = source.info();
        log::debug!(
            "job {}: source {}x{} @ {} fps",
            job_id,
            info.width,
            info.height,
            info.frame_rate
        );

        let mut sink = match self.codec.open_sink(files.output(), &info) {
            Ok(sink) => sink,
            Err(err) => {
                close_source(job_id, source.as_mut());
                return Err(job.fail(err));
            }
        };

        let outcome = self.annotate_frames(job_id, source.as_mut(), sink.as_mut(), &mut job);
        let closed = source.close();

        let stats = match outcome {
            Ok(stats) => stats,
            Err(err) => {
                sink.abort();
                if let Err(close_err) = closed {
                    log::warn!("job {}: closing source after failure: {}", job_id, close_err);
                }
                return Err(job.fail(err));
            }
        };
        if let Err(err) = closed {
            sink.abort();
            return Err(job.fail(err));
        }
        sink.finish().map_err(|e| job.fail(e))?;
        job.advance(JobState::Written);

        log::debug!(
            "job {}: wrote {} frame(s), {} detection(s)",
            job_id,
            stats.frames,
            stats.detections
        );
        Ok(PipelineOutput {
            kind: MediaKind::Video,
            path: files.output().to_path_buf(),
            frames: stats.frames,
            detections: stats.detections,
        })
    }

    fn annotate_frames(
        &self,
        job_id: &str,
        source: &mut dyn VideoSource,
        sink: &mut dyn VideoSink,
        job: &mut JobTracker<'_>,
    ) -> RelayResult<LoopStats> {
        let mut stats = LoopStats {
            frames: 0,
            detections: 0,
        };
        while let Some(frame) = source.read_frame()? {
            let index = stats.frames;
            if index == 0 {
                job.advance(JobState::Decoded);
            }
            let detections = self
                .annotator
                .detect(&frame)
                .map_err(|e| e.at_frame(index))?;
            if index == 0 {
                job.advance(JobState::Detected);
            }
            let rendered = self
                .annotator
                .render(&frame, &detections)
                .map_err(|e| e.at_frame(index))?;
            if index == 0 {
                job.advance(JobState::Rendered);
            }
            sink.write_frame(&rendered).map_err(|e| e.at_frame(index))?;
            stats.frames += 1;
            stats.detections += detections.len() as u64;
        }
        if stats.frames == 0 {
            log::warn!("job {}: video contained no frames", job_id);
        }
        Ok(stats)
    }
}

fn close_source(job_id: &str, source: &mut dyn VideoSource) {
    if let Err(err) = source.close() {
        log::warn!("job {}: closing source: {}", job_id, err);
    }
}
