use crate::media::{decode_image_file, encode_image_file};
use crate::pipeline::{persist_input, Annotator, JobFailure, JobState, JobTracker, MediaKind, PipelineOutput};
use crate::store::JobFiles;

/// One image in, one annotated image out.
pub struct StillImagePipeline<'a> {
    annotator: Annotator<'a>,
}

impl<'a> StillImagePipeline<'a> {
    pub fn new(annotator: Annotator<'a>) -> Self {
        Self { annotator }
    }

    pub fn run(
        &self,
        job_id: &str,
        bytes: &[u8],
        files: &JobFiles<'_>,
    ) -> Result<PipelineOutput, JobFailure> {
        let mut job = JobTracker::new(job_id);

        persist_input(files.input(), bytes).map_err(|e| job.fail(e))?;

        let frame = decode_image_file(files.input()).map_err(|e| job.fail(e))?;
        job.advance(JobState::Decoded);

        let detections = self.annotator.detect(&frame).map_err(|e| job.fail(e))?;
        job.advance(JobState::Detected);

        let rendered = self
            .annotator
            .render(&frame, &detections)
            .map_err(|e| job.fail(e))?;
        job.advance(JobState::Rendered);

        encode_image_file(&rendered, files.output()).map_err(|e| job.fail(e))?;
        job.advance(JobState::Written);

        log::debug!(
            "job {}: {}x{} image, {} detection(s)",
            job_id,
            rendered.width,
            rendered.height,
            detections.len()
        );
        Ok(PipelineOutput {
            kind: MediaKind::Image,
            path: files.output().to_path_buf(),
            frames: 1,
            detections: detections.len() as u64,
        })
    }
}
