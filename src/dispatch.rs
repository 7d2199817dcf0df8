//! Media intake and dispatch.
//!
//! One request is processed to completion before the next is looked at. A
//! failed job is answered with a short notice and never escapes
//! [`Dispatcher::handle`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use uuid::Uuid;

use crate::error::RelayError;
use crate::media::VideoCodec;
use crate::pipeline::{
    Annotator, JobFailure, JobState, MediaKind, PipelineOutput, StillImagePipeline, VideoPipeline,
};
use crate::store::{JobFiles, TempMediaStore};
use crate::transport::{Attachment, BotTransport, Command, InboundRequest, ReplyTo, RequestPayload};

pub const GREETING: &str = "🚗 Hello! Send me a photo/video, and I'll detect vehicles!";
pub const UNSUPPORTED_NOTICE: &str =
    "📎 I can only process photos and videos. Send me one, and I'll detect vehicles!";

const DEFAULT_POLL_BACKOFF: Duration = Duration::from_secs(5);
const BACKOFF_SLICE: Duration = Duration::from_millis(100);

pub fn failure_notice(kind: MediaKind) -> &'static str {
    match kind {
        MediaKind::Image => "⚠️ Error processing photo. Please try again.",
        MediaKind::Video => "⚠️ Error processing video. Please try again.",
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DispatchOutcome {
    Greeted,
    MediaSent {
        kind: MediaKind,
        frames: u64,
        detections: u64,
    },
    /// The job failed and the user was told so.
    ErrorNoticeSent { kind: MediaKind, reached: JobState },
    UnsupportedNoticeSent,
    /// Even the reply could not be delivered.
    ReplyFailed,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ServeSummary {
    pub handled: u64,
    pub failed_jobs: u64,
    pub poll_errors: u64,
}

pub struct Dispatcher<'a> {
    annotator: Annotator<'a>,
    codec: &'a dyn VideoCodec,
    store: &'a TempMediaStore,
    poll_backoff: Duration,
}

impl<'a> Dispatcher<'a> {
    pub fn new(annotator: Annotator<'a>, codec: &'a dyn VideoCodec, store: &'a TempMediaStore) -> Self {
        Self {
            annotator,
            codec,
            store,
            poll_backoff: DEFAULT_POLL_BACKOFF,
        }
    }

    pub fn with_poll_backoff(mut self, backoff: Duration) -> Self {
        self.poll_backoff = backoff;
        self
    }

    /// Poll and handle requests until `shutdown` is raised.
    pub fn serve(&self, transport: &dyn BotTransport, shutdown: &AtomicBool) -> ServeSummary {
        let mut summary = ServeSummary::default();
        while !shutdown.load(Ordering::SeqCst) {
            let batch = match transport.poll() {
                Ok(batch) => batch,
                Err(err) => {
                    summary.poll_errors += 1;
                    log::warn!(
                        "poll failed: {}; retrying in {}s",
                        err,
                        self.poll_backoff.as_secs_f32()
                    );
                    sleep_unless(shutdown, self.poll_backoff);
                    continue;
                }
            };
            for request in &batch {
                let outcome = self.handle(transport, request);
                summary.handled += 1;
                if matches!(
                    outcome,
                    DispatchOutcome::ErrorNoticeSent { .. } | DispatchOutcome::ReplyFailed
                ) {
                    summary.failed_jobs += 1;
                }
            }
        }
        log::info!(
            "dispatcher stopped after {} request(s), {} failed",
            summary.handled,
            summary.failed_jobs
        );
        summary
    }

    pub fn handle(&self, transport: &dyn BotTransport, request: &InboundRequest) -> DispatchOutcome {
        let to = request.reply_to;
        match &request.payload {
            RequestPayload::Command(Command::Start | Command::Help) => {
                self.reply_text(transport, to, GREETING, DispatchOutcome::Greeted)
            }
            RequestPayload::Command(Command::Other(name)) => {
                log::info!("chat {}: unknown command /{}", to.chat_id, name);
                self.reply_text(transport, to, UNSUPPORTED_NOTICE, DispatchOutcome::UnsupportedNoticeSent)
            }
            RequestPayload::Unsupported => {
                log::info!("chat {}: message without a supported attachment", to.chat_id);
                self.reply_text(transport, to, UNSUPPORTED_NOTICE, DispatchOutcome::UnsupportedNoticeSent)
            }
            RequestPayload::Media(attachment) => self.handle_media(transport, to, attachment),
        }
    }

    fn handle_media(&self, transport: &dyn BotTransport, to: ReplyTo, attachment: &Attachment) -> DispatchOutcome {
        let job_id = Uuid::new_v4().to_string();
        let kind = attachment.kind;
        log::info!("job {}: {} from chat {}", job_id, kind, to.chat_id);

        let files = match self.store.acquire_job(kind) {
            Ok(files) => files,
            Err(err) => {
                return self.report_failure(
                    transport,
                    to,
                    &job_id,
                    kind,
                    JobFailure {
                        reached: JobState::Received,
                        error: err,
                    },
                );
            }
        };

        let outcome = match self.run_job(transport, &job_id, attachment, &files) {
            Ok(output) => match transport.send_media(to, kind, &output.path) {
                Ok(()) => {
                    log::debug!("job {}: {:?} -> {:?}", job_id, JobState::Written, JobState::Sent);
                    log::info!(
                        "job {}: sent {} frame(s) with {} detection(s)",
                        job_id,
                        output.frames,
                        output.detections
                    );
                    DispatchOutcome::MediaSent {
                        kind,
                        frames: output.frames,
                        detections: output.detections,
                    }
                }
                Err(err) => self.report_failure(
                    transport,
                    to,
                    &job_id,
                    kind,
                    JobFailure {
                        reached: JobState::Written,
                        error: err,
                    },
                ),
            },
            Err(failure) => self.report_failure(transport, to, &job_id, kind, failure),
        };
        files.release();
        outcome
    }

    fn run_job(
        &self,
        transport: &dyn BotTransport,
        job_id: &str,
        attachment: &Attachment,
        files: &JobFiles<'_>,
    ) -> Result<PipelineOutput, JobFailure> {
        let bytes = transport.download(attachment).map_err(|error| JobFailure {
            reached: JobState::Received,
            error,
        })?;
        match attachment.kind {
            MediaKind::Image => StillImagePipeline::new(self.annotator).run(job_id, &bytes, files),
            MediaKind::Video => VideoPipeline::new(self.annotator, self.codec).run(job_id, &bytes, files),
        }
    }

    fn report_failure(
        &self,
        transport: &dyn BotTransport,
        to: ReplyTo,
        job_id: &str,
        kind: MediaKind,
        failure: JobFailure,
    ) -> DispatchOutcome {
        log::error!(
            "job {}: {} processing failed ({}): {}",
            job_id,
            kind,
            failure.error.kind(),
            failure
        );
        log_causes(&failure.error);
        log::debug!("job {}: {:?} -> {:?}", job_id, failure.reached, JobState::Failed);
        self.reply_text(
            transport,
            to,
            failure_notice(kind),
            DispatchOutcome::ErrorNoticeSent {
                kind,
                reached: failure.reached,
            },
        )
    }

    fn reply_text(
        &self,
        transport: &dyn BotTransport,
        to: ReplyTo,
        text: &str,
        outcome: DispatchOutcome,
    ) -> DispatchOutcome {
        match transport.send_text(to, text) {
            Ok(()) => outcome,
            Err(err) => {
                log::error!("chat {}: reply failed: {}", to.chat_id, err);
                DispatchOutcome::ReplyFailed
            }
        }
    }
}

fn log_causes(error: &RelayError) {
    let mut source = std::error::Error::source(error);
    while let Some(cause) = source {
        log::debug!("  caused by: {}", cause);
        source = cause.source();
    }
}

fn sleep_unless(shutdown: &AtomicBool, total: Duration) {
    let mut remaining = total;
    while !remaining.is_zero() && !shutdown.load(Ordering::SeqCst) {
        let step = remaining.min(BACKOFF_SLICE);
        thread::sleep(step);
        remaining -= step;
    }
}
