use crate::error::{CountError, Result};
use crate::pipeline::processor::FrameProcessor;
use crate::pipeline::types::JobState;
use crate::run_artifacts::{CrossingRecord, JobSummary};
use crate::video::writer::negotiate_encoder;
use crate::video::{FourCc, SinkOpener, VideoReader, VideoSink, CODEC_PREFERENCE, FALLBACK_CODEC};
use chrono::Utc;
use opencv::core::Mat;
use opencv::prelude::*;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;

/// Output encodings below this rate play back badly; slower sources are
/// written at this rate instead.
pub const MIN_OUTPUT_FPS: f64 = 20.0;

const PROGRESS_LOG_INTERVAL: usize = 30;

/// Descriptor of one finite-source counting job.
#[derive(Debug, Clone)]
pub struct VideoJob {
    pub job_id: String,
    pub input_path: PathBuf,
    pub output_path: PathBuf,
    pub codec_candidates: Vec<FourCc>,
    pub fallback_codec: FourCc,
}

impl VideoJob {
    pub fn new(job_id: String, input_path: PathBuf, output_path: PathBuf) -> Self {
        Self {
            job_id,
            input_path,
            output_path,
            codec_candidates: CODEC_PREFERENCE.to_vec(),
            fallback_codec: FALLBACK_CODEC,
        }
    }
}

pub fn effective_fps(source_fps: f64) -> f64 {
    if source_fps.is_finite() {
        source_fps.max(MIN_OUTPUT_FPS)
    } else {
        MIN_OUTPUT_FPS
    }
}

/// Releases the encoder and deletes whatever it wrote.
fn discard_output(sink: Box<dyn VideoSink>, path: &Path) {
    if let Err(e) = sink.finalize() {
        tracing::warn!("Failed to release encoder for {:?}: {}", path, e);
    }
    remove_partial(path);
}

fn remove_partial(path: &Path) {
    if path.exists() {
        if let Err(e) = fs::remove_file(path) {
            tracing::warn!("Failed to remove partial output {:?}: {}", path, e);
        }
    }
}

fn verify_output(path: &Path) -> Result<u64> {
    let len = fs::metadata(path)
        .map_err(|e| {
            CountError::OutputVerificationFailed(format!("{:?} missing after finalize: {}", path, e))
        })?
        .len();
    if len == 0 {
        let _ = fs::remove_file(path);
        return Err(CountError::OutputVerificationFailed(format!(
            "{:?} is empty after finalize",
            path
        )));
    }
    Ok(len)
}

/// Counts vehicles over a finite source and writes the annotated video.
///
/// Starts a fresh session on the processor's coordinator, negotiates an
/// encoder, then processes frames strictly in source order. Success is only
/// reported once the finalized output exists and is non-empty.
pub fn run_video_job(
    job: &VideoJob,
    reader: &mut dyn VideoReader,
    opener: &dyn SinkOpener,
    processor: &mut FrameProcessor,
    state: Option<&JobState>,
) -> Result<JobSummary> {
    processor.session().initialize();

    let total_frames = reader.frame_count();
    if let Some(state) = state {
        state.set_total_frames(total_frames);
    }

    // Some containers only report dimensions once the first frame decodes
    let mut pending: Option<Mat> = None;
    let mut size = reader.frame_size();
    if size.width <= 0 || size.height <= 0 {
        let first = reader.next_frame()?.ok_or_else(|| {
            CountError::SourceUnavailable(format!("{:?} has no frames", job.input_path))
        })?;
        size = first.size()?;
        pending = Some(first);
    }
    let fps = effective_fps(reader.source_fps());

    let (codec, mut sink) = negotiate_encoder(
        opener,
        &job.output_path,
        fps,
        size,
        &job.codec_candidates,
        job.fallback_codec,
    )?;

    tracing::info!(
        "Job {}: processing {:?} ({}x{} @ {:.1} fps, frames={:?})",
        job.job_id,
        job.input_path,
        size.width,
        size.height,
        fps,
        total_frames
    );

    let mut frame_index = 0usize;
    let mut total = 0usize;
    let mut crossings = Vec::new();

    loop {
        if state.map(|s| !s.is_active()).unwrap_or(false) {
            tracing::info!("Job {}: cancelled at frame {}", job.job_id, frame_index);
            discard_output(sink, &job.output_path);
            return Err(CountError::Cancelled {
                frames: frame_index,
            });
        }

        let next = match pending.take() {
            Some(frame) => Ok(Some(frame)),
            None => reader.next_frame(),
        };
        let mut frame = match next {
            Ok(Some(frame)) => frame,
            Ok(None) => break,
            Err(e) => {
                discard_output(sink, &job.output_path);
                return Err(e);
            }
        };

        let start_inst = Instant::now();
        let written = processor
            .process(&mut frame)
            .and_then(|outcome| sink.write(&frame).map(|_| outcome));
        let outcome = match written {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::error!("Job {}: failed at frame {}: {}", job.job_id, frame_index, e);
                discard_output(sink, &job.output_path);
                return Err(e);
            }
        };

        total = outcome.total;
        crossings.extend(outcome.newly_counted.iter().map(|&track_id| CrossingRecord {
            frame_index,
            track_id,
            total,
        }));
        frame_index += 1;

        if let Some(state) = state {
            state.update(frame_index, total, start_inst.elapsed().as_secs_f64() * 1000.0);
        }
        if frame_index % PROGRESS_LOG_INTERVAL == 0 {
            tracing::info!(
                "Job {}: processed {}/{} frames, count {}",
                job.job_id,
                frame_index,
                total_frames.map(|t| t.to_string()).unwrap_or_else(|| "?".into()),
                total
            );
        }
    }

    if let Err(e) = sink.finalize() {
        tracing::error!("Job {}: failed to finalize output: {}", job.job_id, e);
        remove_partial(&job.output_path);
        return Err(e);
    }
    let bytes = verify_output(&job.output_path)?;

    tracing::info!(
        "Job {}: complete, {} frames, {} vehicles counted, {} bytes written to {:?}",
        job.job_id,
        frame_index,
        total,
        bytes,
        job.output_path
    );

    Ok(JobSummary {
        job_id: job.job_id.clone(),
        input: job.input_path.clone(),
        output_video: job.output_path.clone(),
        codec: codec.to_string(),
        fps,
        width: size.width,
        height: size.height,
        frames_processed: frame_index,
        total_frames,
        total_count: total,
        created_at: Utc::now(),
        crossings,
    })
}
