// Job orchestrator: admits video jobs, tracks their progress, and wires the
// real detector, reader and encoder into the video job runner.

use crate::error::{CountError, Result};
use crate::pipeline::detection::{Detector, ObjectDetector};
use crate::pipeline::processor::FrameProcessor;
use crate::pipeline::session::SessionCoordinator;
use crate::pipeline::types::{CountSettings, JobState};
use crate::pipeline::video_job::{run_video_job, VideoJob};
use crate::run_artifacts::JobSummary;
use crate::run_context::{next_output_path, save_job_artifacts};
use crate::video::opencv_reader::OpencvReader;
use crate::video::prefetch::PrefetchReader;
use crate::video::writer::OpencvSinkOpener;
use crate::video::{SinkOpener, VideoReader};
use chrono::Utc;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock, RwLockWriteGuard};

/// Frames decoded ahead of the processor.
const PREFETCH_DEPTH: usize = 4;

lazy_static::lazy_static! {
    /// Process-wide registry used by the HTTP handlers and the CLI.
    pub static ref JOB_REGISTRY: JobRegistry = JobRegistry::default();
}

/// Finished records kept for `/api/jobs`; older ones are pruned on admission.
const MAX_FINISHED_JOBS: usize = 50;

/// Progress records of the jobs and live streams started in this process.
///
/// Admission policy: at most one runner (video job or live stream) is active
/// at a time, since both may count into the same session.
#[derive(Default)]
pub struct JobRegistry {
    jobs: RwLock<HashMap<String, Arc<JobState>>>,
}

impl JobRegistry {
    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, Arc<JobState>>> {
        self.jobs.write().unwrap_or_else(|e| e.into_inner())
    }

    /// Registers `job_id` unless another runner is still active.
    pub fn admit(&self, job_id: &str) -> Result<Arc<JobState>> {
        let mut jobs = self.write();
        if let Some(active) = jobs.values().find(|s| s.is_active()) {
            return Err(CountError::JobInProgress(active.job_id.clone()));
        }
        if jobs.contains_key(job_id) {
            return Err(CountError::Other(anyhow::anyhow!(
                "job id {} is already registered",
                job_id
            )));
        }
        Ok(Self::insert(&mut jobs, job_id.to_string()))
    }

    /// Registers a live stream under a fresh `live_<unix-millis>` id.
    pub fn admit_live(&self) -> Result<Arc<JobState>> {
        let mut jobs = self.write();
        if let Some(active) = jobs.values().find(|s| s.is_active()) {
            return Err(CountError::JobInProgress(active.job_id.clone()));
        }
        let base = format!("live_{}", Utc::now().timestamp_millis());
        let mut id = base.clone();
        let mut n = 1;
        while jobs.contains_key(&id) {
            id = format!("{}_{}", base, n);
            n += 1;
        }
        Ok(Self::insert(&mut jobs, id))
    }

    fn insert(jobs: &mut HashMap<String, Arc<JobState>>, job_id: String) -> Arc<JobState> {
        let mut finished: Vec<_> = jobs
            .values()
            .filter(|s| !s.is_active())
            .map(|s| (s.start_time, s.job_id.clone()))
            .collect();
        if finished.len() >= MAX_FINISHED_JOBS {
            finished.sort();
            let excess = finished.len() + 1 - MAX_FINISHED_JOBS;
            for (_, id) in finished.into_iter().take(excess) {
                jobs.remove(&id);
            }
            tracing::debug!("Pruned {} finished job records", excess);
        }

        tracing::info!("Registering job {}", job_id);
        let state = Arc::new(JobState::new(job_id.clone()));
        jobs.insert(job_id, state.clone());
        state
    }

    pub fn contains(&self, job_id: &str) -> bool {
        self.jobs
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .contains_key(job_id)
    }

    pub fn get(&self, job_id: &str) -> Option<Arc<JobState>> {
        self.jobs
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(job_id)
            .cloned()
    }

    pub fn list(&self) -> Vec<Arc<JobState>> {
        let mut jobs: Vec<_> = self
            .jobs
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .cloned()
            .collect();
        jobs.sort_by(|a, b| a.job_id.cmp(&b.job_id));
        jobs
    }

    pub fn active_job(&self) -> Option<Arc<JobState>> {
        self.list().into_iter().find(|s| s.is_active())
    }

    /// Requests cancellation; the runner stops at the next frame boundary.
    pub fn stop(&self, job_id: &str) -> bool {
        match self.get(job_id) {
            Some(state) => {
                state.cancel();
                true
            }
            None => false,
        }
    }
}

/// Inputs of one video job submission.
#[derive(Debug, Clone)]
pub struct JobRequest {
    pub input_path: PathBuf,
    pub results_root: PathBuf,
    pub settings: CountSettings,
}

/// Admits, runs and records one job with injectable collaborators.
///
/// The state is marked complete on every exit path; artifacts are only
/// written for verified outputs.
pub fn execute_job<D, O>(
    registry: &JobRegistry,
    request: &JobRequest,
    session: Arc<SessionCoordinator>,
    load_detector: D,
    open_source: O,
    sink_opener: &dyn SinkOpener,
) -> Result<JobSummary>
where
    D: FnOnce() -> Result<Box<dyn Detector>>,
    O: FnOnce(&Path) -> Result<Box<dyn VideoReader>>,
{
    let (job_id, output_path) =
        next_output_path(&request.results_root, |stem| registry.contains(stem))?;
    let state = registry.admit(&job_id)?;

    let result = (|| -> Result<JobSummary> {
        let mut reader = open_source(&request.input_path)?;
        let detector = load_detector()?;
        let mut processor = FrameProcessor::new(detector, session, request.settings.clone());
        let job = VideoJob::new(job_id.clone(), request.input_path.clone(), output_path);

        let summary = run_video_job(
            &job,
            reader.as_mut(),
            sink_opener,
            &mut processor,
            Some(&state),
        )?;
        save_job_artifacts(&summary)?;
        Ok(summary)
    })();

    match &result {
        Ok(summary) => {
            tracing::info!(
                "Job {} finished: {} vehicles in {} frames",
                job_id,
                summary.total_count,
                summary.frames_processed
            );
            state.finish(None);
        }
        Err(e) => {
            tracing::error!("Job {} failed: {}", job_id, e);
            state.finish(Some(e.to_string()));
        }
    }
    result
}

/// Opens a video file behind a prefetching decode thread.
pub fn open_video_file(path: &Path) -> Result<Box<dyn VideoReader>> {
    let path_str = path
        .to_str()
        .ok_or_else(|| CountError::SourceUnavailable(format!("non-UTF8 path {:?}", path)))?
        .to_string();
    if !path.exists() {
        return Err(CountError::SourceUnavailable(format!(
            "Video file NOT FOUND at: {:?}",
            path
        )));
    }
    let name = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("video")
        .to_string();
    let reader = PrefetchReader::spawn(&name, PREFETCH_DEPTH, move || {
        Ok(Box::new(OpencvReader::open_file(&path_str)?) as Box<dyn VideoReader>)
    })?;
    Ok(Box::new(reader))
}

/// Runs a job with the RT-DETR detector, OpenCV decoding and OpenCV encoding.
pub fn run_job(
    request: &JobRequest,
    session: Arc<SessionCoordinator>,
    model_path: &str,
) -> Result<JobSummary> {
    execute_job(
        &JOB_REGISTRY,
        request,
        session,
        || Ok(Box::new(ObjectDetector::new(model_path)?) as Box<dyn Detector>),
        open_video_file,
        &OpencvSinkOpener,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::processor::test_support::*;
    use crate::video::prefetch::test_support::SyntheticReader;
    use crate::video::writer::test_support::RecordingOpener;
    use crate::video::CODEC_PREFERENCE;
    use chrono::Utc;

    fn request(name: &str) -> JobRequest {
        let results_root = std::env::temp_dir().join(format!(
            "vc_orchestrator_{}_{}_{}",
            name,
            std::process::id(),
            Utc::now().timestamp_nanos_opt().unwrap_or_default()
        ));
        JobRequest {
            input_path: PathBuf::from("synthetic.mp4"),
            results_root,
            settings: CountSettings::default(),
        }
    }

    #[test]
    fn test_admission_allows_one_active_job() {
        let registry = JobRegistry::default();
        let first = registry.admit("a").unwrap();
        let err = registry.admit("b").unwrap_err();
        assert!(matches!(err, CountError::JobInProgress(ref id) if id == "a"));

        first.finish(None);
        assert!(registry.admit("b").is_ok());
        assert_eq!(registry.list().len(), 2);
    }

    #[test]
    fn test_live_stream_and_video_job_exclude_each_other() {
        let registry = JobRegistry::default();
        let live = registry.admit_live().unwrap();
        assert!(live.job_id.starts_with("live_"));

        let err = registry.admit("output_1").unwrap_err();
        assert!(matches!(err, CountError::JobInProgress(ref id) if *id == live.job_id));
        assert!(registry.admit_live().is_err());

        live.finish(None);
        let job = registry.admit("output_1").unwrap();
        let err = registry.admit_live().unwrap_err();
        assert!(matches!(err, CountError::JobInProgress(ref id) if id == "output_1"));

        job.finish(None);
        let second_live = registry.admit_live().unwrap();
        assert_ne!(second_live.job_id, live.job_id);
    }

    #[test]
    fn test_finished_job_id_is_not_reused() {
        let registry = JobRegistry::default();
        let first = registry.admit("output_1").unwrap();
        first.finish(Some("encoder failed".to_string()));

        assert!(registry.admit("output_1").is_err());
        assert_eq!(
            registry.get("output_1").unwrap().to_progress_json()["error"],
            "encoder failed"
        );
    }

    #[test]
    fn test_finished_records_are_pruned() {
        let registry = JobRegistry::default();
        for i in 0..MAX_FINISHED_JOBS + 5 {
            registry.admit(&format!("job_{:03}", i)).unwrap().finish(None);
        }
        let active = registry.admit("job_latest").unwrap();

        let ids: Vec<String> = registry.list().iter().map(|s| s.job_id.clone()).collect();
        assert_eq!(ids.len(), MAX_FINISHED_JOBS);
        assert!(!registry.contains("job_000"));
        assert!(registry.contains("job_054"));
        assert!(active.is_active());
    }

    #[test]
    fn test_stop_marks_job_inactive() {
        let registry = JobRegistry::default();
        let state = registry.admit("a").unwrap();
        assert!(registry.stop("a"));
        assert!(!state.is_active());
        assert!(!registry.stop("missing"));
        assert!(registry.active_job().is_none());
    }

    #[test]
    fn test_execute_job_records_artifacts() {
        let registry = JobRegistry::default();
        let request = request("ok");
        let opener = RecordingOpener::accepting(CODEC_PREFERENCE.to_vec());

        let summary = execute_job(
            &registry,
            &request,
            shared_session(),
            || Ok(Box::new(ScriptedDetector::new(vec![vec![], vec![], vec![car_on_line()]])) as _),
            |_| Ok(Box::new(SyntheticReader::finite(3)) as _),
            &opener,
        )
        .unwrap();

        assert_eq!(summary.total_count, 1);
        assert_eq!(summary.frames_processed, 3);

        let state = registry.get(&summary.job_id).unwrap();
        let progress = state.to_progress_json();
        assert_eq!(progress["is_complete"], true);
        assert_eq!(progress["count"], 1);

        let listed = crate::run_context::list_results(&request.results_root);
        assert_eq!(listed.len(), 1);
        std::fs::remove_dir_all(&request.results_root).ok();
    }

    #[test]
    fn test_execute_job_reports_missing_source() {
        let registry = JobRegistry::default();
        let request = request("missing");
        let opener = RecordingOpener::accepting(CODEC_PREFERENCE.to_vec());

        let err = execute_job(
            &registry,
            &request,
            shared_session(),
            || Ok(Box::new(ScriptedDetector::new(vec![])) as _),
            |p| open_video_file(p),
            &opener,
        )
        .unwrap_err();
        assert_eq!(err.kind(), "source_unavailable");

        // Failed job no longer blocks admission
        assert!(registry.active_job().is_none());
        let job = &registry.list()[0];
        assert!(job.to_progress_json()["error"].is_string());
        std::fs::remove_dir_all(&request.results_root).ok();
    }
}
