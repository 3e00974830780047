// Run artifact struct definitions
//
// Everything persisted next to a job's output video: the JSON summary and
// the per-crossing CSV log.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// One newly counted identity.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct CrossingRecord {
    pub frame_index: usize,
    pub track_id: u64,
    pub total: usize,
}

/// Result of a completed, verified video job (`<stem>.json`).
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct JobSummary {
    pub job_id: String,
    pub input: PathBuf,
    pub output_video: PathBuf,
    pub codec: String,
    pub fps: f64,
    pub width: i32,
    pub height: i32,
    pub frames_processed: usize,
    #[serde(default)]
    pub total_frames: Option<usize>,
    pub total_count: usize,
    pub created_at: DateTime<Utc>,
    #[serde(skip)]
    pub crossings: Vec<CrossingRecord>,
}

impl JobSummary {
    pub fn output_file_name(&self) -> String {
        self.output_video
            .file_name()
            .and_then(|s| s.to_str())
            .unwrap_or("unknown")
            .to_string()
    }
}
