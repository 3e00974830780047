use crate::run_artifacts::{CrossingRecord, JobSummary};
use anyhow::{Context, Result};
use chrono::Utc;
use std::fs;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Picks `output_<unix-seconds>.mp4` under `results_root`, adding a numeric
/// suffix when that file exists or `is_taken` claims the stem. Returns the
/// job id (file stem) and path.
pub fn next_output_path(
    results_root: &Path,
    is_taken: impl Fn(&str) -> bool,
) -> Result<(String, PathBuf)> {
    fs::create_dir_all(results_root)
        .with_context(|| format!("Failed to create results dir {:?}", results_root))?;

    let base = format!("output_{}", Utc::now().timestamp());
    let mut stem = base.clone();
    let mut n = 1;
    while is_taken(&stem) || results_root.join(format!("{}.mp4", stem)).exists() {
        stem = format!("{}_{}", base, n);
        n += 1;
    }
    let path = results_root.join(format!("{}.mp4", stem));
    Ok((stem, path))
}

/// Path for a newly uploaded source video.
pub fn upload_path(upload_root: &Path, original_name: &str) -> Result<PathBuf> {
    fs::create_dir_all(upload_root)
        .with_context(|| format!("Failed to create upload dir {:?}", upload_root))?;

    let ext = Path::new(original_name)
        .extension()
        .and_then(|s| s.to_str())
        .filter(|s| s.chars().all(|c| c.is_ascii_alphanumeric()))
        .unwrap_or("mp4");
    Ok(upload_root.join(format!(
        "input_{}.{}",
        Utc::now().timestamp_nanos_opt().unwrap_or_default(),
        ext
    )))
}

fn sidecar(output_video: &Path, suffix: &str) -> PathBuf {
    let stem = output_video
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("output");
    output_video.with_file_name(format!("{}{}", stem, suffix))
}

/// Writes `<stem>.json` and `<stem>.crossings.csv` next to the output video.
pub fn save_job_artifacts(summary: &JobSummary) -> Result<()> {
    let summary_path = sidecar(&summary.output_video, ".json");
    let content = serde_json::to_string_pretty(summary)?;
    fs::write(&summary_path, content)
        .with_context(|| format!("Failed to write {:?}", summary_path))?;

    let csv_path = sidecar(&summary.output_video, ".crossings.csv");
    write_crossings(&csv_path, &summary.crossings)?;
    Ok(())
}

fn write_crossings(path: &Path, crossings: &[CrossingRecord]) -> Result<()> {
    let mut writer = csv::Writer::from_path(path)
        .with_context(|| format!("Failed to create {:?}", path))?;
    // Header is written even when nothing was counted
    if crossings.is_empty() {
        writer.write_record(["frame_index", "track_id", "total"])?;
    }
    for record in crossings {
        writer.serialize(record)?;
    }
    writer.flush()?;
    Ok(())
}

#[cfg(test)]
pub fn read_crossings(path: &Path) -> Result<Vec<CrossingRecord>> {
    let mut reader = csv::Reader::from_path(path)?;
    let records = reader
        .deserialize()
        .collect::<std::result::Result<Vec<CrossingRecord>, _>>()?;
    Ok(records)
}

/// Completed job summaries under `results_root`, newest first.
pub fn list_results(results_root: &Path) -> Vec<JobSummary> {
    let mut summaries: Vec<JobSummary> = WalkDir::new(results_root)
        .max_depth(1)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .filter(|e| {
            e.path()
                .extension()
                .and_then(|s| s.to_str())
                .map(|s| s == "json")
                .unwrap_or(false)
        })
        .filter_map(|e| {
            let content = fs::read_to_string(e.path()).ok()?;
            serde_json::from_str::<JobSummary>(&content).ok()
        })
        .filter(|s| s.output_video.exists())
        .collect();

    summaries.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    summaries
}
