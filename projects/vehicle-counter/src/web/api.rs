use crate::error::CountError;
use crate::pipeline::orchestrator::{run_job, JobRequest, JOB_REGISTRY};
use crate::pipeline::types::{CountSettings, CountingLine};
use crate::run_artifacts::JobSummary;
use crate::run_context::{list_results, upload_path};
use crate::web::server::AppState;
use axum::{
    extract::{multipart::Field, Multipart, Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use serde_json::{json, Value};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;

/// Error body `{error, message}` with a status derived from the error kind.
pub struct ApiError(pub CountError);

impl ApiError {
    fn status(&self) -> StatusCode {
        match &self.0 {
            CountError::InvalidConfiguration(_) => StatusCode::BAD_REQUEST,
            CountError::JobInProgress(_) => StatusCode::CONFLICT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<CountError> for ApiError {
    fn from(e: CountError) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!("Request failed: {}", self.0);
        } else {
            tracing::warn!("Request rejected: {}", self.0);
        }
        let body = json!({ "error": self.0.kind(), "message": self.0.to_string() });
        (status, Json(body)).into_response()
    }
}

fn bad_request(message: impl Into<String>) -> ApiError {
    ApiError(CountError::InvalidConfiguration(message.into()))
}

#[derive(Serialize)]
pub struct UploadResponse {
    pub success: bool,
    pub job_id: String,
    pub output_video: String,
    pub total_count: usize,
    pub frames_processed: usize,
    pub output_path: PathBuf,
}

impl From<JobSummary> for UploadResponse {
    fn from(summary: JobSummary) -> Self {
        Self {
            success: true,
            output_video: format!("/static/results/{}", summary.output_file_name()),
            job_id: summary.job_id,
            total_count: summary.total_count,
            frames_processed: summary.frames_processed,
            output_path: summary.output_video,
        }
    }
}

/// Streams an uploaded file field to disk.
async fn save_field(mut field: Field<'_>, path: &std::path::Path) -> Result<u64, ApiError> {
    let mut file = tokio::fs::File::create(path)
        .await
        .map_err(|e| ApiError(CountError::Io(e)))?;
    let mut written = 0u64;
    while let Some(chunk) = field
        .chunk()
        .await
        .map_err(|e| bad_request(format!("upload interrupted: {}", e)))?
    {
        file.write_all(&chunk)
            .await
            .map_err(|e| ApiError(CountError::Io(e)))?;
        written += chunk.len() as u64;
    }
    file.flush().await.map_err(|e| ApiError(CountError::Io(e)))?;
    Ok(written)
}

/// Applies the optional `confidence` and `line` form fields to the defaults.
fn upload_settings(
    defaults: &CountSettings,
    confidence: Option<&str>,
    line: Option<&str>,
) -> Result<CountSettings, CountError> {
    let confidence = match confidence.map(str::trim).filter(|s| !s.is_empty()) {
        Some(raw) => raw.parse::<f32>().map_err(|e| {
            CountError::InvalidConfiguration(format!("bad confidence '{}': {}", raw, e))
        })?,
        None => defaults.confidence,
    };
    let line = match line.map(str::trim).filter(|s| !s.is_empty()) {
        Some(raw) => raw
            .parse::<CountingLine>()?
            .with_tolerance(defaults.line.tolerance)?,
        None => defaults.line,
    };
    let mut settings = CountSettings::new(confidence, line)?;
    settings.classes = defaults.classes.clone();
    Ok(settings)
}

pub async fn upload_video(
    State(state): State<Arc<AppState>>,
    mut multipart: Multipart,
) -> Result<Json<UploadResponse>, ApiError> {
    let mut saved: Option<PathBuf> = None;
    let mut confidence: Option<String> = None;
    let mut line: Option<String> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| bad_request(format!("malformed upload: {}", e)))?
    {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "video" => {
                let file_name = field.file_name().unwrap_or_default().to_string();
                if file_name.is_empty() {
                    return Err(bad_request("No file selected"));
                }
                let path = upload_path(&state.args.upload_root, &file_name)
                    .map_err(|e| ApiError(CountError::Other(e)))?;
                let bytes = save_field(field, &path).await?;
                tracing::info!("Saved upload {} ({} bytes) to {:?}", file_name, bytes, path);
                saved = Some(path);
            }
            "confidence" => {
                confidence = Some(field.text().await.map_err(|e| bad_request(e.to_string()))?)
            }
            "line" => line = Some(field.text().await.map_err(|e| bad_request(e.to_string()))?),
            other => tracing::debug!("Ignoring form field {}", other),
        }
    }

    let input_path = saved.ok_or_else(|| bad_request("No video file provided"))?;
    let settings = upload_settings(&state.settings, confidence.as_deref(), line.as_deref())?;

    let request = JobRequest {
        input_path,
        results_root: state.args.results_root.clone(),
        settings,
    };
    let session = state.job_session();
    let model = state.args.pipeline.model.clone();

    let summary = tokio::task::spawn_blocking(move || run_job(&request, session, &model))
        .await
        .map_err(|e| ApiError(CountError::Other(anyhow::anyhow!("job worker failed: {}", e))))??;

    Ok(Json(summary.into()))
}

pub async fn get_count(State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(json!({ "count": state.shared.current_total() }))
}

pub async fn reset_count(State(state): State<Arc<AppState>>) -> Json<Value> {
    state.shared.initialize();
    Json(json!({ "success": true }))
}

pub async fn list_jobs() -> Json<Vec<Value>> {
    Json(
        JOB_REGISTRY
            .list()
            .iter()
            .map(|s| s.to_progress_json())
            .collect(),
    )
}

pub async fn get_job(Path(id): Path<String>) -> Result<Json<Value>, StatusCode> {
    JOB_REGISTRY
        .get(&id)
        .map(|s| Json(s.to_progress_json()))
        .ok_or(StatusCode::NOT_FOUND)
}

pub async fn stop_job(Path(id): Path<String>) -> Result<Json<Value>, StatusCode> {
    if JOB_REGISTRY.stop(&id) {
        tracing::info!("Stop requested for job {}", id);
        Ok(Json(json!({ "success": true })))
    } else {
        Err(StatusCode::NOT_FOUND)
    }
}

pub async fn list_results_handler(State(state): State<Arc<AppState>>) -> Json<Vec<JobSummary>> {
    Json(list_results(&state.args.results_root))
}
