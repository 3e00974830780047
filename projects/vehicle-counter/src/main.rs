mod cli;
mod error;
mod pipeline;
mod run_artifacts;
mod run_context;
mod video;
mod web;

use anyhow::{Context, Result};
use cli::{Args, Command, ProcessArgs};
use indicatif::{ProgressBar, ProgressStyle};
use pipeline::orchestrator::{run_job, JobRequest, JOB_REGISTRY};
use pipeline::session::SessionCoordinator;
use pipeline::tracker::SortTrackerFactory;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use web::server::run_server;

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env if present
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::fmt::init();

    let args = Args::parse_args();

    match args.command {
        Command::Serve(serve) => run_server(serve).await?,
        Command::Process(process) => {
            tokio::task::spawn_blocking(move || process_file(process)).await??
        }
    }

    Ok(())
}

/// Runs one job in the foreground, mirroring its progress on a terminal bar.
fn process_file(args: ProcessArgs) -> Result<()> {
    let settings = args.pipeline.count_settings()?;
    let session = Arc::new(SessionCoordinator::new(Arc::new(SortTrackerFactory {
        config: args.pipeline.tracker_config(),
    })));
    let request = JobRequest {
        input_path: args.input.clone(),
        results_root: args.results_root.clone(),
        settings,
    };
    let model = args.pipeline.model.clone();

    let worker = std::thread::Builder::new()
        .name("video-job".to_string())
        .spawn(move || run_job(&request, session, &model))?;

    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({per_sec:.1.yellow} fps, {eta}) {msg}")?
            .progress_chars("#>-"),
    );

    while !worker.is_finished() {
        if let Some(state) = JOB_REGISTRY.active_job() {
            let total = state.total_frames.load(Ordering::Relaxed);
            if total > 0 {
                pb.set_length(total as u64);
            }
            pb.set_position(state.frames_processed.load(Ordering::Relaxed) as u64);
            pb.set_message(format!("count {}", state.count.load(Ordering::Relaxed)));
        }
        std::thread::sleep(Duration::from_millis(100));
    }

    let summary = worker
        .join()
        .map_err(|_| anyhow::anyhow!("video job thread panicked"))?
        .with_context(|| format!("Failed to process {:?}", args.input))?;
    pb.finish_with_message(format!("count {}", summary.total_count));

    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}
