use crate::cli::ServeArgs;
use crate::pipeline::session::SessionCoordinator;
use crate::pipeline::tracker::{SortTrackerFactory, TrackerFactory};
use crate::pipeline::types::CountSettings;
use crate::web::api::{
    get_count, get_job, list_jobs, list_results_handler, reset_count, stop_job, upload_video,
};
use crate::web::assets::{index_handler, static_handler};
use crate::web::stream::webcam_feed;
use anyhow::Result;
use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};
use std::net::{SocketAddr, TcpListener};
use std::sync::Arc;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

/// Largest accepted upload.
pub const MAX_UPLOAD_BYTES: usize = 500 * 1024 * 1024;

/// Shared by every handler.
pub struct AppState {
    pub args: ServeArgs,
    /// Validated defaults; uploads may override confidence and line.
    pub settings: CountSettings,
    pub factory: Arc<dyn TrackerFactory>,
    /// Session used by the live feed, `/get_count`, `/reset_count` and, unless
    /// sessions are isolated, uploaded videos.
    pub shared: Arc<SessionCoordinator>,
}

impl AppState {
    pub fn new(args: ServeArgs) -> crate::error::Result<Self> {
        let settings = args.pipeline.count_settings()?;
        let factory: Arc<dyn TrackerFactory> = Arc::new(SortTrackerFactory {
            config: args.pipeline.tracker_config(),
        });
        let shared = Arc::new(SessionCoordinator::new(factory.clone()));
        Ok(Self {
            args,
            settings,
            factory,
            shared,
        })
    }

    /// Session a new video job should count into.
    pub fn job_session(&self) -> Arc<SessionCoordinator> {
        if self.args.isolated_sessions {
            Arc::new(SessionCoordinator::new(self.factory.clone()))
        } else {
            self.shared.clone()
        }
    }
}

pub fn router(state: Arc<AppState>) -> Router {
    let results_dir = ServeDir::new(&state.args.results_root);

    Router::new()
        .route("/", get(index_handler))
        .route("/upload_video", post(upload_video))
        .route("/webcam_feed", get(webcam_feed))
        .route("/get_count", get(get_count))
        .route("/reset_count", post(reset_count))
        .route("/api/jobs", get(list_jobs))
        .route("/api/jobs/:id", get(get_job))
        .route("/api/jobs/:id/stop", post(stop_job))
        .route("/api/results", get(list_results_handler))
        .nest_service("/static/results", results_dir)
        .fallback(static_handler)
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub async fn run_server(args: ServeArgs) -> Result<()> {
    std::fs::create_dir_all(&args.results_root)?;
    std::fs::create_dir_all(&args.upload_root)?;

    let host = args.host;
    let mut current_port = args.port;
    let listener = loop {
        let addr = SocketAddr::new(host, current_port);
        match TcpListener::bind(addr) {
            Ok(listener) => {
                // Tokio requires a non-blocking socket
                listener.set_nonblocking(true)?;
                info!("Successfully bound to {}", addr);
                break listener;
            }
            Err(e) => {
                warn!("Failed to bind to {}: {}. Trying next port...", addr, e);
                current_port = current_port
                    .checked_add(1)
                    .ok_or_else(|| anyhow::anyhow!("No available ports found"))?;
            }
        }
    };

    let state = Arc::new(AppState::new(args)?);
    info!(
        "Counting line {:?}, confidence > {}, isolated sessions: {}",
        state.settings.line, state.settings.confidence, state.args.isolated_sessions
    );
    let app = router(state);

    let tokio_listener = tokio::net::TcpListener::from_std(listener)?;
    info!(
        "Vehicle counter started on http://{:?}",
        tokio_listener.local_addr()?
    );

    axum::serve(tokio_listener, app).await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::{Args, Command};
    use clap::Parser;

    fn serve_args(extra: &[&str]) -> ServeArgs {
        let mut argv = vec!["vehicle-counter", "serve"];
        argv.extend_from_slice(extra);
        match Args::try_parse_from(argv).unwrap().command {
            Command::Serve(serve) => serve,
            _ => unreachable!(),
        }
    }

    #[test]
    fn test_shared_sessions_by_default() {
        let state = AppState::new(serve_args(&[])).unwrap();
        state.job_session().register_crossing(1, true);
        assert_eq!(state.shared.current_total(), 1);
    }

    #[test]
    fn test_isolated_sessions() {
        let state = AppState::new(serve_args(&["--isolated-sessions"])).unwrap();
        let job = state.job_session();
        job.register_crossing(1, true);
        assert_eq!(job.current_total(), 1);
        assert_eq!(state.shared.current_total(), 0);
    }

    #[test]
    fn test_invalid_defaults_are_rejected() {
        let err = AppState::new(serve_args(&["--line-tolerance=-1"]))
            .err()
            .unwrap();
        assert_eq!(err.kind(), "invalid_configuration");
    }
}
