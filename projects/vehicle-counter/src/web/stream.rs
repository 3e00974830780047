use crate::error::{CountError, Result};
use crate::pipeline::detection::ObjectDetector;
use crate::pipeline::live::LiveStream;
use crate::pipeline::orchestrator::JOB_REGISTRY;
use crate::pipeline::processor::FrameProcessor;
use crate::video::opencv_reader::OpencvReader;
use crate::video::prefetch::PrefetchReader;
use crate::video::VideoReader;
use crate::web::api::ApiError;
use crate::web::server::AppState;
use axum::{
    body::{Body, Bytes},
    extract::State,
    http::header,
    response::{IntoResponse, Response},
};
use std::convert::Infallible;
use std::sync::Arc;
use tokio::sync::mpsc;

const BOUNDARY: &str = "frame";

/// Frames buffered between the live runner and the HTTP body.
const FRAME_BUFFER: usize = 2;

fn mjpeg_part(jpeg: &[u8]) -> Bytes {
    let header = format!("--{}\r\nContent-Type: image/jpeg\r\n\r\n", BOUNDARY);
    let mut part = Vec::with_capacity(header.len() + jpeg.len() + 2);
    part.extend_from_slice(header.as_bytes());
    part.extend_from_slice(jpeg);
    part.extend_from_slice(b"\r\n");
    Bytes::from(part)
}

/// Drives a live stream until it ends or the consumer goes away. Returns the
/// number of frames delivered.
fn pump_frames(mut stream: LiveStream, tx: mpsc::Sender<Vec<u8>>) -> usize {
    let mut delivered = 0;
    for item in stream.by_ref() {
        match item {
            Ok(frame) => {
                if tx.blocking_send(frame.jpeg).is_err() {
                    tracing::info!("Live consumer disconnected after {} frames", delivered);
                    break;
                }
                delivered += 1;
            }
            Err(e) => {
                tracing::error!("Live stream stopped: {}", e);
                break;
            }
        }
    }
    delivered
}

/// MJPEG feed of annotated camera frames over the shared session.
///
/// The stream is admitted like a video job, so it is refused with 409 while
/// an upload or another feed is running. Closing the connection, or stopping
/// its `live_*` record, releases the camera.
pub async fn webcam_feed(State(state): State<Arc<AppState>>) -> Response {
    let admitted = match JOB_REGISTRY.admit_live() {
        Ok(admitted) => admitted,
        Err(e) => return ApiError(e).into_response(),
    };
    let camera = state.args.camera;
    let model = state.args.pipeline.model.clone();
    let session = state.shared.clone();
    let settings = state.settings.clone();

    // The stream owns the record from here on and finishes it when dropped,
    // even if this request is abandoned before the feed starts.
    let record = admitted.clone();
    let opened = tokio::task::spawn_blocking(move || -> Result<LiveStream> {
        let parts = (|| -> Result<_> {
            let reader = PrefetchReader::spawn("camera", FRAME_BUFFER, move || {
                Ok(Box::new(OpencvReader::open_camera(camera)?) as Box<dyn VideoReader>)
            })?;
            Ok((reader, ObjectDetector::new(&model)?))
        })();
        match parts {
            Ok((reader, detector)) => {
                let processor = FrameProcessor::new(Box::new(detector), session, settings);
                Ok(LiveStream::start(Box::new(reader), processor).with_state(record))
            }
            Err(e) => {
                record.finish(Some(e.to_string()));
                Err(e)
            }
        }
    })
    .await
    .map_err(|e| CountError::Other(anyhow::anyhow!("camera worker failed: {}", e)))
    .and_then(|r| r);

    let stream = match opened {
        Ok(stream) => stream,
        Err(e) => {
            admitted.finish(Some(e.to_string()));
            return ApiError(e).into_response();
        }
    };

    let (tx, mut rx) = mpsc::channel::<Vec<u8>>(FRAME_BUFFER);
    let spawned = std::thread::Builder::new()
        .name("live-stream".to_string())
        .spawn(move || pump_frames(stream, tx));
    if let Err(e) = spawned {
        return ApiError(CountError::Io(e)).into_response();
    }

    let body = async_stream::stream! {
        while let Some(jpeg) = rx.recv().await {
            yield Ok::<_, Infallible>(mjpeg_part(&jpeg));
        }
    };

    (
        [(
            header::CONTENT_TYPE,
            format!("multipart/x-mixed-replace; boundary={}", BOUNDARY),
        )],
        Body::from_stream(body),
    )
        .into_response()
}
