use super::VideoReader;
use crate::error::{CountError, Result};
use opencv::{
    core::{Mat, Size},
    prelude::*,
    videoio::{
        VideoCapture, CAP_ANY, CAP_PROP_FPS, CAP_PROP_FRAME_COUNT, CAP_PROP_FRAME_HEIGHT,
        CAP_PROP_FRAME_WIDTH, CAP_PROP_HW_ACCELERATION, VIDEO_ACCELERATION_ANY,
    },
};

pub struct OpencvReader {
    capture: VideoCapture,
    source: String,
    fps: f64,
    size: Size,
    total_frames: Option<usize>,
}

impl OpencvReader {
    /// Opens a video file.
    pub fn open_file(path: &str) -> Result<Self> {
        let capture = VideoCapture::from_file(path, CAP_ANY)
            .map_err(|e| CountError::SourceUnavailable(format!("{}: {}", path, e)))?;
        Self::from_capture(capture, path.to_string(), true)
    }

    /// Opens a live capture device by index.
    pub fn open_camera(index: i32) -> Result<Self> {
        let capture = VideoCapture::new(index, CAP_ANY).map_err(|e| {
            CountError::SourceUnavailable(format!("camera {}: {}", index, e))
        })?;
        Self::from_capture(capture, format!("camera {}", index), false)
    }

    fn from_capture(mut capture: VideoCapture, source: String, finite: bool) -> Result<Self> {
        if !capture.is_opened()? {
            return Err(CountError::SourceUnavailable(format!(
                "Failed to open video source: {}",
                source
            )));
        }

        // Try to enable hardware acceleration (VideoToolbox on macOS, VA-API on Linux, etc.)
        match capture.set(CAP_PROP_HW_ACCELERATION, VIDEO_ACCELERATION_ANY as f64) {
            Ok(true) => tracing::debug!("Hardware acceleration enabled for {}", source),
            _ => tracing::debug!("Hardware acceleration not available for {}", source),
        }

        let fps = capture.get(CAP_PROP_FPS)?;
        let width = capture.get(CAP_PROP_FRAME_WIDTH)? as i32;
        let height = capture.get(CAP_PROP_FRAME_HEIGHT)? as i32;
        let raw_count = capture.get(CAP_PROP_FRAME_COUNT)?;
        let total_frames = (finite && raw_count > 0.0).then_some(raw_count as usize);

        tracing::info!(
            "OpencvReader: opened {}, {}x{}, fps={:.2}, frames={:?}",
            source,
            width,
            height,
            fps,
            total_frames
        );

        Ok(Self {
            capture,
            source,
            fps,
            size: Size::new(width, height),
            total_frames,
        })
    }
}

impl VideoReader for OpencvReader {
    fn frame_size(&self) -> Size {
        self.size
    }

    fn source_fps(&self) -> f64 {
        self.fps
    }

    fn frame_count(&self) -> Option<usize> {
        self.total_frames
    }

    fn next_frame(&mut self) -> Result<Option<Mat>> {
        let mut frame = Mat::default();
        let success = self.capture.read(&mut frame)?;
        if !success || frame.empty() {
            tracing::debug!("OpencvReader: {} exhausted", self.source);
            return Ok(None);
        }
        Ok(Some(frame))
    }
}

impl Drop for OpencvReader {
    fn drop(&mut self) {
        if let Err(e) = self.capture.release() {
            tracing::warn!("Failed to release {}: {}", self.source, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_is_source_unavailable() {
        let err = OpencvReader::open_file("/nonexistent/definitely_missing.mp4")
            .err()
            .unwrap();
        assert_eq!(err.kind(), "source_unavailable");
    }
}
