use crate::error::Result;
use crate::pipeline::detection::Detector;
use crate::pipeline::filter::filter_detections;
use crate::pipeline::render::{draw_counter, draw_counting_line, draw_track};
use crate::pipeline::session::SessionCoordinator;
use crate::pipeline::types::CountSettings;
use opencv::core::Mat;
use std::sync::Arc;

#[derive(Debug, Clone, Default)]
pub struct FrameOutcome {
    pub total: usize,
    pub newly_counted: Vec<u64>,
    pub tracks: usize,
}

/// Per-frame orchestration: detect, filter, track, count, annotate.
///
/// Holds only the detector handle and settings; all counting state lives in
/// the injected [`SessionCoordinator`].
pub struct FrameProcessor {
    detector: Box<dyn Detector>,
    session: Arc<SessionCoordinator>,
    settings: CountSettings,
}

impl FrameProcessor {
    pub fn new(
        detector: Box<dyn Detector>,
        session: Arc<SessionCoordinator>,
        settings: CountSettings,
    ) -> Self {
        Self {
            detector,
            session,
            settings,
        }
    }

    pub fn session(&self) -> &Arc<SessionCoordinator> {
        &self.session
    }

    pub fn settings(&self) -> &CountSettings {
        &self.settings
    }

    /// Runs one frame through the pipeline and annotates it in place.
    pub fn process(&mut self, frame: &mut Mat) -> Result<FrameOutcome> {
        // Inference runs outside the session lock
        let raw = self.detector.infer(frame)?;
        let filtered = filter_detections(&raw, &self.settings.classes, self.settings.confidence);

        let counts = self
            .session
            .track_and_count(&filtered, &self.settings.line);

        for track in &counts.tracks {
            draw_track(frame, track)?;
        }
        draw_counting_line(frame, &self.settings.line, !counts.newly_counted.is_empty())?;
        draw_counter(frame, counts.total)?;

        Ok(FrameOutcome {
            total: counts.total,
            tracks: counts.tracks.len(),
            newly_counted: counts.newly_counted,
        })
    }
}
