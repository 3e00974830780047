use crate::pipeline::types::{BBox, ScoredBox, TrackedObject};
use serde::Serialize;
use similari::trackers::sort::metric::DEFAULT_MINIMAL_SORT_CONFIDENCE;
use similari::trackers::sort::simple_api::Sort;
use similari::trackers::sort::PositionalMetricType;
use similari::utils::bbox::{BoundingBox, Universal2DBox};

/// Multi-object tracker contract: stateful across calls, one call per frame
/// in source order.
pub trait Tracker: Send {
    fn update(&mut self, detections: &[ScoredBox]) -> Vec<TrackedObject>;
}

/// Builds fresh tracker instances. A new instance is the only way to reset
/// the identity space.
pub trait TrackerFactory: Send + Sync {
    fn create(&self) -> Box<dyn Tracker>;
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct TrackerConfig {
    /// Frames an unmatched track survives before it is retired.
    pub max_age: u32,
    /// Matches after birth before a new track is reported.
    pub min_hits: u32,
    pub iou_threshold: f32,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            max_age: 20,
            min_hits: 3,
            iou_threshold: 0.3,
        }
    }
}

// Online tracking: one shard, only the last box kept per track.
const SHARDS: usize = 1;
const BBOX_HISTORY: usize = 1;
const KALMAN_POSITION_WEIGHT: f32 = 1.0 / 20.0;
const KALMAN_VELOCITY_WEIGHT: f32 = 1.0 / 160.0;

fn to_universal(bbox: &BBox) -> Universal2DBox {
    Universal2DBox::xywh(
        bbox.x1 as f32,
        bbox.y1 as f32,
        bbox.width() as f32,
        bbox.height() as f32,
    )
}

fn from_universal(ub: &Universal2DBox) -> BBox {
    let b = BoundingBox::from(ub);
    let x1 = b.x().round() as i32;
    let y1 = b.y().round() as i32;
    BBox::new(
        x1,
        y1,
        x1 + b.width().round() as i32,
        y1 + b.height().round() as i32,
    )
}

/// SORT (Kalman motion model plus IoU association) backed by Similari.
/// Only tracks matched on the current frame are reported, and a new track
/// is held back until it has `min_hits` matches, except during the first
/// `min_hits` frames of the instance.
pub struct SortTracker {
    sort: Sort,
    min_hits: usize,
    frame_count: usize,
}

impl SortTracker {
    pub fn new(config: TrackerConfig) -> Self {
        let sort = Sort::new(
            SHARDS,
            BBOX_HISTORY,
            config.max_age as usize,
            PositionalMetricType::IoU(config.iou_threshold),
            DEFAULT_MINIMAL_SORT_CONFIDENCE,
            None,
            KALMAN_POSITION_WEIGHT,
            KALMAN_VELOCITY_WEIGHT,
        );
        Self {
            sort,
            min_hits: config.min_hits as usize,
            frame_count: 0,
        }
    }
}

impl Tracker for SortTracker {
    fn update(&mut self, detections: &[ScoredBox]) -> Vec<TrackedObject> {
        self.frame_count += 1;

        // Similari rejects boxes without area
        let observations: Vec<(Universal2DBox, Option<i64>)> = detections
            .iter()
            .filter(|d| d.bbox.width() > 0 && d.bbox.height() > 0)
            .map(|d| (to_universal(&d.bbox), None))
            .collect();
        if observations.len() < detections.len() {
            tracing::debug!(
                "Dropped {} degenerate boxes before tracking",
                detections.len() - observations.len()
            );
        }

        let warming_up = self.frame_count <= self.min_hits;
        self.sort
            .predict(&observations)
            .into_iter()
            .filter(|t| warming_up || t.length > self.min_hits)
            .map(|t| TrackedObject {
                bbox: from_universal(&t.observed_bbox),
                track_id: t.id,
            })
            .collect()
    }
}

pub struct SortTrackerFactory {
    pub config: TrackerConfig,
}

impl TrackerFactory for SortTrackerFactory {
    fn create(&self) -> Box<dyn Tracker> {
        Box::new(SortTracker::new(self.config))
    }
}
