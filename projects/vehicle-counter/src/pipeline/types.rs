use crate::error::{CountError, Result};
use serde::{Deserialize, Serialize};
use serde_json;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::RwLock;

pub const DEFAULT_CONFIDENCE: f32 = 0.3;
pub const DEFAULT_LINE_TOLERANCE: i32 = 15;

/// Axis-aligned box in integer pixel coordinates.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct BBox {
    pub x1: i32,
    pub y1: i32,
    pub x2: i32,
    pub y2: i32,
}

impl BBox {
    pub fn new(x1: i32, y1: i32, x2: i32, y2: i32) -> Self {
        Self { x1, y1, x2, y2 }
    }

    pub fn width(&self) -> i32 {
        self.x2 - self.x1
    }

    pub fn height(&self) -> i32 {
        self.y2 - self.y1
    }

    /// Integer center, rounded toward the top-left corner.
    pub fn center(&self) -> (i32, i32) {
        (self.x1 + self.width() / 2, self.y1 + self.height() / 2)
    }
}

/// The vehicle classes the counter knows about.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum VehicleClass {
    Car,
    Truck,
    Bus,
    Motorbike,
}

impl VehicleClass {
    pub const ALL: [VehicleClass; 4] = [
        VehicleClass::Car,
        VehicleClass::Truck,
        VehicleClass::Bus,
        VehicleClass::Motorbike,
    ];

    /// Resolve a detector label. COCO spells the two-wheeler "motorcycle",
    /// older label sets use "motorbike".
    pub fn from_label(label: &str) -> Option<Self> {
        match label.trim().to_ascii_lowercase().as_str() {
            "car" => Some(VehicleClass::Car),
            "truck" => Some(VehicleClass::Truck),
            "bus" => Some(VehicleClass::Bus),
            "motorbike" | "motorcycle" => Some(VehicleClass::Motorbike),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            VehicleClass::Car => "car",
            VehicleClass::Truck => "truck",
            VehicleClass::Bus => "bus",
            VehicleClass::Motorbike => "motorbike",
        }
    }
}

/// One candidate object reported by the detector for a single frame.
#[derive(Debug, Clone, Serialize)]
pub struct Detection {
    pub bbox: BBox,
    /// `None` for classes outside the vehicle set.
    pub class: Option<VehicleClass>,
    pub confidence: f32,
}

/// Tracker input: box plus detector confidence.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoredBox {
    pub bbox: BBox,
    pub confidence: f32,
}

/// Tracker output for one frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TrackedObject {
    pub bbox: BBox,
    pub track_id: u64,
}

/// Virtual counting segment plus the vertical tolerance band around it.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct CountingLine {
    pub x1: i32,
    pub y1: i32,
    pub x2: i32,
    pub y2: i32,
    pub tolerance: i32,
}

impl Default for CountingLine {
    fn default() -> Self {
        Self {
            x1: 370,
            y1: 297,
            x2: 750,
            y2: 297,
            tolerance: DEFAULT_LINE_TOLERANCE,
        }
    }
}

impl CountingLine {
    pub fn new(x1: i32, y1: i32, x2: i32, y2: i32, tolerance: i32) -> Result<Self> {
        if x1 >= x2 {
            return Err(CountError::InvalidConfiguration(format!(
                "counting line must run left to right (x1={} x2={})",
                x1, x2
            )));
        }
        if y1 > y2 {
            return Err(CountError::InvalidConfiguration(format!(
                "counting line y1 must not exceed y2 (y1={} y2={})",
                y1, y2
            )));
        }
        if tolerance < 0 {
            return Err(CountError::InvalidConfiguration(format!(
                "negative line tolerance {}",
                tolerance
            )));
        }
        Ok(Self {
            x1,
            y1,
            x2,
            y2,
            tolerance,
        })
    }

    pub fn with_tolerance(self, tolerance: i32) -> Result<Self> {
        Self::new(self.x1, self.y1, self.x2, self.y2, tolerance)
    }
}

/// Parses `x1,y1,x2,y2` with the default tolerance.
impl FromStr for CountingLine {
    type Err = CountError;

    fn from_str(s: &str) -> Result<Self> {
        let parts: Vec<i32> = s
            .split(',')
            .map(|p| p.trim().parse::<i32>())
            .collect::<std::result::Result<_, _>>()
            .map_err(|e| {
                CountError::InvalidConfiguration(format!("bad counting line '{}': {}", s, e))
            })?;

        match parts.as_slice() {
            [x1, y1, x2, y2] => Self::new(*x1, *y1, *x2, *y2, DEFAULT_LINE_TOLERANCE),
            _ => Err(CountError::InvalidConfiguration(format!(
                "counting line needs 4 values, got '{}'",
                s
            ))),
        }
    }
}

/// Per-job counting parameters.
#[derive(Debug, Clone, Serialize)]
pub struct CountSettings {
    pub confidence: f32,
    pub line: CountingLine,
    pub classes: Vec<VehicleClass>,
}

impl Default for CountSettings {
    fn default() -> Self {
        Self {
            confidence: DEFAULT_CONFIDENCE,
            line: CountingLine::default(),
            classes: VehicleClass::ALL.to_vec(),
        }
    }
}

impl CountSettings {
    pub fn new(confidence: f32, line: CountingLine) -> Result<Self> {
        if !(0.0..=1.0).contains(&confidence) {
            return Err(CountError::InvalidConfiguration(format!(
                "confidence threshold {} outside [0, 1]",
                confidence
            )));
        }
        Ok(Self {
            confidence,
            line,
            ..Self::default()
        })
    }
}

/// Progress record shared between a running job and the HTTP handlers.
#[derive(Debug)]
pub struct JobState {
    pub job_id: String,
    /// Zero while unknown.
    pub total_frames: AtomicUsize,
    pub is_active: AtomicBool,
    pub is_complete: AtomicBool,
    pub error: RwLock<Option<String>>,
    pub frames_processed: AtomicUsize,
    pub count: AtomicUsize,
    pub ms_per_frame: RwLock<f64>,
    pub start_time: std::time::Instant,
}

impl JobState {
    pub fn new(job_id: String) -> Self {
        Self {
            job_id,
            total_frames: AtomicUsize::new(0),
            is_active: AtomicBool::new(true),
            is_complete: AtomicBool::new(false),
            error: RwLock::new(None),
            frames_processed: AtomicUsize::new(0),
            count: AtomicUsize::new(0),
            ms_per_frame: RwLock::new(0.0),
            start_time: std::time::Instant::now(),
        }
    }

    pub fn set_total_frames(&self, total: Option<usize>) {
        self.total_frames
            .store(total.unwrap_or(0), Ordering::Relaxed);
    }

    pub fn is_active(&self) -> bool {
        self.is_active.load(Ordering::Relaxed)
    }

    /// Asks the runner to stop at the next frame boundary.
    pub fn cancel(&self) {
        self.is_active.store(false, Ordering::Relaxed);
    }

    pub fn update(&self, frames_processed: usize, count: usize, ms_per_frame: f64) {
        self.frames_processed
            .store(frames_processed, Ordering::Relaxed);
        self.count.store(count, Ordering::Relaxed);
        if let Ok(mut avg) = self.ms_per_frame.write() {
            // Exponential moving average
            if *avg == 0.0 {
                *avg = ms_per_frame;
            } else {
                *avg = *avg * 0.9 + ms_per_frame * 0.1;
            }
        }
    }

    pub fn finish(&self, error: Option<String>) {
        if let Ok(mut slot) = self.error.write() {
            *slot = error;
        }
        self.is_complete.store(true, Ordering::Relaxed);
        self.is_active.store(false, Ordering::Relaxed);
    }

    pub fn to_progress_json(&self) -> serde_json::Value {
        let ms_per_frame = self.ms_per_frame.read().map(|v| *v).unwrap_or(0.0);
        let error = self.error.read().ok().and_then(|e| e.clone());
        let total_frames = match self.total_frames.load(Ordering::Relaxed) {
            0 => None,
            n => Some(n),
        };

        serde_json::json!({
            "job_id": self.job_id,
            "total_frames": total_frames,
            "frames_processed": self.frames_processed.load(Ordering::Relaxed),
            "count": self.count.load(Ordering::Relaxed),
            "is_active": self.is_active.load(Ordering::Relaxed),
            "is_complete": self.is_complete.load(Ordering::Relaxed),
            "error": error,
            "ms_per_frame": ms_per_frame,
            "fps": if ms_per_frame > 0.0 { 1000.0 / ms_per_frame } else { 0.0 },
            "elapsed_secs": self.start_time.elapsed().as_secs_f64(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bbox_center() {
        let a = BBox::new(0, 0, 10, 10);
        assert_eq!(a.center(), (5, 5));
        assert_eq!(BBox::new(0, 0, 11, 11).center(), (5, 5));
        assert_eq!((a.width(), a.height()), (10, 10));
    }

    #[test]
    fn test_vehicle_class_labels() {
        assert_eq!(VehicleClass::from_label("car"), Some(VehicleClass::Car));
        assert_eq!(
            VehicleClass::from_label("motorcycle"),
            Some(VehicleClass::Motorbike)
        );
        assert_eq!(
            VehicleClass::from_label("Motorbike"),
            Some(VehicleClass::Motorbike)
        );
        assert_eq!(VehicleClass::from_label("person"), None);
        assert_eq!(VehicleClass::from_label("train"), None);
    }

    #[test]
    fn test_counting_line_parse() {
        let line: CountingLine = "10, 20, 30, 20".parse().unwrap();
        assert_eq!(line, CountingLine::new(10, 20, 30, 20, 15).unwrap());

        assert!("10,20,30".parse::<CountingLine>().is_err());
        assert!("a,b,c,d".parse::<CountingLine>().is_err());
        // Degenerate: zero-length in x
        assert!("30,20,30,20".parse::<CountingLine>().is_err());
        assert!(CountingLine::new(0, 0, 10, 0, -1).is_err());
    }

    #[test]
    fn test_count_settings_validation() {
        assert!(CountSettings::new(0.3, CountingLine::default()).is_ok());
        assert!(CountSettings::new(0.0, CountingLine::default()).is_ok());
        assert!(CountSettings::new(1.0, CountingLine::default()).is_ok());

        let err = CountSettings::new(1.5, CountingLine::default()).unwrap_err();
        assert_eq!(err.kind(), "invalid_configuration");
        assert!(CountSettings::new(-0.1, CountingLine::default()).is_err());
        assert!(CountSettings::new(f32::NAN, CountingLine::default()).is_err());
    }

    #[test]
    fn test_job_state_progress() {
        let state = JobState::new("job".to_string());
        state.set_total_frames(Some(10));
        state.update(1, 0, 10.0);
        state.update(2, 1, 20.0);

        let json = state.to_progress_json();
        assert_eq!(json["frames_processed"], 2);
        assert_eq!(json["count"], 1);
        assert_eq!(json["total_frames"], 10);
        assert!((json["ms_per_frame"].as_f64().unwrap() - 11.0).abs() < 1e-9);

        state.finish(Some("boom".to_string()));
        let json = state.to_progress_json();
        assert_eq!(json["is_active"], false);
        assert_eq!(json["is_complete"], true);
        assert_eq!(json["error"], "boom");
    }
}
