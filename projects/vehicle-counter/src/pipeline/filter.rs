use crate::pipeline::types::{Detection, ScoredBox, VehicleClass};

/// Keeps detections of the allowed vehicle classes whose confidence strictly
/// exceeds `threshold`, in detector order, as tracker input.
pub fn filter_detections(
    detections: &[Detection],
    classes: &[VehicleClass],
    threshold: f32,
) -> Vec<ScoredBox> {
    detections
        .iter()
        .filter(|d| d.class.map(|c| classes.contains(&c)).unwrap_or(false))
        .filter(|d| d.confidence > threshold)
        .map(|d| ScoredBox {
            bbox: d.bbox,
            confidence: d.confidence,
        })
        .collect()
}
