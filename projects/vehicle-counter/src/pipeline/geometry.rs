use crate::pipeline::types::{BBox, CountingLine};

/// True when `(cx, cy)` lies strictly inside the crossing zone of `line`:
/// between the endpoints horizontally, and within `tolerance` pixels of the
/// line vertically.
pub fn in_crossing_zone(cx: i32, cy: i32, line: &CountingLine) -> bool {
    line.x1 < cx
        && cx < line.x2
        && line.y1.saturating_sub(line.tolerance) < cy
        && cy < line.y2.saturating_add(line.tolerance)
}

pub fn bbox_in_crossing_zone(bbox: &BBox, line: &CountingLine) -> bool {
    let (cx, cy) = bbox.center();
    in_crossing_zone(cx, cy, line)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn line() -> CountingLine {
        CountingLine::new(370, 297, 750, 297, 15).unwrap()
    }

    #[test]
    fn test_x_bounds_are_strict() {
        let l = line();
        assert!(!in_crossing_zone(370, 297, &l));
        assert!(!in_crossing_zone(750, 297, &l));
        assert!(in_crossing_zone(371, 297, &l));
        assert!(in_crossing_zone(749, 297, &l));
    }

    #[test]
    fn test_y_band_is_strict() {
        let l = line();
        assert!(in_crossing_zone(500, 297, &l));
        assert!(!in_crossing_zone(500, 297 - 15, &l));
        assert!(!in_crossing_zone(500, 297 + 15, &l));
        assert!(in_crossing_zone(500, 297 - 14, &l));
        assert!(in_crossing_zone(500, 297 + 14, &l));
    }

    #[test]
    fn test_extreme_lines_do_not_overflow() {
        let low = CountingLine::new(0, i32::MIN + 1, 100, i32::MIN + 1, 15).unwrap();
        assert!(in_crossing_zone(50, i32::MIN + 10, &low));
        assert!(!in_crossing_zone(50, i32::MIN + 16, &low));

        let high = CountingLine::new(0, i32::MAX - 1, 100, i32::MAX - 1, i32::MAX).unwrap();
        assert!(in_crossing_zone(50, i32::MAX - 1, &high));
        assert!(in_crossing_zone(50, 0, &high));
        assert!(!in_crossing_zone(50, i32::MAX, &high));
    }

    #[test]
    fn test_bbox_uses_center() {
        let l = line();
        assert!(bbox_in_crossing_zone(&BBox::new(450, 270, 550, 320), &l));
        assert!(!bbox_in_crossing_zone(&BBox::new(450, 0, 550, 100), &l));
    }
}
