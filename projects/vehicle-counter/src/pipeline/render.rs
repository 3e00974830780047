use crate::error::Result;
use crate::pipeline::types::{CountingLine, TrackedObject};
use opencv::core::{Mat, Point, Scalar};
use opencv::imgproc::{self, FILLED, FONT_HERSHEY_SIMPLEX, LINE_8};

fn red() -> Scalar {
    Scalar::new(0.0, 0.0, 255.0, 0.0)
}

fn green() -> Scalar {
    Scalar::new(0.0, 255.0, 0.0, 0.0)
}

fn magenta() -> Scalar {
    Scalar::new(255.0, 0.0, 255.0, 0.0)
}

fn white() -> Scalar {
    Scalar::new(255.0, 255.0, 255.0, 0.0)
}

fn black() -> Scalar {
    Scalar::new(0.0, 0.0, 0.0, 0.0)
}

/// Red line normally, thicker green when a vehicle was counted this frame.
pub fn draw_counting_line(img: &mut Mat, line: &CountingLine, flash: bool) -> Result<()> {
    let (color, thickness) = if flash { (green(), 5) } else { (red(), 3) };
    imgproc::line(
        img,
        Point::new(line.x1, line.y1),
        Point::new(line.x2, line.y2),
        color,
        thickness,
        LINE_8,
        0,
    )?;
    Ok(())
}

/// Box with corner accents, identity label and center marker.
pub fn draw_track(img: &mut Mat, track: &TrackedObject) -> Result<()> {
    let b = track.bbox;
    let top_left = Point::new(b.x1, b.y1);

    imgproc::rectangle_points(img, top_left, Point::new(b.x2, b.y2), magenta(), 2, LINE_8, 0)?;

    let corner = b.width().min(b.height()) / 5;
    imgproc::line(img, top_left, Point::new(b.x1 + corner, b.y1), magenta(), 3, LINE_8, 0)?;
    imgproc::line(img, top_left, Point::new(b.x1, b.y1 + corner), magenta(), 3, LINE_8, 0)?;

    imgproc::put_text(
        img,
        &format!("ID: {}", track.track_id),
        Point::new(b.x1, (b.y1 - 10).max(35)),
        FONT_HERSHEY_SIMPLEX,
        0.6,
        white(),
        2,
        LINE_8,
        false,
    )?;

    let (cx, cy) = b.center();
    imgproc::circle(img, Point::new(cx, cy), 5, magenta(), FILLED, LINE_8, 0)?;
    Ok(())
}

/// Counter readout panel in the top-left corner.
pub fn draw_counter(img: &mut Mat, total: usize) -> Result<()> {
    let tl = Point::new(10, 10);
    let br = Point::new(250, 90);
    imgproc::rectangle_points(img, tl, br, black(), FILLED, LINE_8, 0)?;
    imgproc::rectangle_points(img, tl, br, white(), 2, LINE_8, 0)?;
    imgproc::put_text(
        img,
        "VEHICLE COUNT",
        Point::new(20, 35),
        FONT_HERSHEY_SIMPLEX,
        0.6,
        white(),
        2,
        LINE_8,
        false,
    )?;
    imgproc::put_text(
        img,
        &total.to_string(),
        Point::new(85, 75),
        FONT_HERSHEY_SIMPLEX,
        1.5,
        green(),
        3,
        LINE_8,
        false,
    )?;
    Ok(())
}
