pub mod opencv_reader;
pub mod prefetch;
pub mod writer;

use crate::error::Result;
use opencv::core::{Mat, Size};
use std::fmt;
use std::path::Path;

/// Sequential frame source: a finite file or an unbounded live device.
pub trait VideoReader: Send {
    fn frame_size(&self) -> Size;
    fn source_fps(&self) -> f64;
    /// Known only for finite sources.
    fn frame_count(&self) -> Option<usize>;
    /// `Ok(None)` once the source is exhausted or closed.
    fn next_frame(&mut self) -> Result<Option<Mat>>;
}

/// Four-character codec identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FourCc(pub [char; 4]);

impl FourCc {
    pub const fn new(code: [char; 4]) -> Self {
        Self(code)
    }
}

impl fmt::Display for FourCc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.iter().try_for_each(|c| write!(f, "{}", c))
    }
}

/// Browser-playable codecs first.
pub const CODEC_PREFERENCE: [FourCc; 3] = [
    FourCc::new(['a', 'v', 'c', '1']),
    FourCc::new(['H', '2', '6', '4']),
    FourCc::new(['X', '2', '6', '4']),
];

pub const FALLBACK_CODEC: FourCc = FourCc::new(['m', 'p', '4', 'v']);

/// Sequential frame writer for one output file.
pub trait VideoSink {
    fn write(&mut self, frame: &Mat) -> Result<()>;
    /// Flushes and closes the container.
    fn finalize(self: Box<Self>) -> Result<()>;
}

pub trait SinkOpener {
    /// `Ok(None)` when the codec cannot be opened, so callers can fall back.
    fn open(
        &self,
        path: &Path,
        codec: FourCc,
        fps: f64,
        size: Size,
    ) -> Result<Option<Box<dyn VideoSink>>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fourcc_display() {
        assert_eq!(CODEC_PREFERENCE[0].to_string(), "avc1");
        assert_eq!(FALLBACK_CODEC.to_string(), "mp4v");
    }
}
