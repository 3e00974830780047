use super::{FourCc, SinkOpener, VideoSink};
use crate::error::{CountError, Result};
use opencv::{
    core::{Mat, Size, Vector},
    imgcodecs,
    prelude::*,
    videoio::VideoWriter,
};
use std::path::Path;

pub struct OpencvSink {
    writer: VideoWriter,
}

impl VideoSink for OpencvSink {
    fn write(&mut self, frame: &Mat) -> Result<()> {
        self.writer.write(frame)?;
        Ok(())
    }

    fn finalize(mut self: Box<Self>) -> Result<()> {
        self.writer.release()?;
        Ok(())
    }
}

pub struct OpencvSinkOpener;

impl SinkOpener for OpencvSinkOpener {
    fn open(
        &self,
        path: &Path,
        codec: FourCc,
        fps: f64,
        size: Size,
    ) -> Result<Option<Box<dyn VideoSink>>> {
        let path_str = path
            .to_str()
            .ok_or_else(|| CountError::InvalidConfiguration(format!("non-UTF8 path {:?}", path)))?;
        let [c1, c2, c3, c4] = codec.0;
        let fourcc = VideoWriter::fourcc(c1, c2, c3, c4)?;

        let writer = match VideoWriter::new(path_str, fourcc, fps, size, true) {
            Ok(writer) => writer,
            Err(e) => {
                tracing::debug!("VideoWriter rejected codec {}: {}", codec, e);
                return Ok(None);
            }
        };
        if !writer.is_opened()? {
            return Ok(None);
        }
        Ok(Some(Box::new(OpencvSink { writer })))
    }
}

/// Tries `candidates` in order, then `fallback`. Returns the first sink that
/// opens together with its codec.
pub fn negotiate_encoder(
    opener: &dyn SinkOpener,
    path: &Path,
    fps: f64,
    size: Size,
    candidates: &[FourCc],
    fallback: FourCc,
) -> Result<(FourCc, Box<dyn VideoSink>)> {
    let mut tried = Vec::new();
    for codec in candidates.iter().copied().chain(std::iter::once(fallback)) {
        tried.push(codec.to_string());
        if let Some(sink) = opener.open(path, codec, fps, size)? {
            tracing::info!("Using codec: {}", codec);
            return Ok((codec, sink));
        }
        tracing::warn!("Codec {} unavailable for {:?}", codec, path);
    }
    Err(CountError::EncoderUnavailable {
        path: path.to_path_buf(),
        tried,
    })
}

/// Encodes a frame as a standalone JPEG image.
pub fn encode_jpeg(frame: &Mat) -> Result<Vec<u8>> {
    let mut buf = Vector::<u8>::new();
    if !imgcodecs::imencode(".jpg", frame, &mut buf, &Vector::new())? {
        return Err(CountError::Other(anyhow::anyhow!("JPEG encoding failed")));
    }
    Ok(buf.to_vec())
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use std::cell::RefCell;
    use std::fs::File;
    use std::io::Write;

    /// Opens only the listed codecs and records every attempt.
    pub struct RecordingOpener {
        pub accept: Vec<FourCc>,
        pub attempts: RefCell<Vec<FourCc>>,
        /// When false, sinks create the file but never write to it.
        pub write_bytes: bool,
        /// When true, sinks fail to finalize after writing.
        pub fail_finalize: bool,
    }

    impl RecordingOpener {
        pub fn accepting(accept: Vec<FourCc>) -> Self {
            Self {
                accept,
                attempts: RefCell::new(Vec::new()),
                write_bytes: true,
                fail_finalize: false,
            }
        }
    }

    pub struct FileSink {
        file: File,
        write_bytes: bool,
        fail_finalize: bool,
    }

    impl VideoSink for FileSink {
        fn write(&mut self, frame: &Mat) -> Result<()> {
            if self.write_bytes {
                writeln!(self.file, "frame {}x{}", frame.cols(), frame.rows())?;
            }
            Ok(())
        }

        fn finalize(mut self: Box<Self>) -> Result<()> {
            self.file.flush()?;
            if self.fail_finalize {
                return Err(std::io::Error::other("container trailer not written").into());
            }
            Ok(())
        }
    }

    impl SinkOpener for RecordingOpener {
        fn open(
            &self,
            path: &Path,
            codec: FourCc,
            _fps: f64,
            _size: Size,
        ) -> Result<Option<Box<dyn VideoSink>>> {
            self.attempts.borrow_mut().push(codec);
            if !self.accept.contains(&codec) {
                return Ok(None);
            }
            Ok(Some(Box::new(FileSink {
                file: File::create(path)?,
                write_bytes: self.write_bytes,
                fail_finalize: self.fail_finalize,
            })))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::RecordingOpener;
    use super::*;
    use opencv::core::{Scalar, CV_8UC3};

    fn temp_path(name: &str) -> std::path::PathBuf {
        std::env::temp_dir().join(format!("vc_writer_{}_{}", std::process::id(), name))
    }

    #[test]
    fn test_negotiation_tries_candidates_in_order() {
        let a = FourCc::new(['A', 'A', 'A', 'A']);
        let b = FourCc::new(['B', 'B', 'B', 'B']);
        let c = FourCc::new(['C', 'C', 'C', 'C']);
        let opener = RecordingOpener::accepting(vec![c]);
        let path = temp_path("order.mp4");

        let (codec, _sink) =
            negotiate_encoder(&opener, &path, 20.0, Size::new(64, 48), &[a, b, c], FALLBACK_CODEC)
                .unwrap();
        assert_eq!(codec, c);
        assert_eq!(*opener.attempts.borrow(), vec![a, b, c]);
        let _ = std::fs::remove_file(path);
    }

    #[test]
    fn test_negotiation_uses_fallback_last() {
        let opener = RecordingOpener::accepting(vec![FALLBACK_CODEC]);
        let path = temp_path("fallback.mp4");

        let (codec, _sink) = negotiate_encoder(
            &opener,
            &path,
            20.0,
            Size::new(64, 48),
            &CODEC_PREFERENCE,
            FALLBACK_CODEC,
        )
        .unwrap();
        assert_eq!(codec, FALLBACK_CODEC);
        assert_eq!(opener.attempts.borrow().len(), CODEC_PREFERENCE.len() + 1);
        let _ = std::fs::remove_file(path);
    }

    #[test]
    fn test_negotiation_exhausted() {
        let opener = RecordingOpener::accepting(vec![]);
        let err = match negotiate_encoder(
            &opener,
            &temp_path("none.mp4"),
            20.0,
            Size::new(64, 48),
            &CODEC_PREFERENCE,
            FALLBACK_CODEC,
        ) {
            Err(e) => e,
            Ok(_) => panic!("expected negotiation to fail"),
        };
        assert_eq!(err.kind(), "encoder_unavailable");
        assert!(err.to_string().contains("mp4v"));
    }

    #[test]
    fn test_encode_jpeg_produces_jpeg_magic() {
        let frame =
            Mat::new_rows_cols_with_default(32, 32, CV_8UC3, Scalar::all(128.0)).unwrap();
        let bytes = encode_jpeg(&frame).unwrap();
        assert_eq!(&bytes[..2], &[0xFF, 0xD8]);
    }
}
