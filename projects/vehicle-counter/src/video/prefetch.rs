// Prefetching reader: decodes frames on a dedicated thread and hands them
// over through a bounded channel, strictly in source order.
//
// Dropping the consumer closes the channel; the decode thread notices on its
// next send and drops its reader, which releases the file or device.

use super::VideoReader;
use crate::error::{CountError, Result};
use crossbeam::channel::{self, Receiver};
use opencv::core::{Mat, Size};
use std::thread;

struct SourceInfo {
    size: Size,
    fps: f64,
    frame_count: Option<usize>,
}

pub struct PrefetchReader {
    rx: Receiver<Result<Mat>>,
    info: SourceInfo,
}

impl PrefetchReader {
    /// Opens the source on a new thread via `open` and starts decoding up to
    /// `depth` frames ahead.
    pub fn spawn<F>(name: &str, depth: usize, open: F) -> Result<Self>
    where
        F: FnOnce() -> Result<Box<dyn VideoReader>> + Send + 'static,
    {
        let (info_tx, info_rx) = channel::bounded::<Result<SourceInfo>>(1);
        let (tx, rx) = channel::bounded::<Result<Mat>>(depth.max(1));
        let name = name.to_string();

        thread::Builder::new()
            .name(format!("reader-{}", name))
            .spawn(move || {
                // Each reader must be created inside the thread that uses it
                let mut reader = match open() {
                    Ok(reader) => reader,
                    Err(e) => {
                        let _ = info_tx.send(Err(e));
                        return;
                    }
                };
                let info = SourceInfo {
                    size: reader.frame_size(),
                    fps: reader.source_fps(),
                    frame_count: reader.frame_count(),
                };
                if info_tx.send(Ok(info)).is_err() {
                    return;
                }

                let mut frames = 0usize;
                loop {
                    match reader.next_frame() {
                        Ok(Some(mat)) => {
                            if tx.send(Ok(mat)).is_err() {
                                tracing::info!("Reader {}: consumer closed after {} frames", name, frames);
                                break;
                            }
                            frames += 1;
                        }
                        Ok(None) => {
                            tracing::debug!("Reader {}: source exhausted after {} frames", name, frames);
                            break;
                        }
                        Err(e) => {
                            let _ = tx.send(Err(e));
                            break;
                        }
                    }
                }
            })
            .map_err(CountError::Io)?;

        let info = info_rx.recv().map_err(|_| {
            CountError::SourceUnavailable("reader thread exited before opening source".into())
        })??;

        Ok(Self { rx, info })
    }
}

impl VideoReader for PrefetchReader {
    fn frame_size(&self) -> Size {
        self.info.size
    }

    fn source_fps(&self) -> f64 {
        self.info.fps
    }

    fn frame_count(&self) -> Option<usize> {
        self.info.frame_count
    }

    fn next_frame(&mut self) -> Result<Option<Mat>> {
        match self.rx.recv() {
            Ok(Ok(mat)) => Ok(Some(mat)),
            Ok(Err(e)) => Err(e),
            // Decode thread finished
            Err(_) => Ok(None),
        }
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;
    use std::sync::atomic::Ordering;
    use std::time::{Duration, Instant};

    #[test]
    fn test_frames_arrive_in_order() {
        let mut reader =
            PrefetchReader::spawn("test", 2, || Ok(Box::new(SyntheticReader::finite(5)) as _))
                .unwrap();
        assert_eq!(reader.frame_count(), Some(5));
        assert_eq!(reader.frame_size(), Size::new(800, 480));

        let mut seen = Vec::new();
        while let Some(frame) = reader.next_frame().unwrap() {
            seen.push(first_byte(&frame));
        }
        assert_eq!(seen, vec![0, 1, 2, 3, 4]);
        assert!(reader.next_frame().unwrap().is_none());
    }

    #[test]
    fn test_open_failure_is_reported() {
        let err = PrefetchReader::spawn("missing", 2, || {
            Err(CountError::SourceUnavailable("no such file".into()))
        })
        .err()
        .unwrap();
        assert_eq!(err.kind(), "source_unavailable");
    }

    #[test]
    fn test_dropping_consumer_releases_source() {
        let source = SyntheticReader::unbounded();
        let released = source.released.clone();
        let mut reader = PrefetchReader::spawn("live", 1, move || Ok(Box::new(source) as _)).unwrap();
        assert!(reader.next_frame().unwrap().is_some());
        drop(reader);

        let deadline = Instant::now() + Duration::from_secs(5);
        while !released.load(Ordering::SeqCst) && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(10));
        }
        assert!(released.load(Ordering::SeqCst));
    }
}
