use crate::error::Result;
use crate::pipeline::processor::FrameProcessor;
use crate::pipeline::types::JobState;
use crate::video::writer::encode_jpeg;
use crate::video::VideoReader;
use std::iter::FusedIterator;
use std::sync::Arc;
use std::time::Instant;

/// One annotated live frame, JPEG encoded.
#[derive(Debug, Clone)]
pub struct LiveFrame {
    pub index: usize,
    pub total: usize,
    pub jpeg: Vec<u8>,
}

/// Unbounded sequence of annotated frames from a live source.
///
/// Starting a stream re-initializes the processor's session, so every new
/// consumer counts from zero (and so does anything else sharing that
/// session). The sequence ends when the source stops producing frames, or
/// its registry record is stopped, and cannot be resumed; the source is
/// released and the record finished at that point.
pub struct LiveStream {
    reader: Option<Box<dyn VideoReader>>,
    processor: FrameProcessor,
    state: Option<Arc<JobState>>,
    index: usize,
}

impl LiveStream {
    pub fn start(reader: Box<dyn VideoReader>, processor: FrameProcessor) -> Self {
        let generation = processor.session().initialize();
        tracing::info!(
            "Live stream started (session generation {}, line {:?})",
            generation,
            processor.settings().line
        );
        Self {
            reader: Some(reader),
            processor,
            state: None,
            index: 0,
        }
    }

    /// Reports progress to `state` and ends the stream once it is stopped.
    pub fn with_state(mut self, state: Arc<JobState>) -> Self {
        self.state = Some(state);
        self
    }

    fn close(&mut self, error: Option<String>) {
        if self.reader.take().is_some() {
            tracing::info!("Live stream closed after {} frames", self.index);
            if let Some(state) = &self.state {
                state.finish(error);
            }
        }
    }
}

impl Iterator for LiveStream {
    type Item = Result<LiveFrame>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.state.as_ref().is_some_and(|s| !s.is_active()) {
            tracing::info!("Live stream stop requested");
            self.close(None);
        }
        let reader = self.reader.as_mut()?;

        let started = Instant::now();
        let mut frame = match reader.next_frame() {
            Ok(Some(frame)) => frame,
            Ok(None) => {
                self.close(None);
                return None;
            }
            Err(e) => {
                self.close(Some(e.to_string()));
                return Some(Err(e));
            }
        };

        let encoded = self
            .processor
            .process(&mut frame)
            .and_then(|outcome| encode_jpeg(&frame).map(|jpeg| (outcome, jpeg)));

        match encoded {
            Ok((outcome, jpeg)) => {
                let item = LiveFrame {
                    index: self.index,
                    total: outcome.total,
                    jpeg,
                };
                self.index += 1;
                if let Some(state) = &self.state {
                    let ms = started.elapsed().as_secs_f64() * 1000.0;
                    state.update(self.index, outcome.total, ms);
                }
                Some(Ok(item))
            }
            Err(e) => {
                tracing::error!("Live stream failed at frame {}: {}", self.index, e);
                self.close(Some(e.to_string()));
                Some(Err(e))
            }
        }
    }
}

impl FusedIterator for LiveStream {}

impl Drop for LiveStream {
    fn drop(&mut self) {
        self.close(None);
    }
}
