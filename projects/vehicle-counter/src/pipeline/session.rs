// Session coordinator: sole owner of the tracker / counter pair.
//
// Every read-modify-write on the counter and every tracker replacement goes
// through one mutex, so concurrent jobs sharing a coordinator never lose or
// double a count. Replacing the tracker always clears the counter, because
// track identities are only unique within one tracker instance.

use crate::pipeline::counter::CounterState;
use crate::pipeline::geometry::bbox_in_crossing_zone;
use crate::pipeline::tracker::{Tracker, TrackerFactory};
use crate::pipeline::types::{CountingLine, ScoredBox, TrackedObject};
use std::sync::{Arc, Mutex, MutexGuard};

/// A tracker instance and the identities it has had credited.
pub struct Session {
    pub tracker: Box<dyn Tracker>,
    pub counter: CounterState,
    pub generation: u64,
}

/// Result of feeding one frame's detections through the session.
#[derive(Debug, Clone, Default)]
pub struct FrameCounts {
    pub tracks: Vec<TrackedObject>,
    pub newly_counted: Vec<u64>,
    pub total: usize,
}

pub struct SessionCoordinator {
    factory: Arc<dyn TrackerFactory>,
    session: Mutex<Session>,
}

impl SessionCoordinator {
    pub fn new(factory: Arc<dyn TrackerFactory>) -> Self {
        let session = Session {
            tracker: factory.create(),
            counter: CounterState::new(),
            generation: 0,
        };
        Self {
            factory,
            session: Mutex::new(session),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Session> {
        // Poisoned only if a job panicked mid-frame; the counted set is intact.
        self.session.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Replaces the tracker with a fresh instance and clears the counter.
    /// Returns the new session generation.
    pub fn initialize(&self) -> u64 {
        let mut session = self.lock();
        session.tracker = self.factory.create();
        session.counter.reset();
        session.generation += 1;
        tracing::info!("Session initialized (generation {})", session.generation);
        session.generation
    }

    pub fn current_total(&self) -> usize {
        self.lock().counter.total()
    }

    #[cfg(test)]
    pub fn register_crossing(
        &self,
        track_id: u64,
        inside_zone: bool,
    ) -> crate::pipeline::counter::Crossing {
        self.lock().counter.register_if_crossing(track_id, inside_zone)
    }

    /// Tracks one frame and credits every track whose center is in the
    /// crossing zone, as a single critical section.
    pub fn track_and_count(&self, detections: &[ScoredBox], line: &CountingLine) -> FrameCounts {
        let mut session = self.lock();
        let tracks = session.tracker.update(detections);

        let mut newly_counted = Vec::new();
        for track in &tracks {
            let inside = bbox_in_crossing_zone(&track.bbox, line);
            let crossing = session.counter.register_if_crossing(track.track_id, inside);
            if crossing.counted {
                tracing::info!(
                    "Counted track {} (total {})",
                    track.track_id,
                    crossing.total
                );
                newly_counted.push(track.track_id);
            }
        }

        FrameCounts {
            tracks,
            newly_counted,
            total: session.counter.total(),
        }
    }
}
