use std::collections::HashSet;

/// Outcome of one crossing registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Crossing {
    pub counted: bool,
    pub total: usize,
}

/// Track identities already credited, for the lifetime of one session.
#[derive(Debug, Default)]
pub struct CounterState {
    counted: HashSet<u64>,
}

impl CounterState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Credits `track_id` once, the first time it is seen inside the zone.
    pub fn register_if_crossing(&mut self, track_id: u64, inside_zone: bool) -> Crossing {
        let counted = inside_zone && self.counted.insert(track_id);
        Crossing {
            counted,
            total: self.total(),
        }
    }

    pub fn reset(&mut self) {
        self.counted.clear();
    }

    pub fn total(&self) -> usize {
        self.counted.len()
    }

    #[cfg(test)]
    pub fn is_counted(&self, track_id: u64) -> bool {
        self.counted.contains(&track_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counts_each_identity_once() {
        let mut counter = CounterState::new();
        let first = counter.register_if_crossing(7, true);
        assert_eq!(first, Crossing { counted: true, total: 1 });

        for _ in 0..10 {
            let again = counter.register_if_crossing(7, true);
            assert!(!again.counted);
            assert_eq!(again.total, 1);
        }
        assert_eq!(counter.total(), 1);
    }

    #[test]
    fn test_outside_zone_is_not_counted() {
        let mut counter = CounterState::new();
        let c = counter.register_if_crossing(3, false);
        assert_eq!(c, Crossing { counted: false, total: 0 });
        assert!(!counter.is_counted(3));

        // Still eligible later once it enters the zone
        assert!(counter.register_if_crossing(3, true).counted);
    }

    #[test]
    fn test_reset_clears_identities() {
        let mut counter = CounterState::new();
        counter.register_if_crossing(1, true);
        counter.register_if_crossing(2, true);
        assert_eq!(counter.total(), 2);

        counter.reset();
        assert_eq!(counter.total(), 0);
        assert!(!counter.is_counted(1));
        assert!(counter.register_if_crossing(1, true).counted);
    }
}
