use std::sync::atomic::{AtomicU64, Ordering};

/// Process-wide completed/total counters for bulk operations.
///
/// Front ends call [`Progress::reset`] before starting an operation; the
/// engine only ever adds to both counters afterwards.
#[derive(Debug, Default)]
pub struct Progress {
    completed: AtomicU64,
    total: AtomicU64,
}

/// A consistent-enough copy of the progress counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProgressSnapshot {
    pub completed: u64,
    pub total: u64,
}

impl ProgressSnapshot {
    /// Completed share in `0.0..=1.0`; an empty operation counts as done.
    pub fn fraction(&self) -> f64 {
        if self.total == 0 {
            1.0
        } else {
            (self.completed as f64 / self.total as f64).min(1.0)
        }
    }
}

impl Progress {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset(&self) {
        self.completed.store(0, Ordering::Release);
        self.total.store(0, Ordering::Release);
    }

    pub fn add_total(&self, units: u64) {
        self.total.fetch_add(units, Ordering::AcqRel);
    }

    pub fn advance(&self, units: u64) {
        self.completed.fetch_add(units, Ordering::AcqRel);
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        ProgressSnapshot {
            completed: self.completed.load(Ordering::Acquire),
            total: self.total.load(Ordering::Acquire),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fraction_tracks_counters() {
        let progress = Progress::new();
        assert_eq!(progress.snapshot().fraction(), 1.0);

        progress.add_total(4);
        progress.advance(1);
        assert_eq!(progress.snapshot().fraction(), 0.25);

        progress.advance(3);
        assert_eq!(
            progress.snapshot(),
            ProgressSnapshot {
                completed: 4,
                total: 4
            }
        );

        progress.reset();
        assert_eq!(progress.snapshot(), ProgressSnapshot::default());
    }
}
