use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// Lock a mutex, recovering the data if a panicking callback poisoned it.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Generation counter that wakes waiters whenever shared state changes.
///
/// Consumers remember the generation they last saw and wait for it to move.
#[derive(Debug, Default)]
pub struct StateSignal {
    generation: Mutex<u64>,
    changed: Condvar,
}

impl StateSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn notify(&self) {
        *lock(&self.generation) += 1;
        self.changed.notify_all();
    }

    pub fn generation(&self) -> u64 {
        *lock(&self.generation)
    }

    /// Block until the generation differs from `seen` or `timeout` elapses.
    ///
    /// Returns the generation observed on wake-up.
    pub fn wait(&self, seen: u64, timeout: Duration) -> u64 {
        let guard = lock(&self.generation);
        let (guard, _) = self
            .changed
            .wait_timeout_while(guard, timeout, |generation| *generation == seen)
            .unwrap_or_else(PoisonError::into_inner);
        *guard
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    #[test]
    fn wait_returns_on_notify() {
        let signal = Arc::new(StateSignal::new());
        let seen = signal.generation();

        let notifier = {
            let signal = Arc::clone(&signal);
            std::thread::spawn(move || {
                std::thread::sleep(Duration::from_millis(20));
                signal.notify();
            })
        };

        let next = signal.wait(seen, Duration::from_secs(5));
        assert_eq!(next, seen + 1);
        notifier.join().unwrap();
    }

    #[test]
    fn wait_times_out_without_change() {
        let signal = StateSignal::new();
        let seen = signal.generation();
        assert_eq!(signal.wait(seen, Duration::from_millis(10)), seen);
    }
}
