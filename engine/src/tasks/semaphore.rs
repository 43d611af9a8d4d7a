//! Monotonic counting semaphore.

use std::sync::{Condvar, Mutex};

use crate::error::{Error, Result};

/// A semaphore whose count only moves forward.
///
/// [`signal`](Semaphore::signal) publishes a new count; waiters block until
/// the count reaches their threshold. Signaling a value below the current
/// count is a caller bug and is rejected with
/// [`SemaphoreNonmonotonicSignal`](Error::SemaphoreNonmonotonicSignal).
/// [`reset`](Semaphore::reset) starts a fresh epoch at zero.
#[derive(Default)]
pub struct Semaphore {
    count: Mutex<u64>,
    reached: Condvar,
}

impl Semaphore {
    /// Create a semaphore with count zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish a new count and wake all waiters whose threshold it reaches.
    pub fn signal(&self, n: u64) -> Result<()> {
        let mut count = self.count.lock().unwrap();
        if n < *count {
            return Err(Error::SemaphoreNonmonotonicSignal);
        }
        *count = n;
        drop(count);
        self.reached.notify_all();
        Ok(())
    }

    /// Block until the count is at least `n`.
    pub fn wait(&self, n: u64) {
        let mut count = self.count.lock().unwrap();
        while *count < n {
            count = self.reached.wait(count).unwrap();
        }
    }

    /// The current count.
    pub fn current(&self) -> u64 {
        *self.count.lock().unwrap()
    }

    /// Rewind the count to zero. Waiters already blocked keep their old
    /// thresholds and will see the next epoch's signals.
    pub fn reset(&self) {
        *self.count.lock().unwrap() = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn wait_returns_once_count_reached() {
        let sem = Arc::new(Semaphore::new());
        let signaler = Arc::clone(&sem);

        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            signaler.signal(3).unwrap();
        });

        sem.wait(3);
        assert_eq!(sem.current(), 3);
        handle.join().unwrap();
    }

    #[test]
    fn wait_with_met_threshold_does_not_block() {
        let sem = Semaphore::new();
        sem.signal(5).unwrap();

        sem.wait(1);
        sem.wait(5);
    }

    #[test]
    fn larger_signal_unblocks_smaller_thresholds() {
        let sem = Arc::new(Semaphore::new());

        let waiters: Vec<_> = [1u64, 2, 3]
            .into_iter()
            .map(|threshold| {
                let sem = Arc::clone(&sem);
                thread::spawn(move || sem.wait(threshold))
            })
            .collect();

        sem.signal(10).unwrap();
        for waiter in waiters {
            waiter.join().unwrap();
        }
    }

    #[test]
    fn non_monotonic_signal_is_rejected() {
        let sem = Semaphore::new();
        sem.signal(5).unwrap();

        assert_eq!(sem.signal(3), Err(Error::SemaphoreNonmonotonicSignal));
        // The count is untouched by the failed signal.
        assert_eq!(sem.current(), 5);
    }

    #[test]
    fn equal_signal_is_allowed() {
        let sem = Semaphore::new();
        sem.signal(4).unwrap();
        assert!(sem.signal(4).is_ok());
    }

    #[test]
    fn reset_starts_a_new_epoch() {
        let sem = Semaphore::new();
        sem.signal(9).unwrap();

        sem.reset();

        assert_eq!(sem.current(), 0);
        assert!(sem.signal(1).is_ok());
    }
}
