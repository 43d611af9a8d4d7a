//! Frame timing instrumentation.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// A restartable stopwatch.
#[derive(Debug, Clone, Copy)]
pub struct Stopwatch {
    started: Instant,
}

impl Stopwatch {
    /// Start timing now.
    pub fn start() -> Self {
        Self {
            started: Instant::now(),
        }
    }

    /// Time since start (or the last restart).
    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Restart and return the lap time.
    pub fn restart(&mut self) -> Duration {
        let lap = self.started.elapsed();
        self.started = Instant::now();
        lap
    }
}

/// Rolling frame-time statistics over a fixed window.
#[derive(Debug)]
pub struct FrameTimer {
    window: VecDeque<Duration>,
    capacity: usize,
    total: Duration,
}

impl FrameTimer {
    /// Track the most recent `capacity` frames.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            window: VecDeque::with_capacity(capacity),
            capacity,
            total: Duration::ZERO,
        }
    }

    /// Record one frame's duration.
    pub fn record(&mut self, frame: Duration) {
        if self.window.len() == self.capacity {
            if let Some(evicted) = self.window.pop_front() {
                self.total -= evicted;
            }
        }
        self.window.push_back(frame);
        self.total += frame;
    }

    /// Frames currently in the window.
    pub fn samples(&self) -> usize {
        self.window.len()
    }

    /// Mean frame time over the window; zero with no samples.
    pub fn average(&self) -> Duration {
        match self.window.len() {
            0 => Duration::ZERO,
            n => self.total / n as u32,
        }
    }

    /// Worst frame time in the window; zero with no samples.
    pub fn worst(&self) -> Duration {
        self.window.iter().max().copied().unwrap_or(Duration::ZERO)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stopwatch_measures_and_restarts() {
        let mut watch = Stopwatch::start();
        std::thread::sleep(Duration::from_millis(5));

        let lap = watch.restart();

        assert!(lap >= Duration::from_millis(5));
        assert!(watch.elapsed() < lap);
    }

    #[test]
    fn empty_timer_reports_zero() {
        let timer = FrameTimer::new(8);
        assert_eq!(timer.samples(), 0);
        assert_eq!(timer.average(), Duration::ZERO);
        assert_eq!(timer.worst(), Duration::ZERO);
    }

    #[test]
    fn average_and_worst_track_the_window() {
        let mut timer = FrameTimer::new(4);
        for ms in [10u64, 20, 30, 40] {
            timer.record(Duration::from_millis(ms));
        }

        assert_eq!(timer.samples(), 4);
        assert_eq!(timer.average(), Duration::from_millis(25));
        assert_eq!(timer.worst(), Duration::from_millis(40));
    }

    #[test]
    fn window_evicts_oldest_frames() {
        let mut timer = FrameTimer::new(2);
        timer.record(Duration::from_millis(100));
        timer.record(Duration::from_millis(10));
        timer.record(Duration::from_millis(20));

        // The 100ms frame fell out of the window.
        assert_eq!(timer.samples(), 2);
        assert_eq!(timer.average(), Duration::from_millis(15));
        assert_eq!(timer.worst(), Duration::from_millis(20));
    }
}
