//! Time source for the control loop.
//!
//! Every wait in the harness (countdown, settle delay, poll interval) is a blocking
//! `sleep` on a [`Clock`]. `SystemClock` really sleeps; `MockClock` advances a virtual
//! timestamp instantly so tests can run hundreds of simulated cycles without delay.

use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Monotonic time and blocking delays.
pub trait Clock {
    /// Time elapsed since the clock was created.
    fn now(&self) -> Duration;

    /// Block the calling thread for `duration`.
    fn sleep(&self, duration: Duration);
}

/// Wall-clock implementation backed by `Instant` and `std::thread::sleep`.
#[derive(Debug, Clone, Copy)]
pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    /// Start a clock at the current instant.
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now(&self) -> Duration {
        self.origin.elapsed()
    }

    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

#[derive(Debug, Default)]
struct VirtualTime {
    now: Duration,
    sleeps: Vec<Duration>,
}

/// Virtual clock. `sleep` returns immediately and moves time forward.
///
/// Clones share the same timeline.
#[derive(Debug, Clone, Default)]
pub struct MockClock {
    time: Arc<Mutex<VirtualTime>>,
}

impl MockClock {
    /// Create a clock at t = 0.
    pub fn new() -> Self {
        Self::default()
    }

    /// Move time forward without recording a sleep.
    pub fn advance(&self, duration: Duration) {
        self.time.lock().now += duration;
    }

    /// Every sleep requested so far, in order.
    pub fn sleeps(&self) -> Vec<Duration> {
        self.time.lock().sleeps.clone()
    }

    /// Number of sleeps of exactly `duration`.
    pub fn count_sleeps(&self, duration: Duration) -> usize {
        self.time
            .lock()
            .sleeps
            .iter()
            .filter(|d| **d == duration)
            .count()
    }
}

impl Clock for MockClock {
    fn now(&self) -> Duration {
        self.time.lock().now
    }

    fn sleep(&self, duration: Duration) {
        let mut time = self.time.lock();
        time.now += duration;
        time.sleeps.push(duration);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mock_clock_advances_on_sleep() {
        let clock = MockClock::new();
        assert_eq!(clock.now(), Duration::ZERO);

        clock.sleep(Duration::from_millis(250));
        clock.sleep(Duration::from_millis(250));
        clock.advance(Duration::from_secs(1));

        assert_eq!(clock.now(), Duration::from_millis(1500));
        assert_eq!(clock.count_sleeps(Duration::from_millis(250)), 2);
        assert_eq!(clock.sleeps().len(), 2);
    }

    #[test]
    fn clones_share_time() {
        let clock = MockClock::new();
        let other = clock.clone();
        other.sleep(Duration::from_secs(3));
        assert_eq!(clock.now(), Duration::from_secs(3));
    }

    #[test]
    fn system_clock_is_monotonic() {
        let clock = SystemClock::new();
        let a = clock.now();
        clock.sleep(Duration::from_millis(1));
        assert!(clock.now() > a);
    }
}
