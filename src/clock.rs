//! Time sources and software timers
//!
//! Timers here are plain deadline holders owned by whoever drives them (the
//! UI loop polls them). Stopping a timer is all the cancellation there is:
//! every timeout handler is a no-op when the state it guards has moved on.

use parking_lot::Mutex;
use std::time::{Duration, Instant};

/// Monotonic time, injectable so tests can drive timers deterministically
pub trait TimeSource: Send + Sync {
    fn now(&self) -> Instant;

    /// Milliseconds elapsed since the source was created
    fn msecs_since_reference(&self) -> i64;
}

/// Wall-clock backed time source
#[derive(Debug)]
pub struct RealTimeSource {
    reference: Instant,
}

impl RealTimeSource {
    pub fn new() -> Self {
        Self { reference: Instant::now() }
    }
}

impl Default for RealTimeSource {
    fn default() -> Self {
        Self::new()
    }
}

impl TimeSource for RealTimeSource {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn msecs_since_reference(&self) -> i64 {
        self.reference.elapsed().as_millis() as i64
    }
}

/// Time source that only moves when told to
#[derive(Debug)]
pub struct ManualClock {
    reference: Instant,
    offset: Mutex<Duration>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            reference: Instant::now(),
            offset: Mutex::new(Duration::ZERO),
        }
    }

    pub fn advance(&self, by: Duration) {
        *self.offset.lock() += by;
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl TimeSource for ManualClock {
    fn now(&self) -> Instant {
        self.reference + *self.offset.lock()
    }

    fn msecs_since_reference(&self) -> i64 {
        self.offset.lock().as_millis() as i64
    }
}

/// Single-shot or periodic software timer
#[derive(Debug, Clone)]
pub struct Timer {
    interval: Duration,
    single_shot: bool,
    deadline: Option<Instant>,
    start_count: u64,
}

impl Timer {
    pub fn single_shot(interval: Duration) -> Self {
        Self {
            interval,
            single_shot: true,
            deadline: None,
            start_count: 0,
        }
    }

    pub fn periodic(interval: Duration) -> Self {
        Self {
            single_shot: false,
            ..Self::single_shot(interval)
        }
    }

    /// (Re)arms the timer one interval from `now`
    pub fn start(&mut self, now: Instant) {
        self.deadline = Some(now + self.interval);
        self.start_count += 1;
    }

    pub fn stop(&mut self) {
        self.deadline = None;
    }

    pub fn is_running(&self) -> bool {
        self.deadline.is_some()
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Changes the interval; a running timer keeps its current deadline
    pub fn set_interval(&mut self, interval: Duration) {
        self.interval = interval;
    }

    pub fn is_single_shot(&self) -> bool {
        self.single_shot
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// How many times `start()` has been called
    pub fn start_count(&self) -> u64 {
        self.start_count
    }

    /// Returns true when the deadline has passed. Periodic timers re-arm
    /// themselves, single-shot timers stop.
    pub fn poll(&mut self, now: Instant) -> bool {
        match self.deadline {
            Some(deadline) if deadline <= now => {
                self.deadline = if self.single_shot {
                    None
                } else {
                    Some(now + self.interval)
                };
                true
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_shot_fires_once() {
        let clock = ManualClock::new();
        let mut timer = Timer::single_shot(Duration::from_millis(100));
        timer.start(clock.now());

        clock.advance(Duration::from_millis(99));
        assert!(!timer.poll(clock.now()));

        clock.advance(Duration::from_millis(1));
        assert!(timer.poll(clock.now()));
        assert!(!timer.is_running());
        assert!(!timer.poll(clock.now()));
    }

    #[test]
    fn test_periodic_rearms() {
        let clock = ManualClock::new();
        let mut timer = Timer::periodic(Duration::from_millis(200));
        timer.start(clock.now());

        clock.advance(Duration::from_millis(200));
        assert!(timer.poll(clock.now()));
        assert!(timer.is_running());

        clock.advance(Duration::from_millis(200));
        assert!(timer.poll(clock.now()));

        timer.stop();
        clock.advance(Duration::from_secs(1));
        assert!(!timer.poll(clock.now()));
    }

    #[test]
    fn test_manual_clock_reference() {
        let clock = ManualClock::new();
        assert_eq!(clock.msecs_since_reference(), 0);
        clock.advance(Duration::from_millis(1500));
        assert_eq!(clock.msecs_since_reference(), 1500);
    }
}
