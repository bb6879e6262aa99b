use std::time::{Duration, SystemTime};

use parking_lot::Mutex;

/// Source of wall-clock time.
///
/// The tracer reads time through this trait so dwell thresholds can be
/// exercised deterministically in tests.
pub trait TimeSource: Send + Sync {
    fn now(&self) -> SystemTime;
}

/// Production time source backed by the system clock.
#[derive(Debug, Default)]
pub struct SystemTimeSource;

impl TimeSource for SystemTimeSource {
    fn now(&self) -> SystemTime {
        SystemTime::now()
    }
}

/// Manually advanced time source for tests and simulations.
#[derive(Debug)]
pub struct ManualTimeSource {
    now: Mutex<SystemTime>,
}

impl ManualTimeSource {
    /// Creates a manual clock starting at the given instant.
    pub fn new(start: SystemTime) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    /// Moves the clock forward.
    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock();
        *now += by;
    }

    /// Sets the clock to an absolute instant.
    pub fn set(&self, to: SystemTime) {
        *self.now.lock() = to;
    }
}

impl TimeSource for ManualTimeSource {
    fn now(&self) -> SystemTime {
        *self.now.lock()
    }
}
