//! Wall-clock and monotonic timestamps

use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;

/// A wall-clock / monotonic time pair, both in seconds
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Timestamp {
    /// Seconds since the Unix epoch
    pub wall: f64,
    /// Seconds on a monotonic clock with an arbitrary origin
    pub mono: f64,
}

impl Timestamp {
    /// Monotonic seconds elapsed between `self` and a later timestamp
    pub fn mono_since(&self, earlier: &Timestamp) -> f64 {
        self.mono - earlier.mono
    }
}

/// Source of timestamps
pub trait Clock: Send + Sync {
    /// Current time
    fn now(&self) -> Timestamp;
}

/// Clock backed by `SystemTime` and `Instant`
#[derive(Debug, Clone)]
pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    /// Create a clock whose monotonic origin is "now"
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
    fn now(&self) -> Timestamp {
        let wall = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_else(|_| Duration::from_secs(0));
        Timestamp {
            wall: wall.as_secs_f64(),
            mono: self.origin.elapsed().as_secs_f64(),
        }
    }
}

/// Manually driven clock for simulations and tests
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    now: Arc<Mutex<Timestamp>>,
}

impl ManualClock {
    /// Create a clock frozen at `start`
    pub fn new(start: Timestamp) -> Self {
        Self {
            now: Arc::new(Mutex::new(start)),
        }
    }

    /// Move both wall and monotonic time forward
    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock();
        now.wall += by.as_secs_f64();
        now.mono += by.as_secs_f64();
    }

    /// Jump to an explicit timestamp
    pub fn set(&self, to: Timestamp) {
        *self.now.lock() = to;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Timestamp {
        *self.now.lock()
    }
}
