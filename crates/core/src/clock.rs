//! Clock abstraction for quota window math.
//!
//! Windows are tracked as epoch-second floats so that retry-after hints can
//! be computed against wall-clock rollover (`60 - now % 60`). Components
//! take an `Arc<dyn Clock>` so tests can drive a [`ManualClock`]
//! deterministically instead of sleeping.

use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

/// A source of wall-clock time in epoch seconds.
pub trait Clock: Send + Sync {
    /// Seconds since the Unix epoch.
    fn now_secs(&self) -> f64;
}

/// The real system clock.
#[derive(Debug, Default, Clone)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_secs(&self) -> f64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs_f64())
            .unwrap_or(0.0)
    }
}

/// A manually advanced clock for deterministic tests.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: Mutex<f64>,
}

impl ManualClock {
    /// Create a manual clock starting at the given epoch second.
    pub fn starting_at(secs: f64) -> Self {
        Self {
            now: Mutex::new(secs),
        }
    }

    /// Advance the clock by `secs`.
    pub fn advance(&self, secs: f64) {
        *self.now.lock().unwrap() += secs;
    }

    /// Jump the clock to an absolute epoch second.
    pub fn set(&self, secs: f64) {
        *self.now.lock().unwrap() = secs;
    }
}

impl Clock for ManualClock {
    fn now_secs(&self) -> f64 {
        *self.now.lock().unwrap()
    }
}
