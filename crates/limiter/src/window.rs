//! Sliding windows over epoch-second timestamps.
//!
//! Invariant: timestamps in a window are never older than the window
//! length. Every read and write purges stale entries first, so counts are
//! always accurate at the moment of inspection.

use wardline_core::record::LimitWindow;

/// A time-bounded record of recent request timestamps.
#[derive(Debug, Clone)]
pub struct SlidingWindow {
    /// Window length in seconds.
    length_secs: f64,
    /// Accepted-request timestamps, oldest first.
    timestamps: Vec<f64>,
}

impl SlidingWindow {
    /// Create an empty window of the given length.
    pub fn new(length_secs: f64) -> Self {
        Self {
            length_secs,
            timestamps: Vec::new(),
        }
    }

    /// Drop timestamps older than the window, relative to `now`.
    pub fn purge(&mut self, now: f64) {
        let cutoff = now - self.length_secs;
        self.timestamps.retain(|&t| t > cutoff);
    }

    /// Requests currently inside the window. Purges first.
    pub fn count(&mut self, now: f64) -> u32 {
        self.purge(now);
        self.timestamps.len() as u32
    }

    /// Record an accepted request at `now`.
    ///
    /// Timestamps are append-only and non-decreasing in wall-clock order.
    pub fn record(&mut self, now: f64) {
        self.timestamps.push(now);
    }

    /// The window length in seconds.
    pub fn length_secs(&self) -> f64 {
        self.length_secs
    }
}

/// The two sliding windows tracked for one resource type.
///
/// Created lazily on first use; lives for the process lifetime; never
/// persisted.
#[derive(Debug, Clone)]
pub struct ResourceQuota {
    /// The 60-second window.
    pub minute: SlidingWindow,
    /// The 3600-second window.
    pub hour: SlidingWindow,
}

impl Default for ResourceQuota {
    fn default() -> Self {
        Self {
            minute: SlidingWindow::new(LimitWindow::Minute.length_secs()),
            hour: SlidingWindow::new(LimitWindow::Hour.length_secs()),
        }
    }
}

impl ResourceQuota {
    /// Record an accepted request in both windows.
    pub fn record(&mut self, now: f64) {
        self.minute.record(now);
        self.hour.record(now);
    }
}
