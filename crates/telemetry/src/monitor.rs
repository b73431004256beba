//! System health monitoring.
//!
//! Periodically evaluates quota pressure and telemetry error counts into a
//! coarse health status with a bounded history. Purely observational: it
//! never throttles or mutates the subsystems it watches.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use tracing::debug;
use wardline_config::HealthConfig;
use wardline_core::clock::Clock;
use wardline_limiter::QuotaGuardian;

use crate::collector::MetricsCollector;

const HISTORY_LIMIT: usize = 10;

/// Coarse health classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Healthy,
    Warning,
    Critical,
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Healthy => write!(f, "healthy"),
            Self::Warning => write!(f, "warning"),
            Self::Critical => write!(f, "critical"),
        }
    }
}

/// One health check outcome.
#[derive(Debug, Clone, Serialize)]
pub struct HealthSample {
    pub timestamp: DateTime<Utc>,
    pub status: HealthStatus,
    /// Peak quota usage across all resources, in percent.
    pub resource_usage_pct: f64,
    /// Error-kind records since the previous check.
    pub new_errors: u64,
}

/// Aggregated health report.
#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub status: HealthStatus,
    pub last_check: DateTime<Utc>,
    pub error_count: u64,
    pub warning_count: u64,
    /// Most recent samples, newest last.
    pub history: Vec<HealthSample>,
}

struct MonitorInner {
    status: HealthStatus,
    last_check_secs: f64,
    last_check_at: DateTime<Utc>,
    error_count: u64,
    warning_count: u64,
    /// Collector error total at the previous check.
    errors_seen: u64,
    history: VecDeque<HealthSample>,
}

/// Watches quota pressure and telemetry errors.
pub struct HealthMonitor {
    config: HealthConfig,
    guardian: Arc<QuotaGuardian>,
    collector: Arc<MetricsCollector>,
    clock: Arc<dyn Clock>,
    inner: Mutex<MonitorInner>,
}

impl HealthMonitor {
    pub fn new(
        config: HealthConfig,
        guardian: Arc<QuotaGuardian>,
        collector: Arc<MetricsCollector>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let now = clock.now_secs();
        Self {
            config,
            guardian,
            collector,
            clock,
            inner: Mutex::new(MonitorInner {
                status: HealthStatus::Healthy,
                last_check_secs: now,
                last_check_at: Utc::now(),
                error_count: 0,
                warning_count: 0,
                errors_seen: 0,
                history: VecDeque::new(),
            }),
        }
    }

    /// Run one health evaluation and return the resulting status.
    pub fn check(&self) -> HealthStatus {
        let usage = self.guardian.peak_usage();
        let total_errors = self.collector.errors_recorded();
        let high_usage = usage > self.config.usage_warning_pct;

        let mut inner = self.inner.lock().unwrap();
        let new_errors = total_errors.saturating_sub(inner.errors_seen);
        inner.errors_seen = total_errors;

        let status = match (new_errors > 0, high_usage) {
            (true, true) => HealthStatus::Critical,
            (true, false) | (false, true) => HealthStatus::Warning,
            (false, false) => HealthStatus::Healthy,
        };
        match status {
            HealthStatus::Critical => inner.error_count += 1,
            HealthStatus::Warning => inner.warning_count += 1,
            HealthStatus::Healthy => {}
        }

        inner.status = status;
        inner.last_check_secs = self.clock.now_secs();
        let last_check_at = Utc::now();
        inner.last_check_at = last_check_at;
        inner.history.push_back(HealthSample {
            timestamp: last_check_at,
            status,
            resource_usage_pct: usage,
            new_errors,
        });
        while inner.history.len() > HISTORY_LIMIT {
            inner.history.pop_front();
        }

        debug!(%status, usage_pct = usage, new_errors, "Health check completed");
        status
    }

    /// Current report, refreshing first when the last check is stale.
    pub fn report(&self) -> HealthReport {
        let stale = {
            let inner = self.inner.lock().unwrap();
            self.clock.now_secs() - inner.last_check_secs > self.config.check_interval_secs as f64
        };
        if stale {
            self.check();
        }

        let inner = self.inner.lock().unwrap();
        HealthReport {
            status: inner.status,
            last_check: inner.last_check_at,
            error_count: inner.error_count,
            warning_count: inner.warning_count,
            history: inner.history.iter().rev().take(3).rev().cloned().collect(),
        }
    }

    /// Clear all counters and history.
    pub fn reset(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.status = HealthStatus::Healthy;
        inner.error_count = 0;
        inner.warning_count = 0;
        inner.history.clear();
        inner.last_check_secs = self.clock.now_secs();
        inner.last_check_at = Utc::now();
    }
}
