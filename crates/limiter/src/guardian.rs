//! Per-resource quota enforcement.
//!
//! The guardian checks the tighter (minute) window first so that
//! hour-window headroom can never mask immediate-term throttling, and it
//! records a timestamp only when a request is accepted — rejected attempts
//! must not inflate the windows.

use crate::window::ResourceQuota;
use chrono::Utc;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tracing::debug;
use wardline_config::{LimitPair, QuotaConfig};
use wardline_core::clock::Clock;
use wardline_core::error::RateLimitError;
use wardline_core::record::{LimitWindow, MetricRecord, RateLimitRecord};
use wardline_core::sink::{MetricSink, Priority};

/// Ensures per-resource request budgets are respected.
pub struct QuotaGuardian {
    config: QuotaConfig,
    quotas: RwLock<HashMap<String, ResourceQuota>>,
    sink: Arc<dyn MetricSink>,
    clock: Arc<dyn Clock>,
}

impl QuotaGuardian {
    /// Create a guardian with the given limits, metric sink, and clock.
    pub fn new(config: QuotaConfig, sink: Arc<dyn MetricSink>, clock: Arc<dyn Clock>) -> Self {
        Self {
            config,
            quotas: RwLock::new(HashMap::new()),
            sink,
            clock,
        }
    }

    /// Verify resource availability before an operation.
    ///
    /// On acceptance the current timestamp is appended to both windows. On
    /// rejection nothing is recorded and the returned error carries a
    /// retry-after hint: seconds until the minute (or hour) rolls over.
    pub async fn verify(
        &self,
        operation_id: &str,
        resource_type: &str,
    ) -> Result<(), RateLimitError> {
        let now = self.clock.now_secs();
        let limits = self.config.limits_for(resource_type);

        // Window math under the lock; metric emission after release.
        let (outcome, check_record) = {
            let mut quotas = self.quotas.write().unwrap();
            let quota = quotas.entry(resource_type.to_string()).or_default();

            let minute_usage = quota.minute.count(now);
            if minute_usage >= limits.per_minute {
                let err = RateLimitError {
                    resource_type: resource_type.to_string(),
                    window: LimitWindow::Minute,
                    current_usage: minute_usage,
                    limit: limits.per_minute,
                    retry_after_secs: 60.0 - (now % 60.0),
                };
                let record = rate_limit_record(resource_type, LimitWindow::Minute, limits, minute_usage, true);
                (Err(err), record)
            } else {
                let hour_usage = quota.hour.count(now);
                let hour_exceeded = hour_usage >= limits.per_hour;

                let record = if hour_exceeded {
                    rate_limit_record(resource_type, LimitWindow::Hour, limits, hour_usage, true)
                } else {
                    rate_limit_record(resource_type, LimitWindow::Minute, limits, minute_usage, false)
                };

                if hour_exceeded {
                    let err = RateLimitError {
                        resource_type: resource_type.to_string(),
                        window: LimitWindow::Hour,
                        current_usage: hour_usage,
                        limit: limits.per_hour,
                        retry_after_secs: 3600.0 - (now % 3600.0),
                    };
                    (Err(err), record)
                } else {
                    quota.record(now);
                    (Ok(()), record)
                }
            }
        };

        let priority = if outcome.is_err() {
            Priority::High
        } else {
            Priority::Normal
        };
        self.sink
            .record(MetricRecord::RateLimit(check_record), priority)
            .await;

        if let Err(ref e) = outcome {
            debug!(
                operation = operation_id,
                resource = resource_type,
                window = %e.window,
                usage = e.current_usage,
                "Quota check rejected"
            );
        }
        outcome
    }

    /// Current usage as a percentage of the limit — the higher of the two
    /// windows. For external health reporting.
    pub fn usage(&self, resource_type: &str) -> f64 {
        let now = self.clock.now_secs();
        let limits = self.config.limits_for(resource_type);
        let mut quotas = self.quotas.write().unwrap();
        let quota = quotas.entry(resource_type.to_string()).or_default();
        window_pct(quota.minute.count(now), limits.per_minute)
            .max(window_pct(quota.hour.count(now), limits.per_hour))
    }

    /// The highest usage percentage across every tracked resource type.
    pub fn peak_usage(&self) -> f64 {
        let now = self.clock.now_secs();
        let mut quotas = self.quotas.write().unwrap();
        let mut peak: f64 = 0.0;
        for (resource, quota) in quotas.iter_mut() {
            let limits = self.config.limits_for(resource);
            peak = peak
                .max(window_pct(quota.minute.count(now), limits.per_minute))
                .max(window_pct(quota.hour.count(now), limits.per_hour));
        }
        peak
    }

    /// Detailed limit status for a resource type.
    pub fn limit_status(&self, resource_type: &str) -> LimitStatus {
        let now = self.clock.now_secs();
        let limits = self.config.limits_for(resource_type);
        let mut quotas = self.quotas.write().unwrap();
        let quota = quotas.entry(resource_type.to_string()).or_default();

        let minute_usage = quota.minute.count(now);
        let hour_usage = quota.hour.count(now);

        LimitStatus {
            resource_type: resource_type.to_string(),
            minute: WindowStatus {
                usage: minute_usage,
                limit: limits.per_minute,
                percentage: window_pct(minute_usage, limits.per_minute),
                remaining: limits.per_minute.saturating_sub(minute_usage),
                reset_in_secs: 60.0 - (now % 60.0),
            },
            hour: WindowStatus {
                usage: hour_usage,
                limit: limits.per_hour,
                percentage: window_pct(hour_usage, limits.per_hour),
                remaining: limits.per_hour.saturating_sub(hour_usage),
                reset_in_secs: 3600.0 - (now % 3600.0),
            },
        }
    }
}

fn window_pct(usage: u32, limit: u32) -> f64 {
    if limit == 0 {
        return 100.0;
    }
    (usage as f64 / limit as f64) * 100.0
}

fn rate_limit_record(
    resource_type: &str,
    window: LimitWindow,
    limits: LimitPair,
    usage: u32,
    is_exceeded: bool,
) -> RateLimitRecord {
    let limit_value = match window {
        LimitWindow::Minute => limits.per_minute,
        LimitWindow::Hour => limits.per_hour,
    };
    RateLimitRecord {
        resource_type: resource_type.to_string(),
        window,
        limit_value,
        current_usage: usage,
        is_exceeded,
        usage_percentage: window_pct(usage, limit_value),
        timestamp: Utc::now(),
        machine_id: None,
    }
}

/// One window's share of a [`LimitStatus`] report.
#[derive(Debug, Clone, Serialize)]
pub struct WindowStatus {
    pub usage: u32,
    pub limit: u32,
    pub percentage: f64,
    pub remaining: u32,
    pub reset_in_secs: f64,
}

/// Detailed limit report for a resource type.
#[derive(Debug, Clone, Serialize)]
pub struct LimitStatus {
    pub resource_type: String,
    pub minute: WindowStatus,
    pub hour: WindowStatus,
}

#[cfg(test)]
mod tests {
    use super::*;
    use wardline_core::clock::ManualClock;
    use wardline_core::sink::NullSink;

    fn guardian_with(
        overrides: &[(&str, u32, u32)],
        clock: Arc<ManualClock>,
    ) -> QuotaGuardian {
        let mut config = QuotaConfig::default();
        for &(resource, per_minute, per_hour) in overrides {
            config.overrides.insert(
                resource.into(),
                LimitPair {
                    per_minute,
                    per_hour,
                },
            );
        }
        QuotaGuardian::new(config, Arc::new(NullSink), clock)
    }

    #[tokio::test]
    async fn accepts_within_limits() {
        let clock = Arc::new(ManualClock::starting_at(0.0));
        let guardian = guardian_with(&[("x", 5, 100)], clock.clone());
        for _ in 0..5 {
            assert!(guardian.verify("op", "x").await.is_ok());
            clock.advance(1.0);
        }
    }

    #[tokio::test]
    async fn minute_window_rejects_and_rolls_over() {
        // Limit 2/min: calls at t=0,1 succeed; t=2 fails with retry_after≈58;
        // t=61 succeeds again.
        let clock = Arc::new(ManualClock::starting_at(0.0));
        let guardian = guardian_with(&[("x", 2, 100)], clock.clone());

        assert!(guardian.verify("op", "x").await.is_ok());
        clock.set(1.0);
        assert!(guardian.verify("op", "x").await.is_ok());
        clock.set(2.0);
        let err = guardian.verify("op", "x").await.unwrap_err();
        assert_eq!(err.window, LimitWindow::Minute);
        assert_eq!(err.current_usage, 2);
        assert!((err.retry_after_secs - 58.0).abs() < 0.001);

        clock.set(61.0);
        assert!(guardian.verify("op", "x").await.is_ok());
    }

    #[tokio::test]
    async fn minute_limit_wins_tie_break() {
        // Both windows exhausted: the minute error is the one raised.
        let clock = Arc::new(ManualClock::starting_at(0.0));
        let guardian = guardian_with(&[("x", 2, 2)], clock.clone());
        guardian.verify("op", "x").await.unwrap();
        guardian.verify("op", "x").await.unwrap();
        let err = guardian.verify("op", "x").await.unwrap_err();
        assert_eq!(err.window, LimitWindow::Minute);
    }

    #[tokio::test]
    async fn hour_window_rejects_after_minute_rollover() {
        let clock = Arc::new(ManualClock::starting_at(0.0));
        let guardian = guardian_with(&[("x", 10, 3)], clock.clone());
        for i in 0..3 {
            clock.set(i as f64);
            guardian.verify("op", "x").await.unwrap();
        }
        // Minute window rolled over, hour window still full
        clock.set(120.0);
        let err = guardian.verify("op", "x").await.unwrap_err();
        assert_eq!(err.window, LimitWindow::Hour);
        assert!((err.retry_after_secs - 3480.0).abs() < 0.001);
    }

    #[tokio::test]
    async fn rejected_attempts_do_not_inflate_windows() {
        let clock = Arc::new(ManualClock::starting_at(0.0));
        let guardian = guardian_with(&[("x", 2, 100)], clock.clone());
        guardian.verify("op", "x").await.unwrap();
        guardian.verify("op", "x").await.unwrap();
        for _ in 0..10 {
            assert!(guardian.verify("op", "x").await.is_err());
        }
        // Only the 2 accepted calls count against the hour window
        assert_eq!(guardian.limit_status("x").hour.usage, 2);
    }

    #[tokio::test]
    async fn window_correctness_under_mixed_sequence() {
        // The minute window never admits more than its limit in any
        // trailing 60 s, whatever the call pattern.
        let clock = Arc::new(ManualClock::starting_at(0.0));
        let guardian = guardian_with(&[("x", 3, 1000)], clock.clone());
        let mut accepted: Vec<f64> = Vec::new();
        for step in 0..200 {
            let t = step as f64 * 7.0;
            clock.set(t);
            if guardian.verify("op", "x").await.is_ok() {
                accepted.push(t);
                let in_window = accepted.iter().filter(|&&a| a > t - 60.0).count();
                assert!(in_window <= 3, "window overflow at t={t}: {in_window}");
            }
        }
        assert!(!accepted.is_empty());
    }

    #[tokio::test]
    async fn resources_are_independent() {
        let clock = Arc::new(ManualClock::starting_at(0.0));
        let guardian = guardian_with(&[("a", 1, 10), ("b", 1, 10)], clock.clone());
        guardian.verify("op", "a").await.unwrap();
        assert!(guardian.verify("op", "a").await.is_err());
        assert!(guardian.verify("op", "b").await.is_ok());
    }

    #[tokio::test]
    async fn usage_reports_higher_window() {
        let clock = Arc::new(ManualClock::starting_at(0.0));
        let guardian = guardian_with(&[("x", 10, 1000)], clock.clone());
        for i in 0..5 {
            clock.set(i as f64);
            guardian.verify("op", "x").await.unwrap();
        }
        // 5/10 minute = 50%, 5/1000 hour = 0.5% → 50
        assert!((guardian.usage("x") - 50.0).abs() < 0.001);
        assert!((guardian.peak_usage() - 50.0).abs() < 0.001);
    }

    #[tokio::test]
    async fn limit_status_details() {
        let clock = Arc::new(ManualClock::starting_at(30.0));
        let guardian = guardian_with(&[("x", 4, 100)], clock.clone());
        guardian.verify("op", "x").await.unwrap();
        let status = guardian.limit_status("x");
        assert_eq!(status.minute.usage, 1);
        assert_eq!(status.minute.remaining, 3);
        assert!((status.minute.reset_in_secs - 30.0).abs() < 0.001);
        assert_eq!(status.hour.remaining, 99);
    }
}
