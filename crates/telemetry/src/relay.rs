//! The telemetry relay.
//!
//! Buffers categorized metric records and ships them to a webhook endpoint
//! in batched payloads. A dispatch fires when the combined buffers reach
//! capacity, when a critical record arrives (an exceeded rate limit or a
//! failed call), on a time-weighted random roll, or on the periodic timer.
//!
//! Dispatch is snapshot-and-clear under one lock: records are either in a
//! buffer or in exactly one payload, never both. Payloads that fail to send
//! land in a bounded retry queue that keeps the most recent entries.

use chrono::Utc;
use serde_json::json;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, Weak};
use tracing::{debug, warn};
use wardline_config::{RelayConfig, SyncState};
use wardline_core::clock::Clock;
use wardline_core::error::TelemetryError;
use wardline_core::record::{MetricKind, MetricRecord};
use wardline_core::sink::EnvironmentProbe;

use crate::transport::Transport;

/// Why a dispatch fired. Serialized into payload metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncTrigger {
    BufferFull,
    RateLimitExceeded,
    FunctionError,
    TimeWeightedRandom,
    Periodic,
    HighPriority,
    Manual,
}

impl std::fmt::Display for SyncTrigger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SyncTrigger::BufferFull => "buffer_full",
            SyncTrigger::RateLimitExceeded => "rate_limit_exceeded",
            SyncTrigger::FunctionError => "function_error",
            SyncTrigger::TimeWeightedRandom => "random_time_weighted",
            SyncTrigger::Periodic => "periodic",
            SyncTrigger::HighPriority => "high_priority",
            SyncTrigger::Manual => "manual",
        };
        f.write_str(s)
    }
}

/// Everything the buffer lock protects.
struct RelayInner {
    endpoint: Option<String>,
    function_calls: Vec<MetricRecord>,
    api_requests: Vec<MetricRecord>,
    rate_limits: Vec<MetricRecord>,
    last_sync_time: f64,
    sync_count: u64,
    failed: Vec<serde_json::Value>,
}

impl RelayInner {
    fn total(&self) -> usize {
        self.function_calls.len() + self.api_requests.len() + self.rate_limits.len()
    }

    fn is_empty(&self) -> bool {
        self.total() == 0
    }
}

/// Buffered webhook telemetry relay.
pub struct TelemetryRelay {
    config: RelayConfig,
    transport: Arc<dyn Transport>,
    probe: Arc<dyn EnvironmentProbe>,
    clock: Arc<dyn Clock>,
    /// Where sync bookkeeping persists. None disables persistence.
    state_path: Option<PathBuf>,
    /// Handle to ourselves, for spawning background dispatches.
    weak: Weak<TelemetryRelay>,
    inner: Mutex<RelayInner>,
}

impl TelemetryRelay {
    pub fn new(
        config: RelayConfig,
        transport: Arc<dyn Transport>,
        probe: Arc<dyn EnvironmentProbe>,
        clock: Arc<dyn Clock>,
        state_path: Option<PathBuf>,
    ) -> Arc<Self> {
        let state = state_path
            .as_deref()
            .map(SyncState::load)
            .unwrap_or_default();
        let last_sync_time = if state.last_sync_time > 0.0 {
            state.last_sync_time
        } else {
            clock.now_secs()
        };
        let endpoint = config.webhook_url.clone();
        Arc::new_cyclic(|weak| Self {
            config,
            transport,
            probe,
            clock,
            state_path,
            weak: weak.clone(),
            inner: Mutex::new(RelayInner {
                endpoint,
                function_calls: Vec::new(),
                api_requests: Vec::new(),
                rate_limits: Vec::new(),
                last_sync_time,
                sync_count: state.sync_count,
                failed: Vec::new(),
            }),
        })
    }

    /// Set or replace the webhook endpoint at runtime.
    pub fn configure(&self, endpoint: impl Into<String>) {
        self.inner.lock().unwrap().endpoint = Some(endpoint.into());
    }

    /// Buffer one record and fire a background dispatch if a trigger is met.
    pub fn queue(&self, record: MetricRecord) {
        let trigger = {
            let mut inner = self.inner.lock().unwrap();
            let critical = match &record {
                MetricRecord::RateLimit(r) if r.is_exceeded => {
                    Some(SyncTrigger::RateLimitExceeded)
                }
                MetricRecord::FunctionCall(f) if !f.success => Some(SyncTrigger::FunctionError),
                MetricRecord::Error(_) => Some(SyncTrigger::FunctionError),
                _ => None,
            };

            match record.kind() {
                MetricKind::ApiRequest => inner.api_requests.push(record),
                MetricKind::RateLimit => inner.rate_limits.push(record),
                // Errors and content opportunities ride the call buffer
                _ => inner.function_calls.push(record),
            }

            if inner.total() >= self.config.buffer_size {
                Some(SyncTrigger::BufferFull)
            } else if critical.is_some() {
                critical
            } else {
                // Pressure valve: up to a 5% chance, growing with time
                // since the last dispatch.
                let elapsed = self.clock.now_secs() - inner.last_sync_time;
                let time_factor =
                    (elapsed / (self.config.sync_interval_secs as f64 / 2.0)).min(1.0);
                if rand::random::<f64>() < 0.05 * time_factor {
                    Some(SyncTrigger::TimeWeightedRandom)
                } else {
                    None
                }
            }
        };

        if let Some(reason) = trigger {
            self.request_dispatch(reason);
        }
    }

    /// Fire a dispatch on a background task, never blocking the caller.
    pub fn request_dispatch(&self, reason: SyncTrigger) {
        if let Some(relay) = self.weak.upgrade() {
            tokio::spawn(async move {
                if let Err(e) = relay.dispatch(reason).await {
                    debug!(error = %e, %reason, "Background dispatch failed");
                }
            });
        }
    }

    /// Snapshot the buffers and ship them.
    ///
    /// Returns `Ok(false)` when there was nothing to send. A transmission
    /// failure moves the payload onto the bounded retry queue before the
    /// error surfaces.
    pub async fn dispatch(&self, reason: SyncTrigger) -> Result<bool, TelemetryError> {
        let now = self.clock.now_secs();
        let (endpoint, calls, requests, limits, sync_count) = {
            let mut inner = self.inner.lock().unwrap();
            let Some(endpoint) = inner.endpoint.clone() else {
                return Err(TelemetryError::NotConfigured);
            };
            if inner.is_empty() {
                return Ok(false);
            }
            let calls = std::mem::take(&mut inner.function_calls);
            let requests = std::mem::take(&mut inner.api_requests);
            let limits = std::mem::take(&mut inner.rate_limits);
            inner.last_sync_time = now;
            inner.sync_count += 1;
            (endpoint, calls, requests, limits, inner.sync_count)
        };

        self.persist_state(now, sync_count);

        let environment = self.probe.snapshot();
        let payload = json!({
            "analytics_data": {
                "function_calls": calls,
                "api_requests": requests,
                "rate_limits": limits,
            },
            "metadata": {
                "timestamp": Utc::now().to_rfc3339(),
                "machine_id": environment.machine_id,
                "sync_count": sync_count,
                "trigger_reason": reason.to_string(),
                "environment": environment,
                "data_counts": {
                    "function_calls": calls.len(),
                    "api_requests": requests.len(),
                    "rate_limits": limits.len(),
                },
            },
        });

        debug!(
            %reason,
            sync_count,
            function_calls = calls.len(),
            api_requests = requests.len(),
            rate_limits = limits.len(),
            "Dispatching telemetry payload"
        );

        match self.transport.send(&endpoint, &payload).await {
            Ok(()) => Ok(true),
            Err(e) => {
                warn!(error = %e, "Telemetry transmission failed, queueing for retry");
                self.push_failed(payload);
                Err(e)
            }
        }
    }

    /// Re-send previously failed payloads. Returns how many went through.
    pub async fn retry_failed(&self) -> usize {
        let (endpoint, to_retry) = {
            let mut inner = self.inner.lock().unwrap();
            let Some(endpoint) = inner.endpoint.clone() else {
                return 0;
            };
            (endpoint, std::mem::take(&mut inner.failed))
        };

        let mut delivered = 0;
        for payload in to_retry {
            match self.transport.send(&endpoint, &payload).await {
                Ok(()) => delivered += 1,
                Err(_) => self.push_failed(payload),
            }
        }
        delivered
    }

    /// Counts of records waiting in each buffer plus the retry queue.
    pub fn pending(&self) -> PendingCounts {
        let inner = self.inner.lock().unwrap();
        PendingCounts {
            function_calls: inner.function_calls.len(),
            api_requests: inner.api_requests.len(),
            rate_limits: inner.rate_limits.len(),
            failed_payloads: inner.failed.len(),
        }
    }

    fn push_failed(&self, payload: serde_json::Value) {
        let mut inner = self.inner.lock().unwrap();
        inner.failed.push(payload);
        let excess = inner.failed.len().saturating_sub(self.config.max_failed_payloads);
        if excess > 0 {
            inner.failed.drain(..excess);
        }
    }

    fn persist_state(&self, last_sync_time: f64, sync_count: u64) {
        if let Some(path) = &self.state_path {
            SyncState {
                last_sync_time,
                sync_count,
            }
            .save(path);
        }
    }
}

/// Snapshot of relay backlog, for health reporting and tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct PendingCounts {
    pub function_calls: usize,
    pub api_requests: usize,
    pub rate_limits: usize,
    pub failed_payloads: usize,
}

impl PendingCounts {
    pub fn total(&self) -> usize {
        self.function_calls + self.api_requests + self.rate_limits
    }
}
