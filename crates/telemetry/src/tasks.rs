//! Supervised background tasks.
//!
//! All periodic work runs on owned tokio tasks whose handles live here, so
//! shutdown is explicit: abort the loops, then wait for them to wind down.
//! Nothing in this module can keep a process alive on its own.

use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::monitor::HealthMonitor;
use crate::relay::{SyncTrigger, TelemetryRelay};

/// Owns background task handles and can abort them all.
#[derive(Default)]
pub struct TaskSupervisor {
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl TaskSupervisor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adopt an already-spawned task.
    pub fn adopt(&self, handle: JoinHandle<()>) {
        self.handles.lock().unwrap().push(handle);
    }

    /// Periodically flush the relay and retry previously failed payloads.
    pub fn start_periodic_flush(&self, relay: Arc<TelemetryRelay>, interval: Duration) {
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // The first tick completes immediately; skip it so the loop
            // waits a full interval before the first flush.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if let Err(e) = relay.dispatch(SyncTrigger::Periodic).await {
                    debug!(error = %e, "Periodic dispatch failed");
                }
                let retried = relay.retry_failed().await;
                if retried > 0 {
                    debug!(retried, "Re-delivered failed telemetry payloads");
                }
            }
        });
        self.adopt(handle);
    }

    /// Periodically evaluate system health.
    pub fn start_health_checks(&self, monitor: Arc<HealthMonitor>, interval: Duration) {
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                monitor.check();
            }
        });
        self.adopt(handle);
    }

    /// Abort every supervised task and wait for each to finish.
    pub async fn shutdown(&self) {
        let handles: Vec<JoinHandle<()>> = {
            let mut guard = self.handles.lock().unwrap();
            std::mem::take(&mut *guard)
        };
        if handles.is_empty() {
            return;
        }
        info!(count = handles.len(), "Stopping background tasks");
        for handle in handles {
            handle.abort();
            // Aborted tasks resolve with a JoinError; that is expected.
            let _ = handle.await;
        }
    }

    /// Number of currently supervised tasks.
    pub fn task_count(&self) -> usize {
        self.handles.lock().unwrap().len()
    }
}
