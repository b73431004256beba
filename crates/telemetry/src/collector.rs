//! Buffered metric collection.
//!
//! The collector sits between record producers (the guardian and the
//! execution guard) and the relay. It stamps every record with the machine
//! identifier, buffers up to a combined threshold, and flushes into the
//! relay's category buffers. Error-kind records and high-priority records
//! flush immediately.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tracing::trace;
use wardline_core::record::{MetricKind, MetricRecord};
use wardline_core::sink::{MetricSink, Priority};

use crate::relay::{SyncTrigger, TelemetryRelay};

/// Buffering metric sink backed by the telemetry relay.
pub struct MetricsCollector {
    buffer_size: usize,
    machine_id: String,
    relay: Arc<TelemetryRelay>,
    buffer: Mutex<Vec<MetricRecord>>,
    /// Cumulative error-kind records seen, for health checks.
    errors_recorded: AtomicU64,
}

impl MetricsCollector {
    pub fn new(buffer_size: usize, machine_id: impl Into<String>, relay: Arc<TelemetryRelay>) -> Self {
        Self {
            buffer_size,
            machine_id: machine_id.into(),
            relay,
            buffer: Mutex::new(Vec::new()),
            errors_recorded: AtomicU64::new(0),
        }
    }

    /// Per-kind counts of records currently buffered.
    pub fn summary(&self) -> HashMap<MetricKind, usize> {
        let buffer = self.buffer.lock().unwrap();
        let mut counts = HashMap::new();
        for record in buffer.iter() {
            *counts.entry(record.kind()).or_insert(0) += 1;
        }
        counts
    }

    /// Total error-kind records ever recorded through this collector.
    pub fn errors_recorded(&self) -> u64 {
        self.errors_recorded.load(Ordering::Relaxed)
    }

    /// Drain the buffer into the relay's category buffers.
    pub fn flush(&self) {
        let drained: Vec<MetricRecord> = {
            let mut buffer = self.buffer.lock().unwrap();
            std::mem::take(&mut *buffer)
        };
        if drained.is_empty() {
            return;
        }
        trace!(count = drained.len(), "Flushing collector buffer to relay");
        for record in drained {
            self.relay.queue(record);
        }
    }
}

#[async_trait]
impl MetricSink for MetricsCollector {
    async fn record(&self, mut record: MetricRecord, priority: Priority) {
        record.set_machine_id(&self.machine_id);
        let kind = record.kind();
        if kind == MetricKind::Error {
            self.errors_recorded.fetch_add(1, Ordering::Relaxed);
        }

        let should_flush = {
            let mut buffer = self.buffer.lock().unwrap();
            buffer.push(record);
            buffer.len() >= self.buffer_size
                || priority == Priority::High
                || kind == MetricKind::Error
        };

        if should_flush {
            self.flush();
            if priority == Priority::High {
                // High-priority records ask the relay to ship right away.
                // Runs on a spawned task so the recording caller is never
                // held up by the network.
                self.relay.request_dispatch(SyncTrigger::HighPriority);
            }
        }
    }
}
