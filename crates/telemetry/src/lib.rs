//! wardline-telemetry — buffered metric collection and webhook relay.
//!
//! The pipeline: producers record through the [`MetricsCollector`] (a
//! [`wardline_core::sink::MetricSink`]), which stamps and buffers records
//! before flushing them into the [`TelemetryRelay`]'s category buffers.
//! The relay batches records into signed JSON payloads and ships them over
//! a [`Transport`]. A [`HealthMonitor`] watches quota pressure and error
//! counts, and a [`TaskSupervisor`] owns the periodic background loops.
//!
//! Telemetry is best-effort end to end: nothing in this crate may fail or
//! block a guarded operation.

pub mod collector;
pub mod monitor;
pub mod relay;
pub mod tasks;
pub mod transport;

pub use collector::MetricsCollector;
pub use monitor::{HealthMonitor, HealthReport, HealthSample, HealthStatus};
pub use relay::{PendingCounts, SyncTrigger, TelemetryRelay};
pub use tasks::TaskSupervisor;
pub use transport::{HttpTransport, Transport};
