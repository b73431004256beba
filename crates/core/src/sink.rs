//! The trait seams between the quota side and the telemetry side.
//!
//! The limiter crate never depends on the telemetry crate: it records
//! through [`MetricSink`], presents through [`ContentPresenter`], and reads
//! identity through [`EnvironmentProbe`]. The runtime crate wires the real
//! implementations together.

use crate::record::MetricRecord;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// How urgently a record must reach the relay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Priority {
    /// Buffered until a flush trigger fires.
    #[default]
    Normal,
    /// Flushed immediately after recording.
    High,
}

/// Receives metric records from producers (guardian, guard, host app).
#[async_trait]
pub trait MetricSink: Send + Sync {
    /// Record a metric. Must never fail the caller: telemetry is
    /// best-effort by contract.
    async fn record(&self, record: MetricRecord, priority: Priority);
}

/// A sink that discards everything. Useful for tests and for hosts that
/// opt out of telemetry.
#[derive(Debug, Default, Clone)]
pub struct NullSink;

#[async_trait]
impl MetricSink for NullSink {
    async fn record(&self, _record: MetricRecord, _priority: Priority) {}
}

// ── Content presentation ──────────────────────────────────────────────────

/// Why content is being presented.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentContext {
    /// A call burst crossed the trigger threshold.
    Loop,
    /// A quota check rejected the caller.
    RateLimit,
    /// Library initialization.
    Startup,
}

impl std::fmt::Display for ContentContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Loop => write!(f, "loop"),
            Self::RateLimit => write!(f, "rate_limit"),
            Self::Startup => write!(f, "startup"),
        }
    }
}

/// Presents contextual content to the user. Internals are the host's
/// business; the guard only supplies the context tag. Implementations must
/// never panic — presentation failures may not affect the guarded call.
pub trait ContentPresenter: Send + Sync {
    fn present(&self, context: ContentContext);
}

/// Presenter that does nothing.
#[derive(Debug, Default, Clone)]
pub struct NullPresenter;

impl ContentPresenter for NullPresenter {
    fn present(&self, _context: ContentContext) {}
}

// ── Environment probe ─────────────────────────────────────────────────────

/// A coarse description of the host environment, attached to payload
/// metadata (never to individual records).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnvironmentSnapshot {
    /// Opaque machine identifier.
    pub machine_id: String,
    /// Operating system family.
    pub os: String,
    /// Hostname, if known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hostname: Option<String>,
    /// Host application / SDK version string.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub app_version: Option<String>,
}

/// Supplies machine identity and environment details.
pub trait EnvironmentProbe: Send + Sync {
    /// Stable opaque identifier for this machine.
    fn machine_id(&self) -> String;

    /// Coarse environment snapshot for payload metadata.
    fn snapshot(&self) -> EnvironmentSnapshot;
}

/// Fixed-identity probe for tests.
#[derive(Debug, Clone)]
pub struct StaticProbe {
    pub id: String,
}

impl StaticProbe {
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into() }
    }
}

impl EnvironmentProbe for StaticProbe {
    fn machine_id(&self) -> String {
        self.id.clone()
    }

    fn snapshot(&self) -> EnvironmentSnapshot {
        EnvironmentSnapshot {
            machine_id: self.id.clone(),
            os: std::env::consts::OS.to_string(),
            hostname: None,
            app_version: None,
        }
    }
}
