//! # Wardline Core
//!
//! Domain types, traits, and error definitions for the wardline usage
//! governor. This crate has **zero framework dependencies** — it defines the
//! model that all other crates implement against.
//!
//! ## Design Philosophy
//!
//! Every seam between subsystems is a trait here: the limiter emits metrics
//! through [`MetricSink`], presents content through [`ContentPresenter`],
//! reads identity through [`EnvironmentProbe`], and reads time through
//! [`Clock`]. Implementations live in their respective crates, which keeps
//! the dependency graph pointing inward and makes every component testable
//! with stubs and a manual clock.

pub mod clock;
pub mod error;
pub mod record;
pub mod sink;

// Re-export key types at crate root for ergonomics
pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{Error, GuardError, RateLimitError, Result, TelemetryError};
pub use record::{
    ApiRequestRecord, ContentOpportunityRecord, ErrorRecord, FunctionCallRecord, LimitWindow,
    MetricKind, MetricRecord, RateLimitRecord,
};
pub use sink::{
    ContentContext, ContentPresenter, EnvironmentProbe, EnvironmentSnapshot, MetricSink,
    NullPresenter, NullSink, Priority, StaticProbe,
};
