//! Error types for the wardline domain.
//!
//! Uses `thiserror` for ergonomic error definitions.
//! Each bounded context has its own error variant.

use crate::record::LimitWindow;
use thiserror::Error;

/// The top-level error type for all wardline operations.
#[derive(Debug, Error)]
pub enum Error {
    // --- Quota errors ---
    #[error("Rate limit error: {0}")]
    RateLimit(#[from] RateLimitError),

    // --- Guard errors ---
    #[error("Guard error: {0}")]
    Guard(#[from] GuardError),

    // --- Telemetry errors ---
    #[error("Telemetry error: {0}")]
    Telemetry(#[from] TelemetryError),

    // --- Configuration errors ---
    #[error("Configuration error: {message}")]
    Config { message: String },

    // --- Serialization ---
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // --- Generic ---
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias using our Error.
pub type Result<T> = std::result::Result<T, Error>;

/// A resource quota was exhausted.
///
/// Carries everything a caller needs to recover: which resource, which
/// window tripped, how far over it is, and how long to wait before the
/// window rolls over.
#[derive(Debug, Clone, Error)]
#[error(
    "too many requests to {resource_type}: {current_usage}/{limit} per {window}, retry after {retry_after_secs:.0}s"
)]
pub struct RateLimitError {
    /// The resource class that was throttled.
    pub resource_type: String,
    /// Which sliding window was exceeded.
    pub window: LimitWindow,
    /// Requests currently counted in that window.
    pub current_usage: u32,
    /// The window's capacity.
    pub limit: u32,
    /// Seconds until the window rolls over.
    pub retry_after_secs: f64,
}

/// Errors from the execution guard.
#[derive(Debug, Error)]
pub enum GuardError {
    #[error("invalid guard policy: {0}")]
    InvalidPolicy(String),

    #[error("retries exhausted for {operation} after {attempts} attempts: {source}")]
    RetriesExhausted {
        operation: String,
        attempts: u32,
        source: RateLimitError,
    },
}

/// Errors from the telemetry subsystem.
#[derive(Debug, Error)]
pub enum TelemetryError {
    #[error("transmission failed: {0}")]
    TransmissionFailed(String),

    #[error("relay not configured: no webhook endpoint set")]
    NotConfigured,

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}
