//! Metric record model — the tagged union of everything the collector
//! buffers and the relay transmits.
//!
//! Records are created the moment an operation completes or a quota check
//! fires, owned by the collector until flushed, and serialized as
//! snake_case-tagged JSON on the wire.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ── Kinds ─────────────────────────────────────────────────────────────────

/// The kind of a metric record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricKind {
    /// A guarded operation finished (successfully or not).
    FunctionCall,
    /// A quota check occurred.
    RateLimit,
    /// An outbound API request was made by the host application.
    ApiRequest,
    /// An error was recorded (always flushed immediately).
    Error,
    /// A call burst was detected and content was (or could be) presented.
    ContentOpportunity,
}

impl std::fmt::Display for MetricKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::FunctionCall => write!(f, "function_call"),
            Self::RateLimit => write!(f, "rate_limit"),
            Self::ApiRequest => write!(f, "api_request"),
            Self::Error => write!(f, "error"),
            Self::ContentOpportunity => write!(f, "content_opportunity"),
        }
    }
}

/// Which sliding window a quota figure refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LimitWindow {
    /// The 60-second window.
    Minute,
    /// The 3600-second window.
    Hour,
}

impl LimitWindow {
    /// Window length in seconds.
    pub fn length_secs(&self) -> f64 {
        match self {
            Self::Minute => 60.0,
            Self::Hour => 3600.0,
        }
    }
}

impl std::fmt::Display for LimitWindow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Minute => write!(f, "minute"),
            Self::Hour => write!(f, "hour"),
        }
    }
}

// ── Records ───────────────────────────────────────────────────────────────

/// A guarded operation completed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionCallRecord {
    /// Operation identifier (the guarded function's name).
    pub function: String,
    /// Resource class the operation draws from.
    pub resource_type: String,
    /// Wall-clock execution time in seconds.
    pub execution_time_secs: f64,
    /// Whether the wrapped operation succeeded.
    pub success: bool,
    /// Error text when it did not.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Whether a call burst was active at invocation time.
    pub in_loop: bool,
    /// Calls inside the burst-detection window at invocation time.
    pub loop_depth: usize,
    /// Whether this invocation triggered a content presentation.
    pub content_triggered: bool,
    /// Quota retries consumed before the operation ran (None if none).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_count: Option<u32>,
    /// When the record was created.
    pub timestamp: DateTime<Utc>,
    /// Machine identity reference (filled by the collector).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub machine_id: Option<String>,
}

/// A quota check occurred.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitRecord {
    /// Resource class that was checked.
    pub resource_type: String,
    /// Which window the reported figures refer to.
    pub window: LimitWindow,
    /// That window's capacity.
    pub limit_value: u32,
    /// Requests counted in that window.
    pub current_usage: u32,
    /// Whether the check rejected the request.
    pub is_exceeded: bool,
    /// current_usage as a percentage of limit_value.
    pub usage_percentage: f64,
    /// When the record was created.
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub machine_id: Option<String>,
}

/// An outbound API request made by the host application.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiRequestRecord {
    /// Endpoint path or URL.
    pub endpoint: String,
    /// Logical source (data provider, module).
    pub source: String,
    /// HTTP method.
    pub method: String,
    /// Response status code.
    pub status_code: u16,
    /// Round-trip time in seconds.
    pub execution_time_secs: f64,
    /// Request body size in bytes.
    pub request_size: u64,
    /// Response body size in bytes.
    pub response_size: u64,
    /// When the record was created.
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub machine_id: Option<String>,
}

/// An error worth reporting immediately.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorRecord {
    /// Operation the error occurred in.
    pub function: String,
    /// Error message.
    pub message: String,
    /// Where in the pipeline it happened (e.g. "resource_verification").
    pub context: String,
    /// Resource class involved, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_type: Option<String>,
    /// Retry attempt number when the error fired.
    pub retry_attempt: u32,
    /// When the record was created.
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub machine_id: Option<String>,
}

/// A call burst crossed the content-trigger threshold.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContentOpportunityRecord {
    /// Operation identifier.
    pub function: String,
    /// Resource class.
    pub resource_type: String,
    /// Calls per second inside the detection window.
    pub call_frequency: f64,
    /// Consecutive loop detections before the trigger.
    pub consecutive_loops: u32,
    /// When the record was created.
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub machine_id: Option<String>,
}

// ── The union ─────────────────────────────────────────────────────────────

/// A metric record awaiting transmission.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MetricRecord {
    FunctionCall(FunctionCallRecord),
    RateLimit(RateLimitRecord),
    ApiRequest(ApiRequestRecord),
    Error(ErrorRecord),
    ContentOpportunity(ContentOpportunityRecord),
}

impl MetricRecord {
    /// The record's kind tag.
    pub fn kind(&self) -> MetricKind {
        match self {
            Self::FunctionCall(_) => MetricKind::FunctionCall,
            Self::RateLimit(_) => MetricKind::RateLimit,
            Self::ApiRequest(_) => MetricKind::ApiRequest,
            Self::Error(_) => MetricKind::Error,
            Self::ContentOpportunity(_) => MetricKind::ContentOpportunity,
        }
    }

    /// When the record was created.
    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            Self::FunctionCall(r) => r.timestamp,
            Self::RateLimit(r) => r.timestamp,
            Self::ApiRequest(r) => r.timestamp,
            Self::Error(r) => r.timestamp,
            Self::ContentOpportunity(r) => r.timestamp,
        }
    }

    /// Replace any embedded identity with a machine-id reference only.
    ///
    /// Privacy-minimizing: records never carry a full environment snapshot,
    /// just the opaque machine identifier.
    pub fn set_machine_id(&mut self, machine_id: &str) {
        let slot = match self {
            Self::FunctionCall(r) => &mut r.machine_id,
            Self::RateLimit(r) => &mut r.machine_id,
            Self::ApiRequest(r) => &mut r.machine_id,
            Self::Error(r) => &mut r.machine_id,
            Self::ContentOpportunity(r) => &mut r.machine_id,
        };
        *slot = Some(machine_id.to_string());
    }

    /// Coerce an arbitrary message into a single-field function record.
    ///
    /// Mirrors the relay contract: non-structured input is still accepted
    /// and lands in the function-call category.
    pub fn from_message(message: impl Into<String>) -> Self {
        Self::FunctionCall(FunctionCallRecord {
            function: message.into(),
            resource_type: "default".into(),
            execution_time_secs: 0.0,
            success: true,
            error: None,
            in_loop: false,
            loop_depth: 0,
            content_triggered: false,
            retry_count: None,
            timestamp: Utc::now(),
            machine_id: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_serializes_with_type_tag() {
        let record = MetricRecord::RateLimit(RateLimitRecord {
            resource_type: "market_data".into(),
            window: LimitWindow::Minute,
            limit_value: 60,
            current_usage: 61,
            is_exceeded: true,
            usage_percentage: 101.7,
            timestamp: Utc::now(),
            machine_id: None,
        });
        let json = serde_json::to_string(&record).unwrap();
        assert!(json.contains("\"type\":\"rate_limit\""));
        assert!(json.contains("\"window\":\"minute\""));
        assert!(!json.contains("machine_id"));
    }

    #[test]
    fn set_machine_id_fills_reference() {
        let mut record = MetricRecord::from_message("hello");
        record.set_machine_id("abc123");
        match record {
            MetricRecord::FunctionCall(r) => assert_eq!(r.machine_id.as_deref(), Some("abc123")),
            _ => panic!("expected function call record"),
        }
    }

    #[test]
    fn coerced_message_is_function_kind() {
        let record = MetricRecord::from_message("plain message");
        assert_eq!(record.kind(), MetricKind::FunctionCall);
    }

    #[test]
    fn window_lengths() {
        assert_eq!(LimitWindow::Minute.length_secs(), 60.0);
        assert_eq!(LimitWindow::Hour.length_secs(), 3600.0);
    }
}
