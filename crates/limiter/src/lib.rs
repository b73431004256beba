//! Sliding-window resource quotas and the retrying execution guard.
//!
//! [`QuotaGuardian`] tracks per-resource request budgets over two
//! independent sliding windows (60 s and 3600 s) and rejects callers with a
//! typed [`wardline_core::RateLimitError`] carrying a retry-after hint.
//! [`ExecutionGuard`] wraps arbitrary operations: it verifies quota before
//! execution, retries with exponential backoff on rejection, detects call
//! bursts, and records execution metrics afterwards.

pub mod guard;
pub mod guardian;
pub mod window;

pub use guard::{ExecutionGuard, GuardedError};
pub use guardian::{LimitStatus, QuotaGuardian, WindowStatus};
pub use window::{ResourceQuota, SlidingWindow};
