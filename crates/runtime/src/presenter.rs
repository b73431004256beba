//! Default content presentation.
//!
//! Hosts with a real UI supply their own [`ContentPresenter`]; the default
//! surfaces context through structured log lines so guarded applications
//! still see why the guard intervened.

use tracing::info;
use wardline_core::sink::{ContentContext, ContentPresenter};

/// Presenter that emits a log line per context.
#[derive(Debug, Default, Clone)]
pub struct LogPresenter;

impl ContentPresenter for LogPresenter {
    fn present(&self, context: ContentContext) {
        match context {
            ContentContext::Loop => info!(
                context = %context,
                "Repeated calls detected; consider batching requests or adding a delay"
            ),
            ContentContext::RateLimit => info!(
                context = %context,
                "Rate limit reached; the operation will retry with backoff"
            ),
            ContentContext::Startup => info!(context = %context, "Wardline initialized"),
        }
    }
}
