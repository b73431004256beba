//! The execution guard — an explicit call interceptor.
//!
//! Wraps any operation with quota verification, bounded retry with
//! exponential backoff, call-burst detection, session-scoped content
//! presentation, and after-the-fact metric recording. The wrapped
//! operation's own errors are recorded and re-raised unchanged; the guard
//! never masks them.

use chrono::Utc;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error};
use wardline_config::{ExhaustPolicy, GuardConfig};
use wardline_core::clock::Clock;
use wardline_core::error::{GuardError, RateLimitError};
use wardline_core::record::{
    ContentOpportunityRecord, ErrorRecord, FunctionCallRecord, MetricRecord,
};
use wardline_core::sink::{ContentContext, ContentPresenter, MetricSink, Priority};

use crate::guardian::QuotaGuardian;

/// The error surface of a guarded call.
#[derive(Debug, Error)]
pub enum GuardedError<E> {
    /// Quota retries exhausted; the last rate-limit rejection.
    #[error(transparent)]
    RateLimited(#[from] RateLimitError),
    /// The wrapped operation's own error, re-raised unchanged.
    #[error("{0}")]
    Operation(E),
}

/// Per-operation interception state.
#[derive(Debug)]
struct OpState {
    /// Recent invocation times inside the burst-detection window.
    call_history: VecDeque<f64>,
    /// When content was last presented for this operation.
    last_content_time: f64,
    /// Consecutive invocations flagged as part of a burst.
    consecutive_loops: u32,
    /// Whether content has been presented this session.
    session_displayed: bool,
    /// When the current session began.
    session_start: f64,
}

impl OpState {
    fn new(now: f64) -> Self {
        Self {
            call_history: VecDeque::new(),
            last_content_time: 0.0,
            consecutive_loops: 0,
            session_displayed: false,
            session_start: now,
        }
    }
}

/// Wraps operations with quota verification, retry, and metric recording.
pub struct ExecutionGuard {
    policy: GuardConfig,
    guardian: Arc<QuotaGuardian>,
    sink: Arc<dyn MetricSink>,
    presenter: Arc<dyn ContentPresenter>,
    clock: Arc<dyn Clock>,
    states: Mutex<HashMap<String, OpState>>,
}

impl ExecutionGuard {
    /// Create a guard. Fails when the policy is inconsistent.
    pub fn new(
        policy: GuardConfig,
        guardian: Arc<QuotaGuardian>,
        sink: Arc<dyn MetricSink>,
        presenter: Arc<dyn ContentPresenter>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, GuardError> {
        if policy.loop_threshold < 2 {
            return Err(GuardError::InvalidPolicy(format!(
                "loop_threshold must be at least 2, got {}",
                policy.loop_threshold
            )));
        }
        if policy.time_window_secs <= 0.0 {
            return Err(GuardError::InvalidPolicy(format!(
                "time_window_secs must be positive, got {}",
                policy.time_window_secs
            )));
        }
        if policy.content_trigger_threshold < 1 {
            return Err(GuardError::InvalidPolicy(format!(
                "content_trigger_threshold must be at least 1, got {}",
                policy.content_trigger_threshold
            )));
        }
        if policy.backoff_factor <= 0.0 {
            return Err(GuardError::InvalidPolicy(format!(
                "backoff_factor must be positive, got {}",
                policy.backoff_factor
            )));
        }
        Ok(Self {
            policy,
            guardian,
            sink,
            presenter,
            clock,
            states: Mutex::new(HashMap::new()),
        })
    }

    /// Run `thunk` under quota protection.
    ///
    /// A continuously failing quota check consumes `max_retries + 1`
    /// verification attempts before the error surfaces. The thunk itself
    /// runs at most once, and always has its outcome recorded.
    pub async fn execute<T, E, F, Fut>(
        &self,
        operation_id: &str,
        resource_type: &str,
        thunk: F,
    ) -> Result<T, GuardedError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::fmt::Display,
    {
        let mut retries: u32 = 0;
        let mut content_triggered = false;

        let (loop_detected, loop_depth) = loop {
            let now = self.clock.now_secs();

            let attempt = {
                let mut states = self.states.lock().unwrap();
                let st = states
                    .entry(operation_id.to_string())
                    .or_insert_with(|| OpState::new(now));

                // Session rollover re-arms content presentation.
                if now - st.session_start > self.policy.session_timeout_secs {
                    st.session_displayed = false;
                    st.session_start = now;
                }

                st.call_history.push_back(now);
                while let Some(&front) = st.call_history.front() {
                    if now - front > self.policy.time_window_secs {
                        st.call_history.pop_front();
                    } else {
                        break;
                    }
                }

                let detected = st.call_history.len() >= self.policy.loop_threshold;
                if detected {
                    st.consecutive_loops += 1;
                } else {
                    st.consecutive_loops = 0;
                }
                let consecutive = st.consecutive_loops;

                let show = consecutive >= self.policy.content_trigger_threshold
                    && now - st.last_content_time >= self.policy.content_cooldown_secs
                    && !st.session_displayed;
                if show {
                    st.last_content_time = now;
                    st.consecutive_loops = 0;
                    st.session_displayed = true;
                }

                (detected, st.call_history.len(), show, consecutive)
            };
            let (detected, depth, show, consecutive) = attempt;

            if show {
                content_triggered = true;
                debug!(
                    operation = operation_id,
                    depth, "Call burst crossed content trigger threshold"
                );
                self.presenter.present(ContentContext::Loop);
                self.sink
                    .record(
                        MetricRecord::ContentOpportunity(ContentOpportunityRecord {
                            function: operation_id.to_string(),
                            resource_type: resource_type.to_string(),
                            call_frequency: depth as f64 / self.policy.time_window_secs,
                            consecutive_loops: consecutive,
                            timestamp: Utc::now(),
                            machine_id: None,
                        }),
                        Priority::Normal,
                    )
                    .await;
            }

            match self.guardian.verify(operation_id, resource_type).await {
                Ok(()) => break (detected, depth),
                Err(e) => {
                    self.sink
                        .record(
                            MetricRecord::Error(ErrorRecord {
                                function: operation_id.to_string(),
                                message: e.to_string(),
                                context: "resource_verification".into(),
                                resource_type: Some(resource_type.to_string()),
                                retry_attempt: retries,
                                timestamp: Utc::now(),
                                machine_id: None,
                            }),
                            Priority::High,
                        )
                        .await;

                    // Rate-limit content, at most once per session.
                    let present_rate_limit = {
                        let mut states = self.states.lock().unwrap();
                        let st = states.get_mut(operation_id).expect("state exists");
                        if st.session_displayed {
                            false
                        } else {
                            st.session_displayed = true;
                            st.last_content_time = now;
                            true
                        }
                    };
                    if present_rate_limit {
                        self.presenter.present(ContentContext::RateLimit);
                    }

                    if retries < self.policy.max_retries {
                        let wait = self
                            .policy
                            .backoff_factor
                            .powi(retries as i32)
                            .min(e.retry_after_secs.max(0.0));
                        retries += 1;
                        debug!(
                            operation = operation_id,
                            wait_secs = wait,
                            attempt = retries,
                            max = self.policy.max_retries,
                            "Quota rejected, backing off"
                        );
                        tokio::time::sleep(Duration::from_secs_f64(wait)).await;
                    } else {
                        match self.policy.exhaust_policy {
                            ExhaustPolicy::Propagate => return Err(GuardedError::RateLimited(e)),
                            ExhaustPolicy::Abort => {
                                error!(
                                    operation = operation_id,
                                    resource = resource_type,
                                    "Quota retries exhausted, aborting per policy"
                                );
                                std::process::exit(1);
                            }
                        }
                    }
                }
            }
        };

        // Execution. The outcome is always recorded, then returned as-is.
        let start = self.clock.now_secs();
        let outcome = thunk().await;
        let elapsed = (self.clock.now_secs() - start).max(0.0);

        let (success, error_text) = match &outcome {
            Ok(_) => (true, None),
            Err(e) => (false, Some(e.to_string())),
        };
        self.sink
            .record(
                MetricRecord::FunctionCall(FunctionCallRecord {
                    function: operation_id.to_string(),
                    resource_type: resource_type.to_string(),
                    execution_time_secs: elapsed,
                    success,
                    error: error_text,
                    in_loop: loop_detected,
                    loop_depth,
                    content_triggered,
                    retry_count: (retries > 0).then_some(retries),
                    timestamp: Utc::now(),
                    machine_id: None,
                }),
                Priority::Normal,
            )
            .await;

        outcome.map_err(GuardedError::Operation)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex as StdMutex;
    use wardline_config::{LimitPair, QuotaConfig};
    use wardline_core::clock::ManualClock;
    use wardline_core::record::MetricKind;

    #[derive(Default)]
    struct RecordingSink {
        records: StdMutex<Vec<(MetricRecord, Priority)>>,
    }

    #[async_trait]
    impl MetricSink for RecordingSink {
        async fn record(&self, record: MetricRecord, priority: Priority) {
            self.records.lock().unwrap().push((record, priority));
        }
    }

    impl RecordingSink {
        fn count(&self, kind: MetricKind) -> usize {
            self.records
                .lock()
                .unwrap()
                .iter()
                .filter(|(r, _)| r.kind() == kind)
                .count()
        }

        fn function_calls(&self) -> Vec<FunctionCallRecord> {
            self.records
                .lock()
                .unwrap()
                .iter()
                .filter_map(|(r, _)| match r {
                    MetricRecord::FunctionCall(f) => Some(f.clone()),
                    _ => None,
                })
                .collect()
        }
    }

    #[derive(Default)]
    struct RecordingPresenter {
        contexts: StdMutex<Vec<ContentContext>>,
    }

    impl ContentPresenter for RecordingPresenter {
        fn present(&self, context: ContentContext) {
            self.contexts.lock().unwrap().push(context);
        }
    }

    struct Fixture {
        guard: ExecutionGuard,
        sink: Arc<RecordingSink>,
        presenter: Arc<RecordingPresenter>,
        clock: Arc<ManualClock>,
    }

    fn fixture(policy: GuardConfig, per_minute: u32) -> Fixture {
        // Start well past epoch zero so cooldown comparisons behave like
        // real wall-clock time.
        let clock = Arc::new(ManualClock::starting_at(10_000.0));
        let sink = Arc::new(RecordingSink::default());
        let presenter = Arc::new(RecordingPresenter::default());
        let mut quota = QuotaConfig::default();
        quota.overrides.insert(
            "res".into(),
            LimitPair {
                per_minute,
                per_hour: 1_000_000,
            },
        );
        let guardian = Arc::new(QuotaGuardian::new(
            quota,
            sink.clone() as Arc<dyn MetricSink>,
            clock.clone() as Arc<dyn Clock>,
        ));
        let guard = ExecutionGuard::new(
            policy,
            guardian,
            sink.clone() as Arc<dyn MetricSink>,
            presenter.clone() as Arc<dyn ContentPresenter>,
            clock.clone() as Arc<dyn Clock>,
        )
        .unwrap();
        Fixture {
            guard,
            sink,
            presenter,
            clock,
        }
    }

    fn ok_thunk() -> impl Future<Output = Result<u32, std::io::Error>> {
        async { Ok(42) }
    }

    #[tokio::test]
    async fn successful_call_records_metric() {
        let fx = fixture(GuardConfig::default(), 100);
        let value = fx.guard.execute("op", "res", ok_thunk).await.unwrap();
        assert_eq!(value, 42);

        let calls = fx.sink.function_calls();
        assert_eq!(calls.len(), 1);
        assert!(calls[0].success);
        assert!(calls[0].error.is_none());
        assert!(!calls[0].in_loop);
        assert_eq!(calls[0].retry_count, None);
    }

    #[tokio::test]
    async fn operation_error_recorded_and_reraised() {
        let fx = fixture(GuardConfig::default(), 100);
        let result: Result<u32, _> = fx
            .guard
            .execute("op", "res", || async {
                Err::<u32, _>(std::io::Error::other("upstream boom"))
            })
            .await;
        match result {
            Err(GuardedError::Operation(e)) => assert!(e.to_string().contains("upstream boom")),
            other => panic!("expected operation error, got {other:?}"),
        }

        let calls = fx.sink.function_calls();
        assert_eq!(calls.len(), 1);
        assert!(!calls[0].success);
        assert_eq!(calls[0].error.as_deref(), Some("upstream boom"));
    }

    #[tokio::test(start_paused = true)]
    async fn retry_bound_is_max_retries_plus_one() {
        // per_minute = 0: every verification fails. max_retries = 2 means
        // exactly 3 attempts, each recording an error metric.
        let policy = GuardConfig {
            max_retries: 2,
            ..GuardConfig::default()
        };
        let fx = fixture(policy, 0);
        let result = fx.guard.execute("op", "res", ok_thunk).await;
        assert!(matches!(result, Err(GuardedError::RateLimited(_))));
        assert_eq!(fx.sink.count(MetricKind::Error), 3);
        // The thunk never ran, so no function-call metric
        assert_eq!(fx.sink.count(MetricKind::FunctionCall), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn zero_retries_fails_on_first_rejection() {
        let policy = GuardConfig {
            max_retries: 0,
            ..GuardConfig::default()
        };
        let fx = fixture(policy, 0);
        let result = fx.guard.execute("op", "res", ok_thunk).await;
        assert!(matches!(result, Err(GuardedError::RateLimited(_))));
        assert_eq!(fx.sink.count(MetricKind::Error), 1);
    }

    #[tokio::test]
    async fn loop_detection_flags_burst_and_recovers() {
        // loop_threshold=3, time_window=5: calls at t=0,1,2 flag the 3rd;
        // a 4th call at t=20 is outside the window and not flagged.
        let policy = GuardConfig {
            loop_threshold: 3,
            time_window_secs: 5.0,
            content_trigger_threshold: 100, // keep content out of this test
            ..GuardConfig::default()
        };
        let fx = fixture(policy, 1000);

        for _ in 0..3 {
            fx.guard.execute("op", "res", ok_thunk).await.unwrap();
            fx.clock.advance(1.0);
        }
        fx.clock.set(10_020.0);
        fx.guard.execute("op", "res", ok_thunk).await.unwrap();

        let calls = fx.sink.function_calls();
        assert_eq!(calls.len(), 4);
        assert!(!calls[0].in_loop);
        assert!(!calls[1].in_loop);
        assert!(calls[2].in_loop);
        assert_eq!(calls[2].loop_depth, 3);
        assert!(!calls[3].in_loop);
    }

    #[tokio::test]
    async fn content_triggers_once_per_session() {
        let policy = GuardConfig {
            loop_threshold: 2,
            time_window_secs: 60.0,
            content_trigger_threshold: 1,
            content_cooldown_secs: 0.0,
            session_timeout_secs: 1800.0,
            ..GuardConfig::default()
        };
        let fx = fixture(policy, 1000);

        for _ in 0..6 {
            fx.guard.execute("op", "res", ok_thunk).await.unwrap();
            fx.clock.advance(1.0);
        }
        let shown = fx.presenter.contexts.lock().unwrap().clone();
        assert_eq!(shown, vec![ContentContext::Loop]);
        assert_eq!(fx.sink.count(MetricKind::ContentOpportunity), 1);

        // Session expires; a fresh burst triggers again
        fx.clock.advance(2000.0);
        for _ in 0..4 {
            fx.guard.execute("op", "res", ok_thunk).await.unwrap();
            fx.clock.advance(1.0);
        }
        assert_eq!(fx.presenter.contexts.lock().unwrap().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn rate_limit_presents_content_once() {
        let policy = GuardConfig {
            max_retries: 2,
            ..GuardConfig::default()
        };
        let fx = fixture(policy, 0);
        let _ = fx.guard.execute("op", "res", ok_thunk).await;
        let shown = fx.presenter.contexts.lock().unwrap().clone();
        // Three rejections, one presentation
        assert_eq!(shown, vec![ContentContext::RateLimit]);
    }

    #[tokio::test(start_paused = true)]
    async fn retry_count_lands_in_function_metric() {
        // First call consumes the single slot; second call needs one retry
        // that succeeds once the minute rolls over.
        let policy = GuardConfig {
            max_retries: 2,
            backoff_factor: 70.0,
            ..GuardConfig::default()
        };
        let fx = fixture(policy, 1);
        fx.guard.execute("op", "res", ok_thunk).await.unwrap();

        // The quota windows follow the manual clock while tokio's paused
        // clock auto-advances through the backoff sleeps. Roll the window
        // over mid-backoff so the final retry attempt succeeds.
        let quota_clock = fx.clock.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(5)).await;
            quota_clock.advance(61.0);
        });
        fx.guard.execute("op", "res", ok_thunk).await.unwrap();

        let calls = fx.sink.function_calls();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].retry_count, None);
        assert_eq!(calls[1].retry_count, Some(2));
    }

    #[test]
    fn invalid_policy_rejected() {
        let clock = Arc::new(ManualClock::starting_at(0.0));
        let sink: Arc<dyn MetricSink> = Arc::new(wardline_core::sink::NullSink);
        let guardian = Arc::new(QuotaGuardian::new(
            QuotaConfig::default(),
            sink.clone(),
            clock.clone() as Arc<dyn Clock>,
        ));
        let bad = GuardConfig {
            loop_threshold: 1,
            ..GuardConfig::default()
        };
        let result = ExecutionGuard::new(
            bad,
            guardian,
            sink,
            Arc::new(wardline_core::sink::NullPresenter),
            clock as Arc<dyn Clock>,
        );
        assert!(matches!(result, Err(GuardError::InvalidPolicy(_))));
    }
}
