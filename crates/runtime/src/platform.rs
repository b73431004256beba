//! The application context.
//!
//! `Platform` owns every subsystem — guardian, guard, collector, relay,
//! monitor, background tasks — and wires them together through the core
//! trait seams. Hosts construct exactly one and share it; there is no
//! global state anywhere in the workspace.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};
use wardline_config::{PlatformConfig, SyncState};
use wardline_core::clock::{Clock, SystemClock};
use wardline_core::error::{Error, Result};
use wardline_core::record::MetricRecord;
use wardline_core::sink::{ContentContext, ContentPresenter, EnvironmentProbe, MetricSink, Priority};
use wardline_limiter::{ExecutionGuard, GuardedError, LimitStatus, QuotaGuardian};
use wardline_telemetry::relay::{PendingCounts, SyncTrigger, TelemetryRelay};
use wardline_telemetry::transport::{HttpTransport, Transport};
use wardline_telemetry::{HealthMonitor, HealthReport, MetricsCollector, TaskSupervisor};

use crate::presenter::LogPresenter;
use crate::probe::HostProbe;

/// Point-in-time view of the whole subsystem.
#[derive(Debug, Clone, Serialize)]
pub struct PlatformStatus {
    pub initialized_at: DateTime<Utc>,
    pub health: HealthReport,
    pub telemetry_backlog: PendingCounts,
}

/// The assembled quota and telemetry subsystem.
pub struct Platform {
    initialized_at: DateTime<Utc>,
    guardian: Arc<QuotaGuardian>,
    guard: ExecutionGuard,
    collector: Arc<MetricsCollector>,
    relay: Arc<TelemetryRelay>,
    monitor: Arc<HealthMonitor>,
    supervisor: TaskSupervisor,
}

impl Platform {
    /// Assemble with production defaults: real clock, HTTP transport,
    /// persisted identity, log-based presentation.
    ///
    /// Must run inside a tokio runtime; the periodic background tasks are
    /// spawned here.
    pub async fn init(config: PlatformConfig) -> Result<Self> {
        let transport = Arc::new(HttpTransport::new(
            config.relay.request_timeout_secs,
            config.relay.signing_secret.clone(),
        )?);
        Self::assemble(
            config,
            transport,
            Arc::new(HostProbe::new()),
            Arc::new(LogPresenter),
            Arc::new(SystemClock),
            Some(SyncState::default_path()),
        )
        .await
    }

    /// Assemble from explicit parts. Tests swap in stub transports, manual
    /// clocks, and fixed identities through this entry point.
    pub async fn assemble(
        config: PlatformConfig,
        transport: Arc<dyn Transport>,
        probe: Arc<dyn EnvironmentProbe>,
        presenter: Arc<dyn ContentPresenter>,
        clock: Arc<dyn Clock>,
        state_path: Option<PathBuf>,
    ) -> Result<Self> {
        config.validate().map_err(|e| Error::Config {
            message: e.to_string(),
        })?;

        let machine_id = probe.machine_id();
        let relay = TelemetryRelay::new(
            config.relay.clone(),
            transport,
            probe,
            clock.clone(),
            state_path,
        );
        let collector = Arc::new(MetricsCollector::new(
            config.relay.buffer_size,
            machine_id,
            relay.clone(),
        ));
        let guardian = Arc::new(QuotaGuardian::new(
            config.quota.clone(),
            collector.clone() as Arc<dyn MetricSink>,
            clock.clone(),
        ));
        let guard = ExecutionGuard::new(
            config.guard.clone(),
            guardian.clone(),
            collector.clone() as Arc<dyn MetricSink>,
            presenter.clone(),
            clock.clone(),
        )?;
        let monitor = Arc::new(HealthMonitor::new(
            config.health.clone(),
            guardian.clone(),
            collector.clone(),
            clock,
        ));

        let supervisor = TaskSupervisor::new();
        supervisor.start_periodic_flush(
            relay.clone(),
            Duration::from_secs(config.relay.sync_interval_secs),
        );
        supervisor.start_health_checks(
            monitor.clone(),
            Duration::from_secs(config.health.check_interval_secs),
        );

        presenter.present(ContentContext::Startup);

        let platform = Self {
            initialized_at: Utc::now(),
            guardian,
            guard,
            collector,
            relay,
            monitor,
            supervisor,
        };
        platform
            .collector
            .record(MetricRecord::from_message("initialization"), Priority::Normal)
            .await;
        info!("Wardline platform initialized");
        Ok(platform)
    }

    /// Set or replace the telemetry endpoint at runtime.
    pub fn setup(&self, webhook_url: impl Into<String>) {
        self.relay.configure(webhook_url);
        info!("Telemetry endpoint configured");
    }

    /// Run an operation under quota protection.
    pub async fn execute<T, E, F, Fut>(
        &self,
        operation_id: &str,
        resource_type: &str,
        thunk: F,
    ) -> std::result::Result<T, GuardedError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
        E: std::fmt::Display,
    {
        self.guard.execute(operation_id, resource_type, thunk).await
    }

    /// Current quota detail for one resource class.
    pub fn limit_status(&self, resource_type: &str) -> LimitStatus {
        self.guardian.limit_status(resource_type)
    }

    /// Aggregated status: health report plus telemetry backlog.
    pub fn status(&self) -> PlatformStatus {
        PlatformStatus {
            initialized_at: self.initialized_at,
            health: self.monitor.report(),
            telemetry_backlog: self.relay.pending(),
        }
    }

    pub fn guardian(&self) -> &Arc<QuotaGuardian> {
        &self.guardian
    }

    pub fn collector(&self) -> &Arc<MetricsCollector> {
        &self.collector
    }

    pub fn relay(&self) -> &Arc<TelemetryRelay> {
        &self.relay
    }

    pub fn monitor(&self) -> &Arc<HealthMonitor> {
        &self.monitor
    }

    /// Stop background tasks and make a final best-effort flush.
    pub async fn shutdown(&self) {
        self.supervisor.shutdown().await;
        self.collector.flush();
        match self.relay.dispatch(SyncTrigger::Manual).await {
            Ok(_) => {}
            Err(e) => debug!(error = %e, "Final telemetry flush skipped"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::result::Result;
    use std::sync::Mutex;
    use wardline_config::LimitPair;
    use wardline_core::clock::ManualClock;
    use wardline_core::error::TelemetryError;
    use wardline_core::sink::{NullPresenter, StaticProbe};
    use wardline_telemetry::monitor::HealthStatus;

    struct StubTransport {
        payloads: Mutex<Vec<serde_json::Value>>,
    }

    impl StubTransport {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                payloads: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl Transport for StubTransport {
        async fn send(
            &self,
            _url: &str,
            payload: &serde_json::Value,
        ) -> Result<(), TelemetryError> {
            self.payloads.lock().unwrap().push(payload.clone());
            Ok(())
        }
    }

    fn test_config() -> PlatformConfig {
        let mut config = PlatformConfig::default();
        config.relay.webhook_url = Some("https://hooks.invalid/ingest".into());
        config.guard.max_retries = 0;
        config
    }

    async fn platform_with(
        config: PlatformConfig,
        transport: Arc<StubTransport>,
    ) -> Platform {
        Platform::assemble(
            config,
            transport as Arc<dyn Transport>,
            Arc::new(StaticProbe::new("machine-1")),
            Arc::new(NullPresenter),
            Arc::new(ManualClock::starting_at(10_000.0)) as Arc<dyn Clock>,
            None,
        )
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn guarded_call_flows_into_telemetry() {
        let transport = StubTransport::new();
        let platform = platform_with(test_config(), transport.clone()).await;

        let value: u32 = platform
            .execute("fetch_quote", "default", || async { Ok::<_, std::io::Error>(7) })
            .await
            .unwrap();
        assert_eq!(value, 7);

        platform.shutdown().await;

        let payloads = transport.payloads.lock().unwrap();
        assert_eq!(payloads.len(), 1);
        let calls = payloads[0]["analytics_data"]["function_calls"]
            .as_array()
            .unwrap();
        // The initialization record plus the guarded call
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[1]["function"], "fetch_quote");
        assert_eq!(calls[1]["machine_id"], "machine-1");
    }

    #[tokio::test]
    async fn quota_rejection_surfaces_to_the_caller() {
        let mut config = test_config();
        config.quota.overrides.insert(
            "blocked".into(),
            LimitPair {
                per_minute: 0,
                per_hour: 0,
            },
        );
        let platform = platform_with(config, StubTransport::new()).await;

        let result: Result<u32, _> = platform
            .execute("op", "blocked", || async { Ok::<_, std::io::Error>(1) })
            .await;
        assert!(matches!(result, Err(GuardedError::RateLimited(_))));
        platform.shutdown().await;
    }

    #[tokio::test]
    async fn setup_enables_a_disabled_relay() {
        let mut config = test_config();
        config.relay.webhook_url = None;
        let transport = StubTransport::new();
        let platform = platform_with(config, transport.clone()).await;

        platform.setup("https://hooks.invalid/ingest");
        platform.shutdown().await;
        assert_eq!(transport.payloads.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn status_reports_health_and_backlog() {
        let platform = platform_with(test_config(), StubTransport::new()).await;
        let status = platform.status();
        assert_eq!(status.health.status, HealthStatus::Healthy);
        // The initialization record is still buffered in the collector,
        // not yet in the relay
        assert_eq!(status.telemetry_backlog.total(), 0);
        platform.shutdown().await;
    }

    #[tokio::test]
    async fn invalid_config_is_rejected() {
        let mut config = test_config();
        config.guard.loop_threshold = 1;
        let result = Platform::assemble(
            config,
            StubTransport::new() as Arc<dyn Transport>,
            Arc::new(StaticProbe::new("machine-1")),
            Arc::new(NullPresenter),
            Arc::new(ManualClock::starting_at(0.0)) as Arc<dyn Clock>,
            None,
        )
        .await;
        assert!(matches!(result, Err(Error::Config { .. })));
    }

    #[tokio::test]
    async fn limit_status_exposes_quota_detail() {
        let platform = platform_with(test_config(), StubTransport::new()).await;
        let _: u32 = platform
            .execute("op", "default", || async { Ok::<_, std::io::Error>(1) })
            .await
            .unwrap();
        let status = platform.limit_status("default");
        assert_eq!(status.minute.usage, 1);
        assert_eq!(status.minute.limit, 60);
        platform.shutdown().await;
    }
}
