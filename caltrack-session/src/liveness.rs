//! Backend/frontend liveness monitoring
//!
//! While a session is active the monitor probes the backend health endpoint
//! and the frontend origin on a fixed interval. A failed check is tolerated
//! until the time since the last fully successful check exceeds the
//! staleness threshold, at which point the stale callback fires.

use async_trait::async_trait;
use caltrack_core::{with_timeout, CaltrackError, CaltrackResult, Clock, ErrorContext, LivenessConfig};
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, warn};

/// Reachability check against a single target
#[async_trait]
pub trait Probe: Send + Sync {
    /// Human-readable target, used in logs
    fn target(&self) -> &str;

    async fn probe(&self) -> CaltrackResult<()>;
}

/// `HEAD` request that succeeds on any 2xx status
#[derive(Debug, Clone)]
pub struct HttpProbe {
    client: reqwest::Client,
    url: String,
    timeout_ms: u64,
}

impl HttpProbe {
    pub fn new(url: impl Into<String>, timeout_ms: u64) -> CaltrackResult<Self> {
        let url = url.into();
        let parsed = url::Url::parse(&url).map_err(|e| CaltrackError::Config {
            message: format!("Invalid probe URL '{}': {}", url, e),
            source: Some(Box::new(e)),
            context: ErrorContext::new("liveness")
                .with_operation("create_probe")
                .with_metadata("url", &url),
        })?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(CaltrackError::Config {
                message: format!("Probe URL must use http or https: {}", url),
                source: None,
                context: ErrorContext::new("liveness").with_operation("create_probe"),
            });
        }

        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| CaltrackError::Network {
                message: format!("Failed to create probe client: {}", e),
                source: Some(Box::new(e)),
                context: ErrorContext::new("liveness").with_operation("create_client"),
            })?;

        Ok(Self::with_client(client, parsed, timeout_ms))
    }

    pub fn with_client(client: reqwest::Client, url: impl Into<String>, timeout_ms: u64) -> Self {
        Self {
            client,
            url: url.into(),
            timeout_ms,
        }
    }
}

#[async_trait]
impl Probe for HttpProbe {
    fn target(&self) -> &str {
        &self.url
    }

    async fn probe(&self) -> CaltrackResult<()> {
        let response = with_timeout(
            self.client.head(&self.url).send(),
            self.timeout_ms,
            "liveness_probe",
        )
        .await?
        .map_err(|e| CaltrackError::Network {
            message: format!("Probe to {} failed: {}", self.url, e),
            source: Some(Box::new(e)),
            context: ErrorContext::new("liveness")
                .with_operation("probe")
                .with_metadata("url", &self.url),
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(CaltrackError::Network {
                message: format!("Probe to {} returned HTTP {}", self.url, status.as_u16()),
                source: None,
                context: ErrorContext::new("liveness")
                    .with_operation("probe")
                    .with_metadata("url", &self.url)
                    .with_metadata("status", &status.as_u16().to_string()),
            });
        }

        Ok(())
    }
}

/// Result of one check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckOutcome {
    /// Both probes answered
    Healthy,
    /// A probe failed but the last success is recent enough
    Degraded { elapsed_ms: i64 },
    /// A probe failed and the last success is older than the threshold
    Stale { elapsed_ms: i64 },
}

/// Timestamp of the most recent successful check
#[derive(Debug, Default)]
pub struct LivenessState {
    last_successful_check_at: AtomicI64,
}

impl LivenessState {
    pub fn last_successful_check_at(&self) -> i64 {
        self.last_successful_check_at.load(Ordering::SeqCst)
    }

    /// Never moves the timestamp backwards, so a slow check that started
    /// earlier cannot overwrite a newer success.
    pub fn record_success(&self, at: i64) {
        self.last_successful_check_at.fetch_max(at, Ordering::SeqCst);
    }

    pub fn reset(&self, at: i64) {
        self.last_successful_check_at.store(at, Ordering::SeqCst);
    }
}

pub struct LivenessMonitor {
    backend: Arc<dyn Probe>,
    frontend: Arc<dyn Probe>,
    clock: Arc<dyn Clock>,
    poll_interval: Duration,
    staleness_threshold_ms: i64,
    state: LivenessState,
}

impl LivenessMonitor {
    pub fn new(
        config: &LivenessConfig,
        backend: Arc<dyn Probe>,
        frontend: Arc<dyn Probe>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let state = LivenessState::default();
        state.reset(clock.now_millis());

        Self {
            backend,
            frontend,
            clock,
            poll_interval: Duration::from_millis(config.poll_interval_ms),
            staleness_threshold_ms: config.staleness_threshold_ms,
            state,
        }
    }

    /// Monitor probing the configured URLs over HTTP
    pub fn from_config(config: &LivenessConfig, clock: Arc<dyn Clock>) -> CaltrackResult<Self> {
        let backend = HttpProbe::new(&config.backend_health_url, config.probe_timeout_ms)?;
        let frontend = HttpProbe::new(&config.frontend_url, config.probe_timeout_ms)?;
        Ok(Self::new(config, Arc::new(backend), Arc::new(frontend), clock))
    }

    pub fn state(&self) -> &LivenessState {
        &self.state
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    /// Run both probes once and classify the result
    pub async fn check(&self) -> CheckOutcome {
        let (backend, frontend) = futures::join!(self.backend.probe(), self.frontend.probe());

        if backend.is_ok() && frontend.is_ok() {
            self.state.record_success(self.clock.now_millis());
            debug!("Liveness check succeeded");
            return CheckOutcome::Healthy;
        }

        for (probe, result) in [(&self.backend, &backend), (&self.frontend, &frontend)] {
            if let Err(e) = result {
                warn!(target_url = %probe.target(), error = %e, "Liveness probe failed");
            }
        }

        let elapsed_ms = self.clock.now_millis() - self.state.last_successful_check_at();
        if elapsed_ms > self.staleness_threshold_ms {
            warn!(
                elapsed_ms,
                threshold_ms = self.staleness_threshold_ms,
                "No successful liveness check within threshold"
            );
            CheckOutcome::Stale { elapsed_ms }
        } else {
            CheckOutcome::Degraded { elapsed_ms }
        }
    }

    /// Start polling. `on_stale` runs whenever a check comes back stale while
    /// the returned handle is still active.
    ///
    /// Each tick spawns its own check, so a slow probe never delays the next
    /// one and checks may overlap.
    pub fn spawn<F>(self: &Arc<Self>, on_stale: F) -> MonitorHandle
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.state.reset(self.clock.now_millis());

        let active = Arc::new(AtomicBool::new(true));
        let on_stale = Arc::new(on_stale);
        let monitor = Arc::clone(self);
        let loop_active = Arc::clone(&active);

        let task = tokio::spawn(async move {
            let period = monitor.poll_interval;
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                ticker.tick().await;

                let monitor = Arc::clone(&monitor);
                let on_stale = Arc::clone(&on_stale);
                let active = Arc::clone(&loop_active);
                tokio::spawn(async move {
                    if let CheckOutcome::Stale { .. } = monitor.check().await {
                        if active.load(Ordering::SeqCst) {
                            on_stale();
                        }
                    }
                });
            }
        });

        debug!(interval_ms = self.poll_interval.as_millis() as u64, "Liveness monitor started");

        MonitorHandle { task, active }
    }
}

/// Running monitor; dropping it stops polling
#[derive(Debug)]
pub struct MonitorHandle {
    task: JoinHandle<()>,
    active: Arc<AtomicBool>,
}

impl MonitorHandle {
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst) && !self.task.is_finished()
    }

    /// Cancel the timer; in-flight checks finish but no longer report staleness
    pub fn stop(&self) {
        self.active.store(false, Ordering::SeqCst);
        self.task.abort();
    }
}

impl Drop for MonitorHandle {
    fn drop(&mut self) {
        self.stop();
    }
}


#[cfg(test)]
mod tests {
    use super::test_probes::SwitchProbe;
    use super::*;
    use caltrack_core::ManualClock;
    use std::sync::atomic::AtomicUsize;

    fn monitor(
        backend: Arc<SwitchProbe>,
        frontend: Arc<SwitchProbe>,
        clock: Arc<ManualClock>,
    ) -> LivenessMonitor {
        LivenessMonitor::new(&LivenessConfig::default(), backend, frontend, clock)
    }

    #[tokio::test]
    async fn success_updates_timestamp() {
        let clock = Arc::new(ManualClock::new(0));
        let monitor = monitor(SwitchProbe::new(true), SwitchProbe::new(true), clock.clone());

        clock.advance(5_000);
        assert_eq!(monitor.check().await, CheckOutcome::Healthy);
        assert_eq!(monitor.state().last_successful_check_at(), 5_000);
    }

    #[tokio::test]
    async fn failures_within_threshold_are_degraded() {
        let clock = Arc::new(ManualClock::new(0));
        let backend = SwitchProbe::new(false);
        let monitor = monitor(backend.clone(), SwitchProbe::new(true), clock.clone());

        for _ in 0..2 {
            clock.advance(5_000);
            assert!(matches!(monitor.check().await, CheckOutcome::Degraded { .. }));
        }
        assert_eq!(backend.calls(), 2);
        assert_eq!(monitor.state().last_successful_check_at(), 0);
    }

    #[tokio::test]
    async fn either_probe_failing_counts_as_failure() {
        let clock = Arc::new(ManualClock::new(0));
        let monitor = monitor(SwitchProbe::new(true), SwitchProbe::new(false), clock.clone());

        clock.advance(10_001);
        assert_eq!(
            monitor.check().await,
            CheckOutcome::Stale { elapsed_ms: 10_001 }
        );
    }

    #[tokio::test]
    async fn recovery_resets_the_window() {
        let clock = Arc::new(ManualClock::new(0));
        let backend = SwitchProbe::new(false);
        let monitor = monitor(backend.clone(), SwitchProbe::new(true), clock.clone());

        clock.advance(9_000);
        assert!(matches!(monitor.check().await, CheckOutcome::Degraded { .. }));

        backend.set_healthy(true);
        assert_eq!(monitor.check().await, CheckOutcome::Healthy);

        backend.set_healthy(false);
        clock.advance(9_000);
        assert_eq!(
            monitor.check().await,
            CheckOutcome::Degraded { elapsed_ms: 9_000 }
        );
    }

    #[test]
    fn http_probe_requires_an_http_url() {
        assert!(HttpProbe::new("http://localhost:8080/api/health", 1_000).is_ok());
        assert!(matches!(
            HttpProbe::new("localhost:8080", 1_000),
            Err(CaltrackError::Config { .. })
        ));
        assert!(matches!(
            HttpProbe::new("not a url", 1_000),
            Err(CaltrackError::Config { .. })
        ));
    }

    #[test]
    fn older_success_never_overwrites_newer_one() {
        let state = LivenessState::default();
        state.record_success(2_000);
        state.record_success(1_000);
        assert_eq!(state.last_successful_check_at(), 2_000);
    }

    #[tokio::test(start_paused = true)]
    async fn spawned_monitor_reports_stale_and_stops() {
        let clock = Arc::new(ManualClock::new(0));
        let monitor = Arc::new(monitor(
            SwitchProbe::new(false),
            SwitchProbe::new(true),
            clock.clone(),
        ));

        let stale_calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&stale_calls);
        let handle = monitor.spawn(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        assert!(handle.is_active());

        clock.advance(20_000);
        tokio::time::sleep(Duration::from_millis(5_100)).await;
        tokio::task::yield_now().await;
        assert!(stale_calls.load(Ordering::SeqCst) >= 1);

        handle.stop();
        let seen = stale_calls.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(20_000)).await;
        assert_eq!(stale_calls.load(Ordering::SeqCst), seen);
        assert!(!handle.is_active());
    }
}
