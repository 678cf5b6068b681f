//! Sampler: bounded-time reads through the host probe, plus an optional
//! background cadence that keeps the service's snapshots warm.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio::time::{interval, timeout, Duration, MissedTickBehavior};
use tracing::{debug, warn};

use crate::error::{ProbeError, Result, TelemetryError};
use crate::probe::{HostProbe, ProcessListing, RawHostSample, SharedProbe};
use crate::service::TelemetryService;

#[derive(Clone)]
pub struct Sampler {
    probe: SharedProbe,
    timeout: Duration,
}

impl Sampler {
    pub fn new(probe: SharedProbe, timeout: Duration) -> Self {
        Self { probe, timeout }
    }

    /// Memory totals and host CPU time from one read pass.
    pub async fn sample_host(&self) -> Result<RawHostSample> {
        self.blocking("host counters", |p| p.read_host()).await
    }

    pub async fn enumerate_processes(&self) -> Result<ProcessListing> {
        self.blocking("process table", |p| p.enumerate_processes())
            .await
    }

    async fn blocking<T, F>(&self, what: &'static str, read: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&dyn HostProbe) -> Result<T, ProbeError> + Send + 'static,
    {
        let probe = Arc::clone(&self.probe);
        let task = tokio::task::spawn_blocking(move || read(probe.as_ref()));
        match timeout(self.timeout, task).await {
            Ok(Ok(res)) => res.map_err(|e| {
                warn!(error = %e, "{what} read failed");
                TelemetryError::from(e)
            }),
            Ok(Err(join)) => Err(TelemetryError::SamplingUnavailable(format!(
                "{what} read aborted: {join}"
            ))),
            Err(_) => {
                warn!(timeout_ms = self.timeout.as_millis() as u64, "{what} read timed out");
                Err(TelemetryError::SamplingUnavailable(format!(
                    "{what} read timed out after {}ms",
                    self.timeout.as_millis()
                )))
            }
        }
    }
}

/// Sample host stats and the process table every `period`.
pub fn spawn_sampler(service: TelemetryService, period: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            if let Err(e) = service.refresh_stats().await {
                debug!(error = %e, "background stats pass failed");
            }
            match service.refresh_processes().await {
                Ok(v) => debug!(version = v.version(), "background process pass"),
                Err(e) => debug!(error = %e, "background process pass failed"),
            }
        }
    })
}
