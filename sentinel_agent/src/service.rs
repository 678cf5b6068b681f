//! TelemetryService: the façade behind `get_stats`, `get_processes` and
//! `kill_process`. Owns the estimator history, the process directory and the
//! latest host snapshot; the sampler and controller do the OS work.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::{Duration, Instant};

use tokio::sync::{oneshot, Mutex as AsyncMutex, MutexGuard as AsyncMutexGuard};
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::controller::{ProcessController, TerminationTarget};
use crate::cpu::{CpuKey, CpuUsageEstimator};
use crate::directory::{DirectoryEntry, DirectoryVersion, ProcessDirectory};
use crate::error::{Result, TelemetryError};
use crate::probe::SharedProbe;
use crate::sampler::Sampler;
use crate::types::{HostSnapshot, ProcessInfo, TerminationOutcome};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceOptions {
    /// How long a completed host snapshot is served before sampling again.
    pub stats_ttl: Duration,
    /// How long a directory version is served before enumerating again.
    pub processes_ttl: Duration,
    pub sample_timeout: Duration,
    pub kill_timeout: Duration,
    pub grace: Duration,
    pub grace_poll: Duration,
    pub top_limit: usize,
}

impl Default for ServiceOptions {
    fn default() -> Self {
        Self {
            stats_ttl: Duration::from_millis(250),
            processes_ttl: Duration::from_millis(500),
            sample_timeout: Duration::from_millis(2_000),
            kill_timeout: Duration::from_millis(5_000),
            grace: Duration::from_millis(2_000),
            grace_poll: Duration::from_millis(100),
            top_limit: 10,
        }
    }
}

struct StatsEntry {
    snapshot: HostSnapshot,
    at: Instant,
}

struct Inner {
    sampler: Sampler,
    controller: ProcessController,
    directory: ProcessDirectory,
    estimator: Mutex<CpuUsageEstimator>,
    stats: RwLock<Option<StatsEntry>>,
    // one pass of each kind in flight at a time
    host_pass: AsyncMutex<()>,
    process_pass: AsyncMutex<()>,
    options: ServiceOptions,
}

#[derive(Clone)]
pub struct TelemetryService {
    inner: Arc<Inner>,
}

impl TelemetryService {
    pub fn new(probe: SharedProbe, options: ServiceOptions) -> Self {
        let sampler = Sampler::new(Arc::clone(&probe), options.sample_timeout);
        let controller = ProcessController::new(probe, options.grace, options.grace_poll);
        Self {
            inner: Arc::new(Inner {
                sampler,
                controller,
                directory: ProcessDirectory::new(),
                estimator: Mutex::new(CpuUsageEstimator::new()),
                stats: RwLock::new(None),
                host_pass: AsyncMutex::new(()),
                process_pass: AsyncMutex::new(()),
                options,
            }),
        }
    }

    pub fn directory(&self) -> &ProcessDirectory {
        &self.inner.directory
    }

    /// Latest host snapshot. Served from the last completed pass while it is
    /// fresh, or while another caller's pass is still running.
    pub async fn get_stats(&self) -> Result<HostSnapshot> {
        if let Some(s) = self.latest_stats(Some(self.inner.options.stats_ttl)) {
            return Ok(s);
        }
        match self.inner.host_pass.try_lock() {
            Ok(guard) => self.run_host_pass(guard).await,
            Err(_) => {
                if let Some(s) = self.latest_stats(None) {
                    return Ok(s);
                }
                // cold start: nothing completed yet, wait for the running pass
                let guard = self.inner.host_pass.lock().await;
                if let Some(s) = self.latest_stats(None) {
                    return Ok(s);
                }
                self.run_host_pass(guard).await
            }
        }
    }

    /// Sample now, waiting for any pass in flight.
    pub async fn refresh_stats(&self) -> Result<HostSnapshot> {
        let guard = self.inner.host_pass.lock().await;
        self.run_host_pass(guard).await
    }

    /// Processes in enumeration order, from the current directory version.
    pub async fn get_processes(&self) -> Result<Vec<ProcessInfo>> {
        Ok(self.process_view().await?.processes())
    }

    /// Processes sorted by CPU percent, highest first, at most `limit` of them.
    pub async fn get_top_processes(&self, limit: Option<usize>) -> Result<Vec<ProcessInfo>> {
        let mut list = self.get_processes().await?;
        list.sort_by(|a, b| {
            b.cpu_usage_percent
                .partial_cmp(&a.cpu_usage_percent)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        list.truncate(limit.unwrap_or(self.inner.options.top_limit));
        Ok(list)
    }

    /// Enumerate now and publish a new directory version.
    pub async fn refresh_processes(&self) -> Result<Arc<DirectoryVersion>> {
        let guard = self.inner.process_pass.lock().await;
        self.run_process_pass(guard).await
    }

    /// Terminate `pid`, optionally requiring it to still carry `expected_name`.
    /// Returns a short human-readable confirmation.
    pub async fn kill_process(&self, pid: u32, expected_name: Option<&str>) -> Result<String> {
        let inner = &self.inner;
        if let Some(reason) = inner.controller.forbidden_reason(pid) {
            return Err(TelemetryError::ForbiddenTarget { pid, reason });
        }
        if !inner.directory.current().is_populated() {
            self.refresh_processes().await?;
        }
        let target = inner
            .controller
            .authorize(&inner.directory.current(), pid, expected_name)?;

        // The task owns the OS call; if we stop waiting it still finishes and
        // reconciles the directory. The outcome comes back before that refresh
        // so a slow enumeration never eats into the kill budget.
        let (reply, outcome) = oneshot::channel();
        let svc = self.clone();
        let mut task = tokio::spawn(async move { svc.execute_termination(target, reply).await });
        match timeout(inner.options.kill_timeout, outcome).await {
            Ok(Ok(res)) => {
                // give the reconcile a bounded head start so the next read omits the pid
                if timeout(inner.options.sample_timeout, &mut task).await.is_err() {
                    debug!(pid, "directory reconcile still running");
                }
                res.map(|outcome| outcome.describe(pid))
            }
            Ok(Err(_)) => {
                warn!(pid, "termination task ended without an outcome");
                Err(TelemetryError::TerminationTimeout { pid })
            }
            Err(_) => {
                warn!(
                    pid,
                    timeout_ms = inner.options.kill_timeout.as_millis() as u64,
                    "termination still pending; reconciling in background"
                );
                Err(TelemetryError::TerminationTimeout { pid })
            }
        }
    }

    async fn execute_termination(
        &self,
        target: TerminationTarget,
        reply: oneshot::Sender<Result<TerminationOutcome>>,
    ) {
        let pid = target.pid;
        let target = match self.inner.controller.revalidate(&target, &self.inner.directory) {
            Ok(t) => t,
            Err(e) => {
                let _ = reply.send(Err(e));
                return;
            }
        };

        let svc = self.clone();
        let result = tokio::task::spawn_blocking(move || svc.inner.controller.terminate(&target))
            .await
            .unwrap_or_else(|join| {
                warn!(pid, error = %join, "termination call aborted");
                Err(TelemetryError::TerminationTimeout { pid })
            });

        match &result {
            Ok(outcome) => info!(pid, ?outcome, "termination finished"),
            Err(e) => warn!(pid, kind = e.kind(), error = %e, "termination failed"),
        }
        // the caller may have given up already
        let _ = reply.send(result);

        if let Err(e) = self.refresh_processes().await {
            warn!(pid, error = %e, "directory refresh after termination failed");
        }
    }

    fn latest_stats(&self, max_age: Option<Duration>) -> Option<HostSnapshot> {
        let stats = self.inner.stats.read().unwrap_or_else(PoisonError::into_inner);
        let entry = stats.as_ref()?;
        match max_age {
            Some(ttl) if entry.at.elapsed() >= ttl => None,
            _ => Some(entry.snapshot.clone()),
        }
    }

    async fn run_host_pass(&self, _pass: AsyncMutexGuard<'_, ()>) -> Result<HostSnapshot> {
        let raw = self.inner.sampler.sample_host().await?;
        let cpu_usage_percent = self
            .inner
            .estimator
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .estimate(CpuKey::Host, raw.busy_cpu_ms, raw.cores, raw.taken_at);

        let mut stats = self.inner.stats.write().unwrap_or_else(PoisonError::into_inner);
        let prev_uptime = stats.as_ref().map_or(0, |s| s.snapshot.uptime_seconds);
        let snapshot = HostSnapshot {
            total_memory_bytes: raw.total_memory_bytes,
            used_memory_bytes: raw.used_memory_bytes.min(raw.total_memory_bytes),
            cpu_usage_percent,
            uptime_seconds: raw.uptime_seconds.max(prev_uptime),
        };
        *stats = Some(StatsEntry {
            snapshot: snapshot.clone(),
            at: Instant::now(),
        });
        Ok(snapshot)
    }

    async fn process_view(&self) -> Result<Arc<DirectoryVersion>> {
        let inner = &self.inner;
        let current = inner.directory.current();
        if current.is_populated() && current.is_fresh(inner.options.processes_ttl) {
            return Ok(current);
        }
        match inner.process_pass.try_lock() {
            Ok(guard) => self.run_process_pass(guard).await,
            Err(_) if current.is_populated() => Ok(current),
            Err(_) => {
                let guard = inner.process_pass.lock().await;
                let current = inner.directory.current();
                if current.is_populated() {
                    return Ok(current);
                }
                self.run_process_pass(guard).await
            }
        }
    }

    async fn run_process_pass(
        &self,
        _pass: AsyncMutexGuard<'_, ()>,
    ) -> Result<Arc<DirectoryVersion>> {
        let listing = self.inner.sampler.enumerate_processes().await?;
        let (entries, evicted) = {
            let mut est = self
                .inner
                .estimator
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            let mut live = HashSet::with_capacity(listing.processes.len());
            let entries: Vec<DirectoryEntry> = listing
                .processes
                .into_iter()
                .filter(|p| !p.exited)
                .map(|p| {
                    let key = CpuKey::Process {
                        pid: p.pid,
                        started_at: p.started_at,
                    };
                    live.insert(key);
                    let cpu = est.estimate(key, p.cpu_time_ms, listing.cores, listing.taken_at);
                    DirectoryEntry {
                        info: ProcessInfo {
                            pid: p.pid,
                            name: p.name,
                            cpu_usage_percent: cpu,
                            memory_usage_bytes: p.memory_bytes,
                        },
                        started_at: p.started_at,
                    }
                })
                .collect();
            let evicted = est.retain_processes(&live);
            (entries, evicted)
        };
        let version = self.inner.directory.refresh(entries);
        debug!(
            version = version.version(),
            count = version.len(),
            evicted,
            "process directory refreshed"
        );
        Ok(version)
    }
}
