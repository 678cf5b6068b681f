//! In-memory host used by tests and by `--demo` mode.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use tokio::task::JoinHandle;
use tokio::time::interval;

use crate::error::{ProbeError, SignalError};
use crate::probe::{HostProbe, ProcessListing, RawHostSample, RawProcess};

/// Fabricated host state. Mutate it through [`InMemoryProbe::update`].
#[derive(Debug, Clone)]
pub struct FakeHost {
    pub total_memory_bytes: u64,
    pub used_memory_bytes: u64,
    pub busy_cpu_ms: u64,
    pub cores: usize,
    pub uptime_seconds: u64,
    pub processes: Vec<RawProcess>,
    /// When set, every host read and enumeration fails with this reason.
    pub failure: Option<String>,
    /// PIDs whose termination is refused as if the caller lacked privilege.
    pub deny_signals: HashSet<u32>,
    /// PIDs that accept the signal but keep running.
    pub ignore_signals: HashSet<u32>,
    /// PIDs that die on the signal but stay listed as unreaped zombies.
    pub zombie_on_signal: HashSet<u32>,
    /// Time every host read and enumeration blocks before answering.
    pub read_delay: Duration,
    /// Time the signal call blocks before the process exits.
    pub signal_delay: Duration,
    /// Every PID a termination request was delivered to, in order.
    pub signals: Vec<u32>,
    pub enumerations: usize,
}

pub struct InMemoryProbe {
    host: Mutex<FakeHost>,
}

impl InMemoryProbe {
    pub fn new(total_memory_bytes: u64, cores: usize) -> Self {
        Self {
            host: Mutex::new(FakeHost {
                total_memory_bytes,
                used_memory_bytes: 0,
                busy_cpu_ms: 0,
                cores: cores.max(1),
                uptime_seconds: 0,
                processes: Vec::new(),
                failure: None,
                deny_signals: HashSet::new(),
                ignore_signals: HashSet::new(),
                zombie_on_signal: HashSet::new(),
                read_delay: Duration::ZERO,
                signal_delay: Duration::ZERO,
                signals: Vec::new(),
                enumerations: 0,
            }),
        }
    }

    /// A small plausible host for demo mode.
    pub fn demo() -> Self {
        let probe = Self::new(16 * 1024 * 1024 * 1024, 8);
        probe.update(|h| {
            h.used_memory_bytes = 6 * 1024 * 1024 * 1024;
            h.uptime_seconds = 3_600;
        });
        for (pid, name, mem_mb) in [
            (1, "init", 12),
            (412, "sshd", 8),
            (977, "postgres", 512),
            (1203, "nginx", 64),
            (2048, "worker", 256),
            (4242, "batch-job", 1024),
        ] {
            probe.add_process(pid, name, mem_mb * 1024 * 1024);
        }
        probe
    }

    fn lock(&self) -> MutexGuard<'_, FakeHost> {
        self.host.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // Simulated slow OS interface; sleeps without holding the lock.
    fn stall(&self) {
        let delay = self.lock().read_delay;
        if !delay.is_zero() {
            std::thread::sleep(delay);
        }
    }

    pub fn update<R>(&self, f: impl FnOnce(&mut FakeHost) -> R) -> R {
        f(&mut self.lock())
    }

    pub fn snapshot(&self) -> FakeHost {
        self.lock().clone()
    }

    pub fn add_process(&self, pid: u32, name: &str, memory_bytes: u64) {
        self.add_process_started(pid, name, memory_bytes, u64::from(pid));
    }

    pub fn add_process_started(&self, pid: u32, name: &str, memory_bytes: u64, started_at: u64) {
        self.update(|h| {
            h.processes.retain(|p| p.pid != pid);
            h.processes.push(RawProcess {
                pid,
                name: name.to_string(),
                started_at,
                cpu_time_ms: 0,
                memory_bytes,
                exited: false,
            });
        });
    }

    pub fn remove_process(&self, pid: u32) {
        self.update(|h| h.processes.retain(|p| p.pid != pid));
    }

    pub fn advance_host_cpu(&self, busy_ms: u64) {
        self.update(|h| h.busy_cpu_ms = h.busy_cpu_ms.saturating_add(busy_ms));
    }

    pub fn advance_process_cpu(&self, pid: u32, cpu_ms: u64) {
        self.update(|h| {
            if let Some(p) = h.processes.iter_mut().find(|p| p.pid == pid) {
                p.cpu_time_ms = p.cpu_time_ms.saturating_add(cpu_ms);
            }
        });
    }

    pub fn signals_sent(&self) -> Vec<u32> {
        self.lock().signals.clone()
    }
}

impl HostProbe for InMemoryProbe {
    fn read_host(&self) -> Result<RawHostSample, ProbeError> {
        self.stall();
        let h = self.lock();
        if let Some(reason) = &h.failure {
            return Err(ProbeError::read("host counters", reason));
        }
        Ok(RawHostSample {
            total_memory_bytes: h.total_memory_bytes,
            used_memory_bytes: h.used_memory_bytes,
            busy_cpu_ms: h.busy_cpu_ms,
            cores: h.cores,
            uptime_seconds: h.uptime_seconds,
            taken_at: Instant::now(),
        })
    }

    fn enumerate_processes(&self) -> Result<ProcessListing, ProbeError> {
        self.stall();
        let mut h = self.lock();
        if let Some(reason) = &h.failure {
            return Err(ProbeError::read("process table", reason));
        }
        h.enumerations += 1;
        Ok(ProcessListing {
            processes: h.processes.clone(),
            cores: h.cores,
            taken_at: Instant::now(),
        })
    }

    fn signal_terminate(&self, pid: u32, started_at: u64) -> Result<(), SignalError> {
        let delay = {
            let mut h = self.lock();
            let live = h
                .processes
                .iter()
                .find(|p| p.pid == pid)
                .ok_or(SignalError::Vanished(pid))?;
            if live.started_at != started_at {
                return Err(SignalError::IdentityChanged(pid));
            }
            if h.deny_signals.contains(&pid) {
                return Err(SignalError::PermissionDenied(pid));
            }
            h.signals.push(pid);
            h.signal_delay
        };
        if !delay.is_zero() {
            std::thread::sleep(delay);
        }
        let mut h = self.lock();
        if h.ignore_signals.contains(&pid) {
            return Ok(());
        }
        if h.zombie_on_signal.contains(&pid) {
            if let Some(p) = h
                .processes
                .iter_mut()
                .find(|p| p.pid == pid && p.started_at == started_at)
            {
                p.exited = true;
            }
        } else {
            h.processes
                .retain(|p| !(p.pid == pid && p.started_at == started_at));
        }
        Ok(())
    }
}

/// Advance the demo host's counters every `period` so estimates move.
pub fn spawn_demo_load(probe: Arc<InMemoryProbe>, period: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval(period);
        let mut step: u64 = 0;
        let mut uptime_ms: u64 = 0;
        loop {
            ticker.tick().await;
            step += 1;
            let elapsed_ms = period.as_millis() as u64;
            probe.update(|h| {
                // 20..50% host load with a slow swing
                let load = 0.35 + 0.15 * ((step as f64) * 0.3).sin();
                let busy = (elapsed_ms as f64 * h.cores as f64 * load) as u64;
                h.busy_cpu_ms = h.busy_cpu_ms.saturating_add(busy);
                let n = h.processes.len().max(1) as u64;
                for (i, p) in h.processes.iter_mut().enumerate() {
                    // earlier processes get a larger share
                    let share = busy * 2 * (n - i as u64) / (n * (n + 1));
                    p.cpu_time_ms = p.cpu_time_ms.saturating_add(share);
                }
                uptime_ms += elapsed_ms;
                h.uptime_seconds += uptime_ms / 1000;
                uptime_ms %= 1000;
            });
        }
    })
}
