//! Host probe backed by sysinfo, with procfs jiffies on Linux for accurate CPU time.

use std::sync::{Mutex, PoisonError};
use std::time::Instant;

#[cfg(target_os = "linux")]
use std::fs;
#[cfg(target_os = "linux")]
use std::io;
use sysinfo::{
    CpuRefreshKind, MemoryRefreshKind, Pid, ProcessRefreshKind, ProcessStatus, ProcessesToUpdate,
    RefreshKind, System,
};
use tracing::debug;

use crate::error::{ProbeError, SignalError};
use crate::probe::{HostProbe, ProcessListing, RawHostSample, RawProcess};

pub struct SysinfoProbe {
    sys: Mutex<System>,
    #[cfg(target_os = "linux")]
    ms_per_tick: u64,
    #[cfg(not(target_os = "linux"))]
    busy: Mutex<BusyClock>,
}

/// Host busy time integrated from sysinfo's global usage, for platforms
/// without an absolute host CPU counter. Only ever grows, so processes exiting
/// between passes do not pull the total down.
#[cfg_attr(target_os = "linux", allow(dead_code))]
#[derive(Debug, Default)]
struct BusyClock {
    busy_ms: f64,
    last: Option<Instant>,
}

#[cfg_attr(target_os = "linux", allow(dead_code))]
impl BusyClock {
    /// Fold `usage_percent` (0..=100 across all cores) over the time since the
    /// previous call and return the running total in milliseconds.
    fn advance(&mut self, usage_percent: f32, cores: usize, now: Instant) -> u64 {
        if let Some(prev) = self.last {
            let elapsed_ms = now.saturating_duration_since(prev).as_secs_f64() * 1000.0;
            let usage = f64::from(usage_percent).clamp(0.0, 100.0) / 100.0;
            self.busy_ms += usage * elapsed_ms * cores.max(1) as f64;
        }
        self.last = Some(now);
        self.busy_ms as u64
    }
}

impl SysinfoProbe {
    pub fn new() -> Self {
        let refresh_kind = RefreshKind::nothing()
            .with_cpu(CpuRefreshKind::nothing().with_cpu_usage())
            .with_memory(MemoryRefreshKind::nothing().with_ram());
        let sys = System::new_with_specifics(refresh_kind);
        Self {
            sys: Mutex::new(sys),
            #[cfg(target_os = "linux")]
            ms_per_tick: ms_per_clock_tick(),
            #[cfg(not(target_os = "linux"))]
            busy: Mutex::new(BusyClock::default()),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, System> {
        self.sys.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for SysinfoProbe {
    fn default() -> Self {
        Self::new()
    }
}

fn process_refresh_kind() -> ProcessRefreshKind {
    // Linux reads CPU time from /proc/<pid>/stat directly.
    #[cfg(target_os = "linux")]
    let kind = ProcessRefreshKind::nothing().with_memory();
    #[cfg(not(target_os = "linux"))]
    let kind = ProcessRefreshKind::nothing().with_cpu().with_memory();
    kind.without_tasks()
}

impl HostProbe for SysinfoProbe {
    fn read_host(&self) -> Result<RawHostSample, ProbeError> {
        let mut sys = self.lock();
        sys.refresh_memory_specifics(MemoryRefreshKind::nothing().with_ram());

        #[cfg(target_os = "linux")]
        let (busy_cpu_ms, taken_at) = {
            let busy = read_busy_jiffies()
                .map_err(|e| ProbeError::read("/proc/stat", e))?
                .saturating_mul(self.ms_per_tick);
            (busy, Instant::now())
        };
        #[cfg(not(target_os = "linux"))]
        let (busy_cpu_ms, taken_at) = {
            sys.refresh_cpu_usage();
            let now = Instant::now();
            let busy = self
                .busy
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .advance(sys.global_cpu_usage(), sys.cpus().len(), now);
            (busy, now)
        };

        let total_memory_bytes = sys.total_memory();
        if total_memory_bytes == 0 {
            return Err(ProbeError::read("memory totals", "host reported zero memory"));
        }
        let used_memory_bytes = total_memory_bytes
            .saturating_sub(sys.available_memory())
            .min(total_memory_bytes);

        Ok(RawHostSample {
            total_memory_bytes,
            used_memory_bytes,
            busy_cpu_ms,
            cores: sys.cpus().len().max(1),
            uptime_seconds: System::uptime(),
            taken_at,
        })
    }

    fn enumerate_processes(&self) -> Result<ProcessListing, ProbeError> {
        let mut sys = self.lock();
        sys.refresh_processes_specifics(ProcessesToUpdate::All, true, process_refresh_kind());
        let taken_at = Instant::now();

        let mut processes = Vec::with_capacity(sys.processes().len());
        for p in sys.processes().values() {
            if p.thread_kind().is_some() {
                continue;
            }
            let pid = p.pid().as_u32();
            #[cfg(target_os = "linux")]
            let cpu_time_ms = match read_proc_jiffies(pid) {
                Some(j) => j.saturating_mul(self.ms_per_tick),
                // exited between the listing and the stat read
                None => continue,
            };
            #[cfg(not(target_os = "linux"))]
            let cpu_time_ms = p.accumulated_cpu_time();

            processes.push(RawProcess {
                pid,
                name: p.name().to_string_lossy().into_owned(),
                started_at: p.start_time(),
                cpu_time_ms,
                memory_bytes: p.memory(),
                exited: matches!(p.status(), ProcessStatus::Zombie | ProcessStatus::Dead),
            });
        }
        if processes.is_empty() {
            return Err(ProbeError::read("process table", "no processes visible"));
        }
        debug!(count = processes.len(), "enumerated processes");

        Ok(ProcessListing {
            processes,
            cores: sys.cpus().len().max(1),
            taken_at,
        })
    }

    fn signal_terminate(&self, pid: u32, started_at: u64) -> Result<(), SignalError> {
        let mut sys = self.lock();
        let target = Pid::from_u32(pid);
        sys.refresh_processes_specifics(
            ProcessesToUpdate::Some(&[target]),
            true,
            ProcessRefreshKind::nothing(),
        );
        let process = sys.process(target).ok_or(SignalError::Vanished(pid))?;
        if process.start_time() != started_at {
            return Err(SignalError::IdentityChanged(pid));
        }

        #[cfg(unix)]
        {
            send_sigterm(pid)
        }
        #[cfg(not(unix))]
        {
            if process.kill() {
                Ok(())
            } else {
                Err(SignalError::PermissionDenied(pid))
            }
        }
    }
}

#[cfg(unix)]
fn send_sigterm(pid: u32) -> Result<(), SignalError> {
    let raw = libc::pid_t::try_from(pid).map_err(|_| SignalError::Vanished(pid))?;
    // SAFETY: kill(2) takes plain integers and has no memory-safety preconditions.
    let rc = unsafe { libc::kill(raw, libc::SIGTERM) };
    if rc == 0 {
        return Ok(());
    }
    let err = std::io::Error::last_os_error();
    match err.raw_os_error() {
        Some(libc::EPERM) => Err(SignalError::PermissionDenied(pid)),
        Some(libc::ESRCH) => Err(SignalError::Vanished(pid)),
        _ => Err(SignalError::Failed {
            pid,
            reason: err.to_string(),
        }),
    }
}

#[cfg(target_os = "linux")]
fn ms_per_clock_tick() -> u64 {
    // SAFETY: sysconf only reads a configuration value.
    let hz = unsafe { libc::sysconf(libc::_SC_CLK_TCK) };
    if hz > 0 && hz <= 1000 {
        1000 / hz as u64
    } else {
        10
    }
}

// Linux-only helpers: /proc jiffies for host and per-process CPU time.
#[cfg(target_os = "linux")]
fn read_busy_jiffies() -> io::Result<u64> {
    let s = fs::read_to_string("/proc/stat")?;
    parse_busy_jiffies(&s).ok_or_else(|| io::Error::other("no aggregate cpu line"))
}

/// First line of /proc/stat: "cpu  user nice system idle iowait irq softirq steal ...".
/// Busy time excludes idle and iowait.
#[cfg(target_os = "linux")]
fn parse_busy_jiffies(stat: &str) -> Option<u64> {
    let line = stat.lines().find(|l| l.starts_with("cpu "))?;
    let fields: Vec<u64> = line
        .split_whitespace()
        .skip(1)
        .take(8)
        .map(|tok| tok.parse::<u64>().unwrap_or(0))
        .collect();
    if fields.len() < 4 {
        return None;
    }
    Some(
        fields
            .iter()
            .enumerate()
            .filter(|(i, _)| *i != 3 && *i != 4)
            .map(|(_, v)| *v)
            .fold(0u64, u64::saturating_add),
    )
}

#[cfg(target_os = "linux")]
fn read_proc_jiffies(pid: u32) -> Option<u64> {
    let s = fs::read_to_string(format!("/proc/{pid}/stat")).ok()?;
    parse_proc_jiffies(&s)
}

#[cfg(target_os = "linux")]
fn parse_proc_jiffies(stat: &str) -> Option<u64> {
    // comm may contain spaces and parens; fields resume after the last ')'
    let rpar = stat.rfind(')')?;
    let after = stat.get(rpar + 2..)?;
    let mut it = after.split_whitespace();
    // utime (14th field) is offset 11 from "state", stime (15th) is next
    let utime = it.nth(11)?.parse::<u64>().ok()?;
    let stime = it.next()?.parse::<u64>().ok()?;
    Some(utime.saturating_add(stime))
}
