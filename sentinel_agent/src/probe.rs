//! OS-facing capability: everything the agent needs from the host, behind one trait.
//!
//! CPU counters are expressed as milliseconds of accumulated CPU time so the
//! estimator can compare them against wall-clock intervals directly.

use std::sync::Arc;
use std::time::Instant;

use crate::error::{ProbeError, SignalError};

/// One locked read of the host-wide counters.
#[derive(Debug, Clone)]
pub struct RawHostSample {
    pub total_memory_bytes: u64,
    pub used_memory_bytes: u64,
    /// Busy CPU time summed over all cores since boot.
    pub busy_cpu_ms: u64,
    pub cores: usize,
    pub uptime_seconds: u64,
    pub taken_at: Instant,
}

/// A process as seen by one enumeration pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawProcess {
    pub pid: u32,
    pub name: String,
    /// Start time in seconds since the epoch; tells a recycled PID apart from the original.
    pub started_at: u64,
    pub cpu_time_ms: u64,
    pub memory_bytes: u64,
    /// Terminated but not yet reaped (zombie/dead); no longer running.
    pub exited: bool,
}

/// One coherent process listing.
#[derive(Debug, Clone)]
pub struct ProcessListing {
    pub processes: Vec<RawProcess>,
    pub cores: usize,
    pub taken_at: Instant,
}

/// Blocking access to host counters and process control.
///
/// Implementations must be cheap to share; the service calls them from tokio's
/// blocking pool and wraps every call in a timeout.
pub trait HostProbe: Send + Sync + 'static {
    fn read_host(&self) -> Result<RawHostSample, ProbeError>;

    /// Processes that exit while being listed are left out rather than reported.
    fn enumerate_processes(&self) -> Result<ProcessListing, ProbeError>;

    /// Ask the process to terminate, but only if `pid` still names the process
    /// that started at `started_at`.
    fn signal_terminate(&self, pid: u32, started_at: u64) -> Result<(), SignalError>;
}

pub type SharedProbe = Arc<dyn HostProbe>;
