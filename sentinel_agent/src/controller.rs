//! Process termination: authorization against the directory, the OS request,
//! and confirmation by re-enumeration.

use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::directory::{DirectoryVersion, ProcessDirectory};
use crate::error::{Result, SignalError, TelemetryError};
use crate::probe::SharedProbe;
use crate::types::TerminationOutcome;

/// A process that passed authorization, pinned to the directory version it was
/// validated against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TerminationTarget {
    pub pid: u32,
    pub name: String,
    pub started_at: u64,
    pub version: u64,
}

pub struct ProcessController {
    probe: SharedProbe,
    grace: Duration,
    poll: Duration,
    own_pid: u32,
}

impl ProcessController {
    pub fn new(probe: SharedProbe, grace: Duration, poll: Duration) -> Self {
        Self {
            probe,
            grace,
            poll: poll.max(Duration::from_millis(1)),
            own_pid: std::process::id(),
        }
    }

    /// Why `pid` may never be terminated, if it is protected.
    pub fn forbidden_reason(&self, pid: u32) -> Option<&'static str> {
        if pid == self.own_pid {
            return Some("it is the telemetry agent itself");
        }
        match pid {
            0 => Some("it is the kernel scheduler"),
            1 => Some("it is the init process"),
            #[cfg(windows)]
            4 => Some("it is the System process"),
            _ => None,
        }
    }

    pub fn authorize(
        &self,
        directory: &DirectoryVersion,
        pid: u32,
        expected_name: Option<&str>,
    ) -> Result<TerminationTarget> {
        if let Some(reason) = self.forbidden_reason(pid) {
            return Err(TelemetryError::ForbiddenTarget { pid, reason });
        }
        let entry = directory
            .lookup(pid)
            .ok_or(TelemetryError::NotFound { pid })?;
        if let Some(expected) = expected_name {
            if expected != entry.info.name {
                return Err(TelemetryError::StaleTarget {
                    pid,
                    expected: expected.to_string(),
                    actual: entry.info.name.clone(),
                });
            }
        }
        Ok(TerminationTarget {
            pid,
            name: entry.info.name.clone(),
            started_at: entry.started_at,
            version: directory.version(),
        })
    }

    /// Re-check a target if the directory moved on since it was authorized.
    pub fn revalidate(
        &self,
        target: &TerminationTarget,
        directory: &ProcessDirectory,
    ) -> Result<TerminationTarget> {
        let current = directory.current();
        if current.version() == target.version {
            return Ok(target.clone());
        }
        let entry = current
            .lookup(target.pid)
            .ok_or(TelemetryError::NotFound { pid: target.pid })?;
        if entry.started_at != target.started_at || entry.info.name != target.name {
            return Err(TelemetryError::StaleTarget {
                pid: target.pid,
                expected: target.name.clone(),
                actual: entry.info.name.clone(),
            });
        }
        debug!(
            pid = target.pid,
            from = target.version,
            to = current.version(),
            "termination target revalidated"
        );
        Ok(TerminationTarget {
            version: current.version(),
            ..target.clone()
        })
    }

    /// Send the termination request and wait up to the grace period for the
    /// process to drop out of a re-enumeration. Blocking.
    pub fn terminate(&self, target: &TerminationTarget) -> Result<TerminationOutcome> {
        let pid = target.pid;
        self.probe
            .signal_terminate(pid, target.started_at)
            .map_err(|e| match e {
                SignalError::Vanished(_) => TelemetryError::NotFound { pid },
                SignalError::IdentityChanged(_) => TelemetryError::StaleTarget {
                    pid,
                    expected: target.name.clone(),
                    actual: "a newer process".to_string(),
                },
                SignalError::PermissionDenied(_) => TelemetryError::PermissionDenied { pid },
                SignalError::Failed { reason, .. } => {
                    warn!(pid, %reason, "termination request rejected");
                    TelemetryError::PermissionDenied { pid }
                }
            })?;

        let deadline = Instant::now() + self.grace;
        loop {
            match self.probe.enumerate_processes() {
                Ok(listing) => {
                    // an unreaped zombie has already exited
                    let alive = listing.processes.iter().any(|p| {
                        p.pid == pid && p.started_at == target.started_at && !p.exited
                    });
                    if !alive {
                        return Ok(TerminationOutcome::Confirmed);
                    }
                }
                Err(e) => warn!(pid, error = %e, "re-enumeration failed while awaiting exit"),
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(TerminationOutcome::RequestedNotConfirmed);
            }
            std::thread::sleep(self.poll.min(deadline - now));
        }
    }
}
