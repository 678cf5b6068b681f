//! Error taxonomy surfaced to clients, plus the lower-level probe errors it is built from.

use thiserror::Error;

/// Host counters or the process table could not be read.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProbeError {
    #[error("failed to read {what}: {reason}")]
    Read { what: &'static str, reason: String },
}

impl ProbeError {
    pub fn read(what: &'static str, reason: impl ToString) -> Self {
        ProbeError::Read {
            what,
            reason: reason.to_string(),
        }
    }
}

/// Outcome of asking the OS to deliver a termination request.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SignalError {
    #[error("process {0} no longer exists")]
    Vanished(u32),

    #[error("pid {0} now belongs to a different process")]
    IdentityChanged(u32),

    #[error("operation not permitted on process {0}")]
    PermissionDenied(u32),

    #[error("failed to signal process {pid}: {reason}")]
    Failed { pid: u32, reason: String },
}

/// Every failure a client can observe from the telemetry service.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TelemetryError {
    #[error("host telemetry unavailable: {0}")]
    SamplingUnavailable(String),

    #[error("process {pid} not found in the current process list")]
    NotFound { pid: u32 },

    #[error("process {pid} is now {actual:?}, not {expected:?}; refresh the process list and retry")]
    StaleTarget {
        pid: u32,
        expected: String,
        actual: String,
    },

    #[error("process {pid} may not be terminated: {reason}")]
    ForbiddenTarget { pid: u32, reason: &'static str },

    #[error("permission denied while terminating process {pid}")]
    PermissionDenied { pid: u32 },

    #[error("termination of process {pid} was requested but not confirmed in time")]
    TerminationTimeout { pid: u32 },
}

impl TelemetryError {
    /// Stable identifier used on the wire.
    pub fn kind(&self) -> &'static str {
        match self {
            TelemetryError::SamplingUnavailable(_) => "SamplingUnavailable",
            TelemetryError::NotFound { .. } => "NotFound",
            TelemetryError::StaleTarget { .. } => "StaleTarget",
            TelemetryError::ForbiddenTarget { .. } => "ForbiddenTarget",
            TelemetryError::PermissionDenied { .. } => "PermissionDenied",
            TelemetryError::TerminationTimeout { .. } => "TerminationTimeout",
        }
    }
}

impl From<ProbeError> for TelemetryError {
    fn from(e: ProbeError) -> Self {
        TelemetryError::SamplingUnavailable(e.to_string())
    }
}

pub type Result<T, E = TelemetryError> = std::result::Result<T, E>;
