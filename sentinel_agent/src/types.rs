//! Data types returned to the client.
//! Keep this module minimal and stable — it defines the wire format.

use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct HostSnapshot {
    pub total_memory_bytes: u64,
    pub used_memory_bytes: u64,
    // 0..=100, normalized across all cores
    pub cpu_usage_percent: f64,
    pub uptime_seconds: u64,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ProcessInfo {
    pub pid: u32,
    pub name: String,
    pub cpu_usage_percent: f64,
    pub memory_usage_bytes: u64,
}

/// How a termination request ended when it did not fail outright.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
pub enum TerminationOutcome {
    /// The process disappeared from a re-enumeration within the grace period.
    Confirmed,
    /// The OS accepted the request but the process was still listed after the grace period.
    RequestedNotConfirmed,
}

impl TerminationOutcome {
    pub fn describe(self, pid: u32) -> String {
        match self {
            TerminationOutcome::Confirmed => format!("Process {pid} terminated."),
            TerminationOutcome::RequestedNotConfirmed => {
                format!("Termination signal sent to process {pid}; exit not yet confirmed.")
            }
        }
    }
}
