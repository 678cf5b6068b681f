//! sentinel_agent: live host telemetry and process control for a local client.
//!
//! [`service::TelemetryService`] is the entry point. It samples the host
//! through a [`probe::HostProbe`], folds CPU counters with
//! [`cpu::CpuUsageEstimator`], publishes versioned process listings in a
//! [`directory::ProcessDirectory`], and terminates processes through
//! [`controller::ProcessController`].

pub mod config;
pub mod controller;
pub mod cpu;
pub mod directory;
pub mod error;
pub mod fake;
pub mod probe;
pub mod proto;
pub mod sampler;
pub mod service;
pub mod state;
pub mod system;
pub mod types;
pub mod ws;

pub use error::TelemetryError;
pub use service::{ServiceOptions, TelemetryService};
pub use types::{HostSnapshot, ProcessInfo, TerminationOutcome};
