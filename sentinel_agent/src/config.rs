//! Runtime configuration: defaults, then `SENTINEL_AGENT_*` environment
//! variables, then command-line flags.

use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;

use tracing::warn;

use crate::service::ServiceOptions;

pub const DEFAULT_PORT: u16 = 3000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentConfig {
    pub bind: IpAddr,
    pub port: u16,
    pub demo: bool,
    /// Background sampling cadence; `None` samples on request only.
    pub sample_period: Option<Duration>,
    pub service: ServiceOptions,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            // unauthenticated, so local-only unless asked otherwise
            bind: IpAddr::V4(Ipv4Addr::LOCALHOST),
            port: DEFAULT_PORT,
            demo: false,
            sample_period: None,
            service: ServiceOptions::default(),
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
pub enum CliAction {
    Run(AgentConfig),
    Help(String),
}

pub fn usage(prog: &str) -> String {
    format!("Usage: {prog} [--port PORT|-p PORT] [--bind ADDR] [--demo]")
}

impl AgentConfig {
    pub fn from_env_and_args<I: IntoIterator<Item = String>>(args: I) -> Result<CliAction, String> {
        Self::from_sources(args, |k| std::env::var(k).ok())
    }

    pub fn from_sources<I, E>(args: I, env: E) -> Result<CliAction, String>
    where
        I: IntoIterator<Item = String>,
        E: Fn(&str) -> Option<String>,
    {
        let mut cfg = AgentConfig::default();
        cfg.apply_env(&env);

        let mut it = args.into_iter();
        let prog = it.next().unwrap_or_else(|| "sentinel_agent".into());
        while let Some(arg) = it.next() {
            match arg.as_str() {
                "-h" | "--help" => return Ok(CliAction::Help(usage(&prog))),
                "--port" | "-p" => cfg.port = parse_port(it.next(), &prog)?,
                "--bind" => cfg.bind = parse_bind(it.next(), &prog)?,
                "--demo" => cfg.demo = true,
                _ if arg.starts_with("--port=") => {
                    cfg.port = parse_port(arg.split_once('=').map(|(_, v)| v.to_string()), &prog)?
                }
                _ if arg.starts_with("--bind=") => {
                    cfg.bind = parse_bind(arg.split_once('=').map(|(_, v)| v.to_string()), &prog)?
                }
                _ => return Err(format!("Unexpected argument {arg:?}. {}", usage(&prog))),
            }
        }
        Ok(CliAction::Run(cfg))
    }

    fn apply_env<E: Fn(&str) -> Option<String>>(&mut self, env: &E) {
        if let Some(port) = env_parse(env, "SENTINEL_AGENT_PORT") {
            self.port = port;
        }
        if let Some(bind) = env_parse(env, "SENTINEL_AGENT_BIND") {
            self.bind = bind;
        }
        let svc = &mut self.service;
        if let Some(ms) = env_parse(env, "SENTINEL_AGENT_STATS_TTL_MS") {
            svc.stats_ttl = Duration::from_millis(ms);
        }
        if let Some(ms) = env_parse(env, "SENTINEL_AGENT_PROCESSES_TTL_MS") {
            svc.processes_ttl = Duration::from_millis(ms);
        }
        if let Some(ms) = env_parse(env, "SENTINEL_AGENT_SAMPLE_TIMEOUT_MS") {
            svc.sample_timeout = Duration::from_millis(ms);
        }
        if let Some(ms) = env_parse(env, "SENTINEL_AGENT_KILL_TIMEOUT_MS") {
            svc.kill_timeout = Duration::from_millis(ms);
        }
        if let Some(ms) = env_parse(env, "SENTINEL_AGENT_GRACE_MS") {
            svc.grace = Duration::from_millis(ms);
        }
        if let Some(ms) = env_parse(env, "SENTINEL_AGENT_GRACE_POLL_MS") {
            svc.grace_poll = Duration::from_millis(ms);
        }
        if let Some(n) = env_parse(env, "SENTINEL_AGENT_TOP_LIMIT") {
            svc.top_limit = n;
        }
        self.sample_period = env_parse::<u64, _>(env, "SENTINEL_AGENT_SAMPLE_PERIOD_MS")
            .filter(|ms| *ms > 0)
            .map(Duration::from_millis);
    }
}

// Unparseable values keep the default.
fn env_parse<T: std::str::FromStr, E: Fn(&str) -> Option<String>>(env: &E, key: &str) -> Option<T> {
    let raw = env(key)?;
    match raw.trim().parse() {
        Ok(v) => Some(v),
        Err(_) => {
            warn!(key, value = %raw, "ignoring unparseable setting");
            None
        }
    }
}

fn parse_port(v: Option<String>, prog: &str) -> Result<u16, String> {
    v.as_deref()
        .and_then(|s| s.parse::<u16>().ok())
        .ok_or_else(|| format!("Invalid port. {}", usage(prog)))
}

fn parse_bind(v: Option<String>, prog: &str) -> Result<IpAddr, String> {
    v.as_deref()
        .and_then(|s| s.parse::<IpAddr>().ok())
        .ok_or_else(|| format!("Invalid bind address. {}", usage(prog)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn run(args: &[&str], env: &[(&str, &str)]) -> Result<CliAction, String> {
        let env: HashMap<String, String> = env
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        let args = std::iter::once("agent".to_string()).chain(args.iter().map(|s| s.to_string()));
        AgentConfig::from_sources(args, |k| env.get(k).cloned())
    }

    fn config(args: &[&str], env: &[(&str, &str)]) -> AgentConfig {
        match run(args, env) {
            Ok(CliAction::Run(cfg)) => cfg,
            other => panic!("expected config, got {other:?}"),
        }
    }

    #[test]
    fn defaults_are_local_and_request_driven() {
        let cfg = config(&[], &[]);
        assert_eq!(cfg, AgentConfig::default());
        assert!(cfg.bind.is_loopback());
        assert_eq!(cfg.port, DEFAULT_PORT);
        assert!(cfg.sample_period.is_none());
    }

    #[test]
    fn port_long_short_and_assign() {
        assert_eq!(config(&["--port", "9001"], &[]).port, 9001);
        assert_eq!(config(&["-p", "9002"], &[]).port, 9002);
        assert_eq!(config(&["--port=9003"], &[]).port, 9003);
    }

    #[test]
    fn flags_override_environment() {
        let env = [("SENTINEL_AGENT_PORT", "7000"), ("SENTINEL_AGENT_BIND", "0.0.0.0")];
        let cfg = config(&[], &env);
        assert_eq!(cfg.port, 7000);
        assert!(cfg.bind.is_unspecified());
        let cfg = config(&["-p", "7001", "--bind=::1"], &env);
        assert_eq!(cfg.port, 7001);
        assert!(cfg.bind.is_loopback());
    }

    #[test]
    fn durations_from_environment() {
        let cfg = config(
            &["--demo"],
            &[
                ("SENTINEL_AGENT_STATS_TTL_MS", "0"),
                ("SENTINEL_AGENT_KILL_TIMEOUT_MS", "750"),
                ("SENTINEL_AGENT_SAMPLE_PERIOD_MS", "1000"),
                ("SENTINEL_AGENT_TOP_LIMIT", "5"),
            ],
        );
        assert!(cfg.demo);
        assert_eq!(cfg.service.stats_ttl, Duration::ZERO);
        assert_eq!(cfg.service.kill_timeout, Duration::from_millis(750));
        assert_eq!(cfg.sample_period, Some(Duration::from_secs(1)));
        assert_eq!(cfg.service.top_limit, 5);
    }

    #[test]
    fn bad_environment_values_keep_defaults() {
        let cfg = config(
            &[],
            &[
                ("SENTINEL_AGENT_PORT", "http"),
                ("SENTINEL_AGENT_GRACE_MS", "-5"),
                ("SENTINEL_AGENT_SAMPLE_PERIOD_MS", "0"),
            ],
        );
        assert_eq!(cfg.port, DEFAULT_PORT);
        assert_eq!(cfg.service.grace, ServiceOptions::default().grace);
        assert!(cfg.sample_period.is_none());
    }

    #[test]
    fn help_and_bad_flags() {
        assert!(matches!(run(&["-h"], &[]), Ok(CliAction::Help(_))));
        assert!(run(&["--port", "nope"], &[]).is_err());
        assert!(run(&["--port"], &[]).is_err());
        assert!(run(&["--verbose"], &[]).is_err());
    }
}
