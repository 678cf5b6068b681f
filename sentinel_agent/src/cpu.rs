//! CPU percent from successive cumulative CPU-time readings.
//!
//! Usage is a delta over an interval, so the estimator keeps the previous
//! reading per entity and folds each new one against it.

use std::collections::hash_map::Entry;
use std::collections::{HashMap, HashSet};
use std::time::Instant;

/// Identity of a tracked entity. Processes are keyed by start time as well as
/// PID so a recycled PID starts a fresh history instead of inheriting one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CpuKey {
    Host,
    Process { pid: u32, started_at: u64 },
}

#[derive(Debug, Clone, Copy)]
struct RawCpuSample {
    cpu_ms: u64,
    at: Instant,
    percent: f64,
}

#[derive(Debug, Default)]
pub struct CpuUsageEstimator {
    last: HashMap<CpuKey, RawCpuSample>,
}

impl CpuUsageEstimator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Percent of total capacity (`cores` × wall time) used since the previous
    /// reading for `key`, clamped to 0..=100.
    ///
    /// The first reading for a key yields 0.0. A reading with no elapsed time
    /// since the previous one returns the previous percent and keeps the old
    /// baseline.
    pub fn estimate(&mut self, key: CpuKey, cpu_ms: u64, cores: usize, now: Instant) -> f64 {
        let prev = match self.last.entry(key) {
            Entry::Vacant(slot) => {
                slot.insert(RawCpuSample {
                    cpu_ms,
                    at: now,
                    percent: 0.0,
                });
                return 0.0;
            }
            Entry::Occupied(slot) => slot.into_mut(),
        };

        let elapsed = match now.checked_duration_since(prev.at) {
            Some(d) if !d.is_zero() => d,
            _ => return prev.percent,
        };
        // counters going backwards (wrap, PID reuse slipping through) read as idle
        let used_ms = cpu_ms.saturating_sub(prev.cpu_ms) as f64;
        let capacity_ms = elapsed.as_secs_f64() * 1000.0 * cores.max(1) as f64;
        let percent = (100.0 * used_ms / capacity_ms).clamp(0.0, 100.0);

        *prev = RawCpuSample {
            cpu_ms,
            at: now,
            percent,
        };
        percent
    }

    /// Drop process histories not present in `live`. The host entry is kept.
    /// Returns how many entries were evicted.
    pub fn retain_processes(&mut self, live: &HashSet<CpuKey>) -> usize {
        let before = self.last.len();
        self.last
            .retain(|k, _| matches!(k, CpuKey::Host) || live.contains(k));
        before - self.last.len()
    }

    pub fn tracked(&self) -> usize {
        self.last.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    const EPS: f64 = 1e-9;

    fn proc_key(pid: u32) -> CpuKey {
        CpuKey::Process {
            pid,
            started_at: 1,
        }
    }

    #[test]
    fn first_observation_is_zero() {
        let mut est = CpuUsageEstimator::new();
        assert_eq!(est.estimate(CpuKey::Host, 123_456, 4, Instant::now()), 0.0);
        assert_eq!(est.estimate(proc_key(9), u64::MAX, 1, Instant::now()), 0.0);
    }

    #[test]
    fn unchanged_counters_read_idle() {
        let mut est = CpuUsageEstimator::new();
        let t0 = Instant::now();
        est.estimate(CpuKey::Host, 5_000, 2, t0);
        let pct = est.estimate(CpuKey::Host, 5_000, 2, t0 + Duration::from_secs(1));
        assert!(pct.abs() < EPS);
    }

    #[test]
    fn advancing_counters_match_formula() {
        let mut est = CpuUsageEstimator::new();
        let t0 = Instant::now();
        est.estimate(CpuKey::Host, 10_000, 4, t0);
        // 1200ms of CPU over 1.5s on 4 cores = 1200 / 6000 = 20%
        let pct = est.estimate(CpuKey::Host, 11_200, 4, t0 + Duration::from_millis(1500));
        assert!((pct - 20.0).abs() < 1e-6, "got {pct}");

        // single core, 250ms over 500ms = 50%
        let k = proc_key(3);
        est.estimate(k, 0, 1, t0);
        let pct = est.estimate(k, 250, 1, t0 + Duration::from_millis(500));
        assert!((pct - 50.0).abs() < 1e-6, "got {pct}");
    }

    #[test]
    fn result_is_clamped() {
        let mut est = CpuUsageEstimator::new();
        let t0 = Instant::now();
        est.estimate(CpuKey::Host, 0, 1, t0);
        let over = est.estimate(CpuKey::Host, 10_000, 1, t0 + Duration::from_secs(1));
        assert_eq!(over, 100.0);
        let wrapped = est.estimate(CpuKey::Host, 5, 1, t0 + Duration::from_secs(2));
        assert_eq!(wrapped, 0.0);
    }

    #[test]
    fn zero_elapsed_returns_previous_percent() {
        let mut est = CpuUsageEstimator::new();
        let t0 = Instant::now();
        let t1 = t0 + Duration::from_secs(1);
        est.estimate(CpuKey::Host, 0, 1, t0);
        let pct = est.estimate(CpuKey::Host, 300, 1, t1);
        assert!((pct - 30.0).abs() < 1e-6);
        assert_eq!(est.estimate(CpuKey::Host, 900, 1, t1), pct);
        // a reading from before the baseline is treated the same way
        assert_eq!(est.estimate(CpuKey::Host, 900, 1, t0), pct);
        // baseline unchanged: 600ms more over the next second
        let next = est.estimate(CpuKey::Host, 900, 1, t1 + Duration::from_secs(1));
        assert!((next - 60.0).abs() < 1e-6);
    }

    #[test]
    fn recycled_pid_starts_fresh() {
        let mut est = CpuUsageEstimator::new();
        let t0 = Instant::now();
        let old = CpuKey::Process {
            pid: 50,
            started_at: 1,
        };
        let new = CpuKey::Process {
            pid: 50,
            started_at: 2,
        };
        est.estimate(old, 90_000, 1, t0);
        assert_eq!(est.estimate(new, 10, 1, t0 + Duration::from_secs(1)), 0.0);
    }

    #[test]
    fn eviction_keeps_host_and_live_processes() {
        let mut est = CpuUsageEstimator::new();
        let now = Instant::now();
        est.estimate(CpuKey::Host, 0, 1, now);
        for pid in 1..=5 {
            est.estimate(proc_key(pid), 0, 1, now);
        }
        let live: HashSet<CpuKey> = [proc_key(2), proc_key(4)].into_iter().collect();
        assert_eq!(est.retain_processes(&live), 3);
        assert_eq!(est.tracked(), 3);
    }
}
