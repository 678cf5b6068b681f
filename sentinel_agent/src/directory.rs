//! Versioned process directory: the last complete enumeration pass.
//!
//! Each refresh swaps in a whole new immutable version, so readers holding an
//! `Arc<DirectoryVersion>` always see one pass and never a mix of two.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::{Duration, Instant};

use crate::types::ProcessInfo;

#[derive(Debug, Clone, PartialEq)]
pub struct DirectoryEntry {
    pub info: ProcessInfo,
    pub started_at: u64,
}

#[derive(Debug, Default)]
pub struct DirectoryVersion {
    version: u64,
    entries: Vec<DirectoryEntry>,
    index: HashMap<u32, usize>,
    refreshed_at: Option<Instant>,
}

impl DirectoryVersion {
    fn build(version: u64, entries: Vec<DirectoryEntry>) -> Self {
        let mut index = HashMap::with_capacity(entries.len());
        for (i, e) in entries.iter().enumerate() {
            index.entry(e.info.pid).or_insert(i);
        }
        Self {
            version,
            entries,
            index,
            refreshed_at: Some(Instant::now()),
        }
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    /// False until the first refresh.
    pub fn is_populated(&self) -> bool {
        self.version > 0
    }

    pub fn is_fresh(&self, ttl: Duration) -> bool {
        self.refreshed_at.is_some_and(|t| t.elapsed() < ttl)
    }

    pub fn lookup(&self, pid: u32) -> Option<&DirectoryEntry> {
        self.index.get(&pid).map(|&i| &self.entries[i])
    }

    pub fn entries(&self) -> &[DirectoryEntry] {
        &self.entries
    }

    /// Client view, in enumeration order.
    pub fn processes(&self) -> Vec<ProcessInfo> {
        self.entries.iter().map(|e| e.info.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[derive(Debug, Default)]
pub struct ProcessDirectory {
    current: RwLock<Arc<DirectoryVersion>>,
}

impl ProcessDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the contents with a new pass and bump the version.
    pub fn refresh(&self, entries: Vec<DirectoryEntry>) -> Arc<DirectoryVersion> {
        let mut guard = self.current.write().unwrap_or_else(PoisonError::into_inner);
        let next = Arc::new(DirectoryVersion::build(guard.version + 1, entries));
        *guard = Arc::clone(&next);
        next
    }

    pub fn current(&self) -> Arc<DirectoryVersion> {
        Arc::clone(&self.current.read().unwrap_or_else(PoisonError::into_inner))
    }

    pub fn lookup(&self, pid: u32) -> Option<DirectoryEntry> {
        self.current().lookup(pid).cloned()
    }

    pub fn current_version(&self) -> u64 {
        self.current().version()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::thread;

    fn entry(pid: u32, name: &str) -> DirectoryEntry {
        DirectoryEntry {
            info: ProcessInfo {
                pid,
                name: name.to_string(),
                cpu_usage_percent: 0.0,
                memory_usage_bytes: 0,
            },
            started_at: u64::from(pid),
        }
    }

    #[test]
    fn starts_empty_and_unpopulated() {
        let dir = ProcessDirectory::new();
        assert_eq!(dir.current_version(), 0);
        assert!(!dir.current().is_populated());
        assert!(dir.lookup(1).is_none());
    }

    #[test]
    fn refresh_replaces_contents_and_bumps_version() {
        let dir = ProcessDirectory::new();
        dir.refresh(vec![entry(1, "init"), entry(42, "worker")]);
        assert_eq!(dir.current_version(), 1);
        assert_eq!(dir.lookup(42).map(|e| e.info.name), Some("worker".into()));

        let v2 = dir.refresh(vec![entry(1, "init")]);
        assert_eq!(v2.version(), 2);
        assert!(dir.lookup(42).is_none());
        assert_eq!(dir.current().processes().len(), 1);
    }

    #[test]
    fn held_version_is_unaffected_by_later_refresh() {
        let dir = ProcessDirectory::new();
        dir.refresh(vec![entry(7, "old")]);
        let held = dir.current();
        dir.refresh(vec![entry(8, "new")]);
        assert_eq!(held.version(), 1);
        assert!(held.lookup(7).is_some());
        assert!(held.lookup(8).is_none());
    }

    #[test]
    fn enumeration_order_is_preserved() {
        let dir = ProcessDirectory::new();
        dir.refresh(vec![entry(30, "c"), entry(10, "a"), entry(20, "b")]);
        let pids: Vec<u32> = dir.current().processes().iter().map(|p| p.pid).collect();
        assert_eq!(pids, vec![30, 10, 20]);
    }

    #[test]
    fn concurrent_readers_never_see_mixed_passes() {
        let dir = Arc::new(ProcessDirectory::new());
        let stop = Arc::new(AtomicBool::new(false));

        let writer = {
            let dir = Arc::clone(&dir);
            let stop = Arc::clone(&stop);
            thread::spawn(move || {
                for pass in 1..=2_000u32 {
                    let name = format!("pass-{pass}");
                    dir.refresh((0..32).map(|pid| entry(pid, &name)).collect());
                }
                stop.store(true, Ordering::Release);
            })
        };

        let readers: Vec<_> = (0..4)
            .map(|_| {
                let dir = Arc::clone(&dir);
                let stop = Arc::clone(&stop);
                thread::spawn(move || {
                    while !stop.load(Ordering::Acquire) {
                        let v = dir.current();
                        if !v.is_populated() {
                            continue;
                        }
                        let expected = format!("pass-{}", v.version());
                        assert_eq!(v.len(), 32);
                        assert!(v.entries().iter().all(|e| e.info.name == expected));
                    }
                })
            })
            .collect();

        writer.join().expect("writer");
        for r in readers {
            r.join().expect("reader");
        }
        assert_eq!(dir.current_version(), 2_000);
    }
}
