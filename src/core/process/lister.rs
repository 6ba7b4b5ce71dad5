//! Cached process table with best-match lookup.

use super::{build_process, ProcessDescription, TYPE_SEARCH};
use crate::error::{DiagError, Result};
use parking_lot::Mutex;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use sysinfo::{Pid, ProcessRefreshKind, ProcessesToUpdate, System, UpdateKind};

/// Default lifetime of a cached listing
pub const CACHE_TTL: Duration = Duration::from_secs(2);

/// Process as reported by the operating system, before classification
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawProcess {
    pub pid: u32,
    pub ppid: u32,
    pub name: String,
    pub args: Vec<String>,
}

/// Where process information comes from
pub trait ProcessSource: Send + Sync {
    fn list(&self) -> Vec<RawProcess>;
    fn get(&self, pid: u32) -> Option<RawProcess>;
}

/// Live process table via sysinfo
#[derive(Debug, Default)]
pub struct SysinfoSource;

impl SysinfoSource {
    fn refresh_kind() -> ProcessRefreshKind {
        ProcessRefreshKind::nothing().with_cmd(UpdateKind::Always)
    }

    fn to_raw(pid: Pid, process: &sysinfo::Process) -> RawProcess {
        RawProcess {
            pid: pid.as_u32(),
            ppid: process.parent().map(|p| p.as_u32()).unwrap_or(1),
            name: process.name().to_string_lossy().to_string(),
            args: process
                .cmd()
                .iter()
                .map(|arg| arg.to_string_lossy().to_string())
                .filter(|arg| !arg.is_empty())
                .collect(),
        }
    }
}

impl ProcessSource for SysinfoSource {
    fn list(&self) -> Vec<RawProcess> {
        let mut system = System::new();
        system.refresh_processes_specifics(ProcessesToUpdate::All, true, Self::refresh_kind());
        system
            .processes()
            .iter()
            .map(|(pid, process)| Self::to_raw(*pid, process))
            .collect()
    }

    fn get(&self, pid: u32) -> Option<RawProcess> {
        let pid = Pid::from_u32(pid);
        let mut system = System::new();
        system.refresh_processes_specifics(ProcessesToUpdate::Some(&[pid]), true, Self::refresh_kind());
        system.process(pid).map(|process| Self::to_raw(pid, process))
    }
}

#[derive(Default)]
struct CacheState {
    listing: Option<Arc<Vec<ProcessDescription>>>,
    refreshed_at: Option<Instant>,
    refreshing: bool,
}

/// Classifying, TTL-cached view of the process table.
///
/// Reads take the fast path while the listing is fresh. A stale listing is
/// rebuilt by a single caller holding the refresh lock; concurrent callers
/// keep getting the old copy meanwhile.
pub struct ProcessLister {
    source: Box<dyn ProcessSource>,
    dispatch_dir: PathBuf,
    ttl: Duration,
    cache: Mutex<CacheState>,
    refresh_lock: Mutex<()>,
    refreshes: AtomicUsize,
}

impl ProcessLister {
    pub fn new(source: Box<dyn ProcessSource>, dispatch_dir: impl Into<PathBuf>, ttl: Duration) -> Self {
        Self {
            source,
            dispatch_dir: dispatch_dir.into(),
            ttl,
            cache: Mutex::new(CacheState::default()),
            refresh_lock: Mutex::new(()),
            refreshes: AtomicUsize::new(0),
        }
    }

    /// Lister over the live OS table
    pub fn system(dispatch_dir: impl Into<PathBuf>, ttl: Duration) -> Self {
        Self::new(Box::new(SysinfoSource), dispatch_dir, ttl)
    }

    fn classify(&self, raw: &RawProcess) -> ProcessDescription {
        build_process(&raw.name, raw.pid, raw.ppid, &raw.args, &self.dispatch_dir)
    }

    /// Classify one pid straight from the OS, bypassing the cache
    pub fn build_process_from_pid(&self, pid: u32) -> Result<ProcessDescription> {
        self.source
            .get(pid)
            .map(|raw| self.classify(&raw))
            .ok_or_else(|| {
                DiagError::process_not_found(format!("Unable to find a matching process for pid: {}", pid))
            })
    }

    /// Current listing, refreshed when older than the TTL or when forced
    pub fn get_process_listing(&self, force_refresh: bool) -> Vec<ProcessDescription> {
        {
            let mut cache = self.cache.lock();
            if let (Some(listing), false) = (&cache.listing, force_refresh) {
                let fresh = cache
                    .refreshed_at
                    .map(|at| at.elapsed() < self.ttl)
                    .unwrap_or(false);
                if fresh || cache.refreshing {
                    return listing.as_ref().clone();
                }
            }
            cache.refreshing = true;
        }

        let _refreshing = self.refresh_lock.lock();
        if !force_refresh {
            // another caller may have refreshed while we waited
            let cache = self.cache.lock();
            if let (Some(listing), Some(at)) = (&cache.listing, cache.refreshed_at) {
                if at.elapsed() < self.ttl {
                    return listing.as_ref().clone();
                }
            }
        }

        let listing: Vec<ProcessDescription> =
            self.source.list().iter().map(|raw| self.classify(raw)).collect();
        self.refreshes.fetch_add(1, Ordering::Relaxed);
        log::debug!("Process listing refreshed, {} processes", listing.len());

        let mut cache = self.cache.lock();
        cache.listing = Some(Arc::new(listing.clone()));
        cache.refreshed_at = Some(Instant::now());
        cache.refreshing = false;
        listing
    }

    /// Number of times the OS table has actually been enumerated
    pub fn refresh_count(&self) -> usize {
        self.refreshes.load(Ordering::Relaxed)
    }

    /// Live process most similar to `description`.
    ///
    /// Only candidates passing `may_match` are scored. Equal scores resolve to
    /// the lowest PID so the answer does not depend on enumeration order.
    pub fn get_best_running_match(&self, description: &ProcessDescription) -> Option<ProcessDescription> {
        let mut candidates: Vec<ProcessDescription> = self
            .get_process_listing(false)
            .into_iter()
            .filter(|live| live.may_match(description))
            .collect();
        candidates.sort_by_key(|live| live.pid());

        let mut best: Option<(usize, ProcessDescription)> = None;
        for live in candidates {
            let score = live.match_score(description);
            if score > best.as_ref().map(|(s, _)| *s).unwrap_or(0) {
                best = Some((score, live));
            }
        }
        best.map(|(_, live)| live)
    }

    /// Running search process executing job `sid`, with a fresh listing
    pub fn find_search_process(&self, sid: &str) -> Option<ProcessDescription> {
        let marker = format!("--id={}", sid);
        self.get_process_listing(true)
            .into_iter()
            .find(|p| p.process_type() == TYPE_SEARCH && p.args().contains(&marker))
    }

    /// True while `description` still names the same live process (pid, name and args)
    pub fn is_same_process_alive(&self, description: &ProcessDescription) -> bool {
        match self.build_process_from_pid(description.pid()) {
            Ok(live) => live.name() == description.name() && live.args() == description.args(),
            Err(_) => false,
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::core::process::{Process, TYPE_SERVER};
    use parking_lot::RwLock;
    use std::thread;

    /// In-memory process table for tests
    #[derive(Default)]
    pub struct StaticSource {
        pub processes: RwLock<Vec<RawProcess>>,
    }

    impl StaticSource {
        pub fn with(processes: Vec<RawProcess>) -> Self {
            Self { processes: RwLock::new(processes) }
        }
    }

    impl ProcessSource for StaticSource {
        fn list(&self) -> Vec<RawProcess> {
            thread::sleep(Duration::from_millis(20));
            self.processes.read().clone()
        }

        fn get(&self, pid: u32) -> Option<RawProcess> {
            self.processes.read().iter().find(|p| p.pid == pid).cloned()
        }
    }

    fn raw(pid: u32, name: &str, args: &str) -> RawProcess {
        RawProcess {
            pid,
            ppid: 1,
            name: name.to_string(),
            args: args.split(' ').map(String::from).collect(),
        }
    }

    #[test]
    fn test_cached_listing_within_ttl() {
        let lister = ProcessLister::new(
            Box::new(StaticSource::with(vec![raw(10, "bash", "bash")])),
            "/nonexistent",
            Duration::from_secs(60),
        );
        assert_eq!(lister.get_process_listing(false).len(), 1);
        assert_eq!(lister.get_process_listing(false).len(), 1);
        assert_eq!(lister.refresh_count(), 1);
        lister.get_process_listing(true);
        assert_eq!(lister.refresh_count(), 2);
    }

    #[test]
    fn test_concurrent_readers_refresh_once() {
        let lister = Arc::new(ProcessLister::new(
            Box::new(StaticSource::with(vec![raw(10, "bash", "bash")])),
            "/nonexistent",
            Duration::from_secs(60),
        ));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let lister = lister.clone();
                thread::spawn(move || lister.get_process_listing(false).len())
            })
            .collect();
        for handle in handles {
            assert_eq!(handle.join().unwrap(), 1);
        }
        assert_eq!(lister.refresh_count(), 1);
    }

    #[test]
    fn test_best_match_prefers_lowest_pid_on_tie() {
        let lister = ProcessLister::new(
            Box::new(StaticSource::with(vec![
                raw(300, "splunkd", "splunkd -p 8089 start"),
                raw(200, "splunkd", "splunkd -p 8089 start"),
                raw(100, "bash", "bash"),
            ])),
            "/nonexistent",
            CACHE_TTL,
        );
        let wanted: ProcessDescription =
            Process::new("splunkd", 0, 1, "splunkd -p 8089 start", TYPE_SERVER).into();
        let best = lister.get_best_running_match(&wanted).unwrap();
        assert_eq!(best.pid(), 200);
    }

    #[test]
    fn test_build_process_from_missing_pid() {
        let lister = ProcessLister::new(Box::new(StaticSource::default()), "/nonexistent", CACHE_TTL);
        assert!(matches!(
            lister.build_process_from_pid(4242),
            Err(DiagError::ProcessNotFound(_))
        ));
    }
}
