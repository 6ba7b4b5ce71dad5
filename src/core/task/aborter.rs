//! Signal driven abort of the runs active in this process.
//!
//! SIGINT and SIGTERM arrive through `ctrlc`, whose handler thread promotes
//! every collector of every registered run to `Aborting`. On Linux SIGALRM is
//! forwarded to SIGINT and SIGHUP is ignored while at least one run is active;
//! the previous dispositions come back when the last run ends.

use crate::core::collector::{abort_collectors, Collector};
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use std::sync::{Arc, Once};

#[derive(Default)]
struct Registry {
    next_id: u64,
    runs: Vec<(u64, Vec<Arc<dyn Collector>>)>,
    saved: Option<platform::SavedHandlers>,
}

static REGISTRY: Lazy<Mutex<Registry>> = Lazy::new(|| Mutex::new(Registry::default()));
static HANDLER: Once = Once::new();

fn install_handler() {
    HANDLER.call_once(|| {
        let installed = ctrlc::set_handler(|| {
            log::info!("Abort signal received");
            if abort_active_runs() == 0 {
                std::process::exit(130);
            }
        });
        if let Err(e) = installed {
            log::warn!("Could not install the abort handler: {}", e);
        }
    });
}

/// Promote every collector of every active run to `Aborting`; returns the run count
pub fn abort_active_runs() -> usize {
    let runs: Vec<Vec<Arc<dyn Collector>>> =
        REGISTRY.lock().runs.iter().map(|(_, roots)| roots.clone()).collect();
    for roots in &runs {
        abort_collectors(roots);
    }
    runs.len()
}

/// Keeps a run's collectors reachable from the signal handler until dropped
pub struct CollectorAborter {
    id: u64,
    roots: Vec<Arc<dyn Collector>>,
}

impl CollectorAborter {
    pub fn new(roots: &[Arc<dyn Collector>]) -> Self {
        install_handler();
        let mut registry = REGISTRY.lock();
        if registry.runs.is_empty() {
            registry.saved = platform::override_signals();
        }
        registry.next_id += 1;
        let id = registry.next_id;
        registry.runs.push((id, roots.to_vec()));
        Self {
            id,
            roots: roots.to_vec(),
        }
    }

    /// Abort this run only
    pub fn abort(&self) {
        abort_collectors(&self.roots);
    }
}

impl Drop for CollectorAborter {
    fn drop(&mut self) {
        let mut registry = REGISTRY.lock();
        registry.runs.retain(|(id, _)| *id != self.id);
        if registry.runs.is_empty() {
            if let Some(saved) = registry.saved.take() {
                platform::restore_signals(saved);
            }
        }
    }
}

#[cfg(target_os = "linux")]
mod platform {
    pub struct SavedHandlers {
        hangup: libc::sighandler_t,
        alarm: libc::sighandler_t,
    }

    extern "C" fn forward_alarm(_signum: libc::c_int) {
        unsafe {
            libc::raise(libc::SIGINT);
        }
    }

    pub fn override_signals() -> Option<SavedHandlers> {
        let forward = forward_alarm as extern "C" fn(libc::c_int) as libc::sighandler_t;
        unsafe {
            Some(SavedHandlers {
                hangup: libc::signal(libc::SIGHUP, libc::SIG_IGN),
                alarm: libc::signal(libc::SIGALRM, forward),
            })
        }
    }

    pub fn restore_signals(saved: SavedHandlers) {
        unsafe {
            libc::signal(libc::SIGHUP, saved.hangup);
            libc::signal(libc::SIGALRM, saved.alarm);
        }
    }
}

#[cfg(not(target_os = "linux"))]
mod platform {
    pub struct SavedHandlers;

    pub fn override_signals() -> Option<SavedHandlers> {
        None
    }

    pub fn restore_signals(_saved: SavedHandlers) {}
}
