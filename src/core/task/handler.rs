//! Create, list, abort and delete runs, and reconcile records whose owner died.

use super::run_info::RECORD_FILE;
use super::{current_process, RunInfo, RunStatus, Task};
use crate::core::collector::resource::describe;
use crate::core::config::Config;
use crate::core::process::ProcessLister;
use crate::core::resource_manager::{AllocationSource, ResourceManager};
use crate::core::session::Session;
use crate::core::util::{build_timestamp, SERVER_NAME};
use crate::error::{DiagError, Result};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// Empty running directories younger than this are left alone
const STALE_RUNNING_DIR: Duration = Duration::from_secs(10 * 60);

const MAX_TASK_ID_LEN: usize = 250;

/// Message recorded when a task is refused admission
pub const IDENTICAL_TASK_RUNNING: &str = "A task with identical collector(s) is already running.";

/// Entry point for everything done to run records on disk
pub struct TaskHandler {
    config: Config,
    processes: Arc<ProcessLister>,
}

impl TaskHandler {
    pub fn new(config: Config, processes: Arc<ProcessLister>) -> Self {
        Self { config, processes }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// `<name>_<host>_<timestamp>`, keeping the last 250 characters
    pub fn build_task_id(name: &str, host: &str) -> String {
        let id = format!("{}_{}_{}", name, host, build_timestamp());
        let chars: Vec<char> = id.chars().collect();
        let start = chars.len().saturating_sub(MAX_TASK_ID_LEN);
        chars[start..].iter().collect()
    }

    /// Decode a task descriptor and run it, unless its resources are taken.
    ///
    /// A refused task still leaves a finished record with status `Failure`.
    pub fn create(&self, session: &Arc<Session>, json: &str) -> Result<RunInfo> {
        let mut task = Task::from_json(json)?;
        task.reset_states()?;

        let collectors = task.build_collectors()?;
        let mut manager = ResourceManager::new(&collectors);
        if !manager.should_start_task(session.allocations()) {
            log::warn!(
                "{} Task '{}' conflicts on: {}",
                IDENTICAL_TASK_RUNNING,
                task.name,
                describe(manager.conflicting())
            );
            let mut run = RunInfo::new(task, current_process(session), &self.config.output_root);
            run.start();
            run.save();
            run.locked_update(|run| run.finish(RunStatus::Failure));
            return Ok(run);
        }

        let saved = task.save(&self.config.tasks_dir())?;
        log::debug!("Task '{}' saved to {:?}", task.name, saved);
        task.run(session)
    }

    /// Every finished and running record; running ones on `host` are reconciled first
    pub fn list(&self, host: &str) -> Vec<RunInfo> {
        self.prune_running_dirs();

        let mut runs = self.finished_records();
        for run in self.running_records() {
            if run.task.host == host {
                runs.push(self.reconcile(run));
            } else {
                runs.push(run);
            }
        }
        runs.sort_by(|a, b| {
            a.created_at
                .partial_cmp(&b.created_at)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        runs
    }

    /// Ask the process owning `run` to abort it.
    ///
    /// The record is marked `Aborting` first. When the recorded owner is gone
    /// or its pid now belongs to another program the run is finished as
    /// `Failure` right away; when the signal cannot be sent the previous
    /// status is put back.
    pub fn abort(&self, run: &RunInfo) -> Result<RunInfo> {
        if !run.is_running() {
            log::info!("Run of '{}' is not running ({}), nothing to abort", run.task.name, run.status);
            return Ok(run.clone());
        }

        let _lock = run.lock()?;
        let mut run = run.reload()?;
        if !run.is_running() {
            return Ok(run);
        }

        let previous = run.status;
        run.promote(RunStatus::Aborting);

        let pid = run.process.pid();
        let owner_alive = match self.processes.build_process_from_pid(pid) {
            Ok(live) => live.name() == run.process.name() && live.args() == run.process.args(),
            Err(_) => false,
        };
        if !owner_alive {
            log::warn!("Process {} no longer runs '{}', marking it failed", pid, run.task.name);
            run.finish(RunStatus::Failure);
            return Ok(run);
        }

        if let Err(e) = send_interrupt(pid) {
            log::error!("Could not signal process {}: {}", pid, e);
            run.status = previous;
            run.save();
            return Err(e);
        }
        log::info!("Abort requested for '{}' (pid {})", run.task.name, pid);
        Ok(run)
    }

    /// Remove the output of a run that is no longer running
    pub fn delete(&self, run: &RunInfo) -> Result<bool> {
        let run = run.reload().unwrap_or_else(|_| run.clone());
        if run.is_running() || run.status == RunStatus::Archiving {
            log::warn!("Refusing to delete '{}' while it is {}", run.task.name, run.status);
            return Ok(false);
        }
        run.remove_output()?;
        if let Some(parent) = run.finished_output_dir().parent() {
            remove_if_empty(parent);
        }
        log::info!("Deleted run of '{}'", run.task.name);
        Ok(true)
    }

    /// Finish as `Failure` a running record whose owning process is gone
    pub fn reconcile(&self, mut run: RunInfo) -> RunInfo {
        if run.is_finished() {
            return run;
        }
        let processes = self.processes.clone();
        run.locked_update(|run| {
            if !processes.is_same_process_alive(&run.process) {
                log::warn!(
                    "Owner of '{}' ({}) is gone, marking the run failed",
                    run.task.name,
                    run.process
                );
                run.finish(RunStatus::Failure);
            }
        });
        run
    }

    /// Records found under `<root>/<hash>/<prefix>/task.json`
    pub fn finished_records(&self) -> Vec<RunInfo> {
        let root = &self.config.output_root;
        let skip = [self.config.running_dir(), self.config.tasks_dir()];
        records_under(root, &skip, root)
    }

    /// Records found under `<root>/running/<hash>/<prefix>/task.json`
    pub fn running_records(&self) -> Vec<RunInfo> {
        records_under(&self.config.running_dir(), &[], &self.config.output_root)
    }

    /// Drop empty run directories left behind by processes that never wrote a record
    fn prune_running_dirs(&self) {
        for hash_dir in subdirs(&self.config.running_dir()) {
            for run_dir in subdirs(&hash_dir) {
                let stale = fs::metadata(&run_dir)
                    .and_then(|m| m.modified())
                    .ok()
                    .and_then(|modified| modified.elapsed().ok())
                    .map(|age| age > STALE_RUNNING_DIR)
                    .unwrap_or(false);
                if stale && remove_if_empty(&run_dir) {
                    log::debug!("Pruned empty running directory {:?}", run_dir);
                }
            }
            remove_if_empty(&hash_dir);
        }
    }
}

impl AllocationSource for TaskHandler {
    fn running_tasks(&self) -> Vec<RunInfo> {
        self.running_records()
            .into_iter()
            .map(|run| {
                if run.task.host == SERVER_NAME.as_str() {
                    self.reconcile(run)
                } else {
                    run
                }
            })
            .filter(|run| !run.is_finished())
            .collect()
    }
}

fn subdirs(dir: &Path) -> Vec<PathBuf> {
    let Ok(entries) = fs::read_dir(dir) else {
        return Vec::new();
    };
    let mut dirs: Vec<PathBuf> = entries
        .flatten()
        .map(|e| e.path())
        .filter(|p| p.is_dir())
        .collect();
    dirs.sort();
    dirs
}

fn remove_if_empty(dir: &Path) -> bool {
    let empty = fs::read_dir(dir)
        .map(|mut entries| entries.next().is_none())
        .unwrap_or(false);
    empty && fs::remove_dir(dir).is_ok()
}

/// Load every `<dir>/*/*/task.json`, skipping the directories in `skip`
fn records_under(dir: &Path, skip: &[PathBuf], output_root: &Path) -> Vec<RunInfo> {
    let mut runs = Vec::new();
    for hash_dir in subdirs(dir).into_iter().filter(|d| !skip.contains(d)) {
        for run_dir in subdirs(&hash_dir) {
            let record = run_dir.join(RECORD_FILE);
            if !record.is_file() {
                continue;
            }
            match RunInfo::load(&record, output_root) {
                Ok(run) => runs.push(run),
                Err(e) => log::warn!("Skipping unreadable run record {:?}: {}", record, e),
            }
        }
    }
    runs
}

#[cfg(unix)]
fn send_interrupt(pid: u32) -> Result<()> {
    let pid = libc::pid_t::try_from(pid).map_err(|_| DiagError::other(format!("invalid pid {}", pid)))?;
    if unsafe { libc::kill(pid, libc::SIGINT) } != 0 {
        return Err(std::io::Error::last_os_error().into());
    }
    Ok(())
}

#[cfg(not(unix))]
fn send_interrupt(pid: u32) -> Result<()> {
    Err(DiagError::other(format!(
        "Sending an interrupt to process {} is not supported on this platform",
        pid
    )))
}
