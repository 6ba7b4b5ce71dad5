//! Fires when a search whose query matches a regex starts running.
//!
//! Splunk deletes a job's dispatch directory soon after the search ends, so
//! while the children run the trigger pins the directory with a `save` marker
//! and keeps renaming and compressing rotated `search.log.N` files. Once the
//! search process is gone the compressed logs and the non-sensitive job files
//! are copied under `<output>/dispatch/<sid>/`.

use super::{TriggerCore, ALL_RESOURCES_OCCUPIED};
use crate::core::collector::spec::SearchDebugSpec;
use crate::core::collector::{
    flatten_collectors, Collector, CollectorResult, CollectorSpec, CollectorState, CollectorType,
    Resource, RunContext, StateMachine,
};
use crate::core::process::dispatch::read_search_info;
use crate::core::process::ProcessDescription;
use crate::core::threadpool::{ThreadPool, Token};
use crate::core::trigger::log_monitor::SELF_REQUEST_MARKER;
use crate::core::trigger::monitored_file::FileId;
use crate::core::util::{build_timestamp, sleep_unless_aborted};
use crate::error::{DiagError, Result};
use flate2::write::GzEncoder;
use flate2::Compression;
use regex::Regex;
use std::collections::HashSet;
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, UNIX_EPOCH};

const POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Replicated search artifacts on cluster members
const REPLICATED_PREFIX: &str = "rsa_";

/// Marker file that keeps splunkd from reaping the job directory
const SAVE_MARKER: &str = "save";

const DUMMY_PROCESS_ARGS: &str = "this is just a dummy process";

const NO_COLLECTORS: &str = "No collectors to execute - returning search artefacts only.";

/// Process descriptions that stand in for "whatever search fires the trigger"
fn is_placeholder(process: &ProcessDescription) -> bool {
    process.pid() == 0 && process.args().starts_with(DUMMY_PROCESS_ARGS)
}

/// `search.log.N` with a single-digit N, as written by log rotation
fn is_rotated_log(name: &str) -> bool {
    name.strip_prefix("search.log.")
        .map(|rest| rest.len() == 1 && rest.chars().all(|c| c.is_ascii_digit()))
        .unwrap_or(false)
}

fn is_sensitive(name: &str) -> bool {
    name == SAVE_MARKER || name.ends_with(".gz") || name.starts_with("results") || name.ends_with(".token")
}

fn gzip_file(path: &Path) -> io::Result<()> {
    let mut target = path.as_os_str().to_owned();
    target.push(".gz");
    let mut input = File::open(path)?;
    let mut encoder = GzEncoder::new(File::create(&target)?, Compression::default());
    io::copy(&mut input, &mut encoder)?;
    encoder.finish()?;
    fs::remove_file(path)
}

/// Renames job logs out of the way once each, compressing them on one side worker
struct LogPreserver<'a> {
    archiver: &'a ThreadPool,
    known: HashSet<FileId>,
    pending: Vec<Token<()>>,
}

impl<'a> LogPreserver<'a> {
    fn new(archiver: &'a ThreadPool) -> Self {
        Self {
            archiver,
            known: HashSet::new(),
            pending: Vec::new(),
        }
    }

    fn preserve(&mut self, path: &Path) -> io::Result<()> {
        let metadata = fs::metadata(path)?;
        if !self.known.insert(FileId::of(&metadata)) {
            return Ok(());
        }
        let mtime = metadata
            .modified()?
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs_f64())
            .unwrap_or(0.0);
        let mut preserved = path.as_os_str().to_owned();
        preserved.push(format!(".{}", mtime));
        let preserved = PathBuf::from(preserved);

        log::debug!("Renaming {} to {}", path.display(), preserved.display());
        fs::rename(path, &preserved)?;
        self.pending.push(self.archiver.add_task(move || {
            if let Err(e) = gzip_file(&preserved) {
                log::error!("Error archiving the file {}: {}", preserved.display(), e);
            }
        }));
        Ok(())
    }

    fn preserve_rotated(&mut self, dispatch_dir: &Path) {
        let Ok(entries) = fs::read_dir(dispatch_dir) else {
            return;
        };
        let mut rotated: Vec<PathBuf> = entries
            .flatten()
            .filter(|e| is_rotated_log(&e.file_name().to_string_lossy()))
            .map(|e| e.path())
            .collect();
        rotated.sort();
        for path in rotated {
            if let Err(e) = self.preserve(&path) {
                log::error!("Error preserving {}: {}", path.display(), e);
            }
        }
    }

    /// Block until every queued compression is done
    fn finish(self) {
        for token in self.pending {
            token.wait(None);
        }
    }
}

pub struct SearchDebug {
    machine: StateMachine,
    core: TriggerCore,
    pattern: String,
    regex: Regex,
}

impl SearchDebug {
    pub fn from_spec(spec: &SearchDebugSpec) -> Result<Self> {
        let regex = Regex::new(&spec.search_regex)
            .map_err(|e| DiagError::validation(format!("search_regex is not valid: {}", e)))?;
        Ok(Self {
            machine: StateMachine::new(spec.state),
            core: TriggerCore::new(CollectorSpec::build_all(&spec.collectors)?),
            pattern: spec.search_regex.clone(),
            regex,
        })
    }

    /// Look at one job directory: `Some(process)` when it is the search to debug
    fn inspect(
        &self,
        job_dir: &Path,
        ctx: &RunContext,
        visited: &mut HashSet<PathBuf>,
    ) -> Option<ProcessDescription> {
        let sid = job_dir.file_name()?.to_string_lossy().to_string();
        if sid.starts_with(REPLICATED_PREFIX) {
            visited.insert(job_dir.to_path_buf());
            return None;
        }
        // info.csv may not be written yet, so unreadable jobs are retried
        let info = match read_search_info(job_dir) {
            Ok(info) => info,
            Err(e) => {
                log::debug!("Skipping dir='{}' reason='{}'", sid, e);
                return None;
            }
        };

        let search = info.get("_search").map(String::as_str).unwrap_or_default();
        if search.contains(SELF_REQUEST_MARKER) || !self.regex.is_match(search) {
            visited.insert(job_dir.to_path_buf());
            return None;
        }
        // a matching job stays unvisited until its search process shows up
        match ctx.session.process_lister().find_search_process(&sid) {
            Some(process) => Some(process),
            None => {
                log::info!("Search process for sid={} not found, it completed too early", sid);
                None
            }
        }
    }

    /// Run the children against `process` while keeping the job's artefacts
    fn collect_search(&self, job_dir: &Path, process: ProcessDescription, ctx: &RunContext) -> CollectorResult {
        self.core.filter_collectors(ctx);
        for (child, _) in flatten_collectors(&self.core.children()) {
            if child.process().as_ref().map(is_placeholder).unwrap_or(false) {
                child.retarget_process(&process);
            }
        }
        let tokens = self.core.submit(ctx);

        let archiver = ThreadPool::new(1, 1);
        let mut preserver = LogPreserver::new(&archiver);
        let save = job_dir.join(SAVE_MARKER);
        match File::create(&save) {
            Ok(_) => {
                let lister = ctx.session.process_lister();
                while self.state() != CollectorState::Aborting && lister.is_same_process_alive(&process) {
                    preserver.preserve_rotated(job_dir);
                    if sleep_unless_aborted(self, POLL_INTERVAL) {
                        break;
                    }
                }
                log::debug!("Search process {} has terminated", process.pid());
            }
            Err(e) => log::error!("Error preserving the dispatch directory files: {}", e),
        }

        preserver.preserve_rotated(job_dir);
        let latest = job_dir.join("search.log");
        if latest.exists() {
            if let Err(e) = preserver.preserve(&latest) {
                log::error!("Error preserving {}: {}", latest.display(), e);
            }
        }
        preserver.finish();

        let sid = job_dir.file_name().map(|n| n.to_os_string()).unwrap_or_default();
        let output = ctx.output_dir.join("dispatch").join(sid);
        if let Err(e) = fs::create_dir_all(&output) {
            log::debug!("While creating {}: {}", output.display(), e);
        }
        copy_job_files(job_dir, &output);
        let _ = fs::remove_file(&save);

        let result = self.core.wait_and_aggregate(tokens);
        if self.core.children().is_empty() {
            if self.core.has_conflicts() {
                return CollectorResult::failure(format!(
                    "{} Only gathering search dispatch directory data.",
                    ALL_RESOURCES_OCCUPIED
                ));
            }
            return CollectorResult::success(NO_COLLECTORS);
        }
        result
    }
}

/// Move compressed logs and copy the other top-level job files into `output`
fn copy_job_files(job_dir: &Path, output: &Path) {
    let Ok(entries) = fs::read_dir(job_dir) else {
        return;
    };
    for entry in entries.flatten() {
        let name = entry.file_name().to_string_lossy().to_string();
        let target = output.join(&name);
        let outcome = if name.starts_with("search.log.") && name.ends_with(".gz") {
            fs::rename(entry.path(), &target).or_else(|_| {
                fs::copy(entry.path(), &target)?;
                fs::remove_file(entry.path())
            })
        } else if is_sensitive(&name) || entry.path().is_dir() {
            continue;
        } else {
            fs::copy(entry.path(), &target).map(|_| ())
        };
        if let Err(e) = outcome {
            log::error!("Skipping file {}: {}", name, e);
        }
    }
}

impl Collector for SearchDebug {
    fn machine(&self) -> &StateMachine {
        &self.machine
    }

    fn class_name(&self) -> &'static str {
        "SearchDebug"
    }

    fn collector_type(&self) -> CollectorType {
        CollectorType::Continuous
    }

    fn required_resources(&self) -> Vec<Resource> {
        self.core.required_resources()
    }

    fn as_trigger(&self) -> Option<&TriggerCore> {
        Some(&self.core)
    }

    fn label(&self) -> String {
        format!("Search Debug(Search regex: {})", self.pattern)
    }

    fn collect_impl(&self, ctx: &RunContext) -> Result<CollectorResult> {
        let dispatch_dir = ctx.session.config().dispatch_dir();
        log::info!("Starting search debug collection with regular expression={}", self.pattern);
        let mut visited: HashSet<PathBuf> = HashSet::new();

        while self.state() != CollectorState::Aborting {
            let round = ctx.with_suffix(format!("_{}", build_timestamp()));
            let mut jobs: Vec<PathBuf> = fs::read_dir(&dispatch_dir)
                .map(|entries| entries.flatten().map(|e| e.path()).collect())
                .unwrap_or_default();
            jobs.retain(|job| job.is_dir() && !visited.contains(job));
            jobs.sort();

            for job in jobs {
                if let Some(process) = self.inspect(&job, &round, &mut visited) {
                    log::info!("Regex matched with the search dispatch directory {}", job.display());
                    self.promote_state(CollectorState::Collecting);
                    return Ok(self.collect_search(&job, process, &round));
                }
            }
            if sleep_unless_aborted(self, POLL_INTERVAL) {
                break;
            }
        }
        Ok(CollectorResult::aborted("Search Debug trigger aborted by user"))
    }

    fn to_spec(&self) -> CollectorSpec {
        CollectorSpec::SearchDebug(SearchDebugSpec {
            search_regex: self.pattern.clone(),
            collectors: self.core.child_specs(),
            state: self.state(),
        })
    }
}
