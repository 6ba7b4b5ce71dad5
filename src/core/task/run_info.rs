//! Persisted lifecycle record of one task execution.

use super::lock::{RunLock, LOCK_TIMEOUT};
use super::Task;
use crate::core::collector::ResultStatus;
use crate::core::process::ProcessDescription;
use crate::core::util::{epoch_now, hash_name, timestamp_from_epoch};
use crate::error::{DiagError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

/// Name of the record file inside an output directory
pub const RECORD_FILE: &str = "task.json";

/// Ordered status of a run. Only the abort rollback ever moves it backwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum RunStatus {
    None = 0,
    Monitoring = 1,
    Collecting = 2,
    Archiving = 3,
    Aborting = 4,
    Finished = 5,
    Success = 6,
    Failure = 7,
    PartialSuccess = 8,
    Aborted = 9,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::None => "None",
            RunStatus::Monitoring => "Monitoring",
            RunStatus::Collecting => "Collecting",
            RunStatus::Archiving => "Archiving Results",
            RunStatus::Aborting => "Aborting",
            RunStatus::Finished => "Finished",
            RunStatus::Success => "Success",
            RunStatus::Failure => "Failure",
            RunStatus::PartialSuccess => "Partial Success",
            RunStatus::Aborted => "Aborted",
        }
    }

    pub fn parse(value: &str) -> Result<Self> {
        let status = match value {
            "None" => RunStatus::None,
            "Monitoring" => RunStatus::Monitoring,
            "Collecting" => RunStatus::Collecting,
            "Archiving Results" => RunStatus::Archiving,
            "Aborting" => RunStatus::Aborting,
            "Finished" => RunStatus::Finished,
            "Success" => RunStatus::Success,
            "Failure" => RunStatus::Failure,
            "Partial Success" => RunStatus::PartialSuccess,
            "Aborted" => RunStatus::Aborted,
            other => return Err(DiagError::schema(format!("Unknown run status '{}'", other))),
        };
        Ok(status)
    }
}

impl From<ResultStatus> for RunStatus {
    fn from(status: ResultStatus) -> Self {
        match status {
            ResultStatus::Success => RunStatus::Success,
            ResultStatus::PartialSuccess => RunStatus::PartialSuccess,
            ResultStatus::Failure => RunStatus::Failure,
            ResultStatus::Aborted => RunStatus::Aborted,
        }
    }
}

impl TryFrom<String> for RunStatus {
    type Error = DiagError;

    fn try_from(value: String) -> Result<Self> {
        RunStatus::parse(&value)
    }
}

impl From<RunStatus> for String {
    fn from(value: RunStatus) -> Self {
        value.as_str().to_string()
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// JSON shape of `task.json`
#[derive(Serialize, Deserialize)]
#[serde(tag = "__class__", rename = "RunInfo")]
struct RunRecord {
    task: Task,
    #[serde(default)]
    name: String,
    process: ProcessDescription,
    status: RunStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    created_at: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    output_directory: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    completed_at: Option<f64>,
    #[serde(default)]
    duration: u64,
}

/// Run record: the task, the process executing it and where it stands.
///
/// Output lives under `<root>/running/<hash>/<prefix>` while the run is in
/// progress and under `<root>/<hash>/<prefix>` once finished, where `<hash>`
/// is the SHA-256 of the task name and `<prefix>` is `<hash>_<created_at>`.
#[derive(Debug, Clone, PartialEq)]
pub struct RunInfo {
    pub task: Task,
    pub process: ProcessDescription,
    pub status: RunStatus,
    pub created_at: Option<f64>,
    pub completed_at: Option<f64>,
    output_root: PathBuf,
}

impl RunInfo {
    pub fn new(task: Task, process: ProcessDescription, output_root: impl Into<PathBuf>) -> Self {
        Self {
            task,
            process,
            status: RunStatus::None,
            created_at: None,
            completed_at: None,
            output_root: output_root.into(),
        }
    }

    /// Read a record file; `output_root` anchors the derived paths
    pub fn load(path: &Path, output_root: &Path) -> Result<Self> {
        let data = fs::read_to_string(path)?;
        let record: RunRecord =
            serde_json::from_str(&data).map_err(|e| DiagError::schema(format!("{:?}: {}", path, e)))?;
        Ok(Self {
            task: record.task,
            process: record.process,
            status: record.status,
            created_at: record.created_at,
            completed_at: record.completed_at,
            output_root: output_root.to_path_buf(),
        })
    }

    /// The newest on-disk version of this record, finished copy first
    pub fn reload(&self) -> Result<Self> {
        let finished = self.finished_output_dir().join(RECORD_FILE);
        if finished.exists() {
            return Self::load(&finished, &self.output_root);
        }
        Self::load(&self.running_output_dir().join(RECORD_FILE), &self.output_root)
    }

    pub fn output_root(&self) -> &Path {
        &self.output_root
    }

    pub fn is_running(&self) -> bool {
        self.status > RunStatus::None && self.status < RunStatus::Archiving
    }

    pub fn is_finished(&self) -> bool {
        self.status >= RunStatus::Finished
    }

    pub fn hashed_name(&self) -> String {
        hash_name(&self.task.name)
    }

    pub fn filename_prefix(&self) -> String {
        format!(
            "{}_{}",
            self.hashed_name(),
            timestamp_from_epoch(self.created_at.unwrap_or_default())
        )
    }

    pub fn running_output_dir(&self) -> PathBuf {
        self.output_root
            .join("running")
            .join(self.hashed_name())
            .join(self.filename_prefix())
    }

    pub fn finished_output_dir(&self) -> PathBuf {
        self.output_root.join(self.hashed_name()).join(self.filename_prefix())
    }

    pub fn output_dir(&self) -> PathBuf {
        if self.is_finished() {
            self.finished_output_dir()
        } else {
            self.running_output_dir()
        }
    }

    /// Final archive location
    pub fn archive_path(&self) -> PathBuf {
        self.output_root
            .join(self.hashed_name())
            .join(format!("{}.tar.gz", self.filename_prefix()))
    }

    pub fn lock_path(&self) -> PathBuf {
        self.finished_output_dir()
            .join(format!("{}.lock", self.filename_prefix()))
    }

    pub fn record_path(&self) -> PathBuf {
        self.output_dir().join(RECORD_FILE)
    }

    /// Whole seconds between creation and completion (or now)
    pub fn duration(&self) -> u64 {
        let Some(created) = self.created_at else {
            return 0;
        };
        let end = self.completed_at.unwrap_or_else(epoch_now);
        (end - created).max(0.0).ceil() as u64
    }

    /// Take the inter-process lock guarding this record
    pub fn lock(&self) -> Result<RunLock> {
        RunLock::acquire(&self.lock_path(), LOCK_TIMEOUT)
    }

    pub fn start(&mut self) {
        self.created_at = Some(epoch_now());
        self.completed_at = None;
    }

    /// Advance the status and persist; lower statuses are ignored
    pub fn promote(&mut self, status: RunStatus) {
        if status <= self.status {
            return;
        }
        self.status = status;
        self.save();
    }

    pub fn start_archival(&mut self) {
        self.completed_at = Some(epoch_now());
        self.promote(RunStatus::Archiving);
    }

    /// Record the outcome and move the run into the finished area
    pub fn finish(&mut self, outcome: RunStatus) {
        self.completed_at = Some(epoch_now());
        self.promote(RunStatus::Finished.max(outcome));
        self.move_to_finished();
    }

    /// Re-read under the lock, then apply `update` unless the run already finished.
    ///
    /// A lock that cannot be taken is logged and leaves the record as it was.
    pub fn locked_update(&mut self, update: impl FnOnce(&mut RunInfo)) -> bool {
        let _lock = match self.lock() {
            Ok(lock) => lock,
            Err(e) => {
                log::error!("Run record {:?} not updated: {}", self.record_path(), e);
                return false;
            }
        };
        if let Ok(on_disk) = self.reload() {
            if on_disk.is_finished() {
                log::debug!("Run of '{}' already finished, skipping update", self.task.name);
                *self = on_disk;
                return false;
            }
            self.status = self.status.max(on_disk.status);
        }
        update(self);
        true
    }

    pub fn locked_promote(&mut self, status: RunStatus) -> bool {
        self.locked_update(|run| run.promote(status))
    }

    fn move_to_finished(&self) {
        let running = self.running_output_dir();
        let archive = running.with_file_name(format!("{}.tar.gz", self.filename_prefix()));
        if archive.exists() {
            if let Some(parent) = self.archive_path().parent() {
                let _ = fs::create_dir_all(parent);
            }
            if let Err(e) = fs::rename(&archive, self.archive_path()) {
                log::error!("Could not move {:?} to {:?}: {}", archive, self.archive_path(), e);
            }
        }
        if running.exists() {
            if let Err(e) = fs::remove_dir_all(&running) {
                log::warn!("Could not remove {:?}: {}", running, e);
            }
        }
    }

    /// Delete the output directory and the archive of this run
    pub fn remove_output(&self) -> Result<()> {
        let output = self.output_dir();
        if output.exists() {
            fs::remove_dir_all(&output)?;
        }
        let archive = self.archive_path();
        if archive.exists() {
            fs::remove_file(&archive)?;
        }
        Ok(())
    }

    pub fn to_json(&self) -> Result<serde_json::Value> {
        Ok(serde_json::to_value(self.to_record())?)
    }

    fn to_record(&self) -> RunRecord {
        RunRecord {
            task: self.task.clone(),
            name: self.task.name.clone(),
            process: self.process.clone(),
            status: self.status,
            created_at: self.created_at,
            output_directory: self.created_at.map(|_| self.output_dir()),
            completed_at: self.completed_at,
            duration: self.duration(),
        }
    }

    /// Write `task.json`; failures are logged
    pub fn save(&self) {
        if let Err(e) = self.try_save() {
            log::error!("Error saving task status in {:?}: {}", self.record_path(), e);
        }
    }

    fn try_save(&self) -> Result<()> {
        let dir = self.output_dir();
        fs::create_dir_all(&dir)?;
        let data = serde_json::to_string_pretty(&self.to_record())?;
        fs::write(dir.join(RECORD_FILE), data)?;
        Ok(())
    }
}

impl fmt::Display for RunInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RunInfo(task: {}, process: {}, status: {})", self.task.name, self.process, self.status)
    }
}
