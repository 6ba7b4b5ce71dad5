//! Process snapshots, role classification and fuzzy matching.
//!
//! A [`ProcessDescription`] is an immutable picture of one OS process taken at
//! listing time. Stored task descriptors carry descriptions too, and
//! [`ProcessLister::get_best_running_match`] re-resolves them against the live
//! process table before a tool is attached.

pub mod dispatch;
pub mod lister;

pub use lister::{ProcessLister, ProcessSource, RawProcess, SysinfoSource};

use crate::core::validation::check_string_value;
use crate::error::Result;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

pub const TYPE_SEARCH: &str = "splunk search";
pub const TYPE_SEARCH_RUNNER: &str = "splunk search runner";
pub const TYPE_PROCESS_RUNNER: &str = "splunk process-runner";
pub const TYPE_SERVER: &str = "splunkd server";
pub const TYPE_INDEX_SERVICE: &str = "splunk index service";
pub const TYPE_SCRIPTED_INPUT: &str = "splunk scripted input";
pub const TYPE_WEB: &str = "splunk web";
pub const TYPE_KVSTORE: &str = "splunk kvstore";
pub const TYPE_OTHER: &str = "other";

static SID_REX: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s--id=(\S+)").expect("static regex"));

/// Plain OS process snapshot
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Process {
    pub name: String,
    pub pid: u32,
    pub ppid: u32,
    pub args: String,
    pub process_type: String,
}

impl Process {
    pub fn new(
        name: impl Into<String>,
        pid: u32,
        ppid: u32,
        args: impl Into<String>,
        process_type: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            pid,
            ppid,
            args: args.into(),
            process_type: process_type.into(),
        }
    }

    pub fn may_match(&self, other: &Process) -> bool {
        self.process_type == other.process_type && self.name == other.name
    }

    pub fn match_score(&self, other: &Process) -> usize {
        [
            self.name == other.name,
            self.pid == other.pid,
            self.ppid == other.ppid,
            self.args == other.args,
            self.process_type == other.process_type,
        ]
        .iter()
        .filter(|equal| **equal)
        .count()
    }

    pub fn validate(&self) -> Result<()> {
        check_string_value(&self.name, "name")?;
        check_string_value(&self.process_type, "process_type")
    }
}

impl fmt::Display for Process {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}), Process Type: {}", self.name, self.pid, self.process_type)
    }
}

/// Search job process plus the job metadata read from its dispatch directory
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SearchProcess {
    pub process: Process,
    pub root_sid: String,
    pub savedsearch_name: String,
    pub running_app: String,
    pub running_user: String,
    pub search: String,
    #[serde(default)]
    pub owning_user: Option<String>,
    #[serde(default)]
    pub owning_app: Option<String>,
}

impl SearchProcess {
    pub fn may_match(&self, other: &SearchProcess) -> bool {
        if !self.process.may_match(&other.process) {
            return false;
        }
        self.root_sid == other.root_sid
            || (!self.savedsearch_name.is_empty() && self.savedsearch_name == other.savedsearch_name)
            || self.search == other.search
    }

    pub fn match_score(&self, other: &SearchProcess) -> usize {
        [
            self.process == other.process,
            self.root_sid == other.root_sid,
            self.savedsearch_name == other.savedsearch_name,
            self.running_app == other.running_app,
            self.running_user == other.running_user,
            self.search == other.search,
            self.owning_user == other.owning_user,
            self.owning_app == other.owning_app,
        ]
        .iter()
        .filter(|equal| **equal)
        .count()
    }

    pub fn validate(&self) -> Result<()> {
        self.process.validate()?;
        check_string_value(&self.root_sid, "root_sid")?;
        check_string_value(&self.savedsearch_name, "savedsearch_name")?;
        check_string_value(&self.running_app, "running_app")?;
        check_string_value(&self.running_user, "running_user")
    }
}

/// Either kind of process snapshot, tagged with `__class__` in JSON
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "__class__")]
pub enum ProcessDescription {
    Process(Process),
    SearchProcess(SearchProcess),
}

impl ProcessDescription {
    pub fn process(&self) -> &Process {
        match self {
            ProcessDescription::Process(p) => p,
            ProcessDescription::SearchProcess(s) => &s.process,
        }
    }

    pub fn pid(&self) -> u32 {
        self.process().pid
    }

    pub fn name(&self) -> &str {
        &self.process().name
    }

    pub fn args(&self) -> &str {
        &self.process().args
    }

    pub fn process_type(&self) -> &str {
        &self.process().process_type
    }

    /// Coarse compatibility gate: same variant and role, then per-kind identity
    pub fn may_match(&self, other: &ProcessDescription) -> bool {
        match (self, other) {
            (ProcessDescription::Process(a), ProcessDescription::Process(b)) => a.may_match(b),
            (ProcessDescription::SearchProcess(a), ProcessDescription::SearchProcess(b)) => a.may_match(b),
            _ => false,
        }
    }

    /// Number of attributes equal between the two descriptions
    pub fn match_score(&self, other: &ProcessDescription) -> usize {
        match (self, other) {
            (ProcessDescription::Process(a), ProcessDescription::Process(b)) => a.match_score(b),
            (ProcessDescription::SearchProcess(a), ProcessDescription::SearchProcess(b)) => a.match_score(b),
            _ => 0,
        }
    }

    pub fn validate(&self) -> Result<()> {
        match self {
            ProcessDescription::Process(p) => p.validate(),
            ProcessDescription::SearchProcess(s) => s.validate(),
        }
    }
}

impl From<Process> for ProcessDescription {
    fn from(process: Process) -> Self {
        ProcessDescription::Process(process)
    }
}

impl fmt::Display for ProcessDescription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProcessDescription::Process(p) => write!(f, "{}", p),
            ProcessDescription::SearchProcess(s) => write!(
                f,
                "{}, Search: {}, Saved search name: {}, Root SID: {}",
                s.process, s.search, s.savedsearch_name, s.root_sid
            ),
        }
    }
}

/// Extract the search id from a search process command line
pub fn search_id(args: &str) -> Option<&str> {
    SID_REX
        .captures(args)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str())
}

/// Classify a raw process by its name and command line.
///
/// Search processes get their job metadata from `dispatch_dir/<sid>/info.csv`;
/// when that cannot be read the plain process is returned with the search role.
pub fn build_process(
    name: &str,
    pid: u32,
    ppid: u32,
    args: &[String],
    dispatch_dir: &Path,
) -> ProcessDescription {
    let args = args.join(" ");
    let mut process_type = TYPE_OTHER;

    if !name.is_empty() && !args.is_empty() {
        if name == "splunkd" {
            if args.contains("search") {
                if let Some(sid) = search_id(&args) {
                    let process = Process::new(name, pid, ppid, args.clone(), TYPE_SEARCH);
                    return match dispatch::load_search_process(process.clone(), dispatch_dir, sid) {
                        Ok(search) => ProcessDescription::SearchProcess(search),
                        Err(e) => {
                            log::debug!("No search metadata for sid={}: {}", sid, e);
                            ProcessDescription::Process(process)
                        }
                    };
                }
                process_type = TYPE_SEARCH_RUNNER;
            } else if args.contains("process-runner") {
                process_type = TYPE_PROCESS_RUNNER;
            } else if (args.contains(" -p ") && args.contains("start")) || args.ends_with(" service") {
                process_type = TYPE_SERVER;
            } else if args.contains("fsck") || args.contains("recover-metadata") || args.contains("cluster_thing") {
                process_type = TYPE_INDEX_SERVICE;
            } else if args.contains("instrument-resource-usage") {
                process_type = TYPE_SCRIPTED_INPUT;
            }
        } else if name.starts_with("python") {
            if (args.contains("appserver") && args.contains("mrsparkle") && args.contains("root.py"))
                || args.starts_with("splunkweb")
            {
                process_type = TYPE_WEB;
            }
        } else if name == "mongod" && args.contains("var/lib/splunk/kvstore/mongo") {
            process_type = TYPE_KVSTORE;
        }
    }

    ProcessDescription::Process(Process::new(name, pid, ppid, args, process_type))
}
