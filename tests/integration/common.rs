// Shared fixtures: an in-memory process table, fixed allocations and sessions over a temp root

use rdiag::core::collector::CollectorSpec;
use rdiag::core::process::{Process, ProcessDescription, ProcessSource, RawProcess, TYPE_OTHER};
use rdiag::core::resource_manager::AllocationSource;
use rdiag::core::{Config, RunInfo, RunStatus, Session, Task};
use std::path::Path;
use std::sync::Arc;

pub struct StaticSource(pub Vec<RawProcess>);

impl ProcessSource for StaticSource {
    fn list(&self) -> Vec<RawProcess> {
        self.0.clone()
    }

    fn get(&self, pid: u32) -> Option<RawProcess> {
        self.0.iter().find(|p| p.pid == pid).cloned()
    }
}

pub struct FixedAllocations(pub Vec<RunInfo>);

impl AllocationSource for FixedAllocations {
    fn running_tasks(&self) -> Vec<RunInfo> {
        self.0.clone()
    }
}

pub fn raw(pid: u32, ppid: u32, name: &str, args: &str) -> RawProcess {
    RawProcess {
        pid,
        ppid,
        name: name.to_string(),
        args: args.split(' ').map(String::from).collect(),
    }
}

pub fn session(root: &Path, processes: Vec<RawProcess>, running: Vec<RunInfo>) -> Arc<Session> {
    Session::builder(Config::with_root(root))
        .process_source(Box::new(StaticSource(processes)))
        .allocations(Arc::new(FixedAllocations(running)))
        .build()
}

pub fn task(name: &str, collectors: Vec<CollectorSpec>) -> Task {
    Task {
        name: name.to_string(),
        description: "integration".to_string(),
        collectors,
        host: "localhost".to_string(),
        task_id: format!("{}_localhost", name),
    }
}

pub fn owner() -> ProcessDescription {
    Process::new("rdiag", 4242, 1, "rdiag run task.json", TYPE_OTHER).into()
}

/// Run record in `status` holding `collectors`, not written to disk
pub fn running_record(root: &Path, status: RunStatus, collectors: Vec<CollectorSpec>) -> RunInfo {
    let mut run = RunInfo::new(task("holder", collectors), owner(), root);
    run.status = status;
    run
}
