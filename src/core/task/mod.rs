//! Tasks and their run lifecycle.
//!
//! A [`Task`] is the persisted request: a name and a forest of collector
//! descriptors. Running it creates a [`RunInfo`] in the running area, submits
//! the collectors to the session pool (deferred ones last), persists every
//! state transition through a channel consumer, archives the output and moves
//! the record to the finished area.

pub mod aborter;
pub mod archive;
pub mod handler;
pub mod lock;
pub mod repr;
pub mod run_info;

pub use handler::TaskHandler;
pub use run_info::{RunInfo, RunStatus};

use crate::core::collector::{
    flatten_collectors, AggregatedCollectorResult, Collector, CollectorResult, CollectorSpec,
    CollectorState, RunContext, RunEvent, StateCallback, StateTransition,
};
use crate::core::process::{Process, ProcessDescription, TYPE_OTHER};
use crate::core::session::Session;
use crate::core::threadpool::Token;
use crate::core::util::build_timestamp;
use crate::core::validation::{check_length, check_string_value};
use crate::error::{DiagError, Result};
use aborter::CollectorAborter;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{mpsc, Arc};
use std::thread;

const MAX_NAME_LEN: usize = 256;
const MAX_DESCRIPTION_LEN: usize = 8192;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "__class__", rename = "Task")]
pub struct Task {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub collectors: Vec<CollectorSpec>,
    #[serde(default)]
    pub host: String,
    #[serde(default)]
    pub task_id: String,
}

impl Task {
    /// Decode and validate a task descriptor
    pub fn from_json(text: &str) -> Result<Self> {
        let value: serde_json::Value = serde_json::from_str(text)?;
        Self::from_value(value)
    }

    pub fn from_value(value: serde_json::Value) -> Result<Self> {
        match value.get("__class__").and_then(|c| c.as_str()) {
            Some("Task") => {}
            Some(other) => return Err(DiagError::schema(format!("expected a Task, got '{}'", other))),
            None => return Err(DiagError::schema("descriptor has no __class__")),
        }
        let mut task: Task =
            serde_json::from_value(value).map_err(|e| DiagError::schema(e.to_string()))?;
        task.name = task.name.trim().to_string();
        task.description = task.description.trim().to_string();
        task.validate()?;
        Ok(task)
    }

    pub fn validate(&self) -> Result<()> {
        check_length(&self.name, 1, MAX_NAME_LEN, "name")?;
        check_string_value(&self.name, "name")?;
        check_length(&self.description, 0, MAX_DESCRIPTION_LEN, "description")?;
        if self.task_id.trim().is_empty() {
            return Err(DiagError::validation("task_id : cannot be empty."));
        }
        if self.collectors.is_empty() {
            return Err(DiagError::validation("Collector list can not be empty."));
        }
        for collector in &self.collectors {
            collector.validate()?;
        }
        Ok(())
    }

    /// Live collector trees for this task's descriptors
    pub fn build_collectors(&self) -> Result<Vec<Arc<dyn Collector>>> {
        CollectorSpec::build_all(&self.collectors)
    }

    /// Put every collector back to `Waiting`
    pub fn reset_states(&mut self) -> Result<()> {
        let collectors = self.build_collectors()?;
        for collector in &collectors {
            collector.init_state();
        }
        self.collectors = collectors.iter().map(|c| c.to_spec()).collect();
        Ok(())
    }

    /// Write `<dir>/<name>.json`
    pub fn save(&self, dir: &Path) -> Result<PathBuf> {
        fs::create_dir_all(dir)?;
        let path = dir.join(format!("{}.json", self.name));
        fs::write(&path, serde_json::to_string_pretty(self)?)?;
        Ok(path)
    }

    /// Tree view: header line, then one branch per collector
    pub fn render_tree(&self) -> Result<String> {
        let collectors = self.build_collectors()?;
        let walk: Vec<(String, usize)> = flatten_collectors(&collectors)
            .into_iter()
            .map(|(collector, depth)| (collector.label(), depth))
            .collect();
        let header = format!("{}({}) : {}", self.name, self.task_id, self.description);
        Ok(repr::render_tree(&header, &walk))
    }

    /// Execute the task to completion and return the finished run record
    pub fn run(&self, session: &Arc<Session>) -> Result<RunInfo> {
        log::info!("Running task '{}' ({})", self.name, self.task_id);
        let collectors = self.build_collectors()?;
        let mut run = RunInfo::new(self.clone(), current_process(session), &session.config().output_root);
        run.start();
        let output_dir = run.running_output_dir();
        fs::create_dir_all(&output_dir)?;
        run.save();

        let (events, received) = mpsc::channel();
        for (collector, _) in flatten_collectors(&collectors) {
            collector.register_observer(events.clone());
        }
        let consumer = {
            let mut run = run.clone();
            let live = collectors.clone();
            thread::spawn(move || {
                for event in received {
                    let RunEvent::Transition(transition) = event else {
                        break;
                    };
                    record_transition(&mut run, &live, &transition);
                }
                run
            })
        };

        let ctx = RunContext::new(&output_dir, "", session.clone()).with_callback(log_transition(&self.name));
        let results = {
            let _aborter = CollectorAborter::new(&collectors);
            run_collectors(&collectors, &ctx, session)
        };

        let _ = events.send(RunEvent::Shutdown);
        let mut run = consumer
            .join()
            .map_err(|_| DiagError::other("run record writer panicked"))?;

        run.locked_update(|run| run.start_archival());
        let mut aggregate: AggregatedCollectorResult = results.iter().collect();
        let finished_dir = run.finished_output_dir();
        if let Err(e) = archive::archive_output(&output_dir, aggregate.status().as_str(), Some(&finished_dir)) {
            aggregate.add_result(&CollectorResult::exception(
                &e,
                format!("Exception while archiving files from outputDir={}", output_dir.display()),
            ));
        }
        let outcome = RunStatus::from(aggregate.status());
        run.locked_update(|run| run.finish(outcome));
        log::info!("Task '{}' finished: {}", self.name, run.status);
        Ok(run)
    }
}

/// Identity of the process executing the run, as later checked by abort and reconciliation
fn current_process(session: &Session) -> ProcessDescription {
    let pid = std::process::id();
    session
        .process_lister()
        .build_process_from_pid(pid)
        .unwrap_or_else(|e| {
            log::warn!("Could not describe the current process: {}", e);
            let args: Vec<String> = std::env::args().collect();
            let name = std::env::current_exe()
                .ok()
                .and_then(|p| p.file_name().map(|n| n.to_string_lossy().to_string()))
                .unwrap_or_else(|| "rdiag".to_string());
            Process::new(name, pid, 0, args.join(" "), TYPE_OTHER).into()
        })
}

fn log_transition(task: &str) -> StateCallback {
    let task = task.to_string();
    Arc::new(move |transition: &StateTransition| {
        log::debug!(
            "[{}] {}: {} -> {}",
            task,
            transition.collector,
            transition.previous,
            transition.current
        );
    })
}

/// Fold one transition into the run record and persist it
fn record_transition(run: &mut RunInfo, live: &[Arc<dyn Collector>], transition: &StateTransition) {
    let status = match (transition.current, transition.is_trigger) {
        (CollectorState::Started, true) => Some(RunStatus::Monitoring),
        (CollectorState::Started, false) => Some(RunStatus::Collecting),
        _ => None,
    };
    let snapshot: Vec<CollectorSpec> = live.iter().map(|c| c.to_spec()).collect();
    run.locked_update(|run| {
        run.task.collectors = snapshot;
        match status {
            Some(status) if status > run.status => run.promote(status),
            _ => run.save(),
        }
    });
}

/// Run the non-deferred collectors side by side, then the deferred ones one by one
fn run_collectors(collectors: &[Arc<dyn Collector>], ctx: &RunContext, session: &Session) -> Vec<CollectorResult> {
    let pool = session.pool();
    let submit = |collector: &Arc<dyn Collector>| {
        let collector = collector.clone();
        let ctx = ctx.with_suffix(format!("_{}", build_timestamp()));
        pool.add_task(move || collector.collect(&ctx))
    };
    let finish = |token: Token<CollectorResult>| {
        token.wait(None);
        token
            .take_result()
            .unwrap_or_else(|| CollectorResult::failure("Collector finished without a result"))
    };

    let (deferred, immediate): (Vec<_>, Vec<_>) = collectors.iter().partition(|c| c.is_deferred());
    let tokens: Vec<_> = immediate.into_iter().map(&submit).collect();
    let mut results: Vec<CollectorResult> = tokens.into_iter().map(&finish).collect();
    for collector in deferred {
        results.push(finish(submit(collector)));
    }
    results
}
