//! Fires on the first new log line matching a regex.

use super::{MonitoredFile, TriggerCore};
use crate::core::collector::spec::LogMonitorSpec;
use crate::core::collector::{
    Collector, CollectorResult, CollectorSpec, CollectorState, CollectorType, Resource, RunContext,
    StateMachine,
};
use crate::core::util::build_timestamp;
use crate::error::{DiagError, Result};
use regex::Regex;
use std::thread;
use std::time::Duration;

/// Consecutive failed opens/reads tolerated before giving up
pub const MAX_RETRIES: u32 = 10;

/// Lines logged by our own REST traffic never fire the trigger
pub const SELF_REQUEST_MARKER: &str = "/rdiag/";

const IDLE_SLEEP: Duration = Duration::from_millis(100);
const RETRY_SLEEP: Duration = Duration::from_millis(200);

pub struct LogMonitor {
    machine: StateMachine,
    core: TriggerCore,
    selected_file: String,
    pattern: String,
    regex: Regex,
}

impl LogMonitor {
    pub fn from_spec(spec: &LogMonitorSpec) -> Result<Self> {
        let regex = Regex::new(&spec.regex)
            .map_err(|e| DiagError::validation(format!("regex is not valid: {}", e)))?;
        Ok(Self {
            machine: StateMachine::new(spec.state),
            core: TriggerCore::new(CollectorSpec::build_all(&spec.collectors)?),
            selected_file: spec.selected_file.clone(),
            pattern: spec.regex.clone(),
            regex,
        })
    }

    /// Tail the file until a match (`Some`) or an abort request (`None`)
    fn watch(&self, file: &mut MonitoredFile, retries: &mut u32) -> std::io::Result<Option<String>> {
        while self.state() != CollectorState::Aborting {
            let line = file.read_line()?;
            *retries = MAX_RETRIES;
            match line {
                None => thread::sleep(IDLE_SLEEP),
                Some(line) if line.contains(SELF_REQUEST_MARKER) => {}
                Some(line) if self.regex.is_match(&line) => return Ok(Some(line)),
                Some(_) => {}
            }
        }
        Ok(None)
    }
}

impl Collector for LogMonitor {
    fn machine(&self) -> &StateMachine {
        &self.machine
    }

    fn class_name(&self) -> &'static str {
        "LogMonitor"
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
        format!("Log Monitor(Selected file: {}, Regex: {})", self.selected_file, self.pattern)
    }

    fn collect_impl(&self, ctx: &RunContext) -> Result<CollectorResult> {
        let path = ctx.session.config().log_dir().join(&self.selected_file);
        log::info!("Starting log monitor on {} with regex={}", path.display(), self.pattern);
        let ctx = ctx.with_suffix(format!("_{}", build_timestamp()));

        let mut retries = MAX_RETRIES;
        while retries > 0 {
            let watched = MonitoredFile::open(&path).and_then(|mut file| self.watch(&mut file, &mut retries));
            match watched {
                Ok(Some(line)) => {
                    log::info!("Regex matched in {}: {}", self.selected_file, line.trim_end());
                    self.promote_state(CollectorState::Collecting);
                    return Ok(self.core.fire(&ctx));
                }
                Ok(None) => break,
                Err(e) => {
                    retries -= 1;
                    if self.state() == CollectorState::Aborting {
                        break;
                    }
                    if retries == 0 {
                        log::debug!("Last read error on {}: {}", path.display(), e);
                        return Ok(CollectorResult::failure(format!(
                            "Couldn't find the file {}",
                            path.display()
                        )));
                    }
                    thread::sleep(RETRY_SLEEP);
                }
            }
        }
        Ok(CollectorResult::aborted("Log Monitor trigger aborted by user"))
    }

    fn to_spec(&self) -> CollectorSpec {
        CollectorSpec::LogMonitor(LogMonitorSpec {
            selected_file: self.selected_file.clone(),
            regex: self.pattern.clone(),
            collectors: self.core.child_specs(),
            state: self.state(),
        })
    }
}
