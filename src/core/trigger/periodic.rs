//! Runs a fresh copy of its children every `interval` seconds, `sampleCount` times.

use super::TriggerCore;
use crate::core::collector::spec::PeriodicSpec;
use crate::core::collector::{
    flatten_collectors, AggregatedCollectorResult, Collector, CollectorResult, CollectorSpec,
    CollectorState, CollectorType, Resource, RunContext, StateMachine,
};
use crate::core::util::{build_timestamp, sleep_unless_aborted};
use crate::error::Result;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;

pub struct Periodic {
    machine: StateMachine,
    core: TriggerCore,
    template: Vec<CollectorSpec>,
    sample_count: u64,
    interval: f64,
    rounds: Mutex<Vec<CollectorResult>>,
}

impl Periodic {
    pub fn from_spec(spec: &PeriodicSpec) -> Result<Self> {
        Ok(Self {
            machine: StateMachine::new(spec.state),
            core: TriggerCore::new(CollectorSpec::build_all(&spec.collectors)?),
            template: spec.collectors.clone(),
            sample_count: spec.sample_count,
            interval: spec.interval,
            rounds: Mutex::new(Vec::new()),
        })
    }

    /// Results of the rounds run so far, in order
    pub fn round_results(&self) -> Vec<CollectorResult> {
        self.rounds.lock().clone()
    }

    /// New children from the configured set, in `Waiting`, hearing our observers
    fn fresh_children(&self) -> Result<Vec<Arc<dyn Collector>>> {
        let children = CollectorSpec::build_all(&self.template)?;
        let observers = self.machine.observers();
        for (child, _) in flatten_collectors(&children) {
            child.machine().reset();
            for observer in &observers {
                child.register_observer(observer.clone());
            }
        }
        Ok(children)
    }

    fn round_suffix(&self, round: u64) -> String {
        format!("_{}_{}", build_timestamp(), round)
    }
}

impl Collector for Periodic {
    fn machine(&self) -> &StateMachine {
        &self.machine
    }

    fn class_name(&self) -> &'static str {
        "Periodic"
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
        format!("Periodic(Sample count: {}, Interval: {}s)", self.sample_count, self.interval)
    }

    fn collect_impl(&self, ctx: &RunContext) -> Result<CollectorResult> {
        log::info!("Starting periodic collection: {}", self.label());
        self.rounds.lock().clear();
        let pause = Duration::from_secs_f64(self.interval);

        for round in 0..self.sample_count {
            if self.state() == CollectorState::Aborting {
                break;
            }
            self.core.reset_conflicts();
            self.core.replace_children(self.fresh_children()?);
            self.promote_state(CollectorState::Collecting);

            let result = self.core.fire(&ctx.with_suffix(self.round_suffix(round)));
            log::debug!("Periodic round {} finished: {}", round, result.status_string());
            self.rounds.lock().push(result);

            if round + 1 < self.sample_count && sleep_unless_aborted(self, pause) {
                break;
            }
        }

        if self.state() == CollectorState::Aborting {
            return Ok(CollectorResult::aborted("Periodic collector aborted by user"));
        }
        let rounds = self.rounds.lock();
        Ok(rounds.iter().collect::<AggregatedCollectorResult>().result())
    }

    fn to_spec(&self) -> CollectorSpec {
        CollectorSpec::Periodic(PeriodicSpec {
            sample_count: self.sample_count,
            interval: self.interval,
            collectors: self.core.child_specs(),
            state: self.state(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::collector::spec::StateSpec;
    use crate::core::collector::RunEvent;
    use crate::core::session::tests::test_session;
    use std::sync::mpsc;
    use tempfile::TempDir;

    fn periodic(sample_count: u64, interval: f64) -> Periodic {
        Periodic::from_spec(&PeriodicSpec {
            sample_count,
            interval,
            collectors: vec![CollectorSpec::Diag(StateSpec { state: CollectorState::Success })],
            state: CollectorState::Waiting,
        })
        .unwrap()
    }

    #[test]
    fn test_every_round_gets_fresh_children() {
        let dir = TempDir::new().unwrap();
        let ctx = RunContext::new(dir.path(), "", test_session(dir.path()));
        let trigger = periodic(2, 0.05);
        let (tx, rx) = mpsc::channel();
        trigger.register_observer(tx);

        trigger.collect(&ctx);
        let rounds = trigger.round_results();
        assert_eq!(rounds.len(), 2);
        // the diag binary is missing, so each fresh copy actually ran and failed
        assert!(rounds.iter().all(|r| r.is_failure()));

        let child_events = rx
            .try_iter()
            .filter(|e| matches!(e, RunEvent::Transition(t) if t.collector == "Splunk Diag"))
            .count();
        assert!(child_events >= 4, "saw {} child transitions", child_events);
    }

    #[test]
    fn test_abort_between_rounds() {
        let dir = TempDir::new().unwrap();
        let ctx = RunContext::new(dir.path(), "", test_session(dir.path()));
        let trigger = Arc::new(periodic(5, 30.0));
        let runner = trigger.clone();
        let handle = std::thread::spawn(move || runner.collect(&ctx));

        while trigger.round_results().is_empty() {
            std::thread::sleep(Duration::from_millis(20));
        }
        trigger.promote_state(CollectorState::Aborting);
        let result = handle.join().unwrap();
        assert!(result.is_aborted());
        assert_eq!(trigger.state(), CollectorState::Aborted);
        assert_eq!(trigger.round_results().len(), 1);
    }
}
