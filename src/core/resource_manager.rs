//! Admission control: which incoming collectors would fight running ones.

use crate::core::collector::{flatten_collectors, Collector, CollectorSpec, CollectorState, Resource};
use crate::core::collector::resource::describe;
use crate::core::task::{RunInfo, RunStatus};
use std::sync::Arc;

/// Supplies the run records currently in the running area
pub trait AllocationSource: Send + Sync {
    fn running_tasks(&self) -> Vec<RunInfo>;
}

/// Never reports anything as allocated
#[derive(Debug, Default)]
pub struct NoAllocations;

impl AllocationSource for NoAllocations {
    fn running_tasks(&self) -> Vec<RunInfo> {
        Vec::new()
    }
}

fn push_unique(set: &mut Vec<Resource>, resource: Resource) {
    if !set.contains(&resource) {
        set.push(resource);
    }
}

/// Conflict computation for one candidate collector set
#[derive(Debug, Clone)]
pub struct ResourceManager {
    required: Vec<Resource>,
    conflicting: Vec<Resource>,
}

impl ResourceManager {
    /// Gather the resources of every leaf reachable from `incoming`
    pub fn new(incoming: &[Arc<dyn Collector>]) -> Self {
        let mut required = Vec::new();
        for (collector, _) in flatten_collectors(incoming) {
            if collector.is_trigger() {
                continue;
            }
            for resource in collector.required_resources() {
                push_unique(&mut required, resource);
            }
        }
        Self { required, conflicting: Vec::new() }
    }

    pub fn required(&self) -> &[Resource] {
        &self.required
    }

    pub fn conflicting(&self) -> &[Resource] {
        &self.conflicting
    }

    /// Resources held by collecting leaves of collecting runs
    pub fn allocated_resources(running: &[RunInfo]) -> Vec<Resource> {
        let mut allocated = Vec::new();
        for run in running.iter().filter(|run| run.status == RunStatus::Collecting) {
            for spec in CollectorSpec::flatten(&run.task.collectors) {
                if spec.is_trigger() || spec.state() != CollectorState::Collecting {
                    continue;
                }
                match spec.build() {
                    Ok(collector) => {
                        for resource in collector.required_resources() {
                            push_unique(&mut allocated, resource);
                        }
                    }
                    Err(e) => log::warn!("Skipping unreadable collector of '{}': {}", run.task.name, e),
                }
            }
        }
        allocated
    }

    /// Recompute the conflict set against `source`; true when nothing conflicts
    pub fn should_start_task(&mut self, source: &dyn AllocationSource) -> bool {
        let allocated = Self::allocated_resources(&source.running_tasks());
        self.conflicting = self
            .required
            .iter()
            .filter(|required| allocated.iter().any(|held| required.conflicts_with(held)))
            .cloned()
            .collect();

        if self.conflicting.is_empty() {
            return true;
        }
        log::info!(
            "Required resources {} are already in use; allocated: {}",
            describe(&self.conflicting),
            describe(&allocated)
        );
        false
    }

    /// True when any resource of `collector` is in the conflict set
    pub fn conflicts_with(&self, collector: &dyn Collector) -> bool {
        collector
            .required_resources()
            .iter()
            .any(|resource| self.conflicting.iter().any(|c| c.conflicts_with(resource)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::collector::tests::FnCollector;
    use crate::core::collector::spec::{StateSpec, TimedProcessSpec};
    use crate::core::collector::CollectorResult;
    use crate::core::process::{Process, ProcessDescription};
    use crate::core::task::tests::running_record;

    struct Fixed(Vec<RunInfo>);

    impl AllocationSource for Fixed {
        fn running_tasks(&self) -> Vec<RunInfo> {
            self.0.clone()
        }
    }

    fn target(pid: u32) -> ProcessDescription {
        Process::new("splunkd", pid, 1, "splunkd search", "splunk search").into()
    }

    fn strace_on(pid: u32, state: CollectorState) -> CollectorSpec {
        CollectorSpec::SystemCallTrace(TimedProcessSpec {
            collection_time: 60.0,
            process: target(pid),
            state,
        })
    }

    fn leaf(resources: Vec<Resource>) -> Arc<dyn Collector> {
        Arc::new(FnCollector::new(|_| Ok(CollectorResult::success(""))).with_resources(resources))
    }

    #[test]
    fn test_conflict_on_same_tool_and_process() {
        let source = Fixed(vec![running_record(
            RunStatus::Collecting,
            vec![strace_on(100, CollectorState::Collecting)],
        )]);
        let mut manager = ResourceManager::new(&[leaf(vec![Resource::for_process("ptrace", target(100))])]);
        assert!(!manager.should_start_task(&source));
        assert_eq!(manager.conflicting().len(), 1);

        // unchanged snapshot, unchanged answer
        let first = manager.conflicting().to_vec();
        assert!(!manager.should_start_task(&source));
        assert_eq!(manager.conflicting(), first.as_slice());
    }

    #[test]
    fn test_other_process_or_idle_collector_is_admitted() {
        let source = Fixed(vec![
            running_record(RunStatus::Collecting, vec![strace_on(100, CollectorState::Collecting)]),
            running_record(RunStatus::Collecting, vec![strace_on(300, CollectorState::Waiting)]),
            running_record(RunStatus::Monitoring, vec![strace_on(400, CollectorState::Collecting)]),
        ]);
        for pid in [200, 300, 400] {
            let mut manager =
                ResourceManager::new(&[leaf(vec![Resource::for_process("ptrace", target(pid))])]);
            assert!(manager.should_start_task(&source), "pid {} should be free", pid);
        }
    }

    #[test]
    fn test_unqualified_resource_conflicts_with_any_process() {
        let source = Fixed(vec![running_record(
            RunStatus::Collecting,
            vec![
                strace_on(100, CollectorState::Collecting),
                CollectorSpec::PS(StateSpec { state: CollectorState::Collecting }),
            ],
        )]);
        let mut manager = ResourceManager::new(&[
            leaf(vec![Resource::new("ptrace")]),
            leaf(vec![Resource::new("lsof")]),
        ]);
        assert!(!manager.should_start_task(&source));
        assert_eq!(manager.conflicting(), &[Resource::new("ptrace")]);
    }
}
