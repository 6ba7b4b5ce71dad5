use super::common::{running_record, session};
use rdiag::core::collector::spec::{PeriodicSpec, TimedProcessSpec};
use rdiag::core::collector::{Collector, CollectorSpec, CollectorState, RunContext};
use rdiag::core::process::{Process, ProcessDescription, TYPE_SERVER};
use rdiag::core::trigger::{Periodic, ALL_RESOURCES_OCCUPIED};
use rdiag::core::RunStatus;
use tempfile::TempDir;

fn server() -> ProcessDescription {
    Process::new("splunkd", 100, 1, "splunkd -p 8089 start", TYPE_SERVER).into()
}

fn strace(state: CollectorState) -> CollectorSpec {
    CollectorSpec::SystemCallTrace(TimedProcessSpec {
        collection_time: 10.0,
        process: server(),
        state,
    })
}

#[test]
fn test_every_round_reports_occupied_resources() {
    let dir = TempDir::new().unwrap();
    let holder = running_record(dir.path(), RunStatus::Collecting, vec![strace(CollectorState::Collecting)]);
    let session = session(dir.path(), vec![], vec![holder]);
    let ctx = RunContext::new(dir.path().join("out"), "", session.clone());

    let periodic = Periodic::from_spec(&PeriodicSpec {
        sample_count: 3,
        interval: 0.05,
        collectors: vec![strace(CollectorState::Waiting)],
        state: CollectorState::Waiting,
    })
    .unwrap();

    let result = periodic.collect(&ctx);
    assert!(result.is_failure());
    assert_eq!(periodic.state(), CollectorState::Failure);

    let rounds = periodic.round_results();
    assert_eq!(rounds.len(), 3);
    for round in &rounds {
        assert!(round.is_failure());
        assert_eq!(round.message, ALL_RESOURCES_OCCUPIED);
    }

    // the trace never ran, so strace was never even looked up
    assert!(session.tools().status("strace").is_none());
    assert!(periodic.as_trigger().unwrap().children().is_empty());
}

#[test]
fn test_rounds_run_when_resources_are_free() {
    let dir = TempDir::new().unwrap();
    let idle = running_record(dir.path(), RunStatus::Monitoring, vec![strace(CollectorState::Collecting)]);
    let session = session(dir.path(), vec![], vec![idle]);
    let ctx = RunContext::new(dir.path().join("out"), "", session);

    let periodic = Periodic::from_spec(&PeriodicSpec {
        sample_count: 2,
        interval: 0.05,
        collectors: vec![strace(CollectorState::Waiting)],
        state: CollectorState::Waiting,
    })
    .unwrap();

    periodic.collect(&ctx);
    let rounds = periodic.round_results();
    assert_eq!(rounds.len(), 2);
    // pid 100 is not in the process table, so each admitted trace fails on its own
    assert!(rounds.iter().all(|r| r.message != ALL_RESOURCES_OCCUPIED));
    assert_eq!(periodic.as_trigger().unwrap().children().len(), 1);
}
