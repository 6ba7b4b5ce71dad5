use super::common::session;
use rdiag::core::collector::spec::StateSpec;
use rdiag::core::collector::{
    AggregatedCollectorResult, CollectorResult, CollectorSpec, CollectorState, ResultStatus, RunContext,
    StateMachine,
};
use tempfile::TempDir;

const ORDER: [CollectorState; 8] = [
    CollectorState::Waiting,
    CollectorState::Started,
    CollectorState::Collecting,
    CollectorState::Aborting,
    CollectorState::Finished,
    CollectorState::Success,
    CollectorState::Failure,
    CollectorState::Aborted,
];

#[test]
fn test_state_never_moves_backwards() {
    let machine = StateMachine::new(CollectorState::Waiting);
    let attempts = [
        CollectorState::Collecting,
        CollectorState::Started,
        CollectorState::Waiting,
        CollectorState::Aborting,
        CollectorState::Collecting,
        CollectorState::Aborted,
        CollectorState::Success,
    ];
    let mut highest = CollectorState::Waiting;
    for attempt in attempts {
        let advanced = machine.promote(attempt, "PS", false).is_some();
        assert_eq!(advanced, attempt > highest);
        highest = highest.max(attempt);
        assert_eq!(machine.get(), highest);
    }
}

#[test]
fn test_state_names_are_ordered() {
    for pair in ORDER.windows(2) {
        assert!(pair[0] < pair[1], "{} should sort before {}", pair[0], pair[1]);
    }
    for state in ORDER {
        assert_eq!(CollectorState::from_name(state.as_str()), state);
    }
}

#[test]
fn test_collect_always_lands_on_terminal_state() {
    let dir = TempDir::new().unwrap();
    let ctx = RunContext::new(dir.path(), "", session(dir.path(), vec![], vec![]));

    // the diag binary does not exist under the temp root, so this fails
    let diag = CollectorSpec::Diag(StateSpec::default()).build().unwrap();
    let result = diag.collect(&ctx);
    assert!(result.is_failure());
    assert!(diag.state().is_terminal());
    assert_eq!(diag.state(), CollectorState::Failure);

    let aborting = CollectorSpec::Diag(StateSpec::default()).build().unwrap();
    aborting.promote_state(CollectorState::Aborting);
    let result = aborting.collect(&ctx);
    assert!(!result.is_success());
    assert!(aborting.state().is_terminal());
}

#[test]
fn test_aggregation_law() {
    let success = CollectorResult::success("ok");
    let failure = CollectorResult::failure("no");
    let aborted = CollectorResult::aborted("stop");

    let cases: Vec<(Vec<&CollectorResult>, ResultStatus)> = vec![
        (vec![&success, &success], ResultStatus::Success),
        (vec![&failure, &failure], ResultStatus::Failure),
        (vec![&success, &failure], ResultStatus::PartialSuccess),
        (vec![&failure, &success, &failure], ResultStatus::PartialSuccess),
        (vec![&success, &aborted], ResultStatus::Aborted),
        (vec![&failure, &aborted, &success], ResultStatus::Aborted),
    ];
    for (results, expected) in cases {
        let aggregate: AggregatedCollectorResult = results.iter().copied().collect();
        assert_eq!(aggregate.status(), expected);
    }

    // order does not matter
    let forward: AggregatedCollectorResult = [&success, &failure, &aborted].into_iter().collect();
    let backward: AggregatedCollectorResult = [&aborted, &failure, &success].into_iter().collect();
    assert_eq!(forward.status(), backward.status());
}
