use super::common::{running_record, FixedAllocations};
use rdiag::core::collector::spec::{ProcessSpec, StateSpec, TimedProcessSpec};
use rdiag::core::collector::{CollectorSpec, CollectorState, Resource};
use rdiag::core::process::{Process, ProcessDescription, TYPE_SERVER};
use rdiag::core::{ResourceManager, RunStatus};
use tempfile::TempDir;

fn server(pid: u32) -> ProcessDescription {
    Process::new("splunkd", pid, 1, "splunkd -p 8089 start", TYPE_SERVER).into()
}

fn strace(pid: u32, state: CollectorState) -> CollectorSpec {
    CollectorSpec::SystemCallTrace(TimedProcessSpec {
        collection_time: 10.0,
        process: server(pid),
        state,
    })
}

#[test]
fn test_resource_conflict_is_symmetric() {
    let samples = vec![
        Resource::new("ps"),
        Resource::new("ptrace"),
        Resource::for_process("ptrace", server(100)),
        Resource::for_process("ptrace", server(200)),
        Resource::for_process("lsof", server(100)),
        Resource::new("tcpdump"),
    ];
    for a in &samples {
        for b in &samples {
            assert_eq!(a.conflicts_with(b), b.conflicts_with(a), "{} vs {}", a, b);
        }
    }
    assert!(Resource::new("ptrace").conflicts_with(&Resource::for_process("ptrace", server(100))));
    assert!(!Resource::for_process("ptrace", server(100)).conflicts_with(&Resource::for_process("ptrace", server(200))));
}

#[test]
fn test_only_collecting_leaves_of_collecting_runs_hold_resources() {
    let dir = TempDir::new().unwrap();
    let holding = running_record(dir.path(), RunStatus::Collecting, vec![strace(100, CollectorState::Collecting)]);
    let idle_leaf = running_record(dir.path(), RunStatus::Collecting, vec![strace(200, CollectorState::Success)]);
    let monitoring = running_record(dir.path(), RunStatus::Monitoring, vec![strace(300, CollectorState::Collecting)]);

    let allocated = ResourceManager::allocated_resources(&[holding, idle_leaf, monitoring]);
    assert_eq!(allocated, vec![Resource::for_process("ptrace", server(100))]);
}

#[test]
fn test_admission_is_idempotent() {
    let dir = TempDir::new().unwrap();
    let allocations = FixedAllocations(vec![running_record(
        dir.path(),
        RunStatus::Collecting,
        vec![strace(100, CollectorState::Collecting)],
    )]);

    let incoming = CollectorSpec::build_all(&[
        CollectorSpec::StackTrace(ProcessSpec { process: server(100), state: CollectorState::Waiting }),
        CollectorSpec::PS(StateSpec::default()),
    ])
    .unwrap();
    let mut manager = ResourceManager::new(&incoming);

    let first = manager.should_start_task(&allocations);
    let first_conflicts = manager.conflicting().to_vec();
    let second = manager.should_start_task(&allocations);
    assert_eq!(first, second);
    assert!(!first);
    assert_eq!(first_conflicts, manager.conflicting());
    assert_eq!(first_conflicts, vec![Resource::for_process("ptrace", server(100))]);

    // the stack trace conflicts, the process listing does not
    assert!(manager.conflicts_with(incoming[0].as_ref()));
    assert!(!manager.conflicts_with(incoming[1].as_ref()));
}

#[test]
fn test_nothing_running_admits_everything() {
    let incoming = CollectorSpec::build_all(&[strace(100, CollectorState::Waiting)]).unwrap();
    let mut manager = ResourceManager::new(&incoming);
    assert!(manager.should_start_task(&FixedAllocations(vec![])));
    assert!(manager.conflicting().is_empty());
}
