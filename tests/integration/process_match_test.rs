use super::common::{raw, StaticSource};
use rdiag::core::process::{ProcessDescription, ProcessLister};
use std::time::Duration;

fn lister(table: Vec<rdiag::core::process::RawProcess>) -> ProcessLister {
    ProcessLister::new(Box::new(StaticSource(table)), "/nonexistent", Duration::from_secs(60))
}

fn with_pid(description: &ProcessDescription, pid: u32) -> ProcessDescription {
    let mut process = description.process().clone();
    process.pid = pid;
    ProcessDescription::Process(process)
}

#[test]
fn test_equal_scores_pick_the_lowest_pid() {
    let lister = lister(vec![
        raw(300, 1, "splunkd", "splunkd -p 8089 start"),
        raw(200, 1, "splunkd", "splunkd -p 8089 start"),
        raw(250, 1, "python", "python script.py"),
    ]);
    let listing = lister.get_process_listing(false);
    let template = listing.iter().find(|p| p.pid() == 300).unwrap();

    // a restarted server: same identity, new pid
    let wanted = with_pid(template, 999);
    for _ in 0..5 {
        let best = lister.get_best_running_match(&wanted).unwrap();
        assert_eq!(best.pid(), 200);
    }
}

#[test]
fn test_higher_score_beats_lower_pid() {
    let lister = lister(vec![
        raw(200, 1, "splunkd", "splunkd -p 8089 start"),
        raw(300, 7, "splunkd", "splunkd -p 8089 start"),
    ]);
    let listing = lister.get_process_listing(false);
    let template = listing.iter().find(|p| p.pid() == 300).unwrap();
    let mut wanted = template.process().clone();
    wanted.pid = 999;
    let wanted = ProcessDescription::Process(wanted);

    // pid 300 also matches on ppid
    assert_eq!(lister.get_best_running_match(&wanted).unwrap().pid(), 300);
}

#[test]
fn test_no_candidate_of_the_same_kind() {
    let lister = lister(vec![raw(200, 1, "python", "python script.py")]);
    let listing = lister.get_process_listing(false);
    let python = listing[0].clone();

    let empty = lister_without_python();
    assert!(empty.get_best_running_match(&python).is_none());
    assert!(!empty.is_same_process_alive(&python));
    assert!(lister.is_same_process_alive(&python));
}

fn lister_without_python() -> ProcessLister {
    lister(vec![raw(200, 1, "splunkd", "splunkd -p 8089 start")])
}
