use super::common::session;
use rdiag::core::collector::spec::{LogMonitorSpec, StateSpec};
use rdiag::core::collector::{Collector, CollectorSpec, CollectorState, RunContext};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tempfile::TempDir;

fn monitor(file: &str) -> Arc<dyn Collector> {
    CollectorSpec::LogMonitor(LogMonitorSpec {
        selected_file: file.to_string(),
        regex: "FATAL".to_string(),
        collectors: vec![CollectorSpec::Diag(StateSpec::default())],
        state: CollectorState::Waiting,
    })
    .build()
    .unwrap()
}

fn append(path: &std::path::Path, text: &str) {
    let mut file = OpenOptions::new().append(true).open(path).unwrap();
    file.write_all(text.as_bytes()).unwrap();
}

#[test]
fn test_abort_while_monitoring_leaves_children_untouched() {
    let dir = TempDir::new().unwrap();
    let session = session(dir.path(), vec![], vec![]);
    let log_dir = session.config().log_dir();
    fs::create_dir_all(&log_dir).unwrap();
    let log = log_dir.join("splunkd.log");
    fs::write(&log, "FATAL from before the monitor started\n").unwrap();

    let out = dir.path().join("out");
    fs::create_dir_all(&out).unwrap();
    let ctx = RunContext::new(&out, "", session);

    let trigger = monitor("splunkd.log");
    let runner = trigger.clone();
    let handle = thread::spawn(move || runner.collect(&ctx));

    assert!(trigger.wait_for_state(CollectorState::Started, Some(Duration::from_secs(5))) >= CollectorState::Started);
    append(&log, "INFO nothing to see\nWARN still fine\n");
    thread::sleep(Duration::from_millis(300));
    assert_eq!(trigger.state(), CollectorState::Started);

    trigger.promote_state(CollectorState::Aborting);
    let result = handle.join().unwrap();

    assert!(result.is_aborted());
    assert_eq!(trigger.state(), CollectorState::Aborted);
    let children = trigger.as_trigger().unwrap().children();
    assert_eq!(children.len(), 1);
    assert_eq!(children[0].state(), CollectorState::Waiting);
    assert_eq!(fs::read_dir(&out).unwrap().count(), 0);
}

#[test]
fn test_missing_log_file_fails_after_retries() {
    let dir = TempDir::new().unwrap();
    let ctx = RunContext::new(dir.path(), "", session(dir.path(), vec![], vec![]));

    let result = monitor("absent.log").collect(&ctx);
    assert!(result.is_failure());
    assert!(result.message.contains("Couldn't find the file"));
}
