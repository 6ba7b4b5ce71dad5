use super::common::{owner, session, task, StaticSource};
use flate2::read::GzDecoder;
use rdiag::core::collector::spec::StateSpec;
use rdiag::core::collector::{CollectorSpec, CollectorState};
use rdiag::core::process::ProcessLister;
use rdiag::core::task::run_info::RECORD_FILE;
use rdiag::core::util::SERVER_NAME;
use rdiag::core::{Config, RunInfo, RunStatus, TaskHandler};
use std::fs::File;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

fn archive_members(path: &std::path::Path) -> Vec<String> {
    let mut archive = tar::Archive::new(GzDecoder::new(File::open(path).unwrap()));
    archive
        .entries()
        .unwrap()
        .map(|e| e.unwrap().path().unwrap().to_string_lossy().to_string())
        .collect()
}

#[test]
fn test_run_archives_output_and_moves_record_to_finished() {
    let dir = TempDir::new().unwrap();
    let session = session(dir.path(), vec![], vec![]);
    let task = task("lifecycle", vec![CollectorSpec::Diag(StateSpec::default())]);

    let run = task.run(&session).unwrap();

    // the diag binary is missing under the temp root
    assert_eq!(run.status, RunStatus::Failure);
    assert!(run.is_finished());
    assert!(run.completed_at.is_some());
    assert!(!run.running_output_dir().exists());
    assert!(run.archive_path().is_file());

    let members = archive_members(&run.archive_path());
    let prefix = run.filename_prefix();
    assert!(members.contains(&format!("{}/{}", prefix, RECORD_FILE)), "{:?}", members);
    assert!(members.iter().any(|m| m.starts_with(&format!("{}/diag_", prefix))), "{:?}", members);

    let stored = RunInfo::load(&run.finished_output_dir().join(RECORD_FILE), &session.config().output_root).unwrap();
    assert_eq!(stored.status, RunStatus::Failure);
    assert_eq!(stored.task.collectors[0].state(), CollectorState::Failure);
}

#[test]
fn test_orphaned_running_record_is_reconciled_on_list() {
    let dir = TempDir::new().unwrap();
    let config = Config::with_root(dir.path());
    let lister = ProcessLister::new(Box::new(StaticSource(vec![])), config.dispatch_dir(), Duration::from_secs(60));
    let handler = TaskHandler::new(config.clone(), Arc::new(lister));

    let mut record = task("orphan", vec![CollectorSpec::PS(StateSpec { state: CollectorState::Collecting })]);
    record.host = SERVER_NAME.to_string();
    let mut run = RunInfo::new(record, owner(), &config.output_root);
    run.start();
    run.promote(RunStatus::Collecting);
    assert!(run.running_output_dir().join(RECORD_FILE).is_file());

    let listed = handler.list(SERVER_NAME.as_str());
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].status, RunStatus::Failure);
    assert!(!run.running_output_dir().exists());

    // a second listing finds it among the finished records
    let again = handler.list(SERVER_NAME.as_str());
    assert_eq!(again.len(), 1);
    assert_eq!(again[0].status, RunStatus::Failure);

    assert!(handler.delete(&again[0]).unwrap());
    assert!(handler.list(SERVER_NAME.as_str()).is_empty());
}

#[test]
fn test_records_of_other_hosts_are_left_alone() {
    let dir = TempDir::new().unwrap();
    let config = Config::with_root(dir.path());
    let lister = ProcessLister::new(Box::new(StaticSource(vec![])), config.dispatch_dir(), Duration::from_secs(60));
    let handler = TaskHandler::new(config.clone(), Arc::new(lister));

    let mut record = task("remote", vec![CollectorSpec::PS(StateSpec::default())]);
    record.host = "some-other-host".to_string();
    let mut run = RunInfo::new(record, owner(), &config.output_root);
    run.start();
    run.promote(RunStatus::Monitoring);

    let listed = handler.list(SERVER_NAME.as_str());
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].status, RunStatus::Monitoring);
}
