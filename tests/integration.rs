// Integration tests module

mod integration {
    mod common;

    mod admission_test;
    mod collector_state_test;
    mod descriptor_test;
    mod log_monitor_test;
    mod periodic_conflict_test;
    mod process_match_test;
    mod task_lifecycle_test;
    mod threadpool_test;
}
