use rdiag::core::collector::CollectorSpec;
use rdiag::core::Task;
use rdiag::DiagError;
use serde_json::{json, Value};

fn server() -> Value {
    json!({
        "__class__": "Process",
        "name": "splunkd",
        "pid": 100,
        "ppid": 1,
        "args": "splunkd -p 8089 start",
        "process_type": "splunkd server"
    })
}

fn descriptors() -> Vec<Value> {
    let ps = json!({"__class__": "PS", "state": "Waiting"});
    vec![
        ps.clone(),
        json!({"__class__": "NetStat"}),
        json!({"__class__": "LSOF", "process": server()}),
        json!({"__class__": "StackTrace", "process": server(), "state": "Waiting"}),
        json!({"__class__": "SystemCallTrace", "collection_time": 30.0, "process": server()}),
        json!({"__class__": "NetworkPacket", "collection_time": 20.0, "ip_address": "10.0.0.1", "port": 8089}),
        json!({"__class__": "IOPS", "collection_time": 15.0}),
        json!({"__class__": "Diag"}),
        json!({"__class__": "Periodic", "sampleCount": 3, "interval": 5.0, "collectors": [ps.clone()]}),
        json!({
            "__class__": "ResourceMonitor",
            "resource_monitor_trackers": [{
                "__class__": "MovingAverageResourceMonitorTracker",
                "target": "system",
                "metric": "cpu",
                "threshold": 90.0,
                "num_samples": 10
            }],
            "collectors": [ps.clone()]
        }),
        json!({"__class__": "LogMonitor", "selectedFile": "splunkd.log", "regex": "ERROR", "collectors": [ps.clone()]}),
        json!({"__class__": "SearchDebug", "search_regex": "index=_internal", "collectors": [ps]}),
    ]
}

#[test]
fn test_every_registered_type_round_trips() {
    for value in descriptors() {
        let spec: CollectorSpec = serde_json::from_value(value.clone()).unwrap();
        let built = CollectorSpec::decode(value.clone()).unwrap();
        assert_eq!(built.to_spec(), spec, "round trip of {}", value);
        assert_eq!(built.class_name(), value["__class__"].as_str().unwrap());

        let encoded = serde_json::to_value(&spec).unwrap();
        assert_eq!(serde_json::from_value::<CollectorSpec>(encoded).unwrap(), spec);
    }
}

#[test]
fn test_unknown_class_is_a_schema_error() {
    let err = CollectorSpec::decode(json!({"__class__": "Teleporter"})).err().unwrap();
    assert!(matches!(err, DiagError::Schema(_)));
}

#[test]
fn test_validation_rejects_out_of_range_and_unsafe_values() {
    let short_trace = json!({"__class__": "SystemCallTrace", "collection_time": 1.0, "process": server()});
    assert!(matches!(CollectorSpec::decode(short_trace), Err(DiagError::Validation(_))));

    let traversal = json!({"__class__": "LogMonitor", "selectedFile": "../etc/passwd", "regex": "x", "collectors": []});
    assert!(CollectorSpec::decode(traversal).is_err());

    let bad_regex = json!({"__class__": "SearchDebug", "search_regex": "(", "collectors": []});
    assert!(CollectorSpec::decode(bad_regex).is_err());

    for name in ["a/b", "a\\b", "..", "tab\there", "what?"] {
        let task = json!({
            "__class__": "Task",
            "name": name,
            "collectors": [{"__class__": "PS"}],
            "task_id": "id"
        });
        assert!(Task::from_value(task).is_err(), "{:?} should be rejected", name);
    }
}
