mod common;

use common::Sidecar;
use serde_json::json;

#[test]
fn mutations_publish_ordered_events() {
    let (mut sc, workspace) = Sidecar::with_workspace("schoold-events");

    let empty = sc.ok("events.poll", json!({}));
    assert_eq!(empty["events"], json!([]));
    assert_eq!(empty["latestSeq"], json!(0));

    let id = sc.create("students", json!({ "firstName": "Asha", "lastName": "Verma" }));
    sc.ok("students.update", json!({ "id": id, "patch": { "rollNo": "7" } }));
    sc.ok("students.delete", json!({ "id": id, "confirm": true }));
    // A cancelled delete publishes nothing.
    let other = sc.create("students", json!({ "firstName": "Ravi", "lastName": "Kumar" }));
    sc.ok("students.delete", json!({ "id": other, "confirm": false }));

    let polled = sc.ok("events.poll", json!({}));
    let events = polled["events"].as_array().expect("events").clone();
    let names: Vec<&str> = events.iter().filter_map(|e| e["event"].as_str()).collect();
    assert_eq!(
        names,
        vec!["student_added", "student_updated", "student_deleted", "student_added"]
    );
    let seqs: Vec<u64> = events.iter().filter_map(|e| e["seq"].as_u64()).collect();
    assert!(seqs.windows(2).all(|w| w[0] < w[1]));
    assert_eq!(events[0]["data"]["id"], json!(id));
    assert_eq!(polled["latestSeq"], json!(seqs[seqs.len() - 1]));

    let after = sc.ok("events.poll", json!({ "afterSeq": seqs[1], "limit": 1 }));
    assert_eq!(after["events"].as_array().map(|a| a.len()), Some(1));
    assert_eq!(after["events"][0]["event"], json!("student_deleted"));

    assert_eq!(sc.fail_code("events.poll", json!({ "limit": 0 })), "bad_params");
    assert_eq!(sc.fail_code("events.poll", json!({ "afterSeq": -1 })), "bad_params");

    let beyond = sc.ok("events.poll", json!({ "afterSeq": u64::MAX }));
    assert_eq!(beyond["events"], json!([]));
    assert_eq!(beyond["gap"], json!(false));
    assert!(sc.ok("health", json!({}))["version"].is_string());

    drop(sc);
    let _ = std::fs::remove_dir_all(workspace);
}
