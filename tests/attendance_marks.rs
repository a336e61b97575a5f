mod common;

use common::Sidecar;
use serde_json::json;

#[test]
fn mark_day_roster_and_summary() {
    let (mut sc, workspace) = Sidecar::with_workspace("schoold-attendance");
    let a = sc.create("students", json!({ "firstName": "Asha", "lastName": "A", "className": "5A" }));
    let b = sc.create("students", json!({ "firstName": "Bina", "lastName": "B", "className": "5A" }));
    sc.create("students", json!({ "firstName": "Chet", "lastName": "C", "className": "5B" }));

    let marked = sc.ok(
        "attendance.mark",
        json!({
            "date": "2026-01-05",
            "className": "5A",
            "entries": [{ "personId": a, "status": "P" }, { "personId": b, "status": "Absent", "remarks": "sick" }],
        }),
    );
    assert_eq!(marked["saved"], json!(2));

    sc.ok(
        "attendance.mark",
        json!({ "date": "2026-01-06", "entries": [{ "personId": a, "status": "Late" }, { "personId": b, "status": "Present" }] }),
    );
    // Re-marking the same day overwrites.
    sc.ok(
        "attendance.mark",
        json!({ "date": "2026-01-06", "entries": [{ "personId": b, "status": "E" }] }),
    );

    let day = sc.ok("attendance.day", json!({ "date": "2026-01-05", "className": "5A" }));
    assert_eq!(day["rows"].as_array().map(|r| r.len()), Some(2));
    assert_eq!(day["counts"]["Present"], json!(1));
    assert_eq!(day["counts"]["Absent"], json!(1));
    assert_eq!(day["unmarked"], json!(0));

    let empty_day = sc.ok("attendance.day", json!({ "date": "2026-01-07", "className": "5A" }));
    assert_eq!(empty_day["unmarked"], json!(2));
    assert!(empty_day["rows"][0]["status"].is_null());

    let summary = sc.ok(
        "attendance.summary",
        json!({ "from": "2026-01-01", "to": "2026-01-31", "className": "5A" }),
    );
    let people = summary["people"].as_array().expect("people").clone();
    let asha = people.iter().find(|p| p["personId"] == json!(a)).expect("asha");
    assert_eq!(asha["present"], json!(1));
    assert_eq!(asha["late"], json!(1));
    assert_eq!(asha["presentPct"], json!(100.0));
    let bina = people.iter().find(|p| p["personId"] == json!(b)).expect("bina");
    assert_eq!(bina["absent"], json!(1));
    assert_eq!(bina["excused"], json!(1));
    assert_eq!(bina["presentPct"], json!(0.0));

    assert_eq!(
        sc.fail_code(
            "attendance.mark",
            json!({ "date": "2026-01-05", "entries": [{ "personId": a, "status": "Maybe" }] })
        ),
        "bad_params"
    );
    assert_eq!(
        sc.fail_code(
            "attendance.mark",
            json!({ "date": "2026-01-05", "entries": [{ "personId": "ghost", "status": "P" }] })
        ),
        "not_found"
    );
    assert_eq!(
        sc.fail_code("attendance.summary", json!({ "from": "2026-02-01", "to": "2026-01-01", "className": "5A" })),
        "bad_params"
    );

    drop(sc);
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn teacher_attendance_uses_all_active_teachers() {
    let (mut sc, workspace) = Sidecar::with_workspace("schoold-attendance-teachers");
    let t = sc.create("teachers", json!({ "firstName": "Meena", "lastName": "Iyer" }));
    sc.create("teachers", json!({ "firstName": "Gone", "lastName": "Away", "active": false }));

    sc.ok(
        "attendance.mark",
        json!({ "date": "2026-01-05", "personKind": "teacher", "entries": [{ "personId": t, "status": "Present" }] }),
    );
    let day = sc.ok("attendance.day", json!({ "date": "2026-01-05", "personKind": "teacher" }));
    assert_eq!(day["rows"].as_array().map(|r| r.len()), Some(1));
    assert_eq!(day["rows"][0]["status"], json!("Present"));

    // Clearing a mark removes it.
    let cleared = sc.ok(
        "attendance.mark",
        json!({ "date": "2026-01-05", "personKind": "teacher", "entries": [{ "personId": t, "status": null }] }),
    );
    assert_eq!(cleared["cleared"], json!(1));

    drop(sc);
    let _ = std::fs::remove_dir_all(workspace);
}
