mod common;

use common::Sidecar;
use serde_json::json;

#[test]
fn overview_counts_and_fee_totals() {
    let (mut sc, workspace) = Sidecar::with_workspace("schoold-dashboard-overview");
    let sid = sc.create("students", json!({ "firstName": "Asha", "lastName": "Verma", "className": "5A" }));
    sc.create("teachers", json!({ "firstName": "Meena", "lastName": "Iyer" }));
    sc.create("classes", json!({ "name": "5A" }));
    sc.ok(
        "fees.create",
        json!({ "studentId": sid, "title": "Tuition", "amount": 800, "dueDate": "2026-02-01" }),
    );

    let overview = sc.ok("dashboard.overview", json!({ "asOf": "2026-03-01" }));
    assert_eq!(overview["counts"]["students"], json!(1));
    assert_eq!(overview["counts"]["teachers"], json!(1));
    assert_eq!(overview["counts"]["staff"], json!(0));
    assert_eq!(overview["counts"]["classes"], json!(1));
    assert_eq!(overview["fees"]["billed"], json!(800.0));
    assert_eq!(overview["fees"]["overdueRecords"], json!(1));
    assert!(overview["currentAcademicYear"].is_null());

    drop(sc);
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn academics_panels_report_upcoming_items() {
    let (mut sc, workspace) = Sidecar::with_workspace("schoold-dashboard-academics");
    sc.create("exams", json!({ "title": "Past", "className": "5A", "examDate": "2026-01-10" }));
    sc.create("exams", json!({ "title": "Finals", "className": "5A", "examDate": "2026-03-20" }));
    sc.create("assignments", json!({ "title": "Essay", "className": "5A", "dueDate": "2026-03-05" }));
    sc.create(
        "liveClasses",
        json!({ "title": "Revision", "className": "5A", "startsAt": "2026-03-02T10:00" }),
    );
    sc.create("studyMaterials", json!({ "title": "Notes" }));

    let academics = sc.ok("dashboard.academics", json!({ "asOf": "2026-03-01" }));
    assert_eq!(academics["failed"], json!([]));
    assert_eq!(academics["upcomingExams"].as_array().map(|a| a.len()), Some(1));
    assert_eq!(academics["upcomingExams"][0]["title"], json!("Finals"));
    assert_eq!(academics["assignmentsDue"][0]["title"], json!("Essay"));
    assert_eq!(academics["liveClasses"][0]["title"], json!("Revision"));
    assert_eq!(academics["studyMaterials"][0]["title"], json!("Notes"));

    drop(sc);
    let _ = std::fs::remove_dir_all(workspace);
}
