mod common;

use common::Sidecar;
use serde_json::json;

#[test]
fn second_year_inside_cooldown_is_rejected() {
    let (mut sc, workspace) = Sidecar::with_workspace("schoold-years-cooldown");

    let first = sc.ok("academicYears.create", json!({ "name": "2025-26" }));
    assert_eq!(first["year"]["isCurrent"], json!(true));

    let rejected = sc.fail("academicYears.create", json!({ "name": "2026-27" }));
    assert_eq!(rejected["code"], json!("cooldown_active"));
    assert_eq!(rejected["details"]["requiredDays"], json!(300));
    assert_eq!(rejected["details"]["daysSince"], json!(0));

    let years = sc.ok("academicYears.list", json!({}));
    assert_eq!(years["years"].as_array().map(|a| a.len()), Some(1));

    drop(sc);
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn create_from_template_copies_classes_and_fee_templates() {
    let (mut sc, workspace) = Sidecar::with_workspace("schoold-years-template");
    sc.ok(
        "setup.update",
        json!({ "section": "academicYear", "patch": { "cooldownDays": 0 } }),
    );

    let first = sc.ok("academicYears.create", json!({ "name": "2025-26", "startDate": "2025-06-01" }));
    let first_id = first["year"]["id"].as_str().expect("year id").to_string();

    sc.create("classes", json!({ "name": "5A", "academicYearId": first_id }));
    sc.create("classes", json!({ "name": "5B", "academicYearId": first_id }));
    sc.ok(
        "feeTemplates.create",
        json!({
            "name": "Tuition",
            "academicYearId": first_id,
            "items": [{ "name": "Term 1", "amount": 1200.5 }, { "name": "Lab", "amount": 300 }],
        }),
    );

    let second = sc.ok(
        "academicYears.create",
        json!({ "name": "2026-27", "templateYearId": first_id }),
    );
    assert_eq!(second["copiedClasses"], json!(2));
    assert_eq!(second["copiedFeeTemplates"], json!(1));
    let second_id = second["year"]["id"].as_str().expect("year id").to_string();

    let current = sc.ok("academicYears.current", json!({}));
    assert_eq!(current["year"]["id"], json!(second_id));
    let years = sc.ok("academicYears.list", json!({}));
    let current_count = years["years"]
        .as_array()
        .expect("years")
        .iter()
        .filter(|y| y["isCurrent"] == json!(true))
        .count();
    assert_eq!(current_count, 1);

    let copied = sc.ok("classes.list", json!({ "filter": { "academicYearId": second_id } }));
    assert_eq!(copied["total"], json!(2));
    let templates = sc.ok("feeTemplates.list", json!({ "academicYearId": second_id }));
    let template = &templates["templates"][0];
    assert_eq!(template["total"], json!(1500.5));
    assert_eq!(template["items"].as_array().map(|a| a.len()), Some(2));

    // Flip back, then the old current one can be deleted but the current cannot.
    sc.ok("academicYears.setCurrent", json!({ "id": first_id }));
    assert_eq!(
        sc.fail_code("academicYears.delete", json!({ "id": first_id, "confirm": true })),
        "conflict"
    );
    let deleted = sc.ok("academicYears.delete", json!({ "id": second_id, "confirm": true }));
    assert_eq!(deleted["deleted"], json!(true));

    assert_eq!(
        sc.fail_code("academicYears.create", json!({ "name": "x", "templateYearId": "nope" })),
        "not_found"
    );

    drop(sc);
    let _ = std::fs::remove_dir_all(workspace);
}
