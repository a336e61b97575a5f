mod common;

use common::Sidecar;
use serde_json::{json, Value};

fn cell<'a>(grid: &'a Value, day: &str, slot: &str) -> &'a Value {
    let row = grid["rows"]
        .as_array()
        .expect("rows")
        .iter()
        .find(|r| r["day"] == json!(day))
        .expect("day row");
    &row["cells"]
        .as_array()
        .expect("cells")
        .iter()
        .find(|c| c["slotName"] == json!(slot))
        .expect("slot cell")["cell"]
}

#[test]
fn class_and_teacher_views_render_breaks_and_free_cells() {
    let (mut sc, workspace) = Sidecar::with_workspace("schoold-timetable");

    let days = sc.ok("workingDays.list", json!({}));
    assert_eq!(
        days["days"],
        json!(["Monday", "Tuesday", "Wednesday", "Thursday", "Friday"])
    );
    let set = sc.ok("workingDays.set", json!({ "days": ["wed", "Mon"] }));
    assert_eq!(set["days"], json!(["Monday", "Wednesday"]));
    assert_eq!(
        sc.fail_code("workingDays.set", json!({ "days": ["Funday"] })),
        "bad_params"
    );

    sc.ok("timeSlots.create", json!({ "name": "P1", "startTime": "08:00", "endTime": "08:45" }));
    sc.ok(
        "timeSlots.create",
        json!({ "name": "Recess", "startTime": "08:45", "endTime": "09:00", "isBreak": true }),
    );
    sc.ok("timeSlots.create", json!({ "name": "P2", "startTime": "09:00", "endTime": "09:45" }));
    assert_eq!(
        sc.fail_code("timeSlots.create", json!({ "name": "P1" })),
        "conflict"
    );
    assert_eq!(
        sc.fail_code("timeSlots.create", json!({ "name": "P9", "startTime": "25:00" })),
        "bad_params"
    );

    let assign = |sc: &mut Sidecar, day: &str, slot: &str, class: &str, teacher: &str, subject: &str| {
        sc.ok(
            "timetable.assign",
            json!({
                "day": day,
                "slotName": slot,
                "className": class,
                "teacherName": teacher,
                "subject": subject,
            }),
        )
    };
    assign(&mut sc, "Monday", "P1", "5A", "Mrs. Rao", "Maths");
    assign(&mut sc, "Monday", "P2", "5B", "Mrs. Rao", "Maths");
    // Same cell again replaces the teacher and subject.
    let replaced = assign(&mut sc, "Mon", "P1", "5A", "Mr. Sen", "Science");
    assert_eq!(replaced["assignment"]["subject"], json!("Science"));
    assign(&mut sc, "Wednesday", "P1", "5B", "Mr. Sen", "Science");

    assert_eq!(
        sc.fail_code(
            "timetable.assign",
            json!({ "day": "Monday", "slotName": "Recess", "className": "5A", "teacherName": "X", "subject": "Y" })
        ),
        "bad_params"
    );

    let class_grid = sc.ok("timetable.grid", json!({ "view": "class", "name": "5A" }));
    assert_eq!(class_grid["days"], json!(["Monday", "Wednesday"]));
    let p1 = cell(&class_grid, "Monday", "P1");
    assert_eq!(p1["kind"], json!("assigned"));
    assert_eq!(p1["subject"], json!("Science"));
    assert_eq!(p1["counterpart"], json!("Mr. Sen"));
    assert_eq!(cell(&class_grid, "Monday", "Recess")["kind"], json!("break"));
    assert_eq!(cell(&class_grid, "Monday", "P2")["kind"], json!("free"));
    assert_eq!(cell(&class_grid, "Wednesday", "P1")["kind"], json!("free"));

    let teacher_grid = sc.ok("timetable.grid", json!({ "view": "teacher", "name": "Mr. Sen" }));
    assert_eq!(cell(&teacher_grid, "Monday", "P1")["counterpart"], json!("5A"));
    assert_eq!(cell(&teacher_grid, "Wednesday", "P1")["counterpart"], json!("5B"));
    assert_eq!(teacher_grid["clashes"], json!([]));

    // Two classes in one cell for one teacher: first wins, the other is a clash.
    assign(&mut sc, "Monday", "P1", "5C", "Mr. Sen", "Science");
    let clashing = sc.ok("timetable.grid", json!({ "view": "teacher", "name": "Mr. Sen" }));
    assert_eq!(cell(&clashing, "Monday", "P1")["counterpart"], json!("5A"));
    assert_eq!(clashing["clashes"][0]["dropped"], json!("5C"));

    assert_eq!(
        sc.fail_code("timetable.grid", json!({ "view": "room", "name": "1" })),
        "bad_params"
    );

    let for_class = sc.ok("timetable.assignments", json!({ "className": "5B" }));
    let rows = for_class["assignments"].as_array().expect("assignments").clone();
    assert_eq!(rows.len(), 2);
    let id = rows[0]["id"].as_str().expect("assignment id").to_string();
    sc.ok("timetable.unassign", json!({ "id": id }));
    let for_class = sc.ok("timetable.assignments", json!({ "className": "5B" }));
    assert_eq!(for_class["assignments"].as_array().map(|a| a.len()), Some(1));

    drop(sc);
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn renaming_a_slot_moves_its_assignments() {
    let (mut sc, workspace) = Sidecar::with_workspace("schoold-timetable-rename");
    let slot = sc.ok("timeSlots.create", json!({ "name": "P1", "startTime": "08:00", "endTime": "08:45" }));
    let slot_id = slot["slot"]["id"].as_str().expect("slot id").to_string();
    sc.ok(
        "timetable.assign",
        json!({ "day": "Tuesday", "slotName": "P1", "className": "6A", "teacherName": "Ms. Roy", "subject": "Art" }),
    );

    let renamed = sc.ok("timeSlots.update", json!({ "id": slot_id, "patch": { "name": "Period 1" } }));
    assert_eq!(renamed["slot"]["name"], json!("Period 1"));

    let grid = sc.ok("timetable.grid", json!({ "view": "class", "name": "6A" }));
    assert_eq!(cell(&grid, "Tuesday", "Period 1")["subject"], json!("Art"));

    drop(sc);
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn deleting_a_slot_asks_first_and_drops_its_assignments() {
    let (mut sc, workspace) = Sidecar::with_workspace("schoold-timetable-delete");
    let p1 = sc.ok("timeSlots.create", json!({ "name": "P1", "startTime": "08:00", "endTime": "08:45" }));
    let p1_id = p1["slot"]["id"].as_str().expect("slot id").to_string();
    sc.ok("timeSlots.create", json!({ "name": "P2", "startTime": "08:45", "endTime": "09:30" }));
    for slot in ["P1", "P2"] {
        sc.ok(
            "timetable.assign",
            json!({ "day": "Monday", "slotName": slot, "className": "7A", "teacherName": "Mr. Das", "subject": "Math" }),
        );
    }

    let pending = sc.fail("timeSlots.delete", json!({ "id": p1_id }));
    assert_eq!(pending["code"], json!("confirm_required"));
    assert_eq!(pending["details"]["record"]["name"], json!("P1"));
    let kept = sc.ok("timeSlots.delete", json!({ "id": p1_id, "confirm": false }));
    assert_eq!(kept["cancelled"], json!(true));
    assert_eq!(sc.ok("timeSlots.list", json!({}))["slots"].as_array().map(|a| a.len()), Some(2));

    let deleted = sc.ok("timeSlots.delete", json!({ "id": p1_id, "confirm": true }));
    assert_eq!(deleted["deleted"], json!(true));
    assert_eq!(deleted["assignmentsRemoved"], json!(1));

    let slots = sc.ok("timeSlots.list", json!({}));
    assert_eq!(slots["slots"].as_array().map(|a| a.len()), Some(1));
    assert_eq!(slots["slots"][0]["name"], json!("P2"));
    let left = sc.ok("timetable.assignments", json!({ "className": "7A" }));
    assert_eq!(left["assignments"].as_array().map(|a| a.len()), Some(1));
    assert_eq!(left["assignments"][0]["slotName"], json!("P2"));
    assert_eq!(sc.fail_code("timeSlots.delete", json!({ "id": p1_id, "confirm": true })), "not_found");

    drop(sc);
    let _ = std::fs::remove_dir_all(workspace);
}
