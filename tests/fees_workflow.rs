mod common;

use common::Sidecar;
use serde_json::{json, Value};

fn student(sc: &mut Sidecar, first: &str, class_name: &str) -> String {
    sc.create(
        "students",
        json!({ "firstName": first, "lastName": "Test", "className": class_name }),
    )
}

fn new_fee(sc: &mut Sidecar, student_id: &str, amount: f64, due: &str) -> Value {
    sc.ok(
        "fees.create",
        json!({ "studentId": student_id, "title": "Tuition", "amount": amount, "dueDate": due }),
    )["record"]
        .clone()
}

#[test]
fn assign_template_skips_existing_holders() {
    let (mut sc, workspace) = Sidecar::with_workspace("schoold-fees-assign");
    let a = student(&mut sc, "Asha", "5A");
    let b = student(&mut sc, "Bina", "5A");
    student(&mut sc, "Chet", "5B");

    let template = sc.ok(
        "feeTemplates.create",
        json!({ "name": "Term Fee", "items": [{ "name": "Tuition", "amount": 1000 }, { "name": "Sports", "amount": 250.25 }] }),
    );
    let template_id = template["template"]["id"].as_str().expect("template id").to_string();
    assert_eq!(template["template"]["total"], json!(1250.25));

    let first = sc.ok(
        "fees.assign",
        json!({ "templateId": template_id, "dueDate": "2026-07-10", "studentIds": [a] }),
    );
    assert_eq!(first["created"], json!(1));

    let second = sc.ok(
        "fees.assign",
        json!({ "templateId": template_id, "dueDate": "2026-07-10", "className": "5A" }),
    );
    assert_eq!(second["created"], json!(1));
    assert_eq!(second["skipped"], json!(1));
    assert_eq!(second["records"][0]["studentId"], json!(b));
    assert_eq!(second["skippedStudents"][0]["reason"], json!("already_assigned"));

    let listed = sc.ok("fees.list", json!({ "className": "5A", "asOf": "2026-07-01" }));
    assert_eq!(listed["total"], json!(2));
    assert_eq!(listed["records"][0]["amount"], json!(1250.25));
    assert_eq!(listed["records"][0]["status"], json!("Pending"));

    drop(sc);
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn collect_void_and_receipt() {
    let (mut sc, workspace) = Sidecar::with_workspace("schoold-fees-collect");
    let sid = student(&mut sc, "Asha", "5A");
    let fee = new_fee(&mut sc, &sid, 1000.0, "2026-07-10");
    let fee_id = fee["id"].as_str().expect("fee id").to_string();

    let paid = sc.ok(
        "fees.collect",
        json!({ "feeRecordId": fee_id, "amount": 400, "method": "Cash", "asOf": "2026-07-01" }),
    );
    assert_eq!(paid["transaction"]["badge"], json!("Paid"));
    assert_eq!(paid["feeRecord"]["amountPaid"], json!(400.0));
    assert_eq!(paid["feeRecord"]["balanceDue"], json!(600.0));
    assert_eq!(paid["feeRecord"]["status"], json!("Partial"));
    let txn_id = paid["transaction"]["id"].as_str().expect("txn id").to_string();

    let over = sc.fail(
        "fees.collect",
        json!({ "feeRecordId": fee_id, "amount": 601, "method": "Cash" }),
    );
    assert_eq!(over["code"], json!("bad_params"));
    assert_eq!(
        sc.fail_code(
            "fees.collect",
            json!({ "feeRecordId": fee_id, "amount": 10, "method": "Cash", "status": "Failed" })
        ),
        "bad_params"
    );

    let pending = sc.ok(
        "fees.collect",
        json!({ "feeRecordId": fee_id, "amount": 100, "method": "UPI", "status": "Pending" }),
    );
    assert_eq!(pending["transaction"]["badge"], json!("Partial"));
    assert_eq!(pending["feeRecord"]["amountPaid"], json!(400.0));

    let receipt = sc.ok("fees.receipt", json!({ "transactionId": txn_id, "asOf": "2026-07-01" }));
    assert!(receipt["receiptNumber"]
        .as_str()
        .expect("receipt number")
        .starts_with("RCPT-"));
    assert_eq!(receipt["fee"]["balanceDue"], json!(600.0));
    assert_eq!(receipt["student"]["className"], json!("5A"));

    let asked = sc.fail(
        "fees.updateTransactionStatus",
        json!({ "transactionId": txn_id, "status": "Failed" }),
    );
    assert_eq!(asked["code"], json!("confirm_required"));
    let voided = sc.ok(
        "fees.updateTransactionStatus",
        json!({ "transactionId": txn_id, "status": "Failed", "confirm": true }),
    );
    assert_eq!(voided["transaction"]["badge"], json!("Void"));
    assert_eq!(voided["feeRecord"]["amountPaid"], json!(0.0));

    assert_eq!(
        sc.fail_code(
            "fees.updateTransactionStatus",
            json!({ "transactionId": txn_id, "status": "Success" })
        ),
        "invalid_transition"
    );

    let txns = sc.ok("fees.transactions", json!({ "feeRecordId": fee_id }));
    assert_eq!(txns["transactions"].as_array().map(|a| a.len()), Some(2));

    drop(sc);
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn late_fees_apply_once_and_feed_reports() {
    let (mut sc, workspace) = Sidecar::with_workspace("schoold-fees-late");
    let a = student(&mut sc, "Asha", "5A");
    let b = student(&mut sc, "Bina", "5B");
    let overdue = new_fee(&mut sc, &a, 1000.0, "2026-03-01");
    new_fee(&mut sc, &b, 500.0, "2026-04-20");

    let applied = sc.ok("fees.applyLateFees", json!({ "asOf": "2026-04-01" }));
    let applied = applied["applied"].as_array().expect("applied").clone();
    assert_eq!(applied.len(), 1);
    assert_eq!(applied[0]["feeRecordId"], overdue["id"]);
    assert_eq!(applied[0]["lateFee"], json!(50.0));
    assert_eq!(applied[0]["record"]["status"], json!("Late"));
    assert_eq!(applied[0]["record"]["totalDue"], json!(1050.0));

    let again = sc.ok("fees.applyLateFees", json!({ "asOf": "2026-04-02" }));
    assert_eq!(again["applied"].as_array().map(|a| a.len()), Some(0));

    let reminders = sc.ok("fees.sendReminders", json!({ "asOf": "2026-04-15", "daysAhead": 7 }));
    assert_eq!(reminders["reminders"].as_array().map(|a| a.len()), Some(2));
    let repeat = sc.ok("fees.sendReminders", json!({ "asOf": "2026-04-15", "daysAhead": 7 }));
    assert_eq!(repeat["reminders"].as_array().map(|a| a.len()), Some(0));
    assert_eq!(repeat["alreadyQueued"], json!(2));

    let report = sc.ok("fees.report", json!({ "asOf": "2026-04-15" }));
    assert_eq!(report["billed"], json!(1550.0));
    assert_eq!(report["outstanding"], json!(1550.0));
    assert_eq!(report["lateFees"], json!(50.0));
    assert_eq!(report["byStatus"]["Late"], json!(1));
    assert_eq!(report["byStatus"]["Pending"], json!(1));
    assert_eq!(report["byClass"].as_array().map(|a| a.len()), Some(2));

    let defaulters = sc.ok("fees.defaulters", json!({ "asOf": "2026-04-15" }));
    assert_eq!(defaulters["defaulters"].as_array().map(|a| a.len()), Some(1));
    assert_eq!(defaulters["defaulters"][0]["studentId"], json!(a));

    let csv = workspace.join("fees.csv");
    let exported = sc.ok("fees.exportCsv", json!({ "outPath": csv.to_string_lossy() }));
    assert_eq!(exported["rows"], json!(2));
    let text = std::fs::read_to_string(&csv).expect("read fees csv");
    assert_eq!(text.lines().count(), 3);

    drop(sc);
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn post_dated_cheques_clear_and_bounce() {
    let (mut sc, workspace) = Sidecar::with_workspace("schoold-fees-pdc");
    sc.ok(
        "setup.update",
        json!({ "section": "fees", "patch": { "bounceCharge": 150 } }),
    );
    let sid = student(&mut sc, "Asha", "5A");
    let fee = new_fee(&mut sc, &sid, 1000.0, "2026-09-01");
    let fee_id = fee["id"].as_str().expect("fee id").to_string();

    let cheque = |sc: &mut Sidecar, no: &str| -> String {
        sc.ok(
            "pdc.create",
            json!({
                "studentId": sid,
                "feeRecordId": fee_id,
                "chequeNo": no,
                "bankName": "State Bank",
                "amount": 400,
                "chequeDate": "2026-08-15",
            }),
        )["cheque"]["id"]
            .as_str()
            .expect("cheque id")
            .to_string()
    };
    let c1 = cheque(&mut sc, "000111");
    let c2 = cheque(&mut sc, "000112");

    let cleared = sc.ok("pdc.clear", json!({ "id": c1, "confirm": true, "asOf": "2026-08-16" }));
    assert_eq!(cleared["cheque"]["status"], json!("Cleared"));
    assert!(cleared["cheque"]["transactionId"].is_string());
    assert_eq!(cleared["feeRecord"]["amountPaid"], json!(400.0));

    assert_eq!(
        sc.fail_code("pdc.bounce", json!({ "id": c1, "confirm": true })),
        "invalid_transition"
    );

    let cancelled = sc.ok("pdc.bounce", json!({ "id": c2, "confirm": false }));
    assert_eq!(cancelled["cancelled"], json!(true));
    let bounced = sc.ok(
        "pdc.bounce",
        json!({ "id": c2, "confirm": true, "remarks": "insufficient funds", "asOf": "2026-08-16" }),
    );
    assert_eq!(bounced["cheque"]["status"], json!("Bounced"));
    assert_eq!(bounced["cheque"]["remarks"], json!("insufficient funds"));
    assert_eq!(bounced["bounceCharge"], json!(150.0));
    assert_eq!(bounced["feeRecord"]["lateFee"], json!(150.0));
    assert_eq!(bounced["feeRecord"]["balanceDue"], json!(750.0));

    let pending = sc.ok("pdc.list", json!({ "status": "Pending" }));
    assert_eq!(pending["cheques"].as_array().map(|a| a.len()), Some(0));
    let all = sc.ok("pdc.list", json!({ "studentId": sid }));
    assert_eq!(all["cheques"].as_array().map(|a| a.len()), Some(2));

    drop(sc);
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn template_update_replaces_items_and_recomputes_total() {
    let (mut sc, workspace) = Sidecar::with_workspace("schoold-fees-template-update");
    let created = sc.ok(
        "feeTemplates.create",
        json!({ "name": "Annual", "items": [{ "name": "Tuition", "amount": 100 }, { "name": "Lab", "amount": 20 }, { "name": "Bus", "amount": 30 }] }),
    );
    let id = created["template"]["id"].as_str().expect("template id").to_string();
    assert_eq!(created["template"]["total"], json!(150.0));

    let updated = sc.ok(
        "feeTemplates.update",
        json!({ "id": id, "patch": { "name": "Annual 2026", "items": [{ "name": "Tuition", "amount": 10.25 }, { "name": "Books", "amount": 5.5 }] } }),
    );
    let template = &updated["template"];
    assert_eq!(template["name"], json!("Annual 2026"));
    assert_eq!(template["total"], json!(15.75));
    let names: Vec<&str> = template["items"]
        .as_array()
        .expect("items")
        .iter()
        .filter_map(|i| i["name"].as_str())
        .collect();
    assert_eq!(names, vec!["Tuition", "Books"]);

    // The bad key sorts after "name", so the rename is rolled back with it.
    assert_eq!(
        sc.fail_code(
            "feeTemplates.update",
            json!({ "id": id, "patch": { "name": "Renamed", "zone": "north" } })
        ),
        "bad_params"
    );
    assert_eq!(
        sc.fail_code("feeTemplates.update", json!({ "id": id, "patch": { "items": [] } })),
        "bad_params"
    );
    let fetched = sc.ok("feeTemplates.get", json!({ "id": id }));
    assert_eq!(fetched["template"]["name"], json!("Annual 2026"));
    assert_eq!(fetched["template"]["total"], json!(15.75));

    assert_eq!(
        sc.fail_code("feeTemplates.update", json!({ "id": "missing", "patch": { "name": "X" } })),
        "not_found"
    );

    drop(sc);
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn template_delete_requires_confirmation_and_removes_items() {
    let (mut sc, workspace) = Sidecar::with_workspace("schoold-fees-template-delete");
    let created = sc.ok(
        "feeTemplates.create",
        json!({ "name": "Transport", "items": [{ "name": "Bus", "amount": 40 }] }),
    );
    let id = created["template"]["id"].as_str().expect("template id").to_string();

    let pending = sc.fail("feeTemplates.delete", json!({ "id": id }));
    assert_eq!(pending["code"], json!("confirm_required"));
    assert_eq!(pending["details"]["action"], json!("feeTemplates.delete"));
    assert_eq!(pending["details"]["record"]["name"], json!("Transport"));

    let kept = sc.ok("feeTemplates.delete", json!({ "id": id, "confirm": false }));
    assert_eq!(kept["cancelled"], json!(true));
    assert_eq!(sc.ok("feeTemplates.list", json!({}))["templates"].as_array().map(|a| a.len()), Some(1));

    let deleted = sc.ok("feeTemplates.delete", json!({ "id": id, "confirm": true }));
    assert_eq!(deleted["deleted"], json!(true));
    assert_eq!(sc.fail_code("feeTemplates.get", json!({ "id": id })), "not_found");
    assert_eq!(sc.ok("feeTemplates.list", json!({}))["templates"], json!([]));

    let conn = rusqlite::Connection::open(workspace.join("schoold.sqlite3")).expect("open db");
    let items: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM fee_template_items WHERE template_id = ?",
            [&id],
            |r| r.get(0),
        )
        .expect("count items");
    assert_eq!(items, 0);

    drop(sc);
    let _ = std::fs::remove_dir_all(workspace);
}
