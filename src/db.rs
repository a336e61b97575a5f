use rusqlite::{Connection, OptionalExtension};
use std::path::Path;

use crate::entities;

pub const DB_FILE: &str = "schoold.sqlite3";

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let db_path = workspace.join(DB_FILE);
    let conn = Connection::open(db_path)?;
    migrate(&conn)?;
    Ok(conn)
}

/// Creates every table and index. Safe to run on an existing workspace.
pub fn migrate(conn: &Connection) -> anyhow::Result<()> {
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS settings(
            key TEXT PRIMARY KEY,
            value_json TEXT NOT NULL
        )",
        [],
    )?;

    for spec in entities::ALL {
        conn.execute(&spec.create_table_sql(), [])?;
    }
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_students_class ON students(class_name)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_classes_year ON classes(academic_year_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS academic_years(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            start_date TEXT,
            end_date TEXT,
            is_current INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS fee_templates(
            id TEXT PRIMARY KEY,
            academic_year_id TEXT,
            name TEXT NOT NULL,
            description TEXT,
            total REAL NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )",
        [],
    )?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS fee_template_items(
            id TEXT PRIMARY KEY,
            template_id TEXT NOT NULL,
            sort_order INTEGER NOT NULL,
            name TEXT NOT NULL,
            amount REAL NOT NULL,
            FOREIGN KEY(template_id) REFERENCES fee_templates(id),
            UNIQUE(template_id, sort_order)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_fee_templates_year ON fee_templates(academic_year_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_fee_template_items_template ON fee_template_items(template_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS fee_records(
            id TEXT PRIMARY KEY,
            student_id TEXT NOT NULL,
            template_id TEXT,
            academic_year_id TEXT,
            title TEXT NOT NULL,
            amount REAL NOT NULL,
            amount_paid REAL NOT NULL DEFAULT 0,
            late_fee REAL NOT NULL DEFAULT 0,
            late_fee_applied_on TEXT,
            due_date TEXT NOT NULL,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_fee_records_student ON fee_records(student_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_fee_records_template ON fee_records(template_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS fee_transactions(
            id TEXT PRIMARY KEY,
            fee_record_id TEXT NOT NULL,
            amount REAL NOT NULL,
            method TEXT NOT NULL,
            reference TEXT,
            status TEXT NOT NULL,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            FOREIGN KEY(fee_record_id) REFERENCES fee_records(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_fee_transactions_record ON fee_transactions(fee_record_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS pdc_cheques(
            id TEXT PRIMARY KEY,
            student_id TEXT NOT NULL,
            fee_record_id TEXT,
            cheque_no TEXT NOT NULL,
            bank_name TEXT NOT NULL,
            amount REAL NOT NULL,
            cheque_date TEXT NOT NULL,
            status TEXT NOT NULL,
            transaction_id TEXT,
            remarks TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS fee_reminders(
            id TEXT PRIMARY KEY,
            fee_record_id TEXT NOT NULL,
            student_id TEXT NOT NULL,
            balance_due REAL NOT NULL,
            due_date TEXT NOT NULL,
            status TEXT NOT NULL,
            created_at TEXT NOT NULL,
            FOREIGN KEY(fee_record_id) REFERENCES fee_records(id)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS time_slots(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL UNIQUE,
            start_time TEXT,
            end_time TEXT,
            is_break INTEGER NOT NULL DEFAULT 0,
            sort_order INTEGER NOT NULL
        )",
        [],
    )?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS working_days(
            day TEXT PRIMARY KEY,
            sort_order INTEGER NOT NULL
        )",
        [],
    )?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS period_assignments(
            id TEXT PRIMARY KEY,
            day TEXT NOT NULL,
            slot_name TEXT NOT NULL,
            class_name TEXT NOT NULL,
            teacher_name TEXT NOT NULL,
            subject TEXT NOT NULL,
            UNIQUE(day, slot_name, class_name)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_period_assignments_teacher ON period_assignments(teacher_name)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS attendance_records(
            id TEXT PRIMARY KEY,
            date TEXT NOT NULL,
            person_kind TEXT NOT NULL,
            person_id TEXT NOT NULL,
            class_name TEXT,
            status TEXT NOT NULL,
            remarks TEXT,
            updated_at TEXT NOT NULL,
            UNIQUE(date, person_kind, person_id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_attendance_person ON attendance_records(person_kind, person_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_attendance_class_date ON attendance_records(class_name, date)",
        [],
    )?;

    Ok(())
}

pub fn settings_get_json(conn: &Connection, key: &str) -> anyhow::Result<Option<serde_json::Value>> {
    let raw: Option<String> = conn
        .query_row(
            "SELECT value_json FROM settings WHERE key = ?",
            [key],
            |r| r.get(0),
        )
        .optional()?;
    match raw {
        Some(s) => Ok(Some(serde_json::from_str(&s)?)),
        None => Ok(None),
    }
}

pub fn settings_set_json(
    conn: &Connection,
    key: &str,
    value: &serde_json::Value,
) -> anyhow::Result<()> {
    conn.execute(
        "INSERT INTO settings(key, value_json) VALUES(?, ?)
         ON CONFLICT(key) DO UPDATE SET value_json = excluded.value_json",
        (key, serde_json::to_string(value)?),
    )?;
    Ok(())
}

#[cfg(test)]
fn table_has_column(conn: &Connection, table: &str, column: &str) -> anyhow::Result<bool> {
    let sql = format!("PRAGMA table_info({})", table);
    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let name: String = row.get(1)?;
        if name == column {
            return Ok(true);
        }
    }
    Ok(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn migrate_is_idempotent_and_creates_entity_tables() {
        let conn = Connection::open_in_memory().expect("open");
        migrate(&conn).expect("first");
        migrate(&conn).expect("second");
        for spec in entities::ALL {
            assert!(table_has_column(&conn, spec.table, "created_at").expect("pragma"));
        }
        assert!(table_has_column(&conn, "fee_records", "late_fee").expect("pragma"));
    }

    #[test]
    fn settings_roundtrip_overwrites() {
        let conn = Connection::open_in_memory().expect("open");
        migrate(&conn).expect("migrate");
        assert!(settings_get_json(&conn, "setup.school").expect("get").is_none());
        settings_set_json(&conn, "setup.school", &json!({ "name": "A" })).expect("set");
        settings_set_json(&conn, "setup.school", &json!({ "name": "B" })).expect("set");
        assert_eq!(
            settings_get_json(&conn, "setup.school").expect("get"),
            Some(json!({ "name": "B" }))
        );
    }
}
