use crate::ipc::error::HandlerErr;
use crate::ipc::helpers::{
    cancelled, confirm_destructive, get_object, get_optional_bool, get_optional_i64,
    get_optional_str, get_required_str, run, Confirmation, Handler,
};
use crate::ipc::types::{AppState, Ctx, Request};
use crate::timetable::{self, PeriodAssignment, TimeSlot, TimetableView, DEFAULT_WORKING_DAYS};
use rusqlite::{Connection, OptionalExtension};
use serde_json::{json, Value};
use uuid::Uuid;

const WEEKDAYS: [&str; 7] = [
    "Monday",
    "Tuesday",
    "Wednesday",
    "Thursday",
    "Friday",
    "Saturday",
    "Sunday",
];

fn normalize_day(raw: &str) -> Option<&'static str> {
    let d = raw.trim().to_ascii_lowercase();
    if d.len() < 3 {
        return None;
    }
    WEEKDAYS
        .iter()
        .copied()
        .find(|w| w.to_ascii_lowercase() == d || w.to_ascii_lowercase()[..3] == d)
}

fn parse_clock(params: &Value, key: &str) -> Result<Option<String>, HandlerErr> {
    let Some(raw) = get_optional_str(params, key)? else {
        return Ok(None);
    };
    chrono::NaiveTime::parse_from_str(&raw, "%H:%M")
        .map(|t| Some(t.format("%H:%M").to_string()))
        .map_err(|_| HandlerErr::bad_params(format!("{} must be HH:MM", key)))
}

fn is_unique_violation(e: &rusqlite::Error) -> bool {
    matches!(
        e,
        rusqlite::Error::SqliteFailure(f, _)
            if f.code == rusqlite::ErrorCode::ConstraintViolation
    )
}

#[derive(Debug)]
struct SlotRow {
    id: String,
    slot: TimeSlot,
    sort_order: i64,
}

impl SlotRow {
    fn to_json(&self) -> Value {
        json!({
            "id": self.id,
            "name": self.slot.name,
            "startTime": self.slot.start_time,
            "endTime": self.slot.end_time,
            "isBreak": self.slot.is_break,
            "sortOrder": self.sort_order,
        })
    }
}

fn slot_from_row(r: &rusqlite::Row<'_>) -> rusqlite::Result<SlotRow> {
    Ok(SlotRow {
        id: r.get(0)?,
        slot: TimeSlot {
            name: r.get(1)?,
            start_time: r.get(2)?,
            end_time: r.get(3)?,
            is_break: r.get::<_, i64>(4)? != 0,
        },
        sort_order: r.get(5)?,
    })
}

const SLOT_SELECT: &str =
    "SELECT id, name, start_time, end_time, is_break, sort_order FROM time_slots";

fn list_slots(conn: &Connection) -> rusqlite::Result<Vec<SlotRow>> {
    let mut stmt = conn.prepare(&format!("{} ORDER BY sort_order, name", SLOT_SELECT))?;
    let rows = stmt
        .query_map([], slot_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

fn load_slot_by(conn: &Connection, column: &str, value: &str) -> Result<SlotRow, HandlerErr> {
    conn.query_row(
        &format!("{} WHERE {} = ?", SLOT_SELECT, column),
        [value],
        slot_from_row,
    )
    .optional()?
    .ok_or_else(|| HandlerErr::not_found(format!("time slot not found: {}", value)))
}

fn working_days(conn: &Connection) -> rusqlite::Result<Vec<String>> {
    let mut stmt = conn.prepare("SELECT day FROM working_days ORDER BY sort_order")?;
    let days = stmt
        .query_map([], |r| r.get::<_, String>(0))?
        .collect::<Result<Vec<_>, _>>()?;
    if days.is_empty() {
        return Ok(DEFAULT_WORKING_DAYS.iter().map(|d| d.to_string()).collect());
    }
    Ok(days)
}

fn assignment_from_row(r: &rusqlite::Row<'_>) -> rusqlite::Result<PeriodAssignment> {
    Ok(PeriodAssignment {
        id: r.get(0)?,
        day: r.get(1)?,
        slot_name: r.get(2)?,
        class_name: r.get(3)?,
        teacher_name: r.get(4)?,
        subject: r.get(5)?,
    })
}

fn list_assignments(
    conn: &Connection,
    class_name: Option<&str>,
    teacher_name: Option<&str>,
) -> rusqlite::Result<Vec<PeriodAssignment>> {
    let mut stmt = conn.prepare(
        "SELECT id, day, slot_name, class_name, teacher_name, subject
         FROM period_assignments
         WHERE (?1 IS NULL OR LOWER(class_name) = LOWER(?1))
           AND (?2 IS NULL OR LOWER(teacher_name) = LOWER(?2))
         ORDER BY rowid",
    )?;
    let rows = stmt
        .query_map((class_name, teacher_name), assignment_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

fn slots_list(ctx: &mut Ctx<'_>, _params: &Value) -> Result<Value, HandlerErr> {
    let slots: Vec<Value> = list_slots(ctx.conn)?.iter().map(SlotRow::to_json).collect();
    Ok(json!({ "slots": slots }))
}

fn slots_create(ctx: &mut Ctx<'_>, params: &Value) -> Result<Value, HandlerErr> {
    let name = get_required_str(params, "name")?;
    let start_time = parse_clock(params, "startTime")?;
    let end_time = parse_clock(params, "endTime")?;
    let is_break = get_optional_bool(params, "isBreak")?.unwrap_or(false);
    let sort_order = match get_optional_i64(params, "sortOrder")? {
        Some(n) => n,
        None => ctx.conn.query_row(
            "SELECT COALESCE(MAX(sort_order) + 1, 0) FROM time_slots",
            [],
            |r| r.get(0),
        )?,
    };
    let id = Uuid::new_v4().to_string();
    ctx.conn
        .execute(
            "INSERT INTO time_slots(id, name, start_time, end_time, is_break, sort_order)
             VALUES(?, ?, ?, ?, ?, ?)",
            (&id, &name, start_time, end_time, is_break as i64, sort_order),
        )
        .map_err(|e| {
            if is_unique_violation(&e) {
                HandlerErr::new("conflict", format!("time slot already exists: {}", name))
            } else {
                HandlerErr::db("db_insert_failed", "time_slots", e)
            }
        })?;
    let slot = load_slot_by(ctx.conn, "id", &id)?.to_json();
    ctx.events.publish("time_slot_added", slot.clone());
    Ok(json!({ "slot": slot }))
}

fn slots_update(ctx: &mut Ctx<'_>, params: &Value) -> Result<Value, HandlerErr> {
    let id = get_required_str(params, "id")?;
    let patch_obj = get_object(params, "patch")?;
    let patch = Value::Object(patch_obj.clone());
    let existing = load_slot_by(ctx.conn, "id", &id)?;

    let tx = ctx
        .conn
        .unchecked_transaction()
        .map_err(|e| HandlerErr::new("db_tx_failed", e.to_string()))?;
    for key in patch_obj.keys() {
        match key.as_str() {
            "name" => {
                let name = get_required_str(&patch, "name")?;
                tx.execute("UPDATE time_slots SET name = ? WHERE id = ?", (&name, &id))
                    .map_err(|e| {
                        if is_unique_violation(&e) {
                            HandlerErr::new("conflict", format!("time slot already exists: {}", name))
                        } else {
                            HandlerErr::db("db_update_failed", "time_slots", e)
                        }
                    })?;
                // Assignments reference slots by name.
                tx.execute(
                    "UPDATE period_assignments SET slot_name = ? WHERE slot_name = ?",
                    (&name, &existing.slot.name),
                )?;
            }
            "startTime" => {
                let v = parse_clock(&patch, "startTime")?;
                tx.execute("UPDATE time_slots SET start_time = ? WHERE id = ?", (v, &id))?;
            }
            "endTime" => {
                let v = parse_clock(&patch, "endTime")?;
                tx.execute("UPDATE time_slots SET end_time = ? WHERE id = ?", (v, &id))?;
            }
            "isBreak" => {
                let v = get_optional_bool(&patch, "isBreak")?.unwrap_or(false);
                tx.execute(
                    "UPDATE time_slots SET is_break = ? WHERE id = ?",
                    (v as i64, &id),
                )?;
            }
            "sortOrder" => {
                let v = get_optional_i64(&patch, "sortOrder")?
                    .ok_or_else(|| HandlerErr::bad_params("sortOrder must be an integer"))?;
                tx.execute("UPDATE time_slots SET sort_order = ? WHERE id = ?", (v, &id))?;
            }
            other => {
                return Err(HandlerErr::bad_params(format!("unknown time slot field: {}", other)))
            }
        }
    }
    tx.commit()
        .map_err(|e| HandlerErr::new("db_tx_failed", e.to_string()))?;

    let slot = load_slot_by(ctx.conn, "id", &id)?.to_json();
    ctx.events.publish("time_slot_updated", slot.clone());
    Ok(json!({ "slot": slot }))
}

fn slots_delete(ctx: &mut Ctx<'_>, params: &Value) -> Result<Value, HandlerErr> {
    let id = get_required_str(params, "id")?;
    let existing = load_slot_by(ctx.conn, "id", &id)?;
    let slot = existing.to_json();
    if let Confirmation::Cancelled =
        confirm_destructive(ctx.conn, params, "timeSlots.delete", slot.clone())?
    {
        return Ok(cancelled());
    }
    let tx = ctx
        .conn
        .unchecked_transaction()
        .map_err(|e| HandlerErr::new("db_tx_failed", e.to_string()))?;
    let removed = tx
        .execute(
            "DELETE FROM period_assignments WHERE slot_name = ?",
            [&existing.slot.name],
        )
        .map_err(|e| HandlerErr::db("db_delete_failed", "period_assignments", e))?;
    tx.execute("DELETE FROM time_slots WHERE id = ?", [&id])
        .map_err(|e| HandlerErr::db("db_delete_failed", "time_slots", e))?;
    tx.commit()
        .map_err(|e| HandlerErr::new("db_tx_failed", e.to_string()))?;
    ctx.events.publish("time_slot_deleted", slot);
    Ok(json!({ "deleted": true, "assignmentsRemoved": removed }))
}

fn days_list(ctx: &mut Ctx<'_>, _params: &Value) -> Result<Value, HandlerErr> {
    Ok(json!({ "days": working_days(ctx.conn)? }))
}

fn days_set(ctx: &mut Ctx<'_>, params: &Value) -> Result<Value, HandlerErr> {
    let Some(raw) = params.get("days").and_then(|v| v.as_array()) else {
        return Err(HandlerErr::bad_params("days must be an array"));
    };
    let mut days: Vec<&'static str> = Vec::with_capacity(raw.len());
    for v in raw {
        let day = v
            .as_str()
            .and_then(normalize_day)
            .ok_or_else(|| HandlerErr::bad_params(format!("not a weekday: {}", v)))?;
        if days.contains(&day) {
            return Err(HandlerErr::bad_params(format!("duplicate day: {}", day)));
        }
        days.push(day);
    }
    if days.is_empty() {
        return Err(HandlerErr::bad_params("days must not be empty"));
    }
    days.sort_by_key(|d| WEEKDAYS.iter().position(|w| w == d));

    let tx = ctx
        .conn
        .unchecked_transaction()
        .map_err(|e| HandlerErr::new("db_tx_failed", e.to_string()))?;
    tx.execute("DELETE FROM working_days", [])?;
    for (i, day) in days.iter().enumerate() {
        tx.execute(
            "INSERT INTO working_days(day, sort_order) VALUES(?, ?)",
            (day, i as i64),
        )?;
    }
    tx.commit()
        .map_err(|e| HandlerErr::new("db_tx_failed", e.to_string()))?;
    ctx.events
        .publish("working_days_updated", json!({ "days": days }));
    Ok(json!({ "days": days }))
}

fn timetable_assign(ctx: &mut Ctx<'_>, params: &Value) -> Result<Value, HandlerErr> {
    let day_raw = get_required_str(params, "day")?;
    let day = normalize_day(&day_raw)
        .ok_or_else(|| HandlerErr::bad_params(format!("not a weekday: {}", day_raw)))?;
    let slot_name = get_required_str(params, "slotName")?;
    let class_name = get_required_str(params, "className")?;
    let teacher_name = get_required_str(params, "teacherName")?;
    let subject = get_required_str(params, "subject")?;

    let slot = load_slot_by(ctx.conn, "name", &slot_name)?;
    if slot.slot.is_break {
        return Err(HandlerErr::bad_params(format!(
            "{} is a break and cannot hold a period",
            slot_name
        )));
    }

    ctx.conn
        .execute(
            "INSERT INTO period_assignments(id, day, slot_name, class_name, teacher_name, subject)
             VALUES(?, ?, ?, ?, ?, ?)
             ON CONFLICT(day, slot_name, class_name) DO UPDATE SET
                teacher_name = excluded.teacher_name,
                subject = excluded.subject",
            (
                Uuid::new_v4().to_string(),
                day,
                &slot_name,
                &class_name,
                &teacher_name,
                &subject,
            ),
        )
        .map_err(|e| HandlerErr::db("db_insert_failed", "period_assignments", e))?;
    let assignment = ctx.conn.query_row(
        "SELECT id, day, slot_name, class_name, teacher_name, subject
         FROM period_assignments WHERE day = ? AND slot_name = ? AND class_name = ?",
        (day, &slot_name, &class_name),
        assignment_from_row,
    )?;
    let data = json!(assignment);
    ctx.events.publish("period_assigned", data.clone());
    Ok(json!({ "assignment": data }))
}

fn timetable_unassign(ctx: &mut Ctx<'_>, params: &Value) -> Result<Value, HandlerErr> {
    let id = get_required_str(params, "id")?;
    let assignment = ctx
        .conn
        .query_row(
            "SELECT id, day, slot_name, class_name, teacher_name, subject
             FROM period_assignments WHERE id = ?",
            [&id],
            assignment_from_row,
        )
        .optional()?
        .ok_or_else(|| HandlerErr::not_found("assignment not found"))?;
    ctx.conn
        .execute("DELETE FROM period_assignments WHERE id = ?", [&id])
        .map_err(|e| HandlerErr::db("db_delete_failed", "period_assignments", e))?;
    ctx.events.publish("period_unassigned", json!(assignment));
    Ok(json!({ "deleted": true }))
}

fn timetable_assignments(ctx: &mut Ctx<'_>, params: &Value) -> Result<Value, HandlerErr> {
    let class_name = get_optional_str(params, "className")?;
    let teacher_name = get_optional_str(params, "teacherName")?;
    let rows = list_assignments(ctx.conn, class_name.as_deref(), teacher_name.as_deref())?;
    Ok(json!({ "assignments": rows }))
}

fn timetable_grid(ctx: &mut Ctx<'_>, params: &Value) -> Result<Value, HandlerErr> {
    let view_raw = get_required_str(params, "view")?;
    let name = get_required_str(params, "name")?;
    let view = TimetableView::parse(&view_raw, &name)
        .ok_or_else(|| HandlerErr::bad_params("view must be \"class\" or \"teacher\""))?;

    let days = working_days(ctx.conn)?;
    let slots: Vec<TimeSlot> = list_slots(ctx.conn)?.into_iter().map(|s| s.slot).collect();
    let assignments = list_assignments(ctx.conn, None, None)?;
    let projection = timetable::project(&assignments, &view);
    let rows = timetable::grid(&days, &slots, &projection);
    Ok(json!({
        "view": view_raw.to_ascii_lowercase(),
        "name": name,
        "days": days,
        "slots": slots,
        "rows": rows,
        "clashes": projection.clashes,
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let f: Handler = match req.method.as_str() {
        "timeSlots.list" => slots_list,
        "timeSlots.create" => slots_create,
        "timeSlots.update" => slots_update,
        "timeSlots.delete" => slots_delete,
        "workingDays.list" => days_list,
        "workingDays.set" => days_set,
        "timetable.assign" => timetable_assign,
        "timetable.unassign" => timetable_unassign,
        "timetable.assignments" => timetable_assignments,
        "timetable.grid" => timetable_grid,
        _ => return None,
    };
    Some(run(state, req, f))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn weekday_names_normalize() {
        assert_eq!(normalize_day("monday"), Some("Monday"));
        assert_eq!(normalize_day(" THU "), Some("Thursday"));
        assert_eq!(normalize_day("Funday"), None);
        assert_eq!(normalize_day("mo"), None);
    }
}
