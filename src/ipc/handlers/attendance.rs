use crate::ipc::error::HandlerErr;
use crate::ipc::helpers::{get_optional_str, get_required_date, get_required_str, run, Handler};
use crate::ipc::types::{AppState, Ctx, Request};
use rusqlite::{Connection, OptionalExtension};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mark {
    Present,
    Absent,
    Late,
    Excused,
}

impl Mark {
    fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "present" | "p" => Some(Mark::Present),
            "absent" | "a" => Some(Mark::Absent),
            "late" | "l" => Some(Mark::Late),
            "excused" | "e" => Some(Mark::Excused),
            _ => None,
        }
    }

    fn as_str(self) -> &'static str {
        match self {
            Mark::Present => "Present",
            Mark::Absent => "Absent",
            Mark::Late => "Late",
            Mark::Excused => "Excused",
        }
    }

    /// Late arrivals still count as attended.
    fn attended(self) -> bool {
        matches!(self, Mark::Present | Mark::Late)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PersonKind {
    Student,
    Teacher,
    Staff,
}

impl PersonKind {
    fn parse(params: &Value) -> Result<Self, HandlerErr> {
        match get_optional_str(params, "personKind")?.as_deref() {
            None | Some("student") => Ok(PersonKind::Student),
            Some("teacher") => Ok(PersonKind::Teacher),
            Some("staff") => Ok(PersonKind::Staff),
            Some(other) => Err(HandlerErr::bad_params(format!(
                "personKind must be student, teacher or staff (got {})",
                other
            ))),
        }
    }

    fn as_str(self) -> &'static str {
        match self {
            PersonKind::Student => "student",
            PersonKind::Teacher => "teacher",
            PersonKind::Staff => "staff",
        }
    }

    fn table(self) -> &'static str {
        match self {
            PersonKind::Student => "students",
            PersonKind::Teacher => "teachers",
            PersonKind::Staff => "staff",
        }
    }
}

#[derive(Debug, Clone)]
struct Person {
    id: String,
    name: String,
    class_name: Option<String>,
}

fn person_from_row(r: &rusqlite::Row<'_>) -> rusqlite::Result<Person> {
    let first: String = r.get(1)?;
    let last: String = r.get(2)?;
    Ok(Person {
        id: r.get(0)?,
        name: format!("{} {}", first, last).trim().to_string(),
        class_name: r.get(3)?,
    })
}

fn find_person(conn: &Connection, kind: PersonKind, id: &str) -> rusqlite::Result<Option<Person>> {
    let class_col = if kind == PersonKind::Student {
        "class_name"
    } else {
        "NULL"
    };
    conn.query_row(
        &format!(
            "SELECT id, first_name, last_name, {} FROM {} WHERE id = ?",
            class_col,
            kind.table()
        ),
        [id],
        person_from_row,
    )
    .optional()
}

/// Active students of a class, or every active teacher / staff member.
fn roster(
    conn: &Connection,
    kind: PersonKind,
    class_name: Option<&str>,
) -> Result<Vec<Person>, HandlerErr> {
    let rows = match kind {
        PersonKind::Student => {
            let class_name = class_name
                .ok_or_else(|| HandlerErr::bad_params("missing className"))?;
            let mut stmt = conn.prepare(
                "SELECT id, first_name, last_name, class_name FROM students
                 WHERE class_name = ? AND active = 1
                 ORDER BY last_name, first_name, id",
            )?;
            let rows = stmt
                .query_map([class_name], person_from_row)?
                .collect::<Result<Vec<_>, _>>()?;
            rows
        }
        _ => {
            let mut stmt = conn.prepare(&format!(
                "SELECT id, first_name, last_name, NULL FROM {}
                 WHERE active = 1 ORDER BY last_name, first_name, id",
                kind.table()
            ))?;
            let rows = stmt
                .query_map([], person_from_row)?
                .collect::<Result<Vec<_>, _>>()?;
            rows
        }
    };
    Ok(rows)
}

fn attendance_mark(ctx: &mut Ctx<'_>, params: &Value) -> Result<Value, HandlerErr> {
    let date = get_required_date(params, "date")?.to_string();
    let kind = PersonKind::parse(params)?;
    let class_name = get_optional_str(params, "className")?;
    let Some(entries) = params.get("entries").and_then(|v| v.as_array()) else {
        return Err(HandlerErr::bad_params("entries must be an array"));
    };

    let tx = ctx
        .conn
        .unchecked_transaction()
        .map_err(|e| HandlerErr::new("db_tx_failed", e.to_string()))?;
    let mut saved = 0usize;
    let mut cleared = 0usize;
    for (i, entry) in entries.iter().enumerate() {
        let person_id = get_required_str(entry, "personId")
            .map_err(|e| HandlerErr::bad_params(format!("entries[{}]: {}", i, e.message)))?;
        let Some(person) = find_person(&tx, kind, &person_id)? else {
            return Err(HandlerErr::not_found(format!(
                "{} not found: {}",
                kind.as_str(),
                person_id
            ))
            .with_details(json!({ "entry": i })));
        };
        let status = match entry.get("status") {
            None | Some(Value::Null) => None,
            Some(v) => Some(v.as_str().and_then(Mark::parse).ok_or_else(|| {
                HandlerErr::bad_params(format!(
                    "entries[{}].status must be Present, Absent, Late or Excused",
                    i
                ))
            })?),
        };
        let remarks = get_optional_str(entry, "remarks")?;
        match status {
            Some(mark) => {
                tx.execute(
                    "INSERT INTO attendance_records(id, date, person_kind, person_id, class_name,
                                                    status, remarks, updated_at)
                     VALUES(?, ?, ?, ?, ?, ?, ?, strftime('%Y-%m-%dT%H:%M:%SZ','now'))
                     ON CONFLICT(date, person_kind, person_id) DO UPDATE SET
                        class_name = excluded.class_name,
                        status = excluded.status,
                        remarks = excluded.remarks,
                        updated_at = excluded.updated_at",
                    (
                        Uuid::new_v4().to_string(),
                        &date,
                        kind.as_str(),
                        &person.id,
                        class_name.as_deref().or(person.class_name.as_deref()),
                        mark.as_str(),
                        remarks.as_deref(),
                    ),
                )
                .map_err(|e| HandlerErr::db("db_insert_failed", "attendance_records", e))?;
                saved += 1;
            }
            None => {
                cleared += tx
                    .execute(
                        "DELETE FROM attendance_records
                         WHERE date = ? AND person_kind = ? AND person_id = ?",
                        (&date, kind.as_str(), &person.id),
                    )
                    .map_err(|e| HandlerErr::db("db_delete_failed", "attendance_records", e))?;
            }
        }
    }
    tx.commit()
        .map_err(|e| HandlerErr::new("db_tx_failed", e.to_string()))?;

    let summary = json!({
        "date": date,
        "personKind": kind.as_str(),
        "className": class_name,
        "saved": saved,
        "cleared": cleared,
    });
    ctx.events.publish("attendance_marked", summary.clone());
    Ok(summary)
}

fn attendance_day(ctx: &mut Ctx<'_>, params: &Value) -> Result<Value, HandlerErr> {
    let date = get_required_date(params, "date")?.to_string();
    let kind = PersonKind::parse(params)?;
    let class_name = get_optional_str(params, "className")?;
    let people = roster(ctx.conn, kind, class_name.as_deref())?;

    let mut stmt = ctx.conn.prepare(
        "SELECT person_id, status, remarks FROM attendance_records
         WHERE date = ? AND person_kind = ?",
    )?;
    let marks: BTreeMap<String, (String, Option<String>)> = stmt
        .query_map((&date, kind.as_str()), |r| {
            Ok((
                r.get::<_, String>(0)?,
                (r.get::<_, String>(1)?, r.get::<_, Option<String>>(2)?),
            ))
        })?
        .collect::<Result<_, _>>()?;

    let mut counts: BTreeMap<&'static str, usize> = BTreeMap::new();
    let mut unmarked = 0usize;
    let rows: Vec<Value> = people
        .iter()
        .map(|p| {
            let mark = marks.get(&p.id);
            match mark.and_then(|(s, _)| Mark::parse(s)) {
                Some(m) => *counts.entry(m.as_str()).or_insert(0) += 1,
                None => unmarked += 1,
            }
            json!({
                "personId": p.id,
                "name": p.name,
                "status": mark.map(|(s, _)| s.clone()),
                "remarks": mark.and_then(|(_, r)| r.clone()),
            })
        })
        .collect();
    Ok(json!({
        "date": date,
        "personKind": kind.as_str(),
        "className": class_name,
        "rows": rows,
        "counts": counts,
        "unmarked": unmarked,
    }))
}

#[derive(Default)]
struct Tally {
    present: usize,
    absent: usize,
    late: usize,
    excused: usize,
    attended: usize,
}

impl Tally {
    fn add(&mut self, m: Mark) {
        if m.attended() {
            self.attended += 1;
        }
        match m {
            Mark::Present => self.present += 1,
            Mark::Absent => self.absent += 1,
            Mark::Late => self.late += 1,
            Mark::Excused => self.excused += 1,
        }
    }

    fn marked(&self) -> usize {
        self.present + self.absent + self.late + self.excused
    }

    fn present_pct(&self) -> Option<f64> {
        let marked = self.marked();
        if marked == 0 {
            return None;
        }
        Some((self.attended as f64 * 1000.0 / marked as f64).round() / 10.0)
    }
}

fn attendance_summary(ctx: &mut Ctx<'_>, params: &Value) -> Result<Value, HandlerErr> {
    let from = get_required_date(params, "from")?;
    let to = get_required_date(params, "to")?;
    if to < from {
        return Err(HandlerErr::bad_params("to must not be before from"));
    }
    let kind = PersonKind::parse(params)?;
    let person_id = get_optional_str(params, "personId")?;
    let class_name = get_optional_str(params, "className")?;

    let people: Vec<Person> = match (&person_id, &class_name) {
        (Some(id), _) => vec![find_person(ctx.conn, kind, id)?
            .ok_or_else(|| HandlerErr::not_found(format!("{} not found", kind.as_str())))?],
        (None, Some(c)) => roster(ctx.conn, kind, Some(c))?,
        (None, None) if kind != PersonKind::Student => roster(ctx.conn, kind, None)?,
        (None, None) => {
            return Err(HandlerErr::bad_params(
                "provide personId or className for student summaries",
            ))
        }
    };

    let mut stmt = ctx.conn.prepare(
        "SELECT person_id, status FROM attendance_records
         WHERE person_kind = ? AND date >= ? AND date <= ?",
    )?;
    let mut tallies: BTreeMap<String, Tally> = BTreeMap::new();
    let rows = stmt.query_map((kind.as_str(), from.to_string(), to.to_string()), |r| {
        Ok((r.get::<_, String>(0)?, r.get::<_, String>(1)?))
    })?;
    for row in rows {
        let (pid, status) = row?;
        if let Some(m) = Mark::parse(&status) {
            tallies.entry(pid).or_default().add(m);
        }
    }

    let empty = Tally::default();
    let people: Vec<Value> = people
        .iter()
        .map(|p| {
            let t = tallies.get(&p.id).unwrap_or(&empty);
            json!({
                "personId": p.id,
                "name": p.name,
                "className": p.class_name,
                "present": t.present,
                "absent": t.absent,
                "late": t.late,
                "excused": t.excused,
                "marked": t.marked(),
                "presentPct": t.present_pct(),
            })
        })
        .collect();
    Ok(json!({
        "from": from.to_string(),
        "to": to.to_string(),
        "personKind": kind.as_str(),
        "people": people,
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let f: Handler = match req.method.as_str() {
        "attendance.mark" => attendance_mark,
        "attendance.day" => attendance_day,
        "attendance.summary" => attendance_summary,
        _ => return None,
    };
    Some(run(state, req, f))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn marks_accept_letters_and_words() {
        assert_eq!(Mark::parse("P"), Some(Mark::Present));
        assert_eq!(Mark::parse("excused"), Some(Mark::Excused));
        assert_eq!(Mark::parse("x"), None);
    }

    #[test]
    fn present_pct_counts_late_as_attended() {
        let mut t = Tally::default();
        t.add(Mark::Present);
        t.add(Mark::Late);
        t.add(Mark::Absent);
        assert_eq!(t.marked(), 3);
        assert_eq!(t.present_pct(), Some(66.7));
        assert_eq!(Tally::default().present_pct(), None);
    }
}
