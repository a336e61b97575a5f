use crate::academic_year;
use crate::entities::{self, EntitySpec};
use crate::ipc::error::HandlerErr;
use crate::ipc::handlers::fees::fee_totals;
use crate::ipc::helpers::{as_of, get_optional_i64, run, Handler};
use crate::ipc::types::{AppState, Ctx, Request};
use rusqlite::Connection;
use serde_json::{json, Map, Value};

const DEFAULT_SECTION_LIMIT: i64 = 5;

fn dashboard_overview(ctx: &mut Ctx<'_>, params: &Value) -> Result<Value, HandlerErr> {
    let today = as_of(params)?;
    let mut counts = Map::new();
    for kind in ["students", "teachers", "staff", "parents", "classes"] {
        let Some(spec) = entities::by_kind(kind) else {
            continue;
        };
        counts.insert(kind.to_string(), json!(entities::count(ctx.conn, spec)?));
    }
    Ok(json!({
        "asOf": today.to_string(),
        "counts": counts,
        "currentAcademicYear": academic_year::current(ctx.conn)?,
        "fees": fee_totals(ctx.conn, today)?,
    }))
}

/// Records of `spec` whose `column` is on or after `from`, soonest first.
fn upcoming(
    conn: &Connection,
    spec: &EntitySpec,
    column: &str,
    from: &str,
    limit: i64,
) -> rusqlite::Result<Vec<Value>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT id FROM {} WHERE {} >= ? ORDER BY {}, id LIMIT ?",
        spec.table, column, column
    ))?;
    let ids = stmt
        .query_map((from, limit), |r| r.get::<_, String>(0))?
        .collect::<Result<Vec<_>, _>>()?;
    let mut out = Vec::with_capacity(ids.len());
    for id in ids {
        if let Some(record) = entities::get(conn, spec, &id)? {
            out.push(record);
        }
    }
    Ok(out)
}

fn recent(conn: &Connection, spec: &EntitySpec, limit: i64) -> rusqlite::Result<Vec<Value>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT id FROM {} ORDER BY created_at DESC, rowid DESC LIMIT ?",
        spec.table
    ))?;
    let ids = stmt
        .query_map([limit], |r| r.get::<_, String>(0))?
        .collect::<Result<Vec<_>, _>>()?;
    let mut out = Vec::with_capacity(ids.len());
    for id in ids {
        if let Some(record) = entities::get(conn, spec, &id)? {
            out.push(record);
        }
    }
    Ok(out)
}

fn section(
    conn: &Connection,
    kind: &str,
    query: impl FnOnce(&Connection, &'static EntitySpec) -> rusqlite::Result<Vec<Value>>,
) -> Result<Vec<Value>, String> {
    let spec = entities::by_kind(kind).ok_or_else(|| format!("unknown entity kind: {}", kind))?;
    query(conn, spec).map_err(|e| e.to_string())
}

/// Four independent panels; a failing panel is reported under `failed`
/// instead of failing the whole call.
fn dashboard_academics(ctx: &mut Ctx<'_>, params: &Value) -> Result<Value, HandlerErr> {
    let today = as_of(params)?.to_string();
    let limit = get_optional_i64(params, "limit")?
        .filter(|n| *n > 0)
        .unwrap_or(DEFAULT_SECTION_LIMIT);
    let conn = ctx.conn;

    let panels: [(&str, Result<Vec<Value>, String>); 4] = [
        (
            "upcomingExams",
            section(conn, "exams", |c, s| upcoming(c, s, "exam_date", &today, limit)),
        ),
        (
            "assignmentsDue",
            section(conn, "assignments", |c, s| {
                upcoming(c, s, "due_date", &today, limit)
            }),
        ),
        (
            "liveClasses",
            section(conn, "liveClasses", |c, s| {
                upcoming(c, s, "starts_at", &today, limit)
            }),
        ),
        (
            "studyMaterials",
            section(conn, "studyMaterials", |c, s| recent(c, s, limit)),
        ),
    ];

    let mut out = Map::new();
    let mut failed = Vec::new();
    for (name, result) in panels {
        match result {
            Ok(rows) => {
                out.insert(name.to_string(), json!(rows));
            }
            Err(message) => {
                tracing::warn!(panel = name, error = %message, "dashboard panel failed");
                out.insert(name.to_string(), Value::Null);
                failed.push(json!({ "panel": name, "message": message }));
            }
        }
    }
    out.insert("asOf".into(), json!(today));
    out.insert("failed".into(), json!(failed));
    Ok(Value::Object(out))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let f: Handler = match req.method.as_str() {
        "dashboard.overview" => dashboard_overview,
        "dashboard.academics" => dashboard_academics,
        _ => return None,
    };
    Some(run(state, req, f))
}
