//! Academic-year creation with cooldown and template cloning.

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{Connection, OptionalExtension};
use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

pub const DEFAULT_COOLDOWN_DAYS: i64 = 300;

#[derive(Debug, Error)]
pub enum YearError {
    #[error("a new academic year can only be created {required_days} days after the last one ({days_since} days so far)")]
    Cooldown { days_since: i64, required_days: i64 },
    #[error("template academic year not found: {0}")]
    TemplateNotFound(String),
    #[error("academic year not found: {0}")]
    NotFound(String),
    #[error("{0}")]
    Invalid(String),
    #[error("the current academic year cannot be deleted")]
    DeleteCurrent,
    #[error(transparent)]
    Db(#[from] rusqlite::Error),
}

impl YearError {
    pub fn code(&self) -> &'static str {
        match self {
            YearError::Cooldown { .. } => "cooldown_active",
            YearError::TemplateNotFound(_) | YearError::NotFound(_) => "not_found",
            YearError::Invalid(_) => "bad_params",
            YearError::DeleteCurrent => "conflict",
            YearError::Db(_) => "db_tx_failed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AcademicYear {
    pub id: String,
    pub name: String,
    pub start_date: Option<String>,
    pub end_date: Option<String>,
    pub is_current: bool,
    pub created_at: String,
}

#[derive(Debug, Clone, Default)]
pub struct NewYear {
    pub name: String,
    pub start_date: Option<String>,
    pub end_date: Option<String>,
    pub template_year_id: Option<String>,
    pub copy_classes: bool,
    pub copy_fee_templates: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatedYear {
    pub year: AcademicYear,
    pub copied_classes: usize,
    pub copied_fee_templates: usize,
}

fn row_to_year(row: &rusqlite::Row<'_>) -> rusqlite::Result<AcademicYear> {
    Ok(AcademicYear {
        id: row.get(0)?,
        name: row.get(1)?,
        start_date: row.get(2)?,
        end_date: row.get(3)?,
        is_current: row.get::<_, i64>(4)? != 0,
        created_at: row.get(5)?,
    })
}

const YEAR_COLUMNS: &str = "id, name, start_date, end_date, is_current, created_at";

pub fn list(conn: &Connection) -> rusqlite::Result<Vec<AcademicYear>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM academic_years ORDER BY created_at DESC, rowid DESC",
        YEAR_COLUMNS
    ))?;
    let rows = stmt
        .query_map([], row_to_year)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn get(conn: &Connection, id: &str) -> rusqlite::Result<Option<AcademicYear>> {
    conn.query_row(
        &format!("SELECT {} FROM academic_years WHERE id = ?", YEAR_COLUMNS),
        [id],
        row_to_year,
    )
    .optional()
}

pub fn current(conn: &Connection) -> rusqlite::Result<Option<AcademicYear>> {
    conn.query_row(
        &format!(
            "SELECT {} FROM academic_years WHERE is_current = 1 ORDER BY created_at DESC LIMIT 1",
            YEAR_COLUMNS
        ),
        [],
        row_to_year,
    )
    .optional()
}

/// Whole days between the newest year's creation and `now`, if any year exists.
fn days_since_latest(conn: &Connection, now: DateTime<Utc>) -> Result<Option<i64>, YearError> {
    let latest: Option<String> = conn
        .query_row("SELECT MAX(created_at) FROM academic_years", [], |r| r.get(0))?;
    let Some(latest) = latest else {
        return Ok(None);
    };
    let created = DateTime::parse_from_rfc3339(&latest)
        .map_err(|e| YearError::Invalid(format!("stored created_at is not RFC 3339: {}", e)))?
        .with_timezone(&Utc);
    Ok(Some((now - created).num_days()))
}

/// Creates a year inside one transaction: cooldown check, flip `is_current`,
/// insert, then copy classes and fee templates from the template year.
pub fn create(
    conn: &Connection,
    new: &NewYear,
    now: DateTime<Utc>,
    cooldown_days: i64,
) -> Result<CreatedYear, YearError> {
    let name = new.name.trim();
    if name.is_empty() {
        return Err(YearError::Invalid("name must not be empty".into()));
    }

    let tx = conn.unchecked_transaction()?;

    if let Some(days_since) = days_since_latest(&tx, now)? {
        if days_since < cooldown_days {
            return Err(YearError::Cooldown {
                days_since,
                required_days: cooldown_days,
            });
        }
    }

    if let Some(template_id) = &new.template_year_id {
        if get(&tx, template_id)?.is_none() {
            return Err(YearError::TemplateNotFound(template_id.clone()));
        }
    }

    tx.execute("UPDATE academic_years SET is_current = 0", [])?;

    let year_id = Uuid::new_v4().to_string();
    let created_at = now.to_rfc3339_opts(SecondsFormat::Secs, true);
    tx.execute(
        "INSERT INTO academic_years(id, name, start_date, end_date, is_current, created_at)
         VALUES(?, ?, ?, ?, 1, ?)",
        (
            &year_id,
            name,
            new.start_date.as_deref(),
            new.end_date.as_deref(),
            &created_at,
        ),
    )?;

    let mut copied_classes = 0usize;
    let mut copied_fee_templates = 0usize;
    if let Some(template_id) = &new.template_year_id {
        if new.copy_classes {
            copied_classes = copy_classes(&tx, template_id, &year_id)?;
        }
        if new.copy_fee_templates {
            copied_fee_templates = copy_fee_templates(&tx, template_id, &year_id)?;
        }
    }

    // Dropping `tx` without commit rolls back every early return above.
    tx.commit()?;

    let year = get(conn, &year_id)?.ok_or_else(|| YearError::NotFound(year_id.clone()))?;
    Ok(CreatedYear {
        year,
        copied_classes,
        copied_fee_templates,
    })
}

fn copy_classes(conn: &Connection, from_year: &str, to_year: &str) -> rusqlite::Result<usize> {
    let mut stmt = conn.prepare("SELECT id FROM classes WHERE academic_year_id = ? ORDER BY rowid")?;
    let ids = stmt
        .query_map([from_year], |r| r.get::<_, String>(0))?
        .collect::<Result<Vec<_>, _>>()?;
    for old_id in &ids {
        conn.execute(
            "INSERT INTO classes(id, name, section, class_teacher, room, capacity, academic_year_id, created_at, updated_at)
             SELECT ?, name, section, class_teacher, room, capacity, ?,
                    strftime('%Y-%m-%dT%H:%M:%SZ','now'), strftime('%Y-%m-%dT%H:%M:%SZ','now')
             FROM classes WHERE id = ?",
            (Uuid::new_v4().to_string(), to_year, old_id),
        )?;
    }
    Ok(ids.len())
}

fn copy_fee_templates(conn: &Connection, from_year: &str, to_year: &str) -> rusqlite::Result<usize> {
    let mut stmt =
        conn.prepare("SELECT id FROM fee_templates WHERE academic_year_id = ? ORDER BY rowid")?;
    let ids = stmt
        .query_map([from_year], |r| r.get::<_, String>(0))?
        .collect::<Result<Vec<_>, _>>()?;
    for old_id in &ids {
        let new_id = Uuid::new_v4().to_string();
        conn.execute(
            "INSERT INTO fee_templates(id, academic_year_id, name, description, total, created_at, updated_at)
             SELECT ?, ?, name, description, total,
                    strftime('%Y-%m-%dT%H:%M:%SZ','now'), strftime('%Y-%m-%dT%H:%M:%SZ','now')
             FROM fee_templates WHERE id = ?",
            (&new_id, to_year, old_id),
        )?;
        let mut items = conn.prepare(
            "SELECT sort_order, name, amount FROM fee_template_items WHERE template_id = ? ORDER BY sort_order",
        )?;
        let rows = items
            .query_map([old_id], |r| {
                Ok((r.get::<_, i64>(0)?, r.get::<_, String>(1)?, r.get::<_, f64>(2)?))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        for (sort_order, name, amount) in rows {
            conn.execute(
                "INSERT INTO fee_template_items(id, template_id, sort_order, name, amount)
                 VALUES(?, ?, ?, ?, ?)",
                (Uuid::new_v4().to_string(), &new_id, sort_order, name, amount),
            )?;
        }
    }
    Ok(ids.len())
}

pub fn set_current(conn: &Connection, id: &str) -> Result<AcademicYear, YearError> {
    let tx = conn.unchecked_transaction()?;
    if get(&tx, id)?.is_none() {
        return Err(YearError::NotFound(id.to_string()));
    }
    tx.execute("UPDATE academic_years SET is_current = 0", [])?;
    tx.execute("UPDATE academic_years SET is_current = 1 WHERE id = ?", [id])?;
    tx.commit()?;
    get(conn, id)?.ok_or_else(|| YearError::NotFound(id.to_string()))
}

pub fn delete(conn: &Connection, id: &str) -> Result<AcademicYear, YearError> {
    let year = get(conn, id)?.ok_or_else(|| YearError::NotFound(id.to_string()))?;
    if year.is_current {
        return Err(YearError::DeleteCurrent);
    }
    conn.execute("DELETE FROM academic_years WHERE id = ?", [id])?;
    Ok(year)
}
