use crate::academic_year;
use crate::csv::csv_line;
use crate::fees::{
    round_money, template_total, FeeBalance, FeeError, FeeStatus, LateFeePolicy, TemplateItem,
    TransactionStatus, EPSILON,
};
use crate::ipc::error::HandlerErr;
use crate::ipc::handlers::setup::{section_or_default, SetupSection};
use crate::ipc::helpers::{
    as_of, cancelled, confirm_destructive, get_object, get_optional_i64, get_optional_str,
    get_required_date, get_required_f64, get_required_str, run, Confirmation, Handler,
};
use crate::ipc::types::{AppState, Ctx, Request};
use chrono::NaiveDate;
use rusqlite::types::Type;
use rusqlite::{params_from_iter, Connection, OptionalExtension};
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use std::path::PathBuf;
use uuid::Uuid;

pub(crate) fn fee_err(e: FeeError) -> HandlerErr {
    HandlerErr::new(e.code(), e.to_string())
}

fn tx_err(e: rusqlite::Error) -> HandlerErr {
    HandlerErr::new("db_tx_failed", e.to_string())
}

fn parse_stored_date(idx: usize, s: String) -> rusqlite::Result<NaiveDate> {
    NaiveDate::parse_from_str(&s, "%Y-%m-%d")
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

#[derive(Debug, Clone)]
pub(crate) struct FeeRow {
    pub id: String,
    pub student_id: String,
    pub student_name: Option<String>,
    pub class_name: Option<String>,
    pub template_id: Option<String>,
    pub academic_year_id: Option<String>,
    pub title: String,
    pub amount: f64,
    pub late_fee: f64,
    pub amount_paid: f64,
    pub due_date: NaiveDate,
    pub created_at: String,
    pub updated_at: String,
}

const FEE_SELECT: &str = "SELECT f.id, f.student_id,
        TRIM(COALESCE(s.first_name, '') || ' ' || COALESCE(s.last_name, '')),
        s.class_name, f.template_id, f.academic_year_id, f.title, f.amount, f.late_fee,
        f.amount_paid, f.due_date, f.created_at, f.updated_at
     FROM fee_records f
     LEFT JOIN students s ON s.id = f.student_id";

impl FeeRow {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            student_id: row.get(1)?,
            student_name: row
                .get::<_, Option<String>>(2)?
                .filter(|s| !s.is_empty()),
            class_name: row.get(3)?,
            template_id: row.get(4)?,
            academic_year_id: row.get(5)?,
            title: row.get(6)?,
            amount: row.get(7)?,
            late_fee: row.get(8)?,
            amount_paid: row.get(9)?,
            due_date: parse_stored_date(10, row.get(10)?)?,
            created_at: row.get(11)?,
            updated_at: row.get(12)?,
        })
    }

    pub fn balance(&self) -> FeeBalance {
        FeeBalance {
            amount: self.amount,
            late_fee: self.late_fee,
            amount_paid: self.amount_paid,
            due_date: self.due_date,
        }
    }

    pub fn to_json(&self, today: NaiveDate) -> Value {
        let b = self.balance();
        json!({
            "id": self.id,
            "studentId": self.student_id,
            "studentName": self.student_name,
            "className": self.class_name,
            "templateId": self.template_id,
            "academicYearId": self.academic_year_id,
            "title": self.title,
            "amount": self.amount,
            "lateFee": self.late_fee,
            "amountPaid": self.amount_paid,
            "totalDue": b.total_due(),
            "balanceDue": b.balance_due(),
            "dueDate": self.due_date.to_string(),
            "status": b.status(today).as_str(),
            "daysOverdue": if b.balance_due() < EPSILON { 0 } else { b.days_overdue(today) },
            "createdAt": self.created_at,
            "updatedAt": self.updated_at,
        })
    }
}

fn query_fees(
    conn: &Connection,
    where_sql: &str,
    args: &[rusqlite::types::Value],
) -> rusqlite::Result<Vec<FeeRow>> {
    let sql = format!(
        "{}{} ORDER BY f.due_date, f.created_at, f.id",
        FEE_SELECT, where_sql
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(params_from_iter(args.iter()), FeeRow::from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub(crate) fn load_fee(conn: &Connection, id: &str) -> Result<FeeRow, HandlerErr> {
    conn.query_row(&format!("{} WHERE f.id = ?", FEE_SELECT), [id], FeeRow::from_row)
        .optional()?
        .ok_or_else(|| HandlerErr::not_found("fee record not found"))
}

/// Fee records matching the `fees.list` filters, status included.
fn filtered_fees(
    conn: &Connection,
    params: &Value,
    today: NaiveDate,
) -> Result<Vec<FeeRow>, HandlerErr> {
    let mut conds: Vec<&str> = Vec::new();
    let mut args: Vec<rusqlite::types::Value> = Vec::new();
    if let Some(v) = get_optional_str(params, "studentId")? {
        conds.push("f.student_id = ?");
        args.push(v.into());
    }
    if let Some(v) = get_optional_str(params, "className")? {
        conds.push("s.class_name = ?");
        args.push(v.into());
    }
    if let Some(v) = get_optional_str(params, "academicYearId")? {
        conds.push("f.academic_year_id = ?");
        args.push(v.into());
    }
    let status = get_optional_str(params, "status")?
        .map(|s| FeeStatus::parse(&s))
        .transpose()
        .map_err(fee_err)?;
    let where_sql = if conds.is_empty() {
        String::new()
    } else {
        format!(" WHERE {}", conds.join(" AND "))
    };
    let rows = query_fees(conn, &where_sql, &args)?;
    Ok(rows
        .into_iter()
        .filter(|r| status.map_or(true, |s| r.balance().status(today) == s))
        .collect())
}

fn student_exists(conn: &Connection, id: &str) -> rusqlite::Result<bool> {
    conn.query_row("SELECT 1 FROM students WHERE id = ?", [id], |r| r.get::<_, i64>(0))
        .optional()
        .map(|v| v.is_some())
}

fn insert_fee(
    conn: &Connection,
    student_id: &str,
    template_id: Option<&str>,
    academic_year_id: Option<&str>,
    title: &str,
    amount: f64,
    due_date: NaiveDate,
) -> rusqlite::Result<String> {
    let id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO fee_records(id, student_id, template_id, academic_year_id, title, amount,
                                 amount_paid, late_fee, due_date, created_at, updated_at)
         VALUES(?, ?, ?, ?, ?, ?, 0, 0, ?,
                strftime('%Y-%m-%dT%H:%M:%SZ','now'), strftime('%Y-%m-%dT%H:%M:%SZ','now'))",
        (
            &id,
            student_id,
            template_id,
            academic_year_id,
            title,
            round_money(amount),
            due_date.to_string(),
        ),
    )?;
    Ok(id)
}

fn current_year_id(conn: &Connection) -> rusqlite::Result<Option<String>> {
    Ok(academic_year::current(conn)?.map(|y| y.id))
}

// ---------------------------------------------------------------------------
// Transactions
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub(crate) struct TxRow {
    pub id: String,
    pub seq: i64,
    pub fee_record_id: String,
    pub amount: f64,
    pub method: String,
    pub reference: Option<String>,
    pub status: TransactionStatus,
    pub created_at: String,
    pub updated_at: String,
}

const TX_SELECT: &str = "SELECT t.id, t.rowid, t.fee_record_id, t.amount, t.method, t.reference,
        t.status, t.created_at, t.updated_at
     FROM fee_transactions t";

impl TxRow {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        let raw_status: String = row.get(6)?;
        let status = TransactionStatus::parse(&raw_status)
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(6, Type::Text, Box::new(e)))?;
        Ok(Self {
            id: row.get(0)?,
            seq: row.get(1)?,
            fee_record_id: row.get(2)?,
            amount: row.get(3)?,
            method: row.get(4)?,
            reference: row.get(5)?,
            status,
            created_at: row.get(7)?,
            updated_at: row.get(8)?,
        })
    }

    pub fn to_json(&self) -> Value {
        json!({
            "id": self.id,
            "feeRecordId": self.fee_record_id,
            "amount": self.amount,
            "method": self.method,
            "reference": self.reference,
            "status": self.status.as_str(),
            "badge": self.status.badge_label(),
            "createdAt": self.created_at,
            "updatedAt": self.updated_at,
        })
    }
}

pub(crate) fn load_transaction(conn: &Connection, id: &str) -> Result<TxRow, HandlerErr> {
    conn.query_row(&format!("{} WHERE t.id = ?", TX_SELECT), [id], TxRow::from_row)
        .optional()?
        .ok_or_else(|| HandlerErr::not_found("transaction not found"))
}

fn transactions_for(conn: &Connection, where_sql: &str, arg: &str) -> rusqlite::Result<Vec<TxRow>> {
    let mut stmt = conn.prepare(&format!(
        "{} JOIN fee_records f ON f.id = t.fee_record_id{} ORDER BY t.created_at, t.rowid",
        TX_SELECT, where_sql
    ))?;
    let rows = stmt
        .query_map([arg], TxRow::from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Inserts a transaction; a successful one is added to the record's `amount_paid`.
pub(crate) fn record_transaction(
    conn: &Connection,
    fee_record_id: &str,
    amount: f64,
    method: &str,
    reference: Option<&str>,
    status: TransactionStatus,
) -> rusqlite::Result<String> {
    let id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO fee_transactions(id, fee_record_id, amount, method, reference, status,
                                      created_at, updated_at)
         VALUES(?, ?, ?, ?, ?, ?,
                strftime('%Y-%m-%dT%H:%M:%SZ','now'), strftime('%Y-%m-%dT%H:%M:%SZ','now'))",
        (&id, fee_record_id, amount, method, reference, status.as_str()),
    )?;
    if status.counts_as_paid() {
        adjust_paid(conn, fee_record_id, amount)?;
    }
    Ok(id)
}

fn adjust_paid(conn: &Connection, fee_record_id: &str, delta: f64) -> rusqlite::Result<()> {
    conn.execute(
        "UPDATE fee_records
         SET amount_paid = MAX(0, ROUND(amount_paid + ?, 2)),
             updated_at = strftime('%Y-%m-%dT%H:%M:%SZ','now')
         WHERE id = ?",
        (delta, fee_record_id),
    )?;
    Ok(())
}

pub(crate) fn ensure_not_overpaid(fee: &FeeRow, amount: f64) -> Result<(), HandlerErr> {
    let balance_due = fee.balance().balance_due();
    if amount > balance_due + EPSILON {
        return Err(
            HandlerErr::bad_params("payment exceeds the balance due").with_details(json!({
                "feeRecordId": fee.id,
                "balanceDue": balance_due,
                "amount": amount,
            })),
        );
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Templates
// ---------------------------------------------------------------------------

fn parse_items(v: Option<&Value>) -> Result<Vec<TemplateItem>, HandlerErr> {
    let Some(arr) = v.and_then(|v| v.as_array()) else {
        return Err(HandlerErr::bad_params("items must be an array"));
    };
    if arr.is_empty() {
        return Err(HandlerErr::bad_params("items must not be empty"));
    }
    let mut items = Vec::with_capacity(arr.len());
    for (i, item) in arr.iter().enumerate() {
        let name = item
            .get("name")
            .and_then(|v| v.as_str())
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .ok_or_else(|| HandlerErr::bad_params(format!("items[{}].name is required", i)))?;
        let amount = item
            .get("amount")
            .and_then(|v| v.as_f64())
            .filter(|n| n.is_finite() && *n >= 0.0)
            .ok_or_else(|| {
                HandlerErr::bad_params(format!("items[{}].amount must be a non-negative number", i))
            })?;
        items.push(TemplateItem {
            name,
            amount: round_money(amount),
        });
    }
    Ok(items)
}

fn template_items(conn: &Connection, template_id: &str) -> rusqlite::Result<Vec<TemplateItem>> {
    let mut stmt = conn.prepare(
        "SELECT name, amount FROM fee_template_items WHERE template_id = ? ORDER BY sort_order",
    )?;
    let rows = stmt
        .query_map([template_id], |r| {
            Ok(TemplateItem {
                name: r.get(0)?,
                amount: r.get(1)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

fn replace_items(conn: &Connection, template_id: &str, items: &[TemplateItem]) -> rusqlite::Result<()> {
    conn.execute(
        "DELETE FROM fee_template_items WHERE template_id = ?",
        [template_id],
    )?;
    for (i, item) in items.iter().enumerate() {
        conn.execute(
            "INSERT INTO fee_template_items(id, template_id, sort_order, name, amount)
             VALUES(?, ?, ?, ?, ?)",
            (
                Uuid::new_v4().to_string(),
                template_id,
                i as i64,
                &item.name,
                item.amount,
            ),
        )?;
    }
    conn.execute(
        "UPDATE fee_templates SET total = ?, updated_at = strftime('%Y-%m-%dT%H:%M:%SZ','now')
         WHERE id = ?",
        (template_total(items), template_id),
    )?;
    Ok(())
}

fn load_template(conn: &Connection, id: &str) -> Result<Value, HandlerErr> {
    let row = conn
        .query_row(
            "SELECT id, academic_year_id, name, description, total, created_at, updated_at
             FROM fee_templates WHERE id = ?",
            [id],
            |r| {
                Ok(json!({
                    "id": r.get::<_, String>(0)?,
                    "academicYearId": r.get::<_, Option<String>>(1)?,
                    "name": r.get::<_, String>(2)?,
                    "description": r.get::<_, Option<String>>(3)?,
                    "total": r.get::<_, f64>(4)?,
                    "createdAt": r.get::<_, String>(5)?,
                    "updatedAt": r.get::<_, String>(6)?,
                }))
            },
        )
        .optional()?;
    let Some(mut template) = row else {
        return Err(HandlerErr::not_found("fee template not found"));
    };
    template["items"] = json!(template_items(conn, id)?);
    Ok(template)
}

fn templates_list(ctx: &mut Ctx<'_>, params: &Value) -> Result<Value, HandlerErr> {
    let year = get_optional_str(params, "academicYearId")?;
    let mut stmt = ctx.conn.prepare(
        "SELECT id FROM fee_templates
         WHERE (?1 IS NULL OR academic_year_id = ?1)
         ORDER BY name, created_at",
    )?;
    let ids = stmt
        .query_map([year.as_deref()], |r| r.get::<_, String>(0))?
        .collect::<Result<Vec<_>, _>>()?;
    let templates = ids
        .iter()
        .map(|id| load_template(ctx.conn, id))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(json!({ "templates": templates }))
}

fn templates_get(ctx: &mut Ctx<'_>, params: &Value) -> Result<Value, HandlerErr> {
    let id = get_required_str(params, "id")?;
    Ok(json!({ "template": load_template(ctx.conn, &id)? }))
}

fn templates_create(ctx: &mut Ctx<'_>, params: &Value) -> Result<Value, HandlerErr> {
    let name = get_required_str(params, "name")?;
    let description = get_optional_str(params, "description")?;
    let items = parse_items(params.get("items"))?;
    let year_id = match get_optional_str(params, "academicYearId")? {
        Some(y) => Some(y),
        None => current_year_id(ctx.conn)?,
    };
    let id = Uuid::new_v4().to_string();
    let tx = ctx.conn.unchecked_transaction().map_err(tx_err)?;
    tx.execute(
        "INSERT INTO fee_templates(id, academic_year_id, name, description, total, created_at, updated_at)
         VALUES(?, ?, ?, ?, 0, strftime('%Y-%m-%dT%H:%M:%SZ','now'), strftime('%Y-%m-%dT%H:%M:%SZ','now'))",
        (&id, year_id.as_deref(), &name, description.as_deref()),
    )
    .map_err(|e| HandlerErr::db("db_insert_failed", "fee_templates", e))?;
    replace_items(&tx, &id, &items)
        .map_err(|e| HandlerErr::db("db_insert_failed", "fee_template_items", e))?;
    tx.commit().map_err(tx_err)?;
    let template = load_template(ctx.conn, &id)?;
    ctx.events.publish("fee_template_added", template.clone());
    Ok(json!({ "template": template }))
}

fn templates_update(ctx: &mut Ctx<'_>, params: &Value) -> Result<Value, HandlerErr> {
    let id = get_required_str(params, "id")?;
    let patch = get_object(params, "patch")?;
    load_template(ctx.conn, &id)?;

    let tx = ctx.conn.unchecked_transaction().map_err(tx_err)?;
    for (k, v) in patch {
        match k.as_str() {
            "name" => {
                let name = v
                    .as_str()
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .ok_or_else(|| HandlerErr::bad_params("name must be a non-empty string"))?;
                tx.execute("UPDATE fee_templates SET name = ? WHERE id = ?", (name, &id))?;
            }
            "description" | "academicYearId" => {
                let text = match v {
                    Value::Null => None,
                    Value::String(s) if s.trim().is_empty() => None,
                    Value::String(s) => Some(s.trim().to_string()),
                    _ => return Err(HandlerErr::bad_params(format!("{} must be a string", k))),
                };
                let column = if k == "description" {
                    "description"
                } else {
                    "academic_year_id"
                };
                tx.execute(
                    &format!("UPDATE fee_templates SET {} = ? WHERE id = ?", column),
                    (text.as_deref(), &id),
                )?;
            }
            "items" => {
                let items = parse_items(Some(v))?;
                replace_items(&tx, &id, &items)
                    .map_err(|e| HandlerErr::db("db_update_failed", "fee_template_items", e))?;
            }
            other => {
                return Err(HandlerErr::bad_params(format!("unknown template field: {}", other)))
            }
        }
    }
    tx.execute(
        "UPDATE fee_templates SET updated_at = strftime('%Y-%m-%dT%H:%M:%SZ','now') WHERE id = ?",
        [&id],
    )?;
    tx.commit().map_err(tx_err)?;

    let template = load_template(ctx.conn, &id)?;
    ctx.events.publish("fee_template_updated", template.clone());
    Ok(json!({ "template": template }))
}

fn templates_delete(ctx: &mut Ctx<'_>, params: &Value) -> Result<Value, HandlerErr> {
    let id = get_required_str(params, "id")?;
    let template = load_template(ctx.conn, &id)?;
    if let Confirmation::Cancelled =
        confirm_destructive(ctx.conn, params, "feeTemplates.delete", template.clone())?
    {
        return Ok(cancelled());
    }
    let tx = ctx.conn.unchecked_transaction().map_err(tx_err)?;
    tx.execute("DELETE FROM fee_template_items WHERE template_id = ?", [&id])
        .map_err(|e| HandlerErr::db("db_delete_failed", "fee_template_items", e))?;
    tx.execute("DELETE FROM fee_templates WHERE id = ?", [&id])
        .map_err(|e| HandlerErr::db("db_delete_failed", "fee_templates", e))?;
    tx.commit().map_err(tx_err)?;
    ctx.events.publish("fee_template_deleted", template);
    Ok(json!({ "deleted": true }))
}

// ---------------------------------------------------------------------------
// Fee records
// ---------------------------------------------------------------------------

fn fees_assign(ctx: &mut Ctx<'_>, params: &Value) -> Result<Value, HandlerErr> {
    let template_id = get_required_str(params, "templateId")?;
    let due_date = get_required_date(params, "dueDate")?;
    let today = as_of(params)?;
    let template = load_template(ctx.conn, &template_id)?;
    let title = template["name"].as_str().unwrap_or("Fee").to_string();
    let total = template["total"].as_f64().unwrap_or(0.0);
    let year_id = match template["academicYearId"].as_str() {
        Some(y) => Some(y.to_string()),
        None => current_year_id(ctx.conn)?,
    };

    let student_ids: Vec<String> = if let Some(arr) = params.get("studentIds").and_then(|v| v.as_array()) {
        arr.iter()
            .map(|v| {
                v.as_str()
                    .map(|s| s.to_string())
                    .ok_or_else(|| HandlerErr::bad_params("studentIds must be strings"))
            })
            .collect::<Result<_, _>>()?
    } else if let Some(class_name) = get_optional_str(params, "className")? {
        let mut stmt = ctx.conn.prepare(
            "SELECT id FROM students WHERE class_name = ? AND active = 1
             ORDER BY last_name, first_name, id",
        )?;
        let ids = stmt
            .query_map([&class_name], |r| r.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        ids
    } else {
        return Err(HandlerErr::bad_params("provide studentIds or className"));
    };

    let tx = ctx.conn.unchecked_transaction().map_err(tx_err)?;
    let mut created_ids = Vec::new();
    let mut skipped = Vec::new();
    for sid in &student_ids {
        if !student_exists(&tx, sid)? {
            skipped.push(json!({ "studentId": sid, "reason": "student_not_found" }));
            continue;
        }
        let already: bool = tx
            .query_row(
                "SELECT 1 FROM fee_records WHERE student_id = ? AND template_id = ?",
                (sid, &template_id),
                |r| r.get::<_, i64>(0),
            )
            .optional()?
            .is_some();
        if already {
            skipped.push(json!({ "studentId": sid, "reason": "already_assigned" }));
            continue;
        }
        let id = insert_fee(
            &tx,
            sid,
            Some(&template_id),
            year_id.as_deref(),
            &title,
            total,
            due_date,
        )
        .map_err(|e| HandlerErr::db("db_insert_failed", "fee_records", e))?;
        created_ids.push(id);
    }
    tx.commit().map_err(tx_err)?;

    let mut records = Vec::with_capacity(created_ids.len());
    for id in &created_ids {
        let record = load_fee(ctx.conn, id)?.to_json(today);
        ctx.events.publish("fee_added", record.clone());
        records.push(record);
    }
    tracing::info!(
        template = %template_id,
        created = records.len(),
        skipped = skipped.len(),
        "fee template assigned"
    );
    Ok(json!({
        "created": records.len(),
        "skipped": skipped.len(),
        "records": records,
        "skippedStudents": skipped,
    }))
}

fn fees_create(ctx: &mut Ctx<'_>, params: &Value) -> Result<Value, HandlerErr> {
    let student_id = get_required_str(params, "studentId")?;
    let title = get_required_str(params, "title")?;
    let amount = round_money(get_required_f64(params, "amount")?);
    if amount <= 0.0 {
        return Err(HandlerErr::bad_params("amount must be positive"));
    }
    let due_date = get_required_date(params, "dueDate")?;
    let today = as_of(params)?;
    if !student_exists(ctx.conn, &student_id)? {
        return Err(HandlerErr::not_found("student not found"));
    }
    let year_id = match get_optional_str(params, "academicYearId")? {
        Some(y) => Some(y),
        None => current_year_id(ctx.conn)?,
    };
    let id = insert_fee(
        ctx.conn,
        &student_id,
        None,
        year_id.as_deref(),
        &title,
        amount,
        due_date,
    )
    .map_err(|e| HandlerErr::db("db_insert_failed", "fee_records", e))?;
    let record = load_fee(ctx.conn, &id)?.to_json(today);
    ctx.events.publish("fee_added", record.clone());
    Ok(json!({ "record": record }))
}

fn fees_list(ctx: &mut Ctx<'_>, params: &Value) -> Result<Value, HandlerErr> {
    let today = as_of(params)?;
    let records: Vec<Value> = filtered_fees(ctx.conn, params, today)?
        .iter()
        .map(|r| r.to_json(today))
        .collect();
    Ok(json!({ "total": records.len(), "records": records }))
}

fn fees_get(ctx: &mut Ctx<'_>, params: &Value) -> Result<Value, HandlerErr> {
    let id = get_required_str(params, "id")?;
    let today = as_of(params)?;
    let fee = load_fee(ctx.conn, &id)?;
    let transactions: Vec<Value> = transactions_for(ctx.conn, " WHERE f.id = ?", &id)?
        .iter()
        .map(TxRow::to_json)
        .collect();
    Ok(json!({ "record": fee.to_json(today), "transactions": transactions }))
}

fn fees_collect(ctx: &mut Ctx<'_>, params: &Value) -> Result<Value, HandlerErr> {
    let fee_id = get_required_str(params, "feeRecordId")?;
    let amount = round_money(get_required_f64(params, "amount")?);
    if amount <= 0.0 {
        return Err(HandlerErr::bad_params("amount must be positive"));
    }
    let method = get_required_str(params, "method")?;
    if method.len() > 40 {
        return Err(HandlerErr::bad_params("method length must be <= 40"));
    }
    let reference = get_optional_str(params, "reference")?;
    let status = match get_optional_str(params, "status")? {
        Some(s) => TransactionStatus::parse(&s).map_err(fee_err)?,
        None => TransactionStatus::Success,
    };
    if status == TransactionStatus::Failed {
        return Err(HandlerErr::bad_params("a new payment cannot be recorded as Failed"));
    }
    let today = as_of(params)?;

    let tx = ctx.conn.unchecked_transaction().map_err(tx_err)?;
    let fee = load_fee(&tx, &fee_id)?;
    if status.counts_as_paid() {
        ensure_not_overpaid(&fee, amount)?;
    }
    let txn_id = record_transaction(&tx, &fee_id, amount, &method, reference.as_deref(), status)
        .map_err(|e| HandlerErr::db("db_insert_failed", "fee_transactions", e))?;
    tx.commit().map_err(tx_err)?;

    let transaction = load_transaction(ctx.conn, &txn_id)?.to_json();
    let record = load_fee(ctx.conn, &fee_id)?.to_json(today);
    let result = json!({ "transaction": transaction, "feeRecord": record });
    ctx.events.publish("fee_collected", result.clone());
    tracing::info!(fee = %fee_id, amount, status = status.as_str(), "payment recorded");
    Ok(result)
}

fn fees_transactions(ctx: &mut Ctx<'_>, params: &Value) -> Result<Value, HandlerErr> {
    let rows = if let Some(fee_id) = get_optional_str(params, "feeRecordId")? {
        transactions_for(ctx.conn, " WHERE f.id = ?", &fee_id)?
    } else if let Some(student_id) = get_optional_str(params, "studentId")? {
        transactions_for(ctx.conn, " WHERE f.student_id = ?", &student_id)?
    } else {
        return Err(HandlerErr::bad_params("provide feeRecordId or studentId"));
    };
    let transactions: Vec<Value> = rows.iter().map(TxRow::to_json).collect();
    Ok(json!({ "transactions": transactions }))
}

fn fees_update_transaction_status(ctx: &mut Ctx<'_>, params: &Value) -> Result<Value, HandlerErr> {
    let txn_id = get_required_str(params, "transactionId")?;
    let to = TransactionStatus::parse(&get_required_str(params, "status")?).map_err(fee_err)?;
    let today = as_of(params)?;
    let txn = load_transaction(ctx.conn, &txn_id)?;
    let from = txn.status;
    from.transition(to).map_err(fee_err)?;

    if from == TransactionStatus::Success && to == TransactionStatus::Failed {
        if let Confirmation::Cancelled =
            confirm_destructive(ctx.conn, params, "fees.voidTransaction", txn.to_json())?
        {
            return Ok(json!({ "updated": false, "cancelled": true }));
        }
    }

    let tx = ctx.conn.unchecked_transaction().map_err(tx_err)?;
    if to.counts_as_paid() && !from.counts_as_paid() {
        let fee = load_fee(&tx, &txn.fee_record_id)?;
        ensure_not_overpaid(&fee, txn.amount)?;
        adjust_paid(&tx, &txn.fee_record_id, txn.amount)?;
    } else if from.counts_as_paid() && !to.counts_as_paid() {
        adjust_paid(&tx, &txn.fee_record_id, -txn.amount)?;
    }
    tx.execute(
        "UPDATE fee_transactions SET status = ?, updated_at = strftime('%Y-%m-%dT%H:%M:%SZ','now')
         WHERE id = ?",
        (to.as_str(), &txn_id),
    )
    .map_err(|e| HandlerErr::db("db_update_failed", "fee_transactions", e))?;
    tx.commit().map_err(tx_err)?;

    let transaction = load_transaction(ctx.conn, &txn_id)?.to_json();
    let record = load_fee(ctx.conn, &txn.fee_record_id)?.to_json(today);
    let result = json!({ "transaction": transaction, "feeRecord": record });
    ctx.events.publish("fee_transaction_updated", result.clone());
    Ok(result)
}

fn fees_apply_late_fees(ctx: &mut Ctx<'_>, params: &Value) -> Result<Value, HandlerErr> {
    let today = as_of(params)?;
    let policy = LateFeePolicy::from_settings(&section_or_default(ctx.conn, SetupSection::Fees));
    let candidates = query_fees(
        ctx.conn,
        " WHERE f.late_fee_applied_on IS NULL AND f.due_date < ?",
        &[today.to_string().into()],
    )?;

    let tx = ctx.conn.unchecked_transaction().map_err(tx_err)?;
    let mut charged: Vec<(String, f64)> = Vec::new();
    for fee in &candidates {
        let Some(late_fee) = policy.late_fee_for(&fee.balance(), today) else {
            continue;
        };
        tx.execute(
            "UPDATE fee_records
             SET late_fee = ROUND(late_fee + ?, 2), late_fee_applied_on = ?,
                 updated_at = strftime('%Y-%m-%dT%H:%M:%SZ','now')
             WHERE id = ?",
            (late_fee, today.to_string(), &fee.id),
        )
        .map_err(|e| HandlerErr::db("db_update_failed", "fee_records", e))?;
        charged.push((fee.id.clone(), late_fee));
    }
    tx.commit().map_err(tx_err)?;

    let mut applied = Vec::with_capacity(charged.len());
    for (id, late_fee) in charged {
        let record = load_fee(ctx.conn, &id)?.to_json(today);
        ctx.events.publish("fee_updated", record.clone());
        applied.push(json!({ "feeRecordId": id, "lateFee": late_fee, "record": record }));
    }
    tracing::info!(as_of = %today, applied = applied.len(), "late fees applied");
    Ok(json!({ "asOf": today.to_string(), "applied": applied }))
}

fn fees_send_reminders(ctx: &mut Ctx<'_>, params: &Value) -> Result<Value, HandlerErr> {
    let today = as_of(params)?;
    let days_ahead = match get_optional_i64(params, "daysAhead")? {
        Some(d) if d < 0 => return Err(HandlerErr::bad_params("daysAhead must be >= 0")),
        Some(d) => d,
        None => section_or_default(ctx.conn, SetupSection::Fees)
            .get("reminderDaysAhead")
            .and_then(|v| v.as_i64())
            .unwrap_or(7),
    };
    let horizon = today + chrono::Duration::days(days_ahead);
    let due = query_fees(
        ctx.conn,
        " WHERE f.due_date <= ?",
        &[horizon.to_string().into()],
    )?;

    let tx = ctx.conn.unchecked_transaction().map_err(tx_err)?;
    let mut reminders = Vec::new();
    let mut already_queued = 0usize;
    for fee in due.iter().filter(|f| f.balance().balance_due() >= EPSILON) {
        let queued: bool = tx
            .query_row(
                "SELECT 1 FROM fee_reminders WHERE fee_record_id = ? AND status = 'queued'",
                [&fee.id],
                |r| r.get::<_, i64>(0),
            )
            .optional()?
            .is_some();
        if queued {
            already_queued += 1;
            continue;
        }
        let id = Uuid::new_v4().to_string();
        let balance_due = fee.balance().balance_due();
        tx.execute(
            "INSERT INTO fee_reminders(id, fee_record_id, student_id, balance_due, due_date, status, created_at)
             VALUES(?, ?, ?, ?, ?, 'queued', strftime('%Y-%m-%dT%H:%M:%SZ','now'))",
            (&id, &fee.id, &fee.student_id, balance_due, fee.due_date.to_string()),
        )
        .map_err(|e| HandlerErr::db("db_insert_failed", "fee_reminders", e))?;
        reminders.push(json!({
            "id": id,
            "feeRecordId": fee.id,
            "studentId": fee.student_id,
            "studentName": fee.student_name,
            "title": fee.title,
            "balanceDue": balance_due,
            "dueDate": fee.due_date.to_string(),
            "overdue": fee.due_date < today,
            "status": "queued",
        }));
    }
    tx.commit().map_err(tx_err)?;

    if !reminders.is_empty() {
        ctx.events.publish(
            "fee_reminders_queued",
            json!({ "count": reminders.len(), "asOf": today.to_string() }),
        );
    }
    tracing::info!(queued = reminders.len(), already_queued, "fee reminders queued");
    Ok(json!({
        "asOf": today.to_string(),
        "daysAhead": days_ahead,
        "reminders": reminders,
        "alreadyQueued": already_queued,
    }))
}

#[derive(Default)]
struct Totals {
    records: usize,
    billed: f64,
    collected: f64,
    outstanding: f64,
    late_fees: f64,
}

impl Totals {
    fn add(&mut self, b: &FeeBalance) {
        self.records += 1;
        self.billed += b.total_due();
        self.collected += b.amount_paid;
        self.outstanding += b.balance_due();
        self.late_fees += b.late_fee;
    }

    fn to_json(&self) -> Map<String, Value> {
        let mut m = Map::new();
        m.insert("records".into(), json!(self.records));
        m.insert("billed".into(), json!(round_money(self.billed)));
        m.insert("collected".into(), json!(round_money(self.collected)));
        m.insert("outstanding".into(), json!(round_money(self.outstanding)));
        m.insert("lateFees".into(), json!(round_money(self.late_fees)));
        m
    }
}

pub(crate) fn fee_totals(conn: &Connection, today: NaiveDate) -> Result<Value, HandlerErr> {
    let rows = query_fees(conn, "", &[])?;
    let mut totals = Totals::default();
    for r in &rows {
        totals.add(&r.balance());
    }
    let overdue = rows
        .iter()
        .filter(|r| r.balance().status(today) == FeeStatus::Late)
        .count();
    let mut out = totals.to_json();
    out.insert("overdueRecords".into(), json!(overdue));
    Ok(Value::Object(out))
}

fn fees_report(ctx: &mut Ctx<'_>, params: &Value) -> Result<Value, HandlerErr> {
    let today = as_of(params)?;
    let rows = match get_optional_str(params, "academicYearId")? {
        Some(y) => query_fees(ctx.conn, " WHERE f.academic_year_id = ?", &[y.into()])?,
        None => query_fees(ctx.conn, "", &[])?,
    };
    let mut totals = Totals::default();
    let mut by_status: BTreeMap<&'static str, usize> = [
        FeeStatus::Pending,
        FeeStatus::Partial,
        FeeStatus::Paid,
        FeeStatus::Late,
    ]
    .into_iter()
    .map(|s| (s.as_str(), 0))
    .collect();
    let mut by_class: BTreeMap<String, Totals> = BTreeMap::new();
    for r in &rows {
        let b = r.balance();
        totals.add(&b);
        *by_status.entry(b.status(today).as_str()).or_insert(0) += 1;
        by_class
            .entry(r.class_name.clone().unwrap_or_else(|| "Unassigned".to_string()))
            .or_default()
            .add(&b);
    }
    let currency = section_or_default(ctx.conn, SetupSection::School)
        .get("currency")
        .cloned()
        .unwrap_or(json!("INR"));
    let by_class: Vec<Value> = by_class
        .into_iter()
        .map(|(class_name, t)| {
            let mut m = t.to_json();
            m.insert("className".into(), json!(class_name));
            Value::Object(m)
        })
        .collect();

    let mut out = totals.to_json();
    out.insert("asOf".into(), json!(today.to_string()));
    out.insert("currency".into(), currency);
    out.insert("byStatus".into(), json!(by_status));
    out.insert("byClass".into(), json!(by_class));
    Ok(Value::Object(out))
}

fn fees_defaulters(ctx: &mut Ctx<'_>, params: &Value) -> Result<Value, HandlerErr> {
    let today = as_of(params)?;
    let rows = query_fees(ctx.conn, "", &[])?;
    let mut by_student: BTreeMap<String, (Option<String>, Option<String>, usize, f64, i64)> =
        BTreeMap::new();
    for r in rows.iter().filter(|r| r.balance().status(today) == FeeStatus::Late) {
        let b = r.balance();
        let entry = by_student.entry(r.student_id.clone()).or_insert((
            r.student_name.clone(),
            r.class_name.clone(),
            0,
            0.0,
            0,
        ));
        entry.2 += 1;
        entry.3 += b.balance_due();
        entry.4 = entry.4.max(b.days_overdue(today));
    }
    let mut defaulters: Vec<Value> = by_student
        .into_iter()
        .map(|(student_id, (name, class_name, n, due, days))| {
            json!({
                "studentId": student_id,
                "studentName": name,
                "className": class_name,
                "overdueRecords": n,
                "balanceDue": round_money(due),
                "maxDaysOverdue": days,
            })
        })
        .collect();
    defaulters.sort_by(|a, b| {
        let x = a["balanceDue"].as_f64().unwrap_or(0.0);
        let y = b["balanceDue"].as_f64().unwrap_or(0.0);
        y.total_cmp(&x)
    });
    Ok(json!({ "asOf": today.to_string(), "defaulters": defaulters }))
}

fn fees_receipt(ctx: &mut Ctx<'_>, params: &Value) -> Result<Value, HandlerErr> {
    let txn_id = get_required_str(params, "transactionId")?;
    let today = as_of(params)?;
    let txn = load_transaction(ctx.conn, &txn_id)?;
    let fee = load_fee(ctx.conn, &txn.fee_record_id)?;
    let school = section_or_default(ctx.conn, SetupSection::School);
    let prefix = school
        .get("receiptPrefix")
        .and_then(|v| v.as_str())
        .unwrap_or("RCPT");
    let b = fee.balance();
    Ok(json!({
        "receiptNumber": format!("{}-{:06}", prefix, txn.seq),
        "school": school,
        "date": txn.created_at,
        "student": {
            "id": fee.student_id,
            "name": fee.student_name,
            "className": fee.class_name,
        },
        "fee": {
            "id": fee.id,
            "title": fee.title,
            "totalDue": b.total_due(),
            "amountPaid": b.amount_paid,
            "balanceDue": b.balance_due(),
            "status": b.status(today).as_str(),
        },
        "amount": txn.amount,
        "method": txn.method,
        "reference": txn.reference,
        "status": txn.status.as_str(),
        "badge": txn.status.badge_label(),
    }))
}

fn fees_export_csv(ctx: &mut Ctx<'_>, params: &Value) -> Result<Value, HandlerErr> {
    let out_path = PathBuf::from(get_required_str(params, "outPath")?);
    let today = as_of(params)?;
    let rows = filtered_fees(ctx.conn, params, today)?;
    let mut text = csv_line(&[
        "id",
        "studentId",
        "studentName",
        "className",
        "title",
        "amount",
        "lateFee",
        "amountPaid",
        "balanceDue",
        "dueDate",
        "status",
    ]);
    text.push('\n');
    for r in &rows {
        let b = r.balance();
        text.push_str(&csv_line(&[
            r.id.clone(),
            r.student_id.clone(),
            r.student_name.clone().unwrap_or_default(),
            r.class_name.clone().unwrap_or_default(),
            r.title.clone(),
            format!("{:.2}", r.amount),
            format!("{:.2}", r.late_fee),
            format!("{:.2}", r.amount_paid),
            format!("{:.2}", b.balance_due()),
            r.due_date.to_string(),
            b.status(today).as_str().to_string(),
        ]));
        text.push('\n');
    }
    if let Some(parent) = out_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .map_err(|e| HandlerErr::new("export_failed", e.to_string()))?;
    }
    std::fs::write(&out_path, text).map_err(|e| {
        HandlerErr::new("export_failed", e.to_string())
            .with_details(json!({ "path": out_path.to_string_lossy() }))
    })?;
    Ok(json!({ "path": out_path.to_string_lossy(), "rows": rows.len() }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let f: Handler = match req.method.as_str() {
        "feeTemplates.list" => templates_list,
        "feeTemplates.get" => templates_get,
        "feeTemplates.create" => templates_create,
        "feeTemplates.update" => templates_update,
        "feeTemplates.delete" => templates_delete,
        "fees.assign" => fees_assign,
        "fees.create" => fees_create,
        "fees.list" => fees_list,
        "fees.get" => fees_get,
        "fees.collect" => fees_collect,
        "fees.transactions" => fees_transactions,
        "fees.updateTransactionStatus" => fees_update_transaction_status,
        "fees.applyLateFees" => fees_apply_late_fees,
        "fees.sendReminders" => fees_send_reminders,
        "fees.report" => fees_report,
        "fees.defaulters" => fees_defaulters,
        "fees.receipt" => fees_receipt,
        "fees.exportCsv" => fees_export_csv,
        _ => return None,
    };
    Some(run(state, req, f))
}
