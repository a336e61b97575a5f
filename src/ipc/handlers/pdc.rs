//! Post-dated cheque register.

use crate::fees::{round_money, PdcStatus, TransactionStatus};
use crate::ipc::error::HandlerErr;
use crate::ipc::handlers::fees::{ensure_not_overpaid, fee_err, load_fee, record_transaction};
use crate::ipc::handlers::setup::{section_or_default, SetupSection};
use crate::ipc::helpers::{
    as_of, confirm_destructive, get_optional_str, get_required_date, get_required_f64,
    get_required_str, run, Confirmation, Handler,
};
use crate::ipc::types::{AppState, Ctx, Request};
use rusqlite::types::Type;
use rusqlite::{Connection, OptionalExtension};
use serde_json::{json, Value};
use uuid::Uuid;

#[derive(Debug, Clone)]
struct Cheque {
    id: String,
    student_id: String,
    fee_record_id: Option<String>,
    cheque_no: String,
    bank_name: String,
    amount: f64,
    cheque_date: String,
    status: PdcStatus,
    transaction_id: Option<String>,
    remarks: Option<String>,
    created_at: String,
    updated_at: String,
}

const PDC_COLUMNS: &str = "id, student_id, fee_record_id, cheque_no, bank_name, amount,
    cheque_date, status, transaction_id, remarks, created_at, updated_at";

impl Cheque {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        let raw: String = row.get(7)?;
        let status = PdcStatus::parse(&raw)
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(7, Type::Text, Box::new(e)))?;
        Ok(Self {
            id: row.get(0)?,
            student_id: row.get(1)?,
            fee_record_id: row.get(2)?,
            cheque_no: row.get(3)?,
            bank_name: row.get(4)?,
            amount: row.get(5)?,
            cheque_date: row.get(6)?,
            status,
            transaction_id: row.get(8)?,
            remarks: row.get(9)?,
            created_at: row.get(10)?,
            updated_at: row.get(11)?,
        })
    }

    fn to_json(&self) -> Value {
        json!({
            "id": self.id,
            "studentId": self.student_id,
            "feeRecordId": self.fee_record_id,
            "chequeNo": self.cheque_no,
            "bankName": self.bank_name,
            "amount": self.amount,
            "chequeDate": self.cheque_date,
            "status": self.status.as_str(),
            "transactionId": self.transaction_id,
            "remarks": self.remarks,
            "createdAt": self.created_at,
            "updatedAt": self.updated_at,
        })
    }
}

fn load_cheque(conn: &Connection, id: &str) -> Result<Cheque, HandlerErr> {
    conn.query_row(
        &format!("SELECT {} FROM pdc_cheques WHERE id = ?", PDC_COLUMNS),
        [id],
        Cheque::from_row,
    )
    .optional()?
    .ok_or_else(|| HandlerErr::not_found("cheque not found"))
}

fn pdc_list(ctx: &mut Ctx<'_>, params: &Value) -> Result<Value, HandlerErr> {
    let status = get_optional_str(params, "status")?
        .map(|s| PdcStatus::parse(&s))
        .transpose()
        .map_err(fee_err)?;
    let student_id = get_optional_str(params, "studentId")?;
    let mut stmt = ctx.conn.prepare(&format!(
        "SELECT {} FROM pdc_cheques
         WHERE (?1 IS NULL OR status = ?1) AND (?2 IS NULL OR student_id = ?2)
         ORDER BY cheque_date, created_at, id",
        PDC_COLUMNS
    ))?;
    let cheques: Vec<Value> = stmt
        .query_map(
            (status.map(|s| s.as_str()), student_id.as_deref()),
            Cheque::from_row,
        )?
        .collect::<Result<Vec<_>, _>>()?
        .iter()
        .map(Cheque::to_json)
        .collect();
    Ok(json!({ "cheques": cheques }))
}

fn pdc_create(ctx: &mut Ctx<'_>, params: &Value) -> Result<Value, HandlerErr> {
    let student_id = get_required_str(params, "studentId")?;
    let cheque_no = get_required_str(params, "chequeNo")?;
    let bank_name = get_required_str(params, "bankName")?;
    let amount = round_money(get_required_f64(params, "amount")?);
    if amount <= 0.0 {
        return Err(HandlerErr::bad_params("amount must be positive"));
    }
    let cheque_date = get_required_date(params, "chequeDate")?;
    let fee_record_id = get_optional_str(params, "feeRecordId")?;
    let remarks = get_optional_str(params, "remarks")?;

    let student_found = ctx
        .conn
        .query_row("SELECT 1 FROM students WHERE id = ?", [&student_id], |r| {
            r.get::<_, i64>(0)
        })
        .optional()?
        .is_some();
    if !student_found {
        return Err(HandlerErr::not_found("student not found"));
    }
    if let Some(fee_id) = &fee_record_id {
        let fee = load_fee(ctx.conn, fee_id)?;
        if fee.student_id != student_id {
            return Err(HandlerErr::bad_params(
                "fee record belongs to a different student",
            ));
        }
    }

    let id = Uuid::new_v4().to_string();
    ctx.conn
        .execute(
            "INSERT INTO pdc_cheques(id, student_id, fee_record_id, cheque_no, bank_name, amount,
                                     cheque_date, status, remarks, created_at, updated_at)
             VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?,
                    strftime('%Y-%m-%dT%H:%M:%SZ','now'), strftime('%Y-%m-%dT%H:%M:%SZ','now'))",
            (
                &id,
                &student_id,
                fee_record_id.as_deref(),
                &cheque_no,
                &bank_name,
                amount,
                cheque_date.to_string(),
                PdcStatus::Pending.as_str(),
                remarks.as_deref(),
            ),
        )
        .map_err(|e| HandlerErr::db("db_insert_failed", "pdc_cheques", e))?;
    let cheque = load_cheque(ctx.conn, &id)?.to_json();
    ctx.events.publish("pdc_added", cheque.clone());
    Ok(json!({ "cheque": cheque }))
}

fn pdc_clear(ctx: &mut Ctx<'_>, params: &Value) -> Result<Value, HandlerErr> {
    let id = get_required_str(params, "id")?;
    let today = as_of(params)?;
    let cheque = load_cheque(ctx.conn, &id)?;
    cheque
        .status
        .transition(PdcStatus::Cleared)
        .map_err(fee_err)?;
    if let Confirmation::Cancelled =
        confirm_destructive(ctx.conn, params, "pdc.clear", cheque.to_json())?
    {
        return Ok(json!({ "updated": false, "cancelled": true }));
    }

    let tx = ctx
        .conn
        .unchecked_transaction()
        .map_err(|e| HandlerErr::new("db_tx_failed", e.to_string()))?;
    let mut txn_id = None;
    if let Some(fee_id) = &cheque.fee_record_id {
        let fee = load_fee(&tx, fee_id)?;
        ensure_not_overpaid(&fee, cheque.amount)?;
        txn_id = Some(
            record_transaction(
                &tx,
                fee_id,
                cheque.amount,
                "Cheque",
                Some(&cheque.cheque_no),
                TransactionStatus::Success,
            )
            .map_err(|e| HandlerErr::db("db_insert_failed", "fee_transactions", e))?,
        );
    }
    tx.execute(
        "UPDATE pdc_cheques SET status = ?, transaction_id = ?,
                updated_at = strftime('%Y-%m-%dT%H:%M:%SZ','now')
         WHERE id = ?",
        (PdcStatus::Cleared.as_str(), txn_id.as_deref(), &id),
    )
    .map_err(|e| HandlerErr::db("db_update_failed", "pdc_cheques", e))?;
    tx.commit()
        .map_err(|e| HandlerErr::new("db_tx_failed", e.to_string()))?;

    let mut result = json!({ "cheque": load_cheque(ctx.conn, &id)?.to_json() });
    if let Some(fee_id) = &cheque.fee_record_id {
        result["feeRecord"] = load_fee(ctx.conn, fee_id)?.to_json(today);
    }
    ctx.events.publish("pdc_cleared", result.clone());
    Ok(result)
}

fn pdc_bounce(ctx: &mut Ctx<'_>, params: &Value) -> Result<Value, HandlerErr> {
    let id = get_required_str(params, "id")?;
    let today = as_of(params)?;
    let remarks = get_optional_str(params, "remarks")?;
    let cheque = load_cheque(ctx.conn, &id)?;
    cheque
        .status
        .transition(PdcStatus::Bounced)
        .map_err(fee_err)?;
    if let Confirmation::Cancelled =
        confirm_destructive(ctx.conn, params, "pdc.bounce", cheque.to_json())?
    {
        return Ok(json!({ "updated": false, "cancelled": true }));
    }
    let charge = section_or_default(ctx.conn, SetupSection::Fees)
        .get("bounceCharge")
        .and_then(|v| v.as_f64())
        .unwrap_or(0.0);

    let tx = ctx
        .conn
        .unchecked_transaction()
        .map_err(|e| HandlerErr::new("db_tx_failed", e.to_string()))?;
    tx.execute(
        "UPDATE pdc_cheques SET status = ?, remarks = COALESCE(?, remarks),
                updated_at = strftime('%Y-%m-%dT%H:%M:%SZ','now')
         WHERE id = ?",
        (PdcStatus::Bounced.as_str(), remarks.as_deref(), &id),
    )
    .map_err(|e| HandlerErr::db("db_update_failed", "pdc_cheques", e))?;
    let mut charged = 0.0;
    if let Some(fee_id) = &cheque.fee_record_id {
        if charge > 0.0 {
            // Bounce charges accrue as penalties alongside late fees.
            tx.execute(
                "UPDATE fee_records SET late_fee = ROUND(late_fee + ?, 2),
                        updated_at = strftime('%Y-%m-%dT%H:%M:%SZ','now')
                 WHERE id = ?",
                (round_money(charge), fee_id),
            )
            .map_err(|e| HandlerErr::db("db_update_failed", "fee_records", e))?;
            charged = round_money(charge);
        }
    }
    tx.commit()
        .map_err(|e| HandlerErr::new("db_tx_failed", e.to_string()))?;

    let mut result = json!({
        "cheque": load_cheque(ctx.conn, &id)?.to_json(),
        "bounceCharge": charged,
    });
    if let Some(fee_id) = &cheque.fee_record_id {
        result["feeRecord"] = load_fee(ctx.conn, fee_id)?.to_json(today);
    }
    ctx.events.publish("pdc_bounced", result.clone());
    tracing::info!(cheque = %cheque.cheque_no, charged, "cheque bounced");
    Ok(result)
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let f: Handler = match req.method.as_str() {
        "pdc.list" => pdc_list,
        "pdc.create" => pdc_create,
        "pdc.clear" => pdc_clear,
        "pdc.bounce" => pdc_bounce,
        _ => return None,
    };
    Some(run(state, req, f))
}
