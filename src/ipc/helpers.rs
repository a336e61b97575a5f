use chrono::NaiveDate;
use rusqlite::Connection;
use serde_json::{json, Map, Value};

use crate::entities::{self, FieldError, WriteError};
use crate::ipc::error::{ok, HandlerErr};
use crate::ipc::handlers::setup;
use crate::ipc::types::{AppState, Ctx, Request};

pub type Handler = fn(&mut Ctx<'_>, &Value) -> Result<Value, HandlerErr>;

/// Runs a workspace-bound handler and folds its result into a response.
pub fn run<F>(state: &mut AppState, req: &Request, f: F) -> Value
where
    F: FnOnce(&mut Ctx<'_>, &Value) -> Result<Value, HandlerErr>,
{
    let mut ctx = match state.ctx() {
        Ok(ctx) => ctx,
        Err(e) => return e.response(&req.id),
    };
    match f(&mut ctx, &req.params) {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    }
}

pub fn get_required_str(params: &Value, key: &str) -> Result<String, HandlerErr> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| HandlerErr::bad_params(format!("missing {}", key)))
}

pub fn get_optional_str(params: &Value, key: &str) -> Result<Option<String>, HandlerErr> {
    match params.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => {
            let s = s.trim();
            Ok(if s.is_empty() { None } else { Some(s.to_string()) })
        }
        Some(_) => Err(HandlerErr::bad_params(format!("{} must be a string", key))),
    }
}

pub fn get_required_f64(params: &Value, key: &str) -> Result<f64, HandlerErr> {
    params
        .get(key)
        .and_then(|v| v.as_f64())
        .filter(|n| n.is_finite())
        .ok_or_else(|| HandlerErr::bad_params(format!("{} must be a number", key)))
}

pub fn get_optional_i64(params: &Value, key: &str) -> Result<Option<i64>, HandlerErr> {
    match params.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(v) => v
            .as_i64()
            .map(Some)
            .ok_or_else(|| HandlerErr::bad_params(format!("{} must be an integer", key))),
    }
}

pub fn get_optional_bool(params: &Value, key: &str) -> Result<Option<bool>, HandlerErr> {
    match params.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(v) => v
            .as_bool()
            .map(Some)
            .ok_or_else(|| HandlerErr::bad_params(format!("{} must be boolean", key))),
    }
}

pub fn get_object<'a>(params: &'a Value, key: &str) -> Result<&'a Map<String, Value>, HandlerErr> {
    params
        .get(key)
        .and_then(|v| v.as_object())
        .ok_or_else(|| HandlerErr::bad_params(format!("{} must be an object", key)))
}

pub fn get_required_date(params: &Value, key: &str) -> Result<NaiveDate, HandlerErr> {
    let raw = get_required_str(params, key)?;
    entities::parse_date(&raw)
        .ok_or_else(|| HandlerErr::bad_params(format!("{} must be a YYYY-MM-DD date", key)))
}

pub fn get_optional_date(params: &Value, key: &str) -> Result<Option<NaiveDate>, HandlerErr> {
    match get_optional_str(params, key)? {
        None => Ok(None),
        Some(raw) => entities::parse_date(&raw)
            .map(Some)
            .ok_or_else(|| HandlerErr::bad_params(format!("{} must be a YYYY-MM-DD date", key))),
    }
}

/// `asOf` when given, otherwise the local calendar date.
pub fn as_of(params: &Value) -> Result<NaiveDate, HandlerErr> {
    Ok(get_optional_date(params, "asOf")?.unwrap_or_else(|| chrono::Local::now().date_naive()))
}

pub fn field_err(e: FieldError) -> HandlerErr {
    HandlerErr::bad_params(e.to_string()).with_details(json!({ "field": e.key }))
}

pub fn write_err(e: WriteError, code: &'static str, table: &str) -> HandlerErr {
    match e {
        WriteError::Invalid(f) => field_err(f),
        WriteError::Db(e) => HandlerErr::db(code, table, e),
    }
}

pub enum Confirmation {
    Proceed,
    Cancelled,
}

/// Two-phase confirmation for destructive actions. A missing `confirm` asks the client
/// to confirm (when enabled in setup), `false` cancels and `true` proceeds.
pub fn confirm_destructive(
    conn: &Connection,
    params: &Value,
    action: &str,
    preview: Value,
) -> Result<Confirmation, HandlerErr> {
    match get_optional_bool(params, "confirm")? {
        Some(true) => Ok(Confirmation::Proceed),
        Some(false) => Ok(Confirmation::Cancelled),
        None if setup::confirm_deletes(conn) => Err(HandlerErr::new(
            "confirm_required",
            format!("{} requires confirmation", action),
        )
        .with_details(json!({ "action": action, "record": preview }))),
        None => Ok(Confirmation::Proceed),
    }
}

pub fn cancelled() -> Value {
    json!({ "deleted": false, "cancelled": true })
}
