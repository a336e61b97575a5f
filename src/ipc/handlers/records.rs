//! `<kind>.list/get/create/update/delete` for every descriptor in `entities::ALL`.

use crate::entities::{self, EntitySpec, ListQuery};
use crate::events::event_name;
use crate::ipc::error::HandlerErr;
use crate::ipc::helpers::{
    cancelled, confirm_destructive, field_err, get_object, get_required_str, run, write_err,
    Confirmation,
};
use crate::ipc::types::{AppState, Ctx, Request};
use serde_json::{json, Value};

type RecordHandler = fn(&mut Ctx<'_>, &EntitySpec, &Value) -> Result<Value, HandlerErr>;

fn load(ctx: &Ctx<'_>, spec: &EntitySpec, id: &str) -> Result<Value, HandlerErr> {
    entities::get(ctx.conn, spec, id)
        .map_err(|e| HandlerErr::db("db_query_failed", spec.table, e))?
        .ok_or_else(|| HandlerErr::not_found(format!("{} not found", spec.noun)))
}

fn records_list(ctx: &mut Ctx<'_>, spec: &EntitySpec, params: &Value) -> Result<Value, HandlerErr> {
    let q = ListQuery::from_params(spec, params).map_err(field_err)?;
    let (records, total) = entities::list(ctx.conn, spec, &q)
        .map_err(|e| HandlerErr::db("db_query_failed", spec.table, e))?;
    Ok(json!({ "records": records, "total": total }))
}

fn records_get(ctx: &mut Ctx<'_>, spec: &EntitySpec, params: &Value) -> Result<Value, HandlerErr> {
    let id = get_required_str(params, "id")?;
    Ok(json!({ "record": load(ctx, spec, &id)? }))
}

fn records_create(
    ctx: &mut Ctx<'_>,
    spec: &EntitySpec,
    params: &Value,
) -> Result<Value, HandlerErr> {
    let record = get_object(params, "record")?;
    let created = entities::insert(ctx.conn, spec, record)
        .map_err(|e| write_err(e, "db_insert_failed", spec.table))?;
    ctx.events
        .publish(event_name(spec.noun, "added"), created.clone());
    Ok(json!({ "record": created }))
}

fn records_update(
    ctx: &mut Ctx<'_>,
    spec: &EntitySpec,
    params: &Value,
) -> Result<Value, HandlerErr> {
    let id = get_required_str(params, "id")?;
    let patch = get_object(params, "patch")?;
    let updated = entities::update(ctx.conn, spec, &id, patch)
        .map_err(|e| write_err(e, "db_update_failed", spec.table))?
        .ok_or_else(|| HandlerErr::not_found(format!("{} not found", spec.noun)))?;
    ctx.events
        .publish(event_name(spec.noun, "updated"), updated.clone());
    Ok(json!({ "record": updated }))
}

fn records_delete(
    ctx: &mut Ctx<'_>,
    spec: &EntitySpec,
    params: &Value,
) -> Result<Value, HandlerErr> {
    let id = get_required_str(params, "id")?;
    let existing = load(ctx, spec, &id)?;
    let action = format!("{}.delete", spec.kind);
    if let Confirmation::Cancelled =
        confirm_destructive(ctx.conn, params, &action, existing.clone())?
    {
        return Ok(cancelled());
    }
    let deleted = entities::delete(ctx.conn, spec, &id)
        .map_err(|e| HandlerErr::db("db_delete_failed", spec.table, e))?;
    if deleted {
        ctx.events
            .publish(event_name(spec.noun, "deleted"), existing);
    }
    Ok(json!({ "deleted": deleted }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let (kind, verb) = req.method.split_once('.')?;
    let spec = entities::by_kind(kind)?;
    let f: RecordHandler = match verb {
        "list" => records_list,
        "get" => records_get,
        "create" => records_create,
        "update" => records_update,
        "delete" => records_delete,
        _ => return None,
    };
    Some(run(state, req, |ctx, params| f(ctx, spec, params)))
}
