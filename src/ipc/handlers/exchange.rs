use crate::backup;
use crate::csv::{csv_line, parse_csv};
use crate::entities::{self, EntitySpec, FieldKind, ListQuery};
use crate::events::event_name;
use crate::ipc::error::{err, ok, HandlerErr};
use crate::ipc::handlers::core::select_workspace;
use crate::ipc::helpers::{field_err, get_optional_bool, get_required_str, run, write_err, Handler};
use crate::ipc::types::{AppState, Ctx, Request};
use serde_json::{json, Map, Value};
use std::path::{Path, PathBuf};
use uuid::Uuid;

const ATTACHMENTS_DIR: &str = "attachments";

fn entity_for(params: &Value) -> Result<&'static EntitySpec, HandlerErr> {
    let kind = get_required_str(params, "kind")?;
    entities::by_kind(&kind).ok_or_else(|| HandlerErr::bad_params(format!("unknown kind: {}", kind)))
}

fn cell_text(v: &Value) -> String {
    match v {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        other => other.to_string(),
    }
}

fn export_csv(ctx: &mut Ctx<'_>, params: &Value) -> Result<Value, HandlerErr> {
    let spec = entity_for(params)?;
    let out_path = PathBuf::from(get_required_str(params, "outPath")?);
    let q = ListQuery::from_params(spec, params).map_err(field_err)?;
    let (records, _) = entities::list(ctx.conn, spec, &q)
        .map_err(|e| HandlerErr::db("db_query_failed", spec.table, e))?;

    let mut header = vec!["id"];
    header.extend(spec.fields.iter().map(|f| f.key));
    let mut text = csv_line(&header);
    text.push('\n');
    for r in &records {
        let row: Vec<String> = header.iter().map(|k| cell_text(&r[*k])).collect();
        text.push_str(&csv_line(&row));
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
    tracing::info!(kind = spec.kind, rows = records.len(), path = %out_path.display(), "csv exported");
    Ok(json!({ "path": out_path.to_string_lossy(), "rows": records.len() }))
}

fn import_csv(ctx: &mut Ctx<'_>, params: &Value) -> Result<Value, HandlerErr> {
    let spec = entity_for(params)?;
    let in_path = PathBuf::from(get_required_str(params, "inPath")?);
    let dry_run = get_optional_bool(params, "dryRun")?.unwrap_or(false);
    let text = std::fs::read_to_string(&in_path).map_err(|e| {
        HandlerErr::new("io_failed", e.to_string())
            .with_details(json!({ "path": in_path.to_string_lossy() }))
    })?;
    let text = text.strip_prefix('\u{feff}').unwrap_or(&text);

    let mut records = parse_csv(text).into_iter();
    let Some((_, header)) = records.next() else {
        return Err(HandlerErr::bad_params("csv file is empty"));
    };
    // None marks ignored server-managed columns.
    let mut columns: Vec<Option<&'static entities::Field>> = Vec::with_capacity(header.len());
    let mut unknown = Vec::new();
    for h in &header {
        let h = h.trim();
        if matches!(h, "id" | "createdAt" | "updatedAt") {
            columns.push(None);
            continue;
        }
        match spec.field(h) {
            Some(f) => columns.push(Some(f)),
            None => unknown.push(h.to_string()),
        }
    }
    if !unknown.is_empty() {
        return Err(HandlerErr::bad_params("unknown csv columns")
            .with_details(json!({ "columns": unknown })));
    }

    let mut valid = Vec::new();
    let mut errors = Vec::new();
    let mut total = 0usize;
    for (line, cells) in records {
        total += 1;
        let mut record = Map::new();
        for (field, cell) in columns.iter().zip(cells.iter()) {
            let Some(field) = field else { continue };
            let cell = cell.trim();
            let value = if cell.is_empty() {
                Value::Null
            } else if field.kind == FieldKind::Json {
                serde_json::from_str(cell).unwrap_or_else(|_| Value::String(cell.to_string()))
            } else {
                Value::String(cell.to_string())
            };
            record.insert(field.key.to_string(), value);
        }
        match entities::validate_new(spec, &record) {
            Ok(values) => valid.push(values),
            Err(e) => errors.push(json!({ "line": line, "field": e.key, "message": e.message })),
        }
    }

    let imported = if dry_run { 0 } else { valid.len() };
    if !dry_run && !valid.is_empty() {
        let tx = ctx
            .conn
            .unchecked_transaction()
            .map_err(|e| HandlerErr::new("db_tx_failed", e.to_string()))?;
        for values in valid.iter().cloned() {
            entities::insert_with_id(&tx, spec, &Uuid::new_v4().to_string(), values)
                .map_err(|e| HandlerErr::db("db_insert_failed", spec.table, e))?;
        }
        tx.commit()
            .map_err(|e| HandlerErr::new("db_tx_failed", e.to_string()))?;
        ctx.events.publish(
            event_name(spec.noun, "imported"),
            json!({ "kind": spec.kind, "count": imported }),
        );
    }
    tracing::info!(kind = spec.kind, total, imported, errors = errors.len(), dry_run, "csv import");
    Ok(json!({
        "total": total,
        "valid": valid.len(),
        "imported": imported,
        "dryRun": dry_run,
        "errors": errors,
    }))
}

fn attach_study_material(ctx: &mut Ctx<'_>, params: &Value) -> Result<Value, HandlerErr> {
    let spec = entities::study_materials();
    let id = get_required_str(params, "id")?;
    let source = PathBuf::from(get_required_str(params, "sourcePath")?);
    if entities::get(ctx.conn, spec, &id)?.is_none() {
        return Err(HandlerErr::not_found("study material not found"));
    }
    if !source.is_file() {
        return Err(HandlerErr::bad_params("sourcePath is not a file")
            .with_details(json!({ "path": source.to_string_lossy() })));
    }
    let file_name = source
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .filter(|n| !n.is_empty())
        .ok_or_else(|| HandlerErr::bad_params("sourcePath has no file name"))?;

    let rel_dir = Path::new(ATTACHMENTS_DIR).join(&id);
    let dest_dir = ctx.workspace.join(&rel_dir);
    std::fs::create_dir_all(&dest_dir).map_err(|e| HandlerErr::new("io_failed", e.to_string()))?;
    let dest = dest_dir.join(&file_name);
    std::fs::copy(&source, &dest).map_err(|e| {
        HandlerErr::new("io_failed", e.to_string())
            .with_details(json!({ "path": source.to_string_lossy() }))
    })?;
    let sha256 = backup::sha256_file(&dest)
        .map_err(|e| HandlerErr::new("io_failed", format!("{e:#}")))?;

    let rel_path = rel_dir.join(&file_name).to_string_lossy().replace('\\', "/");
    let mut patch = Map::new();
    patch.insert("attachmentName".into(), json!(file_name));
    patch.insert("attachmentPath".into(), json!(rel_path));
    patch.insert("attachmentSha256".into(), json!(sha256));
    let record = entities::update(ctx.conn, spec, &id, &patch)
        .map_err(|e| write_err(e, "db_update_failed", spec.table))?
        .ok_or_else(|| HandlerErr::not_found("study material not found"))?;
    ctx.events
        .publish(event_name(spec.noun, "updated"), record.clone());
    Ok(json!({ "record": record }))
}

fn export_bundle(ctx: &mut Ctx<'_>, params: &Value) -> Result<Value, HandlerErr> {
    let out_path = PathBuf::from(get_required_str(params, "outPath")?);
    let summary = backup::export_workspace_bundle(ctx.workspace, &out_path)
        .map_err(|e| HandlerErr::new("io_failed", format!("{e:#}")))?;
    tracing::info!(path = %out_path.display(), "workspace bundle exported");
    Ok(json!({
        "ok": true,
        "path": out_path.to_string_lossy(),
        "bundleFormat": summary.bundle_format,
        "entryCount": summary.entry_count,
        "dbSha256": summary.db_sha256,
    }))
}

/// Swaps the workspace database for the bundle's; the connection is reopened after.
fn handle_import_bundle(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(workspace) = state.workspace.clone().filter(|_| state.db.is_some()) else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let Some(in_path) = req
        .params
        .get("inPath")
        .and_then(|v| v.as_str())
        .filter(|s| !s.trim().is_empty())
        .map(PathBuf::from)
    else {
        return err(&req.id, "bad_params", "missing inPath", None);
    };

    state.db = None;
    let imported = backup::import_workspace_bundle(&in_path, &workspace);
    let reopened = select_workspace(state, &workspace);
    match (imported, reopened) {
        (Ok(summary), Ok(())) => {
            backup::discard_previous(&workspace);
            state.events.publish(
                "workspace_restored",
                json!({ "bundleFormat": summary.bundle_format_detected }),
            );
            tracing::info!(path = %in_path.display(), "workspace bundle imported");
            ok(
                &req.id,
                json!({
                    "ok": true,
                    "workspacePath": workspace.to_string_lossy(),
                    "bundleFormatDetected": summary.bundle_format_detected,
                }),
            )
        }
        (Err(e), _) => err(&req.id, "io_failed", format!("{e:#}"), None),
        (Ok(_), Err(open_err)) => {
            tracing::warn!(error = %format!("{open_err:#}"), "imported database did not open, rolling back");
            let restored = backup::rollback_import(&workspace)
                .and_then(|()| select_workspace(state, &workspace));
            if let Err(e) = restored {
                tracing::error!(error = %format!("{e:#}"), "failed to restore previous database");
            }
            err(
                &req.id,
                "db_open_failed",
                format!("{open_err:#}"),
                Some(json!({ "restored": state.db.is_some() })),
            )
        }
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let f: Handler = match req.method.as_str() {
        "exchange.exportCsv" => export_csv,
        "exchange.importCsv" => import_csv,
        "studyMaterials.attach" => attach_study_material,
        "backup.exportWorkspaceBundle" => export_bundle,
        "backup.importWorkspaceBundle" => return Some(handle_import_bundle(state, req)),
        _ => return None,
    };
    Some(run(state, req, f))
}
