use crate::academic_year::{self, NewYear, YearError, DEFAULT_COOLDOWN_DAYS};
use crate::ipc::error::HandlerErr;
use crate::ipc::handlers::setup::{section_or_default, SetupSection};
use crate::ipc::helpers::{
    cancelled, confirm_destructive, get_optional_bool, get_optional_date, get_optional_str,
    get_required_str, run, Confirmation, Handler,
};
use crate::ipc::types::{AppState, Ctx, Request};
use serde_json::{json, Value};

fn year_err(e: YearError) -> HandlerErr {
    let details = match &e {
        YearError::Cooldown {
            days_since,
            required_days,
        } => Some(json!({ "daysSince": days_since, "requiredDays": required_days })),
        _ => None,
    };
    let out = HandlerErr::new(e.code(), e.to_string());
    match details {
        Some(d) => out.with_details(d),
        None => out,
    }
}

fn years_list(ctx: &mut Ctx<'_>, _params: &Value) -> Result<Value, HandlerErr> {
    let years = academic_year::list(ctx.conn)?;
    Ok(json!({ "years": years }))
}

fn years_current(ctx: &mut Ctx<'_>, _params: &Value) -> Result<Value, HandlerErr> {
    let year = academic_year::current(ctx.conn)?;
    Ok(json!({ "year": year }))
}

fn years_create(ctx: &mut Ctx<'_>, params: &Value) -> Result<Value, HandlerErr> {
    let template_year_id = get_optional_str(params, "templateYearId")?;
    let has_template = template_year_id.is_some();
    let new = NewYear {
        name: get_required_str(params, "name")?,
        start_date: get_optional_date(params, "startDate")?.map(|d| d.to_string()),
        end_date: get_optional_date(params, "endDate")?.map(|d| d.to_string()),
        template_year_id,
        copy_classes: get_optional_bool(params, "copyClasses")?.unwrap_or(has_template),
        copy_fee_templates: get_optional_bool(params, "copyFeeTemplates")?
            .unwrap_or(has_template),
    };
    let cooldown_days = section_or_default(ctx.conn, SetupSection::AcademicYear)
        .get("cooldownDays")
        .and_then(|v| v.as_i64())
        .unwrap_or(DEFAULT_COOLDOWN_DAYS);

    let created = academic_year::create(ctx.conn, &new, chrono::Utc::now(), cooldown_days)
        .map_err(year_err)?;
    tracing::info!(
        year = %created.year.name,
        copied_classes = created.copied_classes,
        copied_fee_templates = created.copied_fee_templates,
        "academic year created"
    );
    let result = serde_json::to_value(&created)
        .map_err(|e| HandlerErr::new("db_tx_failed", e.to_string()))?;
    ctx.events.publish("academic_year_added", result["year"].clone());
    Ok(result)
}

fn years_set_current(ctx: &mut Ctx<'_>, params: &Value) -> Result<Value, HandlerErr> {
    let id = get_required_str(params, "id")?;
    let year = academic_year::set_current(ctx.conn, &id).map_err(year_err)?;
    let data = json!(year);
    ctx.events.publish("academic_year_updated", data.clone());
    Ok(json!({ "year": data }))
}

fn years_delete(ctx: &mut Ctx<'_>, params: &Value) -> Result<Value, HandlerErr> {
    let id = get_required_str(params, "id")?;
    let year = academic_year::get(ctx.conn, &id)?
        .ok_or_else(|| HandlerErr::not_found("academic year not found"))?;
    if year.is_current {
        return Err(year_err(YearError::DeleteCurrent));
    }
    if let Confirmation::Cancelled =
        confirm_destructive(ctx.conn, params, "academicYears.delete", json!(year))?
    {
        return Ok(cancelled());
    }
    let deleted = academic_year::delete(ctx.conn, &id).map_err(year_err)?;
    ctx.events.publish("academic_year_deleted", json!(deleted));
    Ok(json!({ "deleted": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let f: Handler = match req.method.as_str() {
        "academicYears.list" => years_list,
        "academicYears.current" => years_current,
        "academicYears.create" => years_create,
        "academicYears.setCurrent" => years_set_current,
        "academicYears.delete" => years_delete,
        _ => return None,
    };
    Some(run(state, req, f))
}
