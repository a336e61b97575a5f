use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use serde_json::{json, Map, Value};

#[derive(Clone, Copy, Debug)]
pub enum SetupSection {
    School,
    AcademicYear,
    Fees,
    Security,
    Assistant,
}

impl SetupSection {
    const ALL: [SetupSection; 5] = [
        Self::School,
        Self::AcademicYear,
        Self::Fees,
        Self::Security,
        Self::Assistant,
    ];

    fn parse(s: &str) -> Option<Self> {
        match s {
            "school" => Some(Self::School),
            "academicYear" => Some(Self::AcademicYear),
            "fees" => Some(Self::Fees),
            "security" => Some(Self::Security),
            "assistant" => Some(Self::Assistant),
            _ => None,
        }
    }

    fn name(self) -> &'static str {
        match self {
            Self::School => "school",
            Self::AcademicYear => "academicYear",
            Self::Fees => "fees",
            Self::Security => "security",
            Self::Assistant => "assistant",
        }
    }

    fn key(self) -> &'static str {
        match self {
            Self::School => "setup.school",
            Self::AcademicYear => "setup.academicYear",
            Self::Fees => "setup.fees",
            Self::Security => "setup.security",
            Self::Assistant => "setup.assistant",
        }
    }
}

fn default_section(section: SetupSection) -> Value {
    match section {
        SetupSection::School => json!({
            "name": "",
            "address": "",
            "phone": "",
            "currency": "INR",
            "receiptPrefix": "RCPT"
        }),
        SetupSection::AcademicYear => json!({
            "cooldownDays": 300
        }),
        SetupSection::Fees => json!({
            "lateFeeMode": "fixed",
            "lateFeeAmount": 50.0,
            "lateFeePercent": 2.0,
            "graceDays": 0,
            "bounceCharge": 0.0,
            "reminderDaysAhead": 7
        }),
        SetupSection::Security => json!({
            "confirmDeletes": true
        }),
        SetupSection::Assistant => json!({
            "mode": "keyword",
            "endpoint": "",
            "model": "",
            "timeoutSeconds": 20
        }),
    }
}

fn as_object_mut(value: &mut Value) -> Result<&mut Map<String, Value>, String> {
    value
        .as_object_mut()
        .ok_or_else(|| "internal setup object must be a JSON object".to_string())
}

fn parse_bool(v: &Value, key: &str) -> Result<bool, String> {
    v.as_bool().ok_or_else(|| format!("{} must be boolean", key))
}

fn parse_i64_range(v: &Value, key: &str, min: i64, max: i64) -> Result<i64, String> {
    let n = v.as_i64().ok_or_else(|| format!("{} must be integer", key))?;
    if !(min..=max).contains(&n) {
        return Err(format!("{} must be in {}..={}", key, min, max));
    }
    Ok(n)
}

fn parse_f64_range(v: &Value, key: &str, min: f64, max: f64) -> Result<f64, String> {
    let n = v.as_f64().ok_or_else(|| format!("{} must be a number", key))?;
    if !(min..=max).contains(&n) {
        return Err(format!("{} must be in {}..={}", key, min, max));
    }
    Ok(n)
}

fn parse_string_max(v: &Value, key: &str, max_len: usize) -> Result<String, String> {
    let s = v.as_str().ok_or_else(|| format!("{} must be string", key))?;
    let s = s.trim();
    if s.len() > max_len {
        return Err(format!("{} length must be <= {}", key, max_len));
    }
    Ok(s.to_string())
}

fn parse_choice(v: &Value, key: &str, choices: &[&str]) -> Result<String, String> {
    let s = parse_string_max(v, key, 32)?.to_ascii_lowercase();
    if !choices.contains(&s.as_str()) {
        return Err(format!("{} must be one of: {}", key, choices.join(", ")));
    }
    Ok(s)
}

fn merge_section_patch(
    section: SetupSection,
    current: &mut Value,
    patch: &Map<String, Value>,
) -> Result<(), String> {
    let obj = as_object_mut(current)?;
    for (k, v) in patch {
        match section {
            SetupSection::School => match k.as_str() {
                "name" | "address" => {
                    obj.insert(k.clone(), Value::String(parse_string_max(v, k, 200)?));
                }
                "phone" => {
                    obj.insert(k.clone(), Value::String(parse_string_max(v, k, 40)?));
                }
                "currency" => {
                    let c = parse_string_max(v, k, 3)?.to_ascii_uppercase();
                    if c.len() != 3 {
                        return Err("currency must be a 3-letter code".into());
                    }
                    obj.insert(k.clone(), Value::String(c));
                }
                "receiptPrefix" => {
                    let p = parse_string_max(v, k, 12)?;
                    if p.is_empty() {
                        return Err("receiptPrefix must not be empty".into());
                    }
                    obj.insert(k.clone(), Value::String(p));
                }
                _ => return Err(format!("unknown school field: {}", k)),
            },
            SetupSection::AcademicYear => match k.as_str() {
                "cooldownDays" => {
                    obj.insert(k.clone(), Value::from(parse_i64_range(v, k, 0, 366)?));
                }
                _ => return Err(format!("unknown academicYear field: {}", k)),
            },
            SetupSection::Fees => match k.as_str() {
                "lateFeeMode" => {
                    obj.insert(
                        k.clone(),
                        Value::String(parse_choice(v, k, &["fixed", "percent"])?),
                    );
                }
                "lateFeeAmount" | "bounceCharge" => {
                    obj.insert(k.clone(), Value::from(parse_f64_range(v, k, 0.0, 1_000_000.0)?));
                }
                "lateFeePercent" => {
                    obj.insert(k.clone(), Value::from(parse_f64_range(v, k, 0.0, 100.0)?));
                }
                "graceDays" => {
                    obj.insert(k.clone(), Value::from(parse_i64_range(v, k, 0, 90)?));
                }
                "reminderDaysAhead" => {
                    obj.insert(k.clone(), Value::from(parse_i64_range(v, k, 0, 60)?));
                }
                _ => return Err(format!("unknown fees field: {}", k)),
            },
            SetupSection::Security => match k.as_str() {
                "confirmDeletes" => {
                    obj.insert(k.clone(), Value::Bool(parse_bool(v, k)?));
                }
                _ => return Err(format!("unknown security field: {}", k)),
            },
            SetupSection::Assistant => match k.as_str() {
                "mode" => {
                    obj.insert(
                        k.clone(),
                        Value::String(parse_choice(v, k, &["keyword", "remote"])?),
                    );
                }
                "endpoint" => {
                    let e = parse_string_max(v, k, 500)?;
                    if !e.is_empty() && !e.starts_with("http://") && !e.starts_with("https://") {
                        return Err("endpoint must be an http(s) URL".into());
                    }
                    obj.insert(k.clone(), Value::String(e));
                }
                "model" => {
                    obj.insert(k.clone(), Value::String(parse_string_max(v, k, 120)?));
                }
                "timeoutSeconds" => {
                    obj.insert(k.clone(), Value::from(parse_i64_range(v, k, 1, 120)?));
                }
                _ => return Err(format!("unknown assistant field: {}", k)),
            },
        }
    }
    Ok(())
}

pub fn load_section(conn: &rusqlite::Connection, section: SetupSection) -> anyhow::Result<Value> {
    let mut current = default_section(section);
    if let Some(saved) = db::settings_get_json(conn, section.key())? {
        if let Some(saved_obj) = saved.as_object() {
            // Malformed historical values fall back to defaults field by field.
            if let Err(e) = merge_section_patch(section, &mut current, saved_obj) {
                tracing::warn!(section = section.name(), error = %e, "ignoring saved setup values");
                current = default_section(section);
            }
        }
    }
    Ok(current)
}

/// Loads a section for use by other handlers; read errors fall back to defaults.
pub fn section_or_default(conn: &rusqlite::Connection, section: SetupSection) -> Value {
    match load_section(conn, section) {
        Ok(v) => v,
        Err(e) => {
            tracing::warn!(section = section.name(), error = %e, "setup read failed; using defaults");
            default_section(section)
        }
    }
}

pub fn confirm_deletes(conn: &rusqlite::Connection) -> bool {
    section_or_default(conn, SetupSection::Security)
        .get("confirmDeletes")
        .and_then(|v| v.as_bool())
        .unwrap_or(true)
}

fn handle_setup_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let mut out = Map::new();
    for section in SetupSection::ALL {
        match load_section(conn, section) {
            Ok(v) => {
                out.insert(section.name().to_string(), v);
            }
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        }
    }
    ok(&req.id, Value::Object(out))
}

fn handle_setup_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let Some(section_raw) = req.params.get("section").and_then(|v| v.as_str()) else {
        return err(&req.id, "bad_params", "missing section", None);
    };
    let Some(section) = SetupSection::parse(section_raw) else {
        return err(&req.id, "bad_params", "unknown section", None);
    };
    let Some(patch_obj) = req.params.get("patch").and_then(|v| v.as_object()) else {
        return err(&req.id, "bad_params", "patch must be an object", None);
    };

    let mut current = match load_section(conn, section) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if let Err(msg) = merge_section_patch(section, &mut current, patch_obj) {
        return err(&req.id, "bad_params", msg, None);
    }
    if let Err(e) = db::settings_set_json(conn, section.key(), &current) {
        return err(&req.id, "db_update_failed", e.to_string(), None);
    }
    tracing::info!(section = section.name(), "setup updated");
    let mut result = json!({ "ok": true });
    result[section.name()] = current;
    ok(&req.id, result)
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "setup.get" => Some(handle_setup_get(state, req)),
        "setup.update" => Some(handle_setup_update(state, req)),
        _ => None,
    }
}
