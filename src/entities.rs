//! Descriptor-driven storage for the plain CRUD entities (people, classes, academic
//! records). Column names only ever come from the static descriptors below, so the
//! dynamic SQL built here never interpolates request data.

use chrono::NaiveDate;
use rusqlite::types::Value;
use rusqlite::{params_from_iter, Connection, OptionalExtension, Row};
use serde_json::{json, Map};
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Text,
    Date,
    Integer,
    Real,
    Bool,
    Json,
}

#[derive(Debug, Clone, Copy)]
pub struct Field {
    pub key: &'static str,
    pub column: &'static str,
    pub kind: FieldKind,
    pub required: bool,
    pub default_true: bool,
}

impl Field {
    const fn new(key: &'static str, column: &'static str, kind: FieldKind) -> Self {
        Self {
            key,
            column,
            kind,
            required: false,
            default_true: false,
        }
    }

    const fn required(self) -> Self {
        Self {
            required: true,
            ..self
        }
    }

    const fn default_true(self) -> Self {
        Self {
            default_true: true,
            ..self
        }
    }

    fn sql_type(&self) -> String {
        match self.kind {
            FieldKind::Text | FieldKind::Date | FieldKind::Json => {
                if self.required {
                    "TEXT NOT NULL".to_string()
                } else {
                    "TEXT".to_string()
                }
            }
            FieldKind::Integer => "INTEGER".to_string(),
            FieldKind::Real => "REAL".to_string(),
            FieldKind::Bool => format!(
                "INTEGER NOT NULL DEFAULT {}",
                if self.default_true { 1 } else { 0 }
            ),
        }
    }
}

const fn text(key: &'static str, column: &'static str) -> Field {
    Field::new(key, column, FieldKind::Text)
}
const fn date(key: &'static str, column: &'static str) -> Field {
    Field::new(key, column, FieldKind::Date)
}
const fn int(key: &'static str, column: &'static str) -> Field {
    Field::new(key, column, FieldKind::Integer)
}
const fn real(key: &'static str, column: &'static str) -> Field {
    Field::new(key, column, FieldKind::Real)
}
const fn flag(key: &'static str, column: &'static str) -> Field {
    Field::new(key, column, FieldKind::Bool)
}
const fn json_field(key: &'static str, column: &'static str) -> Field {
    Field::new(key, column, FieldKind::Json)
}

#[derive(Debug)]
pub struct EntitySpec {
    /// Method prefix, e.g. `students` for `students.create`.
    pub kind: &'static str,
    pub table: &'static str,
    /// Event noun, e.g. `student` for `student_added`.
    pub noun: &'static str,
    pub fields: &'static [Field],
    pub search: &'static [&'static str],
    pub order_by: &'static str,
}

impl EntitySpec {
    pub fn field(&self, key: &str) -> Option<&'static Field> {
        self.fields.iter().find(|f| f.key == key)
    }

    pub fn create_table_sql(&self) -> String {
        let mut cols = vec!["id TEXT PRIMARY KEY".to_string()];
        for f in self.fields {
            cols.push(format!("{} {}", f.column, f.sql_type()));
        }
        cols.push("created_at TEXT NOT NULL".to_string());
        cols.push("updated_at TEXT NOT NULL".to_string());
        format!(
            "CREATE TABLE IF NOT EXISTS {}(\n    {}\n)",
            self.table,
            cols.join(",\n    ")
        )
    }

    fn select_columns(&self) -> String {
        let mut cols = vec!["id".to_string()];
        cols.extend(self.fields.iter().map(|f| f.column.to_string()));
        cols.push("created_at".to_string());
        cols.push("updated_at".to_string());
        cols.join(", ")
    }
}

static STUDENTS: EntitySpec = EntitySpec {
    kind: "students",
    table: "students",
    noun: "student",
    fields: &[
        text("firstName", "first_name").required(),
        text("lastName", "last_name").required(),
        text("admissionNo", "admission_no"),
        text("rollNo", "roll_no"),
        text("gender", "gender"),
        date("dateOfBirth", "date_of_birth"),
        text("email", "email"),
        text("phone", "phone"),
        text("address", "address"),
        text("className", "class_name"),
        text("parentId", "parent_id"),
        flag("active", "active").default_true(),
    ],
    search: &["first_name", "last_name", "admission_no", "email"],
    order_by: "last_name, first_name",
};

static TEACHERS: EntitySpec = EntitySpec {
    kind: "teachers",
    table: "teachers",
    noun: "teacher",
    fields: &[
        text("firstName", "first_name").required(),
        text("lastName", "last_name").required(),
        text("email", "email"),
        text("phone", "phone"),
        text("subject", "subject"),
        text("qualification", "qualification"),
        date("joiningDate", "joining_date"),
        real("salary", "salary"),
        flag("active", "active").default_true(),
    ],
    search: &["first_name", "last_name", "email", "subject"],
    order_by: "last_name, first_name",
};

static STAFF: EntitySpec = EntitySpec {
    kind: "staff",
    table: "staff",
    noun: "staff",
    fields: &[
        text("firstName", "first_name").required(),
        text("lastName", "last_name").required(),
        text("role", "role").required(),
        text("department", "department"),
        text("email", "email"),
        text("phone", "phone"),
        date("joiningDate", "joining_date"),
        real("salary", "salary"),
        flag("active", "active").default_true(),
    ],
    search: &["first_name", "last_name", "role", "department"],
    order_by: "last_name, first_name",
};

static PARENTS: EntitySpec = EntitySpec {
    kind: "parents",
    table: "parents",
    noun: "parent",
    fields: &[
        text("firstName", "first_name").required(),
        text("lastName", "last_name").required(),
        text("phone", "phone").required(),
        text("email", "email"),
        text("relation", "relation"),
        text("occupation", "occupation"),
        text("address", "address"),
    ],
    search: &["first_name", "last_name", "phone", "email"],
    order_by: "last_name, first_name",
};

static CLASSES: EntitySpec = EntitySpec {
    kind: "classes",
    table: "classes",
    noun: "class",
    fields: &[
        text("name", "name").required(),
        text("section", "section"),
        text("classTeacher", "class_teacher"),
        text("room", "room"),
        int("capacity", "capacity"),
        text("academicYearId", "academic_year_id"),
    ],
    search: &["name", "section", "class_teacher"],
    order_by: "name, section",
};

static SUBJECTS: EntitySpec = EntitySpec {
    kind: "subjects",
    table: "subjects",
    noun: "subject",
    fields: &[
        text("name", "name").required(),
        text("code", "code"),
        text("className", "class_name"),
        text("teacherName", "teacher_name"),
    ],
    search: &["name", "code"],
    order_by: "name",
};

static EXAMS: EntitySpec = EntitySpec {
    kind: "exams",
    table: "exams",
    noun: "exam",
    fields: &[
        text("title", "title").required(),
        text("className", "class_name").required(),
        text("subject", "subject"),
        date("examDate", "exam_date"),
        text("startTime", "start_time"),
        text("endTime", "end_time"),
        real("maxMarks", "max_marks"),
        text("room", "room"),
        text("academicYearId", "academic_year_id"),
    ],
    search: &["title", "subject", "class_name"],
    order_by: "exam_date, title",
};

static ASSIGNMENTS: EntitySpec = EntitySpec {
    kind: "assignments",
    table: "assignments",
    noun: "assignment",
    fields: &[
        text("title", "title").required(),
        text("className", "class_name").required(),
        text("subject", "subject"),
        text("teacherName", "teacher_name"),
        text("description", "description"),
        date("dueDate", "due_date"),
        real("maxMarks", "max_marks"),
    ],
    search: &["title", "subject", "description"],
    order_by: "due_date, title",
};

static EVENTS: EntitySpec = EntitySpec {
    kind: "events",
    table: "school_events",
    noun: "event",
    fields: &[
        text("title", "title").required(),
        date("eventDate", "event_date").required(),
        text("location", "location"),
        text("audience", "audience"),
        text("description", "description"),
    ],
    search: &["title", "location", "description"],
    order_by: "event_date, title",
};

static LIVE_CLASSES: EntitySpec = EntitySpec {
    kind: "liveClasses",
    table: "live_classes",
    noun: "live_class",
    fields: &[
        text("title", "title").required(),
        text("className", "class_name").required(),
        text("subject", "subject"),
        text("teacherName", "teacher_name"),
        text("startsAt", "starts_at").required(),
        int("durationMinutes", "duration_minutes"),
        text("meetingUrl", "meeting_url"),
    ],
    search: &["title", "subject", "teacher_name"],
    order_by: "starts_at",
};

static QUIZZES: EntitySpec = EntitySpec {
    kind: "quizzes",
    table: "quizzes",
    noun: "quiz",
    fields: &[
        text("title", "title").required(),
        text("className", "class_name").required(),
        text("subject", "subject"),
        int("durationMinutes", "duration_minutes"),
        json_field("questions", "questions_json"),
    ],
    search: &["title", "subject"],
    order_by: "title",
};

static STUDY_MATERIALS: EntitySpec = EntitySpec {
    kind: "studyMaterials",
    table: "study_materials",
    noun: "study_material",
    fields: &[
        text("title", "title").required(),
        text("className", "class_name"),
        text("subject", "subject"),
        text("description", "description"),
        text("attachmentName", "attachment_name"),
        text("attachmentPath", "attachment_path"),
        text("attachmentSha256", "attachment_sha256"),
    ],
    search: &["title", "subject", "description"],
    order_by: "title",
};

pub static ALL: &[&EntitySpec] = &[
    &STUDENTS,
    &TEACHERS,
    &STAFF,
    &PARENTS,
    &CLASSES,
    &SUBJECTS,
    &EXAMS,
    &ASSIGNMENTS,
    &EVENTS,
    &LIVE_CLASSES,
    &QUIZZES,
    &STUDY_MATERIALS,
];

pub fn by_kind(kind: &str) -> Option<&'static EntitySpec> {
    ALL.iter().copied().find(|e| e.kind == kind)
}

pub fn students() -> &'static EntitySpec {
    &STUDENTS
}

pub fn classes() -> &'static EntitySpec {
    &CLASSES
}

pub fn study_materials() -> &'static EntitySpec {
    &STUDY_MATERIALS
}

/// Validation failure for a single field; carries the offending JSON key.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{key}: {message}")]
pub struct FieldError {
    pub key: String,
    pub message: String,
}

impl FieldError {
    fn new(key: &str, message: impl Into<String>) -> Self {
        Self {
            key: key.to_string(),
            message: message.into(),
        }
    }
}

/// Converts a JSON value into the SQLite value stored for `field`.
pub fn to_sql(field: &Field, v: &serde_json::Value) -> Result<Value, FieldError> {
    if v.is_null() {
        return match field.kind {
            FieldKind::Bool => Ok(Value::Integer(if field.default_true { 1 } else { 0 })),
            _ if field.required => Err(FieldError::new(field.key, "must not be empty")),
            _ => Ok(Value::Null),
        };
    }
    match field.kind {
        FieldKind::Text => {
            let s = v
                .as_str()
                .map(|s| s.trim().to_string())
                .or_else(|| v.as_i64().map(|n| n.to_string()))
                .ok_or_else(|| FieldError::new(field.key, "must be a string"))?;
            if s.is_empty() {
                if field.required {
                    return Err(FieldError::new(field.key, "must not be empty"));
                }
                return Ok(Value::Null);
            }
            Ok(Value::Text(s))
        }
        FieldKind::Date => {
            let s = v
                .as_str()
                .map(|s| s.trim())
                .ok_or_else(|| FieldError::new(field.key, "must be a YYYY-MM-DD string"))?;
            if s.is_empty() {
                if field.required {
                    return Err(FieldError::new(field.key, "must not be empty"));
                }
                return Ok(Value::Null);
            }
            let d = parse_date(s)
                .ok_or_else(|| FieldError::new(field.key, "must be a YYYY-MM-DD date"))?;
            Ok(Value::Text(d.format("%Y-%m-%d").to_string()))
        }
        FieldKind::Integer => v
            .as_i64()
            .or_else(|| v.as_str().and_then(|s| s.trim().parse::<i64>().ok()))
            .map(Value::Integer)
            .ok_or_else(|| FieldError::new(field.key, "must be an integer")),
        FieldKind::Real => v
            .as_f64()
            .or_else(|| v.as_str().and_then(|s| s.trim().parse::<f64>().ok()))
            .filter(|n| n.is_finite())
            .map(Value::Real)
            .ok_or_else(|| FieldError::new(field.key, "must be a number")),
        FieldKind::Bool => v
            .as_bool()
            .or_else(|| v.as_str().and_then(parse_boolish))
            .map(|b| Value::Integer(if b { 1 } else { 0 }))
            .ok_or_else(|| FieldError::new(field.key, "must be a boolean")),
        FieldKind::Json => serde_json::to_string(v)
            .map(Value::Text)
            .map_err(|e| FieldError::new(field.key, e.to_string())),
    }
}

pub fn parse_date(s: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d").ok()
}

pub fn parse_boolish(s: &str) -> Option<bool> {
    match s.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "y" => Some(true),
        "0" | "false" | "no" | "n" => Some(false),
        _ => None,
    }
}

fn row_to_json(spec: &EntitySpec, row: &Row<'_>) -> rusqlite::Result<serde_json::Value> {
    let mut obj = Map::new();
    obj.insert("id".into(), json!(row.get::<_, String>(0)?));
    for (i, f) in spec.fields.iter().enumerate() {
        let idx = i + 1;
        let v = match f.kind {
            FieldKind::Text | FieldKind::Date => json!(row.get::<_, Option<String>>(idx)?),
            FieldKind::Integer => json!(row.get::<_, Option<i64>>(idx)?),
            FieldKind::Real => json!(row.get::<_, Option<f64>>(idx)?),
            FieldKind::Bool => json!(row.get::<_, i64>(idx)? != 0),
            FieldKind::Json => row
                .get::<_, Option<String>>(idx)?
                .and_then(|s| serde_json::from_str(&s).ok())
                .unwrap_or(serde_json::Value::Null),
        };
        obj.insert(f.key.into(), v);
    }
    let n = spec.fields.len();
    obj.insert("createdAt".into(), json!(row.get::<_, String>(n + 1)?));
    obj.insert("updatedAt".into(), json!(row.get::<_, String>(n + 2)?));
    Ok(serde_json::Value::Object(obj))
}

#[derive(Debug, Default, Clone)]
pub struct ListQuery {
    pub filter: Vec<(&'static Field, Value)>,
    pub search: Option<String>,
    pub limit: Option<i64>,
    pub offset: i64,
}

impl ListQuery {
    pub fn from_params(
        spec: &EntitySpec,
        params: &serde_json::Value,
    ) -> Result<Self, FieldError> {
        let mut q = ListQuery::default();
        if let Some(filter) = params.get("filter").and_then(|v| v.as_object()) {
            for (k, v) in filter {
                let field = spec
                    .field(k)
                    .ok_or_else(|| FieldError::new(k, "unknown filter field"))?;
                if field.kind == FieldKind::Json {
                    return Err(FieldError::new(k, "cannot filter on this field"));
                }
                // Required-ness does not apply to filters; null means "IS NULL".
                let relaxed = Field {
                    required: false,
                    ..*field
                };
                let value = if v.is_null() {
                    Value::Null
                } else {
                    to_sql(&relaxed, v)?
                };
                q.filter.push((field, value));
            }
        }
        q.search = params
            .get("search")
            .and_then(|v| v.as_str())
            .map(|s| s.trim().to_ascii_lowercase())
            .filter(|s| !s.is_empty());
        q.limit = params.get("limit").and_then(|v| v.as_i64()).filter(|n| *n > 0);
        q.offset = params
            .get("offset")
            .and_then(|v| v.as_i64())
            .unwrap_or(0)
            .max(0);
        Ok(q)
    }
}

fn escape_like(needle: &str) -> String {
    let mut out = String::with_capacity(needle.len());
    for c in needle.chars() {
        if matches!(c, '%' | '_' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

fn where_clause(spec: &EntitySpec, q: &ListQuery) -> (String, Vec<Value>) {
    let mut conds: Vec<String> = Vec::new();
    let mut args: Vec<Value> = Vec::new();
    for (field, value) in &q.filter {
        if matches!(value, Value::Null) {
            conds.push(format!("{} IS NULL", field.column));
        } else {
            conds.push(format!("{} = ?", field.column));
            args.push(value.clone());
        }
    }
    if let Some(needle) = &q.search {
        if !spec.search.is_empty() {
            let ors: Vec<String> = spec
                .search
                .iter()
                .map(|c| format!("LOWER(COALESCE({}, '')) LIKE ? ESCAPE '\\'", c))
                .collect();
            conds.push(format!("({})", ors.join(" OR ")));
            let pattern = format!("%{}%", escape_like(needle));
            for _ in spec.search {
                args.push(Value::Text(pattern.clone()));
            }
        }
    }
    if conds.is_empty() {
        (String::new(), args)
    } else {
        (format!(" WHERE {}", conds.join(" AND ")), args)
    }
}

pub fn list(
    conn: &Connection,
    spec: &EntitySpec,
    q: &ListQuery,
) -> rusqlite::Result<(Vec<serde_json::Value>, i64)> {
    let (where_sql, args) = where_clause(spec, q);
    let total: i64 = conn.query_row(
        &format!("SELECT COUNT(*) FROM {}{}", spec.table, where_sql),
        params_from_iter(args.iter()),
        |r| r.get(0),
    )?;
    let sql = format!(
        "SELECT {} FROM {}{} ORDER BY {}, id LIMIT {} OFFSET {}",
        spec.select_columns(),
        spec.table,
        where_sql,
        spec.order_by,
        q.limit.unwrap_or(-1),
        q.offset
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(params_from_iter(args.iter()), |row| row_to_json(spec, row))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok((rows, total))
}

pub fn get(
    conn: &Connection,
    spec: &EntitySpec,
    id: &str,
) -> rusqlite::Result<Option<serde_json::Value>> {
    conn.query_row(
        &format!(
            "SELECT {} FROM {} WHERE id = ?",
            spec.select_columns(),
            spec.table
        ),
        [id],
        |row| row_to_json(spec, row),
    )
    .optional()
}

#[derive(Debug, Error)]
pub enum WriteError {
    #[error(transparent)]
    Invalid(#[from] FieldError),
    #[error(transparent)]
    Db(#[from] rusqlite::Error),
}

/// Validates `record` against the descriptor and returns `(column, value)` pairs for
/// every declared field. Unknown keys are rejected; missing optional keys become NULL.
pub fn validate_new(
    spec: &EntitySpec,
    record: &Map<String, serde_json::Value>,
) -> Result<Vec<(&'static str, Value)>, FieldError> {
    reject_unknown(spec, record)?;
    let mut out = Vec::with_capacity(spec.fields.len());
    for f in spec.fields {
        let v = record.get(f.key).unwrap_or(&serde_json::Value::Null);
        out.push((f.column, to_sql(f, v)?));
    }
    Ok(out)
}

fn reject_unknown(
    spec: &EntitySpec,
    record: &Map<String, serde_json::Value>,
) -> Result<(), FieldError> {
    for k in record.keys() {
        if k == "id" || k == "createdAt" || k == "updatedAt" {
            continue;
        }
        if spec.field(k).is_none() {
            return Err(FieldError::new(k, "unknown field"));
        }
    }
    Ok(())
}

pub fn insert(
    conn: &Connection,
    spec: &EntitySpec,
    record: &Map<String, serde_json::Value>,
) -> Result<serde_json::Value, WriteError> {
    let values = validate_new(spec, record)?;
    let id = Uuid::new_v4().to_string();
    insert_with_id(conn, spec, &id, values)?;
    get(conn, spec, &id)?.ok_or(WriteError::Db(rusqlite::Error::QueryReturnedNoRows))
}

pub fn insert_with_id(
    conn: &Connection,
    spec: &EntitySpec,
    id: &str,
    values: Vec<(&'static str, Value)>,
) -> rusqlite::Result<()> {
    let mut cols = vec!["id"];
    let mut args = vec![Value::Text(id.to_string())];
    for (c, v) in values {
        cols.push(c);
        args.push(v);
    }
    let placeholders = vec!["?"; cols.len()].join(", ");
    conn.execute(
        &format!(
            "INSERT INTO {}({}, created_at, updated_at)
             VALUES({}, strftime('%Y-%m-%dT%H:%M:%SZ','now'), strftime('%Y-%m-%dT%H:%M:%SZ','now'))",
            spec.table,
            cols.join(", "),
            placeholders
        ),
        params_from_iter(args.iter()),
    )?;
    Ok(())
}

/// Applies a partial update. Returns `None` when the record does not exist.
pub fn update(
    conn: &Connection,
    spec: &EntitySpec,
    id: &str,
    patch: &Map<String, serde_json::Value>,
) -> Result<Option<serde_json::Value>, WriteError> {
    reject_unknown(spec, patch)?;
    let mut sets: Vec<String> = Vec::new();
    let mut args: Vec<Value> = Vec::new();
    for (k, v) in patch {
        let Some(f) = spec.field(k) else { continue };
        sets.push(format!("{} = ?", f.column));
        args.push(to_sql(f, v)?);
    }
    if get(conn, spec, id)?.is_none() {
        return Ok(None);
    }
    if !sets.is_empty() {
        sets.push("updated_at = strftime('%Y-%m-%dT%H:%M:%SZ','now')".to_string());
        args.push(Value::Text(id.to_string()));
        conn.execute(
            &format!("UPDATE {} SET {} WHERE id = ?", spec.table, sets.join(", ")),
            params_from_iter(args.iter()),
        )?;
    }
    Ok(get(conn, spec, id)?)
}

pub fn delete(conn: &Connection, spec: &EntitySpec, id: &str) -> rusqlite::Result<bool> {
    let n = conn.execute(&format!("DELETE FROM {} WHERE id = ?", spec.table), [id])?;
    Ok(n > 0)
}

pub fn count(conn: &Connection, spec: &EntitySpec) -> rusqlite::Result<i64> {
    conn.query_row(&format!("SELECT COUNT(*) FROM {}", spec.table), [], |r| {
        r.get(0)
    })
}
