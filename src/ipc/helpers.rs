//! Shared param parsing, error shape, and roster lookups used by every
//! handler module.

use crate::db;
use crate::ipc::error::err;
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;

pub struct HandlerErr {
    pub code: &'static str,
    pub message: String,
    pub details: Option<serde_json::Value>,
}

impl HandlerErr {
    pub fn new(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(
        code: &'static str,
        message: impl Into<String>,
        details: serde_json::Value,
    ) -> Self {
        Self {
            code,
            message: message.into(),
            details: Some(details),
        }
    }

    pub fn db(e: rusqlite::Error) -> Self {
        Self::new("db_query_failed", e.to_string())
    }

    pub fn response(self, id: &str) -> serde_json::Value {
        err(id, self.code, self.message, self.details)
    }
}

pub fn get_required_str(params: &serde_json::Value, key: &str) -> Result<String, HandlerErr> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
        .ok_or_else(|| HandlerErr::new("bad_params", format!("missing {}", key)))
}

pub fn get_opt_str(params: &serde_json::Value, key: &str) -> Option<String> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
        .filter(|s| !s.trim().is_empty())
}

pub fn get_opt_bool(params: &serde_json::Value, key: &str) -> bool {
    params.get(key).and_then(|v| v.as_bool()).unwrap_or(false)
}

pub fn get_opt_i64(params: &serde_json::Value, key: &str) -> Option<i64> {
    params.get(key).and_then(|v| v.as_i64())
}

/// Term/year come from the request when present, else from the school
/// settings record. Terms are 1..=3.
pub fn resolve_term_year(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<(i64, String), HandlerErr> {
    let school = db::settings_get_json(conn, "setup.school")
        .map_err(|e| HandlerErr::new("db_query_failed", e.to_string()))?
        .unwrap_or_else(|| json!({}));

    let term = params
        .get("term")
        .and_then(|v| v.as_i64())
        .or_else(|| school.get("currentTerm").and_then(|v| v.as_i64()))
        .ok_or_else(|| HandlerErr::new("bad_params", "missing term and no school default"))?;
    if !(1..=3).contains(&term) {
        return Err(HandlerErr::with_details(
            "bad_params",
            "term must be 1, 2 or 3",
            json!({ "term": term }),
        ));
    }

    let year = get_opt_str(params, "year")
        .or_else(|| {
            school
                .get("currentYear")
                .and_then(|v| v.as_str())
                .map(|s| s.to_string())
        })
        .ok_or_else(|| HandlerErr::new("bad_params", "missing year and no school default"))?;

    Ok((term, year))
}

/// Optimistic-concurrency gate: a caller that supplies expectedVersion
/// only wins when it matches; omitting it keeps last-write-wins.
pub fn check_expected_version(
    params: &serde_json::Value,
    actual: i64,
) -> Result<(), HandlerErr> {
    let Some(expected) = params.get("expectedVersion").and_then(|v| v.as_i64()) else {
        return Ok(());
    };
    if expected != actual {
        return Err(HandlerErr::with_details(
            "conflict",
            "record was modified by another session",
            json!({ "expectedVersion": expected, "actualVersion": actual }),
        ));
    }
    Ok(())
}

#[derive(Debug, Clone)]
pub struct ClassRow {
    pub id: String,
    pub name: String,
    pub class_teacher_id: Option<String>,
}

pub fn class_row(conn: &Connection, class_id: &str) -> Result<ClassRow, HandlerErr> {
    conn.query_row(
        "SELECT id, name, class_teacher_id FROM classes WHERE id = ?",
        [class_id],
        |r| {
            Ok(ClassRow {
                id: r.get(0)?,
                name: r.get(1)?,
                class_teacher_id: r.get(2)?,
            })
        },
    )
    .optional()
    .map_err(HandlerErr::db)?
    .ok_or_else(|| HandlerErr::new("not_found", "class not found"))
}

#[derive(Debug, Clone)]
pub struct StudentRow {
    pub id: String,
    pub class_id: String,
    pub display_name: String,
    pub admission_no: String,
    pub guardian_name: Option<String>,
    pub active: bool,
    pub sort_order: i64,
}

fn student_from_row(r: &rusqlite::Row<'_>) -> rusqlite::Result<StudentRow> {
    let last: String = r.get(2)?;
    let first: String = r.get(3)?;
    Ok(StudentRow {
        id: r.get(0)?,
        class_id: r.get(1)?,
        display_name: format!("{}, {}", last, first),
        admission_no: r.get(4)?,
        guardian_name: r.get(5)?,
        active: r.get::<_, i64>(6)? != 0,
        sort_order: r.get(7)?,
    })
}

pub fn student_row(conn: &Connection, student_id: &str) -> Result<StudentRow, HandlerErr> {
    conn.query_row(
        "SELECT id, class_id, last_name, first_name, admission_no, guardian_name, active, sort_order
         FROM students WHERE id = ?",
        [student_id],
        student_from_row,
    )
    .optional()
    .map_err(HandlerErr::db)?
    .ok_or_else(|| HandlerErr::new("not_found", "student not found"))
}

pub fn students_for_class(
    conn: &Connection,
    class_id: &str,
) -> Result<Vec<StudentRow>, HandlerErr> {
    let mut stmt = conn
        .prepare(
            "SELECT id, class_id, last_name, first_name, admission_no, guardian_name, active, sort_order
             FROM students
             WHERE class_id = ?
             ORDER BY sort_order",
        )
        .map_err(HandlerErr::db)?;
    stmt.query_map([class_id], student_from_row)
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::db)
}

pub fn teacher_is_approver(conn: &Connection, teacher_id: &str) -> Result<bool, HandlerErr> {
    conn.query_row(
        "SELECT is_approver FROM teachers WHERE id = ?",
        [teacher_id],
        |r| r.get::<_, i64>(0),
    )
    .optional()
    .map_err(HandlerErr::db)?
    .map(|v| v != 0)
    .ok_or_else(|| HandlerErr::new("not_found", "teacher not found"))
}

pub fn teacher_exists(conn: &Connection, teacher_id: &str) -> Result<(), HandlerErr> {
    let found: Option<i64> = conn
        .query_row("SELECT 1 FROM teachers WHERE id = ?", [teacher_id], |r| {
            r.get(0)
        })
        .optional()
        .map_err(HandlerErr::db)?;
    if found.is_none() {
        return Err(HandlerErr::new("not_found", "teacher not found"));
    }
    Ok(())
}
