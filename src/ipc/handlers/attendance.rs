//! Daily attendance marking and per-term summaries. The summary counts
//! feed the compiled result's attendance snapshot.

use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{
    class_row, get_opt_str, get_required_str, resolve_term_year, students_for_class, HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

fn mark_day(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let class_id = get_required_str(params, "classId")?;
    let teacher_id = get_required_str(params, "teacherId")?;
    let date = get_required_str(params, "date")?;
    let (term, year) = resolve_term_year(conn, params)?;

    let class = class_row(conn, &class_id)?;
    if class.class_teacher_id.as_deref() != Some(teacher_id.as_str()) {
        return Err(HandlerErr::new(
            "forbidden",
            "only the class teacher may mark attendance",
        ));
    }
    let Some(entries) = params.get("entries").and_then(|v| v.as_array()) else {
        return Err(HandlerErr::new("bad_params", "missing entries"));
    };

    let tx = conn
        .unchecked_transaction()
        .map_err(|e| HandlerErr::new("db_tx_failed", e.to_string()))?;
    let mut marked = 0usize;
    let mut skipped = 0usize;
    for entry in entries {
        let Some(student_id) = entry.get("studentId").and_then(|v| v.as_str()) else {
            skipped += 1;
            continue;
        };
        let present = entry.get("present").and_then(|v| v.as_bool()).unwrap_or(false);
        let belongs: Option<i64> = tx
            .query_row(
                "SELECT 1 FROM students WHERE id = ? AND class_id = ?",
                (student_id, &class_id),
                |r| r.get(0),
            )
            .optional()
            .map_err(HandlerErr::db)?;
        if belongs.is_none() {
            skipped += 1;
            continue;
        }
        let id = Uuid::new_v4().to_string();
        tx.execute(
            "INSERT INTO attendance_records(id, class_id, student_id, term, year, date, present)
             VALUES(?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(class_id, student_id, date) DO UPDATE SET
               present = excluded.present,
               term = excluded.term,
               year = excluded.year",
            (&id, &class_id, student_id, term, &year, &date, present as i64),
        )
        .map_err(|e| HandlerErr::new("db_update_failed", e.to_string()))?;
        marked += 1;
    }
    tx.commit()
        .map_err(|e| HandlerErr::new("db_commit_failed", e.to_string()))?;

    Ok(json!({ "date": date, "marked": marked, "skipped": skipped }))
}

pub fn student_summary(
    conn: &Connection,
    class_id: &str,
    student_id: &str,
    term: i64,
    year: &str,
) -> Result<(i64, i64, i64), HandlerErr> {
    let (present, absent): (i64, i64) = conn
        .query_row(
            "SELECT COALESCE(SUM(present), 0), COALESCE(SUM(1 - present), 0)
             FROM attendance_records
             WHERE class_id = ? AND student_id = ? AND term = ? AND year = ?",
            (class_id, student_id, term, year),
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .map_err(HandlerErr::db)?;
    let total_days: i64 = conn
        .query_row(
            "SELECT COUNT(DISTINCT date) FROM attendance_records
             WHERE class_id = ? AND term = ? AND year = ?",
            (class_id, term, year),
            |r| r.get(0),
        )
        .map_err(HandlerErr::db)?;
    Ok((present, absent, total_days))
}

fn summary(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let class_id = get_required_str(params, "classId")?;
    let (term, year) = resolve_term_year(conn, params)?;
    class_row(conn, &class_id)?;

    let only_student = get_opt_str(params, "studentId");
    let students = students_for_class(conn, &class_id)?;
    let mut rows: Vec<serde_json::Value> = Vec::new();
    for s in &students {
        if let Some(ref want) = only_student {
            if *want != s.id {
                continue;
            }
        }
        let (present, absent, total_days) = student_summary(conn, &class_id, &s.id, term, &year)?;
        rows.push(json!({
            "studentId": s.id,
            "displayName": s.display_name,
            "timesPresent": present,
            "timesAbsent": absent,
            "totalDays": total_days,
        }));
    }

    Ok(json!({ "term": term, "year": year, "rows": rows }))
}

type Handler = fn(&Connection, &serde_json::Value) -> Result<serde_json::Value, HandlerErr>;

fn with_conn(state: &mut AppState, req: &Request, f: Handler) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    match f(conn, &req.params) {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let f: Handler = match req.method.as_str() {
        "attendance.markDay" => mark_day,
        "attendance.summary" => summary,
        _ => return None,
    };
    Some(with_conn(state, req, f))
}
