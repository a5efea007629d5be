//! Affective and psychomotor ratings, upserted cell-per-trait by the
//! class teacher. Presence of either kind gates result compilation.

use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{
    class_row, get_opt_str, get_required_str, resolve_term_year, student_row, students_for_class,
    HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use rusqlite::Connection;
use serde_json::json;
use std::collections::HashMap;

pub const AFFECTIVE_TRAITS: &[&str] = &[
    "punctuality",
    "attentiveness",
    "neatness",
    "honesty",
    "cooperation",
];
pub const PSYCHOMOTOR_TRAITS: &[&str] = &[
    "handwriting",
    "sports",
    "drawing",
    "craft",
    "verbal_fluency",
];

fn trait_vocabulary(kind: &str) -> Result<&'static [&'static str], HandlerErr> {
    match kind {
        "affective" => Ok(AFFECTIVE_TRAITS),
        "psychomotor" => Ok(PSYCHOMOTOR_TRAITS),
        _ => Err(HandlerErr::new(
            "bad_params",
            "kind must be affective or psychomotor",
        )),
    }
}

fn upsert(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let class_id = get_required_str(params, "classId")?;
    let student_id = get_required_str(params, "studentId")?;
    let teacher_id = get_required_str(params, "teacherId")?;
    let kind = get_required_str(params, "kind")?;
    let vocabulary = trait_vocabulary(&kind)?;
    let (term, year) = resolve_term_year(conn, params)?;

    let class = class_row(conn, &class_id)?;
    if class.class_teacher_id.as_deref() != Some(teacher_id.as_str()) {
        return Err(HandlerErr::new(
            "forbidden",
            "only the class teacher may record ratings",
        ));
    }
    let student = student_row(conn, &student_id)?;
    if student.class_id != class_id {
        return Err(HandlerErr::new(
            "bad_params",
            "student does not belong to this class",
        ));
    }

    let Some(traits) = params.get("traits").and_then(|v| v.as_object()) else {
        return Err(HandlerErr::new("bad_params", "missing traits"));
    };
    for (code, value) in traits {
        if !vocabulary.contains(&code.as_str()) {
            return Err(HandlerErr::with_details(
                "bad_params",
                format!("unknown {} trait: {}", kind, code),
                json!({ "trait": code }),
            ));
        }
        let score = value.as_i64().unwrap_or(0);
        if !(1..=5).contains(&score) {
            return Err(HandlerErr::with_details(
                "bad_params",
                format!("{} must be rated 1 to 5", code),
                json!({ "trait": code, "score": value }),
            ));
        }
    }

    let now = chrono::Utc::now().to_rfc3339();
    let tx = conn
        .unchecked_transaction()
        .map_err(|e| HandlerErr::new("db_tx_failed", e.to_string()))?;
    for (code, value) in traits {
        let score = value.as_i64().unwrap_or(0);
        tx.execute(
            "INSERT INTO rating_cells(kind, class_id, student_id, term, year, trait_code, score, updated_at)
             VALUES(?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(kind, class_id, student_id, term, year, trait_code) DO UPDATE SET
               score = excluded.score,
               updated_at = excluded.updated_at",
            (&kind, &class_id, &student_id, term, &year, code, score, &now),
        )
        .map_err(|e| HandlerErr::new("db_update_failed", e.to_string()))?;
    }
    if let Some(remark) = get_opt_str(params, "remark") {
        tx.execute(
            "INSERT INTO rating_remarks(kind, class_id, student_id, term, year, remark)
             VALUES(?, ?, ?, ?, ?, ?)
             ON CONFLICT(kind, class_id, student_id, term, year) DO UPDATE SET
               remark = excluded.remark",
            (&kind, &class_id, &student_id, term, &year, &remark),
        )
        .map_err(|e| HandlerErr::new("db_update_failed", e.to_string()))?;
    }
    tx.commit()
        .map_err(|e| HandlerErr::new("db_commit_failed", e.to_string()))?;

    Ok(json!({
        "classId": class_id,
        "studentId": student_id,
        "kind": kind,
        "term": term,
        "year": year,
        "traitCount": traits.len(),
    }))
}

fn open(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let class_id = get_required_str(params, "classId")?;
    let kind = get_required_str(params, "kind")?;
    let vocabulary = trait_vocabulary(&kind)?;
    let (term, year) = resolve_term_year(conn, params)?;
    class_row(conn, &class_id)?;

    let mut cells: HashMap<String, HashMap<String, i64>> = HashMap::new();
    let mut stmt = conn
        .prepare(
            "SELECT student_id, trait_code, score FROM rating_cells
             WHERE kind = ? AND class_id = ? AND term = ? AND year = ?",
        )
        .map_err(HandlerErr::db)?;
    let rows = stmt
        .query_map((&kind, &class_id, term, &year), |r| {
            Ok((
                r.get::<_, String>(0)?,
                r.get::<_, String>(1)?,
                r.get::<_, i64>(2)?,
            ))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::db)?;
    for (student_id, code, score) in rows {
        cells.entry(student_id).or_default().insert(code, score);
    }

    let mut remarks: HashMap<String, String> = HashMap::new();
    let mut stmt = conn
        .prepare(
            "SELECT student_id, remark FROM rating_remarks
             WHERE kind = ? AND class_id = ? AND term = ? AND year = ?",
        )
        .map_err(HandlerErr::db)?;
    let rows = stmt
        .query_map((&kind, &class_id, term, &year), |r| {
            Ok((r.get::<_, String>(0)?, r.get::<_, String>(1)?))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::db)?;
    for (student_id, remark) in rows {
        remarks.insert(student_id, remark);
    }

    let students: Vec<serde_json::Value> = students_for_class(conn, &class_id)?
        .iter()
        .map(|s| {
            json!({
                "studentId": s.id,
                "displayName": s.display_name,
                "traits": cells.get(&s.id).cloned().unwrap_or_default(),
                "remark": remarks.get(&s.id),
            })
        })
        .collect();

    Ok(json!({
        "kind": kind,
        "term": term,
        "year": year,
        "traitCodes": vocabulary,
        "students": students,
    }))
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
        "ratings.upsert" => upsert,
        "ratings.open" => open,
        _ => return None,
    };
    Some(with_conn(state, req, f))
}
