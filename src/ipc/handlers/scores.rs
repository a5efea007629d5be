//! Raw score entry and its lifecycle. Subject teachers write draft
//! scores, submit them, and resubmit after a class-teacher rejection.
//! Bulk edits are best-effort with per-row diagnostics.

use crate::csv_io;
use crate::grading::{subject_grade, ScoreComponents};
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{
    check_expected_version, get_opt_bool, get_required_str, resolve_term_year, student_row,
    students_for_class, HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use crate::workflow::{
    reject_score, score_editable, score_rejection_intent, submit_score, ScoreStatus,
};
use crate::{db, ipc::helpers::class_row};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

#[derive(Debug, Clone)]
struct AssignmentRow {
    id: String,
    subject_name: String,
    class_id: String,
    teacher_id: String,
    active: bool,
}

fn assignment_row(conn: &Connection, assignment_id: &str) -> Result<AssignmentRow, HandlerErr> {
    conn.query_row(
        "SELECT a.id, s.name, a.class_id, a.teacher_id, a.active
         FROM subject_assignments a
         JOIN subjects s ON s.id = a.subject_id
         WHERE a.id = ?",
        [assignment_id],
        |r| {
            Ok(AssignmentRow {
                id: r.get(0)?,
                subject_name: r.get(1)?,
                class_id: r.get(2)?,
                teacher_id: r.get(3)?,
                active: r.get::<_, i64>(4)? != 0,
            })
        },
    )
    .optional()
    .map_err(HandlerErr::db)?
    .ok_or_else(|| HandlerErr::new("not_found", "subject assignment not found"))
}

#[derive(Debug, Clone)]
struct ScoreRow {
    id: String,
    ca1: f64,
    ca2: f64,
    exam: f64,
    total: f64,
    grade: String,
    status: ScoreStatus,
    rejection_reason: Option<String>,
    version: i64,
}

fn score_row(
    conn: &Connection,
    student_id: &str,
    assignment_id: &str,
    term: i64,
    year: &str,
) -> Result<Option<ScoreRow>, HandlerErr> {
    conn.query_row(
        "SELECT id, ca1, ca2, exam, total, grade, status, rejection_reason, version
         FROM scores
         WHERE student_id = ? AND assignment_id = ? AND term = ? AND year = ?",
        (student_id, assignment_id, term, year),
        |r| {
            let status: String = r.get(6)?;
            Ok(ScoreRow {
                id: r.get(0)?,
                ca1: r.get(1)?,
                ca2: r.get(2)?,
                exam: r.get(3)?,
                total: r.get(4)?,
                grade: r.get(5)?,
                status: ScoreStatus::parse(&status).unwrap_or(ScoreStatus::Draft),
                rejection_reason: r.get(7)?,
                version: r.get(8)?,
            })
        },
    )
    .optional()
    .map_err(HandlerErr::db)
}

fn score_json(student_id: &str, row: &ScoreRow) -> serde_json::Value {
    json!({
        "studentId": student_id,
        "scoreId": row.id,
        "ca1": row.ca1,
        "ca2": row.ca2,
        "exam": row.exam,
        "total": row.total,
        "grade": row.grade,
        "status": row.status.as_str(),
        "rejectionReason": row.rejection_reason,
        "version": row.version,
    })
}

/// Writes one row's components, creating a draft or updating an editable
/// record in place. The caller has already settled ownership.
fn write_components(
    conn: &Connection,
    assignment: &AssignmentRow,
    student_id: &str,
    term: i64,
    year: &str,
    components: &ScoreComponents,
    teacher_id: &str,
    edit_override: bool,
    entry_params: &serde_json::Value,
) -> Result<(), HandlerErr> {
    components.validate().map_err(|e| {
        HandlerErr::with_details("bad_params", e.to_string(), json!({ "studentId": student_id }))
    })?;

    let student = student_row(conn, student_id)?;
    if student.class_id != assignment.class_id {
        return Err(HandlerErr::new(
            "bad_params",
            "student does not belong to this class",
        ));
    }

    let total = components.total();
    let grade = subject_grade(total);
    let now = chrono::Utc::now().to_rfc3339();

    match score_row(conn, student_id, &assignment.id, term, year)? {
        None => {
            let id = Uuid::new_v4().to_string();
            conn.execute(
                "INSERT INTO scores(id, student_id, assignment_id, term, year,
                                    ca1, ca2, exam, total, grade, status, entered_by, entered_at)
                 VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 'draft', ?, ?)",
                (
                    &id,
                    student_id,
                    &assignment.id,
                    term,
                    year,
                    components.ca1,
                    components.ca2,
                    components.exam,
                    total,
                    grade,
                    teacher_id,
                    &now,
                ),
            )
            .map_err(|e| HandlerErr::new("db_insert_failed", e.to_string()))?;
        }
        Some(existing) => {
            check_expected_version(entry_params, existing.version)?;
            score_editable(existing.status, true, edit_override)
                .map_err(|e| HandlerErr::new(e.code, e.message))?;
            // An override edit of a submitted score also drops any stale
            // rejection reason.
            conn.execute(
                "UPDATE scores SET ca1 = ?, ca2 = ?, exam = ?, total = ?, grade = ?,
                                   rejection_reason = CASE WHEN ? THEN NULL ELSE rejection_reason END,
                                   entered_by = ?, entered_at = ?, version = version + 1
                 WHERE id = ?",
                (
                    components.ca1,
                    components.ca2,
                    components.exam,
                    total,
                    grade,
                    edit_override as i64,
                    teacher_id,
                    &now,
                    &existing.id,
                ),
            )
            .map_err(|e| HandlerErr::new("db_update_failed", e.to_string()))?;
        }
    }
    Ok(())
}

fn sheet_open(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let assignment_id = get_required_str(params, "assignmentId")?;
    let assignment = assignment_row(conn, &assignment_id)?;
    let (term, year) = resolve_term_year(conn, params)?;

    let students = students_for_class(conn, &assignment.class_id)?;
    let mut rows: Vec<serde_json::Value> = Vec::with_capacity(students.len());
    for s in &students {
        let row = match score_row(conn, &s.id, &assignment.id, term, &year)? {
            Some(r) => {
                let mut v = score_json(&s.id, &r);
                v["displayName"] = json!(s.display_name);
                v["admissionNo"] = json!(s.admission_no);
                v
            }
            None => json!({
                "studentId": s.id,
                "displayName": s.display_name,
                "admissionNo": s.admission_no,
                "status": null,
            }),
        };
        rows.push(row);
    }

    Ok(json!({
        "assignmentId": assignment.id,
        "subjectName": assignment.subject_name,
        "classId": assignment.class_id,
        "teacherId": assignment.teacher_id,
        "term": term,
        "year": year,
        "rows": rows,
    }))
}

fn save_draft(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let assignment_id = get_required_str(params, "assignmentId")?;
    let teacher_id = get_required_str(params, "teacherId")?;
    let edit_override = get_opt_bool(params, "editOverride");
    let assignment = assignment_row(conn, &assignment_id)?;
    let (term, year) = resolve_term_year(conn, params)?;

    if teacher_id != assignment.teacher_id {
        return Err(HandlerErr::new(
            "forbidden",
            "only the assigned subject teacher may enter scores",
        ));
    }
    if !assignment.active {
        return Err(HandlerErr::new(
            "invalid_state",
            "subject assignment is no longer active",
        ));
    }

    let Some(entries) = params.get("entries").and_then(|v| v.as_array()) else {
        return Err(HandlerErr::new("bad_params", "missing entries"));
    };

    let mut updated = 0usize;
    let mut errors: Vec<serde_json::Value> = Vec::new();
    for entry in entries {
        let student_id = match entry.get("studentId").and_then(|v| v.as_str()) {
            Some(v) => v.to_string(),
            None => {
                errors.push(json!({ "code": "bad_params", "message": "missing studentId" }));
                continue;
            }
        };
        let components = ScoreComponents {
            ca1: entry.get("ca1").and_then(|v| v.as_f64()).unwrap_or(0.0),
            ca2: entry.get("ca2").and_then(|v| v.as_f64()).unwrap_or(0.0),
            exam: entry.get("exam").and_then(|v| v.as_f64()).unwrap_or(0.0),
        };
        match write_components(
            conn,
            &assignment,
            &student_id,
            term,
            &year,
            &components,
            &teacher_id,
            edit_override,
            entry,
        ) {
            Ok(()) => updated += 1,
            Err(e) => errors.push(json!({
                "studentId": student_id,
                "code": e.code,
                "message": e.message,
            })),
        }
    }

    Ok(json!({
        "updated": updated,
        "rejected": errors.len(),
        "errors": errors,
    }))
}

fn submit(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let assignment_id = get_required_str(params, "assignmentId")?;
    let teacher_id = get_required_str(params, "teacherId")?;
    let assignment = assignment_row(conn, &assignment_id)?;
    let (term, year) = resolve_term_year(conn, params)?;

    let is_owner = teacher_id == assignment.teacher_id;
    let student_ids: Vec<String> = match params.get("studentIds").and_then(|v| v.as_array()) {
        Some(ids) => ids
            .iter()
            .filter_map(|v| v.as_str().map(|s| s.to_string()))
            .collect(),
        None => {
            // Whole-sheet submit: everything still open for this sheet.
            let mut stmt = conn
                .prepare(
                    "SELECT student_id FROM scores
                     WHERE assignment_id = ? AND term = ? AND year = ?
                       AND status IN ('draft', 'rejected')",
                )
                .map_err(HandlerErr::db)?;
            stmt.query_map((&assignment.id, term, &year), |r| r.get::<_, String>(0))
                .and_then(|it| it.collect::<Result<Vec<_>, _>>())
                .map_err(HandlerErr::db)?
        }
    };

    let mut submitted = 0usize;
    let mut errors: Vec<serde_json::Value> = Vec::new();
    for student_id in &student_ids {
        let outcome = (|| -> Result<(), HandlerErr> {
            let Some(row) = score_row(conn, student_id, &assignment.id, term, &year)? else {
                return Err(HandlerErr::new("not_found", "no score entered yet"));
            };
            let next = submit_score(row.status, is_owner)
                .map_err(|e| HandlerErr::new(e.code, e.message))?;
            conn.execute(
                "UPDATE scores SET status = ?, rejection_reason = NULL, version = version + 1
                 WHERE id = ?",
                (next.as_str(), &row.id),
            )
            .map_err(|e| HandlerErr::new("db_update_failed", e.to_string()))?;
            Ok(())
        })();
        match outcome {
            Ok(()) => submitted += 1,
            Err(e) => errors.push(json!({
                "studentId": student_id,
                "code": e.code,
                "message": e.message,
            })),
        }
    }

    tracing::debug!(assignment = %assignment.id, submitted, failed = errors.len(), "scores submitted");
    Ok(json!({
        "submitted": submitted,
        "failed": errors.len(),
        "errors": errors,
    }))
}

fn reject(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let assignment_id = get_required_str(params, "assignmentId")?;
    let student_id = get_required_str(params, "studentId")?;
    let teacher_id = get_required_str(params, "teacherId")?;
    let reason = get_required_str(params, "reason")?;
    let assignment = assignment_row(conn, &assignment_id)?;
    let (term, year) = resolve_term_year(conn, params)?;

    let class = class_row(conn, &assignment.class_id)?;
    let is_class_teacher = class.class_teacher_id.as_deref() == Some(teacher_id.as_str());

    let Some(row) = score_row(conn, &student_id, &assignment.id, term, &year)? else {
        return Err(HandlerErr::new("not_found", "score not found"));
    };
    check_expected_version(params, row.version)?;
    let next = reject_score(row.status, is_class_teacher, &reason)
        .map_err(|e| HandlerErr::new(e.code, e.message))?;

    conn.execute(
        "UPDATE scores SET status = ?, rejection_reason = ?, version = version + 1
         WHERE id = ?",
        (next.as_str(), &reason, &row.id),
    )
    .map_err(|e| HandlerErr::new("db_update_failed", e.to_string()))?;

    let student = student_row(conn, &student_id)?;
    let intent = score_rejection_intent(
        &student.display_name,
        &assignment.subject_name,
        &assignment.teacher_id,
        &reason,
    );
    db::record_notification(conn, &intent, &teacher_id)
        .map_err(|e| HandlerErr::new("db_insert_failed", e.to_string()))?;

    let row = score_row(conn, &student_id, &assignment.id, term, &year)?
        .ok_or_else(|| HandlerErr::new("not_found", "score not found"))?;
    Ok(score_json(&student_id, &row))
}

fn export_csv(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let assignment_id = get_required_str(params, "assignmentId")?;
    let assignment = assignment_row(conn, &assignment_id)?;
    let (term, year) = resolve_term_year(conn, params)?;

    let students = students_for_class(conn, &assignment.class_id)?;
    let mut rows: Vec<csv_io::SheetRow> = Vec::with_capacity(students.len());
    for s in students.iter().filter(|s| s.active) {
        let components = score_row(conn, &s.id, &assignment.id, term, &year)?.map(|r| {
            ScoreComponents {
                ca1: r.ca1,
                ca2: r.ca2,
                exam: r.exam,
            }
        });
        rows.push(csv_io::SheetRow {
            admission_no: s.admission_no.clone(),
            student_name: s.display_name.clone(),
            components,
        });
    }
    let sheet = csv_io::export_score_sheet(&rows)
        .map_err(|e| HandlerErr::new("csv_export_failed", e.to_string()))?;
    Ok(json!({ "csv": sheet, "rowCount": rows.len() }))
}

fn import_csv(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let assignment_id = get_required_str(params, "assignmentId")?;
    let teacher_id = get_required_str(params, "teacherId")?;
    let data = get_required_str(params, "csv")?;
    let edit_override = get_opt_bool(params, "editOverride");
    let assignment = assignment_row(conn, &assignment_id)?;
    let (term, year) = resolve_term_year(conn, params)?;

    if teacher_id != assignment.teacher_id {
        return Err(HandlerErr::new(
            "forbidden",
            "only the assigned subject teacher may import scores",
        ));
    }

    let admission_index = students_for_class(conn, &assignment.class_id)?
        .into_iter()
        .map(|s| (s.admission_no, s.id))
        .collect();
    let report = csv_io::parse_score_sheet(&data, &admission_index);

    let mut applied = 0usize;
    let mut error_count = report.error_count;
    for parsed in &report.rows {
        match write_components(
            conn,
            &assignment,
            &parsed.student_id,
            term,
            &year,
            &parsed.components,
            &teacher_id,
            edit_override,
            &serde_json::Value::Null,
        ) {
            Ok(()) => applied += 1,
            Err(_) => error_count += 1,
        }
    }

    Ok(json!({ "applied": applied, "errorCount": error_count }))
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
        "scores.sheetOpen" => sheet_open,
        "scores.saveDraft" => save_draft,
        "scores.submit" => submit,
        "scores.reject" => reject,
        "scores.exportCsv" => export_csv,
        "scores.importCsv" => import_csv,
        _ => return None,
    };
    Some(with_conn(state, req, f))
}
