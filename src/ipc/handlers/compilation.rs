//! Compiled result lifecycle: preview, gated submission with a frozen
//! statistics snapshot, approval/rejection with notification intents,
//! and the best-effort bulk variants.

use super::attendance::student_summary;
use crate::comments::{
    generate_class_teacher_comment, generate_comment_options, principal_comment, EntropyRandom,
};
use crate::completeness::{self, RequiredSubject};
use crate::grading::{
    average_grade, class_statistics, rank_students, round_off_2_decimals, Placement, StudentTotal,
};
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{
    check_expected_version, class_row, get_opt_bool, get_opt_str, get_required_str,
    resolve_term_year, student_row, students_for_class, teacher_is_approver, HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use crate::workflow::{
    approve_result, reject_result, result_approval_intents, result_rejection_intent,
    submit_result, ResultStatus,
};
use crate::db;
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::json;
use std::collections::{HashMap, HashSet};
use uuid::Uuid;

fn active_assignments(
    conn: &Connection,
    class_id: &str,
    term: i64,
    year: &str,
) -> Result<Vec<RequiredSubject>, HandlerErr> {
    let mut stmt = conn
        .prepare(
            "SELECT a.id, s.name
             FROM subject_assignments a
             JOIN subjects s ON s.id = a.subject_id
             WHERE a.class_id = ? AND a.term = ? AND a.year = ? AND a.active = 1
             ORDER BY s.name",
        )
        .map_err(HandlerErr::db)?;
    stmt.query_map((class_id, term, year), |r| {
        Ok(RequiredSubject {
            assignment_id: r.get(0)?,
            subject_name: r.get(1)?,
        })
    })
    .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    .map_err(HandlerErr::db)
}

#[derive(Debug, Clone)]
struct SubjectScore {
    assignment_id: String,
    subject_name: String,
    ca1: f64,
    ca2: f64,
    exam: f64,
    total: f64,
    grade: String,
}

/// Submitted scores for one student, restricted to the class's active
/// assignments so foreign records never leak into a compilation.
fn submitted_scores(
    conn: &Connection,
    class_id: &str,
    student_id: &str,
    term: i64,
    year: &str,
) -> Result<Vec<SubjectScore>, HandlerErr> {
    let mut stmt = conn
        .prepare(
            "SELECT sc.assignment_id, s.name, sc.ca1, sc.ca2, sc.exam, sc.total, sc.grade
             FROM scores sc
             JOIN subject_assignments a ON a.id = sc.assignment_id
             JOIN subjects s ON s.id = a.subject_id
             WHERE sc.student_id = ? AND sc.term = ? AND sc.year = ?
               AND sc.status = 'submitted'
               AND a.class_id = ? AND a.active = 1
             ORDER BY s.name",
        )
        .map_err(HandlerErr::db)?;
    stmt.query_map((student_id, term, year, class_id), |r| {
        Ok(SubjectScore {
            assignment_id: r.get(0)?,
            subject_name: r.get(1)?,
            ca1: r.get(2)?,
            ca2: r.get(3)?,
            exam: r.get(4)?,
            total: r.get(5)?,
            grade: r.get(6)?,
        })
    })
    .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    .map_err(HandlerErr::db)
}

/// The sibling aggregate set: every active student's submitted-score sum
/// for this class/term/year. Ranking and class statistics always come
/// from this live set, never from stored snapshots.
fn class_aggregates(
    conn: &Connection,
    class_id: &str,
    term: i64,
    year: &str,
) -> Result<Vec<StudentTotal>, HandlerErr> {
    let students = students_for_class(conn, class_id)?;
    let mut sums: HashMap<String, f64> = HashMap::new();
    let mut stmt = conn
        .prepare(
            "SELECT sc.student_id, COALESCE(SUM(sc.total), 0)
             FROM scores sc
             JOIN subject_assignments a ON a.id = sc.assignment_id
             WHERE sc.term = ? AND sc.year = ? AND sc.status = 'submitted'
               AND a.class_id = ? AND a.active = 1
             GROUP BY sc.student_id",
        )
        .map_err(HandlerErr::db)?;
    let rows = stmt
        .query_map((term, year, class_id), |r| {
            Ok((r.get::<_, String>(0)?, r.get::<_, f64>(1)?))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::db)?;
    for (student_id, total) in rows {
        sums.insert(student_id, total);
    }
    Ok(students
        .iter()
        .filter(|s| s.active)
        .map(|s| StudentTotal {
            student_id: s.id.clone(),
            total_score: sums.get(&s.id).copied().unwrap_or(0.0),
        })
        .collect())
}

fn completeness_for(
    conn: &Connection,
    class_id: &str,
    student_id: &str,
    term: i64,
    year: &str,
    required: &[RequiredSubject],
) -> Result<completeness::Completeness, HandlerErr> {
    let mut stmt = conn
        .prepare(
            "SELECT assignment_id FROM scores
             WHERE student_id = ? AND term = ? AND year = ? AND status = 'submitted'",
        )
        .map_err(HandlerErr::db)?;
    let submitted: HashSet<String> = stmt
        .query_map((student_id, term, year), |r| r.get::<_, String>(0))
        .and_then(|it| it.collect::<Result<HashSet<_>, _>>())
        .map_err(HandlerErr::db)?;

    let has_rating = |kind: &str| -> Result<bool, HandlerErr> {
        conn.query_row(
            "SELECT 1 FROM rating_cells
             WHERE kind = ? AND class_id = ? AND student_id = ? AND term = ? AND year = ?
             LIMIT 1",
            (kind, class_id, student_id, term, year),
            |r| r.get::<_, i64>(0),
        )
        .optional()
        .map_err(HandlerErr::db)
        .map(|v| v.is_some())
    };
    let has_affective = has_rating("affective")?;
    let has_psychomotor = has_rating("psychomotor")?;

    Ok(completeness::evaluate(
        required,
        &submitted,
        has_affective,
        has_psychomotor,
    ))
}

fn ratings_snapshot(
    conn: &Connection,
    class_id: &str,
    student_id: &str,
    term: i64,
    year: &str,
) -> Result<serde_json::Value, HandlerErr> {
    let mut snapshot = serde_json::Map::new();
    for kind in ["affective", "psychomotor"] {
        let mut stmt = conn
            .prepare(
                "SELECT trait_code, score FROM rating_cells
                 WHERE kind = ? AND class_id = ? AND student_id = ? AND term = ? AND year = ?",
            )
            .map_err(HandlerErr::db)?;
        let cells = stmt
            .query_map((kind, class_id, student_id, term, year), |r| {
                Ok((r.get::<_, String>(0)?, r.get::<_, i64>(1)?))
            })
            .and_then(|it| it.collect::<Result<Vec<_>, _>>())
            .map_err(HandlerErr::db)?;
        let traits: serde_json::Map<String, serde_json::Value> = cells
            .into_iter()
            .map(|(code, score)| (code, json!(score)))
            .collect();
        let remark: Option<String> = conn
            .query_row(
                "SELECT remark FROM rating_remarks
                 WHERE kind = ? AND class_id = ? AND student_id = ? AND term = ? AND year = ?",
                (kind, class_id, student_id, term, year),
                |r| r.get(0),
            )
            .optional()
            .map_err(HandlerErr::db)?;
        snapshot.insert(kind.to_string(), json!({ "traits": traits, "remark": remark }));
    }
    Ok(serde_json::Value::Object(snapshot))
}

#[derive(Debug, Clone)]
struct ResultRow {
    id: String,
    student_id: String,
    class_id: String,
    term: i64,
    year: String,
    subjects_json: String,
    ratings_json: String,
    total_score: f64,
    average_score: f64,
    average_grade: String,
    class_average: f64,
    position: i64,
    total_students: i64,
    times_present: i64,
    times_absent: i64,
    attendance_days: i64,
    class_teacher_comment: String,
    principal_comment: Option<String>,
    status: ResultStatus,
    rejection_reason: Option<String>,
    approved_by: Option<String>,
    approved_at: Option<String>,
    print_approved: bool,
    submitted_at: Option<String>,
    version: i64,
}

const RESULT_COLUMNS: &str = "id, student_id, class_id, term, year, subjects_json, ratings_json,
    total_score, average_score, average_grade, class_average, position, total_students,
    times_present, times_absent, attendance_days, class_teacher_comment, principal_comment,
    status, rejection_reason, approved_by, approved_at, print_approved, submitted_at, version";

fn result_from_row(r: &rusqlite::Row<'_>) -> rusqlite::Result<ResultRow> {
    let status: String = r.get(18)?;
    Ok(ResultRow {
        id: r.get(0)?,
        student_id: r.get(1)?,
        class_id: r.get(2)?,
        term: r.get(3)?,
        year: r.get(4)?,
        subjects_json: r.get(5)?,
        ratings_json: r.get(6)?,
        total_score: r.get(7)?,
        average_score: r.get(8)?,
        average_grade: r.get(9)?,
        class_average: r.get(10)?,
        position: r.get(11)?,
        total_students: r.get(12)?,
        times_present: r.get(13)?,
        times_absent: r.get(14)?,
        attendance_days: r.get(15)?,
        class_teacher_comment: r.get(16)?,
        principal_comment: r.get(17)?,
        status: ResultStatus::parse(&status).unwrap_or(ResultStatus::Draft),
        rejection_reason: r.get(19)?,
        approved_by: r.get(20)?,
        approved_at: r.get(21)?,
        print_approved: r.get::<_, i64>(22)? != 0,
        submitted_at: r.get(23)?,
        version: r.get(24)?,
    })
}

fn result_by_id(conn: &Connection, result_id: &str) -> Result<ResultRow, HandlerErr> {
    conn.query_row(
        &format!("SELECT {RESULT_COLUMNS} FROM compiled_results WHERE id = ?"),
        [result_id],
        result_from_row,
    )
    .optional()
    .map_err(HandlerErr::db)?
    .ok_or_else(|| HandlerErr::new("not_found", "compiled result not found"))
}

fn result_by_key(
    conn: &Connection,
    student_id: &str,
    class_id: &str,
    term: i64,
    year: &str,
) -> Result<Option<ResultRow>, HandlerErr> {
    conn.query_row(
        &format!(
            "SELECT {RESULT_COLUMNS} FROM compiled_results
             WHERE student_id = ? AND class_id = ? AND term = ? AND year = ?"
        ),
        (student_id, class_id, term, year),
        result_from_row,
    )
    .optional()
    .map_err(HandlerErr::db)
}

fn result_json(row: &ResultRow) -> serde_json::Value {
    json!({
        "resultId": row.id,
        "studentId": row.student_id,
        "classId": row.class_id,
        "term": row.term,
        "year": row.year,
        "subjects": serde_json::from_str::<serde_json::Value>(&row.subjects_json)
            .unwrap_or_else(|_| json!([])),
        "ratings": serde_json::from_str::<serde_json::Value>(&row.ratings_json)
            .unwrap_or_else(|_| json!({})),
        "totalScore": row.total_score,
        "averageScore": row.average_score,
        "averageGrade": row.average_grade,
        "classAverage": row.class_average,
        "position": row.position,
        "totalStudents": row.total_students,
        "attendance": {
            "timesPresent": row.times_present,
            "timesAbsent": row.times_absent,
            "totalDays": row.attendance_days,
        },
        "classTeacherComment": row.class_teacher_comment,
        "principalComment": row.principal_comment,
        "status": row.status.as_str(),
        "rejectionReason": row.rejection_reason,
        "approvedBy": row.approved_by,
        "approvedAt": row.approved_at,
        "printApproved": row.print_approved,
        "submittedAt": row.submitted_at,
        "version": row.version,
    })
}

fn preview(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let class_id = get_required_str(params, "classId")?;
    let (term, year) = resolve_term_year(conn, params)?;
    class_row(conn, &class_id)?;

    let required = active_assignments(conn, &class_id, term, &year)?;
    let aggregates = class_aggregates(conn, &class_id, term, &year)?;
    let placements = rank_students(&aggregates);
    let stats = class_statistics(&aggregates);

    let students = students_for_class(conn, &class_id)?;
    let mut rows: Vec<serde_json::Value> = Vec::new();
    for s in students.iter().filter(|s| s.active) {
        let total = aggregates
            .iter()
            .find(|t| t.student_id == s.id)
            .map(|t| t.total_score)
            .unwrap_or(0.0);
        let average = if required.is_empty() {
            0.0
        } else {
            round_off_2_decimals(total / required.len() as f64)
        };
        let placement = placements.get(&s.id).copied().unwrap_or(Placement {
            position: 0,
            total_students: aggregates.len(),
        });
        let completeness = completeness_for(conn, &class_id, &s.id, term, &year, &required)?;
        rows.push(json!({
            "studentId": s.id,
            "displayName": s.display_name,
            "totalScore": total,
            "averageScore": average,
            "position": placement.position,
            "totalStudents": placement.total_students,
            "isComplete": completeness.is_complete(),
            "missing": if completeness.is_complete() {
                serde_json::Value::Null
            } else {
                json!(completeness.describe_missing())
            },
        }));
    }

    Ok(json!({
        "classId": class_id,
        "term": term,
        "year": year,
        "requiredSubjects": required.len(),
        "classStatistics": stats,
        "rows": rows,
    }))
}

fn submit(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let class_id = get_required_str(params, "classId")?;
    let student_id = get_required_str(params, "studentId")?;
    let teacher_id = get_required_str(params, "teacherId")?;
    let (term, year) = resolve_term_year(conn, params)?;

    let class = class_row(conn, &class_id)?;
    let is_class_teacher = class.class_teacher_id.as_deref() == Some(teacher_id.as_str());
    if !is_class_teacher {
        return Err(HandlerErr::new(
            "forbidden",
            "only the class teacher may submit a compiled result",
        ));
    }
    let student = student_row(conn, &student_id)?;
    if student.class_id != class_id {
        return Err(HandlerErr::new(
            "bad_params",
            "student does not belong to this class",
        ));
    }

    let required = active_assignments(conn, &class_id, term, &year)?;
    if required.is_empty() {
        return Err(HandlerErr::new(
            "incomplete",
            "no active subject assignments for this class and term",
        ));
    }
    let completeness = completeness_for(conn, &class_id, &student_id, term, &year, &required)?;
    if !completeness.is_complete() {
        return Err(HandlerErr::with_details(
            "incomplete",
            format!(
                "cannot submit result for {}: {}",
                student.display_name,
                completeness.describe_missing()
            ),
            serde_json::to_value(&completeness).unwrap_or(serde_json::Value::Null),
        ));
    }

    let existing = result_by_key(conn, &student_id, &class_id, term, &year)?;
    if let Some(ref row) = existing {
        check_expected_version(params, row.version)?;
    }

    // Freeze the statistics at this instant from the live sibling set.
    let aggregates = class_aggregates(conn, &class_id, term, &year)?;
    let placements = rank_students(&aggregates);
    let stats = class_statistics(&aggregates);
    let scores = submitted_scores(conn, &class_id, &student_id, term, &year)?;
    let total_score: f64 = scores.iter().map(|s| s.total).sum();
    let average_score = round_off_2_decimals(total_score / required.len() as f64);
    let placement = placements
        .get(&student_id)
        .copied()
        .ok_or_else(|| HandlerErr::new("invalid_state", "student is not in the ranked set"))?;

    let comment = match get_opt_str(params, "comment") {
        Some(c) => c,
        None if get_opt_bool(params, "generateComment") => {
            let mut rng = EntropyRandom;
            generate_class_teacher_comment(
                average_score,
                placement.position,
                placement.total_students,
                &mut rng,
            )
        }
        None => String::new(),
    };

    let next = submit_result(existing.as_ref().map(|r| r.status), is_class_teacher, &comment)
        .map_err(|e| HandlerErr::new(e.code, e.message))?;

    let (present, absent, total_days) = student_summary(conn, &class_id, &student_id, term, &year)?;
    let ratings = ratings_snapshot(conn, &class_id, &student_id, term, &year)?;
    let subjects: Vec<serde_json::Value> = scores
        .iter()
        .map(|s| {
            json!({
                "assignmentId": s.assignment_id,
                "subjectName": s.subject_name,
                "ca1": s.ca1,
                "ca2": s.ca2,
                "exam": s.exam,
                "total": s.total,
                "grade": s.grade,
            })
        })
        .collect();
    let now = chrono::Utc::now().to_rfc3339();
    let id = Uuid::new_v4().to_string();

    conn.execute(
        "INSERT INTO compiled_results(
            id, student_id, class_id, term, year, subjects_json, ratings_json,
            total_score, average_score, average_grade, class_average, position, total_students,
            times_present, times_absent, attendance_days, class_teacher_comment,
            principal_comment, status, rejection_reason, approved_by, approved_at, submitted_at,
            version)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, NULL, ?, NULL, NULL, NULL, ?, 1)
         ON CONFLICT(student_id, class_id, term, year) DO UPDATE SET
           subjects_json = excluded.subjects_json,
           ratings_json = excluded.ratings_json,
           total_score = excluded.total_score,
           average_score = excluded.average_score,
           average_grade = excluded.average_grade,
           class_average = excluded.class_average,
           position = excluded.position,
           total_students = excluded.total_students,
           times_present = excluded.times_present,
           times_absent = excluded.times_absent,
           attendance_days = excluded.attendance_days,
           class_teacher_comment = excluded.class_teacher_comment,
           principal_comment = NULL,
           status = excluded.status,
           rejection_reason = NULL,
           approved_by = NULL,
           approved_at = NULL,
           submitted_at = excluded.submitted_at,
           version = compiled_results.version + 1",
        params![
            &id,
            &student_id,
            &class_id,
            term,
            &year,
            serde_json::Value::Array(subjects).to_string(),
            ratings.to_string(),
            total_score,
            average_score,
            average_grade(average_score),
            stats.class_average,
            placement.position as i64,
            placement.total_students as i64,
            present,
            absent,
            total_days,
            &comment,
            next.as_str(),
            &now,
        ],
    )
    .map_err(|e| HandlerErr::new("db_update_failed", e.to_string()))?;

    tracing::info!(student = %student_id, class = %class_id, term, "compiled result submitted");
    let row = result_by_key(conn, &student_id, &class_id, term, &year)?
        .ok_or_else(|| HandlerErr::new("not_found", "compiled result not found"))?;
    Ok(result_json(&row))
}

fn approve_one(
    conn: &Connection,
    result_id: &str,
    approver_id: &str,
    comment_param: Option<&str>,
    generate: bool,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let row = result_by_id(conn, result_id)?;
    check_expected_version(params, row.version)?;
    let is_approver = teacher_is_approver(conn, approver_id)?;

    let comment = match comment_param {
        Some(c) => c.to_string(),
        None if generate => principal_comment(row.average_score).to_string(),
        None => String::new(),
    };
    let next = approve_result(row.status, is_approver, &comment)
        .map_err(|e| HandlerErr::new(e.code, e.message))?;

    let now = chrono::Utc::now().to_rfc3339();
    conn.execute(
        "UPDATE compiled_results
         SET status = ?, principal_comment = ?, approved_by = ?, approved_at = ?,
             version = version + 1
         WHERE id = ?",
        (next.as_str(), &comment, approver_id, &now, result_id),
    )
    .map_err(|e| HandlerErr::new("db_update_failed", e.to_string()))?;

    let student = student_row(conn, &row.student_id)?;
    let class = class_row(conn, &row.class_id)?;
    let class_teacher = class.class_teacher_id.unwrap_or_default();
    for intent in result_approval_intents(&student.display_name, &student.id, &class_teacher) {
        db::record_notification(conn, &intent, approver_id)
            .map_err(|e| HandlerErr::new("db_insert_failed", e.to_string()))?;
    }

    let row = result_by_id(conn, result_id)?;
    Ok(result_json(&row))
}

fn reject_one(
    conn: &Connection,
    result_id: &str,
    approver_id: &str,
    reason: &str,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let row = result_by_id(conn, result_id)?;
    check_expected_version(params, row.version)?;
    let is_approver = teacher_is_approver(conn, approver_id)?;
    let next = reject_result(row.status, is_approver, reason)
        .map_err(|e| HandlerErr::new(e.code, e.message))?;

    conn.execute(
        "UPDATE compiled_results
         SET status = ?, rejection_reason = ?, approved_by = NULL, approved_at = NULL,
             version = version + 1
         WHERE id = ?",
        (next.as_str(), reason, result_id),
    )
    .map_err(|e| HandlerErr::new("db_update_failed", e.to_string()))?;

    let student = student_row(conn, &row.student_id)?;
    let class = class_row(conn, &row.class_id)?;
    let class_teacher = class.class_teacher_id.unwrap_or_default();
    let intent = result_rejection_intent(&student.display_name, &class_teacher, reason);
    db::record_notification(conn, &intent, approver_id)
        .map_err(|e| HandlerErr::new("db_insert_failed", e.to_string()))?;

    let row = result_by_id(conn, result_id)?;
    Ok(result_json(&row))
}

fn approve(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let result_id = get_required_str(params, "resultId")?;
    let approver_id = get_required_str(params, "approverId")?;
    let comment = get_opt_str(params, "principalComment");
    let generate = get_opt_bool(params, "generateComment");
    approve_one(conn, &result_id, &approver_id, comment.as_deref(), generate, params)
}

fn reject(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let result_id = get_required_str(params, "resultId")?;
    let approver_id = get_required_str(params, "approverId")?;
    let reason = get_required_str(params, "reason")?;
    reject_one(conn, &result_id, &approver_id, &reason, params)
}

fn bulk_ids(params: &serde_json::Value) -> Result<Vec<String>, HandlerErr> {
    params
        .get("resultIds")
        .and_then(|v| v.as_array())
        .map(|ids| {
            ids.iter()
                .filter_map(|v| v.as_str().map(|s| s.to_string()))
                .collect()
        })
        .ok_or_else(|| HandlerErr::new("bad_params", "missing resultIds"))
}

/// Bulk approval is best-effort: one record failing its precondition
/// never blocks the rest, and the caller gets the per-record outcome.
fn bulk_approve(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let approver_id = get_required_str(params, "approverId")?;
    let comment = get_opt_str(params, "principalComment");
    let generate = get_opt_bool(params, "generateComment");
    let ids = bulk_ids(params)?;

    let mut applied = 0usize;
    let mut errors: Vec<serde_json::Value> = Vec::new();
    for result_id in &ids {
        match approve_one(
            conn,
            result_id,
            &approver_id,
            comment.as_deref(),
            generate,
            &serde_json::Value::Null,
        ) {
            Ok(_) => applied += 1,
            Err(e) => errors.push(json!({
                "resultId": result_id,
                "code": e.code,
                "message": e.message,
            })),
        }
    }
    Ok(json!({ "applied": applied, "failed": errors.len(), "errors": errors }))
}

fn bulk_reject(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let approver_id = get_required_str(params, "approverId")?;
    let reason = get_required_str(params, "reason")?;
    let ids = bulk_ids(params)?;

    let mut applied = 0usize;
    let mut errors: Vec<serde_json::Value> = Vec::new();
    for result_id in &ids {
        match reject_one(conn, result_id, &approver_id, &reason, &serde_json::Value::Null) {
            Ok(_) => applied += 1,
            Err(e) => errors.push(json!({
                "resultId": result_id,
                "code": e.code,
                "message": e.message,
            })),
        }
    }
    Ok(json!({ "applied": applied, "failed": errors.len(), "errors": errors }))
}

fn get(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    if let Some(result_id) = get_opt_str(params, "resultId") {
        let row = result_by_id(conn, &result_id)?;
        return Ok(result_json(&row));
    }
    let class_id = get_required_str(params, "classId")?;
    let student_id = get_required_str(params, "studentId")?;
    let (term, year) = resolve_term_year(conn, params)?;
    let row = result_by_key(conn, &student_id, &class_id, term, &year)?
        .ok_or_else(|| HandlerErr::new("not_found", "compiled result not found"))?;
    Ok(result_json(&row))
}

fn list(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let class_id = get_required_str(params, "classId")?;
    let (term, year) = resolve_term_year(conn, params)?;
    let status_filter = get_opt_str(params, "status");
    if let Some(ref status) = status_filter {
        if ResultStatus::parse(status).is_none() {
            return Err(HandlerErr::new("bad_params", "unknown status filter"));
        }
    }

    let mut stmt = conn
        .prepare(&format!(
            "SELECT {RESULT_COLUMNS} FROM compiled_results
             WHERE class_id = ? AND term = ? AND year = ?
               AND (?4 IS NULL OR status = ?4)
             ORDER BY position, student_id"
        ))
        .map_err(HandlerErr::db)?;
    let rows: Vec<ResultRow> = stmt
        .query_map((&class_id, term, &year, &status_filter), result_from_row)
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::db)?;
    Ok(json!({
        "classId": class_id,
        "term": term,
        "year": year,
        "results": rows.iter().map(result_json).collect::<Vec<_>>(),
    }))
}

fn set_print_approved(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let result_id = get_required_str(params, "resultId")?;
    let approver_id = get_required_str(params, "approverId")?;
    let print_approved = params
        .get("printApproved")
        .and_then(|v| v.as_bool())
        .ok_or_else(|| HandlerErr::new("bad_params", "missing printApproved"))?;
    if !teacher_is_approver(conn, &approver_id)? {
        return Err(HandlerErr::new(
            "forbidden",
            "only an approver may change the print gate",
        ));
    }
    let row = result_by_id(conn, &result_id)?;
    conn.execute(
        "UPDATE compiled_results SET print_approved = ? WHERE id = ?",
        (print_approved as i64, &row.id),
    )
    .map_err(|e| HandlerErr::new("db_update_failed", e.to_string()))?;
    Ok(json!({ "resultId": row.id, "printApproved": print_approved }))
}

fn comment_options(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let class_id = get_required_str(params, "classId")?;
    let student_id = get_required_str(params, "studentId")?;
    let (term, year) = resolve_term_year(conn, params)?;
    class_row(conn, &class_id)?;

    let required = active_assignments(conn, &class_id, term, &year)?;
    let aggregates = class_aggregates(conn, &class_id, term, &year)?;
    let placements = rank_students(&aggregates);
    let total = aggregates
        .iter()
        .find(|t| t.student_id == student_id)
        .map(|t| t.total_score)
        .unwrap_or(0.0);
    let average = if required.is_empty() {
        0.0
    } else {
        round_off_2_decimals(total / required.len() as f64)
    };
    let placement = placements.get(&student_id).copied().unwrap_or(Placement {
        position: aggregates.len().max(1),
        total_students: aggregates.len().max(1),
    });

    let mut rng = EntropyRandom;
    let options = generate_comment_options(
        average,
        placement.position,
        placement.total_students,
        &mut rng,
    );
    Ok(json!({
        "averageScore": average,
        "position": placement.position,
        "totalStudents": placement.total_students,
        "options": options,
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
        "results.preview" => preview,
        "results.submit" => submit,
        "results.approve" => approve,
        "results.reject" => reject,
        "results.bulkApprove" => bulk_approve,
        "results.bulkReject" => bulk_reject,
        "results.get" => get,
        "results.list" => list,
        "results.setPrintApproved" => set_print_approved,
        "results.commentOptions" => comment_options,
        _ => return None,
    };
    Some(with_conn(state, req, f))
}
