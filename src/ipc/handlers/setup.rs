//! School settings and roster management: teachers, classes, subjects,
//! students and subject assignments. These are the lookups every other
//! handler authorizes against.

use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{
    get_opt_bool, get_opt_i64, get_opt_str, get_required_str, resolve_term_year, students_for_class,
    teacher_exists, HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

fn school_setup(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let name = get_required_str(params, "name")?;
    let current_term = params.get("currentTerm").and_then(|v| v.as_i64());
    if let Some(t) = current_term {
        if !(1..=3).contains(&t) {
            return Err(HandlerErr::new("bad_params", "currentTerm must be 1, 2 or 3"));
        }
    }
    let current_year = get_opt_str(params, "currentYear");
    let value = json!({
        "name": name,
        "currentTerm": current_term,
        "currentYear": current_year,
    });
    db::settings_set_json(conn, "setup.school", &value)
        .map_err(|e| HandlerErr::new("db_update_failed", e.to_string()))?;
    Ok(value)
}

fn school_info(conn: &Connection, _params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let school = db::settings_get_json(conn, "setup.school")
        .map_err(|e| HandlerErr::new("db_query_failed", e.to_string()))?
        .unwrap_or_else(|| json!(null));
    let students: i64 = conn
        .query_row("SELECT COUNT(*) FROM students", [], |r| r.get(0))
        .map_err(HandlerErr::db)?;
    let classes: i64 = conn
        .query_row("SELECT COUNT(*) FROM classes", [], |r| r.get(0))
        .map_err(HandlerErr::db)?;
    Ok(json!({
        "school": school,
        "studentCount": students,
        "classCount": classes,
    }))
}

fn teachers_create(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let name = get_required_str(params, "name")?;
    let is_approver = get_opt_bool(params, "isApprover");
    let id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO teachers(id, name, is_approver) VALUES(?, ?, ?)",
        (&id, &name, is_approver as i64),
    )
    .map_err(|e| HandlerErr::new("db_insert_failed", e.to_string()))?;
    Ok(json!({ "id": id, "name": name, "isApprover": is_approver }))
}

fn teachers_list(conn: &Connection, _params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let mut stmt = conn
        .prepare("SELECT id, name, is_approver FROM teachers ORDER BY name")
        .map_err(HandlerErr::db)?;
    let rows: Vec<serde_json::Value> = stmt
        .query_map([], |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "name": r.get::<_, String>(1)?,
                "isApprover": r.get::<_, i64>(2)? != 0,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::db)?;
    Ok(json!({ "teachers": rows }))
}

fn classes_create(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let name = get_required_str(params, "name")?;
    let class_teacher_id = get_opt_str(params, "classTeacherId");
    if let Some(ref t) = class_teacher_id {
        teacher_exists(conn, t)?;
    }
    let id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO classes(id, name, class_teacher_id) VALUES(?, ?, ?)",
        (&id, &name, &class_teacher_id),
    )
    .map_err(|e| HandlerErr::new("db_insert_failed", e.to_string()))?;
    Ok(json!({ "id": id, "name": name, "classTeacherId": class_teacher_id }))
}

fn classes_list(conn: &Connection, _params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let mut stmt = conn
        .prepare("SELECT id, name, class_teacher_id FROM classes ORDER BY name")
        .map_err(HandlerErr::db)?;
    let rows: Vec<serde_json::Value> = stmt
        .query_map([], |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "name": r.get::<_, String>(1)?,
                "classTeacherId": r.get::<_, Option<String>>(2)?,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::db)?;
    Ok(json!({ "classes": rows }))
}

fn subjects_create(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let name = get_required_str(params, "name")?;
    let id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO subjects(id, name) VALUES(?, ?)
         ON CONFLICT(name) DO NOTHING",
        (&id, &name),
    )
    .map_err(|e| HandlerErr::new("db_insert_failed", e.to_string()))?;
    let id: String = conn
        .query_row("SELECT id FROM subjects WHERE name = ?", [&name], |r| {
            r.get(0)
        })
        .map_err(HandlerErr::db)?;
    Ok(json!({ "id": id, "name": name }))
}

fn subjects_list(conn: &Connection, _params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let mut stmt = conn
        .prepare("SELECT id, name FROM subjects ORDER BY name")
        .map_err(HandlerErr::db)?;
    let rows: Vec<serde_json::Value> = stmt
        .query_map([], |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "name": r.get::<_, String>(1)?,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::db)?;
    Ok(json!({ "subjects": rows }))
}

fn students_create(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let class_id = get_required_str(params, "classId")?;
    let last_name = get_required_str(params, "lastName")?;
    let first_name = get_required_str(params, "firstName")?;
    let admission_no = get_required_str(params, "admissionNo")?;
    let guardian_name = get_opt_str(params, "guardianName");
    let sort_order = get_opt_i64(params, "sortOrder").unwrap_or_else(|| {
        conn.query_row(
            "SELECT COALESCE(MAX(sort_order) + 1, 0) FROM students WHERE class_id = ?",
            [&class_id],
            |r| r.get(0),
        )
        .unwrap_or(0)
    });
    let id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO students(id, class_id, last_name, first_name, admission_no, guardian_name,
                              active, sort_order)
         VALUES(?, ?, ?, ?, ?, ?, 1, ?)",
        (
            &id,
            &class_id,
            &last_name,
            &first_name,
            &admission_no,
            &guardian_name,
            sort_order,
        ),
    )
    .map_err(|e| HandlerErr::new("db_insert_failed", e.to_string()))?;
    Ok(json!({
        "id": id,
        "classId": class_id,
        "displayName": format!("{}, {}", last_name, first_name),
        "admissionNo": admission_no,
        "sortOrder": sort_order,
    }))
}

fn students_list(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let class_id = get_required_str(params, "classId")?;
    let rows: Vec<serde_json::Value> = students_for_class(conn, &class_id)?
        .iter()
        .map(|s| {
            json!({
                "id": s.id,
                "displayName": s.display_name,
                "admissionNo": s.admission_no,
                "guardianName": s.guardian_name,
                "active": s.active,
                "sortOrder": s.sort_order,
            })
        })
        .collect();
    Ok(json!({ "students": rows }))
}

fn assignments_create(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let subject_id = get_required_str(params, "subjectId")?;
    let class_id = get_required_str(params, "classId")?;
    let teacher_id = get_required_str(params, "teacherId")?;
    teacher_exists(conn, &teacher_id)?;
    let (term, year) = resolve_term_year(conn, params)?;

    // One assignment per subject/class/term/year; re-posting rebinds the
    // teacher and reactivates.
    let id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO subject_assignments(id, subject_id, class_id, teacher_id, term, year, active)
         VALUES(?, ?, ?, ?, ?, ?, 1)
         ON CONFLICT(subject_id, class_id, term, year) DO UPDATE SET
           teacher_id = excluded.teacher_id,
           active = 1",
        (&id, &subject_id, &class_id, &teacher_id, term, &year),
    )
    .map_err(|e| HandlerErr::new("db_insert_failed", e.to_string()))?;
    let id: String = conn
        .query_row(
            "SELECT id FROM subject_assignments
             WHERE subject_id = ? AND class_id = ? AND term = ? AND year = ?",
            (&subject_id, &class_id, term, &year),
            |r| r.get(0),
        )
        .map_err(HandlerErr::db)?;
    Ok(json!({
        "id": id,
        "subjectId": subject_id,
        "classId": class_id,
        "teacherId": teacher_id,
        "term": term,
        "year": year,
        "active": true,
    }))
}

fn assignments_list(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let class_id = get_required_str(params, "classId")?;
    let (term, year) = resolve_term_year(conn, params)?;
    let mut stmt = conn
        .prepare(
            "SELECT a.id, a.subject_id, s.name, a.teacher_id, a.active
             FROM subject_assignments a
             JOIN subjects s ON s.id = a.subject_id
             WHERE a.class_id = ? AND a.term = ? AND a.year = ?
             ORDER BY s.name",
        )
        .map_err(HandlerErr::db)?;
    let rows: Vec<serde_json::Value> = stmt
        .query_map((&class_id, term, &year), |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "subjectId": r.get::<_, String>(1)?,
                "subjectName": r.get::<_, String>(2)?,
                "teacherId": r.get::<_, String>(3)?,
                "active": r.get::<_, i64>(4)? != 0,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::db)?;
    Ok(json!({ "assignments": rows, "term": term, "year": year }))
}

fn assignments_set_active(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let assignment_id = get_required_str(params, "assignmentId")?;
    let active = params
        .get("active")
        .and_then(|v| v.as_bool())
        .ok_or_else(|| HandlerErr::new("bad_params", "missing active"))?;
    let exists: Option<i64> = conn
        .query_row(
            "SELECT 1 FROM subject_assignments WHERE id = ?",
            [&assignment_id],
            |r| r.get(0),
        )
        .optional()
        .map_err(HandlerErr::db)?;
    if exists.is_none() {
        return Err(HandlerErr::new("not_found", "subject assignment not found"));
    }
    conn.execute(
        "UPDATE subject_assignments SET active = ? WHERE id = ?",
        (active as i64, &assignment_id),
    )
    .map_err(|e| HandlerErr::new("db_update_failed", e.to_string()))?;
    Ok(json!({ "id": assignment_id, "active": active }))
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
        "school.setup" => school_setup,
        "school.info" => school_info,
        "teachers.create" => teachers_create,
        "teachers.list" => teachers_list,
        "classes.create" => classes_create,
        "classes.list" => classes_list,
        "subjects.create" => subjects_create,
        "subjects.list" => subjects_list,
        "students.create" => students_create,
        "students.list" => students_list,
        "assignments.create" => assignments_create,
        "assignments.list" => assignments_list,
        "assignments.setActive" => assignments_set_active,
        _ => return None,
    };
    Some(with_conn(state, req, f))
}
