//! Read side of the notification store. Rows are created by transitions
//! in the scores/compilation handlers; shells poll this surface.

use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{get_opt_bool, get_opt_i64, get_opt_str, get_required_str, HandlerErr};
use crate::ipc::types::{AppState, Request};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;

fn list(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let teacher_id = get_opt_str(params, "teacherId");
    let audience = get_opt_str(params, "audience");
    let unread_only = get_opt_bool(params, "unreadOnly");
    let limit = get_opt_i64(params, "limit").unwrap_or(100).clamp(1, 500);

    let mut sql = String::from(
        "SELECT id, title, message, kind, audience, teacher_id, student_id, sent_by, sent_at,
                is_read, read_by
         FROM notifications WHERE 1=1",
    );
    let mut binds: Vec<rusqlite::types::Value> = Vec::new();
    if let Some(ref t) = teacher_id {
        sql.push_str(
            " AND (teacher_id = ? OR (teacher_id IS NULL AND audience IN ('all', 'teachers')))",
        );
        binds.push(rusqlite::types::Value::Text(t.clone()));
    }
    if let Some(ref a) = audience {
        sql.push_str(" AND audience = ?");
        binds.push(rusqlite::types::Value::Text(a.clone()));
    }
    if unread_only {
        sql.push_str(" AND is_read = 0");
    }
    sql.push_str(" ORDER BY sent_at DESC LIMIT ?");
    binds.push(rusqlite::types::Value::Integer(limit));

    let mut stmt = conn.prepare(&sql).map_err(HandlerErr::db)?;
    let rows: Vec<serde_json::Value> = stmt
        .query_map(rusqlite::params_from_iter(binds), |r| {
            let read_by_raw: String = r.get(10)?;
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "title": r.get::<_, String>(1)?,
                "message": r.get::<_, String>(2)?,
                "kind": r.get::<_, String>(3)?,
                "audience": r.get::<_, String>(4)?,
                "teacherId": r.get::<_, Option<String>>(5)?,
                "studentId": r.get::<_, Option<String>>(6)?,
                "sentBy": r.get::<_, String>(7)?,
                "sentAt": r.get::<_, String>(8)?,
                "isRead": r.get::<_, i64>(9)? != 0,
                "readBy": serde_json::from_str::<serde_json::Value>(&read_by_raw)
                    .unwrap_or_else(|_| json!([])),
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::db)?;
    Ok(json!({ "notifications": rows }))
}

fn mark_read(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let notification_id = get_required_str(params, "notificationId")?;
    let reader_id = get_required_str(params, "readerId")?;

    let read_by_raw: Option<String> = conn
        .query_row(
            "SELECT read_by FROM notifications WHERE id = ?",
            [&notification_id],
            |r| r.get(0),
        )
        .optional()
        .map_err(HandlerErr::db)?;
    let Some(read_by_raw) = read_by_raw else {
        return Err(HandlerErr::new("not_found", "notification not found"));
    };

    let mut read_by: Vec<String> = serde_json::from_str(&read_by_raw).unwrap_or_default();
    if !read_by.contains(&reader_id) {
        read_by.push(reader_id.clone());
    }
    conn.execute(
        "UPDATE notifications SET is_read = 1, read_by = ? WHERE id = ?",
        (serde_json::to_string(&read_by).unwrap_or_else(|_| "[]".to_string()), &notification_id),
    )
    .map_err(|e| HandlerErr::new("db_update_failed", e.to_string()))?;
    Ok(json!({ "id": notification_id, "isRead": true, "readBy": read_by }))
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
        "notifications.list" => list,
        "notifications.markRead" => mark_read,
        _ => return None,
    };
    Some(with_conn(state, req, f))
}
