use crate::workflow::NotificationIntent;
use rusqlite::Connection;
use std::path::Path;

pub const DB_FILE_NAME: &str = "results.sqlite3";

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let db_path = workspace.join(DB_FILE_NAME);
    let conn = Connection::open(db_path)?;
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS teachers(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            is_approver INTEGER NOT NULL DEFAULT 0
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS classes(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            class_teacher_id TEXT,
            FOREIGN KEY(class_teacher_id) REFERENCES teachers(id)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS students(
            id TEXT PRIMARY KEY,
            class_id TEXT NOT NULL,
            last_name TEXT NOT NULL,
            first_name TEXT NOT NULL,
            admission_no TEXT NOT NULL UNIQUE,
            guardian_name TEXT,
            active INTEGER NOT NULL DEFAULT 1,
            sort_order INTEGER NOT NULL DEFAULT 0,
            FOREIGN KEY(class_id) REFERENCES classes(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_students_class ON students(class_id, sort_order)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS subjects(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL UNIQUE
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS subject_assignments(
            id TEXT PRIMARY KEY,
            subject_id TEXT NOT NULL,
            class_id TEXT NOT NULL,
            teacher_id TEXT NOT NULL,
            term INTEGER NOT NULL,
            year TEXT NOT NULL,
            active INTEGER NOT NULL DEFAULT 1,
            FOREIGN KEY(subject_id) REFERENCES subjects(id),
            FOREIGN KEY(class_id) REFERENCES classes(id),
            FOREIGN KEY(teacher_id) REFERENCES teachers(id),
            UNIQUE(subject_id, class_id, term, year)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_assignments_class_term
         ON subject_assignments(class_id, term, year)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS scores(
            id TEXT PRIMARY KEY,
            student_id TEXT NOT NULL,
            assignment_id TEXT NOT NULL,
            term INTEGER NOT NULL,
            year TEXT NOT NULL,
            ca1 REAL NOT NULL DEFAULT 0,
            ca2 REAL NOT NULL DEFAULT 0,
            exam REAL NOT NULL DEFAULT 0,
            total REAL NOT NULL DEFAULT 0,
            grade TEXT NOT NULL DEFAULT 'F',
            status TEXT NOT NULL DEFAULT 'draft',
            rejection_reason TEXT,
            entered_by TEXT NOT NULL,
            entered_at TEXT NOT NULL,
            version INTEGER NOT NULL DEFAULT 1,
            FOREIGN KEY(student_id) REFERENCES students(id),
            FOREIGN KEY(assignment_id) REFERENCES subject_assignments(id),
            UNIQUE(student_id, assignment_id, term, year)
        )",
        [],
    )?;
    ensure_scores_version(&conn)?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_scores_assignment ON scores(assignment_id, term, year)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_scores_student ON scores(student_id, term, year)",
        [],
    )?;

    // Behavioral ratings are stored cell-per-trait so a single-trait edit
    // stays a single-row upsert. kind is 'affective' or 'psychomotor'.
    conn.execute(
        "CREATE TABLE IF NOT EXISTS rating_cells(
            kind TEXT NOT NULL,
            class_id TEXT NOT NULL,
            student_id TEXT NOT NULL,
            term INTEGER NOT NULL,
            year TEXT NOT NULL,
            trait_code TEXT NOT NULL,
            score INTEGER NOT NULL,
            updated_at TEXT,
            PRIMARY KEY(kind, class_id, student_id, term, year, trait_code),
            FOREIGN KEY(class_id) REFERENCES classes(id),
            FOREIGN KEY(student_id) REFERENCES students(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS rating_remarks(
            kind TEXT NOT NULL,
            class_id TEXT NOT NULL,
            student_id TEXT NOT NULL,
            term INTEGER NOT NULL,
            year TEXT NOT NULL,
            remark TEXT NOT NULL,
            PRIMARY KEY(kind, class_id, student_id, term, year),
            FOREIGN KEY(class_id) REFERENCES classes(id),
            FOREIGN KEY(student_id) REFERENCES students(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_rating_cells_student
         ON rating_cells(student_id, term, year)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS compiled_results(
            id TEXT PRIMARY KEY,
            student_id TEXT NOT NULL,
            class_id TEXT NOT NULL,
            term INTEGER NOT NULL,
            year TEXT NOT NULL,
            subjects_json TEXT NOT NULL DEFAULT '[]',
            ratings_json TEXT NOT NULL DEFAULT '{}',
            total_score REAL NOT NULL DEFAULT 0,
            average_score REAL NOT NULL DEFAULT 0,
            average_grade TEXT NOT NULL DEFAULT 'F',
            class_average REAL NOT NULL DEFAULT 0,
            position INTEGER NOT NULL DEFAULT 0,
            total_students INTEGER NOT NULL DEFAULT 0,
            times_present INTEGER NOT NULL DEFAULT 0,
            times_absent INTEGER NOT NULL DEFAULT 0,
            attendance_days INTEGER NOT NULL DEFAULT 0,
            class_teacher_comment TEXT NOT NULL DEFAULT '',
            principal_comment TEXT,
            status TEXT NOT NULL DEFAULT 'draft',
            rejection_reason TEXT,
            approved_by TEXT,
            approved_at TEXT,
            print_approved INTEGER NOT NULL DEFAULT 0,
            submitted_at TEXT,
            version INTEGER NOT NULL DEFAULT 1,
            FOREIGN KEY(student_id) REFERENCES students(id),
            FOREIGN KEY(class_id) REFERENCES classes(id),
            UNIQUE(student_id, class_id, term, year)
        )",
        [],
    )?;
    ensure_results_print_approved(&conn)?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_results_class_term
         ON compiled_results(class_id, term, year)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_results_status ON compiled_results(status)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS attendance_records(
            id TEXT PRIMARY KEY,
            class_id TEXT NOT NULL,
            student_id TEXT NOT NULL,
            term INTEGER NOT NULL,
            year TEXT NOT NULL,
            date TEXT NOT NULL,
            present INTEGER NOT NULL,
            FOREIGN KEY(class_id) REFERENCES classes(id),
            FOREIGN KEY(student_id) REFERENCES students(id),
            UNIQUE(class_id, student_id, date)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_attendance_class_date
         ON attendance_records(class_id, term, year, date)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_attendance_student ON attendance_records(student_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS notifications(
            id TEXT PRIMARY KEY,
            title TEXT NOT NULL,
            message TEXT NOT NULL,
            kind TEXT NOT NULL,
            audience TEXT NOT NULL,
            teacher_id TEXT,
            student_id TEXT,
            sent_by TEXT NOT NULL,
            sent_at TEXT NOT NULL,
            is_read INTEGER NOT NULL DEFAULT 0,
            read_by TEXT NOT NULL DEFAULT '[]'
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_notifications_teacher ON notifications(teacher_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS settings(
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        )",
        [],
    )?;

    Ok(conn)
}

fn ensure_scores_version(conn: &Connection) -> anyhow::Result<()> {
    if table_has_column(conn, "scores", "version")? {
        return Ok(());
    }
    conn.execute(
        "ALTER TABLE scores ADD COLUMN version INTEGER NOT NULL DEFAULT 1",
        [],
    )?;
    Ok(())
}

fn ensure_results_print_approved(conn: &Connection) -> anyhow::Result<()> {
    if table_has_column(conn, "compiled_results", "print_approved")? {
        return Ok(());
    }
    conn.execute(
        "ALTER TABLE compiled_results ADD COLUMN print_approved INTEGER NOT NULL DEFAULT 0",
        [],
    )?;
    Ok(())
}

fn table_has_column(conn: &Connection, table: &str, column: &str) -> anyhow::Result<bool> {
    let sql = format!("PRAGMA table_info({})", table);
    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let name: String = row.get(1)?;
        if name == column {
            return Ok(true);
        }
    }
    Ok(false)
}

pub fn settings_set_json(
    conn: &Connection,
    key: &str,
    value: &serde_json::Value,
) -> anyhow::Result<()> {
    conn.execute(
        "INSERT INTO settings(key, value) VALUES(?, ?)
         ON CONFLICT(key) DO UPDATE SET value = excluded.value",
        (key, value.to_string()),
    )?;
    Ok(())
}

pub fn settings_get_json(conn: &Connection, key: &str) -> anyhow::Result<Option<serde_json::Value>> {
    use rusqlite::OptionalExtension;
    let raw: Option<String> = conn
        .query_row("SELECT value FROM settings WHERE key = ?", [key], |r| {
            r.get(0)
        })
        .optional()?;
    match raw {
        Some(s) => Ok(Some(serde_json::from_str(&s)?)),
        None => Ok(None),
    }
}

/// Persists a transition intent into the notification store. Delivery to
/// a live listener is the shell's business; this row is the durable record.
pub fn record_notification(
    conn: &Connection,
    intent: &NotificationIntent,
    sent_by: &str,
) -> anyhow::Result<()> {
    let id = uuid::Uuid::new_v4().to_string();
    let sent_at = chrono::Utc::now().to_rfc3339();
    conn.execute(
        "INSERT INTO notifications(id, title, message, kind, audience, teacher_id, student_id,
                                   sent_by, sent_at, is_read, read_by)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, 0, '[]')",
        (
            &id,
            &intent.title,
            &intent.message,
            intent.kind.as_str(),
            intent.audience.as_str(),
            &intent.teacher_id,
            &intent.student_id,
            sent_by,
            &sent_at,
        ),
    )?;
    Ok(())
}
