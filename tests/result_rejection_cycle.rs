use serde_json::json;
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::time::{SystemTime, UNIX_EPOCH};

fn temp_dir(prefix: &str) -> PathBuf {
    let p = std::env::temp_dir().join(format!(
        "{}-{}",
        prefix,
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos()
    ));
    std::fs::create_dir_all(&p).expect("create temp dir");
    p
}

fn spawn_sidecar() -> (Child, ChildStdin, BufReader<ChildStdout>) {
    let exe = env!("CARGO_BIN_EXE_resultsd");
    let mut child = Command::new(exe)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn resultsd");
    let stdin = child.stdin.take().expect("child stdin");
    let stdout = child.stdout.take().expect("child stdout");
    (child, stdin, BufReader::new(stdout))
}

fn request(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let payload = json!({
        "id": id,
        "method": method,
        "params": params,
    });
    writeln!(stdin, "{}", payload).expect("write request");
    stdin.flush().expect("flush request");

    let mut line = String::new();
    reader.read_line(&mut line).expect("read response line");
    assert!(!line.trim().is_empty(), "empty response for {}", method);
    let value: serde_json::Value = serde_json::from_str(line.trim()).expect("parse response json");
    assert_eq!(value.get("id").and_then(|v| v.as_str()), Some(id));
    value
}

fn request_ok(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let value = request(stdin, reader, id, method, params);
    assert!(
        value.get("ok").and_then(|v| v.as_bool()).unwrap_or(false),
        "{} failed: {}",
        method,
        value
    );
    value.get("result").cloned().unwrap_or_else(|| json!({}))
}

fn id_of(v: &serde_json::Value) -> String {
    v.get("id")
        .and_then(|x| x.as_str())
        .expect("id field")
        .to_string()
}

fn error_code(v: &serde_json::Value) -> String {
    assert_eq!(v.get("ok").and_then(|x| x.as_bool()), Some(false));
    v.get("error")
        .and_then(|e| e.get("code"))
        .and_then(|c| c.as_str())
        .unwrap_or("")
        .to_string()
}

#[test]
fn rejection_reopens_and_resubmission_recomputes_identically() {
    let workspace = temp_dir("resultsd-rejection");
    let (_child, mut stdin, mut reader) = spawn_sidecar();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "school.setup",
        json!({ "name": "Sunrise College", "currentTerm": 2, "currentYear": "2025/2026" }),
    );

    let subject_teacher = id_of(&request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "teachers.create",
        json!({ "name": "Eze, Chika" }),
    ));
    let class_teacher = id_of(&request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "teachers.create",
        json!({ "name": "Musa, Halima" }),
    ));
    let approver = id_of(&request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "teachers.create",
        json!({ "name": "Adeyemi, Folake", "isApprover": true }),
    ));
    let class_id = id_of(&request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "classes.create",
        json!({ "name": "JSS 3B", "classTeacherId": class_teacher }),
    ));
    let student_id = id_of(&request_ok(
        &mut stdin,
        &mut reader,
        "7",
        "students.create",
        json!({
            "classId": class_id,
            "lastName": "Obi",
            "firstName": "Ada",
            "admissionNo": "ADM/001",
        }),
    ));
    let subject_id = id_of(&request_ok(
        &mut stdin,
        &mut reader,
        "8",
        "subjects.create",
        json!({ "name": "Basic Science" }),
    ));
    let assignment_id = id_of(&request_ok(
        &mut stdin,
        &mut reader,
        "9",
        "assignments.create",
        json!({
            "subjectId": subject_id,
            "classId": class_id,
            "teacherId": subject_teacher,
        }),
    ));
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "10",
        "scores.saveDraft",
        json!({
            "assignmentId": assignment_id,
            "teacherId": subject_teacher,
            "entries": [ { "studentId": student_id, "ca1": 16, "ca2": 14, "exam": 42 } ],
        }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "11",
        "scores.submit",
        json!({ "assignmentId": assignment_id, "teacherId": subject_teacher }),
    );
    for (kind, traits) in [
        ("affective", json!({ "punctuality": 3, "honesty": 4 })),
        ("psychomotor", json!({ "handwriting": 3, "craft": 4 })),
    ] {
        let _ = request_ok(
            &mut stdin,
            &mut reader,
            &format!("r-{}", kind),
            "ratings.upsert",
            json!({
                "classId": class_id,
                "studentId": student_id,
                "teacherId": class_teacher,
                "kind": kind,
                "traits": traits,
            }),
        );
    }

    let first = request_ok(
        &mut stdin,
        &mut reader,
        "12",
        "results.submit",
        json!({
            "classId": class_id,
            "studentId": student_id,
            "teacherId": class_teacher,
            "comment": "Steady work this term.",
        }),
    );
    let result_id = first
        .get("resultId")
        .and_then(|v| v.as_str())
        .expect("resultId")
        .to_string();

    // Rejection demands a reason.
    let no_reason = request(
        &mut stdin,
        &mut reader,
        "13",
        "results.reject",
        json!({ "resultId": result_id, "approverId": approver, "reason": "  " }),
    );
    assert_eq!(error_code(&no_reason), "bad_params");

    let rejected = request_ok(
        &mut stdin,
        &mut reader,
        "14",
        "results.reject",
        json!({
            "resultId": result_id,
            "approverId": approver,
            "reason": "incorrect attendance",
        }),
    );
    assert_eq!(rejected.get("status").and_then(|v| v.as_str()), Some("rejected"));
    assert_eq!(
        rejected.get("rejectionReason").and_then(|v| v.as_str()),
        Some("incorrect attendance")
    );
    assert!(rejected.get("approvedBy").and_then(|v| v.as_str()).is_none());
    assert!(rejected.get("approvedAt").and_then(|v| v.as_str()).is_none());

    // Exactly one intent, targeted at the class teacher, naming the reason.
    let feed = request_ok(
        &mut stdin,
        &mut reader,
        "15",
        "notifications.list",
        json!({ "teacherId": class_teacher }),
    );
    let rows = feed
        .get("notifications")
        .and_then(|v| v.as_array())
        .cloned()
        .unwrap_or_default();
    assert_eq!(rows.len(), 1);
    assert_eq!(
        rows[0].get("teacherId").and_then(|v| v.as_str()),
        Some(class_teacher.as_str())
    );
    assert!(rows[0]
        .get("message")
        .and_then(|v| v.as_str())
        .unwrap_or("")
        .contains("incorrect attendance"));

    // The stored reason is visible to the owner before editing.
    let reopened = request_ok(
        &mut stdin,
        &mut reader,
        "16",
        "results.get",
        json!({ "resultId": result_id }),
    );
    assert_eq!(
        reopened.get("rejectionReason").and_then(|v| v.as_str()),
        Some("incorrect attendance")
    );
    let rejected_version = reopened.get("version").and_then(|v| v.as_i64()).expect("version");

    // Unchanged inputs: resubmission recomputes the identical snapshot on
    // the same logical record, clearing the rejection fields.
    let second = request_ok(
        &mut stdin,
        &mut reader,
        "17",
        "results.submit",
        json!({
            "classId": class_id,
            "studentId": student_id,
            "teacherId": class_teacher,
            "comment": "Steady work this term.",
        }),
    );
    assert_eq!(
        second.get("resultId").and_then(|v| v.as_str()),
        Some(result_id.as_str())
    );
    assert_eq!(second.get("status").and_then(|v| v.as_str()), Some("submitted"));
    assert!(second.get("rejectionReason").and_then(|v| v.as_str()).is_none());
    for key in [
        "totalScore",
        "averageScore",
        "classAverage",
        "position",
        "totalStudents",
    ] {
        assert_eq!(
            second.get(key), first.get(key),
            "{} must recompute identically",
            key
        );
    }
    assert!(
        second.get("version").and_then(|v| v.as_i64()).expect("version") > rejected_version,
        "resubmission bumps the version token"
    );
}
