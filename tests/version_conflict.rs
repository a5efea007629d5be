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

#[test]
fn stale_version_tokens_are_refused_without_writing() {
    let workspace = temp_dir("resultsd-conflict");
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
        json!({ "name": "Sunrise College", "currentTerm": 1, "currentYear": "2025/2026" }),
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
        json!({ "name": "JSS 2A", "classTeacherId": class_teacher }),
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
        json!({ "name": "Mathematics" }),
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
            "entries": [ { "studentId": student_id, "ca1": 10, "ca2": 10, "exam": 40 } ],
        }),
    );

    // First writer carries the current token and wins.
    let fresh = request_ok(
        &mut stdin,
        &mut reader,
        "11",
        "scores.saveDraft",
        json!({
            "assignmentId": assignment_id,
            "teacherId": subject_teacher,
            "entries": [ { "studentId": student_id, "ca1": 12, "ca2": 10, "exam": 40, "expectedVersion": 1 } ],
        }),
    );
    assert_eq!(fresh.get("updated").and_then(|v| v.as_u64()), Some(1));

    // Second writer still holds the old token and loses, with nothing
    // written.
    let stale = request_ok(
        &mut stdin,
        &mut reader,
        "12",
        "scores.saveDraft",
        json!({
            "assignmentId": assignment_id,
            "teacherId": subject_teacher,
            "entries": [ { "studentId": student_id, "ca1": 18, "ca2": 18, "exam": 55, "expectedVersion": 1 } ],
        }),
    );
    assert_eq!(stale.get("updated").and_then(|v| v.as_u64()), Some(0));
    let errors = stale.get("errors").and_then(|v| v.as_array()).cloned().unwrap();
    assert_eq!(errors[0].get("code").and_then(|v| v.as_str()), Some("conflict"));

    let sheet = request_ok(
        &mut stdin,
        &mut reader,
        "13",
        "scores.sheetOpen",
        json!({ "assignmentId": assignment_id }),
    );
    let row = sheet
        .get("rows")
        .and_then(|v| v.as_array())
        .and_then(|rows| rows.first())
        .cloned()
        .expect("row");
    assert_eq!(row.get("total").and_then(|v| v.as_f64()), Some(62.0));
    assert_eq!(row.get("version").and_then(|v| v.as_i64()), Some(2));

    // Same contract on compiled results.
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "14",
        "scores.submit",
        json!({ "assignmentId": assignment_id, "teacherId": subject_teacher }),
    );
    for (kind, traits) in [
        ("affective", json!({ "punctuality": 4 })),
        ("psychomotor", json!({ "sports": 4 })),
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
    let result = request_ok(
        &mut stdin,
        &mut reader,
        "15",
        "results.submit",
        json!({
            "classId": class_id,
            "studentId": student_id,
            "teacherId": class_teacher,
            "comment": "Fair effort.",
        }),
    );
    let result_id = result
        .get("resultId")
        .and_then(|v| v.as_str())
        .expect("resultId")
        .to_string();
    assert_eq!(result.get("version").and_then(|v| v.as_i64()), Some(1));

    let stale_approve = request(
        &mut stdin,
        &mut reader,
        "16",
        "results.approve",
        json!({
            "resultId": result_id,
            "approverId": approver,
            "principalComment": "Noted.",
            "expectedVersion": 99,
        }),
    );
    assert_eq!(stale_approve.get("ok").and_then(|v| v.as_bool()), Some(false));
    assert_eq!(
        stale_approve
            .get("error")
            .and_then(|e| e.get("code"))
            .and_then(|c| c.as_str()),
        Some("conflict")
    );
    let unchanged = request_ok(
        &mut stdin,
        &mut reader,
        "17",
        "results.get",
        json!({ "resultId": result_id }),
    );
    assert_eq!(
        unchanged.get("status").and_then(|v| v.as_str()),
        Some("submitted")
    );

    let approved = request_ok(
        &mut stdin,
        &mut reader,
        "18",
        "results.approve",
        json!({
            "resultId": result_id,
            "approverId": approver,
            "principalComment": "Noted.",
            "expectedVersion": 1,
        }),
    );
    assert_eq!(approved.get("status").and_then(|v| v.as_str()), Some("approved"));
}
