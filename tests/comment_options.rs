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
fn comment_options_offer_at_least_three_unique_drafts() {
    let workspace = temp_dir("resultsd-comments");
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
    let class_id = id_of(&request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "classes.create",
        json!({ "name": "JSS 2A", "classTeacherId": class_teacher }),
    ));
    let student_id = id_of(&request_ok(
        &mut stdin,
        &mut reader,
        "6",
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
        "7",
        "subjects.create",
        json!({ "name": "Mathematics" }),
    ));
    let assignment_id = id_of(&request_ok(
        &mut stdin,
        &mut reader,
        "8",
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
        "9",
        "scores.saveDraft",
        json!({
            "assignmentId": assignment_id,
            "teacherId": subject_teacher,
            "entries": [ { "studentId": student_id, "ca1": 18, "ca2": 17, "exam": 50 } ],
        }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "10",
        "scores.submit",
        json!({ "assignmentId": assignment_id, "teacherId": subject_teacher }),
    );

    let options = request_ok(
        &mut stdin,
        &mut reader,
        "11",
        "results.commentOptions",
        json!({ "classId": class_id, "studentId": student_id }),
    );
    assert_eq!(options.get("averageScore").and_then(|v| v.as_f64()), Some(85.0));
    assert_eq!(options.get("position").and_then(|v| v.as_u64()), Some(1));
    let drafts = options
        .get("options")
        .and_then(|v| v.as_array())
        .cloned()
        .expect("options");
    assert!(drafts.len() >= 3, "at least three drafts: {}", drafts.len());
    // Each draft is three sentences; the pools guarantee full stops.
    for d in &drafts {
        let text = d.as_str().expect("draft text");
        assert!(text.matches('.').count() >= 3, "three sentences: {}", text);
    }
}
