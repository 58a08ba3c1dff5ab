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

fn spawn_sidecar(args: &[&str]) -> (Child, ChildStdin, BufReader<ChildStdout>) {
    let exe = env!("CARGO_BIN_EXE_classroomd");
    let mut child = Command::new(exe)
        .args(args)
        .env_remove("CLASSROOMD_WORKSPACE")
        .env_remove("CLASSROOMD_MAX_ATTACHMENT_BYTES")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn classroomd");
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

fn error_code(value: &serde_json::Value) -> &str {
    assert_eq!(value.get("ok").and_then(|v| v.as_bool()), Some(false), "{}", value);
    value
        .get("error")
        .and_then(|e| e.get("code"))
        .and_then(|v| v.as_str())
        .unwrap_or("")
}

use base64::{engine::general_purpose, Engine as _};

fn teacher(id: &str) -> serde_json::Value {
    json!({ "id": id, "role": "teacher" })
}

fn student(id: &str) -> serde_json::Value {
    json!({ "id": id, "role": "student" })
}

fn pdf_file(name: &str, body: &[u8]) -> serde_json::Value {
    json!({
        "name": name,
        "mimeType": "application/pdf",
        "contentBase64": general_purpose::STANDARD.encode(body),
    })
}

fn count_files(dir: &std::path::Path) -> usize {
    std::fs::read_dir(dir)
        .map(|it| it.filter_map(|e| e.ok()).filter(|e| e.path().is_file()).count())
        .unwrap_or(0)
}

fn submissions_of(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    assignment_id: &str,
) -> Vec<serde_json::Value> {
    let res = request_ok(
        stdin,
        reader,
        id,
        "submissions.list",
        json!({ "actor": teacher("t-ana"), "assignmentId": assignment_id }),
    );
    res.get("submissions")
        .and_then(|v| v.as_array())
        .cloned()
        .expect("submissions array")
}

fn submission_for<'a>(rows: &'a [serde_json::Value], student_id: &str) -> &'a serde_json::Value {
    rows.iter()
        .find(|s| s.get("studentId").and_then(|v| v.as_str()) == Some(student_id))
        .expect("submission for student")
}

#[test]
fn assignment_lifecycle_from_create_to_delete_keeps_aggregates_in_step() {
    let workspace = temp_dir("classroomd-lifecycle");
    let (mut child, mut stdin, mut reader) = spawn_sidecar(&[]);
    request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "subjects.upsert",
        json!({ "id": "math", "name": "Mathematics", "color": "#2563eb", "icon": "calculator" }),
    );

    let created = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "assignments.create",
        json!({
            "actor": teacher("t-ana"),
            "title": "Fractions worksheet",
            "instructions": "Solve 1-20",
            "dueAt": "2099-06-30",
            "subjectId": "math",
            "trimester": "2",
            "studentIds": ["s-bea", "s-carl", "s-bea"],
            "file": pdf_file("worksheet.pdf", b"%PDF-1.4 fractions"),
        }),
    );
    let a1 = created["assignment"]["id"].as_str().expect("a1 id").to_string();
    assert_eq!(created["assignment"]["trimester"].as_str(), Some("2"));
    assert!(created["assignment"]["attachmentRef"]
        .as_str()
        .map(|r| r.starts_with("assignments/"))
        .unwrap_or(false));

    let created = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "assignments.create",
        json!({
            "actor": teacher("t-ana"),
            "title": "Decimals quiz",
            "dueAt": "2099-07-15T12:00:00Z",
            "subjectId": "math",
            "trimester": "2",
            "studentIds": ["s-bea", "s-carl"],
        }),
    );
    let a2 = created["assignment"]["id"].as_str().expect("a2 id").to_string();

    let listed = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "assignments.list",
        json!({ "actor": teacher("t-ana") }),
    );
    let rows = listed["assignments"].as_array().expect("assignments");
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0]["id"].as_str(), Some(a2.as_str()));
    assert_eq!(rows[1]["submissionCounts"]["total"].as_i64(), Some(2));
    assert_eq!(rows[1]["submissionCounts"]["pending"].as_i64(), Some(2));
    assert_eq!(rows[1]["subject"]["name"].as_str(), Some("Mathematics"));

    for (i, aid) in [&a1, &a2].iter().enumerate() {
        let sub = request_ok(
            &mut stdin,
            &mut reader,
            &format!("sub-{i}"),
            "submissions.submit",
            json!({
                "actor": student("s-bea"),
                "assignmentId": aid,
                "file": pdf_file("answers.pdf", b"%PDF-1.4 bea"),
            }),
        );
        assert_eq!(sub["submission"]["status"].as_str(), Some("submitted"));
        assert!(sub["submission"]["submittedAt"].as_str().is_some());
    }
    let submissions_dir = workspace.join("uploads").join("submissions");
    assert_eq!(count_files(&submissions_dir), 2);

    let a1_rows = submissions_of(&mut stdin, &mut reader, "6", &a1);
    assert_eq!(a1_rows.len(), 2);
    assert_eq!(a1_rows[0]["studentId"].as_str(), Some("s-carl"));
    assert_eq!(a1_rows[0]["status"].as_str(), Some("pending"));
    assert_eq!(a1_rows[1]["status"].as_str(), Some("submitted"));

    let bea_a1 = submission_for(&a1_rows, "s-bea")["id"]
        .as_str()
        .expect("id")
        .to_string();
    let a2_rows = submissions_of(&mut stdin, &mut reader, "7", &a2);
    let bea_a2 = submission_for(&a2_rows, "s-bea")["id"]
        .as_str()
        .expect("id")
        .to_string();

    let first = request_ok(
        &mut stdin,
        &mut reader,
        "8",
        "grades.set",
        json!({ "actor": teacher("t-ana"), "submissionId": bea_a1, "grade": "8,0", "comment": "  Good work  " }),
    );
    assert_eq!(first["submission"]["status"].as_str(), Some("graded"));
    assert_eq!(first["submission"]["teacherComment"].as_str(), Some("Good work"));
    assert_eq!(first["aggregateStale"].as_bool(), Some(false));
    assert_eq!(first["trimesterGrade"]["gradedCount"].as_i64(), Some(1));

    let second = request_ok(
        &mut stdin,
        &mut reader,
        "9",
        "grades.set",
        json!({ "actor": teacher("t-ana"), "submissionId": bea_a2, "grade": 9.5 }),
    );
    let avg = second["trimesterGrade"]["average"].as_f64().expect("average");
    assert!((avg - 8.75).abs() < 1e-9, "average was {avg}");
    assert_eq!(second["trimesterGrade"]["gradedCount"].as_i64(), Some(2));

    let own = request_ok(
        &mut stdin,
        &mut reader,
        "10",
        "trimesterGrades.list",
        json!({ "actor": student("s-bea") }),
    );
    let grades = own["trimesterGrades"].as_array().expect("grades");
    assert_eq!(grades.len(), 1);
    assert_eq!(grades[0]["subjectId"].as_str(), Some("math"));
    assert_eq!(grades[0]["trimester"].as_str(), Some("2"));

    let other = request(
        &mut stdin,
        &mut reader,
        "11",
        "trimesterGrades.list",
        json!({ "actor": student("s-carl"), "studentId": "s-bea" }),
    );
    assert_eq!(error_code(&other), "forbidden");

    let deleted = request_ok(
        &mut stdin,
        &mut reader,
        "12",
        "assignments.delete",
        json!({ "actor": teacher("t-ana"), "assignmentId": a2 }),
    );
    assert_eq!(deleted["submissionsRemoved"].as_u64(), Some(2));
    assert_eq!(deleted["attachmentsRemoved"].as_u64(), Some(1));
    assert_eq!(deleted["aggregatesRecomputed"].as_u64(), Some(1));
    assert_eq!(count_files(&submissions_dir), 1);

    let gone = request(
        &mut stdin,
        &mut reader,
        "13",
        "submissions.list",
        json!({ "actor": teacher("t-ana"), "assignmentId": a2 }),
    );
    assert_eq!(error_code(&gone), "not_found");

    let after = request_ok(
        &mut stdin,
        &mut reader,
        "14",
        "trimesterGrades.list",
        json!({ "actor": teacher("t-ana"), "studentId": "s-bea" }),
    );
    let grades = after["trimesterGrades"].as_array().expect("grades");
    assert_eq!(grades.len(), 1);
    let avg = grades[0]["average"].as_f64().expect("average");
    assert!((avg - 8.0).abs() < 1e-9, "average was {avg}");
    assert_eq!(grades[0]["gradedCount"].as_i64(), Some(1));

    let deleted = request_ok(
        &mut stdin,
        &mut reader,
        "15",
        "assignments.delete",
        json!({ "actor": teacher("t-ana"), "assignmentId": a1 }),
    );
    assert_eq!(deleted["attachmentsRemoved"].as_u64(), Some(2));
    assert_eq!(count_files(&submissions_dir), 0);
    assert_eq!(count_files(&workspace.join("uploads").join("assignments")), 0);

    let empty = request_ok(
        &mut stdin,
        &mut reader,
        "16",
        "trimesterGrades.list",
        json!({ "actor": student("s-bea") }),
    );
    assert_eq!(empty["trimesterGrades"].as_array().map(|a| a.len()), Some(0));

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(&workspace);
}

#[test]
fn moving_an_assignment_to_another_trimester_moves_its_grades() {
    let workspace = temp_dir("classroomd-move");
    let (mut child, mut stdin, mut reader) = spawn_sidecar(&[]);
    request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "subjects.upsert",
        json!({ "id": "sci", "name": "Science" }),
    );
    let created = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "assignments.create",
        json!({
            "actor": teacher("t-ana"),
            "title": "Plant cells",
            "dueAt": "2099-01-10",
            "subjectId": "sci",
            "studentIds": ["s-bea"],
        }),
    );
    let aid = created["assignment"]["id"].as_str().expect("id").to_string();
    assert_eq!(created["assignment"]["trimester"].as_str(), Some("1"));

    let rows = submissions_of(&mut stdin, &mut reader, "4", &aid);
    let sid = rows[0]["id"].as_str().expect("id").to_string();
    request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "grades.set",
        json!({ "actor": teacher("t-ana"), "submissionId": sid, "grade": 6 }),
    );

    let updated = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "assignments.update",
        json!({ "actor": teacher("t-ana"), "assignmentId": aid, "patch": { "trimester": "3" } }),
    );
    assert_eq!(updated["assignment"]["trimester"].as_str(), Some("3"));

    let grades = request_ok(
        &mut stdin,
        &mut reader,
        "7",
        "trimesterGrades.list",
        json!({ "actor": student("s-bea") }),
    );
    let grades = grades["trimesterGrades"].as_array().expect("grades");
    assert_eq!(grades.len(), 1);
    assert_eq!(grades[0]["trimester"].as_str(), Some("3"));

    let stranger = request(
        &mut stdin,
        &mut reader,
        "8",
        "assignments.update",
        json!({ "actor": teacher("t-ben"), "assignmentId": aid, "patch": { "title": "Mine now" } }),
    );
    assert_eq!(error_code(&stranger), "forbidden");

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(&workspace);
}
