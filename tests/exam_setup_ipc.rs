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
    let exe = env!("CARGO_BIN_EXE_examseatd");
    let mut child = Command::new(exe)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn examseatd");
    let stdin = child.stdin.take().expect("child stdin");
    let stdout = child.stdout.take().expect("child stdout");
    (child, stdin, BufReader::new(stdout))
}

fn request_ok(
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
    let value: serde_json::Value = serde_json::from_str(line.trim()).expect("parse response json");
    assert_eq!(value.get("id").and_then(|v| v.as_str()), Some(id));
    assert!(
        value.get("ok").and_then(|v| v.as_bool()).unwrap_or(false),
        "{} failed: {}",
        method,
        value
    );
    value.get("result").cloned().unwrap_or_else(|| json!({}))
}

#[test]
fn exam_setup_lifecycle() {
    let workspace = temp_dir("examseat-setup");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    request_ok(
        &mut stdin,
        &mut reader,
        "ws",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );

    let created = request_ok(
        &mut stdin,
        &mut reader,
        "create",
        "exam.create",
        json!({ "name": "Winter 2026", "startDate": "2099-01-01", "endDate": "2099-01-10" }),
    );
    let exam_id = created
        .get("examId")
        .and_then(|v| v.as_str())
        .expect("examId")
        .to_string();

    // A file with rows missing a registration number or department gets
    // those rows skipped, with file-level defaults filling per-row gaps.
    let file = request_ok(
        &mut stdin,
        &mut reader,
        "file",
        "roster.addFile",
        json!({
            "fileName": "mixed.xlsx",
            "department": "Commerce",
            "students": [
                { "name": "Asha", "registrationNumber": "COM2025001" },
                { "name": "Vikram", "registrationNumber": "COM2025002", "department": "Commerce" },
                { "name": "No Reg" }
            ]
        }),
    );
    assert_eq!(file.get("importedCount").and_then(|v| v.as_i64()), Some(2));
    assert_eq!(file.get("skippedCount").and_then(|v| v.as_i64()), Some(1));
    let file_id = file
        .get("fileId")
        .and_then(|v| v.as_str())
        .expect("fileId")
        .to_string();

    request_ok(
        &mut stdin,
        &mut reader,
        "attach",
        "roster.attach",
        json!({ "examId": exam_id, "fileIds": [file_id] }),
    );
    // Attaching again is a no-op merge.
    let again = request_ok(
        &mut stdin,
        &mut reader,
        "attach2",
        "roster.attach",
        json!({ "examId": exam_id, "fileIds": [file_id] }),
    );
    assert_eq!(again.get("attachedCount").and_then(|v| v.as_i64()), Some(0));

    let students = request_ok(
        &mut stdin,
        &mut reader,
        "students",
        "roster.students",
        json!({ "examId": exam_id }),
    );
    let students = students
        .get("students")
        .and_then(|v| v.as_array())
        .expect("students");
    assert_eq!(students.len(), 2);
    assert!(students
        .iter()
        .all(|s| s.get("department").and_then(|v| v.as_str()) == Some("Commerce")));

    let papers = request_ok(
        &mut stdin,
        &mut reader,
        "papers",
        "schedule.addPapers",
        json!({
            "examId": exam_id,
            "papers": [{
                "department": "Commerce",
                "paperName": "Accounting I",
                "examDate": "2099-01-02",
                "session": "First Half"
            }]
        }),
    );
    assert_eq!(papers.get("addedCount").and_then(|v| v.as_i64()), Some(1));

    request_ok(
        &mut stdin,
        &mut reader,
        "rooms",
        "rooms.add",
        json!({
            "examId": exam_id,
            "rooms": [
                { "building": "Main Block", "roomNumber": "101", "capacity": 30 },
                { "building": "Main Block", "roomNumber": "102", "capacity": 30 }
            ]
        }),
    );

    let listed = request_ok(&mut stdin, &mut reader, "list", "exam.list", json!({}));
    let exams = listed.get("exams").and_then(|v| v.as_array()).expect("exams");
    assert_eq!(exams.len(), 1);
    let exam = &exams[0];
    assert_eq!(exam.get("studentCount").and_then(|v| v.as_i64()), Some(2));
    assert_eq!(exam.get("roomCount").and_then(|v| v.as_i64()), Some(2));
    assert_eq!(exam.get("paperCount").and_then(|v| v.as_i64()), Some(1));
    assert_eq!(exam.get("status").and_then(|v| v.as_str()), Some("upcoming"));
    assert_eq!(exam.get("isCompleted").and_then(|v| v.as_bool()), Some(false));

    request_ok(
        &mut stdin,
        &mut reader,
        "complete",
        "exam.complete",
        json!({ "examId": exam_id }),
    );
    let listed = request_ok(&mut stdin, &mut reader, "list2", "exam.list", json!({}));
    assert_eq!(
        listed.get("exams").and_then(|v| v.as_array()).expect("exams")[0]
            .get("isCompleted")
            .and_then(|v| v.as_bool()),
        Some(true)
    );

    // Deleting the exam removes rooms, papers, memberships and allocations.
    request_ok(
        &mut stdin,
        &mut reader,
        "delete",
        "exam.delete",
        json!({ "examId": exam_id }),
    );
    let listed = request_ok(&mut stdin, &mut reader, "list3", "exam.list", json!({}));
    assert_eq!(
        listed.get("exams").and_then(|v| v.as_array()).map(|a| a.len()),
        Some(0)
    );

    // The student file outlives the exam and can be removed on its own.
    let files = request_ok(&mut stdin, &mut reader, "files", "roster.listFiles", json!({}));
    assert_eq!(
        files.get("files").and_then(|v| v.as_array()).map(|a| a.len()),
        Some(1)
    );
    request_ok(
        &mut stdin,
        &mut reader,
        "rmfile",
        "roster.deleteFile",
        json!({ "fileId": files.get("files").unwrap()[0].get("id").unwrap().as_str().unwrap() }),
    );
    let files = request_ok(&mut stdin, &mut reader, "files2", "roster.listFiles", json!({}));
    assert_eq!(
        files.get("files").and_then(|v| v.as_array()).map(|a| a.len()),
        Some(0)
    );
}
