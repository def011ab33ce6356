#![allow(dead_code)]

use serde_json::json;
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::time::{SystemTime, UNIX_EPOCH};

pub const TEACHER_ID: i64 = 7;

pub fn temp_dir(prefix: &str) -> PathBuf {
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

pub fn spawn_sidecar() -> (Child, ChildStdin, BufReader<ChildStdout>) {
    let exe = env!("CARGO_BIN_EXE_ericad");
    let mut child = Command::new(exe)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn ericad");
    let stdin = child.stdin.take().expect("child stdin");
    let stdout = child.stdout.take().expect("child stdout");
    (child, stdin, BufReader::new(stdout))
}

pub fn request(
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

pub fn request_ok(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let value = request(stdin, reader, id, method, params);
    assert_eq!(
        value.get("ok").and_then(|v| v.as_bool()),
        Some(true),
        "{} failed: {}",
        method,
        value
    );
    value.get("result").cloned().unwrap_or_else(|| json!({}))
}

/// Sends the request and returns the error code, failing if it succeeded.
pub fn request_err(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> String {
    let value = request(stdin, reader, id, method, params);
    assert_eq!(
        value.get("ok").and_then(|v| v.as_bool()),
        Some(false),
        "{} unexpectedly succeeded: {}",
        method,
        value
    );
    value
        .get("error")
        .and_then(|e| e.get("code"))
        .and_then(|v| v.as_str())
        .unwrap_or("unknown")
        .to_string()
}

/// A small school: one bimester/week, grade 1 with sections A and B, a math
/// course, three students in 1A, categories E (order 1) and B (order 2).
///
/// Topic 600 already holds evaluations for teacher 7 (enrollments 10 and 20)
/// and one for another teacher that must never show up.
pub fn catalog_fixture() -> serde_json::Value {
    json!({
        "bimesters": [{ "id": 1, "name": "I Bimestre" }, { "id": 2, "name": "II Bimestre" }],
        "weeks": [
            { "id": 11, "bimesterId": 1, "name": "Semana 1", "weekNumber": 1 },
            { "id": 12, "bimesterId": 1, "name": "Semana 2", "weekNumber": 2 },
            { "id": 21, "bimesterId": 2, "name": "Semana 9", "weekNumber": 9 }
        ],
        "grades": [{ "id": 100, "name": "1° Primaria" }, { "id": 200, "name": "2° Primaria" }],
        "sections": [
            { "id": 101, "gradeId": 100, "name": "A" },
            { "id": 102, "gradeId": 100, "name": "B" },
            { "id": 201, "gradeId": 200, "name": "A" }
        ],
        "courses": [
            { "id": 500, "gradeId": 100, "name": "Matemática" },
            { "id": 501, "gradeId": 100, "sectionId": 102, "name": "Taller B" }
        ],
        "topics": [
            { "id": 600, "courseId": 500, "sectionId": 101, "academicWeekId": 11, "name": "Conjuntos" },
            { "id": 601, "courseId": 500, "sectionId": 101, "academicWeekId": 11, "name": "Números", "isActive": false },
            { "id": 602, "courseId": 500, "sectionId": 101, "academicWeekId": 12, "name": "Sumas" }
        ],
        "categories": [
            { "id": 2, "code": "B", "name": "Resuelve", "order": 2 },
            { "id": 1, "code": "E", "name": "Comprende", "order": 1 }
        ],
        "scale": [
            { "code": "AD", "name": "Logro destacado", "points": 4.0 },
            { "code": "A", "name": "Logro esperado", "points": 3.0 },
            { "code": "B", "name": "En proceso", "points": 2.0 },
            { "code": "C", "name": "En inicio", "points": 1.0 }
        ],
        "enrollments": [
            { "enrollmentId": 20, "studentId": 1020, "sectionId": 101, "givenNames": "Luis", "lastNames": "Lopez" },
            { "enrollmentId": 10, "studentId": 1010, "sectionId": 101, "givenNames": "Ana", "lastNames": "Alva" },
            { "enrollmentId": 21, "studentId": 1021, "sectionId": 101, "givenNames": "Zoe", "lastNames": "Vargas" },
            { "enrollmentId": 30, "studentId": 1030, "sectionId": 102, "givenNames": "Otro", "lastNames": "Salon" }
        ],
        "evaluations": [
            { "topicId": 600, "teacherId": TEACHER_ID, "enrollmentId": 10, "categoryId": 1, "scaleCode": "A" },
            { "topicId": 600, "teacherId": TEACHER_ID, "enrollmentId": 10, "categoryId": 2, "scaleCode": "B" },
            { "topicId": 600, "teacherId": TEACHER_ID, "enrollmentId": 20, "categoryId": 1, "scaleCode": "C" },
            { "topicId": 600, "teacherId": 99, "enrollmentId": 21, "categoryId": 1, "scaleCode": "AD" }
        ]
    })
}

/// Selects a fresh workspace and imports `catalog_fixture`.
pub fn open_workspace(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    prefix: &str,
) -> PathBuf {
    let workspace = temp_dir(prefix);
    let _ = request_ok(
        stdin,
        reader,
        "ws",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy(), "teacherId": TEACHER_ID }),
    );
    let _ = request_ok(stdin, reader, "import", "catalog.import", catalog_fixture());
    workspace
}

/// Walks the cascade down to `topic_id` (bimester 1, week, grade 100,
/// section 101, course 500).
pub fn select_topic(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    week_id: i64,
    topic_id: i64,
) -> serde_json::Value {
    let path = [
        ("bimester", 1),
        ("week", week_id),
        ("grade", 100),
        ("section", 101),
        ("course", 500),
        ("topic", topic_id),
    ];
    let mut last = json!({});
    for (i, (level, id)) in path.iter().enumerate() {
        last = request_ok(
            stdin,
            reader,
            &format!("sel-{}", i),
            "cascade.select",
            json!({ "level": level, "id": id }),
        );
    }
    last
}
