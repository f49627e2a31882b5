#![allow(dead_code)]

use serde_json::json;
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::time::{SystemTime, UNIX_EPOCH};

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
    let exe = env!("CARGO_BIN_EXE_progressd");
    let mut child = Command::new(exe)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn progressd");
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
    value.get("result").cloned().expect("result")
}

pub fn request_err(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> (String, serde_json::Value) {
    let value = request(stdin, reader, id, method, params);
    assert_eq!(
        value.get("ok").and_then(|v| v.as_bool()),
        Some(false),
        "{} unexpectedly succeeded: {}",
        method,
        value
    );
    let code = value
        .get("error")
        .and_then(|e| e.get("code"))
        .and_then(|v| v.as_str())
        .expect("error code")
        .to_string();
    (code, value)
}

fn str_field(v: &serde_json::Value, key: &str) -> String {
    v.get(key)
        .and_then(|x| x.as_str())
        .unwrap_or_else(|| panic!("missing {} in {}", key, v))
        .to_string()
}

/// School, year, level and class shared by most scenarios.
pub struct Seed {
    pub school_id: String,
    pub academic_year_id: String,
    pub year_level_id: String,
    pub class_id: String,
}

pub fn seed_class(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    workspace: &std::path::Path,
) -> Seed {
    let _ = request_ok(
        stdin,
        reader,
        "seed-ws",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let school = request_ok(
        stdin,
        reader,
        "seed-school",
        "school.create",
        json!({ "name": "Escola Horizonte" }),
    );
    let school_id = str_field(&school, "schoolId");
    let year = request_ok(
        stdin,
        reader,
        "seed-year",
        "academicYear.create",
        json!({ "schoolId": school_id, "name": "2025" }),
    );
    let academic_year_id = str_field(&year, "academicYearId");
    let level = request_ok(
        stdin,
        reader,
        "seed-level",
        "yearLevel.create",
        json!({ "schoolId": school_id, "name": "Grade 7", "sortOrder": 7 }),
    );
    let year_level_id = str_field(&level, "yearLevelId");
    let class = request_ok(
        stdin,
        reader,
        "seed-class",
        "class.create",
        json!({
            "schoolId": school_id,
            "academicYearId": academic_year_id,
            "yearLevelId": year_level_id,
            "name": "7A"
        }),
    );
    let class_id = str_field(&class, "classId");

    Seed {
        school_id,
        academic_year_id,
        year_level_id,
        class_id,
    }
}

pub fn create_subject(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    seed: &Seed,
    name: &str,
) -> String {
    let id = format!("subj-{}", name);
    let subject = request_ok(
        stdin,
        reader,
        &id,
        "subject.create",
        json!({ "schoolId": seed.school_id, "name": name, "yearLevelId": seed.year_level_id }),
    );
    let subject_id = str_field(&subject, "subjectId");
    let _ = request_ok(
        stdin,
        reader,
        &format!("{}-attach", id),
        "subject.attachToClass",
        json!({ "classId": seed.class_id, "subjectId": subject_id }),
    );
    subject_id
}

pub fn create_student(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    seed: &Seed,
    last_name: &str,
    first_name: &str,
    sort_order: i64,
) -> String {
    let id = format!("stud-{}-{}", last_name, first_name);
    let student = request_ok(
        stdin,
        reader,
        &id,
        "student.create",
        json!({ "schoolId": seed.school_id, "lastName": last_name, "firstName": first_name }),
    );
    let student_id = str_field(&student, "studentId");
    let _ = request_ok(
        stdin,
        reader,
        &format!("{}-enroll", id),
        "enrollment.create",
        json!({
            "studentId": student_id,
            "classId": seed.class_id,
            "academicYearId": seed.academic_year_id,
            "sortOrder": sort_order
        }),
    );
    student_id
}

pub fn record_mark(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    seed: &Seed,
    student_id: &str,
    subject_id: &str,
    grade: f64,
    weight: f64,
    date: &str,
    is_recovery: bool,
) -> String {
    let id = format!("mark-{}-{}-{}", student_id, subject_id, date);
    let mark = request_ok(
        stdin,
        reader,
        &id,
        "marks.record",
        json!({
            "studentId": student_id,
            "subjectId": subject_id,
            "classId": seed.class_id,
            "academicYearId": seed.academic_year_id,
            "title": "Assessment",
            "grade": grade,
            "weight": weight,
            "date": date,
            "isRecovery": is_recovery,
            "evalType": if is_recovery { "recovery" } else { "exam" }
        }),
    );
    str_field(&mark, "markId")
}
