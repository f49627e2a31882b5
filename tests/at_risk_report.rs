mod test_support;

use serde_json::json;
use test_support::{
    create_student, create_subject, record_mark, request_ok, seed_class, spawn_sidecar, temp_dir,
};

#[test]
fn threshold_selects_and_ranks_at_risk_students() {
    let workspace = temp_dir("progressd-at-risk");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let seed = seed_class(&mut stdin, &mut reader, &workspace);

    let subjects: Vec<String> = ["Mathematics", "History", "Science", "Portuguese", "Arts"]
        .iter()
        .map(|name| create_subject(&mut stdin, &mut reader, &seed, name))
        .collect();

    // Fails 2 of 5 subjects: at risk with failureRate 40.00.
    let two_fails = create_student(&mut stdin, &mut reader, &seed, "Avila", "Duo", 0);
    // Fails 1 of 5: below threshold.
    let one_fail = create_student(&mut stdin, &mut reader, &seed, "Bento", "Uno", 1);
    // Fails 3 of 5: must rank first.
    let three_fails = create_student(&mut stdin, &mut reader, &seed, "Cunha", "Tris", 2);

    for (student, fail_count) in [(&two_fails, 2), (&one_fail, 1), (&three_fails, 3)] {
        for (i, subject) in subjects.iter().enumerate() {
            let grade = if i < fail_count { 3.0 } else { 8.0 };
            record_mark(
                &mut stdin,
                &mut reader,
                &seed,
                student,
                subject,
                grade,
                1.0,
                &format!("2025-03-{:02}", i + 1),
                false,
            );
        }
    }

    let report = request_ok(
        &mut stdin,
        &mut reader,
        "risk",
        "reports.atRisk",
        json!({ "classId": seed.class_id, "threshold": 2 }),
    );
    let students = report
        .get("students")
        .and_then(|v| v.as_array())
        .expect("students");
    assert_eq!(students.len(), 2);

    assert_eq!(
        students[0].get("studentId").and_then(|v| v.as_str()),
        Some(three_fails.as_str())
    );
    assert_eq!(
        students[0].get("failedCount").and_then(|v| v.as_u64()),
        Some(3)
    );
    assert_eq!(
        students[0].get("failureRate").and_then(|v| v.as_f64()),
        Some(60.0)
    );

    assert_eq!(
        students[1].get("studentId").and_then(|v| v.as_str()),
        Some(two_fails.as_str())
    );
    assert_eq!(
        students[1].get("failureRate").and_then(|v| v.as_f64()),
        Some(40.0)
    );

    assert!(!students
        .iter()
        .any(|s| s.get("studentId").and_then(|v| v.as_str()) == Some(one_fail.as_str())));
}

#[test]
fn pending_subjects_are_not_failures() {
    let workspace = temp_dir("progressd-at-risk-pending");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let seed = seed_class(&mut stdin, &mut reader, &workspace);

    let math = create_subject(&mut stdin, &mut reader, &seed, "Mathematics");
    let _history = create_subject(&mut stdin, &mut reader, &seed, "History");
    let _science = create_subject(&mut stdin, &mut reader, &seed, "Science");

    // One failing subject; the other two have no marks at all.
    let student = create_student(&mut stdin, &mut reader, &seed, "Dias", "Neo", 0);
    record_mark(&mut stdin, &mut reader, &seed, &student, &math, 2.0, 1.0, "2025-03-01", false);

    let report = request_ok(
        &mut stdin,
        &mut reader,
        "risk",
        "reports.atRisk",
        json!({ "classId": seed.class_id, "threshold": 2 }),
    );
    let students = report
        .get("students")
        .and_then(|v| v.as_array())
        .expect("students");
    assert!(students.is_empty());
}
