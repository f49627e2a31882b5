mod test_support;

use serde_json::json;
use test_support::{
    create_student, create_subject, record_mark, request_ok, seed_class, spawn_sidecar, temp_dir,
};

#[test]
fn failed_average_blends_latest_recovery_but_can_still_fail() {
    let workspace = temp_dir("progressd-recovery");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let seed = seed_class(&mut stdin, &mut reader, &workspace);
    let subject_id = create_subject(&mut stdin, &mut reader, &seed, "Portuguese");
    let student_id = create_student(&mut stdin, &mut reader, &seed, "Farias", "Gael", 0);

    record_mark(
        &mut stdin, &mut reader, &seed, &student_id, &subject_id, 4.0, 1.0, "2025-03-01", false,
    );
    record_mark(
        &mut stdin, &mut reader, &seed, &student_id, &subject_id, 5.0, 1.0, "2025-04-01", false,
    );
    // An earlier recovery attempt, then the one that counts.
    record_mark(
        &mut stdin, &mut reader, &seed, &student_id, &subject_id, 5.0, 1.0, "2025-06-01", true,
    );
    record_mark(
        &mut stdin, &mut reader, &seed, &student_id, &subject_id, 7.0, 1.0, "2025-06-20", true,
    );

    let result = request_ok(
        &mut stdin,
        &mut reader,
        "eval",
        "subjects.evaluate",
        json!({
            "studentId": student_id,
            "subjectId": subject_id,
            "academicYearId": seed.academic_year_id
        }),
    );
    assert_eq!(
        result.get("regularAverage").and_then(|v| v.as_f64()),
        Some(4.5)
    );
    assert_eq!(
        result.get("recoveryGrade").and_then(|v| v.as_f64()),
        Some(7.0)
    );
    assert_eq!(
        result.get("finalAverage").and_then(|v| v.as_f64()),
        Some(5.75)
    );
    assert_eq!(
        result.get("approved").and_then(|v| v.as_bool()),
        Some(false)
    );
    assert_eq!(
        result.get("finalStatus").and_then(|v| v.as_str()),
        Some("failed")
    );
}

#[test]
fn passing_average_never_uses_recovery() {
    let workspace = temp_dir("progressd-recovery-unused");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let seed = seed_class(&mut stdin, &mut reader, &workspace);
    let subject_id = create_subject(&mut stdin, &mut reader, &seed, "Geography");
    let student_id = create_student(&mut stdin, &mut reader, &seed, "Gomes", "Iara", 0);

    record_mark(
        &mut stdin, &mut reader, &seed, &student_id, &subject_id, 7.0, 1.0, "2025-03-01", false,
    );
    // A stray recovery mark must not drag the average down.
    record_mark(
        &mut stdin, &mut reader, &seed, &student_id, &subject_id, 2.0, 1.0, "2025-06-01", true,
    );

    let result = request_ok(
        &mut stdin,
        &mut reader,
        "eval",
        "subjects.evaluate",
        json!({
            "studentId": student_id,
            "subjectId": subject_id,
            "academicYearId": seed.academic_year_id
        }),
    );
    assert!(result.get("recoveryGrade").map(|v| v.is_null()).unwrap());
    assert_eq!(
        result.get("finalAverage").and_then(|v| v.as_f64()),
        Some(7.0)
    );
    assert_eq!(result.get("approved").and_then(|v| v.as_bool()), Some(true));
}

#[test]
fn subject_threshold_overrides_the_default() {
    let workspace = temp_dir("progressd-threshold");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let seed = seed_class(&mut stdin, &mut reader, &workspace);

    let subject = request_ok(
        &mut stdin,
        &mut reader,
        "subj",
        "subject.create",
        json!({
            "schoolId": seed.school_id,
            "name": "Arts",
            "minGradeToPass": 5.0
        }),
    );
    let subject_id = subject
        .get("subjectId")
        .and_then(|v| v.as_str())
        .unwrap()
        .to_string();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "attach",
        "subject.attachToClass",
        json!({ "classId": seed.class_id, "subjectId": subject_id }),
    );
    let student_id = create_student(&mut stdin, &mut reader, &seed, "Lima", "Joao", 0);

    record_mark(
        &mut stdin, &mut reader, &seed, &student_id, &subject_id, 5.5, 1.0, "2025-03-01", false,
    );

    let result = request_ok(
        &mut stdin,
        &mut reader,
        "eval",
        "subjects.evaluate",
        json!({
            "studentId": student_id,
            "subjectId": subject_id,
            "academicYearId": seed.academic_year_id
        }),
    );
    assert_eq!(
        result.get("minGradeToPass").and_then(|v| v.as_f64()),
        Some(5.0)
    );
    assert_eq!(result.get("approved").and_then(|v| v.as_bool()), Some(true));
}
