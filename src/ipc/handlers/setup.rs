use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{db_conn, engine_err, optional_str, required_str, require_row};
use crate::ipc::types::{AppState, Request};
use rusqlite::OptionalExtension;
use serde_json::json;
use uuid::Uuid;

fn handle_school_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let name = match required_str(req, "name") {
        Ok(v) => v.trim().to_string(),
        Err(e) => return e,
    };
    if name.is_empty() {
        return err(&req.id, "bad_params", "name must not be empty", None);
    }

    let school_id = Uuid::new_v4().to_string();
    if let Err(e) = conn.execute(
        "INSERT INTO schools(id, name) VALUES(?, ?)",
        (&school_id, &name),
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "schools" })),
        );
    }
    ok(&req.id, json!({ "schoolId": school_id, "name": name }))
}

fn handle_academic_year_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let school_id = match required_str(req, "schoolId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let name = match required_str(req, "name") {
        Ok(v) => v,
        Err(e) => return e,
    };
    if let Err(e) = require_row(conn, "schools", &school_id, "school") {
        return engine_err(req, e);
    }

    let year_id = Uuid::new_v4().to_string();
    if let Err(e) = conn.execute(
        "INSERT INTO academic_years(id, school_id, name, start_date, end_date)
         VALUES(?, ?, ?, ?, ?)",
        (
            &year_id,
            &school_id,
            &name,
            optional_str(req, "startDate"),
            optional_str(req, "endDate"),
        ),
    ) {
        return err(&req.id, "db_insert_failed", e.to_string(), None);
    }
    ok(&req.id, json!({ "academicYearId": year_id }))
}

fn handle_year_level_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let school_id = match required_str(req, "schoolId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let name = match required_str(req, "name") {
        Ok(v) => v,
        Err(e) => return e,
    };
    if let Err(e) = require_row(conn, "schools", &school_id, "school") {
        return engine_err(req, e);
    }
    let next_level_id = optional_str(req, "nextLevelId");
    if let Some(next) = next_level_id.as_deref() {
        if let Err(e) = require_row(conn, "year_levels", next, "next year level") {
            return engine_err(req, e);
        }
    }
    let sort_order = req
        .params
        .get("sortOrder")
        .and_then(|v| v.as_i64())
        .unwrap_or(0);

    let level_id = Uuid::new_v4().to_string();
    if let Err(e) = conn.execute(
        "INSERT INTO year_levels(id, school_id, name, segment, sort_order, next_level_id)
         VALUES(?, ?, ?, ?, ?, ?)",
        (
            &level_id,
            &school_id,
            &name,
            optional_str(req, "segment"),
            sort_order,
            next_level_id,
        ),
    ) {
        return err(&req.id, "db_insert_failed", e.to_string(), None);
    }
    ok(&req.id, json!({ "yearLevelId": level_id }))
}

fn handle_year_level_set_next(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let level_id = match required_str(req, "yearLevelId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let next_level_id = match required_str(req, "nextLevelId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    for (table, id, what) in [
        ("year_levels", level_id.as_str(), "year level"),
        ("year_levels", next_level_id.as_str(), "next year level"),
    ] {
        if let Err(e) = require_row(conn, table, id, what) {
            return engine_err(req, e);
        }
    }
    if let Err(e) = conn.execute(
        "UPDATE year_levels SET next_level_id = ? WHERE id = ?",
        (&next_level_id, &level_id),
    ) {
        return err(&req.id, "db_query_failed", e.to_string(), None);
    }
    ok(&req.id, json!({ "ok": true }))
}

fn handle_class_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let school_id = match required_str(req, "schoolId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let academic_year_id = match required_str(req, "academicYearId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let year_level_id = match required_str(req, "yearLevelId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let name = match required_str(req, "name") {
        Ok(v) => v,
        Err(e) => return e,
    };
    for (table, id, what) in [
        ("schools", school_id.as_str(), "school"),
        ("academic_years", academic_year_id.as_str(), "academic year"),
        ("year_levels", year_level_id.as_str(), "year level"),
    ] {
        if let Err(e) = require_row(conn, table, id, what) {
            return engine_err(req, e);
        }
    }

    let class_id = Uuid::new_v4().to_string();
    if let Err(e) = conn.execute(
        "INSERT INTO classes(id, school_id, academic_year_id, year_level_id, name)
         VALUES(?, ?, ?, ?, ?)",
        (&class_id, &school_id, &academic_year_id, &year_level_id, &name),
    ) {
        return err(&req.id, "db_insert_failed", e.to_string(), None);
    }
    ok(&req.id, json!({ "classId": class_id }))
}

fn handle_subject_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let school_id = match required_str(req, "schoolId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let name = match required_str(req, "name") {
        Ok(v) => v,
        Err(e) => return e,
    };
    if let Err(e) = require_row(conn, "schools", &school_id, "school") {
        return engine_err(req, e);
    }

    let subject_type = optional_str(req, "type").unwrap_or_else(|| "mandatory".to_string());
    if !matches!(
        subject_type.as_str(),
        "mandatory" | "complementary" | "elective"
    ) {
        return err(
            &req.id,
            "bad_params",
            "type must be one of: mandatory, complementary, elective",
            Some(json!({ "type": subject_type })),
        );
    }
    let min_grade = req.params.get("minGradeToPass").and_then(|v| v.as_f64());
    if let Some(g) = min_grade {
        if !(0.0..=10.0).contains(&g) {
            return err(
                &req.id,
                "validation_failed",
                "minGradeToPass must be in [0,10]",
                Some(json!({ "minGradeToPass": g })),
            );
        }
    }

    let subject_id = Uuid::new_v4().to_string();
    if let Err(e) = conn.execute(
        "INSERT INTO subjects(id, school_id, year_level_id, name, subject_type, min_grade_to_pass)
         VALUES(?, ?, ?, ?, ?, ?)",
        (
            &subject_id,
            &school_id,
            optional_str(req, "yearLevelId"),
            &name,
            &subject_type,
            min_grade,
        ),
    ) {
        return err(&req.id, "db_insert_failed", e.to_string(), None);
    }
    ok(&req.id, json!({ "subjectId": subject_id }))
}

fn handle_subject_attach(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let class_id = match required_str(req, "classId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let subject_id = match required_str(req, "subjectId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    for (table, id, what) in [
        ("classes", class_id.as_str(), "class"),
        ("subjects", subject_id.as_str(), "subject"),
    ] {
        if let Err(e) = require_row(conn, table, id, what) {
            return engine_err(req, e);
        }
    }
    let sort_order = req
        .params
        .get("sortOrder")
        .and_then(|v| v.as_i64())
        .unwrap_or(0);
    if let Err(e) = conn.execute(
        "INSERT INTO class_subjects(class_id, subject_id, sort_order)
         VALUES(?, ?, ?)
         ON CONFLICT(class_id, subject_id) DO UPDATE SET sort_order = excluded.sort_order",
        (&class_id, &subject_id, sort_order),
    ) {
        return err(&req.id, "db_insert_failed", e.to_string(), None);
    }
    ok(&req.id, json!({ "ok": true }))
}

fn handle_student_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let school_id = match required_str(req, "schoolId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let last_name = match required_str(req, "lastName") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let first_name = match required_str(req, "firstName") {
        Ok(v) => v,
        Err(e) => return e,
    };
    if let Err(e) = require_row(conn, "schools", &school_id, "school") {
        return engine_err(req, e);
    }

    let student_id = Uuid::new_v4().to_string();
    if let Err(e) = conn.execute(
        "INSERT INTO students(id, school_id, last_name, first_name) VALUES(?, ?, ?, ?)",
        (&student_id, &school_id, &last_name, &first_name),
    ) {
        return err(&req.id, "db_insert_failed", e.to_string(), None);
    }
    ok(&req.id, json!({ "studentId": student_id }))
}

fn handle_enrollment_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let student_id = match required_str(req, "studentId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let class_id = match required_str(req, "classId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let academic_year_id = match required_str(req, "academicYearId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    for (table, id, what) in [
        ("students", student_id.as_str(), "student"),
        ("classes", class_id.as_str(), "class"),
        ("academic_years", academic_year_id.as_str(), "academic year"),
    ] {
        if let Err(e) = require_row(conn, table, id, what) {
            return engine_err(req, e);
        }
    }
    let sort_order = req
        .params
        .get("sortOrder")
        .and_then(|v| v.as_i64())
        .unwrap_or(0);

    let enrollment_id = Uuid::new_v4().to_string();
    match conn.execute(
        "INSERT INTO enrollments(id, student_id, class_id, academic_year_id, status, sort_order)
         VALUES(?, ?, ?, ?, 'active', ?)",
        (
            &enrollment_id,
            &student_id,
            &class_id,
            &academic_year_id,
            sort_order,
        ),
    ) {
        Ok(_) => ok(&req.id, json!({ "enrollmentId": enrollment_id })),
        Err(rusqlite::Error::SqliteFailure(e, _))
            if e.code == rusqlite::ErrorCode::ConstraintViolation =>
        {
            err(
                &req.id,
                "conflict",
                "student is already enrolled in this class for this year",
                None,
            )
        }
        Err(e) => err(&req.id, "db_insert_failed", e.to_string(), None),
    }
}

fn handle_enrollment_set_status(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let enrollment_id = match required_str(req, "enrollmentId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let status = match required_str(req, "status") {
        Ok(v) => v,
        Err(e) => return e,
    };
    if !matches!(status.as_str(), "active" | "transferred" | "withdrawn") {
        return err(
            &req.id,
            "bad_params",
            "status must be one of: active, transferred, withdrawn",
            Some(json!({ "status": status })),
        );
    }
    let updated = match conn.execute(
        "UPDATE enrollments SET status = ? WHERE id = ?",
        (&status, &enrollment_id),
    ) {
        Ok(n) => n,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if updated == 0 {
        return err(&req.id, "not_found", "enrollment not found", None);
    }
    ok(&req.id, json!({ "ok": true }))
}

fn handle_enrollment_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let enrollment_id = match required_str(req, "enrollmentId") {
        Ok(v) => v,
        Err(e) => return e,
    };

    let row: Option<(String, String, String)> = match conn
        .query_row(
            "SELECT student_id, class_id, academic_year_id FROM enrollments WHERE id = ?",
            [&enrollment_id],
            |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
        )
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let Some((student_id, class_id, academic_year_id)) = row else {
        return err(&req.id, "not_found", "enrollment not found", None);
    };

    // Marks keep the enrollment alive; deletion never cascades through them.
    let mark_count: i64 = match conn.query_row(
        "SELECT COUNT(*) FROM marks
         WHERE student_id = ? AND class_id = ? AND academic_year_id = ?",
        (&student_id, &class_id, &academic_year_id),
        |r| r.get(0),
    ) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if mark_count > 0 {
        return err(
            &req.id,
            "conflict",
            "enrollment has recorded marks and cannot be deleted",
            Some(json!({ "markCount": mark_count })),
        );
    }

    if let Err(e) = conn.execute("DELETE FROM enrollments WHERE id = ?", [&enrollment_id]) {
        return err(&req.id, "db_query_failed", e.to_string(), None);
    }
    ok(&req.id, json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "school.create" => Some(handle_school_create(state, req)),
        "academicYear.create" => Some(handle_academic_year_create(state, req)),
        "yearLevel.create" => Some(handle_year_level_create(state, req)),
        "yearLevel.setNext" => Some(handle_year_level_set_next(state, req)),
        "class.create" => Some(handle_class_create(state, req)),
        "subject.create" => Some(handle_subject_create(state, req)),
        "subject.attachToClass" => Some(handle_subject_attach(state, req)),
        "student.create" => Some(handle_student_create(state, req)),
        "enrollment.create" => Some(handle_enrollment_create(state, req)),
        "enrollment.setStatus" => Some(handle_enrollment_set_status(state, req)),
        "enrollment.delete" => Some(handle_enrollment_delete(state, req)),
        _ => None,
    }
}
