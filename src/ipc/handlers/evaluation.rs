use crate::grading;
use crate::ipc::error::ok;
use crate::ipc::helpers::{db_conn, engine_err, optional_str, required_str, require_row};
use crate::ipc::types::{AppState, Request};
use serde_json::json;

fn handle_subject_summary(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let student_id = match required_str(req, "studentId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let subject_id = match required_str(req, "subjectId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let academic_year_id = match required_str(req, "academicYearId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    if let Err(e) = require_row(conn, "students", &student_id, "student") {
        return engine_err(req, e);
    }
    let config = match grading::load_subject_config(conn, &subject_id) {
        Ok(v) => v,
        Err(e) => return engine_err(req, e),
    };

    let period = optional_str(req, "period");
    let group_by_period = req
        .params
        .get("groupByPeriod")
        .and_then(|v| v.as_bool())
        .unwrap_or(false);

    let ctx = grading::GradeContext {
        conn,
        student_id: &student_id,
        subject_id: &subject_id,
        academic_year_id: &academic_year_id,
    };
    let marks = match grading::load_marks(&ctx, period.as_deref()) {
        Ok(v) => v,
        Err(e) => return engine_err(req, e),
    };

    let agg = grading::aggregate(&marks, config.min_grade_to_pass);
    let mut result = json!({
        "subjectId": subject_id,
        "subjectName": config.name,
        "regularAverage": grading::round2(agg.regular_average),
        "recoveryGrade": agg.recovery_grade.map(grading::round2),
        "finalAverage": grading::round2(agg.final_average),
        "regularCount": agg.regular_count,
        "recoveryCount": agg.recovery_count,
        "minGradeToPass": config.min_grade_to_pass,
    });
    if let Some(p) = period {
        result["period"] = json!(p);
    }
    if group_by_period {
        result["periods"] = json!(grading::period_averages(&marks));
    }

    ok(&req.id, result)
}

fn handle_subject_evaluate(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let student_id = match required_str(req, "studentId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let subject_id = match required_str(req, "subjectId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let academic_year_id = match required_str(req, "academicYearId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    if let Err(e) = require_row(conn, "students", &student_id, "student") {
        return engine_err(req, e);
    }

    let ctx = grading::GradeContext {
        conn,
        student_id: &student_id,
        subject_id: &subject_id,
        academic_year_id: &academic_year_id,
    };
    match grading::evaluate_subject(&ctx) {
        Ok(result) => ok(&req.id, json!(result)),
        Err(e) => engine_err(req, e),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "grades.subjectSummary" => Some(handle_subject_summary(state, req)),
        "subjects.evaluate" => Some(handle_subject_evaluate(state, req)),
        _ => None,
    }
}
