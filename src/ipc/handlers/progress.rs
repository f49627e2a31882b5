use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{db_conn, engine_err, optional_str, required_str, require_row};
use crate::ipc::types::{AppState, Request};
use crate::progress;
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;

/// Resolves the student's active enrollment for the year to the class and
/// its year level. The enrollment is what scopes a progress record.
fn enrollment_scope(
    conn: &Connection,
    student_id: &str,
    academic_year_id: &str,
) -> Result<(String, String, String), crate::grading::EngineError> {
    let row: Option<(String, String, String)> = conn
        .query_row(
            "SELECT c.id, c.year_level_id, c.school_id
             FROM enrollments e
             JOIN classes c ON c.id = e.class_id
             WHERE e.student_id = ? AND e.academic_year_id = ? AND e.status = 'active'
             ORDER BY e.rowid
             LIMIT 1",
            (student_id, academic_year_id),
            |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
        )
        .optional()
        .map_err(crate::grading::EngineError::db)?;
    row.ok_or_else(|| crate::grading::EngineError::not_found("active enrollment"))
}

fn handle_progress_evaluate(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let student_id = match required_str(req, "studentId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let academic_year_id = match required_str(req, "academicYearId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let force = req
        .params
        .get("force")
        .and_then(|v| v.as_bool())
        .unwrap_or(false);

    for (table, id, what) in [
        ("students", student_id.as_str(), "student"),
        ("academic_years", academic_year_id.as_str(), "academic year"),
    ] {
        if let Err(e) = require_row(conn, table, id, what) {
            return engine_err(req, e);
        }
    }

    let (class_id, year_level_id, school_id) =
        match enrollment_scope(conn, &student_id, &academic_year_id) {
            Ok(v) => v,
            Err(e) => return engine_err(req, e),
        };

    let mut record = match progress::find_or_create(
        conn,
        &school_id,
        &student_id,
        &academic_year_id,
        &class_id,
        &year_level_id,
    ) {
        Ok(v) => v,
        Err(e) => return engine_err(req, e),
    };

    if let Err(e) = progress::update_from_marks(conn, &mut record, force) {
        return engine_err(req, e);
    }
    ok(&req.id, json!({ "progress": record }))
}

fn handle_progress_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let student_id = match required_str(req, "studentId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let academic_year_id = match required_str(req, "academicYearId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    match progress::load_progress(conn, &student_id, &academic_year_id) {
        Ok(Some(record)) => ok(&req.id, json!({ "progress": record })),
        Ok(None) => err(&req.id, "not_found", "academic progress not found", None),
        Err(e) => engine_err(req, e),
    }
}

fn handle_progress_review(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let student_id = match required_str(req, "studentId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let academic_year_id = match required_str(req, "academicYearId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let mut record = match progress::load_progress(conn, &student_id, &academic_year_id) {
        Ok(Some(v)) => v,
        Ok(None) => return err(&req.id, "not_found", "academic progress not found", None),
        Err(e) => return engine_err(req, e),
    };
    if let Err(e) = progress::mark_in_review(conn, &mut record) {
        return engine_err(req, e);
    }
    ok(&req.id, json!({ "progress": record }))
}

fn handle_council_decision(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let student_id = match required_str(req, "studentId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let academic_year_id = match required_str(req, "academicYearId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let decision = match required_str(req, "decision") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let user_id = match required_str(req, "userId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let observations = optional_str(req, "observations");

    let mut record = match progress::load_progress(conn, &student_id, &academic_year_id) {
        Ok(Some(v)) => v,
        Ok(None) => return err(&req.id, "not_found", "academic progress not found", None),
        Err(e) => return engine_err(req, e),
    };

    if let Err(e) = progress::apply_council_decision(
        conn,
        &mut record,
        &decision,
        &user_id,
        observations.as_deref(),
    ) {
        return engine_err(req, e);
    }

    tracing::info!(
        student = %student_id,
        year = %academic_year_id,
        decision = %decision,
        "progress finalized by council"
    );
    let _ = db::record_event(
        conn,
        "ProgressFinalized",
        &json!({
            "progressId": record.id,
            "studentId": student_id,
            "academicYearId": academic_year_id,
            "decision": decision,
            "decidedBy": user_id,
        }),
    );

    ok(&req.id, json!({ "progress": record }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "progress.evaluate" => Some(handle_progress_evaluate(state, req)),
        "progress.get" => Some(handle_progress_get(state, req)),
        "progress.review" => Some(handle_progress_review(state, req)),
        "progress.councilDecision" => Some(handle_council_decision(state, req)),
        _ => None,
    }
}
