use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{db_conn, engine_err, optional_str, required_str, require_row};
use crate::ipc::types::{AppState, Request};
use rusqlite::OptionalExtension;
use serde_json::json;
use uuid::Uuid;

const EVAL_TYPES: &[&str] = &[
    "exam",
    "assignment",
    "participation",
    "project",
    "recovery",
    "other",
];

fn validate_grade(req: &Request, grade: f64) -> Option<serde_json::Value> {
    if !(0.0..=10.0).contains(&grade) {
        return Some(err(
            &req.id,
            "validation_failed",
            "grade must be in [0,10]",
            Some(json!({ "grade": grade })),
        ));
    }
    None
}

fn validate_weight(req: &Request, weight: f64) -> Option<serde_json::Value> {
    if weight <= 0.0 {
        return Some(err(
            &req.id,
            "validation_failed",
            "weight must be > 0",
            Some(json!({ "weight": weight })),
        ));
    }
    None
}

fn handle_marks_record(state: &mut AppState, req: &Request) -> serde_json::Value {
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
    let class_id = match required_str(req, "classId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let academic_year_id = match required_str(req, "academicYearId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let title = match required_str(req, "title") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let Some(grade) = req.params.get("grade").and_then(|v| v.as_f64()) else {
        return err(&req.id, "bad_params", "missing grade", None);
    };
    if let Some(e) = validate_grade(req, grade) {
        return e;
    }
    let weight = req
        .params
        .get("weight")
        .and_then(|v| v.as_f64())
        .unwrap_or(1.0);
    if let Some(e) = validate_weight(req, weight) {
        return e;
    }

    let eval_type = optional_str(req, "evalType").unwrap_or_else(|| "exam".to_string());
    if !EVAL_TYPES.contains(&eval_type.as_str()) {
        return err(
            &req.id,
            "bad_params",
            format!("evalType must be one of: {}", EVAL_TYPES.join(", ")),
            Some(json!({ "evalType": eval_type })),
        );
    }
    let is_recovery = req
        .params
        .get("isRecovery")
        .and_then(|v| v.as_bool())
        .unwrap_or(false)
        || eval_type == "recovery";

    let status = optional_str(req, "status").unwrap_or_else(|| "published".to_string());
    if !matches!(status.as_str(), "draft" | "published") {
        return err(
            &req.id,
            "bad_params",
            "status must be one of: draft, published",
            Some(json!({ "status": status })),
        );
    }

    let date = optional_str(req, "date")
        .unwrap_or_else(|| chrono::Utc::now().format("%Y-%m-%d").to_string());

    for (table, id, what) in [
        ("students", student_id.as_str(), "student"),
        ("subjects", subject_id.as_str(), "subject"),
        ("classes", class_id.as_str(), "class"),
        ("academic_years", academic_year_id.as_str(), "academic year"),
    ] {
        if let Err(e) = require_row(conn, table, id, what) {
            return engine_err(req, e);
        }
    }

    let school_id: String = match conn.query_row(
        "SELECT school_id FROM classes WHERE id = ?",
        [&class_id],
        |r| r.get(0),
    ) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let mark_id = Uuid::new_v4().to_string();
    if let Err(e) = conn.execute(
        "INSERT INTO marks(id, school_id, student_id, subject_id, class_id, academic_year_id,
            period, eval_type, title, grade, weight, date, is_recovery, status, comments)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        rusqlite::params![
            mark_id,
            school_id,
            student_id,
            subject_id,
            class_id,
            academic_year_id,
            optional_str(req, "period"),
            eval_type,
            title,
            grade,
            weight,
            date,
            is_recovery as i64,
            status,
            optional_str(req, "comments"),
        ],
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "marks" })),
        );
    }

    let _ = db::record_event(
        conn,
        "MarkRecorded",
        &json!({
            "markId": mark_id,
            "studentId": student_id,
            "subjectId": subject_id,
            "grade": grade,
            "isRecovery": is_recovery,
        }),
    );

    ok(&req.id, json!({ "markId": mark_id }))
}

fn handle_marks_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let mark_id = match required_str(req, "markId") {
        Ok(v) => v,
        Err(e) => return e,
    };

    // Identity refs are fixed at creation.
    for key in ["studentId", "subjectId", "classId", "academicYearId", "schoolId"] {
        if req.params.get(key).is_some() {
            return err(
                &req.id,
                "bad_params",
                format!("{} is immutable after creation", key),
                None,
            );
        }
    }

    if let Err(e) = require_row(conn, "marks", &mark_id, "mark") {
        return engine_err(req, e);
    }

    // Validate every supplied field before touching the row, then write
    // once. A rejected request must leave the mark exactly as it was.
    let grade = req.params.get("grade").and_then(|v| v.as_f64());
    if let Some(g) = grade {
        if let Some(e) = validate_grade(req, g) {
            return e;
        }
    }
    let weight = req.params.get("weight").and_then(|v| v.as_f64());
    if let Some(w) = weight {
        if let Some(e) = validate_weight(req, w) {
            return e;
        }
    }
    let status = optional_str(req, "status");
    if let Some(s) = status.as_deref() {
        if !matches!(s, "draft" | "published") {
            return err(
                &req.id,
                "bad_params",
                "status must be one of: draft, published",
                Some(json!({ "status": s })),
            );
        }
    }
    let title = optional_str(req, "title");
    let comments = optional_str(req, "comments");

    let mut sets: Vec<&str> = Vec::new();
    let mut values: Vec<rusqlite::types::Value> = Vec::new();
    if let Some(g) = grade {
        sets.push("grade = ?");
        values.push(g.into());
    }
    if let Some(w) = weight {
        sets.push("weight = ?");
        values.push(w.into());
    }
    if let Some(s) = status {
        sets.push("status = ?");
        values.push(s.into());
    }
    if let Some(t) = title {
        sets.push("title = ?");
        values.push(t.into());
    }
    if let Some(c) = comments {
        sets.push("comments = ?");
        values.push(c.into());
    }
    if sets.is_empty() {
        return ok(&req.id, json!({ "ok": true }));
    }
    values.push(mark_id.into());
    let sql = format!("UPDATE marks SET {} WHERE id = ?", sets.join(", "));
    if let Err(e) = conn.execute(&sql, rusqlite::params_from_iter(values)) {
        return err(&req.id, "db_query_failed", e.to_string(), None);
    }

    ok(&req.id, json!({ "ok": true }))
}

fn handle_marks_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };

    let mut clauses: Vec<&str> = Vec::new();
    let mut values: Vec<String> = Vec::new();
    for (key, column) in [
        ("studentId", "student_id"),
        ("subjectId", "subject_id"),
        ("classId", "class_id"),
        ("academicYearId", "academic_year_id"),
        ("period", "period"),
    ] {
        if let Some(v) = optional_str(req, key) {
            clauses.push(column);
            values.push(v);
        }
    }
    let where_sql = if clauses.is_empty() {
        String::new()
    } else {
        format!(
            " WHERE {}",
            clauses
                .iter()
                .map(|c| format!("{} = ?", c))
                .collect::<Vec<_>>()
                .join(" AND ")
        )
    };
    let sql = format!(
        "SELECT id, student_id, subject_id, class_id, academic_year_id, period,
                eval_type, title, grade, weight, date, is_recovery, status, comments
         FROM marks{} ORDER BY date, rowid",
        where_sql
    );

    let mut stmt = match conn.prepare(&sql) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let rows = stmt
        .query_map(
            rusqlite::params_from_iter(values.iter().map(|v| rusqlite::types::Value::Text(v.clone()))),
            |r| {
                Ok(json!({
                    "id": r.get::<_, String>(0)?,
                    "studentId": r.get::<_, String>(1)?,
                    "subjectId": r.get::<_, String>(2)?,
                    "classId": r.get::<_, String>(3)?,
                    "academicYearId": r.get::<_, String>(4)?,
                    "period": r.get::<_, Option<String>>(5)?,
                    "evalType": r.get::<_, String>(6)?,
                    "title": r.get::<_, String>(7)?,
                    "grade": r.get::<_, f64>(8)?,
                    "weight": r.get::<_, f64>(9)?,
                    "date": r.get::<_, String>(10)?,
                    "isRecovery": r.get::<_, i64>(11)? != 0,
                    "status": r.get::<_, String>(12)?,
                    "comments": r.get::<_, Option<String>>(13)?,
                }))
            },
        )
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(marks) => ok(&req.id, json!({ "marks": marks })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_marks_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let mark_id = match required_str(req, "markId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let exists: Option<i64> = match conn
        .query_row("SELECT 1 FROM marks WHERE id = ?", [&mark_id], |r| r.get(0))
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if exists.is_none() {
        return err(&req.id, "not_found", "mark not found", None);
    }
    if let Err(e) = conn.execute("DELETE FROM marks WHERE id = ?", [&mark_id]) {
        return err(&req.id, "db_query_failed", e.to_string(), None);
    }
    ok(&req.id, json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "marks.record" => Some(handle_marks_record(state, req)),
        "marks.update" => Some(handle_marks_update(state, req)),
        "marks.list" => Some(handle_marks_list(state, req)),
        "marks.delete" => Some(handle_marks_delete(state, req)),
        _ => None,
    }
}
