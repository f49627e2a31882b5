use crate::grading::{self, EngineError};
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{db_conn, engine_err, required_str, require_row};
use crate::ipc::types::{AppState, Request};
use crate::progress;
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use std::cmp::Ordering;

#[derive(Debug, Clone)]
struct EnrolledStudent {
    student_id: String,
    display_name: String,
}

/// Who counts in class rollups: active enrollments, in enrollment order.
fn active_students(
    conn: &Connection,
    class_id: &str,
) -> Result<Vec<EnrolledStudent>, EngineError> {
    let mut stmt = conn
        .prepare(
            "SELECT s.id, s.last_name, s.first_name
             FROM enrollments e
             JOIN students s ON s.id = e.student_id
             WHERE e.class_id = ? AND e.status = 'active'
             ORDER BY e.sort_order, e.rowid",
        )
        .map_err(EngineError::db)?;
    stmt.query_map([class_id], |r| {
        let last: String = r.get(1)?;
        let first: String = r.get(2)?;
        Ok(EnrolledStudent {
            student_id: r.get(0)?,
            display_name: format!("{}, {}", last, first),
        })
    })
    .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    .map_err(EngineError::db)
}

#[derive(Debug, Clone, Default)]
struct ClassStats {
    total_students: usize,
    evaluated: usize,
    approved: usize,
    failed: usize,
    pending: usize,
    recovery: usize,
    conditional: usize,
    sum_average: f64,
    skipped: usize,
}

impl ClassStats {
    fn absorb(&mut self, other: &ClassStats) {
        self.total_students += other.total_students;
        self.evaluated += other.evaluated;
        self.approved += other.approved;
        self.failed += other.failed;
        self.pending += other.pending;
        self.recovery += other.recovery;
        self.conditional += other.conditional;
        self.sum_average += other.sum_average;
        self.skipped += other.skipped;
    }

    fn average(&self) -> f64 {
        if self.evaluated > 0 {
            grading::round2(self.sum_average / self.evaluated as f64)
        } else {
            0.0
        }
    }

    fn approval_rate(&self) -> f64 {
        if self.total_students > 0 {
            grading::round2(100.0 * self.approved as f64 / self.total_students as f64)
        } else {
            0.0
        }
    }

    fn to_json(&self) -> serde_json::Value {
        json!({
            "totalStudents": self.total_students,
            "evaluated": self.evaluated,
            "counts": {
                "approved": self.approved,
                "failed": self.failed,
                "pending": self.pending,
                "recovery": self.recovery,
                "conditional": self.conditional,
            },
            "average": self.average(),
            "approvalRate": self.approval_rate(),
            "skipped": self.skipped,
        })
    }
}

/// Counts one class. A student with no progress record yet counts as
/// pending; a failing student never aborts the rollup.
fn class_stats(
    conn: &Connection,
    class_id: &str,
    academic_year_id: &str,
) -> Result<ClassStats, EngineError> {
    let students = active_students(conn, class_id)?;
    let mut stats = ClassStats {
        total_students: students.len(),
        ..Default::default()
    };

    for student in &students {
        let record = match progress::load_progress(conn, &student.student_id, academic_year_id) {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!(
                    student = %student.student_id,
                    code = %e.code,
                    "skipping student in class rollup: {}",
                    e.message
                );
                stats.skipped += 1;
                continue;
            }
        };
        match record {
            None => stats.pending += 1,
            Some(p) => {
                stats.evaluated += 1;
                stats.sum_average += p.overall_average;
                match p.overall_status.as_str() {
                    "approved" => stats.approved += 1,
                    "failed" => stats.failed += 1,
                    "recovery" => stats.recovery += 1,
                    "conditional" => stats.conditional += 1,
                    _ => stats.pending += 1,
                }
            }
        }
    }
    Ok(stats)
}

fn class_meta(
    conn: &Connection,
    class_id: &str,
) -> Result<(String, String, String), EngineError> {
    conn.query_row(
        "SELECT name, academic_year_id, year_level_id FROM classes WHERE id = ?",
        [class_id],
        |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
    )
    .optional()
    .map_err(EngineError::db)?
    .ok_or_else(|| EngineError::not_found("class"))
}

fn handle_report_class(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let class_id = match required_str(req, "classId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let (name, academic_year_id, _) = match class_meta(conn, &class_id) {
        Ok(v) => v,
        Err(e) => return engine_err(req, e),
    };
    match class_stats(conn, &class_id, &academic_year_id) {
        Ok(stats) => {
            let mut payload = stats.to_json();
            payload["classId"] = json!(class_id);
            payload["className"] = json!(name);
            ok(&req.id, payload)
        }
        Err(e) => engine_err(req, e),
    }
}

fn classes_in_level(
    conn: &Connection,
    year_level_id: &str,
    academic_year_id: &str,
) -> Result<Vec<String>, EngineError> {
    let mut stmt = conn
        .prepare(
            "SELECT id FROM classes
             WHERE year_level_id = ? AND academic_year_id = ?
             ORDER BY name, rowid",
        )
        .map_err(EngineError::db)?;
    stmt.query_map((year_level_id, academic_year_id), |r| r.get::<_, String>(0))
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(EngineError::db)
}

fn handle_report_year_level(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let year_level_id = match required_str(req, "yearLevelId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let academic_year_id = match required_str(req, "academicYearId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    for (table, id, what) in [
        ("year_levels", year_level_id.as_str(), "year level"),
        ("academic_years", academic_year_id.as_str(), "academic year"),
    ] {
        if let Err(e) = require_row(conn, table, id, what) {
            return engine_err(req, e);
        }
    }

    let class_ids = match classes_in_level(conn, &year_level_id, &academic_year_id) {
        Ok(v) => v,
        Err(e) => return engine_err(req, e),
    };
    let mut total = ClassStats::default();
    for class_id in &class_ids {
        match class_stats(conn, class_id, &academic_year_id) {
            Ok(stats) => total.absorb(&stats),
            Err(e) => {
                tracing::warn!(class = %class_id, "skipping class in level rollup: {}", e.message);
                total.skipped += 1;
            }
        }
    }

    let mut payload = total.to_json();
    payload["yearLevelId"] = json!(year_level_id);
    payload["academicYearId"] = json!(academic_year_id);
    payload["totalClasses"] = json!(class_ids.len());
    ok(&req.id, payload)
}

fn handle_report_school(state: &mut AppState, req: &Request) -> serde_json::Value {
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
    for (table, id, what) in [
        ("schools", school_id.as_str(), "school"),
        ("academic_years", academic_year_id.as_str(), "academic year"),
    ] {
        if let Err(e) = require_row(conn, table, id, what) {
            return engine_err(req, e);
        }
    }

    let rows: Result<Vec<(String, String)>, EngineError> = (|| {
        let mut stmt = conn
            .prepare(
                "SELECT id, year_level_id FROM classes
                 WHERE school_id = ? AND academic_year_id = ?
                 ORDER BY name, rowid",
            )
            .map_err(EngineError::db)?;
        stmt.query_map((&school_id, &academic_year_id), |r| {
            Ok((r.get::<_, String>(0)?, r.get::<_, String>(1)?))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(EngineError::db)
    })();
    let rows = match rows {
        Ok(v) => v,
        Err(e) => return engine_err(req, e),
    };

    let mut total = ClassStats::default();
    let mut levels: Vec<&str> = Vec::new();
    for (class_id, year_level_id) in &rows {
        if !levels.contains(&year_level_id.as_str()) {
            levels.push(year_level_id);
        }
        match class_stats(conn, class_id, &academic_year_id) {
            Ok(stats) => total.absorb(&stats),
            Err(e) => {
                tracing::warn!(class = %class_id, "skipping class in school rollup: {}", e.message);
                total.skipped += 1;
            }
        }
    }

    let mut payload = total.to_json();
    payload["schoolId"] = json!(school_id);
    payload["academicYearId"] = json!(academic_year_id);
    payload["totalClasses"] = json!(rows.len());
    payload["totalYearLevels"] = json!(levels.len());
    ok(&req.id, payload)
}

fn handle_report_subject(state: &mut AppState, req: &Request) -> serde_json::Value {
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
    let (_, academic_year_id, _) = match class_meta(conn, &class_id) {
        Ok(v) => v,
        Err(e) => return engine_err(req, e),
    };
    if let Err(e) = require_row(conn, "subjects", &subject_id, "subject") {
        return engine_err(req, e);
    }

    let students = match active_students(conn, &class_id) {
        Ok(v) => v,
        Err(e) => return engine_err(req, e),
    };

    let mut rows: Vec<serde_json::Value> = Vec::new();
    let mut skipped = 0usize;
    for student in &students {
        let ctx = grading::GradeContext {
            conn,
            student_id: &student.student_id,
            subject_id: &subject_id,
            academic_year_id: &academic_year_id,
        };
        match grading::evaluate_subject(&ctx) {
            Ok(result) => {
                let mut row = json!(result);
                row["studentId"] = json!(student.student_id);
                row["displayName"] = json!(student.display_name);
                rows.push(row);
            }
            Err(e) => {
                tracing::warn!(
                    student = %student.student_id,
                    "skipping student in subject report: {}",
                    e.message
                );
                skipped += 1;
            }
        }
    }

    // Stable sort: ties keep enrollment order.
    rows.sort_by(|a, b| {
        let fa = a.get("finalAverage").and_then(|v| v.as_f64()).unwrap_or(0.0);
        let fb = b.get("finalAverage").and_then(|v| v.as_f64()).unwrap_or(0.0);
        fb.partial_cmp(&fa).unwrap_or(Ordering::Equal)
    });

    ok(
        &req.id,
        json!({
            "classId": class_id,
            "subjectId": subject_id,
            "academicYearId": academic_year_id,
            "rows": rows,
            "skipped": skipped,
        }),
    )
}

const DEFAULT_AT_RISK_THRESHOLD: usize = 2;

fn handle_report_at_risk(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let class_id = match required_str(req, "classId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let threshold = match req.params.get("threshold") {
        None => DEFAULT_AT_RISK_THRESHOLD,
        Some(v) => match v.as_u64() {
            Some(n) if n >= 1 => n as usize,
            _ => {
                return err(
                    &req.id,
                    "bad_params",
                    "threshold must be a positive integer",
                    Some(json!({ "threshold": v })),
                )
            }
        },
    };
    let (_, academic_year_id, _) = match class_meta(conn, &class_id) {
        Ok(v) => v,
        Err(e) => return engine_err(req, e),
    };

    let subjects = match progress::class_subjects(conn, &class_id) {
        Ok(v) => v,
        Err(e) => return engine_err(req, e),
    };
    let students = match active_students(conn, &class_id) {
        Ok(v) => v,
        Err(e) => return engine_err(req, e),
    };

    let mut at_risk: Vec<(usize, serde_json::Value)> = Vec::new();
    let mut skipped = 0usize;
    for student in &students {
        let mut failed_subjects: Vec<String> = Vec::new();
        let mut failure = false;
        for subject in &subjects {
            let ctx = grading::GradeContext {
                conn,
                student_id: &student.student_id,
                subject_id: &subject.id,
                academic_year_id: &academic_year_id,
            };
            let marks = match grading::load_marks(&ctx, None) {
                Ok(v) => v,
                Err(e) => {
                    tracing::warn!(
                        student = %student.student_id,
                        subject = %subject.id,
                        "skipping student in at-risk scan: {}",
                        e.message
                    );
                    failure = true;
                    break;
                }
            };
            let result = grading::approval_from_marks(
                &subject.id,
                &subject.name,
                &marks,
                subject.min_grade_to_pass,
            );
            if result.final_status == "failed" {
                failed_subjects.push(subject.name.clone());
            }
        }
        if failure {
            skipped += 1;
            continue;
        }

        let failed_count = failed_subjects.len();
        if failed_count >= threshold {
            let total_subjects = subjects.len();
            let failure_rate = if total_subjects > 0 {
                grading::round2(100.0 * failed_count as f64 / total_subjects as f64)
            } else {
                0.0
            };
            at_risk.push((
                failed_count,
                json!({
                    "studentId": student.student_id,
                    "displayName": student.display_name,
                    "failedCount": failed_count,
                    "totalSubjects": total_subjects,
                    "failureRate": failure_rate,
                    "failedSubjects": failed_subjects,
                }),
            ));
        }
    }

    // Worst first; stable on ties.
    at_risk.sort_by(|a, b| b.0.cmp(&a.0));
    let students_json: Vec<serde_json::Value> = at_risk.into_iter().map(|(_, v)| v).collect();

    ok(
        &req.id,
        json!({
            "classId": class_id,
            "academicYearId": academic_year_id,
            "threshold": threshold,
            "students": students_json,
            "skipped": skipped,
        }),
    )
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "reports.class" => Some(handle_report_class(state, req)),
        "reports.yearLevel" => Some(handle_report_year_level(state, req)),
        "reports.school" => Some(handle_report_school(state, req)),
        "reports.subject" => Some(handle_report_subject(state, req)),
        "reports.atRisk" => Some(handle_report_at_risk(state, req)),
        _ => None,
    }
}
