use chrono::Utc;
use rusqlite::{Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::grading::{
    approval_from_marks, load_marks, round2, EngineError, GradeContext, SubjectApprovalResult,
    DEFAULT_MIN_GRADE_TO_PASS,
};

pub const STATUS_DRAFT: &str = "draft";
pub const STATUS_IN_REVIEW: &str = "in_review";
pub const STATUS_FINAL: &str = "final";

/// The per-student, per-year aggregate of all subject approvals and the
/// promotion decision. Unique per (student, academic year).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressRecord {
    pub id: String,
    pub school_id: String,
    pub student_id: String,
    pub academic_year_id: String,
    pub class_id: String,
    pub year_level_id: String,
    pub subject_results: Vec<SubjectApprovalResult>,
    pub overall_status: String,
    pub promoted_to_next_level: bool,
    pub next_year_level_id: Option<String>,
    pub overall_average: f64,
    pub approval_percentage: f64,
    pub evaluation_date: Option<String>,
    pub evaluated_by: Option<String>,
    pub reviewed_by_council: bool,
    pub council_decision: String,
    pub council_date: Option<String>,
    pub observations: Option<String>,
    pub status: String,
    pub version: i64,
}

/// Overall numbers derived from a set of subject results.
#[derive(Debug, Clone, PartialEq)]
pub struct OverallSummary {
    pub overall_average: f64,
    pub approval_percentage: f64,
    pub overall_status: &'static str,
    pub promoted: bool,
}

/// Consolidates subject results into the promotion decision. All subjects
/// approved (and at least one subject) promotes; a year with no recorded
/// marks at all stays pending rather than failing the student.
pub fn summarize_results(results: &[SubjectApprovalResult]) -> OverallSummary {
    let total = results.len();
    if total == 0 {
        return OverallSummary {
            overall_average: 0.0,
            approval_percentage: 0.0,
            overall_status: "pending",
            promoted: false,
        };
    }

    let sum: f64 = results.iter().map(|r| r.final_average).sum();
    let approved_count = results.iter().filter(|r| r.approved).count();
    let all_passed = approved_count == total;
    let all_pending = results.iter().all(|r| r.final_status == "pending");

    let overall_status = if all_pending {
        "pending"
    } else if all_passed {
        "approved"
    } else {
        "failed"
    };

    OverallSummary {
        overall_average: round2(sum / total as f64),
        approval_percentage: round2(100.0 * approved_count as f64 / total as f64),
        overall_status,
        promoted: all_passed,
    }
}

/// Fixed mapping from a council decision to (overall status, promoted).
pub fn council_outcome(decision: &str) -> Result<(&'static str, bool), EngineError> {
    match decision {
        "approved" => Ok(("approved", true)),
        "failed" => Ok(("failed", false)),
        "conditional" => Ok(("conditional", true)),
        other => Err(EngineError::validation(format!(
            "councilDecision must be one of: approved, failed, conditional (got {})",
            other
        ))),
    }
}

fn row_to_record(r: &rusqlite::Row<'_>) -> rusqlite::Result<ProgressRecord> {
    let subject_results_json: String = r.get(6)?;
    // A blob that no longer parses must not be read back as an empty
    // result set; a later save would persist the loss.
    let subject_results: Vec<SubjectApprovalResult> = serde_json::from_str(&subject_results_json)
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(6, rusqlite::types::Type::Text, Box::new(e))
        })?;
    Ok(ProgressRecord {
        id: r.get(0)?,
        school_id: r.get(1)?,
        student_id: r.get(2)?,
        academic_year_id: r.get(3)?,
        class_id: r.get(4)?,
        year_level_id: r.get(5)?,
        subject_results,
        overall_status: r.get(7)?,
        promoted_to_next_level: r.get::<_, i64>(8)? != 0,
        next_year_level_id: r.get(9)?,
        overall_average: r.get(10)?,
        approval_percentage: r.get(11)?,
        evaluation_date: r.get(12)?,
        evaluated_by: r.get(13)?,
        reviewed_by_council: r.get::<_, i64>(14)? != 0,
        council_decision: r.get(15)?,
        council_date: r.get(16)?,
        observations: r.get(17)?,
        status: r.get(18)?,
        version: r.get(19)?,
    })
}

const PROGRESS_COLUMNS: &str = "id, school_id, student_id, academic_year_id, class_id,
    year_level_id, subject_results, overall_status, promoted, next_year_level_id,
    overall_average, approval_percentage, evaluation_date, evaluated_by,
    reviewed_by_council, council_decision, council_date, observations, status, version";

pub fn load_progress(
    conn: &Connection,
    student_id: &str,
    academic_year_id: &str,
) -> Result<Option<ProgressRecord>, EngineError> {
    let sql = format!(
        "SELECT {} FROM academic_progress WHERE student_id = ? AND academic_year_id = ?",
        PROGRESS_COLUMNS
    );
    conn.query_row(&sql, (student_id, academic_year_id), |r| row_to_record(r))
        .optional()
        .map_err(EngineError::db)
}

pub fn load_progress_by_id(
    conn: &Connection,
    progress_id: &str,
) -> Result<ProgressRecord, EngineError> {
    let sql = format!("SELECT {} FROM academic_progress WHERE id = ?", PROGRESS_COLUMNS);
    conn.query_row(&sql, [progress_id], |r| row_to_record(r))
        .optional()
        .map_err(EngineError::db)?
        .ok_or_else(|| EngineError::not_found("academic progress"))
}

/// Lazily creates the record on first evaluation request.
pub fn find_or_create(
    conn: &Connection,
    school_id: &str,
    student_id: &str,
    academic_year_id: &str,
    class_id: &str,
    year_level_id: &str,
) -> Result<ProgressRecord, EngineError> {
    if let Some(existing) = load_progress(conn, student_id, academic_year_id)? {
        return Ok(existing);
    }

    let id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO academic_progress(id, school_id, student_id, academic_year_id,
            class_id, year_level_id)
         VALUES(?, ?, ?, ?, ?, ?)",
        (&id, school_id, student_id, academic_year_id, class_id, year_level_id),
    )
    .map_err(|e| match e {
        rusqlite::Error::SqliteFailure(f, _)
            if f.code == rusqlite::ErrorCode::ConstraintViolation =>
        {
            EngineError::conflict("academic progress already exists for this student and year")
        }
        other => EngineError::new("db_insert_failed", other.to_string()),
    })?;

    load_progress_by_id(conn, &id)
}

#[derive(Debug, Clone)]
pub struct ClassSubject {
    pub id: String,
    pub name: String,
    pub min_grade_to_pass: f64,
}

/// Subjects attached to a class, in stable listing order.
pub fn class_subjects(conn: &Connection, class_id: &str) -> Result<Vec<ClassSubject>, EngineError> {
    let mut stmt = conn
        .prepare(
            "SELECT s.id, s.name, s.min_grade_to_pass
             FROM class_subjects cs
             JOIN subjects s ON s.id = cs.subject_id
             WHERE cs.class_id = ?
             ORDER BY cs.sort_order, cs.rowid",
        )
        .map_err(EngineError::db)?;
    stmt.query_map([class_id], |r| {
        Ok(ClassSubject {
            id: r.get(0)?,
            name: r.get(1)?,
            min_grade_to_pass: r
                .get::<_, Option<f64>>(2)?
                .unwrap_or(DEFAULT_MIN_GRADE_TO_PASS),
        })
    })
    .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    .map_err(EngineError::db)
}

fn next_level_of(conn: &Connection, year_level_id: &str) -> Result<Option<String>, EngineError> {
    conn.query_row(
        "SELECT next_level_id FROM year_levels WHERE id = ?",
        [year_level_id],
        |r| r.get(0),
    )
    .optional()
    .map_err(EngineError::db)
    .map(|v| v.flatten())
}

/// Recomputes an AcademicProgress from the mark store. A record finalized by
/// a council decision is authoritative; recomputation against it is rejected
/// unless `force` is set.
pub fn update_from_marks(
    conn: &Connection,
    record: &mut ProgressRecord,
    force: bool,
) -> Result<(), EngineError> {
    if record.status == STATUS_FINAL && !force {
        return Err(EngineError::conflict(
            "progress is final after council review; pass force to recompute",
        ));
    }

    let subjects = class_subjects(conn, &record.class_id)?;
    let mut results: Vec<SubjectApprovalResult> = Vec::with_capacity(subjects.len());
    for subject in &subjects {
        let ctx = GradeContext {
            conn,
            student_id: &record.student_id,
            subject_id: &subject.id,
            academic_year_id: &record.academic_year_id,
        };
        let marks = load_marks(&ctx, None)?;
        results.push(approval_from_marks(
            &subject.id,
            &subject.name,
            &marks,
            subject.min_grade_to_pass,
        ));
    }

    let summary = summarize_results(&results);

    record.subject_results = results;
    record.overall_average = summary.overall_average;
    record.approval_percentage = summary.approval_percentage;
    record.overall_status = summary.overall_status.to_string();
    record.promoted_to_next_level = summary.promoted;
    record.next_year_level_id = if summary.promoted {
        next_level_of(conn, &record.year_level_id)?
    } else {
        None
    };
    record.evaluation_date = Some(Utc::now().to_rfc3339());

    save(conn, record)
}

/// The only transition into `final`. Terminal: later recomputation must not
/// override it. Idempotent in status-setting.
pub fn apply_council_decision(
    conn: &Connection,
    record: &mut ProgressRecord,
    decision: &str,
    user_id: &str,
    observations: Option<&str>,
) -> Result<(), EngineError> {
    let (overall_status, promoted) = council_outcome(decision)?;

    record.overall_status = overall_status.to_string();
    record.promoted_to_next_level = promoted;
    record.next_year_level_id = if promoted {
        next_level_of(conn, &record.year_level_id)?
    } else {
        None
    };
    record.reviewed_by_council = true;
    record.council_decision = decision.to_string();
    record.council_date = Some(Utc::now().to_rfc3339());
    record.evaluated_by = Some(user_id.to_string());
    if let Some(obs) = observations.map(str::trim).filter(|o| !o.is_empty()) {
        record.observations = Some(match record.observations.take() {
            Some(prev) => format!("{}\n{}", prev, obs),
            None => obs.to_string(),
        });
    }
    record.status = STATUS_FINAL.to_string();

    save(conn, record)
}

/// Administrative staging step before the council meets.
pub fn mark_in_review(conn: &Connection, record: &mut ProgressRecord) -> Result<(), EngineError> {
    if record.status == STATUS_FINAL {
        return Err(EngineError::conflict("progress is already final"));
    }
    record.status = STATUS_IN_REVIEW.to_string();
    save(conn, record)
}

/// Optimistic write: the version must still match what was read. A failed
/// check means a concurrent writer got there first.
fn save(conn: &Connection, record: &mut ProgressRecord) -> Result<(), EngineError> {
    let subject_results_json = serde_json::to_string(&record.subject_results)
        .map_err(|e| EngineError::new("encode_failed", e.to_string()))?;

    let updated = conn
        .execute(
            "UPDATE academic_progress SET
                subject_results = ?,
                overall_status = ?,
                promoted = ?,
                next_year_level_id = ?,
                overall_average = ?,
                approval_percentage = ?,
                evaluation_date = ?,
                evaluated_by = ?,
                reviewed_by_council = ?,
                council_decision = ?,
                council_date = ?,
                observations = ?,
                status = ?,
                version = version + 1
             WHERE id = ? AND version = ?",
            rusqlite::params![
                subject_results_json,
                record.overall_status,
                record.promoted_to_next_level as i64,
                record.next_year_level_id,
                record.overall_average,
                record.approval_percentage,
                record.evaluation_date,
                record.evaluated_by,
                record.reviewed_by_council as i64,
                record.council_decision,
                record.council_date,
                record.observations,
                record.status,
                record.id,
                record.version,
            ],
        )
        .map_err(EngineError::db)?;

    if updated == 0 {
        return Err(EngineError::conflict(
            "progress was modified concurrently; re-read and retry",
        ));
    }
    record.version += 1;
    Ok(())
}
