use rusqlite::{Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

pub const DEFAULT_MIN_GRADE_TO_PASS: f64 = 6.0;

/// Display rounding used across the engine: two decimal places.
/// Pass/fail comparisons always use the unrounded value.
pub fn round2(x: f64) -> f64 {
    (x * 100.0).round() / 100.0
}

#[derive(Debug, Clone, Serialize)]
pub struct EngineError {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl EngineError {
    pub fn new(code: &str, message: impl Into<String>) -> Self {
        Self {
            code: code.to_string(),
            message: message.into(),
            details: None,
        }
    }

    pub fn not_found(what: &str) -> Self {
        Self::new("not_found", format!("{} not found", what))
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new("validation_failed", message)
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new("conflict", message)
    }

    pub fn db(e: rusqlite::Error) -> Self {
        Self::new("db_query_failed", e.to_string())
    }
}

/// One graded event, as loaded from the mark store.
#[derive(Debug, Clone)]
pub struct MarkRow {
    pub id: String,
    pub period: Option<String>,
    pub grade: f64,
    pub weight: f64,
    pub date: String,
    pub is_recovery: bool,
    /// Insertion order; tie-break for recovery marks sharing a date.
    pub seq: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinalStatus {
    Approved,
    Failed,
    Pending,
    Recovery,
    Exempted,
}

impl FinalStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            FinalStatus::Approved => "approved",
            FinalStatus::Failed => "failed",
            FinalStatus::Pending => "pending",
            FinalStatus::Recovery => "recovery",
            FinalStatus::Exempted => "exempted",
        }
    }
}

/// Pass/fail determination for one student in one subject in one year.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubjectApprovalResult {
    pub subject_id: String,
    pub subject_name: String,
    pub regular_average: f64,
    pub recovery_grade: Option<f64>,
    pub final_average: f64,
    pub min_grade_to_pass: f64,
    pub approved: bool,
    pub final_status: String,
    pub mark_count: usize,
}

/// Weighted-average outcome for one mark set, before any approval threshold.
#[derive(Debug, Clone, PartialEq)]
pub struct Aggregation {
    pub regular_average: f64,
    pub recovery_grade: Option<f64>,
    pub final_average: f64,
    pub regular_count: usize,
    pub recovery_count: usize,
}

pub fn weighted_average<'a, I>(marks: I) -> f64
where
    I: IntoIterator<Item = &'a MarkRow>,
{
    let mut sum = 0.0_f64;
    let mut denom = 0.0_f64;
    for m in marks {
        sum += m.grade * m.weight;
        denom += m.weight;
    }
    if denom > 0.0 {
        sum / denom
    } else {
        0.0
    }
}

/// Core remediation policy. Regular marks form the regular average; when that
/// average misses the threshold and recovery marks exist, the most recent
/// recovery mark (date descending, insertion order descending on ties)
/// replaces half of the final average.
pub fn aggregate(marks: &[MarkRow], min_grade_to_pass: f64) -> Aggregation {
    let regular: Vec<&MarkRow> = marks.iter().filter(|m| !m.is_recovery).collect();
    let mut recovery: Vec<&MarkRow> = marks.iter().filter(|m| m.is_recovery).collect();

    let regular_average = weighted_average(regular.iter().copied());

    recovery.sort_by(|a, b| match b.date.cmp(&a.date) {
        Ordering::Equal => b.seq.cmp(&a.seq),
        other => other,
    });

    let (recovery_grade, final_average) =
        if regular_average < min_grade_to_pass && !recovery.is_empty() {
            let grade = recovery[0].grade;
            (Some(grade), (regular_average + grade) / 2.0)
        } else {
            (None, regular_average)
        };

    Aggregation {
        regular_average,
        recovery_grade,
        final_average,
        regular_count: regular.len(),
        recovery_count: recovery.len(),
    }
}

/// One weighted average per evaluation period, for report rendering.
/// Only regular marks participate; periods come out in label order.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PeriodAverage {
    pub period: String,
    pub average: f64,
    pub mark_count: usize,
}

pub fn period_averages(marks: &[MarkRow]) -> Vec<PeriodAverage> {
    let mut periods: Vec<String> = Vec::new();
    for m in marks.iter().filter(|m| !m.is_recovery) {
        let label = m.period.clone().unwrap_or_default();
        if !periods.contains(&label) {
            periods.push(label);
        }
    }
    periods.sort();

    periods
        .into_iter()
        .map(|label| {
            let subset: Vec<&MarkRow> = marks
                .iter()
                .filter(|m| !m.is_recovery && m.period.clone().unwrap_or_default() == label)
                .collect();
            PeriodAverage {
                period: label,
                average: round2(weighted_average(subset.iter().copied())),
                mark_count: subset.len(),
            }
        })
        .collect()
}

#[derive(Debug, Clone)]
pub struct GradeContext<'a> {
    pub conn: &'a Connection,
    pub student_id: &'a str,
    pub subject_id: &'a str,
    pub academic_year_id: &'a str,
}

#[derive(Debug, Clone)]
pub struct SubjectConfig {
    pub name: String,
    pub min_grade_to_pass: f64,
}

pub fn load_subject_config(
    conn: &Connection,
    subject_id: &str,
) -> Result<SubjectConfig, EngineError> {
    let row: Option<(String, Option<f64>)> = conn
        .query_row(
            "SELECT name, min_grade_to_pass FROM subjects WHERE id = ?",
            [subject_id],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .optional()
        .map_err(EngineError::db)?;
    let Some((name, min_grade)) = row else {
        return Err(EngineError::not_found("subject"));
    };
    Ok(SubjectConfig {
        name,
        min_grade_to_pass: min_grade.unwrap_or(DEFAULT_MIN_GRADE_TO_PASS),
    })
}

/// Loads published marks for one (student, subject, year), optionally
/// restricted to one evaluation period.
pub fn load_marks(
    ctx: &GradeContext<'_>,
    period: Option<&str>,
) -> Result<Vec<MarkRow>, EngineError> {
    let sql = "SELECT id, period, grade, weight, date, is_recovery, rowid
               FROM marks
               WHERE student_id = ? AND subject_id = ? AND academic_year_id = ?
                 AND status = 'published'
               ORDER BY date, rowid";
    let mut stmt = ctx.conn.prepare(sql).map_err(EngineError::db)?;
    let rows = stmt
        .query_map(
            (ctx.student_id, ctx.subject_id, ctx.academic_year_id),
            |r| {
                Ok(MarkRow {
                    id: r.get(0)?,
                    period: r.get(1)?,
                    grade: r.get(2)?,
                    weight: r.get(3)?,
                    date: r.get(4)?,
                    is_recovery: r.get::<_, i64>(5)? != 0,
                    seq: r.get(6)?,
                })
            },
        )
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(EngineError::db)?;

    Ok(match period {
        Some(p) => rows
            .into_iter()
            .filter(|m| m.period.as_deref() == Some(p))
            .collect(),
        None => rows,
    })
}

/// Subject approval: aggregator output held against the subject's passing
/// threshold. A subject with zero marks is `pending`, never `failed`.
pub fn evaluate_subject(ctx: &GradeContext<'_>) -> Result<SubjectApprovalResult, EngineError> {
    let config = load_subject_config(ctx.conn, ctx.subject_id)?;
    let marks = load_marks(ctx, None)?;
    Ok(approval_from_marks(
        ctx.subject_id,
        &config.name,
        &marks,
        config.min_grade_to_pass,
    ))
}

pub fn approval_from_marks(
    subject_id: &str,
    subject_name: &str,
    marks: &[MarkRow],
    min_grade_to_pass: f64,
) -> SubjectApprovalResult {
    let agg = aggregate(marks, min_grade_to_pass);
    let approved = !marks.is_empty() && agg.final_average >= min_grade_to_pass;
    let final_status = if marks.is_empty() {
        FinalStatus::Pending
    } else if approved {
        FinalStatus::Approved
    } else {
        FinalStatus::Failed
    };

    SubjectApprovalResult {
        subject_id: subject_id.to_string(),
        subject_name: subject_name.to_string(),
        regular_average: round2(agg.regular_average),
        recovery_grade: agg.recovery_grade.map(round2),
        final_average: round2(agg.final_average),
        min_grade_to_pass,
        approved,
        final_status: final_status.as_str().to_string(),
        mark_count: marks.len(),
    }
}
