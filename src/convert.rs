use rusqlite::{Connection, OptionalExtension};
use serde::{Deserialize, Serialize};

use crate::grading::{EngineError, DEFAULT_MIN_GRADE_TO_PASS};

fn default_min() -> f64 {
    0.0
}
fn default_max() -> f64 {
    10.0
}
fn default_passing_grade() -> f64 {
    DEFAULT_MIN_GRADE_TO_PASS
}
fn default_decimal_places() -> u32 {
    1
}
fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Concept {
    pub symbol: String,
    #[serde(default)]
    pub description: String,
    pub min: f64,
    pub max: f64,
    pub passing: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PerformanceLevel {
    pub name: String,
    pub value: f64,
    pub passing: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DescriptiveCategory {
    pub name: String,
    #[serde(default)]
    pub weight: f64,
}

/// How a school renders a raw numeric grade. One variant per notation; the
/// converter dispatch is exhaustive over this union.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum SystemConfig {
    #[serde(rename_all = "camelCase")]
    Numeric {
        #[serde(default = "default_min")]
        min: f64,
        #[serde(default = "default_max")]
        max: f64,
        #[serde(default = "default_passing_grade")]
        passing_grade: f64,
        #[serde(default = "default_decimal_places")]
        decimal_places: u32,
        #[serde(default = "default_true")]
        allow_fractions: bool,
    },
    #[serde(rename_all = "camelCase")]
    Conceptual {
        concepts: Vec<Concept>,
        #[serde(default = "default_decimal_places")]
        decimal_places: u32,
    },
    #[serde(rename_all = "camelCase")]
    Descriptive {
        #[serde(default)]
        categories: Vec<DescriptiveCategory>,
        performance_levels: Vec<PerformanceLevel>,
        #[serde(default = "default_decimal_places")]
        decimal_places: u32,
    },
    #[serde(rename_all = "camelCase")]
    Custom {
        #[serde(default)]
        config: serde_json::Value,
    },
}

impl SystemConfig {
    pub fn type_name(&self) -> &'static str {
        match self {
            SystemConfig::Numeric { .. } => "numeric",
            SystemConfig::Conceptual { .. } => "conceptual",
            SystemConfig::Descriptive { .. } => "descriptive",
            SystemConfig::Custom { .. } => "custom",
        }
    }

    pub fn decimal_places(&self) -> u32 {
        match self {
            SystemConfig::Numeric { decimal_places, .. }
            | SystemConfig::Conceptual { decimal_places, .. }
            | SystemConfig::Descriptive { decimal_places, .. } => *decimal_places,
            SystemConfig::Custom { .. } => default_decimal_places(),
        }
    }

    /// Rejected at creation time, before any conversion can run.
    pub fn validate(&self) -> Result<(), EngineError> {
        if self.decimal_places() > 6 {
            return Err(EngineError::validation(
                "decimalPlaces must be at most 6",
            ));
        }
        match self {
            SystemConfig::Numeric { min, max, .. } => {
                if min >= max {
                    return Err(EngineError::validation("numeric system requires min < max"));
                }
            }
            SystemConfig::Conceptual { concepts, .. } => {
                if concepts.is_empty() {
                    return Err(EngineError::validation(
                        "conceptual system requires at least one concept",
                    ));
                }
                for c in concepts {
                    if c.min > c.max {
                        return Err(EngineError::validation(format!(
                            "concept {} has min > max",
                            c.symbol
                        )));
                    }
                }
            }
            SystemConfig::Descriptive {
                performance_levels, ..
            } => {
                if performance_levels.is_empty() {
                    return Err(EngineError::validation(
                        "descriptive system requires at least one performance level",
                    ));
                }
            }
            SystemConfig::Custom { .. } => {}
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Conversion {
    pub value: f64,
    pub display: String,
    pub passing: bool,
}

fn round_to(x: f64, places: u32) -> f64 {
    let f = 10_f64.powi(places as i32);
    (x * f).round() / f
}

fn format_numeric(v: f64, places: u32) -> String {
    format!("{:.*}", places as usize, v)
}

/// Resolves the raw input into a numeric grade: numbers (or numeric strings)
/// pass through; otherwise a symbolic lookup against the system's concepts
/// or performance levels.
fn numeric_input(system: &SystemConfig, value: &serde_json::Value) -> Result<f64, EngineError> {
    if let Some(n) = value.as_f64() {
        return Ok(n);
    }
    if let Some(s) = value.as_str() {
        let trimmed = s.trim();
        if let Ok(n) = trimmed.parse::<f64>() {
            return Ok(n);
        }
        match system {
            SystemConfig::Conceptual { concepts, .. } => {
                if let Some(c) = concepts
                    .iter()
                    .find(|c| c.symbol.eq_ignore_ascii_case(trimmed))
                {
                    return Ok((c.min + c.max) / 2.0);
                }
            }
            SystemConfig::Descriptive {
                performance_levels, ..
            } => {
                if let Some(l) = performance_levels
                    .iter()
                    .find(|l| l.name.eq_ignore_ascii_case(trimmed))
                {
                    return Ok(l.value);
                }
            }
            _ => {}
        }
        return Err(EngineError::new(
            "bad_params",
            format!("value {:?} is neither numeric nor a known symbol", trimmed),
        ));
    }
    Err(EngineError::new(
        "bad_params",
        "value must be a number or a string",
    ))
}

pub fn convert(system: &SystemConfig, value: &serde_json::Value) -> Result<Conversion, EngineError> {
    let raw = numeric_input(system, value)?;
    let rounded = round_to(raw, system.decimal_places());

    let conversion = match system {
        SystemConfig::Numeric {
            passing_grade,
            decimal_places,
            ..
        } => Conversion {
            value: rounded,
            display: format_numeric(rounded, *decimal_places),
            passing: rounded >= *passing_grade,
        },
        SystemConfig::Conceptual {
            concepts,
            decimal_places,
        } => match concepts
            .iter()
            .find(|c| rounded >= c.min && rounded <= c.max)
        {
            Some(c) => Conversion {
                value: rounded,
                display: c.symbol.clone(),
                passing: c.passing,
            },
            // No range covers the value; fall through to the bare numeric check.
            None => Conversion {
                value: rounded,
                display: format_numeric(rounded, *decimal_places),
                passing: rounded >= DEFAULT_MIN_GRADE_TO_PASS,
            },
        },
        SystemConfig::Descriptive {
            performance_levels, ..
        } => {
            let mut best: Option<&PerformanceLevel> = None;
            for level in performance_levels {
                let better = match best {
                    None => true,
                    Some(b) => (rounded - level.value).abs() < (rounded - b.value).abs(),
                };
                if better {
                    best = Some(level);
                }
            }
            // validate() guarantees at least one level.
            let level = best.ok_or_else(|| {
                EngineError::validation("descriptive system has no performance levels")
            })?;
            Conversion {
                value: rounded,
                display: level.name.clone(),
                passing: level.passing,
            }
        }
        SystemConfig::Custom { .. } => Conversion {
            value: rounded,
            display: format_numeric(rounded, default_decimal_places()),
            passing: rounded >= DEFAULT_MIN_GRADE_TO_PASS,
        },
    };

    Ok(conversion)
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedSystem {
    pub id: String,
    pub name: String,
    #[serde(flatten)]
    pub config: SystemConfig,
}

fn query_one(
    conn: &Connection,
    sql: &str,
    params: &[&dyn rusqlite::ToSql],
) -> Result<Option<ResolvedSystem>, EngineError> {
    let row: Option<(String, String, String)> = conn
        .query_row(sql, params, |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)))
        .optional()
        .map_err(EngineError::db)?;
    let Some((id, name, config_json)) = row else {
        return Ok(None);
    };
    let config: SystemConfig = serde_json::from_str(&config_json)
        .map_err(|e| EngineError::validation(format!("stored system config is invalid: {}", e)))?;
    Ok(Some(ResolvedSystem { id, name, config }))
}

/// Lookup order for the applicable system: subject-specific, then year-level,
/// then educational segment, then the school default (no scoping), then any
/// active system for the school.
pub fn find_applicable(
    conn: &Connection,
    school_id: &str,
    subject_id: Option<&str>,
    year_level_id: Option<&str>,
    academic_year_id: Option<&str>,
    segment: Option<&str>,
) -> Result<Option<ResolvedSystem>, EngineError> {
    let year_clause = "(academic_year_id IS NULL OR academic_year_id = ?)";
    let year_param = academic_year_id.unwrap_or("");

    if let Some(subject_id) = subject_id {
        let sql = format!(
            "SELECT id, name, config FROM evaluation_systems
             WHERE school_id = ? AND active = 1 AND subject_id = ? AND {}
             ORDER BY rowid LIMIT 1",
            year_clause
        );
        if let Some(found) = query_one(conn, &sql, &[&school_id, &subject_id, &year_param])? {
            return Ok(Some(found));
        }
    }

    if let Some(year_level_id) = year_level_id {
        let sql = format!(
            "SELECT id, name, config FROM evaluation_systems
             WHERE school_id = ? AND active = 1 AND subject_id IS NULL
               AND year_level_id = ? AND {}
             ORDER BY rowid LIMIT 1",
            year_clause
        );
        if let Some(found) = query_one(conn, &sql, &[&school_id, &year_level_id, &year_param])? {
            return Ok(Some(found));
        }
    }

    if let Some(segment) = segment {
        let sql = format!(
            "SELECT id, name, config FROM evaluation_systems
             WHERE school_id = ? AND active = 1 AND subject_id IS NULL
               AND year_level_id IS NULL AND segment = ? AND {}
             ORDER BY rowid LIMIT 1",
            year_clause
        );
        if let Some(found) = query_one(conn, &sql, &[&school_id, &segment, &year_param])? {
            return Ok(Some(found));
        }
    }

    let default_sql = "SELECT id, name, config FROM evaluation_systems
         WHERE school_id = ? AND active = 1 AND subject_id IS NULL
           AND year_level_id IS NULL AND segment IS NULL AND academic_year_id IS NULL
         ORDER BY rowid LIMIT 1";
    if let Some(found) = query_one(conn, default_sql, &[&school_id])? {
        return Ok(Some(found));
    }

    let any_sql = "SELECT id, name, config FROM evaluation_systems
         WHERE school_id = ? AND active = 1
         ORDER BY rowid LIMIT 1";
    query_one(conn, any_sql, &[&school_id])
}
