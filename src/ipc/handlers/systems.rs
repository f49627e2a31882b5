use crate::convert::{self, SystemConfig};
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{db_conn, engine_err, optional_str, required_str, require_row};
use crate::ipc::types::{AppState, Request};
use rusqlite::OptionalExtension;
use serde_json::json;
use uuid::Uuid;

fn parse_config(req: &Request) -> Result<SystemConfig, serde_json::Value> {
    let Some(raw) = req.params.get("config") else {
        return Err(err(&req.id, "bad_params", "missing config", None));
    };
    serde_json::from_value::<SystemConfig>(raw.clone()).map_err(|e| {
        err(
            &req.id,
            "validation_failed",
            format!("invalid system config: {}", e),
            None,
        )
    })
}

fn handle_systems_create(state: &mut AppState, req: &Request) -> serde_json::Value {
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
    let config = match parse_config(req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    if let Err(e) = config.validate() {
        return engine_err(req, e);
    }

    let subject_id = optional_str(req, "subjectId");
    if let Some(id) = subject_id.as_deref() {
        if let Err(e) = require_row(conn, "subjects", id, "subject") {
            return engine_err(req, e);
        }
    }
    let year_level_id = optional_str(req, "yearLevelId");
    if let Some(id) = year_level_id.as_deref() {
        if let Err(e) = require_row(conn, "year_levels", id, "year level") {
            return engine_err(req, e);
        }
    }

    let config_json = match serde_json::to_string(&config) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "encode_failed", e.to_string(), None),
    };

    let system_id = Uuid::new_v4().to_string();
    if let Err(e) = conn.execute(
        "INSERT INTO evaluation_systems(id, school_id, name, config,
            subject_id, year_level_id, academic_year_id, segment)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?)",
        rusqlite::params![
            system_id,
            school_id,
            name,
            config_json,
            subject_id,
            year_level_id,
            optional_str(req, "academicYearId"),
            optional_str(req, "segment"),
        ],
    ) {
        return err(&req.id, "db_insert_failed", e.to_string(), None);
    }

    ok(
        &req.id,
        json!({ "systemId": system_id, "type": config.type_name() }),
    )
}

fn handle_systems_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let school_id = match required_str(req, "schoolId") {
        Ok(v) => v,
        Err(e) => return e,
    };

    let mut stmt = match conn.prepare(
        "SELECT id, name, config, subject_id, year_level_id, academic_year_id, segment, active
         FROM evaluation_systems
         WHERE school_id = ?
         ORDER BY rowid",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let rows = stmt
        .query_map([&school_id], |r| {
            let config_json: String = r.get(2)?;
            let config: serde_json::Value =
                serde_json::from_str(&config_json).unwrap_or(serde_json::Value::Null);
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "name": r.get::<_, String>(1)?,
                "config": config,
                "subjectId": r.get::<_, Option<String>>(3)?,
                "yearLevelId": r.get::<_, Option<String>>(4)?,
                "academicYearId": r.get::<_, Option<String>>(5)?,
                "segment": r.get::<_, Option<String>>(6)?,
                "active": r.get::<_, i64>(7)? != 0,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(systems) => ok(&req.id, json!({ "systems": systems })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_systems_resolve(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let school_id = match required_str(req, "schoolId") {
        Ok(v) => v,
        Err(e) => return e,
    };

    let subject_id = optional_str(req, "subjectId");
    let year_level_id = optional_str(req, "yearLevelId");
    let academic_year_id = optional_str(req, "academicYearId");
    let segment = optional_str(req, "segment");

    match convert::find_applicable(
        conn,
        &school_id,
        subject_id.as_deref(),
        year_level_id.as_deref(),
        academic_year_id.as_deref(),
        segment.as_deref(),
    ) {
        Ok(Some(system)) => ok(&req.id, json!({ "system": system })),
        Ok(None) => err(
            &req.id,
            "not_found",
            "no applicable evaluation system",
            None,
        ),
        Err(e) => engine_err(req, e),
    }
}

fn handle_grades_convert(state: &mut AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(v) => v,
        Err(e) => return e,
    };
    let Some(value) = req.params.get("value") else {
        return err(&req.id, "bad_params", "missing value", None);
    };

    // Either an explicit system id, or scope parameters for resolution.
    let system = if let Some(system_id) = optional_str(req, "systemId") {
        let row: Result<Option<(String, String)>, _> = conn
            .query_row(
                "SELECT name, config FROM evaluation_systems WHERE id = ?",
                [&system_id],
                |r| Ok((r.get(0)?, r.get(1)?)),
            )
            .optional();
        match row {
            Ok(Some((_, config_json))) => match serde_json::from_str::<SystemConfig>(&config_json)
            {
                Ok(config) => config,
                Err(e) => {
                    return err(
                        &req.id,
                        "validation_failed",
                        format!("stored system config is invalid: {}", e),
                        None,
                    )
                }
            },
            Ok(None) => return err(&req.id, "not_found", "evaluation system not found", None),
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        }
    } else {
        let school_id = match required_str(req, "schoolId") {
            Ok(v) => v,
            Err(e) => return e,
        };
        let subject_id = optional_str(req, "subjectId");
        let year_level_id = optional_str(req, "yearLevelId");
        let academic_year_id = optional_str(req, "academicYearId");
        let segment = optional_str(req, "segment");
        match convert::find_applicable(
            conn,
            &school_id,
            subject_id.as_deref(),
            year_level_id.as_deref(),
            academic_year_id.as_deref(),
            segment.as_deref(),
        ) {
            Ok(Some(resolved)) => resolved.config,
            Ok(None) => {
                return err(&req.id, "not_found", "no applicable evaluation system", None)
            }
            Err(e) => return engine_err(req, e),
        }
    };

    match convert::convert(&system, value) {
        Ok(conversion) => ok(&req.id, json!(conversion)),
        Err(e) => engine_err(req, e),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "evaluationSystems.create" => Some(handle_systems_create(state, req)),
        "evaluationSystems.list" => Some(handle_systems_list(state, req)),
        "evaluationSystems.resolve" => Some(handle_systems_resolve(state, req)),
        "grades.convert" => Some(handle_grades_convert(state, req)),
        _ => None,
    }
}
