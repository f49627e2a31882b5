use rusqlite::{Connection, OptionalExtension};
use serde_json::json;

use super::error::err;
use super::types::{AppState, Request};
use crate::grading::EngineError;

pub fn required_str(req: &Request, key: &str) -> Result<String, serde_json::Value> {
    req.params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|v| v.to_string())
        .ok_or_else(|| err(&req.id, "bad_params", format!("missing {}", key), None))
}

pub fn optional_str(req: &Request, key: &str) -> Option<String> {
    req.params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|v| v.to_string())
}

pub fn db_conn<'a>(state: &'a AppState, req: &Request) -> Result<&'a Connection, serde_json::Value> {
    state
        .db
        .as_ref()
        .ok_or_else(|| err(&req.id, "no_workspace", "select a workspace first", None))
}

pub fn engine_err(req: &Request, e: EngineError) -> serde_json::Value {
    err(&req.id, &e.code, e.message, e.details.map(|d| json!(d)))
}

/// Existence probe for a foreign-key reference. Table names come from call
/// sites only, never from request input.
pub fn row_exists(conn: &Connection, table: &str, id: &str) -> Result<bool, EngineError> {
    let sql = format!("SELECT 1 FROM {} WHERE id = ?", table);
    conn.query_row(&sql, [id], |r| r.get::<_, i64>(0))
        .optional()
        .map_err(EngineError::db)
        .map(|v| v.is_some())
}

pub fn require_row(
    conn: &Connection,
    table: &str,
    id: &str,
    what: &str,
) -> Result<(), EngineError> {
    if row_exists(conn, table, id)? {
        Ok(())
    } else {
        Err(EngineError::not_found(what))
    }
}
