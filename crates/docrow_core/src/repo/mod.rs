//! Query and write engines over the `resources` table.
//!
//! # Responsibility
//! - Keep SQL details inside the persistence boundary.
//! - Return semantic errors (`ObjectNotFound`, `StaleObject`) in addition to
//!   SQLite transport errors.
//!
//! # Invariants
//! - Ids, type tags and property names are always bound parameters.

pub mod custom_queries;
pub mod persister;
pub mod query_service;

use crate::convert::{select_columns, ResourceRow};
use crate::error::{StoreError, StoreResult};
use crate::model::resource::ResourceId;
use rusqlite::{Connection, OptionalExtension};
use serde_json::Value as JsonValue;
use std::time::{SystemTime, UNIX_EPOCH};

/// Loads one row by id, if present.
pub(crate) fn fetch_row(conn: &Connection, id: &ResourceId) -> StoreResult<Option<ResourceRow>> {
    let sql = format!(
        "SELECT {}
         FROM resources r
         WHERE r.id = ?1;",
        select_columns("r")
    );
    let row = conn
        .query_row(&sql, [id.as_str()], |row| Ok(ResourceRow::from_sql(row)))
        .optional()?;
    row.transpose()
}

/// Loads one row by id or fails with `ObjectNotFound`.
pub(crate) fn fetch_required_row(conn: &Connection, id: &ResourceId) -> StoreResult<ResourceRow> {
    fetch_row(conn, id)?.ok_or_else(|| StoreError::ObjectNotFound(id.to_string()))
}

/// JSON array text of ids, bound as one parameter and expanded with `json_each`.
pub(crate) fn ids_json<'a>(ids: impl Iterator<Item = &'a ResourceId>) -> String {
    JsonValue::Array(
        ids.map(|id| JsonValue::String(id.as_str().to_string()))
            .collect(),
    )
    .to_string()
}

/// Current wall-clock time in Unix epoch milliseconds.
pub(crate) fn now_epoch_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as i64)
        .unwrap_or(0)
}
