//! Write engine over the `resources` table.
//!
//! # Responsibility
//! - Persist single resources with a version-guarded update.
//! - Persist batches atomically through grouped upserts.
//! - Delete by id and wipe the table.
//!
//! # Invariants
//! - `version` grows by exactly one per committed update.
//! - A guarded write that matches no row fails with `StaleObject`.
//! - A failed batch leaves no row of that batch changed.
//! - A persisted resource whose row vanished is never re-inserted unless the
//!   caller declares it an external resource.

use super::{fetch_required_row, ids_json, now_epoch_ms};
use crate::convert::{ResourceFactory, ResourceRow, RESOURCE_TABLE};
use crate::error::{StoreError, StoreResult};
use crate::model::resource::{Resource, ResourceId};
use log::{debug, error, warn};
use rusqlite::types::Value as SqlValue;
use rusqlite::{params, params_from_iter, Connection, Transaction, TransactionBehavior};
use std::collections::BTreeSet;

// Six bound parameters per row keeps one chunk far below SQLite's
// 32766-variable ceiling.
const UPSERT_CHUNK_ROWS: usize = 500;
const SAVE_ALL_SAVEPOINT: &str = "docrow_save_all";

/// Persister handle bound to one adapter connection.
pub struct Persister<'conn> {
    conn: &'conn Connection,
    factory: &'conn ResourceFactory,
}

impl<'conn> Persister<'conn> {
    pub fn new(conn: &'conn Connection, factory: &'conn ResourceFactory) -> Self {
        Self { conn, factory }
    }

    /// Inserts or updates one resource and returns it re-read from storage.
    ///
    /// # Errors
    /// - `ObjectNotFound` when a persisted resource's row no longer exists and
    ///   `external_resource` is `false`.
    /// - `StaleObject` when locking is enabled and the stored version differs
    ///   from the resource's lock token (missing token counts as 0).
    /// - `Mapping` when the type tag is not registered.
    pub fn save(&self, resource: &Resource, external_resource: bool) -> StoreResult<Resource> {
        let locking = self
            .factory
            .resource_type(&resource.type_tag)?
            .optimistic_locking_enabled();
        let mut row = self.factory.from_resource(resource)?;
        stamp_timestamps(&mut row, now_epoch_ms());

        let exists = match &row.id {
            Some(id) => row_exists(self.conn, id)?,
            None => false,
        };

        let id = if exists {
            self.update(&row, locking)?
        } else {
            if let (Some(id), true, false) = (&row.id, resource.is_persisted(), external_resource)
            {
                warn!(
                    "event=resource_save module=persister status=error error_code=object_not_found id={}",
                    id
                );
                return Err(StoreError::ObjectNotFound(format!(
                    "resource {id} was deleted by another process"
                )));
            }
            self.insert(&mut row)?
        };

        let stored = fetch_required_row(self.conn, &id)?;
        debug!(
            "event=resource_save module=persister status=ok id={} type_tag={} version={}",
            id,
            stored.type_tag,
            stored.version.unwrap_or(0)
        );
        self.factory.to_resource(&stored)
    }

    /// Persists every resource in one transaction.
    ///
    /// Result order is not input order; correlate by id.
    ///
    /// # Errors
    /// - `StaleObject` when any locking-enabled resource fails its version
    ///   guard; nothing from the batch is committed.
    /// - `ObjectNotFound` when a persisted resource's row no longer exists.
    pub fn save_all(&self, resources: &[Resource]) -> StoreResult<Vec<Resource>> {
        if resources.is_empty() {
            return Ok(Vec::new());
        }

        let scope = WriteScope::begin(self.conn)?;
        match self.save_all_in_scope(resources) {
            Ok(saved) => {
                scope.commit()?;
                debug!(
                    "event=resource_save_all module=persister status=ok count={}",
                    saved.len()
                );
                Ok(saved)
            }
            Err(err) => {
                let err = keep_batch_error(err, scope.rollback());
                warn!(
                    "event=resource_save_all module=persister status=error error_code={} count={}",
                    err.code(),
                    resources.len()
                );
                Err(err)
            }
        }
    }

    /// Deletes the row for `resource` and returns the resource unchanged.
    ///
    /// Deleting a missing row, or a resource without id, is a no-op.
    pub fn delete(&self, resource: &Resource) -> StoreResult<Resource> {
        if let Some(id) = &resource.id {
            let changed = self
                .conn
                .execute("DELETE FROM resources WHERE id = ?1;", [id.as_str()])?;
            debug!(
                "event=resource_delete module=persister status=ok id={} changed={}",
                id, changed
            );
        }
        Ok(resource.clone())
    }

    /// Removes every row from the table.
    pub fn wipe(&self) -> StoreResult<()> {
        let changed = self.conn.execute("DELETE FROM resources;", [])?;
        warn!(
            "event=resource_wipe module=persister status=ok table={} changed={}",
            RESOURCE_TABLE, changed
        );
        Ok(())
    }

    fn insert(&self, row: &mut ResourceRow) -> StoreResult<ResourceId> {
        let id = row.id.get_or_insert_with(ResourceId::generate).clone();
        self.conn.execute(
            "INSERT INTO resources (
                id,
                type_tag,
                document,
                version,
                created_at,
                updated_at
            ) VALUES (?1, ?2, ?3, 0, ?4, ?5);",
            params![
                id.as_str(),
                row.type_tag.as_str(),
                row.document_text(),
                row.created_at,
                row.updated_at,
            ],
        )?;
        Ok(id)
    }

    fn update(&self, row: &ResourceRow, locking: bool) -> StoreResult<ResourceId> {
        let id = match &row.id {
            Some(id) => id.clone(),
            None => {
                return Err(StoreError::InvalidArgument(
                    "cannot update a resource without id".to_string(),
                ))
            }
        };

        let changed = if locking {
            self.conn.execute(
                "UPDATE resources
                 SET
                    type_tag = ?2,
                    document = ?3,
                    created_at = ?4,
                    updated_at = ?5,
                    version = COALESCE(version, 0) + 1
                 WHERE id = ?1
                   AND COALESCE(version, 0) = ?6;",
                params![
                    id.as_str(),
                    row.type_tag.as_str(),
                    row.document_text(),
                    row.created_at,
                    row.updated_at,
                    row.version.unwrap_or(0),
                ],
            )?
        } else {
            self.conn.execute(
                "UPDATE resources
                 SET
                    type_tag = ?2,
                    document = ?3,
                    created_at = ?4,
                    updated_at = ?5,
                    version = COALESCE(version, 0) + 1
                 WHERE id = ?1;",
                params![
                    id.as_str(),
                    row.type_tag.as_str(),
                    row.document_text(),
                    row.created_at,
                    row.updated_at,
                ],
            )?
        };

        if changed == 0 {
            if locking {
                warn!(
                    "event=resource_save module=persister status=error error_code=stale_object id={} expected_version={}",
                    id,
                    row.version.unwrap_or(0)
                );
                return Err(StoreError::StaleObject(format!(
                    "the object {id} has been updated by another process"
                )));
            }
            return Err(StoreError::ObjectNotFound(format!(
                "resource {id} was deleted by another process"
            )));
        }

        Ok(id)
    }

    fn save_all_in_scope(&self, resources: &[Resource]) -> StoreResult<Vec<Resource>> {
        let now = now_epoch_ms();
        let mut locked_rows = Vec::new();
        let mut unlocked_rows = Vec::new();
        let mut persisted_ids = BTreeSet::new();

        for resource in resources {
            let locking = self
                .factory
                .resource_type(&resource.type_tag)?
                .optimistic_locking_enabled();
            let mut row = self.factory.from_resource(resource)?;
            stamp_timestamps(&mut row, now);
            if let (true, Some(id)) = (resource.is_persisted(), &row.id) {
                persisted_ids.insert(id.clone());
            }
            row.id.get_or_insert_with(ResourceId::generate);

            if locking {
                locked_rows.push(row);
            } else {
                unlocked_rows.push(row);
            }
        }

        ensure_rows_exist(self.conn, &persisted_ids)?;

        let mut written = Vec::with_capacity(resources.len());
        for chunk in locked_rows.chunks(UPSERT_CHUNK_ROWS) {
            written.extend(upsert_rows(self.conn, chunk, true)?);
        }
        for chunk in unlocked_rows.chunks(UPSERT_CHUNK_ROWS) {
            written.extend(upsert_rows(self.conn, chunk, false)?);
        }

        if written.len() < resources.len() {
            return Err(StoreError::StaleObject(
                "one or more resources have been updated by another process".to_string(),
            ));
        }

        written
            .iter()
            .map(|row| self.factory.to_resource(row))
            .collect()
    }
}

/// Returns the error that aborted a batch, logging a failed rollback instead
/// of letting it replace that error.
fn keep_batch_error(err: StoreError, rollback: StoreResult<()>) -> StoreError {
    if let Err(rollback_err) = rollback {
        error!(
            "event=resource_save_all module=persister status=error error_code=rollback_failed cause={} error={}",
            err.code(),
            rollback_err
        );
    }
    err
}

fn stamp_timestamps(row: &mut ResourceRow, now: i64) {
    row.updated_at = Some(now);
    if row.created_at.is_none() {
        row.created_at = Some(now);
    }
}

fn row_exists(conn: &Connection, id: &ResourceId) -> StoreResult<bool> {
    let exists: i64 = conn.query_row(
        "SELECT EXISTS(
            SELECT 1
            FROM resources
            WHERE id = ?1
        );",
        [id.as_str()],
        |row| row.get(0),
    )?;
    Ok(exists == 1)
}

fn ensure_rows_exist(conn: &Connection, ids: &BTreeSet<ResourceId>) -> StoreResult<()> {
    if ids.is_empty() {
        return Ok(());
    }

    let mut stmt = conn.prepare(
        "SELECT id
         FROM resources
         WHERE id IN (SELECT value FROM json_each(?1));",
    )?;
    let mut rows = stmt.query([ids_json(ids.iter())])?;
    let mut found = BTreeSet::new();
    while let Some(row) = rows.next()? {
        let value: String = row.get(0)?;
        found.insert(value);
    }

    match ids.iter().find(|id| !found.contains(id.as_str())) {
        Some(missing) => Err(StoreError::ObjectNotFound(format!(
            "resource {missing} was deleted by another process"
        ))),
        None => Ok(()),
    }
}

/// Upserts one chunk and returns the rows that were inserted or updated.
///
/// With `guarded`, conflicting rows whose stored version differs from the
/// incoming expected version are left untouched and are not returned.
fn upsert_rows(
    conn: &Connection,
    rows: &[ResourceRow],
    guarded: bool,
) -> StoreResult<Vec<ResourceRow>> {
    if rows.is_empty() {
        return Ok(Vec::new());
    }

    let placeholders = vec!["(?, ?, ?, COALESCE(?, 0), ?, ?)"; rows.len()].join(",\n    ");
    let guard = if guarded {
        "\n WHERE COALESCE(resources.version, 0) = excluded.version"
    } else {
        ""
    };
    let sql = format!(
        "INSERT INTO resources (
            id,
            type_tag,
            document,
            version,
            created_at,
            updated_at
        ) VALUES
    {placeholders}
 ON CONFLICT(id) DO UPDATE SET
    type_tag = excluded.type_tag,
    document = excluded.document,
    created_at = excluded.created_at,
    version = COALESCE(resources.version, 0) + 1,
    updated_at = excluded.updated_at{guard}
 RETURNING id, type_tag, document, version, created_at, updated_at;"
    );

    let mut bind_values: Vec<SqlValue> = Vec::with_capacity(rows.len() * 6);
    for row in rows {
        let id = row
            .id
            .as_ref()
            .map(|id| id.as_str().to_string())
            .ok_or_else(|| StoreError::InvalidArgument("batch row without id".to_string()))?;
        bind_values.push(SqlValue::Text(id));
        bind_values.push(SqlValue::Text(row.type_tag.clone()));
        bind_values.push(SqlValue::Text(row.document_text()));
        bind_values.push(row.version.map_or(SqlValue::Null, SqlValue::Integer));
        bind_values.push(row.created_at.map_or(SqlValue::Null, SqlValue::Integer));
        bind_values.push(row.updated_at.map_or(SqlValue::Null, SqlValue::Integer));
    }

    let mut stmt = conn.prepare(&sql)?;
    let mut returned = stmt.query(params_from_iter(bind_values))?;
    let mut written = Vec::with_capacity(rows.len());
    while let Some(row) = returned.next()? {
        written.push(ResourceRow::from_sql(row)?);
    }
    Ok(written)
}

/// Transaction for `save_all`; a savepoint when the caller already opened one.
enum WriteScope<'conn> {
    Transaction(Transaction<'conn>),
    Savepoint(NestedSavepoint<'conn>),
}

struct NestedSavepoint<'conn> {
    conn: &'conn Connection,
    finished: bool,
}

impl<'conn> WriteScope<'conn> {
    fn begin(conn: &'conn Connection) -> StoreResult<Self> {
        if conn.is_autocommit() {
            let tx = Transaction::new_unchecked(conn, TransactionBehavior::Immediate)?;
            return Ok(Self::Transaction(tx));
        }
        conn.execute_batch(&format!("SAVEPOINT {SAVE_ALL_SAVEPOINT};"))?;
        Ok(Self::Savepoint(NestedSavepoint {
            conn,
            finished: false,
        }))
    }

    fn commit(self) -> StoreResult<()> {
        match self {
            Self::Transaction(tx) => tx.commit()?,
            Self::Savepoint(mut savepoint) => {
                savepoint
                    .conn
                    .execute_batch(&format!("RELEASE {SAVE_ALL_SAVEPOINT};"))?;
                savepoint.finished = true;
            }
        }
        Ok(())
    }

    fn rollback(self) -> StoreResult<()> {
        match self {
            Self::Transaction(tx) => tx.rollback()?,
            Self::Savepoint(mut savepoint) => {
                savepoint.finished = true;
                savepoint.conn.execute_batch(&format!(
                    "ROLLBACK TO {SAVE_ALL_SAVEPOINT}; RELEASE {SAVE_ALL_SAVEPOINT};"
                ))?;
            }
        }
        Ok(())
    }
}

impl Drop for NestedSavepoint<'_> {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        let _ = self.conn.execute_batch(&format!(
            "ROLLBACK TO {SAVE_ALL_SAVEPOINT}; RELEASE {SAVE_ALL_SAVEPOINT};"
        ));
    }
}

#[cfg(test)]
mod tests {
    use super::keep_batch_error;
    use crate::error::StoreError;

    #[test]
    fn failed_rollback_keeps_the_batch_error() {
        let err = keep_batch_error(
            StoreError::StaleObject("batch".to_string()),
            Err(StoreError::InvalidArgument("rollback".to_string())),
        );

        assert!(matches!(err, StoreError::StaleObject(message) if message == "batch"));
    }

    #[test]
    fn successful_rollback_keeps_the_batch_error() {
        let err = keep_batch_error(StoreError::ObjectNotFound("gone".to_string()), Ok(()));

        assert!(matches!(err, StoreError::ObjectNotFound(_)));
    }
}
