//! Read engine over the `resources` table.
//!
//! # Responsibility
//! - Point and bulk lookups by id and type tag.
//! - Reference-graph queries answered from document contents.
//! - Lazy, paged iteration over the whole table.
//!
//! # Invariants
//! - Malformed ids fail targeted lookups before any SQL runs and are
//!   silently dropped from bulk lookups.
//! - Ordered reference queries return targets in stored array order.
//! - The reference graph lives only in documents: every graph query
//!   decomposes the referencing array with `json_each`.

use super::custom_queries::{CustomQueries, CustomQueryRegistry};
use super::{fetch_row, ids_json};
use crate::convert::{select_columns, ResourceFactory, ResourceRow};
use crate::error::{StoreError, StoreResult};
use crate::model::resource::{Resource, ResourceId, ALTERNATE_IDS, MEMBER_IDS};
use log::debug;
use rusqlite::{params, Connection, Params};
use std::collections::{BTreeSet, VecDeque};

/// Rows fetched per round trip by [`FindAll`] unless configured otherwise.
pub const DEFAULT_ROWS_PER_FETCH: usize = 1000;

// Yields the referenced id for object elements and NULL for anything else,
// so non-reference values never reach `json_extract`.
const ELEMENT_ID_SQL: &str = "CASE WHEN b.type = 'object' THEN json_extract(b.value, '$.id') END";

/// Target of an inverse-reference query.
#[derive(Debug, Clone, Copy)]
pub enum InverseTarget<'r> {
    /// A persisted resource; its id is the target.
    Resource(&'r Resource),
    /// A raw id; need not belong to a stored row.
    Id(&'r str),
}

/// Query handle bound to one adapter connection.
pub struct QueryService<'conn> {
    conn: &'conn Connection,
    factory: &'conn ResourceFactory,
    custom_queries: &'conn CustomQueryRegistry,
    rows_per_fetch: usize,
}

impl<'conn> QueryService<'conn> {
    pub fn new(
        conn: &'conn Connection,
        factory: &'conn ResourceFactory,
        custom_queries: &'conn CustomQueryRegistry,
        rows_per_fetch: usize,
    ) -> Self {
        Self {
            conn,
            factory,
            custom_queries,
            rows_per_fetch: rows_per_fetch.max(1),
        }
    }

    /// Lazily iterates every stored resource.
    ///
    /// Rows are fetched in pages ordered by id; no statement stays open
    /// between items, so dropping the iterator early releases nothing.
    pub fn find_all(&self) -> FindAll<'conn> {
        FindAll {
            conn: self.conn,
            factory: self.factory,
            page_size: self.rows_per_fetch,
            after_id: None,
            buffer: VecDeque::new(),
            exhausted: false,
        }
    }

    /// Loads one resource by id.
    ///
    /// # Errors
    /// - `ObjectNotFound` when `id` is malformed or no row matches. The two
    ///   cases are indistinguishable to the caller.
    pub fn find_by(&self, id: &str) -> StoreResult<Resource> {
        let parsed = match ResourceId::parse(id) {
            Some(parsed) => parsed,
            None => {
                debug!("event=find_by module=query_service status=miss reason=malformed_id");
                return Err(StoreError::ObjectNotFound(id.to_string()));
            }
        };
        match fetch_row(self.conn, &parsed)? {
            Some(row) => self.factory.to_resource(&row),
            None => {
                debug!(
                    "event=find_by module=query_service status=miss reason=no_row id={}",
                    parsed
                );
                Err(StoreError::ObjectNotFound(parsed.to_string()))
            }
        }
    }

    /// Loads every resource whose id is in `ids`.
    ///
    /// Malformed ids are dropped and missing ids are skipped; neither is an
    /// error.
    pub fn find_many_by_ids<I, S>(&self, ids: I) -> StoreResult<Vec<Resource>>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let parsed: BTreeSet<ResourceId> = ids
            .into_iter()
            .filter_map(|id| ResourceId::parse(id.as_ref()))
            .collect();
        if parsed.is_empty() {
            return Ok(Vec::new());
        }

        let sql = format!(
            "SELECT {}
             FROM resources r
             WHERE r.id IN (SELECT value FROM json_each(?1));",
            select_columns("r")
        );
        self.run_query(&sql, [ids_json(parsed.iter())])
    }

    /// Loads every resource with the given type tag.
    pub fn find_all_of_model(&self, type_tag: &str) -> StoreResult<Vec<Resource>> {
        let sql = format!(
            "SELECT {}
             FROM resources r
             WHERE r.type_tag = ?1;",
            select_columns("r")
        );
        self.run_query(&sql, [type_tag])
    }

    /// Resolves the references stored under `property` on `resource`.
    ///
    /// Order is preserved only for properties declared ordered on the
    /// resource's type; unordered properties return distinct targets.
    /// Returns an empty list without querying when the resource has no id or
    /// the property is absent or empty.
    pub fn find_references_by(
        &self,
        resource: &Resource,
        property: &str,
    ) -> StoreResult<Vec<Resource>> {
        let id = match &resource.id {
            Some(id) => id,
            None => return Ok(Vec::new()),
        };
        if resource.values(property).is_empty() {
            return Ok(Vec::new());
        }

        let ordered = self
            .factory
            .resource_type(&resource.type_tag)?
            .is_ordered_attribute(property);
        if ordered {
            let sql = format!(
                "SELECT {}
                 FROM resources a,
                      json_each(a.document) AS p,
                      json_each(p.value) AS b
                 JOIN resources member ON member.id = {ELEMENT_ID_SQL}
                 WHERE a.id = ?1
                   AND p.key = ?2
                   AND p.type = 'array'
                 ORDER BY b.key;",
                select_columns("member")
            );
            self.run_query(&sql, params![id.as_str(), property])
        } else {
            let sql = format!(
                "SELECT DISTINCT {}
                 FROM resources a,
                      json_each(a.document) AS p,
                      json_each(p.value) AS b
                 JOIN resources member ON member.id = {ELEMENT_ID_SQL}
                 WHERE a.id = ?1
                   AND p.key = ?2
                   AND p.type = 'array';",
                select_columns("member")
            );
            self.run_query(&sql, params![id.as_str(), property])
        }
    }

    /// Finds every resource whose `property` array references the target.
    ///
    /// # Errors
    /// - `InvalidArgument` when the target resource is not persisted, or the
    ///   target id is empty.
    pub fn find_inverse_references_by(
        &self,
        target: InverseTarget<'_>,
        property: &str,
    ) -> StoreResult<Vec<Resource>> {
        let target_id = match target {
            InverseTarget::Resource(resource) => match (&resource.id, resource.is_persisted()) {
                (Some(id), true) => id.to_string(),
                _ => {
                    return Err(StoreError::InvalidArgument(
                        "resource is not saved".to_string(),
                    ))
                }
            },
            InverseTarget::Id(raw) => {
                let trimmed = raw.trim();
                if trimmed.is_empty() {
                    return Err(StoreError::InvalidArgument(
                        "provide a resource or an id".to_string(),
                    ));
                }
                ResourceId::parse(trimmed)
                    .map(|id| id.to_string())
                    .unwrap_or_else(|| trimmed.to_string())
            }
        };

        self.find_referencing(property, &target_id)
    }

    /// Finds the single resource listing `alternate_identifier` under
    /// `alternate_ids`.
    ///
    /// # Errors
    /// - `ObjectNotFound` when no resource matches.
    pub fn find_by_alternate_identifier(&self, alternate_identifier: &str) -> StoreResult<Resource> {
        let matches = self.find_inverse_references_by(
            InverseTarget::Id(alternate_identifier),
            ALTERNATE_IDS,
        )?;
        matches
            .into_iter()
            .next()
            .ok_or_else(|| StoreError::ObjectNotFound(alternate_identifier.to_string()))
    }

    /// Resolves `member_ids` in stored order, optionally keeping only members
    /// with the given type tag.
    pub fn find_members(
        &self,
        resource: &Resource,
        type_tag: Option<&str>,
    ) -> StoreResult<Vec<Resource>> {
        let id = match &resource.id {
            Some(id) => id,
            None => return Ok(Vec::new()),
        };

        let sql = format!(
            "SELECT {}
             FROM resources a,
                  json_each(a.document) AS p,
                  json_each(p.value) AS b
             JOIN resources member ON member.id = {ELEMENT_ID_SQL}
             WHERE a.id = ?1
               AND p.key = ?2
               AND p.type = 'array'
               AND (?3 IS NULL OR member.type_tag = ?3)
             ORDER BY b.key;",
            select_columns("member")
        );
        self.run_query(&sql, params![id.as_str(), MEMBER_IDS, type_tag])
    }

    /// Resources listing `resource` under `member_ids`.
    pub fn find_parents(&self, resource: &Resource) -> StoreResult<Vec<Resource>> {
        self.find_inverse_references_by(InverseTarget::Resource(resource), MEMBER_IDS)
    }

    /// Number of stored rows.
    pub fn count_all(&self) -> StoreResult<u64> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM resources;", [], |row| row.get(0))?;
        Ok(count.max(0) as u64)
    }

    /// Named extension queries bound to this service.
    pub fn custom_queries(&self) -> CustomQueries<'_, 'conn> {
        CustomQueries::new(self, self.custom_queries)
    }

    /// Runs `sql` and hydrates every returned row.
    ///
    /// The statement must select the columns `id`, `type_tag`, `document`,
    /// `version`, `created_at` and `updated_at` by those names. Values must be
    /// passed through `params`, never formatted into `sql`.
    pub fn run_query<P: Params>(&self, sql: &str, params: P) -> StoreResult<Vec<Resource>> {
        let mut stmt = self.conn.prepare(sql)?;
        let mut rows = stmt.query(params)?;
        let mut resources = Vec::new();
        while let Some(row) = rows.next()? {
            resources.push(self.factory.to_resource(&ResourceRow::from_sql(row)?)?);
        }
        Ok(resources)
    }

    pub fn resource_factory(&self) -> &ResourceFactory {
        self.factory
    }

    fn find_referencing(&self, property: &str, target_id: &str) -> StoreResult<Vec<Resource>> {
        let sql = format!(
            "SELECT {}
             FROM resources r
             WHERE EXISTS (
                SELECT 1
                FROM json_each(r.document) AS p,
                     json_each(p.value) AS b
                WHERE p.key = ?1
                  AND p.type = 'array'
                  AND {ELEMENT_ID_SQL} = ?2
             );",
            select_columns("r")
        );
        self.run_query(&sql, params![property, target_id])
    }
}

/// Lazy iterator over every stored resource, see [`QueryService::find_all`].
pub struct FindAll<'conn> {
    conn: &'conn Connection,
    factory: &'conn ResourceFactory,
    page_size: usize,
    after_id: Option<String>,
    buffer: VecDeque<ResourceRow>,
    exhausted: bool,
}

impl FindAll<'_> {
    fn fetch_page(&mut self) -> StoreResult<()> {
        let sql = format!(
            "SELECT {}
             FROM resources r
             WHERE (?1 IS NULL OR r.id > ?1)
             ORDER BY r.id
             LIMIT ?2;",
            select_columns("r")
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let mut rows = stmt.query(params![self.after_id.as_deref(), self.page_size as i64])?;
        let mut fetched = 0usize;
        while let Some(row) = rows.next()? {
            let row = ResourceRow::from_sql(row)?;
            self.after_id = row.id.as_ref().map(|id| id.as_str().to_string());
            self.buffer.push_back(row);
            fetched += 1;
        }
        if fetched < self.page_size {
            self.exhausted = true;
        }
        Ok(())
    }
}

impl Iterator for FindAll<'_> {
    type Item = StoreResult<Resource>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.buffer.is_empty() && !self.exhausted {
            if let Err(err) = self.fetch_page() {
                self.exhausted = true;
                self.buffer.clear();
                return Some(Err(err));
            }
        }
        let row = self.buffer.pop_front()?;
        Some(self.factory.to_resource(&row))
    }
}

impl std::iter::FusedIterator for FindAll<'_> {}
