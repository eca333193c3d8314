//! Metadata adapter: entry point wiring the connection, converter,
//! query service and persister together.
//!
//! # Responsibility
//! - Own one SQLite connection and its adapter identity.
//! - Build the row converter once and hand out request-scoped handles.
//! - Expose maintenance operations outside the read/write contract.
//!
//! # Invariants
//! - Adapters opened on the same location share one identity, so lock tokens
//!   issued by one are honored by the other.
//! - Handles never outlive the adapter they borrow.

use crate::convert::{ResourceFactory, RESOURCE_TABLE};
use crate::db::migrations::{current_user_version, latest_version, reset_schema};
use crate::db::{open_db, open_db_in_memory, DEFAULT_BUSY_TIMEOUT};
use crate::error::{StoreError, StoreResult};
use crate::logging::{init_logging, LogSettings};
use crate::model::registry::{ResourceType, TypeRegistry};
use crate::model::resource::{AdapterId, Resource};
use crate::repo::custom_queries::{CustomQueryRegistry, QueryArg};
use crate::repo::persister::Persister;
use crate::repo::query_service::{QueryService, DEFAULT_ROWS_PER_FETCH};
use log::{info, warn};
use once_cell::unsync::OnceCell;
use rusqlite::Connection;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

const REQUIRED_COLUMNS: [&str; 6] = [
    "id",
    "type_tag",
    "document",
    "version",
    "created_at",
    "updated_at",
];

/// Where the adapter's database lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DbLocation {
    Memory,
    File(PathBuf),
}

impl DbLocation {
    /// Location text used to derive the adapter identity.
    ///
    /// File paths are canonicalized when the file exists, so every spelling
    /// of one database maps to one label.
    pub fn label(&self) -> String {
        match self {
            Self::Memory => ":memory:".to_string(),
            Self::File(path) => std::fs::canonicalize(path)
                .unwrap_or_else(|_| path.clone())
                .display()
                .to_string(),
        }
    }
}

/// Adapter configuration.
#[derive(Debug, Clone)]
pub struct AdapterConfig {
    pub location: DbLocation,
    /// How long a writer waits on a locked database before failing.
    pub busy_timeout: Duration,
    /// Page size of the `find_all` cursor.
    pub rows_per_fetch: usize,
    /// Rolling file logs started before the database opens; `None` leaves
    /// logging to the host application.
    pub log: Option<LogSettings>,
}

impl Default for AdapterConfig {
    fn default() -> Self {
        Self {
            location: DbLocation::Memory,
            busy_timeout: DEFAULT_BUSY_TIMEOUT,
            rows_per_fetch: DEFAULT_ROWS_PER_FETCH,
            log: None,
        }
    }
}

impl AdapterConfig {
    pub fn file(path: impl Into<PathBuf>) -> Self {
        Self {
            location: DbLocation::File(path.into()),
            ..Self::default()
        }
    }
}

/// Resource store over one SQLite connection.
pub struct MetadataAdapter {
    conn: Connection,
    location: String,
    id: AdapterId,
    registry: Arc<TypeRegistry>,
    rows_per_fetch: usize,
    factory: OnceCell<ResourceFactory>,
    custom_queries: CustomQueryRegistry,
}

impl MetadataAdapter {
    /// Opens the configured database, applying migrations.
    ///
    /// # Errors
    /// - `Logging` when `config.log` conflicts with logging already started
    ///   in this process or cannot be started.
    pub fn open(config: AdapterConfig, registry: TypeRegistry) -> StoreResult<Self> {
        if let Some(settings) = &config.log {
            init_logging(settings)?;
        }
        let conn = match &config.location {
            DbLocation::Memory => {
                let conn = open_db_in_memory()?;
                conn.busy_timeout(config.busy_timeout)?;
                conn
            }
            DbLocation::File(path) => open_db(path, config.busy_timeout)?,
        };
        let mut adapter = Self::build(conn, &config.location.label(), registry);
        adapter.rows_per_fetch = config.rows_per_fetch.max(1);
        info!(
            "event=adapter_open module=adapter status=ok adapter_id={} types={}",
            adapter.id,
            adapter.registry.len()
        );
        Ok(adapter)
    }

    /// Wraps an already-migrated connection.
    ///
    /// # Errors
    /// - `UninitializedConnection` when the schema version is not current.
    /// - `MissingRequiredTable` / `MissingRequiredColumn` when the
    ///   `resources` table does not have the expected shape.
    pub fn from_connection(
        conn: Connection,
        location: &str,
        registry: TypeRegistry,
    ) -> StoreResult<Self> {
        ensure_connection_ready(&conn)?;
        Ok(Self::build(conn, location, registry))
    }

    fn build(conn: Connection, location: &str, registry: TypeRegistry) -> Self {
        let location = format!("sqlite://{location}");
        Self {
            id: AdapterId::from_location(&location),
            conn,
            location,
            registry: Arc::new(registry),
            rows_per_fetch: DEFAULT_ROWS_PER_FETCH,
            factory: OnceCell::new(),
            custom_queries: CustomQueryRegistry::new(),
        }
    }

    /// Identity scoping the lock tokens this adapter issues.
    pub fn id(&self) -> AdapterId {
        self.id
    }

    /// `sqlite://<location>` label the identity is derived from.
    pub fn location(&self) -> &str {
        &self.location
    }

    pub fn registry(&self) -> &TypeRegistry {
        &self.registry
    }

    /// Row converter for this adapter, built on first use.
    pub fn resource_factory(&self) -> &ResourceFactory {
        self.factory
            .get_or_init(|| ResourceFactory::new(self.id, Arc::clone(&self.registry)))
    }

    pub fn query_service(&self) -> QueryService<'_> {
        QueryService::new(
            &self.conn,
            self.resource_factory(),
            &self.custom_queries,
            self.rows_per_fetch,
        )
    }

    pub fn persister(&self) -> Persister<'_> {
        Persister::new(&self.conn, self.resource_factory())
    }

    /// Adds a named query reachable through `query_service().custom_queries()`.
    pub fn register_custom_query<F>(&mut self, name: &str, query: F) -> StoreResult<()>
    where
        F: Fn(&QueryService<'_>, &[QueryArg]) -> StoreResult<Vec<Resource>> + 'static,
    {
        self.custom_queries.register(name, query)
    }

    /// Inserts or replaces one type descriptor and returns the previous one.
    ///
    /// Drops the cached converter so later handles see the new descriptor.
    pub fn redefine_type(&mut self, resource_type: ResourceType) -> StoreResult<Option<ResourceType>> {
        let previous = Arc::make_mut(&mut self.registry)
            .redefine(resource_type)
            .map_err(|err| StoreError::InvalidArgument(err.to_string()))?;
        self.factory = OnceCell::new();
        Ok(previous)
    }

    /// Underlying connection, for caller-managed transactions.
    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    /// Drops and re-creates the resource table. Every row is lost.
    pub fn reset_database(&mut self) -> StoreResult<()> {
        reset_schema(&mut self.conn)?;
        warn!(
            "event=adapter_reset module=adapter status=ok adapter_id={} table={}",
            self.id, RESOURCE_TABLE
        );
        Ok(())
    }
}

fn ensure_connection_ready(conn: &Connection) -> StoreResult<()> {
    let expected_version = latest_version();
    let actual_version = current_user_version(conn)?;
    if actual_version != expected_version {
        return Err(StoreError::UninitializedConnection {
            expected_version,
            actual_version,
        });
    }

    if !table_exists(conn, RESOURCE_TABLE)? {
        return Err(StoreError::MissingRequiredTable(RESOURCE_TABLE));
    }

    for column in REQUIRED_COLUMNS {
        if !table_has_column(conn, RESOURCE_TABLE, column)? {
            return Err(StoreError::MissingRequiredColumn {
                table: RESOURCE_TABLE,
                column,
            });
        }
    }

    Ok(())
}

fn table_exists(conn: &Connection, table: &str) -> StoreResult<bool> {
    let exists: i64 = conn.query_row(
        "SELECT EXISTS(
            SELECT 1
            FROM sqlite_master
            WHERE type = 'table' AND name = ?1
        );",
        [table],
        |row| row.get(0),
    )?;
    Ok(exists == 1)
}

fn table_has_column(conn: &Connection, table: &str, column: &str) -> StoreResult<bool> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({table});"))?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let current: String = row.get(1)?;
        if current == column {
            return Ok(true);
        }
    }
    Ok(false)
}
