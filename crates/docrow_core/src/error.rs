//! Store-level error contract.
//!
//! # Responsibility
//! - Give callers one error type for lookups, writes and mapping failures.
//! - Keep SQLite transport errors distinguishable from semantic errors.

use crate::db::DbError;
use crate::logging::LoggingError;
use std::error::Error;
use std::fmt::{Display, Formatter};

pub type StoreResult<T> = Result<T, StoreError>;

/// Errors returned by the converter, query service and persister.
#[derive(Debug)]
pub enum StoreError {
    /// Targeted lookup missed, id was malformed, or a persisted row vanished.
    ObjectNotFound(String),
    /// Optimistic version guard rejected a write.
    StaleObject(String),
    /// Stored or supplied type tag has no registered descriptor.
    Mapping(String),
    /// Required argument missing or invalid.
    InvalidArgument(String),
    /// Persisted row cannot be decoded.
    InvalidData(String),
    /// Underlying SQLite/bootstrap error.
    Db(DbError),
    /// Configured log output could not be started.
    Logging(LoggingError),
    /// Connection schema is not at the expected migrated version.
    UninitializedConnection {
        expected_version: u32,
        actual_version: u32,
    },
    /// Required table is missing.
    MissingRequiredTable(&'static str),
    /// Required column is missing from expected table.
    MissingRequiredColumn {
        table: &'static str,
        column: &'static str,
    },
}

impl Display for StoreError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ObjectNotFound(message) => write!(f, "object not found: {message}"),
            Self::StaleObject(message) => write!(f, "stale object: {message}"),
            Self::Mapping(message) => write!(f, "mapping error: {message}"),
            Self::InvalidArgument(message) => write!(f, "invalid argument: {message}"),
            Self::InvalidData(message) => write!(f, "invalid persisted resource data: {message}"),
            Self::Db(err) => write!(f, "{err}"),
            Self::Logging(err) => write!(f, "{err}"),
            Self::UninitializedConnection {
                expected_version,
                actual_version,
            } => write!(
                f,
                "resource store requires schema version {expected_version}, got {actual_version}"
            ),
            Self::MissingRequiredTable(table) => {
                write!(f, "resource store requires table `{table}`")
            }
            Self::MissingRequiredColumn { table, column } => write!(
                f,
                "resource store requires column `{column}` in table `{table}`"
            ),
        }
    }
}

impl Error for StoreError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Db(err) => Some(err),
            Self::Logging(err) => Some(err),
            _ => None,
        }
    }
}

impl From<DbError> for StoreError {
    fn from(value: DbError) -> Self {
        Self::Db(value)
    }
}

impl From<LoggingError> for StoreError {
    fn from(value: LoggingError) -> Self {
        Self::Logging(value)
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Db(DbError::Sqlite(value))
    }
}

impl StoreError {
    /// Stable short code used in log events.
    pub fn code(&self) -> &'static str {
        match self {
            Self::ObjectNotFound(_) => "object_not_found",
            Self::StaleObject(_) => "stale_object",
            Self::Mapping(_) => "mapping_error",
            Self::InvalidArgument(_) => "invalid_argument",
            Self::InvalidData(_) => "invalid_data",
            Self::Db(_) => "db_error",
            Self::Logging(_) => "logging_error",
            Self::UninitializedConnection { .. } => "uninitialized_connection",
            Self::MissingRequiredTable(_) => "missing_table",
            Self::MissingRequiredColumn { .. } => "missing_column",
        }
    }
}
