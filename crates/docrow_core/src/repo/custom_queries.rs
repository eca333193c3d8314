//! Named extension queries bound to a query service.

use super::query_service::QueryService;
use crate::error::{StoreError, StoreResult};
use crate::model::resource::Resource;
use crate::model::value::Value;
use std::collections::BTreeMap;
use std::fmt::{Debug, Formatter};
use std::sync::Arc;

/// Argument passed to a custom query.
pub type QueryArg = Value;

/// Custom query body. Receives the service it runs against.
pub type CustomQueryFn =
    Arc<dyn Fn(&QueryService<'_>, &[QueryArg]) -> StoreResult<Vec<Resource>>>;

/// Name-to-query registry owned by the adapter.
#[derive(Clone, Default)]
pub struct CustomQueryRegistry {
    queries: BTreeMap<String, CustomQueryFn>,
}

impl CustomQueryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers one query.
    ///
    /// # Errors
    /// - `InvalidArgument` when `name` is not lowercase snake case, or is
    ///   already registered.
    pub fn register<F>(&mut self, name: &str, query: F) -> StoreResult<()>
    where
        F: Fn(&QueryService<'_>, &[QueryArg]) -> StoreResult<Vec<Resource>> + 'static,
    {
        let name = name.trim();
        if !is_valid_query_name(name) {
            return Err(StoreError::InvalidArgument(format!(
                "custom query name is invalid: `{name}`"
            )));
        }
        if self.queries.contains_key(name) {
            return Err(StoreError::InvalidArgument(format!(
                "custom query already registered: `{name}`"
            )));
        }
        self.queries.insert(name.to_string(), Arc::new(query));
        Ok(())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.queries.contains_key(name.trim())
    }

    /// Returns sorted query names.
    pub fn names(&self) -> Vec<String> {
        self.queries.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.queries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queries.is_empty()
    }

    fn get(&self, name: &str) -> Option<&CustomQueryFn> {
        self.queries.get(name.trim())
    }
}

impl Debug for CustomQueryRegistry {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CustomQueryRegistry")
            .field("names", &self.names())
            .finish()
    }
}

/// Custom-query container returned by [`QueryService::custom_queries`].
pub struct CustomQueries<'s, 'conn> {
    service: &'s QueryService<'conn>,
    registry: &'s CustomQueryRegistry,
}

impl<'s, 'conn> CustomQueries<'s, 'conn> {
    pub(crate) fn new(service: &'s QueryService<'conn>, registry: &'s CustomQueryRegistry) -> Self {
        Self { service, registry }
    }

    /// Runs the query registered under `name`.
    ///
    /// # Errors
    /// - `InvalidArgument` when no query has that name.
    /// - Whatever the query body returns.
    pub fn run(&self, name: &str, args: &[QueryArg]) -> StoreResult<Vec<Resource>> {
        let query = self.registry.get(name).ok_or_else(|| {
            StoreError::InvalidArgument(format!("no custom query named `{}`", name.trim()))
        })?;
        query(self.service, args)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.registry.contains(name)
    }

    pub fn names(&self) -> Vec<String> {
        self.registry.names()
    }
}

fn is_valid_query_name(value: &str) -> bool {
    if value.is_empty() {
        return false;
    }
    value
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
}
