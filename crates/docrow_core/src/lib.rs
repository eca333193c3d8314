//! Document-row resource store over SQLite.
//!
//! Schema-less resources are persisted as one row each: primary columns for
//! identity, type tag, version and timestamps, plus one JSON document holding
//! every other attribute as a sequence. References between resources live
//! inside documents and are resolved with `json_each`.

pub mod adapter;
pub mod convert;
pub mod db;
pub mod error;
pub mod logging;
pub mod model;
pub mod repo;

pub use adapter::{AdapterConfig, DbLocation, MetadataAdapter};
pub use convert::{ResourceFactory, ResourceRow};
pub use error::{StoreError, StoreResult};
pub use logging::{init_logging, logging_status, LogSettings, LoggingError};
pub use model::registry::{ResourceType, TypeRegistry, TypeRegistryError};
pub use model::resource::{
    AdapterId, Attribute, LockToken, Resource, ResourceId, ALTERNATE_IDS, MEMBER_IDS,
};
pub use model::value::Value;
pub use repo::custom_queries::{CustomQueries, CustomQueryRegistry, QueryArg};
pub use repo::persister::Persister;
pub use repo::query_service::{FindAll, InverseTarget, QueryService};

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

#[cfg(test)]
mod tests {
    use super::core_version;

    #[test]
    fn version_is_not_empty() {
        assert!(!core_version().is_empty());
    }
}
