//! Resource model consumed by the store.
//!
//! # Responsibility
//! - Define the schema-less `Resource` entity and its typed values.
//! - Keep per-type capabilities in explicit descriptors.
//!
//! # Invariants
//! - Every persisted resource is identified by a stable `ResourceId`.
//! - Capabilities are read from `ResourceType`, never inferred from data.

pub mod registry;
pub mod resource;
pub mod value;
