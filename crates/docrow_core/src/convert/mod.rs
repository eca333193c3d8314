//! Resource ⇄ row mapping.
//!
//! # Responsibility
//! - Define the storage tuple written to and read from `resources`.
//! - Convert between that tuple and `Resource` values.
//!
//! # Invariants
//! - Every document attribute is a JSON array.
//! - The document never carries primary-column names.

mod resource_factory;
mod row;

pub use resource_factory::{ResourceFactory, RESERVED_ATTRIBUTES};
pub use row::{ResourceRow, RESOURCE_TABLE};

pub(crate) use row::select_columns;
