//! Resource type descriptors and the tag registry used for hydration.
//!
//! # Invariants
//! - Type tags are non-empty and contain no whitespace.
//! - One descriptor per tag.

use std::collections::{BTreeMap, BTreeSet};
use std::error::Error;
use std::fmt::{Display, Formatter};

/// Capabilities declared by one resource type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceType {
    type_tag: String,
    optimistic_locking: bool,
    ordered_attributes: BTreeSet<String>,
}

impl ResourceType {
    /// Declares a type without locking and without ordered attributes.
    pub fn new(type_tag: impl Into<String>) -> Self {
        Self {
            type_tag: type_tag.into(),
            optimistic_locking: false,
            ordered_attributes: BTreeSet::new(),
        }
    }

    /// Turns on version-guarded writes for this type.
    pub fn with_optimistic_locking(mut self) -> Self {
        self.optimistic_locking = true;
        self
    }

    /// Declares `name` as order-significant for reference resolution.
    pub fn with_ordered_attribute(mut self, name: impl Into<String>) -> Self {
        self.ordered_attributes.insert(name.into());
        self
    }

    pub fn type_tag(&self) -> &str {
        &self.type_tag
    }

    pub fn optimistic_locking_enabled(&self) -> bool {
        self.optimistic_locking
    }

    pub fn is_ordered_attribute(&self, name: &str) -> bool {
        self.ordered_attributes.contains(name)
    }
}

/// Registration errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TypeRegistryError {
    InvalidTypeTag(String),
    DuplicateTypeTag(String),
}

impl Display for TypeRegistryError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidTypeTag(value) => write!(f, "type tag is invalid: `{value}`"),
            Self::DuplicateTypeTag(value) => write!(f, "type tag already registered: `{value}`"),
        }
    }
}

impl Error for TypeRegistryError {}

/// Tag-to-descriptor registry.
#[derive(Debug, Clone, Default)]
pub struct TypeRegistry {
    types: BTreeMap<String, ResourceType>,
}

impl TypeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers one descriptor; rejects invalid and duplicate tags.
    pub fn register(&mut self, resource_type: ResourceType) -> Result<(), TypeRegistryError> {
        let tag = resource_type.type_tag.clone();
        if !is_valid_type_tag(&tag) {
            return Err(TypeRegistryError::InvalidTypeTag(tag));
        }
        if self.types.contains_key(tag.as_str()) {
            return Err(TypeRegistryError::DuplicateTypeTag(tag));
        }
        self.types.insert(tag, resource_type);
        Ok(())
    }

    /// Builder-style `register`.
    pub fn with(mut self, resource_type: ResourceType) -> Result<Self, TypeRegistryError> {
        self.register(resource_type)?;
        Ok(self)
    }

    /// Inserts or replaces a descriptor, returning the previous one.
    pub fn redefine(
        &mut self,
        resource_type: ResourceType,
    ) -> Result<Option<ResourceType>, TypeRegistryError> {
        let tag = resource_type.type_tag.clone();
        if !is_valid_type_tag(&tag) {
            return Err(TypeRegistryError::InvalidTypeTag(tag));
        }
        Ok(self.types.insert(tag, resource_type))
    }

    pub fn get(&self, type_tag: &str) -> Option<&ResourceType> {
        self.types.get(type_tag)
    }

    pub fn contains(&self, type_tag: &str) -> bool {
        self.types.contains_key(type_tag)
    }

    /// Returns sorted type tags.
    pub fn type_tags(&self) -> Vec<String> {
        self.types.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }
}

fn is_valid_type_tag(value: &str) -> bool {
    !value.is_empty() && !value.chars().any(|c| c.is_whitespace() || c.is_control())
}
