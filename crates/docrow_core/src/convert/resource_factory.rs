//! Bidirectional converter between `Resource` and `ResourceRow`.
//!
//! # Responsibility
//! - Pack resource attributes into the sequence-shaped document.
//! - Rebuild resources from rows through the type registry.
//! - Translate lock tokens to and from the `version` column.
//!
//! # Invariants
//! - Unknown type tags fail with `StoreError::Mapping` in both directions.
//! - Hydrated resources always carry a lock token from this adapter.

use super::row::ResourceRow;
use crate::error::{StoreError, StoreResult};
use crate::model::registry::{ResourceType, TypeRegistry};
use crate::model::resource::{AdapterId, Attribute, LockToken, Resource, ResourceId};
use crate::model::value::Value;
use serde_json::{Map as JsonMap, Value as JsonValue};
use std::sync::Arc;

/// Attribute names that never enter the document.
pub const RESERVED_ATTRIBUTES: &[&str] = &[
    "id",
    "type_tag",
    "internal_resource",
    "created_at",
    "updated_at",
    "version",
    "new_record",
    "optimistic_lock_token",
];

/// Row converter bound to one adapter identity and type registry.
#[derive(Debug, Clone)]
pub struct ResourceFactory {
    adapter_id: AdapterId,
    registry: Arc<TypeRegistry>,
}

impl ResourceFactory {
    pub fn new(adapter_id: AdapterId, registry: Arc<TypeRegistry>) -> Self {
        Self {
            adapter_id,
            registry,
        }
    }

    pub fn adapter_id(&self) -> AdapterId {
        self.adapter_id
    }

    pub fn registry(&self) -> &TypeRegistry {
        &self.registry
    }

    /// Resolves the descriptor for `type_tag`.
    pub fn resource_type(&self, type_tag: &str) -> StoreResult<&ResourceType> {
        self.registry
            .get(type_tag)
            .ok_or_else(|| StoreError::Mapping(format!("unknown type tag `{type_tag}`")))
    }

    /// Converts a resource into row fields.
    ///
    /// Single values become one-element arrays; null single values are dropped.
    /// Reference ids shaped like resource ids are stored in canonical form.
    pub fn from_resource(&self, resource: &Resource) -> StoreResult<ResourceRow> {
        self.resource_type(&resource.type_tag)?;

        let mut document = JsonMap::new();
        for (name, attribute) in &resource.attributes {
            if is_reserved(name) {
                continue;
            }
            if matches!(attribute, Attribute::One(Value::Null)) {
                continue;
            }
            let items = attribute.values().iter().map(document_json).collect();
            document.insert(name.clone(), JsonValue::Array(items));
        }

        Ok(ResourceRow {
            id: resource.id.clone(),
            type_tag: resource.type_tag.clone(),
            document,
            version: resource
                .lock_token_for(self.adapter_id)
                .map(|token| token.version),
            created_at: resource.created_at,
            updated_at: resource.updated_at,
        })
    }

    /// Rebuilds a persisted resource from row fields.
    pub fn to_resource(&self, row: &ResourceRow) -> StoreResult<Resource> {
        let resource_type = self.resource_type(&row.type_tag)?;

        let mut resource = Resource::new(resource_type.type_tag());
        resource.id = row.id.clone();
        for (name, json) in &row.document {
            // Primary columns win over document keys with the same name.
            if is_reserved(name) {
                continue;
            }
            let values = match json {
                JsonValue::Array(items) => items.iter().map(Value::from_json).collect(),
                other => vec![Value::from_json(other)],
            };
            resource.attributes.insert(name.clone(), Attribute::Many(values));
        }
        resource.created_at = row.created_at;
        resource.updated_at = row.updated_at;
        resource.set_lock_token(LockToken::new(self.adapter_id, row.version.unwrap_or(0)));
        resource.mark_persisted();
        Ok(resource)
    }
}

fn document_json(value: &Value) -> JsonValue {
    match value {
        Value::Reference(id) => match ResourceId::parse(id) {
            Some(canonical) => canonical.to_reference().to_json(),
            None => value.to_json(),
        },
        other => other.to_json(),
    }
}

fn is_reserved(name: &str) -> bool {
    RESERVED_ATTRIBUTES.contains(&name)
}

#[cfg(test)]
mod tests {
    use super::ResourceFactory;
    use crate::error::StoreError;
    use crate::model::registry::{ResourceType, TypeRegistry};
    use crate::model::resource::{AdapterId, Attribute, LockToken, Resource, ResourceId};
    use crate::model::value::Value;
    use serde_json::json;
    use std::sync::Arc;

    fn factory() -> ResourceFactory {
        let registry = TypeRegistry::new()
            .with(ResourceType::new("Book").with_optimistic_locking())
            .unwrap();
        ResourceFactory::new(AdapterId::from_location("test"), Arc::new(registry))
    }

    #[test]
    fn single_values_are_stored_as_arrays() {
        let resource = Resource::new("Book").with("title", Value::from("test"));

        let row = factory().from_resource(&resource).unwrap();

        assert_eq!(row.document.get("title"), Some(&json!(["test"])));
        assert_eq!(row.type_tag, "Book");
        assert_eq!(row.version, None);
    }

    #[test]
    fn reserved_and_null_attributes_are_not_packed() {
        let resource = Resource::new("Book")
            .with("id", Value::from("spoofed"))
            .with("new_record", Value::Bool(true))
            .with("subtitle", Value::Null)
            .with("title", Value::from("kept"));

        let row = factory().from_resource(&resource).unwrap();

        assert_eq!(row.document.len(), 1);
        assert!(row.document.contains_key("title"));
    }

    #[test]
    fn reference_ids_are_canonicalized_but_opaque_ids_are_kept() {
        let resource = Resource::new("Book").with(
            "related",
            vec![
                Value::reference("{5F5AFC75-9407-4C0F-BE5F-34E6BD8DF208}"),
                Value::reference("p9s0xfj"),
            ],
        );

        let row = factory().from_resource(&resource).unwrap();

        assert_eq!(
            row.document.get("related"),
            Some(&json!([
                {"id": "5f5afc75-9407-4c0f-be5f-34e6bd8df208"},
                {"id": "p9s0xfj"}
            ]))
        );
    }

    #[test]
    fn lock_token_for_this_adapter_becomes_version() {
        let factory = factory();
        let mut resource = Resource::new("Book");
        resource.set_lock_token(LockToken::new(AdapterId::from_location("other"), 9));
        resource.set_lock_token(LockToken::new(factory.adapter_id(), 3));

        let row = factory.from_resource(&resource).unwrap();

        assert_eq!(row.version, Some(3));
    }

    #[test]
    fn to_resource_attaches_token_and_marks_persisted() {
        let factory = factory();
        let id = ResourceId::generate();
        let resource = Resource::with_id(id.clone(), "Book")
            .with("authors", Attribute::many(["a", "b"]))
            .with("parent", id.to_reference());

        let mut row = factory.from_resource(&resource).unwrap();
        row.version = Some(4);
        let loaded = factory.to_resource(&row).unwrap();

        assert!(loaded.is_persisted());
        assert_eq!(loaded.id, Some(id.clone()));
        assert_eq!(
            loaded.get("authors"),
            Some(&Attribute::Many(vec![Value::from("a"), Value::from("b")]))
        );
        assert_eq!(
            loaded.get("parent"),
            Some(&Attribute::Many(vec![id.to_reference()]))
        );
        assert_eq!(loaded.lock_token_for(factory.adapter_id()).unwrap().version, 4);
    }

    #[test]
    fn unknown_type_tag_is_a_mapping_error() {
        let factory = factory();
        let mut row = factory.from_resource(&Resource::new("Book")).unwrap();
        row.type_tag = "Ghost".to_string();

        assert!(matches!(factory.to_resource(&row), Err(StoreError::Mapping(_))));
        assert!(matches!(
            factory.from_resource(&Resource::new("Ghost")),
            Err(StoreError::Mapping(_))
        ));
    }
}
