//! Resource domain model.
//!
//! # Responsibility
//! - Define the schema-less entity persisted by the store.
//! - Define identifiers and optimistic lock tokens.
//!
//! # Invariants
//! - `ResourceId` always holds the canonical lowercase hyphenated UUID text.
//! - A resource holds at most one lock token per adapter identity.

use crate::model::value::Value;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};
use uuid::Uuid;

/// Conventional ordered containment property.
pub const MEMBER_IDS: &str = "member_ids";
/// Conventional property holding alternate identifiers as references.
pub const ALTERNATE_IDS: &str = "alternate_ids";

// Eight groups of four hex digits, dashes optional, optionally wrapped in braces.
static ACCEPTABLE_ID_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?:\{(?:[a-fA-F0-9]{4}-?){8}\}|(?:[a-fA-F0-9]{4}-?){8})$")
        .expect("valid id regex")
});

/// Returns whether `raw` has the identifier shape accepted by the store.
pub fn is_acceptable_id(raw: &str) -> bool {
    ACCEPTABLE_ID_RE.is_match(raw)
}

/// Stable resource identifier.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResourceId(String);

impl ResourceId {
    /// Generates a fresh random identifier.
    pub fn generate() -> Self {
        Self(Uuid::new_v4().hyphenated().to_string())
    }

    /// Parses and canonicalizes an identifier.
    ///
    /// Returns `None` when `raw` does not have the accepted identifier shape.
    /// Surrounding whitespace is not accepted.
    pub fn parse(raw: &str) -> Option<Self> {
        if !is_acceptable_id(raw) {
            return None;
        }
        let hex: String = raw
            .chars()
            .filter(|c| c.is_ascii_hexdigit())
            .collect();
        Uuid::try_parse(&hex)
            .ok()
            .map(|uuid| Self(uuid.hyphenated().to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Reference value pointing at this id.
    pub fn to_reference(&self) -> Value {
        Value::reference(self.0.clone())
    }
}

impl From<Uuid> for ResourceId {
    fn from(value: Uuid) -> Self {
        Self(value.hyphenated().to_string())
    }
}

impl Display for ResourceId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identity of one storage adapter, used to scope lock tokens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AdapterId(Uuid);

impl AdapterId {
    /// Derives an identity from a storage location label.
    ///
    /// Equal labels always produce equal identities.
    pub fn from_location(location: &str) -> Self {
        Self(Uuid::new_v5(&Uuid::NAMESPACE_URL, location.as_bytes()))
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Display for AdapterId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Optimistic lock token issued by one adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockToken {
    pub adapter_id: AdapterId,
    pub version: i64,
}

impl LockToken {
    pub fn new(adapter_id: AdapterId, version: i64) -> Self {
        Self {
            adapter_id,
            version,
        }
    }
}

/// Attribute value slot: a single value or an ordered sequence.
#[derive(Debug, Clone, PartialEq)]
pub enum Attribute {
    One(Value),
    Many(Vec<Value>),
}

impl Attribute {
    /// Builds a multi-valued attribute.
    pub fn many<I, V>(values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        Self::Many(values.into_iter().map(Into::into).collect())
    }

    /// Views this attribute as a sequence.
    pub fn values(&self) -> &[Value] {
        match self {
            Self::One(value) => std::slice::from_ref(value),
            Self::Many(values) => values.as_slice(),
        }
    }

    /// Consumes this attribute into its sequence form.
    pub fn into_values(self) -> Vec<Value> {
        match self {
            Self::One(value) => vec![value],
            Self::Many(values) => values,
        }
    }

    /// `true` for a null single value or an empty sequence.
    pub fn is_blank(&self) -> bool {
        match self {
            Self::One(value) => value.is_null(),
            Self::Many(values) => values.is_empty(),
        }
    }
}

impl From<Value> for Attribute {
    fn from(value: Value) -> Self {
        Self::One(value)
    }
}

impl From<Vec<Value>> for Attribute {
    fn from(values: Vec<Value>) -> Self {
        Self::Many(values)
    }
}

/// Schema-less domain entity.
#[derive(Debug, Clone, PartialEq)]
pub struct Resource {
    /// Assigned on first persist; immutable afterwards.
    pub id: Option<ResourceId>,
    /// Registered type tag used for hydration.
    pub type_tag: String,
    pub attributes: BTreeMap<String, Attribute>,
    /// At most one token per adapter identity.
    pub lock_tokens: Vec<LockToken>,
    /// Epoch milliseconds. Set by the write path.
    pub created_at: Option<i64>,
    /// Epoch milliseconds. Set by the write path.
    pub updated_at: Option<i64>,
    persisted: bool,
}

impl Resource {
    /// Creates an unpersisted resource without an id.
    pub fn new(type_tag: impl Into<String>) -> Self {
        Self {
            id: None,
            type_tag: type_tag.into(),
            attributes: BTreeMap::new(),
            lock_tokens: Vec::new(),
            created_at: None,
            updated_at: None,
            persisted: false,
        }
    }

    /// Creates an unpersisted resource with a caller-provided id.
    ///
    /// Used by import paths where identity already exists externally.
    pub fn with_id(id: ResourceId, type_tag: impl Into<String>) -> Self {
        let mut resource = Self::new(type_tag);
        resource.id = Some(id);
        resource
    }

    /// Builder-style attribute assignment.
    pub fn with(mut self, name: impl Into<String>, attribute: impl Into<Attribute>) -> Self {
        self.set(name, attribute);
        self
    }

    pub fn set(&mut self, name: impl Into<String>, attribute: impl Into<Attribute>) {
        self.attributes.insert(name.into(), attribute.into());
    }

    pub fn get(&self, name: &str) -> Option<&Attribute> {
        self.attributes.get(name)
    }

    /// Returns the sequence view of one attribute; empty when absent.
    pub fn values(&self, name: &str) -> &[Value] {
        self.attributes
            .get(name)
            .map(Attribute::values)
            .unwrap_or(&[])
    }

    pub fn remove(&mut self, name: &str) -> Option<Attribute> {
        self.attributes.remove(name)
    }

    /// Whether this resource was loaded from or written to storage.
    pub fn is_persisted(&self) -> bool {
        self.persisted
    }

    pub(crate) fn mark_persisted(&mut self) {
        self.persisted = true;
    }

    /// Returns the lock token issued by `adapter_id`, if any.
    pub fn lock_token_for(&self, adapter_id: AdapterId) -> Option<&LockToken> {
        self.lock_tokens
            .iter()
            .find(|token| token.adapter_id == adapter_id)
    }

    /// Stores `token`, replacing any token from the same adapter.
    pub fn set_lock_token(&mut self, token: LockToken) {
        self.lock_tokens
            .retain(|existing| existing.adapter_id != token.adapter_id);
        self.lock_tokens.push(token);
    }

    pub fn clear_lock_tokens(&mut self) {
        self.lock_tokens.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::{is_acceptable_id, AdapterId, Attribute, LockToken, Resource, ResourceId};
    use crate::model::value::Value;

    #[test]
    fn parse_canonicalizes_accepted_shapes() {
        let canonical = "5f5afc75-9407-4c0f-be5f-34e6bd8df208";
        for raw in [
            canonical,
            "5F5AFC75-9407-4C0F-BE5F-34E6BD8DF208",
            "{5f5afc75-9407-4c0f-be5f-34e6bd8df208}",
            "5f5afc7594074c0fbe5f34e6bd8df208",
        ] {
            assert_eq!(ResourceId::parse(raw).unwrap().as_str(), canonical, "{raw}");
        }
    }

    #[test]
    fn parse_rejects_malformed_ids() {
        assert!(ResourceId::parse("not-a-valid-id").is_none());
        assert!(ResourceId::parse("weird bad id").is_none());
        assert!(ResourceId::parse("{5f5afc75-9407-4c0f-be5f-34e6bd8df208").is_none());
        assert!(ResourceId::parse(" 5f5afc75-9407-4c0f-be5f-34e6bd8df208 ").is_none());
        assert!(!is_acceptable_id(""));
    }

    #[test]
    fn adapter_identity_is_deterministic() {
        assert_eq!(
            AdapterId::from_location("sqlite:///tmp/a.db"),
            AdapterId::from_location("sqlite:///tmp/a.db")
        );
        assert_ne!(
            AdapterId::from_location("sqlite:///tmp/a.db"),
            AdapterId::from_location("sqlite:///tmp/b.db")
        );
    }

    #[test]
    fn set_lock_token_replaces_same_adapter_token() {
        let first = AdapterId::from_location("one");
        let second = AdapterId::from_location("two");
        let mut resource = Resource::new("Book");
        resource.set_lock_token(LockToken::new(first, 1));
        resource.set_lock_token(LockToken::new(second, 4));
        resource.set_lock_token(LockToken::new(first, 2));

        assert_eq!(resource.lock_tokens.len(), 2);
        assert_eq!(resource.lock_token_for(first).unwrap().version, 2);
        assert_eq!(resource.lock_token_for(second).unwrap().version, 4);
    }

    #[test]
    fn attribute_sequence_view() {
        let one = Attribute::from(Value::from("a"));
        assert_eq!(one.values(), &[Value::from("a")]);
        assert!(Attribute::Many(Vec::new()).is_blank());
        assert!(Attribute::One(Value::Null).is_blank());

        let resource = Resource::new("Book").with("title", Attribute::many(["x", "y"]));
        assert_eq!(resource.values("title").len(), 2);
        assert!(resource.values("missing").is_empty());
    }
}
