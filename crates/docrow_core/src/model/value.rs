//! Typed attribute values and their JSON document encoding.
//!
//! # Invariants
//! - A `Reference` is encoded as the JSON object `{"id": "<id>"}`.
//! - Any JSON object whose only key is a string `id` decodes as a `Reference`.

use serde_json::{Map as JsonMap, Number, Value as JsonValue};
use std::collections::BTreeMap;

/// Key used by the reference object encoding.
pub const REFERENCE_KEY: &str = "id";

/// One attribute value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Integer(i64),
    Float(f64),
    String(String),
    /// Directed edge to another resource id. Not validated against storage.
    Reference(String),
    List(Vec<Value>),
    Map(BTreeMap<String, Value>),
}

impl Value {
    /// Builds a reference value pointing at `id`.
    pub fn reference(id: impl Into<String>) -> Self {
        Self::Reference(id.into())
    }

    /// Returns the referenced id when this value is a reference.
    pub fn as_reference(&self) -> Option<&str> {
        match self {
            Self::Reference(id) => Some(id.as_str()),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(value) => Some(value.as_str()),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Encodes this value into its document JSON form.
    pub fn to_json(&self) -> JsonValue {
        match self {
            Self::Null => JsonValue::Null,
            Self::Bool(value) => JsonValue::Bool(*value),
            Self::Integer(value) => JsonValue::Number(Number::from(*value)),
            // Non-finite floats have no JSON form.
            Self::Float(value) => Number::from_f64(*value)
                .map(JsonValue::Number)
                .unwrap_or(JsonValue::Null),
            Self::String(value) => JsonValue::String(value.clone()),
            Self::Reference(id) => {
                let mut object = JsonMap::new();
                object.insert(REFERENCE_KEY.to_string(), JsonValue::String(id.clone()));
                JsonValue::Object(object)
            }
            Self::List(items) => JsonValue::Array(items.iter().map(Self::to_json).collect()),
            Self::Map(entries) => JsonValue::Object(
                entries
                    .iter()
                    .map(|(key, value)| (key.clone(), value.to_json()))
                    .collect(),
            ),
        }
    }

    /// Decodes one document JSON element.
    pub fn from_json(json: &JsonValue) -> Self {
        match json {
            JsonValue::Null => Self::Null,
            JsonValue::Bool(value) => Self::Bool(*value),
            JsonValue::Number(number) => match number.as_i64() {
                Some(value) => Self::Integer(value),
                None => Self::Float(number.as_f64().unwrap_or(f64::NAN)),
            },
            JsonValue::String(value) => Self::String(value.clone()),
            JsonValue::Array(items) => Self::List(items.iter().map(Self::from_json).collect()),
            JsonValue::Object(object) => {
                if object.len() == 1 {
                    if let Some(JsonValue::String(id)) = object.get(REFERENCE_KEY) {
                        return Self::Reference(id.clone());
                    }
                }
                Self::Map(
                    object
                        .iter()
                        .map(|(key, value)| (key.clone(), Self::from_json(value)))
                        .collect(),
                )
            }
        }
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Self::Integer(value)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<BTreeMap<String, Value>> for Value {
    fn from(value: BTreeMap<String, Value>) -> Self {
        Self::Map(value)
    }
}
