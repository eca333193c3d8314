//! Storage tuple for one resource.

use crate::error::{StoreError, StoreResult};
use crate::model::resource::ResourceId;
use serde_json::{Map as JsonMap, Value as JsonValue};

/// Table holding every resource row.
pub const RESOURCE_TABLE: &str = "resources";

/// Column fields of one `resources` row.
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceRow {
    /// `None` until the write path assigns one.
    pub id: Option<ResourceId>,
    pub type_tag: String,
    /// Attribute name to JSON array.
    pub document: JsonMap<String, JsonValue>,
    /// Stored version, or the expected version carried by a lock token.
    pub version: Option<i64>,
    pub created_at: Option<i64>,
    pub updated_at: Option<i64>,
}

impl ResourceRow {
    /// Reads one row selected through [`select_columns`].
    pub(crate) fn from_sql(row: &rusqlite::Row<'_>) -> StoreResult<Self> {
        let id_text: String = row.get("id")?;
        let id = ResourceId::parse(&id_text).ok_or_else(|| {
            StoreError::InvalidData(format!("invalid id `{id_text}` in resources.id"))
        })?;

        let document_text: String = row.get("document")?;
        let document = match serde_json::from_str::<JsonValue>(&document_text) {
            Ok(JsonValue::Object(map)) => map,
            Ok(_) => {
                return Err(StoreError::InvalidData(format!(
                    "document of `{id_text}` is not a JSON object"
                )))
            }
            Err(err) => {
                return Err(StoreError::InvalidData(format!(
                    "document of `{id_text}` is not valid JSON: {err}"
                )))
            }
        };

        Ok(Self {
            id: Some(id),
            type_tag: row.get("type_tag")?,
            document,
            version: row.get("version")?,
            created_at: row.get("created_at")?,
            updated_at: row.get("updated_at")?,
        })
    }

    /// Serialized document column.
    pub fn document_text(&self) -> String {
        JsonValue::Object(self.document.clone()).to_string()
    }
}

/// Column list for selecting resource rows from the table aliased `alias`.
pub(crate) fn select_columns(alias: &str) -> String {
    format!(
        "{alias}.id AS id,
         {alias}.type_tag AS type_tag,
         {alias}.document AS document,
         {alias}.version AS version,
         {alias}.created_at AS created_at,
         {alias}.updated_at AS updated_at"
    )
}
