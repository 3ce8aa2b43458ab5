//! Response body decoding
//!
//! [`PageDecoder`] splits a JSON page body into items and a next cursor;
//! [`RecordMapper`] turns each item into a keyed [`Record`].

use super::types::{PageResult, Record, RecordKey};
use crate::error::FetchError;
use crate::types::{JsonObject, JsonValue, NextCursorFormat};
use serde::{Deserialize, Serialize};
use tracing::warn;
use url::Url;

// ============================================================================
// Record Mapper
// ============================================================================

/// A column extracted from each item
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldMapping {
    /// Column name in storage
    pub column: String,
    /// Dot path into the item (defaults to the column name)
    #[serde(default)]
    pub path: Option<String>,
}

impl FieldMapping {
    /// Map a column from a dot path
    pub fn new(column: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            path: Some(path.into()),
        }
    }

    /// Map a top-level item field to a column of the same name
    pub fn same(column: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            path: None,
        }
    }

    fn path(&self) -> &str {
        self.path.as_deref().unwrap_or(&self.column)
    }
}

/// Maps upstream items to records keyed by (key field, collection id)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordMapper {
    /// Dot path of the item's natural identity
    #[serde(default = "default_key_field")]
    pub key_field: String,
    /// Scalar columns to extract
    #[serde(default)]
    pub fields: Vec<FieldMapping>,
}

fn default_key_field() -> String {
    "id".to_string()
}

impl Default for RecordMapper {
    fn default() -> Self {
        Self {
            key_field: default_key_field(),
            fields: Vec::new(),
        }
    }
}

impl RecordMapper {
    /// Create a mapper keyed on the given field
    pub fn new(key_field: impl Into<String>) -> Self {
        Self {
            key_field: key_field.into(),
            fields: Vec::new(),
        }
    }

    /// Add an extracted column
    #[must_use]
    pub fn with_field(mut self, field: FieldMapping) -> Self {
        self.fields.push(field);
        self
    }

    /// Map one item. Returns `None` when the item has no usable key.
    pub fn map(&self, collection_id: &str, item: &JsonValue) -> Option<Record> {
        let record_id = extract_simple_path(item, &self.key_field).and_then(scalar_to_string)?;
        if record_id.is_empty() {
            return None;
        }

        let mut fields = JsonObject::new();
        for mapping in &self.fields {
            let value = match extract_simple_path(item, mapping.path()) {
                Some(v @ (JsonValue::Object(_) | JsonValue::Array(_))) => {
                    JsonValue::String(v.to_string())
                }
                Some(v) => v.clone(),
                None => JsonValue::Null,
            };
            fields.insert(mapping.column.clone(), value);
        }

        Some(Record::new(
            RecordKey::new(record_id, collection_id),
            fields,
            item.clone(),
        ))
    }
}

// ============================================================================
// Page Decoder
// ============================================================================

/// Decodes `{ items: [...], next_cursor: ... }` shaped page bodies
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageDecoder {
    /// Dot path of the item array
    #[serde(default = "default_items_path")]
    pub items_path: String,
    /// Dot path of the next cursor
    #[serde(default = "default_next_cursor_path")]
    pub next_cursor_path: String,
    /// How the next cursor value is interpreted
    #[serde(default)]
    pub next_cursor_format: NextCursorFormat,
    /// Query parameter carrying the cursor inside a next link
    #[serde(default = "default_cursor_param")]
    pub cursor_param: String,
}

fn default_items_path() -> String {
    "items".to_string()
}

fn default_next_cursor_path() -> String {
    "next_cursor".to_string()
}

fn default_cursor_param() -> String {
    "after".to_string()
}

impl Default for PageDecoder {
    fn default() -> Self {
        Self {
            items_path: default_items_path(),
            next_cursor_path: default_next_cursor_path(),
            next_cursor_format: NextCursorFormat::Token,
            cursor_param: default_cursor_param(),
        }
    }
}

impl PageDecoder {
    /// Create a decoder with the default `items` / `next_cursor` shape
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the item array path
    #[must_use]
    pub fn with_items_path(mut self, path: impl Into<String>) -> Self {
        self.items_path = path.into();
        self
    }

    /// Set the next cursor path
    #[must_use]
    pub fn with_next_cursor_path(mut self, path: impl Into<String>) -> Self {
        self.next_cursor_path = path.into();
        self
    }

    /// Read the next cursor out of a next-page link
    #[must_use]
    pub fn with_link_cursor(mut self, cursor_param: impl Into<String>) -> Self {
        self.next_cursor_format = NextCursorFormat::Link;
        self.cursor_param = cursor_param.into();
        self
    }

    /// Decode a raw body into a page of records
    pub fn decode(
        &self,
        collection_id: &str,
        body: &str,
        mapper: &RecordMapper,
    ) -> Result<PageResult, FetchError> {
        let value: JsonValue = serde_json::from_str(body)
            .map_err(|e| FetchError::schema(format!("response is not valid JSON: {e}")))?;
        self.decode_value(collection_id, &value, mapper)
    }

    /// Decode an already-parsed body
    pub fn decode_value(
        &self,
        collection_id: &str,
        value: &JsonValue,
        mapper: &RecordMapper,
    ) -> Result<PageResult, FetchError> {
        let items: &[JsonValue] = match extract_simple_path(value, &self.items_path) {
            Some(JsonValue::Array(items)) => items,
            Some(JsonValue::Null) => &[],
            Some(other) => {
                return Err(FetchError::schema(format!(
                    "'{}' is not an array (found {})",
                    self.items_path,
                    type_name(other)
                )))
            }
            None => {
                return Err(FetchError::schema(format!(
                    "missing '{}' in response",
                    self.items_path
                )))
            }
        };

        let mut page = PageResult::default();
        for item in items {
            if let Some(record) = mapper.map(collection_id, item) {
                page.records.push(record);
            } else {
                warn!(
                    collection_id,
                    key_field = %mapper.key_field,
                    "Item missing natural key, skipping"
                );
                page.skipped += 1;
            }
        }

        page.next_cursor = self.next_cursor(value)?;
        Ok(page)
    }

    fn next_cursor(&self, value: &JsonValue) -> Result<Option<String>, FetchError> {
        let raw = match extract_simple_path(value, &self.next_cursor_path) {
            None | Some(JsonValue::Null) => return Ok(None),
            Some(v) => scalar_to_string(v).ok_or_else(|| {
                FetchError::schema(format!(
                    "'{}' must be a string or number (found {})",
                    self.next_cursor_path,
                    type_name(v)
                ))
            })?,
        };

        match self.next_cursor_format {
            NextCursorFormat::Token => Ok(Some(raw)),
            // An empty next link marks the last page
            NextCursorFormat::Link if raw.trim().is_empty() => Ok(None),
            NextCursorFormat::Link => cursor_from_link(&raw, &self.cursor_param).map(Some),
        }
    }
}

/// Pull the cursor query parameter out of an absolute or relative next link
fn cursor_from_link(link: &str, cursor_param: &str) -> Result<String, FetchError> {
    let parsed = Url::parse(link)
        .or_else(|_| Url::parse("http://relative.invalid/").and_then(|base| base.join(link)));
    let url =
        parsed.map_err(|e| FetchError::schema(format!("unparseable next link '{link}': {e}")))?;

    url.query_pairs()
        .find(|(k, _)| k == cursor_param)
        .map(|(_, v)| v.into_owned())
        .ok_or_else(|| {
            FetchError::schema(format!(
                "next link '{link}' has no '{cursor_param}' parameter"
            ))
        })
}

// ============================================================================
// Helper Functions
// ============================================================================

/// Extract a value using simple dot-notation path
pub(crate) fn extract_simple_path<'a>(value: &'a JsonValue, path: &str) -> Option<&'a JsonValue> {
    let path = path.strip_prefix("$.").unwrap_or(path);
    if path.is_empty() || path == "$" {
        return Some(value);
    }

    let mut current = value;
    for part in path.split('.') {
        // Handle array indexing like "data[0]"
        if let Some(bracket_pos) = part.find('[') {
            let name = &part[..bracket_pos];
            let index_str = part[bracket_pos + 1..].trim_end_matches(']');

            if !name.is_empty() {
                current = current.get(name)?;
            }
            let index: usize = index_str.parse().ok()?;
            current = current.get(index)?;
        } else {
            current = current.get(part)?;
        }
    }

    Some(current)
}

fn scalar_to_string(value: &JsonValue) -> Option<String> {
    match value {
        JsonValue::String(s) => Some(s.clone()),
        JsonValue::Number(n) => Some(n.to_string()),
        JsonValue::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn type_name(value: &JsonValue) -> &'static str {
    match value {
        JsonValue::Null => "null",
        JsonValue::Bool(_) => "boolean",
        JsonValue::Number(_) => "number",
        JsonValue::String(_) => "string",
        JsonValue::Array(_) => "array",
        JsonValue::Object(_) => "object",
    }
}
