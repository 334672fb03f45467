//! Declarative records.
//!
//! A record is a flat map of entity fields, as found in bulk-load documents
//! (YAML/JSON) or produced by the catalog normalizers. Tag records may carry
//! three relationship fields on top of the entity fields: `children`, `uids`
//! and `tags`.

use serde_json::Value as JsonValue;

use crate::error::{Error, Result};

/// A declarative record: field name to value.
pub type Record = serde_json::Map<String, JsonValue>;

/// Nested records of the same kind, linked as children.
pub const CHILDREN: &str = "children";

/// Format identifiers to link.
pub const UIDS: &str = "uids";

/// Tag identifiers to link as children.
pub const TAGS: &str = "tags";

/// Split a document into records.
///
/// A document is either a single record or a list of records.
pub fn documents(value: JsonValue) -> Result<Vec<Record>> {
    match value {
        JsonValue::Object(record) => Ok(vec![record]),
        JsonValue::Array(items) => items
            .into_iter()
            .enumerate()
            .map(|(i, item)| match item {
                JsonValue::Object(record) => Ok(record),
                other => Err(Error::InvalidInput(format!(
                    "Document entry {} is not a map: {}",
                    i, other
                ))),
            })
            .collect(),
        JsonValue::Null => Ok(Vec::new()),
        other => Err(Error::InvalidInput(format!(
            "Document is neither a map nor a list: {}",
            other
        ))),
    }
}

/// Remove an identifier list field from the record.
///
/// Accepts a list of strings or a single string separated by commas and/or
/// whitespace. Entries are trimmed; empty entries are dropped.
pub fn take_identifiers(record: &mut Record, field: &str) -> Result<Option<Vec<String>>> {
    match record.remove(field) {
        None | Some(JsonValue::Null) => Ok(None),
        Some(JsonValue::String(s)) => Ok(Some(split_identifiers(&s))),
        Some(JsonValue::Array(items)) => items
            .into_iter()
            .map(|item| match item {
                JsonValue::String(s) => Ok(s.trim().to_string()),
                other => Err(Error::InvalidInput(format!(
                    "'{}' entries must be strings, got {}",
                    field, other
                ))),
            })
            .filter(|r| !matches!(r, Ok(s) if s.is_empty()))
            .collect::<Result<Vec<_>>>()
            .map(Some),
        Some(other) => Err(Error::InvalidInput(format!(
            "'{}' must be a list or a delimited string, got {}",
            field, other
        ))),
    }
}

/// Remove the nested children field from the record.
pub fn take_children(record: &mut Record) -> Result<Vec<Record>> {
    match record.remove(CHILDREN) {
        None | Some(JsonValue::Null) => Ok(Vec::new()),
        Some(JsonValue::Array(items)) => items
            .into_iter()
            .map(|item| match item {
                JsonValue::Object(child) => Ok(child),
                other => Err(Error::InvalidInput(format!(
                    "'{}' entries must be maps, got {}",
                    CHILDREN, other
                ))),
            })
            .collect(),
        Some(other) => Err(Error::InvalidInput(format!(
            "'{}' must be a list, got {}",
            CHILDREN, other
        ))),
    }
}

/// Split a delimited identifier string on commas and whitespace.
pub fn split_identifiers(s: &str) -> Vec<String> {
    s.split(|c: char| c == ',' || c.is_whitespace())
        .filter(|part| !part.is_empty())
        .map(str::to_string)
        .collect()
}

/// Extract the lookup key from a record.
///
/// Every key field must be present; the lookup is meaningless otherwise.
pub fn key_of(record: &Record, key_fields: &[&str]) -> Result<Record> {
    key_fields
        .iter()
        .map(|field| {
            record
                .get(*field)
                .filter(|v| !v.is_null())
                .map(|v| (field.to_string(), v.clone()))
                .ok_or_else(|| {
                    Error::InvalidInput(format!("Record is missing key field '{}'", field))
                })
        })
        .collect()
}

/// Render a scalar key value as text for SQL comparison and lock naming.
pub fn key_text(value: &JsonValue) -> String {
    match value {
        JsonValue::String(s) => s.clone(),
        other => other.to_string(),
    }
}
