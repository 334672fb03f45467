//! Core data models for the format library.
//!
//! These types are shared across all crates and represent the persisted
//! entities (formats and tags) plus the materialized tree view over the tag
//! graph.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{NaiveDate, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::error::{Error, Result};
use crate::record::Record;

/// Open key/value map stored as `jsonb`.
pub type JsonMap = serde_json::Map<String, JsonValue>;

// =============================================================================
// ENTITY KINDS
// =============================================================================

/// The two persisted entity kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityKind {
    Format,
    Tag,
}

impl EntityKind {
    /// Table holding rows of this kind.
    pub fn table(&self) -> &'static str {
        match self {
            Self::Format => "formats",
            Self::Tag => "tags",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Format => write!(f, "format"),
            Self::Tag => write!(f, "tag"),
        }
    }
}

/// A persisted entity that can be built from declarative records.
///
/// Field merge goes through serde: the entity is rendered as a JSON object,
/// record fields replace the matching keys wholesale, and the object is read
/// back. Arrays and maps are therefore replaced, never deep-merged.
pub trait Entity: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    const KIND: EntityKind;

    /// Primary key column. Set once, immutable afterwards.
    const PRIMARY_KEY: &'static str;

    /// Every assignable field, primary key included.
    const FIELDS: &'static [&'static str];

    /// A blank entity to merge a record into.
    fn blank() -> Self;

    /// The primary key value.
    fn key(&self) -> &str;

    /// NOT NULL columns without a default. A record creating a new entity
    /// must supply each of them.
    const REQUIRED: &'static [&'static str];

    /// Check that `record` can create a new entity.
    ///
    /// Only presence is checked: an empty string is a value.
    fn require_fields(record: &Record) -> Result<()> {
        for field in Self::REQUIRED {
            if record.get(*field).map_or(true, |v| v.is_null()) {
                return Err(Error::InvalidInput(format!(
                    "New {} record is missing required field '{}'",
                    Self::KIND,
                    field
                )));
            }
        }
        Ok(())
    }

    /// Replace the fields named in `record` with the record's values.
    fn merge(&self, record: &Record) -> Result<Self> {
        let mut value = serde_json::to_value(self)?;
        let object = value
            .as_object_mut()
            .ok_or_else(|| Error::Internal(format!("{} did not serialize as a map", Self::KIND)))?;

        for (field, field_value) in record {
            if !Self::FIELDS.contains(&field.as_str()) {
                return Err(Error::InvalidInput(format!(
                    "Unknown {} field '{}'",
                    Self::KIND,
                    field
                )));
            }
            object.insert(field.clone(), field_value.clone());
        }

        serde_json::from_value(value).map_err(|e| {
            Error::InvalidInput(format!("Invalid {} record: {}", Self::KIND, e))
        })
    }
}

// =============================================================================
// FORMAT
// =============================================================================

/// A file format description.
///
/// `parent_format` is a lineage pointer enforced by a foreign key, while
/// `related_formats` is free-form identifier text that is never validated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Format {
    pub uid: String,
    pub name: String,
    #[serde(default)]
    pub version: Option<String>,
    pub source: String,
    #[serde(default)]
    pub source_version: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub mimetypes: Vec<String>,
    #[serde(default)]
    pub extensions: Vec<String>,
    #[serde(default)]
    pub parent_format: Option<String>,
    #[serde(default)]
    pub related_formats: Vec<String>,
    #[serde(default)]
    pub properties: JsonMap,
    pub created_at: NaiveDate,
}

impl Entity for Format {
    const KIND: EntityKind = EntityKind::Format;
    const PRIMARY_KEY: &'static str = "uid";
    const FIELDS: &'static [&'static str] = &[
        "uid",
        "name",
        "version",
        "source",
        "source_version",
        "url",
        "mimetypes",
        "extensions",
        "parent_format",
        "related_formats",
        "properties",
        "created_at",
    ];
    const REQUIRED: &'static [&'static str] = &["uid", "name", "source"];

    fn blank() -> Self {
        Self {
            uid: String::new(),
            name: String::new(),
            version: None,
            source: String::new(),
            source_version: None,
            url: None,
            mimetypes: Vec::new(),
            extensions: Vec::new(),
            parent_format: None,
            related_formats: Vec::new(),
            properties: JsonMap::new(),
            created_at: Utc::now().date_naive(),
        }
    }

    fn key(&self) -> &str {
        &self.uid
    }

}

// =============================================================================
// TAG
// =============================================================================

/// A node in the classification taxonomy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tag {
    pub tag: String,
    pub name: String,
    pub profile: String,
    #[serde(default)]
    pub properties: JsonMap,
    #[serde(default)]
    pub info: JsonMap,
}

impl Entity for Tag {
    const KIND: EntityKind = EntityKind::Tag;
    const PRIMARY_KEY: &'static str = "tag";
    const FIELDS: &'static [&'static str] = &["tag", "name", "profile", "properties", "info"];
    const REQUIRED: &'static [&'static str] = &["tag", "name", "profile"];

    fn blank() -> Self {
        Self {
            tag: String::new(),
            name: String::new(),
            profile: String::new(),
            properties: JsonMap::new(),
            info: JsonMap::new(),
        }
    }

    fn key(&self) -> &str {
        &self.tag
    }

}

// =============================================================================
// TREE VIEW
// =============================================================================

/// One node of the materialized descendant tree of a tag.
///
/// `tags` is absent on leaves and `formats` is absent when no format is
/// tagged directly with the node's tag; neither is ever an empty map.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TagNode {
    pub tag: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tags: Option<BTreeMap<String, TagNode>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub formats: Option<BTreeMap<String, Format>>,
}

impl TagNode {
    /// A node without children or formats.
    pub fn leaf(tag: impl Into<String>) -> Self {
        Self {
            tag: tag.into(),
            tags: None,
            formats: None,
        }
    }

    /// Build a node, pruning an empty child container.
    pub fn with_children(tag: impl Into<String>, children: BTreeMap<String, TagNode>) -> Self {
        Self {
            tag: tag.into(),
            tags: (!children.is_empty()).then_some(children),
            formats: None,
        }
    }

    /// Direct children, in tag order.
    pub fn children(&self) -> impl Iterator<Item = &TagNode> {
        self.tags.iter().flat_map(|m| m.values())
    }

    /// Look up a direct child.
    pub fn child(&self, tag: &str) -> Option<&TagNode> {
        self.tags.as_ref().and_then(|m| m.get(tag))
    }

    /// Number of nodes in this subtree, including this one.
    pub fn node_count(&self) -> usize {
        1 + self.children().map(TagNode::node_count).sum::<usize>()
    }

    /// True if `tag` appears anywhere in this subtree.
    pub fn contains(&self, tag: &str) -> bool {
        self.tag == tag || self.children().any(|c| c.contains(tag))
    }

    /// Attach the directly tagged formats to every node of the subtree.
    pub fn decorate(&mut self, formats_by_tag: &BTreeMap<String, Vec<Format>>) {
        self.formats = formats_by_tag
            .get(&self.tag)
            .filter(|formats| !formats.is_empty())
            .map(|formats| {
                formats
                    .iter()
                    .map(|f| (f.uid.clone(), f.clone()))
                    .collect()
            });

        if let Some(children) = self.tags.as_mut() {
            for child in children.values_mut() {
                child.decorate(formats_by_tag);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(value: JsonValue) -> Record {
        value.as_object().cloned().unwrap()
    }

    fn format(uid: &str) -> Format {
        Format::blank()
            .merge(&record(json!({"uid": uid, "name": uid, "source": "TEST"})))
            .unwrap()
    }

    #[test]
    fn test_merge_assigns_fields() {
        let f = Format::blank()
            .merge(&record(json!({
                "uid": "fmt/114",
                "name": "Windows Bitmap",
                "source": "PRONOM",
                "mimetypes": ["image/bmp"],
                "extensions": ["bmp", "dib"],
                "created_at": "2024-03-27"
            })))
            .unwrap();

        assert_eq!(f.uid, "fmt/114");
        assert_eq!(f.extensions, vec!["bmp", "dib"]);
        assert_eq!(f.created_at, NaiveDate::from_ymd_opt(2024, 3, 27).unwrap());
    }

    #[test]
    fn test_merge_replaces_arrays() {
        let f = format("fmt/1")
            .merge(&record(json!({"extensions": ["a", "b"]})))
            .unwrap()
            .merge(&record(json!({"extensions": ["c"]})))
            .unwrap();
        assert_eq!(f.extensions, vec!["c"]);
    }

    #[test]
    fn test_merge_replaces_maps() {
        let f = format("fmt/1")
            .merge(&record(json!({"properties": {"a": 1, "b": 2}})))
            .unwrap()
            .merge(&record(json!({"properties": {"c": 3}})))
            .unwrap();
        assert_eq!(f.properties.len(), 1);
        assert_eq!(f.properties["c"], json!(3));
    }

    #[test]
    fn test_merge_keeps_absent_fields() {
        let f = format("fmt/1")
            .merge(&record(json!({"version": "1.0", "url": "http://x"})))
            .unwrap()
            .merge(&record(json!({"version": "2.0"})))
            .unwrap();
        assert_eq!(f.version.as_deref(), Some("2.0"));
        assert_eq!(f.url.as_deref(), Some("http://x"));
    }

    #[test]
    fn test_merge_rejects_unknown_field() {
        let err = Tag::blank()
            .merge(&record(json!({"tag": "X", "colour": "red"})))
            .unwrap_err();
        assert!(matches!(err, Error::InvalidInput(msg) if msg.contains("colour")));
    }

    #[test]
    fn test_merge_rejects_mistyped_value() {
        let err = Format::blank()
            .merge(&record(json!({"mimetypes": "image/bmp"})))
            .unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
    }

    #[test]
    fn test_require_fields_checks_presence_only() {
        let err = Tag::require_fields(&record(json!({"tag": "BMP", "profile": "teneo"})))
            .unwrap_err();
        assert!(err.to_string().contains("'name'"));

        let err = Format::require_fields(&record(json!({
            "uid": "fmt/1", "name": null, "source": "PRONOM"
        })))
        .unwrap_err();
        assert!(matches!(err, Error::InvalidInput(msg) if msg.contains("'name'")));

        assert!(Format::require_fields(&record(json!({
            "uid": "fmt/1", "name": "", "source": "PRONOM"
        })))
        .is_ok());
        assert!(Tag::require_fields(&record(json!({
            "tag": "X", "name": " ", "profile": "teneo"
        })))
        .is_ok());
    }

    #[test]
    fn test_tag_node_leaf_has_no_containers() {
        let node = TagNode::with_children("BMP", BTreeMap::new());
        assert!(node.tags.is_none());
        assert_eq!(
            serde_json::to_value(&node).unwrap(),
            json!({"tag": "BMP"})
        );
    }

    #[test]
    fn test_tag_node_decorate_omits_empty_formats() {
        let mut children = BTreeMap::new();
        children.insert("BMP".to_string(), TagNode::leaf("BMP"));
        let mut root = TagNode::with_children("IMAGE", children);

        let mut by_tag = BTreeMap::new();
        by_tag.insert("BMP".to_string(), vec![format("fmt/114"), format("fmt/116")]);
        by_tag.insert("IMAGE".to_string(), Vec::new());
        root.decorate(&by_tag);

        assert!(root.formats.is_none());
        let bmp = root.child("BMP").unwrap();
        let formats = bmp.formats.as_ref().unwrap();
        assert_eq!(formats.len(), 2);
        assert!(formats.contains_key("fmt/114"));
    }

    #[test]
    fn test_tag_node_counts_and_contains() {
        let mut inner = BTreeMap::new();
        inner.insert("C".to_string(), TagNode::leaf("C"));
        let mut outer = BTreeMap::new();
        outer.insert("B".to_string(), TagNode::with_children("B", inner));
        let root = TagNode::with_children("A", outer);

        assert_eq!(root.node_count(), 3);
        assert!(root.contains("C"));
        assert!(!root.contains("D"));
    }
}
