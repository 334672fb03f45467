//! Core traits for format library abstractions.
//!
//! These traits define the query and write surface that the storage crate
//! implements, enabling alternative backends and testability.

use std::collections::BTreeMap;

use async_trait::async_trait;

use crate::closure::ClosureStrategy;
use crate::error::Result;
use crate::models::*;
use crate::record::Record;

// =============================================================================
// FORMAT REPOSITORY
// =============================================================================

/// Repository for format entities.
#[async_trait]
pub trait FormatRepository: Send + Sync {
    /// Find a format by uid.
    async fn find(&self, uid: &str) -> Result<Option<Format>>;

    /// Find a format whose columns equal every entry of `key`.
    async fn find_by(&self, key: &Record) -> Result<Option<Format>>;

    /// Find-or-create by `key` (default: uid), merge the record, persist.
    ///
    /// Fields absent from the record keep their stored values; fields present
    /// replace them wholesale.
    async fn upsert(&self, record: Record, key: Option<&[&str]>) -> Result<Format>;

    /// Delete a format; edges and child formats cascade. Returns false if absent.
    async fn delete(&self, uid: &str) -> Result<bool>;

    /// Number of stored formats.
    async fn count(&self) -> Result<i64>;

    /// All formats from one catalog source, ordered by uid.
    async fn list_by_source(&self, source: &str) -> Result<Vec<Format>>;

    /// Tags assigned directly to the format.
    async fn direct_tags(&self, uid: &str) -> Result<Vec<Tag>>;
}

// =============================================================================
// TAG REPOSITORY
// =============================================================================

/// Repository for tag entities and both edge relations.
#[async_trait]
pub trait TagRepository: Send + Sync {
    /// Find a tag by id.
    async fn find(&self, tag: &str) -> Result<Option<Tag>>;

    /// Find a tag whose columns equal every entry of `key`.
    async fn find_by(&self, key: &Record) -> Result<Option<Tag>>;

    /// Find-or-create by `key` (default: tag), merge the record, persist.
    async fn upsert(&self, record: Record, key: Option<&[&str]>) -> Result<Tag>;

    /// Delete a tag; edges cascade. Returns false if absent.
    async fn delete(&self, tag: &str) -> Result<bool>;

    /// Tags of one profile, or every tag when `profile` is None.
    async fn with_profile(&self, profile: Option<&str>) -> Result<Vec<Tag>>;

    /// Tag a format. Re-adding an existing edge is a no-op.
    async fn add_format(&self, tag: &str, uid: &str) -> Result<()>;

    /// Make `child` a child of `parent`. Re-adding an existing edge is a no-op.
    async fn add_child(&self, parent: &str, child: &str) -> Result<()>;

    /// Direct parents of a tag.
    async fn parent_tags(&self, tag: &str) -> Result<Vec<Tag>>;

    /// Direct children of a tag.
    async fn child_tags(&self, tag: &str) -> Result<Vec<Tag>>;

    /// Formats tagged directly with the tag.
    async fn direct_formats(&self, tag: &str) -> Result<Vec<Format>>;
}

// =============================================================================
// GRAPH CLOSURE
// =============================================================================

/// Read-only closure queries over the tag graph.
///
/// Every call observes one consistent snapshot of the edge relations.
#[async_trait]
pub trait TagClosureRepository: Send + Sync {
    /// The tag and everything reachable through parent edges, keyed by tag id.
    async fn ancestors(&self, tag: &str, strategy: ClosureStrategy)
        -> Result<BTreeMap<String, Tag>>;

    /// The tag and everything reachable through child edges, keyed by tag id.
    async fn descendants(
        &self,
        tag: &str,
        strategy: ClosureStrategy,
    ) -> Result<BTreeMap<String, Tag>>;

    /// Nested tree over the descendant subgraph of the tag.
    async fn tree(&self, tag: &str) -> Result<TagNode>;

    /// `tree`, with directly tagged formats attached to each node.
    async fn tree_with_formats(&self, tag: &str) -> Result<TagNode>;
}

// =============================================================================
// ASSOCIATIONS
// =============================================================================

/// Transitive format/tag associations.
#[async_trait]
pub trait AssociationRepository: Send + Sync {
    /// Direct tags of the format plus all of their ancestors.
    async fn all_tags_of_format(
        &self,
        uid: &str,
        strategy: ClosureStrategy,
    ) -> Result<BTreeMap<String, Tag>>;

    /// Formats tagged with the tag or any of its descendants, keyed by uid.
    async fn all_formats_under_tag(
        &self,
        tag: &str,
        strategy: ClosureStrategy,
    ) -> Result<BTreeMap<String, Format>>;
}
