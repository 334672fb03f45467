//! Hash-driven loader for declarative records.
//!
//! One record loads in one transaction: the entity upsert, every nested
//! child, and every edge named by `uids` or `tags`. An unresolved identifier
//! rolls the whole record back, so nothing is half linked.
//!
//! ```rust,ignore
//! let loader = db.loader();
//! loader.load_yaml_file(EntityKind::Tag, "db/seeds/data/tags/image.yml", Some(&["tag"])).await?;
//! ```

use std::path::Path;
use std::time::Instant;

use futures::future::BoxFuture;
use serde_json::Value as JsonValue;
use sqlx::{Pool, Postgres, Transaction};
use tracing::{debug, info, trace};

use fmtlib_core::record::{documents, take_children, take_identifiers, TAGS, UIDS};
use fmtlib_core::{EntityKind, Error, Format, Record, Result, Tag};

use crate::store::{self, db_error, Customize};

/// Outcome of loading a document.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadSummary {
    /// Primary keys of the top-level entities, in document order.
    pub keys: Vec<String>,
}

impl LoadSummary {
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

/// Loads declarative records into the entity store.
#[derive(Clone)]
pub struct Loader {
    pool: Pool<Postgres>,
}

impl Loader {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    /// Load one format record.
    pub async fn load_format(
        &self,
        record: Record,
        key: Option<&[&str]>,
        customize: Option<Customize<'_, Format>>,
    ) -> Result<Format> {
        let mut tx = self.pool.begin().await.map_err(db_error)?;
        let format: Format = store::upsert_tx(&mut tx, record, key, customize).await?;
        tx.commit().await.map_err(db_error)?;
        trace!(uid = %format.uid, "Loaded format");
        Ok(format)
    }

    /// Load one tag record with its `children`, `uids` and `tags`.
    pub async fn load_tag(
        &self,
        record: Record,
        key: Option<&[&str]>,
        customize: Option<Customize<'_, Tag>>,
    ) -> Result<Tag> {
        let mut tx = self.pool.begin().await.map_err(db_error)?;
        let tag = self.load_tag_tx(&mut tx, record, key, customize).await?;
        tx.commit().await.map_err(db_error)?;
        trace!(tag = %tag.tag, "Loaded tag");
        Ok(tag)
    }

    /// Load a tag record within a caller-owned transaction.
    ///
    /// Children are loaded with the same key fields and customization as
    /// their parent.
    pub fn load_tag_tx<'a>(
        &'a self,
        tx: &'a mut Transaction<'static, Postgres>,
        mut record: Record,
        key: Option<&'a [&'a str]>,
        customize: Option<Customize<'a, Tag>>,
    ) -> BoxFuture<'a, Result<Tag>> {
        Box::pin(async move {
            let children = take_children(&mut record)?;
            let uids = take_identifiers(&mut record, UIDS)?.unwrap_or_default();
            let tag_ids = take_identifiers(&mut record, TAGS)?.unwrap_or_default();

            let tag: Tag = store::upsert_tx(tx, record, key, customize).await?;

            for uid in &uids {
                if store::find_tx::<Format>(tx, uid).await?.is_none() {
                    return Err(Error::FormatNotFound(uid.clone()));
                }
                store::add_format_edge_tx(tx, &tag.tag, uid).await?;
            }

            for child in &tag_ids {
                if store::find_tx::<Tag>(tx, child).await?.is_none() {
                    return Err(Error::TagNotFound(child.clone()));
                }
                store::add_child_edge_tx(tx, &tag.tag, child).await?;
            }

            for child_record in children {
                let child = self.load_tag_tx(tx, child_record, key, customize).await?;
                store::add_child_edge_tx(tx, &tag.tag, &child.tag).await?;
            }

            Ok(tag)
        })
    }

    /// Load every record of a parsed document.
    ///
    /// Records commit one by one; the first failure stops the load and the
    /// records before it stay committed.
    pub async fn load_document(
        &self,
        kind: EntityKind,
        document: JsonValue,
        key: Option<&[&str]>,
    ) -> Result<LoadSummary> {
        let start = Instant::now();
        let mut summary = LoadSummary::default();

        for (index, record) in documents(document)?.into_iter().enumerate() {
            let loaded = match kind {
                EntityKind::Format => self.load_format(record, key, None).await.map(|f| f.uid),
                EntityKind::Tag => self.load_tag(record, key, None).await.map(|t| t.tag),
            };
            match loaded {
                Ok(pk) => summary.keys.push(pk),
                Err(e) => {
                    debug!(
                        subsystem = "loader",
                        op = "load_document",
                        entity = %kind,
                        record_index = index,
                        record_count = summary.len(),
                        error = %e,
                        "Record failed to load"
                    );
                    return Err(e);
                }
            }
        }

        info!(
            subsystem = "loader",
            op = "load_document",
            entity = %kind,
            record_count = summary.len(),
            duration_ms = start.elapsed().as_millis() as u64,
            "Document loaded"
        );
        Ok(summary)
    }

    pub async fn load_json_str(
        &self,
        kind: EntityKind,
        json: &str,
        key: Option<&[&str]>,
    ) -> Result<LoadSummary> {
        let document: JsonValue = serde_json::from_str(json)?;
        self.load_document(kind, document, key).await
    }

    pub async fn load_yaml_str(
        &self,
        kind: EntityKind,
        yaml: &str,
        key: Option<&[&str]>,
    ) -> Result<LoadSummary> {
        let document: JsonValue = serde_yaml::from_str(yaml)?;
        self.load_document(kind, document, key).await
    }

    pub async fn load_json_file(
        &self,
        kind: EntityKind,
        path: impl AsRef<Path>,
        key: Option<&[&str]>,
    ) -> Result<LoadSummary> {
        let text = tokio::fs::read_to_string(path.as_ref()).await?;
        self.load_json_str(kind, &text, key).await
    }

    pub async fn load_yaml_file(
        &self,
        kind: EntityKind,
        path: impl AsRef<Path>,
        key: Option<&[&str]>,
    ) -> Result<LoadSummary> {
        let text = tokio::fs::read_to_string(path.as_ref()).await?;
        self.load_yaml_str(kind, &text, key).await
    }

    /// Load a file, choosing the parser from its extension (`.json`, else YAML).
    pub async fn load_file(
        &self,
        kind: EntityKind,
        path: impl AsRef<Path>,
        key: Option<&[&str]>,
    ) -> Result<LoadSummary> {
        let path = path.as_ref();
        let is_json = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("json"));
        if is_json {
            self.load_json_file(kind, path, key).await
        } else {
            self.load_yaml_file(kind, path, key).await
        }
    }
}
