//! Tag repository implementation.
//!
//! Owns both edge relations: `tagged_formats` (tag to format) and
//! `tagged_tags` (child to parent). Edge inserts are idempotent.

use async_trait::async_trait;
use sqlx::postgres::PgRow;
use sqlx::types::Json;
use sqlx::{Pool, Postgres, Row, Transaction};
use tracing::debug;

use fmtlib_core::{Error, Format, Record, Result, Tag, TagRepository};

use crate::formats::{format_from_row, FORMAT_COLUMNS};
use crate::store::{self, db_error, json_map, Customize, PgEntity};

/// Tag select list, aliased `t`.
pub(crate) const TAG_COLUMNS: &str = "t.tag, t.name, t.profile, t.properties, t.info";

pub(crate) fn tag_from_row(row: &PgRow) -> Tag {
    Tag {
        tag: row.get("tag"),
        name: row.get("name"),
        profile: row.get("profile"),
        properties: json_map(row, "properties"),
        info: json_map(row, "info"),
    }
}

#[async_trait]
impl PgEntity for Tag {
    const ALIAS: &'static str = "t";
    const COLUMNS: &'static str = TAG_COLUMNS;
    const LOOKUP_COLUMNS: &'static [&'static str] = &["tag", "name", "profile"];

    fn from_row(row: &PgRow) -> Self {
        tag_from_row(row)
    }

    async fn insert_tx(&self, tx: &mut Transaction<'_, Postgres>) -> Result<()> {
        sqlx::query(
            "INSERT INTO tags (tag, name, profile, properties, info) VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(&self.tag)
        .bind(&self.name)
        .bind(&self.profile)
        .bind(Json(&self.properties))
        .bind(Json(&self.info))
        .execute(&mut **tx)
        .await
        .map_err(db_error)?;
        Ok(())
    }

    async fn update_tx(&self, tx: &mut Transaction<'_, Postgres>) -> Result<()> {
        sqlx::query(
            "UPDATE tags SET name = $2, profile = $3, properties = $4, info = $5 WHERE tag = $1",
        )
        .bind(&self.tag)
        .bind(&self.name)
        .bind(&self.profile)
        .bind(Json(&self.properties))
        .bind(Json(&self.info))
        .execute(&mut **tx)
        .await
        .map_err(db_error)?;
        Ok(())
    }
}

/// PostgreSQL implementation of TagRepository.
#[derive(Clone)]
pub struct PgTagRepository {
    pool: Pool<Postgres>,
}

impl PgTagRepository {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    // ==========================================================================
    // TRANSACTION METHODS
    // ==========================================================================

    pub async fn find_tx(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        tag: &str,
    ) -> Result<Option<Tag>> {
        store::find_tx(tx, tag).await
    }

    pub async fn upsert_tx(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        record: Record,
        key: Option<&[&str]>,
        customize: Option<Customize<'_, Tag>>,
    ) -> Result<Tag> {
        store::upsert_tx(tx, record, key, customize).await
    }

    /// Tag a format within a transaction. Returns true if the edge is new.
    pub async fn add_format_tx(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        tag: &str,
        uid: &str,
    ) -> Result<bool> {
        store::add_format_edge_tx(tx, tag, uid).await
    }

    /// Link a child tag within a transaction. Returns true if the edge is new.
    pub async fn add_child_tx(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        parent: &str,
        child: &str,
    ) -> Result<bool> {
        store::add_child_edge_tx(tx, parent, child).await
    }

    async fn tags_where(&self, join_and_filter: &str, bind: &str) -> Result<Vec<Tag>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM tags t {} ORDER BY t.tag",
            TAG_COLUMNS, join_and_filter
        ))
        .bind(bind)
        .fetch_all(&self.pool)
        .await
        .map_err(db_error)?;
        Ok(rows.iter().map(tag_from_row).collect())
    }

    async fn require(&self, tag: &str) -> Result<()> {
        let exists: bool = sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM tags WHERE tag = $1)")
            .bind(tag)
            .fetch_one(&self.pool)
            .await
            .map_err(db_error)?;
        if exists {
            Ok(())
        } else {
            Err(Error::TagNotFound(tag.to_string()))
        }
    }
}

#[async_trait]
impl TagRepository for PgTagRepository {
    async fn find(&self, tag: &str) -> Result<Option<Tag>> {
        let row = sqlx::query(&format!("SELECT {} FROM tags t WHERE t.tag = $1", TAG_COLUMNS))
            .bind(tag)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_error)?;
        Ok(row.map(|r| tag_from_row(&r)))
    }

    async fn find_by(&self, key: &Record) -> Result<Option<Tag>> {
        let mut tx = self.pool.begin().await.map_err(db_error)?;
        let found = store::find_by_tx(&mut tx, key).await?;
        tx.commit().await.map_err(db_error)?;
        Ok(found)
    }

    async fn upsert(&self, record: Record, key: Option<&[&str]>) -> Result<Tag> {
        let mut tx = self.pool.begin().await.map_err(db_error)?;
        let tag = self.upsert_tx(&mut tx, record, key, None).await?;
        tx.commit().await.map_err(db_error)?;
        Ok(tag)
    }

    async fn delete(&self, tag: &str) -> Result<bool> {
        let mut tx = self.pool.begin().await.map_err(db_error)?;
        let deleted = store::delete_tx::<Tag>(&mut tx, tag).await?;
        tx.commit().await.map_err(db_error)?;
        Ok(deleted)
    }

    async fn with_profile(&self, profile: Option<&str>) -> Result<Vec<Tag>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM tags t WHERE ($1::text IS NULL OR t.profile = $1) ORDER BY t.tag",
            TAG_COLUMNS
        ))
        .bind(profile)
        .fetch_all(&self.pool)
        .await
        .map_err(db_error)?;
        Ok(rows.iter().map(tag_from_row).collect())
    }

    async fn add_format(&self, tag: &str, uid: &str) -> Result<()> {
        let mut tx = self.pool.begin().await.map_err(db_error)?;
        let inserted = self.add_format_tx(&mut tx, tag, uid).await?;
        tx.commit().await.map_err(db_error)?;
        debug!(
            subsystem = "database",
            component = "tags",
            op = "add_format",
            tag,
            uid,
            inserted,
            "Tagged format"
        );
        Ok(())
    }

    async fn add_child(&self, parent: &str, child: &str) -> Result<()> {
        let mut tx = self.pool.begin().await.map_err(db_error)?;
        let inserted = self.add_child_tx(&mut tx, parent, child).await?;
        tx.commit().await.map_err(db_error)?;
        debug!(
            subsystem = "database",
            component = "tags",
            op = "add_child",
            parent,
            child,
            inserted,
            "Linked child tag"
        );
        Ok(())
    }

    async fn parent_tags(&self, tag: &str) -> Result<Vec<Tag>> {
        self.require(tag).await?;
        self.tags_where("JOIN tagged_tags tt ON tt.parent = t.tag WHERE tt.tag = $1", tag)
            .await
    }

    async fn child_tags(&self, tag: &str) -> Result<Vec<Tag>> {
        self.require(tag).await?;
        self.tags_where("JOIN tagged_tags tt ON tt.tag = t.tag WHERE tt.parent = $1", tag)
            .await
    }

    async fn direct_formats(&self, tag: &str) -> Result<Vec<Format>> {
        self.require(tag).await?;
        let rows = sqlx::query(&format!(
            r#"
            SELECT {}
            FROM formats f
            JOIN tagged_formats tf ON tf.format = f.uid
            WHERE tf.tag = $1
            ORDER BY f.uid
            "#,
            FORMAT_COLUMNS
        ))
        .bind(tag)
        .fetch_all(&self.pool)
        .await
        .map_err(db_error)?;
        Ok(rows.iter().map(format_from_row).collect())
    }
}
