//! Format repository implementation.

use async_trait::async_trait;
use sqlx::postgres::PgRow;
use sqlx::types::Json;
use sqlx::{Pool, Postgres, Row, Transaction};

use fmtlib_core::{Error, Format, FormatRepository, Record, Result, Tag};

use crate::store::{self, db_error, json_map, Customize, PgEntity};
use crate::tags::TAG_COLUMNS;

/// Format select list, aliased `f`.
pub(crate) const FORMAT_COLUMNS: &str = "f.uid, f.name, f.version, f.source, f.source_version, \
     f.url, f.mimetypes, f.extensions, f.parent_format, f.related_formats, f.properties, \
     f.created_at";

pub(crate) fn format_from_row(row: &PgRow) -> Format {
    Format {
        uid: row.get("uid"),
        name: row.get("name"),
        version: row.get("version"),
        source: row.get("source"),
        source_version: row.get("source_version"),
        url: row.get("url"),
        mimetypes: row.get("mimetypes"),
        extensions: row.get("extensions"),
        parent_format: row.get("parent_format"),
        related_formats: row.get("related_formats"),
        properties: json_map(row, "properties"),
        created_at: row.get("created_at"),
    }
}

#[async_trait]
impl PgEntity for Format {
    const ALIAS: &'static str = "f";
    const COLUMNS: &'static str = FORMAT_COLUMNS;
    const LOOKUP_COLUMNS: &'static [&'static str] = &[
        "uid",
        "name",
        "version",
        "source",
        "source_version",
        "url",
        "parent_format",
        "created_at",
    ];

    fn from_row(row: &PgRow) -> Self {
        format_from_row(row)
    }

    async fn insert_tx(&self, tx: &mut Transaction<'_, Postgres>) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO formats (
                uid, name, version, source, source_version, url, mimetypes,
                extensions, parent_format, related_formats, properties, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            "#,
        )
        .bind(&self.uid)
        .bind(&self.name)
        .bind(&self.version)
        .bind(&self.source)
        .bind(&self.source_version)
        .bind(&self.url)
        .bind(&self.mimetypes)
        .bind(&self.extensions)
        .bind(&self.parent_format)
        .bind(&self.related_formats)
        .bind(Json(&self.properties))
        .bind(self.created_at)
        .execute(&mut **tx)
        .await
        .map_err(db_error)?;
        Ok(())
    }

    async fn update_tx(&self, tx: &mut Transaction<'_, Postgres>) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE formats SET
                name = $2, version = $3, source = $4, source_version = $5, url = $6,
                mimetypes = $7, extensions = $8, parent_format = $9,
                related_formats = $10, properties = $11, created_at = $12
            WHERE uid = $1
            "#,
        )
        .bind(&self.uid)
        .bind(&self.name)
        .bind(&self.version)
        .bind(&self.source)
        .bind(&self.source_version)
        .bind(&self.url)
        .bind(&self.mimetypes)
        .bind(&self.extensions)
        .bind(&self.parent_format)
        .bind(&self.related_formats)
        .bind(Json(&self.properties))
        .bind(self.created_at)
        .execute(&mut **tx)
        .await
        .map_err(db_error)?;
        Ok(())
    }
}

/// PostgreSQL implementation of FormatRepository.
#[derive(Clone)]
pub struct PgFormatRepository {
    pool: Pool<Postgres>,
}

impl PgFormatRepository {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    /// Upsert within a caller-owned transaction, with an optional
    /// customization step applied before persisting.
    pub async fn upsert_tx(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        record: Record,
        key: Option<&[&str]>,
        customize: Option<Customize<'_, Format>>,
    ) -> Result<Format> {
        store::upsert_tx(tx, record, key, customize).await
    }

    pub async fn find_tx(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        uid: &str,
    ) -> Result<Option<Format>> {
        store::find_tx(tx, uid).await
    }
}

#[async_trait]
impl FormatRepository for PgFormatRepository {
    async fn find(&self, uid: &str) -> Result<Option<Format>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM formats f WHERE f.uid = $1",
            FORMAT_COLUMNS
        ))
        .bind(uid)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error)?;
        Ok(row.map(|r| format_from_row(&r)))
    }

    async fn find_by(&self, key: &Record) -> Result<Option<Format>> {
        let mut tx = self.pool.begin().await.map_err(db_error)?;
        let found = store::find_by_tx(&mut tx, key).await?;
        tx.commit().await.map_err(db_error)?;
        Ok(found)
    }

    async fn upsert(&self, record: Record, key: Option<&[&str]>) -> Result<Format> {
        let mut tx = self.pool.begin().await.map_err(db_error)?;
        let format = self.upsert_tx(&mut tx, record, key, None).await?;
        tx.commit().await.map_err(db_error)?;
        Ok(format)
    }

    async fn delete(&self, uid: &str) -> Result<bool> {
        let mut tx = self.pool.begin().await.map_err(db_error)?;
        let deleted = store::delete_tx::<Format>(&mut tx, uid).await?;
        tx.commit().await.map_err(db_error)?;
        Ok(deleted)
    }

    async fn count(&self) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM formats")
            .fetch_one(&self.pool)
            .await
            .map_err(db_error)?;
        Ok(count)
    }

    async fn list_by_source(&self, source: &str) -> Result<Vec<Format>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM formats f WHERE f.source = $1 ORDER BY f.uid",
            FORMAT_COLUMNS
        ))
        .bind(source)
        .fetch_all(&self.pool)
        .await
        .map_err(db_error)?;
        Ok(rows.iter().map(format_from_row).collect())
    }

    async fn direct_tags(&self, uid: &str) -> Result<Vec<Tag>> {
        if self.find(uid).await?.is_none() {
            return Err(Error::FormatNotFound(uid.to_string()));
        }
        let rows = sqlx::query(&format!(
            r#"
            SELECT {}
            FROM tags t
            JOIN tagged_formats tf ON tf.tag = t.tag
            WHERE tf.format = $1
            ORDER BY t.tag
            "#,
            TAG_COLUMNS
        ))
        .bind(uid)
        .fetch_all(&self.pool)
        .await
        .map_err(db_error)?;
        Ok(rows.iter().map(crate::tags::tag_from_row).collect())
    }
}
