//! Transitive format/tag associations composed from tag closures.

use std::collections::{BTreeMap, BTreeSet};
use std::time::Instant;

use async_trait::async_trait;
use sqlx::{Pool, Postgres, Transaction};
use tracing::debug;

use fmtlib_core::{
    AssociationRepository, ClosureStrategy, Direction, Error, Format, Result, Tag,
};

use crate::closure::{
    begin_snapshot, closure_ids_tx, recursive_cte, require_tag_tx, tags_by_id_tx,
};
use crate::formats::{format_from_row, FORMAT_COLUMNS};
use crate::store::db_error;

/// PostgreSQL implementation of AssociationRepository.
#[derive(Clone)]
pub struct PgAssociationRepository {
    pool: Pool<Postgres>,
}

impl PgAssociationRepository {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    async fn direct_tag_ids_tx(
        tx: &mut Transaction<'_, Postgres>,
        uid: &str,
    ) -> Result<Vec<String>> {
        let exists: bool = sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM formats WHERE uid = $1)")
            .bind(uid)
            .fetch_one(&mut **tx)
            .await
            .map_err(db_error)?;
        if !exists {
            return Err(Error::FormatNotFound(uid.to_string()));
        }

        sqlx::query_scalar("SELECT tag FROM tagged_formats WHERE format = $1")
            .bind(uid)
            .fetch_all(&mut **tx)
            .await
            .map_err(db_error)
    }

    async fn formats_tagged_with_tx(
        tx: &mut Transaction<'_, Postgres>,
        tags: &BTreeSet<String>,
    ) -> Result<BTreeMap<String, Format>> {
        let ids: Vec<&str> = tags.iter().map(String::as_str).collect();
        let rows = sqlx::query(&format!(
            r#"
            SELECT {}
            FROM formats f
            WHERE f.uid IN (SELECT tf.format FROM tagged_formats tf WHERE tf.tag = ANY($1))
            "#,
            FORMAT_COLUMNS
        ))
        .bind(&ids)
        .fetch_all(&mut **tx)
        .await
        .map_err(db_error)?;

        Ok(rows
            .iter()
            .map(format_from_row)
            .map(|f| (f.uid.clone(), f))
            .collect())
    }

    /// Single-statement variant of `all_tags_of_format`: the CTE is seeded
    /// directly from the format's edges.
    async fn all_tags_recursive_tx(
        tx: &mut Transaction<'_, Postgres>,
        uid: &str,
    ) -> Result<BTreeSet<String>> {
        let sql = format!(
            "{} SELECT DISTINCT tag FROM closure WHERE NOT is_cycle",
            recursive_cte(
                "SELECT tf.tag FROM tagged_formats tf WHERE tf.format = $1",
                Direction::Ancestors
            )
        );
        let ids: Vec<String> = sqlx::query_scalar(&sql)
            .bind(uid)
            .fetch_all(&mut **tx)
            .await
            .map_err(db_error)?;
        Ok(ids.into_iter().collect())
    }
}

#[async_trait]
impl AssociationRepository for PgAssociationRepository {
    async fn all_tags_of_format(
        &self,
        uid: &str,
        strategy: ClosureStrategy,
    ) -> Result<BTreeMap<String, Tag>> {
        let start = Instant::now();
        let mut tx = begin_snapshot(&self.pool).await?;
        let direct = Self::direct_tag_ids_tx(&mut tx, uid).await?;

        let ids = match strategy {
            ClosureStrategy::FixedPoint => {
                closure_ids_tx(&mut tx, direct, Direction::Ancestors, strategy).await?
            }
            ClosureStrategy::Recursive => Self::all_tags_recursive_tx(&mut tx, uid).await?,
        };
        let tags = tags_by_id_tx(&mut tx, &ids).await?;
        tx.commit().await.map_err(db_error)?;

        debug!(
            subsystem = "graph",
            component = "associations",
            op = "all_tags_of_format",
            uid,
            strategy = %strategy,
            result_count = tags.len(),
            duration_ms = start.elapsed().as_millis() as u64,
            "Resolved format tags"
        );
        Ok(tags)
    }

    async fn all_formats_under_tag(
        &self,
        tag: &str,
        strategy: ClosureStrategy,
    ) -> Result<BTreeMap<String, Format>> {
        let start = Instant::now();
        let mut tx = begin_snapshot(&self.pool).await?;
        require_tag_tx(&mut tx, tag).await?;

        let tags =
            closure_ids_tx(&mut tx, vec![tag.to_string()], Direction::Descendants, strategy)
                .await?;
        let formats = Self::formats_tagged_with_tx(&mut tx, &tags).await?;
        tx.commit().await.map_err(db_error)?;

        debug!(
            subsystem = "graph",
            component = "associations",
            op = "all_formats_under_tag",
            tag,
            strategy = %strategy,
            result_count = formats.len(),
            duration_ms = start.elapsed().as_millis() as u64,
            "Resolved tag formats"
        );
        Ok(formats)
    }
}
