//! Tag graph closure engine.
//!
//! Two strategies compute the same node sets:
//!
//! - **Fixed point**: breadth-first frontier queries against `tagged_tags`,
//!   driven by [`ClosureWalk`]. A tag is expanded at most once.
//! - **Recursive**: a single `WITH RECURSIVE` query whose `CYCLE` clause marks
//!   the row that closes a cycle and stops recursing there.
//!
//! Every read runs in a read-only `REPEATABLE READ` transaction so one call
//! sees one snapshot of the edge relations.

use std::collections::{BTreeMap, BTreeSet};
use std::time::Instant;

use async_trait::async_trait;
use sqlx::{Pool, Postgres, Row, Transaction};
use tracing::{debug, trace};

use fmtlib_core::{
    ClosureStrategy, ClosureWalk, Direction, Error, Format, Result, Tag, TagClosureRepository,
    TagEdge, TagGraph, TagNode,
};

use crate::formats::{format_from_row, FORMAT_COLUMNS};
use crate::store::db_error;
use crate::tags::{tag_from_row, TAG_COLUMNS};

/// Open a read-only transaction pinned to one snapshot.
pub(crate) async fn begin_snapshot(pool: &Pool<Postgres>) -> Result<Transaction<'static, Postgres>> {
    let mut tx = pool.begin().await.map_err(db_error)?;
    sqlx::query("SET TRANSACTION ISOLATION LEVEL REPEATABLE READ, READ ONLY")
        .execute(&mut *tx)
        .await
        .map_err(db_error)?;
    Ok(tx)
}

/// `(from, to)` columns of `tagged_tags` for one step in `direction`.
fn step_columns(direction: Direction) -> (&'static str, &'static str) {
    match direction {
        Direction::Ancestors => ("tag", "parent"),
        Direction::Descendants => ("parent", "tag"),
    }
}

/// Fixed-point closure of `starts`, starts included.
pub(crate) async fn walk_tx(
    tx: &mut Transaction<'_, Postgres>,
    starts: Vec<String>,
    direction: Direction,
) -> Result<BTreeSet<String>> {
    let (from, to) = step_columns(direction);
    let sql = format!("SELECT DISTINCT {to} AS id FROM tagged_tags WHERE {from} = ANY($1)");

    let mut walk = ClosureWalk::new(starts);
    let mut steps = 0usize;
    while !walk.is_done() {
        let rows = sqlx::query(&sql)
            .bind(walk.frontier())
            .fetch_all(&mut **tx)
            .await
            .map_err(db_error)?;
        walk.advance(rows.iter().map(|r| r.get::<String, _>("id")));
        steps += 1;
        trace!(step = steps, frontier = walk.frontier().len(), "Closure step");
    }
    Ok(walk.into_visited())
}

/// Recursive CTE named `closure(tag)` seeded by `seed_sql`.
///
/// `seed_sql` must select a single tag column.
pub(crate) fn recursive_cte(seed_sql: &str, direction: Direction) -> String {
    let (from, to) = step_columns(direction);
    format!(
        r#"
        WITH RECURSIVE closure(tag) AS (
            {seed_sql}
          UNION ALL
            SELECT tt.{to} FROM tagged_tags tt JOIN closure c ON tt.{from} = c.tag
        ) CYCLE tag SET is_cycle USING path
        "#
    )
}

/// Recursive closure of `starts`, starts included.
pub(crate) async fn recursive_tx(
    tx: &mut Transaction<'_, Postgres>,
    starts: Vec<String>,
    direction: Direction,
) -> Result<BTreeSet<String>> {
    let sql = format!(
        "{} SELECT DISTINCT tag FROM closure WHERE NOT is_cycle",
        recursive_cte("SELECT unnest($1::text[])", direction)
    );
    let ids: Vec<String> = sqlx::query_scalar(&sql)
        .bind(starts)
        .fetch_all(&mut **tx)
        .await
        .map_err(db_error)?;
    Ok(ids.into_iter().collect())
}

/// Closure of `starts` with the chosen strategy.
pub(crate) async fn closure_ids_tx(
    tx: &mut Transaction<'_, Postgres>,
    starts: Vec<String>,
    direction: Direction,
    strategy: ClosureStrategy,
) -> Result<BTreeSet<String>> {
    match strategy {
        ClosureStrategy::FixedPoint => walk_tx(tx, starts, direction).await,
        ClosureStrategy::Recursive => recursive_tx(tx, starts, direction).await,
    }
}

pub(crate) async fn require_tag_tx(tx: &mut Transaction<'_, Postgres>, tag: &str) -> Result<()> {
    let exists: bool = sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM tags WHERE tag = $1)")
        .bind(tag)
        .fetch_one(&mut **tx)
        .await
        .map_err(db_error)?;
    if exists {
        Ok(())
    } else {
        Err(Error::TagNotFound(tag.to_string()))
    }
}

pub(crate) async fn tags_by_id_tx(
    tx: &mut Transaction<'_, Postgres>,
    ids: &BTreeSet<String>,
) -> Result<BTreeMap<String, Tag>> {
    let ids: Vec<&str> = ids.iter().map(String::as_str).collect();
    let rows = sqlx::query(&format!(
        "SELECT {} FROM tags t WHERE t.tag = ANY($1)",
        TAG_COLUMNS
    ))
    .bind(&ids)
    .fetch_all(&mut **tx)
    .await
    .map_err(db_error)?;

    Ok(rows
        .iter()
        .map(tag_from_row)
        .map(|t| (t.tag.clone(), t))
        .collect())
}

/// Formats directly tagged with any of `tags`, grouped by tag.
pub(crate) async fn formats_by_tag_tx(
    tx: &mut Transaction<'_, Postgres>,
    tags: &BTreeSet<String>,
) -> Result<BTreeMap<String, Vec<Format>>> {
    let ids: Vec<&str> = tags.iter().map(String::as_str).collect();
    let rows = sqlx::query(&format!(
        r#"
        SELECT tf.tag AS tagged_by, {}
        FROM tagged_formats tf
        JOIN formats f ON f.uid = tf.format
        WHERE tf.tag = ANY($1)
        ORDER BY tf.tag, f.uid
        "#,
        FORMAT_COLUMNS
    ))
    .bind(&ids)
    .fetch_all(&mut **tx)
    .await
    .map_err(db_error)?;

    let mut grouped: BTreeMap<String, Vec<Format>> = BTreeMap::new();
    for row in &rows {
        grouped
            .entry(row.get("tagged_by"))
            .or_default()
            .push(format_from_row(row));
    }
    Ok(grouped)
}

/// PostgreSQL implementation of TagClosureRepository.
#[derive(Clone)]
pub struct PgTagClosureRepository {
    pool: Pool<Postgres>,
}

impl PgTagClosureRepository {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    async fn closure(
        &self,
        tag: &str,
        direction: Direction,
        strategy: ClosureStrategy,
    ) -> Result<BTreeMap<String, Tag>> {
        let start = Instant::now();
        let mut tx = begin_snapshot(&self.pool).await?;
        require_tag_tx(&mut tx, tag).await?;

        let ids = closure_ids_tx(&mut tx, vec![tag.to_string()], direction, strategy).await?;
        let tags = tags_by_id_tx(&mut tx, &ids).await?;
        tx.commit().await.map_err(db_error)?;

        debug!(
            subsystem = "graph",
            component = "closure",
            op = match direction {
                Direction::Ancestors => "ancestors",
                Direction::Descendants => "descendants",
            },
            tag,
            strategy = %strategy,
            result_count = tags.len(),
            duration_ms = start.elapsed().as_millis() as u64,
            "Closure computed"
        );
        Ok(tags)
    }

    /// Descendant subgraph of `tag` with its internal edges, in one snapshot.
    async fn subgraph_tx(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        tag: &str,
    ) -> Result<(BTreeSet<String>, TagGraph)> {
        require_tag_tx(tx, tag).await?;
        let ids = walk_tx(tx, vec![tag.to_string()], Direction::Descendants).await?;

        let id_list: Vec<&str> = ids.iter().map(String::as_str).collect();
        let rows = sqlx::query(
            "SELECT tag, parent FROM tagged_tags WHERE tag = ANY($1) AND parent = ANY($1)",
        )
        .bind(&id_list)
        .fetch_all(&mut **tx)
        .await
        .map_err(db_error)?;

        let graph = TagGraph::from_edges(
            rows.iter()
                .map(|r| TagEdge::new(r.get::<String, _>("tag"), r.get::<String, _>("parent"))),
        );
        Ok((ids, graph))
    }
}

#[async_trait]
impl TagClosureRepository for PgTagClosureRepository {
    async fn ancestors(
        &self,
        tag: &str,
        strategy: ClosureStrategy,
    ) -> Result<BTreeMap<String, Tag>> {
        self.closure(tag, Direction::Ancestors, strategy).await
    }

    async fn descendants(
        &self,
        tag: &str,
        strategy: ClosureStrategy,
    ) -> Result<BTreeMap<String, Tag>> {
        self.closure(tag, Direction::Descendants, strategy).await
    }

    async fn tree(&self, tag: &str) -> Result<TagNode> {
        let mut tx = begin_snapshot(&self.pool).await?;
        let (_, graph) = self.subgraph_tx(&mut tx, tag).await?;
        tx.commit().await.map_err(db_error)?;

        let tree = graph.tree(tag);
        debug!(
            subsystem = "graph",
            component = "closure",
            op = "tree",
            tag,
            result_count = tree.node_count(),
            "Tree built"
        );
        Ok(tree)
    }

    async fn tree_with_formats(&self, tag: &str) -> Result<TagNode> {
        let mut tx = begin_snapshot(&self.pool).await?;
        let (ids, graph) = self.subgraph_tx(&mut tx, tag).await?;
        let formats = formats_by_tag_tx(&mut tx, &ids).await?;
        tx.commit().await.map_err(db_error)?;

        let mut tree = graph.tree(tag);
        tree.decorate(&formats);
        debug!(
            subsystem = "graph",
            component = "closure",
            op = "tree_with_formats",
            tag,
            result_count = tree.node_count(),
            "Tree built"
        );
        Ok(tree)
    }
}
