//! Entity store primitives shared by the repositories and the loader.
//!
//! Everything here takes an open transaction so that callers can compose a
//! find-or-create-merge with edge inserts and commit or roll back as a unit.

use async_trait::async_trait;
use sqlx::postgres::PgRow;
use sqlx::{Postgres, Row, Transaction};
use tracing::{debug, trace};

use fmtlib_core::record::{key_of, key_text};
use fmtlib_core::{Entity, Error, Record, Result};

/// Caller-supplied step run after the record is merged and before the entity
/// is persisted.
pub type Customize<'a, E> = &'a (dyn Fn(&mut E) -> Result<()> + Send + Sync);

/// Map a sqlx error, surfacing foreign-key and unique violations as data errors.
pub(crate) fn db_error(e: sqlx::Error) -> Error {
    if let sqlx::Error::Database(db) = &e {
        if matches!(db.code().as_deref(), Some("23503") | Some("23505")) {
            let constraint = db.constraint().unwrap_or("unnamed");
            return Error::Constraint(format!("{} ({})", db.message(), constraint));
        }
    }
    Error::Database(e)
}

/// Row mapping and persistence for one entity table.
#[async_trait]
pub(crate) trait PgEntity: Entity {
    /// Table alias used in `COLUMNS`.
    const ALIAS: &'static str;

    /// Select list, qualified with `ALIAS`.
    const COLUMNS: &'static str;

    /// Scalar columns a lookup key may name.
    const LOOKUP_COLUMNS: &'static [&'static str];

    fn from_row(row: &PgRow) -> Self;

    async fn insert_tx(&self, tx: &mut Transaction<'_, Postgres>) -> Result<()>;

    async fn update_tx(&self, tx: &mut Transaction<'_, Postgres>) -> Result<()>;
}

/// Find an entity by primary key.
pub(crate) async fn find_tx<E: PgEntity>(
    tx: &mut Transaction<'_, Postgres>,
    key: &str,
) -> Result<Option<E>> {
    let sql = format!(
        "SELECT {} FROM {} {} WHERE {}.{} = $1",
        E::COLUMNS,
        E::KIND.table(),
        E::ALIAS,
        E::ALIAS,
        E::PRIMARY_KEY
    );
    let row = sqlx::query(&sql)
        .bind(key)
        .fetch_optional(&mut **tx)
        .await
        .map_err(db_error)?;
    Ok(row.map(|r| E::from_row(&r)))
}

/// Find the first entity (by primary key order) matching every key entry.
///
/// Key columns are checked against `LOOKUP_COLUMNS` before they reach SQL.
pub(crate) async fn find_by_tx<E: PgEntity>(
    tx: &mut Transaction<'_, Postgres>,
    key: &Record,
) -> Result<Option<E>> {
    if key.is_empty() {
        return Err(Error::InvalidInput(format!(
            "Empty lookup key for {}",
            E::KIND
        )));
    }

    let mut conditions = Vec::with_capacity(key.len());
    for (i, field) in key.keys().enumerate() {
        if !E::LOOKUP_COLUMNS.contains(&field.as_str()) {
            return Err(Error::InvalidInput(format!(
                "'{}' cannot be used as a {} lookup key",
                field,
                E::KIND
            )));
        }
        conditions.push(format!("{}.{}::text = ${}", E::ALIAS, field, i + 1));
    }

    let sql = format!(
        "SELECT {} FROM {} {} WHERE {} ORDER BY {}.{} LIMIT 1",
        E::COLUMNS,
        E::KIND.table(),
        E::ALIAS,
        conditions.join(" AND "),
        E::ALIAS,
        E::PRIMARY_KEY
    );

    let mut query = sqlx::query(&sql);
    for value in key.values() {
        query = query.bind(key_text(value));
    }
    let row = query.fetch_optional(&mut **tx).await.map_err(db_error)?;
    Ok(row.map(|r| E::from_row(&r)))
}

/// Find-or-create by `key_fields` (default: primary key), merge, persist.
///
/// A new entity takes its required fields from `record`; they must be
/// present and non-null. Values are otherwise stored as given.
///
/// A transaction-scoped advisory lock on the lookup key serializes concurrent
/// upserts that use the same key. The lock is taken before the row is
/// resolved, so two upserts reaching one row through different `key_fields`
/// are not serialized against each other.
pub(crate) async fn upsert_tx<E: PgEntity>(
    tx: &mut Transaction<'_, Postgres>,
    record: Record,
    key_fields: Option<&[&str]>,
    customize: Option<Customize<'_, E>>,
) -> Result<E> {
    let default_key = [E::PRIMARY_KEY];
    let key = key_of(&record, key_fields.unwrap_or(&default_key))?;

    lock_key_tx(tx, &lock_name::<E>(&key)).await?;

    let record_pk = match record.get(E::PRIMARY_KEY) {
        None | Some(serde_json::Value::Null) => None,
        Some(serde_json::Value::String(s)) => Some(s.clone()),
        Some(other) => {
            return Err(Error::InvalidInput(format!(
                "{} '{}' must be a string, got {}",
                E::KIND,
                E::PRIMARY_KEY,
                other
            )))
        }
    };

    let existing: Option<E> = find_by_tx(tx, &key).await?;
    let is_new = existing.is_none();

    let base = match existing {
        Some(entity) => {
            if let Some(pk) = &record_pk {
                if pk != entity.key() {
                    return Err(Error::InvalidInput(format!(
                        "{} '{}' is immutable: record has '{}'",
                        E::KIND,
                        entity.key(),
                        pk
                    )));
                }
            }
            entity
        }
        None if record_pk.is_none() => {
            return Err(Error::InvalidInput(format!(
                "New {} record is missing '{}'",
                E::KIND,
                E::PRIMARY_KEY
            )))
        }
        None => {
            E::require_fields(&record)?;
            E::blank()
        }
    };

    let pk = base.key().to_string();
    let mut entity = base.merge(&record)?;

    if let Some(customize) = customize {
        customize(&mut entity)?;
    }
    if !is_new && entity.key() != pk {
        return Err(Error::InvalidInput(format!(
            "{} '{}' is immutable",
            E::KIND,
            pk
        )));
    }

    if is_new {
        entity.insert_tx(tx).await?;
    } else {
        entity.update_tx(tx).await?;
    }

    debug!(
        subsystem = "database",
        component = "store",
        op = "upsert",
        db_table = E::KIND.table(),
        key = entity.key(),
        created = is_new,
        "Upserted entity"
    );
    Ok(entity)
}

/// Delete an entity by primary key. Dependent edges cascade in the schema.
pub(crate) async fn delete_tx<E: PgEntity>(
    tx: &mut Transaction<'_, Postgres>,
    key: &str,
) -> Result<bool> {
    let sql = format!(
        "DELETE FROM {} WHERE {} = $1",
        E::KIND.table(),
        E::PRIMARY_KEY
    );
    let result = sqlx::query(&sql)
        .bind(key)
        .execute(&mut **tx)
        .await
        .map_err(db_error)?;
    Ok(result.rows_affected() > 0)
}

/// Idempotently tag a format.
pub(crate) async fn add_format_edge_tx(
    tx: &mut Transaction<'_, Postgres>,
    tag: &str,
    uid: &str,
) -> Result<bool> {
    let result = sqlx::query(
        "INSERT INTO tagged_formats (tag, format) VALUES ($1, $2) ON CONFLICT DO NOTHING",
    )
    .bind(tag)
    .bind(uid)
    .execute(&mut **tx)
    .await
    .map_err(db_error)?;

    trace!(tag, uid, inserted = result.rows_affected() > 0, "Format edge");
    Ok(result.rows_affected() > 0)
}

/// Idempotently make `child` a child of `parent`.
pub(crate) async fn add_child_edge_tx(
    tx: &mut Transaction<'_, Postgres>,
    parent: &str,
    child: &str,
) -> Result<bool> {
    let result = sqlx::query(
        "INSERT INTO tagged_tags (tag, parent) VALUES ($1, $2) ON CONFLICT DO NOTHING",
    )
    .bind(child)
    .bind(parent)
    .execute(&mut **tx)
    .await
    .map_err(db_error)?;

    trace!(parent, child, inserted = result.rows_affected() > 0, "Tag edge");
    Ok(result.rows_affected() > 0)
}

async fn lock_key_tx(tx: &mut Transaction<'_, Postgres>, name: &str) -> Result<()> {
    sqlx::query("SELECT pg_advisory_xact_lock(hashtextextended($1, 0))")
        .bind(name)
        .execute(&mut **tx)
        .await
        .map_err(db_error)?;
    Ok(())
}

fn lock_name<E: Entity>(key: &Record) -> String {
    let parts: Vec<String> = key
        .iter()
        .map(|(field, value)| format!("{}={}", field, key_text(value)))
        .collect();
    format!("{}:{}", E::KIND, parts.join("&"))
}

/// Read a `jsonb` object column, tolerating legacy non-object values.
pub(crate) fn json_map(row: &PgRow, column: &str) -> fmtlib_core::JsonMap {
    match row.get::<serde_json::Value, _>(column) {
        serde_json::Value::Object(map) => map,
        _ => fmtlib_core::JsonMap::new(),
    }
}
