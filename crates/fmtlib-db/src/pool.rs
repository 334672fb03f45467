//! Connection pool setup.

use std::time::{Duration, Instant};

use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::Executor;
use tracing::info;

use fmtlib_core::{defaults, Error, Result};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
const IDLE_TIMEOUT: Duration = Duration::from_secs(600);
const MAX_LIFETIME: Duration = Duration::from_secs(1800);

/// Pool settings.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub max_connections: u32,
    /// How long to wait for a free connection.
    pub connect_timeout: Duration,
    /// Schema placed ahead of `public` on every connection.
    pub search_path: Option<String>,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_connections: defaults::DB_MAX_CONNECTIONS,
            connect_timeout: CONNECT_TIMEOUT,
            search_path: None,
        }
    }
}

impl PoolConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Defaults, with `DB_MAX_CONNECTIONS` applied when set.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        if let Ok(raw) = std::env::var("DB_MAX_CONNECTIONS") {
            config.max_connections = match raw.trim().parse::<u32>() {
                Ok(n) if n > 0 => n,
                _ => {
                    return Err(Error::Config(format!(
                        "DB_MAX_CONNECTIONS must be a positive integer, got '{}'",
                        raw
                    )))
                }
            };
        }
        Ok(config)
    }

    pub fn max_connections(mut self, n: u32) -> Self {
        self.max_connections = n;
        self
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Resolve unqualified table names in `schema` first.
    pub fn search_path(mut self, schema: impl Into<String>) -> Self {
        self.search_path = Some(schema.into());
        self
    }
}

/// Check a schema name before it is interpolated into SQL.
///
/// ASCII letters, digits and underscores, not starting with a digit, at most
/// 63 bytes (the PostgreSQL identifier limit).
pub fn validate_schema_name(name: &str) -> Result<()> {
    let starts_ok = name
        .chars()
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_');
    if !starts_ok
        || name.len() > 63
        || !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
    {
        return Err(Error::Config(format!("Invalid schema name '{}'", name)));
    }
    Ok(())
}

pub async fn create_pool(database_url: &str) -> Result<PgPool> {
    create_pool_with_config(database_url, PoolConfig::default()).await
}

pub async fn create_pool_with_config(database_url: &str, config: PoolConfig) -> Result<PgPool> {
    let start = Instant::now();

    let mut options = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .min_connections(1)
        .acquire_timeout(config.connect_timeout)
        .idle_timeout(IDLE_TIMEOUT)
        .max_lifetime(MAX_LIFETIME);

    if let Some(schema) = &config.search_path {
        validate_schema_name(schema)?;
        let statement = format!("SET search_path TO {}, public", schema);
        options = options.after_connect(move |conn, _meta| {
            let statement = statement.clone();
            Box::pin(async move {
                conn.execute(statement.as_str()).await?;
                Ok(())
            })
        });
    }

    let pool = options.connect(database_url).await?;

    info!(
        subsystem = "database",
        component = "pool",
        op = "connect",
        max_connections = config.max_connections,
        search_path = config.search_path.as_deref().unwrap_or("default"),
        pool_size = pool.size(),
        duration_ms = start.elapsed().as_millis() as u64,
        "Database pool ready"
    );
    Ok(pool)
}
