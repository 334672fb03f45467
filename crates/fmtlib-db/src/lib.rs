//! # fmtlib-db
//!
//! PostgreSQL entity store for the format library.
//!
//! This crate provides:
//! - Connection pool management
//! - Format and tag repositories with per-key-locked upsert
//! - Idempotent edge inserts for both edge relations
//! - The tag closure engine (fixed-point and recursive-CTE strategies)
//! - The association resolver
//! - The hash-driven loader for YAML/JSON bulk documents
//!
//! ## Example
//!
//! ```rust,ignore
//! use fmtlib_db::{AssociationRepository, ClosureStrategy, Database};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let db = Database::connect("postgres://localhost/fmtlib").await?;
//!     db.migrate().await?;
//!
//!     let tags = db
//!         .associations
//!         .all_tags_of_format("fmt/114", ClosureStrategy::FixedPoint)
//!         .await?;
//!     println!("{:?}", tags.keys().collect::<Vec<_>>());
//!     Ok(())
//! }
//! ```
pub mod associations;
pub mod closure;
pub mod formats;
pub mod loader;
pub mod pool;
mod store;
pub mod tags;

// Test fixtures for integration tests
// Note: Always compiled so integration tests (in tests/) can use them
pub mod test_fixtures;

// Re-export core types
pub use fmtlib_core::*;

pub use associations::PgAssociationRepository;
pub use closure::PgTagClosureRepository;
pub use formats::PgFormatRepository;
pub use loader::{LoadSummary, Loader};
pub use pool::{create_pool, create_pool_with_config, validate_schema_name, PoolConfig};
pub use store::Customize;
pub use tags::PgTagRepository;

/// Combined database context with all repositories.
#[derive(Clone)]
pub struct Database {
    /// The underlying connection pool.
    pub pool: sqlx::Pool<sqlx::Postgres>,
    /// Format entities.
    pub formats: PgFormatRepository,
    /// Tag entities and both edge relations.
    pub tags: PgTagRepository,
    /// Ancestor/descendant closures and tree views.
    pub closure: PgTagClosureRepository,
    /// Transitive format/tag associations.
    pub associations: PgAssociationRepository,
}

impl Database {
    /// Create a new Database instance from a connection pool.
    pub fn new(pool: sqlx::Pool<sqlx::Postgres>) -> Self {
        Self {
            formats: PgFormatRepository::new(pool.clone()),
            tags: PgTagRepository::new(pool.clone()),
            closure: PgTagClosureRepository::new(pool.clone()),
            associations: PgAssociationRepository::new(pool.clone()),
            pool,
        }
    }

    /// Create a new Database instance by connecting to the given URL.
    pub async fn connect(url: &str) -> Result<Self> {
        let pool = create_pool(url).await?;
        Ok(Self::new(pool))
    }

    /// Create with custom pool configuration.
    pub async fn connect_with_config(url: &str, config: PoolConfig) -> Result<Self> {
        let pool = create_pool_with_config(url, config).await?;
        Ok(Self::new(pool))
    }

    /// Run pending migrations.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("../../migrations")
            .run(&self.pool)
            .await
            .map_err(|e| Error::Database(sqlx::Error::Migrate(Box::new(e))))?;
        Ok(())
    }

    /// A loader writing through this database's pool.
    pub fn loader(&self) -> Loader {
        Loader::new(self.pool.clone())
    }

    /// Get the underlying connection pool.
    pub fn pool(&self) -> &sqlx::Pool<sqlx::Postgres> {
        &self.pool
    }
}
