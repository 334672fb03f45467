//! Structured logging schema and field name constants for the format library.
//!
//! All crates use these constants for consistent structured logging fields.
//! `tracing` macros need literal field names, so the constants document the
//! vocabulary.
//!
//! ## Log Level Contract
//!
//! | Level | Usage |
//! |-------|-------|
//! | ERROR | Ingestion run aborted, data left partially committed |
//! | WARN  | Recoverable issue, record skipped or fallback applied |
//! | INFO  | Lifecycle events (pool, migrations), run completions |
//! | DEBUG | Decision points (chosen catalog link, lookup keys) |
//! | TRACE | Per-record iteration (each upserted format, each edge) |

// ─── Identity fields ───────────────────────────────────────────────────────

/// Subsystem originating the log event.
/// Values: "database", "ingest", "loader", "cli"
pub const SUBSYSTEM: &str = "subsystem";

/// Component within a subsystem.
/// Examples: "pool", "formats", "tags", "closure", "pronom", "loc"
pub const COMPONENT: &str = "component";

/// Logical operation name.
/// Examples: "upsert", "ancestors", "tree", "fetch", "parse"
pub const OPERATION: &str = "op";

// ─── Entity fields ─────────────────────────────────────────────────────────

/// Format identifier (PUID or FDD id).
pub const UID: &str = "uid";

/// Tag identifier.
pub const TAG: &str = "tag";

/// Catalog source label ("PRONOM", "LOC").
pub const SOURCE: &str = "source";

/// Catalog file or page an ingestion run read.
pub const LINK: &str = "link";

/// Entity kind of a bulk load ("format", "tag").
pub const ENTITY: &str = "entity";

/// Closure strategy ("fixed_point", "recursive").
pub const STRATEGY: &str = "strategy";

// ─── Measurement fields ────────────────────────────────────────────────────

/// Wall-clock duration in milliseconds.
pub const DURATION_MS: &str = "duration_ms";

/// Number of results returned by a query.
pub const RESULT_COUNT: &str = "result_count";

/// Number of records processed by an ingestion run or bulk load.
pub const RECORD_COUNT: &str = "record_count";

// ─── Database fields ───────────────────────────────────────────────────────

/// Number of active connections in the pool.
pub const POOL_SIZE: &str = "pool_size";

/// Database table or entity affected.
pub const DB_TABLE: &str = "db_table";

// ─── Outcome fields ────────────────────────────────────────────────────────

/// Error message when an operation fails.
pub const ERROR_MSG: &str = "error";
