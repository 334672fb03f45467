//! # fmtlib-core
//!
//! Core types, traits, and algorithms for the format library.
//!
//! This crate provides the domain entities (formats and tags), the
//! declarative record model used by every bulk input, the cycle-safe
//! closure walk over the tag graph, and the repository traits that the
//! storage crate implements.

pub mod closure;
pub mod defaults;
pub mod error;
pub mod logging;
pub mod models;
pub mod record;
pub mod traits;
pub mod version;

// Re-export commonly used types at crate root
pub use closure::{ClosureStrategy, ClosureWalk, Direction, TagEdge, TagGraph};
pub use error::{Error, Result};
pub use models::*;
pub use record::Record;
pub use traits::*;
pub use version::{latest_version, natural_cmp};
