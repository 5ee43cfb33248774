//! Migrations: versioned, forward-only transforms over untyped state and the
//! engine that sequences them.
//!
//! # Invariants
//! - Migrations only ever move state forward; there is no rollback.
//! - Every version in `from + 1 ..= to` must be registered exactly once, or
//!   nothing runs.
//! - A failed step never yields partial state.

pub mod engine;
pub mod migration;

pub use engine::{MigrationEngine, MigrationError, TransformPanic};
pub use migration::{Migration, TransformError, assert_distinct_versions};
