//! Persisted state: a versioned blob behind an async key-value store, loaded,
//! migrated forward and validated on startup, and written back on every change.
//!
//! # Invariants
//! - `init` never fails for data-quality reasons; unreadable, unmigratable or
//!   invalid data is replaced by schema defaults.
//! - The in-memory state always satisfies the schema and carries the current
//!   version.
//! - Write-path failures (`set`, `update`, `clear`) always reach the caller and
//!   leave memory unchanged.

pub mod config;
pub mod file;
pub mod state;
pub mod storage;

pub use config::{ConfigError, DEFAULT_VERSION_FIELD, DriftPolicy, StateConfig, StateManifest};
pub use file::FileStorage;
pub use state::{DriftReport, InitOutcome, PersistedState, ResetReason, StateError};
pub use storage::{MemoryStorage, StorageAdapter, StorageError};
pub use vstate_migrate::{Migration, MigrationEngine, MigrationError, migrations};
pub use vstate_schema::{Schema, SchemaNode, ValidationError};
