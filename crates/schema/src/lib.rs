//! Schemas for persisted state: a closed tree of node kinds, validation with
//! default filling, and shape fingerprints for drift detection.
//!
//! # Invariants
//! - `Schema::parse` is a pure function of its input and the schema.
//! - `type_descriptor` is total; it never fails.
//! - Structurally identical schemas always share a fingerprint.

pub mod fingerprint;
pub mod node;
pub mod validate;

pub use fingerprint::{SchemaError, extract_shape, fingerprint, hash, type_descriptor};
pub use node::{Schema, SchemaNode};
pub use validate::{ValidationError, ValidationIssue};
