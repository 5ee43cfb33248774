//! Schema-shape fingerprints for drift detection.
//!
//! A fingerprint is a short base-36 digest of a canonical rendering of the
//! schema's field shape. It is collision-tolerant and only meant to flag that
//! a schema changed between releases; it carries no integrity guarantee.

use crate::node::{Schema, SchemaNode};

/// Errors from fingerprinting a schema.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SchemaError {
    #[error("invalid schema: {0}")]
    InvalidSchema(String),
}

/// Render a node as its canonical type token.
///
/// Total over [`SchemaNode`]: defaults do not affect identity, object keys are
/// sorted, enum values keep declaration order, and map keys are not encoded.
pub fn type_descriptor(node: &SchemaNode) -> String {
    match node {
        SchemaNode::String => "string".into(),
        SchemaNode::Number => "number".into(),
        SchemaNode::Boolean => "boolean".into(),
        SchemaNode::Null => "null".into(),
        SchemaNode::Undefined => "undefined".into(),
        SchemaNode::Date => "date".into(),
        SchemaNode::Any => "any".into(),
        SchemaNode::Unknown => "unknown".into(),
        SchemaNode::Void => "void".into(),
        SchemaNode::Never => "never".into(),
        SchemaNode::Array { items } => format!("array<{}>", type_descriptor(items)),
        SchemaNode::Object { fields } => format!("object{}", render_fields(fields.iter())),
        SchemaNode::Optional { inner } => format!("optional<{}>", type_descriptor(inner)),
        SchemaNode::Nullable { inner } => format!("nullable<{}>", type_descriptor(inner)),
        SchemaNode::Defaulted { inner, .. } => type_descriptor(inner),
        SchemaNode::Enum { values } => format!("enum[{}]", values.join(",")),
        SchemaNode::Literal { value: serde_json::Value::String(text) } => format!("literal<{text}>"),
        SchemaNode::Literal { value } => format!("literal<{value}>"),
        SchemaNode::Union { options } => format!("union<{}>", join(options, "|")),
        SchemaNode::Intersection { left, right } => {
            format!("intersection<{}&{}>", type_descriptor(left), type_descriptor(right))
        }
        SchemaNode::Record { values } => format!("record<{}>", type_descriptor(values)),
        SchemaNode::Tuple { items } => format!("tuple<{}>", join(items, ",")),
        SchemaNode::Map { values } => format!("map<{}>", type_descriptor(values)),
        SchemaNode::Set { items } => format!("set<{}>", type_descriptor(items)),
        SchemaNode::Opaque { .. } => "unknown".into(),
    }
}

fn join(nodes: &[SchemaNode], separator: &str) -> String {
    nodes
        .iter()
        .map(type_descriptor)
        .collect::<Vec<_>>()
        .join(separator)
}

fn render_fields<'a>(fields: impl Iterator<Item = (&'a String, &'a SchemaNode)>) -> String {
    let mut entries: Vec<(&String, String)> = fields.map(|(k, v)| (k, type_descriptor(v))).collect();
    entries.sort_by(|a, b| a.0.cmp(b.0));
    let body = entries
        .iter()
        .map(|(k, d)| format!("{k}:{d}"))
        .collect::<Vec<_>>()
        .join(",");
    format!("{{{body}}}")
}

/// Canonical `{key:descriptor,...}` rendering of a schema's root fields.
///
/// Fails with [`SchemaError::InvalidSchema`] when the root is not an object.
pub fn extract_shape(schema: &Schema) -> Result<String, SchemaError> {
    let fields = schema.fields().ok_or_else(|| {
        SchemaError::InvalidSchema(format!(
            "root must be an object with a field map, found {}",
            type_descriptor(schema.root())
        ))
    })?;
    Ok(render_fields(fields.iter()))
}

/// 32-bit rolling hash (`h = h * 31 + unit` over UTF-16 code units, wrapping
/// at every step), emitted as the absolute value in base 36.
pub fn hash(shape: &str) -> String {
    let mut h: i32 = 0;
    for unit in shape.encode_utf16() {
        h = h.wrapping_mul(31).wrapping_add(i32::from(unit));
    }
    to_base36(i64::from(h).unsigned_abs())
}

/// `hash(extract_shape(schema))`.
pub fn fingerprint(schema: &Schema) -> Result<String, SchemaError> {
    let shape = extract_shape(schema)?;
    let digest = hash(&shape);
    tracing::trace!(%shape, %digest, "computed schema fingerprint");
    Ok(digest)
}

fn to_base36(mut n: u64) -> String {
    const DIGITS: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    if n == 0 {
        return "0".into();
    }
    let mut out = Vec::new();
    while n > 0 {
        out.push(DIGITS[(n % 36) as usize]);
        n /= 36;
    }
    out.reverse();
    String::from_utf8(out).unwrap_or_default()
}
