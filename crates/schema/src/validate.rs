//! Validation of JSON values against a [`SchemaNode`] tree.
//!
//! Every issue found is collected; a value is only accepted when the whole
//! tree validates.

use chrono::{DateTime, NaiveDate};
use serde_json::{Map, Value};

use crate::node::SchemaNode;

/// One problem found while validating, located by a dotted path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationIssue {
    /// Dotted path from the root (`settings.tags[2]`); empty for the root.
    pub path: String,
    pub message: String,
}

impl std::fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.path.is_empty() {
            write!(f, "(root): {}", self.message)
        } else {
            write!(f, "{}: {}", self.path, self.message)
        }
    }
}

/// A value did not satisfy its schema.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("validation failed: {}", render_issues(.issues))]
pub struct ValidationError {
    issues: Vec<ValidationIssue>,
}

impl ValidationError {
    pub fn new(issues: Vec<ValidationIssue>) -> Self {
        Self { issues }
    }

    /// Single-issue error at the root.
    pub fn message(message: impl Into<String>) -> Self {
        Self::new(vec![ValidationIssue {
            path: String::new(),
            message: message.into(),
        }])
    }

    pub fn issues(&self) -> &[ValidationIssue] {
        &self.issues
    }
}

fn render_issues(issues: &[ValidationIssue]) -> String {
    issues
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Outcome of checking one node.
enum Checked {
    Present(Value),
    /// Valid, and the key should be omitted from the parent object.
    Absent,
    Invalid,
}

pub(crate) fn parse_root(node: &SchemaNode, input: Option<&Value>) -> Result<Value, ValidationError> {
    let mut issues = Vec::new();
    match check(node, input, "", &mut issues) {
        Checked::Present(value) if issues.is_empty() => Ok(value),
        Checked::Absent if issues.is_empty() => Ok(Value::Null),
        _ => {
            if issues.is_empty() {
                issues.push(ValidationIssue {
                    path: String::new(),
                    message: "invalid value".into(),
                });
            }
            Err(ValidationError::new(issues))
        }
    }
}

fn issue(issues: &mut Vec<ValidationIssue>, path: &str, message: impl Into<String>) -> Checked {
    issues.push(ValidationIssue {
        path: path.to_owned(),
        message: message.into(),
    });
    Checked::Invalid
}

fn field_path(parent: &str, key: &str) -> String {
    if parent.is_empty() {
        key.to_owned()
    } else {
        format!("{parent}.{key}")
    }
}

fn index_path(parent: &str, index: usize) -> String {
    format!("{parent}[{index}]")
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn check(node: &SchemaNode, input: Option<&Value>, path: &str, issues: &mut Vec<ValidationIssue>) -> Checked {
    // Wrappers and the absence-tolerant leaves decide on a missing input first.
    match node {
        SchemaNode::Defaulted { inner, value } => {
            return check(inner, Some(input.unwrap_or(value)), path, issues);
        }
        SchemaNode::Optional { inner } => {
            return match input {
                None => Checked::Absent,
                Some(_) => check(inner, input, path, issues),
            };
        }
        SchemaNode::Undefined | SchemaNode::Void => {
            return match input {
                None => Checked::Absent,
                Some(v) => issue(issues, path, format!("expected undefined, got {}", kind_of(v))),
            };
        }
        SchemaNode::Any | SchemaNode::Unknown | SchemaNode::Opaque { .. } => {
            return match input {
                None => Checked::Absent,
                Some(v) => Checked::Present(v.clone()),
            };
        }
        _ => {}
    }

    let Some(value) = input else {
        return issue(issues, path, "required");
    };

    match node {
        SchemaNode::String => expect(value.is_string(), value, "string", path, issues),
        SchemaNode::Number => expect(value.is_number(), value, "number", path, issues),
        SchemaNode::Boolean => expect(value.is_boolean(), value, "boolean", path, issues),
        SchemaNode::Null => expect(value.is_null(), value, "null", path, issues),
        SchemaNode::Date => match value.as_str() {
            Some(s) if is_date(s) => Checked::Present(value.clone()),
            Some(s) => issue(issues, path, format!("invalid date {s:?}")),
            None => issue(issues, path, format!("expected date string, got {}", kind_of(value))),
        },
        SchemaNode::Never => issue(issues, path, "no value is allowed here"),
        SchemaNode::Nullable { inner } => {
            if value.is_null() {
                Checked::Present(Value::Null)
            } else {
                check(inner, Some(value), path, issues)
            }
        }
        SchemaNode::Array { items } => match value.as_array() {
            Some(elements) => check_elements(items, elements, path, issues),
            None => issue(issues, path, format!("expected array, got {}", kind_of(value))),
        },
        SchemaNode::Set { items } => match value.as_array() {
            Some(elements) => {
                for (i, element) in elements.iter().enumerate() {
                    if elements[..i].contains(element) {
                        return issue(issues, &index_path(path, i), "duplicate set element");
                    }
                }
                check_elements(items, elements, path, issues)
            }
            None => issue(issues, path, format!("expected array, got {}", kind_of(value))),
        },
        SchemaNode::Tuple { items } => match value.as_array() {
            Some(elements) if elements.len() == items.len() => {
                let before = issues.len();
                let out: Vec<Value> = items
                    .iter()
                    .zip(elements)
                    .enumerate()
                    .filter_map(|(i, (node, element))| {
                        match check(node, Some(element), &index_path(path, i), issues) {
                            Checked::Present(v) => Some(v),
                            _ => None,
                        }
                    })
                    .collect();
                if issues.len() == before && out.len() == items.len() {
                    Checked::Present(Value::Array(out))
                } else {
                    Checked::Invalid
                }
            }
            Some(elements) => issue(
                issues,
                path,
                format!("expected tuple of {} elements, got {}", items.len(), elements.len()),
            ),
            None => issue(issues, path, format!("expected array, got {}", kind_of(value))),
        },
        SchemaNode::Object { fields } => match value.as_object() {
            Some(object) => {
                let before = issues.len();
                let mut out = Map::new();
                for (key, field) in fields {
                    match check(field, object.get(key), &field_path(path, key), issues) {
                        Checked::Present(v) => {
                            out.insert(key.clone(), v);
                        }
                        Checked::Absent | Checked::Invalid => {}
                    }
                }
                if issues.len() == before {
                    Checked::Present(Value::Object(out))
                } else {
                    Checked::Invalid
                }
            }
            None => issue(issues, path, format!("expected object, got {}", kind_of(value))),
        },
        SchemaNode::Record { values } | SchemaNode::Map { values } => match value.as_object() {
            Some(object) => {
                let before = issues.len();
                let mut out = Map::new();
                for (key, entry) in object {
                    if let Checked::Present(v) = check(values, Some(entry), &field_path(path, key), issues) {
                        out.insert(key.clone(), v);
                    }
                }
                if issues.len() == before {
                    Checked::Present(Value::Object(out))
                } else {
                    Checked::Invalid
                }
            }
            None => issue(issues, path, format!("expected object, got {}", kind_of(value))),
        },
        SchemaNode::Enum { values } => match value.as_str() {
            Some(s) if values.iter().any(|v| v == s) => Checked::Present(value.clone()),
            _ => issue(issues, path, format!("expected one of [{}]", values.join(", "))),
        },
        SchemaNode::Literal { value: expected } => {
            if value == expected {
                Checked::Present(value.clone())
            } else {
                issue(issues, path, format!("expected literal {expected}"))
            }
        }
        SchemaNode::Union { options } => {
            for option in options {
                let mut scratch = Vec::new();
                if let Checked::Present(v) = check(option, Some(value), path, &mut scratch) {
                    if scratch.is_empty() {
                        return Checked::Present(v);
                    }
                }
            }
            issue(issues, path, "no union option matched")
        }
        SchemaNode::Intersection { left, right } => {
            let before = issues.len();
            let l = check(left, Some(value), path, issues);
            let r = check(right, Some(value), path, issues);
            match (l, r) {
                (Checked::Present(a), Checked::Present(b)) if issues.len() == before => merge(a, b, path, issues),
                _ => Checked::Invalid,
            }
        }
        SchemaNode::Defaulted { .. }
        | SchemaNode::Optional { .. }
        | SchemaNode::Undefined
        | SchemaNode::Void
        | SchemaNode::Any
        | SchemaNode::Unknown
        | SchemaNode::Opaque { .. } => unreachable!("handled before the presence check"),
    }
}

fn expect(ok: bool, value: &Value, expected: &str, path: &str, issues: &mut Vec<ValidationIssue>) -> Checked {
    if ok {
        Checked::Present(value.clone())
    } else {
        issue(issues, path, format!("expected {expected}, got {}", kind_of(value)))
    }
}

fn check_elements(items: &SchemaNode, elements: &[Value], path: &str, issues: &mut Vec<ValidationIssue>) -> Checked {
    let before = issues.len();
    let mut out = Vec::with_capacity(elements.len());
    for (i, element) in elements.iter().enumerate() {
        match check(items, Some(element), &index_path(path, i), issues) {
            Checked::Present(v) => out.push(v),
            // An absent-tolerant element type still occupies its slot.
            Checked::Absent => out.push(Value::Null),
            Checked::Invalid => {}
        }
    }
    if issues.len() == before {
        Checked::Present(Value::Array(out))
    } else {
        Checked::Invalid
    }
}

/// Combine the outputs of both sides of an intersection.
fn merge(left: Value, right: Value, path: &str, issues: &mut Vec<ValidationIssue>) -> Checked {
    match (left, right) {
        (Value::Object(mut a), Value::Object(b)) => {
            for (k, v) in b {
                a.insert(k, v);
            }
            Checked::Present(Value::Object(a))
        }
        (a, b) if a == b => Checked::Present(a),
        _ => issue(issues, path, "intersection sides produced incompatible values"),
    }
}

/// A calendar date (`YYYY-MM-DD`) or an RFC 3339 timestamp.
fn is_date(s: &str) -> bool {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").is_ok() || DateTime::parse_from_rfc3339(s).is_ok()
}
