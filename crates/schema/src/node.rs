use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use crate::validate::{self, ValidationError};

/// A single node in a schema tree.
///
/// The set of variants is closed: validation and fingerprinting are total
/// functions over it. Nodes the fingerprint cannot describe structurally are
/// expressed as [`SchemaNode::Opaque`].
///
/// Serialized with an internal `type` tag so schemas can be declared in
/// YAML or JSON manifests:
///
/// ```yaml
/// type: object
/// fields:
///   count: { type: default, inner: { type: number }, value: 0 }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SchemaNode {
    String,
    Number,
    Boolean,
    Null,
    Undefined,
    /// Date string: a calendar date (`YYYY-MM-DD`) or an RFC 3339 timestamp.
    Date,
    Any,
    Unknown,
    Void,
    Never,
    Array {
        items: Box<SchemaNode>,
    },
    /// Record with a fixed field map. Unknown keys are stripped on parse.
    Object {
        fields: BTreeMap<String, SchemaNode>,
    },
    /// May be absent. `null` is not accepted unless the inner node is nullable.
    Optional {
        inner: Box<SchemaNode>,
    },
    Nullable {
        inner: Box<SchemaNode>,
    },
    /// Substitutes `value` when the input is absent, then validates it as `inner`.
    #[serde(rename = "default")]
    Defaulted {
        inner: Box<SchemaNode>,
        value: Value,
    },
    /// One of a fixed list of strings, in declaration order.
    Enum {
        values: Vec<String>,
    },
    Literal {
        value: Value,
    },
    /// First matching option wins.
    Union {
        options: Vec<SchemaNode>,
    },
    Intersection {
        left: Box<SchemaNode>,
        right: Box<SchemaNode>,
    },
    /// Object with arbitrary string keys and uniform values.
    Record {
        values: Box<SchemaNode>,
    },
    Tuple {
        items: Vec<SchemaNode>,
    },
    /// Keyed collection encoded as a JSON object. Keys are always strings.
    Map {
        values: Box<SchemaNode>,
    },
    /// Array whose elements must be distinct.
    Set {
        items: Box<SchemaNode>,
    },
    /// A node with custom semantics (refinement, transform, lazy reference).
    /// Accepts any value and fingerprints as `unknown`.
    Opaque {
        name: String,
    },
}

impl SchemaNode {
    pub fn string() -> Self {
        Self::String
    }

    pub fn number() -> Self {
        Self::Number
    }

    pub fn boolean() -> Self {
        Self::Boolean
    }

    pub fn date() -> Self {
        Self::Date
    }

    pub fn array(items: SchemaNode) -> Self {
        Self::Array {
            items: Box::new(items),
        }
    }

    /// Build an object node. Field order is irrelevant.
    pub fn object<K, I>(fields: I) -> Self
    where
        K: Into<String>,
        I: IntoIterator<Item = (K, SchemaNode)>,
    {
        Self::Object {
            fields: fields.into_iter().map(|(k, v)| (k.into(), v)).collect(),
        }
    }

    pub fn enumeration<S: Into<String>>(values: impl IntoIterator<Item = S>) -> Self {
        Self::Enum {
            values: values.into_iter().map(Into::into).collect(),
        }
    }

    pub fn literal(value: impl Into<Value>) -> Self {
        Self::Literal {
            value: value.into(),
        }
    }

    pub fn union(options: impl IntoIterator<Item = SchemaNode>) -> Self {
        Self::Union {
            options: options.into_iter().collect(),
        }
    }

    pub fn intersection(left: SchemaNode, right: SchemaNode) -> Self {
        Self::Intersection {
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    pub fn record(values: SchemaNode) -> Self {
        Self::Record {
            values: Box::new(values),
        }
    }

    pub fn tuple(items: impl IntoIterator<Item = SchemaNode>) -> Self {
        Self::Tuple {
            items: items.into_iter().collect(),
        }
    }

    pub fn map(values: SchemaNode) -> Self {
        Self::Map {
            values: Box::new(values),
        }
    }

    pub fn set(items: SchemaNode) -> Self {
        Self::Set {
            items: Box::new(items),
        }
    }

    pub fn opaque(name: impl Into<String>) -> Self {
        Self::Opaque { name: name.into() }
    }

    /// Wrap this node so it may be absent.
    pub fn optional(self) -> Self {
        Self::Optional {
            inner: Box::new(self),
        }
    }

    /// Wrap this node so it also accepts `null`.
    pub fn nullable(self) -> Self {
        Self::Nullable {
            inner: Box::new(self),
        }
    }

    /// Wrap this node with a default used when the value is absent.
    pub fn with_default(self, value: impl Into<Value>) -> Self {
        Self::Defaulted {
            inner: Box::new(self),
            value: value.into(),
        }
    }
}

/// Structural contract over a persisted record.
///
/// `parse` is a pure function of the input and the schema definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Schema {
    root: SchemaNode,
}

impl Schema {
    pub fn new(root: SchemaNode) -> Self {
        Self { root }
    }

    /// Build a schema whose root is an object with the given fields.
    pub fn object<K, I>(fields: I) -> Self
    where
        K: Into<String>,
        I: IntoIterator<Item = (K, SchemaNode)>,
    {
        Self::new(SchemaNode::object(fields))
    }

    pub fn root(&self) -> &SchemaNode {
        &self.root
    }

    /// The root field map, if the root is an object.
    pub fn fields(&self) -> Option<&BTreeMap<String, SchemaNode>> {
        match &self.root {
            SchemaNode::Object { fields } => Some(fields),
            _ => None,
        }
    }

    /// Whether the root object declares `name`.
    pub fn declares(&self, name: &str) -> bool {
        self.fields().is_some_and(|f| f.contains_key(name))
    }

    /// Validate `value`, filling defaults and stripping undeclared object keys.
    pub fn parse(&self, value: &Value) -> Result<Value, ValidationError> {
        validate::parse_root(&self.root, Some(value))
    }

    /// The value produced by parsing an empty object: every default filled in.
    ///
    /// Fails when a required field has no default.
    pub fn defaults(&self) -> Result<Value, ValidationError> {
        self.parse(&Value::Object(serde_json::Map::new()))
    }
}

impl From<SchemaNode> for Schema {
    fn from(root: SchemaNode) -> Self {
        Self::new(root)
    }
}
