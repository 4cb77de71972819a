//! Tagged representation of a bus payload.
//!
//! Signal bodies on the local bus are sender-defined trees of strings,
//! numbers, arrays, dictionaries, structs and variants.  [`Value`] gives each
//! of those shapes its own variant so a path segment can be matched
//! exhaustively against the node it is applied to.
//!
//! # Text form
//!
//! [`Value`] implements [`std::fmt::Display`] with the conventions of the
//! default formatter used by the bus bindings the bridge interoperates with:
//!
//! | Shape | Text |
//! |---|---|
//! | `Nil` | `<nil>` |
//! | `Str("Paused")` | `Paused` |
//! | `Variant(Str("Paused"))` | `"Paused"` |
//! | `Sequence([a, b])` | `[a b]` |
//! | `Map([(k, v)])` | `map[k:v]` |
//! | `Record([(n, a), (m, b)])` | `{a b}` |
//!
//! Strings inside a variant keep their quotes, which is why routing entries
//! carry a "strip quoting" flag.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Textual form of [`Value::Nil`]; a formatted value equal to this is never
/// published.
pub const NIL_TEXT: &str = "<nil>";

/// One node of a bus payload tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    /// Absent value.
    Nil,
    Bool(bool),
    Int(i64),
    UInt(u64),
    Double(f64),
    Str(String),
    /// Bus object path, e.g. `/org/mpris/MediaPlayer2`.
    ObjectPath(String),
    /// Ordered array.
    Sequence(Vec<Value>),
    /// Dictionary with string keys, in wire order.
    Map(Vec<(String, Value)>),
    /// Struct with named fields, in declaration order.
    Record(Vec<(String, Value)>),
    /// One level of boxing around a dynamically-typed value.
    Variant(Box<Value>),
}

impl Value {
    /// Build a [`Value::Str`].
    pub fn str(s: impl Into<String>) -> Self {
        Value::Str(s.into())
    }

    /// Box `inner` in a [`Value::Variant`].
    pub fn variant(inner: Value) -> Self {
        Value::Variant(Box::new(inner))
    }

    /// Build a [`Value::Map`] from `(key, value)` pairs, preserving order.
    pub fn map<K: Into<String>>(entries: impl IntoIterator<Item = (K, Value)>) -> Self {
        Value::Map(entries.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    /// Build a [`Value::Record`] from `(field, value)` pairs, preserving order.
    pub fn record<K: Into<String>>(fields: impl IntoIterator<Item = (K, Value)>) -> Self {
        Value::Record(fields.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    /// Short name of this node's shape, used in diagnostics.
    pub fn kind(&self) -> &'static str {
        match self {
            Value::Nil => "nil",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::UInt(_) => "uint",
            Value::Double(_) => "double",
            Value::Str(_) => "string",
            Value::ObjectPath(_) => "object path",
            Value::Sequence(_) => "sequence",
            Value::Map(_) => "map",
            Value::Record(_) => "record",
            Value::Variant(_) => "variant",
        }
    }

    /// Strip one level of [`Value::Variant`] boxing, if present.
    pub fn unboxed(&self) -> &Value {
        match self {
            Value::Variant(inner) => inner,
            other => other,
        }
    }

    /// Borrow the string content of a `Str` or `ObjectPath` node.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) | Value::ObjectPath(s) => Some(s),
            _ => None,
        }
    }

    /// Look up `key` in a map node.  Returns `None` for other shapes.
    pub fn get(&self, key: &str) -> Option<&Value> {
        match self {
            Value::Map(entries) => entries.iter().find(|(k, _)| k == key).map(|(_, v)| v),
            _ => None,
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(s)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Int(n)
    }
}

/// JSON objects become maps and arrays become sequences, so fixtures can be
/// written as JSON literals.
impl From<serde_json::Value> for Value {
    fn from(json: serde_json::Value) -> Self {
        match json {
            serde_json::Value::Null => Value::Nil,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Value::Int(i)
                } else if let Some(u) = n.as_u64() {
                    Value::UInt(u)
                } else {
                    n.as_f64().map(Value::Double).unwrap_or(Value::Nil)
                }
            }
            serde_json::Value::String(s) => Value::Str(s),
            serde_json::Value::Array(items) => {
                Value::Sequence(items.into_iter().map(Value::from).collect())
            }
            serde_json::Value::Object(fields) => {
                Value::Map(fields.into_iter().map(|(k, v)| (k, Value::from(v))).collect())
            }
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Nil => f.write_str(NIL_TEXT),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Int(n) => write!(f, "{n}"),
            Value::UInt(n) => write!(f, "{n}"),
            Value::Double(x) => write!(f, "{x}"),
            Value::Str(s) | Value::ObjectPath(s) => f.write_str(s),
            Value::Sequence(items) => {
                f.write_str("[")?;
                write_spaced(f, items.iter())?;
                f.write_str("]")
            }
            Value::Map(entries) => {
                f.write_str("map[")?;
                for (i, (k, v)) in entries.iter().enumerate() {
                    if i > 0 {
                        f.write_str(" ")?;
                    }
                    write!(f, "{k}:{v}")?;
                }
                f.write_str("]")
            }
            Value::Record(fields) => {
                f.write_str("{")?;
                write_spaced(f, fields.iter().map(|(_, v)| v))?;
                f.write_str("}")
            }
            Value::Variant(inner) => match inner.as_ref() {
                Value::Str(s) | Value::ObjectPath(s) => write!(f, "\"{s}\""),
                other => write!(f, "{other}"),
            },
        }
    }
}

fn write_spaced<'a>(
    f: &mut fmt::Formatter<'_>,
    items: impl Iterator<Item = &'a Value>,
) -> fmt::Result {
    for (i, item) in items.enumerate() {
        if i > 0 {
            f.write_str(" ")?;
        }
        write!(f, "{item}")?;
    }
    Ok(())
}
