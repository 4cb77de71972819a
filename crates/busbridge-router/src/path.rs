//! Path expressions over [`Value`] trees.
//!
//! A path expression is a dot-separated list of segments:
//!
//! | Literal | Segment | Applies to |
//! |---|---|---|
//! | `['Key']` | [`Segment::Key`] | a map |
//! | `[3]` | [`Segment::Index`] | a sequence |
//! | `Name` | [`Segment::Field`] | a record |
//!
//! `[1].['PlaybackStatus']` selects the second signal argument, then the
//! `PlaybackStatus` entry of that dictionary.
//!
//! The input is split on `.` before segments are classified, so map keys
//! containing a dot cannot be addressed.
//!
//! # Example
//!
//! ```
//! use busbridge_router::path::PathExpression;
//! use busbridge_types::Value;
//!
//! let expr: PathExpression = "[1].['PlaybackStatus']".parse().unwrap();
//! let payload = Value::Sequence(vec![
//!     Value::map([("x", Value::Int(1))]),
//!     Value::map([("PlaybackStatus", Value::str("Playing"))]),
//! ]);
//! assert_eq!(expr.evaluate(&payload).unwrap(), &Value::str("Playing"));
//! ```

use std::fmt;
use std::str::FromStr;

use busbridge_types::{PathError, PathParseError, Value};

/// One step of a [`PathExpression`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Segment {
    /// Named field of a record.
    Field(String),
    /// Zero-based position in a sequence.
    Index(usize),
    /// Key of a map.
    Key(String),
}

impl Segment {
    fn parse(raw: &str) -> Result<Self, PathParseError> {
        if let Some(key) = raw
            .strip_prefix("['")
            .and_then(|rest| rest.strip_suffix("']"))
        {
            return Ok(Segment::Key(key.to_string()));
        }
        if let Some(digits) = raw.strip_prefix('[').and_then(|rest| rest.strip_suffix(']'))
            && !digits.is_empty()
            && digits.bytes().all(|b| b.is_ascii_digit())
        {
            return digits
                .parse::<usize>()
                .map(Segment::Index)
                .map_err(|_| PathParseError::InvalidIndex {
                    segment: raw.to_string(),
                });
        }
        Ok(Segment::Field(raw.to_string()))
    }

    fn expected_shape(&self) -> &'static str {
        match self {
            Segment::Field(_) => "record",
            Segment::Index(_) => "sequence",
            Segment::Key(_) => "map",
        }
    }
}

impl fmt::Display for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Segment::Field(name) => f.write_str(name),
            Segment::Index(i) => write!(f, "[{i}]"),
            Segment::Key(k) => write!(f, "['{k}']"),
        }
    }
}

/// A parsed, immutable path expression.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PathExpression {
    segments: Vec<Segment>,
}

impl PathExpression {
    /// Parse the dotted literal form.
    ///
    /// # Errors
    ///
    /// * [`PathParseError::Empty`] for an empty string.
    /// * [`PathParseError::EmptySegment`] for `a..b`, a leading or a trailing dot.
    /// * [`PathParseError::InvalidIndex`] when `[digits]` overflows `usize`.
    pub fn parse(literal: &str) -> Result<Self, PathParseError> {
        if literal.is_empty() {
            return Err(PathParseError::Empty);
        }
        let segments = literal
            .split('.')
            .enumerate()
            .map(|(position, raw)| {
                if raw.is_empty() {
                    Err(PathParseError::EmptySegment { position })
                } else {
                    Segment::parse(raw)
                }
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { segments })
    }

    /// Build an expression from already-classified segments.
    pub fn from_segments(segments: Vec<Segment>) -> Self {
        Self { segments }
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// Walk `payload` segment by segment and return the addressed node.
    ///
    /// Map-key and index segments look through one level of
    /// [`Value::Variant`], as do field segments.
    ///
    /// # Errors
    ///
    /// Exactly one [`PathError`] per failed step: a missing key, index or
    /// field, or [`PathError::TypeMismatch`] when the node has the wrong shape
    /// for the segment.
    pub fn evaluate<'a>(&self, payload: &'a Value) -> Result<&'a Value, PathError> {
        self.segments
            .iter()
            .try_fold(payload, |node, segment| step(node, segment))
    }
}

fn step<'a>(node: &'a Value, segment: &Segment) -> Result<&'a Value, PathError> {
    match (segment, node.unboxed()) {
        (Segment::Key(key), Value::Map(entries)) => entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v)
            .ok_or_else(|| {
                let mut available: Vec<String> = entries.iter().map(|(k, _)| k.clone()).collect();
                available.sort();
                PathError::KeyNotFound {
                    key: key.clone(),
                    available,
                }
            }),
        (Segment::Index(index), Value::Sequence(items)) => {
            items.get(*index).ok_or(PathError::IndexOutOfRange {
                index: *index,
                len: items.len(),
            })
        }
        (Segment::Field(field), Value::Record(fields)) => fields
            .iter()
            .find(|(name, _)| name == field)
            .map(|(_, v)| v)
            .ok_or_else(|| PathError::FieldNotFound {
                field: field.clone(),
            }),
        (segment, found) => Err(PathError::TypeMismatch {
            segment: segment.to_string(),
            expected: segment.expected_shape(),
            found: found.kind(),
        }),
    }
}

impl FromStr for PathExpression {
    type Err = PathParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for PathExpression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, segment) in self.segments.iter().enumerate() {
            if i > 0 {
                f.write_str(".")?;
            }
            write!(f, "{segment}")?;
        }
        Ok(())
    }
}
