//! Shared data model for the busbridge workspace.
//!
//! - [`value`] – [`Value`], the tagged representation of every payload node
//!   carried on the local signal bus.
//! - [`signal`] – signals, source identities, match rules and inbound broker
//!   messages.
//!
//! The error types used across the workspace live at the crate root.

use thiserror::Error;

pub mod signal;
pub mod value;

pub use signal::{InboundMessage, MatchRule, RawSignal, SourceIdentity};
pub use value::Value;

/// Failure while walking a [`Value`] tree with a path expression.
///
/// Every variant is recoverable: the caller drops the signal that produced it
/// and carries on.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PathError {
    #[error("key '{key}' not found in map (available keys: {available:?})")]
    KeyNotFound { key: String, available: Vec<String> },

    #[error("index {index} out of range for sequence of length {len}")]
    IndexOutOfRange { index: usize, len: usize },

    #[error("field '{field}' not found in record")]
    FieldNotFound { field: String },

    #[error("segment {segment} expects a {expected} but found a {found}")]
    TypeMismatch {
        segment: String,
        expected: &'static str,
        found: &'static str,
    },
}

/// Failure while parsing the dotted path-expression literal.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PathParseError {
    #[error("path expression is empty")]
    Empty,

    #[error("path expression has an empty segment at position {position}")]
    EmptySegment { position: usize },

    #[error("index segment '{segment}' does not fit in a sequence index")]
    InvalidIndex { segment: String },
}

/// Workspace-wide error type.
#[derive(Error, Debug)]
pub enum BridgeError {
    /// A bus or broker could not be reached at startup.
    #[error("Connection Error: {0}")]
    Connection(String),

    /// Listing live entities on the local bus failed.
    #[error("Discovery Error: {0}")]
    Discovery(String),

    /// A call on the local bus (match rule, method call) failed.
    #[error("Bus Error: {0}")]
    Bus(String),

    #[error("Extraction Error: {0}")]
    Extraction(#[from] PathError),

    #[error("Invalid Path Expression: {0}")]
    InvalidPath(#[from] PathParseError),

    /// Publishing gave up after the retry bound was exhausted.
    #[error("Delivery to '{topic}' failed after {attempts} attempt(s): {last_error}")]
    Delivery {
        topic: String,
        attempts: u32,
        last_error: String,
    },

    /// A single broker operation failed.
    #[error("Broker Error: {0}")]
    Broker(String),

    #[error("Configuration Error: {0}")]
    Config(String),

    #[error("Command Error: {0}")]
    Command(String),
}
