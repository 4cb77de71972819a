//! Signals, their source identities and the filters that select them.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::value::Value;

/// A signal as delivered by the local bus feed.
///
/// Transient: produced by the feed, consumed once by the pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawSignal {
    /// Bus name of the emitting entity.
    pub sender: String,
    /// Object path the signal was emitted on.
    pub path: String,
    pub interface: String,
    /// Signal name, e.g. `PropertiesChanged`.
    pub member: String,
    /// Signal arguments, always a [`Value::Sequence`].
    pub body: Value,
    pub received_at: DateTime<Utc>,
}

impl RawSignal {
    pub fn new(
        sender: impl Into<String>,
        path: impl Into<String>,
        interface: impl Into<String>,
        member: impl Into<String>,
        args: Vec<Value>,
    ) -> Self {
        Self {
            sender: sender.into(),
            path: path.into(),
            interface: interface.into(),
            member: member.into(),
            body: Value::Sequence(args),
            received_at: Utc::now(),
        }
    }
}

/// Identifies a class of signal a routing entry can match.
///
/// `sender == None` matches any sender; statically configured entries often
/// leave it out.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SourceIdentity {
    pub sender: Option<String>,
    pub path: String,
    pub interface: String,
}

impl SourceIdentity {
    pub fn new(
        sender: Option<String>,
        path: impl Into<String>,
        interface: impl Into<String>,
    ) -> Self {
        Self {
            sender,
            path: path.into(),
            interface: interface.into(),
        }
    }

    /// `true` when `signal` was emitted by this source.
    pub fn matches(&self, signal: &RawSignal) -> bool {
        self.path == signal.path
            && self.interface == signal.interface
            && self.sender.as_deref().is_none_or(|s| s == signal.sender)
    }
}

impl fmt::Display for SourceIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{} ({})",
            self.sender.as_deref().unwrap_or("*"),
            self.path,
            self.interface
        )
    }
}

/// A signal subscription filter registered with the local bus.
///
/// Renders as the bus daemon's match-rule syntax, e.g.
/// `type='signal',path='/org/mpris/MediaPlayer2',interface='org.freedesktop.DBus.Properties',sender='org.mpris.MediaPlayer2.vlc'`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MatchRule {
    pub path: String,
    pub interface: String,
    pub member: Option<String>,
    pub sender: Option<String>,
}

impl MatchRule {
    /// The rule that delivers every signal `source` can emit.
    pub fn for_source(source: &SourceIdentity) -> Self {
        Self {
            path: source.path.clone(),
            interface: source.interface.clone(),
            member: None,
            sender: source.sender.clone(),
        }
    }

    /// Restrict the rule to a single signal name (builder-style).
    pub fn with_member(mut self, member: impl Into<String>) -> Self {
        self.member = Some(member.into());
        self
    }

    pub fn matches(&self, signal: &RawSignal) -> bool {
        self.path == signal.path
            && self.interface == signal.interface
            && self.member.as_deref().is_none_or(|m| m == signal.member)
            && self.sender.as_deref().is_none_or(|s| s == signal.sender)
    }
}

impl fmt::Display for MatchRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "type='signal',path='{}',interface='{}'",
            self.path, self.interface
        )?;
        if let Some(member) = &self.member {
            write!(f, ",member='{member}'")?;
        }
        if let Some(sender) = &self.sender {
            write!(f, ",sender='{sender}'")?;
        }
        Ok(())
    }
}

/// A message received from the remote broker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InboundMessage {
    pub topic: String,
    pub payload: Vec<u8>,
}

impl InboundMessage {
    pub fn new(topic: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
        }
    }

    /// The payload as UTF-8, or `None` if it is not valid UTF-8.
    pub fn payload_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.payload).ok()
    }
}
