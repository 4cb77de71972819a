//! Transport traits.
//!
//! Every transport the bridge can run over implements one of these traits.
//! The in-process implementations in [`crate::bus`] and [`crate::broker`]
//! back the tests and the default binary; a session-bus or network-broker
//! client plugs in the same way.

use async_trait::async_trait;
use busbridge_types::{BridgeError, InboundMessage, MatchRule, RawSignal};
use tokio::sync::broadcast;

/// A method invocation on an entity of the local bus.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodCall {
    /// Bus name of the entity the call is addressed to.
    pub destination: String,
    pub path: String,
    pub interface: String,
    pub member: String,
}

impl MethodCall {
    pub fn new(
        destination: impl Into<String>,
        path: impl Into<String>,
        interface: impl Into<String>,
        member: impl Into<String>,
    ) -> Self {
        Self {
            destination: destination.into(),
            path: path.into(),
            interface: interface.into(),
            member: member.into(),
        }
    }
}

/// The local structured signal bus.
///
/// # Contract
///
/// * `list_names` – every bus name currently owned by a connected entity.
/// * `add_match` / `remove_match` – register or withdraw interest in a class
///   of signals.  Only signals matching at least one registered rule are
///   delivered to [`SignalBus::signals`] receivers.
/// * `call_method` – fire a method call with no arguments at an entity.
/// * `signals` – a fresh receiver on the delivered-signal feed.  The feed has
///   a small fixed buffer; slow receivers observe `Lagged`.
#[async_trait]
pub trait SignalBus: Send + Sync {
    async fn list_names(&self) -> Result<Vec<String>, BridgeError>;

    async fn add_match(&self, rule: &MatchRule) -> Result<(), BridgeError>;

    async fn remove_match(&self, rule: &MatchRule) -> Result<(), BridgeError>;

    async fn call_method(&self, call: &MethodCall) -> Result<(), BridgeError>;

    fn signals(&self) -> broadcast::Receiver<RawSignal>;
}

/// The remote topic-based broker.
///
/// Publishing is fire-and-forget (at most once); a returned error means this
/// single attempt failed and the caller decides whether to retry.
#[async_trait]
pub trait MessageBroker: Send + Sync {
    async fn publish(&self, topic: &str, payload: &[u8]) -> Result<(), BridgeError>;

    /// Subscribe to every topic matching `filter` (MQTT wildcard syntax).
    async fn subscribe(
        &self,
        filter: &str,
    ) -> Result<broadcast::Receiver<InboundMessage>, BridgeError>;
}
