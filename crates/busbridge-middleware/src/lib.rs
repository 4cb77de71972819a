//! `busbridge-middleware` – transports on either side of the bridge.
//!
//! The bridge never talks to a concrete bus implementation directly.  It
//! holds a [`SignalBus`] for the local structured signal bus and a
//! [`MessageBroker`] for the remote topic-based broker.
//!
//! # Modules
//!
//! - [`adapter`] – the [`SignalBus`] and [`MessageBroker`] traits.
//! - [`bus`] – [`LocalBus`], an in-process signal bus with a name registry
//!   and daemon-style match-rule filtering.
//! - [`broker`] – [`MemoryBroker`], an in-process broker with MQTT topic
//!   filters and a publish log.

pub mod adapter;
pub mod broker;
pub mod bus;

pub use adapter::{MessageBroker, MethodCall, SignalBus};
pub use broker::{
    MemoryBroker, PublishedMessage, topic_matches, validate_filter, validate_topic_name,
};
pub use bus::LocalBus;
