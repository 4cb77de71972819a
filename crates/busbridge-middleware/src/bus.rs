//! In-process local signal bus.
//!
//! [`LocalBus`] behaves like a session-bus daemon seen from one connection:
//!
//! * entities claim and release well-known names ([`LocalBus::request_name`],
//!   [`LocalBus::release_name`]), which is what discovery lists;
//! * emitted signals reach the feed only if a registered [`MatchRule`]
//!   selects them;
//! * method calls to an unowned name fail with `ServiceUnknown`, calls to an
//!   owned name are observable through [`LocalBus::method_calls`].
//!
//! The feed is a Tokio broadcast channel with a deliberately small buffer, so
//! a listener that stops draining it loses signals at the source.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use busbridge_types::{BridgeError, MatchRule, RawSignal};
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tracing::{debug, trace};

use crate::adapter::{MethodCall, SignalBus};

/// Default feed capacity.  Real bus bindings buffer only a handful of
/// signals per connection.
const DEFAULT_CAPACITY: usize = 16;

/// Name owned by the bus daemon itself; always listed.
pub const DAEMON_NAME: &str = "org.freedesktop.DBus";

/// Shared in-process signal bus.  Clone it cheaply – all clones share the
/// same registry and channels.
#[derive(Clone, Debug)]
pub struct LocalBus {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    feed: broadcast::Sender<RawSignal>,
    calls: broadcast::Sender<MethodCall>,
    names: Mutex<BTreeSet<String>>,
    rules: Mutex<Vec<MatchRule>>,
    listing_fails: AtomicBool,
}

impl LocalBus {
    /// Create a bus whose signal feed buffers `capacity` signals.
    pub fn new(capacity: usize) -> Self {
        let (feed, _) = broadcast::channel(capacity);
        let (calls, _) = broadcast::channel(capacity);
        let names = BTreeSet::from([DAEMON_NAME.to_string()]);
        Self {
            inner: Arc::new(Inner {
                feed,
                calls,
                names: Mutex::new(names),
                rules: Mutex::new(Vec::new()),
                listing_fails: AtomicBool::new(false),
            }),
        }
    }

    // ── Entity side ────────────────────────────────────────────────────────

    /// Claim `name` on behalf of an entity.  Returns `false` if it was
    /// already owned.
    pub fn request_name(&self, name: impl Into<String>) -> bool {
        let name = name.into();
        debug!(name = %name, "bus name acquired");
        self.inner.names.lock().insert(name)
    }

    /// Release `name`.  Returns `false` if it was not owned.
    pub fn release_name(&self, name: &str) -> bool {
        debug!(name = %name, "bus name released");
        self.inner.names.lock().remove(name)
    }

    /// Emit `signal` from an entity.
    ///
    /// Returns the number of feed receivers handed the signal, or `Ok(0)` when
    /// no registered match rule selects it (the daemon drops it).
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::Bus`] when the signal is selected but nobody is
    /// listening on the feed.
    pub fn emit(&self, signal: RawSignal) -> Result<usize, BridgeError> {
        let selected = self.inner.rules.lock().iter().any(|r| r.matches(&signal));
        if !selected {
            trace!(sender = %signal.sender, path = %signal.path, "signal not matched by any rule");
            return Ok(0);
        }
        self.inner
            .feed
            .send(signal)
            .map_err(|e| BridgeError::Bus(format!("signal feed send error: {e}")))
    }

    /// Observe method calls addressed to owned names.
    pub fn method_calls(&self) -> broadcast::Receiver<MethodCall> {
        self.inner.calls.subscribe()
    }

    // ── Inspection ─────────────────────────────────────────────────────────

    /// Snapshot of the currently registered match rules, in registration
    /// order.
    pub fn match_rules(&self) -> Vec<MatchRule> {
        self.inner.rules.lock().clone()
    }

    /// Make subsequent [`SignalBus::list_names`] calls fail (or succeed again).
    pub fn set_listing_fails(&self, fails: bool) {
        self.inner.listing_fails.store(fails, Ordering::SeqCst);
    }
}

impl Default for LocalBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

#[async_trait]
impl SignalBus for LocalBus {
    async fn list_names(&self) -> Result<Vec<String>, BridgeError> {
        if self.inner.listing_fails.load(Ordering::SeqCst) {
            return Err(BridgeError::Discovery(
                "org.freedesktop.DBus.ListNames: no reply".to_string(),
            ));
        }
        Ok(self.inner.names.lock().iter().cloned().collect())
    }

    async fn add_match(&self, rule: &MatchRule) -> Result<(), BridgeError> {
        debug!(rule = %rule, "AddMatch");
        self.inner.rules.lock().push(rule.clone());
        Ok(())
    }

    async fn remove_match(&self, rule: &MatchRule) -> Result<(), BridgeError> {
        debug!(rule = %rule, "RemoveMatch");
        let mut rules = self.inner.rules.lock();
        match rules.iter().position(|r| r == rule) {
            Some(idx) => {
                rules.remove(idx);
                Ok(())
            }
            None => Err(BridgeError::Bus(format!(
                "MatchRuleNotFound: the given match rule wasn't found: {rule}"
            ))),
        }
    }

    async fn call_method(&self, call: &MethodCall) -> Result<(), BridgeError> {
        if !self.inner.names.lock().contains(&call.destination) {
            return Err(BridgeError::Bus(format!(
                "ServiceUnknown: the name {} was not provided by any service",
                call.destination
            )));
        }
        debug!(
            destination = %call.destination,
            member = %call.member,
            "method call"
        );
        // Nobody observing the call is not an error.
        let _ = self.inner.calls.send(call.clone());
        Ok(())
    }

    fn signals(&self) -> broadcast::Receiver<RawSignal> {
        self.inner.feed.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use busbridge_types::{SourceIdentity, Value};

    const PATH: &str = "/org/mpris/MediaPlayer2";
    const IFACE: &str = "org.freedesktop.DBus.Properties";
    const VLC: &str = "org.mpris.MediaPlayer2.vlc";

    fn vlc_rule() -> MatchRule {
        MatchRule::for_source(&SourceIdentity::new(Some(VLC.to_string()), PATH, IFACE))
    }

    fn vlc_signal() -> RawSignal {
        RawSignal::new(VLC, PATH, IFACE, "PropertiesChanged", vec![Value::str("x")])
    }

    #[tokio::test]
    async fn list_names_includes_daemon_and_entities() -> Result<(), Box<dyn std::error::Error>> {
        let bus = LocalBus::default();
        bus.request_name(VLC);
        let names = bus.list_names().await?;
        assert!(names.contains(&DAEMON_NAME.to_string()));
        assert!(names.contains(&VLC.to_string()));

        bus.release_name(VLC);
        assert!(!bus.list_names().await?.contains(&VLC.to_string()));
        Ok(())
    }

    #[tokio::test]
    async fn listing_failure_is_a_discovery_error() {
        let bus = LocalBus::default();
        bus.set_listing_fails(true);
        assert!(matches!(bus.list_names().await, Err(BridgeError::Discovery(_))));
    }

    #[tokio::test]
    async fn unmatched_signal_is_dropped_at_source() -> Result<(), Box<dyn std::error::Error>> {
        let bus = LocalBus::default();
        let mut feed = bus.signals();
        assert_eq!(bus.emit(vlc_signal())?, 0);
        assert!(feed.try_recv().is_err());
        Ok(())
    }

    #[tokio::test]
    async fn matched_signal_reaches_feed() -> Result<(), Box<dyn std::error::Error>> {
        let bus = LocalBus::default();
        let mut feed = bus.signals();
        bus.add_match(&vlc_rule()).await?;

        assert_eq!(bus.emit(vlc_signal())?, 1);
        let received = feed.recv().await?;
        assert_eq!(received.sender, VLC);
        Ok(())
    }

    #[tokio::test]
    async fn remove_match_stops_delivery() -> Result<(), Box<dyn std::error::Error>> {
        let bus = LocalBus::default();
        let _feed = bus.signals();
        bus.add_match(&vlc_rule()).await?;
        bus.remove_match(&vlc_rule()).await?;
        assert!(bus.match_rules().is_empty());
        assert_eq!(bus.emit(vlc_signal())?, 0);
        Ok(())
    }

    #[tokio::test]
    async fn removing_unknown_rule_fails() {
        let bus = LocalBus::default();
        assert!(matches!(
            bus.remove_match(&vlc_rule()).await,
            Err(BridgeError::Bus(_))
        ));
    }

    #[tokio::test]
    async fn call_to_unknown_name_fails() {
        let bus = LocalBus::default();
        let call = MethodCall::new(VLC, PATH, "org.mpris.MediaPlayer2.Player", "Play");
        assert!(matches!(bus.call_method(&call).await, Err(BridgeError::Bus(_))));
    }

    #[tokio::test]
    async fn call_to_owned_name_is_observable() -> Result<(), Box<dyn std::error::Error>> {
        let bus = LocalBus::default();
        bus.request_name(VLC);
        let mut calls = bus.method_calls();

        let call = MethodCall::new(VLC, PATH, "org.mpris.MediaPlayer2.Player", "Play");
        bus.call_method(&call).await?;
        assert_eq!(calls.recv().await?, call);
        Ok(())
    }

    #[tokio::test]
    async fn small_feed_lags_slow_listener() -> Result<(), Box<dyn std::error::Error>> {
        let bus = LocalBus::new(4);
        let mut feed = bus.signals();
        bus.add_match(&vlc_rule()).await?;
        for _ in 0..32 {
            bus.emit(vlc_signal())?;
        }
        assert!(matches!(
            feed.recv().await,
            Err(broadcast::error::RecvError::Lagged(_))
        ));
        Ok(())
    }
}
