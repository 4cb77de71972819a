//! In-process topic broker.
//!
//! [`MemoryBroker`] stands in for a network broker session: it is created by
//! [`MemoryBroker::connect`] from the configured server list, routes every
//! publish to the subscriptions whose MQTT topic filter matches, and keeps a
//! log of what was published.  [`MemoryBroker::set_online`] simulates a
//! dropped link; publishes fail while it is down.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use busbridge_types::{BridgeError, InboundMessage};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tracing::{debug, info};
use url::Url;

use crate::adapter::MessageBroker;

/// Buffered messages per subscription.
const DEFAULT_CAPACITY: usize = 64;

/// URI schemes accepted for broker servers.
const SUPPORTED_SCHEMES: [&str; 6] = ["tcp", "mqtt", "ssl", "tls", "ws", "wss"];

/// One message the broker accepted from a publisher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishedMessage {
    pub topic: String,
    pub payload: Vec<u8>,
    pub published_at: DateTime<Utc>,
}

impl PublishedMessage {
    /// The payload as text, replacing invalid UTF-8.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.payload).into_owned()
    }
}

/// Shared in-process broker.  Clones share the same session.
#[derive(Clone, Debug)]
pub struct MemoryBroker {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    client_id: String,
    servers: Vec<Url>,
    online: AtomicBool,
    subscriptions: Mutex<Vec<(String, broadcast::Sender<InboundMessage>)>>,
    log: Mutex<Vec<PublishedMessage>>,
}

impl MemoryBroker {
    /// Open a session against `servers` as `client_id`.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::Connection`] when `servers` is empty or any entry
    /// is not a broker URI (`tcp://host:port`, `ssl://…`, `ws://…`).
    pub fn connect(servers: &[String], client_id: impl Into<String>) -> Result<Self, BridgeError> {
        if servers.is_empty() {
            return Err(BridgeError::Connection(
                "no broker servers configured".to_string(),
            ));
        }
        let servers = servers
            .iter()
            .map(|s| parse_server(s))
            .collect::<Result<Vec<_>, _>>()?;
        let client_id = client_id.into();
        info!(client_id = %client_id, servers = servers.len(), "broker session opened");
        Ok(Self {
            inner: Arc::new(Inner {
                client_id,
                servers,
                online: AtomicBool::new(true),
                subscriptions: Mutex::new(Vec::new()),
                log: Mutex::new(Vec::new()),
            }),
        })
    }

    pub fn client_id(&self) -> &str {
        &self.inner.client_id
    }

    /// The servers this session was opened against.
    pub fn servers(&self) -> &[Url] {
        &self.inner.servers
    }

    /// Bring the link up or down.
    pub fn set_online(&self, online: bool) {
        self.inner.online.store(online, Ordering::SeqCst);
    }

    pub fn is_online(&self) -> bool {
        self.inner.online.load(Ordering::SeqCst)
    }

    /// Deliver a message as if another client had published it.
    ///
    /// Returns the number of subscription receivers handed the message.
    pub fn inject(&self, topic: &str, payload: impl Into<Vec<u8>>) -> usize {
        self.route(InboundMessage::new(topic, payload))
    }

    /// Every message published through this session, oldest first.
    pub fn published(&self) -> Vec<PublishedMessage> {
        self.inner.log.lock().clone()
    }

    /// Messages published to `topic`, as text.
    pub fn published_to(&self, topic: &str) -> Vec<String> {
        self.inner
            .log
            .lock()
            .iter()
            .filter(|m| m.topic == topic)
            .map(PublishedMessage::text)
            .collect()
    }

    fn route(&self, message: InboundMessage) -> usize {
        let subscriptions = self.inner.subscriptions.lock();
        subscriptions
            .iter()
            .filter(|(filter, _)| topic_matches(filter, &message.topic))
            .filter_map(|(_, tx)| tx.send(message.clone()).ok())
            .sum()
    }
}

#[async_trait]
impl MessageBroker for MemoryBroker {
    async fn publish(&self, topic: &str, payload: &[u8]) -> Result<(), BridgeError> {
        if !self.is_online() {
            return Err(BridgeError::Broker(format!(
                "client {} is not connected",
                self.inner.client_id
            )));
        }
        validate_topic_name(topic)?;
        self.inner.log.lock().push(PublishedMessage {
            topic: topic.to_string(),
            payload: payload.to_vec(),
            published_at: Utc::now(),
        });
        let delivered = self.route(InboundMessage::new(topic, payload));
        debug!(topic = %topic, delivered, "published");
        Ok(())
    }

    async fn subscribe(
        &self,
        filter: &str,
    ) -> Result<broadcast::Receiver<InboundMessage>, BridgeError> {
        validate_filter(filter)?;
        let (tx, rx) = broadcast::channel(DEFAULT_CAPACITY);
        self.inner
            .subscriptions
            .lock()
            .push((filter.to_string(), tx));
        info!(filter = %filter, "subscribed");
        Ok(rx)
    }
}

/// `true` when `topic` matches the MQTT topic `filter`.
///
/// `+` matches exactly one level, a trailing `#` matches the remaining levels
/// (including none).
pub fn topic_matches(filter: &str, topic: &str) -> bool {
    let mut topic_levels = topic.split('/');
    for level in filter.split('/') {
        match level {
            "#" => return true,
            "+" => {
                if topic_levels.next().is_none() {
                    return false;
                }
            }
            literal => {
                if topic_levels.next() != Some(literal) {
                    return false;
                }
            }
        }
    }
    topic_levels.next().is_none()
}

/// Check that `topic` can be published to: non-empty and free of wildcards.
///
/// # Errors
///
/// [`BridgeError::Broker`] naming the rejected topic.
pub fn validate_topic_name(topic: &str) -> Result<(), BridgeError> {
    if topic.is_empty() || topic.contains(['+', '#']) {
        return Err(BridgeError::Broker(format!(
            "invalid topic name for publish: '{topic}'"
        )));
    }
    Ok(())
}

/// Check that `filter` is a well-formed subscription filter: `+` only as a
/// whole level, `#` only as the whole last level.
///
/// # Errors
///
/// [`BridgeError::Broker`] naming the rejected filter.
pub fn validate_filter(filter: &str) -> Result<(), BridgeError> {
    if filter.is_empty() {
        return Err(BridgeError::Broker("empty topic filter".to_string()));
    }
    let levels: Vec<&str> = filter.split('/').collect();
    for (i, level) in levels.iter().enumerate() {
        let misplaced_hash = level.contains('#') && (*level != "#" || i + 1 != levels.len());
        let partial_plus = level.contains('+') && *level != "+";
        if misplaced_hash || partial_plus {
            return Err(BridgeError::Broker(format!(
                "invalid topic filter: '{filter}'"
            )));
        }
    }
    Ok(())
}

fn parse_server(server: &str) -> Result<Url, BridgeError> {
    let url = Url::parse(server)
        .map_err(|e| BridgeError::Connection(format!("invalid broker URI '{server}': {e}")))?;
    if !SUPPORTED_SCHEMES.contains(&url.scheme()) {
        return Err(BridgeError::Connection(format!(
            "unsupported broker scheme '{}' in '{server}'",
            url.scheme()
        )));
    }
    if url.host_str().is_none() {
        return Err(BridgeError::Connection(format!(
            "broker URI '{server}' has no host"
        )));
    }
    Ok(url)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn broker() -> MemoryBroker {
        MemoryBroker::connect(&["tcp://localhost:1883".to_string()], "test-client")
            .expect("valid server list")
    }

    #[test]
    fn connect_rejects_empty_server_list() {
        assert!(matches!(
            MemoryBroker::connect(&[], "c"),
            Err(BridgeError::Connection(_))
        ));
    }

    #[test]
    fn connect_rejects_bad_uri() {
        assert!(MemoryBroker::connect(&["not a uri".to_string()], "c").is_err());
        assert!(MemoryBroker::connect(&["http://broker:80".to_string()], "c").is_err());
    }

    #[test]
    fn connect_accepts_several_servers() {
        let b = MemoryBroker::connect(
            &[
                "tcp://broker.local:1883".to_string(),
                "ssl://broker.local:8883".to_string(),
            ],
            "c",
        )
        .expect("connect");
        assert_eq!(b.servers().len(), 2);
        assert_eq!(b.client_id(), "c");
    }

    #[test]
    fn topic_filter_matching() {
        assert!(topic_matches("MediaStatus", "MediaStatus"));
        assert!(!topic_matches("MediaStatus", "MediaStatus/x"));
        assert!(topic_matches("mpris/+", "mpris/commands"));
        assert!(!topic_matches("mpris/+", "mpris/commands/extra"));
        assert!(topic_matches("mpris/#", "mpris"));
        assert!(topic_matches("mpris/#", "mpris/a/b"));
        assert!(topic_matches("#", "anything/at/all"));
        assert!(!topic_matches("a/+/c", "a/b"));
    }

    #[test]
    fn topic_names_and_filters_are_validated_separately() {
        assert!(validate_topic_name("home/player/status").is_ok());
        assert!(validate_topic_name("home/+/status").is_err());
        assert!(validate_topic_name("").is_err());
        assert!(validate_filter("home/+/cmd").is_ok());
        assert!(validate_filter("home/#").is_ok());
        assert!(validate_filter("home/#/cmd").is_err());
        assert!(validate_filter("home/a+/cmd").is_err());
    }

    #[tokio::test]
    async fn invalid_filters_are_rejected() {
        let b = broker();
        assert!(b.subscribe("").await.is_err());
        assert!(b.subscribe("a/#/b").await.is_err());
        assert!(b.subscribe("a/b+").await.is_err());
        assert!(b.subscribe("a/+/#").await.is_ok());
    }

    #[tokio::test]
    async fn publish_is_logged_and_routed() -> Result<(), Box<dyn std::error::Error>> {
        let b = broker();
        let mut rx = b.subscribe("MediaStatus").await?;

        b.publish("MediaStatus", b"Playing").await?;

        let msg = rx.recv().await?;
        assert_eq!(msg.payload_str(), Some("Playing"));
        assert_eq!(b.published_to("MediaStatus"), vec!["Playing".to_string()]);
        Ok(())
    }

    #[tokio::test]
    async fn publish_fails_while_offline() {
        let b = broker();
        b.set_online(false);
        assert!(matches!(
            b.publish("MediaStatus", b"x").await,
            Err(BridgeError::Broker(_))
        ));
        assert!(b.published().is_empty());
    }

    #[tokio::test]
    async fn publish_to_wildcard_topic_fails() {
        let b = broker();
        assert!(b.publish("mpris/+", b"x").await.is_err());
    }

    #[tokio::test]
    async fn inject_reaches_wildcard_subscription() -> Result<(), Box<dyn std::error::Error>> {
        let b = broker();
        let mut rx = b.subscribe("mpris/#").await?;
        assert_eq!(b.inject("mpris/commands", "play"), 1);
        assert_eq!(rx.recv().await?.topic, "mpris/commands");
        assert!(b.published().is_empty(), "injected messages are not our publishes");
        Ok(())
    }
}
