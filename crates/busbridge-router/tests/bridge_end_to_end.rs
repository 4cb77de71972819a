//! The whole bridge over the in-process bus and broker.

use std::sync::Arc;
use std::time::Duration;

use busbridge_middleware::{LocalBus, MemoryBroker, MessageBroker};
use busbridge_router::{Bridge, BridgeContext, BridgeSettings};
use busbridge_types::{RawSignal, Value};

const PLAYER: &str = "org.mpris.MediaPlayer2.exampleplayer";
const PATH: &str = "/org/mpris/MediaPlayer2";
const IFACE: &str = "org.freedesktop.DBus.Properties";

type TestResult = Result<(), Box<dyn std::error::Error>>;

async fn start(bus: &LocalBus) -> Result<(Bridge, MemoryBroker), Box<dyn std::error::Error>> {
    let broker = MemoryBroker::connect(&["tcp://localhost:1883".to_string()], "e2e")?;
    let settings = BridgeSettings {
        reconcile_interval: Duration::from_millis(20),
        retry_delay: Duration::from_millis(10),
        ..Default::default()
    };
    let ctx = BridgeContext::new(Arc::new(bus.clone()), Arc::new(broker.clone()), settings);
    let bridge = Bridge::start(Arc::new(ctx)).await?;
    Ok((bridge, broker))
}

async fn eventually(what: &str, check: impl Fn() -> bool) {
    let waited = tokio::time::timeout(Duration::from_secs(2), async {
        while !check() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await;
    assert!(waited.is_ok(), "timed out waiting for {what}");
}

fn playback_status(status: &str) -> RawSignal {
    RawSignal::new(
        PLAYER,
        PATH,
        IFACE,
        "PropertiesChanged",
        vec![
            Value::Map(vec![]),
            Value::map([("PlaybackStatus", Value::variant(Value::str(status)))]),
            Value::Sequence(vec![]),
        ],
    )
}

#[tokio::test]
async fn status_change_is_published_to_media_status() -> TestResult {
    let bus = LocalBus::default();
    bus.request_name(PLAYER);
    let (bridge, broker) = start(&bus).await?;
    let mut status = broker.subscribe("MediaStatus").await?;

    eventually("match rule for the player", || {
        bus.match_rules()
            .iter()
            .any(|r| r.sender.as_deref() == Some(PLAYER))
    })
    .await;
    bus.emit(playback_status("Paused"))?;

    let message = tokio::time::timeout(Duration::from_secs(2), status.recv()).await??;
    assert_eq!(message.payload_str(), Some("Paused"));

    bridge.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn vanished_player_loses_its_route() -> TestResult {
    let bus = LocalBus::default();
    bus.request_name(PLAYER);
    let (bridge, _broker) = start(&bus).await?;
    let ctx = Arc::clone(bridge.context());

    eventually("player entry", || ctx.table.snapshot().len() == 1).await;
    bus.release_name(PLAYER);
    eventually("player entry removed", || ctx.table.snapshot().is_empty()).await;
    assert!(bus.match_rules().is_empty());

    bridge.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn command_topic_drives_player_methods() -> TestResult {
    let bus = LocalBus::default();
    bus.request_name(PLAYER);
    let mut calls = bus.method_calls();
    let (bridge, broker) = start(&bus).await?;

    broker.inject("mpris/commands", "playpause\n");

    let call = tokio::time::timeout(Duration::from_secs(2), calls.recv()).await??;
    assert_eq!(call.destination, PLAYER);
    assert_eq!(call.member, "PlayPause");
    assert_eq!(call.interface, "org.mpris.MediaPlayer2.Player");

    bridge.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn shutdown_joins_with_broker_offline() -> TestResult {
    let bus = LocalBus::default();
    bus.request_name(PLAYER);
    let (bridge, broker) = start(&bus).await?;
    broker.set_online(false);

    eventually("match rule for the player", || !bus.match_rules().is_empty()).await;
    bus.emit(playback_status("Playing"))?;

    tokio::time::timeout(Duration::from_secs(2), bridge.shutdown()).await?;
    assert!(broker.published().is_empty());
    Ok(())
}
