//! Extraction pipeline – bus signals in, broker messages out.
//!
//! ```text
//! signal feed ──► run_listener ──try_send──► mpsc queue ──► run_worker × N
//!                                                              │
//!                       route ► debounce ► evaluate ► format ► publish
//! ```
//!
//! The listener never blocks on the queue: when it is full the signal is
//! dropped with a warning.  Workers share the receiving end and keep going
//! until the listener has exited and the queue is drained.

use std::sync::Arc;

use busbridge_types::value::NIL_TEXT;
use busbridge_types::{PathError, RawSignal, Value};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{Mutex, broadcast, mpsc, watch};
use tokio::time::Instant;
use tracing::{debug, info, trace, warn};

use crate::context::BridgeContext;
use crate::debounce::DebounceKey;
use crate::publisher::Publisher;

/// Queue receiver shared by every worker.
pub type SharedQueue = Arc<Mutex<mpsc::Receiver<RawSignal>>>;

/// What happened to one signal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineOutcome {
    Published { topic: String, text: String },
    /// No routing entry matches the signal's source.
    NoRoute,
    /// Rejected inside the quiet window of an earlier signal.
    Debounced,
    ExtractionFailed(PathError),
    /// The extracted value formats as `<nil>`; nothing is sent.
    Nil,
    /// Every publish attempt failed.
    DeliveryFailed { topic: String },
}

/// Render `value` as published text, removing every `"` when `strip_quotes`.
pub fn format_value(value: &Value, strip_quotes: bool) -> String {
    let text = value.to_string();
    if strip_quotes {
        text.replace('"', "")
    } else {
        text
    }
}

/// Per-signal processing shared by the workers.  Cheap to clone.
#[derive(Clone)]
pub struct ExtractionPipeline {
    ctx: Arc<BridgeContext>,
    publisher: Publisher,
}

impl ExtractionPipeline {
    pub fn new(ctx: Arc<BridgeContext>) -> Self {
        let publisher = ctx.publisher();
        Self { ctx, publisher }
    }

    /// Route, debounce, evaluate, format and publish one signal.
    ///
    /// Never fails: every drop reason is reported as a [`PipelineOutcome`]
    /// and logged.
    pub async fn process(&self, signal: &RawSignal) -> PipelineOutcome {
        let table = self.ctx.table.snapshot();
        let Some(entry) = table.find_for(signal) else {
            trace!(sender = %signal.sender, path = %signal.path, "no route");
            return PipelineOutcome::NoRoute;
        };

        let key = DebounceKey::for_signal(signal);
        if !self.ctx.debouncer.should_accept(&key, Instant::now()) {
            debug!(sender = %signal.sender, topic = %entry.topic, "debounced");
            return PipelineOutcome::Debounced;
        }

        let value = match entry.path.evaluate(&signal.body) {
            Ok(value) => value,
            Err(e @ PathError::KeyNotFound { .. }) => {
                debug!(sender = %signal.sender, path = %entry.path, error = %e, "value not present in signal");
                return PipelineOutcome::ExtractionFailed(e);
            }
            Err(e) => {
                warn!(sender = %signal.sender, path = %entry.path, error = %e, "extraction failed");
                return PipelineOutcome::ExtractionFailed(e);
            }
        };

        let text = format_value(value, entry.strip_quotes);
        if text == NIL_TEXT {
            return PipelineOutcome::Nil;
        }

        match self.publisher.publish(&entry.topic, &text).await {
            Ok(()) => {
                info!(sender = %signal.sender, topic = %entry.topic, payload = %text, "forwarded");
                PipelineOutcome::Published {
                    topic: entry.topic.clone(),
                    text,
                }
            }
            Err(_) => PipelineOutcome::DeliveryFailed {
                topic: entry.topic.clone(),
            },
        }
    }
}

/// Move signals from the bus feed into the ingestion queue until shutdown or
/// until the feed closes.  Dropping `queue` on return lets the workers drain.
pub async fn run_listener(
    mut feed: broadcast::Receiver<RawSignal>,
    queue: mpsc::Sender<RawSignal>,
    mut shutdown: watch::Receiver<bool>,
) {
    info!(capacity = queue.max_capacity(), "feed listener started");
    loop {
        if *shutdown.borrow() {
            break;
        }
        tokio::select! {
            received = feed.recv() => match received {
                Ok(signal) => match queue.try_send(signal) {
                    Ok(()) => {}
                    Err(TrySendError::Full(signal)) => {
                        warn!(sender = %signal.sender, member = %signal.member, "ingestion queue full; signal dropped");
                    }
                    Err(TrySendError::Closed(_)) => break,
                },
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "signal feed lagged; signals lost");
                }
                Err(RecvError::Closed) => {
                    info!("signal feed closed");
                    break;
                }
            },
            changed = shutdown.changed() => {
                if changed.is_err() {
                    break;
                }
            }
        }
    }
    info!("feed listener stopped");
}

/// Process queued signals until the queue is closed and empty.
pub async fn run_worker(id: usize, pipeline: ExtractionPipeline, queue: SharedQueue) {
    debug!(worker = id, "pipeline worker started");
    loop {
        let next = queue.lock().await.recv().await;
        let Some(signal) = next else { break };
        let outcome = pipeline.process(&signal).await;
        trace!(worker = id, ?outcome, "signal processed");
    }
    debug!(worker = id, "pipeline worker stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::BridgeSettings;
    use crate::mapping::{MappingTable, RoutingEntry};
    use crate::path::PathExpression;
    use busbridge_middleware::{LocalBus, MemoryBroker};
    use busbridge_types::SourceIdentity;
    use std::time::Duration;

    const PLAYER: &str = "org.mpris.MediaPlayer2.exampleplayer";
    const PATH: &str = "/org/mpris/MediaPlayer2";
    const IFACE: &str = "org.freedesktop.DBus.Properties";

    fn setup(settings: BridgeSettings) -> (Arc<BridgeContext>, MemoryBroker) {
        let broker = MemoryBroker::connect(&["tcp://localhost:1883".to_string()], "pipeline-test")
            .expect("broker");
        let ctx = BridgeContext::new(
            Arc::new(LocalBus::default()),
            Arc::new(broker.clone()),
            settings,
        );
        (Arc::new(ctx), broker)
    }

    fn install(ctx: &BridgeContext, path: &str, strip_quotes: bool) {
        let entry = RoutingEntry::new(
            SourceIdentity::new(Some(PLAYER.to_string()), PATH, IFACE),
            "MediaStatus",
            PathExpression::parse(path).expect("valid path"),
            strip_quotes,
        );
        ctx.table.replace(MappingTable::from_iter([entry]));
    }

    fn status_signal(sender: &str, status: Value) -> RawSignal {
        RawSignal::new(
            sender,
            PATH,
            IFACE,
            "PropertiesChanged",
            vec![
                Value::str("org.mpris.MediaPlayer2.Player"),
                Value::map([("PlaybackStatus", status)]),
                Value::Sequence(vec![]),
            ],
        )
    }

    #[test]
    fn format_value_strips_variant_quotes() {
        let v = Value::variant(Value::str("Paused"));
        assert_eq!(format_value(&v, false), "\"Paused\"");
        assert_eq!(format_value(&v, true), "Paused");
    }

    #[test]
    fn format_value_renders_containers() {
        let seq = Value::Sequence(vec![Value::Int(1), Value::str("a")]);
        assert_eq!(format_value(&seq, false), "[1 a]");
    }

    #[tokio::test]
    async fn variant_status_is_published_without_quotes() {
        let (ctx, broker) = setup(BridgeSettings::default());
        install(&ctx, "[1].['PlaybackStatus']", true);
        let pipeline = ExtractionPipeline::new(Arc::clone(&ctx));

        let outcome = pipeline
            .process(&status_signal(PLAYER, Value::variant(Value::str("Paused"))))
            .await;

        assert_eq!(
            outcome,
            PipelineOutcome::Published {
                topic: "MediaStatus".to_string(),
                text: "Paused".to_string(),
            }
        );
        assert_eq!(broker.published_to("MediaStatus"), vec!["Paused"]);
    }

    #[tokio::test]
    async fn unrouted_signal_is_dropped() {
        let (ctx, broker) = setup(BridgeSettings::default());
        install(&ctx, "[1].['PlaybackStatus']", true);
        let pipeline = ExtractionPipeline::new(ctx);

        let outcome = pipeline
            .process(&status_signal("org.mpris.MediaPlayer2.other", Value::str("Playing")))
            .await;

        assert_eq!(outcome, PipelineOutcome::NoRoute);
        assert!(broker.published().is_empty());
    }

    #[tokio::test]
    async fn repeated_signal_inside_window_is_debounced() {
        let (ctx, broker) = setup(BridgeSettings::default());
        install(&ctx, "[1].['PlaybackStatus']", true);
        let pipeline = ExtractionPipeline::new(ctx);
        let signal = status_signal(PLAYER, Value::str("Playing"));

        let first = pipeline.process(&signal).await;
        let second = pipeline.process(&signal).await;

        assert!(matches!(first, PipelineOutcome::Published { .. }));
        assert_eq!(second, PipelineOutcome::Debounced);
        assert_eq!(broker.published().len(), 1);
    }

    #[tokio::test]
    async fn missing_key_is_reported_not_published() {
        let (ctx, broker) = setup(BridgeSettings::default());
        install(&ctx, "[1].['Volume']", true);
        let pipeline = ExtractionPipeline::new(ctx);

        let outcome = pipeline
            .process(&status_signal(PLAYER, Value::str("Playing")))
            .await;

        assert!(matches!(
            outcome,
            PipelineOutcome::ExtractionFailed(PathError::KeyNotFound { .. })
        ));
        assert!(broker.published().is_empty());
    }

    #[tokio::test]
    async fn shape_mismatch_is_reported() {
        let (ctx, _broker) = setup(BridgeSettings::default());
        install(&ctx, "[0].['PlaybackStatus']", true);
        let pipeline = ExtractionPipeline::new(ctx);

        let outcome = pipeline
            .process(&status_signal(PLAYER, Value::str("Playing")))
            .await;

        assert!(matches!(
            outcome,
            PipelineOutcome::ExtractionFailed(PathError::TypeMismatch { .. })
        ));
    }

    #[tokio::test]
    async fn nil_value_is_dropped_silently() {
        let (ctx, broker) = setup(BridgeSettings::default());
        install(&ctx, "[1].['PlaybackStatus']", true);
        let pipeline = ExtractionPipeline::new(ctx);

        let outcome = pipeline.process(&status_signal(PLAYER, Value::Nil)).await;

        assert_eq!(outcome, PipelineOutcome::Nil);
        assert!(broker.published().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn offline_broker_reports_delivery_failure() {
        let settings = BridgeSettings {
            retry_delay: Duration::from_millis(10),
            ..Default::default()
        };
        let (ctx, broker) = setup(settings);
        install(&ctx, "[1].['PlaybackStatus']", true);
        broker.set_online(false);
        let pipeline = ExtractionPipeline::new(ctx);

        let outcome = pipeline
            .process(&status_signal(PLAYER, Value::str("Stopped")))
            .await;

        assert_eq!(
            outcome,
            PipelineOutcome::DeliveryFailed {
                topic: "MediaStatus".to_string()
            }
        );
    }

    #[tokio::test]
    async fn listener_drops_when_queue_is_full() {
        let (feed_tx, feed_rx) = broadcast::channel(8);
        let (queue_tx, mut queue_rx) = mpsc::channel(1);
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        let listener = tokio::spawn(run_listener(feed_rx, queue_tx, shutdown_rx));

        for sender in ["a", "b", "c"] {
            feed_tx
                .send(status_signal(sender, Value::str("Playing")))
                .expect("listener subscribed");
        }
        drop(feed_tx);
        listener.await.expect("listener task");

        let first = queue_rx.recv().await.expect("one queued signal");
        assert_eq!(first.sender, "a");
        assert!(queue_rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn listener_stops_on_shutdown() {
        let (_feed_tx, feed_rx) = broadcast::channel::<RawSignal>(8);
        let (queue_tx, mut queue_rx) = mpsc::channel(4);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let listener = tokio::spawn(run_listener(feed_rx, queue_tx, shutdown_rx));

        shutdown_tx.send(true).expect("listener alive");
        listener.await.expect("listener task");

        assert!(queue_rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn workers_drain_queue_after_sender_drops() {
        let (ctx, broker) = setup(BridgeSettings::default());
        install(&ctx, "[1].['PlaybackStatus']", true);
        let pipeline = ExtractionPipeline::new(ctx);
        let (queue_tx, queue_rx) = mpsc::channel(4);
        let shared: SharedQueue = Arc::new(Mutex::new(queue_rx));

        queue_tx
            .send(status_signal(PLAYER, Value::str("Playing")))
            .await
            .expect("queue open");
        drop(queue_tx);

        let workers: Vec<_> = (0..2)
            .map(|id| tokio::spawn(run_worker(id, pipeline.clone(), Arc::clone(&shared))))
            .collect();
        for worker in workers {
            worker.await.expect("worker task");
        }

        assert_eq!(broker.published_to("MediaStatus"), vec!["Playing"]);
    }
}
