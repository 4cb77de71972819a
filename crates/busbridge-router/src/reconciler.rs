//! [`Reconciler`] – keeps the mapping table in sync with live entities.
//!
//! Every tick:
//!
//! 1. **Discover** – list live entities; on failure keep the current table.
//! 2. **Diff** – synthesize one entry per entity from the [`EntryTemplate`]
//!    and compare against the discovered entries already installed.
//! 3. **Withdraw** – remove the match rule of every vanished entity and
//!    forget its debounce records.
//! 4. **Swap** – build the next table (static entries and survivors as they
//!    are, new entries appended) and publish it in one pointer swap.
//! 5. **Register** – add the match rule of every new entity.
//!
//! A tick that finds nothing to change touches neither the table nor the bus,
//! so reconciling the same set twice is a no-op.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use busbridge_middleware::SignalBus;
use busbridge_types::{BridgeError, SourceIdentity};
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::debounce::Debouncer;
use crate::discovery::Discovery;
use crate::mapping::{MappingTable, RoutingEntry, SharedMappingTable};
use crate::path::{PathExpression, Segment};

pub const DEFAULT_RECONCILE_INTERVAL: Duration = Duration::from_secs(10);

/// Object path every MPRIS player serves.
pub const MPRIS_OBJECT_PATH: &str = "/org/mpris/MediaPlayer2";
/// Interface carrying property-change notifications.
pub const PROPERTIES_INTERFACE: &str = "org.freedesktop.DBus.Properties";
pub const PROPERTIES_CHANGED: &str = "PropertiesChanged";
/// Where `PlaybackStatus` sits in a `PropertiesChanged` body.
pub const PLAYBACK_STATUS_PATH: &str = "[1].['PlaybackStatus']";
pub const DEFAULT_STATUS_TOPIC: &str = "MediaStatus";

// ─────────────────────────────────────────────────────────────────────────────
// Template
// ─────────────────────────────────────────────────────────────────────────────

/// Fixed recipe for the routing entry of a discovered entity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryTemplate {
    pub topic: String,
    pub object_path: String,
    pub interface: String,
    pub member: Option<String>,
    pub struct_path: PathExpression,
    pub strip_quotes: bool,
}

impl EntryTemplate {
    /// The entry routing `entity`'s signals.
    pub fn entry_for(&self, entity: &str) -> RoutingEntry {
        let source = SourceIdentity::new(
            Some(entity.to_string()),
            self.object_path.clone(),
            self.interface.clone(),
        );
        let entry = RoutingEntry::new(
            source,
            self.topic.clone(),
            self.struct_path.clone(),
            self.strip_quotes,
        )
        .discovered();
        match &self.member {
            Some(member) => entry.with_member(member.clone()),
            None => entry,
        }
    }
}

impl Default for EntryTemplate {
    /// Publishes each player's `PlaybackStatus` to `MediaStatus`.
    fn default() -> Self {
        Self {
            topic: DEFAULT_STATUS_TOPIC.to_string(),
            object_path: MPRIS_OBJECT_PATH.to_string(),
            interface: PROPERTIES_INTERFACE.to_string(),
            member: Some(PROPERTIES_CHANGED.to_string()),
            struct_path: PathExpression::from_segments(vec![
                Segment::Index(1),
                Segment::Key("PlaybackStatus".to_string()),
            ]),
            strip_quotes: true,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Report
// ─────────────────────────────────────────────────────────────────────────────

/// What one reconciliation tick changed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Entities that gained an entry.
    pub added: Vec<String>,
    /// Entities whose entry was removed.
    pub removed: Vec<String>,
    /// Discovered entries left as they were.
    pub unchanged: usize,
}

impl ReconcileReport {
    pub fn is_noop(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Reconciler
// ─────────────────────────────────────────────────────────────────────────────

/// The only writer of the shared mapping table after startup.
pub struct Reconciler {
    bus: Arc<dyn SignalBus>,
    discovery: Discovery,
    table: Arc<SharedMappingTable>,
    template: EntryTemplate,
    interval: Duration,
    debouncer: Option<Arc<Debouncer>>,
}

impl Reconciler {
    pub fn new(
        bus: Arc<dyn SignalBus>,
        discovery: Discovery,
        table: Arc<SharedMappingTable>,
        template: EntryTemplate,
    ) -> Self {
        Self {
            bus,
            discovery,
            table,
            template,
            interval: DEFAULT_RECONCILE_INTERVAL,
            debouncer: None,
        }
    }

    /// Override the tick interval (builder-style).  Clamped to at least 1 ms.
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval.max(Duration::from_millis(1));
        self
    }

    /// Prune `debouncer` of entities this reconciler withdraws (builder-style).
    pub fn with_debouncer(mut self, debouncer: Arc<Debouncer>) -> Self {
        self.debouncer = Some(debouncer);
        self
    }

    /// Run one reconciliation.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::Discovery`] when the entity listing fails; the
    /// table is left untouched in that case.  Match-rule failures are logged
    /// and do not fail the tick.
    pub async fn tick(&self) -> Result<ReconcileReport, BridgeError> {
        let live = self.discovery.live_entities().await?;
        let current = self.table.snapshot();

        let desired: BTreeMap<SourceIdentity, (String, RoutingEntry)> = live
            .into_iter()
            .map(|entity| {
                let entry = self.template.entry_for(&entity);
                (entry.source.clone(), (entity, entry))
            })
            .collect();

        let vanished: Vec<&RoutingEntry> = current
            .discovered()
            .filter(|e| !desired.contains_key(&e.source))
            .collect();
        let appeared: Vec<(String, RoutingEntry)> = desired
            .into_iter()
            .filter(|(source, _)| current.get(source).is_none())
            .map(|(_, pair)| pair)
            .collect();

        let unchanged = current.discovered().count() - vanished.len();
        if vanished.is_empty() && appeared.is_empty() {
            debug!(entries = current.len(), "mapping table already in sync");
            return Ok(ReconcileReport {
                unchanged,
                ..Default::default()
            });
        }

        for entry in &vanished {
            if let Err(e) = self.bus.remove_match(&entry.rule).await {
                warn!(rule = %entry.rule, error = %e, "failed to withdraw match rule");
            }
            if let (Some(debouncer), Some(sender)) = (&self.debouncer, &entry.source.sender) {
                let forgotten = debouncer.forget_sender(sender);
                debug!(entity = %sender, forgotten, "debounce records dropped");
            }
        }

        let next: MappingTable = current
            .entries()
            .iter()
            .filter(|e| !vanished.iter().any(|v| v.source == e.source))
            .cloned()
            .chain(appeared.iter().map(|(_, entry)| entry.clone()))
            .collect();
        self.table.replace(next);

        for (entity, entry) in &appeared {
            if let Err(e) = self.bus.add_match(&entry.rule).await {
                warn!(entity = %entity, rule = %entry.rule, error = %e, "failed to register match rule");
            }
        }

        let report = ReconcileReport {
            added: appeared.into_iter().map(|(entity, _)| entity).collect(),
            removed: vanished
                .iter()
                .filter_map(|e| e.source.sender.clone())
                .collect(),
            unchanged,
        };
        info!(
            added = ?report.added,
            removed = ?report.removed,
            unchanged = report.unchanged,
            "mapping table reconciled"
        );
        Ok(report)
    }

    /// Tick every interval until `shutdown` flips to `true` or its sender is
    /// dropped.  The first tick runs immediately.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(interval_ms = self.interval.as_millis() as u64, "reconciler started");

        loop {
            if *shutdown.borrow() {
                break;
            }
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.tick().await {
                        warn!(error = %e, "reconciliation skipped; keeping current mapping table");
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        info!("reconciler stopped");
    }
}
