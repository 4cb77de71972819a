//! [`BridgeContext`] – the state every bridge task shares.
//!
//! Created once at startup from the two transport handles and the
//! [`BridgeSettings`], wrapped in an `Arc`, and handed to each task.  It owns
//! the shared mapping table and the debouncer; discovery, the publisher and
//! the reconciler are derived from it and reuse its bus and broker handles.

use std::sync::Arc;
use std::time::Duration;

use busbridge_middleware::{MessageBroker, SignalBus};
use tracing::{info, warn};

use crate::debounce::{DEFAULT_QUIET_WINDOW, Debouncer};
use crate::discovery::{Discovery, MPRIS_PREFIX};
use crate::mapping::{EntryOrigin, MappingTable, RoutingEntry, SharedMappingTable};
use crate::publisher::{DEFAULT_MAX_ATTEMPTS, DEFAULT_RETRY_DELAY, Publisher};
use crate::reconciler::{DEFAULT_RECONCILE_INTERVAL, EntryTemplate, Reconciler};

/// Default ingestion queue capacity.
pub const DEFAULT_QUEUE_CAPACITY: usize = 100;
/// Default topic carrying player commands.
pub const DEFAULT_COMMAND_TOPIC: &str = "mpris/commands";

/// Tuning knobs for a bridge instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BridgeSettings {
    pub reconcile_interval: Duration,
    pub debounce_window: Duration,
    /// Capacity of the queue between the feed listener and the workers.
    pub queue_capacity: usize,
    /// Number of pipeline workers draining the queue.
    pub workers: usize,
    pub publish_attempts: u32,
    pub retry_delay: Duration,
    pub command_topic: String,
    /// Bus name prefix identifying entities to discover.
    pub entity_prefix: String,
    /// Recipe for the routing entry of each discovered entity.
    pub template: EntryTemplate,
}

impl Default for BridgeSettings {
    fn default() -> Self {
        Self {
            reconcile_interval: DEFAULT_RECONCILE_INTERVAL,
            debounce_window: DEFAULT_QUIET_WINDOW,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            workers: 1,
            publish_attempts: DEFAULT_MAX_ATTEMPTS,
            retry_delay: DEFAULT_RETRY_DELAY,
            command_topic: DEFAULT_COMMAND_TOPIC.to_string(),
            entity_prefix: MPRIS_PREFIX.to_string(),
            template: EntryTemplate::default(),
        }
    }
}

/// Shared state of one bridge instance.
pub struct BridgeContext {
    pub bus: Arc<dyn SignalBus>,
    pub broker: Arc<dyn MessageBroker>,
    pub table: Arc<SharedMappingTable>,
    pub debouncer: Arc<Debouncer>,
    pub settings: BridgeSettings,
}

impl BridgeContext {
    pub fn new(
        bus: Arc<dyn SignalBus>,
        broker: Arc<dyn MessageBroker>,
        settings: BridgeSettings,
    ) -> Self {
        Self {
            bus,
            broker,
            table: Arc::new(SharedMappingTable::default()),
            debouncer: Arc::new(Debouncer::new(settings.debounce_window)),
            settings,
        }
    }

    pub fn discovery(&self) -> Discovery {
        Discovery::new(Arc::clone(&self.bus), self.settings.entity_prefix.clone())
    }

    pub fn publisher(&self) -> Publisher {
        Publisher::new(
            Arc::clone(&self.broker),
            self.settings.publish_attempts,
            self.settings.retry_delay,
        )
    }

    pub fn reconciler(&self) -> Reconciler {
        Reconciler::new(
            Arc::clone(&self.bus),
            self.discovery(),
            Arc::clone(&self.table),
            self.settings.template.clone(),
        )
        .with_interval(self.settings.reconcile_interval)
        .with_debouncer(Arc::clone(&self.debouncer))
    }

    /// Install configured entries ahead of any discovered ones and register
    /// their match rules.  Meant to run once, before the reconciler starts.
    ///
    /// Returns the number of entries installed.
    pub async fn seed_static(&self, entries: Vec<RoutingEntry>) -> usize {
        let current = self.table.snapshot();
        let mut next: MappingTable = entries
            .into_iter()
            .map(|mut e| {
                e.origin = EntryOrigin::Static;
                e
            })
            .collect();
        let seeded = next.len();
        for entry in current.entries() {
            if next.get(&entry.source).is_none() {
                next.insert(entry.clone());
            }
        }
        let rules: Vec<_> = next
            .entries()
            .iter()
            .take(seeded)
            .map(|e| (e.source.clone(), e.rule.clone()))
            .collect();
        self.table.replace(next);

        for (source, rule) in rules {
            if let Err(e) = self.bus.add_match(&rule).await {
                warn!(source = %source, error = %e, "failed to register static match rule");
            }
        }
        info!(entries = seeded, "static routing entries seeded");
        seeded
    }
}
