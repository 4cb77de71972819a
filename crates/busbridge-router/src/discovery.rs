//! Entity discovery.
//!
//! Lists the bus names of live entities that follow a naming convention
//! (MPRIS players own `org.mpris.MediaPlayer2.<player>`).  Discovery only
//! reads the bus; it reuses the bridge's own connection.

use std::sync::Arc;

use busbridge_middleware::SignalBus;
use busbridge_types::BridgeError;

/// Well-known name prefix owned by MPRIS media players.
pub const MPRIS_PREFIX: &str = "org.mpris.MediaPlayer2.";

/// Queries the local bus for live entities.
#[derive(Clone)]
pub struct Discovery {
    bus: Arc<dyn SignalBus>,
    prefix: String,
}

impl Discovery {
    pub fn new(bus: Arc<dyn SignalBus>, prefix: impl Into<String>) -> Self {
        Self {
            bus,
            prefix: prefix.into(),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Bus names starting with the prefix (and longer than it), sorted and
    /// de-duplicated.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::Discovery`] when the bus cannot list its names.
    pub async fn live_entities(&self) -> Result<Vec<String>, BridgeError> {
        let names = self.bus.list_names().await.map_err(|e| match e {
            BridgeError::Discovery(msg) => BridgeError::Discovery(msg),
            other => BridgeError::Discovery(other.to_string()),
        })?;
        let mut live: Vec<String> = names
            .into_iter()
            .filter(|n| n.len() > self.prefix.len() && n.starts_with(&self.prefix))
            .collect();
        live.sort();
        live.dedup();
        Ok(live)
    }
}
