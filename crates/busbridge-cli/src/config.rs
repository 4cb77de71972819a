//! Configuration – reads `~/.busbridge/config.toml` (or `--config <path>`).
//!
//! Loading never fails the process: a missing file yields defaults, an
//! unreadable or unparsable one is logged and replaced by defaults, a
//! mapping entry with a bad `structPath` or topic is logged and skipped, and
//! an unusable `commandTopic` or `statusTopic` is logged and replaced by its
//! default.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use busbridge_middleware::{validate_filter, validate_topic_name};
use busbridge_router::context::DEFAULT_COMMAND_TOPIC;
use busbridge_router::path::PathExpression;
use busbridge_router::reconciler::{DEFAULT_STATUS_TOPIC, EntryTemplate};
use busbridge_router::{BridgeSettings, RoutingEntry};
use busbridge_types::{BridgeError, SourceIdentity};
use serde::Deserialize;
use tracing::{info, warn};

/// Whole configuration file.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub mqtt: MqttConfig,
    #[serde(default, rename = "mapping")]
    pub mappings: Vec<MappingConfig>,
    #[serde(default)]
    pub bridge: BridgeConfig,
}

/// Broker connection options.
#[derive(Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MqttConfig {
    #[serde(default = "default_servers")]
    pub servers: Vec<String>,
    /// Empty means "generate one at startup".
    #[serde(default)]
    pub client_id: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
}

impl std::fmt::Debug for MqttConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MqttConfig")
            .field("servers", &self.servers)
            .field("client_id", &self.client_id)
            .field("username", &self.username)
            .field(
                "password",
                if self.password.is_empty() { &"<not set>" } else { &"<redacted>" },
            )
            .finish()
    }
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            servers: default_servers(),
            client_id: String::new(),
            username: String::new(),
            password: String::new(),
        }
    }
}

impl MqttConfig {
    /// `true` when a username or password is configured.
    pub fn has_credentials(&self) -> bool {
        !self.username.is_empty() || !self.password.is_empty()
    }

    /// The configured client id, or `busbridge-<random>` when none is set.
    pub fn effective_client_id(&self) -> String {
        if self.client_id.trim().is_empty() {
            let id = uuid::Uuid::new_v4().simple().to_string();
            format!("busbridge-{}", &id[..8])
        } else {
            self.client_id.clone()
        }
    }
}

/// One statically configured route.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MappingConfig {
    pub mqtt_topic: String,
    pub dbus_path: String,
    pub dbus_interface: String,
    #[serde(default)]
    pub dbus_sender: Option<String>,
    pub struct_path: String,
    #[serde(default)]
    pub remove_quotmark: bool,
}

impl MappingConfig {
    /// # Errors
    ///
    /// [`BridgeError::Config`] for an empty or wildcard topic or an invalid
    /// `structPath`.
    pub fn to_entry(&self) -> Result<RoutingEntry, BridgeError> {
        if self.mqtt_topic.trim().is_empty() {
            return Err(BridgeError::Config("mqttTopic is empty".to_string()));
        }
        validate_topic_name(&self.mqtt_topic)
            .map_err(|e| BridgeError::Config(format!("mqttTopic: {e}")))?;
        let path = PathExpression::parse(&self.struct_path).map_err(|e| {
            BridgeError::Config(format!("structPath '{}': {e}", self.struct_path))
        })?;
        let sender = self.dbus_sender.clone().filter(|s| !s.is_empty());
        Ok(RoutingEntry::new(
            SourceIdentity::new(sender, self.dbus_path.clone(), self.dbus_interface.clone()),
            self.mqtt_topic.clone(),
            path,
            self.remove_quotmark,
        ))
    }
}

/// Bridge tuning.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BridgeConfig {
    pub reconcile_interval_ms: u64,
    pub debounce_ms: u64,
    pub queue_capacity: usize,
    pub workers: usize,
    pub publish_attempts: u32,
    pub retry_delay_ms: u64,
    pub command_topic: String,
    pub player_prefix: String,
    pub status_topic: String,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        let settings = BridgeSettings::default();
        Self {
            reconcile_interval_ms: settings.reconcile_interval.as_millis() as u64,
            debounce_ms: settings.debounce_window.as_millis() as u64,
            queue_capacity: settings.queue_capacity,
            workers: settings.workers,
            publish_attempts: settings.publish_attempts,
            retry_delay_ms: settings.retry_delay.as_millis() as u64,
            command_topic: settings.command_topic,
            player_prefix: settings.entity_prefix,
            status_topic: settings.template.topic,
        }
    }
}

impl BridgeConfig {
    /// Convert to runtime settings.  A `commandTopic` that is not a valid
    /// subscription filter, or a `statusTopic` that cannot be published to,
    /// is logged and replaced by its default.
    pub fn to_settings(&self) -> BridgeSettings {
        let command_topic = match validate_filter(&self.command_topic) {
            Ok(()) => self.command_topic.clone(),
            Err(e) => {
                warn!(error = %e, fallback = DEFAULT_COMMAND_TOPIC, "ignoring commandTopic");
                DEFAULT_COMMAND_TOPIC.to_string()
            }
        };
        let status_topic = match validate_topic_name(&self.status_topic) {
            Ok(()) => self.status_topic.clone(),
            Err(e) => {
                warn!(error = %e, fallback = DEFAULT_STATUS_TOPIC, "ignoring statusTopic");
                DEFAULT_STATUS_TOPIC.to_string()
            }
        };
        BridgeSettings {
            reconcile_interval: Duration::from_millis(self.reconcile_interval_ms),
            debounce_window: Duration::from_millis(self.debounce_ms),
            queue_capacity: self.queue_capacity,
            workers: self.workers,
            publish_attempts: self.publish_attempts,
            retry_delay: Duration::from_millis(self.retry_delay_ms),
            command_topic,
            entity_prefix: self.player_prefix.clone(),
            template: EntryTemplate {
                topic: status_topic,
                ..EntryTemplate::default()
            },
        }
    }
}

impl Config {
    /// Routing entries for every valid `[[mapping]]`, in file order.
    pub fn routing_entries(&self) -> Vec<RoutingEntry> {
        self.mappings
            .iter()
            .enumerate()
            .filter_map(|(index, mapping)| match mapping.to_entry() {
                Ok(entry) => Some(entry),
                Err(e) => {
                    warn!(index, topic = %mapping.mqtt_topic, error = %e, "skipping mapping entry");
                    None
                }
            })
            .collect()
    }
}

fn default_servers() -> Vec<String> {
    vec!["tcp://localhost:1883".to_string()]
}

/// `~/.busbridge/config.toml`.
pub fn config_path() -> PathBuf {
    config_path_for_home(
        &std::env::var("HOME")
            .or_else(|_| std::env::var("USERPROFILE"))
            .unwrap_or_else(|_| ".".to_string()),
    )
}

pub(crate) fn config_path_for_home(home: &str) -> PathBuf {
    PathBuf::from(home).join(".busbridge").join("config.toml")
}

/// Read and parse `path`.  `Ok(None)` when the file does not exist.
pub fn load_from(path: &Path) -> Result<Option<Config>, BridgeError> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(path)
        .map_err(|e| BridgeError::Config(format!("failed to read {}: {e}", path.display())))?;
    let cfg = toml::from_str(&raw)
        .map_err(|e| BridgeError::Config(format!("failed to parse {}: {e}", path.display())))?;
    Ok(Some(cfg))
}

/// Load `path`, falling back to defaults, then apply environment overrides.
pub fn load(path: &Path) -> Config {
    let mut cfg = match load_from(path) {
        Ok(Some(cfg)) => {
            info!(path = %path.display(), mappings = cfg.mappings.len(), "config loaded");
            cfg
        }
        Ok(None) => {
            info!(path = %path.display(), "no config file; using defaults");
            Config::default()
        }
        Err(e) => {
            warn!(error = %e, "using default configuration");
            Config::default()
        }
    };
    apply_env_overrides(&mut cfg);
    cfg
}

/// Apply `BUSBRIDGE_*` environment overrides.
///
/// | Variable | Field |
/// |---|---|
/// | `BUSBRIDGE_MQTT_SERVERS` | `mqtt.servers` (comma-separated) |
/// | `BUSBRIDGE_CLIENT_ID` | `mqtt.clientId` |
/// | `BUSBRIDGE_USERNAME` | `mqtt.username` |
/// | `BUSBRIDGE_PASSWORD` | `mqtt.password` |
/// | `BUSBRIDGE_COMMAND_TOPIC` | `bridge.commandTopic` |
pub fn apply_env_overrides(cfg: &mut Config) {
    apply_overrides(cfg, |name| std::env::var(name).ok());
}

pub(crate) fn apply_overrides(cfg: &mut Config, lookup: impl Fn(&str) -> Option<String>) {
    if let Some(v) = lookup("BUSBRIDGE_MQTT_SERVERS") {
        let servers: Vec<String> = v
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect();
        if !servers.is_empty() {
            cfg.mqtt.servers = servers;
        }
    }
    if let Some(v) = lookup("BUSBRIDGE_CLIENT_ID") {
        cfg.mqtt.client_id = v;
    }
    if let Some(v) = lookup("BUSBRIDGE_USERNAME") {
        cfg.mqtt.username = v;
    }
    if let Some(v) = lookup("BUSBRIDGE_PASSWORD") {
        cfg.mqtt.password = v;
    }
    if let Some(v) = lookup("BUSBRIDGE_COMMAND_TOPIC")
        && !v.trim().is_empty()
    {
        cfg.bridge.command_topic = v;
    }
}
