//! [`CommandDispatcher`] – remote commands to bus method calls.
//!
//! A payload on the command topic names one player command.  Every command
//! runs a fresh discovery and calls the matching method on each live entity,
//! so a player that appeared a moment ago is reached without waiting for the
//! reconciler.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use busbridge_middleware::{MethodCall, SignalBus};
use busbridge_types::{BridgeError, InboundMessage};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, watch};
use tracing::{debug, info, warn};

use crate::discovery::Discovery;
use crate::reconciler::MPRIS_OBJECT_PATH;

/// Interface carrying the playback methods.
pub const PLAYER_INTERFACE: &str = "org.mpris.MediaPlayer2.Player";

/// A playback command accepted on the command topic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PlayerCommand {
    Play,
    Pause,
    PlayPause,
    Next,
    Previous,
    Stop,
}

impl PlayerCommand {
    pub const ALL: [PlayerCommand; 6] = [
        PlayerCommand::Play,
        PlayerCommand::Pause,
        PlayerCommand::PlayPause,
        PlayerCommand::Next,
        PlayerCommand::Previous,
        PlayerCommand::Stop,
    ];

    /// The payload token selecting this command.
    pub fn token(self) -> &'static str {
        match self {
            PlayerCommand::Play => "play",
            PlayerCommand::Pause => "pause",
            PlayerCommand::PlayPause => "playpause",
            PlayerCommand::Next => "next",
            PlayerCommand::Previous => "previous",
            PlayerCommand::Stop => "stop",
        }
    }

    /// Method name on [`PLAYER_INTERFACE`].
    pub fn member(self) -> &'static str {
        match self {
            PlayerCommand::Play => "Play",
            PlayerCommand::Pause => "Pause",
            PlayerCommand::PlayPause => "PlayPause",
            PlayerCommand::Next => "Next",
            PlayerCommand::Previous => "Previous",
            PlayerCommand::Stop => "Stop",
        }
    }
}

impl FromStr for PlayerCommand {
    type Err = BridgeError;

    /// Tokens are case-sensitive.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        PlayerCommand::ALL
            .into_iter()
            .find(|c| c.token() == s)
            .ok_or_else(|| BridgeError::Command(format!("unknown command '{s}'")))
    }
}

impl fmt::Display for PlayerCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.token())
    }
}

/// Result of handling one inbound command message.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchReport {
    /// `None` when the payload was not a known command.
    pub command: Option<PlayerCommand>,
    /// Method calls issued.
    pub attempted: usize,
    /// Calls the bus rejected.
    pub failed: usize,
}

pub struct CommandDispatcher {
    bus: Arc<dyn SignalBus>,
    discovery: Discovery,
}

impl CommandDispatcher {
    pub fn new(bus: Arc<dyn SignalBus>, discovery: Discovery) -> Self {
        Self { bus, discovery }
    }

    /// Handle one message.  Bad payloads, discovery failures and call
    /// failures are logged; none of them is returned as an error.
    pub async fn dispatch(&self, message: &InboundMessage) -> DispatchReport {
        let Some(payload) = message.payload_str() else {
            warn!(topic = %message.topic, "command payload is not UTF-8; ignored");
            return DispatchReport::default();
        };
        let token = payload.trim_end();
        let command = match token.parse::<PlayerCommand>() {
            Ok(command) => command,
            Err(e) => {
                warn!(topic = %message.topic, error = %e, "ignoring command");
                return DispatchReport::default();
            }
        };

        let mut report = DispatchReport {
            command: Some(command),
            ..Default::default()
        };
        let entities = match self.discovery.live_entities().await {
            Ok(entities) => entities,
            Err(e) => {
                warn!(command = %command, error = %e, "discovery failed; command dropped");
                return report;
            }
        };
        if entities.is_empty() {
            debug!(command = %command, "no live entities to command");
        }

        for entity in entities {
            let call = MethodCall::new(
                entity.as_str(),
                MPRIS_OBJECT_PATH,
                PLAYER_INTERFACE,
                command.member(),
            );
            report.attempted += 1;
            match self.bus.call_method(&call).await {
                Ok(()) => info!(entity = %entity, command = %command, "command sent"),
                Err(e) => {
                    report.failed += 1;
                    warn!(entity = %entity, command = %command, error = %e, "command failed");
                }
            }
        }
        report
    }

    /// Dispatch every message from `inbound` until shutdown or until the
    /// subscription closes.
    pub async fn run(
        self,
        mut inbound: broadcast::Receiver<InboundMessage>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        info!("command dispatcher started");
        loop {
            if *shutdown.borrow() {
                break;
            }
            tokio::select! {
                received = inbound.recv() => match received {
                    Ok(message) => {
                        self.dispatch(&message).await;
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "command subscription lagged; commands lost");
                    }
                    Err(RecvError::Closed) => break,
                },
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }
        info!("command dispatcher stopped");
    }
}
