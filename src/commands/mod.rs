//! Command dispatch over the broker.
//!
//! Commands are non-retained JSON envelopes on a shared topic:
//! `{command, params, metadata: {timestamp}}`. A channel can send commands
//! as a pure client; it subscribes to its topic only once the first handler
//! is registered.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};

use crate::broker::ConnectionHandle;
use crate::cameras::PtzCoords;
use crate::{lock, Error, Result};

/// Wire shape of one command message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandEnvelope {
    pub command: String,
    pub params: serde_json::Value,
    pub metadata: CommandMetadata,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandMetadata {
    /// Epoch seconds at send time.
    pub timestamp: f64,
}

/// Handler for one received command. Errors are logged at the dispatch
/// site, never propagated.
pub type CommandHandler = Box<dyn FnMut(&serde_json::Value) -> Result<()> + Send>;

struct HandlerTable {
    handlers: HashMap<String, CommandHandler>,
    subscribed: bool,
}

/// One command topic with a fixed set of known commands.
#[derive(Clone)]
pub struct CommandChannel {
    conn: ConnectionHandle,
    topic: String,
    definitions: Vec<String>,
    table: Arc<Mutex<HandlerTable>>,
}

impl CommandChannel {
    pub fn new(conn: &ConnectionHandle, topic: impl Into<String>, definitions: &[&str]) -> Self {
        Self {
            conn: conn.clone(),
            topic: topic.into(),
            definitions: definitions.iter().map(|d| d.to_string()).collect(),
            table: Arc::new(Mutex::new(HandlerTable {
                handlers: HashMap::new(),
                subscribed: false,
            })),
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Send a command. The command must be one of the channel's definitions.
    pub fn send(&self, command: &str, params: serde_json::Value) -> Result<()> {
        if !self.definitions.iter().any(|d| d == command) {
            return Err(Error::UnknownCommand(command.to_string()));
        }
        let envelope = CommandEnvelope {
            command: command.to_string(),
            params,
            metadata: CommandMetadata {
                timestamp: crate::epoch_seconds(),
            },
        };
        self.conn
            .publish(&self.topic, &serde_json::to_string(&envelope)?, false)
    }

    /// Register a handler for a known command. Subscribes to the command
    /// topic on the first handler; until then the channel only sends.
    pub fn on(
        &self,
        command: &str,
        handler: impl FnMut(&serde_json::Value) -> Result<()> + Send + 'static,
    ) -> Result<()> {
        if !self.definitions.iter().any(|d| d == command) {
            return Err(Error::UnknownCommand(command.to_string()));
        }
        let need_subscribe = {
            let mut table = lock(&self.table);
            table.handlers.insert(command.to_string(), Box::new(handler));
            !std::mem::replace(&mut table.subscribed, true)
        };
        if need_subscribe {
            tracing::debug!(topic = %self.topic, "subscribing to command channel");
            let table = Arc::clone(&self.table);
            let topic = self.topic.clone();
            self.conn.add_tap(&self.topic, move |_, payload| {
                dispatch_command(&table, &topic, payload);
            })?;
        }
        Ok(())
    }
}

fn dispatch_command(table: &Arc<Mutex<HandlerTable>>, topic: &str, payload: &str) {
    tracing::debug!(topic = %topic, "got command");
    let envelope: CommandEnvelope = match serde_json::from_str(payload) {
        Ok(envelope) => envelope,
        Err(e) => {
            tracing::error!(topic = %topic, error = %e, "malformed command envelope");
            return;
        }
    };
    // Take the handler out for the call so it may send commands itself.
    let handler = lock(table).handlers.remove(&envelope.command);
    let Some(mut handler) = handler else {
        tracing::error!(topic = %topic, command = %envelope.command, "unknown command");
        return;
    };
    if let Err(e) = handler(&envelope.params) {
        tracing::error!(
            topic = %topic,
            command = %envelope.command,
            error = %e,
            "error in command handler"
        );
    }
    let mut guard = lock(table);
    guard.handlers.entry(envelope.command).or_insert(handler);
}

/// Commands handled by the camera control service.
#[derive(Clone)]
pub struct CameraCommands {
    channel: CommandChannel,
}

impl CameraCommands {
    pub const GOTO_PTZ_POSITION: &'static str = "goto_ptz_position";
    pub const GOTO_ABSOLUTE_COORDS: &'static str = "goto_absolute_coords";
    pub const GOTO_RELATIVE_VECTOR: &'static str = "goto_relative_vector";

    pub fn new(conn: &ConnectionHandle, root_topic: &str) -> Self {
        Self {
            channel: CommandChannel::new(
                conn,
                format!("{root_topic}/commands/camera"),
                &[
                    Self::GOTO_PTZ_POSITION,
                    Self::GOTO_ABSOLUTE_COORDS,
                    Self::GOTO_RELATIVE_VECTOR,
                ],
            ),
        }
    }

    pub fn goto_ptz_position(&self, camera_name: &str, position_number: i64) -> Result<()> {
        self.channel.send(
            Self::GOTO_PTZ_POSITION,
            serde_json::json!({
                "camera_name": camera_name,
                "position_number": position_number,
            }),
        )
    }

    pub fn goto_absolute_coords(&self, camera_name: &str, coords: PtzCoords) -> Result<()> {
        self.channel.send(
            Self::GOTO_ABSOLUTE_COORDS,
            serde_json::json!({
                "camera_name": camera_name,
                "coords": coords,
            }),
        )
    }

    pub fn goto_relative_vector(&self, camera_name: &str, vector: PtzCoords) -> Result<()> {
        self.channel.send(
            Self::GOTO_RELATIVE_VECTOR,
            serde_json::json!({
                "camera_name": camera_name,
                "vector": vector,
            }),
        )
    }

    pub fn channel(&self) -> &CommandChannel {
        &self.channel
    }
}

/// Commands handled by the OBS interface.
#[derive(Clone)]
pub struct ObsCommands {
    channel: CommandChannel,
}

impl ObsCommands {
    pub const START_RECORDING: &'static str = "start_recording";
    pub const STOP_RECORDING: &'static str = "stop_recording";
    pub const START_STREAMING: &'static str = "start_streaming";
    pub const STOP_STREAMING: &'static str = "stop_streaming";
    pub const MAKE_FULLSCREEN: &'static str = "make_fullscreen";
    pub const RESTORE_SCENE_DEFAULTS: &'static str = "restore_scene_defaults";

    pub fn new(conn: &ConnectionHandle, root_topic: &str) -> Self {
        Self {
            channel: CommandChannel::new(
                conn,
                format!("{root_topic}/obs/command"),
                &[
                    Self::START_RECORDING,
                    Self::STOP_RECORDING,
                    Self::START_STREAMING,
                    Self::STOP_STREAMING,
                    Self::MAKE_FULLSCREEN,
                    Self::RESTORE_SCENE_DEFAULTS,
                ],
            ),
        }
    }

    pub fn start_recording(&self) -> Result<()> {
        self.channel
            .send(Self::START_RECORDING, serde_json::json!({}))
    }

    pub fn stop_recording(&self) -> Result<()> {
        self.channel
            .send(Self::STOP_RECORDING, serde_json::json!({}))
    }

    pub fn start_streaming(&self) -> Result<()> {
        self.channel
            .send(Self::START_STREAMING, serde_json::json!({}))
    }

    pub fn stop_streaming(&self) -> Result<()> {
        self.channel
            .send(Self::STOP_STREAMING, serde_json::json!({}))
    }

    pub fn make_fullscreen(&self, position_name: &str) -> Result<()> {
        self.channel.send(
            Self::MAKE_FULLSCREEN,
            serde_json::json!({ "position_name": position_name }),
        )
    }

    pub fn restore_scene_defaults(&self) -> Result<()> {
        self.channel
            .send(Self::RESTORE_SCENE_DEFAULTS, serde_json::json!({}))
    }

    pub fn channel(&self) -> &CommandChannel {
        &self.channel
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::LocalBroker;
    use std::time::Duration;

    #[test]
    fn test_unknown_command_is_rejected_at_send() {
        let broker = LocalBroker::new();
        let conn = broker.connect(None);
        let channel = CommandChannel::new(&conn.handle(), "root/cmd", &["known"]);
        assert!(matches!(
            channel.send("mystery", serde_json::json!({})),
            Err(Error::UnknownCommand(_))
        ));
    }

    #[test]
    fn test_command_round_trip() {
        let broker = LocalBroker::new();
        let sender = broker.connect(Some("sender"));
        let receiver = broker.connect(Some("receiver"));

        let commands = CameraCommands::new(&receiver.handle(), "root");
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen2 = Arc::clone(&seen);
        commands
            .channel()
            .on(CameraCommands::GOTO_PTZ_POSITION, move |params| {
                lock(&seen2).push(params.clone());
                Ok(())
            })
            .expect("handler");

        CameraCommands::new(&sender.handle(), "root")
            .goto_ptz_position("gate", 4)
            .expect("send");
        receiver.process_events(Duration::from_millis(30));

        let seen = lock(&seen);
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0]["camera_name"], "gate");
        assert_eq!(seen[0]["position_number"], 4);
    }

    #[test]
    fn test_envelope_carries_timestamp() {
        let broker = LocalBroker::new();
        let sender = broker.connect(Some("sender"));
        let receiver = broker.connect(Some("receiver"));

        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen2 = Arc::clone(&seen);
        receiver
            .handle()
            .add_tap("root/obs/command", move |_, payload| {
                lock(&seen2).push(payload.to_string());
            })
            .expect("tap");

        let before = crate::epoch_seconds();
        ObsCommands::new(&sender.handle(), "root")
            .make_fullscreen("P1")
            .expect("send");
        receiver.process_events(Duration::from_millis(30));

        let seen = lock(&seen);
        let envelope: CommandEnvelope = serde_json::from_str(&seen[0]).expect("envelope");
        assert_eq!(envelope.command, "make_fullscreen");
        assert_eq!(envelope.params["position_name"], "P1");
        assert!(envelope.metadata.timestamp >= before);
        assert!(envelope.metadata.timestamp <= crate::epoch_seconds());
    }

    #[test]
    fn test_commands_are_not_retained() {
        let broker = LocalBroker::new();
        let sender = broker.connect(None);
        ObsCommands::new(&sender.handle(), "root")
            .start_recording()
            .expect("send");
        assert!(broker.retained("root/obs/command").is_none());
    }

    #[test]
    fn test_handler_error_does_not_break_dispatch() {
        let broker = LocalBroker::new();
        let sender = broker.connect(Some("sender"));
        let receiver = broker.connect(Some("receiver"));

        let commands = ObsCommands::new(&receiver.handle(), "root");
        let calls = Arc::new(Mutex::new(0usize));
        let calls2 = Arc::clone(&calls);
        commands
            .channel()
            .on(ObsCommands::START_RECORDING, move |_| {
                *lock(&calls2) += 1;
                Err(Error::Callback("handler broke".to_string()))
            })
            .expect("handler");

        let sender_commands = ObsCommands::new(&sender.handle(), "root");
        sender_commands.start_recording().expect("send");
        sender_commands.start_recording().expect("send");
        receiver.process_events(Duration::from_millis(30));

        assert_eq!(*lock(&calls), 2);
    }
}
