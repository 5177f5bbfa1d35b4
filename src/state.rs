//! Console session state
//!
//! The explicit context object handed to everything that consumes the sync
//! core. Nothing in this crate reaches into global state; a presentation
//! layer owns one of these per broker session.

use crate::broker::ConnectionHandle;
use crate::cameras::CameraList;
use crate::commands::{CameraCommands, ObsCommands};
use crate::positions::PositionList;
use crate::settings::Settings;
use crate::Result;

/// All synchronized state for one routing-console session.
#[derive(Clone)]
pub struct ConsoleState {
    pub settings: Settings,
    pub cameras: CameraList,
    pub positions: PositionList,
    pub camera_commands: CameraCommands,
    pub obs_commands: ObsCommands,
}

impl ConsoleState {
    /// Build the full object graph under `settings.root_topic`.
    pub fn new(conn: &ConnectionHandle, settings: Settings) -> Self {
        let root = settings.root_topic.trim_end_matches('/').to_string();
        let cameras = CameraList::new(
            conn,
            format!("{root}/cameras"),
            settings.unresponsive_window(),
        );
        let positions = PositionList::new(
            conn,
            format!("{root}/positions"),
            settings.lock_durations(),
        );
        let camera_commands = CameraCommands::new(conn, &root);
        let obs_commands = ObsCommands::new(conn, &root);
        tracing::info!(root_topic = %root, "console state initialized");
        Self {
            settings,
            cameras,
            positions,
            camera_commands,
            obs_commands,
        }
    }

    /// Snapshot of the whole mirror, for dumps and diagnostics.
    pub fn to_record(&self) -> Result<serde_json::Value> {
        Ok(serde_json::json!({
            "cameras": self.cameras.to_record()?,
            "positions": self.positions.to_record()?,
        }))
    }
}
