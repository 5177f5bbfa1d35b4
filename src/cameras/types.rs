//! Camera data types and PTZ locking rules.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::positions::{LEVEL_ADMIN, LEVEL_ROOT};
use crate::sync::{Schema, SyncedObject, Value, ValueKind};
use crate::{Error, Result};

/// Attribute schema for a camera.
pub const CAMERA_ATTRIBUTES: &[(&str, ValueKind)] = &[
    ("type", ValueKind::String),
    ("address", ValueKind::String),
    ("rtspurl", ValueKind::String),
    ("jpgurl", ValueKind::String),
    ("pingurl", ValueKind::String),
    ("audiourl", ValueKind::String),
    ("ispublic", ValueKind::Boolean),
    ("ishidden", ValueKind::Boolean),
    ("nothumb", ValueKind::Boolean),
    ("noaudio", ValueKind::Boolean),
    ("screenshot", ValueKind::String),
    ("last_screenshot_timestamp", ValueKind::String),
    ("error_message", ValueKind::String),
    ("prior_ptz_positions", ValueKind::Structured),
    ("known_ptz_positions", ValueKind::Structured),
    ("ptz_locked", ValueKind::String),
    ("ptz_arrived", ValueKind::Structured),
];

pub fn camera_schema() -> Schema {
    Schema::new(CAMERA_ATTRIBUTES)
}

/// Pan/tilt/zoom coordinates, serialized as a 3-element array.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PtzCoords(pub f64, pub f64, pub f64);

impl PtzCoords {
    pub fn new(pan: f64, tilt: f64, zoom: f64) -> Self {
        Self(pan, tilt, zoom)
    }

    pub fn pan(&self) -> f64 {
        self.0
    }

    pub fn tilt(&self) -> f64 {
        self.1
    }

    pub fn zoom(&self) -> f64 {
        self.2
    }
}

/// Typed accessors over a camera's synchronized object.
#[derive(Debug, Clone)]
pub struct Camera {
    object: SyncedObject,
}

impl Camera {
    pub fn new(object: SyncedObject) -> Self {
        Self { object }
    }

    pub fn name(&self) -> &str {
        self.object.name()
    }

    pub fn object(&self) -> &SyncedObject {
        &self.object
    }

    fn attr(&self, name: &str) -> Value {
        self.object.get(name).unwrap_or(Value::Null)
    }

    fn string_attr(&self, name: &str) -> String {
        self.attr(name).as_str().unwrap_or_default().to_string()
    }

    pub fn camera_type(&self) -> String {
        self.string_attr("type")
    }

    pub fn set_camera_type(&self, camera_type: &str) -> Result<()> {
        self.object.set("type", camera_type)
    }

    pub fn address(&self) -> String {
        self.string_attr("address")
    }

    pub fn set_address(&self, address: &str) -> Result<()> {
        self.object.set("address", address)
    }

    pub fn rtsp_url(&self) -> String {
        self.string_attr("rtspurl")
    }

    pub fn set_rtsp_url(&self, url: &str) -> Result<()> {
        self.object.set("rtspurl", url)
    }

    pub fn jpg_url(&self) -> String {
        self.string_attr("jpgurl")
    }

    pub fn set_jpg_url(&self, url: &str) -> Result<()> {
        self.object.set("jpgurl", url)
    }

    pub fn ping_url(&self) -> String {
        self.string_attr("pingurl")
    }

    pub fn set_ping_url(&self, url: &str) -> Result<()> {
        self.object.set("pingurl", url)
    }

    pub fn audio_url(&self) -> String {
        self.string_attr("audiourl")
    }

    pub fn set_audio_url(&self, url: &str) -> Result<()> {
        self.object.set("audiourl", url)
    }

    pub fn is_public(&self) -> bool {
        self.attr("ispublic").as_bool().unwrap_or(false)
    }

    pub fn set_is_public(&self, ispublic: bool) -> Result<()> {
        self.object.set("ispublic", ispublic)
    }

    pub fn is_hidden(&self) -> bool {
        self.attr("ishidden").as_bool().unwrap_or(false)
    }

    pub fn set_is_hidden(&self, ishidden: bool) -> Result<()> {
        self.object.set("ishidden", ishidden)
    }

    pub fn no_thumb(&self) -> bool {
        self.attr("nothumb").as_bool().unwrap_or(false)
    }

    pub fn set_no_thumb(&self, nothumb: bool) -> Result<()> {
        self.object.set("nothumb", nothumb)
    }

    pub fn no_audio(&self) -> bool {
        self.attr("noaudio").as_bool().unwrap_or(false)
    }

    pub fn set_no_audio(&self, noaudio: bool) -> Result<()> {
        self.object.set("noaudio", noaudio)
    }

    pub fn screenshot(&self) -> String {
        self.string_attr("screenshot")
    }

    pub fn last_screenshot_timestamp(&self) -> String {
        self.string_attr("last_screenshot_timestamp")
    }

    pub fn error_message(&self) -> String {
        self.string_attr("error_message")
    }

    pub fn set_error_message(&self, message: &str) -> Result<()> {
        self.object.set("error_message", message)
    }

    /// Stack of previously visited PTZ coordinates, newest last.
    pub fn prior_ptz_positions(&self) -> Vec<PtzCoords> {
        self.attr("prior_ptz_positions")
            .as_json()
            .and_then(|doc| serde_json::from_value(doc.clone()).ok())
            .unwrap_or_default()
    }

    /// Named PTZ presets.
    pub fn known_ptz_positions(&self) -> BTreeMap<String, PtzCoords> {
        self.attr("known_ptz_positions")
            .as_json()
            .and_then(|doc| serde_json::from_value(doc.clone()).ok())
            .unwrap_or_default()
    }

    pub fn ptz_arrived(&self) -> Option<serde_json::Value> {
        self.attr("ptz_arrived").as_json().cloned()
    }

    /// Level that currently holds the PTZ lock, empty when unlocked.
    pub fn ptz_locked(&self) -> String {
        self.string_attr("ptz_locked")
    }

    pub fn set_ptz_locked(&self, level: &str) -> Result<()> {
        self.object.set("ptz_locked", level)
    }

    /// Whether PTZ movement is locked against a caller at `level`.
    ///
    /// Root bypasses every lock, a level is never locked out by its own
    /// lock, and an admin is locked out only by root.
    pub fn is_ptz_locked(&self, level: &str) -> bool {
        let locked_by = self.ptz_locked();
        if locked_by.is_empty() {
            return false;
        }
        if level == LEVEL_ROOT {
            tracing::debug!(camera = %self.name(), locked_by = %locked_by, "you are root");
            return false;
        }
        if level == locked_by {
            return false;
        }
        if level == LEVEL_ADMIN && locked_by == LEVEL_ROOT {
            tracing::debug!(camera = %self.name(), "locked by root, you are admin");
            return true;
        }
        tracing::debug!(
            camera = %self.name(),
            locked_by = %locked_by,
            level = %level,
            "unexpected lock combination"
        );
        true
    }

    /// Take the PTZ lock at `level`. Unprivileged callers cannot lock.
    pub fn lock_ptz(&self, level: &str) -> Result<()> {
        if self.is_ptz_locked(level) {
            tracing::debug!(camera = %self.name(), "camera already locked");
            return Ok(());
        }
        if level != LEVEL_ADMIN && level != LEVEL_ROOT {
            return Err(Error::Forbidden(format!("'{level}' cannot apply a lock")));
        }
        self.set_ptz_locked(level)
    }

    /// Release the PTZ lock.
    pub fn unlock_ptz(&self) -> Result<()> {
        self.set_ptz_locked("")
    }
}
