//! Position data types and the per-position locking rules.

use serde::{Deserialize, Serialize};

use crate::sync::{Schema, SyncedObject, Value, ValueKind};
use crate::Result;

/// Attribute schema for an output position.
pub const POSITION_ATTRIBUTES: &[(&str, ValueKind)] = &[
    ("active", ValueKind::String),
    ("requested", ValueKind::String),
    ("isaudio", ValueKind::Boolean),
    ("locked_until", ValueKind::Float),
    ("lock_level", ValueKind::String),
    ("nice_name", ValueKind::String),
    ("obs_item_default", ValueKind::Structured),
];

pub fn position_schema() -> Schema {
    Schema::new(POSITION_ATTRIBUTES)
}

/// Access levels with locking privileges. Anything else is an unprivileged
/// caller; levels are plain strings because callers supply their own.
pub const LEVEL_ADMIN: &str = "admin";
pub const LEVEL_ROOT: &str = "root";

/// Default lock durations per access level, in seconds.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct LockDurations {
    pub admin: f64,
    pub root: f64,
}

impl LockDurations {
    /// Default duration for an access level, if the level has one.
    pub fn for_level(&self, level: &str) -> Option<f64> {
        match level {
            LEVEL_ADMIN => Some(self.admin),
            LEVEL_ROOT => Some(self.root),
            _ => None,
        }
    }
}

impl Default for LockDurations {
    fn default() -> Self {
        Self {
            admin: 120.0,
            root: 20.0,
        }
    }
}

/// Typed accessors over a position's synchronized object.
///
/// `locked_until` is an epoch-seconds sentinel: `0` unlocked, positive =
/// locked until that timestamp, negative = locked indefinitely. `lock_level`
/// is meaningful only while locked.
#[derive(Debug, Clone)]
pub struct Position {
    object: SyncedObject,
}

impl Position {
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

    /// Camera currently routed into this position.
    pub fn active(&self) -> String {
        self.attr("active").as_str().unwrap_or_default().to_string()
    }

    pub fn set_active(&self, camera_name: &str) -> Result<()> {
        self.object.set("active", camera_name)
    }

    /// Camera requested but not yet switched in.
    pub fn requested(&self) -> String {
        self.attr("requested")
            .as_str()
            .unwrap_or_default()
            .to_string()
    }

    pub fn set_requested(&self, camera_name: &str) -> Result<()> {
        self.object.set("requested", camera_name)
    }

    pub fn is_audio(&self) -> bool {
        self.attr("isaudio").as_bool().unwrap_or(false)
    }

    pub fn set_is_audio(&self, isaudio: bool) -> Result<()> {
        self.object.set("isaudio", isaudio)
    }

    /// Lock sentinel. An unset or undecodable value reads as unlocked.
    pub fn locked_until(&self) -> f64 {
        self.attr("locked_until").as_f64().unwrap_or(0.0)
    }

    /// Sentinel write: `0` unlocks immediately, a negative value locks
    /// forever. Goes through the normal variable publish path.
    pub fn set_locked_until(&self, locked_until: f64) -> Result<()> {
        self.object.set("locked_until", locked_until)
    }

    pub fn lock_level(&self) -> String {
        self.attr("lock_level")
            .as_str()
            .unwrap_or_default()
            .to_string()
    }

    pub fn set_lock_level(&self, level: &str) -> Result<()> {
        self.object.set("lock_level", level)
    }

    pub fn nice_name(&self) -> String {
        self.attr("nice_name")
            .as_str()
            .unwrap_or_default()
            .to_string()
    }

    pub fn set_nice_name(&self, nice_name: &str) -> Result<()> {
        self.object.set("nice_name", nice_name)
    }

    pub fn obs_item_default(&self) -> Option<serde_json::Value> {
        self.attr("obs_item_default").as_json().cloned()
    }

    /// Whether the position is locked against a caller at `level`, now.
    pub fn is_locked(&self, level: &str) -> bool {
        self.is_locked_at(level, crate::epoch_seconds())
    }

    /// Lock check against an explicit clock reading.
    pub fn is_locked_at(&self, level: &str, now: f64) -> bool {
        if level == LEVEL_ROOT {
            tracing::debug!(position = %self.name(), "root bypasses locks");
            return false;
        }
        let locked_until = self.locked_until();
        if locked_until < 0.0 {
            tracing::debug!(position = %self.name(), "locked indefinitely");
            return true;
        }
        let remaining = locked_until - now;
        if remaining <= 0.0 {
            // Unlocked, or expired but not yet reset.
            return false;
        }
        tracing::debug!(
            position = %self.name(),
            remaining = %format!("{remaining:.0}"),
            lock_level = %self.lock_level(),
            "position locked"
        );
        // An admin may override another admin's timed lock, never root's.
        !(level == LEVEL_ADMIN && self.lock_level() == LEVEL_ADMIN)
    }

    /// Apply a lock for `duration` seconds as of `now`.
    ///
    /// A non-positive duration unlocks. Refuses to shorten a longer existing
    /// lock, to touch an indefinite lock, or to relock a position that is
    /// locked against this caller.
    pub(crate) fn lock_at(&self, level: &str, duration: f64, now: f64) -> Result<()> {
        let mut lock_until = now + duration;
        if duration <= 0.0 {
            tracing::debug!(position = %self.name(), "unlocking");
            lock_until = 0.0;
        } else if self.locked_until() > lock_until {
            tracing::debug!(
                position = %self.name(),
                "not locking, already locked for a longer duration"
            );
            return Ok(());
        } else if self.locked_until() < 0.0 {
            tracing::debug!(position = %self.name(), "not locking, already locked forever");
            return Ok(());
        }
        if self.is_locked_at(level, now) {
            // Only true when the existing lock outranks this caller.
            tracing::debug!(
                position = %self.name(),
                level = %level,
                "not locking, locked against this level"
            );
            return Ok(());
        }

        self.set_locked_until(lock_until)?;
        self.set_lock_level(level)?;
        tracing::info!(
            position = %self.name(),
            level = %level,
            locked_until = %format!("{lock_until:.0}"),
            "position locked"
        );
        Ok(())
    }
}
