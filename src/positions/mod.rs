//! Position list: output slots with time-boxed, access-controlled locking.
//!
//! ## Responsibilities
//!
//! - Mirror the position set and its per-position attributes
//! - The locking state machine over the `locked_until`/`lock_level` sentinel
//! - Lock-expiry timers: rescheduled on every `locked_until` change, firing
//!   the list-changed callback so consumers re-render
//!
//! The lock is a logical, multi-client mutual exclusion over broker state,
//! not an in-process primitive. Every sentinel write loops back through the
//! broker; the writer reacts to the echo like any other client.

mod types;

pub use types::{
    position_schema, LockDurations, Position, LEVEL_ADMIN, LEVEL_ROOT, POSITION_ATTRIBUTES,
};

use std::time::Duration;

use crate::broker::ConnectionHandle;
use crate::sync::object_list::{notify_changed_ref, SyncedObjectList};
use crate::sync::{SyncedObject, Value};
use crate::{Error, Result};

/// The synchronized set of output positions.
#[derive(Clone)]
pub struct PositionList {
    list: SyncedObjectList,
    conn: ConnectionHandle,
    defaults: LockDurations,
}

impl PositionList {
    pub fn new(conn: &ConnectionHandle, topic: impl Into<String>, defaults: LockDurations) -> Self {
        let list = SyncedObjectList::new(conn, topic, "positions", position_schema());

        // Every new position gets a lock-expiry watcher: whenever
        // locked_until changes, cancel and reschedule the expiry timer.
        let hook_conn = conn.clone();
        let hook_inner = list.inner_ref();
        list.set_child_hook(Box::new(move |object: &SyncedObject| {
            let name = object.name().to_string();
            let conn = hook_conn.clone();
            let inner = hook_inner.clone();
            let result = object.on_change("locked_until", move |value: &Value| {
                let locked_until = value.as_f64().unwrap_or(0.0);
                let key = format!("position-unlock/{name}");
                conn.cancel_timer(&key);
                let now = crate::epoch_seconds();
                if locked_until > now {
                    let timer_inner = inner.clone();
                    let timer_name = name.clone();
                    conn.schedule_timer(
                        &key,
                        Duration::from_secs_f64(locked_until - now),
                        move || {
                            tracing::info!(position = %timer_name, "position lock expired");
                            notify_changed_ref(&timer_inner, "positions");
                        },
                    );
                }
                Ok(())
            });
            if let Err(e) = result {
                tracing::error!(position = %object.name(), error = %e, "failed to watch lock");
            }
        }));

        Self {
            list,
            conn: conn.clone(),
            defaults,
        }
    }

    /// Typed wrapper for a position, or `None`.
    pub fn position(&self, name: &str) -> Option<Position> {
        self.list.get_by_name(name).map(Position::new)
    }

    pub fn add_or_get_by_name(&self, name: &str) -> Result<Position> {
        self.list.add_or_get_by_name(name).map(Position::new)
    }

    pub fn delete_by_name(&self, name: &str) -> Result<()> {
        self.conn.cancel_timer(&format!("position-unlock/{name}"));
        self.list.delete_by_name(name)
    }

    /// Whether `name` is locked against a caller at `level`.
    pub fn is_locked(&self, name: &str, level: &str) -> Result<bool> {
        self.position(name)
            .map(|position| position.is_locked(level))
            .ok_or_else(|| Error::NotFound(format!("position {name}")))
    }

    /// Lock `name` for `duration` seconds (or the per-level default).
    ///
    /// Only `"admin"` and `"root"` may lock; an unresolvable duration is a
    /// no-op, as is any request rejected by the monotonic-extension and
    /// access rules. The writes go out through the normal variable path.
    pub fn lock_position(&self, name: &str, level: &str, duration: Option<f64>) -> Result<()> {
        let has_access = level == LEVEL_ADMIN || level == LEVEL_ROOT;
        let duration = duration.or_else(|| self.defaults.for_level(level));
        let Some(duration) = duration.filter(|_| has_access) else {
            tracing::debug!(position = %name, level = %level, "not locking, no access at level");
            return Ok(());
        };
        let position = self
            .position(name)
            .ok_or_else(|| Error::NotFound(format!("position {name}")))?;
        position.lock_at(level, duration, crate::epoch_seconds())
    }

    pub fn names(&self) -> Vec<String> {
        self.list.names()
    }

    pub fn member_names(&self) -> Vec<String> {
        self.list.member_names()
    }

    pub fn positions(&self) -> Vec<Position> {
        self.list.objects().into_iter().map(Position::new).collect()
    }

    pub fn len(&self) -> usize {
        self.list.len()
    }

    pub fn is_empty(&self) -> bool {
        self.list.is_empty()
    }

    pub fn get_name_by_attr(&self, attr: &str, value: &Value) -> Option<String> {
        self.list.get_name_by_attr(attr, value)
    }

    pub fn get_names_by_attr(&self, attr: &str, value: &Value) -> Vec<String> {
        self.list.get_names_by_attr(attr, value)
    }

    pub fn on_list_changed(&self, callback: impl FnMut() -> Result<()> + Send + 'static) {
        self.list.on_list_changed(callback);
    }

    pub fn to_record(&self) -> Result<serde_json::Value> {
        self.list.to_record()
    }

    /// Underlying generic list.
    pub fn list(&self) -> &SyncedObjectList {
        &self.list
    }
}
