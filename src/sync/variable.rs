//! Synchronized variable: one typed value mirrored to one broker topic.

use std::sync::{Arc, Mutex};

use crate::broker::ConnectionHandle;
use crate::sync::{Value, ValueKind};
use crate::{lock, Result};

/// Change callback. Fires after every inbound decode (success or raw-string
/// fallback). An `Err` is caught and logged at the dispatch site so one
/// broken observer cannot desynchronize the pipeline.
pub type ChangeCallback = Box<dyn FnMut(&Value) -> Result<()> + Send>;

pub(crate) struct VarState {
    pub(crate) value: Value,
    pub(crate) callback: Option<ChangeCallback>,
}

/// A single typed value bound to one broker topic.
///
/// Local writes publish a retained message; the change callback fires only
/// when the broker echoes the update back, never on the local write itself.
/// Consumers must not assume instantaneous application.
#[derive(Clone)]
pub struct SyncedVariable {
    topic: String,
    kind: ValueKind,
    state: Arc<Mutex<VarState>>,
    conn: ConnectionHandle,
}

impl SyncedVariable {
    /// Bind a variable to `topic`. A subscribe failure is logged, not fatal;
    /// the variable stays at `initial` until traffic arrives.
    pub fn new(
        conn: &ConnectionHandle,
        topic: impl Into<String>,
        kind: ValueKind,
        initial: Value,
    ) -> Self {
        let topic = topic.into();
        let state = Arc::new(Mutex::new(VarState {
            value: initial,
            callback: None,
        }));
        conn.bind_variable(&topic, kind, Arc::downgrade(&state));
        Self {
            topic,
            kind,
            state,
            conn: conn.clone(),
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn kind(&self) -> ValueKind {
        self.kind
    }

    /// Current typed value. No side effects.
    pub fn get(&self) -> Value {
        lock(&self.state).value.clone()
    }

    /// Store locally, then publish the encoded value as a retained message.
    pub fn set(&self, value: impl Into<Value>) -> Result<()> {
        let value = value.into();
        lock(&self.state).value = value.clone();
        self.conn.publish(&self.topic, &value.encode(), true)
    }

    /// Re-publish the current value.
    ///
    /// Needed after in-place mutation of a structured value: the mutation is
    /// not itself an observable set, and the broker must see a fresh publish
    /// to notify other clients.
    pub fn force_publish(&self) -> Result<()> {
        let value = self.get();
        self.conn.publish(&self.topic, &value.encode(), true)
    }

    /// Register the change callback. One callback per variable: registering
    /// another replaces the previous one.
    pub fn on_change(&self, callback: impl FnMut(&Value) -> Result<()> + Send + 'static) {
        lock(&self.state).callback = Some(Box::new(callback));
    }
}

impl std::fmt::Debug for SyncedVariable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncedVariable")
            .field("topic", &self.topic)
            .field("kind", &self.kind)
            .field("value", &lock(&self.state).value)
            .finish()
    }
}

impl Drop for SyncedVariable {
    fn drop(&mut self) {
        // Last handle gone: release the route and the broker subscription.
        if Arc::strong_count(&self.state) == 1 {
            self.conn.unbind_variable(&self.topic);
        }
    }
}

/// Apply an inbound payload: decode per declared kind, store, then fire the
/// change callback. Decode-then-store is atomic with respect to the pump;
/// the callback runs with no locks held so it may read or write any
/// variable, including this one.
pub(crate) fn apply_inbound(
    state: &Arc<Mutex<VarState>>,
    kind: ValueKind,
    topic: &str,
    payload: &str,
) {
    let (decoded, fell_back) = Value::decode_checked(kind, payload);
    if fell_back {
        tracing::error!(
            topic = %topic,
            kind = %kind.name(),
            "error converting message, keeping raw string"
        );
    }
    let callback = {
        let mut st = lock(state);
        st.value = decoded.clone();
        st.callback.take()
    };
    if let Some(mut callback) = callback {
        if let Err(e) = callback(&decoded) {
            tracing::error!(topic = %topic, error = %e, "ignoring error in callback");
        }
        let mut st = lock(state);
        // The callback may have registered a replacement; keep the newer one.
        if st.callback.is_none() {
            st.callback = Some(callback);
        }
    }
}
