//! Synchronized object list: dynamic membership of synchronized objects.
//!
//! The membership itself is a structured synchronized variable holding the
//! array of current names. Remote membership changes reconcile by creating
//! missing children only; names that disappear remotely are NOT removed.
//! Removal happens solely through [`SyncedObjectList::delete_by_name`]; the
//! asymmetry is deliberate.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, Weak};

use crate::broker::ConnectionHandle;
use crate::sync::object::{Schema, SyncedObject};
use crate::sync::variable::SyncedVariable;
use crate::sync::{Value, ValueKind};
use crate::{lock, Result};

/// Fires after reconciliation and after lock-expiry/staleness notifications;
/// consumers re-render from scratch. One callback per list, replacement
/// semantics.
//
// TODO: promote this to an ordered list of callbacks; the specializations'
// internal watchers and the UI both want the same attribute slots.
pub type ListChangedCallback = Box<dyn FnMut() -> Result<()> + Send>;

/// Crate-internal hook run for every newly constructed child, from both
/// reconciliation and local adds. Specializations use it to attach their
/// per-attribute watchers.
pub(crate) type ChildHook = Box<dyn FnMut(&SyncedObject) + Send>;

pub(crate) struct ListInner {
    objects: BTreeMap<String, SyncedObject>,
    changed_callback: Option<ListChangedCallback>,
    child_hook: Option<ChildHook>,
}

pub(crate) type ListInnerRef = Weak<Mutex<ListInner>>;

/// Dynamic set of synchronized objects sharing one schema.
#[derive(Clone)]
pub struct SyncedObjectList {
    name: String,
    topic: String,
    schema: Schema,
    conn: ConnectionHandle,
    membership: SyncedVariable,
    inner: Arc<Mutex<ListInner>>,
}

impl SyncedObjectList {
    pub fn new(
        conn: &ConnectionHandle,
        topic: impl Into<String>,
        name: impl Into<String>,
        schema: Schema,
    ) -> Self {
        let topic = topic.into();
        let name = name.into();
        let inner = Arc::new(Mutex::new(ListInner {
            objects: BTreeMap::new(),
            changed_callback: None,
            child_hook: None,
        }));

        let membership = SyncedVariable::new(
            conn,
            topic.clone(),
            ValueKind::Structured,
            Value::Structured(serde_json::Value::Array(Vec::new())),
        );
        let weak = Arc::downgrade(&inner);
        let reconcile_conn = conn.clone();
        let reconcile_topic = topic.clone();
        let reconcile_name = name.clone();
        let reconcile_schema = schema.clone();
        membership.on_change(move |value| {
            reconcile(
                &weak,
                &reconcile_conn,
                &reconcile_topic,
                &reconcile_name,
                &reconcile_schema,
                value,
            );
            Ok(())
        });

        Self {
            name,
            topic,
            schema,
            conn: conn.clone(),
            membership,
            inner,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    /// Child by name, or `None`.
    pub fn get_by_name(&self, name: &str) -> Option<SyncedObject> {
        lock(&self.inner).objects.get(name).cloned()
    }

    /// Existing child, or construct it, append its name to the membership
    /// value, and explicitly re-publish the membership variable so other
    /// clients see the change.
    pub fn add_or_get_by_name(&self, name: &str) -> Result<SyncedObject> {
        if let Some(existing) = self.get_by_name(name) {
            return Ok(existing);
        }
        let object = SyncedObject::new(
            &self.conn,
            format!("{}/{}", self.topic, name),
            name,
            &self.schema,
        );
        lock(&self.inner)
            .objects
            .insert(name.to_string(), object.clone());
        run_child_hook(&self.inner, std::slice::from_ref(&object));

        let mut names = self.member_names();
        if !names.iter().any(|n| n == name) {
            names.push(name.to_string());
            self.membership.set(Value::from(names))?;
        }
        Ok(object)
    }

    /// Remove the local child and, if present in the membership value,
    /// remove the name and re-publish.
    pub fn delete_by_name(&self, name: &str) -> Result<()> {
        tracing::debug!(list = %self.name, object = %name, "deleting");
        lock(&self.inner).objects.remove(name);
        let mut names = self.member_names();
        if let Some(index) = names.iter().position(|n| n == name) {
            names.remove(index);
            self.membership.set(Value::from(names))?;
        }
        Ok(())
    }

    /// First child name whose attribute equals `value`, or `None`.
    pub fn get_name_by_attr(&self, attr: &str, value: &Value) -> Option<String> {
        let inner = lock(&self.inner);
        for (name, object) in inner.objects.iter() {
            if object.get(attr).map(|v| &v == value).unwrap_or(false) {
                return Some(name.clone());
            }
        }
        None
    }

    /// All child names whose attribute equals `value`.
    pub fn get_names_by_attr(&self, attr: &str, value: &Value) -> Vec<String> {
        let inner = lock(&self.inner);
        inner
            .objects
            .iter()
            .filter(|(_, object)| object.get(attr).map(|v| &v == value).unwrap_or(false))
            .map(|(name, _)| name.clone())
            .collect()
    }

    /// Snapshot of the current children. An iteration over the returned
    /// vector does not observe membership changes made after this call.
    pub fn objects(&self) -> Vec<SyncedObject> {
        lock(&self.inner).objects.values().cloned().collect()
    }

    /// Names of the current local children.
    pub fn names(&self) -> Vec<String> {
        lock(&self.inner).objects.keys().cloned().collect()
    }

    /// Names in the membership variable's current value.
    pub fn member_names(&self) -> Vec<String> {
        self.membership.get().as_string_array().unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        lock(&self.inner).objects.len()
    }

    pub fn is_empty(&self) -> bool {
        lock(&self.inner).objects.is_empty()
    }

    /// Register the list-changed callback. One callback per list:
    /// registering another replaces the previous one.
    pub fn on_list_changed(&self, callback: impl FnMut() -> Result<()> + Send + 'static) {
        lock(&self.inner).changed_callback = Some(Box::new(callback));
    }

    /// Snapshot of every child's record, keyed by name.
    pub fn to_record(&self) -> Result<serde_json::Value> {
        let mut record = serde_json::Map::new();
        for object in self.objects() {
            record.insert(object.name().to_string(), object.to_record()?);
        }
        Ok(serde_json::Value::Object(record))
    }

    pub(crate) fn set_child_hook(&self, hook: ChildHook) {
        lock(&self.inner).child_hook = Some(hook);
    }

    pub(crate) fn inner_ref(&self) -> ListInnerRef {
        Arc::downgrade(&self.inner)
    }
}

/// Reconciliation: construct a child for every name in the new membership
/// value that has none yet. Names absent from the new value are left alone.
fn reconcile(
    weak: &ListInnerRef,
    conn: &ConnectionHandle,
    topic: &str,
    list_name: &str,
    schema: &Schema,
    value: &Value,
) {
    let Some(inner) = weak.upgrade() else {
        return;
    };
    let names = value.as_string_array().unwrap_or_default();
    tracing::debug!(list = %list_name, members = ?names, "updated list");

    let mut created: Vec<SyncedObject> = Vec::new();
    {
        let mut guard = lock(&inner);
        for name in &names {
            if !guard.objects.contains_key(name) {
                let object =
                    SyncedObject::new(conn, format!("{}/{}", topic, name), name.clone(), schema);
                guard.objects.insert(name.clone(), object.clone());
                created.push(object);
            }
        }
    }
    if !created.is_empty() {
        run_child_hook(&inner, &created);
    }
    fire_changed(&inner, list_name);
}

/// Fire the list-changed callback through a weak reference. Used by timer
/// closures that must not keep the list alive.
pub(crate) fn notify_changed_ref(weak: &ListInnerRef, list_name: &str) {
    if let Some(inner) = weak.upgrade() {
        fire_changed(&inner, list_name);
    }
}

fn fire_changed(inner: &Arc<Mutex<ListInner>>, list_name: &str) {
    let callback = lock(inner).changed_callback.take();
    if let Some(mut callback) = callback {
        if let Err(e) = callback() {
            tracing::error!(list = %list_name, error = %e, "ignoring error in list callback");
        }
        let mut guard = lock(inner);
        if guard.changed_callback.is_none() {
            guard.changed_callback = Some(callback);
        }
    }
}

fn run_child_hook(inner: &Arc<Mutex<ListInner>>, objects: &[SyncedObject]) {
    let hook = lock(inner).child_hook.take();
    if let Some(mut hook) = hook {
        for object in objects {
            hook(object);
        }
        let mut guard = lock(inner);
        if guard.child_hook.is_none() {
            guard.child_hook = Some(hook);
        }
    }
}
