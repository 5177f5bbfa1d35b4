//! Synchronized object: a fixed set of named variables under a topic prefix.

use std::sync::Arc;

use crate::broker::ConnectionHandle;
use crate::sync::variable::SyncedVariable;
use crate::sync::{Value, ValueKind};
use crate::{Error, Result};

/// Ordered attribute schema applied to an object (and to every child of a
/// list). Keys are unique; order is declaration order.
#[derive(Debug, Clone)]
pub struct Schema(Arc<Vec<(String, ValueKind)>>);

impl Schema {
    pub fn new(entries: &[(&str, ValueKind)]) -> Self {
        Self(Arc::new(
            entries
                .iter()
                .map(|(attr, kind)| (attr.to_string(), *kind))
                .collect(),
        ))
    }

    pub fn iter(&self) -> impl Iterator<Item = &(String, ValueKind)> {
        self.0.iter()
    }

    pub fn contains(&self, attr: &str) -> bool {
        self.0.iter().any(|(a, _)| a == attr)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// A named, addressable bag of synchronized variables.
///
/// Has no state of its own: each attribute lives in its own variable under
/// `<topic>/<attr>`. Cloning shares the underlying variables.
#[derive(Debug, Clone)]
pub struct SyncedObject {
    name: String,
    topic: String,
    attributes: Vec<(String, SyncedVariable)>,
}

impl SyncedObject {
    pub fn new(
        conn: &ConnectionHandle,
        topic: impl Into<String>,
        name: impl Into<String>,
        schema: &Schema,
    ) -> Self {
        let topic = topic.into();
        let attributes = schema
            .iter()
            .map(|(attr, kind)| {
                let variable = SyncedVariable::new(
                    conn,
                    format!("{}/{}", topic, attr),
                    *kind,
                    Value::Null,
                );
                (attr.clone(), variable)
            })
            .collect();
        Self {
            name: name.into(),
            topic,
            attributes,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Underlying variable for an attribute, if it is in the schema.
    pub fn variable(&self, attr: &str) -> Option<&SyncedVariable> {
        self.attributes
            .iter()
            .find(|(a, _)| a == attr)
            .map(|(_, v)| v)
    }

    /// Current value of an attribute.
    pub fn get(&self, attr: &str) -> Result<Value> {
        self.variable(attr)
            .map(SyncedVariable::get)
            .ok_or_else(|| Error::UnknownAttribute(attr.to_string()))
    }

    /// Set an attribute: stores locally and publishes retained.
    pub fn set(&self, attr: &str, value: impl Into<Value>) -> Result<()> {
        self.variable(attr)
            .ok_or_else(|| Error::UnknownAttribute(attr.to_string()))?
            .set(value)
    }

    /// Register the change callback for one attribute. One callback per
    /// attribute: registering another replaces the previous one.
    pub fn on_change(
        &self,
        attr: &str,
        callback: impl FnMut(&Value) -> Result<()> + Send + 'static,
    ) -> Result<()> {
        self.variable(attr)
            .ok_or_else(|| Error::UnknownAttribute(attr.to_string()))?
            .on_change(callback);
        Ok(())
    }

    /// Attributes in declaration order.
    pub fn attributes(&self) -> impl Iterator<Item = (&str, &SyncedVariable)> {
        self.attributes.iter().map(|(a, v)| (a.as_str(), v))
    }

    /// Snapshot of all current attribute values, for transmission or logging.
    pub fn to_record(&self) -> Result<serde_json::Value> {
        let mut record = serde_json::Map::new();
        for (attr, variable) in &self.attributes {
            record.insert(attr.clone(), serde_json::to_value(variable.get())?);
        }
        Ok(serde_json::Value::Object(record))
    }
}
