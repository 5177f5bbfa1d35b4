//! In-process broker with retained-message semantics.
//!
//! Backs the test suite and the simulation CLI. Behaves like a real broker
//! for everything the sync layer relies on: retained messages are replayed
//! on subscribe, publishes loop back to the publisher's own session, and an
//! empty retained payload clears the retained slot.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex};

use crossbeam_channel::{unbounded, Sender};
use uuid::Uuid;

use super::{topic_matches, BrokerLink, ConnectionManager, Delivery};
use crate::{lock, Error, Result};

struct Session {
    client_id: String,
    sender: Sender<Delivery>,
    filters: HashSet<String>,
}

#[derive(Default)]
struct BrokerCore {
    retained: BTreeMap<String, String>,
    sessions: HashMap<Uuid, Session>,
}

/// In-process publish/subscribe hub.
#[derive(Clone, Default)]
pub struct LocalBroker {
    core: Arc<Mutex<BrokerCore>>,
}

impl LocalBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a session and return its connection manager.
    ///
    /// A missing client id gets a generated one, mirroring how real broker
    /// clients behave.
    pub fn connect(&self, client_id: Option<&str>) -> ConnectionManager {
        let client_id = client_id
            .map(str::to_string)
            .unwrap_or_else(|| format!("camsync-{}", Uuid::new_v4()));
        let (sender, receiver) = unbounded();
        let session_id = Uuid::new_v4();
        lock(&self.core).sessions.insert(
            session_id,
            Session {
                client_id: client_id.clone(),
                sender,
                filters: HashSet::new(),
            },
        );
        tracing::debug!(client_id = %client_id, "client connected");
        let link = Arc::new(LocalLink {
            core: Arc::clone(&self.core),
            session_id,
        });
        ConnectionManager::new(link, receiver)
    }

    /// Retained payload for a topic, if any. Inspection helper.
    pub fn retained(&self, topic: &str) -> Option<String> {
        lock(&self.core).retained.get(topic).cloned()
    }

    /// Snapshot of every retained topic. Inspection helper.
    pub fn retained_snapshot(&self) -> BTreeMap<String, String> {
        lock(&self.core).retained.clone()
    }
}

struct LocalLink {
    core: Arc<Mutex<BrokerCore>>,
    session_id: Uuid,
}

impl BrokerLink for LocalLink {
    fn publish(&self, topic: &str, payload: &str, retain: bool) -> Result<()> {
        let mut core = lock(&self.core);
        if retain {
            if payload.is_empty() {
                core.retained.remove(topic);
            } else {
                core.retained.insert(topic.to_string(), payload.to_string());
            }
        }
        let mut dead: Vec<Uuid> = Vec::new();
        for (id, session) in core.sessions.iter() {
            if !session.filters.iter().any(|f| topic_matches(f, topic)) {
                continue;
            }
            let delivery = Delivery {
                topic: topic.to_string(),
                payload: payload.to_string(),
            };
            if session.sender.send(delivery).is_err() {
                dead.push(*id);
            }
        }
        for id in dead {
            if let Some(session) = core.sessions.remove(&id) {
                tracing::debug!(client_id = %session.client_id, "dropping dead session");
            }
        }
        Ok(())
    }

    fn subscribe(&self, filter: &str) -> Result<()> {
        let mut core = lock(&self.core);
        let replays: Vec<Delivery> = core
            .retained
            .iter()
            .filter(|(topic, _)| topic_matches(filter, topic))
            .map(|(topic, payload)| Delivery {
                topic: topic.clone(),
                payload: payload.clone(),
            })
            .collect();
        let session = core
            .sessions
            .get_mut(&self.session_id)
            .ok_or_else(|| Error::Broker("session closed".to_string()))?;
        session.filters.insert(filter.to_string());
        // Real brokers replay retained messages on every subscribe.
        for delivery in replays {
            let _ = session.sender.send(delivery);
        }
        Ok(())
    }

    fn unsubscribe(&self, filter: &str) -> Result<()> {
        let mut core = lock(&self.core);
        let session = core
            .sessions
            .get_mut(&self.session_id)
            .ok_or_else(|| Error::Broker("session closed".to_string()))?;
        session.filters.remove(filter);
        Ok(())
    }
}

impl Drop for LocalLink {
    fn drop(&mut self) {
        let mut core = lock(&self.core);
        if let Some(session) = core.sessions.remove(&self.session_id) {
            tracing::debug!(client_id = %session.client_id, "client disconnected");
        }
    }
}
