//! Broker transport layer
//!
//! ## Responsibilities
//!
//! - `BrokerLink`: the outbound client surface of the publish/subscribe broker
//! - `ConnectionManager` / `ConnectionHandle`: inbound dispatch, event pump,
//!   startup quiescence barrier, timer queue
//! - `LocalBroker`: in-process retained-message broker for tests and the
//!   simulation CLI
//!
//! The broker itself is an external collaborator; everything here only
//! assumes retained-message publish/subscribe with per-topic publish order.

mod connection;
mod local;

pub use connection::{ConnectionHandle, ConnectionManager, RawCallback};
pub use local::LocalBroker;

use crate::Result;

/// One inbound message from the broker.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub topic: String,
    pub payload: String,
}

/// Outbound client surface of a publish/subscribe broker.
///
/// Implementations deliver inbound traffic for subscribed filters into the
/// channel handed out at connect time. Retained publishes must loop back to
/// the publishing client as well; the sync layer reacts to the echo, never to
/// the local write.
pub trait BrokerLink: Send + Sync {
    /// Publish a payload. Retained messages persist for late subscribers.
    fn publish(&self, topic: &str, payload: &str, retain: bool) -> Result<()>;

    /// Subscribe to a topic filter (`+`/`#` wildcards allowed).
    fn subscribe(&self, filter: &str) -> Result<()>;

    /// Unsubscribe from a previously subscribed filter.
    fn unsubscribe(&self, filter: &str) -> Result<()>;
}

/// MQTT-style topic filter matching (`+` one level, `#` remaining levels).
pub fn topic_matches(filter: &str, topic: &str) -> bool {
    let mut filter_parts = filter.split('/');
    let mut topic_parts = topic.split('/');
    loop {
        match (filter_parts.next(), topic_parts.next()) {
            (Some("#"), _) => return true,
            (Some("+"), Some(_)) => continue,
            (Some(f), Some(t)) if f == t => continue,
            (None, None) => return true,
            _ => return false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exact_match() {
        assert!(topic_matches("a/b/c", "a/b/c"));
        assert!(!topic_matches("a/b/c", "a/b"));
        assert!(!topic_matches("a/b", "a/b/c"));
    }

    #[test]
    fn test_single_level_wildcard() {
        assert!(topic_matches("a/+/c", "a/b/c"));
        assert!(!topic_matches("a/+/c", "a/b/d"));
        assert!(!topic_matches("a/+", "a/b/c"));
    }

    #[test]
    fn test_multi_level_wildcard() {
        assert!(topic_matches("a/#", "a/b/c"));
        assert!(topic_matches("a/#", "a"));
        assert!(topic_matches("#", "anything/at/all"));
        assert!(!topic_matches("a/#", "b/c"));
    }
}
