//! Connection manager: inbound dispatch, event pump, quiescence barrier.
//!
//! All state transitions in the sync layer happen while one of the pump
//! methods below is running: on delivery of a broker message, or when a
//! scheduled timer fires. There is no parallel mutation of the object graph,
//! so dispatch never holds a lock across a callback invocation.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, Weak};
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError};

use super::{topic_matches, BrokerLink, Delivery};
use crate::sync::variable::{self, VarState};
use crate::sync::ValueKind;
use crate::{lock, Result};

/// Poll granularity for the bounded-time pump.
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Callback for a raw topic tap: `(topic, payload)`.
pub type RawCallback = Box<dyn FnMut(&str, &str) + Send>;

type TimerCallback = Box<dyn FnOnce() + Send>;

/// Exact-topic route to a synchronized variable.
#[derive(Clone)]
struct VarRoute {
    kind: ValueKind,
    state: Weak<Mutex<VarState>>,
}

/// Wildcard-capable raw route (command channels, CLI taps).
struct TapRoute {
    filter: String,
    callback: Arc<Mutex<RawCallback>>,
}

#[derive(Default)]
struct RouteTable {
    variables: HashMap<String, VarRoute>,
    taps: Vec<TapRoute>,
}

struct TimerEntry {
    deadline: Instant,
    callback: TimerCallback,
}

#[derive(Default)]
struct TimerQueue {
    entries: HashMap<String, TimerEntry>,
}

/// Cheap clone handed to variables, lists, and command channels.
///
/// Carries the outbound link, the dispatch table, and the timer queue.
#[derive(Clone)]
pub struct ConnectionHandle {
    link: Arc<dyn BrokerLink>,
    routes: Arc<Mutex<RouteTable>>,
    timers: Arc<Mutex<TimerQueue>>,
}

impl ConnectionHandle {
    /// Publish a payload through the broker link.
    pub fn publish(&self, topic: &str, payload: &str, retain: bool) -> Result<()> {
        self.link.publish(topic, payload, retain)
    }

    /// Register an exact-topic route for a variable and subscribe its topic.
    ///
    /// One variable per topic per connection: registering a second variable
    /// on the same topic replaces the first route. A subscribe failure is
    /// logged, not fatal; the variable stays at its initial value until
    /// traffic arrives.
    pub(crate) fn bind_variable(&self, topic: &str, kind: ValueKind, state: Weak<Mutex<VarState>>) {
        let previous = lock(&self.routes)
            .variables
            .insert(topic.to_string(), VarRoute { kind, state });
        if previous.is_some() {
            tracing::warn!(topic = %topic, "replacing existing variable route for topic");
        }
        if let Err(e) = self.link.subscribe(topic) {
            tracing::error!(topic = %topic, error = %e, "failed to subscribe");
        }
    }

    /// Remove a variable route and unsubscribe its topic.
    pub(crate) fn unbind_variable(&self, topic: &str) {
        tracing::debug!(topic = %topic, "cleaning up subscription");
        lock(&self.routes).variables.remove(topic);
        if let Err(e) = self.link.unsubscribe(topic) {
            tracing::debug!(topic = %topic, error = %e, "unsubscribe failed");
        }
    }

    /// Attach a raw tap for a topic filter (`+`/`#` wildcards allowed).
    pub fn add_tap(
        &self,
        filter: &str,
        callback: impl FnMut(&str, &str) + Send + 'static,
    ) -> Result<()> {
        lock(&self.routes).taps.push(TapRoute {
            filter: filter.to_string(),
            callback: Arc::new(Mutex::new(Box::new(callback))),
        });
        self.link.subscribe(filter)
    }

    /// Schedule a named timer. Scheduling an existing key replaces it, which
    /// is how governing-attribute changes cancel-and-reschedule their timers.
    pub fn schedule_timer(&self, key: &str, after: Duration, callback: impl FnOnce() + Send + 'static) {
        lock(&self.timers).entries.insert(
            key.to_string(),
            TimerEntry {
                deadline: Instant::now() + after,
                callback: Box::new(callback),
            },
        );
    }

    /// Cancel a named timer if present.
    pub fn cancel_timer(&self, key: &str) {
        lock(&self.timers).entries.remove(key);
    }

    /// Apply one delivery: exact variable route first, then wildcard taps.
    pub(crate) fn dispatch(&self, delivery: &Delivery) {
        let route = lock(&self.routes).variables.get(&delivery.topic).cloned();
        if let Some(route) = route {
            match route.state.upgrade() {
                Some(state) => {
                    variable::apply_inbound(&state, route.kind, &delivery.topic, &delivery.payload);
                }
                None => {
                    // Variable dropped without unbinding; prune lazily.
                    lock(&self.routes).variables.remove(&delivery.topic);
                }
            }
        }

        let taps: Vec<Arc<Mutex<RawCallback>>> = lock(&self.routes)
            .taps
            .iter()
            .filter(|tap| topic_matches(&tap.filter, &delivery.topic))
            .map(|tap| Arc::clone(&tap.callback))
            .collect();
        for tap in taps {
            let mut callback = lock(&tap);
            (callback)(&delivery.topic, &delivery.payload);
        }
    }

    /// Run every timer whose deadline has passed. Callbacks run outside the
    /// queue lock so they may schedule or cancel freely.
    pub(crate) fn run_due_timers(&self) {
        let now = Instant::now();
        let due: Vec<(String, TimerCallback)> = {
            let mut timers = lock(&self.timers);
            let keys: Vec<String> = timers
                .entries
                .iter()
                .filter(|(_, entry)| entry.deadline <= now)
                .map(|(key, _)| key.clone())
                .collect();
            keys.into_iter()
                .filter_map(|key| timers.entries.remove(&key).map(|entry| (key, entry.callback)))
                .collect()
        };
        for (key, callback) in due {
            tracing::trace!(timer = %key, "timer fired");
            callback();
        }
    }

    fn next_timer_deadline(&self) -> Option<Instant> {
        lock(&self.timers)
            .entries
            .values()
            .map(|entry| entry.deadline)
            .min()
    }
}

/// Owns the inbound delivery queue for one broker session.
///
/// The pump methods are the only place the object graph mutates; callers
/// drive them from their own loop (single-threaded, cooperative).
pub struct ConnectionManager {
    handle: ConnectionHandle,
    inbound: Receiver<Delivery>,
}

impl ConnectionManager {
    pub fn new(link: Arc<dyn BrokerLink>, inbound: Receiver<Delivery>) -> Self {
        Self {
            handle: ConnectionHandle {
                link,
                routes: Arc::new(Mutex::new(RouteTable::default())),
                timers: Arc::new(Mutex::new(TimerQueue::default())),
            },
            inbound,
        }
    }

    /// Handle for constructing variables, lists, and command channels.
    pub fn handle(&self) -> ConnectionHandle {
        self.handle.clone()
    }

    /// Process deliveries until the queue stays idle for `idle`.
    ///
    /// Every delivery resets the idle window, so this may never return on a
    /// busy connection; use [`process_events_for`](Self::process_events_for)
    /// when an upper bound is needed.
    pub fn process_events(&self, idle: Duration) {
        let mut idle_deadline = Instant::now() + idle;
        loop {
            self.handle.run_due_timers();
            let now = Instant::now();
            if now >= idle_deadline {
                break;
            }
            let mut wait = idle_deadline - now;
            if let Some(deadline) = self.handle.next_timer_deadline() {
                wait = wait.min(deadline.saturating_duration_since(now));
            }
            match self.inbound.recv_timeout(wait) {
                Ok(delivery) => {
                    self.handle.dispatch(&delivery);
                    idle_deadline = Instant::now() + idle;
                }
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }
    }

    /// Process deliveries for at most `max_time`. With `quit_early`, return
    /// as soon as the queue is empty.
    pub fn process_events_for(&self, max_time: Duration, quit_early: bool) {
        let deadline = Instant::now() + max_time;
        loop {
            self.handle.run_due_timers();
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            match self.inbound.recv_timeout(POLL_INTERVAL.min(deadline - now)) {
                Ok(delivery) => self.handle.dispatch(&delivery),
                Err(RecvTimeoutError::Timeout) => {
                    if quit_early {
                        break;
                    }
                }
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }
    }

    /// Startup quiescence barrier.
    ///
    /// Resolves once no previously-unseen topic has produced its first
    /// message within `idle_window`. Only a topic's FIRST message resets the
    /// window; repeat traffic on an already-seen topic (screenshot streams)
    /// does not keep the barrier open. Each call tracks its own seen set.
    ///
    /// Returns the number of distinct topics observed.
    pub fn wait_for_initial_state(&self, idle_window: Duration) -> usize {
        let mut seen: HashSet<String> = HashSet::new();
        let mut deadline = Instant::now() + idle_window;
        loop {
            self.handle.run_due_timers();
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            match self.inbound.recv_timeout(deadline - now) {
                Ok(delivery) => {
                    let first = seen.insert(delivery.topic.clone());
                    self.handle.dispatch(&delivery);
                    if first {
                        deadline = Instant::now() + idle_window;
                    }
                }
                Err(RecvTimeoutError::Timeout) => break,
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }
        tracing::debug!(topics = seen.len(), "initial state settled");
        seen.len()
    }
}
