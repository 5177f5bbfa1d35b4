//! camsync - broker-synchronized state core for a multi-camera routing console
//!
//! Mirrors remote, broker-published state into a local, typed,
//! change-notifying object graph, and layers a time-boxed, access-controlled
//! position-locking scheme on top of that mirror.
//!
//! ## Architecture
//!
//! 1. Broker - transport trait, connection manager, quiescence barrier
//! 2. SyncedVariable - one typed value mirrored to one topic
//! 3. SyncedObject - fixed schema of variables under a topic prefix
//! 4. SyncedObjectList - dynamic membership, itself synchronized
//! 5. Cameras - camera specialization, PTZ commands, staleness tracking
//! 6. Positions - position specialization, the locking state machine
//! 7. Commands - non-retained JSON command envelopes
//! 8. Settings - file/env configuration, broker-mirrored snapshot
//!
//! ## Design Principles
//!
//! - Single-threaded, cooperative, event-driven: all state transitions
//!   happen on message delivery or timer expiry inside the event pump
//! - Mutual exclusion between operators is the `locked_until`/`lock_level`
//!   protocol over broker state, never an in-process primitive
//! - A client reacts to its own writes only via the broker echo

pub mod broker;
pub mod cameras;
pub mod commands;
pub mod error;
pub mod positions;
pub mod settings;
pub mod state;
pub mod sync;

pub use error::{Error, Result};
pub use state::ConsoleState;

use std::sync::{Mutex, MutexGuard, PoisonError};

/// Lock a mutex, recovering the guard if a panicking test poisoned it.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Current wall-clock time as epoch seconds, the unit of `locked_until` and
/// command timestamps.
pub(crate) fn epoch_seconds() -> f64 {
    chrono::Utc::now().timestamp_micros() as f64 / 1_000_000.0
}
