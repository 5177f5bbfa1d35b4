//! Synchronized state primitives
//!
//! ## Responsibilities
//!
//! - `SyncedVariable`: one typed value mirrored to one broker topic
//! - `SyncedObject`: a fixed schema of variables under a topic prefix
//! - `SyncedObjectList`: dynamic membership of objects, itself synchronized
//!
//! Dependency order is strictly leaves-first: variable, then object, then
//! list. The domain specializations live in `cameras` and `positions`.

pub mod object;
pub mod object_list;
pub mod value;
pub mod variable;

pub use object::{Schema, SyncedObject};
pub use object_list::{ListChangedCallback, SyncedObjectList};
pub use value::{Value, ValueKind};
pub use variable::{ChangeCallback, SyncedVariable};
